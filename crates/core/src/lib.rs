//! relaychat core library
//!
//! The protocol client and contact-state engine behind the chat front end:
//! identity and keys, contact relations, the relay connection, and the
//! asymmetric encryption boundary for message bodies. Everything visual or
//! audible lives on the other side of [`FrontendDelegate`].

pub mod client;
pub mod contacts;
pub mod crypto;
pub mod error;
pub mod events;
pub mod identity;
pub mod protocol;
pub mod settings;

// Re-export important types for easier access
pub use client::{ListenerStats, RelayClient};
pub use contacts::{ContactProfile, ContactStore, MessageHistory, MessageRecord};
pub use error::CoreError;
pub use events::{FrontendDelegate, NullFrontend, SoundCue, UiEvent};
pub use identity::Identity;
pub use protocol::Packet;
pub use settings::{MiscSettings, Settings};

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use client::Listener;
use protocol::now_millis;
use settings::SETTINGS_FILE;

/// Default relay endpoint, matching the deployed relay.
pub const DEFAULT_RELAY_ADDR: &str = "localhost:42714";

/// Construction parameters for [`RelayChatCore`].
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Directory holding the identity, settings and contact folders
    pub data_root: PathBuf,
    /// host:port of the relay server
    pub relay_addr: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            data_root: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("relaychat"),
            relay_addr: DEFAULT_RELAY_ADDR.to_string(),
        }
    }
}

/// The application context: one instance owns every piece of core state and
/// is passed by reference to whoever needs it. All externally-exposed
/// operations are methods on it.
pub struct RelayChatCore {
    identity: Arc<Identity>,
    settings: RwLock<Settings>,
    settings_path: PathBuf,
    store: Arc<Mutex<ContactStore>>,
    client: RelayClient,
    delegate: Arc<dyn FrontendDelegate>,
    stats: Arc<RwLock<ListenerStats>>,
}

impl RelayChatCore {
    /// Bring up the core from durable storage: identity (created on first
    /// run), settings (whose absence is fatal), and the contact store's
    /// recovery scan. Does not touch the network; call [`connect`] for that.
    ///
    /// [`connect`]: RelayChatCore::connect
    pub fn new(
        config: CoreConfig,
        delegate: Arc<dyn FrontendDelegate>,
    ) -> Result<Self, CoreError> {
        fs::create_dir_all(&config.data_root)?;

        let identity = Arc::new(Identity::load_or_create(&config.data_root)?);

        let settings_path = config.data_root.join(SETTINGS_FILE);
        let settings = Settings::load(&settings_path)?;
        delegate.on_event(UiEvent::SettingsLoaded {
            settings: settings.clone(),
        });

        let store = Arc::new(Mutex::new(ContactStore::open(
            &config.data_root,
            delegate.clone(),
        )?));

        info!("core ready as {} ({})", settings.username, identity.uid());

        Ok(Self {
            identity,
            settings: RwLock::new(settings),
            settings_path,
            store,
            client: RelayClient::new(config.relay_addr),
            delegate,
            stats: Arc::new(RwLock::new(ListenerStats::default())),
        })
    }

    /// Connect to the relay, announce this identity, and start the inbound
    /// listener. On failure the core keeps running in offline mode and the
    /// error is returned for reporting; there is no retry.
    pub async fn connect(&self) -> Result<(), CoreError> {
        let hello = Packet::NewConnection {
            uid: self.identity.uid().to_string(),
            content: self.own_profile().await,
        };
        self.client.connect(&hello).await?;

        if let Some(reader) = self.client.take_reader().await {
            let listener = Listener {
                identity: self.identity.clone(),
                store: self.store.clone(),
                delegate: self.delegate.clone(),
                stats: self.stats.clone(),
            };
            tokio::spawn(listener.run(reader));
        }
        Ok(())
    }

    /// Ask a remote client for a contact relation. Self-targeting is refused.
    pub async fn add_friend(&self, uid: &str) -> Result<(), CoreError> {
        if uid == self.identity.uid() {
            return Err(error::StoreError::SelfReference.into());
        }

        let packet = Packet::FriendRequest {
            uid: self.identity.uid().to_string(),
            destination: uid.to_string(),
            time: now_millis(),
            content: None,
        };
        self.client.send(&packet).await?;
        info!("friend request sent to {}", uid);
        Ok(())
    }

    /// Resolve a pending inbound request positively: reciprocate with our
    /// profile and promote the contact to accepted.
    pub async fn accept_friend_request(&self, uid: &str) -> Result<(), CoreError> {
        let packet = Packet::AcceptFriendRequest {
            uid: self.identity.uid().to_string(),
            destination: uid.to_string(),
            content: self.own_profile().await,
        };
        self.client.send(&packet).await?;

        self.store.lock().await.move_to_accepted(uid)?;
        Ok(())
    }

    /// Resolve a pending inbound request negatively.
    pub async fn deny_friend_request(&self, uid: &str) -> Result<(), CoreError> {
        self.store.lock().await.remove(uid)?;
        Ok(())
    }

    /// Encrypt `text` for an accepted contact, transmit it, and log it to
    /// the local conversation under our own name.
    pub async fn send_message(&self, text: &str, uid: &str) -> Result<(), CoreError> {
        let recipient_pem = {
            let store = self.store.lock().await;
            if !store.is_accepted(uid) {
                return Err(error::StoreError::NotFound(uid.to_string()).into());
            }
            store
                .field(uid, "pubkey")
                .ok_or_else(|| error::StoreError::NotFound(uid.to_string()))?
        };

        let recipient_key = crypto::public_key_from_pem(&recipient_pem)?;
        let ciphertext = crypto::encrypt_for(&recipient_key, text)?;

        let packet = Packet::Message {
            uid: self.identity.uid().to_string(),
            destination: uid.to_string(),
            time: now_millis(),
            content: protocol::MessageBody { text: ciphertext },
        };
        self.client.send(&packet).await?;

        let own_username = self.settings.read().await.username.clone();
        self.store.lock().await.append_message(
            uid,
            now_millis(),
            MessageRecord {
                username: own_username,
                content: text.to_string(),
            },
        )?;

        self.delegate.on_event(UiEvent::RefreshChat {
            uid: uid.to_string(),
        });
        Ok(())
    }

    /// A contact's conversation, oldest first. Empty when none exists.
    pub async fn message_history(&self, uid: &str) -> MessageHistory {
        self.store.lock().await.history(uid)
    }

    /// One profile field of a contact, by its persisted name.
    pub async fn contact_field(&self, field: &str, uid: &str) -> Option<String> {
        self.store.lock().await.field(uid, field)
    }

    pub async fn pending_contacts(&self) -> Vec<String> {
        self.store.lock().await.pending_uids()
    }

    pub async fn accepted_contacts(&self) -> Vec<String> {
        self.store.lock().await.accepted_uids()
    }

    pub fn self_uid(&self) -> &str {
        self.identity.uid()
    }

    pub async fn settings(&self) -> Settings {
        self.settings.read().await.clone()
    }

    /// Replace the form-editable settings in full and persist them.
    pub async fn update_settings(
        &self,
        misc: MiscSettings,
        colors: &[String],
    ) -> Result<(), CoreError> {
        let mut settings = self.settings.write().await;
        settings.update(misc, colors, &self.settings_path)?;
        self.delegate.on_event(UiEvent::SettingsLoaded {
            settings: settings.clone(),
        });
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.client.is_connected().await
    }

    /// Inbound traffic counters, including dropped/invalid packets.
    pub async fn listener_stats(&self) -> ListenerStats {
        *self.stats.read().await
    }

    async fn own_profile(&self) -> ContactProfile {
        let settings = self.settings.read().await;
        ContactProfile {
            username: settings.username.clone(),
            avatar: settings.avatar.clone(),
            status: settings.status.clone(),
            pubkey: self.identity.public_key_pem().to_string(),
        }
    }
}
