//! Relay connection client and the inbound packet listener
//!
//! The client owns the single persistent stream to the relay and is the only
//! writer to it. Inbound traffic is handled by one background listener task
//! that reads frames for the lifetime of the connection and dispatches them
//! against the contact store. A dropped connection ends the listener; there
//! is no reconnect loop.

use std::io::ErrorKind;
use std::sync::Arc;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::contacts::{ContactProfile, ContactStore, MessageRecord};
use crate::crypto;
use crate::error::{ClientError, ProtocolError};
use crate::events::{FrontendDelegate, SoundCue, UiEvent};
use crate::identity::Identity;
use crate::protocol::{framing, Packet};

/// Client side of the relay connection.
pub struct RelayClient {
    relay_addr: String,
    writer: Mutex<Option<OwnedWriteHalf>>,
    reader: Mutex<Option<OwnedReadHalf>>,
}

impl RelayClient {
    pub fn new(relay_addr: impl Into<String>) -> Self {
        Self {
            relay_addr: relay_addr.into(),
            writer: Mutex::new(None),
            reader: Mutex::new(None),
        }
    }

    /// Open the persistent connection and announce ourselves with the given
    /// `newConnection` packet. On failure the client stays in offline mode:
    /// later sends fail, nothing retries.
    pub async fn connect(&self, hello: &Packet) -> Result<(), ClientError> {
        info!("🔌 connecting to relay at {}", self.relay_addr);

        let stream = TcpStream::connect(&self.relay_addr)
            .await
            .map_err(|source| ClientError::Connect {
                addr: self.relay_addr.clone(),
                source,
            })?;
        let (read_half, mut write_half) = stream.into_split();

        let payload = hello.encode().map_err(ClientError::Protocol)?;
        framing::write_frame(&mut write_half, &payload)
            .await
            .map_err(ClientError::Protocol)?;

        *self.writer.lock().await = Some(write_half);
        *self.reader.lock().await = Some(read_half);

        info!("✅ connected to relay at {}", self.relay_addr);
        Ok(())
    }

    /// Write one packet to the relay. No acknowledgement, no retry; a write
    /// failure is the caller's concern.
    pub async fn send(&self, packet: &Packet) -> Result<(), ClientError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(ClientError::Offline)?;

        let payload = packet.encode().map_err(ClientError::Protocol)?;
        framing::write_frame(writer, &payload)
            .await
            .map_err(ClientError::Protocol)?;
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.writer.lock().await.is_some()
    }

    /// Hand out the read half for the listener. Yields once per connection.
    pub(crate) async fn take_reader(&self) -> Option<OwnedReadHalf> {
        self.reader.lock().await.take()
    }
}

/// Counters for inbound traffic, including packets that were dropped without
/// any side effect.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListenerStats {
    pub packets_received: u64,
    pub decode_failures: u64,
    pub packets_dropped: u64,
}

/// The background dispatcher for inbound packets.
pub(crate) struct Listener {
    pub(crate) identity: Arc<Identity>,
    pub(crate) store: Arc<Mutex<ContactStore>>,
    pub(crate) delegate: Arc<dyn FrontendDelegate>,
    pub(crate) stats: Arc<RwLock<ListenerStats>>,
}

impl Listener {
    /// Blocking-read frames until the connection ends. Runs for the lifetime
    /// of the connection; there is no cancellation mechanism.
    pub(crate) async fn run(self, mut reader: OwnedReadHalf) {
        info!("📡 listener started");
        loop {
            match framing::read_frame(&mut reader).await {
                Ok(payload) => self.handle_frame(&payload).await,
                Err(ProtocolError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                    info!("relay closed the connection, inbound processing stopped");
                    break;
                }
                Err(e) => {
                    warn!("listener stopping on read error: {}", e);
                    break;
                }
            }
        }
    }

    /// Decode and dispatch one frame. Malformed payloads are counted and
    /// dropped with no side effect.
    pub(crate) async fn handle_frame(&self, payload: &[u8]) {
        self.stats.write().await.packets_received += 1;

        match Packet::decode(payload) {
            Ok(packet) => {
                debug!("📦 packet from {}", packet.sender());
                self.dispatch(packet).await;
            }
            Err(e) => {
                self.stats.write().await.decode_failures += 1;
                warn!("dropping undecodable packet: {}", e);
            }
        }
    }

    async fn dispatch(&self, packet: Packet) {
        match packet {
            Packet::FriendRequest { uid, content, .. } => {
                let mut store = self.store.lock().await;
                if store.is_known(&uid) {
                    debug!("friend request from already-known contact {}", uid);
                    self.drop_packet().await;
                    return;
                }
                let profile = content.unwrap_or_else(|| ContactProfile::placeholder(&uid));
                if let Err(e) = store.add_pending(&uid, profile, true) {
                    warn!("could not record friend request from {}: {}", uid, e);
                    return;
                }
                self.delegate
                    .on_event(UiEvent::PlaySound(SoundCue::FriendRequest));
            }

            Packet::Message {
                uid, time, content, ..
            } => {
                let store = self.store.lock().await;
                if !store.is_accepted(&uid) {
                    debug!("message from non-accepted contact {}", uid);
                    self.drop_packet().await;
                    return;
                }

                // A broken ciphertext must not take the listener down
                let plaintext =
                    match crypto::decrypt_with(self.identity.private_key(), &content.text) {
                        Ok(plaintext) => plaintext,
                        Err(e) => {
                            warn!("dropping undecryptable message from {}: {}", uid, e);
                            self.drop_packet().await;
                            return;
                        }
                    };

                let username = store
                    .field(&uid, "username")
                    .unwrap_or_else(|| uid.clone());
                let record = MessageRecord {
                    username,
                    content: plaintext,
                };
                if let Err(e) = store.append_message(&uid, time, record) {
                    warn!("could not persist message from {}: {}", uid, e);
                    return;
                }

                self.delegate.on_event(UiEvent::PlaySound(SoundCue::Message));
                if self.delegate.currently_viewing().as_deref() == Some(uid.as_str()) {
                    self.delegate.on_event(UiEvent::RefreshChat { uid });
                }
            }

            Packet::AcceptFriendRequest { uid, content, .. } => {
                let mut store = self.store.lock().await;
                // We initiated this relation, so the sender was never in our
                // pending set: stage it without the pending notification,
                // then promote straight away.
                if let Err(e) = store.add_pending(&uid, content, false) {
                    warn!("could not record acceptance from {}: {}", uid, e);
                    return;
                }
                if let Err(e) = store.move_to_accepted(&uid) {
                    warn!("could not promote {}: {}", uid, e);
                    return;
                }
                self.delegate
                    .on_event(UiEvent::PlaySound(SoundCue::FriendRequest));
            }

            Packet::NewConnection { uid, .. } => {
                // Client-to-relay announcement; nothing to do inbound
                debug!("ignoring relay-bound announcement from {}", uid);
                self.drop_packet().await;
            }
        }
    }

    async fn drop_packet(&self) {
        self.stats.write().await.packets_dropped += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::now_millis;
    use std::sync::Mutex as StdMutex;
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct Recorder {
        events: StdMutex<Vec<UiEvent>>,
        viewing: StdMutex<Option<String>>,
    }

    impl FrontendDelegate for Recorder {
        fn on_event(&self, event: UiEvent) {
            self.events.lock().unwrap().push(event);
        }

        fn currently_viewing(&self) -> Option<String> {
            self.viewing.lock().unwrap().clone()
        }
    }

    struct Fixture {
        listener: Listener,
        recorder: Arc<Recorder>,
        _dir: tempfile::TempDir,
    }

    // Key generation is the slow part of the fixture; share one identity
    // across the module
    fn shared_identity() -> Arc<Identity> {
        static IDENTITY: std::sync::OnceLock<Arc<Identity>> = std::sync::OnceLock::new();
        IDENTITY
            .get_or_init(|| {
                let dir = tempfile::tempdir().unwrap();
                Arc::new(Identity::load_or_create(dir.path()).unwrap())
            })
            .clone()
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let identity = shared_identity();
        let store = Arc::new(Mutex::new(
            ContactStore::open(dir.path(), recorder.clone()).unwrap(),
        ));
        let listener = Listener {
            identity,
            store,
            delegate: recorder.clone(),
            stats: Arc::new(RwLock::new(ListenerStats::default())),
        };
        Fixture {
            listener,
            recorder,
            _dir: dir,
        }
    }

    fn profile(name: &str) -> ContactProfile {
        ContactProfile {
            username: name.to_string(),
            avatar: "None".to_string(),
            status: String::new(),
            pubkey: String::new(),
        }
    }

    const PEER: &str = "x1Y2z3W4v5U6t7S8";

    #[tokio::test]
    async fn test_malformed_frame_has_no_side_effect() {
        let fx = fixture();

        fx.listener
            .handle_frame(br#"{"destination":"x","time":1}"#)
            .await;

        let stats = *fx.listener.stats.read().await;
        assert_eq!(stats.packets_received, 1);
        assert_eq!(stats.decode_failures, 1);

        let store = fx.listener.store.lock().await;
        assert!(store.pending_uids().is_empty());
        assert!(store.accepted_uids().is_empty());
        assert!(fx.recorder.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_friend_request_adds_pending_with_profile() {
        let fx = fixture();

        let packet = Packet::FriendRequest {
            uid: PEER.to_string(),
            destination: fx.listener.identity.uid().to_string(),
            time: now_millis(),
            content: Some(profile("mallory")),
        };
        fx.listener.handle_frame(&packet.encode().unwrap()).await;

        let store = fx.listener.store.lock().await;
        assert!(store.is_pending(PEER));
        assert_eq!(store.field(PEER, "username").as_deref(), Some("mallory"));

        let events = fx.recorder.events.lock().unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, UiEvent::PendingContact { uid, .. } if uid == PEER)));
        assert!(events
            .iter()
            .any(|e| matches!(e, UiEvent::PlaySound(SoundCue::FriendRequest))));
    }

    #[tokio::test]
    async fn test_friend_request_without_profile_stores_placeholder() {
        let fx = fixture();

        let packet = Packet::FriendRequest {
            uid: PEER.to_string(),
            destination: fx.listener.identity.uid().to_string(),
            time: now_millis(),
            content: None,
        };
        fx.listener.handle_frame(&packet.encode().unwrap()).await;

        let store = fx.listener.store.lock().await;
        assert_eq!(store.field(PEER, "username").as_deref(), Some(PEER));
    }

    #[tokio::test]
    async fn test_friend_request_from_known_contact_is_ignored() {
        let fx = fixture();
        {
            let mut store = fx.listener.store.lock().await;
            store.add_pending(PEER, profile("mallory"), false).unwrap();
        }
        fx.recorder.events.lock().unwrap().clear();

        let packet = Packet::FriendRequest {
            uid: PEER.to_string(),
            destination: fx.listener.identity.uid().to_string(),
            time: now_millis(),
            content: Some(profile("mallory-again")),
        };
        fx.listener.handle_frame(&packet.encode().unwrap()).await;

        let store = fx.listener.store.lock().await;
        assert_eq!(store.field(PEER, "username").as_deref(), Some("mallory"));
        assert!(fx.recorder.events.lock().unwrap().is_empty());
        assert_eq!(fx.listener.stats.read().await.packets_dropped, 1);
    }

    #[tokio::test]
    async fn test_message_from_accepted_contact_lands_in_history() {
        let fx = fixture();
        {
            let mut store = fx.listener.store.lock().await;
            store.add_pending(PEER, profile("bob"), false).unwrap();
            store.move_to_accepted(PEER).unwrap();
        }
        *fx.recorder.viewing.lock().unwrap() = Some(PEER.to_string());
        fx.recorder.events.lock().unwrap().clear();

        let ciphertext =
            crypto::encrypt_for(fx.listener.identity.public_key(), "hello").unwrap();
        let packet = Packet::Message {
            uid: PEER.to_string(),
            destination: fx.listener.identity.uid().to_string(),
            time: now_millis(),
            content: crate::protocol::MessageBody { text: ciphertext },
        };
        fx.listener.handle_frame(&packet.encode().unwrap()).await;

        let store = fx.listener.store.lock().await;
        let history = store.history(PEER);
        assert_eq!(history.len(), 1);
        let record = history.values().next().unwrap();
        assert_eq!(record.username, "bob");
        assert_eq!(record.content, "hello");

        let events = fx.recorder.events.lock().unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, UiEvent::PlaySound(SoundCue::Message))));
        assert!(events
            .iter()
            .any(|e| matches!(e, UiEvent::RefreshChat { uid } if uid == PEER)));
    }

    #[tokio::test]
    async fn test_message_from_stranger_is_dropped() {
        let fx = fixture();

        let ciphertext =
            crypto::encrypt_for(fx.listener.identity.public_key(), "psst").unwrap();
        let packet = Packet::Message {
            uid: PEER.to_string(),
            destination: fx.listener.identity.uid().to_string(),
            time: now_millis(),
            content: crate::protocol::MessageBody { text: ciphertext },
        };
        fx.listener.handle_frame(&packet.encode().unwrap()).await;

        let store = fx.listener.store.lock().await;
        assert!(store.history(PEER).is_empty());
        assert_eq!(fx.listener.stats.read().await.packets_dropped, 1);
    }

    #[tokio::test]
    async fn test_undecryptable_message_is_dropped_not_fatal() {
        let fx = fixture();
        {
            let mut store = fx.listener.store.lock().await;
            store.add_pending(PEER, profile("bob"), false).unwrap();
            store.move_to_accepted(PEER).unwrap();
        }

        let packet = Packet::Message {
            uid: PEER.to_string(),
            destination: fx.listener.identity.uid().to_string(),
            time: now_millis(),
            content: crate::protocol::MessageBody {
                text: "deadbeef".to_string(),
            },
        };
        fx.listener.handle_frame(&packet.encode().unwrap()).await;

        let store = fx.listener.store.lock().await;
        assert!(store.history(PEER).is_empty());
        assert_eq!(fx.listener.stats.read().await.packets_dropped, 1);
    }

    #[tokio::test]
    async fn test_acceptance_promotes_without_pending_notification() {
        let fx = fixture();

        let packet = Packet::AcceptFriendRequest {
            uid: PEER.to_string(),
            destination: fx.listener.identity.uid().to_string(),
            content: profile("bob"),
        };
        fx.listener.handle_frame(&packet.encode().unwrap()).await;

        let store = fx.listener.store.lock().await;
        assert!(store.is_accepted(PEER));
        assert!(!store.is_pending(PEER));

        let events = fx.recorder.events.lock().unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, UiEvent::ContactAccepted { uid, .. } if uid == PEER)));
        assert!(!events
            .iter()
            .any(|e| matches!(e, UiEvent::PendingContact { .. })));
    }

    #[tokio::test]
    async fn test_send_while_offline_fails() {
        let client = RelayClient::new("127.0.0.1:1");
        let packet = Packet::FriendRequest {
            uid: "a1B2c3D4e5F6g7H8".to_string(),
            destination: PEER.to_string(),
            time: 0,
            content: None,
        };
        assert!(matches!(
            client.send(&packet).await,
            Err(ClientError::Offline)
        ));
    }

    #[tokio::test]
    async fn test_connect_sends_announcement_first() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let hello = Packet::NewConnection {
            uid: "a1B2c3D4e5F6g7H8".to_string(),
            content: profile("alice"),
        };

        let client = RelayClient::new(addr.to_string());
        let accept = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            framing::read_frame(&mut stream).await.unwrap()
        });

        client.connect(&hello).await.unwrap();
        assert!(client.is_connected().await);

        let first_frame = accept.await.unwrap();
        assert_eq!(Packet::decode(&first_frame).unwrap(), hello);
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_client_offline() {
        // Port 1 on localhost is essentially guaranteed closed
        let client = RelayClient::new("127.0.0.1:1");
        let hello = Packet::NewConnection {
            uid: "a1B2c3D4e5F6g7H8".to_string(),
            content: profile("alice"),
        };
        assert!(matches!(
            client.connect(&hello).await,
            Err(ClientError::Connect { .. })
        ));
        assert!(!client.is_connected().await);
    }
}
