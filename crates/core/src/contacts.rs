//! Contact store: pending/accepted relations and message histories
//!
//! The authoritative record of every contact this client knows. All state is
//! mirrored to per-contact folders on disk inside the same call that mutates
//! memory, so a restart can rebuild the store from storage alone. Callers
//! serialize access through the mutex the store lives behind.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::events::{FrontendDelegate, UiEvent};

const CONTACTS_DIR: &str = "contacts";
const PROFILE_FILE: &str = "profile.json";
const MESSAGES_FILE: &str = "messages.json";
const STATUS_FILE: &str = "status.json";

/// A contact's profile as announced on the wire and persisted on disk.
/// `pubkey` is the contact's PKCS#1 public key PEM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactProfile {
    pub username: String,
    pub avatar: String,
    pub status: String,
    pub pubkey: String,
}

impl ContactProfile {
    /// Stand-in profile for a requester the relay told us nothing about.
    /// Replaced with the real profile when the relation is reciprocated.
    pub fn placeholder(uid: &str) -> Self {
        Self {
            username: uid.to_string(),
            avatar: "None".to_string(),
            status: String::new(),
            pubkey: String::new(),
        }
    }
}

/// Persisted relation state of a contact. Pending and accepted are mutually
/// exclusive; both false means removed (history is kept on disk).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub pending: bool,
    pub accepted: bool,
}

impl Relation {
    pub const PENDING: Relation = Relation {
        pending: true,
        accepted: false,
    };
    pub const ACCEPTED: Relation = Relation {
        pending: false,
        accepted: true,
    };
    pub const REMOVED: Relation = Relation {
        pending: false,
        accepted: false,
    };
}

/// One entry in a conversation. Never mutated after insertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub username: String,
    pub content: String,
}

/// A conversation, keyed by arrival timestamp in unix milliseconds.
/// `BTreeMap` keeps iteration in timestamp order.
pub type MessageHistory = BTreeMap<u64, MessageRecord>;

/// In-memory and on-disk record of pending and accepted contacts.
pub struct ContactStore {
    contacts_dir: PathBuf,
    pending: HashMap<String, ContactProfile>,
    accepted: HashMap<String, ContactProfile>,
    delegate: Arc<dyn FrontendDelegate>,
}

impl ContactStore {
    /// Open the store, rebuilding both sets from the persisted contact
    /// folders and replaying the matching front-end notification for each.
    pub fn open(
        data_root: &Path,
        delegate: Arc<dyn FrontendDelegate>,
    ) -> Result<Self, StoreError> {
        let contacts_dir = data_root.join(CONTACTS_DIR);
        fs::create_dir_all(&contacts_dir)?;

        let mut store = Self {
            contacts_dir,
            pending: HashMap::new(),
            accepted: HashMap::new(),
            delegate,
        };
        store.recover()?;
        Ok(store)
    }

    fn recover(&mut self) -> Result<(), StoreError> {
        for entry in fs::read_dir(&self.contacts_dir)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let uid = entry.file_name().to_string_lossy().into_owned();
            if let Err(e) = self.recover_contact(&uid, &entry.path()) {
                warn!("skipping unreadable contact folder {}: {}", uid, e);
            }
        }
        info!(
            "contact store recovered: {} accepted, {} pending",
            self.accepted.len(),
            self.pending.len()
        );
        Ok(())
    }

    fn recover_contact(&mut self, uid: &str, dir: &Path) -> Result<(), StoreError> {
        let relation: Relation = read_json(&dir.join(STATUS_FILE))?;

        if relation.pending {
            let profile: ContactProfile = read_json(&dir.join(PROFILE_FILE))?;
            self.pending.insert(uid.to_string(), profile.clone());
            self.delegate.on_event(UiEvent::PendingContact {
                uid: uid.to_string(),
                profile,
            });
        } else if relation.accepted {
            let profile: ContactProfile = read_json(&dir.join(PROFILE_FILE))?;
            self.accepted.insert(uid.to_string(), profile.clone());
            self.delegate.on_event(UiEvent::ContactAccepted {
                uid: uid.to_string(),
                profile,
            });
        }
        // removed contacts keep their folder but rejoin neither set
        Ok(())
    }

    /// Insert (or overwrite) a pending contact and persist its profile, an
    /// empty message history, and the pending relation.
    pub fn add_pending(
        &mut self,
        uid: &str,
        profile: ContactProfile,
        notify: bool,
    ) -> Result<(), StoreError> {
        let dir = self.contact_dir(uid);
        fs::create_dir_all(&dir)?;
        write_json(&dir.join(PROFILE_FILE), &profile)?;
        write_json(&dir.join(MESSAGES_FILE), &MessageHistory::new())?;
        write_json(&dir.join(STATUS_FILE), &Relation::PENDING)?;

        self.accepted.remove(uid);
        self.pending.insert(uid.to_string(), profile.clone());
        debug!("contact {} added to pending", uid);

        if notify {
            self.delegate.on_event(UiEvent::PendingContact {
                uid: uid.to_string(),
                profile,
            });
        }
        Ok(())
    }

    /// Relocate a pending contact to the accepted set and persist the new
    /// relation. Fails with `NotPending` when the contact is not currently
    /// pending, leaving the store untouched.
    pub fn move_to_accepted(&mut self, uid: &str) -> Result<(), StoreError> {
        let profile = match self.pending.get(uid) {
            Some(profile) => profile.clone(),
            None => return Err(StoreError::NotPending(uid.to_string())),
        };

        write_json(&self.contact_dir(uid).join(STATUS_FILE), &Relation::ACCEPTED)?;

        self.pending.remove(uid);
        self.accepted.insert(uid.to_string(), profile.clone());
        info!("contact {} accepted", uid);

        self.delegate.on_event(UiEvent::ContactAccepted {
            uid: uid.to_string(),
            profile,
        });
        Ok(())
    }

    /// Drop a contact from whichever set holds it. The persisted relation
    /// becomes removed; the message history stays on disk.
    pub fn remove(&mut self, uid: &str) -> Result<(), StoreError> {
        if !self.accepted.contains_key(uid) && !self.pending.contains_key(uid) {
            return Err(StoreError::NotFound(uid.to_string()));
        }

        write_json(&self.contact_dir(uid).join(STATUS_FILE), &Relation::REMOVED)?;

        if self.accepted.remove(uid).is_none() {
            self.pending.remove(uid);
        }
        info!("contact {} removed", uid);
        Ok(())
    }

    /// Append a record to a contact's history under a strictly increasing
    /// timestamp, and persist the history. Returns the timestamp actually
    /// used (bumped past the latest entry when the proposed one regresses).
    pub fn append_message(
        &self,
        uid: &str,
        proposed_time: u64,
        record: MessageRecord,
    ) -> Result<u64, StoreError> {
        let path = self.contact_dir(uid).join(MESSAGES_FILE);
        let mut history: MessageHistory = if path.exists() {
            read_json(&path)?
        } else {
            MessageHistory::new()
        };

        let time = match history.keys().next_back() {
            Some(&last) if proposed_time <= last => last + 1,
            _ => proposed_time,
        };
        history.insert(time, record);
        write_json(&path, &history)?;
        Ok(time)
    }

    /// A contact's full message history; empty when none has been persisted.
    pub fn history(&self, uid: &str) -> MessageHistory {
        let path = self.contact_dir(uid).join(MESSAGES_FILE);
        if !path.exists() {
            return MessageHistory::new();
        }
        match read_json(&path) {
            Ok(history) => history,
            Err(e) => {
                warn!("message history for {} is unreadable: {}", uid, e);
                MessageHistory::new()
            }
        }
    }

    /// Profile lookup across both sets, accepted first.
    pub fn profile(&self, uid: &str) -> Option<&ContactProfile> {
        self.accepted.get(uid).or_else(|| self.pending.get(uid))
    }

    /// Single profile field by name, matching the persisted field names.
    pub fn field(&self, uid: &str, field: &str) -> Option<String> {
        let profile = self.profile(uid)?;
        match field {
            "username" => Some(profile.username.clone()),
            "avatar" => Some(profile.avatar.clone()),
            "status" => Some(profile.status.clone()),
            "pubkey" => Some(profile.pubkey.clone()),
            _ => None,
        }
    }

    pub fn is_accepted(&self, uid: &str) -> bool {
        self.accepted.contains_key(uid)
    }

    pub fn is_pending(&self, uid: &str) -> bool {
        self.pending.contains_key(uid)
    }

    /// Whether the contact is in either set.
    pub fn is_known(&self, uid: &str) -> bool {
        self.is_accepted(uid) || self.is_pending(uid)
    }

    pub fn pending_uids(&self) -> Vec<String> {
        self.pending.keys().cloned().collect()
    }

    pub fn accepted_uids(&self) -> Vec<String> {
        self.accepted.keys().cloned().collect()
    }

    fn contact_dir(&self, uid: &str) -> PathBuf {
        self.contacts_dir.join(uid)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}
