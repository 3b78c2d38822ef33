//! Event types and the delegate trait for the front-end layer
//!
//! The core never renders anything or plays a sound itself; it hands these
//! events to whatever front end registered itself at construction time.

use crate::contacts::ContactProfile;
use crate::settings::Settings;

/// Audible cues the front end may play.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundCue {
    FriendRequest,
    Message,
}

/// Events emitted by the core towards the front end.
#[derive(Debug, Clone)]
pub enum UiEvent {
    /// An inbound friend request is waiting for a decision
    PendingContact {
        uid: String,
        profile: ContactProfile,
    },
    /// A contact became accepted and should be rendered in the contact list
    ContactAccepted {
        uid: String,
        profile: ContactProfile,
    },
    /// The conversation with this contact changed and should be redrawn
    RefreshChat { uid: String },
    /// Settings were loaded or rewritten
    SettingsLoaded { settings: Settings },
    /// Play an audible notification
    PlaySound(SoundCue),
}

/// Delegate trait implemented by the front-end layer.
///
/// Implementations must not call back into `RelayChatCore` from `on_event`;
/// events can be delivered while internal locks are held.
pub trait FrontendDelegate: Send + Sync {
    /// Called for every event the core emits.
    fn on_event(&self, event: UiEvent);

    /// The uid of the contact whose conversation is currently on screen,
    /// if any. Drives chat-refresh notifications on inbound messages.
    fn currently_viewing(&self) -> Option<String> {
        None
    }
}

/// Delegate that discards every event. Useful for headless operation.
#[derive(Debug, Default)]
pub struct NullFrontend;

impl FrontendDelegate for NullFrontend {
    fn on_event(&self, _event: UiEvent) {}
}
