//! 在线状态模块

pub mod listener;
pub mod models;
pub mod tracker;

pub use listener::{EmptyPresenceListener, PresenceListener};
pub use models::{PeerRecord, PresenceDelta, PresenceState};
pub use tracker::{apply_peer_record, PresenceSubscription, PresenceTracker};
