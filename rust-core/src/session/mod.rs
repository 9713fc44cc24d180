//! Long-running admin and listener sessions: the timers and event loops
//! that drive the publisher and the synchronizer over a room link.

pub mod admin;
pub mod listener;

pub use admin::{AdminHandle, AdminSession, AdminSnapshot};
pub use listener::{ListenerHandle, ListenerSession, ListenerSnapshot, ListenerStatus};
