//! Clock synchronization and drift-corrected shared playback.
//!
//! An admin drives playback of one track; listeners estimate their clock
//! offset to the admin, extrapolate the admin's position and steer their
//! own media element toward it.

pub mod cache;
pub mod clock;
pub mod config;
pub mod drift;
pub mod error;
pub mod estimator;
pub mod media;
pub mod messages;
pub mod publisher;
pub mod registry;
pub mod room;
pub mod session;
pub mod synchronizer;
pub mod track;
pub mod ws;

pub use clock::{Clock, ClockOffset, ManualClock, Millis, SharedClock, SystemClock};
pub use config::{OffsetFilter, SyncConfig};
pub use error::{Result, SyncError};
pub use estimator::ClockOffsetEstimator;
pub use media::{MediaElement, VirtualPlayer};
pub use messages::{ControlCommand, PlaybackIntent, RoomEvent};
pub use publisher::PlaybackPublisher;
pub use registry::ClientRegistry;
pub use room::{ClientId, LocalHub, RoomCode, RoomLink};
pub use synchronizer::PlaybackSynchronizer;
pub use track::{TrackInfo, TrackReference};
pub use ws::WsRoomChannel;
