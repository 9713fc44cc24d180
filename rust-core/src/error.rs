use thiserror::Error;

pub type Result<T, E = SyncError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("room channel closed")]
    ChannelClosed,

    #[error("malformed message: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("unknown event `{0}`")]
    UnknownEvent(String),

    #[error("could not resolve track: {0}")]
    Resolve(String),

    /// Downloading the track's audio failed. The listener stays in
    /// `AwaitingTrack` until a fresh `init` arrives.
    #[error("fetch failed: {0}")]
    FetchFailed(String),

    /// The media element refused to start (for example before any user
    /// gesture has unlocked audio output).
    #[error("playback rejected: {0}")]
    PlaybackRejected(String),

    #[error("invalid track reference: {0}")]
    InvalidTrackReference(String),

    #[error("invalid room code: {0:?}")]
    InvalidRoomCode(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SyncError::Transport(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::FetchFailed(err.to_string())
    }
}
