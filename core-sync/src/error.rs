use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// The remote server rejected our token mid-pass. The current pass is
    /// aborted; the scheduler retries on the next cycle.
    #[error("Remote server rejected credentials; sync pass aborted")]
    Unauthorized,

    /// The engine was asked to stop while a pass was in flight.
    #[error("Sync cancelled")]
    Cancelled,

    /// The local schema predates what this engine version writes. Fatal:
    /// sync stays halted until the store is reset.
    #[error("Local schema version {current} is older than required {minimum}")]
    SchemaOutOfDate { current: String, minimum: String },

    /// No suitable probe item was found to estimate the clock offset.
    #[error("Clock offset estimation unavailable: {0}")]
    ClockSyncUnavailable(String),

    /// The remote server failed in a way that is expected to be transient.
    #[error("Remote catalog error: {0}")]
    Remote(String),

    #[error(transparent)]
    Bridge(#[from] bridge_traits::BridgeError),

    /// An internal channel closed unexpectedly (worker panic or premature
    /// shutdown).
    #[error("Pipeline channel closed: {0}")]
    Channel(String),
}

impl SyncError {
    /// Whether the next scheduled cycle is expected to succeed without
    /// intervention.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::SchemaOutOfDate { .. })
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
