//! Service configuration defaults
//!
//! This module contains default configuration values and constants
//! used across grid components for consistency.

/// Node runner defaults
pub mod node {
    /// Logical node name used when none is configured
    pub const NAME: &str = "node1";

    /// Default bind address for the standalone node runner
    pub const ADDRESS: &str = "127.0.0.1";

    /// Default listening port
    pub const PORT: u16 = 9123;

    /// Interval between connected-client reports (seconds)
    pub const STATUS_INTERVAL_SECS: u64 = 10;

    /// Interval between TEMP context eviction sweeps (seconds)
    pub const EVICTION_INTERVAL_SECS: u64 = 30;
}

/// Socket transport defaults
pub mod transport {
    /// Read buffer size for accepted and opened sessions (bytes)
    pub const READ_BUFFER_SIZE: usize = 2048;

    /// Both-directions idle time before a session is reported idle (seconds)
    pub const IDLE_TIMEOUT_SECS: u64 = 10;

    /// Connect attempt timeout (milliseconds)
    pub const CONNECT_TIMEOUT_MS: u64 = 5_000;

    /// Largest frame accepted from a peer (bytes)
    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

    /// Scheme used for socket connector addresses
    pub const REMOTE_SCHEME: &str = "Mina";
}

/// Conversation defaults
pub mod conversation {
    /// Time a blocking round trip waits for its reply (milliseconds)
    pub const REQUEST_TIMEOUT_MS: u64 = 30_000;
}

/// Deployment job executor defaults
pub mod deployment {
    /// Maximum number of unfinished (or recently finished) jobs
    pub const MAX_QUEUE_SIZE: usize = 100;

    /// Environment variable overriding [`MAX_QUEUE_SIZE`]
    pub const JOB_QUEUE_SIZE_ENV: &str = "GRID_DEPLOYMENT_JOB_QUEUE_SIZE";

    /// Jobs run on the worker unless explicitly disabled
    pub const ASYNC_ENABLED: bool = true;
}

/// Node context store defaults
pub mod node_data {
    /// Lifetime of a TEMP context entry (seconds)
    pub const TEMP_TTL_SECS: u64 = 300;
}
