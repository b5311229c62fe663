//! # System Constants
//!
//! Default tuning values and well-known context keys shared by the resilience
//! components.

/// Default values used when configuration omits a field
pub mod defaults {
    pub const SERVICE_NAME: &str = "resilience-core";

    pub const RETRY_MAX_ATTEMPTS: u32 = 3;
    pub const RETRY_BASE_DELAY_MS: u64 = 100;

    pub const CIRCUIT_FAILURE_THRESHOLD: u32 = 5;
    pub const CIRCUIT_RESET_TIMEOUT_MS: u64 = 30_000;

    pub const TELEMETRY_QUEUE_CAPACITY: usize = 1000;
    pub const TELEMETRY_FLUSH_INTERVAL_MS: u64 = 5_000;
    pub const TELEMETRY_BATCH_SIZE: usize = 100;
    pub const TELEMETRY_RECENT_WINDOW: usize = 50;
    pub const TELEMETRY_REQUEST_TIMEOUT_MS: u64 = 5_000;
}

/// Keys written into `ErrorRecord::context`
pub mod context_keys {
    pub const COMPONENT: &str = "component";
    pub const OPERATION: &str = "operation";
    pub const ATTEMPT: &str = "attempt";
    pub const TOTAL_ATTEMPTS: &str = "total_attempts";
    pub const DEPENDENCY: &str = "dependency";
    pub const BOUNDARY: &str = "boundary";
    pub const CHANNEL: &str = "channel";
    pub const CLASSIFIED_BY: &str = "classified_by";
    pub const CLASSIFIER_FAULT: &str = "classifier_fault";
    pub const ORIGINAL_MESSAGE: &str = "original_message";
}

/// Failure channels a boundary can intercept
pub mod channels {
    pub const RENDER: &str = "render";
    pub const ASYNC: &str = "async";
    pub const UNCLAIMED: &str = "unclaimed";
}
