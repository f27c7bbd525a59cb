//! System-wide configuration defaults.
//!
//! Every value here can be overridden through `Config`; these are the
//! fallbacks used when the environment does not say otherwise.

// Circuit breaker defaults (per-agent, keyed by agent name)
/// Consecutive failures within the rolling window before the breaker opens.
pub const BREAKER_FAILURE_THRESHOLD: u32 = 5;

/// Rolling window for failure counting, in seconds.
pub const BREAKER_ROLLING_WINDOW_SECS: u64 = 60;

/// Cool-down before an open breaker admits a half-open probe, in seconds.
pub const BREAKER_COOL_DOWN_SECS: u64 = 30;

// Retry schedule
/// Maximum total invocation attempts per request on retryable failures.
pub const MAX_RETRIES: u32 = 3;

/// Base delay for the exponential backoff schedule, in milliseconds.
pub const RETRY_INITIAL_DELAY_MS: u64 = 1_000;

/// Cap on any single backoff delay, in seconds.
pub const RETRY_MAX_DELAY_SECS: u64 = 30;

// Concurrency governor
/// Auto-tune evaluation cadence, in seconds.
pub const GOVERNOR_TUNE_INTERVAL_SECS: u64 = 30;

/// Target dequeue throughput the tuner steers toward, per minute.
pub const GOVERNOR_TARGET_THROUGHPUT_PER_MIN: f64 = 60.0;

// Agent registry
/// Health poll cadence for registered agents, in seconds.
pub const HEALTH_POLL_INTERVAL_SECS: u64 = 30;

// Orchestrator
/// Intent-router confidence below which routing hints are ignored.
pub const ROUTING_CONFIDENCE_THRESHOLD: f64 = 0.5;

/// Requests above this queue depth are rejected at enqueue.
pub const MAX_QUEUE_SIZE: usize = 1_000;

/// Terminal task executions are kept at least this long for status queries.
pub const EXECUTION_RETENTION_SECS: u64 = 300;

/// Execution cleanup cadence, in seconds.
pub const EXECUTION_CLEANUP_INTERVAL_SECS: u64 = 60;

// Workspace scan engine
/// Files larger than this are skipped by the scan. 2 MiB.
pub const SCAN_MAX_FILE_BYTES: u64 = 2 * 1024 * 1024;

/// Cooperative yield cadence inside the scan loop, in milliseconds.
pub const SCAN_YIELD_INTERVAL_MS: u64 = 50;

/// Extensions the scan engine analyzes when no override is configured.
pub const SCAN_SUPPORTED_EXTENSIONS: &[&str] = &[
    "cs", "py", "js", "ts", "cpp", "c", "h", "java", "md", "json", "yaml", "yml", "sql", "rs",
    "go", "rb", "php", "xml", "html", "css",
];

/// Performance-issue count above which the scan synthesizes an
/// optimization recommendation.
pub const SCAN_PERF_RECOMMENDATION_THRESHOLD: usize = 5;

// Model provider
/// Per-call deadline when a model does not configure its own, in seconds.
pub const PROVIDER_DEFAULT_TIMEOUT_SECS: u64 = 60;

// MCP client
/// Heartbeat sweep cadence, in seconds.
pub const MCP_HEARTBEAT_INTERVAL_SECS: u64 = 60;

/// Default keep-alive interval for servers that do not set one, in seconds.
pub const MCP_DEFAULT_KEEP_ALIVE_SECS: u64 = 60;

/// Default per-call deadline for MCP requests, in seconds.
pub const MCP_DEFAULT_TIMEOUT_SECS: u64 = 30;

// Event bus
/// Bounded per-subscriber buffer; overflow drops oldest events.
pub const EVENT_BUFFER_CAPACITY: usize = 256;
