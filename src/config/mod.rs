use crate::{constants, AssistError, Result};
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub api: ApiConfig,
    pub orchestrator: OrchestratorConfig,
    pub governor: GovernorConfig,
    pub scan: ScanConfig,
    pub mcp: McpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub api_key: Option<String>,
    pub enable_auth: bool,
    pub allowed_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            api_key: None,
            enable_auth: false,
            allowed_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

/// Dispatcher tuning: breaker thresholds, retry schedule, routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub breaker: BreakerConfig,
    pub max_retries: u32,
    pub retry_initial_delay: Duration,
    pub retry_max_delay: Duration,
    pub routing_confidence_threshold: f64,
    pub max_queue_size: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            breaker: BreakerConfig::default(),
            max_retries: constants::MAX_RETRIES,
            retry_initial_delay: Duration::from_millis(constants::RETRY_INITIAL_DELAY_MS),
            retry_max_delay: Duration::from_secs(constants::RETRY_MAX_DELAY_SECS),
            routing_confidence_threshold: constants::ROUTING_CONFIDENCE_THRESHOLD,
            max_queue_size: constants::MAX_QUEUE_SIZE,
        }
    }
}

/// Per-agent circuit breaker thresholds. One default set applies to every
/// agent; per-class overrides would extend this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub rolling_window: Duration,
    pub cool_down: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: constants::BREAKER_FAILURE_THRESHOLD,
            rolling_window: Duration::from_secs(constants::BREAKER_ROLLING_WINDOW_SECS),
            cool_down: Duration::from_secs(constants::BREAKER_COOL_DOWN_SECS),
        }
    }
}

/// Concurrency governor bounds and tuning targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernorConfig {
    pub initial_permits: usize,
    pub min_permits: usize,
    pub max_permits: usize,
    pub tune_interval: Duration,
    pub target_throughput_per_min: f64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        let cpus = num_cpus::get().max(1);
        Self {
            initial_permits: cpus * 2,
            min_permits: cpus,
            max_permits: cpus * 4,
            tune_interval: Duration::from_secs(constants::GOVERNOR_TUNE_INTERVAL_SECS),
            target_throughput_per_min: constants::GOVERNOR_TARGET_THROUGHPUT_PER_MIN,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    pub supported_extensions: Vec<String>,
    pub max_file_bytes: u64,
    pub yield_interval: Duration,
    pub request_ai_insights: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            supported_extensions: constants::SCAN_SUPPORTED_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_file_bytes: constants::SCAN_MAX_FILE_BYTES,
            yield_interval: Duration::from_millis(constants::SCAN_YIELD_INTERVAL_MS),
            request_ai_insights: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    pub heartbeat_interval: Duration,
    pub default_keep_alive: Duration,
    pub default_timeout: Duration,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(constants::MCP_HEARTBEAT_INTERVAL_SECS),
            default_keep_alive: Duration::from_secs(constants::MCP_DEFAULT_KEEP_ALIVE_SECS),
            default_timeout: Duration::from_secs(constants::MCP_DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        match dotenv() {
            Ok(path) => tracing::info!("Loaded .env file from: {:?}", path),
            Err(e) => tracing::debug!("No .env file loaded: {}", e),
        }

        let api_key = env::var("ASSIST_API_KEY").ok();
        let enable_auth = env_parse("ASSIST_ENABLE_AUTH", true);

        // Authentication requires a usable key when enabled.
        if enable_auth {
            match &api_key {
                Some(key) if key.trim().is_empty() => {
                    return Err(AssistError::ConfigurationError(
                        "ASSIST_API_KEY is blank; generate one with: openssl rand -hex 32"
                            .to_string(),
                    ));
                }
                Some(key) if key.len() < 32 => {
                    return Err(AssistError::ConfigurationError(
                        "ASSIST_API_KEY must be at least 32 characters".to_string(),
                    ));
                }
                Some(_) => {
                    tracing::info!("API authentication configured");
                }
                None => {
                    return Err(AssistError::ConfigurationError(
                        "ASSIST_API_KEY environment variable is required when auth is enabled"
                            .to_string(),
                    ));
                }
            }
        }

        let allowed_origins = env::var("ASSIST_ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let api = ApiConfig {
            host: env::var("ASSIST_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env_parse("ASSIST_PORT", 3000),
            api_key,
            enable_auth,
            allowed_origins,
        };

        let breaker = BreakerConfig {
            failure_threshold: env_parse(
                "ASSIST_BREAKER_FAILURE_THRESHOLD",
                constants::BREAKER_FAILURE_THRESHOLD,
            ),
            rolling_window: Duration::from_secs(env_parse(
                "ASSIST_BREAKER_WINDOW_SECS",
                constants::BREAKER_ROLLING_WINDOW_SECS,
            )),
            cool_down: Duration::from_secs(env_parse(
                "ASSIST_BREAKER_COOL_DOWN_SECS",
                constants::BREAKER_COOL_DOWN_SECS,
            )),
        };

        let orchestrator = OrchestratorConfig {
            breaker,
            max_retries: env_parse("ASSIST_MAX_RETRIES", constants::MAX_RETRIES),
            retry_initial_delay: Duration::from_millis(env_parse(
                "ASSIST_RETRY_INITIAL_DELAY_MS",
                constants::RETRY_INITIAL_DELAY_MS,
            )),
            retry_max_delay: Duration::from_secs(env_parse(
                "ASSIST_RETRY_MAX_DELAY_SECS",
                constants::RETRY_MAX_DELAY_SECS,
            )),
            routing_confidence_threshold: env_parse(
                "ASSIST_ROUTING_CONFIDENCE",
                constants::ROUTING_CONFIDENCE_THRESHOLD,
            ),
            max_queue_size: env_parse("ASSIST_MAX_QUEUE_SIZE", constants::MAX_QUEUE_SIZE),
        };

        let governor_defaults = GovernorConfig::default();
        let governor = GovernorConfig {
            initial_permits: env_parse(
                "ASSIST_GOVERNOR_INITIAL_PERMITS",
                governor_defaults.initial_permits,
            ),
            min_permits: env_parse("ASSIST_GOVERNOR_MIN_PERMITS", governor_defaults.min_permits),
            max_permits: env_parse("ASSIST_GOVERNOR_MAX_PERMITS", governor_defaults.max_permits),
            tune_interval: Duration::from_secs(env_parse(
                "ASSIST_GOVERNOR_TUNE_INTERVAL_SECS",
                constants::GOVERNOR_TUNE_INTERVAL_SECS,
            )),
            target_throughput_per_min: env_parse(
                "ASSIST_GOVERNOR_TARGET_THROUGHPUT",
                constants::GOVERNOR_TARGET_THROUGHPUT_PER_MIN,
            ),
        };

        let scan_defaults = ScanConfig::default();
        let scan = ScanConfig {
            supported_extensions: env::var("ASSIST_SCAN_EXTENSIONS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().trim_start_matches('.').to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(scan_defaults.supported_extensions),
            max_file_bytes: env_parse("ASSIST_SCAN_MAX_FILE_BYTES", constants::SCAN_MAX_FILE_BYTES),
            yield_interval: Duration::from_millis(env_parse(
                "ASSIST_SCAN_YIELD_MS",
                constants::SCAN_YIELD_INTERVAL_MS,
            )),
            request_ai_insights: env_parse("ASSIST_SCAN_AI_INSIGHTS", true),
        };

        let mcp = McpConfig {
            heartbeat_interval: Duration::from_secs(env_parse(
                "ASSIST_MCP_HEARTBEAT_SECS",
                constants::MCP_HEARTBEAT_INTERVAL_SECS,
            )),
            default_keep_alive: Duration::from_secs(env_parse(
                "ASSIST_MCP_KEEP_ALIVE_SECS",
                constants::MCP_DEFAULT_KEEP_ALIVE_SECS,
            )),
            default_timeout: Duration::from_secs(env_parse(
                "ASSIST_MCP_TIMEOUT_SECS",
                constants::MCP_DEFAULT_TIMEOUT_SECS,
            )),
        };

        Ok(Config {
            api,
            orchestrator,
            governor,
            scan,
            mcp,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
