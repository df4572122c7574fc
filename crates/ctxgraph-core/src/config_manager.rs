use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Failed to read config: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration for CtxGraph
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CtxGraphConfig {
    /// Artifact store sizing
    #[serde(default)]
    pub cache: CacheConfig,

    /// Retry behaviour of the invalidator
    #[serde(default)]
    pub invalidation: InvalidationConfig,

    /// Batch window and throttling of change events
    #[serde(default)]
    pub batch: BatchConfig,

    /// Relevance score composition
    #[serde(default)]
    pub relevance: RelevanceConfig,

    /// Context bundle assembly
    #[serde(default)]
    pub context: ContextConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Total artifact bytes kept before least-recently-used eviction kicks in
    #[serde(default = "default_cache_capacity_bytes")]
    pub capacity_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: default_cache_capacity_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationConfig {
    /// Attempts per cache key before falling back to marking it stale
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff; attempt `n` waits `retry_delay_ms * n`
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl InvalidationConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Width of a merge window for change events (ms)
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Pause between throttled chunks (ms)
    #[serde(default = "default_throttle_delay_ms")]
    pub throttle_delay_ms: u64,

    /// Chunk size used by the event pump's throttled path
    #[serde(default = "default_throttle_chunk_size")]
    pub throttle_chunk_size: usize,

    /// Capacity of the bounded watcher event channel
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl BatchConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn throttle_delay(&self) -> Duration {
        Duration::from_millis(self.throttle_delay_ms)
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            throttle_delay_ms: default_throttle_delay_ms(),
            throttle_chunk_size: default_throttle_chunk_size(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelevanceConfig {
    #[serde(default = "default_keyword_content_boost")]
    pub keyword_content_boost: f64,

    #[serde(default = "default_keyword_path_boost")]
    pub keyword_path_boost: f64,

    /// Boost for files in the current git change-set
    #[serde(default = "default_recency_boost")]
    pub recency_boost: f64,

    /// Boost for files with more than `fan_in_threshold` dependents
    #[serde(default = "default_fan_in_boost")]
    pub fan_in_boost: f64,

    #[serde(default = "default_fan_in_threshold")]
    pub fan_in_threshold: usize,

    #[serde(default = "default_large_file_bytes")]
    pub large_file_bytes: usize,

    /// Multiplier applied to files above `large_file_bytes`
    #[serde(default = "default_large_file_penalty")]
    pub large_file_penalty: f64,
}

impl Default for RelevanceConfig {
    fn default() -> Self {
        Self {
            keyword_content_boost: default_keyword_content_boost(),
            keyword_path_boost: default_keyword_path_boost(),
            recency_boost: default_recency_boost(),
            fan_in_boost: default_fan_in_boost(),
            fan_in_threshold: default_fan_in_threshold(),
            large_file_bytes: default_large_file_bytes(),
            large_file_penalty: default_large_file_penalty(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Upper bound on files in a bundle
    #[serde(default = "default_max_context_size")]
    pub max_context_size: usize,

    /// Minimum relevance score for a file to be considered
    #[serde(default)]
    pub relevance_threshold: f64,

    /// File extensions collected during base assembly
    #[serde(default = "default_include_extensions")]
    pub include_extensions: Vec<String>,

    /// Files larger than this are skipped
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,

    /// Commits captured in the git snapshot
    #[serde(default = "default_recent_commit_limit")]
    pub recent_commit_limit: usize,

    /// History entries attached to each bundled file (0 disables)
    #[serde(default = "default_file_history_limit")]
    pub file_history_limit: usize,

    /// Attempts before a repeatedly superseded build gives up
    #[serde(default = "default_max_build_attempts")]
    pub max_build_attempts: u32,

    #[serde(default = "default_true")]
    pub respect_gitignore: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_context_size: default_max_context_size(),
            relevance_threshold: 0.0,
            include_extensions: default_include_extensions(),
            max_file_bytes: default_max_file_bytes(),
            recent_commit_limit: default_recent_commit_limit(),
            file_history_limit: default_file_history_limit(),
            max_build_attempts: default_max_build_attempts(),
            respect_gitignore: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "pretty", "json", "compact"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_cache_capacity_bytes() -> usize {
    256 * 1024 * 1024
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    100
}
fn default_window_ms() -> u64 {
    100
}
fn default_throttle_delay_ms() -> u64 {
    50
}
fn default_throttle_chunk_size() -> usize {
    50
}
fn default_event_channel_capacity() -> usize {
    1024
}
fn default_keyword_content_boost() -> f64 {
    0.2
}
fn default_keyword_path_boost() -> f64 {
    0.3
}
fn default_recency_boost() -> f64 {
    0.4
}
fn default_fan_in_boost() -> f64 {
    0.2
}
fn default_fan_in_threshold() -> usize {
    3
}
fn default_large_file_bytes() -> usize {
    100_000
}
fn default_large_file_penalty() -> f64 {
    0.8
}
fn default_max_context_size() -> usize {
    50
}
fn default_include_extensions() -> Vec<String> {
    [
        "rs", "ts", "tsx", "js", "jsx", "mjs", "py", "go", "java", "c", "h", "cpp", "hpp", "cs",
        "rb", "php", "swift", "kt", "json", "toml", "yaml", "yml", "md",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_max_file_bytes() -> u64 {
    1024 * 1024
}
fn default_recent_commit_limit() -> usize {
    20
}
fn default_file_history_limit() -> usize {
    5
}
fn default_max_build_attempts() -> u32 {
    2
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

/// Configuration manager with layered sources
pub struct ConfigManager {
    config: CtxGraphConfig,
    config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with the following precedence:
    /// 1. Environment variables (`CTXGRAPH_*`, `RUST_LOG`)
    /// 2. Config file (.ctxgraph.toml, then ~/.ctxgraph/config.toml)
    /// 3. Defaults
    pub fn load() -> Result<Self, ConfigError> {
        let (config, config_path) = Self::load_config_file()?;
        Self::finish(config, config_path)
    }

    /// Load from an explicit file; a missing file is an error here.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let config = Self::read_toml_file(path)?;
        Self::finish(config, Some(path.to_path_buf()))
    }

    fn finish(config: CtxGraphConfig, config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config = Self::apply_env_overrides(config);
        Self::validate_config(&config)?;

        info!(
            "Configuration loaded from {}",
            config_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "defaults".to_string())
        );
        debug!(
            "cache capacity={}B max_context_size={} window={}ms retries={}",
            config.cache.capacity_bytes,
            config.context.max_context_size,
            config.batch.window_ms,
            config.invalidation.max_retries
        );

        Ok(Self {
            config,
            config_path,
        })
    }

    /// Search order:
    /// 1. ./.ctxgraph.toml (current directory)
    /// 2. ~/.ctxgraph/config.toml (user config)
    /// 3. Use defaults
    fn load_config_file() -> Result<(CtxGraphConfig, Option<PathBuf>), ConfigError> {
        let local_config = Path::new(".ctxgraph.toml");
        if local_config.exists() {
            let config = Self::read_toml_file(local_config)?;
            return Ok((config, Some(local_config.to_path_buf())));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".ctxgraph").join("config.toml");
            if user_config.exists() {
                let config = Self::read_toml_file(&user_config)?;
                return Ok((config, Some(user_config)));
            }
        }

        debug!("No config file found, using defaults");
        Ok((CtxGraphConfig::default(), None))
    }

    fn read_toml_file(path: &Path) -> Result<CtxGraphConfig, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    fn apply_env_overrides(config: CtxGraphConfig) -> CtxGraphConfig {
        Self::apply_overrides_from(config, |key| std::env::var(key).ok())
    }

    fn apply_overrides_from<F>(mut config: CtxGraphConfig, lookup: F) -> CtxGraphConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(value: Option<String>) -> Option<T> {
            value.and_then(|v| v.trim().parse().ok())
        }

        if let Some(bytes) = parsed(lookup("CTXGRAPH_CACHE_CAPACITY_BYTES")) {
            config.cache.capacity_bytes = bytes;
        }
        if let Some(retries) = parsed(lookup("CTXGRAPH_MAX_RETRIES")) {
            config.invalidation.max_retries = retries;
        }
        if let Some(ms) = parsed(lookup("CTXGRAPH_RETRY_DELAY_MS")) {
            config.invalidation.retry_delay_ms = ms;
        }
        if let Some(ms) = parsed(lookup("CTXGRAPH_BATCH_WINDOW_MS")) {
            config.batch.window_ms = ms;
        }
        if let Some(ms) = parsed(lookup("CTXGRAPH_THROTTLE_DELAY_MS")) {
            config.batch.throttle_delay_ms = ms;
        }
        if let Some(size) = parsed(lookup("CTXGRAPH_MAX_CONTEXT_SIZE")) {
            config.context.max_context_size = size;
        }
        if let Some(threshold) = parsed(lookup("CTXGRAPH_RELEVANCE_THRESHOLD")) {
            config.context.relevance_threshold = threshold;
        }
        if let Some(level) = lookup("RUST_LOG") {
            config.logging.level = level;
        }
        if let Some(format) = lookup("CTXGRAPH_LOG_FORMAT") {
            config.logging.format = format;
        }

        config
    }

    fn validate_config(config: &CtxGraphConfig) -> Result<(), ConfigError> {
        if config.cache.capacity_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "cache.capacity_bytes must be greater than zero".to_string(),
            ));
        }
        if config.context.max_context_size == 0 {
            return Err(ConfigError::ValidationError(
                "context.max_context_size must be greater than zero".to_string(),
            ));
        }
        if config.batch.window_ms == 0 {
            return Err(ConfigError::ValidationError(
                "batch.window_ms must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&config.context.relevance_threshold) {
            return Err(ConfigError::ValidationError(format!(
                "context.relevance_threshold must be within [0, 1], got {}",
                config.context.relevance_threshold
            )));
        }

        // RUST_LOG may carry a full filter directive; only plain levels are checked
        let level = config.logging.level.as_str();
        if !level.contains('=') && !level.contains(',') {
            match level {
                "trace" | "debug" | "info" | "warn" | "error" => {}
                other => {
                    return Err(ConfigError::ValidationError(format!(
                        "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                        other
                    )))
                }
            }
        }

        match config.logging.format.as_str() {
            "pretty" | "json" | "compact" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format: {}. Must be one of: pretty, json, compact",
                    other
                )))
            }
        }

        Ok(())
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &CtxGraphConfig {
        &self.config
    }

    /// Get the path to the config file that was loaded, if any
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Create a default config file
    pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        let config = CtxGraphConfig::default();
        let toml_str =
            toml::to_string_pretty(&config).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::ReadError(e.to_string()))?;
        }

        std::fs::write(path, toml_str).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let config = CtxGraphConfig::default();
        assert!(ConfigManager::validate_config(&config).is_ok());
        assert_eq!(config.invalidation.max_retries, 3);
        assert_eq!(config.context.max_context_size, 50);
    }

    #[test]
    fn env_overrides_take_precedence() {
        let env: HashMap<&str, &str> = [
            ("CTXGRAPH_MAX_CONTEXT_SIZE", "7"),
            ("CTXGRAPH_BATCH_WINDOW_MS", "250"),
            ("CTXGRAPH_MAX_RETRIES", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let config = ConfigManager::apply_overrides_from(CtxGraphConfig::default(), |k| {
            env.get(k).map(|v| v.to_string())
        });

        assert_eq!(config.context.max_context_size, 7);
        assert_eq!(config.batch.window_ms, 250);
        assert_eq!(config.invalidation.max_retries, 3);
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let mut config = CtxGraphConfig::default();
        config.context.relevance_threshold = 1.5;
        assert!(matches!(
            ConfigManager::validate_config(&config),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn accepts_filter_directives_as_level() {
        let mut config = CtxGraphConfig::default();
        config.logging.level = "ctxgraph_cache=debug,info".to_string();
        assert!(ConfigManager::validate_config(&config).is_ok());
    }
}
