/// Pool Configuration Module
///
/// `PoolConfig` carries the connection parameters, pool sizing bounds,
/// timeout policy and validation hooks consumed by `ConnectionPool`. The
/// fluent setters validate their arguments: out-of-range input is logged
/// and ignored, keeping the previous value, rather than failing the chain.
///
/// Discrete connection fields and a raw connection URL are mutually
/// exclusive; setting any discrete field clears a previously set URL.
///
/// A config can also be loaded from a TOML file for convenience; the
/// validator/finalizer callbacks are programmatic-only.
use crate::connection::Connection;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// Pluggable health check invoked on borrow/return when the test flags are
/// set. Returns true when the connection is still usable.
pub type ConnectionValidator = Arc<dyn Fn(&Connection) -> bool + Send + Sync>;

/// Pluggable teardown callback invoked when the pool disposes a connection.
pub type ConnectionFinalizer = Arc<dyn Fn(&Connection) + Send + Sync>;

/// Configuration for a `ConnectionPool`. Immutable once the pool is built.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub host: String,
    pub port: u16,
    /// For the embedded driver this is the database file path
    /// (or ":memory:").
    pub database: String,
    pub username: String,
    pub password: String,
    pub charset: String,
    /// Full driver connection URL. Overrides the discrete fields when set;
    /// cleared again as soon as any discrete setter fires.
    pub url: Option<String>,

    pub min_pool_size: usize,
    pub initial_pool_size: usize,
    pub max_pool_size: usize,
    /// Advisory bound on queued waiters; not separately enforced beyond
    /// the pool maximum.
    pub queue_size: usize,

    /// Default acquire deadline in milliseconds; values <= 0 block
    /// indefinitely.
    pub connection_timeout_ms: i64,
    /// Eviction threshold for idle connections in milliseconds; 0 disables
    /// the eviction thread.
    pub idle_timeout_ms: u64,
    /// Hard age limit before forced disposal, in milliseconds; 0 disables.
    pub max_lifetime_ms: u64,

    pub test_query: String,
    pub test_on_borrow: bool,
    pub test_on_return: bool,
    pub test_while_idle: bool,

    pub auto_commit: bool,
    pub auto_reconnect: bool,

    /// Bound on consecutive connection-creation failures within a single
    /// acquire call.
    pub max_retries: u32,

    /// Seed for the pool's eviction-jitter RNG. Unset means seeded from
    /// entropy; set it in tests for deterministic disposal draws.
    pub eviction_seed: Option<u64>,

    #[serde(skip)]
    pub connection_validator: Option<ConnectionValidator>,
    #[serde(skip)]
    pub connection_finalizer: Option<ConnectionFinalizer>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            host: String::new(),
            port: 3306,
            database: String::new(),
            username: String::new(),
            password: String::new(),
            charset: "utf8mb4".to_string(),
            url: None,
            min_pool_size: 1,
            initial_pool_size: 1,
            max_pool_size: 8,
            queue_size: 32,
            connection_timeout_ms: 30_000,
            idle_timeout_ms: 600_000,
            max_lifetime_ms: 1_800_000,
            test_query: "SELECT 1".to_string(),
            test_on_borrow: false,
            test_on_return: false,
            test_while_idle: true,
            auto_commit: true,
            auto_reconnect: true,
            max_retries: 3,
            eviction_seed: None,
            connection_validator: None,
            connection_finalizer: None,
        }
    }
}

impl std::fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("charset", &self.charset)
            .field("url", &self.url)
            .field("min_pool_size", &self.min_pool_size)
            .field("initial_pool_size", &self.initial_pool_size)
            .field("max_pool_size", &self.max_pool_size)
            .field("queue_size", &self.queue_size)
            .field("connection_timeout_ms", &self.connection_timeout_ms)
            .field("idle_timeout_ms", &self.idle_timeout_ms)
            .field("max_lifetime_ms", &self.max_lifetime_ms)
            .field("test_query", &self.test_query)
            .field("test_on_borrow", &self.test_on_borrow)
            .field("test_on_return", &self.test_on_return)
            .field("test_while_idle", &self.test_while_idle)
            .field("auto_commit", &self.auto_commit)
            .field("auto_reconnect", &self.auto_reconnect)
            .field("max_retries", &self.max_retries)
            .field("eviction_seed", &self.eviction_seed)
            .field(
                "connection_validator",
                &self.connection_validator.as_ref().map(|_| "<callback>"),
            )
            .field(
                "connection_finalizer",
                &self.connection_finalizer.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        PoolConfig::default()
    }

    // Discrete connection fields. Each clears a previously set URL.

    pub fn host(mut self, host: &str) -> Self {
        if host.is_empty() {
            warn!("ignoring empty host");
            return self;
        }
        self.host = host.to_string();
        self.url = None;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        if port == 0 {
            warn!("ignoring invalid port 0");
            return self;
        }
        self.port = port;
        self.url = None;
        self
    }

    pub fn database(mut self, database: &str) -> Self {
        if database.is_empty() {
            warn!("ignoring empty database");
            return self;
        }
        self.database = database.to_string();
        self.url = None;
        self
    }

    pub fn username(mut self, username: &str) -> Self {
        if username.is_empty() {
            warn!("ignoring empty username");
            return self;
        }
        self.username = username.to_string();
        self.url = None;
        self
    }

    pub fn password(mut self, password: &str) -> Self {
        self.password = password.to_string();
        self.url = None;
        self
    }

    pub fn charset(mut self, charset: &str) -> Self {
        if charset.is_empty() {
            warn!("ignoring empty charset");
            return self;
        }
        self.charset = charset.to_string();
        self.url = None;
        self
    }

    /// Sets a raw driver connection URL. Overridden (cleared) by any
    /// subsequent discrete setter.
    pub fn url(mut self, url: &str) -> Self {
        if url.is_empty() {
            warn!("ignoring empty url");
            return self;
        }
        self.url = Some(url.to_string());
        self
    }

    // Pool sizing.

    pub fn min_pool_size(mut self, size: usize) -> Self {
        self.min_pool_size = size;
        self
    }

    pub fn initial_pool_size(mut self, size: usize) -> Self {
        self.initial_pool_size = size;
        self
    }

    pub fn max_pool_size(mut self, size: usize) -> Self {
        if size == 0 {
            warn!("ignoring max_pool_size of 0, keeping {}", self.max_pool_size);
            return self;
        }
        self.max_pool_size = size;
        self
    }

    pub fn queue_size(mut self, size: usize) -> Self {
        if size == 0 {
            warn!("ignoring queue_size of 0, keeping {}", self.queue_size);
            return self;
        }
        self.queue_size = size;
        self
    }

    // Timeouts.

    pub fn connection_timeout_ms(mut self, timeout: i64) -> Self {
        self.connection_timeout_ms = timeout;
        self
    }

    pub fn idle_timeout_ms(mut self, timeout: u64) -> Self {
        self.idle_timeout_ms = timeout;
        self
    }

    pub fn max_lifetime_ms(mut self, lifetime: u64) -> Self {
        self.max_lifetime_ms = lifetime;
        self
    }

    // Validation policy.

    pub fn test_query(mut self, query: &str) -> Self {
        if query.trim().is_empty() {
            warn!("ignoring empty test query");
            return self;
        }
        self.test_query = query.to_string();
        self
    }

    pub fn test_on_borrow(mut self, enabled: bool) -> Self {
        self.test_on_borrow = enabled;
        self
    }

    pub fn test_on_return(mut self, enabled: bool) -> Self {
        self.test_on_return = enabled;
        self
    }

    pub fn test_while_idle(mut self, enabled: bool) -> Self {
        self.test_while_idle = enabled;
        self
    }

    // Session defaults.

    pub fn auto_commit(mut self, enabled: bool) -> Self {
        self.auto_commit = enabled;
        self
    }

    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn eviction_seed(mut self, seed: u64) -> Self {
        self.eviction_seed = Some(seed);
        self
    }

    pub fn connection_validator(mut self, validator: ConnectionValidator) -> Self {
        self.connection_validator = Some(validator);
        self
    }

    pub fn connection_finalizer(mut self, finalizer: ConnectionFinalizer) -> Self {
        self.connection_finalizer = Some(finalizer);
        self
    }

    /// Synthesizes a driver URL from the discrete fields when no URL was
    /// set. For the embedded driver the URL is a `file:` URI over the
    /// database path; host/credentials are carried for parity with server
    /// backends but are not dialed.
    pub fn build_connection_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        if self.database == ":memory:" {
            return ":memory:".to_string();
        }
        format!("file:{}", self.database)
    }

    /// Checks the config for the problems that must stop a pool from
    /// starting: no URL and no host/username, or inconsistent size bounds.
    /// Returns false rather than failing; `ConnectionPool::open` turns a
    /// false into a configuration error.
    pub fn validate(&self) -> bool {
        if self.url.is_none() && (self.host.is_empty() || self.username.is_empty()) {
            warn!("invalid pool config: missing host or username and no url set");
            return false;
        }
        if self.min_pool_size > self.max_pool_size {
            warn!(
                "invalid pool config: min_pool_size {} > max_pool_size {}",
                self.min_pool_size, self.max_pool_size
            );
            return false;
        }
        true
    }

    /// Clamps `initial_pool_size` into `[min, max]`, warning when it had
    /// to move. Called by the pool before warm-up.
    pub(crate) fn clamped_initial_size(&self) -> usize {
        let clamped = self
            .initial_pool_size
            .clamp(self.min_pool_size, self.max_pool_size);
        if clamped != self.initial_pool_size {
            warn!(
                "initial_pool_size {} clamped to {} (min {}, max {})",
                self.initial_pool_size, clamped, self.min_pool_size, self.max_pool_size
            );
        }
        clamped
    }

    /// Parses a `PoolConfig` from TOML text. Unknown keys are ignored;
    /// missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }
}

/// Loads a pool configuration from a TOML file at the given path.
pub fn load_pool_config<P: AsRef<Path>>(path: P) -> Result<PoolConfig, String> {
    let content = fs::read_to_string(path).map_err(|e| e.to_string())?;
    PoolConfig::from_toml_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fluent_chain() {
        let config = PoolConfig::new()
            .host("localhost")
            .port(3307)
            .database("app")
            .username("root")
            .max_pool_size(4)
            .connection_timeout_ms(500);
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 3307);
        assert_eq!(config.max_pool_size, 4);
        assert_eq!(config.connection_timeout_ms, 500);
    }

    #[test]
    fn test_out_of_range_input_keeps_previous_value() {
        let config = PoolConfig::new().max_pool_size(4).max_pool_size(0);
        assert_eq!(config.max_pool_size, 4);

        let config = PoolConfig::new().port(0);
        assert_eq!(config.port, 3306);

        let config = PoolConfig::new().test_query("  ");
        assert_eq!(config.test_query, "SELECT 1");
    }

    #[test]
    fn test_discrete_setter_clears_url() {
        let config = PoolConfig::new().url("file:/tmp/a.db").host("localhost");
        assert!(config.url.is_none());

        let config = PoolConfig::new().host("localhost").url("file:/tmp/a.db");
        assert_eq!(config.url.as_deref(), Some("file:/tmp/a.db"));
    }

    #[test]
    fn test_validate_requires_host_and_username_without_url() {
        let config = PoolConfig::new();
        assert!(!config.validate());

        let config = PoolConfig::new().host("localhost");
        assert!(!config.validate());

        let config = PoolConfig::new().host("localhost").username("root");
        assert!(config.validate());

        let config = PoolConfig::new().url("file:/tmp/a.db");
        assert!(config.validate());
    }

    #[test]
    fn test_validate_rejects_min_above_max() {
        let config = PoolConfig::new()
            .host("localhost")
            .username("root")
            .min_pool_size(9)
            .max_pool_size(4);
        assert!(!config.validate());
    }

    #[test]
    fn test_initial_size_clamps() {
        let config = PoolConfig::new()
            .min_pool_size(2)
            .initial_pool_size(100)
            .max_pool_size(4);
        assert_eq!(config.clamped_initial_size(), 4);

        let config = PoolConfig::new()
            .min_pool_size(2)
            .initial_pool_size(0)
            .max_pool_size(4);
        assert_eq!(config.clamped_initial_size(), 2);
    }

    #[test]
    fn test_build_connection_url() {
        let config = PoolConfig::new().database("/tmp/app.db");
        assert_eq!(config.build_connection_url(), "file:/tmp/app.db");

        let config = PoolConfig::new().database(":memory:");
        assert_eq!(config.build_connection_url(), ":memory:");

        let config = PoolConfig::new().url("file:/tmp/override.db");
        assert_eq!(config.build_connection_url(), "file:/tmp/override.db");
    }

    #[test]
    fn test_load_from_toml() {
        let config = PoolConfig::from_toml_str(
            r#"
            host = "localhost"
            username = "root"
            database = "/tmp/app.db"
            max_pool_size = 16
            test_on_borrow = true
            "#,
        )
        .expect("Failed to parse sample config");
        assert_eq!(config.host, "localhost");
        assert_eq!(config.max_pool_size, 16);
        assert!(config.test_on_borrow);
        // Unset keys take defaults.
        assert_eq!(config.test_query, "SELECT 1");
        assert!(config.validate());
    }
}
