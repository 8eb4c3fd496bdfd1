//! Pool configuration.

use std::fmt;
use std::sync::Arc;

use crate::error::PoolError;

/// Default ceiling on concurrently created connections.
pub const DEFAULT_MAX_SIZE: u32 = 100;

/// Callback receiving rollback failures that occur while a caller fault is
/// already propagating.
pub type RollbackErrorHandler = Arc<dyn Fn(&PoolError) + Send + Sync>;

/// Configuration for the connection pool.
///
/// This struct is marked `#[non_exhaustive]` to allow adding new fields
/// in future minor versions without breaking changes. Use the builder
/// pattern methods or [`Default::default()`] to construct instances.
#[derive(Clone)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Maximum number of connections the pool will create.
    pub max_size: u32,

    /// Whether discarding a broken connection frees its creation slot.
    ///
    /// When disabled (the default), a discarded connection keeps counting
    /// against `max_size`, so the pool never creates more than `max_size`
    /// connections over its whole lifetime.
    pub reclaim_discarded_slots: bool,

    /// Handler for rollback failures raised while unwinding a caller fault.
    ///
    /// The original fault is always what the caller sees; this is the only
    /// place the secondary error is reported. Defaults to logging it at
    /// error level.
    pub on_rollback_error: RollbackErrorHandler,
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("max_size", &self.max_size)
            .field("reclaim_discarded_slots", &self.reclaim_discarded_slots)
            .finish_non_exhaustive()
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            reclaim_discarded_slots: false,
            on_rollback_error: Arc::new(log_rollback_error),
        }
    }
}

fn log_rollback_error(err: &PoolError) {
    tracing::error!(error = %err, "rollback failed while handling a transaction error");
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_size(mut self, count: u32) -> Self {
        self.max_size = count;
        self
    }

    /// Enable or disable freeing the creation slot of discarded connections.
    #[must_use]
    pub fn reclaim_discarded_slots(mut self, enabled: bool) -> Self {
        self.reclaim_discarded_slots = enabled;
        self
    }

    /// Set the handler for rollback failures.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use dbpool::PoolConfig;
    ///
    /// let config = PoolConfig::new().on_rollback_error(|err| {
    ///     eprintln!("rollback failed: {err}");
    /// });
    /// ```
    #[must_use]
    pub fn on_rollback_error<H>(mut self, handler: H) -> Self
    where
        H: Fn(&PoolError) + Send + Sync + 'static,
    {
        self.on_rollback_error = Arc::new(handler);
        self
    }

    /// Parse a configuration from a `key=value;key=value` string.
    ///
    /// Recognized keys (case-insensitive):
    ///
    /// - `max_size`, `maxsize`, `max connections`: positive integer
    /// - `reclaim_discarded_slots`: `true`/`false`, `yes`/`no`, `1`/`0`
    ///
    /// The result is validated before it is returned.
    pub fn from_config_str(s: &str) -> Result<Self, PoolError> {
        let mut config = Self::default();

        for part in s.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| PoolError::Configuration(format!("invalid key-value: {part}")))?;

            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "max_size" | "maxsize" | "max connections" => {
                    config.max_size = value.parse().map_err(|_| {
                        PoolError::Configuration(format!("expected integer max_size, got {value:?}"))
                    })?;
                }
                "reclaim_discarded_slots" => {
                    config.reclaim_discarded_slots = parse_bool(value).ok_or_else(|| {
                        PoolError::Configuration(format!(
                            "invalid reclaim_discarded_slots: {value}"
                        ))
                    })?;
                }
                _ => {
                    tracing::debug!(key = %key, "ignoring unknown pool option");
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_size == 0 {
            return Err(PoolError::Configuration(
                "max_size must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    if value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes") || value == "1" {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") || value.eq_ignore_ascii_case("no") || value == "0"
    {
        Some(false)
    } else {
        None
    }
}
