//! Feed Configuration Settings
//!
//! Configuration types for the realtime feed, loaded from environment
//! variables.

use std::time::Duration;

use crate::domain::session::{CustomerType, FeedPrincipal};
use crate::infrastructure::kis::{
    DEMO_WS_URL, FeedConnectionConfig, LivenessConfig, MessageTypes, REAL_WS_URL,
};
use crate::infrastructure::resilience::RetryPolicy;

/// KIS account environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KisEnvironment {
    /// Real account.
    #[default]
    Real,
    /// Demo (paper) account.
    Demo,
}

impl KisEnvironment {
    /// Parse environment from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "DEMO" | "PAPER" | "VTS" => Self::Demo,
            _ => Self::Real,
        }
    }

    /// Check if this is the demo environment.
    #[must_use]
    pub const fn is_demo(&self) -> bool {
        matches!(self, Self::Demo)
    }

    /// Get the environment name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Real => "real",
            Self::Demo => "demo",
        }
    }

    /// Default feed URL for the environment.
    #[must_use]
    pub const fn default_ws_url(&self) -> &'static str {
        match self {
            Self::Real => REAL_WS_URL,
            Self::Demo => DEMO_WS_URL,
        }
    }
}

/// Connection and retry settings.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Retries after a failed connect.
    pub connect_max_retries: u32,
    /// Delay between connect attempts.
    pub connect_retry_delay: Duration,
    /// Retries after a failed subscribe/unsubscribe send.
    pub send_max_retries: u32,
    /// Delay between send attempts.
    pub send_retry_delay: Duration,
    /// Silence before the session is considered dead (0 = disabled).
    pub idle_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_max_retries: 3,
            connect_retry_delay: Duration::from_millis(1000),
            send_max_retries: 3,
            send_retry_delay: Duration::from_millis(1000),
            idle_timeout: Duration::from_secs(120),
        }
    }
}

/// Complete feed configuration.
#[derive(Clone)]
pub struct FeedConfig {
    /// Account environment.
    pub environment: KisEnvironment,
    /// Feed URL.
    pub ws_url: String,
    approval_key: String,
    /// Customer classification.
    pub customer_type: CustomerType,
    /// HTS id for execution notices.
    pub hts_id: Option<String>,
    /// User id for logging.
    pub user_id: String,
    /// Symbols subscribed at startup.
    pub symbols: Vec<String>,
    /// Transaction codes.
    pub message_types: MessageTypes,
    /// Connection settings.
    pub connection: ConnectionSettings,
    /// Capacity of the event queue drained by the binary.
    pub event_queue_capacity: usize,
    /// Health check HTTP port.
    pub health_port: u16,
}

impl FeedConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `KIS_APPROVAL_KEY` is missing or empty, or a
    /// value cannot be interpreted.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// See [`FeedConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let approval_key = lookup("KIS_APPROVAL_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("KIS_APPROVAL_KEY".to_string()))?;
        if approval_key.trim().is_empty() {
            return Err(ConfigError::EmptyValue("KIS_APPROVAL_KEY".to_string()));
        }

        let environment = lookup("KIS_ENV")
            .map(|s| KisEnvironment::from_str_case_insensitive(&s))
            .unwrap_or_default();

        let ws_url = lookup("KIS_WS_URL")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| environment.default_ws_url().to_string());

        let customer_type = match lookup("KIS_CUSTTYPE") {
            Some(raw) if !raw.trim().is_empty() => {
                raw.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "KIS_CUSTTYPE".to_string(),
                    value: raw,
                })?
            }
            _ => CustomerType::default(),
        };

        let defaults = MessageTypes::default();
        let message_types = MessageTypes {
            tick: lookup_or(&lookup, "KIS_TR_ID_TICK", defaults.tick),
            ask_bid: lookup_or(&lookup, "KIS_TR_ID_ASK_BID", defaults.ask_bid),
            notice: lookup_or(&lookup, "KIS_TR_ID_NOTICE", defaults.notice),
            notice_demo: lookup_or(&lookup, "KIS_TR_ID_NOTICE_DEMO", defaults.notice_demo),
            ping: lookup_or(&lookup, "KIS_TR_ID_PING", defaults.ping),
        };

        let connection_defaults = ConnectionSettings::default();
        let connection = ConnectionSettings {
            connect_max_retries: parse_or(
                &lookup,
                "FEED_CONNECT_MAX_RETRIES",
                connection_defaults.connect_max_retries,
            ),
            connect_retry_delay: Duration::from_millis(parse_or(
                &lookup,
                "FEED_CONNECT_RETRY_DELAY_MS",
                duration_millis(connection_defaults.connect_retry_delay),
            )),
            send_max_retries: parse_or(
                &lookup,
                "FEED_SEND_MAX_RETRIES",
                connection_defaults.send_max_retries,
            ),
            send_retry_delay: Duration::from_millis(parse_or(
                &lookup,
                "FEED_SEND_RETRY_DELAY_MS",
                duration_millis(connection_defaults.send_retry_delay),
            )),
            idle_timeout: Duration::from_secs(parse_or(
                &lookup,
                "FEED_IDLE_TIMEOUT_SECS",
                connection_defaults.idle_timeout.as_secs(),
            )),
        };

        Ok(Self {
            environment,
            ws_url,
            approval_key,
            customer_type,
            hts_id: lookup("KIS_HTS_ID").filter(|s| !s.trim().is_empty()),
            user_id: lookup("KIS_USER_ID").unwrap_or_else(|| "kis-realtime-feed".to_string()),
            symbols: lookup("KIS_SYMBOLS")
                .map(|raw| parse_symbol_list(&raw))
                .unwrap_or_default(),
            message_types,
            connection,
            event_queue_capacity: parse_or(&lookup, "FEED_EVENT_QUEUE_CAPACITY", 4096),
            health_port: parse_or(&lookup, "FEED_HEALTH_PORT", 8083),
        })
    }

    /// The principal the feed is started for.
    #[must_use]
    pub fn principal(&self) -> FeedPrincipal {
        let principal = FeedPrincipal::new(self.user_id.clone())
            .with_approval_key(self.approval_key.clone())
            .with_customer_type(self.customer_type)
            .with_demo(self.environment.is_demo());
        match &self.hts_id {
            Some(hts_id) => principal.with_hts_id(hts_id.clone()),
            None => principal,
        }
    }

    /// Connection configuration derived from these settings.
    #[must_use]
    pub fn connection_config(&self) -> FeedConnectionConfig {
        let liveness = if self.connection.idle_timeout.is_zero() {
            LivenessConfig::disabled()
        } else {
            LivenessConfig {
                idle_timeout: self.connection.idle_timeout,
                ..LivenessConfig::default()
            }
        };
        FeedConnectionConfig {
            url: self.ws_url.clone(),
            connect_retry: RetryPolicy::new(
                self.connection.connect_max_retries,
                self.connection.connect_retry_delay,
            ),
            liveness,
        }
    }

    /// Retry policy for recovering a dropped session. Shares the connect
    /// settings.
    #[must_use]
    pub const fn recovery_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.connection.connect_max_retries,
            self.connection.connect_retry_delay,
        )
    }

    /// Retry policy for subscribe/unsubscribe sends.
    #[must_use]
    pub const fn send_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.connection.send_max_retries,
            self.connection.send_retry_delay,
        )
    }
}

impl std::fmt::Debug for FeedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedConfig")
            .field("environment", &self.environment)
            .field("ws_url", &self.ws_url)
            .field("approval_key", &"[REDACTED]")
            .field("customer_type", &self.customer_type)
            .field("hts_id", &self.hts_id.as_ref().map(|_| "[REDACTED]"))
            .field("user_id", &self.user_id)
            .field("symbols", &self.symbols)
            .field("message_types", &self.message_types)
            .field("connection", &self.connection)
            .field("event_queue_capacity", &self.event_queue_capacity)
            .field("health_port", &self.health_port)
            .finish()
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has a value that cannot be used.
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

/// Split a comma/whitespace separated symbol list.
fn parse_symbol_list(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn lookup_or<F>(lookup: &F, key: &str, default: String) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).filter(|v| !v.trim().is_empty()).unwrap_or(default)
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
