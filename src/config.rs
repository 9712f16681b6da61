use std::collections::HashMap;
use thiserror::Error;

const MS_PER_DAY: i64 = 86_400_000;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub quote_api_url: Option<String>,
    pub users: Vec<String>,
    pub validation: ValidationConfig,
    pub strategy_window_ms: i64,
    pub audit: AuditConfig,
    pub phantom_policy: PhantomPolicy,
}

/// Thresholds for the input-rejected class of errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationConfig {
    /// How far in the future an execution timestamp may be.
    pub future_tolerance_ms: i64,
    /// Executions older than this are treated as corrupt.
    pub max_trade_age_ms: i64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            future_tolerance_ms: 300_000,
            max_trade_age_ms: 36_500 * MS_PER_DAY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditConfig {
    pub stale_after_ms: i64,
    pub extreme_position_count: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            stale_after_ms: 365 * MS_PER_DAY,
            extreme_position_count: 500,
        }
    }
}

/// What to do with positions implied by sells that have no opening history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhantomPolicy {
    /// Report them as negative positions (flagged by the auditor).
    Include,
    /// Drop them from the position output; the audit report still lists them.
    Exclude,
}

pub const DEFAULT_STRATEGY_WINDOW_MS: i64 = 60_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    /// Configuration for tests and embedding: defaults everywhere.
    pub fn with_database_path(database_path: impl Into<String>) -> Self {
        Config {
            database_path: database_path.into(),
            quote_api_url: None,
            users: Vec::new(),
            validation: ValidationConfig::default(),
            strategy_window_ms: DEFAULT_STRATEGY_WINDOW_MS,
            audit: AuditConfig::default(),
            phantom_policy: PhantomPolicy::Include,
        }
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let quote_api_url = env_map
            .get("QUOTE_API_URL")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let future_tolerance_ms = parse_non_negative(&env_map, "FUTURE_TOLERANCE_MS", 300_000)?;
        let max_trade_age_days = parse_non_negative(&env_map, "MAX_TRADE_AGE_DAYS", 36_500)?;
        let strategy_window_ms =
            parse_non_negative(&env_map, "STRATEGY_WINDOW_MS", DEFAULT_STRATEGY_WINDOW_MS)?;
        let stale_position_days = parse_non_negative(&env_map, "STALE_POSITION_DAYS", 365)?;
        let extreme_position_count = parse_non_negative(&env_map, "EXTREME_POSITION_COUNT", 500)?;

        let phantom_policy = match env_map
            .get("PHANTOM_POLICY")
            .map(|s| s.as_str())
            .unwrap_or("include")
        {
            "include" => PhantomPolicy::Include,
            "exclude" => PhantomPolicy::Exclude,
            other => {
                return Err(ConfigError::InvalidValue(
                    "PHANTOM_POLICY".to_string(),
                    format!("must be include or exclude, got {}", other),
                ))
            }
        };

        let users = parse_users_from_map(&env_map)?;

        Ok(Config {
            database_path,
            quote_api_url,
            users,
            validation: ValidationConfig {
                future_tolerance_ms,
                max_trade_age_ms: max_trade_age_days.saturating_mul(MS_PER_DAY),
            },
            strategy_window_ms,
            audit: AuditConfig {
                stale_after_ms: stale_position_days.saturating_mul(MS_PER_DAY),
                extreme_position_count: extreme_position_count as usize,
            },
            phantom_policy,
        })
    }
}

fn parse_non_negative(
    env_map: &HashMap<String, String>,
    key: &str,
    default: i64,
) -> Result<i64, ConfigError> {
    let Some(raw) = env_map.get(key) else {
        return Ok(default);
    };
    match raw.trim().parse::<i64>() {
        Ok(v) if v >= 0 => Ok(v),
        _ => Err(ConfigError::InvalidValue(
            key.to_string(),
            "must be a non-negative integer".to_string(),
        )),
    }
}

fn parse_users_from_map(env_map: &HashMap<String, String>) -> Result<Vec<String>, ConfigError> {
    if let Some(users_str) = env_map.get("LEDGER_USERS") {
        Ok(users_str
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect())
    } else if let Some(file_path) = env_map.get("LEDGER_USERS_FILE") {
        let content = std::fs::read_to_string(file_path).map_err(|_| {
            ConfigError::InvalidValue(
                "LEDGER_USERS_FILE".to_string(),
                "file not found or unreadable".to_string(),
            )
        })?;
        Ok(content
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect())
    } else {
        Ok(Vec::new())
    }
}
