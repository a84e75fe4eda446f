use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

use chrono::Duration;

use crate::workflows::staffing::{
    AttendancePolicy, MarketplaceSettings, MatchWeights, ReliabilityPolicy, ScoringPolicy,
};

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub marketplace: MarketplaceConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            marketplace: MarketplaceConfig::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Matching weights, timing windows and escrow parameters for the staffing engine.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketplaceConfig {
    pub weights: MatchWeights,
    pub scoring: ScoringPolicy,
    pub urgent_acceptance_threshold: f64,
    pub check_in_window_minutes: i64,
    pub no_show_grace_minutes: i64,
    pub invitation_ttl_minutes: i64,
    pub claim_retry_limit: u32,
    pub strike_threshold: u32,
    pub suspension_days: i64,
    pub strike_decay_completions: u32,
    pub platform_fee_bps: u32,
    pub dispute_window_hours: i64,
    pub sweep_interval_secs: u64,
    /// JSON file of worker profiles loaded into the directory at start-up.
    pub worker_seed_path: Option<PathBuf>,
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            weights: MatchWeights::default(),
            scoring: ScoringPolicy::default(),
            urgent_acceptance_threshold: 0.5,
            check_in_window_minutes: 30,
            no_show_grace_minutes: 15,
            invitation_ttl_minutes: 60,
            claim_retry_limit: 8,
            strike_threshold: 3,
            suspension_days: 14,
            strike_decay_completions: 5,
            platform_fee_bps: 1_500,
            dispute_window_hours: 24,
            sweep_interval_secs: 60,
            worker_seed_path: None,
        }
    }
}

impl MarketplaceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let weights = MatchWeights {
            skills: read("MATCH_WEIGHT_SKILLS", defaults.weights.skills)?,
            rating: read("MATCH_WEIGHT_RATING", defaults.weights.rating)?,
            distance: read("MATCH_WEIGHT_DISTANCE", defaults.weights.distance)?,
            availability: read("MATCH_WEIGHT_AVAILABILITY", defaults.weights.availability)?,
            urgency: read("MATCH_WEIGHT_URGENCY", defaults.weights.urgency)?,
        };
        weights
            .validate()
            .map_err(|error| ConfigError::InvalidWeights(error.to_string()))?;

        let scoring = ScoringPolicy {
            tier_bonus_per_level: read(
                "MATCH_TIER_BONUS_PER_LEVEL",
                defaults.scoring.tier_bonus_per_level,
            )?,
            tier_bonus_cap: read("MATCH_TIER_BONUS_CAP", defaults.scoring.tier_bonus_cap)?,
            strike_penalty: read("MATCH_STRIKE_PENALTY", defaults.scoring.strike_penalty)?,
            unrated_score: read("MATCH_UNRATED_SCORE", defaults.scoring.unrated_score)?,
        };
        scoring
            .validate()
            .map_err(|error| ConfigError::InvalidWeights(error.to_string()))?;

        let urgent_acceptance_threshold = read(
            "URGENT_ACCEPTANCE_THRESHOLD",
            defaults.urgent_acceptance_threshold,
        )?;
        if !(0.0..=1.0).contains(&urgent_acceptance_threshold) {
            return Err(ConfigError::InvalidValue {
                key: "URGENT_ACCEPTANCE_THRESHOLD",
                value: urgent_acceptance_threshold.to_string(),
            });
        }

        let config = Self {
            weights,
            scoring,
            urgent_acceptance_threshold,
            check_in_window_minutes: non_negative(
                "CHECK_IN_WINDOW_MINUTES",
                defaults.check_in_window_minutes,
            )?,
            no_show_grace_minutes: non_negative(
                "NO_SHOW_GRACE_MINUTES",
                defaults.no_show_grace_minutes,
            )?,
            invitation_ttl_minutes: positive(
                "INVITATION_TTL_MINUTES",
                defaults.invitation_ttl_minutes,
            )?,
            claim_retry_limit: positive("CLAIM_RETRY_LIMIT", defaults.claim_retry_limit)?,
            strike_threshold: positive("STRIKE_THRESHOLD", defaults.strike_threshold)?,
            suspension_days: positive("SUSPENSION_DAYS", defaults.suspension_days)?,
            strike_decay_completions: read(
                "STRIKE_DECAY_COMPLETIONS",
                defaults.strike_decay_completions,
            )?,
            platform_fee_bps: read("PLATFORM_FEE_BPS", defaults.platform_fee_bps)?,
            dispute_window_hours: non_negative(
                "DISPUTE_WINDOW_HOURS",
                defaults.dispute_window_hours,
            )?,
            sweep_interval_secs: positive("SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs)?,
            worker_seed_path: env::var("WORKER_SEED_PATH")
                .ok()
                .filter(|value| !value.trim().is_empty())
                .map(PathBuf::from),
        };

        if config.platform_fee_bps > 10_000 {
            return Err(ConfigError::InvalidValue {
                key: "PLATFORM_FEE_BPS",
                value: config.platform_fee_bps.to_string(),
            });
        }

        Ok(config)
    }

    /// Engine settings derived from this configuration.
    pub fn settings(&self) -> MarketplaceSettings {
        MarketplaceSettings {
            weights: self.weights.clone(),
            scoring: self.scoring.clone(),
            urgent_acceptance_threshold: self.urgent_acceptance_threshold,
            attendance: AttendancePolicy {
                check_in_window: Duration::minutes(self.check_in_window_minutes),
                no_show_grace: Duration::minutes(self.no_show_grace_minutes),
            },
            invitation_ttl: Duration::minutes(self.invitation_ttl_minutes),
            claim_retry_limit: self.claim_retry_limit,
            reliability: ReliabilityPolicy {
                strike_threshold: self.strike_threshold,
                suspension: Duration::days(self.suspension_days),
                strike_decay_completions: self.strike_decay_completions,
            },
            platform_fee_bps: self.platform_fee_bps,
            dispute_window: Duration::hours(self.dispute_window_hours),
        }
    }
}

fn read<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => {
            value
                .trim()
                .parse::<T>()
                .map_err(|_| ConfigError::InvalidValue { key, value })
        }
        _ => Ok(default),
    }
}

fn non_negative<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default + ToString,
{
    let value = read(key, default)?;
    if value < T::default() {
        return Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        });
    }
    Ok(value)
}

fn positive<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default + ToString,
{
    let value = read(key, default)?;
    if value <= T::default() {
        return Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        });
    }
    Ok(value)
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidValue { key: &'static str, value: String },
    InvalidWeights(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidValue { key, value } => {
                write!(f, "{key} has an invalid value '{value}'")
            }
            ConfigError::InvalidWeights(reason) => write!(f, "matching weights rejected: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidValue { .. }
            | ConfigError::InvalidWeights(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    const MARKETPLACE_KEYS: &[&str] = &[
        "MATCH_WEIGHT_SKILLS",
        "MATCH_WEIGHT_RATING",
        "MATCH_WEIGHT_DISTANCE",
        "MATCH_WEIGHT_AVAILABILITY",
        "MATCH_WEIGHT_URGENCY",
        "MATCH_TIER_BONUS_PER_LEVEL",
        "MATCH_TIER_BONUS_CAP",
        "MATCH_STRIKE_PENALTY",
        "MATCH_UNRATED_SCORE",
        "URGENT_ACCEPTANCE_THRESHOLD",
        "CHECK_IN_WINDOW_MINUTES",
        "NO_SHOW_GRACE_MINUTES",
        "INVITATION_TTL_MINUTES",
        "CLAIM_RETRY_LIMIT",
        "STRIKE_THRESHOLD",
        "SUSPENSION_DAYS",
        "STRIKE_DECAY_COMPLETIONS",
        "PLATFORM_FEE_BPS",
        "DISPUTE_WINDOW_HOURS",
        "SWEEP_INTERVAL_SECS",
        "WORKER_SEED_PATH",
    ];

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        env::remove_var("APP_ENV");
        env::remove_var("APP_HOST");
        env::remove_var("APP_PORT");
        env::remove_var("APP_LOG_LEVEL");
        for key in MARKETPLACE_KEYS {
            env::remove_var(key);
        }
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.marketplace, MarketplaceConfig::default());
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
    }

    #[test]
    fn marketplace_overrides_flow_into_settings() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("MATCH_WEIGHT_SKILLS", "50");
        env::set_var("NO_SHOW_GRACE_MINUTES", "5");
        env::set_var("DISPUTE_WINDOW_HOURS", "0");
        env::set_var("WORKER_SEED_PATH", "/tmp/workers.json");

        let config = MarketplaceConfig::from_env().expect("overrides parse");
        let settings = config.settings();
        reset_env();

        assert_eq!(settings.weights.skills, 50.0);
        assert_eq!(settings.attendance.no_show_grace, Duration::minutes(5));
        assert_eq!(settings.dispute_window, Duration::zero());
        assert_eq!(
            config.worker_seed_path,
            Some(PathBuf::from("/tmp/workers.json"))
        );
    }

    #[test]
    fn rejects_unparseable_values_with_key() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("CLAIM_RETRY_LIMIT", "many");
        let error = MarketplaceConfig::from_env().expect_err("invalid retry limit");
        reset_env();
        assert!(error.to_string().contains("CLAIM_RETRY_LIMIT"));
    }

    #[test]
    fn rejects_negative_weights() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("MATCH_WEIGHT_RATING", "-1");
        let error = MarketplaceConfig::from_env().expect_err("negative weight");
        reset_env();
        assert!(matches!(error, ConfigError::InvalidWeights(_)));
    }

    #[test]
    fn rejects_zero_retry_budget() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("CLAIM_RETRY_LIMIT", "0");
        let error = MarketplaceConfig::from_env().expect_err("zero retries");
        reset_env();
        assert!(matches!(
            error,
            ConfigError::InvalidValue {
                key: "CLAIM_RETRY_LIMIT",
                ..
            }
        ));
    }
}
