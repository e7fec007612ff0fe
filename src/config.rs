use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use validator::Validate;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_SESSION_TTL_MINUTES: i64 = 15;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;
const DEFAULT_RETENTION_SWEEP_INTERVAL_SECS: u64 = 86_400;
const DEFAULT_RETENTION_HOURS: i64 = 24;
const DEFAULT_FLIGHT_DURATION_MINUTES: i64 = 20;
const DEV_DEFAULT_JWT_SECRET: &str =
    "this_is_a_development_secret_key_that_is_at_least_64_characters_long_for_testing";

/// VNPay gateway settings. Signatures are HMAC-SHA512 over the sorted,
/// URL-encoded parameter string.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VnpayConfig {
    #[serde(default = "default_vnpay_tmn_code")]
    pub tmn_code: String,
    #[serde(default = "default_dev_secret")]
    pub hash_secret: String,
    #[serde(default = "default_vnpay_pay_url")]
    pub pay_url: String,
    #[serde(default = "default_vnpay_return_url")]
    pub return_url: String,
}

impl Default for VnpayConfig {
    fn default() -> Self {
        Self {
            tmn_code: default_vnpay_tmn_code(),
            hash_secret: default_dev_secret(),
            pay_url: default_vnpay_pay_url(),
            return_url: default_vnpay_return_url(),
        }
    }
}

/// MoMo gateway settings. Signatures are HMAC-SHA256 over a fixed-order raw
/// string; the field order is part of the provider contract.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MomoConfig {
    #[serde(default = "default_momo_partner_code")]
    pub partner_code: String,
    #[serde(default = "default_dev_secret")]
    pub access_key: String,
    #[serde(default = "default_dev_secret")]
    pub secret_key: String,
    #[serde(default = "default_momo_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_momo_redirect_url")]
    pub redirect_url: String,
    #[serde(default = "default_momo_ipn_url")]
    pub ipn_url: String,
}

impl Default for MomoConfig {
    fn default() -> Self {
        Self {
            partner_code: default_momo_partner_code(),
            access_key: default_dev_secret(),
            secret_key: default_dev_secret(),
            endpoint: default_momo_endpoint(),
            redirect_url: default_momo_redirect_url(),
            ipn_url: default_momo_ipn_url(),
        }
    }
}

/// PayPal settings. There is no local signature check; the trust boundary is
/// the authenticated server-to-server capture call.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PaypalConfig {
    #[serde(default = "default_dev_secret")]
    pub client_id: String,
    #[serde(default = "default_dev_secret")]
    pub client_secret: String,
    #[serde(default = "default_paypal_api_base")]
    pub api_base: String,
    /// Exchange rate used to convert VND order totals to USD for PayPal.
    #[serde(default = "default_vnd_per_usd")]
    pub vnd_per_usd: u32,
}

impl Default for PaypalConfig {
    fn default() -> Self {
        Self {
            client_id: default_dev_secret(),
            client_secret: default_dev_secret(),
            api_base: default_paypal_api_base(),
            vnd_per_usd: default_vnd_per_usd(),
        }
    }
}

/// Application configuration, layered from `config/{environment}.toml` files
/// and `APP__`-prefixed environment variables.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// JWT secret key for bearer-token verification
    #[validate(length(min = 32))]
    pub jwt_secret: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Minutes a payment session stays valid after order creation
    #[serde(default = "default_session_ttl_minutes")]
    pub payment_session_ttl_minutes: i64,

    /// Seconds between expired-session sweeps
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Seconds between retention sweeps (unpaid orders past the retention age)
    #[serde(default = "default_retention_sweep_interval_secs")]
    pub retention_sweep_interval_secs: u64,

    /// Hours an unpaid pending order is retained regardless of session expiry
    #[serde(default = "default_retention_hours")]
    pub unpaid_retention_hours: i64,

    /// Simulated drone flight duration in minutes (zero point is dispatch)
    #[serde(default = "default_flight_duration_minutes")]
    pub flight_duration_minutes: i64,

    #[serde(default)]
    pub vnpay: VnpayConfig,

    #[serde(default)]
    pub momo: MomoConfig,

    #[serde(default)]
    pub paypal: PaypalConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_session_ttl_minutes() -> i64 {
    DEFAULT_SESSION_TTL_MINUTES
}
fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}
fn default_retention_sweep_interval_secs() -> u64 {
    DEFAULT_RETENTION_SWEEP_INTERVAL_SECS
}
fn default_retention_hours() -> i64 {
    DEFAULT_RETENTION_HOURS
}
fn default_flight_duration_minutes() -> i64 {
    DEFAULT_FLIGHT_DURATION_MINUTES
}
fn default_dev_secret() -> String {
    DEV_DEFAULT_JWT_SECRET.to_string()
}
fn default_vnpay_tmn_code() -> String {
    "SKYBITE1".to_string()
}
fn default_vnpay_pay_url() -> String {
    "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html".to_string()
}
fn default_vnpay_return_url() -> String {
    "http://localhost:8080/api/v1/payments/vnpay/return".to_string()
}
fn default_momo_partner_code() -> String {
    "MOMOSKYBITE".to_string()
}
fn default_momo_endpoint() -> String {
    "https://test-payment.momo.vn/v2/gateway/api/create".to_string()
}
fn default_momo_redirect_url() -> String {
    "http://localhost:8080/api/v1/payments/momo/return".to_string()
}
fn default_momo_ipn_url() -> String {
    "http://localhost:8080/api/v1/payments/momo/ipn".to_string()
}
fn default_paypal_api_base() -> String {
    "https://api-m.sandbox.paypal.com".to_string()
}
fn default_vnd_per_usd() -> u32 {
    25_000
}

impl AppConfig {
    /// Minimal programmatic constructor, used by tests and tooling.
    pub fn new(database_url: String, jwt_secret: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            jwt_secret,
            host: default_host(),
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            cors_allowed_origins: None,
            payment_session_ttl_minutes: default_session_ttl_minutes(),
            sweep_interval_secs: default_sweep_interval_secs(),
            retention_sweep_interval_secs: default_retention_sweep_interval_secs(),
            unpaid_retention_hours: default_retention_hours(),
            flight_duration_minutes: default_flight_duration_minutes(),
            vnpay: VnpayConfig::default(),
            momo: MomoConfig::default(),
            paypal: PaypalConfig::default(),
        }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development" || self.environment == "test"
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.payment_session_ttl_minutes)
    }

    pub fn flight_duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.flight_duration_minutes)
    }
}

/// Load configuration from `config/default.toml`, an environment-specific
/// overlay, and `APP__*` environment variables (highest precedence).
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let environment = std::env::var("APP_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let cfg: AppConfig = Config::builder()
        .set_default("database_url", "sqlite://skybite.db?mode=rwc")?
        .set_default("jwt_secret", DEV_DEFAULT_JWT_SECRET)?
        .set_default("environment", environment.clone())?
        .add_source(File::with_name(&format!("{CONFIG_DIR}/default")).required(false))
        .add_source(File::with_name(&format!("{CONFIG_DIR}/{environment}")).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?
        .try_deserialize()?;

    cfg.validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {e}")))?;

    if !cfg.is_development() && cfg.jwt_secret == DEV_DEFAULT_JWT_SECRET {
        return Err(ConfigError::Message(
            "refusing to start with the development JWT secret outside development".to_string(),
        ));
    }

    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn programmatic_config_has_sane_defaults() {
        let cfg = AppConfig::new(
            "sqlite::memory:".into(),
            "x".repeat(64),
            8080,
            "test".into(),
        );
        assert_eq!(cfg.payment_session_ttl_minutes, 15);
        assert_eq!(cfg.flight_duration_minutes, 20);
        assert_eq!(cfg.sweep_interval_secs, 300);
        assert!(cfg.is_development());
    }

    #[test]
    fn session_ttl_and_flight_duration_are_durations() {
        let cfg = AppConfig::new(
            "sqlite::memory:".into(),
            "x".repeat(64),
            8080,
            "test".into(),
        );
        assert_eq!(cfg.session_ttl(), chrono::Duration::minutes(15));
        assert_eq!(cfg.flight_duration(), chrono::Duration::minutes(20));
    }
}
