use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_PAYPAL_BASE_URL: &str = "https://api-m.sandbox.paypal.com";
const DEV_DEFAULT_JWT_SECRET: &str =
    "this_is_a_development_secret_key_that_is_at_least_64_characters_long_for_testing";

/// PayPal REST API credentials and client behaviour.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PayPalConfig {
    /// REST base URL, sandbox unless overridden.
    #[serde(default = "default_paypal_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub client_id: String,

    #[serde(default)]
    pub client_secret: String,

    /// Seconds subtracted from `expires_in` before a cached token is refreshed
    #[serde(default = "default_token_safety_margin_secs")]
    pub token_safety_margin_secs: u64,

    #[serde(default = "default_paypal_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Shown on the PayPal approval page
    #[serde(default)]
    pub brand_name: Option<String>,

    #[serde(default)]
    pub return_url: Option<String>,

    #[serde(default)]
    pub cancel_url: Option<String>,
}

impl Default for PayPalConfig {
    fn default() -> Self {
        Self {
            base_url: default_paypal_base_url(),
            client_id: String::new(),
            client_secret: String::new(),
            token_safety_margin_secs: default_token_safety_margin_secs(),
            request_timeout_secs: default_paypal_timeout_secs(),
            brand_name: None,
            return_url: None,
            cancel_url: None,
        }
    }
}

impl PayPalConfig {
    pub fn has_credentials(&self) -> bool {
        !self.client_id.trim().is_empty() && !self.client_secret.trim().is_empty()
    }

    pub fn token_safety_margin(&self) -> Duration {
        Duration::from_secs(self.token_safety_margin_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// JWT secret key (minimum 64 characters)
    #[validate(length(min = 64), custom = "validate_jwt_secret")]
    pub jwt_secret: String,

    /// Access token lifetime in seconds
    pub jwt_expiration: usize,

    /// Refresh token lifetime in seconds
    pub refresh_token_expiration: usize,

    /// Password reset token lifetime in seconds
    #[serde(default = "default_password_reset_expiration")]
    pub password_reset_expiration: usize,

    /// Server host address
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    #[serde(default)]
    pub cors_allow_any_origin: bool,

    #[serde(default)]
    pub cors_allow_credentials: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// ISO 4217 code every order and capture is settled in
    #[serde(default = "default_currency")]
    #[validate(custom = "validate_currency")]
    pub default_currency: String,

    #[serde(default = "default_api_page_size")]
    pub api_default_page_size: u64,

    #[serde(default = "default_api_max_page_size")]
    pub api_max_page_size: u64,

    #[serde(default = "default_auth_issuer")]
    pub auth_issuer: String,

    #[serde(default = "default_auth_audience")]
    pub auth_audience: String,

    /// How long a replayable checkout response is kept per Idempotency-Key
    #[serde(default = "default_idempotency_ttl_secs")]
    pub idempotency_ttl_secs: u64,

    /// Optional administrator created at startup when absent
    #[serde(default)]
    pub admin_email: Option<String>,

    #[serde(default)]
    pub admin_password: Option<String>,

    #[serde(default)]
    pub paypal: PayPalConfig,
}

impl AppConfig {
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn new(
        database_url: String,
        jwt_secret: String,
        jwt_expiration: usize,
        refresh_token_expiration: usize,
        host: String,
        port: u16,
        environment: String,
    ) -> Self {
        Self {
            database_url,
            jwt_secret,
            jwt_expiration,
            refresh_token_expiration,
            password_reset_expiration: default_password_reset_expiration(),
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            cors_allow_credentials: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            default_currency: default_currency(),
            api_default_page_size: default_api_page_size(),
            api_max_page_size: default_api_max_page_size(),
            auth_issuer: default_auth_issuer(),
            auth_audience: default_auth_audience(),
            idempotency_ttl_secs: default_idempotency_ttl_secs(),
            admin_email: None,
            admin_password: None,
            paypal: PayPalConfig::default(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn has_cors_allowed_origins(&self) -> bool {
        self.cors_allowed_origins
            .as_ref()
            .map(|raw| raw.split(',').any(|origin| !origin.trim().is_empty()))
            .unwrap_or(false)
    }

    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    pub fn idempotency_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotency_ttl_secs)
    }

    /// Clamp a requested page size into `1..=api_max_page_size`.
    pub fn clamp_page_size(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.api_default_page_size)
            .clamp(1, self.api_max_page_size.max(1))
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.should_allow_permissive_cors() && !self.has_cors_allowed_origins() {
            let mut err = ValidationError::new("cors_allowed_origins_required");
            err.message = Some(
                "Set APP__CORS_ALLOWED_ORIGINS for non-development environments or explicitly opt-in via APP__CORS_ALLOW_ANY_ORIGIN=true".into(),
            );
            errors.add("cors_allowed_origins", err);
        }

        if !self.is_development() && self.jwt_secret.trim() == DEV_DEFAULT_JWT_SECRET {
            let mut err = ValidationError::new("jwt_secret_default_dev");
            err.message = Some(
                "The bundled development JWT secret must not be used outside development. Set APP__JWT_SECRET to a unique, secure value."
                    .into(),
            );
            errors.add("jwt_secret", err);
        }

        if !self.is_development() && !self.paypal.has_credentials() {
            let mut err = ValidationError::new("paypal_credentials_required");
            err.message = Some(
                "Set APP__PAYPAL__CLIENT_ID and APP__PAYPAL__CLIENT_SECRET outside development"
                    .into(),
            );
            errors.add("paypal", err);
        }

        if self.admin_email.is_some() != self.admin_password.is_some() {
            let mut err = ValidationError::new("admin_bootstrap_incomplete");
            err.message =
                Some("admin_email and admin_password must be configured together".into());
            errors.add("admin_email", err);
        }

        if self.api_default_page_size == 0 || self.api_default_page_size > self.api_max_page_size
        {
            let mut err = ValidationError::new("api_default_page_size");
            err.message = Some("api_default_page_size must be between 1 and api_max_page_size".into());
            errors.add("api_default_page_size", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_password_reset_expiration() -> usize {
    3600
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_api_page_size() -> u64 {
    20
}

fn default_api_max_page_size() -> u64 {
    100
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_auth_issuer() -> String {
    "jewelry-store".to_string()
}

fn default_auth_audience() -> String {
    "jewelry-store-web".to_string()
}

fn default_idempotency_ttl_secs() -> u64 {
    600
}

fn default_paypal_base_url() -> String {
    DEFAULT_PAYPAL_BASE_URL.to_string()
}

fn default_token_safety_margin_secs() -> u64 {
    60
}

fn default_paypal_timeout_secs() -> u64 {
    30
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_currency(code: &str) -> Result<(), ValidationError> {
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("default_currency");
        err.message = Some("default_currency must be a three-letter uppercase ISO 4217 code".into());
        Err(err)
    }
}

fn validate_jwt_secret(secret: &str) -> Result<(), ValidationError> {
    let trimmed = secret.trim();

    if trimmed.len() < 64 {
        let mut err = ValidationError::new("jwt_secret");
        err.message =
            Some("JWT secret must be at least 64 characters for adequate security".into());
        return Err(err);
    }

    const DISALLOWED: [&str; 3] = [
        "CHANGE_THIS_SECRET_IN_PRODUCTION",
        "your-secret-key",
        "default-secret-key",
    ];
    if DISALLOWED
        .iter()
        .any(|&bad| trimmed.eq_ignore_ascii_case(bad))
    {
        let mut err = ValidationError::new("jwt_secret");
        err.message = Some("JWT secret must be overridden with a secure random value".into());
        return Err(err);
    }

    if let Some(first) = trimmed.chars().next() {
        if trimmed.chars().all(|c| c == first) {
            let mut err = ValidationError::new("jwt_secret");
            err.message = Some("JWT secret cannot be a repeated character sequence".into());
            return Err(err);
        }
    }

    let lower = trimmed.to_ascii_lowercase();
    let weak_fragments = ["changeme", "password", "12345", "abcdef"];
    if weak_fragments.iter().any(|pattern| lower.contains(pattern)) {
        let mut err = ValidationError::new("jwt_secret");
        err.message = Some(
            "JWT secret appears to be weak; use a cryptographically strong random string".into(),
        );
        return Err(err);
    }

    let unique_chars: std::collections::HashSet<char> = trimmed.chars().collect();
    if unique_chars.len() < 10 {
        let mut err = ValidationError::new("jwt_secret");
        err.message =
            Some("JWT secret must have at least 10 unique characters for adequate entropy".into());
        return Err(err);
    }

    Ok(())
}

pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("jewelry_store={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::new(filter_directive);
    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    // jwt_secret has no default
    let config = Config::builder()
        .set_default("database_url", "sqlite://jewelry_store.db?mode=rwc")?
        .set_default("jwt_expiration", 3600)?
        .set_default("refresh_token_expiration", 604800)?
        .set_default("host", "0.0.0.0")?
        .set_default("port", 8080)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    if config.get_string("jwt_secret").is_err() {
        error!("JWT secret is not configured. Set APP__JWT_SECRET environment variable with a secure random string (minimum 64 characters).");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "jwt_secret is required but not configured. Set APP__JWT_SECRET environment variable."
                .into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod validation_tests {
    use super::*;

    const STRONG_SECRET: &str =
        "q8Vn2Lr7Xc4Tz1Wb6Hy3Ks9Pd0Mf5Ga8Je2Ru7Io4Ql1Zx6Cv3Bn9Mh0Tg5Yf8Dw2Es";

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite://jewelry_store.db?mode=memory".into(),
            STRONG_SECRET.into(),
            3600,
            86_400,
            "127.0.0.1".into(),
            8080,
            "production".into(),
        )
    }

    fn with_paypal(mut cfg: AppConfig) -> AppConfig {
        cfg.paypal.client_id = "client".into();
        cfg.paypal.client_secret = "secret".into();
        cfg
    }

    #[test]
    fn non_dev_requires_cors_origins() {
        let cfg = with_paypal(base_config());
        assert!(cfg.validate_additional_constraints().is_err());
    }

    #[test]
    fn non_dev_allows_override_flag() {
        let mut cfg = with_paypal(base_config());
        cfg.cors_allow_any_origin = true;
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn non_dev_requires_paypal_credentials() {
        let mut cfg = base_config();
        cfg.cors_allowed_origins = Some("https://shop.example".into());
        let errors = cfg.validate_additional_constraints().unwrap_err();
        assert!(errors.field_errors().contains_key("paypal"));
    }

    #[test]
    fn development_is_permissive() {
        let mut cfg = base_config();
        cfg.environment = "development".into();
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn admin_bootstrap_needs_both_fields() {
        let mut cfg = base_config();
        cfg.environment = "development".into();
        cfg.admin_email = Some("admin@shop.example".into());
        assert!(cfg.validate_additional_constraints().is_err());
        cfg.admin_password = Some("correct horse battery".into());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn rejects_weak_jwt_secret() {
        let weak = "password".repeat(10);
        assert!(validate_jwt_secret(&weak).is_err());
        assert!(validate_jwt_secret(&"a".repeat(80)).is_err());
        assert!(validate_jwt_secret(STRONG_SECRET).is_ok());
    }

    #[test]
    fn currency_must_be_iso_code() {
        assert!(validate_currency("USD").is_ok());
        assert!(validate_currency("usd").is_err());
        assert!(validate_currency("EURO").is_err());
    }

    #[test]
    fn page_size_is_clamped() {
        let cfg = base_config();
        assert_eq!(cfg.clamp_page_size(None), 20);
        assert_eq!(cfg.clamp_page_size(Some(0)), 1);
        assert_eq!(cfg.clamp_page_size(Some(5_000)), 100);
    }
}
