use std::env;
use std::time::Duration;

use crate::models::OrderScope;

/// Rate limit configuration (requests per minute per IP).
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Endpoints that call the payment gateway.
    pub strict_rpm: u32,
    /// Downloads, file serving and order reads.
    pub standard_rpm: u32,
    /// Health checks.
    pub relaxed_rpm: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            strict_rpm: 10,
            standard_rpm: 30,
            relaxed_rpm: 60,
        }
    }
}

/// Server-side prices. Clients never supply an amount.
#[derive(Debug, Clone)]
pub struct Pricing {
    pub per_evaluator: i64,
    pub bundle: i64,
    pub currency: String,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            per_evaluator: 3000,
            bundle: 5000,
            currency: "KRW".to_string(),
        }
    }
}

impl Pricing {
    /// Price of a scope. Picking evaluators one by one never costs more than
    /// the bundle.
    pub fn quote(&self, scope: &OrderScope) -> i64 {
        if scope.all {
            return self.bundle;
        }
        let count = scope.evaluators.len() as i64;
        (self.per_evaluator * count).min(self.bundle)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub base_url: String,
    pub dev_mode: bool,
    pub session_secret: String,
    pub gateway_api_url: String,
    pub gateway_secret_key: String,
    pub gateway_webhook_secret: String,
    pub gateway_timeout: Duration,
    pub storage_root: String,
    pub storage_signing_secret: String,
    pub signed_url_ttl: Duration,
    pub download_quota: i64,
    pub pricing: Pricing,
    pub rate_limit: RateLimitConfig,
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid value for {}: {:?}, using default", name, raw);
            default
        }),
        Err(_) => default,
    }
}

/// Read a secret. Dev mode falls back to a fixed placeholder; anywhere else a
/// missing secret stops the process.
fn secret(name: &str, dev_mode: bool) -> String {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => value,
        _ if dev_mode => {
            tracing::warn!("{} not set, using insecure dev default", name);
            format!("dev-{}-do-not-use-in-production", name.to_lowercase())
        }
        _ => {
            eprintln!("FATAL: {} must be set outside dev mode", name);
            std::process::exit(1);
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("REPORTGATE_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = parse_env("PORT", 3000);

        let base_url = env::var("BASE_URL")
            .unwrap_or_else(|_| format!("http://{}:{}", host, port));

        let download_quota: i64 = parse_env("DOWNLOAD_QUOTA", 10);
        if download_quota <= 0 {
            eprintln!("FATAL: DOWNLOAD_QUOTA must be positive");
            std::process::exit(1);
        }

        let defaults = RateLimitConfig::default();
        let rate_limit = RateLimitConfig {
            strict_rpm: parse_env("RATE_LIMIT_STRICT_RPM", defaults.strict_rpm),
            standard_rpm: parse_env("RATE_LIMIT_STANDARD_RPM", defaults.standard_rpm),
            relaxed_rpm: parse_env("RATE_LIMIT_RELAXED_RPM", defaults.relaxed_rpm),
        };

        let pricing = Pricing {
            per_evaluator: parse_env("PRICE_PER_EVALUATOR", 3000),
            bundle: parse_env("BUNDLE_PRICE", 5000),
            currency: env::var("CURRENCY").unwrap_or_else(|_| "KRW".to_string()),
        };

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "reportgate.db".to_string()),
            base_url,
            session_secret: secret("SESSION_SECRET", dev_mode),
            gateway_api_url: env::var("GATEWAY_API_URL")
                .unwrap_or_else(|_| "https://api.tosspayments.com".to_string()),
            gateway_secret_key: secret("GATEWAY_SECRET_KEY", dev_mode),
            gateway_webhook_secret: secret("GATEWAY_WEBHOOK_SECRET", dev_mode),
            gateway_timeout: Duration::from_secs(parse_env("GATEWAY_TIMEOUT_SECS", 10)),
            storage_root: env::var("STORAGE_ROOT").unwrap_or_else(|_| "storage".to_string()),
            storage_signing_secret: secret("STORAGE_SIGNING_SECRET", dev_mode),
            signed_url_ttl: Duration::from_secs(parse_env("SIGNED_URL_TTL_SECS", 3600)),
            download_quota,
            pricing,
            rate_limit,
            dev_mode,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
