use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub redis_url: String,
    /// Operator key for the admin bootstrap endpoints and CLI. Compared in
    /// constant time.
    pub admin_key: String,
    /// Comma-separated list of webhook URLs notified on token lifecycle events.
    pub webhook_urls: Vec<String>,
    /// Optional secret for HMAC-signing webhook payloads.
    pub webhook_signing_secret: Option<String>,
    /// Validity window for freshly generated bookmarklet tokens, in hours.
    /// Set via RANKPILOT_BOOKMARKLET_TTL_HOURS. Default: 24.
    pub bookmarklet_ttl_hours: i64,
    /// Per-client request budget on the public validate endpoint. 0 = disabled.
    /// Set via RANKPILOT_VALIDATE_RPM. Default: 60.
    pub validate_rate_limit: u64,
    /// Window in seconds for the validate rate limit.
    /// Set via RANKPILOT_VALIDATE_RPM_WINDOW. Default: 60.
    pub validate_rate_limit_window: u64,
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let admin_key =
        std::env::var("RANKPILOT_ADMIN_KEY").unwrap_or_else(|_| "CHANGE_ME_ADMIN_KEY".into());

    if admin_key == "CHANGE_ME_ADMIN_KEY" {
        let env_mode = std::env::var("RANKPILOT_ENV")
            .or_else(|_| std::env::var("RUST_ENV"))
            .unwrap_or_default();
        if env_mode == "production" {
            anyhow::bail!(
                "RANKPILOT_ADMIN_KEY is still the insecure placeholder. \
                 Set a proper random key before running in production."
            );
        }
        eprintln!("⚠️  RANKPILOT_ADMIN_KEY is not set — using insecure placeholder. Set a random key for production.");
    }

    Ok(Config {
        port: std::env::var("RANKPILOT_PORT")
            .unwrap_or_else(|_| "8080".into())
            .parse()
            .unwrap_or(8080),
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/rankpilot".into()),
        redis_url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into()),
        admin_key,
        webhook_urls: std::env::var("RANKPILOT_WEBHOOK_URLS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        webhook_signing_secret: std::env::var("RANKPILOT_WEBHOOK_SECRET").ok(),
        bookmarklet_ttl_hours: std::env::var("RANKPILOT_BOOKMARKLET_TTL_HOURS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(24),
        validate_rate_limit: std::env::var("RANKPILOT_VALIDATE_RPM")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60),
        validate_rate_limit_window: std::env::var("RANKPILOT_VALIDATE_RPM_WINDOW")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60),
    })
}
