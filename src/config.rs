use std::time::Duration;

use serde::Deserialize;

const INSECURE_JWT_SECRET: &str = "CHANGE_ME_NOTIFY_HUB_JWT_SECRET";
const DEFAULT_WS_PING_SECS: u64 = 20;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    /// Postgres connection string. When unset the hub runs on the in-memory store.
    pub database_url: Option<String>,
    /// HS256 secret shared with the auth service that mints user tokens.
    pub jwt_secret: String,
    /// Key producers present in `X-Admin-Key` to create notifications.
    pub admin_key: Option<String>,
    /// Endpoint of the e-mail function. E-mail delivery is off when unset.
    pub email_function_url: Option<String>,
    /// HMAC secret used to sign e-mail function calls.
    pub email_signing_secret: Option<String>,
    /// Read notifications older than this many days are purged. 0 = keep forever.
    /// Set via NOTIFY_HUB_RETENTION_DAYS. Default: 30.
    pub retention_days: u32,
    /// Dashboard origin allowed by CORS, in addition to localhost.
    pub dashboard_origin: String,
    /// How often the hub pings each push session. Set via
    /// NOTIFY_HUB_WS_PING_SECS. Default: 20s.
    pub ws_ping_interval: Duration,
    /// A push session that sends nothing back (not even a pong) for this long
    /// is closed. Three ping intervals.
    pub ws_idle_timeout: Duration,
}

impl Config {
    /// Configuration for tests and embedded use: in-memory store, no e-mail.
    pub fn for_tests(jwt_secret: &str, admin_key: &str) -> Self {
        Self {
            port: 0,
            database_url: None,
            jwt_secret: jwt_secret.to_string(),
            admin_key: Some(admin_key.to_string()),
            email_function_url: None,
            email_signing_secret: None,
            retention_days: 0,
            dashboard_origin: "http://localhost:3000".to_string(),
            ws_ping_interval: Duration::from_secs(DEFAULT_WS_PING_SECS),
            ws_idle_timeout: Duration::from_secs(DEFAULT_WS_PING_SECS * 3),
        }
    }

    /// Ping every `interval`; give up on a session after three silent ones.
    pub fn with_ws_ping_interval(mut self, interval: Duration) -> Self {
        self.ws_ping_interval = interval;
        self.ws_idle_timeout = interval * 3;
        self
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let jwt_secret = std::env::var("NOTIFY_HUB_JWT_SECRET")
        .unwrap_or_else(|_| INSECURE_JWT_SECRET.into());

    if jwt_secret == INSECURE_JWT_SECRET {
        let env_mode = std::env::var("NOTIFY_HUB_ENV")
            .or_else(|_| std::env::var("RUST_ENV"))
            .unwrap_or_default();
        if env_mode == "production" {
            anyhow::bail!(
                "NOTIFY_HUB_JWT_SECRET is still the insecure placeholder. \
                 Set the secret shared with the auth service before running in production."
            );
        }
        eprintln!("⚠️  NOTIFY_HUB_JWT_SECRET is not set; using insecure placeholder. Set a real secret for production.");
    }

    let ws_ping_secs = std::env::var("NOTIFY_HUB_WS_PING_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(DEFAULT_WS_PING_SECS);

    Ok(Config {
        port: std::env::var("NOTIFY_HUB_PORT")
            .unwrap_or_else(|_| "8080".into())
            .parse()
            .unwrap_or(8080),
        database_url: non_empty_var("DATABASE_URL"),
        jwt_secret,
        admin_key: non_empty_var("NOTIFY_HUB_ADMIN_KEY"),
        email_function_url: non_empty_var("NOTIFY_HUB_EMAIL_FUNCTION_URL"),
        email_signing_secret: non_empty_var("NOTIFY_HUB_EMAIL_SIGNING_SECRET"),
        retention_days: std::env::var("NOTIFY_HUB_RETENTION_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30),
        dashboard_origin: std::env::var("DASHBOARD_ORIGIN")
            .unwrap_or_else(|_| "http://localhost:3000".to_string()),
        ws_ping_interval: Duration::from_secs(ws_ping_secs),
        ws_idle_timeout: Duration::from_secs(ws_ping_secs * 3),
    })
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
