use std::env;
use std::str::FromStr;

use anyhow::{Context, Result};
use url::Url;

use crate::db::DEFAULT_MAX_POOL_SIZE;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "compact" | "text" => Ok(LogFormat::Compact),
            other => anyhow::bail!("unknown LOG_FORMAT {other:?}"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_pool_size: u32,
    pub server_host: String,
    pub server_port: u16,
    pub app_env: String,
    pub log_format: LogFormat,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub jwt_expiry_minutes: i64,
    pub refresh_token_audience: String,
    pub refresh_token_expiry_hours: i64,
    pub cors_allowed_origin: Option<String>,
    pub limiter_enabled: bool,
    pub limiter_rps: u64,
    pub limiter_window_seconds: u64,
    pub shutdown_grace_seconds: u64,
    pub oauth_callback_state: String,
    pub oauth_redirect_url: Option<String>,
    pub google: Option<OAuthClient>,
    pub github: Option<OAuthClient>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let database_max_pool_size = env::var("DATABASE_MAX_POOL_SIZE")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_MAX_POOL_SIZE);
        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "4000".to_string())
            .parse()
            .context("SERVER_PORT must be a valid u16")?;
        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let log_format = env::var("LOG_FORMAT")
            .unwrap_or_else(|_| "json".to_string())
            .parse()
            .context("LOG_FORMAT must be json or compact")?;
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        let jwt_issuer = env::var("JWT_ISSUER").unwrap_or_else(|_| "friendtime".to_string());
        let jwt_audience =
            env::var("JWT_AUDIENCE").unwrap_or_else(|_| "friendtime-clients".to_string());
        let jwt_expiry_minutes = env::var("JWT_EXPIRY_MINUTES")
            .unwrap_or_else(|_| "15".to_string())
            .parse()
            .context("JWT_EXPIRY_MINUTES must be an integer")?;
        let refresh_token_audience = env::var("REFRESH_TOKEN_AUDIENCE")
            .unwrap_or_else(|_| "friendtime-refresh".to_string());
        let refresh_token_expiry_hours = env::var("REFRESH_TOKEN_EXPIRY_HOURS")
            .unwrap_or_else(|_| "168".to_string())
            .parse()
            .context("REFRESH_TOKEN_EXPIRY_HOURS must be an integer")?;
        let cors_allowed_origin = env::var("CORS_ALLOWED_ORIGIN").ok();
        let limiter_enabled = env::var("LIMITER_ENABLED")
            .map(|v| parse_flag(&v))
            .unwrap_or(true);
        let limiter_rps = env::var("LIMITER_RPS")
            .unwrap_or_else(|_| "20".to_string())
            .parse()
            .context("LIMITER_RPS must be an integer")?;
        let limiter_window_seconds = env::var("LIMITER_WINDOW_SECONDS")
            .unwrap_or_else(|_| "1".to_string())
            .parse()
            .context("LIMITER_WINDOW_SECONDS must be an integer")?;
        let shutdown_grace_seconds = env::var("SHUTDOWN_GRACE_SECONDS")
            .unwrap_or_else(|_| "20".to_string())
            .parse()
            .context("SHUTDOWN_GRACE_SECONDS must be an integer")?;
        let oauth_callback_state = env::var("OAUTH_CALLBACK_STATE")
            .unwrap_or_else(|_| "friendtime-oauth-state".to_string());
        let oauth_redirect_url = env::var("OAUTH_REDIRECT_URL").ok();
        let google = oauth_client("GOOGLE_CLIENT_ID", "GOOGLE_CLIENT_SECRET");
        let github = oauth_client("GITHUB_CLIENT_ID", "GITHUB_CLIENT_SECRET");

        Ok(Self {
            database_url,
            database_max_pool_size,
            server_host,
            server_port,
            app_env,
            log_format,
            jwt_secret,
            jwt_issuer,
            jwt_audience,
            jwt_expiry_minutes,
            refresh_token_audience,
            refresh_token_expiry_hours,
            cors_allowed_origin,
            limiter_enabled,
            limiter_rps,
            limiter_window_seconds,
            shutdown_grace_seconds,
            oauth_callback_state,
            oauth_redirect_url,
            google,
            github,
        })
    }

    pub fn redacted_database_url(&self) -> String {
        redact_database_url(&self.database_url)
    }
}

fn oauth_client(id_var: &str, secret_var: &str) -> Option<OAuthClient> {
    match (env::var(id_var), env::var(secret_var)) {
        (Ok(client_id), Ok(client_secret)) if !client_id.is_empty() => Some(OAuthClient {
            client_id,
            client_secret,
        }),
        _ => None,
    }
}

fn parse_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

fn redact_database_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("*****"));
            }
            parsed.to_string()
        }
        Err(_) => "***".to_string(),
    }
}
