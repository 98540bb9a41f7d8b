//! CLI argument parsing, validation, and startup helpers.

use crate::ServerConfig;
use crate::db::Database;
use crate::jwt::{DEFAULT_ACCESS_TTL_SECS, DEFAULT_REFRESH_TTL_SECS, TokenSettings};
use crate::rate_limit::RateLimitConfig;
use clap::Parser;
use tracing::{error, info};
use url::Url;

const MIN_SECRET_LENGTH: usize = 32;

pub const ACCESS_SECRET_ENV: &str = "ACCESS_TOKEN_SECRET";
pub const REFRESH_SECRET_ENV: &str = "REFRESH_TOKEN_SECRET";

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "tokenkeeper",
    about = "Access and rotating refresh token service"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "7291")]
    pub port: u16,

    /// Path to SQLite database file
    #[arg(short, long, default_value = "tokenkeeper.db")]
    pub database: String,

    /// Path to file containing the access token secret. Prefer the ACCESS_TOKEN_SECRET env var
    #[arg(long)]
    pub access_secret_file: Option<String>,

    /// Path to file containing the refresh token secret. Prefer the REFRESH_TOKEN_SECRET env var
    #[arg(long)]
    pub refresh_secret_file: Option<String>,

    /// Access token lifetime in seconds
    #[arg(long, env = "ACCESS_TOKEN_TTL_SECS", default_value_t = DEFAULT_ACCESS_TTL_SECS,
        value_parser = clap::value_parser!(u64).range(1..))]
    pub access_ttl_secs: u64,

    /// Refresh token lifetime in seconds
    #[arg(long, env = "REFRESH_TOKEN_TTL_SECS", default_value_t = DEFAULT_REFRESH_TTL_SECS,
        value_parser = clap::value_parser!(u64).range(1..))]
    pub refresh_ttl_secs: u64,

    /// Mark the refresh cookie Secure and SameSite=Strict (use behind HTTPS)
    #[arg(long)]
    pub secure_cookies: bool,

    /// Origin allowed to make credentialed requests (repeatable)
    #[arg(long = "cors-origin", value_parser = validate_origin)]
    pub cors_origins: Vec<String>,

    /// Accepted external identity provider (repeatable)
    #[arg(long = "external-provider", default_value = "google")]
    pub external_providers: Vec<String>,

    /// Read the client IP from X-Forwarded-For (only behind a reverse proxy)
    #[arg(long)]
    pub trust_proxy: bool,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

fn validate_origin(s: &str) -> Result<String, String> {
    let url = Url::parse(s).map_err(|e| format!("Invalid origin '{}': {}", s, e))?;

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(format!("Origin must be an http(s) URL with a host: {}", s));
    }

    if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
        return Err(format!("Origin must not have a path: {}", s));
    }

    // Browsers send origins without a trailing slash
    Ok(url.origin().ascii_serialization())
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Load a signing secret from an environment variable or file.
/// Returns None and logs an error if the secret cannot be loaded.
pub fn load_secret(env_var: &str, secret_file: Option<&str>) -> Option<Vec<u8>> {
    let secret = if let Ok(secret) = std::env::var(env_var) {
        // Clear the environment variable to prevent leaking
        // SAFETY: We're single-threaded at this point during startup,
        // and no other code is reading this environment variable.
        unsafe { std::env::remove_var(env_var) };
        secret
    } else if let Some(path) = secret_file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read secret file");
                return None;
            }
        }
    } else {
        error!(
            env = env_var,
            "Token secret is required. Set the environment variable (recommended) or pass a secret file"
        );
        return None;
    };

    if secret.len() < MIN_SECRET_LENGTH {
        error!(
            env = env_var,
            "Secret is shorter than {} characters. Use a longer secret", MIN_SECRET_LENGTH
        );
        return None;
    }

    Some(secret.into_bytes())
}

/// Load both secrets and reject configurations that reuse one key.
pub fn load_token_settings(args: &Args) -> Option<TokenSettings> {
    let access_secret = load_secret(ACCESS_SECRET_ENV, args.access_secret_file.as_deref())?;
    let refresh_secret = load_secret(REFRESH_SECRET_ENV, args.refresh_secret_file.as_deref())?;

    if access_secret == refresh_secret {
        error!("Access and refresh token secrets must differ");
        return None;
    }

    Some(TokenSettings {
        access_secret,
        refresh_secret,
        access_ttl_secs: args.access_ttl_secs,
        refresh_ttl_secs: args.refresh_ttl_secs,
    })
}

/// Build ServerConfig from validated arguments.
pub fn build_config(args: Args, db: Database, tokens: TokenSettings) -> ServerConfig {
    ServerConfig {
        db,
        tokens,
        secure_cookies: args.secure_cookies,
        cors_origins: args.cors_origins,
        external_providers: args.external_providers,
        rate_limit: RateLimitConfig::new(args.trust_proxy),
    }
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}
