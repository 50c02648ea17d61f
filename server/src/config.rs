use std::{env, fmt::Display, fs::read_to_string, str::FromStr};

use tracing::{info, warn};

pub struct Config {
    pub port: u16,
    pub redis_url: String,
    /// Public base URL confirmation links are built against.
    pub public_url: String,
    pub mail_api_url: String,
    pub mail_sender: String,
    pub mail_api_key: String,
    pub confirm_secret: String,
}

impl Config {
    pub fn load() -> Self {
        Self {
            port: try_load("RUST_PORT", "1111"),
            redis_url: try_load("REDIS_URL", "redis://127.0.0.1:6379"),
            public_url: try_load("PUBLIC_URL", "http://localhost:1111"),
            mail_api_url: try_load("MAIL_API_URL", "https://api.brevo.com/v3/smtp/email"),
            mail_sender: try_load("MAIL_SENDER", "noreply@localhost"),
            mail_api_key: read_secret("MAIL_API_KEY"),
            confirm_secret: read_secret("CONFIRM_SECRET"),
        }
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        warn!("Environment variable {key} not found, using default");
    })
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
        })
        .expect("Environment misconfigured!")
}

fn read_secret(secret_name: &str) -> String {
    let path = format!("/run/secrets/{secret_name}");

    read_to_string(&path)
        .map(|s| s.trim().to_string())
        .map_err(|e| {
            warn!("Failed to read {secret_name} from file: {e}");
        })
        .expect("Secrets misconfigured!")
}
