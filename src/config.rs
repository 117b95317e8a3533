use std::{env, fmt::Display, str::FromStr};

use crate::error::ConfigError;

pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub db_max_connections: u32,
    pub jwt_secret: String,
    /// Access token persisted by a previous sign-in, recovered at start-up.
    pub session_token: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Ok(Self {
            port: try_load("PORT", "8080")?,
            database_url: required("DATABASE_URL")?,
            db_max_connections: try_load("DB_MAX_CONNECTIONS", "20")?,
            jwt_secret: required("JWT_SECRET")?,
            session_token: env::var("SESSION_TOKEN").ok().filter(|t| !t.trim().is_empty()),
        })
    }
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| {
        warn!("Environment variable {key} not found");
        ConfigError::Missing(key)
    })
}

fn try_load<T: FromStr>(key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    parse(key, &raw)
}

fn parse<T: FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    raw.trim().parse().map_err(|e: T::Err| {
        warn!("Invalid {key} value: {e}");
        ConfigError::Invalid {
            key,
            reason: e.to_string(),
        }
    })
}
