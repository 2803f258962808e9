use crate::rules::{DEFAULT_CANCELLATION_HOURS, MAX_WINDOW_HOURS};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} should be set")]
    Missing(&'static str),
    #[error("{var} has an invalid value '{value}'")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmqpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_address: String,
    pub port: u16,
    pub cancellation_hours: i64,
    pub amqp: AmqpConfig,
    pub organizer_emails: Vec<String>,
    pub cart_url_base: String,
}

impl AppConfig {
    /// Reads the process environment. Call `dotenvy::dotenv()` first to pick up `.env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let cancellation_hours = parse_or(&lookup, "CANCELLATION_HOURS", DEFAULT_CANCELLATION_HOURS)?;
        if !(0..=MAX_WINDOW_HOURS).contains(&cancellation_hours) {
            return Err(ConfigError::Invalid { var: "CANCELLATION_HOURS", value: cancellation_hours.to_string() });
        }

        let organizer_emails = lookup("ORGANIZER_EMAILS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        Ok(AppConfig {
            database_url,
            bind_address: lookup("BIND_ADDRESS").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_or(&lookup, "PORT", 8080)?,
            cancellation_hours,
            amqp: AmqpConfig {
                host: lookup("AMQP_HOST").unwrap_or_else(|| "localhost".to_string()),
                port: parse_or(&lookup, "AMQP_PORT", 5672)?,
                user: lookup("AMQP_USER").unwrap_or_else(|| "guest".to_string()),
                password: lookup("AMQP_PASSWORD").unwrap_or_else(|| "guest".to_string()),
            },
            organizer_emails,
            cart_url_base: lookup("CART_URL_BASE").unwrap_or_else(|| "/AddToCart.aspx".to_string()),
        })
    }
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid { var, value }),
        None => Ok(default),
    }
}
