//! Runtime configuration, read from the environment (after `.env` is loaded).

use crate::{EcommerceError, Result};

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub jwt_secret: String,
    pub jwt_expiry_hours: i64,
    pub stripe: Option<StripeConfig>,
    pub nats_url: Option<String>,
    pub admin: Option<AdminBootstrap>,
    pub default_currency: String,
}

#[derive(Clone, Debug)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
}

/// Credentials of an administrator created at startup when absent.
#[derive(Clone, Debug)]
pub struct AdminBootstrap {
    pub email: String,
    pub password: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; `from_env` passes `std::env::var`.
    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let jwt_secret = get("JWT_SECRET").ok_or_else(|| EcommerceError::Config("JWT_SECRET must be set".into()))?;
        if jwt_secret.len() < 16 {
            return Err(EcommerceError::Config("JWT_SECRET must be at least 16 characters".into()));
        }

        let stripe = match (get("STRIPE_SECRET_KEY"), get("STRIPE_WEBHOOK_SECRET")) {
            (Some(secret_key), Some(webhook_secret)) => Some(StripeConfig { secret_key, webhook_secret }),
            (None, None) => None,
            _ => return Err(EcommerceError::Config("STRIPE_SECRET_KEY and STRIPE_WEBHOOK_SECRET must be set together".into())),
        };

        let admin = match (get("ADMIN_EMAIL"), get("ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(AdminBootstrap { email, password }),
            _ => None,
        };

        Ok(Self {
            port: parse(get("PORT"), "PORT", 8083)?,
            database_url: get("DATABASE_URL"),
            database_max_connections: parse(get("DATABASE_MAX_CONNECTIONS"), "DATABASE_MAX_CONNECTIONS", 10)?,
            jwt_secret,
            jwt_expiry_hours: parse(get("JWT_EXPIRY_HOURS"), "JWT_EXPIRY_HOURS", 24)?,
            stripe,
            nats_url: get("NATS_URL"),
            admin,
            default_currency: get("DEFAULT_CURRENCY").unwrap_or_else(|| "USD".into()).to_uppercase(),
        })
    }
}

fn parse<T: std::str::FromStr>(value: Option<String>, key: &str, default: T) -> Result<T> {
    match value {
        Some(raw) => raw.parse().map_err(|_| EcommerceError::Config(format!("{key} has an invalid value: {raw}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[("JWT_SECRET", "0123456789abcdef")])).unwrap();
        assert_eq!(config.port, 8083);
        assert_eq!(config.jwt_expiry_hours, 24);
        assert!(config.database_url.is_none());
        assert!(config.stripe.is_none());
        assert_eq!(config.default_currency, "USD");
    }

    #[test]
    fn test_requires_jwt_secret() {
        assert!(matches!(Config::from_lookup(lookup(&[])), Err(EcommerceError::Config(_))));
    }

    #[test]
    fn test_stripe_keys_come_in_pairs() {
        let result = Config::from_lookup(lookup(&[("JWT_SECRET", "0123456789abcdef"), ("STRIPE_SECRET_KEY", "sk_test")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_port() {
        let result = Config::from_lookup(lookup(&[("JWT_SECRET", "0123456789abcdef"), ("PORT", "http")]));
        assert!(matches!(result, Err(EcommerceError::Config(msg)) if msg.contains("PORT")));
    }
}
