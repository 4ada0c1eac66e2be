use crate::error::{Error, Result};
use dotenvy::dotenv;
use std::env;
use std::sync::OnceLock;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_db_connections: u32,
    pub sweep_interval_seconds: u64,
    pub overdue_grace_minutes: i64,
    pub abandon_after_hours: i64,
}

pub static CONFIG: OnceLock<Config> = OnceLock::new();

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        Ok(Self {
            database_url: get_env("DATABASE_URL")?,
            max_db_connections: get_env_parse_or("MAX_DB_CONNECTIONS", 50)?,
            sweep_interval_seconds: get_env_parse_or("SWEEP_INTERVAL_SECONDS", 60)?,
            overdue_grace_minutes: get_env_parse_or("OVERDUE_GRACE_MINUTES", 5)?,
            abandon_after_hours: get_env_parse_or("ABANDON_AFTER_HOURS", 24)?,
        })
    }
}

fn get_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::Config(format!("Missing environment variable: {}", name)))
}

fn get_env_parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

pub fn init_config() -> Result<()> {
    let config = Config::from_env()?;
    CONFIG
        .set(config)
        .map_err(|_| Error::Config("Configuration has already been initialized".to_string()))?;
    Ok(())
}

pub fn get_config() -> &'static Config {
    CONFIG
        .get()
        .expect("Configuration has not been initialized")
}
