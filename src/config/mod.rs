//! Configuration module for the assignments backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pre-shared key for admin API authentication (required in production)
    pub api_psk: Option<String>,
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Seed for the data-assignment selector; set for deterministic picks
    pub rng_seed: Option<u64>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let api_psk = env::var("ASSIGN_API_PSK").ok();

        let db_path = env::var("ASSIGN_DB_PATH")
            .unwrap_or_else(|_| "./data/app.sqlite".to_string())
            .into();

        let bind_addr = env::var("ASSIGN_BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .expect("Invalid ASSIGN_BIND_ADDR format");

        let log_level = env::var("ASSIGN_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let rng_seed = env::var("ASSIGN_RNG_SEED")
            .ok()
            .and_then(|s| s.parse().ok());

        Self {
            api_psk,
            db_path,
            bind_addr,
            log_level,
            rng_seed,
        }
    }
}
