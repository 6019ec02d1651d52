//! Configuration module for the consent backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::models::CONSENT_STORAGE_KEY;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Keep consent records in memory only (no database)
    pub in_memory: bool,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit logs as JSON lines
    pub log_json: bool,
    /// Cookie policy version; bump it to ask every visitor again
    pub policy_version: String,
    /// Storage slot holding the consent record
    pub storage_key: String,
    /// Bare domain used when expiring domain-scoped cookies
    pub cookie_domain: Option<String>,
    /// Delay before the consent banner is shown
    pub banner_delay: Duration,
    /// Upper bound on a single storage read or write
    pub storage_timeout: Duration,
    /// Also purge personalization cookies when that category is revoked
    pub purge_preferences_on_revoke: bool,
    /// Idle time after which a visitor's in-memory session is dropped
    pub session_idle_ttl: Duration,
    /// Meta pixel id; the marketing pixel is absent when unset
    pub meta_pixel_id: Option<String>,
    /// Upper bound on in-memory visitor sessions
    pub max_sessions: usize,
    /// Mark the visitor id cookie `Secure` (site served over TLS)
    pub secure_cookies: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let db_path = env::var("CONSENT_DB_PATH")
            .unwrap_or_else(|_| "./data/consent.sqlite".to_string())
            .into();

        let in_memory = env_flag("CONSENT_IN_MEMORY", false);

        let bind_addr = env::var("CONSENT_BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .expect("Invalid CONSENT_BIND_ADDR format");

        let log_level = env::var("CONSENT_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let log_json = env_flag("CONSENT_LOG_JSON", false);

        let policy_version =
            env::var("CONSENT_POLICY_VERSION").unwrap_or_else(|_| "1.0.0".to_string());

        let storage_key =
            env::var("CONSENT_STORAGE_KEY").unwrap_or_else(|_| CONSENT_STORAGE_KEY.to_string());

        let cookie_domain = env::var("CONSENT_COOKIE_DOMAIN")
            .ok()
            .filter(|d| !d.trim().is_empty());

        let banner_delay = Duration::from_millis(env_u64("CONSENT_BANNER_DELAY_MS", 500));
        let storage_timeout = Duration::from_millis(env_u64("CONSENT_STORAGE_TIMEOUT_MS", 2000));
        let purge_preferences_on_revoke = env_flag("CONSENT_PURGE_PREFERENCES", false);
        let session_idle_ttl = Duration::from_secs(env_u64("CONSENT_SESSION_TTL_SECS", 86_400));

        let meta_pixel_id = env::var("CONSENT_META_PIXEL_ID")
            .ok()
            .filter(|id| !id.trim().is_empty());

        let max_sessions = env_u64("CONSENT_MAX_SESSIONS", 10_000).max(1) as usize;
        let secure_cookies = env_flag("CONSENT_SECURE_COOKIES", false);

        Self {
            db_path,
            in_memory,
            bind_addr,
            log_level,
            log_json,
            policy_version,
            storage_key,
            cookie_domain,
            banner_delay,
            storage_timeout,
            purge_preferences_on_revoke,
            session_idle_ttl,
            meta_pixel_id,
            max_sessions,
            secure_cookies,
        }
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            db_path: PathBuf::from("./data/test.sqlite"),
            in_memory: true,
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "warn".to_string(),
            log_json: false,
            policy_version: "1.0.0".to_string(),
            storage_key: CONSENT_STORAGE_KEY.to_string(),
            cookie_domain: None,
            banner_delay: Duration::ZERO,
            storage_timeout: Duration::from_secs(2),
            purge_preferences_on_revoke: false,
            session_idle_ttl: Duration::from_secs(3600),
            meta_pixel_id: None,
            max_sessions: 1000,
            secure_cookies: false,
        }
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|_| panic!("Invalid {} value: {}", name, raw)),
        Err(_) => default,
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(raw) => matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}
