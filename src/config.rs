use anyhow::Result;
use std::str::FromStr;
use std::time::Duration;

use sigmap_storage::{Engine, StorageOptions};

// ============================================================================
// Configuration Constants
// ============================================================================

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;

// Per-request budget; also bounds graceful-shutdown drain and the time a
// request may wait in the throttle backlog.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

const DEFAULT_THROTTLE_LIMIT: usize = 100;
const DEFAULT_THROTTLE_BACKLOG: usize = 100;

const DEFAULT_BASE_ROUTE: &str = "/";
const DEFAULT_STORAGE_ENDPOINT: &str = "127.0.0.1:6379";

// ============================================================================
// Configuration Structures
// ============================================================================

/// TLS serving configuration. Cert and key files are required when
/// enabled.
#[derive(Clone, Debug)]
pub struct TlsConfig {
    pub enabled: bool,
    pub cert_file: String,
    pub key_file: String,
}

/// CORS configuration; both lists default to a single `*`.
#[derive(Clone, Debug)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allowed_headers: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub tls: TlsConfig,
    pub request_timeout: Duration,
    pub throttle_limit: usize,
    pub throttle_backlog: usize,
    /// Route prefix the payload endpoints hang off of.
    pub base_route: String,
    pub cors: CorsConfig,
    pub storage: StorageOptions,
    pub rust_log: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            tls: TlsConfig { enabled: false, cert_file: String::new(), key_file: String::new() },
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            throttle_limit: DEFAULT_THROTTLE_LIMIT,
            throttle_backlog: DEFAULT_THROTTLE_BACKLOG,
            base_route: DEFAULT_BASE_ROUTE.to_string(),
            cors: CorsConfig {
                allowed_origins: vec!["*".to_string()],
                allowed_headers: vec!["*".to_string()],
            },
            storage: StorageOptions {
                engine: Engine::Memory,
                endpoint: DEFAULT_STORAGE_ENDPOINT.to_string(),
                auth: None,
                tls: false,
            },
            rust_log: "info".to_string(),
        }
    }
}

impl Config {
    /// The address string the listener binds to.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Config::default();

        let tls = TlsConfig {
            enabled: env_parse("TLS_ENABLED", false),
            cert_file: std::env::var("TLS_CERT_FILE").unwrap_or_default(),
            key_file: std::env::var("TLS_KEY_FILE").unwrap_or_default(),
        };
        if tls.enabled && (tls.cert_file.is_empty() || tls.key_file.is_empty()) {
            anyhow::bail!("TLS_CERT_FILE and TLS_KEY_FILE are required when TLS_ENABLED=true");
        }

        let base_route = std::env::var("BASE_ROUTE").unwrap_or(defaults.base_route);
        if !base_route.starts_with('/') {
            anyhow::bail!("BASE_ROUTE must start with '/'");
        }

        let engine_name =
            std::env::var("STORAGE_ENGINE").unwrap_or_else(|_| "memory".to_string());
        let engine = Engine::from_str(&engine_name).map_err(|_| {
            anyhow::anyhow!("invalid STORAGE_ENGINE {:?}, expected memory or redis", engine_name)
        })?;

        Ok(Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: env_parse("PORT", defaults.port),
            tls,
            request_timeout: Duration::from_secs(env_parse(
                "REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )),
            throttle_limit: env_parse("THROTTLE_LIMIT", defaults.throttle_limit),
            throttle_backlog: env_parse("THROTTLE_BACKLOG", defaults.throttle_backlog),
            base_route,
            cors: CorsConfig {
                allowed_origins: env_csv("CORS_ALLOWED_ORIGINS"),
                allowed_headers: env_csv("CORS_ALLOWED_HEADERS"),
            },
            storage: StorageOptions {
                engine,
                endpoint: std::env::var("STORAGE_ENDPOINT")
                    .unwrap_or_else(|_| DEFAULT_STORAGE_ENDPOINT.to_string()),
                auth: std::env::var("STORAGE_AUTH").ok().filter(|a| !a.is_empty()),
                tls: env_parse("STORAGE_TLS", false),
            },
            rust_log: std::env::var("RUST_LOG").unwrap_or(defaults.rust_log),
        })
    }
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Comma-separated list variable; absent or empty means `*`.
fn env_csv(name: &str) -> Vec<String> {
    let values: Vec<String> = std::env::var(name)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if values.is_empty() {
        vec!["*".to_string()]
    } else {
        values
    }
}
