//! Configuration module - environment variable parsing and simulation tuning

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

/// Relay configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit JSON log lines instead of the human format
    pub log_json: bool,
    /// Max signaling frames per second accepted from one socket
    pub signal_rate_limit: u32,
    /// Allowed client origins for CORS (empty = any)
    pub client_origins: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // PORT wins over SERVER_ADDR so PaaS deployments work unchanged
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string())
        };

        let signal_rate_limit = match env::var("SIGNAL_RATE_LIMIT") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| ConfigError::Invalid("SIGNAL_RATE_LIMIT"))?,
            Err(_) => DEFAULT_SIGNAL_RATE_LIMIT,
        };

        let client_origins = env::var("CLIENT_ORIGIN")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_json: env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
            signal_rate_limit,
            client_origins,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            log_level: "info".to_string(),
            log_json: false,
            signal_rate_limit: DEFAULT_SIGNAL_RATE_LIMIT,
            client_origins: Vec::new(),
        }
    }
}

/// Signaling frames per second per socket; candidate bursts need headroom
pub const DEFAULT_SIGNAL_RATE_LIMIT: u32 = 50;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

/// Host simulation tuning
#[derive(Clone, Debug)]
pub struct SimConfig {
    /// Grid width in cells
    pub width: i32,
    /// Grid height in cells
    pub height: i32,
    /// Fixed tick interval
    pub tick: Duration,
    /// Shared cooldown after any skill activation
    pub skill_cooldown_ticks: u32,
    /// Ghost effect length
    pub ghost_ticks: u32,
    /// Transient "just activated" timer shown by renderers
    pub flash_ticks: u32,
    /// Cells appended by the grow skill
    pub grow_cells: usize,
    /// Bound on rejection sampling for spawns and teleports
    pub max_placement_attempts: u32,
    /// PRNG seed, fresh per process unless overridden
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            width: 30,
            height: 20,
            tick: Duration::from_millis(100),
            skill_cooldown_ticks: 50,
            ghost_ticks: 30,
            flash_ticks: 5,
            grow_cells: 2,
            max_placement_attempts: 200,
            seed: rand::random(),
        }
    }
}

impl SimConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_grid(mut self, width: i32, height: i32) -> Self {
        self.width = width.max(1);
        self.height = height.max(1);
        self
    }
}
