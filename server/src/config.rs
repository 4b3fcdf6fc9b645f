use std::time::Duration;

use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::ws::actor::SessionConfig;
use crate::ws::groups::{GroupConfigError, GroupNames};

/// Command-line flags. Only flags that were actually passed (or set through
/// their env var) are serialized, so unset flags never mask the TOML layer.
#[derive(Parser, Serialize, Clone, Debug, Default)]
#[command(name = "coursecast-server", version, about = "Real-time course notification server")]
pub struct Cli {
    /// Port to listen on [default: 8001]
    #[arg(long, env = "COURSECAST_PORT")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long, env = "COURSECAST_BIND_ADDRESS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file [default: ./coursecast.toml]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "COURSECAST_JSON_LOGS")]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub generate_config: bool,

    /// Data directory for persistent state (identity DB, generated keys) [default: ./data]
    #[arg(long, env = "COURSECAST_DATA_DIR")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// JWT signing secret shared with the REST API; generated under data_dir when unset
    #[arg(long, env = "COURSECAST_JWT_SECRET", hide_env_values = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,

    /// Bearer secret for POST /api/v1/events; the endpoint is disabled when unset
    #[arg(long, env = "COURSECAST_PUBLISH_TOKEN", hide_env_values = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_token: Option<String>,

    /// Group every authenticated connection joins [default: notification]
    #[arg(long, env = "COURSECAST_BROADCAST_GROUP")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broadcast_group: Option<String>,

    /// Personal group template; `{}` is replaced with the user id [default: user_{}]
    #[arg(long, env = "COURSECAST_PERSONAL_GROUP_TEMPLATE")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub personal_group_template: Option<String>,

    /// Frames buffered per connection before deliveries start failing [default: 256]
    #[arg(long, env = "COURSECAST_OUTBOUND_BUFFER")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbound_buffer: Option<usize>,

    /// Consecutive failed deliveries before a connection is evicted [default: 3]
    #[arg(long, env = "COURSECAST_MAX_DELIVERY_FAILURES")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_delivery_failures: Option<u32>,

    /// Envelopes buffered between publishers and the dispatcher [default: 4096]
    #[arg(long, env = "COURSECAST_PUBLISH_QUEUE_CAPACITY")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_queue_capacity: Option<usize>,

    /// Seconds between server pings [default: 30]
    #[arg(long, env = "COURSECAST_PING_INTERVAL_SECS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_interval_secs: Option<u64>,

    /// Seconds to wait for a pong before closing [default: 10]
    #[arg(long, env = "COURSECAST_PONG_TIMEOUT_SECS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pong_timeout_secs: Option<u64>,
}

/// Resolved server configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub config: String,
    pub json_logs: bool,
    pub generate_config: bool,
    pub data_dir: String,
    pub jwt_secret: Option<String>,
    pub publish_token: Option<String>,
    pub broadcast_group: String,
    pub personal_group_template: String,
    pub outbound_buffer: usize,
    pub max_delivery_failures: u32,
    pub publish_queue_capacity: usize,
    pub ping_interval_secs: u64,
    pub pong_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8001,
            bind_address: "0.0.0.0".to_string(),
            config: "./coursecast.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            jwt_secret: None,
            publish_token: None,
            broadcast_group: "notification".to_string(),
            personal_group_template: "user_{}".to_string(),
            outbound_buffer: 256,
            max_delivery_failures: 3,
            publish_queue_capacity: 4096,
            ping_interval_secs: 30,
            pong_timeout_secs: 10,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (COURSECAST_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(Cli::parse())
    }

    pub fn load_from(cli: Cli) -> Result<Self, figment::Error> {
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| Config::default().config);

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("COURSECAST_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }

    pub fn group_names(&self) -> Result<GroupNames, GroupConfigError> {
        GroupNames::new(&self.broadcast_group, &self.personal_group_template)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            outbound_buffer: self.outbound_buffer.max(1),
            ping_interval: Duration::from_secs(self.ping_interval_secs.max(1)),
            pong_timeout: Duration::from_secs(self.pong_timeout_secs.max(1)),
        }
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Coursecast Notification Server Configuration
# Place this file at ./coursecast.toml or specify with --config <path>
# All settings can be overridden via environment variables (COURSECAST_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 8001)
# port = 8001

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the identity database and generated JWT key
# data_dir = "./data"

# JWT signing secret shared with the REST API.
# When unset a random key is generated at <data_dir>/jwt_secret.
# jwt_secret = ""

# Bearer secret required by POST /api/v1/events. Ingress is disabled when unset.
# publish_token = ""

# ---- Groups ----
# broadcast_group = "notification"
# personal_group_template = "user_{}"   # exactly one {} placeholder

# ---- Delivery ----
# outbound_buffer = 256           # frames queued per connection
# max_delivery_failures = 3       # consecutive full-buffer drops before eviction
# publish_queue_capacity = 4096   # envelopes waiting for the dispatcher (newest dropped when full)

# ---- Keepalive ----
# ping_interval_secs = 30
# pong_timeout_secs = 10
"#
    .to_string()
}
