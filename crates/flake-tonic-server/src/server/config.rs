use anyhow::bail;
use clap::{Parser, ValueEnum};
use core::time::Duration;
#[cfg(feature = "etcd")]
use flake_tonic_core::flake::EtcdConfig;
use flake_tonic_core::{DEFAULT_SERVER_ADDR, flake::DEFAULT_PREFIX};

/// Coordination store the allocator runs against.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    /// In-process map. State is lost on restart and not shared between
    /// servers, so only suitable for a single instance or local testing.
    Memory,
    /// An etcd v3 cluster. Requires the `etcd` feature.
    Etcd,
}

/// Runtime configuration for the `flake-tonic-server` binary.
///
/// All values are parsed from CLI arguments or environment variables. A `.env`
/// file in the working directory is loaded first.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "flake-tonic-server",
    version,
    about = "A gRPC service handing out disjoint flake sequence ranges"
)]
pub struct CliArgs {
    /// Address to listen on (TCP or Unix socket path; use --uds for Unix
    /// socket).
    ///
    /// Example: "0.0.0.0:30001" or "/tmp/flake.sock"
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from(DEFAULT_SERVER_ADDR))]
    pub server_addr: String,

    /// Listen on a Unix socket instead of TCP. If set, `SERVER_ADDR` must be a
    /// file path.
    #[arg(short, long, default_value_t = false)]
    pub uds: bool,

    /// Coordination store backend.
    ///
    /// Environment variable: `STORE_BACKEND`
    #[arg(long, env = "STORE_BACKEND", value_enum, default_value_t = StoreBackend::Memory)]
    pub store_backend: StoreBackend,

    /// Comma-separated store endpoints.
    ///
    /// Environment variable: `STORE_ENDPOINTS`
    #[arg(
        long,
        env = "STORE_ENDPOINTS",
        value_delimiter = ',',
        default_value = "http://127.0.0.1:2379"
    )]
    pub store_endpoints: Vec<String>,

    /// Store user name. Must be given together with `STORE_PASSWORD`.
    ///
    /// Environment variable: `STORE_USER`
    #[arg(long, env = "STORE_USER")]
    pub store_user: Option<String>,

    /// Store password.
    ///
    /// Environment variable: `STORE_PASSWORD`
    #[arg(long, env = "STORE_PASSWORD", hide_env_values = true)]
    pub store_password: Option<String>,

    /// Prefix for every key the allocator writes.
    ///
    /// Environment variable: `KEY_PREFIX`
    #[arg(long, env = "KEY_PREFIX", default_value_t = String::from(DEFAULT_PREFIX))]
    pub key_prefix: String,

    /// Maximum number of ids a single Fetch may ask for.
    ///
    /// Environment variable: `MAX_ALLOWED_IDS`
    #[arg(long, env = "MAX_ALLOWED_IDS", default_value_t = 10_000_000)]
    pub max_allowed_ids: u32,

    /// Seconds to wait for in-flight fetches during shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 5)]
    pub shutdown_timeout: u64,
}

#[derive(Debug, Clone)]
pub enum StoreConfig {
    Memory,
    #[cfg(feature = "etcd")]
    Etcd(EtcdConfig),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub uds: bool,
    pub store: StoreConfig,
    pub key_prefix: String,
    pub max_allowed_ids: u32,
    pub shutdown_timeout: Duration,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.max_allowed_ids == 0 {
            bail!("MAX_ALLOWED_IDS must be greater than 0");
        }

        // The wire carries need_count as int32.
        if args.max_allowed_ids > i32::MAX as u32 {
            bail!(
                "MAX_ALLOWED_IDS ({}) exceeds the protocol maximum ({})",
                args.max_allowed_ids,
                i32::MAX
            );
        }

        if args.store_user.is_some() != args.store_password.is_some() {
            bail!("STORE_USER and STORE_PASSWORD must be set together");
        }

        let store = match args.store_backend {
            StoreBackend::Memory => StoreConfig::Memory,
            #[cfg(feature = "etcd")]
            StoreBackend::Etcd => {
                let endpoints: Vec<String> = args
                    .store_endpoints
                    .into_iter()
                    .map(|e| e.trim().to_string())
                    .filter(|e| !e.is_empty())
                    .collect();
                if endpoints.is_empty() {
                    bail!("STORE_ENDPOINTS must name at least one endpoint");
                }
                StoreConfig::Etcd(EtcdConfig {
                    endpoints,
                    user: args.store_user,
                    password: args.store_password,
                })
            }
            #[cfg(not(feature = "etcd"))]
            StoreBackend::Etcd => {
                bail!("STORE_BACKEND=etcd requires building with the `etcd` feature")
            }
        };

        Ok(Self {
            server_addr: args.server_addr,
            uds: args.uds,
            store,
            key_prefix: args.key_prefix,
            max_allowed_ids: args.max_allowed_ids,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
        })
    }
}
