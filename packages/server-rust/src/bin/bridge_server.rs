//! `bridge-server`: serves an in-memory resource table over the HTTP bridge.
//!
//! Every option can also be given through its `RESBRIDGE_*` environment
//! variable. Log filtering follows `RUST_LOG`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use resbridge_server::network::TlsConfig;
use resbridge_server::{
    ApiEncoding, AuthGate, BridgeConfig, HeaderAuthConfig, InMemoryResolver, NetworkConfig,
    NetworkModule,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// HTTP bridge serving resources one ephemeral session per request.
#[derive(Parser, Debug)]
#[command(name = "bridge-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind
    #[arg(long, env = "RESBRIDGE_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on (0 picks a free port)
    #[arg(short, long, env = "RESBRIDGE_PORT", default_value_t = 8080)]
    port: u16,

    /// Path prefix of the resource API, with leading and trailing slash
    #[arg(long, env = "RESBRIDGE_API_PATH", default_value = "/api/")]
    api_path: String,

    /// How GET responses render resources
    #[arg(long, env = "RESBRIDGE_ENCODING", value_enum, default_value_t = ApiEncoding::Json)]
    encoding: ApiEncoding,

    /// Maximum number of concurrently open sessions
    #[arg(long, env = "RESBRIDGE_MAX_SESSIONS", default_value_t = 1000)]
    max_sessions: u32,

    /// Maximum nesting depth when flattening a resource graph
    #[arg(long, env = "RESBRIDGE_MAX_FLATTEN_DEPTH", default_value_t = 256)]
    max_flatten_depth: usize,

    /// Auth action run before every request, as `<rid>.<action>`
    #[arg(long, env = "RESBRIDGE_HEADER_AUTH")]
    header_auth: Option<String>,

    /// Whether a failed header auth blocks the request
    #[arg(long, env = "RESBRIDGE_AUTH_GATE", value_enum, default_value_t = AuthGate::PassThrough)]
    auth_gate: AuthGate,

    /// Bearer tokens accepted by the header auth action (comma separated)
    #[arg(long, env = "RESBRIDGE_BEARER_TOKENS", value_delimiter = ',')]
    bearer_tokens: Vec<String>,

    /// PEM certificate chain; enables TLS together with --tls-key
    #[arg(long, env = "RESBRIDGE_TLS_CERT", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// PEM private key
    #[arg(long, env = "RESBRIDGE_TLS_KEY", requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// Allowed CORS origins (comma separated, `*` for any)
    #[arg(long, env = "RESBRIDGE_CORS_ORIGINS", value_delimiter = ',', default_value = "*")]
    cors_origins: Vec<String>,

    /// Seconds to wait for in-flight sessions on shutdown
    #[arg(long, env = "RESBRIDGE_SHUTDOWN_TIMEOUT", default_value_t = 5)]
    shutdown_timeout: u64,

    /// JSON file mapping RIDs to resources, loaded into the in-memory resolver
    #[arg(long, env = "RESBRIDGE_SEED")]
    seed: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, env = "RESBRIDGE_LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn network_config(&self) -> NetworkConfig {
        let tls = match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => Some(TlsConfig {
                cert_path: cert.clone(),
                key_path: key.clone(),
            }),
            _ => None,
        };
        NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            tls,
            cors_origins: self.cors_origins.clone(),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout),
        }
    }

    fn bridge_config(&self) -> anyhow::Result<BridgeConfig> {
        if !self.api_path.starts_with('/') || !self.api_path.ends_with('/') {
            anyhow::bail!("api path {:?} must start and end with '/'", self.api_path);
        }
        let header_auth = match &self.header_auth {
            Some(method) => Some(
                HeaderAuthConfig::from_method(method, self.auth_gate)
                    .with_context(|| format!("header auth {method:?} is not <rid>.<action>"))?,
            ),
            None => None,
        };
        Ok(BridgeConfig {
            api_path: self.api_path.clone(),
            encoding: self.encoding,
            header_auth,
            max_sessions: self.max_sessions,
            max_flatten_depth: self.max_flatten_depth,
            ..BridgeConfig::default()
        })
    }

    fn resolver(&self) -> anyhow::Result<InMemoryResolver> {
        let resolver = match &self.seed {
            Some(path) => {
                let seed = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read seed file {}", path.display()))?;
                InMemoryResolver::from_json(&seed)
                    .with_context(|| format!("failed to load seed file {}", path.display()))?
            }
            None => InMemoryResolver::new(),
        };
        if self.bearer_tokens.is_empty() {
            Ok(resolver)
        } else {
            Ok(resolver.with_bearer_tokens(self.bearer_tokens.iter().cloned()))
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,resbridge_server=debug".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let bridge = args.bridge_config()?;
    let resolver = args.resolver()?;
    info!(
        resources = resolver.len(),
        api_path = %bridge.api_path,
        encoding = ?bridge.encoding,
        max_sessions = bridge.max_sessions,
        "starting bridge server"
    );

    let mut module = NetworkModule::new(args.network_config(), bridge, Arc::new(resolver));
    let port = module.start().await?;
    info!("bridge-server listening on port {port}");

    module.serve(shutdown_signal()).await
}
