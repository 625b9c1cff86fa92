//! Roomcast signaling server entry point
//!
//! # Usage
//!
//! ```bash
//! # Defaults: https://0.0.0.0:3000, signaling at /server, assets from ./public
//! cargo run -p roomcast-server -- \
//!   --tls-cert ./certs/fullchain.pem \
//!   --tls-key ./certs/privkey.pem
//!
//! # Load a TOML file, then override the announced address for ICE
//! cargo run -p roomcast-server -- --config roomcast.toml --announced-ip 203.0.113.7
//! ```

use anyhow::Context;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use clap::Parser;
use roomcast_core::config::ListenIp;
use roomcast_core::{CapabilityNegotiator, LoopbackEngine, MediaEngine, Session};
use roomcast_server::{build_router, ServerConfig};
use roomcast_signaling::SharedState;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Grace period between media engine death and process exit
const ENGINE_DEATH_GRACE: Duration = Duration::from_secs(2);

/// Roomcast Server
///
/// WebRTC session signaling over secure WebSocket, plus static client assets.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "ROOMCAST_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind the HTTPS listener to
    #[arg(long, env = "ROOMCAST_LISTEN_IP")]
    listen_ip: Option<String>,

    /// HTTPS port
    #[arg(long, env = "ROOMCAST_LISTEN_PORT")]
    listen_port: Option<u16>,

    /// Directory of static client assets
    #[arg(long, env = "ROOMCAST_STATIC_DIR")]
    static_dir: Option<PathBuf>,

    /// PEM certificate chain
    #[arg(long, env = "ROOMCAST_TLS_CERT")]
    tls_cert: Option<PathBuf>,

    /// PEM private key
    #[arg(long, env = "ROOMCAST_TLS_KEY")]
    tls_key: Option<PathBuf>,

    /// Public IP advertised in ICE candidates
    #[arg(long, env = "ROOMCAST_ANNOUNCED_IP")]
    announced_ip: Option<String>,
}

impl Args {
    /// Layer flags and environment variables over the loaded configuration
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(ip) = &self.listen_ip {
            config.server.listen_ip = ip.clone();
        }
        if let Some(port) = self.listen_port {
            config.server.listen_port = port;
        }
        if let Some(dir) = &self.static_dir {
            config.server.static_dir = dir.clone();
        }
        if let Some(cert) = &self.tls_cert {
            config.tls.cert = cert.clone();
        }
        if let Some(key) = &self.tls_key {
            config.tls.key = key.clone();
        }
        if let Some(announced) = &self.announced_ip {
            let listen_ips = &mut config.media.webrtc_transport.listen_ips;
            if listen_ips.is_empty() {
                listen_ips.push(ListenIp {
                    ip: "0.0.0.0".to_string(),
                    announced_ip: None,
                });
            }
            for listen_ip in listen_ips.iter_mut() {
                listen_ip.announced_ip = Some(announced.clone());
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing();

    info!(version = env!("CARGO_PKG_VERSION"), "Roomcast server starting");

    let mut config =
        ServerConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    args.apply(&mut config);
    config.validate().context("invalid configuration")?;

    let missing = config.tls.missing_files();
    if !missing.is_empty() {
        for path in &missing {
            error!(path = %path.display(), "TLS file not found");
        }
        error!("A TLS certificate and key are required to serve signaling, exiting");
        std::process::exit(1);
    }

    let negotiator = CapabilityNegotiator::new(&config.media.router.media_codecs)
        .context("invalid router media codecs")?;
    let engine: Arc<dyn MediaEngine> = Arc::new(LoopbackEngine::new(&config.media, &negotiator));
    let session = Arc::new(Session::new(&config.media, negotiator, Arc::clone(&engine)));

    info!(
        engine = engine.name(),
        rtc_min_port = config.media.worker.rtc_min_port,
        rtc_max_port = config.media.worker.rtc_max_port,
        codecs = session.capabilities().codecs.len(),
        "Media engine ready"
    );

    let state = Arc::new(SharedState::new(
        Arc::clone(&session),
        config.server.outbox_capacity,
    ));
    let app = build_router(state, &config.server.ws_path, &config.server.static_dir);

    let tls = RustlsConfig::from_pem_file(&config.tls.cert, &config.tls.key)
        .await
        .context("failed to load TLS certificate and key")?;
    let addr = config.listen_addr()?;
    let handle = Handle::new();

    let engine_watch = {
        let handle = handle.clone();
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            let reason = engine.closed().await;
            error!(%reason, "Media engine died, exiting in {:?}", ENGINE_DEATH_GRACE);
            handle.graceful_shutdown(Some(ENGINE_DEATH_GRACE));
            tokio::time::sleep(ENGINE_DEATH_GRACE).await;
            std::process::exit(1);
        })
    };

    let shutdown = {
        let handle = handle.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("Shutdown signal received, initiating graceful shutdown...");
            handle.graceful_shutdown(Some(Duration::from_secs(3)));
        })
    };

    info!(
        %addr,
        ws_path = %config.server.ws_path,
        static_dir = %config.server.static_dir.display(),
        "HTTPS server listening"
    );

    axum_server::bind_rustls(addr, tls)
        .handle(handle)
        .serve(app.into_make_service())
        .await
        .context("HTTPS server failed")?;

    engine_watch.abort();
    shutdown.abort();

    info!(stats = ?session.stats(), "Roomcast server shutdown complete");
    Ok(())
}

fn init_tracing() {
    // RUST_LOG wins; otherwise info for everything
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
