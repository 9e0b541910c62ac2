//! loadstar — multi-tenant HTTP/HTTPS reverse-proxy load balancer.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use loadstar::clock::SystemClock;
use loadstar::config::loader::load_boot_config;
use loadstar::config::store::{ConfigStore, FileStore, MemoryStore};
use loadstar::config::watcher::BootFileWatcher;
use loadstar::lifecycle::{signals, Shutdown};
use loadstar::observability::{metrics, NoopSink, NotificationSink, WebhookSink};
use loadstar::proxy::build_http_client;
use loadstar::proxy::server::ProxyServer;
use loadstar::routing::Router;

#[derive(Parser)]
#[command(name = "loadstar")]
#[command(about = "Multi-tenant HTTP reverse-proxy load balancer", long_about = None)]
struct Cli {
    /// Boot configuration file.
    #[arg(short, long, default_value = "loadstar.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let boot = match load_boot_config(Some(&cli.config)) {
        Ok(boot) => boot,
        Err(e) => {
            eprintln!("bad configuration: {e}");
            std::process::exit(2);
        }
    };

    let default_filter = match cli.verbose {
        0 => format!("loadstar={},tower_http=warn", boot.observability.log_level),
        1 => "loadstar=debug,tower_http=debug".to_string(),
        _ => "loadstar=trace,tower_http=debug".to_string(),
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "loadstar starting");

    if boot.observability.metrics_enabled {
        match boot.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => {
                tracing::error!(
                    metrics_address = %boot.observability.metrics_address,
                    "failed to parse metrics address"
                );
            }
        }
    }

    let store: Arc<dyn ConfigStore> = match &boot.store.path {
        Some(path) => match FileStore::open(path) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                eprintln!("bad configuration: cannot open store at {path:?}: {e}");
                std::process::exit(2);
            }
        },
        None => Arc::new(MemoryStore::new()),
    };
    let notifier: Arc<dyn NotificationSink> = match &boot.notification_webhook_url {
        Some(url) => Arc::new(WebhookSink::new(url.clone())),
        None => Arc::new(NoopSink),
    };

    let router = Router::new(build_http_client(), Arc::new(SystemClock), store, notifier);
    router.rehydrate().await;
    router.seed(boot.services.clone(), false).await;
    tracing::info!(services = router.list().len(), "routing table ready");

    let shutdown = Shutdown::new();

    tokio::spawn(Arc::clone(&router).run_scheduler(shutdown.subscribe()));

    let _watcher = if cli.config.exists() {
        let (watcher, mut updates) = BootFileWatcher::new(&cli.config);
        let watcher = watcher.run()?;
        let reload_router = Arc::clone(&router);
        let mut reload_shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(services) = updates.recv() => {
                        reload_router.seed(services, true).await;
                        tracing::info!("boot file services re-applied");
                    }
                    _ = reload_shutdown.recv() => break,
                    else => break,
                }
            }
        });
        Some(watcher)
    } else {
        None
    };

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        signals::watch_signals(&signal_shutdown).await;
    });

    let listener = TcpListener::bind(&boot.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "listening for connections");

    let server = ProxyServer::new(router, &boot);
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("shutdown complete");
    Ok(())
}
