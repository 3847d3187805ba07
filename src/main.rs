mod cache;
mod client;
mod config;
mod dns;
mod hijack;
mod hosts;
mod http;
mod log;
mod message;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dns::DnsHandler;

/// A privacy-focused recursive DNS front-end and caching proxy.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to the configuration file.
    #[arg(short = 'f', long = "config", default_value_os_t = config::Config::default_path())]
    config: PathBuf,
}

fn init_logs() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{fmt, registry, EnvFilter};

    let _ = registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            format!("{}=info", env!("CARGO_PKG_NAME")).into()
        }))
        .with(fmt::layer().with_ansi(cfg!(debug_assertions)))
        .try_init();
}

async fn run_signals(hosts: Arc<hosts::HostsRefresher>) {
    let mut hangup = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
        .expect("couldn't install SIGHUP handler");
    loop {
        hangup.recv().await;
        tracing::info!("received SIGHUP, reloading hosts");
        hosts.reload().await;
    }
}

async fn shutdown_signal() {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("couldn't install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = terminate.recv() => {},
    }
}

#[tokio::main]
async fn main() {
    init_logs();

    let args = Args::parse();
    let config = config::Config::load(&args.config)
        .unwrap_or_else(|err| panic!("couldn't load config from {:?}: {err}", args.config));

    let pool = if config.dns.log_database.is_empty() {
        None
    } else {
        let store_config = donos_store::Config::from_path(&config.dns.log_database);
        let pool = store_config
            .build()
            .await
            .expect("couldn't open the sqlite database");
        donos_store::migrate(&pool).await.expect("couldn't run database migrations");
        Some(pool)
    };

    let resolver = Arc::new(
        client::Resolver::build(&config.dns.resolvers, &config.resolver)
            .expect("couldn't build the upstream resolver"),
    );

    let cache_backend: Option<Arc<dyn cache::CacheBackend>> = pool
        .clone()
        .map(|pool| Arc::new(cache::SqliteCacheBackend::new(pool)) as Arc<dyn cache::CacheBackend>);
    let cache_upstream = config.dns.cache_prefetch.then(|| resolver.clone());
    let cache = Arc::new(cache::Cache::new(config.dns.cache_size, cache_upstream, cache_backend).await);

    let log_mode: log::Mode = config.dns.log_mode.parse().unwrap_or_default();
    let log_pool = pool.unwrap_or(
        donos_store::Config::test_env()
            .build()
            .await
            .expect("couldn't open the fallback in-memory database"),
    );
    if log_mode != log::Mode::Disabled {
        donos_store::migrate(&log_pool).await.expect("couldn't run database migrations");
    }
    let log = Arc::new(log::LogWriter::new(
        log_mode,
        Duration::from_secs(config.dns.log_ttl),
        log_pool,
    ));

    let hijack_engine = Arc::new(hijack::HijackEngine::new(config.dns.hijack_mode));
    let hosts_refresher = Arc::new(hosts::HostsRefresher::new(config.hosts, hijack_engine.clone()));
    hosts_refresher.reload().await;

    if let Some(http_address) = config.dns.listen_http {
        let cache = cache.clone();
        let hijack_engine = hijack_engine.clone();
        let log = log.clone();
        tokio::spawn(async move {
            if let Err(err) = http::serve(http_address, cache, hijack_engine, log).await {
                tracing::error!("http api stopped: {err:?}");
            }
        });
    }

    let handler = Arc::new(DnsHandler::new(
        hijack_engine,
        cache.clone(),
        resolver,
        log.clone(),
    ));

    // RFC 1035 servers answer over both UDP and TCP on the same address;
    // `dns.protocol` only governs upstream resolution.
    let udp_server = donos_server::UdpServer::new(config.dns.listen, handler.clone());
    let tcp_server = donos_server::TcpServer::new(config.dns.listen, handler);

    let refresh_interval = Duration::from_secs(config.dns.hosts_refresh_interval);
    let periodic_refresher = hosts_refresher.clone();
    tokio::spawn(async move {
        periodic_refresher.run_periodic(refresh_interval).await;
    });
    tokio::spawn(run_signals(hosts_refresher));

    tokio::select! {
        result = udp_server.run() => {
            if let Err(err) = result {
                tracing::error!("udp server stopped: {err:?}");
            }
        },
        result = tcp_server.run() => {
            if let Err(err) = result {
                tracing::error!("tcp server stopped: {err:?}");
            }
        },
        _ = shutdown_signal() => {
            tracing::info!("shutting down, draining queues");
        },
    }

    log.close().await;
    cache.close().await;
}
