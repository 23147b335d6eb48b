use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use merchant_feed::api::{build_app, AppState, FEED_ROUTE};
use merchant_feed::catalog::rest::RestCatalog;
use merchant_feed::catalog::{InMemoryCatalog, ProductCatalog};
use merchant_feed::config::{AppConfig, CatalogSource, DeliveryMode};
use merchant_feed::delivery::{CachedDelivery, Delivery, FeedArtifact, FeedDelivery, StaticFileDelivery};
use merchant_feed::generator::FeedGenerator;
use merchant_feed::metrics::Metrics;
use merchant_feed::policy::{AdminAuth, NonceVerifier};
use merchant_feed::settings::{FeedSettings, RawSettings};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "merchant-feed", version)]
#[command(about = "Merchant catalog RSS feed service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Run the HTTP service (default)
    Serve,
    /// Clear the current feed, then generate a new one
    Generate,
    /// Clear the current feed
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let cfg = AppConfig::from_env()?;
    let metrics = Metrics::new().context("failed to initialise metrics")?;
    let delivery = build_delivery(&cfg, &metrics)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(cfg, delivery, metrics).await,
        Command::Generate => generate(delivery.as_dyn()).await,
        Command::Clear => {
            delivery.as_dyn().invalidate().await?;
            println!("Feed cleared.");
            Ok(())
        }
    }
}

fn build_delivery(cfg: &AppConfig, metrics: &Metrics) -> anyhow::Result<Delivery> {
    let raw = RawSettings::load(&cfg.settings_path)?;
    let settings = Arc::new(FeedSettings::from_raw(&raw));
    tracing::info!(
        path = %cfg.settings_path.display(),
        fingerprint = %settings.fingerprint(),
        "loaded feed settings"
    );

    let catalog: Arc<dyn ProductCatalog> = match &cfg.catalog {
        CatalogSource::Snapshot(path) => {
            let catalog = InMemoryCatalog::load(path)
                .with_context(|| format!("failed to load catalog snapshot {}", path.display()))?;
            tracing::info!(path = %path.display(), products = catalog.len(), "loaded catalog snapshot");
            Arc::new(catalog)
        }
        CatalogSource::Rest(rest) => {
            tracing::info!(base_url = %rest.base_url, "using WooCommerce REST catalog");
            Arc::new(RestCatalog::try_new(rest.clone()).context("failed to build REST catalog client")?)
        }
    };

    let generator = FeedGenerator::new(
        catalog,
        settings,
        cfg.store.clone(),
        cfg.generation_timeout,
    )
    .with_metrics(metrics.clone());

    Ok(match cfg.mode {
        DeliveryMode::Cached => {
            let feed_url = format!("{}{}", cfg.store.home_url, FEED_ROUTE);
            Delivery::Cached(Arc::new(
                CachedDelivery::new(generator, feed_url).with_metrics(metrics.clone()),
            ))
        }
        DeliveryMode::Static => Delivery::Static(Arc::new(
            StaticFileDelivery::new(generator, &cfg.upload_dir, &cfg.upload_url)
                .with_metrics(metrics.clone()),
        )),
    })
}

async fn serve(cfg: AppConfig, delivery: Delivery, metrics: Metrics) -> anyhow::Result<()> {
    let admin = AdminAuth::new(cfg.admin_key.clone());
    if !admin.enabled() {
        tracing::warn!("MERCHANT_FEED_ADMIN_KEY not set; admin routes are disabled");
    }

    if delivery.mode() == DeliveryMode::Cached {
        spawn_janitor(delivery.clone(), cfg.janitor_interval());
    }

    let state = AppState {
        delivery,
        metrics,
        admin,
        nonces: NonceVerifier::new(&cfg.nonce_secret),
        upload_dir: Some(cfg.upload_dir.clone()),
    };
    let mode = state.delivery.mode();
    let app = build_app(state);

    let listen_addr = cfg.listen_addr();
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;

    tracing::info!(%listen_addr, mode = mode.as_str(), "starting merchant feed service");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("merchant feed exited cleanly");

    Ok(())
}

async fn generate(delivery: &dyn FeedDelivery) -> anyhow::Result<()> {
    println!("Clearing feed...");
    delivery.invalidate().await?;
    println!("Feed cleared.");

    println!("Regenerating feed...");
    let artifact = delivery
        .regenerate()
        .await
        .context("an error occurred during feed generation")?;
    println!("Feed regenerated successfully.");

    match artifact {
        FeedArtifact::File { path, url, .. } => {
            println!("Written to: {}", path.display());
            println!("The feed is available at: {url}");
        }
        FeedArtifact::Inline { body, .. } => {
            println!("Generated {} bytes.", body.len());
            println!("The feed is available at: {}", delivery.feed_url());
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("MERCHANT_FEED_LOG_FORMAT")
        .is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn spawn_janitor(delivery: Delivery, interval: Duration) {
    if interval.is_zero() {
        tracing::warn!("janitor interval disabled; expired entries will linger");
        return;
    }

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let purged = delivery.as_dyn().purge_expired().await;
            if purged > 0 {
                tracing::debug!(purged, "purged expired feed cache entries");
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!(%error, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term_signal) => term_signal.recv().await,
            Err(error) => {
                tracing::warn!(%error, "failed to install SIGTERM handler");
                None
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
