use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use forum_post_relay::config::Config;
use forum_post_relay::pipeline::{poll_loop, Pipeline, SeedOutcome};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(
        thread_url = %config.thread_url,
        checkpoint = %config.checkpoint_path.display(),
        "Configuration loaded"
    );

    let pipeline = Pipeline::from_config(&config).context("Failed to build pipeline")?;

    match std::env::args().nth(1).as_deref() {
        None | Some("run") => {}
        Some("seed") => {
            match pipeline.seed().await.context("Seeding failed")? {
                SeedOutcome::Seeded(id) => info!(checkpoint = %id, "Seeded checkpoint"),
                SeedOutcome::AlreadySeeded(id) => {
                    info!(checkpoint = %id, "Checkpoint already present");
                }
                SeedOutcome::NoPosts => warn!("Page has no posts; checkpoint left empty"),
            }
            return Ok(());
        }
        Some(other) => anyhow::bail!("unknown command {other:?}, expected `run` or `seed`"),
    }

    let Some(interval) = config.poll_interval else {
        let report = pipeline.run().await.context("Run failed")?;
        info!(
            extracted = report.extracted,
            dispatched = report.dispatched,
            notify_failures = report.notify_failures,
            "Run complete"
        );
        return Ok(());
    };

    info!(interval_secs = interval.as_secs(), "Polling thread page");
    tokio::select! {
        () = poll_loop(&pipeline, interval) => {},
        () = shutdown_signal() => info!("Shutting down"),
    }

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,forum_post_relay=debug"));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {e}");
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
                warn!("Failed to install SIGTERM handler: {e}");
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
