use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use board_archiver::assets::regenerate_thumbnails;
use board_archiver::config::Config;
use board_archiver::crawler::Crawler;
use board_archiver::db::Database;
use board_archiver::scheduler::{Job, Scheduler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Serve,
    CrawlOnce,
    RegenerateThumbnails { force: bool },
}

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

    let command = parse_command(std::env::args().skip(1))?;

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(board = %config.board_url, ?command, "Starting board-archiver");

    if let Command::RegenerateThumbnails { force } = command {
        regenerate_thumbnails(&config.archive_dir, config.thumbnail_max_px, force).await?;
        return Ok(());
    }

    if let Some(parent) = config.database_path.parent() {
        tokio::fs::create_dir_all(parent).await.with_context(|| {
            format!("Failed to create database directory: {}", parent.display())
        })?;
    }

    let db = Database::new(&config.database_path)
        .await
        .context("Failed to initialize database")?;

    let crawler = Crawler::new(config.clone(), db).context("Failed to initialize crawler")?;

    if command == Command::CrawlOnce {
        crawler.run().await?;
        return Ok(());
    }

    let jobs: Vec<Job> = config
        .crawl_schedules
        .iter()
        .enumerate()
        .map(|(index, spec)| {
            let crawler = crawler.clone();
            Job::new(spec.as_str(), format!("crawl #{}", index + 1), move || {
                let crawler = crawler.clone();
                async move { crawler.run_job().await }
            })
        })
        .collect();

    let scheduler =
        Scheduler::with_jobs(config.timezone, jobs).context("Failed to schedule jobs")?;
    if scheduler.job_count() == 0 {
        warn!("No crawl schedules configured; only a startup crawl will run");
    }

    let startup_crawl = config.crawl_on_startup.then(|| {
        let crawler = crawler.clone();
        tokio::spawn(async move { crawler.run_job().await })
    });

    let handle = scheduler.start();
    info!(jobs = handle.job_count(), timezone = %config.timezone, "Scheduler started");

    shutdown_signal().await;

    info!("Shutting down...");
    handle.shutdown();
    if let Some(task) = startup_crawl {
        task.abort();
    }
    info!("Shutdown complete");

    Ok(())
}

fn parse_command(mut args: impl Iterator<Item = String>) -> Result<Command> {
    let command = match args.next().as_deref() {
        None | Some("serve") => Command::Serve,
        Some("crawl-once") => Command::CrawlOnce,
        Some("regenerate-thumbnails") => Command::RegenerateThumbnails {
            force: args.next().as_deref() == Some("--force"),
        },
        Some(other) => anyhow::bail!(
            "unknown command '{other}' (expected serve, crawl-once or regenerate-thumbnails [--force])"
        ),
    };
    Ok(command)
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,board_archiver=debug"));

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
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(ToString::to_string).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command(args(&[])).unwrap(), Command::Serve);
        assert_eq!(parse_command(args(&["crawl-once"])).unwrap(), Command::CrawlOnce);
        assert_eq!(
            parse_command(args(&["regenerate-thumbnails", "--force"])).unwrap(),
            Command::RegenerateThumbnails { force: true }
        );
        assert_eq!(
            parse_command(args(&["regenerate-thumbnails"])).unwrap(),
            Command::RegenerateThumbnails { force: false }
        );
        assert!(parse_command(args(&["mirror-everything"])).is_err());
    }
}
