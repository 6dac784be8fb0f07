// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Beacon server binary.

use std::path::PathBuf;
use std::time::Duration;

use beacon_server::{create_app_state, create_router, version};
use beacon_server_config::LogFormat;
use beacon_server_db::InstallationCacheRepository;
use clap::{Parser, Subcommand};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);
const OUTCOME_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Beacon server - credential broker and workflow run tracker.
#[derive(Parser, Debug)]
#[command(name = "beacon-server", about = "Beacon credential broker and run tracker", version)]
struct Args {
	/// Path to a TOML config file (defaults to /etc/beacon/server.toml).
	#[arg(long, env = "BEACON_SERVER_CONFIG")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Show version and build information
	Version,
}

async fn shutdown_signal() {
	if let Err(e) = tokio::signal::ctrl_c().await {
		tracing::error!(error = %e, "Failed to listen for shutdown signal");
		return;
	}
	tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
	let args = Args::parse();

	if let Some(Command::Version) = args.command {
		println!("{}", version::format_version_info());
		return Ok(());
	}

	dotenvy::dotenv().ok();

	let config = match args.config {
		Some(path) => beacon_server_config::load_config_with_file(path)?,
		None => beacon_server_config::load_config()?,
	};

	let registry = tracing_subscriber::registry().with(
		tracing_subscriber::EnvFilter::try_from_default_env()
			.unwrap_or_else(|_| config.logging.level.clone().into()),
	);
	match config.logging.format {
		LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
		LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
	}

	tracing::info!(
		host = %config.http.host,
		port = config.http.port,
		database = %config.database.url,
		"starting beacon-server"
	);

	let pool = beacon_server_db::create_pool(&config.database.url).await?;
	beacon_server_db::run_migrations(&pool).await?;

	let state = create_app_state(pool.clone(), &config).await?;

	if let Some(tracker) = &state.tracker {
		match tracker.restore().await {
			Ok(repos) => tracing::info!(repos, "Run tracker restored"),
			Err(e) => tracing::error!(error = %e, "Failed to restore run tracker state"),
		}
	}

	let cache = InstallationCacheRepository::new(pool);
	let tracker = state.tracker.clone();
	let purge_task = tokio::spawn(async move {
		let mut interval = tokio::time::interval(PURGE_INTERVAL);
		loop {
			interval.tick().await;
			match cache.purge_expired().await {
				Ok(0) => {}
				Ok(purged) => tracing::debug!(purged, "Purged expired installation cache entries"),
				Err(e) => tracing::warn!(error = %e, "Failed to purge installation cache"),
			}
			if let Some(tracker) = &tracker {
				if let Err(e) = tracker.purge_outcomes(OUTCOME_RETENTION).await {
					tracing::warn!(error = %e, "Failed to purge run outcomes");
				}
			}
		}
	});

	let app = create_router(state.clone()).layer(TraceLayer::new_for_http());
	let listener = tokio::net::TcpListener::bind(config.socket_addr()).await?;
	tracing::info!(addr = %config.socket_addr(), "Listening");

	axum::serve(listener, app)
		.with_graceful_shutdown(shutdown_signal())
		.await?;

	purge_task.abort();
	if let Some(tracker) = &state.tracker {
		tracker.shutdown().await;
	}
	tracing::info!("beacon-server stopped");
	Ok(())
}
