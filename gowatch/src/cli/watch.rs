//! Runs the watch loop from parsed command line arguments

use super::Cli;
use super::args::{extract_output, split_passthrough};
use anyhow::{Context, Result};
use gowatch_core::config::{
    BuildMode, DEFAULT_POLL_INTERVAL, FileConfig, WatchBackend, WatchConfig,
};
use gowatch_core::session::WatchSession;
use std::time::Duration;
use tracing::{info, warn};

/// Directory names that are never watched.
pub const DEFAULT_IGNORED_DIRS: [&str; 3] = ["node_modules", ".git", "dist"];

pub const DEFAULT_REBUILD_KEY: &str = "r";

/// Builds the watch configuration: defaults, then the config file, then flags.
pub async fn build_config(cli: &Cli) -> Result<WatchConfig> {
    let mut builder =
        WatchConfig::builder().rebuild_key(DEFAULT_REBUILD_KEY).ignore_dirs(DEFAULT_IGNORED_DIRS);

    if let Some(path) = &cli.config {
        let file = FileConfig::load(path)
            .await
            .with_context(|| format!("Failed to load config file {}", path.display()))?;
        builder = builder.apply_file(file)?;
    }

    if let Some(go) = &cli.go {
        builder = builder.build_tool(go.clone());
    }
    if let Some(key) = &cli.rebuild_key {
        builder = builder.rebuild_key(key.clone());
    }
    builder =
        builder.ignore_dirs(cli.ignore.iter().cloned()).add_extensions(cli.ext.iter().cloned());
    if cli.no_run {
        builder = builder.no_run(true);
    }
    if cli.test {
        builder = builder.mode(BuildMode::Test);
    }
    if cli.clean {
        builder = builder.clean_first(true);
    }
    if let Some(line) = &cli.prebuild {
        builder = builder.prebuild_line(line)?;
    }
    if let Some(dir) = &cli.dir {
        builder = builder.working_dir(dir.clone());
    }
    if let Some(dir) = &cli.watch {
        builder = builder.directory(dir.clone());
    }
    if let Some(ms) = cli.poll {
        let interval = ms.map(Duration::from_millis).unwrap_or(DEFAULT_POLL_INTERVAL);
        builder = builder.backend(WatchBackend::Poll { interval });
    }

    let (build_args, app_args) = split_passthrough(&cli.passthrough);
    let output = cli.output.clone().or_else(|| extract_output(&build_args).map(Into::into));
    if let Some(output) = output {
        builder = builder.output(output);
    }
    if !build_args.is_empty() {
        builder = builder.build_args(build_args);
    }
    if !app_args.is_empty() {
        builder = builder.app_args(app_args);
    }

    Ok(builder.build()?)
}

/// Watches until Ctrl-C or a watcher failure.
pub async fn execute(cli: Cli) -> Result<()> {
    let config = build_config(&cli).await.context("Invalid configuration")?;
    let session = WatchSession::start(config).await.context("Failed to start watching")?;

    let shutdown = session.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal"),
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
        shutdown.close();
    });

    session.run().await.context("Watch loop failed")?;
    Ok(())
}
