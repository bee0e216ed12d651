//! Entry point of the `graft` launcher.
//!
//! Loads the configuration, initialises logging and dispatches to the
//! requested subcommand. Errors are reported once at this edge and end the
//! process with a non-zero status.

mod cli;
mod signals;

use std::sync::Arc;

use anyhow::Context;
use graft::{assemble, discover_definitions, dump, plan_class, Launcher};
use graft_bootstrap::{setup_logging, GraftConfig};
use tracing::{error, info, warn};

use cli::{CliArgs, CliCommand};

/// Exit status after a shutdown signal, as a shell reports SIGINT.
const INTERRUPTED_EXIT_CODE: i32 = 130;

// ============================================================================
// Configuration
// ============================================================================

/// Loads the configuration file and applies CLI overrides.
async fn load_config(args: &CliArgs) -> anyhow::Result<GraftConfig> {
    let mut config = GraftConfig::load_from_file(&args.config_path).await?;

    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if args.json_logs {
        config.logging.json_format = true;
    }
    if let Some(dir) = &args.export_dir {
        config.transform.export_dir = Some(dir.to_string_lossy().to_string());
    }
    if args.no_verify {
        config.transform.verify = false;
    }
    if args.preload {
        config.transform.preload = true;
    }

    config
        .ensure_valid()
        .context("Configuration validation failed")?;
    Ok(config)
}

// ============================================================================
// Commands
// ============================================================================

async fn run(config: GraftConfig) -> anyhow::Result<()> {
    info!("🚀 Graft v{}", env!("CARGO_PKG_VERSION"));
    info!("  📂 Host classes: {}", config.launch.host_classpath);
    info!("  📜 Definitions: {}", config.launch.definition_paths.join(", "));
    info!("  🎯 Entrypoint: {}", config.launch.entrypoint);

    let preload = config.transform.preload;
    let launcher = Arc::new(Launcher::boot(config)?);
    if preload {
        let loaded = launcher.preload()?;
        info!("✅ Preloaded {} host class(es)", loaded);
    }

    let host = {
        let launcher = launcher.clone();
        tokio::task::spawn_blocking(move || launcher.run_entrypoint())
    };

    tokio::select! {
        result = host => {
            result.context("Host thread panicked")??;
            info!("✅ Entrypoint returned");
        }
        signal = signals::wait_for_shutdown() => {
            signal?;
            warn!("🛑 Shutdown signal received, abandoning the host thread");
            launcher.log_summary();
            // Dropping the runtime would join the blocking host thread, which
            // may never return.
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
    }

    launcher.log_summary();
    Ok(())
}

fn check(config: &GraftConfig) -> anyhow::Result<()> {
    let definitions = discover_definitions(config)?;
    info!(
        "✅ {} definition(s) in {} manifest(s) are valid",
        definitions.len(),
        definitions.manifests().len()
    );
    for definition in definitions.iter() {
        info!("  - {} [{:?}, priority {}]", definition.id, definition.band, definition.priority);
    }
    Ok(())
}

fn plan(config: &GraftConfig, class: &str) -> anyhow::Result<()> {
    let plan = plan_class(config, class)?;
    println!("{plan}");
    Ok(())
}

async fn tool(command: &CliCommand) -> anyhow::Result<()> {
    match command {
        CliCommand::Assemble { input, output } => {
            let json = tokio::fs::read_to_string(input)
                .await
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let image = assemble(&json).with_context(|| format!("Failed to assemble {}", input.display()))?;
            tokio::fs::write(output, image)
                .await
                .with_context(|| format!("Failed to write {}", output.display()))?;
        }
        CliCommand::Dump { input } => {
            let image = tokio::fs::read(input)
                .await
                .with_context(|| format!("Failed to read {}", input.display()))?;
            println!("{}", dump(&image)?);
        }
        _ => {}
    }
    Ok(())
}

async fn app(args: CliArgs) -> anyhow::Result<()> {
    if !args.command.needs_config() {
        return tool(&args.command).await;
    }

    let config = load_config(&args).await?;
    setup_logging(&config.logging, args.json_logs)?;

    match &args.command {
        CliCommand::Run => run(config).await,
        CliCommand::Check => check(&config),
        CliCommand::Plan { class } => plan(&config, class),
        CliCommand::Assemble { .. } | CliCommand::Dump { .. } => tool(&args.command).await,
    }
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let args = CliArgs::parse();
    let logging_ready = args.command.needs_config();

    if let Err(e) = app(args).await {
        if logging_ready && tracing::dispatcher::has_been_set() {
            error!("❌ {:#}", e);
        } else {
            eprintln!("❌ {:#}", e);
        }
        std::process::exit(1);
    }
}
