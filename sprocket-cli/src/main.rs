use anyhow::{Context, Result};
use clap::Parser;
use sprocket_config::{ConfigLoader, LogLevel, SprocketConfig};
use sprocket_plugin::{BuildPool, Collaborators, PluginInfo, PluginResult, Registry};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

mod cli;
use cli::{Cli, Commands, ConfigCommands};

fn load_config(config_path: Option<&PathBuf>) -> Result<SprocketConfig> {
    let loader = ConfigLoader::new();

    match config_path {
        Some(path) => {
            if path.exists() {
                info!("Loading configuration from: {:?}", path);
                loader
                    .from_file(path)
                    .context(format!("Failed to load configuration from {:?}", path))
            } else {
                warn!("Configuration file not found: {:?}. Using defaults.", path);
                loader
                    .from_env()
                    .context("Failed to load configuration from environment")
            }
        }
        None => {
            debug!("No configuration file specified. Loading from environment or defaults.");
            loader
                .from_env()
                .context("Failed to load configuration from environment")
        }
    }
}

/// Initialize logging from configuration with fallback to simple tracing
fn init_logging_with_config(config: &SprocketConfig, log_level: Option<&String>) -> Result<()> {
    // If CLI log level is provided, override config level
    let mut logging_config = config.logging.clone();
    if let Some(level_str) = log_level {
        match level_str.parse::<LogLevel>() {
            Ok(level) => logging_config.level = level,
            Err(e) => eprintln!("{}, keeping '{}'", e, logging_config.level.as_str()),
        }
    }

    if let Err(e) = sprocket_logging::init_logging(&logging_config) {
        eprintln!(
            "Failed to initialize structured logging: {}, falling back to simple tracing",
            e
        );
        sprocket_logging::init_simple_tracing(logging_config.level.as_str())?;
    }

    Ok(())
}

/// Build a registry holding every configured plugin
async fn build_registry(config: &SprocketConfig) -> Result<Registry> {
    let collaborators = Collaborators::from_config(&config.tooling);
    let registry = Registry::from_config(&config.plugins, collaborators)
        .await
        .context("Failed to register configured plugins")?;

    info!(
        plugins = registry.len().await?,
        plugin_dir = ?registry.plugin_dir(),
        "Plugin registry ready"
    );
    Ok(registry)
}

/// Cancel running collaborators and unstarted builds on Ctrl+C
fn cancel_on_shutdown(registry: &Registry, pool: &BuildPool) {
    let registry_token = registry.cancellation_token();
    let pool = pool.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling plugin operations");
            pool.cancel();
            registry_token.cancel();
        }
    });
}

async fn sync_plugins(
    registry: &Registry,
    config: &SprocketConfig,
    concurrent: bool,
    test: bool,
) -> Result<()> {
    let pool = BuildPool::new(config.plugins.max_concurrent_builds);
    cancel_on_shutdown(registry, &pool);

    registry
        .retrieve_all()
        .await
        .context("Failed to retrieve plugin sources")?;

    if concurrent {
        registry
            .build_all_concurrent(&pool)
            .await
            .context("Failed to build plugins")?;
    } else {
        registry.build_all().await.context("Failed to build plugins")?;
    }

    if test || config.plugins.run_tests {
        registry.test_all().await.context("Plugin tests failed")?;
    }

    Ok(())
}

async fn sync_command(mut config: SprocketConfig, concurrent: bool, test: bool, update: bool) -> Result<()> {
    if update {
        for entry in &mut config.plugins.entries {
            entry.update = true;
        }
    }

    let registry = build_registry(&config).await?;
    let count = registry.len().await?;
    let result = sync_plugins(&registry, &config, concurrent, test).await;
    finish(result, registry.close_all().await)?;

    println!("Synced {} plugin(s)", count);
    Ok(())
}

async fn load_command(config: SprocketConfig, concurrent: bool) -> Result<()> {
    let registry = build_registry(&config).await?;

    let result = async {
        sync_plugins(&registry, &config, concurrent, false).await?;
        registry
            .initialize_all()
            .await
            .context("Failed to load plugins")?;

        for alias in registry.aliases().await? {
            let module = registry.lookup(&alias).await?;
            println!("{:<20} {}", alias, module.path().display());
        }
        Ok::<_, anyhow::Error>(())
    }
    .await;

    finish(result, registry.close_all().await)
}

/// Combine a command's outcome with closing the registry. The command's own
/// failure is reported first; a close failure alongside it is only logged.
fn finish(result: Result<()>, closed: PluginResult<()>) -> Result<()> {
    match (result, closed) {
        (Err(e), Err(close_error)) => {
            warn!(error = %close_error, "Failed to close plugin registry");
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
        (Ok(()), closed) => closed.context("Failed to close plugin registry"),
    }
}

async fn list_command(config: SprocketConfig, json: bool) -> Result<()> {
    let registry = build_registry(&config).await?;
    let plugins = registry.list().await?;

    if json {
        let output = serde_json::to_string_pretty(&plugins).context("Failed to format plugins as JSON")?;
        println!("{}", output);
    } else if plugins.is_empty() {
        println!("No plugins configured");
    } else {
        for plugin in &plugins {
            print_plugin(plugin);
        }
    }

    Ok(())
}

fn print_plugin(plugin: &PluginInfo) {
    let descriptor = &plugin.descriptor;
    println!("{} ({})", descriptor.alias, descriptor.kind);
    println!("  key:      {}", descriptor.import_key);
    println!("  location: {}", descriptor.location);
    if let Some(revision) = &descriptor.revision {
        println!("  revision: {}", revision);
    }
    if let Some(source_dir) = &plugin.source_dir {
        println!("  sources:  {}", source_dir.display());
    }
    println!("  binary:   {}", descriptor.binary_path.display());
    if descriptor.update_requested {
        println!("  update:   requested");
    }
}

/// Handle configuration validation
fn handle_config_validate(config_file: &PathBuf) -> Result<()> {
    info!("Validating configuration file: {:?}", config_file);

    if !config_file.exists() {
        return Err(anyhow::anyhow!(
            "Configuration file not found: {:?}",
            config_file
        ));
    }

    match ConfigLoader::new().from_file(config_file) {
        Ok(config) => {
            println!(
                "Configuration file is valid ({} plugin(s))",
                config.plugins.entries.len()
            );
            Ok(())
        }
        Err(e) => {
            error!("Configuration validation failed: {}", e);
            Err(e).context(format!("Invalid configuration file {:?}", config_file))
        }
    }
}

/// Handle configuration generation
fn handle_config_generate(output: Option<&PathBuf>, force: bool) -> Result<()> {
    let content = SprocketConfig::generate_sample();

    let Some(output) = output else {
        print!("{}", content);
        return Ok(());
    };

    if output.exists() && !force {
        return Err(anyhow::anyhow!(
            "Output file already exists: {:?}. Use --force to overwrite.",
            output
        ));
    }

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent).context("Failed to create output directory")?;
    }

    fs::write(output, content).context("Failed to write configuration file")?;
    println!("Configuration generated at: {:?}", output);
    println!("Validate with: sprocket config validate --config-file {:?}", output);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_ref())?;
    init_logging_with_config(&config, cli.log_level.as_ref())?;
    debug!("Sprocket CLI starting");

    match &cli.command {
        Some(Commands::Sync {
            concurrent,
            test,
            update,
        }) => sync_command(config, *concurrent, *test, *update).await,
        Some(Commands::Load { concurrent }) => load_command(config, *concurrent).await,
        Some(Commands::List { json }) => list_command(config, *json).await,
        Some(Commands::Config { config_cmd }) => match config_cmd {
            ConfigCommands::Validate { config_file } => handle_config_validate(config_file),
            ConfigCommands::Generate { output, force } => handle_config_generate(output.as_ref(), *force),
        },
        None => {
            // If no subcommand is provided, print help
            use clap::CommandFactory;
            let mut cmd = Cli::command();
            cmd.print_help().context("Failed to print help")?;
            println!();
            Ok(())
        }
    }
}
