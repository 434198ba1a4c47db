//! space-sync command-line tool.
//!
//! Synchronizes the content of a source space into a destination space,
//! either fully or incrementally from the sync token saved by the previous
//! run. Also generates and validates configuration files.

mod style;
mod summary;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use spacesync_core::client::{DeliveryClient, ManagementClient};
use spacesync_core::config::AppConfig;
use spacesync_core::destination::existing_content_help;
use spacesync_core::errors::SyncError;
use spacesync_core::{SpaceSync, SyncReport};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// space-sync command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "space-sync",
    version,
    about = "Synchronize content from one space to another"
)]
struct Cli {
    /// Path to a TOML configuration file. Flags override its values.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a synchronization.
    Sync(SyncArgs),

    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./space-sync.toml")]
        output: PathBuf,
    },

    /// Validate the configuration.
    Validate,
}

#[derive(Args, Debug, Default)]
struct SyncArgs {
    /// ID of the space with the source data.
    #[arg(long)]
    source_space: Option<String>,

    /// ID of the space data will be copied to.
    #[arg(long)]
    destination_space: Option<String>,

    /// Delivery API token for the source space.
    #[arg(long)]
    source_delivery_token: Option<String>,

    /// Management API token for both spaces.
    #[arg(long)]
    management_token: Option<String>,

    /// Management API token for the source space, if different from --management-token.
    #[arg(long)]
    source_management_token: Option<String>,

    /// Management API token for the destination space, if different from --management-token.
    #[arg(long)]
    destination_management_token: Option<String>,

    /// Directory for sync token files (default: current directory).
    #[arg(long)]
    sync_token_dir: Option<PathBuf>,

    /// Directory for error log files (default: current directory).
    #[arg(long)]
    error_log_dir: Option<PathBuf>,

    /// Ignore any saved sync token and perform a full sync.
    #[arg(long)]
    fresh: bool,

    /// Overwrite entities with the same ID on a destination that already has content.
    #[arg(long)]
    force_overwrite: bool,

    /// Skip content types and locales; copy only entries and assets.
    #[arg(long)]
    skip_content_model: bool,

    /// Copy only content types and locales.
    #[arg(long)]
    content_model_only: bool,

    /// Skip locales. Must be used with --content-model-only.
    #[arg(long)]
    skip_locales: bool,

    /// Requests per rate limit period (default 6).
    #[arg(long)]
    rate_limit: Option<u32>,

    /// Rate limit period in milliseconds (default 1000).
    #[arg(long)]
    rate_limit_period: Option<u64>,

    /// Delay in milliseconds between creating and publishing entries (default 5000).
    #[arg(long)]
    pre_publish_delay: Option<u64>,

    /// Host for the Delivery API.
    #[arg(long)]
    delivery_host: Option<String>,

    /// Port for the Delivery API.
    #[arg(long)]
    delivery_port: Option<u16>,

    /// Use http instead of https for the Delivery API.
    #[arg(long)]
    delivery_insecure: bool,

    /// Host for the Management API.
    #[arg(long)]
    management_host: Option<String>,

    /// Port for the Management API.
    #[arg(long)]
    management_port: Option<u16>,

    /// Use http instead of https for the Management API.
    #[arg(long)]
    management_insecure: bool,

    /// Hostname of the proxy server.
    #[arg(long)]
    proxy_host: Option<String>,

    /// Port of the proxy server.
    #[arg(long)]
    proxy_port: Option<u16>,
}

impl SyncArgs {
    /// Overlay the flags that were given onto `config`.
    fn apply(self, config: &mut AppConfig) {
        let SyncArgs {
            source_space,
            destination_space,
            source_delivery_token,
            management_token,
            source_management_token,
            destination_management_token,
            sync_token_dir,
            error_log_dir,
            fresh,
            force_overwrite,
            skip_content_model,
            content_model_only,
            skip_locales,
            rate_limit,
            rate_limit_period,
            pre_publish_delay,
            delivery_host,
            delivery_port,
            delivery_insecure,
            management_host,
            management_port,
            management_insecure,
            proxy_host,
            proxy_port,
        } = self;

        set(&mut config.source.space_id, source_space);
        set(&mut config.destination.space_id, destination_space);
        set_some(&mut config.source.delivery_token, source_delivery_token);
        set_some(&mut config.api.management_token, management_token);
        set_some(&mut config.source.management_token, source_management_token);
        set_some(
            &mut config.destination.management_token,
            destination_management_token,
        );
        set(&mut config.sync.sync_token_dir, sync_token_dir);
        set(&mut config.sync.error_log_dir, error_log_dir);
        set(&mut config.api.rate_limit, rate_limit);
        set(&mut config.api.rate_limit_period_ms, rate_limit_period);
        set(&mut config.sync.pre_publish_delay_ms, pre_publish_delay);
        set(&mut config.api.delivery_host, delivery_host);
        set_some(&mut config.api.delivery_port, delivery_port);
        set(&mut config.api.management_host, management_host);
        set_some(&mut config.api.management_port, management_port);
        set_some(&mut config.api.proxy_host, proxy_host);
        set_some(&mut config.api.proxy_port, proxy_port);

        config.sync.fresh |= fresh;
        config.sync.force_overwrite |= force_overwrite;
        config.sync.skip_content_model |= skip_content_model;
        config.sync.content_model_only |= content_model_only;
        config.sync.skip_locales |= skip_locales;
        config.api.delivery_insecure |= delivery_insecure;
        config.api.management_insecure |= management_insecure;
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn set_some<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { output } => cmd_init(&output),
        Commands::Validate => cmd_validate(cli.config.as_deref()),
        Commands::Sync(args) => cmd_sync(cli.config.as_deref(), args).await,
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn load_config(path: Option<&Path>, args: SyncArgs) -> Result<AppConfig> {
    let mut config = match path {
        Some(path) => {
            AppConfig::load_from_file(path).context("failed to load configuration file")?
        }
        None => AppConfig::default(),
    };
    args.apply(&mut config);
    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    config.validate().context("invalid configuration")?;
    debug!(
        source = %config.source.space_id,
        destination = %config.destination.space_id,
        "configuration ready"
    );
    Ok(config)
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

async fn cmd_sync(config_path: Option<&Path>, args: SyncArgs) -> Result<()> {
    let config = load_config(config_path, args)?;
    let source_space = config.source.space_id.clone();
    let destination_space = config.destination.space_id.clone();

    let delivery_token = config
        .source
        .delivery_token
        .as_deref()
        .context("missing source delivery token")?;
    let source_token = config
        .source_management_token()
        .context("missing source management token")?;
    let destination_token = config
        .destination_management_token()
        .context("missing destination management token")?;

    let delivery = DeliveryClient::new(&config.delivery_settings(), &source_space, delivery_token)
        .context("failed to create delivery client")?;
    let source = ManagementClient::new(&config.management_settings(), &source_space, source_token)
        .context("failed to create source management client")?;
    let destination = ManagementClient::new(
        &config.management_settings(),
        &destination_space,
        destination_token,
    )
    .context("failed to create destination management client")?;

    let error_log = config.error_log_file(&Utc::now().format("%Y%m%dT%H%M%S").to_string());
    let sync = SpaceSync::new(
        Arc::new(delivery),
        Arc::new(source),
        Arc::new(destination),
        Box::new(config.token_store()),
        config.scheduler().context("invalid rate limit")?,
    )
    .with_options(config.run_options())
    .with_asset_poll(config.asset_poll())
    .with_error_log(error_log);

    println!(
        "{} {}",
        style::header("Synchronizing"),
        style::direction(&source_space, &destination_space)
    );

    match sync.run().await {
        Ok(report) => {
            print_report(&report);
            Ok(())
        }
        Err(SyncError::ExistingContentConflict) => {
            eprintln!("{}", style::error("The destination space already has content."));
            eprintln!();
            eprintln!("{}", existing_content_help());
            print_error_log_pointer(sync.error_log());
            anyhow::bail!("aborted: {}", SyncError::ExistingContentConflict)
        }
        Err(e) => {
            print_error_log_pointer(sync.error_log());
            Err(e).context("synchronization failed")
        }
    }
}

fn print_report(report: &SyncReport) {
    if let Some(table) = summary::push_table(&report.push) {
        println!();
        println!("{table}");
    }
    println!();
    match &report.token_file {
        Some(path) => println!(
            "{}\n  {}",
            style::success("Successfully synchronized the content and saved the sync token to:"),
            path
        ),
        None => println!(
            "{}",
            style::success("Successfully synchronized the content model")
        ),
    }
    if report.has_errors() {
        println!();
        println!(
            "{}",
            style::warn(&format!(
                "However, additional errors were found ({})",
                report.error_count
            ))
        );
        println!("  Error log: {}", report.error_log.display());
    }
}

/// Point at the error log if it holds any records.
fn print_error_log_pointer(path: &Path) {
    let has_records = std::fs::read_to_string(path)
        .map(|contents| contents.trim() != "[]")
        .unwrap_or(false);
    if has_records {
        eprintln!("  Error log: {}", path.display());
    }
}

fn cmd_init(output: &Path) -> Result<()> {
    let default_config = r#"# space-sync configuration
# Tokens are read from the environment variables named here.

[source]
space_id = "source-space-id"
delivery_token_env = "SOURCE_DELIVERY_TOKEN"
# management_token_env = "SOURCE_MANAGEMENT_TOKEN"

[destination]
space_id = "destination-space-id"
# management_token_env = "DESTINATION_MANAGEMENT_TOKEN"

[api]
management_token_env = "CONTENTFUL_MANAGEMENT_TOKEN"
delivery_host = "cdn.contentful.com"
management_host = "api.contentful.com"
rate_limit = 6
rate_limit_period_ms = 1000

[sync]
sync_token_dir = "."
error_log_dir = "."
pre_publish_delay_ms = 5000
"#;

    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, default_config).context("failed to write config file")?;
    info!(path = %output.display(), "wrote default configuration");

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit the config file with your space IDs");
    println!("  2. Set the referenced environment variables (SOURCE_DELIVERY_TOKEN, CONTENTFUL_MANAGEMENT_TOKEN)");
    println!(
        "  3. Validate with: space-sync validate --config {}",
        output.display()
    );
    println!(
        "  4. Synchronize: space-sync sync --config {}",
        output.display()
    );

    Ok(())
}

fn cmd_validate(config_path: Option<&Path>) -> Result<()> {
    let config_path = config_path.context("--config is required for validate")?;
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    let _ = config.resolve_env_vars();
    println!("  [OK] Environment variable references processed");

    match config.validate() {
        Ok(()) => println!("  [OK] All required fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    println!();
    println!("Configuration summary:");
    println!("  Source space       : {}", config.source.space_id);
    println!("  Destination space  : {}", config.destination.space_id);
    println!(
        "  Delivery token     : {}",
        style::setting(config.source.delivery_token.is_some())
    );
    println!(
        "  Management tokens  : {}",
        style::setting(
            config.source_management_token().is_some()
                && config.destination_management_token().is_some()
        )
    );
    println!(
        "  Rate limit         : {} per {} ms",
        config.api.rate_limit, config.api.rate_limit_period_ms
    );
    println!(
        "  Sync token file    : {}",
        config.token_store().path().display()
    );
    println!("{}", style::dim("  Flags given to `sync` override these values."));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let mut config = AppConfig::default();
        config.source.space_id = "from-file".into();
        config.api.rate_limit = 3;

        let args = SyncArgs {
            source_space: Some("src".into()),
            destination_space: Some("dst".into()),
            management_token: Some("cma".into()),
            rate_limit: Some(12),
            content_model_only: true,
            ..Default::default()
        };
        args.apply(&mut config);

        assert_eq!(config.source.space_id, "src");
        assert_eq!(config.destination.space_id, "dst");
        assert_eq!(config.api.rate_limit, 12);
        assert_eq!(config.api.management_token.as_deref(), Some("cma"));
        assert!(config.sync.content_model_only);
        assert_eq!(config.sync.pre_publish_delay_ms, 5000);
    }

    #[test]
    fn test_absent_flags_keep_config() {
        let mut config = AppConfig::default();
        config.sync.force_overwrite = true;
        config.api.proxy_host = Some("proxy".into());
        SyncArgs::default().apply(&mut config);
        assert!(config.sync.force_overwrite);
        assert_eq!(config.api.proxy_host.as_deref(), Some("proxy"));
    }

    #[test]
    fn test_cli_parses_sync_flags() {
        let cli = Cli::try_parse_from([
            "space-sync",
            "sync",
            "--source-space",
            "src",
            "--destination-space",
            "dst",
            "--source-delivery-token",
            "cda",
            "--management-token",
            "cma",
            "--skip-content-model",
            "--rate-limit",
            "8",
        ])
        .unwrap();
        match cli.command {
            Commands::Sync(args) => {
                assert_eq!(args.source_space.as_deref(), Some("src"));
                assert!(args.skip_content_model);
                assert_eq!(args.rate_limit, Some(8));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_init_writes_valid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("space-sync.toml");
        cmd_init(&path).unwrap();
        let config = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(config.source.space_id, "source-space-id");
        assert!(cmd_init(&path).is_err());
    }
}
