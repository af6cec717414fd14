use anyhow::{Context, Result};
use booster_core::{ConfigStore, Coordinator, InstallReason, SessionOptions};
use booster_protocol::config::{LOAD_MORE_BATCH_SIZE, VISIBLE_MESSAGE_LIMIT};
use booster_protocol::{
    config_schema, message_schema, ExtensionConfig, ExtensionMessage, PartialConfig,
    EXTENSION_NAME,
};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

mod popup;
mod simulate;

const STORE_DIR: &str = "chatgpt-speed-booster";
const STORE_FILE: &str = "storage.json";

#[derive(Parser)]
#[command(name = "booster")]
#[command(about = "Keep long ChatGPT conversations responsive", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors
    #[arg(long, global = true)]
    quiet: bool,

    /// Storage file (defaults to the platform config directory)
    #[arg(long, global = true)]
    store: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or change the stored settings
    Config(ConfigArgs),

    /// Run a scripted session against a simulated chat page
    Simulate(SimulateArgs),
}

#[derive(Args)]
struct ConfigArgs {
    #[command(subcommand)]
    action: ConfigAction,

    /// Print the resulting config as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the current settings
    Show,

    /// Save form values; unparsable numbers fall back to the minimum
    Set(SetArgs),

    /// Flip the enabled switch
    Toggle,

    /// Restore the defaults
    Reset,

    /// Print the JSON schema of the config and the messages
    Schema,
}

#[derive(Args)]
struct SetArgs {
    /// Number of newest messages kept visible (1-200)
    #[arg(long)]
    limit: Option<String>,

    /// Messages revealed per "Load more" click (1-50)
    #[arg(long)]
    batch: Option<String>,
}

#[derive(Args)]
struct SimulateArgs {
    /// Scenario file (JSON)
    scenario: PathBuf,

    /// Print the step reports as JSON
    #[arg(long)]
    json: bool,

    /// Override the mutation debounce window (milliseconds)
    #[arg(long)]
    debounce_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();

    // Keep stdout clean for JSON consumers.
    let json_output = match &cli.command {
        Commands::Config(args) => args.json || matches!(args.action, ConfigAction::Schema),
        Commands::Simulate(args) => args.json,
    };
    if json_output {
        cli.quiet = true;
    }

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    match cli.command {
        Commands::Config(args) => {
            let store_path = resolve_store_path(cli.store.as_deref())?;
            run_config(args, &store_path).await?;
        }
        Commands::Simulate(args) => run_simulate(args).await?,
    }

    Ok(())
}

fn resolve_store_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    let base = dirs::config_dir().context("No config directory on this platform; pass --store")?;
    Ok(base.join(STORE_DIR).join(STORE_FILE))
}

async fn run_config(args: ConfigArgs, store_path: &Path) -> Result<()> {
    let store = Arc::new(ConfigStore::file(store_path));
    let coordinator = Coordinator::new(store);
    if !store_path.exists() {
        coordinator.on_installed(InstallReason::Install).await;
    }

    let message = match args.action {
        ConfigAction::Schema => {
            let schema = serde_json::json!({
                "config": config_schema()?,
                "message": message_schema()?,
            });
            println!("{}", serde_json::to_string_pretty(&schema)?);
            return Ok(());
        }
        ConfigAction::Show => ExtensionMessage::GetConfig,
        ConfigAction::Toggle => ExtensionMessage::ToggleEnabled,
        ConfigAction::Reset => ExtensionMessage::SetConfig(ExtensionConfig::default().into()),
        ConfigAction::Set(set) => {
            let partial = PartialConfig {
                visible_message_limit: set
                    .limit
                    .as_deref()
                    .map(|raw| f64::from(popup::clamp_input(raw, VISIBLE_MESSAGE_LIMIT))),
                load_more_batch_size: set
                    .batch
                    .as_deref()
                    .map(|raw| f64::from(popup::clamp_input(raw, LOAD_MORE_BATCH_SIZE))),
                enabled: None,
            };
            ExtensionMessage::SetConfig(partial)
        }
    };

    let kind = message.kind();
    let config = coordinator
        .handle(message)
        .await
        .config()
        .with_context(|| format!("{kind} failed; see the log for details"))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else {
        println!("{EXTENSION_NAME}");
        println!("{}", popup::render_config(&config));
    }
    Ok(())
}

async fn run_simulate(args: SimulateArgs) -> Result<()> {
    let scenario = simulate::Scenario::from_path(&args.scenario)?;
    let mut options = SessionOptions::default();
    if let Some(ms) = args.debounce_ms {
        options.debounce = Duration::from_millis(ms);
    }

    let reports = simulate::run(scenario, options).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            println!("[{}] {}: {}", report.step, report.op, report.line);
        }
    }
    Ok(())
}
