use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use tapclaw::agent_engine::engine::AgentLoop;
use tapclaw::agent_engine::planner::{LlmPlanner, Planner, ScriptedPlanner};
use tapclaw::agent_engine::session_log::JsonlSessionLog;
use tapclaw::agent_engine::state::AgentStatus;
use tapclaw::config::{load_config, load_config_from, AppConfig};
use tapclaw::device::fixture::FixtureDevice;
use tapclaw::errors::{TapClawError, TapClawResult};
use tapclaw::executor::coordinator::Device;
use tapclaw::executor::ports::AppRegistry;
use tapclaw::llm::registry::ProviderRegistry;
use tapclaw::perception::render::{render_apps, render_tree};

/// TapClaw - drive a phone UI with a tool-calling planner
#[derive(Parser)]
#[command(name = "tapclaw")]
#[command(about = "Run UI agent sessions against a JSON-described device")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one goal to completion
    Run {
        /// Device fixture (JSON)
        #[arg(long)]
        fixture: PathBuf,

        /// What the agent should achieve
        #[arg(long)]
        goal: String,

        /// config.toml to use instead of the default lookup
        #[arg(long, env = "TAPCLAW_CONFIG")]
        config: Option<PathBuf>,

        /// Replay planner replies from a JSON script instead of calling an LLM
        #[arg(long)]
        script: Option<PathBuf>,

        /// Override [agent].max_iterations
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Directory for session_<id>.jsonl files
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },

    /// Print the fixture's current screen as the planner sees it
    Screen {
        #[arg(long)]
        fixture: PathBuf,
    },

    /// List the fixture's installed apps
    Apps {
        #[arg(long)]
        fixture: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (ignore error if not found)
    let _ = dotenvy::dotenv();
    tapclaw::init_tracing();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run {
            fixture,
            goal,
            config,
            script,
            max_iterations,
            log_dir,
        } => {
            cmd_run(RunArgs {
                fixture,
                goal,
                config,
                script,
                max_iterations,
                log_dir,
            })
            .await
        }
        Commands::Screen { fixture } => cmd_screen(&fixture).await,
        Commands::Apps { fixture } => cmd_apps(&fixture).await,
    };

    match result {
        Ok(code) => code,
        Err(TapClawError::NotStarted(notice)) => {
            eprintln!("{notice}");
            ExitCode::from(2)
        }
        Err(e) => {
            tracing::error!(error = %e, "tapclaw failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

struct RunArgs {
    fixture: PathBuf,
    goal: String,
    config: Option<PathBuf>,
    script: Option<PathBuf>,
    max_iterations: Option<u32>,
    log_dir: Option<PathBuf>,
}

async fn cmd_run(args: RunArgs) -> TapClawResult<ExitCode> {
    let backend = FixtureDevice::load(&args.fixture)?;

    // A scripted run does not need provider settings.
    let app_config: Option<AppConfig> = match (&args.config, &args.script) {
        (Some(path), _) => Some(load_config_from(path)?),
        (None, Some(_)) => load_config().ok(),
        (None, None) => Some(load_config()?),
    };

    let planner: Arc<dyn Planner> = match (&args.script, &app_config) {
        (Some(script), _) => Arc::new(ScriptedPlanner::load(script)?),
        (None, Some(cfg)) => {
            let registry = ProviderRegistry::from_config(cfg);
            Arc::new(LlmPlanner::from_registry(&registry, cfg.agent.max_tokens)?)
        }
        (None, None) => return Err(TapClawError::Config("no planner configured".into())),
    };

    let mut agent_config = app_config
        .as_ref()
        .map(|c| c.agent.clone())
        .unwrap_or_default();
    if let Some(max) = args.max_iterations {
        agent_config.max_iterations = max;
    }

    let log_dir = args
        .log_dir
        .clone()
        .or_else(|| app_config.as_ref().and_then(|c| c.session.log_dir.clone()));
    let log = Arc::new(JsonlSessionLog::open(log_dir.as_deref())?);
    tracing::info!(dir = %log.dir().display(), "session logs");

    let agent = Arc::new(AgentLoop::new(
        Device::from_backend(backend.clone()),
        planner,
        log,
        agent_config,
    ));

    let interrupt = agent.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received; cancelling session");
            interrupt.cancel_token().cancel();
        }
    });

    let status = agent.run(&args.goal).await?;

    for action in backend.actions() {
        println!("  {action:?}");
    }
    let code = match &status {
        AgentStatus::Success(summary) => {
            println!("success: {summary}");
            ExitCode::SUCCESS
        }
        AgentStatus::Error(message) => {
            println!("error: {message}");
            ExitCode::FAILURE
        }
        other => {
            println!("{other:?}");
            ExitCode::FAILURE
        }
    };
    Ok(code)
}

async fn cmd_screen(fixture: &Path) -> TapClawResult<ExitCode> {
    let device = Device::from_backend(FixtureDevice::load(fixture)?);
    match device.capture().await? {
        Some(snapshot) => print!("{}", render_tree(snapshot.root())),
        None => println!("(no UI root)"),
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_apps(fixture: &Path) -> TapClawResult<ExitCode> {
    let device = FixtureDevice::load(fixture)?;
    print!("{}", render_apps(&device.list_apps().await?));
    Ok(ExitCode::SUCCESS)
}
