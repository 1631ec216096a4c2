use clap::{Parser, Subcommand};
use edgesql_engine::config::{ConfigError, Profile, ProfileSet};
use edgesql_engine::{Command, Dispatcher, DriverKind, EdgeError, Handle};
use serde_json::Value;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "edgesql",
    version,
    about = "Run SQL and GO-separated scripts against sqlite, mysql or postgres",
    disable_help_subcommand = true
)]
struct Cli {
    /// Profile file (TOML)
    #[arg(short = 'c', long, env = "EDGESQL_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Profile to connect with; defaults to $EDGESQL_PROFILE, then the travis
    /// profile on CI, then the file's default_profile
    #[arg(short = 'p', long, value_name = "NAME")]
    profile: Option<String>,

    /// Connect with this driver instead of a profile
    #[arg(short = 'd', long, requires = "dsn")]
    driver: Option<DriverKind>,

    /// Connection string used with --driver
    #[arg(long, requires = "driver", value_name = "CONNECTION_STRING")]
    dsn: Option<String>,

    /// Connect timeout in seconds
    #[arg(short = 't', long, value_name = "SECS")]
    timeout: Option<f64>,

    /// Log filter, e.g. `debug` or `edgesql_engine=trace`
    #[arg(long, env = "RUST_LOG", default_value = "warn")]
    log: String,

    #[command(subcommand)]
    action: Action,
}

#[derive(Debug, Subcommand)]
enum Action {
    /// Run a GO-separated script file ("-" reads stdin)
    Run {
        script: PathBuf,
        /// Also accept indented separator lines
        #[arg(long)]
        trim_indent: bool,
    },
    /// Execute SQL and print {"rowcount": n}
    Exec { sql: String },
    /// Execute SQL and print its result sets
    Query { sql: String },
    /// Open and close a connection
    Ping,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Edge(#[from] EdgeError),
    #[error("cannot read script {path}: {source}")]
    Script {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid --timeout {0}")]
    Timeout(f64),
    #[error("open returned no handle")]
    NoHandle,
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

fn init_logging(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_script(path: &Path) -> Result<String, CliError> {
    let res = if path.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text).map(|_| text)
    } else {
        std::fs::read_to_string(path)
    };
    res.map_err(|source| CliError::Script {
        path: path.to_path_buf(),
        source,
    })
}

fn target(cli: &Cli, profiles: &ProfileSet) -> Result<Command, CliError> {
    let mut open = match (cli.driver, &cli.dsn) {
        (Some(driver), Some(dsn)) => Command::open(driver, dsn.clone()),
        _ => {
            let profile: &Profile = match &cli.profile {
                Some(name) => profiles
                    .get(name)
                    .ok_or_else(|| ConfigError::ProfileNotFound(name.clone()))?,
                None => profiles.select()?,
            };
            profile.open_command()?
        }
    };
    if let Some(secs) = cli.timeout {
        let limit = Duration::try_from_secs_f64(secs)
            .ok()
            .filter(|d| !d.is_zero())
            .ok_or(CliError::Timeout(secs))?;
        open = open.with_timeout(limit);
    }
    Ok(open)
}

async fn perform(
    dispatcher: &Dispatcher,
    driver: DriverKind,
    handle: Handle,
    action: &Action,
) -> Result<Value, CliError> {
    let value = match action {
        Action::Run { script, .. } => {
            let text = read_script(script)?;
            serde_json::to_value(dispatcher.run_script(driver, handle, &text).await?)?
        }
        Action::Exec { sql } => {
            let command = Command::non_query(driver, handle, sql.clone());
            serde_json::to_value(dispatcher.dispatch(command).await?)?
        }
        Action::Query { sql } => {
            let command = Command::query(driver, handle, sql.clone());
            serde_json::to_value(dispatcher.dispatch(command).await?)?
        }
        Action::Ping => serde_json::json!({"handle": handle.get(), "driver": driver.as_str()}),
    };
    Ok(value)
}

async fn run(cli: Cli) -> Result<Value, CliError> {
    let profiles = match &cli.config {
        Some(path) => ProfileSet::load(path)?,
        None => ProfileSet::default(),
    };
    let open = target(&cli, &profiles)?;
    let driver = open.driver();

    let mut engine = profiles.engine.clone();
    if let Action::Run { trim_indent: true, .. } = cli.action {
        engine = engine.set_trim_separator_indent(true);
    }
    let dispatcher = Dispatcher::new(engine);

    let handle = dispatcher.dispatch(open).await?.handle().ok_or(CliError::NoHandle)?;
    tracing::info!(%driver, handle = handle.get(), "connected");
    let outcome = perform(&dispatcher, driver, handle, &cli.action).await;
    if let Err(e) = &outcome {
        tracing::warn!(handle = handle.get(), error = %e, "command failed; closing");
    }
    let closed = dispatcher.dispatch(Command::close(driver, handle)).await;
    tracing::debug!(handle = handle.get(), ok = closed.is_ok(), "disconnected");

    let value = outcome?;
    closed?;
    Ok(value)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log);

    match run(cli).await {
        Ok(value) => {
            match serde_json::to_string_pretty(&value) {
                Ok(text) => println!("{text}"),
                Err(e) => {
                    eprintln!("edgesql: {e}");
                    return ExitCode::FAILURE;
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("edgesql: {e}");
            ExitCode::FAILURE
        }
    }
}
