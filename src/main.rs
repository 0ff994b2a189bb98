use anyhow::Result;
use clap::{Parser, Subcommand};
use envscan::{
    config::Config,
    locator::PythonLocatorQuery,
    model::{DiscoveryReport, EnvRef, PythonEnvInfo, PythonEnvKind},
    output::{format_result_to_string, print_result, OutputFormat},
    EnvironmentsEngine,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing_subscriber::EnvFilter;

/// Exit codes for scripting
mod exit_codes {
    pub const SUCCESS: u8 = 0;
    pub const ERROR: u8 = 1;
    pub const NOT_FOUND: u8 = 2;
}

#[derive(Parser)]
#[command(name = "envscan")]
#[command(
    author,
    version,
    about = "Discover installed Python interpreters and environments"
)]
struct Cli {
    /// Show debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List discovered environments
    List {
        /// Only these kinds (path, pyenv, venv, conda, ...); repeatable
        #[arg(short, long)]
        kind: Vec<String>,

        /// Only environments under this directory; repeatable
        #[arg(long)]
        search_location: Vec<PathBuf>,

        /// Output format (table, json)
        #[arg(short, long)]
        format: Option<String>,

        /// Write output to file
        #[arg(short, long)]
        output: Option<String>,

        /// Always scan instead of using the snapshot
        #[arg(long)]
        no_cache: bool,
    },

    /// Resolve an interpreter path into a full record
    Resolve {
        /// Path to a Python executable
        path: PathBuf,

        /// Output format (table, json)
        #[arg(short, long)]
        format: Option<String>,
    },

    /// List environments again whenever a watched location changes
    Watch {
        /// Only these kinds; repeatable
        #[arg(short, long)]
        kind: Vec<String>,
    },

    /// List known environment kinds
    ListKinds,

    /// Show or create config file
    Config {
        /// Generate default config file
        #[arg(long)]
        init: bool,

        /// Show config file path
        #[arg(long)]
        path: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(exit_codes::ERROR)
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run() -> Result<u8> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = Config::load().unwrap_or_else(|e| {
        tracing::warn!("Ignoring unreadable config: {}", e);
        Config::default()
    });

    match cli.command {
        Commands::List {
            kind,
            search_location,
            format,
            output,
            no_cache,
        } => {
            let format = format.unwrap_or(config.default_format.clone());
            let query = build_query(&config, &kind, search_location)?;
            run_list(&config, query, format, output, no_cache).await
        }
        Commands::Resolve { path, format } => {
            let format = format.unwrap_or(config.default_format.clone());
            run_resolve(&config, path, format).await
        }
        Commands::Watch { kind } => {
            let query = build_query(&config, &kind, Vec::new())?;
            run_watch(&config, query).await
        }
        Commands::ListKinds => {
            list_kinds();
            Ok(exit_codes::SUCCESS)
        }
        Commands::Config { init, path } => {
            handle_config(init, path)?;
            Ok(exit_codes::SUCCESS)
        }
    }
}

fn build_query(
    config: &Config,
    kinds: &[String],
    search_locations: Vec<PathBuf>,
) -> Result<PythonLocatorQuery> {
    let kinds: Vec<PythonEnvKind> = if kinds.is_empty() {
        config.default_kinds.clone()
    } else {
        kinds
            .iter()
            .map(|k| PythonEnvKind::from_str(k).map_err(|e| anyhow::anyhow!(e)))
            .collect::<Result<_>>()?
    };

    let mut query = PythonLocatorQuery::new();
    if !kinds.is_empty() {
        query = query.with_kinds(kinds);
    }
    if !search_locations.is_empty() {
        let locations = search_locations
            .into_iter()
            .map(std::path::absolute)
            .collect::<std::io::Result<Vec<_>>>()?;
        query = query.with_search_locations(locations);
    }
    Ok(query)
}

fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message(message.to_string());
    pb
}

fn visible(config: &Config, envs: Vec<PythonEnvInfo>) -> Vec<PythonEnvInfo> {
    envs.into_iter()
        .filter(|env| {
            !config
                .ignore
                .should_ignore_executable(&env.executable.to_string_lossy())
        })
        .collect()
}

async fn run_list(
    config: &Config,
    query: PythonLocatorQuery,
    format: String,
    output_file: Option<String>,
    no_cache: bool,
) -> Result<u8> {
    let format = OutputFormat::from_str(&format).map_err(|e| anyhow::anyhow!(e))?;
    let is_interactive = format == OutputFormat::Table && output_file.is_none();

    let mut config = config.clone();
    config.watch = false;
    if no_cache {
        config.cache = false;
    }
    let engine = EnvironmentsEngine::from_config(&config);

    let progress = is_interactive.then(|| spinner("Discovering Python environments..."));
    let envs = engine.get_envs(&query).await;
    engine.dispose();
    let envs = visible(&config, envs?);
    if let Some(pb) = progress {
        pb.finish_with_message(format!("Found {} environments", envs.len()));
    }

    let report = DiscoveryReport::new(envs);
    if let Some(path) = output_file {
        let text = format_result_to_string(&report, format)?;
        std::fs::write(&path, text)?;
        println!("Results written to: {}", path);
    } else {
        print_result(&report, format)?;
    }

    Ok(exit_codes::SUCCESS)
}

async fn run_resolve(config: &Config, path: PathBuf, format: String) -> Result<u8> {
    let format = OutputFormat::from_str(&format).map_err(|e| anyhow::anyhow!(e))?;

    let mut config = config.clone();
    config.watch = false;
    let engine = EnvironmentsEngine::from_config(&config);
    let resolved = engine.resolve_env(&EnvRef::from(path.clone())).await;
    engine.dispose();

    match resolved? {
        Some(env) => {
            print_result(&DiscoveryReport::new(vec![env]), format)?;
            Ok(exit_codes::SUCCESS)
        }
        None => {
            eprintln!("No known environment for {}", path.display());
            Ok(exit_codes::NOT_FOUND)
        }
    }
}

async fn run_watch(config: &Config, query: PythonLocatorQuery) -> Result<u8> {
    let mut config = config.clone();
    config.watch = true;
    let engine = EnvironmentsEngine::from_config(&config);
    let mut changes = engine.subscribe();

    print_result(
        &DiscoveryReport::new(visible(&config, engine.get_envs(&query).await?)),
        OutputFormat::Table,
    )?;
    println!("Watching for changes. Press Ctrl-C to stop.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            change = changes.recv() => match change {
                Ok(event) => {
                    tracing::info!("Change detected: {:?}", event);
                    // one listing per burst
                    while matches!(changes.try_recv(), Ok(_) | Err(TryRecvError::Lagged(_))) {}
                    let envs = visible(&config, engine.get_envs(&query).await?);
                    print_result(&DiscoveryReport::new(envs), OutputFormat::Table)?;
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
        }
    }

    engine.dispose();
    Ok(exit_codes::SUCCESS)
}

fn list_kinds() {
    println!("Environment kinds:");
    println!();

    let kinds = [
        (PythonEnvKind::PathEnvVar, "Interpreters on PATH"),
        (PythonEnvKind::Pyenv, "pyenv-managed installs"),
        (PythonEnvKind::Venv, "Project virtual environments (pyvenv.cfg)"),
    ];

    for kind in PythonEnvKind::ALL {
        let discovered = kinds
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, description)| *description);
        match discovered {
            Some(description) => println!("  {:<15} {}", kind.as_str(), description),
            None => println!("  {:<15} (not discovered by the default locators)", kind.as_str()),
        }
    }
}

fn handle_config(init: bool, show_path: bool) -> Result<()> {
    let config_path = Config::config_path();

    if show_path {
        println!("{}", config_path.display());
        return Ok(());
    }

    if init {
        if config_path.exists() {
            println!("Config file already exists at: {}", config_path.display());
            return Ok(());
        }

        let config = Config::default();
        config.save()?;
        println!("Created config file at: {}", config_path.display());
        println!();
        println!("Default configuration:");
        println!("{}", Config::generate_default_config());
        return Ok(());
    }

    // Show current config
    if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)?;
        println!("Config file: {}", config_path.display());
        println!();
        println!("{}", content);
    } else {
        println!("No config file found.");
        println!("Run 'envscan config --init' to create one.");
        println!();
        println!("Config path: {}", config_path.display());
    }

    Ok(())
}
