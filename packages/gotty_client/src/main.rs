use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use gotty_client::{ClientConfig, GottyClient, read_file_config};

#[derive(Parser)]
#[command(name = "gotty")]
#[command(about = "Run commands on a gotty terminal over its websocket")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Web UI URL (overrides config file / GOTTY_URL)
    #[arg(long, global = true)]
    url: Option<String>,

    /// Web UI username (overrides config file / GOTTY_USERNAME)
    #[arg(short, long, global = true)]
    username: Option<String>,

    /// Web UI password (overrides config file / GOTTY_PASSWORD)
    #[arg(short, long, global = true)]
    password: Option<String>,

    /// TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute commands one after another and print their output
    Exec(ExecArgs),

    /// Stream terminal output to stdout
    Watch(WatchArgs),
}

#[derive(Parser)]
struct ExecArgs {
    /// Commands to run
    #[arg(required = true)]
    commands: Vec<String>,

    /// Seconds to wait for output after each command
    #[arg(short, long)]
    timeout: Option<f64>,

    /// Send without waiting for output
    #[arg(long)]
    no_wait: bool,

    /// Pause between commands, in milliseconds
    #[arg(long, default_value = "500")]
    delay_ms: u64,

    /// How many recent history lines to print at the end
    #[arg(long, default_value = "5")]
    history: usize,
}

#[derive(Parser)]
struct WatchArgs {
    /// Stop after this many seconds (runs until Ctrl-C otherwise)
    #[arg(short, long)]
    seconds: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.debug {
        "gotty_client=debug,gotty=debug,warn"
    } else {
        "gotty_client=info,gotty=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let config = resolve_config(&cli)?;
    let client = GottyClient::new(config).context("Invalid client configuration")?;

    info!("Connecting to {}", client.endpoint().base_url);
    client
        .connect()
        .await
        .with_context(|| format!("Failed to connect to {}", client.config().url))?;

    let result = match cli.command {
        Commands::Exec(args) => run_exec(&client, args).await,
        Commands::Watch(args) => run_watch(&client, args).await,
    };

    client.close().await;
    result
}

fn resolve_config(cli: &Cli) -> Result<ClientConfig> {
    let mut fc = read_file_config(cli.config.as_deref()).context("Failed to load configuration")?;

    if let Some(url) = &cli.url {
        fc.url = url.clone();
    }
    if let Some(username) = &cli.username {
        fc.username = username.clone();
    }
    if let Some(password) = &cli.password {
        fc.password = password.clone();
    }
    if fc.url.is_empty() {
        bail!("No web UI URL given. Pass --url, set GOTTY_URL, or add `url` to the config file.");
    }

    Ok(ClientConfig::from_file(&fc)?)
}

async fn run_exec(client: &GottyClient, args: ExecArgs) -> Result<()> {
    let timeout = args
        .timeout
        .map(Duration::try_from_secs_f64)
        .transpose()
        .context("Invalid --timeout")?;
    let total = args.commands.len();
    let mut failures = 0;

    for (i, command) in args.commands.iter().enumerate() {
        eprintln!("[{}/{}] {}", i + 1, total, command);
        let response = client.execute(command, !args.no_wait, timeout).await;

        if response.success {
            if let Some(data) = &response.data {
                let mut stdout = std::io::stdout().lock();
                for chunk in data {
                    stdout.write_all(chunk.as_bytes())?;
                }
                stdout.flush()?;
            }
        } else {
            failures += 1;
            warn!(
                "Command '{}' failed: {} ({})",
                command, response.message, response.status_code
            );
        }

        if i + 1 < total && args.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(args.delay_ms)).await;
        }
    }

    if args.history > 0 {
        let history = client.get_history().await;
        let start = history.len().saturating_sub(args.history);
        eprintln!("--- history ---");
        for (i, line) in history[start..].iter().enumerate() {
            eprintln!("{}. {}", i + 1, line);
        }
    }

    if failures > 0 {
        bail!("{failures} of {total} command(s) failed");
    }
    Ok(())
}

async fn run_watch(client: &GottyClient, args: WatchArgs) -> Result<()> {
    client
        .register_output_observer(|chunk| {
            let mut stdout = std::io::stdout().lock();
            let _ = stdout.write_all(chunk.as_bytes());
            let _ = stdout.flush();
        })
        .await;

    let mut state = client.watch_state();
    let closed = async move {
        let _ = state.wait_for(|s| !matches!(s, gotty_client::ConnectionState::Open)).await;
    };
    let deadline = async {
        match args.seconds {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = closed => info!("Session ended"),
        _ = deadline => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }
    Ok(())
}
