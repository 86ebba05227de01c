use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use philosophers::cancel::{stop_on_signals, StopToken};
use philosophers::config::{
    Bounds, DinnerConfig, Endpoint, DEFAULT_DURATION_SECS, DEFAULT_HOST, DEFAULT_PAUSE_MAX_SECS,
    DEFAULT_PAUSE_MIN_SECS, DEFAULT_PHILOSOPHERS, DEFAULT_PORT,
};
use philosophers::dinner;
use philosophers::launcher::Launcher;
use philosophers::pause::Uniform;
use philosophers::philosopher::Philosopher;
use philosophers::remote::{RemoteTable, Server};
use philosophers::table::Coordinator;

/// Dining philosophers over a monitor, semaphores or separate processes
#[derive(Parser)]
#[command(name = "philosophers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Threads sharing a monitor (lock + condition variable)
    Threads {
        #[command(flatten)]
        args: DinnerArgs,
    },

    /// Threads acting as processes, coordinated with semaphores
    Ipc {
        #[command(flatten)]
        args: DinnerArgs,
    },

    /// Run the coordinator process
    Serve {
        /// Number of philosophers
        #[arg(short = 'n', long, default_value_t = DEFAULT_PHILOSOPHERS)]
        philosophers: usize,

        #[command(flatten)]
        endpoint: EndpointArgs,
    },

    /// Run one philosopher process against a coordinator
    Philosopher {
        /// Seat of this philosopher
        #[arg(long)]
        id: usize,

        #[command(flatten)]
        endpoint: EndpointArgs,

        #[command(flatten)]
        pauses: PauseArgs,
    },

    /// Launch a coordinator and one process per philosopher
    Launch {
        #[command(flatten)]
        args: DinnerArgs,

        #[command(flatten)]
        endpoint: EndpointArgs,
    },
}

#[derive(Args)]
struct DinnerArgs {
    /// Number of philosophers
    #[arg(short = 'n', long, default_value_t = DEFAULT_PHILOSOPHERS)]
    philosophers: usize,

    /// Duration of the dinner in seconds
    #[arg(short, long, default_value_t = DEFAULT_DURATION_SECS)]
    duration: u64,

    #[command(flatten)]
    pauses: PauseArgs,
}

#[derive(Args)]
struct PauseArgs {
    /// Shortest thinking time in seconds
    #[arg(long, default_value_t = DEFAULT_PAUSE_MIN_SECS)]
    think_min: f64,

    /// Longest thinking time in seconds
    #[arg(long, default_value_t = DEFAULT_PAUSE_MAX_SECS)]
    think_max: f64,

    /// Shortest eating time in seconds
    #[arg(long, default_value_t = DEFAULT_PAUSE_MIN_SECS)]
    eat_min: f64,

    /// Longest eating time in seconds
    #[arg(long, default_value_t = DEFAULT_PAUSE_MAX_SECS)]
    eat_max: f64,
}

#[derive(Args)]
struct EndpointArgs {
    /// Coordinator host
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// Coordinator port
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,
}

impl PauseArgs {
    fn bounds(&self) -> Result<(Bounds, Bounds)> {
        let think = Bounds::from_secs(self.think_min, self.think_max).context("think time")?;
        let eat = Bounds::from_secs(self.eat_min, self.eat_max).context("eat time")?;
        Ok((think, eat))
    }
}

impl DinnerArgs {
    fn config(&self) -> Result<DinnerConfig> {
        let (think, eat) = self.pauses.bounds()?;
        let config = DinnerConfig {
            philosophers: self.philosophers,
            duration: Duration::from_secs(self.duration),
            think,
            eat,
        };
        config.validate()?;
        Ok(config)
    }
}

impl EndpointArgs {
    fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.host.clone(),
            port: self.port,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Threads { args } => {
            let config = args.config()?;
            let stop = StopToken::new();
            stop_on_signals(stop.clone(), || {})?;
            dinner::run_threads(&config, &stop)?.log();
        }
        Commands::Ipc { args } => {
            let config = args.config()?;
            let stop = StopToken::new();
            stop_on_signals(stop.clone(), || {})?;
            dinner::run_ipc(&config, &stop)?.log();
        }
        Commands::Serve {
            philosophers,
            endpoint,
        } => serve(philosophers, endpoint.endpoint())?,
        Commands::Philosopher {
            id,
            endpoint,
            pauses,
        } => philosopher(id, endpoint.endpoint(), pauses)?,
        Commands::Launch { args, endpoint } => {
            let stop = StopToken::new();
            stop_on_signals(stop.clone(), || {})?;
            Launcher::new(args.config()?, endpoint.endpoint(), cli.verbose)?.run(&stop)?;
        }
    }

    Ok(())
}

fn serve(philosophers: usize, endpoint: Endpoint) -> Result<()> {
    let server = Server::new(philosophers)?;
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let listener = TcpListener::bind((endpoint.host.as_str(), endpoint.port))
            .await
            .with_context(|| format!("could not listen on {endpoint}"))?;
        info!(philosophers, pid = std::process::id(), "coordinator started");
        server.clone().run(listener, termination()).await?;
        anyhow::Ok(())
    })?;
    server.log_stats();
    Ok(())
}

// SIGINT か SIGTERM を待つ
async fn termination() {
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
    info!("received signal, stopping coordinator");
}

fn philosopher(id: usize, endpoint: Endpoint, pauses: PauseArgs) -> Result<()> {
    let (think, eat) = pauses.bounds()?;
    let pid = std::process::id();

    let table = RemoteTable::connect((endpoint.host.as_str(), endpoint.port), id)
        .with_context(|| format!("philosopher {id} could not join {endpoint}"))?;
    let table = Arc::new(table);
    info!(id, pid, "philosopher connected to coordinator");

    let stop = StopToken::new();
    let table0 = table.clone();
    stop_on_signals(stop.clone(), move || table0.shutdown())?;

    let meals = Philosopher::new(id, table, Uniform::new(think), Uniform::new(eat)).run(&stop)?;
    info!(id, pid, meals, "philosopher process exiting");
    Ok(())
}
