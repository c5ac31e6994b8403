//! Script Host
//!
//! Runs a script function on a named thread and prints its return value.

use std::future::Future;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use script_types::Value;
use scripthost::{HostConfig, HostContext};

/// Script host
#[derive(Parser, Debug)]
#[command(name = "scripthost")]
#[command(about = "Run scripts with messaging and network access", long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a script function and wait for it to finish
    Run {
        /// Script id, resolved against the script directories
        script: String,

        /// Thread name; defaults to the script id
        #[arg(short, long)]
        thread: Option<String>,

        /// Function to call
        #[arg(short, long, default_value = "main")]
        function: String,

        /// Arguments, parsed as JSON where possible
        args: Vec<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("scripthost=info,script_runtime=info,script_js=info,script_net=info")
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config =
        HostConfig::load(args.config.as_deref()).context("failed to load configuration")?;

    match args.command {
        Command::Run {
            script,
            thread,
            function,
            args,
        } => run(&config, &script, thread.as_deref(), &function, &args),
    }
}

fn run(
    config: &HostConfig,
    script: &str,
    thread: Option<&str>,
    function: &str,
    args: &[String],
) -> Result<()> {
    let ctx = HostContext::new(config)?;
    let thread = thread.unwrap_or(script);
    let params: Vec<Value> = args.iter().map(|a| parse_arg(a)).collect();

    info!(thread, script, function, "Starting script");
    let execution = ctx
        .run_script(thread, script, function, params)
        .with_context(|| format!("failed to start {}", script))?;

    let signals = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start signal runtime")?;
    signals.block_on(async {
        let waiting = execution.clone();
        let finished = tokio::task::spawn_blocking(move || waiting.join());
        join_or_interrupt(finished, tokio::signal::ctrl_c(), || ctx.stop_all()).await
    })?;

    if let Some(failure) = execution.failure() {
        anyhow::bail!("{} failed: {}", thread, failure);
    }
    if let Some(value) = execution.return_value().filter(|v| !v.is_void()) {
        println!("{}", value);
    }
    Ok(())
}

/// Wait for `finished`; if `interrupt` resolves first, call `stop` and keep
/// waiting
async fn join_or_interrupt<I>(
    mut finished: tokio::task::JoinHandle<()>,
    interrupt: I,
    stop: impl FnOnce(),
) -> Result<()>
where
    I: Future<Output = std::io::Result<()>>,
{
    let joined = tokio::select! {
        joined = &mut finished => joined,
        result = interrupt => {
            match result {
                Ok(()) => info!("Interrupted, stopping all scripts"),
                Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
            }
            stop();
            finished.await
        }
    };
    joined.context("script join task failed")
}

fn parse_arg(raw: &str) -> Value {
    serde_json::from_str::<serde_json::Value>(raw)
        .map(Value::from)
        .unwrap_or_else(|_| Value::from(raw))
}
