use anyhow::{Context, Result};
use kyutai_stt_loadgen::{CancellationToken, Engine};
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;

mod config;
mod logging;
mod metrics;
mod report;
mod server;

use config::BenchConfig;

#[derive(clap::Parser, Debug)]
#[clap(name = "stt-bench", about = "Concurrent load generator for streaming STT websockets")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Args)]
struct LogArgs {
    #[clap(short = 'l', long = "log", default_value = "info")]
    log_level: String,

    #[clap(long)]
    silent: bool,

    /// Use JSON structured logging
    #[clap(long)]
    json: bool,

    /// Console log style: compact, pretty, or verbose
    #[clap(long, default_value = "pretty")]
    log_style: String,
}

#[derive(Debug, clap::Args)]
struct ServeArgs {
    #[clap(flatten)]
    log: LogArgs,

    #[clap(long)]
    config: Option<PathBuf>,

    #[clap(short = 'a', long = "addr", default_value = "0.0.0.0")]
    addr: String,

    #[clap(short = 'p', long = "port", default_value = "8001")]
    port: u16,

    /// Audio replayed to every session, overrides the config file.
    #[clap(short = 'f', long)]
    audio_file: Option<String>,

    /// Write per-session response and error records.
    #[clap(short = 'w', long)]
    write_results: Option<bool>,
}

#[derive(Debug, clap::Args)]
struct RunArgs {
    #[clap(flatten)]
    log: LogArgs,

    #[clap(long)]
    config: Option<PathBuf>,

    /// Websocket endpoint, defaults to `default_url` from the config.
    #[clap(long)]
    url: Option<String>,

    #[clap(short = 'n', long, default_value_t = 1)]
    count: usize,

    #[clap(short = 'f', long)]
    audio_file: Option<String>,

    #[clap(short = 'w', long)]
    write_results: Option<bool>,

    /// CSV destination, stdout when omitted.
    #[clap(short = 'o', long)]
    output: Option<PathBuf>,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    Validate { configs: Vec<PathBuf> },
    Serve(ServeArgs),
    Run(RunArgs),
}

fn load_config(
    path: Option<&std::path::Path>,
    audio_file: Option<String>,
    write_results: Option<bool>,
) -> Result<BenchConfig> {
    let mut config = BenchConfig::load_or_default(path)?;
    if let Some(audio_file) = audio_file {
        config.audio_file = audio_file;
    }
    if let Some(write_results) = write_results {
        config.write_results = write_results;
    }
    Ok(config)
}

fn init_logging(args: &LogArgs, config: &BenchConfig) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let style = logging::LogStyle::from_str(&args.log_style).unwrap_or_else(|e| {
        eprintln!("Warning: {e}, using pretty");
        logging::LogStyle::Pretty
    });
    logging::init(logging::LogConfig {
        log_dir: config.log_dir.clone(),
        instance_name: config.instance_name.clone(),
        log_level: args.log_level.clone(),
        silent: args.silent,
        json: args.json,
        style,
    })
}

async fn run_once(args: RunArgs, config: BenchConfig) -> Result<()> {
    let target = args.url.unwrap_or_else(|| config.default_url.clone());

    let mut engine = Engine::new(config.engine.clone());
    if let Some(diagnostics) = config.diagnostics() {
        diagnostics.prepare().await.context("resetting diagnostics directories")?;
        engine = engine.with_diagnostics(diagnostics);
    }

    let audio = config.audio_path();
    let source = tokio::fs::File::open(&audio)
        .await
        .with_context(|| format!("opening audio file {}", audio.display()))?;

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl-c received, cancelling run");
            on_ctrl_c.cancel();
        }
    });

    let outcome = engine.run(&target, args.count, source, cancel).await?;
    tracing::info!(
        requested = outcome.requested,
        established = outcome.established(),
        failed = outcome.failed(),
        wall_time_s = outcome.wall_time.as_secs_f64(),
        "run complete"
    );

    let csv = report::render_csv(&outcome);
    match args.output {
        Some(path) => {
            tokio::fs::write(&path, &csv)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            tracing::info!(path = %path.display(), "report written");
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(csv.as_bytes())?;
            stdout.flush()?;
        }
    }
    Ok(())
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    // Background tasks can keep the runtime alive after main_ returns an
    // error, so exit explicitly.
    if let Err(err) = main_().await {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

async fn main_() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = <Args as clap::Parser>::parse();
    match args.command {
        Command::Validate { configs } => {
            tracing_subscriber::fmt().with_writer(std::io::stderr).init();
            for config in configs.iter() {
                let _ = BenchConfig::load(config)?;
                tracing::info!(?config, "loaded successfully")
            }
        }
        Command::Serve(args) => {
            let config =
                load_config(args.config.as_deref(), args.audio_file.clone(), args.write_results)?;
            let _guard = init_logging(&args.log, &config)?;
            tracing::info!(
                audio_file = %config.audio_file,
                write_results = config.write_results,
                default_url = %config.default_url,
                "starting stt-bench server"
            );

            let ip = std::net::IpAddr::from_str(&args.addr)
                .with_context(|| format!("invalid listen address {}", args.addr))?;
            server::serve(config, std::net::SocketAddr::from((ip, args.port))).await?
        }
        Command::Run(args) => {
            let config =
                load_config(args.config.as_deref(), args.audio_file.clone(), args.write_results)?;
            let _guard = init_logging(&args.log, &config)?;
            run_once(args, config).await?
        }
    }
    Ok(())
}
