use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kiosk_bridge::print::PaperSize;
use kiosk_bridge::session::{FileTokenSource, SessionSignal, TokenWatcher};
use kiosk_bridge::{App, ChannelRegistry, Config};

/// Kiosk Bridge - host/UI control plane for the point-of-sale shell
#[derive(Parser)]
#[command(name = "kiosk-bridge", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/kiosk-bridge/config.toml)
    #[arg(short, long, env = "KIOSK_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane until the window closes or Ctrl-C
    Run,
    /// Print an HTML receipt through the bridge
    Print {
        /// HTML file, or `-` for stdin
        input: PathBuf,
        /// Target printer (system default when omitted)
        #[arg(short, long)]
        device: Option<String>,
        /// Number of copies
        #[arg(short = 'n', long)]
        copies: Option<u16>,
        /// Paper preset: thermal80, thermal58, a4, letter
        #[arg(long)]
        paper: Option<PaperSize>,
    },
    /// Run one update check and stream updater events
    CheckUpdate {
        /// Feed URL serving latest.json
        #[arg(long, env = "KIOSK_UPDATE_FEED_URL")]
        feed: Option<String>,
    },
    /// Watch a token file and report session expiry
    WatchToken {
        /// File holding the bearer token
        file: PathBuf,
    },
    /// Show the channel allowlists and rate limits
    Channels,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,kiosk_bridge=info",
        1 => "info,kiosk_bridge=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => cmd_run(&config).await,
        Command::Print {
            input,
            device,
            copies,
            paper,
        } => cmd_print(config, &input, device, copies, paper).await,
        Command::CheckUpdate { feed } => cmd_check_update(config, feed).await,
        Command::WatchToken { file } => cmd_watch_token(&config, file).await,
        Command::Channels => cmd_channels(&config),
    }
}

async fn cmd_run(config: &Config) -> anyhow::Result<()> {
    let app = App::launch(config)?;
    if let Some(watcher) = &app.watcher {
        watcher.start_watching().await;
    }

    let closed = app.shell.closed();
    tokio::select! {
        () = closed.cancelled() => tracing::info!("window closed, shutting down"),
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("interrupted, shutting down");
        }
    }

    app.shutdown().await;
    Ok(())
}

async fn cmd_print(
    mut config: Config,
    input: &Path,
    device: Option<String>,
    copies: Option<u16>,
    paper: Option<PaperSize>,
) -> anyhow::Result<()> {
    let html = if input == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(input)?
    };

    let options = &mut config.print.options;
    if device.is_some() {
        options.device_name = device;
    }
    if let Some(copies) = copies {
        options.copies = copies.max(1);
    }
    if let Some(paper) = paper {
        options.paper = paper;
    }
    config.update.enabled = false;

    let app = App::launch(&config)?;
    let result = app.bridge.print_receipt(&html).await;
    app.shutdown().await;

    let response = result?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    if !response.success {
        anyhow::bail!(response.error.unwrap_or(response.message));
    }
    Ok(())
}

async fn cmd_check_update(mut config: Config, feed: Option<String>) -> anyhow::Result<()> {
    if feed.is_some() {
        config.update.feed_url = feed;
    }
    if config.update.feed_url.is_none() {
        anyhow::bail!("no update feed configured (use --feed or KIOSK_UPDATE_FEED_URL)");
    }
    config.update.enabled = true;
    config.update.auto_download = false;

    let app = App::launch(&config)?;
    let _messages = app.bridge.on_updater_message(|m| println!("{m}"));
    let _errors = app.bridge.on_updater_error(|m| eprintln!("{m}"));

    let result = app.bridge.check_for_updates().await;
    app.shutdown().await;

    let response = result?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn cmd_watch_token(config: &Config, file: PathBuf) -> anyhow::Result<()> {
    let watcher = TokenWatcher::new(
        std::sync::Arc::new(FileTokenSource::new(file)),
        config.session.clone(),
    );
    let mut signals = watcher.subscribe();

    let status = watcher.token_info().await;
    println!("{}", serde_json::to_string_pretty(&status)?);

    watcher.start_watching().await;
    while let Ok(signal) = signals.try_recv() {
        if print_signal(&signal)? {
            return Ok(());
        }
    }

    while watcher.is_watching() {
        tokio::select! {
            signal = signals.recv() => {
                let Ok(signal) = signal else { break };
                if print_signal(&signal)? {
                    break;
                }
            }
            result = tokio::signal::ctrl_c() => {
                result?;
                break;
            }
            () = tokio::time::sleep(config.session.poll_interval) => {}
        }
    }

    tracing::info!("session watch ended");
    watcher.stop_watching();
    Ok(())
}

/// Print a session signal; true once the session has expired
fn print_signal(signal: &SessionSignal) -> anyhow::Result<bool> {
    println!("{}", serde_json::to_string(signal)?);
    Ok(matches!(signal, SessionSignal::Expired { .. }))
}

fn cmd_channels(config: &Config) -> anyhow::Result<()> {
    let registry = ChannelRegistry::default();
    let info = serde_json::json!({
        "allowedChannels": registry.allowlists(),
        "rateLimits": {
            "maxCalls": config.bridge.rate_limit,
            "windowMs": u64::try_from(config.bridge.rate_window.as_millis()).unwrap_or(u64::MAX),
        },
    });
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}
