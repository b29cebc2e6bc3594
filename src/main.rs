//! hotkey-watch: register global hotkeys and print each trigger.
//!
//! Registers F9 and quits on F10 unless told otherwise. Hotkeys are given
//! as `MODS,KEY` using the numeric codes of the C ABI, e.g. `1,52` for
//! Alt+Space.

use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use system_hotkey::{Config, Context, Hotkey, Key};

#[derive(Parser, Debug)]
#[command(name = "hotkey-watch", version, about = "Print global hotkey triggers")]
struct Cli {
    /// Hotkey to watch, as MODS,KEY (repeatable)
    #[arg(long = "hotkey", value_name = "MODS,KEY", value_parser = parse_hotkey)]
    hotkeys: Vec<Hotkey>,

    /// Hotkey that exits the watcher
    #[arg(long, value_name = "MODS,KEY", value_parser = parse_hotkey,
          default_value = "0,45")]
    quit: Hotkey,

    /// Poll interval in milliseconds
    #[arg(long, default_value_t = 10)]
    interval_ms: u64,

    /// Print one JSON object per trigger
    #[arg(long)]
    json: bool,

    /// JSON config file (defaults to SYSTEM_HOTKEY_* variables)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Serialize)]
struct Trigger {
    modifiers: u32,
    key: u32,
    label: String,
}

impl From<Hotkey> for Trigger {
    fn from(hotkey: Hotkey) -> Self {
        let (modifiers, key) = hotkey.to_raw();
        Self {
            modifiers,
            key,
            label: hotkey.to_string(),
        }
    }
}

fn parse_hotkey(s: &str) -> Result<Hotkey, String> {
    let (mods, key) = s
        .split_once(',')
        .ok_or_else(|| format!("expected MODS,KEY, got {s:?}"))?;
    let mods: u32 = mods
        .trim()
        .parse()
        .map_err(|_| format!("invalid modifier mask {mods:?}"))?;
    let key: u32 = key
        .trim()
        .parse()
        .map_err(|_| format!("invalid key code {key:?}"))?;
    Hotkey::from_raw(mods, key).map_err(|e| e.to_string())
}

fn load_config(path: Option<&PathBuf>) -> Result<Config, system_hotkey::ConfigError> {
    match path {
        Some(path) => Config::load(path),
        None => Config::from_env(),
    }
}

fn print_trigger(hotkey: Hotkey, json: bool) {
    if !json {
        println!("Triggered: {hotkey}");
        return;
    }
    match serde_json::to_string(&Trigger::from(hotkey)) {
        Ok(line) => println!("{line}"),
        Err(e) => tracing::error!(error = %e, "failed to encode trigger"),
    }
}

/// Poll `ctx` every `period` until the quit hotkey fires or `shutdown`
/// resolves.
async fn watch<F>(ctx: &Context, quit: Hotkey, json: bool, period: Duration, shutdown: F) -> ExitCode
where
    F: Future<Output = std::io::Result<()>>,
{
    // Pinned once so a signal between ticks is not lost.
    tokio::pin!(shutdown);
    let mut interval = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let triggered = match ctx.poll() {
                    Ok(triggered) => triggered,
                    Err(e) => {
                        tracing::error!(error = %e, "poll failed");
                        return ExitCode::FAILURE;
                    }
                };
                let mut quit_pressed = false;
                for hotkey in triggered {
                    print_trigger(hotkey, json);
                    quit_pressed |= hotkey == quit;
                }
                if quit_pressed {
                    tracing::info!(%quit, "quit hotkey pressed");
                    return ExitCode::SUCCESS;
                }
            }
            result = &mut shutdown => {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "signal handler failed");
                }
                tracing::info!("interrupted");
                return ExitCode::SUCCESS;
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut cli = Cli::parse();
    if cli.hotkeys.is_empty() {
        cli.hotkeys.push(Hotkey::bare(Key::F9));
    }

    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let ctx = match Context::with_config(config) {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::error!(error = %e, "failed to initialise hotkey context");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(adapter = ctx.adapter_name(), "hotkey context ready");

    let mut watched = 0;
    for &hotkey in cli.hotkeys.iter().chain(std::iter::once(&cli.quit)) {
        match ctx.register(hotkey) {
            Ok(()) => {
                watched += 1;
                tracing::info!(%hotkey, "registered");
            }
            Err(e) => tracing::warn!(%hotkey, error = %e, "failed to register"),
        }
    }
    if !ctx.is_registered(cli.quit) {
        tracing::warn!(quit = %cli.quit, "quit hotkey unavailable; use Ctrl-C to exit");
    }
    if watched == 0 {
        tracing::error!("no hotkey could be registered");
        ctx.shutdown();
        return ExitCode::FAILURE;
    }

    let period = Duration::from_millis(cli.interval_ms.max(1));
    let status = watch(&ctx, cli.quit, cli.json, period, tokio::signal::ctrl_c()).await;

    let stats = ctx.stats();
    if stats.dropped > 0 {
        tracing::warn!(dropped = stats.dropped, "triggers were discarded on overflow");
    }
    ctx.shutdown();
    status
}
