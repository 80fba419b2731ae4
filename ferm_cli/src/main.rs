mod cli;
mod error_fmt;
mod run;
mod state;

use clap::Parser;
use cli::{Cli, Commands, DEFAULT_CONFIG, FILE_GUARD, JSON_MODE};
use error_fmt::{exit_code_for_error, format_error_json, humanize};
use eyre::WrapErr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    if let Err(e) = real_main(cli) {
        let json = JSON_MODE.get().copied().unwrap_or(false);
        if json {
            eprintln!("{}", format_error_json(&e));
        } else {
            eprintln!("{}", humanize(&e));
        }
        std::process::exit(exit_code_for_error(&e));
    }
}

fn real_main(cli: Cli) -> eyre::Result<()> {
    // color-eyre only formats panics and reports here; ignore a second install
    let _ = color_eyre::install();

    let cfg = load_config(cli.config.as_deref())?;
    init_tracing(cli.json, &cli.log_level, &cfg.logging)?;

    match cli.cmd {
        Commands::Run {
            seconds,
            setpoint,
            ambient,
            speedup,
        } => {
            let shutdown = Arc::new(AtomicBool::new(false));
            {
                let flag = shutdown.clone();
                ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
                    .wrap_err("installing Ctrl-C handler")?;
            }
            let summary =
                run::run_chamber(&cfg, seconds, setpoint, ambient, speedup, &shutdown, cli.json)?;
            summary.print(cli.json);
            Ok(())
        }
        Commands::SelfCheck => run::self_check(&cfg, cli.json),
        Commands::State => state::show_state(&cfg, cli.json),
    }
}

fn load_config(path: Option<&Path>) -> eyre::Result<ferm_config::Config> {
    match path {
        Some(p) => ferm_config::load_file(p),
        None if Path::new(DEFAULT_CONFIG).exists() => {
            ferm_config::load_file(Path::new(DEFAULT_CONFIG))
        }
        None => Ok(ferm_config::Config::default()),
    }
}

fn init_tracing(json: bool, level: &str, logging: &ferm_config::Logging) -> eyre::Result<()> {
    let console_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .wrap_err_with(|| format!("invalid log level '{level}'"))?;
    let console = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(console_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(console_filter)
            .boxed()
    };

    let file = match logging.file.as_deref() {
        Some(path) => {
            use tracing_appender::rolling::{RollingFileAppender, Rotation};

            let p = Path::new(path);
            let dir = p.parent().filter(|d| !d.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let prefix = p
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("ferm.log");
            let rotation = match logging.rotation.as_deref() {
                Some("daily") => Rotation::DAILY,
                Some("hourly") => Rotation::HOURLY,
                _ => Rotation::NEVER,
            };
            let appender = RollingFileAppender::builder()
                .rotation(rotation)
                .filename_prefix(prefix)
                .build(dir)
                .wrap_err_with(|| format!("opening log file {path}"))?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            let file_filter = EnvFilter::try_new(logging.level.as_deref().unwrap_or("info"))
                .wrap_err("invalid logging.level")?;
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(writer)
                    .with_filter(file_filter)
                    .boxed(),
            )
        }
        None => None,
    };

    // a subscriber may already be set (tests); keep the existing one
    let _ = tracing_subscriber::registry().with(console).with(file).try_init();
    Ok(())
}
