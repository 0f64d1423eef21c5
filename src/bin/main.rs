use std::{
    env,
    error::Error,
    path::PathBuf,
    sync::mpsc::{self, Receiver},
    time::Duration,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hadoop_unit_fixture::{
    FixtureConfig, HadoopFixture, ServiceReadiness,
    cli::{Cli, Commands, parse_args},
    config::load_config,
    constants::LAUNCHER_NAME,
    locate::find_launcher,
    logs::BootLog,
    probe::ReadinessProber,
    properties,
};

fn main() -> Result<(), Box<dyn Error>> {
    let args = parse_args();
    init_logging(&args);

    match args.command {
        Commands::Run { config, hold } => {
            let config = build_config(&config)?;
            let interrupts = register_signal_handler()?;
            run_foreground(config, hold, interrupts)?;
        }
        Commands::Status { config, json } => {
            let config = build_config(&config)?;
            let report = probe_services(&config)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&config, &report);
            }
        }
        Commands::Logs { config, lines } => {
            let config = build_config(&config)?;
            let Some(base_dir) = &config.base_dir else {
                return Err(format!(
                    "'{}' has no base_dir; the boot log lives in a scratch directory that is removed with the fixture",
                    config.name
                )
                .into());
            };

            let log = BootLog::new(base_dir, &config.name);
            info!("Showing last {lines} lines of {}", log.path().display());
            for line in log.tail(lines)? {
                println!("{line}");
            }
        }
        Commands::Locate { config } => {
            let config = build_config(&config)?;
            match find_launcher(&config.hadoop_unit_path) {
                Some(path) => println!("{}", path.display()),
                None => {
                    return Err(format!(
                        "'{LAUNCHER_NAME}' not found on PATH or under {}",
                        config.hadoop_unit_path.display()
                    )
                    .into());
                }
            }
        }
    }

    Ok(())
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn build_config(config_path: &str) -> Result<FixtureConfig, Box<dyn Error>> {
    let path = resolve_config_path(config_path)?;
    let config = load_config(&path)?;
    Ok(config)
}

fn resolve_config_path(path: &str) -> Result<PathBuf, Box<dyn Error>> {
    let candidate = PathBuf::from(path);
    if candidate.is_absolute() {
        return Ok(candidate);
    }

    let resolved = env::current_dir()?.join(&candidate);
    Ok(resolved.canonicalize().unwrap_or(resolved))
}

/// Forwards Ctrl-C to the foreground loop so the server is stopped before exit.
fn register_signal_handler() -> Result<Receiver<()>, Box<dyn Error>> {
    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        println!("hufix is shutting down... stopping hadoop-unit");
        let _ = tx.send(());
    })?;

    Ok(rx)
}

fn run_foreground(
    config: FixtureConfig,
    hold: Option<Duration>,
    interrupts: Receiver<()>,
) -> Result<(), Box<dyn Error>> {
    let mut fixture = HadoopFixture::launch(config)?;
    let name = fixture.config().name.clone();

    println!(
        "{name} ready (PID {})",
        fixture
            .pid()
            .map(|pid| pid.to_string())
            .unwrap_or_else(|| "-".into())
    );
    for entry in fixture.readiness_report() {
        println!(
            "  {} port={} probe={}",
            entry.service,
            entry
                .port
                .map(|port| port.to_string())
                .unwrap_or_else(|| "-".into()),
            entry.probe
        );
    }
    println!("boot log: {}", fixture.bootlog_path().display());

    match hold {
        Some(hold) => {
            if interrupts.recv_timeout(hold).is_ok() {
                info!("Interrupted before hold of {hold:?} elapsed");
            }
        }
        None => {
            info!("Press Ctrl-C to stop {name}");
            if interrupts.recv().is_err() {
                warn!("Signal handler disconnected; stopping {name}");
            }
        }
    }

    fixture.stop(None)?;
    println!("{name} stopped");
    Ok(())
}

/// Applies the configured overlay in memory and probes the enabled services.
/// Nothing on disk is modified.
fn probe_services(config: &FixtureConfig) -> Result<Vec<ServiceReadiness>, Box<dyn Error>> {
    let services = config.enabled_services()?;
    let markers = config.service_log_markers()?;

    let mut defaults = properties::load(&config.default_properties_path())?;
    defaults.apply(&config.default_properties);

    let bootlog = config
        .base_dir
        .as_deref()
        .map(|dir| BootLog::new(dir, &config.name));
    let prober = ReadinessProber::new(
        &services,
        &markers,
        config.require_health_probe,
        bootlog,
    )?;

    Ok(prober.report(&defaults))
}

fn print_report(config: &FixtureConfig, report: &[ServiceReadiness]) {
    let marker = config.pid_marker_path();
    println!(
        "{} ({}) pid marker {}",
        config.name,
        config.hadoop_unit_path.display(),
        if marker.exists() { "present" } else { "absent" }
    );
    println!(
        "{:<26} {:>6} {:<10} {:<11} {:<8}",
        "SERVICE", "PORT", "LISTENING", "PROBE", "READY"
    );
    for entry in report {
        println!(
            "{:<26} {:>6} {:<10} {:<11} {:<8}",
            entry.service,
            entry
                .port
                .map(|port| port.to_string())
                .unwrap_or_else(|| "-".into()),
            entry.listening,
            entry.probe,
            entry.is_ready()
        );
    }
}
