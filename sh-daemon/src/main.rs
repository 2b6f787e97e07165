//! SensorHub Daemon (sensorhubd)
//!
//! Builds the sensor dependency graph from configuration, runs one thread
//! per sensor node and serves the control plane on a Unix domain socket.
//!
//! # Startup
//! 1. Panic hook and process hardening
//! 2. Argument parsing
//! 3. Logging (systemd journal when available, stdout otherwise)
//! 4. Configuration load and validation
//! 5. Graph construction and node threads
//! 6. Signal handling
//! 7. Control server until shutdown
//!
//! # Hardening
//! - Environment sanitization (dynamic loader variables removed)
//! - No core dumps, bounded file descriptors
//! - Restrictive umask, working directory set to /
//! - Symlink checks on the socket path

mod events;
mod server;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use sh_core::constants::paths;
use sh_core::{load_config, nonblocking_pipe, GraphBuilder, PipeSink, SensorHub};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

const VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_CONFIG_PATH: &str = "/etc/sensorhub/hub.json";
const DEFAULT_SOCKET_PATH: &str = paths::SOCKET_PATH;

/// Set once a termination signal arrives
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

// ============================================================================
// Security Hardening
// ============================================================================

fn sanitize_environment() {
    const DANGEROUS_VARS: &[&str] = &[
        "LD_PRELOAD",
        "LD_LIBRARY_PATH",
        "LD_AUDIT",
        "LD_DEBUG",
        "LD_PROFILE",
        "MALLOC_CHECK_",
        "TMPDIR",
        "IFS",
    ];

    for var in DANGEROUS_VARS {
        std::env::remove_var(var);
    }
    std::env::set_var("PATH", "/usr/sbin:/usr/bin:/sbin:/bin");
}

fn set_resource_limits() {
    set_rlimit(libc::RLIMIT_CORE, 0);
    // sensor nodes hold up to two descriptors each, plus clients
    set_rlimit(libc::RLIMIT_NOFILE, 1024);
}

fn set_rlimit(resource: libc::__rlimit_resource_t, value: u64) {
    let limit = libc::rlimit {
        rlim_cur: value as libc::rlim_t,
        rlim_max: value as libc::rlim_t,
    };
    // SAFETY: resource is a RLIMIT_* constant and limit is fully initialized.
    if unsafe { libc::setrlimit(resource, &limit) } != 0 {
        warn!("Failed to set rlimit for resource {}", resource);
    }
}

fn secure_process() {
    // SAFETY: umask only updates the process file creation mask.
    unsafe { libc::umask(0o007) };
    if std::env::set_current_dir("/").is_err() {
        warn!("Could not chdir to /");
    }
}

fn validate_socket_path(path: &str) -> Result<(), String> {
    let p = Path::new(path);

    if !p.is_absolute() {
        return Err("Socket path must be absolute".into());
    }
    if path.contains("..") || path.contains('\0') {
        return Err("Socket path contains invalid components".into());
    }
    match p.parent() {
        Some(parent) if parent.is_dir() => {}
        _ => return Err(format!("Parent directory of {} does not exist", path)),
    }
    if p.symlink_metadata()
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
    {
        return Err("Socket path is a symlink".into());
    }
    Ok(())
}

// ============================================================================
// CLI
// ============================================================================

#[derive(Debug)]
struct Options {
    config: PathBuf,
    socket: String,
    events: Option<PathBuf>,
}

enum Command {
    Run(Options),
    Help,
    Version,
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let mut opts = Options {
        config: PathBuf::from(DEFAULT_CONFIG_PATH),
        socket: DEFAULT_SOCKET_PATH.to_string(),
        events: None,
    };

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        let mut value = |flag: &str| {
            iter.next()
                .cloned()
                .ok_or_else(|| format!("{} requires a path argument", flag))
        };
        match arg.as_str() {
            "-h" | "--help" => return Ok(Command::Help),
            "-v" | "--version" => return Ok(Command::Version),
            "-c" | "--config" => opts.config = PathBuf::from(value("--config")?),
            "-s" | "--socket" => opts.socket = value("--socket")?,
            "-e" | "--events" => opts.events = Some(PathBuf::from(value("--events")?)),
            other => return Err(format!("Unknown argument: {}", other)),
        }
    }
    Ok(Command::Run(opts))
}

fn print_help() {
    eprintln!("sensorhubd {} - IIO sensor hub daemon", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    sensorhubd [OPTIONS]");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -c, --config PATH   Configuration file (default {})", DEFAULT_CONFIG_PATH);
    eprintln!("    -s, --socket PATH   Control socket (default {})", DEFAULT_SOCKET_PATH);
    eprintln!("    -e, --events PATH   Mirror raw event records to an existing FIFO");
    eprintln!("    -v, --version       Print version");
    eprintln!("    -h, --help          Print this help");
    eprintln!();
    eprintln!("ENVIRONMENT:");
    eprintln!("    SENSORHUB_LOG       Log filter (trace, debug, info, warn, error)");
}

// ============================================================================
// Logging
// ============================================================================

/// Returns true when logging goes to the journal
fn init_logging(filter: &str) -> bool {
    if Path::new("/run/systemd/journal/socket").exists() {
        match tracing_journald::layer() {
            Ok(journald) => {
                use tracing_subscriber::prelude::*;
                tracing_subscriber::registry()
                    .with(journald)
                    .with(tracing_subscriber::EnvFilter::new(filter))
                    .init();
                return true;
            }
            Err(e) => eprintln!("Failed to create journald layer: {}, using stdout", e),
        }
    }

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(filter)
        .init();
    false
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // PHASE 0: panics in node threads must reach the log
    std::panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        eprintln!("PANIC at {}: {}", location, message);
    }));

    sanitize_environment();
    set_resource_limits();

    // PHASE 1: arguments
    let args: Vec<String> = std::env::args().collect();
    let opts = match parse_args(&args) {
        Ok(Command::Run(opts)) => opts,
        Ok(Command::Help) => {
            print_help();
            return Ok(());
        }
        Ok(Command::Version) => {
            println!("sensorhubd {}", VERSION);
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    // PHASE 2: logging
    let log_filter = std::env::var("SENSORHUB_LOG").unwrap_or_else(|_| "info".to_string());
    let journald = init_logging(&log_filter);
    info!("STARTUP: sensorhubd {} starting", VERSION);
    info!("STARTUP: Logging to {}", if journald { "systemd journal" } else { "stdout" });

    if let Err(e) = validate_socket_path(&opts.socket) {
        error!("Invalid socket path: {}", e);
        std::process::exit(1);
    }

    // PHASE 3: configuration
    let config = load_config(&opts.config)
        .with_context(|| format!("loading {}", opts.config.display()))?;
    info!(
        "STARTUP: {} devices, {} virtual sensors configured",
        config.devices.len(),
        config.virtual_sensors.len()
    );
    secure_process();

    // PHASE 4: graph and node threads
    let (pipe_rx, pipe_tx) = nonblocking_pipe().context("creating event pipe")?;
    let graph = GraphBuilder::new(&config, Arc::new(PipeSink::new(pipe_tx))).build();
    if graph.is_empty() {
        warn!("No sensors could be built; serving an empty sensor list");
    }
    for info in graph.sensor_list() {
        debug!(handle = info.handle, name = %info.name, kind = %info.string_type, "Sensor available");
    }

    let hub = Arc::new(SensorHub::new(graph));
    hub.start().context("starting sensor threads")?;

    let (event_tx, _) = broadcast::channel(events::BROADCAST_CAPACITY);
    let mirror = match opts.events.as_deref() {
        Some(path) => match events::open_mirror(path) {
            Ok(file) => {
                info!("STARTUP: Mirroring events to {}", path.display());
                Some(file)
            }
            Err(e) => {
                warn!("Cannot open event mirror {}: {}", path.display(), e);
                None
            }
        },
        None => None,
    };
    let reader_stop = Arc::new(AtomicBool::new(false));
    let reader = events::spawn_reader(pipe_rx, event_tx.clone(), mirror, Arc::clone(&reader_stop))
        .context("starting event reader")?;

    // PHASE 5: signals
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        info!("SIGNAL: Received SIGINT/SIGTERM - initiating shutdown");
        SHUTDOWN.store(true, Ordering::SeqCst);
        let _ = shutdown_tx.send(true);
    }) {
        warn!("Failed to set signal handler: {}", e);
    }

    // PHASE 6: control server
    let ctx = server::ServerContext {
        hub: Arc::clone(&hub),
        events: event_tx,
    };
    let result = server::run_server(&opts.socket, ctx, shutdown_rx).await;

    // PHASE 7: teardown
    hub.stop();
    reader_stop.store(true, Ordering::Release);
    if reader.join().is_err() {
        error!("Event reader panicked");
    }
    info!(
        "SHUTDOWN: sensorhubd stopped{}",
        if SHUTDOWN.load(Ordering::SeqCst) { " on signal" } else { "" }
    );

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("sensorhubd")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_defaults() {
        let Ok(Command::Run(opts)) = parse_args(&args(&[])) else {
            panic!("expected run");
        };
        assert_eq!(opts.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert_eq!(opts.socket, DEFAULT_SOCKET_PATH);
        assert!(opts.events.is_none());
    }

    #[test]
    fn test_parse_paths() {
        let Ok(Command::Run(opts)) = parse_args(&args(&[
            "--config", "/tmp/hub.json", "-s", "/tmp/hub.sock", "--events", "/tmp/ev",
        ])) else {
            panic!("expected run");
        };
        assert_eq!(opts.config, PathBuf::from("/tmp/hub.json"));
        assert_eq!(opts.socket, "/tmp/hub.sock");
        assert_eq!(opts.events, Some(PathBuf::from("/tmp/ev")));
    }

    #[test]
    fn test_parse_errors_and_flags() {
        assert!(parse_args(&args(&["--socket"])).is_err());
        assert!(parse_args(&args(&["--bogus"])).is_err());
        assert!(matches!(parse_args(&args(&["-h"])), Ok(Command::Help)));
        assert!(matches!(parse_args(&args(&["--version"])), Ok(Command::Version)));
    }

    #[test]
    fn test_socket_path_validation() {
        assert!(validate_socket_path("relative.sock").is_err());
        assert!(validate_socket_path("/tmp/../etc/x.sock").is_err());
        assert!(validate_socket_path("/nonexistent-dir/x.sock").is_err());

        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("hub.sock");
        assert!(validate_socket_path(good.to_str().unwrap()).is_ok());

        let link = dir.path().join("link.sock");
        std::os::unix::fs::symlink(&good, &link).unwrap();
        assert!(validate_socket_path(link.to_str().unwrap()).is_err());
    }
}
