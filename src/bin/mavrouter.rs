use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use mavrouter::config::{self, ConfigFile, InterfaceKind};
use mavrouter::connection::Connection;
use mavrouter::connection_pool::ConnectionPool;
use mavrouter::filter::{AcceptAll, Filter, RuleFilter};
use mavrouter::interface::{SerialInterface, UdpInterface};
use mavrouter::logging;
use mavrouter::pool::AddressPool;
use mavrouter::queue::PriorityQueue;
use mavrouter::threader::{InterfaceThreader, StartMode};
use mavrouter::transport::{StdUdpSocket, UnixSerialPort};

const DEFAULT_TTL: Duration = Duration::from_secs(120);
const TICK: Duration = Duration::from_millis(100);
const POLL: Duration = Duration::from_millis(200);

const EXIT_OK: u8 = 0;
const EXIT_USAGE: u8 = 2;
const EXIT_RUNTIME: u8 = 3;
const EXIT_SIGINT: u8 = 130;

const CONFIG_ENV_VAR: &str = "MAVROUTER_CONFIG_PATH";
const LOCAL_CONFIG: &str = "mavrouter.conf";
const SYSTEM_CONFIG: &str = "/etc/mavrouter/mavrouter.conf";

/// A MAVLink router and firewall.
#[derive(Parser, Debug)]
#[command(name = "mavrouter", version, about)]
struct Cli {
    /// Path to the configuration file. If omitted, searches
    /// ./mavrouter.conf then /etc/mavrouter/mavrouter.conf.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Increase logging verbosity. May be repeated (-vv, -vvv).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    /// Parse the configuration file, print its structure, and exit without
    /// starting the router.
    #[arg(long)]
    ast: bool,
}

/// Resolve the configuration file path: explicit `--config` flag, else the
/// `MAVROUTER_CONFIG_PATH` environment variable, else `./mavrouter.conf`,
/// else `$XDG_CONFIG_HOME/mavrouter.conf`, else `/etc/mavrouter/mavrouter.conf`.
fn find_config_path(explicit: Option<&Path>) -> Result<PathBuf, String> {
    if let Some(path) = explicit {
        return if path.exists() {
            Ok(path.to_path_buf())
        } else {
            Err(format!("configuration file not found: {}", path.display()))
        };
    }
    if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
        let path = PathBuf::from(&env_path);
        return if path.exists() {
            Ok(path)
        } else {
            Err(format!(
                "configuration file from {} not found: {}",
                CONFIG_ENV_VAR,
                path.display()
            ))
        };
    }
    if Path::new(LOCAL_CONFIG).exists() {
        return Ok(PathBuf::from(LOCAL_CONFIG));
    }
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        let path = Path::new(&xdg).join("mavrouter.conf");
        if path.exists() {
            return Ok(path);
        }
    }
    if Path::new(SYSTEM_CONFIG).exists() {
        return Ok(PathBuf::from(SYSTEM_CONFIG));
    }
    Err(format!(
        "no configuration file found (searched: ${}, ./{}, $XDG_CONFIG_HOME/mavrouter.conf, {})",
        CONFIG_ENV_VAR, LOCAL_CONFIG, SYSTEM_CONFIG
    ))
}

fn build_filter(config: &ConfigFile, name: Option<&str>) -> Result<Arc<dyn Filter>, String> {
    match name {
        Some(name) => {
            RuleFilter::from_config(config, name)
                .map(|f| Arc::new(f) as Arc<dyn Filter>)
                .map_err(|e| e.to_string())
        }
        None => Ok(Arc::new(AcceptAll)),
    }
}

fn run() -> u8 {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config_path = match find_config_path(cli.config.as_deref()) {
        Ok(path) => path,
        Err(err) => {
            log::error!("{}", err);
            return EXIT_USAGE;
        }
    };

    let source = match fs::read_to_string(&config_path) {
        Ok(text) => text,
        Err(err) => {
            log::error!("could not read {}: {}", config_path.display(), err);
            return EXIT_USAGE;
        }
    };

    let parsed = match config::parse(&source) {
        Ok(config) => config,
        Err(err) => {
            log::error!("{}: {}", config_path.display(), err);
            return EXIT_USAGE;
        }
    };

    if cli.ast {
        print!("{}", config::format_ast(&parsed));
        return EXIT_OK;
    }

    let pool = Arc::new(ConnectionPool::new());
    let mut threaders: Vec<InterfaceThreader> = Vec::new();

    for iface_def in &parsed.interfaces {
        let filter = match build_filter(&parsed, iface_def.filter.as_deref()) {
            Ok(filter) => filter,
            Err(err) => {
                log::error!("interface {:?}: {}", iface_def.name, err);
                return EXIT_USAGE;
            }
        };

        let interface: Box<dyn mavrouter::interface::Interface> = match &iface_def.kind {
            InterfaceKind::Serial { device, baud } => match UnixSerialPort::open(device, *baud) {
                Ok(port) => {
                    let connection = Arc::new(Connection::new(
                        iface_def.name.clone(),
                        filter,
                        iface_def.mirror,
                        AddressPool::new(DEFAULT_TTL),
                        PriorityQueue::unnotified(),
                    ));
                    Box::new(SerialInterface::new(Box::new(port), connection, pool.clone()))
                }
                Err(err) => {
                    log::error!("interface {:?}: {}", iface_def.name, err);
                    return EXIT_RUNTIME;
                }
            },
            InterfaceKind::Udp { bind, remote } => {
                let bind_addr: SocketAddr = SocketAddr::new(bind.address().into(), bind.port());
                match StdUdpSocket::bind(bind_addr) {
                    Ok(socket) => Box::new(UdpInterface::new(
                        Box::new(socket),
                        filter,
                        iface_def.mirror,
                        DEFAULT_TTL,
                        pool.clone(),
                        *remote,
                    )),
                    Err(err) => {
                        log::error!("interface {:?}: {}", iface_def.name, err);
                        return EXIT_RUNTIME;
                    }
                }
            }
        };

        log::info!("starting interface {:?}", iface_def.name);
        threaders.push(InterfaceThreader::new(
            iface_def.name.clone(),
            interface,
            TICK,
            StartMode::Start,
        ));
    }

    let running = Arc::new(AtomicBool::new(true));
    let sigint_running = running.clone();
    let interrupted = Arc::new(AtomicBool::new(false));
    let sigint_interrupted = interrupted.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        sigint_interrupted.store(true, Ordering::SeqCst);
        sigint_running.store(false, Ordering::SeqCst);
    }) {
        log::warn!("failed to install SIGINT handler: {}", err);
    }

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(POLL);
    }

    log::info!("shutting down");
    drop(threaders);

    if interrupted.load(Ordering::SeqCst) {
        EXIT_SIGINT
    } else {
        EXIT_OK
    }
}

fn main() -> ExitCode {
    ExitCode::from(run())
}
