//! packet-log-server: a durable "echo the log" TCP server
//!
//! Clients send newline-terminated packets. Each complete packet is appended
//! to a log file and the whole log is streamed back over the same connection.
//!
//! Features:
//! - One connection at a time, in arrival order
//! - Packets reassembled across reads, empty packets included
//! - Graceful shutdown on SIGINT/SIGTERM (log file removed, exit status 0)
//! - Optional daemon mode (`-d`)
//! - Configuration via CLI arguments or TOML file

mod config;
mod daemon;
mod listener;
mod logging;
mod protocol;
mod server;
mod shutdown;
mod storage;

use config::Config;
use server::Server;
use tracing::{debug, error, info};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    logging::init(&config);

    info!(
        port = config.port,
        data_file = %config.data_file.display(),
        daemon = config.daemon,
        max_packet_size = config.max_packet_size,
        "Starting packet-log-server"
    );

    let result = run(&config);
    if let Err(ref e) = result {
        error!(error = %e, "Fatal error during startup");
    }

    logging::close(&config);
    result
}

/// Set up, serve until shutdown, then clean up.
fn run(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    // Handlers go in before any socket exists.
    shutdown::install()?;

    let listener = listener::open_listener(config.port, config.backlog)?;

    // Only detach once bind/listen errors have had a chance to reach the terminal.
    if config.daemon {
        daemon::daemonize()?;
    } else {
        info!(port = config.port, "Socket opened successfully");
    }

    if let Some(ref pid_file) = config.pid_file {
        daemon::write_pid_file(pid_file)?;
    }

    let mut server = Server::new(listener, config, &shutdown::GLOBAL);
    info!(addr = %server.local_addr()?, "Server listening");

    server.run();
    debug!(state = ?server.state(), "Accept loop finished");
    server.shutdown();

    if let Some(ref pid_file) = config.pid_file {
        daemon::remove_pid_file(pid_file);
    }

    Ok(())
}
