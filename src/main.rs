// kissmux - KISS multiplexing relay
//
// Copyright (C) 2025-2026 kissmux contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later
//
// This file is part of kissmux.
//
// kissmux is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// kissmux is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with kissmux.  If not, see <https://www.gnu.org/licenses/>.
//
// VARA modems expose a single KISS-over-TCP port and accept one connection at
// a time. kissmux holds that connection and lets any number of packet clients
// share it: everything VARA sends is copied to every client, everything a
// client sends goes to VARA unchanged. Each AX.25 frame seen in either
// direction is decoded and logged as a monitor line. When VARA goes away the
// clients stay connected and the link is re-established in the background.

mod ax25;
mod config;
mod error;
mod kiss;
mod logger;
mod monitor;
mod pcap;
mod registry;
mod relay;
mod upstream;

use std::fs::File;
use std::io::Write;
use std::sync::Arc;

use config::{Config, DEFAULT_CONFIG_FILE};
use logger::{Logger, LOG_NOTICE};
use monitor::Monitor;
use pcap::PcapWriter;
use registry::ClientRegistry;
use relay::Relay;
use upstream::{ReconnectPolicy, TcpConnector, UpstreamSupervisor};

fn show_help(program_name: &str) {
    println!("kissmux - KISS multiplexing relay for VARA\n");
    println!("Usage: {} [OPTIONS]\n", program_name);
    println!("VARA Options:");
    println!("  -V, --vara-address <addr>  VARA KISS host (default: 0.0.0.0)");
    println!("  -v, --vara-port <port>     VARA KISS port (default: 8200)");
    println!("  -r, --reconnect <secs>     Reconnect interval (default: 5)");
    println!("  --reconnect-max <secs>     Back off exponentially up to this interval");
    println!("  --outage-limit <bytes>     Max undelivered bytes kept for clients (default: 65536)");
    println!("\nClient Options:");
    println!("  -I, --address <addr>       Listen address (default: 0.0.0.0)");
    println!("  -p, --port <port>          Listen port (default: 8201)");
    println!("\nMonitor Options:");
    println!("  -d, --dump                 Hex dump every KISS frame");
    println!("  --pcap <file>              Write AX.25 frames to PCAP file");
    println!("\nLogging Options:");
    println!("  -l, --logfile <file>       Log file path");
    println!("  -L, --log-level <0-9>      Log level (default: 5)");
    println!("  --no-console               Log only to file");
    println!("\nOther Options:");
    println!("  -P, --pidfile <file>       PID file path");
    println!("  -c <file>                  Config file (default: {})", DEFAULT_CONFIG_FILE);
    println!("  -q, --quiet                Quiet startup");
    println!("  -h, --help                 Show this help\n");
    println!("Config file options:");
    println!("  vara_address, vara_port, listen_address, listen_port");
    println!("  reconnect_interval, reconnect_max_interval, outage_buffer_limit");
    println!("  log_level, logfile, log_to_console, pidfile, dump, pcap_file, quiet_startup\n");
    println!("Log levels: 0=EMERG 1=ALERT 2=CRIT 3=ERROR 4=WARN 5=NOTICE 6=INFO 7=DEBUG 8=TRACE 9=VERBOSE");
}

fn write_pidfile(pidfile: &str) -> std::io::Result<()> {
    let mut file = File::create(pidfile)?;
    writeln!(file, "{}", std::process::id())?;
    Ok(())
}

fn print_banner(config: &Config) {
    println!("kissmux - KISS multiplexing relay");
    println!("=================================");
    println!("  VARA: {}:{}", config.vara_address, config.vara_port);
    println!("  Clients: {}:{}", config.listen_address, config.listen_port);
    match config.reconnect_policy() {
        ReconnectPolicy::Fixed(interval) => println!("  Reconnect: every {:?}", interval),
        ReconnectPolicy::Exponential { initial, max } => {
            println!("  Reconnect: {:?} backing off to {:?}", initial, max)
        }
    }
    println!("  Outage buffer: {} bytes", config.outage_buffer_limit);
    println!("  Frame dump: {}", if config.dump_frames { "ON" } else { "OFF" });
    println!("  Log level: {}", config.log_level);
    if let Some(ref lf) = config.logfile { println!("  Log file: {}", lf); }
    if let Some(ref pf) = config.pidfile { println!("  PID file: {}", pf); }
    if let Some(ref pcap) = config.pcap_file { println!("  PCAP file: {}", pcap); }
    println!();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|arg| arg == "-h" || arg == "--help") {
        show_help(&args[0]);
        return Ok(());
    }

    let config = Config::load(&args)?;
    if !config.quiet_startup {
        print_banner(&config);
    }

    if let Some(ref pidfile) = config.pidfile {
        write_pidfile(pidfile)?;
    }

    let logger = Arc::new(Logger::new(config.logfile.as_deref(), config.log_level, config.log_to_console)?);

    let pcap_writer = match config.pcap_file {
        Some(ref path) => Some(PcapWriter::create(path)?),
        None => None,
    };
    let monitor = Arc::new(Monitor::new(Arc::clone(&logger), config.dump_frames, pcap_writer));

    let listener = relay::bind(&config.listen_address, config.listen_port)?;
    logger.log(&format!("Server listening on {}:{}", config.listen_address, config.listen_port), LOG_NOTICE);

    let registry: Arc<ClientRegistry> = Arc::new(ClientRegistry::new());
    let supervisor = Arc::new(UpstreamSupervisor::new(
        Box::new(TcpConnector::new(&config.vara_address, config.vara_port)),
        Arc::clone(&registry),
        Arc::clone(&monitor),
        config.reconnect_policy(),
        config.outage_buffer_limit,
    ));
    supervisor.initialize();
    supervisor.spawn()?;

    let shutdown_logger = Arc::clone(&logger);
    let shutdown_supervisor = Arc::clone(&supervisor);
    ctrlc::set_handler(move || {
        shutdown_logger.log("Received SIGINT, shutting down", LOG_NOTICE);
        shutdown_supervisor.shutdown();
        std::process::exit(0);
    })?;

    let relay = Arc::new(Relay::new(registry, supervisor.handle(), monitor));
    relay.serve(listener);
    Ok(())
}
