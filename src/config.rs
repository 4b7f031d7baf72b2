// kissmux - configuration
//
// Copyright (C) 2025-2026 kissmux contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::time::Duration;

use crate::error::{RelayError, Result};
use crate::upstream::ReconnectPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "kissmux.cfg";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub vara_address: String,
    pub vara_port: u16,
    pub listen_address: String,
    pub listen_port: u16,
    pub reconnect_interval: u64,
    pub reconnect_max_interval: Option<u64>,
    pub outage_buffer_limit: usize,
    pub log_level: u8,
    pub logfile: Option<String>,
    pub log_to_console: bool,
    pub pidfile: Option<String>,
    pub dump_frames: bool,
    pub pcap_file: Option<String>,
    pub quiet_startup: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            vara_address: "0.0.0.0".to_string(),
            vara_port: 8200,
            listen_address: "0.0.0.0".to_string(),
            listen_port: 8201,
            reconnect_interval: 5,
            reconnect_max_interval: None,
            outage_buffer_limit: 64 * 1024,
            log_level: 5,
            logfile: None,
            log_to_console: true,
            pidfile: None,
            dump_frames: false,
            pcap_file: None,
            quiet_startup: false,
        }
    }
}

impl Config {
    /// Loads the config file named by `-c`, or `kissmux.cfg` if present.
    /// Only an explicitly named file has to exist.
    pub fn load(args: &[String]) -> Result<Self> {
        Config::load_with_default(args, DEFAULT_CONFIG_FILE)
    }

    fn load_with_default(args: &[String], default_path: &str) -> Result<Self> {
        let explicit = args.iter()
            .position(|arg| arg == "-c")
            .and_then(|i| args.get(i + 1));

        let mut config = match explicit {
            Some(path) => Config::from_file(path)?,
            None => match fs::read_to_string(default_path) {
                Ok(contents) => Config::parse(&contents)?,
                Err(e) if e.kind() == ErrorKind::NotFound => Config::default(),
                Err(e) => return Err(RelayError::Config(format!(
                    "Failed to read config file '{}': {}", default_path, e
                ))),
            },
        };
        config.apply_cli_overrides(args)?;
        Ok(config)
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| RelayError::Config(format!("Failed to read config file '{}': {}", path, e)))?;
        Config::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let mut config_map = HashMap::new();

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let mut value = value.trim();
                if value.starts_with('"') && value.ends_with('"') && value.len() >= 2 {
                    value = &value[1..value.len()-1];
                }
                config_map.insert(key.to_string(), value.to_string());
            }
        }

        let mut config = Config::default();

        if let Some(v) = config_map.get("vara_address") { config.vara_address = v.clone(); }
        if let Some(v) = config_map.get("vara_port") { config.vara_port = parse_number("vara_port", v)?; }
        if let Some(v) = config_map.get("listen_address") { config.listen_address = v.clone(); }
        if let Some(v) = config_map.get("listen_port") { config.listen_port = parse_number("listen_port", v)?; }
        if let Some(v) = config_map.get("reconnect_interval") {
            config.reconnect_interval = parse_number("reconnect_interval", v)?;
        }
        if let Some(v) = config_map.get("reconnect_max_interval") {
            config.reconnect_max_interval = Some(parse_number("reconnect_max_interval", v)?);
        }
        if let Some(v) = config_map.get("outage_buffer_limit") {
            config.outage_buffer_limit = parse_number("outage_buffer_limit", v)?;
        }
        if let Some(v) = config_map.get("log_level") {
            config.log_level = parse_number::<u8>("log_level", v)?.min(9);
        }
        if let Some(v) = config_map.get("log_to_console") { config.log_to_console = parse_bool("log_to_console", v)?; }
        if let Some(v) = config_map.get("dump") { config.dump_frames = parse_bool("dump", v)?; }
        if let Some(v) = config_map.get("quiet_startup") { config.quiet_startup = parse_bool("quiet_startup", v)?; }

        config.logfile = config_map.get("logfile").cloned();
        config.pidfile = config_map.get("pidfile").cloned();
        config.pcap_file = config_map.get("pcap_file").cloned();

        Ok(config)
    }

    pub fn apply_cli_overrides(&mut self, args: &[String]) -> Result<()> {
        let mut i = 0;
        while i < args.len() {
            let arg = args[i].as_str();
            let value = args.get(i + 1).map(|s| s.as_str());
            let mut takes_value = true;
            match (arg, value) {
                ("-d" | "--dump", _) => { self.dump_frames = true; takes_value = false; }
                ("-q" | "--quiet", _) => { self.quiet_startup = true; takes_value = false; }
                ("--no-console", _) => { self.log_to_console = false; takes_value = false; }
                ("-V" | "--vara-address", Some(v)) => self.vara_address = v.to_string(),
                ("-v" | "--vara-port", Some(v)) => self.vara_port = parse_number(arg, v)?,
                ("-I" | "--address", Some(v)) => self.listen_address = v.to_string(),
                ("-p" | "--port", Some(v)) => self.listen_port = parse_number(arg, v)?,
                ("-r" | "--reconnect", Some(v)) => self.reconnect_interval = parse_number(arg, v)?,
                ("--reconnect-max", Some(v)) => self.reconnect_max_interval = Some(parse_number(arg, v)?),
                ("--outage-limit", Some(v)) => self.outage_buffer_limit = parse_number(arg, v)?,
                ("-L" | "--log-level", Some(v)) => self.log_level = parse_number::<u8>(arg, v)?.min(9),
                ("-l" | "--logfile", Some(v)) => self.logfile = Some(v.to_string()),
                ("-P" | "--pidfile", Some(v)) => self.pidfile = Some(v.to_string()),
                ("--pcap", Some(v)) => self.pcap_file = Some(v.to_string()),
                ("-c", Some(_)) => {}
                _ => takes_value = false,
            }
            i += if takes_value { 2 } else { 1 };
        }
        Ok(())
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        let initial = Duration::from_secs(self.reconnect_interval);
        match self.reconnect_max_interval {
            Some(max) if max > self.reconnect_interval => ReconnectPolicy::Exponential {
                initial,
                max: Duration::from_secs(max),
            },
            _ => ReconnectPolicy::Fixed(initial),
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse()
        .map_err(|_| RelayError::Config(format!("Invalid value for {}: '{}'", key, value)))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(RelayError::Config(format!("Invalid boolean for {}: '{}'", key, value))),
    }
}

// Example configuration file:
//
// # VARA modem KISS port
// vara_address=127.0.0.1
// vara_port=8200
//
// # Where clients connect
// listen_address=0.0.0.0
// listen_port=8201
//
// reconnect_interval=5
// log_level=5
// logfile=/var/log/kissmux.log
