// kissmux - logging
//
// Copyright (C) 2025-2026 kissmux contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};

pub const LOG_ERROR: u8 = 3;
pub const LOG_WARN: u8 = 4;
pub const LOG_NOTICE: u8 = 5;
pub const LOG_INFO: u8 = 6;
pub const LOG_DEBUG: u8 = 7;

fn level_name(level: u8) -> &'static str {
    match level {
        0 => "EMERG", 1 => "ALERT", 2 => "CRIT", 3 => "ERROR", 4 => "WARN",
        5 => "NOTICE", 6 => "INFO", 7 => "DEBUG", 8 => "TRACE", 9 => "VERBOSE",
        _ => "UNKNOWN",
    }
}

/// Levelled logger writing to the console and/or an append-mode file.
pub struct Logger {
    file: Option<Arc<Mutex<File>>>,
    log_level: u8,
    log_to_console: bool,
}

impl Logger {
    pub fn new(logfile: Option<&str>, log_level: u8, log_to_console: bool) -> std::io::Result<Self> {
        let file = if let Some(path) = logfile {
            let f = OpenOptions::new().create(true).append(true).open(path)?;
            Some(Arc::new(Mutex::new(f)))
        } else { None };
        Ok(Logger { file, log_level: log_level.min(9), log_to_console })
    }

    /// Logger that discards everything
    pub fn silent() -> Self {
        Logger { file: None, log_level: 0, log_to_console: false }
    }

    pub fn enabled(&self, level: u8) -> bool {
        level <= self.log_level
    }

    pub fn log(&self, message: &str, level: u8) {
        if !self.enabled(level) { return; }
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let log_line = format!("[{}] [{}] {}\n", timestamp, level_name(level), message);
        self.emit(&log_line);
    }

    /// Writes a decoded packet line. Packet lines are the relay's primary
    /// output and are not subject to the level filter.
    pub fn packet(&self, decoded_at: DateTime<Local>, line: &str) {
        self.emit(&format_packet_line(decoded_at, line));
    }

    fn emit(&self, line: &str) {
        if self.log_to_console { print!("{}", line); }
        if let Some(ref file) = self.file {
            if let Ok(mut f) = file.lock() {
                let _ = f.write_all(line.as_bytes());
            }
        }
    }
}

pub fn format_packet_line(decoded_at: DateTime<Local>, line: &str) -> String {
    format!("{}: {}\n", decoded_at.format("%H:%M:%S"), line)
}
