// kissmux - error types
//
// Copyright (C) 2025-2026 kissmux contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    /// Catch-all I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Bad configuration file or command line value
    #[error("configuration error: {0}")]
    Config(String),

    /// Listening socket could not be bound
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Upstream modem could not be reached
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// A thread panicked while holding the client set lock
    #[error("client registry lock poisoned")]
    RegistryPoisoned,

    /// Error writing the capture file
    #[error("pcap write failed: {0}")]
    Pcap(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;
