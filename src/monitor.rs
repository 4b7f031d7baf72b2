// kissmux - traffic monitor
//
// Copyright (C) 2025-2026 kissmux contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later
//
// Everything here is observation only. The monitor sees completed frames
// after the raw bytes have already been relayed.

use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;

use chrono::Local;

use crate::ax25::AX25Packet;
use crate::kiss::{command_info, command_name};
use crate::logger::{Logger, LOG_DEBUG, LOG_NOTICE, LOG_WARN};
use crate::pcap::PcapWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    FromVara,
    ToVara,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::FromVara => write!(f, "VARA -> clients"),
            Direction::ToVara => write!(f, "client -> VARA"),
        }
    }
}

pub struct Monitor {
    logger: Arc<Logger>,
    dump_frames: bool,
    pcap_writer: Option<PcapWriter>,
}

impl Monitor {
    pub fn new(logger: Arc<Logger>, dump_frames: bool, pcap_writer: Option<PcapWriter>) -> Self {
        Monitor { logger, dump_frames, pcap_writer }
    }

    pub fn logger(&self) -> &Arc<Logger> {
        &self.logger
    }

    /// Inspects one deframed KISS frame and logs it if it holds a packet
    pub fn observe(&self, direction: Direction, frame: &[u8]) -> Option<AX25Packet> {
        let (port, command) = command_info(frame)?;

        if self.dump_frames {
            self.logger.log(
                &format!(
                    "=== {} KISS frame, port {} command {} ({}), {} bytes ===\n{}",
                    direction, port, command, command_name(command), frame.len(), hex_dump(frame)
                ),
                LOG_NOTICE,
            );
        }

        if command == 0 && frame.len() > 1 {
            if let Some(ref pcap) = self.pcap_writer {
                if let Err(e) = pcap.write_packet(&frame[1..]) {
                    self.logger.log(&format!("Capture failed: {}", e), LOG_WARN);
                }
            }
        }

        match AX25Packet::from_frame(frame) {
            Some(packet) => {
                self.logger.packet(Local::now(), &packet.to_string());
                if self.dump_frames {
                    self.logger.log(
                        &format!("  PID: 0x{:02x}, info {} bytes", packet.pid, packet.info.len()),
                        LOG_NOTICE,
                    );
                }
                Some(packet)
            }
            None => {
                self.logger.log(
                    &format!("{}: {} byte frame without AX.25 UI packet", direction, frame.len()),
                    LOG_DEBUG,
                );
                None
            }
        }
    }
}

/// xxd-style dump: offset, 16 hex bytes split in two groups, ASCII column
pub fn hex_dump(data: &[u8]) -> String {
    let mut out = String::new();
    for (i, chunk) in data.chunks(16).enumerate() {
        let _ = write!(out, "{:08x}: ", i * 16);
        for (j, byte) in chunk.iter().enumerate() {
            let _ = write!(out, "{:02x} ", byte);
            if j == 7 { out.push(' '); }
        }
        for j in chunk.len()..16 {
            if j == 7 { out.push(' '); }
            out.push_str("   ");
        }
        out.push(' ');
        for &byte in chunk {
            out.push(if (0x20..=0x7e).contains(&byte) { byte as char } else { '.' });
        }
        out.push('\n');
    }
    out
}
