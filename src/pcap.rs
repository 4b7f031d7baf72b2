// kissmux - PCAP capture of relayed AX.25 frames
//
// Copyright (C) 2025-2026 kissmux contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fs::File;
use std::io::Write;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{RelayError, Result};

const PCAP_MAGIC: u32 = 0xa1b2c3d4;
const PCAP_SNAPLEN: u32 = 65535;
/// LINKTYPE_AX25: frames start at the destination address
const LINKTYPE_AX25: u32 = 3;

pub struct PcapWriter<W: Write = File> {
    out: Mutex<W>,
}

impl PcapWriter<File> {
    pub fn create(path: &str) -> Result<Self> {
        let file = File::create(path).map_err(RelayError::Pcap)?;
        PcapWriter::new(file)
    }
}

impl<W: Write> PcapWriter<W> {
    /// Writes the global header and returns a writer ready for records
    pub fn new(mut out: W) -> Result<Self> {
        let mut header = Vec::with_capacity(24);
        header.extend_from_slice(&PCAP_MAGIC.to_le_bytes());
        header.extend_from_slice(&2u16.to_le_bytes());
        header.extend_from_slice(&4u16.to_le_bytes());
        header.extend_from_slice(&0i32.to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes());
        header.extend_from_slice(&PCAP_SNAPLEN.to_le_bytes());
        header.extend_from_slice(&LINKTYPE_AX25.to_le_bytes());
        out.write_all(&header).map_err(RelayError::Pcap)?;
        Ok(PcapWriter { out: Mutex::new(out) })
    }

    pub fn write_packet(&self, data: &[u8]) -> Result<()> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        let mut record = Vec::with_capacity(16 + data.len());
        record.extend_from_slice(&(now.as_secs() as u32).to_le_bytes());
        record.extend_from_slice(&now.subsec_micros().to_le_bytes());
        record.extend_from_slice(&(data.len() as u32).to_le_bytes());
        record.extend_from_slice(&(data.len() as u32).to_le_bytes());
        record.extend_from_slice(data);

        let mut out = self.out.lock().map_err(|_| RelayError::Pcap(std::io::Error::other("capture lock poisoned")))?;
        out.write_all(&record).map_err(RelayError::Pcap)?;
        out.flush().map_err(RelayError::Pcap)?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
