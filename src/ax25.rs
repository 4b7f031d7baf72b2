// kissmux - AX.25 header decoding
//
// Copyright (C) 2025-2026 kissmux contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later
//
// Best-effort decoding of AX.25 UI frames for the packet log. Nothing here
// touches the bytes that are relayed; a frame that cannot be decoded is simply
// not logged.

use std::fmt;

/// AX.25 control field of a UI frame. Its first occurrence ends the
/// address/path block.
pub const AX25_CONTROL_UI: u8 = 0x03;

/// Width of one encoded address field
pub const ADDRESS_LEN: usize = 7;

/// Offset of the destination address: index 0 holds the KISS command byte
const DEST_OFFSET: usize = 1;
const SRC_OFFSET: usize = DEST_OFFSET + ADDRESS_LEN;
const PATH_OFFSET: usize = SRC_OFFSET + ADDRESS_LEN;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AX25Address {
    pub callsign: String,
    pub ssid: u8,
}

impl AX25Address {
    /// Decodes an encoded address field. Short input decodes whatever
    /// callsign bytes are present; a missing SSID byte reads as SSID 0.
    pub fn from_ax25_bytes(bytes: &[u8]) -> Self {
        let callsign: String = bytes
            .iter()
            .take(6)
            .map(|&b| (b >> 1) as char)
            .collect::<String>()
            .trim_end()
            .to_string();
        let ssid = bytes.get(6).map_or(0, |&b| (b >> 1) & 0x0F);
        AX25Address { callsign, ssid }
    }
}

impl fmt::Display for AX25Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ssid == 0 {
            write!(f, "{}", self.callsign)
        } else {
            write!(f, "{}-{}", self.callsign, self.ssid)
        }
    }
}

/// Decodes an address field to its display form, e.g. `N0CALL-5`
#[cfg(test)]
pub(crate) fn decode_address(bytes: &[u8]) -> String {
    AX25Address::from_ax25_bytes(bytes).to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigipeaterEntry {
    pub address: AX25Address,
    /// Has-been-repeated flag
    pub used: bool,
}

impl DigipeaterEntry {
    pub fn from_ax25_bytes(bytes: &[u8]) -> Self {
        let used = matches!(bytes.get(6), Some(0xE0..=0xE9));
        DigipeaterEntry {
            address: AX25Address::from_ax25_bytes(bytes),
            used,
        }
    }
}

impl fmt::Display for DigipeaterEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)?;
        if self.used {
            write!(f, "*")?;
        }
        Ok(())
    }
}

/// Decoded view of one AX.25 UI packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AX25Packet {
    pub destination: AX25Address,
    pub source: AX25Address,
    pub path: Vec<DigipeaterEntry>,
    pub pid: u8,
    pub info: Vec<u8>,
}

impl AX25Packet {
    /// Decodes a deframed KISS frame (command byte included).
    ///
    /// Returns `None` for anything that carries no displayable packet: KISS
    /// control frames, empty frames, truncated headers.
    pub fn from_frame(frame: &[u8]) -> Option<Self> {
        let c_index = frame.iter().position(|&b| b == AX25_CONTROL_UI)?;
        let pid = *frame.get(c_index + 1)?;
        if frame.len() < PATH_OFFSET {
            return None;
        }

        let mut info = frame[c_index + 2..].to_vec();
        if let Some(last) = info.last_mut() {
            if *last == b'\n' {
                *last = b'\r';
            }
        }

        let destination = AX25Address::from_ax25_bytes(&frame[DEST_OFFSET..SRC_OFFSET]);
        let source = AX25Address::from_ax25_bytes(&frame[SRC_OFFSET..PATH_OFFSET]);

        // A control byte inside the address block leaves the path empty
        let path = frame
            .get(PATH_OFFSET..c_index)
            .unwrap_or(&[])
            .chunks(ADDRESS_LEN)
            .map(DigipeaterEntry::from_ax25_bytes)
            .collect();

        Some(AX25Packet { destination, source, path, pid, info })
    }

    /// Info field as ASCII, non-ASCII bytes dropped
    pub fn info_text(&self) -> String {
        self.info
            .iter()
            .filter(|b| b.is_ascii())
            .map(|&b| b as char)
            .collect()
    }
}

impl fmt::Display for AX25Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}>{}", self.source, self.destination)?;
        for digi in &self.path {
            write!(f, ",{}", digi)?;
        }
        write!(f, ":{}", self.info_text())
    }
}

/// Encodes an address field. Used to build frames in tests and fixtures.
#[cfg(test)]
pub(crate) fn encode_address(callsign: &str, ssid: u8, last_byte_flags: u8) -> [u8; 7] {
    let mut out = [b' ' << 1; 7];
    for (slot, ch) in out.iter_mut().zip(callsign.bytes().take(6)) {
        *slot = ch.to_ascii_uppercase() << 1;
    }
    out[6] = last_byte_flags | ((ssid & 0x0F) << 1);
    out
}

/// Builds a KISS data frame body: command byte, addresses, path, UI control,
/// PID 0xF0 and info.
#[cfg(test)]
pub(crate) fn build_frame(dest: [u8; 7], src: [u8; 7], path: &[[u8; 7]], info: &[u8]) -> Vec<u8> {
    let mut frame = vec![0x00];
    frame.extend_from_slice(&dest);
    frame.extend_from_slice(&src);
    for digi in path {
        frame.extend_from_slice(digi);
    }
    frame.push(AX25_CONTROL_UI);
    frame.push(0xF0);
    frame.extend_from_slice(info);
    frame
}
