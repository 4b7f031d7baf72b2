// kissmux - KISS framing module
//
// Copyright (C) 2025-2026 kissmux contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later
//
// Byte-level KISS frame assembly. Frames are delimited by FEND; FEND and FESC
// inside a frame travel as FESC TFEND and FESC TFESC respectively.

pub const KISS_FEND: u8 = 0xC0;
pub const KISS_FESC: u8 = 0xDB;
pub const KISS_TFEND: u8 = 0xDC;
pub const KISS_TFESC: u8 = 0xDD;

/// Incremental KISS deframer.
///
/// Each connection owns one assembler. Bytes are pushed in as they arrive and
/// completed frames (unescaped, still carrying the KISS command byte) come out
/// whenever a FEND is seen.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
    escaped: bool,
}

impl FrameAssembler {
    pub fn new() -> Self {
        FrameAssembler {
            buffer: Vec::new(),
            escaped: false,
        }
    }

    /// Feed a single byte. Returns the completed frame when `byte` is FEND.
    ///
    /// Back-to-back FENDs yield empty frames; callers treat those as carrying
    /// no packet.
    pub fn push(&mut self, byte: u8) -> Option<Vec<u8>> {
        if self.escaped {
            self.escaped = false;
            match byte {
                KISS_TFEND => self.buffer.push(KISS_FEND),
                KISS_TFESC => self.buffer.push(KISS_FESC),
                // Invalid escape sequence: drop the byte
                _ => {}
            }
            return None;
        }

        match byte {
            KISS_FESC => {
                self.escaped = true;
                None
            }
            KISS_FEND => Some(std::mem::take(&mut self.buffer)),
            _ => {
                self.buffer.push(byte);
                None
            }
        }
    }

    /// Feed a chunk of bytes and collect every frame it completes
    pub fn add_bytes(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        data.iter().filter_map(|&byte| self.push(byte)).collect()
    }

    /// Drop any partial frame, e.g. after the peer went away
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.escaped = false;
    }
}

/// Escapes a frame body for transmission. The result carries no FENDs.
#[cfg(test)]
pub fn escape(data: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(data.len() + data.len() / 8);
    for &byte in data {
        match byte {
            KISS_FEND => output.extend_from_slice(&[KISS_FESC, KISS_TFEND]),
            KISS_FESC => output.extend_from_slice(&[KISS_FESC, KISS_TFESC]),
            _ => output.push(byte),
        }
    }
    output
}

/// Wraps a frame body (command byte included) in FENDs, escaping as needed
#[cfg(test)]
pub fn encode_frame(body: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(body.len() + 2);
    output.push(KISS_FEND);
    output.extend(escape(body));
    output.push(KISS_FEND);
    output
}

/// Splits a KISS command byte into (port, command)
pub fn command_info(frame: &[u8]) -> Option<(u8, u8)> {
    let cmd_byte = *frame.first()?;
    Some(((cmd_byte >> 4) & 0x0F, cmd_byte & 0x0F))
}

pub fn command_name(command: u8) -> &'static str {
    match command {
        0 => "Data", 1 => "TXDELAY", 2 => "Persistence", 3 => "SlotTime",
        4 => "TXtail", 5 => "FullDuplex", 6 => "SetHardware", 15 => "Return",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_assembles_split_frame() {
        let mut assembler = FrameAssembler::new();

        let frames1 = assembler.add_bytes(&[KISS_FEND, 0x00, 0x01]);
        // Leading FEND closes an empty frame
        assert_eq!(frames1, vec![Vec::<u8>::new()]);

        let frames2 = assembler.add_bytes(&[0x02, KISS_FEND]);
        assert_eq!(frames2, vec![vec![0x00, 0x01, 0x02]]);
    }

    #[test]
    fn test_unescapes_fend_and_fesc() {
        let mut assembler = FrameAssembler::new();
        let frames = assembler.add_bytes(&[
            KISS_FEND, 0x00, KISS_FESC, KISS_TFEND, 0x41, KISS_FESC, KISS_TFESC, KISS_FEND,
        ]);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1], vec![0x00, KISS_FEND, 0x41, KISS_FESC]);
    }

    #[test]
    fn test_escape_split_across_chunks() {
        let mut assembler = FrameAssembler::new();
        assert!(assembler.add_bytes(&[0x00, 0x10, KISS_FESC]).is_empty());
        let frames = assembler.add_bytes(&[KISS_TFEND, KISS_FEND]);
        assert_eq!(frames, vec![vec![0x00, 0x10, KISS_FEND]]);
    }

    #[test]
    fn test_invalid_escape_is_dropped() {
        let mut assembler = FrameAssembler::new();
        let frames = assembler.add_bytes(&[0x00, KISS_FESC, 0x41, 0x42, KISS_FEND]);
        assert_eq!(frames, vec![vec![0x00, 0x42]]);
    }

    #[test]
    fn test_escaped_fend_does_not_terminate() {
        // FESC FEND is an invalid escape; the FEND is consumed with it
        let mut assembler = FrameAssembler::new();
        let frames = assembler.add_bytes(&[0x00, 0x01, KISS_FESC, KISS_FEND, 0x02, KISS_FEND]);
        assert_eq!(frames, vec![vec![0x00, 0x01, 0x02]]);
    }

    #[test]
    fn test_back_to_back_fends() {
        let mut assembler = FrameAssembler::new();
        let frames = assembler.add_bytes(&[KISS_FEND, KISS_FEND, KISS_FEND]);
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.is_empty()));
    }

    #[test]
    fn test_clear() {
        let mut assembler = FrameAssembler::new();
        assembler.add_bytes(&[0x00, 0x01, KISS_FESC]);
        assembler.clear();
        let frames = assembler.add_bytes(&[KISS_TFEND, KISS_FEND]);
        assert_eq!(frames, vec![vec![KISS_TFEND]]);
    }

    #[test]
    fn test_encode_frame() {
        assert_eq!(
            encode_frame(&[0x00, KISS_FEND, 0x01]),
            vec![KISS_FEND, 0x00, KISS_FESC, KISS_TFEND, 0x01, KISS_FEND]
        );
    }

    #[test]
    fn test_command_info() {
        assert_eq!(command_info(&[0x00, 0x01]), Some((0, 0)));
        assert_eq!(command_info(&[0x15]), Some((1, 5)));
        assert_eq!(command_info(&[]), None);
        assert_eq!(command_name(6), "SetHardware");
        assert_eq!(command_name(9), "Unknown");
    }

    proptest! {
        #[test]
        fn escape_then_assemble_round_trips(
            body in proptest::collection::vec(
                prop_oneof![Just(KISS_FEND), Just(KISS_FESC), any::<u8>()],
                0..256,
            )
        ) {
            let wire = escape(&body);
            prop_assert!(!wire.contains(&KISS_FEND));

            let mut assembler = FrameAssembler::new();
            prop_assert!(assembler.add_bytes(&wire).is_empty());
            prop_assert_eq!(assembler.push(KISS_FEND), Some(body));
        }
    }
}
