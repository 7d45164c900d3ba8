//! Encode and decode ISO-TP frames (N_PDU) to and from raw link frames.

use std::time::Duration;

use crate::error::{Result, StackError};

pub const SF_PCI: u8 = 0x00; // Single Frame
pub const FF_PCI: u8 = 0x10; // First Frame
pub const CF_PCI: u8 = 0x20; // Consecutive Frame
pub const FC_PCI: u8 = 0x30; // Flow Control

/// Size of a classic CAN link frame
pub const FRAME_LENGTH: usize = 8;

/// Largest message a First Frame can announce (12 bit length)
pub const MAX_DATA_LENGTH: usize = 4095;

const FC_LENGTH: usize = 3;

/// Flow status carried by a Flow Control frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    ContinueToSend,
    Wait,
    Overflow,
}

impl FlowStatus {
    pub fn code(self) -> u8 {
        match self {
            FlowStatus::ContinueToSend => 0x0,
            FlowStatus::Wait => 0x1,
            FlowStatus::Overflow => 0x2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x0 => Some(FlowStatus::ContinueToSend),
            0x1 => Some(FlowStatus::Wait),
            0x2 => Some(FlowStatus::Overflow),
            _ => None,
        }
    }
}

/// Converts an STmin byte into a separation time.
///
/// `0x00..=0x7F` are milliseconds, `0xF1..=0xF9` are 100-900 microseconds.
/// Reserved values are treated as the longest valid time (127 ms).
pub fn st_min_to_duration(st_min: u8) -> Duration {
    match st_min {
        0x00..=0x7F => Duration::from_millis(st_min as u64),
        0xF1..=0xF9 => Duration::from_micros((st_min - 0xF0) as u64 * 100),
        _ => Duration::from_millis(0x7F),
    }
}

/// Addressing mode.
///
/// With extended addressing every outbound frame starts with `target` and
/// every inbound frame must start with `source`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Addressing {
    pub extended: bool,
    pub source: u8,
    pub target: u8,
}

impl Addressing {
    pub fn normal() -> Self {
        Self::default()
    }

    pub fn extended(source: u8, target: u8) -> Self {
        Self {
            extended: true,
            source,
            target,
        }
    }

    fn prefix_len(&self) -> usize {
        usize::from(self.extended)
    }

    /// Payload bytes that fit into a Single Frame
    pub fn sf_capacity(&self) -> usize {
        7 - self.prefix_len()
    }

    /// Payload bytes carried by a First Frame
    pub fn ff_capacity(&self) -> usize {
        6 - self.prefix_len()
    }

    /// Payload bytes carried by a Consecutive Frame
    pub fn cf_capacity(&self) -> usize {
        7 - self.prefix_len()
    }
}

/// Decoded protocol data unit, borrowing its payload from the wire bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pdu<'a> {
    SingleFrame {
        data: &'a [u8],
    },
    FirstFrame {
        len: u16,
        data: &'a [u8],
    },
    ConsecutiveFrame {
        sn: u8,
        data: &'a [u8],
    },
    FlowControl {
        status: FlowStatus,
        block_size: u8,
        st_min: u8,
    },
}

/// N_PCI frame kind, taken from the top nibble
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Single,
    First,
    Consecutive,
    FlowControl,
}

/// Result of decoding one link frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded<'a> {
    Frame(Pdu<'a>),
    /// Extended address did not match, the frame is not for us. Not an error.
    Dropped,
}

/// Frame codec for one addressing/padding setup
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec {
    pub addressing: Addressing,
    pub zero_padding: bool,
}

impl FrameCodec {
    pub fn new(addressing: Addressing, zero_padding: bool) -> Self {
        Self {
            addressing,
            zero_padding,
        }
    }

    pub fn encode_single_frame(&self, payload: &[u8]) -> Result<Vec<u8>> {
        if payload.len() > self.addressing.sf_capacity() {
            return Err(StackError::IsoTpError(format!(
                "{} bytes do not fit a single frame",
                payload.len()
            )));
        }
        let mut frame = self.start();
        frame.push(SF_PCI | (payload.len() as u8 & 0x0F));
        frame.extend_from_slice(payload);
        Ok(self.finish(frame))
    }

    /// Encodes the First Frame of `message`: the 12 bit total length and the
    /// leading payload bytes.
    pub fn encode_first_frame(&self, message: &[u8]) -> Result<Vec<u8>> {
        let len = message.len();
        if len <= self.addressing.sf_capacity() || len > MAX_DATA_LENGTH {
            return Err(StackError::IsoTpError(format!(
                "{} bytes cannot be sent segmented",
                len
            )));
        }
        let mut frame = self.start();
        frame.push(FF_PCI | ((len >> 8) as u8 & 0x0F));
        frame.push(len as u8);
        frame.extend_from_slice(&message[..self.addressing.ff_capacity()]);
        Ok(self.finish(frame))
    }

    pub fn encode_consecutive_frame(&self, sn: u8, chunk: &[u8]) -> Result<Vec<u8>> {
        if chunk.len() > self.addressing.cf_capacity() {
            return Err(StackError::IsoTpError(format!(
                "{} bytes do not fit a consecutive frame",
                chunk.len()
            )));
        }
        let mut frame = self.start();
        frame.push(CF_PCI | (sn & 0x0F));
        frame.extend_from_slice(chunk);
        Ok(self.finish(frame))
    }

    pub fn encode_flow_control(&self, status: FlowStatus, block_size: u8, st_min: u8) -> Vec<u8> {
        let mut frame = self.start();
        frame.push(FC_PCI | status.code());
        frame.push(block_size);
        frame.push(st_min);
        self.finish(frame)
    }

    /// Classifies one inbound link frame.
    ///
    /// Returns [`Decoded::Dropped`] for frames addressed to someone else and
    /// `StackError::Malformed` when a length constraint is violated.
    pub fn decode<'a>(&self, wire: &'a [u8]) -> Result<Decoded<'a>> {
        let data = if self.addressing.extended {
            match wire.split_first() {
                Some((&addr, rest)) if addr == self.addressing.source => rest,
                Some(_) => return Ok(Decoded::Dropped),
                None => return Err(StackError::Malformed("empty frame".into())),
            }
        } else {
            wire
        };

        let Some(&pci) = data.first() else {
            return Err(StackError::Malformed("missing N_PCI".into()));
        };

        let pdu = match pci & 0xF0 {
            SF_PCI => {
                let len = (pci & 0x0F) as usize;
                let payload = &data[1..];
                if len > self.addressing.sf_capacity() || payload.len() < len {
                    return Err(StackError::Malformed(format!(
                        "single frame length {} invalid",
                        len
                    )));
                }
                Pdu::SingleFrame {
                    data: &payload[..len],
                }
            }
            FF_PCI => {
                if data.len() < 2 {
                    return Err(StackError::Malformed("first frame too short".into()));
                }
                let len = (((pci & 0x0F) as u16) << 8) | data[1] as u16;
                let ff_capacity = self.addressing.ff_capacity();
                if (len as usize) < ff_capacity + 2 {
                    return Err(StackError::Malformed(format!(
                        "first frame length {} below minimum",
                        len
                    )));
                }
                let payload = &data[2..];
                if payload.len() < ff_capacity {
                    return Err(StackError::Malformed("first frame payload truncated".into()));
                }
                Pdu::FirstFrame {
                    len,
                    data: &payload[..ff_capacity],
                }
            }
            CF_PCI => Pdu::ConsecutiveFrame {
                sn: pci & 0x0F,
                data: &data[1..],
            },
            FC_PCI => {
                if data.len() < FC_LENGTH {
                    return Err(StackError::Malformed("flow control too short".into()));
                }
                let status = FlowStatus::from_code(pci & 0x0F).ok_or_else(|| {
                    StackError::Malformed(format!("flow status {:#x} invalid", pci & 0x0F))
                })?;
                Pdu::FlowControl {
                    status,
                    block_size: data[1],
                    st_min: data[2],
                }
            }
            other => {
                return Err(StackError::Malformed(format!(
                    "unknown N_PCI type {:#04x}",
                    other
                )))
            }
        };
        Ok(Decoded::Frame(pdu))
    }

    /// Frame kind of an inbound frame without validating its length, used to
    /// decide which session a malformed frame belongs to.
    pub fn frame_kind(&self, wire: &[u8]) -> Option<FrameKind> {
        let pci = *wire.get(usize::from(self.addressing.extended))?;
        match pci & 0xF0 {
            SF_PCI => Some(FrameKind::Single),
            FF_PCI => Some(FrameKind::First),
            CF_PCI => Some(FrameKind::Consecutive),
            FC_PCI => Some(FrameKind::FlowControl),
            _ => None,
        }
    }

    fn start(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(FRAME_LENGTH);
        if self.addressing.extended {
            frame.push(self.addressing.target);
        }
        frame
    }

    fn finish(&self, mut frame: Vec<u8>) -> Vec<u8> {
        if self.zero_padding && frame.len() < FRAME_LENGTH {
            frame.resize(FRAME_LENGTH, 0x00);
        }
        frame
    }
}
