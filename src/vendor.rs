//! Vendor debug-channel command codec (spec.md §4.2).
//!
//! Firmware commands are wrapped in a fixed-size [`DebugPacket`] and
//! prefixed with a one-byte fragmentation/channel marker before being sent
//! as the parameter block of a vendor-OGF HCI command.

use crate::error::Error;
use crate::mac::MacAddress;

/// Marks a complete (non-fragmented) message on the debug channel.
const FRAG_FIRST: u8 = 0x01;
const FRAG_LAST: u8 = 0x02;
const CHAN_DEBUG: u8 = 0x04;

/// The fragmentation/channel prefix byte prepended to every command.
pub const FRAME_PREFIX: u8 = FRAG_FIRST | FRAG_LAST | CHAN_DEBUG;

/// Fixed payload area size within a [`DebugPacket`] — large enough to hold
/// the two reversed MACs of a [`StartPayload`], the largest command body.
pub const PAYLOAD_LEN: usize = 12;

/// Vendor OGF used for every debug-channel command (spec.md §4.1).
pub const OGF_VENDOR: u16 = 0x3F;
pub const OCF_DEBUG: u16 = 0x00;

const CMD_TIMER: u16 = 0x0000;
const CMD_FILTER: u16 = 0x0001;
const CMD_STOP: u16 = 0x0002;
const CMD_START: u16 = 0x0003;

/// A command understood by the debug-channel firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Read the firmware's free-running clock.
    Timer,
    /// Enable or disable the frontline capture filter.
    Filter(bool),
    /// Stop an in-progress capture.
    Stop,
    /// Start a capture between a master and a slave.
    Start(StartPayload),
}

/// The payload of a START command: two 6-byte MAC addresses, used exactly
/// as supplied by the caller (spec.md §4.2 — the core does not reverse
/// byte order; that is the caller's responsibility if the firmware needs
/// it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartPayload {
    pub master: MacAddress,
    pub slave: MacAddress,
}

/// A fixed-size record carrying a command opcode and an inline payload
/// area (spec.md §3 `DebugPacket`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugPacket {
    opcode: u16,
    payload: [u8; PAYLOAD_LEN],
}

impl DebugPacket {
    fn new(opcode: u16, payload: &[u8]) -> Result<Self, Error> {
        if payload.len() > PAYLOAD_LEN {
            return Err(Error::EncodeOverflow);
        }
        let mut buf = [0u8; PAYLOAD_LEN];
        buf[..payload.len()].copy_from_slice(payload);
        Ok(DebugPacket {
            opcode,
            payload: buf,
        })
    }

    fn from_command(cmd: Command) -> Result<Self, Error> {
        match cmd {
            Command::Timer => DebugPacket::new(CMD_TIMER, &[]),
            Command::Filter(enable) => DebugPacket::new(CMD_FILTER, &[enable as u8]),
            Command::Stop => DebugPacket::new(CMD_STOP, &[]),
            Command::Start(StartPayload { master, slave }) => {
                let mut body = [0u8; 12];
                body[..6].copy_from_slice(&master.0);
                body[6..].copy_from_slice(&slave.0);
                DebugPacket::new(CMD_START, &body)
            }
        }
    }

    /// Serialize this packet's opcode and payload area (14 bytes, no prefix).
    fn to_bytes(self) -> [u8; 2 + PAYLOAD_LEN] {
        let mut out = [0u8; 2 + PAYLOAD_LEN];
        out[0..2].copy_from_slice(&self.opcode.to_le_bytes());
        out[2..].copy_from_slice(&self.payload);
        out
    }
}

/// Encode a command into the HCI command-parameter buffer: the
/// fragmentation/channel prefix byte, then the [`DebugPacket`] bytes
/// (spec.md §4.2). The result always fits within the HCI command
/// parameter limit of 255 bytes.
pub fn encode(cmd: Command) -> Result<Vec<u8>, Error> {
    let packet = DebugPacket::from_command(cmd)?;
    let mut out = Vec::with_capacity(1 + 2 + PAYLOAD_LEN);
    out.push(FRAME_PREFIX);
    out.extend_from_slice(&packet.to_bytes());
    debug_assert!(out.len() <= 255);
    Ok(out)
}

/// Extract the 32-bit little-endian clock value from a TIMER reply, which
/// firmware places at offset 2 of the reply buffer (spec.md §4.2).
pub fn decode_timer_reply(reply: &[u8]) -> Result<u32, Error> {
    reply
        .get(2..6)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or(Error::MalformedFrame("TIMER reply too short"))
}
