//! LMP decoder (spec.md §4.4).
//!
//! Splits an LMP PDU into its transaction id, (possibly extended) opcode,
//! and body, logs a hexdump of the body, and forwards the decoded PDU to
//! the pairing observer.

use crate::error::Error;
use crate::mac::MacAddress;
use crate::pairing::PairingTranscript;
use crate::util::hexdump;

/// Real Bluetooth Core LMP opcodes the pairing observer cares about.
pub const LMP_IN_RAND: u8 = 6;
pub const LMP_COMB_KEY: u8 = 9;
pub const LMP_AU_RAND: u8 = 11;
pub const LMP_SRES: u8 = 12;

/// op1 values in this range indicate an escape to a second opcode byte
/// (spec.md §4.4 — extended opcode space).
const EXT_OPCODE_LOW: u8 = 124;
const EXT_OPCODE_HIGH: u8 = 127;

/// A decoded LMP PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LmpPdu {
    pub tid: u8,
    pub op1: u8,
    pub op2: Option<u8>,
}

impl LmpPdu {
    /// The effective opcode used to dispatch to the pairing observer: `op2`
    /// when present, otherwise `op1` (spec.md §4.4).
    pub fn opcode(&self) -> u8 {
        self.op2.unwrap_or(self.op1)
    }
}

/// Split the first octet of an LMP PDU into transaction id and op1
/// (spec.md §3): bit 0 is the TID, bits 1..=7 are op1.
fn split_header(first: u8) -> (u8, u8) {
    let tid = first & 0x01;
    let op1 = first >> 1;
    (tid, op1)
}

/// Decode one LMP PDU from `body` (the frontline payload dispatched with
/// [`crate::frontline::Dispatch::Lmp`]). Returns the decoded header and the
/// slice of `body` that follows it (the PDU-specific parameters).
pub fn decode(body: &[u8]) -> Result<(LmpPdu, &[u8]), Error> {
    let first = *body
        .first()
        .ok_or(Error::MalformedFrame("empty LMP PDU"))?;
    let (tid, op1) = split_header(first);

    if (EXT_OPCODE_LOW..=EXT_OPCODE_HIGH).contains(&op1) {
        let op2 = *body
            .get(1)
            .ok_or(Error::MalformedFrame("truncated extended LMP opcode"))?;
        let pdu = LmpPdu {
            tid,
            op1,
            op2: Some(op2),
        };
        log::debug!(
            "lmp: tid={} op1={} op2={} body={}",
            tid,
            op1,
            op2,
            hexdump(&body[2..])
        );
        Ok((pdu, &body[2..]))
    } else {
        let pdu = LmpPdu { tid, op1, op2: None };
        log::debug!("lmp: tid={} op1={} body={}", tid, op1, hexdump(&body[1..]));
        Ok((pdu, &body[1..]))
    }
}

/// Decode an LMP PDU and feed its opcode and parameters to `transcript`
/// (spec.md §4.6). `sender_is_master` identifies which link end sent the
/// PDU; `master`/`slave` are the session's link addresses, needed only to
/// render the `btpincrack` command line if this completes the transcript.
pub fn decode_and_observe(
    body: &[u8],
    sender_is_master: bool,
    transcript: &mut PairingTranscript,
    master: MacAddress,
    slave: MacAddress,
) -> Result<(LmpPdu, Option<String>), Error> {
    let (pdu, params) = decode(body)?;
    let emitted = transcript.observe(pdu.opcode(), sender_is_master, params, master, slave);
    Ok((pdu, emitted))
}
