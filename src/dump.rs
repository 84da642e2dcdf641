//! HCI dump writer (spec.md §4.7).
//!
//! Produces byte-exact records in the classic `hcidump` on-disk format:
//! a fixed frame header, a packet-type byte, a type-specific HCI
//! sub-header, and the body. Every record is written as a single ordered
//! sequence of field writes — no interleaving, no partial records.

use crate::error::Error;
use crate::transport::{HCI_ACLDATA_PKT, HCI_EVENT_PKT, EVT_VENDOR};
use std::io::Write;

/// Frontline channel id stamped into every synthesized LMP dump record.
const CSR_CHANNEL_ID: u8 = 20;
const CSR_DIR_MASTER: u8 = 0x10;
const CSR_DIR_SLAVE: u8 = 0x0F;
const CSR_LMP_BODY_LEN: usize = 17;
/// Total body length of a synthesized LMP event: channel id, dir byte,
/// 17-byte LMP body, connection handle (spec.md §4.7).
const CSR_EVENT_BODY_LEN: usize = 20;

const DUMP_HDR_LEN: usize = 12;
const ACL_HDR_LEN: usize = 4;
const EVT_HDR_LEN: usize = 2;

/// The per-record frame header every dump record is prefixed with.
struct DumpHdr {
    len: u16,
    inbound: bool,
    ts_sec: u32,
    ts_usec: u32,
}

impl DumpHdr {
    fn write_to<W: Write + ?Sized>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_all(&self.len.to_le_bytes())?;
        w.write_all(&[self.inbound as u8, 0u8])?; // in, pad
        w.write_all(&self.ts_sec.to_le_bytes())?;
        w.write_all(&self.ts_usec.to_le_bytes())?;
        Ok(())
    }
}

/// Standard ACL sub-header: a packed handle/flags word and a data length.
struct AclHdr {
    handle: u16,
    dlen: u16,
}

impl AclHdr {
    fn write_to<W: Write + ?Sized>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_all(&self.handle.to_le_bytes())?;
        w.write_all(&self.dlen.to_le_bytes())?;
        Ok(())
    }
}

/// Event sub-header: event code and parameter length.
struct EvtHdr {
    evt: u8,
    plen: u8,
}

impl EvtHdr {
    fn write_to<W: Write + ?Sized>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_all(&[self.evt, self.plen])?;
        Ok(())
    }
}

/// Pack a connection handle and flags into the standard 16-bit ACL header
/// word: bits 0..12 hold the handle, bits 12..14 hold the flags (spec.md
/// §4.5 "standard ACL-handle packing").
pub fn pack_acl_handle(handle: u16, flags: u8) -> u16 {
    (handle & 0x0FFF) | ((flags as u16 & 0x03) << 12)
}

/// Write an L2CAP (ACL data) dump record with direction "in" (spec.md
/// §4.7). `llid` becomes the packed handle's flags field per §4.5.
pub fn write_l2cap_record<W: Write + ?Sized>(w: &mut W, llid: u8, payload: &[u8]) -> Result<(), Error> {
    let dlen = u16::try_from(payload.len())
        .map_err(|_| Error::MalformedFrame("L2CAP payload too long for a dump record"))?;

    let hdr = DumpHdr {
        len: (1 + ACL_HDR_LEN + payload.len()) as u16,
        inbound: true,
        ts_sec: 0,
        ts_usec: 0,
    };
    let acl = AclHdr {
        handle: pack_acl_handle(0, llid),
        dlen,
    };

    hdr.write_to(w).map_err(Error::DumpIo)?;
    w.write_all(&[HCI_ACLDATA_PKT]).map_err(Error::DumpIo)?;
    acl.write_to(w).map_err(Error::DumpIo)?;
    w.write_all(payload).map_err(Error::DumpIo)?;
    Ok(())
}

/// Write a synthesized CSR-style vendor LMP event dump record (spec.md
/// §4.7). `lmp_body` must be at most 17 bytes; shorter bodies are
/// zero-padded to the fixed 17-byte slot.
pub fn write_lmp_event<W: Write + ?Sized>(w: &mut W, master: bool, lmp_body: &[u8]) -> Result<(), Error> {
    if lmp_body.len() > CSR_LMP_BODY_LEN {
        return Err(Error::MalformedFrame(
            "LMP body longer than the 17-byte dump slot",
        ));
    }

    let hdr = DumpHdr {
        len: (1 + EVT_HDR_LEN + CSR_EVENT_BODY_LEN) as u16,
        inbound: true,
        ts_sec: 0,
        ts_usec: 0,
    };
    let evt = EvtHdr {
        evt: EVT_VENDOR,
        plen: CSR_EVENT_BODY_LEN as u8,
    };

    let mut body = [0u8; CSR_LMP_BODY_LEN];
    body[..lmp_body.len()].copy_from_slice(lmp_body);

    hdr.write_to(w).map_err(Error::DumpIo)?;
    w.write_all(&[HCI_EVENT_PKT]).map_err(Error::DumpIo)?;
    evt.write_to(w).map_err(Error::DumpIo)?;
    w.write_all(&[CSR_CHANNEL_ID]).map_err(Error::DumpIo)?;
    w.write_all(&[if master { CSR_DIR_MASTER } else { CSR_DIR_SLAVE }])
        .map_err(Error::DumpIo)?;
    w.write_all(&body).map_err(Error::DumpIo)?;
    w.write_all(&[0u8]).map_err(Error::DumpIo)?; // connection_handle
    Ok(())
}
