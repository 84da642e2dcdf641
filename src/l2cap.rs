//! L2CAP decoder (spec.md §4.5).
//!
//! The frontline decoder hands this module whatever payload wasn't routed
//! to the LMP decoder (`llid != LLID_LMP`): an ACL data PDU passed through
//! unparsed, logged and optionally persisted to the HCI dump.

use crate::dump;
use crate::error::Error;
use crate::util::hexdump;
use std::io::Write;

/// Log the payload and, if `dump_sink` is present, write an ACL dump
/// record for it with direction "in" and the handle packed from `llid`
/// (spec.md §4.5).
pub fn decode<W: Write + ?Sized>(
    payload: &[u8],
    llid: u8,
    dump_sink: Option<&mut W>,
) -> Result<(), Error> {
    log::debug!("l2cap: body={}", hexdump(payload));

    if let Some(sink) = dump_sink {
        dump::write_l2cap_record(sink, llid, payload)?;
    }

    Ok(())
}
