//! Session data model and controller (spec.md §3, §4.8).
//!
//! This module is intentionally decoupled from device-name resolution and
//! process exit codes so it can be tested deterministically against a fake
//! [`Transport`].

use crate::error::Error;
use crate::frontline::{self, Dispatch, IgnoreTypes};
use crate::l2cap;
use crate::lmp;
use crate::mac::MacAddress;
use crate::pairing::PairingTranscript;
use crate::transport::{Transport, HCI_ACLDATA_PKT, VENDOR_REPLY_TIMEOUT};
use crate::vendor::{self, Command, StartPayload};
use std::io::Write;

/// Maximum HCI frame the session buffer must hold (spec.md leaves the
/// concrete ceiling to the implementation; matched to the kernel's HCI
/// socket receive buffer convention).
const MAX_FRAME: usize = 1024;
/// Standard 4-byte ACL sub-header: handle (2 bytes) + data length (2 bytes).
const ACL_HDR_LEN: usize = 4;

/// Per-capture state (spec.md §3 `Session`). Owns the receive buffer and
/// the pairing transcript; decoders borrow from it and mutate only the
/// fields named here.
pub struct Session {
    recv_buf: [u8; MAX_FRAME],
    dump: Option<Box<dyn Write>>,
    ignore_types: IgnoreTypes,
    ignore_zero_length: bool,
    master: MacAddress,
    slave: MacAddress,
    transcript: PairingTranscript,
}

impl Session {
    pub fn new(master: MacAddress, slave: MacAddress, dump: Option<Box<dyn Write>>) -> Self {
        Self {
            recv_buf: [0u8; MAX_FRAME],
            dump,
            ignore_types: IgnoreTypes::new(),
            ignore_zero_length: false,
            master,
            slave,
            transcript: PairingTranscript::new(),
        }
    }

    pub fn set_ignore_zero_length(&mut self, ignore: bool) {
        self.ignore_zero_length = ignore;
    }

    /// Add a frontline type code to the ignore list. Fails silently (the
    /// entry is dropped) once [`frontline::MAX_IGNORE_TYPES`] is reached,
    /// matching the fixed-capacity contract of spec.md §9.
    pub fn ignore_type(&mut self, type_code: u8) {
        let _ = self.ignore_types.push(type_code);
    }
}

/// The Session Controller (spec.md §4.8): resolves each command against a
/// [`Transport`] and drives the top-level receive loop.
pub struct Controller<'t, T: Transport> {
    transport: &'t mut T,
}

impl<'t, T: Transport> Controller<'t, T> {
    pub fn new(transport: &'t mut T) -> Self {
        Self { transport }
    }

    pub fn get_timer(&mut self) -> Result<u32, Error> {
        let cmd = vendor::encode(Command::Timer)?;
        let reply = self.transport.send_vendor(&cmd, VENDOR_REPLY_TIMEOUT)?;
        vendor::decode_timer_reply(&reply)
    }

    pub fn set_filter(&mut self, enable: bool) -> Result<(), Error> {
        let cmd = vendor::encode(Command::Filter(enable))?;
        self.transport.write_command(&cmd)?;
        Ok(())
    }

    pub fn sniff_stop(&mut self) -> Result<(), Error> {
        let cmd = vendor::encode(Command::Stop)?;
        self.transport.write_command(&cmd)?;
        Ok(())
    }

    pub fn sniff_start(&mut self, master: MacAddress, slave: MacAddress) -> Result<(), Error> {
        let cmd = vendor::encode(Command::Start(StartPayload { master, slave }))?;
        self.transport.write_command(&cmd)?;
        Ok(())
    }

    /// Install the capture filter and process ACL frames forever, routing
    /// each one through the frontline decoder and its downstream
    /// collaborators (spec.md §4.8). Recovered pairing transcripts are
    /// written as `btpincrack` command lines to `report`. Returns only on
    /// a transport error.
    pub fn sniff(&mut self, session: &mut Session, report: &mut dyn Write) -> Result<(), Error> {
        self.transport.install_capture_filter()?;

        loop {
            self.sniff_once(session, report)?;
        }
    }

    /// Read and process exactly one HCI packet. Split out from [`Self::sniff`]
    /// so tests can drive the loop a bounded number of iterations against a
    /// fake transport with a finite packet queue.
    pub fn sniff_once(&mut self, session: &mut Session, report: &mut dyn Write) -> Result<(), Error> {
        let n = self.transport.read_packet(&mut session.recv_buf)?;
        let frame = &session.recv_buf[..n];

        let Some((&ptype, rest)) = frame.split_first() else {
            return Err(Error::MalformedFrame("empty HCI packet"));
        };
        if ptype != HCI_ACLDATA_PKT {
            log::warn!("sniff: unknown packet type {ptype:#04x}, dropping");
            return Ok(());
        }

        if rest.len() < ACL_HDR_LEN {
            return Err(Error::MalformedFrame("ACL header truncated"));
        }
        let dlen = u16::from_le_bytes([rest[2], rest[3]]) as usize;
        let payload = &rest[ACL_HDR_LEN..];
        if dlen != payload.len() {
            return Err(Error::MalformedFrame(
                "ACL header dlen does not match remaining bytes",
            ));
        }
        // Copied out of the session's receive buffer so the frontline pass
        // below can take `session` mutably again (spec.md §5: decoders
        // never retain slices across loop iterations).
        let payload = payload.to_vec();

        dispatch_frontline(session, &payload, report)
    }
}

fn dispatch_frontline(
    session: &mut Session,
    payload: &[u8],
    report: &mut dyn Write,
) -> Result<(), Error> {
    let master = session.master;
    let slave = session.slave;
    let transcript = &mut session.transcript;
    let dump = &mut session.dump;

    let mut pending_err = None;
    frontline::decode_fragments(payload, &session.ignore_types, session.ignore_zero_length, |decoded| {
        if pending_err.is_some() {
            return;
        }
        let result = (|| -> Result<(), Error> {
            match decoded.dispatch {
                Dispatch::Dv => {
                    log::debug!("dv: {}", crate::util::hexdump(decoded.payload));
                }
                Dispatch::Lmp => {
                    if let Some(sink) = dump.as_deref_mut() {
                        crate::dump::write_lmp_event(sink, decoded.frame.master, decoded.payload)?;
                    }
                    let (_pdu, emitted) = lmp::decode_and_observe(
                        decoded.payload,
                        decoded.frame.master,
                        transcript,
                        master,
                        slave,
                    )?;
                    if let Some(line) = emitted {
                        log::info!("{line}");
                        writeln!(report, "{line}").map_err(Error::Io)?;
                    }
                }
                Dispatch::L2cap => match dump.as_deref_mut() {
                    Some(sink) => l2cap::decode(decoded.payload, decoded.frame.llid, Some(sink))?,
                    None => l2cap::decode::<Vec<u8>>(decoded.payload, decoded.frame.llid, None)?,
                },
            }
            Ok(())
        })();
        if let Err(e) = result {
            pending_err = Some(e);
        }
    })?;

    match pending_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
