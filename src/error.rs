//! Crate-wide error type.

use crate::mac::ParseMacError;
use thiserror::Error;

/// Errors produced by the frontline sniffer engine.
#[derive(Error, Debug)]
pub enum Error {
    /// The named HCI device could not be resolved to an adapter id.
    #[error("no such HCI device: {0}")]
    DeviceNotFound(String),

    /// A transport-level I/O failure (socket, bind, read, write).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A vendor command did not receive a reply within the firmware timeout.
    #[error("timed out waiting for vendor command reply")]
    Timeout,

    /// A MAC address string failed to parse.
    #[error("invalid MAC address: {0}")]
    BadAddress(#[from] ParseMacError),

    /// A `master@slave` pair spec was missing its `@` separator.
    #[error("invalid MAC pair spec: expected MASTER@SLAVE")]
    BadPairSpec,

    /// A command payload did not fit within the fixed debug-packet area.
    #[error("command payload overflows the debug packet's fixed payload area")]
    EncodeOverflow,

    /// A frontline fragment, LMP body, or ACL frame violated a framing invariant.
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),

    /// Writing an HCI dump record failed.
    #[error("HCI dump write error: {0}")]
    DumpIo(std::io::Error),

    /// A frontline header declared a header length outside the known set.
    #[error("unsupported frontline header length: {0}")]
    Unsupported(u8),
}
