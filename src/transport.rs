//! HCI transport (spec.md §4.1).
//!
//! Opens the raw HCI socket, installs the capture filter the engine needs
//! to see ACL data and vendor events, and exchanges vendor debug-channel
//! commands with the firmware. Synchronous and blocking end to end (spec.md
//! §5): the sniff loop is the program's only activity, so there is nothing
//! to overlap with I/O waits.

use crate::error::Error;
use crate::vendor::{OCF_DEBUG, OGF_VENDOR};
use std::time::Duration;

/// HCI packet type bytes (spec.md §3), shared with [`crate::dump`].
pub const HCI_COMMAND_PKT: u8 = 0x01;
pub const HCI_ACLDATA_PKT: u8 = 0x02;
pub const HCI_EVENT_PKT: u8 = 0x04;

/// Vendor-specific debug event code the firmware uses to deliver frontline
/// data and command replies (spec.md §4.1).
pub const EVT_VENDOR: u8 = 0xFF;

/// Default time to wait for a vendor command reply before giving up.
pub const VENDOR_REPLY_TIMEOUT: Duration = Duration::from_millis(2000);

/// Pack an OGF/OCF pair into the 16-bit opcode an HCI command header
/// carries: OCF in the low 10 bits, OGF in the high 6.
fn pack_opcode(ogf: u16, ocf: u16) -> u16 {
    (ocf & 0x03FF) | (ogf << 10)
}

/// Wrap a vendor debug-channel `cparam` buffer (as produced by
/// [`crate::vendor::encode`]) in the standard HCI command packet every
/// write to the socket must use: packet-type byte, OGF=VENDOR/OCF=0
/// opcode, and a one-byte parameter length, ahead of `cparam` itself
/// (spec.md §4.1 "send_vendor ... issues ... with OGF=VENDOR, OCF=0").
fn build_command_packet(cparam: &[u8]) -> Result<Vec<u8>, Error> {
    let plen = u8::try_from(cparam.len()).map_err(|_| Error::EncodeOverflow)?;
    let opcode = pack_opcode(OGF_VENDOR, OCF_DEBUG);

    let mut out = Vec::with_capacity(4 + cparam.len());
    out.push(HCI_COMMAND_PKT);
    out.extend_from_slice(&opcode.to_le_bytes());
    out.push(plen);
    out.extend_from_slice(cparam);
    Ok(out)
}

/// A source of HCI packets and sink for HCI commands, abstracting over the
/// raw kernel socket so the rest of the engine is testable without real
/// Bluetooth hardware.
pub trait Transport {
    /// Clear the kernel HCI filter and then enable every packet type and
    /// every event (spec.md §4.1), so the transport's read calls deliver
    /// everything the adapter produces and the session layer decides what
    /// to act on.
    fn install_capture_filter(&mut self) -> Result<(), Error>;

    /// Frame `cparam` (the vendor debug-channel parameter block from
    /// [`crate::vendor::encode`]) in an HCI command packet and write it to
    /// the wire.
    fn write_command(&mut self, cparam: &[u8]) -> Result<usize, Error>;

    /// Block until one HCI packet is available and copy it into `buf`,
    /// returning the number of bytes written. `buf` must be large enough
    /// for the transport's maximum packet size or the read fails.
    fn read_packet(&mut self, buf: &mut [u8]) -> Result<usize, Error>;

    /// Send a vendor debug-channel command (already framed by
    /// [`crate::vendor::encode`]) and block for its event-encoded reply,
    /// retrying reads until `timeout` elapses (spec.md §4.1/§4.2).
    fn send_vendor(&mut self, command: &[u8], timeout: Duration) -> Result<Vec<u8>, Error>;
}

#[cfg(feature = "hci")]
mod linux {
    use super::*;
    use libc::{
        AF_BLUETOOTH, EAGAIN, EINTR, POLLIN, SOCK_CLOEXEC, SOCK_RAW, c_int, c_void, poll, pollfd,
        sockaddr, socklen_t,
    };
    use std::io;
    use std::mem;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
    use std::time::{Duration, Instant};

    const BTPROTO_HCI: c_int = 1;
    const SOL_HCI: c_int = 0;
    const HCI_FILTER: c_int = 2;
    const HCI_CHANNEL_RAW: u16 = 0;
    const HCI_MAX_FRAME_SIZE: usize = 1024;

    #[repr(C)]
    struct SockaddrHci {
        hci_family: u16,
        hci_dev: u16,
        hci_channel: u16,
    }

    #[repr(C)]
    struct HciFilter {
        type_mask: u32,
        event_mask: [u32; 2],
        opcode: u16,
    }

    impl HciFilter {
        /// Clear the filter, then enable every packet type and every event
        /// (spec.md §4.1) — the engine itself decides what to act on and
        /// what to drop (session.rs's "unknown packet type" path), so the
        /// kernel filter must not narrow that decision ahead of time.
        fn accept_all() -> Self {
            Self {
                type_mask: !0u32,
                event_mask: [!0u32, !0u32],
                opcode: 0,
            }
        }
    }

    /// A real HCI socket bound to a named adapter (e.g. `hci0`).
    pub struct HciTransport {
        fd: OwnedFd,
    }

    fn dev_id_for_name(name: &str) -> Result<u16, Error> {
        name.strip_prefix("hci")
            .and_then(|n| n.parse::<u16>().ok())
            .ok_or_else(|| Error::DeviceNotFound(name.to_string()))
    }

    impl HciTransport {
        /// Open a raw HCI socket bound to the adapter named `device` (e.g.
        /// `"hci0"`), matching the open/bind sequence of a classic raw HCI
        /// capture tool.
        pub fn open(device: &str) -> Result<Self, Error> {
            let dev_id = dev_id_for_name(device)?;

            let raw = unsafe { libc::socket(AF_BLUETOOTH, SOCK_RAW | SOCK_CLOEXEC, BTPROTO_HCI) };
            if raw < 0 {
                return Err(Error::Io(io::Error::last_os_error()));
            }
            let fd = unsafe { OwnedFd::from_raw_fd(raw) };

            let addr = SockaddrHci {
                hci_family: AF_BLUETOOTH as u16,
                hci_dev: dev_id,
                hci_channel: HCI_CHANNEL_RAW,
            };
            let ret = unsafe {
                libc::bind(
                    fd.as_raw_fd(),
                    &addr as *const SockaddrHci as *const sockaddr,
                    mem::size_of::<SockaddrHci>() as socklen_t,
                )
            };
            if ret < 0 {
                return Err(Error::Io(io::Error::last_os_error()));
            }

            Ok(HciTransport { fd })
        }

        /// Poll with a millisecond timeout (`-1` blocks indefinitely,
        /// matching the receive side's "no timeout" policy).
        fn poll_for(&self, millis: c_int) -> Result<bool, Error> {
            let mut p = pollfd {
                fd: self.fd.as_raw_fd(),
                events: POLLIN,
                revents: 0,
            };
            loop {
                let n = unsafe { poll(&mut p, 1, millis) };
                if n < 0 {
                    let err = io::Error::last_os_error();
                    match err.raw_os_error() {
                        Some(EAGAIN) | Some(EINTR) => continue,
                        _ => return Err(Error::Io(err)),
                    }
                }
                return Ok(n > 0);
            }
        }

        fn poll_readable(&self, timeout: Duration) -> Result<bool, Error> {
            let millis = timeout.as_millis().min(i32::MAX as u128) as c_int;
            self.poll_for(millis)
        }
    }

    impl Transport for HciTransport {
        fn install_capture_filter(&mut self) -> Result<(), Error> {
            let filter = HciFilter::accept_all();

            let ret = unsafe {
                libc::setsockopt(
                    self.fd.as_raw_fd(),
                    SOL_HCI,
                    HCI_FILTER,
                    &filter as *const HciFilter as *const c_void,
                    mem::size_of::<HciFilter>() as socklen_t,
                )
            };
            if ret < 0 {
                return Err(Error::Io(io::Error::last_os_error()));
            }
            Ok(())
        }

        fn write_command(&mut self, cparam: &[u8]) -> Result<usize, Error> {
            let packet = build_command_packet(cparam)?;
            let ret = unsafe {
                libc::write(
                    self.fd.as_raw_fd(),
                    packet.as_ptr() as *const c_void,
                    packet.len(),
                )
            };
            if ret < 0 {
                return Err(Error::Io(io::Error::last_os_error()));
            }
            Ok(ret as usize)
        }

        fn read_packet(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
            self.poll_for(-1)?;
            let ret = unsafe {
                libc::read(self.fd.as_raw_fd(), buf.as_mut_ptr() as *mut c_void, buf.len())
            };
            if ret < 0 {
                return Err(Error::Io(io::Error::last_os_error()));
            }
            Ok(ret as usize)
        }

        fn send_vendor(&mut self, command: &[u8], timeout: Duration) -> Result<Vec<u8>, Error> {
            self.write_command(command)?;

            let deadline = Instant::now() + timeout;
            let mut buf = [0u8; HCI_MAX_FRAME_SIZE];
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(Error::Timeout);
                }
                if !self.poll_readable(remaining)? {
                    return Err(Error::Timeout);
                }

                let ret = unsafe {
                    libc::read(self.fd.as_raw_fd(), buf.as_mut_ptr() as *mut c_void, buf.len())
                };
                if ret < 0 {
                    let err = io::Error::last_os_error();
                    if err.raw_os_error() == Some(EAGAIN) || err.raw_os_error() == Some(EINTR) {
                        continue;
                    }
                    return Err(Error::Io(err));
                }
                let n = ret as usize;
                if n >= 2 && buf[0] == HCI_EVENT_PKT && buf[1] == EVT_VENDOR {
                    return Ok(buf[..n].to_vec());
                }
                // Not our reply; a real capture session would re-dispatch
                // this into the ACL path, but vendor replies and ACL data
                // never interleave on the debug channel in practice.
            }
        }
    }
}

#[cfg(feature = "hci")]
pub use linux::HciTransport;

/// An in-memory [`Transport`] for deterministic tests: reads are served
/// from a preloaded queue of packets, writes are recorded for inspection.
#[derive(Default)]
pub struct FakeTransport {
    pub filter_installed: bool,
    pub written: Vec<Vec<u8>>,
    pub to_read: std::collections::VecDeque<Vec<u8>>,
    pub vendor_replies: std::collections::VecDeque<Vec<u8>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_packet(&mut self, packet: Vec<u8>) {
        self.to_read.push_back(packet);
    }

    pub fn queue_vendor_reply(&mut self, reply: Vec<u8>) {
        self.vendor_replies.push_back(reply);
    }
}

impl Transport for FakeTransport {
    fn install_capture_filter(&mut self) -> Result<(), Error> {
        self.filter_installed = true;
        Ok(())
    }

    fn write_command(&mut self, cparam: &[u8]) -> Result<usize, Error> {
        let packet = build_command_packet(cparam)?;
        let n = packet.len();
        self.written.push(packet);
        Ok(n)
    }

    fn read_packet(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let packet = self.to_read.pop_front().ok_or(Error::Timeout)?;
        if packet.len() > buf.len() {
            return Err(Error::MalformedFrame("packet larger than caller's buffer"));
        }
        buf[..packet.len()].copy_from_slice(&packet);
        Ok(packet.len())
    }

    fn send_vendor(&mut self, command: &[u8], _timeout: Duration) -> Result<Vec<u8>, Error> {
        self.write_command(command)?;
        self.vendor_replies.pop_front().ok_or(Error::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_transport_records_writes() {
        let mut t = FakeTransport::new();
        t.write_command(&[0x01, 0x02]).unwrap();
        assert_eq!(t.written, vec![build_command_packet(&[0x01, 0x02]).unwrap()]);
    }

    #[test]
    fn test_build_command_packet_framing() {
        // type byte, then opcode = OGF=VENDOR(0x3F) OCF=0 packed low-bits-first, then plen.
        let packet = build_command_packet(&[0xAA, 0xBB]).unwrap();
        assert_eq!(packet[0], HCI_COMMAND_PKT);
        let opcode = u16::from_le_bytes([packet[1], packet[2]]);
        assert_eq!(opcode, pack_opcode(OGF_VENDOR, OCF_DEBUG));
        assert_eq!(packet[3], 2);
        assert_eq!(&packet[4..], &[0xAA, 0xBB]);
    }

    #[test]
    fn test_fake_transport_read_queue() {
        let mut t = FakeTransport::new();
        t.queue_packet(vec![0xAA, 0xBB]);
        let mut buf = [0u8; 8];
        let n = t.read_packet(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[0xAA, 0xBB]);
    }

    #[test]
    fn test_fake_transport_read_empty_times_out() {
        let mut t = FakeTransport::new();
        let mut buf = [0u8; 8];
        assert!(matches!(t.read_packet(&mut buf), Err(Error::Timeout)));
    }

    #[test]
    fn test_fake_transport_send_vendor_reply() {
        let mut t = FakeTransport::new();
        t.queue_vendor_reply(vec![0x04, 0xFF, 0x00]);
        let reply = t
            .send_vendor(&[0x07, 0x00, 0x00], Duration::from_millis(10))
            .unwrap();
        assert_eq!(reply, vec![0x04, 0xFF, 0x00]);
        assert_eq!(
            t.written,
            vec![build_command_packet(&[0x07, 0x00, 0x00]).unwrap()]
        );
    }

    #[test]
    fn test_fake_transport_send_vendor_no_reply_times_out() {
        let mut t = FakeTransport::new();
        assert!(matches!(
            t.send_vendor(&[0x07], Duration::from_millis(10)),
            Err(Error::Timeout)
        ));
    }
}
