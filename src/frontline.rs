//! Frontline frame decoder (spec.md §4.3).
//!
//! Unpacks the vendor-proprietary encapsulation the CSR debug firmware uses
//! to deliver captured baseband packets, and recurses over successive
//! fragments appended to the same buffer.

use crate::error::Error;

/// The two known frontline header lengths, in bytes.
pub const HLEN_BC2: u8 = 8;
pub const HLEN_BC4: u8 = 10;

const FP_CLOCK_MASK: u32 = 0x07FF_FFFF;
const FP_STATUS_SHIFT: u32 = 27;
const FP_SLAVE_MASK: u32 = 1 << 27;

const FP_ADDR_MASK: u8 = 0x07;
const FP_TYPE_SHIFT: u8 = 3;
const FP_TYPE_MASK: u8 = 0x0F;

const FP_LEN_SHIFT: u32 = 2;
const FP_LEN_LLID_SHIFT: u32 = 0;
const FP_LEN_LLID_MASK: u32 = 0x03;

/// Standard Bluetooth baseband LLID values.
pub const LLID_L2CAP_CONT: u8 = 0b01;
pub const LLID_L2CAP_START: u8 = 0b10;
pub const LLID_LMP: u8 = 0b11;

/// Frontline type code used for digital-voice (SCO) slots; the payload
/// decoder only hexdumps these, never passing them to the LMP/L2CAP
/// decoders (spec.md §4.3 dispatch rules). Matches the standard Bluetooth
/// baseband packet-type nibble's DV encoding (`0b1000`), the same 4-bit
/// space `frame.type` is decoded from.
pub const TYPE_DV: u8 = 0x08;

/// Maximum number of frontline type codes the ignore-list can hold
/// (spec.md §9: "treat it as a small ordered sequence ... fixed ceiling is
/// part of the contract").
pub const MAX_IGNORE_TYPES: usize = 16;

/// Fixed-capacity set of frontline type codes to filter out.
pub type IgnoreTypes = heapless::Vec<u8, MAX_IGNORE_TYPES>;

/// A decoded view of one baseband fragment (spec.md §3 `FrontlineFrame`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrontlineFrame {
    pub hlen: u8,
    pub channel: u8,
    pub clock: u32,
    pub status: u8,
    pub master: bool,
    pub r#type: u8,
    pub addr: u8,
    pub llid: u8,
    pub plen: u16,
}

/// Which sub-decoder a fragment's payload should be dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Dv,
    Lmp,
    L2cap,
}

/// One fragment's decoded header plus the dispatch decision and payload
/// slice, handed to the caller to forward into the LMP/L2CAP decoders.
pub struct Decoded<'a> {
    pub frame: FrontlineFrame,
    pub dispatch: Dispatch,
    pub payload: &'a [u8],
}

fn parse_header(input: &[u8]) -> Result<FrontlineFrame, Error> {
    let hlen = *input.first().ok_or(Error::MalformedFrame("empty fragment"))?;
    if hlen != HLEN_BC2 && hlen != HLEN_BC4 {
        return Err(Error::Unsupported(hlen));
    }
    if input.len() < hlen as usize {
        return Err(Error::MalformedFrame("fragment shorter than its header"));
    }

    let channel = input[1];
    let clock_raw = u32::from_le_bytes([input[2], input[3], input[4], input[5]]);
    let clock = clock_raw & FP_CLOCK_MASK;
    let status = (clock_raw >> FP_STATUS_SHIFT) as u8;
    let master = (clock_raw & FP_SLAVE_MASK) == 0;

    let hdr0 = input[6];
    let r#type = (hdr0 >> FP_TYPE_SHIFT) & FP_TYPE_MASK;
    let addr = hdr0 & FP_ADDR_MASK;

    let len_word: u32 = if hlen == HLEN_BC2 {
        input[7] as u32
    } else {
        u16::from_le_bytes([input[7], input[8]]) as u32
    };
    let plen = (len_word >> FP_LEN_SHIFT) as u16;
    let llid = ((len_word >> FP_LEN_LLID_SHIFT) & FP_LEN_LLID_MASK) as u8;

    Ok(FrontlineFrame {
        hlen,
        channel,
        clock,
        status,
        master,
        r#type,
        addr,
        llid,
        plen,
    })
}

/// Decode every concatenated frontline fragment in `input`, invoking
/// `on_frame` for each one that survives the ignore filters, in order.
///
/// Recurses over the remaining tail after each fragment's header+payload,
/// exactly as spec.md §4.3 step 7 describes; stack depth is bounded by
/// `input.len() / HLEN_BC2` since every fragment consumes at least
/// `HLEN_BC2` bytes.
pub fn decode_fragments<'a, F>(
    input: &'a [u8],
    ignore_types: &IgnoreTypes,
    ignore_zero_length: bool,
    mut on_frame: F,
) -> Result<(), Error>
where
    F: FnMut(Decoded<'a>),
{
    decode_fragments_inner(input, ignore_types, ignore_zero_length, &mut on_frame)
}

fn decode_fragments_inner<'a, F>(
    input: &'a [u8],
    ignore_types: &IgnoreTypes,
    ignore_zero_length: bool,
    on_frame: &mut F,
) -> Result<(), Error>
where
    F: FnMut(Decoded<'a>),
{
    if input.is_empty() {
        return Ok(());
    }

    let frame = parse_header(input)?;

    log::debug!(
        "frontline: hlen={} channel={} clock={:#x} type={} addr={} llid={} plen={} master={}",
        frame.hlen,
        frame.channel,
        frame.clock,
        frame.r#type,
        frame.addr,
        frame.llid,
        frame.plen,
        frame.master
    );

    let hlen = frame.hlen as usize;
    let plen = frame.plen as usize;
    if hlen + plen > input.len() {
        return Err(Error::MalformedFrame(
            "declared payload length exceeds remaining bytes",
        ));
    }

    let filtered = ignore_types.contains(&frame.r#type)
        || (ignore_zero_length && frame.plen == 0);

    if filtered {
        // Open question (spec.md §9.1): a filtered fragment's appendix is
        // not decoded either. A firmware that multiplexes independent
        // fragments after a filtered one would have them collaterally
        // dropped; this preserves the source behavior rather than assuming
        // it's safe to change.
        return Ok(());
    }

    let payload = &input[hlen..hlen + plen];
    let dispatch = if frame.r#type == TYPE_DV {
        Dispatch::Dv
    } else if frame.llid == LLID_LMP {
        Dispatch::Lmp
    } else {
        Dispatch::L2cap
    };

    on_frame(Decoded {
        frame,
        dispatch,
        payload,
    });

    let consumed = hlen + plen;
    let remaining = &input[consumed..];
    if !remaining.is_empty() {
        decode_fragments_inner(remaining, ignore_types, ignore_zero_length, on_frame)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(hlen: u8, clock_raw: u32, hdr0: u8, len_word: u32) -> Vec<u8> {
        let mut buf = vec![hlen, 0x00];
        buf.extend_from_slice(&clock_raw.to_le_bytes());
        buf.push(hdr0);
        if hlen == HLEN_BC2 {
            buf.push(len_word as u8);
        } else {
            buf.extend_from_slice(&(len_word as u16).to_le_bytes());
            buf.push(0x00); // reserved byte
        }
        buf
    }

    #[test]
    fn test_unsupported_header_length() {
        let input = [0x05u8, 0, 0, 0, 0, 0, 0];
        let ignore = IgnoreTypes::new();
        let result = decode_fragments(&input, &ignore, false, |_| {});
        assert!(matches!(result, Err(Error::Unsupported(0x05))));
    }

    #[test]
    fn test_single_fragment_dispatch_l2cap() {
        // type=0, llid=LLID_L2CAP_START, plen=4
        let len_word = (4u32 << FP_LEN_SHIFT) | LLID_L2CAP_START as u32;
        let mut input = header(HLEN_BC4, 0, 0, len_word);
        input.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);

        let ignore = IgnoreTypes::new();
        let mut dispatches = Vec::new();
        decode_fragments(&input, &ignore, false, |d| {
            dispatches.push((d.dispatch, d.payload.to_vec()));
        })
        .unwrap();

        assert_eq!(dispatches.len(), 1);
        assert_eq!(dispatches[0].0, Dispatch::L2cap);
        assert_eq!(dispatches[0].1, vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_lmp_dispatch_by_llid() {
        let len_word = (2u32 << FP_LEN_SHIFT) | LLID_LMP as u32;
        let mut input = header(HLEN_BC4, 0, 0, len_word);
        input.extend_from_slice(&[0x01, 0x02]);

        let ignore = IgnoreTypes::new();
        let mut seen = None;
        decode_fragments(&input, &ignore, false, |d| seen = Some(d.dispatch)).unwrap();
        assert_eq!(seen, Some(Dispatch::Lmp));
    }

    #[test]
    fn test_master_role_from_clock_bit() {
        let len_word = 0u32; // plen=0, llid=0
        let input_master = header(HLEN_BC4, 0, 0, len_word);
        let input_slave = header(HLEN_BC4, FP_SLAVE_MASK, 0, len_word);

        let ignore = IgnoreTypes::new();
        let mut master_flag = None;
        decode_fragments(&input_master, &ignore, false, |d| {
            master_flag = Some(d.frame.master)
        })
        .unwrap();
        assert_eq!(master_flag, Some(true));

        let mut slave_flag = None;
        decode_fragments(&input_slave, &ignore, false, |d| {
            slave_flag = Some(d.frame.master)
        })
        .unwrap();
        assert_eq!(slave_flag, Some(false));
    }

    #[test]
    fn test_s3_two_concatenated_fragments_zero_length_filter() {
        // S3: an L2CAP-start fragment followed by a zero-length fragment.
        let input = crate::test_support::canned_frontline_stream();
        let ignore = IgnoreTypes::new();

        // Without the zero-length filter: two dispatches.
        let mut count = 0;
        decode_fragments(&input, &ignore, false, |_| count += 1).unwrap();
        assert_eq!(count, 2);

        // With ignore-zero-length on: only the first payload dispatch occurs.
        let mut count = 0;
        decode_fragments(&input, &ignore, true, |_| count += 1).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_ignore_type_skips_appendix() {
        let len_word_a = 0u32;
        // type occupies bits 3..7 of hdr0: set type=5
        let hdr0 = 5u8 << FP_TYPE_SHIFT;
        let frag_a = header(HLEN_BC4, 0, hdr0, len_word_a);

        let len_word_b = 0u32;
        let frag_b = header(HLEN_BC4, 0, 0, len_word_b);

        let mut input = frag_a;
        input.extend_from_slice(&frag_b);

        let mut ignore = IgnoreTypes::new();
        ignore.push(5).unwrap();

        let mut count = 0;
        decode_fragments(&input, &ignore, false, |_| count += 1).unwrap();
        assert_eq!(count, 0, "filtered fragment's appendix must not be decoded");
    }

    #[test]
    fn test_dv_type_forces_dv_dispatch() {
        // type=TYPE_DV, llid=LLID_LMP: dispatch must still go to Dv, not Lmp.
        let hdr0 = TYPE_DV << FP_TYPE_SHIFT;
        let len_word = (1u32 << FP_LEN_SHIFT) | LLID_LMP as u32;
        let mut input = header(HLEN_BC4, 0, hdr0, len_word);
        input.push(0xAB);

        let ignore = IgnoreTypes::new();
        let mut seen = None;
        decode_fragments(&input, &ignore, false, |d| seen = Some(d.dispatch)).unwrap();
        assert_eq!(seen, Some(Dispatch::Dv));
    }

    #[test]
    fn test_invariant_sum_of_hlen_plus_plen_equals_input_len() {
        let len_word_a = 2u32 << FP_LEN_SHIFT;
        let mut frag_a = header(HLEN_BC2, 0, 0, len_word_a);
        frag_a.extend_from_slice(&[9, 9]);

        let len_word_b = 1u32 << FP_LEN_SHIFT;
        let mut frag_b = header(HLEN_BC4, 0, 0, len_word_b);
        frag_b.push(7);

        let mut input = frag_a.clone();
        input.extend_from_slice(&frag_b);

        let total_consumed = frag_a.len() + frag_b.len();
        assert_eq!(total_consumed, input.len());

        let ignore = IgnoreTypes::new();
        let mut frames = 0;
        decode_fragments(&input, &ignore, false, |_| frames += 1).unwrap();
        assert_eq!(frames, 2);
    }

    #[test]
    fn test_declared_length_exceeds_remaining_is_fatal() {
        let len_word = (100u32 << FP_LEN_SHIFT) | LLID_LMP as u32;
        let input = header(HLEN_BC4, 0, 0, len_word);
        let ignore = IgnoreTypes::new();
        let result = decode_fragments(&input, &ignore, false, |_| {});
        assert!(matches!(result, Err(Error::MalformedFrame(_))));
    }
}
