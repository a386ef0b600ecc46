//! ECM partial-page protocol (spec.md §4.5's "ECM partial-page
//! protocol"): a 256-slot buffer indexed by frame sequence number, the
//! good-frame bitmap carried by PPR, and the retransmit-round counter
//! that drives CTC/EOR escalation.

use crate::consts::{ECM_FRAME_LEN_HIGH, ECM_FRAME_LEN_LOW, ECM_MAX_FRAMES, MAX_PPR_ROUNDS};

/// Holds up to 256 received (or pending-send) ECM frames for one
/// partial page.
#[derive(Debug, Clone)]
pub struct PartialPage {
    slots: Vec<Option<Vec<u8>>>,
    frame_len: usize,
}

impl PartialPage {
    /// `high_speed` selects the 256-byte payload size used at >=7200 bps
    /// rather than the 64-byte size used at <=4800 bps.
    pub fn new(high_speed: bool) -> Self {
        Self {
            slots: vec![None; ECM_MAX_FRAMES],
            frame_len: if high_speed { ECM_FRAME_LEN_HIGH } else { ECM_FRAME_LEN_LOW },
        }
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    pub fn store_frame(&mut self, seq: u8, payload: &[u8]) {
        self.slots[seq as usize] = Some(payload.to_vec());
    }

    /// Returns a stored frame's payload by sequence number, for selective
    /// retransmission or final page assembly.
    pub fn frame_at(&self, seq: u8) -> Option<&[u8]> {
        self.slots[seq as usize].as_deref()
    }

    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Whether every frame in `0..total_frames` has been stored. Unlike
    /// [`Self::is_complete`], this does not require a full 256-frame
    /// block, since most pages end partway through one.
    pub fn is_complete_through(&self, total_frames: usize) -> bool {
        total_frames > 0 && self.slots[..total_frames.min(self.slots.len())].iter().all(Option::is_some)
    }

    /// The 256-bit good-frame map PPR/MCF is built from, one bit per
    /// slot, LSB-first within each byte.
    pub fn good_frame_bitmap(&self) -> [u8; 32] {
        let mut bitmap = [0u8; 32];
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.is_some() {
                bitmap[i / 8] |= 1 << (i % 8);
            }
        }
        bitmap
    }

    /// Sequence numbers the PPR bitmap marks as not-yet-received, which
    /// the sender must resend.
    pub fn frames_to_resend(bitmap: &[u8; 32]) -> Vec<u8> {
        (0..ECM_MAX_FRAMES as u16)
            .filter(|&i| bitmap[(i / 8) as usize] & (1 << (i % 8)) == 0)
            .map(|i| i as u8)
            .collect()
    }

    /// All received frames, in sequence order, for handing off to the
    /// page sink once the block is complete.
    pub fn ordered_frames(&self) -> Vec<(u8, &[u8])> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_deref().map(|data| (i as u8, data)))
            .collect()
    }

    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
    }
}

/// Counts consecutive unsuccessful PPR rounds for one partial page,
/// driving the CTC (speed step-down) and eventual EOR escalation from
/// spec.md §4.5.
#[derive(Debug, Default, Clone, Copy)]
pub struct RetransmitTracker {
    rounds: u8,
}

impl RetransmitTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one more round that ended in PPR (not MCF). Returns true
    /// once [`MAX_PPR_ROUNDS`] has been reached and a CTC is due.
    pub fn record_ppr_round(&mut self) -> bool {
        self.rounds += 1;
        self.rounds >= MAX_PPR_ROUNDS
    }

    pub fn reset(&mut self) {
        self.rounds = 0;
    }

    pub fn rounds(&self) -> u8 {
        self.rounds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmap_reflects_stored_frames_only() {
        let mut page = PartialPage::new(true);
        page.store_frame(0, &[0u8; 256]);
        page.store_frame(255, &[1u8; 256]);
        let bitmap = page.good_frame_bitmap();
        assert_eq!(bitmap[0] & 1, 1);
        assert_eq!(bitmap[31] & 0b1000_0000, 0b1000_0000);
        assert_eq!(bitmap[1], 0);
        assert!(!page.is_complete());
    }

    #[test]
    fn frames_to_resend_lists_every_unset_bit() {
        let mut page = PartialPage::new(false);
        for i in 0..256u16 {
            if i != 3 && i != 200 {
                page.store_frame(i as u8, &[0u8; 64]);
            }
        }
        let bitmap = page.good_frame_bitmap();
        let missing = PartialPage::frames_to_resend(&bitmap);
        assert_eq!(missing, vec![3, 200]);
        assert!(!page.is_complete());
    }

    #[test]
    fn full_page_is_complete_with_all_bits_set() {
        let mut page = PartialPage::new(true);
        for i in 0..256u16 {
            page.store_frame(i as u8, &[0u8; 256]);
        }
        assert!(page.is_complete());
        assert_eq!(PartialPage::frames_to_resend(&page.good_frame_bitmap()), Vec::<u8>::new());
    }

    #[test]
    fn frame_at_returns_stored_payload_only() {
        let mut page = PartialPage::new(false);
        page.store_frame(5, &[9u8; 64]);
        assert_eq!(page.frame_at(5), Some(&[9u8; 64][..]));
        assert_eq!(page.frame_at(6), None);
    }

    #[test]
    fn is_complete_through_ignores_slots_past_the_page_length() {
        let mut page = PartialPage::new(false);
        for i in 0..10u8 {
            page.store_frame(i, &[0u8; 64]);
        }
        assert!(page.is_complete_through(10));
        assert!(!page.is_complete_through(11));
        assert!(!page.is_complete());
    }

    #[test]
    fn is_complete_through_zero_is_never_satisfied() {
        // total_frames == 0 means the closing RCP hasn't been read yet
        // (or was lost), not "an empty page is done".
        let page = PartialPage::new(false);
        assert!(!page.is_complete_through(0));
    }

    #[test]
    fn retransmit_tracker_fires_ctc_after_max_rounds() {
        let mut tracker = RetransmitTracker::new();
        for _ in 0..MAX_PPR_ROUNDS - 1 {
            assert!(!tracker.record_ppr_round());
        }
        assert!(tracker.record_ppr_round());
    }
}
