//! T.30 frame encode/decode: the HDLC address/control prefix, the
//! capability-mask bit fields carried by DIS/DCS, and the small per-FCF
//! payloads (CFR/FTT/MCF/RTP/RTN/PPR/MPS/EOM/EOP/PPS/DCN).
//!
//! The exact ITU bit assignment inside DIS/DCS octets 4-6 is a large,
//! mostly-irrelevant-to-this-crate table (dozens of single-purpose bits
//! for features this stack doesn't implement, like polling or V.8). What
//! *is* load-bearing — because SPEC_FULL.md §4.7 names it — is that the
//! modem-capability nibble lives at FIF byte 4 and the ECM bit at byte 6;
//! `faxline` keeps those two positions and packs the rest of its (much
//! smaller) capability set compactly around them rather than reproducing
//! ITU T.30 Table 2's full bit-for-bit layout.

use bitflags::bitflags;

use super::fcf::Fcf;

/// HDLC address octet used throughout T.30 (all-stations).
pub const ADDRESS: u8 = 0xFF;
/// HDLC control octet for a U-frame carrying a single information field.
pub const CONTROL: u8 = 0x03;

bitflags! {
    /// Which modem/rate combinations are supported, ordered (via
    /// [`RATE_TABLE`]) from fastest to slowest for fallback negotiation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ModemMask: u8 {
        const V27_2400  = 1 << 0;
        const V27_4800  = 1 << 1;
        const V29_7200  = 1 << 2;
        const V29_9600  = 1 << 3;
        const V17_7200  = 1 << 4;
        const V17_9600  = 1 << 5;
        const V17_12000 = 1 << 6;
        const V17_14400 = 1 << 7;
    }

    /// T.4/T.6 compression schemes offered/selected.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CompressionMask: u8 {
        const MH  = 1 << 0;
        const MR  = 1 << 1;
        const MMR = 1 << 2;
    }

    /// Vertical resolutions offered/selected.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ResolutionMask: u8 {
        const STANDARD  = 1 << 0;
        const FINE      = 1 << 1;
        const SUPERFINE = 1 << 2;
    }

    /// Page widths offered/selected.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageSizeMask: u8 {
        const A4 = 1 << 0;
        const B4 = 1 << 1;
        const A3 = 1 << 2;
    }
}

/// One row of the fastest-to-slowest modem/rate fallback table (spec.md
/// §4.5 "step down one row of the modem table").
pub const RATE_TABLE: &[(ModemMask, u32)] = &[
    (ModemMask::V17_14400, 14_400),
    (ModemMask::V17_12000, 12_000),
    (ModemMask::V17_9600, 9_600),
    (ModemMask::V17_7200, 7_200),
    (ModemMask::V29_9600, 9_600),
    (ModemMask::V29_7200, 7_200),
    (ModemMask::V27_4800, 4_800),
    (ModemMask::V27_2400, 2_400),
];

/// The capability/negotiation fields carried by DIS, DTC, and DCS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityFields {
    pub modems: ModemMask,
    pub compression: CompressionMask,
    pub resolution: ResolutionMask,
    pub page_size: PageSizeMask,
    pub ecm_allowed: bool,
}

impl CapabilityFields {
    /// Encodes into the three FIF bytes that follow the FCF (bytes 4-6).
    pub fn encode(self) -> [u8; 3] {
        [
            self.modems.bits(),
            self.compression.bits() | (self.resolution.bits() << 3) | (self.page_size.bits() << 6),
            self.ecm_allowed as u8,
        ]
    }

    pub fn decode(bytes: [u8; 3]) -> Self {
        Self {
            modems: ModemMask::from_bits_truncate(bytes[0]),
            compression: CompressionMask::from_bits_truncate(bytes[1] & 0b0000_0111),
            resolution: ResolutionMask::from_bits_truncate((bytes[1] >> 3) & 0b0000_0111),
            page_size: PageSizeMask::from_bits_truncate(bytes[1] >> 6),
            ecm_allowed: bytes[2] & 1 != 0,
        }
    }

    /// The capability-clip the T.38 gateway applies when it is configured
    /// for a narrower modem set than what passes through it
    /// (SPEC_FULL.md §4.7's "DIS/DCS capabilities clip").
    pub fn clip_modems(&mut self, supported: ModemMask) {
        self.modems &= supported;
    }

    /// The ECM-suppression edit a gateway applies when `ecm_allowed` is
    /// configured false (SPEC_FULL.md §4.7's "DIS ECM bit clear").
    pub fn clear_ecm(&mut self) {
        self.ecm_allowed = false;
    }
}

/// Builds a complete HDLC-framed byte sequence (address, control, FCF,
/// any extra FIF bytes) for the given function code. CRC is appended by
/// [`crate::hdlc::HdlcTransmitter::push_frame`], not here.
pub fn build(fcf: Fcf, is_final: bool, fif: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(3 + fif.len());
    out.push(ADDRESS);
    out.push(CONTROL);
    out.push(fcf.byte() | (is_final as u8));
    out.extend_from_slice(fif);
    out
}

/// Reads the FCF and final-frame bit back out of a received frame's
/// third byte.
pub fn read_fcf(frame: &[u8]) -> Option<(Fcf, bool)> {
    let byte = *frame.get(2)?;
    let is_final = byte & 1 != 0;
    let fcf = Fcf::from_byte(byte & !1)?;
    Some((fcf, is_final))
}

pub fn build_dis(is_final: bool, fields: CapabilityFields) -> Vec<u8> {
    build(Fcf::Dis, is_final, &fields.encode())
}

pub fn build_dtc(is_final: bool, fields: CapabilityFields) -> Vec<u8> {
    build(Fcf::Dtc, is_final, &fields.encode())
}

pub fn build_dcs(is_final: bool, fields: CapabilityFields) -> Vec<u8> {
    build(Fcf::Dcs, is_final, &fields.encode())
}

/// Reads the capability fields out of a DIS/DTC/DCS frame's FIF.
pub fn read_capability_fields(frame: &[u8]) -> Option<CapabilityFields> {
    let fif = frame.get(3..6)?;
    Some(CapabilityFields::decode([fif[0], fif[1], fif[2]]))
}

/// PPR's FIF is the 256-bit (32-byte) good-frame bitmap from
/// [`crate::t30::ecm::PartialPage`].
pub fn build_ppr(is_final: bool, bitmap: &[u8; 32]) -> Vec<u8> {
    build(Fcf::Ppr, is_final, bitmap)
}

pub fn read_ppr_bitmap(frame: &[u8]) -> Option<[u8; 32]> {
    let fif = frame.get(3..35)?;
    let mut bitmap = [0u8; 32];
    bitmap.copy_from_slice(fif);
    Some(bitmap)
}

/// FCD's FIF is a one-byte frame sequence number followed by up to 256
/// bytes of T.4-coded page data: one ECM partial-page frame
/// (spec.md §4.5).
pub fn build_fcd(is_final: bool, seq: u8, payload: &[u8]) -> Vec<u8> {
    let mut fif = Vec::with_capacity(1 + payload.len());
    fif.push(seq);
    fif.extend_from_slice(payload);
    build(Fcf::Fcd, is_final, &fif)
}

pub fn read_fcd(frame: &[u8]) -> Option<(u8, &[u8])> {
    let seq = *frame.get(3)?;
    Some((seq, frame.get(4..).unwrap_or(&[])))
}

/// RCP closes an ECM partial-page block. Its one FIF byte is the number
/// of FCD frames just sent, with a full 256-frame block wrapping to 0
/// (the same modulo-256 convention the FCD sequence number itself uses).
pub fn build_rcp(is_final: bool, frame_count: u8) -> Vec<u8> {
    build(Fcf::Rcp, is_final, &[frame_count])
}

pub fn read_rcp_frame_count(frame: &[u8]) -> Option<u8> {
    frame.get(3).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_fields_round_trip_through_encode_decode() {
        let fields = CapabilityFields {
            modems: ModemMask::V29_9600 | ModemMask::V17_14400,
            compression: CompressionMask::MH | CompressionMask::MMR,
            resolution: ResolutionMask::FINE,
            page_size: PageSizeMask::A4 | PageSizeMask::B4,
            ecm_allowed: true,
        };
        let encoded = fields.encode();
        assert_eq!(CapabilityFields::decode(encoded), fields);
    }

    #[test]
    fn dis_frame_round_trips_through_build_and_read() {
        let fields = CapabilityFields {
            modems: ModemMask::V29_7200,
            compression: CompressionMask::MH,
            resolution: ResolutionMask::STANDARD,
            page_size: PageSizeMask::A4,
            ecm_allowed: false,
        };
        let frame = build_dis(true, fields);
        let (fcf, is_final) = read_fcf(&frame).unwrap();
        assert_eq!(fcf, Fcf::Dis);
        assert!(is_final);
        assert_eq!(read_capability_fields(&frame), Some(fields));
    }

    #[test]
    fn clip_modems_narrows_but_never_widens() {
        let mut fields = CapabilityFields {
            modems: ModemMask::all(),
            compression: CompressionMask::MH,
            resolution: ResolutionMask::STANDARD,
            page_size: PageSizeMask::A4,
            ecm_allowed: true,
        };
        fields.clip_modems(ModemMask::V29_9600 | ModemMask::V27_2400);
        assert_eq!(fields.modems, ModemMask::V29_9600 | ModemMask::V27_2400);
    }

    #[test]
    fn fcd_frame_round_trips_sequence_number_and_payload() {
        let payload = [7u8; 64];
        let frame = build_fcd(false, 42, &payload);
        let (seq, data) = read_fcd(&frame).unwrap();
        assert_eq!(seq, 42);
        assert_eq!(data, &payload[..]);
    }

    #[test]
    fn rcp_frame_count_wraps_a_full_block_to_zero() {
        let frame = build_rcp(true, 0);
        assert_eq!(read_rcp_frame_count(&frame), Some(0));
        let frame = build_rcp(true, 200);
        assert_eq!(read_rcp_frame_count(&frame), Some(200));
    }

    #[test]
    fn rate_table_is_sorted_fastest_first() {
        for pair in RATE_TABLE.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
    }
}
