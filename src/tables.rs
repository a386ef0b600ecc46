//! Process-wide, read-only lookup tables.
//!
//! The original source lazily initialises these on first use and relies on
//! a benign data race (every thread computes the same contents). Per the
//! teacher's own guidance for a memory-safe port ("init tables once at
//! session-create or program start; the concurrency question evaporates"),
//! `faxline` instead initialises them once behind [`std::sync::OnceLock`]
//! and never again.

use std::sync::OnceLock;

/// A 256-entry mu-law-ish sine magnitude table used by the tone generators
/// in [`crate::tone`]. Raw DSP primitives (DDS phase accumulators, pulse
/// shapers) are an out-of-scope collaborator per spec.md §1; this table is
/// the minimal numeric utility `faxline` owns directly because the tone
/// generator contract (exact CNG/CED frequency and level) is in scope.
fn sine_table() -> &'static [i16; 256] {
    static TABLE: OnceLock<[i16; 256]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut t = [0i16; 256];
        for (i, slot) in t.iter_mut().enumerate() {
            let theta = (i as f64) * std::f64::consts::TAU / 256.0;
            *slot = (theta.sin() * i16::MAX as f64) as i16;
        }
        t
    })
}

/// Samples the sine table at a given 0..256 phase, used by [`crate::tone`].
pub fn sine(phase_u8: u8) -> i16 {
    sine_table()[phase_u8 as usize]
}

/// A diagnostic-only country/vendor lookup for NSF/NSC/NSS frames, mirroring
/// `original_source/src/t35.c`. Not needed for protocol correctness: used
/// solely to produce a friendlier log line when a non-standard frame goes
/// by.
pub fn nsf_vendor_lookup(country_code: u8, vendor: [u8; 2]) -> &'static str {
    static TABLE: OnceLock<Vec<(u8, [u8; 2], &'static str)>> = OnceLock::new();
    let table = TABLE.get_or_init(|| {
        vec![
            (0xB5, [0x00, 0x00], "generic"),
            (0xB5, [0x00, 0x01], "hayes-compatible"),
            (0x00, [0x00, 0x00], "unknown"),
        ]
    });
    table
        .iter()
        .find(|(cc, v, _)| *cc == country_code && *v == vendor)
        .map(|(_, _, label)| *label)
        .unwrap_or("unrecognized")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sine_table_is_stable_across_calls() {
        assert_eq!(sine(0), sine(0));
        assert_eq!(sine(64), sine_table()[64]);
    }

    #[test]
    fn nsf_lookup_falls_back_gracefully() {
        assert_eq!(nsf_vendor_lookup(0xFF, [0xFF, 0xFF]), "unrecognized");
        assert_eq!(nsf_vendor_lookup(0xB5, [0x00, 0x00]), "generic");
    }
}
