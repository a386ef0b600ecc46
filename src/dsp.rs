//! Minimal numeric primitives the modem and tone layers are built on.
//!
//! Real symbol timing recovery, equalization and matched filtering are an
//! out-of-scope collaborator (spec.md §1 treats "individual modem
//! demodulator internals" as given); what lives here is only the small,
//! self-contained numeric machinery those opaque modems are described as
//! sitting on top of: a phase accumulator and software PLL shape borrowed
//! from carrier recovery and run open-loop here.

/// A direct digital synthesis phase accumulator, the same shape as a
/// software PLL but driven open-loop for tone generation.
#[derive(Debug, Clone, Copy)]
pub struct Dds {
    phase: u32,
    step: u32,
}

impl Dds {
    /// `freq_hz` at `sample_rate` Hz, phase advance quantized to a u32
    /// accumulator so the same table lookup a carrier-recovery PLL would
    /// use serves tone generation too.
    pub fn new(freq_hz: f32, sample_rate: u32) -> Self {
        let step = ((freq_hz as f64 / sample_rate as f64) * (u32::MAX as f64 + 1.0)) as u32;
        Self { phase: 0, step }
    }

    /// Advances one sample and returns the instantaneous signed sample,
    /// scaled so the caller can apply its own level.
    pub fn next_sample(&mut self) -> i16 {
        let phase_u8 = (self.phase >> 24) as u8;
        self.phase = self.phase.wrapping_add(self.step);
        crate::tables::sine(phase_u8)
    }

    pub fn reset(&mut self) {
        self.phase = 0;
    }
}

const FULL_SCALE_DBM0: f32 = 3.14;

/// Converts a dBm0 level into a 16-bit PCM amplitude, using the standard
/// 0 dBm0 = 3.14 dBV reference used throughout the original tone tables.
pub fn dbm0_to_amplitude(dbm0: f32) -> f32 {
    10f32.powf((dbm0 - FULL_SCALE_DBM0) / 20.0) * i16::MAX as f32
}

/// Inverse of [`dbm0_to_amplitude`]: converts a linear PCM amplitude
/// (typically a [`PowerMeter`] level) back into dBm0, used for the
/// carrier-detect thresholds in spec.md §4.3's table.
pub fn amplitude_to_dbm0(amplitude: f32) -> f32 {
    const FLOOR_DBM0: f32 = -99.0;
    if amplitude <= 1.0 {
        return FLOOR_DBM0;
    }
    20.0 * (amplitude / i16::MAX as f32).log10() + FULL_SCALE_DBM0
}

/// Scales a raw DDS unit sample (already `i16::MAX`-normalized by the
/// sine table) down to the requested level.
pub fn scale_sample(raw: i16, level_dbm0: f32) -> i16 {
    let gain = dbm0_to_amplitude(level_dbm0) / i16::MAX as f32;
    (raw as f32 * gain) as i16
}

/// A simple one-pole leaky integrator used for the energy estimate that
/// drives carrier-detect/training-check decisions; not a substitute for
/// the real matched filters inside the opaque modem demodulators.
#[derive(Debug, Clone, Copy)]
pub struct PowerMeter {
    level: f32,
    alpha: f32,
}

impl PowerMeter {
    pub fn new(alpha: f32) -> Self {
        Self { level: 0.0, alpha }
    }

    pub fn update(&mut self, sample: i16) -> f32 {
        let magnitude = (sample as f32).abs();
        self.level += self.alpha * (magnitude - self.level);
        self.level
    }

    pub fn level(&self) -> f32 {
        self.level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dds_produces_periodic_output() {
        let mut dds = Dds::new(1000.0, 8000);
        let first: Vec<i16> = (0..8).map(|_| dds.next_sample()).collect();
        dds.reset();
        let second: Vec<i16> = (0..8).map(|_| dds.next_sample()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn power_meter_tracks_constant_amplitude() {
        let mut m = PowerMeter::new(0.2);
        for _ in 0..200 {
            m.update(10_000);
        }
        assert!((m.level() - 10_000.0).abs() < 50.0);
    }
}
