//! Fixed-point and exponential helpers shared by the voice and envelope code.

/// Number of fractional bits in a sample cursor.
pub const FRAC_BITS: u32 = 8;
/// One whole sample step in cursor units.
pub const FRAC_UNIT: i32 = 1 << FRAC_BITS;
/// Mask selecting the fractional part of a cursor.
pub const FRAC_MASK: i32 = FRAC_UNIT - 1;

/// Pitch shifts are expressed in 1/256 semitone units.
pub const UNITS_PER_OCTAVE: f64 = 3072.0;

/// Full scale of a 14-bit pan value. Centre is half of it.
pub const PAN_FULL: i32 = 16384;
pub const PAN_CENTER: i32 = 8192;

/// Retrigger accumulator wraps at this value.
pub const RETRIGGER_PERIOD: i64 = 1 << 20;

/// Converts a pitch shift into a per-output-frame cursor increment.
///
/// The result is never below 1 so that a voice always makes progress.
pub fn pitch_increment(sample_rate: u32, shift: i32, output_rate: u32) -> i32 {
    let ratio = f64::from(sample_rate) * 256.0 * 2_f64.powf(f64::from(shift) / UNITS_PER_OCTAVE)
        / f64::from(output_rate);
    ((ratio + 0.5) as i32).max(1)
}

/// Per-update counter step for an envelope rate, scaled by the note's pitch factor.
pub fn rate_step(rate: i32, pitch_factor: f64) -> i32 {
    if rate > 0 {
        (128.0 * 2_f64.powf(f64::from(rate) * pitch_factor) + 0.5) as i32
    } else {
        128
    }
}

/// Pitch factor used to scale envelope rates: higher notes run through faster.
pub fn pitch_factor(note: i32, glide: i32) -> f64 {
    5.086_263_020_833_333E-6 * f64::from(((note - 60) << 8) + glide)
}

/// Attenuation applied by the decay counter.
pub fn decay_attenuation(volume: i32, decay: i32, position: i32) -> i32 {
    let halvings = f64::from(decay) * f64::from(position) * 1.953_125E-5;
    (f64::from(volume) * 0.5_f64.powf(halvings) + 0.5) as i32
}

/// Amount the portamento glide shrinks per update.
pub fn portamento_step(portamento_time: i32) -> i32 {
    (16.0 * 2_f64.powf(4.921_259_842_519_685E-4 * f64::from(portamento_time)) + 0.5) as i32
}

/// Maps the 14-bit retrigger control onto the accumulator rate.
pub fn retrigger_rate(control: i32) -> i32 {
    (2_097_152.0 * 2_f64.powf(5.493_164_062_5E-4 * f64::from(control)) + 0.5) as i32
}

/// One period of the vibrato sine spans 512 phase steps.
pub fn vibrato_sine(phase: i32) -> f64 {
    (0.012_271_846_303_085_13 * f64::from(phase & 511)).sin()
}

/// Gain of the first output channel for a given pan (0 = hard first channel).
pub fn left_gain(volume: i32, pan: i32) -> i32 {
    let pan = pan.clamp(0, PAN_FULL);
    (f64::from(volume) * (f64::from(PAN_FULL - pan) / 8192.0).sqrt() + 0.5) as i32
}

/// Gain of the second output channel for a given pan.
pub fn right_gain(volume: i32, pan: i32) -> i32 {
    let pan = pan.clamp(0, PAN_FULL);
    (f64::from(volume) * (f64::from(pan) / 8192.0).sqrt() + 0.5) as i32
}

/// Saturates a 24-bit accumulator sample and narrows it to 16 bits.
pub fn narrow(sample: i32) -> i16 {
    (sample.clamp(-0x80_0000, 0x7F_FFFF) >> 8) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unity_pitch_is_256() {
        assert_eq!(pitch_increment(44100, 0, 44100), 256);
        assert_eq!(pitch_increment(22050, 0, 44100), 128);
        assert_eq!(pitch_increment(44100, 3072, 44100), 512);
        assert_eq!(pitch_increment(1, -30000, 44100), 1);
    }

    #[test]
    fn centre_pan_splits_evenly() {
        assert_eq!(left_gain(1000, PAN_CENTER), 1000);
        assert_eq!(right_gain(1000, PAN_CENTER), 1000);
        assert_eq!(left_gain(1000, PAN_FULL), 0);
        assert_eq!(right_gain(1000, 0), 0);
    }

    #[test]
    fn narrowing_saturates() {
        assert_eq!(narrow(0x7F_FFFF), i16::MAX);
        assert_eq!(narrow(0x0FFF_FFFF), i16::MAX);
        assert_eq!(narrow(-0x0FFF_FFFF), i16::MIN);
        assert_eq!(narrow(256), 1);
        assert_eq!(narrow(-256), -1);
    }

    #[test]
    fn rate_without_value_steps_by_128() {
        assert_eq!(rate_step(0, 1.0), 128);
        assert_eq!(rate_step(10, 0.0), 128);
        assert!(rate_step(10, pitch_factor(72, 0)) > 128);
        assert!(rate_step(10, pitch_factor(48, 0)) < 128);
    }

    #[test]
    fn retrigger_rate_doubles_per_octave_of_control() {
        let base = retrigger_rate(0);
        assert_eq!(base, 2_097_152);
        let doubled = retrigger_rate(1820);
        assert!((doubled - 2 * base).abs() < base / 100);
    }
}
