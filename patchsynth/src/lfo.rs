use crate::envelope::Envelope;
use crate::synth_math::vibrato_sine;

/// Pitch vibrato driven once per update.
#[derive(Debug, Default, Clone)]
pub(crate) struct Lfo {
    updates: i32,
    phase: i32,
}

impl Lfo {
    pub(crate) fn advance(&mut self, frequency: i32) {
        self.updates += 1;
        self.phase = self.phase.wrapping_add(frequency);
    }

    /// Current pitch offset in 1/256 semitones.
    ///
    /// The patch depth fades in over the delay, modulation adds on top of it.
    pub(crate) fn shift(&self, envelope: &Envelope, modulation: i32) -> i32 {
        if envelope.vibrato_hz <= 0 || (envelope.vibrato_cents <= 0 && modulation <= 0) {
            return 0;
        }

        let mut depth = envelope.vibrato_cents << 2;
        let delay = envelope.vibrato_delay_ms << 1;
        if self.updates < delay {
            depth = depth * self.updates / delay;
        }
        depth += modulation >> 7;

        (vibrato_sine(self.phase) * f64::from(depth)) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vibrato(cents: i32, hz: i32, delay_ms: i32) -> Envelope {
        Envelope {
            vibrato_cents: cents,
            vibrato_hz: hz,
            vibrato_delay_ms: delay_ms,
            ..Default::default()
        }
    }

    #[test]
    fn silent_without_rate() {
        let mut lfo = Lfo::default();
        lfo.advance(0);
        assert_eq!(lfo.shift(&vibrato(50, 0, 0), 16383), 0);
    }

    #[test]
    fn quarter_phase_reaches_full_depth() {
        let mut lfo = Lfo::default();
        lfo.advance(128);
        assert_eq!(lfo.shift(&vibrato(25, 128, 0), 0), 100);
    }

    #[test]
    fn depth_ramps_in_over_the_delay() {
        let envelope = vibrato(25, 128, 2);
        let mut lfo = Lfo::default();
        lfo.advance(128);
        assert_eq!(lfo.shift(&envelope, 0), 25);
        for _ in 0..4 {
            lfo.advance(0);
        }
        assert_eq!(lfo.shift(&envelope, 0), 100);
    }

    #[test]
    fn modulation_adds_depth() {
        let mut lfo = Lfo::default();
        lfo.advance(128);
        assert_eq!(lfo.shift(&vibrato(0, 128, 0), 127 << 7), 127);
    }
}
