use crate::synth_math::{decay_attenuation, rate_step};

/// Halvings of the decay counter after which a voice is treated as silent.
const DECAY_SILENT_HALVINGS: f64 = 24.0;

/// A point of a piecewise-linear amplitude shape.
///
/// `time` is in units of 256 counter steps, `level` is a gain where 64 is unity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Breakpoint {
    pub time: u8,
    pub level: i8,
}

/// Piecewise-linear amplitude shape used for the rise and fall of a note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Curve {
    points: Box<[Breakpoint]>,
}

impl Curve {
    /// Returns `None` for an empty shape.
    pub fn new(points: Vec<Breakpoint>) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        Some(Self {
            points: points.into_boxed_slice(),
        })
    }

    /// Reads `(time, level)` byte pairs. A trailing odd byte is ignored.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let points = bytes
            .chunks_exact(2)
            .map(|pair| Breakpoint {
                time: pair[0],
                level: pair[1] as i8,
            })
            .collect();
        Self::new(points)
    }

    pub fn points(&self) -> &[Breakpoint] {
        &self.points
    }

    fn time_at(&self, index: usize) -> i32 {
        i32::from(self.points[index].time) << 8
    }

    fn last(&self) -> usize {
        self.points.len() - 1
    }

    fn seek(&self, index: &mut usize, position: i32) {
        while *index < self.last() && position > self.time_at(*index + 1) {
            *index += 1;
        }
    }

    fn is_final(&self, index: usize) -> bool {
        index >= self.last()
    }

    /// Level at `position`, interpolated between the bracketing breakpoints.
    pub(crate) fn level(&self, index: usize, position: i32) -> i32 {
        let index = index.min(self.last());
        let mut level = i32::from(self.points[index].level);
        if index < self.last() {
            let start = self.time_at(index);
            let span = self.time_at(index + 1) - start;
            if span > 0 {
                let next = i32::from(self.points[index + 1].level);
                level += (position - start) * (next - level) / span;
            }
        }
        level
    }
}

/// Per-note amplitude and vibrato parameters, shared by every voice of a note slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    pub attack: i32,
    pub decay: i32,
    pub release: i32,
    pub sustain: i32,
    pub vibrato_cents: i32,
    pub vibrato_hz: i32,
    pub vibrato_delay_ms: i32,
    pub rise_curve: Option<Curve>,
    pub fall_curve: Option<Curve>,
}

/// Progress of one voice through its envelope.
#[derive(Debug, Default, Clone)]
pub(crate) struct EnvelopeCursor {
    decay_position: i32,
    rise_index: usize,
    rise_position: i32,
    fall_index: usize,
    fall_position: i32,
}

impl EnvelopeCursor {
    /// Advances the counters by one update. Returns `true` once the note has finished.
    pub(crate) fn advance(&mut self, envelope: &Envelope, pitch_factor: f64, fall: bool) -> bool {
        let mut finished = false;

        if envelope.decay > 0 {
            self.decay_position = self
                .decay_position
                .saturating_add(rate_step(envelope.sustain, pitch_factor));
            let halvings = f64::from(envelope.decay)
                * f64::from(self.decay_position)
                * 1.953_125E-5;
            finished |= halvings >= DECAY_SILENT_HALVINGS;
        }

        if let Some(curve) = &envelope.rise_curve {
            self.rise_position = self
                .rise_position
                .saturating_add(rate_step(envelope.attack, pitch_factor));
            curve.seek(&mut self.rise_index, self.rise_position);
            finished |= curve.is_final(self.rise_index)
                && curve.points[self.rise_index].level == 0;
        }

        if fall {
            if let Some(curve) = &envelope.fall_curve {
                self.fall_position = self
                    .fall_position
                    .saturating_add(rate_step(envelope.release, pitch_factor));
                curve.seek(&mut self.fall_index, self.fall_position);
                finished |= curve.is_final(self.fall_index);
            }
        }

        finished
    }

    /// Scales a volume by the decay counter and the rise and fall shapes.
    pub(crate) fn apply(&self, envelope: &Envelope, volume: i32, releasing: bool) -> i32 {
        let mut volume = volume;
        if envelope.decay > 0 {
            volume = decay_attenuation(volume, envelope.decay, self.decay_position);
        }
        if let Some(curve) = &envelope.rise_curve {
            volume = (volume * curve.level(self.rise_index, self.rise_position) + 32) >> 6;
        }
        if releasing && self.fall_position > 0 {
            if let Some(curve) = &envelope.fall_curve {
                volume = (volume * curve.level(self.fall_index, self.fall_position) + 32) >> 6;
            }
        }
        volume.max(0)
    }
}
