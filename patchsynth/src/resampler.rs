use std::sync::Arc;

use crate::sample_source::SampleSource;
use crate::synth_math::{FRAC_BITS, FRAC_MASK, left_gain, right_gain};

// Cursors are 24.8 fixed-point numbers: the lower 8 bits are the fraction
// between two samples. Variables holding them carry the suffix "_fp".

/// Playback direction through the sample data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Forward,
    Reverse,
}

impl Direction {
    pub fn flipped(self) -> Self {
        match self {
            Direction::Forward => Direction::Reverse,
            Direction::Reverse => Direction::Forward,
        }
    }

    /// Mirrors a cursor that crossed `boundary_fp` back across it and flips the direction.
    pub fn reflect(self, cursor_fp: i32, boundary_fp: i32) -> (Self, i32) {
        (self.flipped(), boundary_fp + boundary_fp - 1 - cursor_fp)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Gains {
    volume: i32,
    left: i32,
    right: i32,
}

impl Gains {
    fn new(volume: i32, pan: i32) -> Self {
        Self {
            volume,
            left: left_gain(volume, pan),
            right: right_gain(volume, pan),
        }
    }

    fn distance(self, other: Gains) -> i32 {
        (other.volume - self.volume)
            .abs()
            .max((other.left - self.left).abs())
            .max((other.right - self.right).abs())
    }
}

/// Plays a [`SampleSource`] at an arbitrary pitch into an `i32` mix buffer.
#[derive(Debug, Clone)]
pub struct Resampler {
    source: Arc<SampleSource>,
    stereo: bool,
    looping: bool,

    cursor_fp: i32,
    step: i32,
    direction: Direction,

    target_volume: i32,
    target_pan: i32,
    fading_out: bool,
    silent: bool,

    gains: Gains,
    deltas: Gains,
    glide_remaining: i32,
}

/// Keeps the increment within one pass over the data so the cursor stays in range.
fn clamp_step(step: i32, source: &SampleSource) -> i32 {
    step.clamp(1, source.len_fp().max(1))
}

impl Resampler {
    /// Creates a stream at the start of `source`. Gains start at zero and
    /// reach `volume`/`pan` through [`Resampler::glide_to`].
    ///
    /// The loop is only honoured when `flips_loop` is set; otherwise a looping
    /// source plays through once.
    pub fn new(
        source: Arc<SampleSource>,
        flips_loop: bool,
        step: i32,
        volume: i32,
        pan: i32,
        stereo: bool,
    ) -> Self {
        let looping =
            flips_loop && source.is_looping() && source.loop_end() > source.loop_start();
        let step = clamp_step(step, &source);
        Self {
            source,
            stereo,
            looping,
            cursor_fp: 0,
            step,
            direction: Direction::Forward,
            target_volume: volume,
            target_pan: pan,
            fading_out: false,
            silent: false,
            gains: Gains::default(),
            deltas: Gains::default(),
            glide_remaining: 0,
        }
    }

    pub fn source(&self) -> &Arc<SampleSource> {
        &self.source
    }

    pub fn cursor(&self) -> i32 {
        self.cursor_fp
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn set_direction(&mut self, direction: Direction) {
        self.direction = direction;
    }

    pub fn step(&self) -> i32 {
        self.step
    }

    /// Sets the per-frame increment, keeping the current direction.
    pub fn set_step(&mut self, step: i32) {
        self.step = clamp_step(step, &self.source);
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    /// Volume the stream is heading for; zero once it fades out.
    pub fn volume(&self) -> i32 {
        if self.fading_out { 0 } else { self.target_volume }
    }

    pub fn pan(&self) -> i32 {
        self.target_pan
    }

    /// Current gain applied to mono output.
    pub fn current_volume(&self) -> i32 {
        self.gains.volume
    }

    pub fn is_exhausted(&self) -> bool {
        if self.looping {
            return false;
        }
        match self.direction {
            Direction::Forward => self.cursor_fp >= self.source.len_fp(),
            Direction::Reverse => self.cursor_fp < 0,
        }
    }

    /// True once the stream ran out of data or faded to silence.
    pub fn is_finished(&self) -> bool {
        self.silent || self.is_exhausted()
    }

    /// Glides volume and pan to new targets over at most `frames` output frames.
    pub fn glide_to(&mut self, frames: i32, volume: i32, pan: i32) {
        self.target_volume = volume;
        self.target_pan = pan;
        self.fading_out = false;

        let target = Gains::new(volume, pan);
        if frames <= 0 {
            self.gains = target;
            self.glide_remaining = 0;
            return;
        }
        self.start_glide(target, frames);
    }

    /// Fades to silence over `frames`, after which the stream is finished.
    pub fn reset(&mut self, frames: i32) {
        self.fading_out = true;
        if frames <= 0 || self.gains == Gains::default() {
            self.gains = Gains::default();
            self.glide_remaining = 0;
            self.silent = true;
            return;
        }
        self.start_glide(Gains::default(), frames);
    }

    /// Moves the cursor, clamped to `-1..=len` in fixed-point units.
    pub fn relocate(&mut self, cursor_fp: i32) {
        self.cursor_fp = cursor_fp.clamp(-1, self.source.len_fp());
    }

    /// Repositions playback to `control / 16384` of the sample.
    ///
    /// With `flips` on a looping source the range covers the data and the
    /// mirrored loop, and a position past the end plays in reverse.
    pub fn relocate_loop_start(&mut self, control: i32, flips: bool) {
        let len = self.source.len() as i64;
        let len_fp = i64::from(self.source.len_fp());
        let control = i64::from(control);

        if flips && self.looping {
            let span = len + len - i64::from(self.source.loop_start());
            let start_fp = ((control * span) >> 6).min(i64::from(i32::MAX)) as i32;
            if i64::from(start_fp) >= len_fp {
                let (direction, reflected) =
                    Direction::Forward.reflect(start_fp, self.source.len_fp());
                self.direction = direction;
                self.relocate(reflected);
            } else {
                self.relocate(start_fp);
            }
        } else {
            self.relocate(((len * control) >> 6).min(len_fp) as i32);
        }
    }

    /// Mixes up to `length` frames into `out` starting at frame `offset`.
    ///
    /// Returns the number of frames produced. Fewer than `length` means the
    /// stream has run out or faded to silence.
    pub fn fill(&mut self, out: &mut [i32], offset: usize, length: usize) -> usize {
        if length == 0 || self.silent {
            return 0;
        }

        let len_fp = self.source.len_fp();
        if self.cursor_fp < 0 {
            if self.direction == Direction::Reverse {
                return 0;
            }
            self.cursor_fp = 0;
        } else if self.cursor_fp >= len_fp {
            if self.direction == Direction::Forward {
                return 0;
            }
            self.cursor_fp = len_fp - 1;
        }

        let width = if self.stereo { 2 } else { 1 };
        let mut produced = 0;
        while produced < length {
            if !self.settle_cursor(len_fp) {
                break;
            }

            let value = self.sample_at_cursor();
            self.mix(out, (offset + produced) * width, value);
            produced += 1;

            match self.direction {
                Direction::Forward => self.cursor_fp = self.cursor_fp.saturating_add(self.step),
                Direction::Reverse => self.cursor_fp = self.cursor_fp.saturating_sub(self.step),
            }

            if self.glide_remaining > 0 {
                self.gains.volume += self.deltas.volume;
                self.gains.left += self.deltas.left;
                self.gains.right += self.deltas.right;
                self.glide_remaining -= 1;
                if self.glide_remaining == 0 && !self.settle_glide() {
                    break;
                }
            }
        }

        self.settle_cursor(len_fp);
        produced
    }

    /// Applies loop reflection or edge clamping. Returns `false` when exhausted.
    fn settle_cursor(&mut self, len_fp: i32) -> bool {
        if self.looping {
            let start_fp = (self.source.loop_start() as i32) << FRAC_BITS;
            let end_fp = (self.source.loop_end() as i32) << FRAC_BITS;
            // a large step over a short loop can need several reflections
            loop {
                let boundary_fp = match self.direction {
                    Direction::Forward if self.cursor_fp >= end_fp => end_fp,
                    Direction::Reverse if self.cursor_fp < start_fp => start_fp,
                    _ => return true,
                };
                (self.direction, self.cursor_fp) =
                    self.direction.reflect(self.cursor_fp, boundary_fp);
            }
        }

        match self.direction {
            Direction::Forward if self.cursor_fp >= len_fp => {
                self.cursor_fp = len_fp;
                false
            }
            Direction::Reverse if self.cursor_fp < 0 => {
                self.cursor_fp = -1;
                false
            }
            _ => true,
        }
    }

    /// Interpolated sample at the cursor, scaled by 256.
    fn sample_at_cursor(&self) -> i32 {
        let data = self.source.data();
        debug_assert!(self.cursor_fp >= 0 && self.cursor_fp < self.source.len_fp());
        let index = ((self.cursor_fp >> FRAC_BITS).max(0) as usize).min(data.len() - 1);
        let frac = self.cursor_fp & FRAC_MASK;
        let current = i32::from(data[index]);

        match self.direction {
            Direction::Forward => {
                if frac == 0 {
                    return current << FRAC_BITS;
                }
                let (limit, edge) = if self.looping {
                    let end = self.source.loop_end() as usize;
                    (end, i32::from(data[end - 1]))
                } else {
                    (data.len(), 0)
                };
                let next = if index + 1 < limit {
                    i32::from(data[index + 1])
                } else {
                    edge
                };
                (current << FRAC_BITS) + (next - current) * frac
            }
            Direction::Reverse => {
                let (limit, edge) = if self.looping {
                    let start = self.source.loop_start() as usize;
                    (start, i32::from(data[start]))
                } else {
                    (0, 0)
                };
                let previous = if index > limit {
                    i32::from(data[index - 1])
                } else {
                    edge
                };
                (previous << FRAC_BITS) + (current - previous) * frac
            }
        }
    }

    fn mix(&self, out: &mut [i32], index: usize, value: i32) {
        fn scale(value: i32, gain: i32) -> i32 {
            ((i64::from(value) * i64::from(gain)) >> 6).clamp(i64::from(i32::MIN), i64::from(i32::MAX))
                as i32
        }

        if self.stereo {
            debug_assert!(index + 1 < out.len());
            if let Some(frame) = out.get_mut(index..index + 2) {
                frame[0] = frame[0].saturating_add(scale(value, self.gains.left));
                frame[1] = frame[1].saturating_add(scale(value, self.gains.right));
            }
        } else {
            debug_assert!(index < out.len());
            if let Some(slot) = out.get_mut(index) {
                *slot = slot.saturating_add(scale(value, self.gains.volume));
            }
        }
    }

    fn target_gains(&self) -> Gains {
        if self.fading_out {
            Gains::default()
        } else {
            Gains::new(self.target_volume, self.target_pan)
        }
    }

    fn start_glide(&mut self, target: Gains, frames: i32) {
        let distance = self.gains.distance(target);
        if distance == 0 {
            self.glide_remaining = 0;
            return;
        }
        let steps = frames.min(distance);
        self.deltas = Gains {
            volume: (target.volume - self.gains.volume) / steps,
            left: (target.left - self.gains.left) / steps,
            right: (target.right - self.gains.right) / steps,
        };
        self.glide_remaining = steps;
    }

    /// Finishes a glide with unit steps. Returns `false` once a fade-out is complete.
    fn settle_glide(&mut self) -> bool {
        let target = self.target_gains();
        if self.gains == target {
            if self.fading_out {
                self.silent = true;
                return false;
            }
            return true;
        }

        let diffs = [
            target.volume - self.gains.volume,
            target.left - self.gains.left,
            target.right - self.gains.right,
        ];
        self.deltas = Gains {
            volume: diffs[0].signum(),
            left: diffs[1].signum(),
            right: diffs[2].signum(),
        };
        self.glide_remaining = diffs
            .iter()
            .filter(|diff| **diff != 0)
            .map(|diff| diff.abs())
            .min()
            .unwrap_or(0);
        true
    }
}
