use std::sync::Arc;

use crate::error::SynthError;
use crate::synth_math::FRAC_BITS;

/// Signed 8-bit sample data with its native rate and optional loop points.
///
/// A source is shared read-only between every voice playing it.
#[derive(Debug, Clone)]
pub struct SampleSource {
    data: Arc<[i8]>,
    sample_rate: u32,
    loop_start: u32,
    loop_end: u32,
    is_looping: bool,
}

impl SampleSource {
    /// Creates a source, checking `loop_start <= loop_end <= len` when looping.
    pub fn new(
        data: impl Into<Arc<[i8]>>,
        sample_rate: u32,
        loop_start: u32,
        loop_end: u32,
        is_looping: bool,
    ) -> Result<Self, SynthError> {
        let data = data.into();
        if data.is_empty() {
            return Err(SynthError::EmptySample);
        }
        if is_looping && (loop_start > loop_end || loop_end as usize > data.len()) {
            return Err(SynthError::InvalidLoopPoints {
                start: loop_start,
                end: loop_end,
                len: data.len(),
            });
        }

        Ok(Self {
            data,
            sample_rate,
            loop_start,
            loop_end,
            is_looping,
        })
    }

    /// A source that plays once from start to end.
    pub fn one_shot(data: impl Into<Arc<[i8]>>, sample_rate: u32) -> Result<Self, SynthError> {
        Self::new(data, sample_rate, 0, 0, false)
    }

    /// Builds 8-bit data from 16-bit PCM by keeping the high byte of each sample.
    pub fn from_pcm16(
        samples: &[i16],
        sample_rate: u32,
        loop_start: u32,
        loop_end: u32,
        is_looping: bool,
    ) -> Result<Self, SynthError> {
        let data: Vec<i8> = samples.iter().map(|&s| (s >> 8) as i8).collect();
        Self::new(data, sample_rate, loop_start, loop_end, is_looping)
    }

    pub fn data(&self) -> &[i8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn loop_start(&self) -> u32 {
        self.loop_start
    }

    pub fn loop_end(&self) -> u32 {
        self.loop_end
    }

    pub fn is_looping(&self) -> bool {
        self.is_looping
    }

    /// Length of the data in 24.8 cursor units.
    pub(crate) fn len_fp(&self) -> i32 {
        (self.data.len() as i32) << FRAC_BITS
    }
}
