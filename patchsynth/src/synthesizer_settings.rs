use crate::error::SynthError;

/// Specifies a set of parameters for synthesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizerSettings {
    /// The output sample rate.
    pub sample_rate: u32,
    /// Interleaved two-channel output when set, mono otherwise.
    pub stereo: bool,
    /// The number of maximum polyphony.
    pub maximum_polyphony: usize,
    /// Frames rendered per block by the pull loop.
    pub block_frames: usize,
}

impl Default for SynthesizerSettings {
    fn default() -> Self {
        Self::new(SynthesizerSettings::DEFAULT_SAMPLE_RATE)
    }
}

impl SynthesizerSettings {
    pub const DEFAULT_SAMPLE_RATE: u32 = 44100;
    const DEFAULT_STEREO: bool = true;
    const DEFAULT_MAXIMUM_POLYPHONY: usize = 256;
    const DEFAULT_BLOCK_FRAMES: usize = 256;

    /// Initializes a new instance of synthesizer settings.
    ///
    /// # Arguments
    ///
    /// * `sample_rate` - The sample rate for synthesis.
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            stereo: SynthesizerSettings::DEFAULT_STEREO,
            maximum_polyphony: SynthesizerSettings::DEFAULT_MAXIMUM_POLYPHONY,
            block_frames: SynthesizerSettings::DEFAULT_BLOCK_FRAMES,
        }
    }

    /// Number of interleaved output channels.
    pub fn channel_count(&self) -> usize {
        if self.stereo { 2 } else { 1 }
    }

    pub(crate) fn validate(&self) -> Result<(), SynthError> {
        SynthesizerSettings::check_sample_rate(self.sample_rate)?;
        SynthesizerSettings::check_block_frames(self.block_frames)?;
        SynthesizerSettings::check_maximum_polyphony(self.maximum_polyphony)?;

        Ok(())
    }

    fn check_sample_rate(value: u32) -> Result<(), SynthError> {
        if !(8_000..=192_000).contains(&value) {
            return Err(SynthError::SampleRateOutOfRange(value));
        }

        Ok(())
    }

    fn check_block_frames(value: usize) -> Result<(), SynthError> {
        if !(1..=8192).contains(&value) {
            return Err(SynthError::BlockSizeOutOfRange(value));
        }

        Ok(())
    }

    fn check_maximum_polyphony(value: usize) -> Result<(), SynthError> {
        if !(1..=1024).contains(&value) {
            return Err(SynthError::MaximumPolyphonyOutOfRange(value));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = SynthesizerSettings::default();
        assert_eq!(settings.sample_rate, 44100);
        assert_eq!(settings.channel_count(), 2);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let mut settings = SynthesizerSettings::new(4000);
        assert!(matches!(
            settings.validate(),
            Err(SynthError::SampleRateOutOfRange(4000))
        ));

        settings.sample_rate = 22050;
        settings.maximum_polyphony = 0;
        assert!(matches!(
            settings.validate(),
            Err(SynthError::MaximumPolyphonyOutOfRange(0))
        ));

        settings.maximum_polyphony = 8;
        settings.block_frames = 10_000;
        assert!(matches!(
            settings.validate(),
            Err(SynthError::BlockSizeOutOfRange(10_000))
        ));
    }
}
