use std::io;

/// Errors raised by the synthesis engine.
#[derive(Debug, thiserror::Error)]
pub enum SynthError {
    #[error("the sample rate must be between 8000 and 192000, but was {0}")]
    SampleRateOutOfRange(u32),

    #[error("the block size must be between 1 and 8192 frames, but was {0}")]
    BlockSizeOutOfRange(usize),

    #[error("the maximum number of polyphony must be between 1 and 1024, but was {0}")]
    MaximumPolyphonyOutOfRange(usize),

    #[error("sample data is empty")]
    EmptySample,

    #[error("invalid loop points {start}..{end} for a sample of {len} frames")]
    InvalidLoopPoints { start: u32, end: u32, len: usize },

    #[error("audio output failed: {0}")]
    Output(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}
