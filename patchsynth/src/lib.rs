pub mod synth_math;

mod channel;
mod envelope;
mod error;
mod lfo;
mod patch;
mod pcm_player;
mod resampler;
mod sample_source;
mod synthesizer;
mod synthesizer_settings;
mod voice;
mod voice_collection;

pub use self::channel::Channel;
pub use self::envelope::{Breakpoint, Curve, Envelope};
pub use self::error::SynthError;
pub use self::patch::{LoopGroup, NOTE_COUNT, Patch, PatchBuilder, PatchNote, PatchSource};
pub use self::pcm_player::{PcmPlayer, PcmSink, Renderer, pull_loop, write_le_bytes};
pub use self::resampler::{Direction, Resampler};
pub use self::sample_source::SampleSource;
pub use self::synthesizer::{CHANNEL_COUNT, Synthesizer, VoiceInfo};
pub use self::synthesizer_settings::SynthesizerSettings;
pub use self::voice::VoiceState;
pub use self::voice_collection::VoiceId;
