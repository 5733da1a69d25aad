//! Patch definitions for the `patchsynth` engine.
//!
//! A patch is a text file with one `_`-separated record per note range.
//! [`PatchBank`] parses them, resolves sample names through a
//! [`SampleProvider`] and hands the result to the synthesizer as a
//! [`patchsynth::PatchSource`].

mod bank;
mod error;
mod record;
mod samples;

pub use self::bank::PatchBank;
pub use self::error::{PatchError, RecordError};
pub use self::record::PatchRecord;
pub use self::samples::{MemorySamples, SampleProvider};
