use std::collections::HashMap;

use patchsynth::SampleSource;

use crate::error::PatchError;

/// Resolves the sample names used by patch definitions.
pub trait SampleProvider {
    fn load(&mut self, name: &str) -> Result<SampleSource, PatchError>;
}

impl<F> SampleProvider for F
where
    F: FnMut(&str) -> Result<SampleSource, PatchError>,
{
    fn load(&mut self, name: &str) -> Result<SampleSource, PatchError> {
        self(name)
    }
}

/// Samples decoded ahead of time, looked up by name.
#[derive(Debug, Default, Clone)]
pub struct MemorySamples {
    samples: HashMap<String, SampleSource>,
}

impl MemorySamples {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, source: SampleSource) {
        self.samples.insert(name.into(), source);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl SampleProvider for MemorySamples {
    fn load(&mut self, name: &str) -> Result<SampleSource, PatchError> {
        self.samples
            .get(name)
            .cloned()
            .ok_or_else(|| PatchError::MissingSample(name.to_string()))
    }
}
