use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use patchsynth::{Patch, PatchNote, PatchSource, SampleSource};
use tracing::{debug, info, warn};

use crate::error::PatchError;
use crate::record::PatchRecord;
use crate::samples::SampleProvider;

/// Programs looked up by number, with the samples they share.
#[derive(Debug, Default, Clone)]
pub struct PatchBank {
    patches: HashMap<u32, Arc<Patch>>,
    samples: HashMap<String, Arc<SampleSource>>,
}

impl PatchBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, program: u32, patch: Patch) -> Option<Arc<Patch>> {
        self.patches.insert(program, Arc::new(patch))
    }

    pub fn get(&self, program: u32) -> Option<&Arc<Patch>> {
        self.patches.get(&program)
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    /// Loaded program numbers in ascending order.
    pub fn programs(&self) -> Vec<u32> {
        let mut programs: Vec<u32> = self.patches.keys().copied().collect();
        programs.sort_unstable();
        programs
    }

    /// Number of distinct samples held by the bank.
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Parses a patch definition and stores it as `program`.
    ///
    /// Nothing is changed when any line fails, including the sample cache.
    pub fn load_definition(
        &mut self,
        program: u32,
        text: &str,
        provider: &mut dyn SampleProvider,
    ) -> Result<(), PatchError> {
        let mut loaded = HashMap::new();
        let patch = self.build(text, provider, &mut loaded)?;
        debug!(program, notes = patch.mapped_notes(), "patch loaded");

        self.samples.extend(loaded);
        self.insert(program, patch);
        Ok(())
    }

    /// Loads every `<program>.txt` file in `dir`. Returns the number of patches loaded.
    pub fn load_directory(
        &mut self,
        dir: &Path,
        provider: &mut dyn SampleProvider,
    ) -> Result<usize, PatchError> {
        let io_error = |source: io::Error| PatchError::Io {
            path: dir.to_path_buf(),
            source,
        };

        let mut files = Vec::new();
        for entry in fs::read_dir(dir).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();
            if path.extension().is_none_or(|extension| extension != "txt") {
                continue;
            }
            match path.file_stem().and_then(|stem| stem.to_str()?.parse::<u32>().ok()) {
                Some(program) => files.push((program, path)),
                None => warn!(path = %path.display(), "skipping patch file without a program number"),
            }
        }
        files.sort_unstable_by_key(|(program, _)| *program);

        for (program, path) in &files {
            let text = fs::read_to_string(path).map_err(|source| PatchError::Io {
                path: path.clone(),
                source,
            })?;
            self.load_definition(*program, &text, provider)?;
        }

        info!(
            dir = %dir.display(),
            patches = files.len(),
            samples = self.samples.len(),
            "patch bank loaded"
        );
        Ok(files.len())
    }

    fn build(
        &self,
        text: &str,
        provider: &mut dyn SampleProvider,
        loaded: &mut HashMap<String, Arc<SampleSource>>,
    ) -> Result<Patch, PatchError> {
        let mut builder = Patch::builder(0);

        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let record = PatchRecord::parse(line).map_err(|source| PatchError::Record {
                line: index + 1,
                source,
            })?;
            // the last record decides the patch volume
            builder.volume(record.patch_volume);

            // `-1` leaves the range unmapped
            let Some(name) = record.sample.as_deref() else {
                continue;
            };
            let source = match self.samples.get(name).or_else(|| loaded.get(name)) {
                Some(source) => Arc::clone(source),
                None => {
                    let source = Arc::new(provider.load(name)?);
                    loaded.insert(name.to_string(), Arc::clone(&source));
                    source
                }
            };

            let envelope = Arc::new(record.envelope.clone());
            let loop_group = record.loop_group_for(&source);
            for note in record.low..=record.high {
                builder.note(
                    note as usize,
                    PatchNote {
                        source: Arc::clone(&source),
                        pitch_offset: record.pitch_offset(),
                        volume_offset: record.volume_offset,
                        pan_offset: record.pan_offset,
                        envelope: Arc::clone(&envelope),
                        loop_group,
                    },
                );
            }
        }

        Ok(builder.build())
    }
}

impl PatchSource for PatchBank {
    fn patch(&self, program: u32) -> Option<Arc<Patch>> {
        self.patches.get(&program).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RecordError;
    use crate::samples::MemorySamples;
    use patchsynth::LoopGroup;

    fn provider() -> MemorySamples {
        let mut samples = MemorySamples::new();
        samples.insert("kick", SampleSource::one_shot(vec![10i8; 64], 22050).unwrap());
        samples.insert(
            "pad",
            SampleSource::new(vec![10i8; 64], 22050, 16, 64, true).unwrap(),
        );
        samples
    }

    const DRUMS: &str = "\
# drum kit
36_36_kick_60_0_100_90_64_0_0_0_0_0_0_0_null_null

38_40_kick_62_0_110_90_64_0_0_0_0_0_0_0_null_null
";

    #[test]
    fn loads_a_definition() {
        let mut bank = PatchBank::new();
        let mut samples = provider();
        bank.load_definition(128, DRUMS, &mut samples).unwrap();

        let patch = bank.patch(128).unwrap();
        assert_eq!(patch.volume(), 110);
        assert_eq!(patch.mapped_notes(), 4);
        assert_eq!(patch.note(36).unwrap().loop_group, LoopGroup::OneShot);
        assert_eq!(patch.note(39).unwrap().loop_group, LoopGroup::Exclusive(1));
        assert!(patch.note(37).is_none());

        // one decoded sample shared by every note
        assert_eq!(bank.sample_count(), 1);
        assert!(Arc::ptr_eq(
            &patch.note(36).unwrap().source,
            &patch.note(40).unwrap().source
        ));
    }

    #[test]
    fn looping_ranges_have_no_group() {
        let mut bank = PatchBank::new();
        bank.load_definition(0, "0_127_pad_60_0_96_100_64_0_0_0_0_0_0_0_null_null", &mut provider())
            .unwrap();
        assert_eq!(bank.patch(0).unwrap().note(64).unwrap().loop_group, LoopGroup::None);
    }

    #[test]
    fn failed_loads_leave_the_bank_untouched() {
        let mut bank = PatchBank::new();
        let mut samples = provider();
        bank.load_definition(1, DRUMS, &mut samples).unwrap();

        let broken = "0_60_pad_60_0_96_100_64_0_0_0_0_0_0_0_null_null\n61_127_pad_60_0";
        let error = bank.load_definition(1, broken, &mut samples).unwrap_err();
        assert!(matches!(
            error,
            PatchError::Record {
                line: 2,
                source: RecordError::FieldCount(5)
            }
        ));
        assert_eq!(bank.sample_count(), 1);
        assert_eq!(bank.patch(1).unwrap().mapped_notes(), 4);

        let missing = "0_60_snare_60_0_96_100_64_0_0_0_0_0_0_0_null_null";
        assert!(matches!(
            bank.load_definition(2, missing, &mut samples),
            Err(PatchError::MissingSample(name)) if name == "snare"
        ));
        assert_eq!(bank.programs(), vec![1]);
    }

    #[test]
    fn closures_provide_samples() {
        let mut calls = 0;
        let mut provider = |name: &str| -> Result<SampleSource, PatchError> {
            calls += 1;
            assert_eq!(name, "kick");
            Ok(SampleSource::one_shot(vec![1i8; 8], 8000)?)
        };
        let mut bank = PatchBank::new();
        bank.load_definition(0, DRUMS, &mut provider).unwrap();
        bank.load_definition(1, DRUMS, &mut provider).unwrap();
        assert_eq!(calls, 1);
    }

    #[test]
    fn loads_numbered_files() {
        let dir = std::env::temp_dir().join(format!("patchsynth-bank-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("5.txt"), DRUMS).unwrap();
        fs::write(dir.join("notes.txt"), "ignored").unwrap();
        fs::write(dir.join("7.wav"), "ignored").unwrap();

        let mut bank = PatchBank::new();
        let loaded = bank.load_directory(&dir, &mut provider()).unwrap();
        fs::remove_dir_all(&dir).unwrap();

        assert_eq!(loaded, 1);
        assert_eq!(bank.programs(), vec![5]);
    }
}
