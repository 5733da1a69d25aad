use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use patchsynth::{PcmSink, SampleSource, SynthError};
use patchsynth_patch::{PatchError, SampleProvider};
use tracing::debug;

/// Reads `<name>.wav` from a directory. An optional `<name>.loop` file holds
/// `start end`: the data is cut at `end` and a nonzero `start` makes it loop.
#[derive(Debug)]
pub struct WavSamples {
    dir: PathBuf,
}

impl WavSamples {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn read_pcm(path: &Path) -> Result<(Vec<i16>, u32), hound::Error> {
        let mut reader = WavReader::open(path)?;
        let spec = reader.spec();
        let channels = usize::from(spec.channels.max(1));

        let samples: Vec<i16> = match spec.sample_format {
            SampleFormat::Float => reader
                .samples::<f32>()
                .step_by(channels)
                .map(|s| s.map(|s| (s.clamp(-1.0, 1.0) * 32767.0) as i16))
                .collect::<Result<_, _>>()?,
            SampleFormat::Int => {
                let bits = u32::from(spec.bits_per_sample);
                reader
                    .samples::<i32>()
                    .step_by(channels)
                    .map(|s| {
                        s.map(|s| match bits {
                            16.. => (s >> (bits - 16)) as i16,
                            _ => (s << (16 - bits)) as i16,
                        })
                    })
                    .collect::<Result<_, _>>()?
            }
        };
        Ok((samples, spec.sample_rate))
    }

    fn read_loop(path: &Path) -> io::Result<Option<(u32, u32)>> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error),
        };
        let mut values = text.split_whitespace().map(str::parse::<u32>);
        match (values.next(), values.next()) {
            (Some(Ok(start)), Some(Ok(end))) => Ok(Some((start, end))),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "expected `start end` loop points",
            )),
        }
    }
}

impl SampleProvider for WavSamples {
    fn load(&mut self, name: &str) -> Result<SampleSource, PatchError> {
        let path = self.dir.join(format!("{name}.wav"));
        if !path.exists() {
            return Err(PatchError::MissingSample(name.to_string()));
        }
        let sample_error = |source: Box<dyn std::error::Error + Send + Sync>| PatchError::Sample {
            name: name.to_string(),
            source,
        };

        let (mut pcm, sample_rate) = Self::read_pcm(&path).map_err(|e| sample_error(e.into()))?;
        let loop_path = self.dir.join(format!("{name}.loop"));
        let loop_points = Self::read_loop(&loop_path).map_err(|source| PatchError::Io {
            path: loop_path,
            source,
        })?;

        let source = match loop_points {
            Some((start, end)) => {
                pcm.truncate(end as usize);
                SampleSource::from_pcm16(&pcm, sample_rate, start, end, start != 0)?
            }
            None => SampleSource::from_pcm16(&pcm, sample_rate, 0, 0, false)?,
        };
        debug!(name, frames = source.len(), looping = source.is_looping(), "sample decoded");
        Ok(source)
    }
}

/// Writes rendered blocks to a 16-bit WAV file.
pub struct WavSink {
    writer: Option<WavWriter<BufWriter<File>>>,
}

impl WavSink {
    pub fn create(path: &Path, channels: u16, sample_rate: u32) -> Result<Self, hound::Error> {
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        Ok(Self {
            writer: Some(WavWriter::create(path, spec)?),
        })
    }
}

fn output_error(error: hound::Error) -> SynthError {
    SynthError::Output(error.to_string())
}

impl PcmSink for WavSink {
    fn write(&mut self, block: &[i16]) -> Result<(), SynthError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| SynthError::Output("wav file already finalized".to_string()))?;
        for &sample in block {
            writer.write_sample(sample).map_err(output_error)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SynthError> {
        match self.writer.take() {
            Some(writer) => writer.finalize().map_err(output_error),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("patchsynth-wav-{name}-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_wav(path: &Path, samples: &[i16]) {
        let mut sink = WavSink::create(path, 1, 22050).unwrap();
        sink.write(samples).unwrap();
        sink.finish().unwrap();
    }

    #[test]
    fn loop_sidecar_trims_and_loops() {
        let dir = scratch("loop");
        let samples: Vec<i16> = (0..100).map(|i| i * 256).collect();
        write_wav(&dir.join("pad.wav"), &samples);
        fs::write(dir.join("pad.loop"), "20 80\n").unwrap();
        write_wav(&dir.join("kick.wav"), &samples);

        let mut provider = WavSamples::new(&dir);
        let pad = provider.load("pad").unwrap();
        let kick = provider.load("kick").unwrap();
        let missing = provider.load("snare");
        fs::remove_dir_all(&dir).unwrap();

        assert_eq!(pad.len(), 80);
        assert!(pad.is_looping());
        assert_eq!((pad.loop_start(), pad.loop_end()), (20, 80));
        assert_eq!(pad.data()[10], 10);
        assert_eq!(pad.sample_rate(), 22050);

        assert_eq!(kick.len(), 100);
        assert!(!kick.is_looping());
        assert!(matches!(missing, Err(PatchError::MissingSample(_))));
    }

    #[test]
    fn zero_loop_start_plays_once() {
        let dir = scratch("oneshot");
        write_wav(&dir.join("hit.wav"), &[1000; 50]);
        fs::write(dir.join("hit.loop"), "0 40").unwrap();

        let hit = WavSamples::new(&dir).load("hit").unwrap();
        fs::remove_dir_all(&dir).unwrap();

        assert_eq!(hit.len(), 40);
        assert!(!hit.is_looping());
    }
}
