mod wav;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use patchsynth::{PcmPlayer, Synthesizer, SynthesizerSettings};
use patchsynth_midi::{MidiFile, MidiFileSequencer, track_decoder};
use patchsynth_patch::PatchBank;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::wav::{WavSamples, WavSink};

#[derive(Parser)]
#[command(name = "patchsynth-render")]
#[command(about = "Decode compressed MIDI tracks and render them with a patch bank", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Decode a column-compressed track blob into a Standard MIDI File
    Transcode {
        input: PathBuf,
        output: PathBuf,
    },

    /// Render a track blob or a .mid file to a 16-bit WAV file
    Render {
        input: PathBuf,
        output: PathBuf,

        /// Directory of `<program>.txt` patch definitions
        #[arg(short, long)]
        patches: PathBuf,

        /// Directory of `<name>.wav` samples and optional `<name>.loop` files
        #[arg(short, long)]
        samples: PathBuf,

        #[arg(short, long, default_value_t = SynthesizerSettings::DEFAULT_SAMPLE_RATE)]
        rate: u32,

        #[arg(long)]
        mono: bool,

        #[arg(long, default_value_t = 256)]
        polyphony: usize,

        #[arg(long, default_value_t = 256)]
        block: usize,

        /// Initial program for a channel, as CHANNEL:PROGRAM
        #[arg(long = "program", value_parser = parse_program)]
        programs: Vec<(u8, u32)>,
    },
}

fn parse_program(value: &str) -> Result<(u8, u32), String> {
    let (channel, program) = value
        .split_once(':')
        .ok_or_else(|| format!("`{value}` is not CHANNEL:PROGRAM"))?;
    let channel: u8 = channel.parse().map_err(|e| format!("channel: {e}"))?;
    if usize::from(channel) >= patchsynth::CHANNEL_COUNT {
        return Err(format!("channel {channel} is out of range"));
    }
    let program = program.parse().map_err(|e| format!("program: {e}"))?;
    Ok((channel, program))
}

fn load_midi(path: &Path) -> Result<MidiFile> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let midi_file = if bytes.starts_with(b"MThd") {
        MidiFile::from_bytes(&bytes)
    } else {
        MidiFile::from_track_blob(&bytes)
    };
    midi_file.with_context(|| format!("loading {}", path.display()))
}

fn transcode(input: &Path, output: &Path) -> Result<()> {
    let blob = fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let smf = track_decoder::decode(&blob).with_context(|| format!("decoding {}", input.display()))?;
    fs::write(output, &smf).with_context(|| format!("writing {}", output.display()))?;
    info!(input = %input.display(), output = %output.display(), bytes = smf.len(), "track transcoded");
    Ok(())
}

fn render(
    input: &Path,
    output: &Path,
    patches: &Path,
    samples: &Path,
    settings: SynthesizerSettings,
    programs: &[(u8, u32)],
) -> Result<()> {
    let midi_file = Arc::new(load_midi(input)?);

    let mut bank = PatchBank::new();
    bank.load_directory(patches, &mut WavSamples::new(samples))
        .with_context(|| format!("loading patches from {}", patches.display()))?;
    if bank.is_empty() {
        return Err(anyhow!("no patches found in {}", patches.display()));
    }

    let block_frames = settings.block_frames;
    let sample_rate = settings.sample_rate;
    let mut synthesizer = Synthesizer::new(bank, settings)?;
    for &(channel, program) in programs {
        synthesizer.set_initial_program(channel, program);
    }
    let channels = synthesizer.settings().channel_count() as u16;

    let mut sequencer = MidiFileSequencer::new(synthesizer);
    sequencer.play(Arc::clone(&midi_file), false);

    let sink = WavSink::create(output, channels, sample_rate)
        .with_context(|| format!("creating {}", output.display()))?;
    let player = PcmPlayer::spawn(Arc::new(Mutex::new(sequencer)), sink, block_frames)?;
    let frames = player.join()?;

    info!(
        output = %output.display(),
        frames,
        seconds = frames as f64 / f64::from(sample_rate),
        events = midi_file.events().len(),
        "render finished"
    );
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Transcode { input, output } => transcode(&input, &output),
        Command::Render {
            input,
            output,
            patches,
            samples,
            rate,
            mono,
            polyphony,
            block,
            programs,
        } => {
            let settings = SynthesizerSettings {
                sample_rate: rate,
                stereo: !mono,
                maximum_polyphony: polyphony,
                block_frames: block,
            };
            render(&input, &output, &patches, &samples, settings, &programs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_channel_programs() {
        assert_eq!(parse_program("9:128"), Ok((9, 128)));
        assert!(parse_program("16:0").is_err());
        assert!(parse_program("9").is_err());
    }

    #[test]
    fn cli_shape() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
