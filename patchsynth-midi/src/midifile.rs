use std::collections::VecDeque;
use std::io::Read;

use anyhow::{Context, Result, anyhow};
use midly::num::u4;
use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};

use crate::track_decoder;

/// Default tempo until the first tempo event, in microseconds per beat.
const DEFAULT_TEMPO: f64 = 500_000.0;

/// A channel message at an absolute time in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MidiEvent {
    pub time: f64,
    pub channel: u4,
    pub message: MidiMessage,
}

#[derive(Debug)]
struct TempoChange {
    time: f64,
    us_per_beat: f64,
}

/// The channel messages of a Standard MIDI File, merged across tracks in time order.
#[derive(Debug, Clone, Default)]
pub struct MidiFile {
    events: Vec<MidiEvent>,
}

impl MidiFile {
    pub fn new<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = vec![];
        reader.read_to_end(&mut buf)?;
        Self::from_bytes(&buf)
    }

    /// Decodes a column-compressed track blob and loads the resulting file.
    pub fn from_track_blob(blob: &[u8]) -> Result<Self> {
        let smf = track_decoder::decode(blob).context("decoding track blob")?;
        Self::from_bytes(&smf)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let smf = Smf::parse(bytes)?;
        let ticks_per_beat = match smf.header.timing {
            Timing::Metrical(tpb) => tpb.as_int() as f64,
            Timing::Timecode(..) => return Err(anyhow!("Timecode is not supported")),
        };

        // Tempo changes come from the first track and apply to the others
        // at the same absolute times.
        let mut tempo_changes: Vec<TempoChange> = vec![];
        let mut tracks = vec![];
        for track in smf.tracks {
            let first_track = tracks.is_empty();
            let mut time = 0.0;
            let mut us_per_beat = DEFAULT_TEMPO;
            let mut tempo_idx = 0;
            let mut track_events = VecDeque::new();
            for TrackEvent { delta, kind } in track {
                if !first_track {
                    while tempo_idx < tempo_changes.len() && tempo_changes[tempo_idx].time <= time {
                        us_per_beat = tempo_changes[tempo_idx].us_per_beat;
                        tempo_idx += 1;
                    }
                }
                let beats = delta.as_int() as f64 / ticks_per_beat;
                time += beats * us_per_beat / 1_000_000.0;

                match kind {
                    TrackEventKind::Meta(MetaMessage::Tempo(tempo)) if first_track => {
                        us_per_beat = tempo.as_int() as f64;
                        tempo_changes.push(TempoChange { time, us_per_beat });
                    }
                    TrackEventKind::Midi { channel, message } => {
                        track_events.push_back(MidiEvent {
                            time,
                            channel,
                            message,
                        });
                    }
                    _ => (),
                }
            }
            tracks.push(track_events);
        }

        let mut events = Vec::with_capacity(tracks.iter().map(VecDeque::len).sum());
        loop {
            // Take from the track with the earliest pending event
            let earliest = tracks
                .iter_mut()
                .filter(|track| !track.is_empty())
                .min_by(|a, b| a[0].time.total_cmp(&b[0].time));
            let Some(event) = earliest.and_then(VecDeque::pop_front) else {
                break;
            };
            events.push(event);
        }

        Ok(Self { events })
    }

    pub fn events(&self) -> &[MidiEvent] {
        &self.events
    }

    /// Get the length of the MIDI file in seconds.
    pub fn length(&self) -> f64 {
        self.events.last().map_or(0.0, |event| event.time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(events: &[u8]) -> Vec<u8> {
        let mut chunk = b"MTrk".to_vec();
        chunk.extend_from_slice(&(events.len() as u32).to_be_bytes());
        chunk.extend_from_slice(events);
        chunk
    }

    fn smf(tracks: &[Vec<u8>]) -> Vec<u8> {
        let mut bytes = b"MThd".to_vec();
        bytes.extend_from_slice(&[0, 0, 0, 6, 0, 1, 0, tracks.len() as u8, 0, 96]);
        for track in tracks {
            bytes.extend_from_slice(track);
        }
        bytes
    }

    #[test]
    fn merges_tracks_by_time() {
        let tempo = track(&[0x00, 0xFF, 0x51, 0x03, 0x03, 0xD0, 0x90, 0x00, 0xFF, 0x2F, 0x00]);
        let early = track(&[0x60, 0x90, 60, 100, 0x00, 0xFF, 0x2F, 0x00]);
        let late = track(&[0x00, 0x91, 62, 100, 0x81, 0x40, 0x81, 62, 0, 0x00, 0xFF, 0x2F, 0x00]);
        let file = MidiFile::from_bytes(&smf(&[tempo, late, early])).unwrap();

        let channels: Vec<u8> = file.events().iter().map(|e| e.channel.as_int()).collect();
        assert_eq!(channels, vec![1, 0, 1]);
        // 96 ticks at 96 per beat and 250000us per beat
        assert!((file.events()[1].time - 0.25).abs() < 1e-9);
        assert!((file.length() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn empty_files_have_no_length() {
        assert_eq!(MidiFile::default().length(), 0.0);
        assert!(MidiFile::from_bytes(b"not midi").is_err());
    }
}
