use std::sync::Arc;

use patchsynth::{PatchSource, Renderer, Synthesizer};

use crate::MidiAdapter;
use crate::midifile::{MidiEvent, MidiFile};

/// Plays a [`MidiFile`] through a synthesizer, applying each event at its exact frame.
pub struct MidiFileSequencer<Source> {
    synthesizer: Synthesizer<Source>,
    midi_file: Option<Arc<MidiFile>>,
    looping: bool,
    frame: u64,
    msg_index: usize,
}

impl<Source: PatchSource> MidiFileSequencer<Source> {
    pub fn new(synthesizer: Synthesizer<Source>) -> Self {
        Self {
            synthesizer,
            midi_file: None,
            looping: false,
            frame: 0,
            msg_index: 0,
        }
    }

    /// Starts `midi_file` from the beginning. A looping file restarts after its last event.
    pub fn play(&mut self, midi_file: Arc<MidiFile>, looping: bool) {
        self.synthesizer.system_reset();
        self.midi_file = Some(midi_file);
        self.looping = looping;
        self.frame = 0;
        self.msg_index = 0;
    }

    pub fn stop(&mut self) {
        self.midi_file = None;
        self.synthesizer.system_reset();
    }

    pub fn synthesizer(&self) -> &Synthesizer<Source> {
        &self.synthesizer
    }

    pub fn synthesizer_mut(&mut self) -> &mut Synthesizer<Source> {
        &mut self.synthesizer
    }

    /// Playback position in seconds.
    pub fn position(&self) -> f64 {
        self.frame as f64 / f64::from(self.synthesizer.settings().sample_rate)
    }

    /// Every event has been applied and no voice is left sounding.
    pub fn end_of_sequence(&self) -> bool {
        let pending = self
            .midi_file
            .as_ref()
            .is_some_and(|file| self.restarts(file) || self.msg_index < file.events().len());
        !pending && self.synthesizer.active_voice_count() == 0
    }

    /// Fills `out` with interleaved frames, splitting the block at event times.
    pub fn render(&mut self, out: &mut [i16]) {
        let channels = self.synthesizer.settings().channel_count();
        let frames = out.len() / channels;
        let mut done = 0;

        while done < frames {
            let next = self.process_events();
            let chunk = match next {
                Some(frame) => ((frame - self.frame) as usize).min(frames - done),
                None => frames - done,
            };
            self.synthesizer
                .render(&mut out[done * channels..(done + chunk) * channels]);
            done += chunk;
            self.frame += chunk as u64;
        }
        out[frames * channels..].fill(0);
    }

    /// Looping only restarts a file that spans at least one frame.
    fn restarts(&self, file: &MidiFile) -> bool {
        let sample_rate = f64::from(self.synthesizer.settings().sample_rate);
        self.looping && (file.length() * sample_rate).round() as u64 > 0
    }

    /// Applies events due at the current frame. Returns the frame of the next one.
    fn process_events(&mut self) -> Option<u64> {
        let file = Arc::clone(self.midi_file.as_ref()?);
        let sample_rate = f64::from(self.synthesizer.settings().sample_rate);

        loop {
            while let Some(&MidiEvent {
                time,
                channel,
                message,
            }) = file.events().get(self.msg_index)
            {
                let frame = (time * sample_rate).round() as u64;
                if frame > self.frame {
                    return Some(frame);
                }
                self.synthesizer.process_midi_message(channel, message);
                self.msg_index += 1;
            }

            if !self.restarts(&file) {
                return None;
            }
            self.synthesizer.all_notes_off(None);
            self.frame = 0;
            self.msg_index = 0;
        }
    }
}

impl<Source: PatchSource> Renderer for MidiFileSequencer<Source> {
    fn render(&mut self, out: &mut [i16]) {
        MidiFileSequencer::render(self, out);
    }

    fn channel_count(&self) -> usize {
        self.synthesizer.settings().channel_count()
    }

    fn is_finished(&self) -> bool {
        self.end_of_sequence()
    }
}
