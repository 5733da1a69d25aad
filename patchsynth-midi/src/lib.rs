//! MIDI front end for `patchsynth`: message dispatch, the track blob codec,
//! Standard MIDI File loading and a sample-accurate file sequencer.

mod midifile;
mod midifile_sequencer;
pub mod track_decoder;

pub use self::midifile::{MidiEvent, MidiFile};
pub use self::midifile_sequencer::MidiFileSequencer;
pub use self::track_decoder::{ColumnPlan, TrackDecodeError};

use midly::live::{LiveEvent, SystemRealtime};
use midly::num::u4;
use midly::MidiMessage;
use patchsynth::{PatchSource, Synthesizer};

/// Switch controllers treat values from 64 up as "on".
fn switch(value: u8) -> bool {
    value >= 64
}

pub trait MidiAdapter {
    fn process_midi_message(&mut self, channel: u4, msg: MidiMessage);

    /// Handles a live event; only channel messages and system reset have an effect.
    fn process_live_event(&mut self, event: LiveEvent<'_>);

    /// Parses and handles one raw message as it arrives from a port.
    fn process_raw(&mut self, bytes: &[u8]) -> Result<(), midly::Error> {
        let event = LiveEvent::parse(bytes)?;
        self.process_live_event(event);
        Ok(())
    }
}

impl<Source: PatchSource> MidiAdapter for Synthesizer<Source> {
    fn process_midi_message(&mut self, channel: u4, msg: MidiMessage) {
        let channel = channel.as_int();

        match msg {
            MidiMessage::NoteOff { key, .. } => self.note_off(channel, key.as_int()),
            MidiMessage::NoteOn { key, vel } => self.note_on(channel, key.as_int(), vel.as_int()),
            MidiMessage::Controller { controller, value } => {
                let value = value.as_int();
                match controller.as_int() {
                    0x00 => self.set_bank_coarse(channel, value),
                    0x20 => self.set_bank_fine(channel, value),
                    0x01 => self.set_modulation_coarse(channel, value),
                    0x21 => self.set_modulation_fine(channel, value),
                    0x05 => self.set_portamento_time_coarse(channel, value),
                    0x25 => self.set_portamento_time_fine(channel, value),
                    0x06 => self.data_entry_coarse(channel, value),
                    0x26 => self.data_entry_fine(channel, value),
                    0x07 => self.set_volume_coarse(channel, value),
                    0x27 => self.set_volume_fine(channel, value),
                    0x0A => self.set_pan_coarse(channel, value),
                    0x2A => self.set_pan_fine(channel, value),
                    0x0B => self.set_expression_coarse(channel, value),
                    0x2B => self.set_expression_fine(channel, value),
                    0x10 => self.set_sample_loop_coarse(channel, value),
                    0x30 => self.set_sample_loop_fine(channel, value),
                    0x11 => self.set_retrigger_rate_coarse(channel, value),
                    0x31 => self.set_retrigger_rate_fine(channel, value),
                    0x40 => self.set_hold(channel, switch(value)),
                    0x41 => self.set_legato(channel, switch(value)),
                    0x51 => self.set_retrigger(channel, switch(value)),
                    0x63 => self.set_nrpn_coarse(channel, value),
                    0x62 => self.set_nrpn_fine(channel, value),
                    0x65 => self.set_rpn_coarse(channel, value),
                    0x64 => self.set_rpn_fine(channel, value),
                    0x78 => self.all_sound_off(Some(channel)),
                    0x79 => self.reset_all_controllers(Some(channel)),
                    0x7B => self.all_notes_off(Some(channel)),
                    _ => (),
                }
            }
            MidiMessage::ProgramChange { program } => self.select_program(channel, program.as_int()),
            MidiMessage::PitchBend { bend } => self.set_pitch_bend(channel, bend.0.as_int()),
            _ => (),
        }
    }

    fn process_live_event(&mut self, event: LiveEvent<'_>) {
        match event {
            LiveEvent::Midi { channel, message } => self.process_midi_message(channel, message),
            LiveEvent::Realtime(SystemRealtime::Reset) => self.system_reset(),
            _ => (),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use super::*;
    use patchsynth::{Envelope, LoopGroup, Patch, PatchNote, SampleSource, SynthesizerSettings};

    type Bank = HashMap<u32, Arc<Patch>>;

    fn synth() -> Synthesizer<Bank> {
        let source = Arc::new(SampleSource::new(vec![30i8; 400], 22050, 0, 400, true).unwrap());
        let mut builder = Patch::builder(64);
        for note in 0..128 {
            builder.note(
                note,
                PatchNote {
                    source: Arc::clone(&source),
                    pitch_offset: PatchNote::encode_pitch(60, 0),
                    volume_offset: 64,
                    pan_offset: 64,
                    envelope: Arc::new(Envelope::default()),
                    loop_group: LoopGroup::None,
                },
            );
        }
        let patch = Arc::new(builder.build());
        let bank: Bank = HashMap::from([(0, Arc::clone(&patch)), (16384 + 5, patch)]);
        Synthesizer::new(bank, SynthesizerSettings::default()).unwrap()
    }

    #[test]
    fn controllers_reach_the_channel() {
        let mut synth = synth();
        synth.process_raw(&[0xB2, 7, 100]).unwrap();
        synth.process_raw(&[0xB2, 39, 5]).unwrap();
        synth.process_raw(&[0xB2, 10, 0]).unwrap();
        synth.process_raw(&[0xB2, 0x40, 127]).unwrap();
        synth.process_raw(&[0xE2, 0x00, 0x60]).unwrap();

        let channel = synth.channel(2).unwrap();
        assert_eq!(channel.volume(), (100 << 7) | 5);
        assert_eq!(channel.pan(), 0);
        assert!(channel.hold());
        assert_eq!(channel.pitch_bend(), 0x60 << 7);
    }

    #[test]
    fn rpn_zero_sets_the_bend_range() {
        let mut synth = synth();
        for bytes in [[0xB0, 101, 0], [0xB0, 100, 0], [0xB0, 6, 12], [0xB0, 38, 0]] {
            synth.process_raw(&bytes).unwrap();
        }
        assert_eq!(synth.channel(0).unwrap().pitch_bend_range(), 12 << 7);
    }

    #[test]
    fn program_change_includes_the_bank() {
        let mut synth = synth();
        synth.process_raw(&[0xB0, 0, 1]).unwrap();
        synth.process_raw(&[0xC0, 5]).unwrap();
        assert_eq!(synth.channel(0).unwrap().program(), 16384 + 5);
    }

    #[test]
    fn zero_velocity_releases() {
        let mut synth = synth();
        synth.process_raw(&[0x90, 60, 100]).unwrap();
        assert!(synth.note_voice(0, 60).is_some());
        synth.process_raw(&[0x90, 60, 0]).unwrap();
        assert!(synth.note_voice(0, 60).is_none());
    }

    #[test]
    fn sound_off_and_reset() {
        let mut synth = synth();
        synth.process_raw(&[0x90, 60, 100]).unwrap();
        synth.process_raw(&[0x91, 62, 100]).unwrap();
        synth.process_raw(&[0xB0, 120, 0]).unwrap();
        assert_eq!(synth.active_voice_count(), 1);

        synth.process_raw(&[0xB1, 7, 10]).unwrap();
        synth.process_raw(&[0xFF]).unwrap();
        assert_eq!(synth.active_voice_count(), 0);
        assert_eq!(synth.channel(1).unwrap().volume(), 12800);
    }

    #[test]
    fn legato_switch() {
        let mut synth = synth();
        synth.process_raw(&[0xB0, 0x41, 127]).unwrap();
        assert!(synth.channel(0).unwrap().legato());
        synth.process_raw(&[0xB0, 0x41, 0]).unwrap();
        assert!(!synth.channel(0).unwrap().legato());
    }
}
