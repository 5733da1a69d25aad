use tracing::debug;

use crate::channel::Channel;
use crate::error::SynthError;
use crate::patch::{LoopGroup, NOTE_COUNT, PatchSource};
use crate::pcm_player::Renderer;
use crate::synth_math::narrow;
use crate::synthesizer_settings::SynthesizerSettings;
use crate::voice::{VoiceContext, VoiceState};
use crate::voice_collection::{VoiceCollection, VoiceId};

/// Number of MIDI channels.
pub const CHANNEL_COUNT: usize = 16;

const DEFAULT_MASTER_VOLUME: i32 = 256;

type VoiceTable = [Option<VoiceId>; NOTE_COUNT];

/// Snapshot of one live voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceInfo {
    pub id: VoiceId,
    /// Unique per note-on; preserved across a legato retarget.
    pub serial: u64,
    pub channel: u8,
    pub note: u8,
    pub state: VoiceState,
    pub loop_group: LoopGroup,
}

/// A 16-channel sample-playback synthesizer.
#[derive(Debug)]
pub struct Synthesizer<Source> {
    patches: Source,
    settings: SynthesizerSettings,
    channels: [Channel; CHANNEL_COUNT],
    voices: VoiceCollection,
    one_shot: [VoiceTable; CHANNEL_COUNT],
    loop_groups: [VoiceTable; CHANNEL_COUNT],
    master_volume: i32,
    mix: Vec<i32>,
}

macro_rules! set_channel {
    ($synth_fun:ident) => {
        set_channel!($synth_fun, u8);
    };
    ($synth_fun:ident, $value_ty:ty) => {
        pub fn $synth_fun(&mut self, channel: u8, value: $value_ty) {
            if let Some(channel) = self.channels.get_mut(channel as usize) {
                channel.$synth_fun(value);
            }
        }
    };
}

fn unbind(one_shot: &mut VoiceTable, loop_groups: &mut VoiceTable, id: VoiceId) {
    for slot in one_shot.iter_mut().chain(loop_groups.iter_mut()) {
        if *slot == Some(id) {
            *slot = None;
        }
    }
}

impl<Source: PatchSource> Synthesizer<Source> {
    pub fn new(patches: Source, settings: SynthesizerSettings) -> Result<Self, SynthError> {
        settings.validate()?;

        Ok(Self {
            patches,
            voices: VoiceCollection::new(settings.maximum_polyphony),
            settings,
            channels: core::array::from_fn(|_| Channel::default()),
            one_shot: [[None; NOTE_COUNT]; CHANNEL_COUNT],
            loop_groups: [[None; NOTE_COUNT]; CHANNEL_COUNT],
            master_volume: DEFAULT_MASTER_VOLUME,
            mix: Vec::new(),
        })
    }

    pub fn settings(&self) -> &SynthesizerSettings {
        &self.settings
    }

    pub fn patches(&self) -> &Source {
        &self.patches
    }

    pub fn channel(&self, channel: u8) -> Option<&Channel> {
        self.channels.get(channel as usize)
    }

    pub fn master_volume(&self) -> i32 {
        self.master_volume
    }

    /// Master gain, 256 = unity.
    pub fn set_master_volume(&mut self, volume: i32) {
        self.master_volume = volume.max(0);
    }

    /// Sets the program a channel starts with and returns to on system reset.
    pub fn set_initial_program(&mut self, channel: u8, program: u32) {
        if let Some(state) = self.channels.get_mut(channel as usize) {
            state.set_initial_program(program);
        }
        self.program_change(channel, program);
    }

    set_channel!(set_bank_coarse);
    set_channel!(set_bank_fine);
    set_channel!(set_modulation_coarse);
    set_channel!(set_modulation_fine);
    set_channel!(set_portamento_time_coarse);
    set_channel!(set_portamento_time_fine);
    set_channel!(set_volume_coarse);
    set_channel!(set_volume_fine);
    set_channel!(set_pan_coarse);
    set_channel!(set_pan_fine);
    set_channel!(set_expression_coarse);
    set_channel!(set_expression_fine);
    set_channel!(set_sample_loop_coarse);
    set_channel!(set_sample_loop_fine);
    set_channel!(set_retrigger_rate_coarse);
    set_channel!(set_retrigger_rate_fine);
    set_channel!(set_nrpn_coarse);
    set_channel!(set_nrpn_fine);
    set_channel!(set_rpn_coarse);
    set_channel!(set_rpn_fine);
    set_channel!(data_entry_coarse);
    set_channel!(data_entry_fine);
    set_channel!(set_pitch_bend, u16);
    set_channel!(set_hold, bool);

    pub fn note_on(&mut self, channel: u8, key: u8, velocity: u8) {
        if velocity == 0 {
            self.note_off(channel, key);
            return;
        }

        let ch = channel as usize;
        if ch >= CHANNEL_COUNT {
            return;
        }
        let note = (key & 0x7F) as usize;

        self.note_off(channel, key);

        if self.channels[ch].legato() {
            let sounding = self
                .voices
                .iter()
                .find(|(_, voice)| voice.channel() == ch && voice.state() == VoiceState::Sounding)
                .map(|(id, voice)| (id, voice.note()));
            if let Some((id, previous)) = sounding {
                if self.one_shot[ch][previous] == Some(id) {
                    self.one_shot[ch][previous] = None;
                }
                if let Some(voice) = self.voices.get_mut(id) {
                    voice.retarget(note);
                }
                self.one_shot[ch][note] = Some(id);
                return;
            }
        }

        let program = self.channels[ch].program();
        let Some(patch) = self.patches.patch(program) else {
            debug!(channel, program, "no patch for program, note ignored");
            return;
        };
        let Some(zone) = patch.note(note) else {
            debug!(channel, program, note, "note has no sample, ignored");
            return;
        };

        let id = self.allocate_voice();
        let serial = self.voices.next_serial();
        let context = VoiceContext {
            channel: &self.channels[ch],
            master_volume: self.master_volume,
            sample_rate: self.settings.sample_rate,
            stereo: self.settings.stereo,
            holds_fall: false,
        };
        if let Some(voice) = self.voices.get_mut(id) {
            voice.start(serial, ch, note, velocity, &patch, zone, &context);
        }

        if let Some(group) = zone.loop_group.exclusive() {
            if let Some(previous) = self.loop_groups[ch][group] {
                if let Some(voice) = self.voices.get_mut(previous) {
                    if voice.state() == VoiceState::Sounding {
                        voice.release();
                        let previous_note = voice.note();
                        if self.one_shot[ch][previous_note] == Some(previous) {
                            self.one_shot[ch][previous_note] = None;
                        }
                    }
                }
            }
            self.loop_groups[ch][group] = Some(id);
        }
        self.one_shot[ch][note] = Some(id);
    }

    pub fn note_off(&mut self, channel: u8, key: u8) {
        let ch = channel as usize;
        if ch >= CHANNEL_COUNT {
            return;
        }
        let note = (key & 0x7F) as usize;
        let Some(id) = self.one_shot[ch][note].take() else {
            return;
        };

        if self.channels[ch].legato() {
            // a lone legato voice keeps sounding until legato is switched off
            let others = self.voices.iter().any(|(other, voice)| {
                other != id && voice.channel() == ch && voice.state() == VoiceState::Sounding
            });
            if !others {
                return;
            }
        }

        if let Some(voice) = self.voices.get_mut(id) {
            voice.release();
        }
    }

    /// Selects `program` (which already includes any bank offset).
    /// Switching to a different program clears the channel's loop groups.
    pub fn program_change(&mut self, channel: u8, program: u32) {
        let ch = channel as usize;
        if ch >= CHANNEL_COUNT {
            return;
        }
        if self.channels[ch].set_program(program) {
            self.loop_groups[ch] = [None; NOTE_COUNT];
        }
    }

    /// Program change message: the 7-bit program plus the channel's bank select.
    pub fn select_program(&mut self, channel: u8, program: u8) {
        if let Some(state) = self.channels.get(channel as usize) {
            let program = u32::from(program & 0x7F) + state.bank();
            self.program_change(channel, program);
        }
    }

    /// Switching legato off releases voices that no longer own their note slot.
    pub fn set_legato(&mut self, channel: u8, on: bool) {
        let ch = channel as usize;
        if ch >= CHANNEL_COUNT {
            return;
        }
        let was_on = self.channels[ch].set_legato(on);
        if was_on && !on {
            for (id, voice) in self.voices.iter_mut() {
                if voice.channel() == ch
                    && voice.state() == VoiceState::Sounding
                    && self.one_shot[ch][voice.note()] != Some(id)
                {
                    voice.release();
                }
            }
        }
    }

    pub fn set_retrigger(&mut self, channel: u8, on: bool) {
        let ch = channel as usize;
        if ch >= CHANNEL_COUNT {
            return;
        }
        let was_on = self.channels[ch].set_retrigger(on);
        if was_on && !on {
            for (_, voice) in self.voices.iter_mut() {
                if voice.channel() == ch {
                    voice.reset_retrigger();
                }
            }
        }
    }

    /// Silences voices immediately, on one channel or all of them.
    pub fn all_sound_off(&mut self, channel: Option<u8>) {
        let Self {
            voices,
            one_shot,
            loop_groups,
            ..
        } = self;
        for (id, voice) in voices.iter_mut() {
            if voice.state() == VoiceState::Idle {
                continue;
            }
            let ch = voice.channel();
            if channel.is_none_or(|channel| channel as usize == ch) {
                voice.kill();
                unbind(&mut one_shot[ch], &mut loop_groups[ch], id);
            }
        }
    }

    /// Releases every sounding voice, on one channel or all of them.
    pub fn all_notes_off(&mut self, channel: Option<u8>) {
        for (_, voice) in self.voices.iter_mut() {
            if channel.is_none_or(|channel| channel as usize == voice.channel()) {
                voice.release();
            }
        }
        for (ch, table) in self.one_shot.iter_mut().enumerate() {
            if channel.is_none_or(|channel| channel as usize == ch) {
                *table = [None; NOTE_COUNT];
            }
        }
    }

    pub fn reset_all_controllers(&mut self, channel: Option<u8>) {
        for ch in 0..CHANNEL_COUNT as u8 {
            if channel.is_none_or(|channel| channel == ch) {
                self.set_legato(ch, false);
                self.set_retrigger(ch, false);
                self.channels[ch as usize].reset_all_controllers();
            }
        }
    }

    /// Silences everything, resets controllers and restores each channel's initial program.
    pub fn system_reset(&mut self) {
        self.all_sound_off(None);
        self.reset_all_controllers(None);
        for (channel, groups) in self.channels.iter_mut().zip(self.loop_groups.iter_mut()) {
            channel.restore_program();
            *groups = [None; NOTE_COUNT];
        }
        self.master_volume = DEFAULT_MASTER_VOLUME;
    }

    pub fn active_voice_count(&self) -> usize {
        self.voices.active_count()
    }

    pub fn voices(&self) -> Vec<VoiceInfo> {
        self.voices
            .active()
            .into_iter()
            .filter_map(|id| self.voice_info(id))
            .collect()
    }

    pub fn voice_info(&self, id: VoiceId) -> Option<VoiceInfo> {
        let voice = self.voices.get(id)?;
        if voice.state() == VoiceState::Idle {
            return None;
        }
        Some(VoiceInfo {
            id,
            serial: voice.serial(),
            channel: voice.channel() as u8,
            note: voice.note() as u8,
            state: voice.state(),
            loop_group: voice.loop_group(),
        })
    }

    /// Voice currently bound to `note` on `channel`.
    pub fn note_voice(&self, channel: u8, note: u8) -> Option<VoiceInfo> {
        let id = (*self.one_shot.get(channel as usize)?.get(note as usize)?)?;
        self.voice_info(id)
    }

    /// Voice currently owning exclusive `group` on `channel`.
    pub fn loop_group_voice(&self, channel: u8, group: u8) -> Option<VoiceInfo> {
        let id = (*self.loop_groups.get(channel as usize)?.get(group as usize)?)?;
        self.voice_info(id)
    }

    /// Mixes `frames` frames additively into `mix`, interleaved when stereo.
    pub fn fill(&mut self, mix: &mut [i32], frames: usize) {
        let frames = frames.min(mix.len() / self.settings.channel_count());
        let Self {
            voices,
            channels,
            one_shot,
            loop_groups,
            settings,
            master_volume,
            ..
        } = self;

        for (id, voice) in voices.iter_mut() {
            if voice.state() == VoiceState::Idle {
                continue;
            }
            let ch = voice.channel();
            let holds_fall = match voice.loop_group() {
                LoopGroup::None => false,
                LoopGroup::OneShot => true,
                LoopGroup::Exclusive(group) => loop_groups[ch][group as usize] == Some(id),
            };
            let context = VoiceContext {
                channel: &channels[ch],
                master_volume: *master_volume,
                sample_rate: settings.sample_rate,
                stereo: settings.stereo,
                holds_fall,
            };
            if !voice.render(mix, frames, &context) {
                voice.kill();
                unbind(&mut one_shot[ch], &mut loop_groups[ch], id);
            }
        }
    }

    /// Renders interleaved 16-bit frames, saturating the 24-bit mix.
    pub fn render(&mut self, out: &mut [i16]) {
        let frames = out.len() / self.settings.channel_count();
        let len = frames * self.settings.channel_count();

        let mut mix = std::mem::take(&mut self.mix);
        mix.clear();
        mix.resize(len, 0);
        self.fill(&mut mix, frames);

        for (sample, value) in out.iter_mut().zip(mix.iter()) {
            *sample = narrow(*value);
        }
        out[len..].fill(0);
        self.mix = mix;
    }

    fn allocate_voice(&mut self) -> VoiceId {
        let id = self.voices.request_new();
        if let Some(voice) = self.voices.get_mut(id) {
            if voice.state() != VoiceState::Idle {
                let ch = voice.channel();
                debug!(
                    channel = ch,
                    note = voice.note(),
                    state = ?voice.state(),
                    "stealing voice"
                );
                voice.kill();
                unbind(&mut self.one_shot[ch], &mut self.loop_groups[ch], id);
            }
        }
        id
    }
}

impl<Source: PatchSource> Renderer for Synthesizer<Source> {
    fn render(&mut self, out: &mut [i16]) {
        Synthesizer::render(self, out);
    }

    fn channel_count(&self) -> usize {
        self.settings.channel_count()
    }
}
