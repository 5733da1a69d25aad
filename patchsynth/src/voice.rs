use std::sync::Arc;

use crate::channel::Channel;
use crate::envelope::{Envelope, EnvelopeCursor};
use crate::lfo::Lfo;
use crate::patch::{LoopGroup, Patch, PatchNote};
use crate::resampler::Resampler;
use crate::synth_math::{
    PAN_CENTER, PAN_FULL, RETRIGGER_PERIOD, pitch_factor, pitch_increment, portamento_step,
};

/// Lifecycle of a voice slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoiceState {
    #[default]
    Idle,
    Sounding,
    Releasing,
}

impl VoiceState {
    /// Lower values are stolen first.
    pub(crate) fn priority(self) -> u8 {
        match self {
            VoiceState::Idle => 0,
            VoiceState::Releasing => 1,
            VoiceState::Sounding => 2,
        }
    }
}

/// Synthesizer state a voice renders against.
pub(crate) struct VoiceContext<'a> {
    pub(crate) channel: &'a Channel,
    pub(crate) master_volume: i32,
    pub(crate) sample_rate: u32,
    pub(crate) stereo: bool,
    /// One-shot notes, and exclusive notes that still own their group, keep their fall shape still.
    pub(crate) holds_fall: bool,
}

impl VoiceContext<'_> {
    /// Frames between parameter updates (10 ms).
    pub(crate) fn update_frames(&self) -> usize {
        (self.sample_rate / 100).max(1) as usize
    }
}

#[derive(Debug, Default)]
pub(crate) struct Voice {
    state: VoiceState,
    serial: u64,
    channel: usize,
    note: usize,

    envelope: Arc<Envelope>,
    loop_group: LoopGroup,
    flips_loop: bool,
    source_rate: u32,

    note_volume: i32,
    note_pan: i32,
    transposition: i32,
    glide_shift: i32,
    portamento: i32,

    progress: EnvelopeCursor,
    lfo: Lfo,
    stream: Option<Resampler>,
    frames_until_update: usize,
    retrigger_accumulator: i64,
}

impl Voice {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn start(
        &mut self,
        serial: u64,
        channel: usize,
        note: usize,
        velocity: u8,
        patch: &Patch,
        zone: &PatchNote,
        context: &VoiceContext,
    ) {
        let velocity = i64::from(velocity);
        let note_volume = (velocity * velocity
            * i64::from(zone.volume_offset)
            * i64::from(patch.volume())
            + 1024)
            >> 11;

        *self = Voice {
            state: VoiceState::Sounding,
            serial,
            channel,
            note,
            envelope: Arc::clone(&zone.envelope),
            loop_group: zone.loop_group,
            flips_loop: zone.flips_loop(),
            source_rate: zone.source.sample_rate(),
            note_volume: note_volume.clamp(0, i64::from(i32::MAX)) as i32,
            note_pan: i32::from(zone.pan_offset),
            transposition: ((note as i32) << 8) - zone.tuning(),
            ..Default::default()
        };

        let mut stream = Resampler::new(
            Arc::clone(&zone.source),
            self.flips_loop,
            self.step(context),
            self.volume(context),
            self.pan(context),
            context.stereo,
        );
        if context.channel.sample_loop() != 0 {
            stream.relocate_loop_start(context.channel.sample_loop(), self.flips_loop);
        }
        self.stream = Some(stream);
    }

    /// Moves a sounding voice to a new note, gliding from the pitch it has now.
    pub(crate) fn retarget(&mut self, note: usize) {
        debug_assert_eq!(self.state, VoiceState::Sounding);
        let current = self.glide() + self.transposition;
        self.transposition += ((note as i32) - (self.note as i32)) << 8;
        self.glide_shift = current - self.transposition;
        self.portamento = 4096;
        self.note = note;
    }

    pub(crate) fn release(&mut self) {
        if self.state == VoiceState::Sounding {
            self.state = VoiceState::Releasing;
        }
    }

    pub(crate) fn kill(&mut self) {
        self.state = VoiceState::Idle;
        self.stream = None;
    }

    pub(crate) fn reset_retrigger(&mut self) {
        self.retrigger_accumulator = 0;
    }

    pub(crate) fn state(&self) -> VoiceState {
        self.state
    }

    pub(crate) fn serial(&self) -> u64 {
        self.serial
    }

    pub(crate) fn channel(&self) -> usize {
        self.channel
    }

    pub(crate) fn note(&self) -> usize {
        self.note
    }

    pub(crate) fn loop_group(&self) -> LoopGroup {
        self.loop_group
    }

    #[cfg(test)]
    pub(crate) fn stream(&self) -> Option<&Resampler> {
        self.stream.as_ref()
    }

    /// Mixes `frames` frames into `out`. Returns `false` once the voice has finished.
    pub(crate) fn render(&mut self, out: &mut [i32], frames: usize, context: &VoiceContext) -> bool {
        let mut offset = 0;
        let mut remaining = frames;

        while remaining > self.frames_until_update {
            let chunk = self.frames_until_update;
            self.write_audio(out, offset, chunk, frames, context);
            offset += chunk;
            remaining -= chunk;

            if self.stream_finished() {
                return false;
            }
            if !self.update(context) {
                // the stream fades out over the rest of the block
                if let Some(stream) = self.stream.as_mut() {
                    stream.fill(out, offset, remaining);
                }
                return false;
            }
        }

        self.write_audio(out, offset, remaining, frames, context);
        self.frames_until_update -= remaining;
        !self.stream_finished()
    }

    fn stream_finished(&self) -> bool {
        self.stream.as_ref().is_none_or(Resampler::is_finished)
    }

    fn glide(&self) -> i32 {
        (self.portamento * self.glide_shift) >> 12
    }

    fn step(&self, context: &VoiceContext) -> i32 {
        let channel = context.channel;
        let mut shift = self.glide() + self.transposition;
        shift += ((channel.pitch_bend() - 8192) * channel.pitch_bend_range()) >> 12;
        shift += self.lfo.shift(&self.envelope, channel.modulation());
        pitch_increment(self.source_rate, shift, context.sample_rate)
    }

    fn volume(&self, context: &VoiceContext) -> i32 {
        let channel = context.channel;
        let mut volume =
            (i64::from(channel.expression()) * i64::from(channel.volume()) + 4096) >> 13;
        volume = (volume * volume + 16384) >> 15;
        volume = (volume * i64::from(self.note_volume) + 16384) >> 15;
        volume = (volume * i64::from(context.master_volume) + 128) >> 8;
        let volume = volume.clamp(0, i64::from(i32::MAX >> 8)) as i32;

        self.progress.apply(
            &self.envelope,
            volume,
            self.state == VoiceState::Releasing,
        )
    }

    fn pan(&self, context: &VoiceContext) -> i32 {
        let pan = context.channel.pan();
        if pan < PAN_CENTER {
            (pan * self.note_pan + 32) >> 6
        } else {
            PAN_FULL - (((128 - self.note_pan) * (PAN_FULL - pan) + 32) >> 6)
        }
    }

    /// Recomputes pitch, volume and pan. Returns `false` when the note has finished,
    /// in which case the stream has been told to fade out.
    fn update(&mut self, context: &VoiceContext) -> bool {
        let channel = context.channel;
        self.frames_until_update = context.update_frames();

        if self.portamento > 0 {
            self.portamento =
                (self.portamento - portamento_step(channel.portamento_time())).max(0);
        }
        let step = self.step(context);

        self.lfo.advance(self.envelope.vibrato_hz);
        let factor = pitch_factor(self.note as i32, self.glide());
        let releasing = self.state == VoiceState::Releasing;
        let fall = releasing && !channel.hold() && !context.holds_fall;
        let mut finished = self.progress.advance(&self.envelope, factor, fall);

        let looping = self.stream.as_ref().is_some_and(Resampler::is_looping);
        if fall && looping && self.envelope.fall_curve.is_none() {
            finished = true;
        }

        let volume = self.volume(context);
        let pan = self.pan(context);
        let frames = self.frames_until_update as i32;
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };
        stream.set_step(step);
        if finished {
            stream.reset(frames);
            return false;
        }
        stream.glide_to(frames, volume, pan);
        true
    }

    fn write_audio(
        &mut self,
        out: &mut [i32],
        offset: usize,
        length: usize,
        block_end: usize,
        context: &VoiceContext,
    ) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };

        let mut offset = offset;
        let mut length = length;
        let channel = context.channel;

        if channel.retrigger() && self.state == VoiceState::Sounding {
            let step = i64::from(channel.retrigger_rate()) / i64::from(context.sample_rate);
            if step > 0 {
                loop {
                    let frames = (step + RETRIGGER_PERIOD - 1 - self.retrigger_accumulator) / step;
                    if frames as usize > length {
                        break;
                    }
                    let frames = frames as usize;
                    stream.fill(out, offset, frames);
                    offset += frames;
                    length -= frames;
                    self.retrigger_accumulator += step * frames as i64 - RETRIGGER_PERIOD;

                    let fade = (context.update_frames() as i64).min(262_144 / step) as i32;
                    let mut restarted = Resampler::new(
                        Arc::clone(stream.source()),
                        self.flips_loop,
                        stream.step(),
                        stream.volume(),
                        stream.pan(),
                        context.stereo,
                    );
                    if channel.sample_loop() != 0 {
                        restarted.relocate_loop_start(channel.sample_loop(), self.flips_loop);
                    }
                    restarted.glide_to(fade, stream.volume(), stream.pan());

                    let mut old = std::mem::replace(stream, restarted);
                    old.reset(fade);
                    old.fill(out, offset, block_end - offset);
                }
                self.retrigger_accumulator += step * length as i64;
            }
        }

        stream.fill(out, offset, length);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Curve;
    use crate::sample_source::SampleSource;

    fn zone(source: SampleSource, envelope: Envelope) -> PatchNote {
        PatchNote {
            source: Arc::new(source),
            pitch_offset: PatchNote::encode_pitch(60, 0),
            volume_offset: 64,
            pan_offset: 64,
            envelope: Arc::new(envelope),
            loop_group: LoopGroup::None,
        }
    }

    fn looping_source() -> SampleSource {
        SampleSource::new(vec![10i8; 1000], 44100, 0, 1000, true).unwrap()
    }

    fn context(channel: &Channel) -> VoiceContext<'_> {
        VoiceContext {
            channel,
            master_volume: 256,
            sample_rate: 44100,
            stereo: false,
            holds_fall: false,
        }
    }

    fn started(zone: &PatchNote, channel: &Channel) -> Voice {
        let patch = Patch::builder(32).build();
        let mut voice = Voice::default();
        voice.start(1, 0, 60, 100, &patch, zone, &context(channel));
        voice
    }

    #[test]
    fn unity_note_plays_at_unity_step() {
        let channel = Channel::default();
        let zone = zone(looping_source(), Envelope::default());
        let voice = started(&zone, &channel);
        assert_eq!(voice.state(), VoiceState::Sounding);
        assert_eq!(voice.stream().unwrap().step(), 256);
    }

    #[test]
    fn retarget_glides_from_the_current_pitch() {
        let channel = Channel::default();
        let zone = zone(looping_source(), Envelope::default());
        let mut voice = started(&zone, &channel);
        let serial = voice.serial();

        voice.retarget(64);
        assert_eq!(voice.note(), 64);
        assert_eq!(voice.serial(), serial);
        assert_eq!(voice.step(&context(&channel)), 256);

        let mut out = vec![0; 44100];
        assert!(voice.render(&mut out, 44100, &context(&channel)));
        assert_eq!(voice.stream().unwrap().step(), pitch_increment(44100, 4 << 8, 44100));
    }

    #[test]
    fn released_loop_without_fall_shape_stops_at_next_update() {
        let channel = Channel::default();
        let zone = zone(looping_source(), Envelope::default());
        let mut voice = started(&zone, &channel);
        let mut out = vec![0; 1000];
        assert!(voice.render(&mut out, 1000, &context(&channel)));

        voice.release();
        assert_eq!(voice.state(), VoiceState::Releasing);
        assert!(!voice.render(&mut out, 1000, &context(&channel)));
    }

    #[test]
    fn hold_keeps_a_released_loop_sounding() {
        let mut channel = Channel::default();
        channel.set_hold(true);
        let zone = zone(looping_source(), Envelope::default());
        let mut voice = started(&zone, &channel);
        voice.release();
        let mut out = vec![0; 4410];
        for _ in 0..10 {
            assert!(voice.render(&mut out, 4410, &context(&channel)));
        }
    }

    #[test]
    fn fall_shape_ends_the_note() {
        let channel = Channel::default();
        let envelope = Envelope {
            fall_curve: Curve::from_bytes(&[0, 64, 1, 0]),
            ..Default::default()
        };
        let zone = zone(looping_source(), envelope);
        let mut voice = started(&zone, &channel);
        voice.release();
        let mut out = vec![0; 441];
        let mut blocks = 0;
        while voice.render(&mut out, 441, &context(&channel)) {
            blocks += 1;
            assert!(blocks < 20);
        }
    }

    #[test]
    fn looping_source_plays_once_without_the_flip_bit() {
        let channel = Channel::default();
        let zone = PatchNote {
            pitch_offset: PatchNote::encode_pitch(-1, 0),
            ..zone(looping_source(), Envelope::default())
        };
        assert!(!zone.flips_loop());

        let patch = Patch::builder(32).build();
        let mut voice = Voice::default();
        voice.start(1, 0, 127, 100, &patch, &zone, &context(&channel));
        assert!(!voice.stream().unwrap().is_looping());
        assert_eq!(voice.stream().unwrap().step(), 256);

        let mut out = vec![0; 441];
        let mut blocks = 0;
        while voice.render(&mut out, 441, &context(&channel)) {
            blocks += 1;
            assert!(blocks < 10);
        }
        assert!(voice.stream().unwrap().is_exhausted());
    }

    #[test]
    fn retrigger_restarts_the_stream() {
        let mut channel = Channel::default();
        channel.set_retrigger(true);
        let source = SampleSource::one_shot(vec![10i8; 50_000], 44100).unwrap();
        let zone = zone(source, Envelope::default());
        let mut voice = started(&zone, &channel);

        let mut out = vec![0; 4410];
        assert!(voice.render(&mut out, 4410, &context(&channel)));
        // the default rate restarts the sample well before 4410 frames
        assert!(voice.stream().unwrap().cursor() < 4410 * 256);
    }
}
