use std::collections::HashMap;
use std::sync::Arc;

use crate::envelope::Envelope;
use crate::sample_source::SampleSource;

/// Number of note slots in a patch.
pub const NOTE_COUNT: usize = 128;

/// How a note slot interacts with other notes on its channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopGroup {
    /// No grouping.
    #[default]
    None,
    /// The note never progresses its fall shape.
    OneShot,
    /// Starting the note chokes the previous owner of the group.
    Exclusive(u8),
}

impl LoopGroup {
    pub fn from_raw(value: i8) -> Self {
        match value {
            v if v < 0 => LoopGroup::None,
            0 => LoopGroup::OneShot,
            v => LoopGroup::Exclusive(v as u8),
        }
    }

    pub fn raw(self) -> i8 {
        match self {
            LoopGroup::None => -1,
            LoopGroup::OneShot => 0,
            LoopGroup::Exclusive(group) => group as i8,
        }
    }

    pub(crate) fn exclusive(self) -> Option<usize> {
        match self {
            LoopGroup::Exclusive(group) => Some(group as usize),
            _ => None,
        }
    }
}

/// Everything a voice needs to play one note of a patch.
#[derive(Debug, Clone)]
pub struct PatchNote {
    pub source: Arc<SampleSource>,
    /// Tuning in the low 15 bits; the sign bit flips the loop direction.
    pub pitch_offset: i16,
    pub volume_offset: i8,
    /// Note pan, 0..=128 with 64 centred.
    pub pan_offset: u8,
    pub envelope: Arc<Envelope>,
    pub loop_group: LoopGroup,
}

impl PatchNote {
    /// Packs a coarse/fine tuning pair the way note slots store it.
    pub fn encode_pitch(coarse: i32, fine: i32) -> i16 {
        (coarse * 256 + fine - i32::from(i16::MIN)) as i16
    }

    /// Tuning in 1/256 semitone units.
    pub fn tuning(&self) -> i32 {
        i32::from(self.pitch_offset) & 0x7FFF
    }

    /// Whether loop-start relocation runs over the mirrored loop range.
    pub fn flips_loop(&self) -> bool {
        self.pitch_offset < 0
    }
}

/// An instrument: one optional sample mapping per MIDI note.
#[derive(Debug, Clone)]
pub struct Patch {
    volume: i32,
    notes: Box<[Option<PatchNote>]>,
}

impl Patch {
    pub fn builder(volume: i32) -> PatchBuilder {
        PatchBuilder {
            volume,
            notes: vec![None; NOTE_COUNT],
        }
    }

    pub fn volume(&self) -> i32 {
        self.volume
    }

    pub fn note(&self, note: usize) -> Option<&PatchNote> {
        self.notes.get(note).and_then(Option::as_ref)
    }

    /// Number of notes that have a sample.
    pub fn mapped_notes(&self) -> usize {
        self.notes.iter().filter(|note| note.is_some()).count()
    }
}

/// Collects note slots before the patch is frozen.
#[derive(Debug, Clone)]
pub struct PatchBuilder {
    volume: i32,
    notes: Vec<Option<PatchNote>>,
}

impl PatchBuilder {
    pub fn volume(&mut self, volume: i32) -> &mut Self {
        self.volume = volume;
        self
    }

    /// Maps `note` to `slot`. Notes outside 0..128 are ignored.
    pub fn note(&mut self, note: usize, slot: PatchNote) -> &mut Self {
        if let Some(entry) = self.notes.get_mut(note) {
            *entry = Some(slot);
        }
        self
    }

    pub fn build(self) -> Patch {
        Patch {
            volume: self.volume,
            notes: self.notes.into_boxed_slice(),
        }
    }
}

/// Looks up instruments by program number (program plus bank offset).
pub trait PatchSource {
    fn patch(&self, program: u32) -> Option<Arc<Patch>>;
}

impl PatchSource for HashMap<u32, Arc<Patch>> {
    fn patch(&self, program: u32) -> Option<Arc<Patch>> {
        self.get(&program).cloned()
    }
}

impl<T: PatchSource + ?Sized> PatchSource for Arc<T> {
    fn patch(&self, program: u32) -> Option<Arc<Patch>> {
        (**self).patch(program)
    }
}
