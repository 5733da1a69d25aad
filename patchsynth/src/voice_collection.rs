use crate::voice::{Voice, VoiceState};

/// Handle to a voice slot in a [`VoiceCollection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceId(usize);

impl VoiceId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Arena of voice slots. Slots are reused, never removed.
#[derive(Debug)]
pub(crate) struct VoiceCollection {
    voices: Vec<Voice>,
    maximum_polyphony: usize,
    next_serial: u64,
}

impl VoiceCollection {
    pub(crate) fn new(maximum_polyphony: usize) -> Self {
        Self {
            voices: Vec::new(),
            maximum_polyphony,
            next_serial: 0,
        }
    }

    /// Picks a slot for a new note: an idle one, a new one below the polyphony
    /// limit, or else the lowest-priority voice. The slot may still be live.
    pub(crate) fn request_new(&mut self) -> VoiceId {
        if let Some(index) = self
            .voices
            .iter()
            .position(|voice| voice.state() == VoiceState::Idle)
        {
            return VoiceId(index);
        }

        if self.voices.len() < self.maximum_polyphony {
            self.voices.push(Voice::default());
            return VoiceId(self.voices.len() - 1);
        }

        // Too many active voices...
        // Find one which has the lowest priority, the older one among equals.
        let index = self
            .voices
            .iter()
            .enumerate()
            .min_by_key(|(_, voice)| (voice.state().priority(), voice.serial()))
            .map_or(0, |(index, _)| index);
        VoiceId(index)
    }

    pub(crate) fn next_serial(&mut self) -> u64 {
        self.next_serial += 1;
        self.next_serial
    }

    pub(crate) fn get(&self, id: VoiceId) -> Option<&Voice> {
        self.voices.get(id.0)
    }

    pub(crate) fn get_mut(&mut self, id: VoiceId) -> Option<&mut Voice> {
        self.voices.get_mut(id.0)
    }

    /// Handles of all non-idle voices.
    pub(crate) fn active(&self) -> Vec<VoiceId> {
        self.voices
            .iter()
            .enumerate()
            .filter(|(_, voice)| voice.state() != VoiceState::Idle)
            .map(|(index, _)| VoiceId(index))
            .collect()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (VoiceId, &mut Voice)> {
        self.voices
            .iter_mut()
            .enumerate()
            .map(|(index, voice)| (VoiceId(index), voice))
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (VoiceId, &Voice)> {
        self.voices
            .iter()
            .enumerate()
            .map(|(index, voice)| (VoiceId(index), voice))
    }

    pub(crate) fn active_count(&self) -> usize {
        self.voices
            .iter()
            .filter(|voice| voice.state() != VoiceState::Idle)
            .count()
    }
}
