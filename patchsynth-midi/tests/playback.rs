use std::collections::HashMap;
use std::sync::Arc;

use midly::{MetaMessage, MidiMessage, Smf, TrackEventKind};
use parking_lot::Mutex;
use patchsynth::{
    Envelope, LoopGroup, Patch, PatchNote, PcmPlayer, PcmSink, SampleSource, SynthError,
    Synthesizer, SynthesizerSettings,
};
use patchsynth_midi::{MidiFile, MidiFileSequencer, track_decoder};

type Bank = HashMap<u32, Arc<Patch>>;

/// One track: note-on 60/100, note-off 60/64 after 96 ticks, end of track.
const SINGLE_NOTE_BLOB: [u8; 13] = [
    0x00, 0x01, 0x07, // tags
    0x00, 0x60, 0x00, // deltas
    60, 0, // keys
    100, // note-on velocities
    64,  // note-off velocities
    1, 0x00, 0x60, // one track, 96 ticks per beat
];

fn bank() -> Bank {
    let source = Arc::new(SampleSource::new(vec![60i8; 1000], 44100, 0, 1000, true).unwrap());
    let mut builder = Patch::builder(64);
    builder.note(
        60,
        PatchNote {
            source,
            pitch_offset: PatchNote::encode_pitch(60, 0),
            volume_offset: 100,
            pan_offset: 64,
            envelope: Arc::new(Envelope::default()),
            loop_group: LoopGroup::None,
        },
    );
    HashMap::from([(0, Arc::new(builder.build()))])
}

fn mono() -> SynthesizerSettings {
    SynthesizerSettings {
        stereo: false,
        ..SynthesizerSettings::default()
    }
}

#[test]
fn decoded_blob_parses_as_standard_midi() {
    let bytes = track_decoder::decode(&SINGLE_NOTE_BLOB).unwrap();
    let smf = Smf::parse(&bytes).unwrap();

    assert_eq!(smf.tracks.len(), 1);
    let events = &smf.tracks[0];
    assert_eq!(events.len(), 3);

    assert_eq!(events[0].delta.as_int(), 0);
    assert!(matches!(
        events[0].kind,
        TrackEventKind::Midi { channel, message: MidiMessage::NoteOn { key, vel } }
            if channel.as_int() == 0 && key.as_int() == 60 && vel.as_int() == 100
    ));
    assert_eq!(events[1].delta.as_int(), 96);
    assert!(matches!(
        events[1].kind,
        TrackEventKind::Midi { message: MidiMessage::NoteOff { key, vel }, .. }
            if key.as_int() == 60 && vel.as_int() == 64
    ));
    assert!(matches!(events[2].kind, TrackEventKind::Meta(MetaMessage::EndOfTrack)));
}

#[test]
fn corrupt_blobs_fail_to_load() {
    let mut blob = SINGLE_NOTE_BLOB;
    blob[1] = 0x0E;
    assert!(MidiFile::from_track_blob(&blob).is_err());
}

fn render_frames<S: patchsynth::PatchSource>(sequencer: &mut MidiFileSequencer<S>, frames: usize) {
    let mut block = vec![0i16; 1050];
    let mut left = frames;
    while left > 0 {
        let len = left.min(block.len());
        sequencer.render(&mut block[..len]);
        left -= len;
    }
}

#[test]
fn events_land_on_their_frame() {
    // 96 ticks at 96 per beat and the default tempo is half a second
    let file = Arc::new(MidiFile::from_track_blob(&SINGLE_NOTE_BLOB).unwrap());
    assert!((file.length() - 0.5).abs() < 1e-9);

    let synth = Synthesizer::new(bank(), mono()).unwrap();
    let mut sequencer = MidiFileSequencer::new(synth);
    sequencer.play(file, false);

    render_frames(&mut sequencer, 1);
    assert_eq!(sequencer.synthesizer().active_voice_count(), 1);
    assert!(sequencer.synthesizer().note_voice(0, 60).is_some());

    // the note-off is due at frame 22050
    render_frames(&mut sequencer, 22049);
    assert!(sequencer.synthesizer().note_voice(0, 60).is_some());
    render_frames(&mut sequencer, 1);
    assert!(sequencer.synthesizer().note_voice(0, 60).is_none());
    assert!(!sequencer.end_of_sequence());

    // the released loop stops at the next update and fades out over one more
    render_frames(&mut sequencer, 2000);
    assert_eq!(sequencer.synthesizer().active_voice_count(), 0);
    assert!(sequencer.end_of_sequence());
}

#[test]
fn looping_files_restart() {
    let file = Arc::new(MidiFile::from_track_blob(&SINGLE_NOTE_BLOB).unwrap());
    let synth = Synthesizer::new(bank(), mono()).unwrap();
    let mut sequencer = MidiFileSequencer::new(synth);
    sequencer.play(file, true);

    render_frames(&mut sequencer, 30_000);
    // past the last event the file starts over with a fresh note
    assert!(sequencer.position() < 0.5);
    assert!(sequencer.synthesizer().note_voice(0, 60).is_some());
    assert!(!sequencer.end_of_sequence());
}

#[test]
fn looping_a_file_shorter_than_one_frame_plays_once() {
    // tempo of 1us per beat puts the note-off a fraction of a frame in
    let blob = [
        0x17, 0x00, 0x01, 0x07, // tags
        0x00, 0x00, 0x01, 0x00, // deltas
        60, 0,    // keys
        100,      // note-on velocities
        64,       // note-off velocities
        0x00, 0x00, 0x01, // tempo
        1, 0x00, 0x60,
    ];
    let file = Arc::new(MidiFile::from_track_blob(&blob).unwrap());
    assert!(file.length() > 0.0);
    assert_eq!((file.length() * 44100.0).round(), 0.0);

    let synth = Synthesizer::new(bank(), mono()).unwrap();
    let mut sequencer = MidiFileSequencer::new(synth);
    sequencer.play(file, true);

    render_frames(&mut sequencer, 4410);
    assert_eq!(sequencer.position(), 0.1);
    assert_eq!(sequencer.synthesizer().active_voice_count(), 0);
    assert!(sequencer.end_of_sequence());
}

struct Collect(Arc<Mutex<Vec<i16>>>);

impl PcmSink for Collect {
    fn write(&mut self, block: &[i16]) -> Result<(), SynthError> {
        self.0.lock().extend_from_slice(block);
        Ok(())
    }
}

#[test]
fn player_stops_at_the_end_of_the_file() {
    let file = Arc::new(MidiFile::from_track_blob(&SINGLE_NOTE_BLOB).unwrap());
    let mut sequencer = MidiFileSequencer::new(Synthesizer::new(bank(), mono()).unwrap());
    sequencer.play(file, false);

    let samples = Arc::new(Mutex::new(Vec::new()));
    let player = PcmPlayer::spawn(
        Arc::new(Mutex::new(sequencer)),
        Collect(Arc::clone(&samples)),
        512,
    )
    .unwrap();
    let frames = player.join().unwrap();

    assert!(frames >= 22050);
    assert_eq!(samples.lock().len() as u64, frames);
    assert!(samples.lock().iter().any(|&s| s != 0));
}
