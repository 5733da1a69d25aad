//! Decoder for column-compressed track blobs.
//!
//! A blob stores every event of every track split into columns: the event
//! tags first, then one delta time per tag, the controller numbers, and one
//! column per kind of data byte. Most columns are delta-coded. The last three
//! bytes hold the track count and the time division.
//!
//! Decoding runs in two passes. [`ColumnPlan::scan`] measures every column
//! and the exact size of the output, then [`decode_with_plan`] interleaves
//! the columns back into a Standard MIDI File.

use tracing::debug;

const HEADER_LEN: usize = 14;
const TRACK_HEADER_LEN: usize = 8;
const TRAILER_LEN: usize = 3;
const MAX_VLQ_LEN: usize = 4;

const END_OF_TRACK: u8 = 0x07;
const TEMPO: u8 = 0x17;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackDecodeError {
    #[error("blob of {0} bytes is too short to hold a trailer")]
    MissingTrailer(usize),

    #[error("{what} is truncated at offset {offset}")]
    Truncated { what: &'static str, offset: usize },

    #[error("variable-length quantity at offset {0} is longer than 4 bytes")]
    InvalidVlq(usize),

    #[error("unknown event tag {tag:#04x} at offset {offset}")]
    UnknownOpcode { tag: u8, offset: usize },

    #[error("{column} column ends at {end}, past the data limit {limit}")]
    ColumnOverrun {
        column: &'static str,
        end: usize,
        limit: usize,
    },

    #[error("decoded {produced} bytes, planned {planned}")]
    LengthMismatch { planned: usize, produced: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventKind {
    NoteOn,
    NoteOff,
    ControlChange,
    PitchBend,
    ChannelPressure,
    KeyPressure,
    ProgramChange,
}

impl EventKind {
    fn status(self) -> u8 {
        match self {
            EventKind::NoteOff => 0x80,
            EventKind::NoteOn => 0x90,
            EventKind::KeyPressure => 0xA0,
            EventKind::ControlChange => 0xB0,
            EventKind::ProgramChange => 0xC0,
            EventKind::ChannelPressure => 0xD0,
            EventKind::PitchBend => 0xE0,
        }
    }

    fn data_len(self) -> usize {
        match self {
            EventKind::ChannelPressure | EventKind::ProgramChange => 1,
            _ => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    EndOfTrack,
    Tempo,
    Channel(EventKind),
}

impl Tag {
    fn classify(tag: u8, offset: usize) -> Result<Self, TrackDecodeError> {
        let kind = match tag {
            END_OF_TRACK => return Ok(Tag::EndOfTrack),
            TEMPO => return Ok(Tag::Tempo),
            _ => match tag & 0x0F {
                0 => EventKind::NoteOn,
                1 => EventKind::NoteOff,
                2 => EventKind::ControlChange,
                3 => EventKind::PitchBend,
                4 => EventKind::ChannelPressure,
                5 => EventKind::KeyPressure,
                6 => EventKind::ProgramChange,
                _ => return Err(TrackDecodeError::UnknownOpcode { tag, offset }),
            },
        };
        Ok(Tag::Channel(kind))
    }
}

/// The data columns, in the order they follow the controller numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Switch,
    KeyPressure,
    ChannelPressure,
    PitchBendMsb,
    ModulationMsb,
    VolumeMsb,
    PanMsb,
    Key,
    NoteOnVelocity,
    Controller,
    NoteOffVelocity,
    ModulationLsb,
    VolumeLsb,
    PanLsb,
    Program,
    PitchBendLsb,
    NrpnMsb,
    NrpnLsb,
    RpnMsb,
    RpnLsb,
    Tempo,
}

const COLUMN_COUNT: usize = Column::Tempo as usize + 1;

impl Column {
    const NAMES: [&'static str; COLUMN_COUNT] = [
        "switch value",
        "key pressure",
        "channel pressure",
        "pitch bend MSB",
        "modulation MSB",
        "volume MSB",
        "pan MSB",
        "key",
        "note-on velocity",
        "controller value",
        "note-off velocity",
        "modulation LSB",
        "volume LSB",
        "pan LSB",
        "program",
        "pitch bend LSB",
        "NRPN MSB",
        "NRPN LSB",
        "RPN MSB",
        "RPN LSB",
        "tempo",
    ];

    fn name(self) -> &'static str {
        Self::NAMES[self as usize]
    }

    /// Where the value of a control change on `controller` is stored.
    fn for_controller(controller: u8) -> Self {
        match controller {
            0 | 32 => Column::Program,
            1 => Column::ModulationMsb,
            33 => Column::ModulationLsb,
            7 => Column::VolumeMsb,
            39 => Column::VolumeLsb,
            10 => Column::PanMsb,
            42 => Column::PanLsb,
            99 => Column::NrpnMsb,
            98 => Column::NrpnLsb,
            101 => Column::RpnMsb,
            100 => Column::RpnLsb,
            64 | 65 | 120 | 121 | 123 => Column::Switch,
            _ => Column::Controller,
        }
    }
}

fn vlq_len(value: u32) -> usize {
    match value {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        _ => 4,
    }
}

fn read_vlq(
    data: &[u8],
    pos: &mut usize,
    limit: usize,
    what: &'static str,
) -> Result<u32, TrackDecodeError> {
    let start = *pos;
    let mut value = 0u32;
    for _ in 0..MAX_VLQ_LEN {
        let byte = *data
            .get(..limit)
            .and_then(|data| data.get(*pos))
            .ok_or(TrackDecodeError::Truncated { what, offset: *pos })?;
        *pos += 1;
        value = (value << 7) | u32::from(byte & 0x7F);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(TrackDecodeError::InvalidVlq(start))
}

fn write_vlq(out: &mut Vec<u8>, value: u32) {
    for index in (1..vlq_len(value)).rev() {
        out.push(((value >> (7 * index)) & 0x7F) as u8 | 0x80);
    }
    out.push((value & 0x7F) as u8);
}

/// Layout of a blob, measured by the first decoding pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnPlan {
    track_count: u8,
    division: u16,
    tag_count: usize,
    delta_start: usize,
    controller_start: usize,
    controller_count: usize,
    column_starts: [usize; COLUMN_COUNT],
    column_lens: [usize; COLUMN_COUNT],
    output_len: usize,
}

impl ColumnPlan {
    pub fn scan(blob: &[u8]) -> Result<Self, TrackDecodeError> {
        let limit = blob
            .len()
            .checked_sub(TRAILER_LEN)
            .ok_or(TrackDecodeError::MissingTrailer(blob.len()))?;
        let track_count = blob[limit];
        let division = u16::from_be_bytes([blob[limit + 1], blob[limit + 2]]);

        let mut column_lens = [0usize; COLUMN_COUNT];
        let mut controller_count = 0;
        let mut output_len = HEADER_LEN + usize::from(track_count) * TRACK_HEADER_LEN;

        let mut pos = 0;
        for _ in 0..track_count {
            let mut previous = None;
            loop {
                let tag = *blob[..limit].get(pos).ok_or(TrackDecodeError::Truncated {
                    what: "event tag stream",
                    offset: pos,
                })?;
                let status = previous != Some(tag);
                previous = Some(tag & 0x0F);

                match Tag::classify(tag, pos)? {
                    Tag::EndOfTrack => {
                        pos += 1;
                        output_len += 3;
                        break;
                    }
                    Tag::Tempo => {
                        column_lens[Column::Tempo as usize] += 3;
                        output_len += 6;
                    }
                    Tag::Channel(kind) => {
                        let columns: &[Column] = match kind {
                            EventKind::NoteOn => &[Column::Key, Column::NoteOnVelocity],
                            EventKind::NoteOff => &[Column::Key, Column::NoteOffVelocity],
                            EventKind::KeyPressure => &[Column::Key, Column::KeyPressure],
                            EventKind::ChannelPressure => &[Column::ChannelPressure],
                            EventKind::PitchBend => &[Column::PitchBendLsb, Column::PitchBendMsb],
                            EventKind::ProgramChange => &[Column::Program],
                            EventKind::ControlChange => {
                                controller_count += 1;
                                &[]
                            }
                        };
                        for column in columns {
                            column_lens[*column as usize] += 1;
                        }
                        output_len += usize::from(status) + kind.data_len();
                    }
                }
                pos += 1;
            }
        }

        let tag_count = pos;
        let delta_start = pos;
        for _ in 0..tag_count {
            let delta = read_vlq(blob, &mut pos, limit, "delta-time column")?;
            output_len += vlq_len(delta);
        }

        let controller_start = pos;
        let controller_end = controller_start + controller_count;
        if controller_end > limit {
            return Err(TrackDecodeError::ColumnOverrun {
                column: "controller number",
                end: controller_end,
                limit,
            });
        }
        let mut controller = 0u8;
        for &delta in &blob[controller_start..controller_end] {
            controller = controller.wrapping_add(delta) & 0x7F;
            column_lens[Column::for_controller(controller) as usize] += 1;
        }

        let mut column_starts = [0usize; COLUMN_COUNT];
        let mut offset = controller_end;
        for (index, len) in column_lens.iter().enumerate() {
            column_starts[index] = offset;
            offset += len;
            if offset > limit {
                return Err(TrackDecodeError::ColumnOverrun {
                    column: Column::NAMES[index],
                    end: offset,
                    limit,
                });
            }
        }

        Ok(Self {
            track_count,
            division,
            tag_count,
            delta_start,
            controller_start,
            controller_count,
            column_starts,
            column_lens,
            output_len,
        })
    }

    pub fn track_count(&self) -> u8 {
        self.track_count
    }

    pub fn division(&self) -> u16 {
        self.division
    }

    /// Number of events, end-of-track markers included.
    pub fn event_count(&self) -> usize {
        self.tag_count
    }

    /// Exact size of the Standard MIDI File the blob decodes to.
    pub fn output_len(&self) -> usize {
        self.output_len
    }
}

/// Reads consecutive bytes from each data column.
struct Columns<'a> {
    blob: &'a [u8],
    next: [usize; COLUMN_COUNT],
    end: [usize; COLUMN_COUNT],
}

impl<'a> Columns<'a> {
    fn new(plan: &ColumnPlan, blob: &'a [u8]) -> Self {
        let mut end = plan.column_starts;
        for (slot, len) in end.iter_mut().zip(plan.column_lens.iter()) {
            *slot += len;
        }
        Self {
            blob,
            next: plan.column_starts,
            end,
        }
    }

    fn take(&mut self, column: Column) -> Result<u8, TrackDecodeError> {
        let index = column as usize;
        let pos = self.next[index];
        if pos >= self.end[index] || pos >= self.blob.len() {
            return Err(TrackDecodeError::ColumnOverrun {
                column: column.name(),
                end: pos + 1,
                limit: self.end[index],
            });
        }
        self.next[index] += 1;
        Ok(self.blob[pos])
    }

    /// Takes a delta byte and adds it to a running value.
    fn accumulate(&mut self, column: Column, running: &mut i32) -> Result<u8, TrackDecodeError> {
        *running = running.wrapping_add(i32::from(self.take(column)? as i8));
        Ok((*running & 0x7F) as u8)
    }
}

/// Running values shared by all tracks of a blob.
#[derive(Debug, Default)]
struct Running {
    channel: u8,
    key: i32,
    note_on_velocity: i32,
    note_off_velocity: i32,
    key_pressure: i32,
    channel_pressure: i32,
    pitch_bend: i32,
    controller: u8,
}

/// Second pass: rebuilds the Standard MIDI File described by `plan`.
pub fn decode_with_plan(plan: &ColumnPlan, blob: &[u8]) -> Result<Vec<u8>, TrackDecodeError> {
    let controller_end = plan.controller_start + plan.controller_count;
    // a plan scanned from another blob can point past this one
    if plan.delta_start > plan.controller_start || controller_end > blob.len() {
        return Err(TrackDecodeError::LengthMismatch {
            planned: plan.output_len,
            produced: 0,
        });
    }
    let tags = &blob[..plan.delta_start];

    let mut out = Vec::with_capacity(plan.output_len);
    out.extend_from_slice(b"MThd");
    out.extend_from_slice(&6u32.to_be_bytes());
    let format: u16 = if plan.track_count > 1 { 1 } else { 0 };
    out.extend_from_slice(&format.to_be_bytes());
    out.extend_from_slice(&u16::from(plan.track_count).to_be_bytes());
    out.extend_from_slice(&plan.division.to_be_bytes());

    let mut columns = Columns::new(plan, blob);
    let mut running = Running::default();
    let mut controller_values = [0i32; 128];
    let mut tag_pos = 0;
    let mut delta_pos = plan.delta_start;
    let mut controller_pos = plan.controller_start;

    for _ in 0..plan.track_count {
        out.extend_from_slice(b"MTrk");
        let length_at = out.len();
        out.extend_from_slice(&[0; 4]);
        let track_start = out.len();
        let mut previous = None;

        loop {
            let delta = read_vlq(blob, &mut delta_pos, plan.controller_start, "delta-time column")?;
            write_vlq(&mut out, delta);

            let tag = *tags
                .get(tag_pos)
                .ok_or(TrackDecodeError::Truncated {
                    what: "event tag stream",
                    offset: tag_pos,
                })?;
            let status = previous != Some(tag);
            previous = Some(tag & 0x0F);

            let kind = match Tag::classify(tag, tag_pos)? {
                Tag::EndOfTrack => {
                    tag_pos += 1;
                    out.extend_from_slice(&[0xFF, 0x2F, 0x00]);
                    let track_len = (out.len() - track_start) as u32;
                    out[length_at..track_start].copy_from_slice(&track_len.to_be_bytes());
                    break;
                }
                Tag::Tempo => {
                    tag_pos += 1;
                    out.extend_from_slice(&[0xFF, 0x51, 0x03]);
                    for _ in 0..3 {
                        out.push(columns.take(Column::Tempo)?);
                    }
                    continue;
                }
                Tag::Channel(kind) => kind,
            };
            tag_pos += 1;

            running.channel ^= tag >> 4;
            if status {
                out.push(kind.status() | running.channel);
            }

            match kind {
                EventKind::NoteOn => {
                    out.push(columns.accumulate(Column::Key, &mut running.key)?);
                    out.push(columns.accumulate(Column::NoteOnVelocity, &mut running.note_on_velocity)?);
                }
                EventKind::NoteOff => {
                    out.push(columns.accumulate(Column::Key, &mut running.key)?);
                    out.push(columns.accumulate(Column::NoteOffVelocity, &mut running.note_off_velocity)?);
                }
                EventKind::KeyPressure => {
                    out.push(columns.accumulate(Column::Key, &mut running.key)?);
                    out.push(columns.accumulate(Column::KeyPressure, &mut running.key_pressure)?);
                }
                EventKind::ChannelPressure => {
                    out.push(columns.accumulate(Column::ChannelPressure, &mut running.channel_pressure)?);
                }
                EventKind::PitchBend => {
                    let lsb = i32::from(columns.take(Column::PitchBendLsb)? as i8);
                    let msb = i32::from(columns.take(Column::PitchBendMsb)? as i8);
                    running.pitch_bend = running.pitch_bend.wrapping_add(lsb).wrapping_add(msb << 7);
                    out.push((running.pitch_bend & 0x7F) as u8);
                    out.push(((running.pitch_bend >> 7) & 0x7F) as u8);
                }
                EventKind::ControlChange => {
                    let number = blob[..controller_end].get(controller_pos).ok_or(
                        TrackDecodeError::ColumnOverrun {
                            column: "controller number",
                            end: controller_pos + 1,
                            limit: controller_end,
                        },
                    )?;
                    running.controller = running.controller.wrapping_add(*number) & 0x7F;
                    controller_pos += 1;
                    let controller = running.controller;
                    out.push(controller);
                    let value = &mut controller_values[usize::from(controller)];
                    out.push(columns.accumulate(Column::for_controller(controller), value)?);
                }
                EventKind::ProgramChange => {
                    out.push(columns.take(Column::Program)? & 0x7F);
                }
            }
        }
    }

    if out.len() != plan.output_len {
        return Err(TrackDecodeError::LengthMismatch {
            planned: plan.output_len,
            produced: out.len(),
        });
    }
    Ok(out)
}

/// Decodes a track blob into a Standard MIDI File.
pub fn decode(blob: &[u8]) -> Result<Vec<u8>, TrackDecodeError> {
    let plan = ColumnPlan::scan(blob)?;
    debug!(
        tracks = plan.track_count,
        division = plan.division,
        events = plan.tag_count,
        bytes = plan.output_len,
        "track blob planned"
    );
    decode_with_plan(&plan, blob)
}
