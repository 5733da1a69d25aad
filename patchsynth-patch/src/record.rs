use std::fmt::Display;
use std::str::FromStr;

use patchsynth::{Curve, Envelope, LoopGroup, PatchNote, SampleSource};

use crate::error::RecordError;

const FIELD_NAMES: [&str; 18] = [
    "low note",
    "high note",
    "sample",
    "pitch coarse",
    "pitch fine",
    "patch volume",
    "volume offset",
    "pan offset",
    "attack",
    "decay",
    "release",
    "sustain",
    "vibrato cents",
    "vibrato hz",
    "vibrato delay",
    "rise curve",
    "fall curve",
    "loop group",
];

/// One `_`-separated line of a patch definition, mapping a note range to a sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRecord {
    pub low: u8,
    pub high: u8,
    /// `None` when the line names sample `-1`.
    pub sample: Option<String>,
    pub pitch_coarse: i32,
    pub pitch_fine: i32,
    pub patch_volume: i32,
    pub volume_offset: i8,
    pub pan_offset: u8,
    pub envelope: Envelope,
    /// Explicit loop group, when the optional last field is present.
    pub loop_group: Option<i8>,
}

fn invalid(field: usize, reason: impl Display) -> RecordError {
    RecordError::InvalidField {
        field,
        name: FIELD_NAMES[field],
        reason: reason.to_string(),
    }
}

fn parse_field<T>(values: &[&str], field: usize) -> Result<T, RecordError>
where
    T: FromStr,
    T::Err: Display,
{
    values[field]
        .trim()
        .parse()
        .map_err(|error| invalid(field, format!("`{}`: {error}", values[field].trim())))
}

fn parse_curve(values: &[&str], field: usize) -> Result<Option<Curve>, RecordError> {
    let text: String = values[field]
        .chars()
        .filter(|&c| !matches!(c, '[' | ']') && !c.is_whitespace())
        .collect();
    if text.is_empty() || text.split(',').any(|value| value == "null") {
        return Ok(None);
    }

    let bytes = text
        .split(',')
        .map(|value| match value.parse::<i16>() {
            // times are unsigned, levels signed; both fit a byte
            Ok(byte) if (-128..=255).contains(&byte) => Ok(byte as u8),
            _ => Err(invalid(field, format!("`{value}` is not a byte"))),
        })
        .collect::<Result<Vec<u8>, _>>()?;
    if bytes.len() % 2 != 0 {
        return Err(invalid(field, "breakpoints need a time and a level"));
    }

    Ok(Curve::from_bytes(&bytes))
}

impl PatchRecord {
    pub fn parse(line: &str) -> Result<Self, RecordError> {
        let values: Vec<&str> = line.trim().split('_').collect();
        if !(17..=18).contains(&values.len()) {
            return Err(RecordError::FieldCount(values.len()));
        }

        let low: u8 = parse_field(&values, 0)?;
        let high: u8 = parse_field(&values, 1)?;
        if low > high || high > 127 {
            return Err(RecordError::NoteRange { low, high });
        }

        let sample = match values[2].trim() {
            "" => return Err(invalid(2, "missing sample name")),
            "-1" => None,
            name => Some(name.to_string()),
        };

        let envelope = Envelope {
            attack: parse_field(&values, 8)?,
            decay: parse_field(&values, 9)?,
            release: parse_field(&values, 10)?,
            sustain: parse_field(&values, 11)?,
            vibrato_cents: parse_field(&values, 12)?,
            vibrato_hz: parse_field(&values, 13)?,
            vibrato_delay_ms: parse_field(&values, 14)?,
            rise_curve: parse_curve(&values, 15)?,
            fall_curve: parse_curve(&values, 16)?,
        };

        let loop_group = if values.len() == 18 {
            Some(parse_field(&values, 17)?)
        } else {
            None
        };

        Ok(Self {
            low,
            high,
            sample,
            pitch_coarse: parse_field(&values, 3)?,
            pitch_fine: parse_field(&values, 4)?,
            patch_volume: parse_field(&values, 5)?,
            volume_offset: parse_field(&values, 6)?,
            pan_offset: parse_field(&values, 7)?,
            envelope,
            loop_group,
        })
    }

    pub fn pitch_offset(&self) -> i16 {
        PatchNote::encode_pitch(self.pitch_coarse, self.pitch_fine)
    }

    /// The explicit group, or one derived from the sample and range:
    /// looping samples get none, single notes are one-shot, ranges share group 1.
    pub fn loop_group_for(&self, source: &SampleSource) -> LoopGroup {
        match self.loop_group {
            Some(group) => LoopGroup::from_raw(group),
            None if source.is_looping() => LoopGroup::None,
            None if self.low == self.high => LoopGroup::OneShot,
            None => LoopGroup::Exclusive(1),
        }
    }
}

impl FromStr for PatchRecord {
    type Err = RecordError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        PatchRecord::parse(line)
    }
}
