//! Binary layout of the shared-state segment.
//!
//! The segment is a flat record of fixed-width fields. Offsets are computed once
//! from the ordered field list below and checked against [`SHM_LEN`] at compile
//! time; both the publisher and the reference reader go through [`LAYOUT`].
//!
//! Numeric fields are native-endian `u32`. Text fields are NUL-terminated and
//! zero-padded; values longer than `capacity - 1` bytes are right-truncated.

use serde::Serialize;

use crate::{PlaybackStatus, PlaybackTrack};

/// Layout version written to [`Field::Version`]. Readers must check it first.
pub const SHM_VERSION: u32 = 0x0000_0001;
/// Total segment size in bytes.
pub const SHM_LEN: usize = 2192;
/// Capacity of short text fields (artist, album, title, station names).
pub const TEXT_LEN: usize = 128;
/// Capacity of cover art reference fields.
pub const COVER_ART_LEN: usize = 512;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    U32,
    Text,
}

/// Every field of the record, in storage order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    Version,
    Status,
    StationName,
    CurrentArtist,
    CurrentAlbum,
    CurrentTitle,
    CurrentStation,
    CurrentCoverArt,
    CurrentDuration,
    CurrentPlayed,
    NextArtist,
    NextAlbum,
    NextTitle,
    NextStation,
    NextCoverArt,
}

impl Field {
    pub const ALL: [Field; 15] = [
        Field::Version,
        Field::Status,
        Field::StationName,
        Field::CurrentArtist,
        Field::CurrentAlbum,
        Field::CurrentTitle,
        Field::CurrentStation,
        Field::CurrentCoverArt,
        Field::CurrentDuration,
        Field::CurrentPlayed,
        Field::NextArtist,
        Field::NextAlbum,
        Field::NextTitle,
        Field::NextStation,
        Field::NextCoverArt,
    ];

    const fn kind(self) -> FieldKind {
        match self {
            Field::Version | Field::Status | Field::CurrentDuration | Field::CurrentPlayed => {
                FieldKind::U32
            }
            _ => FieldKind::Text,
        }
    }

    const fn width(self) -> usize {
        match self {
            Field::CurrentCoverArt | Field::NextCoverArt => COVER_ART_LEN,
            _ => match self.kind() {
                FieldKind::U32 => 4,
                FieldKind::Text => TEXT_LEN,
            },
        }
    }

    /// Offset, length and kind of this field.
    pub fn spec(self) -> FieldSpec {
        LAYOUT.fields[self as usize]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldSpec {
    pub field: Field,
    pub offset: usize,
    pub len: usize,
    pub kind: FieldKind,
}

impl FieldSpec {
    fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.len
    }
}

/// Ordered field descriptors plus the resulting record size.
#[derive(Debug)]
pub struct Layout {
    pub fields: [FieldSpec; 15],
    pub total: usize,
}

impl Layout {
    const fn build() -> Self {
        let mut fields = [FieldSpec {
            field: Field::Version,
            offset: 0,
            len: 0,
            kind: FieldKind::U32,
        }; 15];
        let mut offset = 0;
        let mut i = 0;
        while i < Field::ALL.len() {
            let field = Field::ALL[i];
            let len = field.width();
            fields[i] = FieldSpec {
                field,
                offset,
                len,
                kind: field.kind(),
            };
            offset += len;
            i += 1;
        }
        Self {
            fields,
            total: offset,
        }
    }
}

pub const LAYOUT: Layout = Layout::build();

const _: () = assert!(LAYOUT.total == SHM_LEN);

/// Field group describing one track slot (current or next).
#[derive(Clone, Copy, Debug)]
pub struct TrackFields {
    pub artist: Field,
    pub album: Field,
    pub title: Field,
    pub station: Field,
    pub cover_art: Field,
    pub timing: Option<(Field, Field)>,
}

pub const CURRENT_TRACK: TrackFields = TrackFields {
    artist: Field::CurrentArtist,
    album: Field::CurrentAlbum,
    title: Field::CurrentTitle,
    station: Field::CurrentStation,
    cover_art: Field::CurrentCoverArt,
    timing: Some((Field::CurrentDuration, Field::CurrentPlayed)),
};

pub const NEXT_TRACK: TrackFields = TrackFields {
    artist: Field::NextArtist,
    album: Field::NextAlbum,
    title: Field::NextTitle,
    station: Field::NextStation,
    cover_art: Field::NextCoverArt,
    timing: None,
};

/// Longest prefix of `value` that fits a field of `capacity` bytes including the NUL.
///
/// Cuts on a char boundary so the stored bytes stay valid UTF-8.
pub fn truncate_to_capacity(value: &str, capacity: usize) -> &str {
    let max = capacity.saturating_sub(1);
    if value.len() <= max {
        return value;
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

/// Write a text field. `buf` must be at least [`SHM_LEN`] bytes.
pub fn write_text(buf: &mut [u8], field: Field, value: &str) {
    let spec = field.spec();
    debug_assert_eq!(spec.kind, FieldKind::Text);
    let value = truncate_to_capacity(value, spec.len).as_bytes();
    let slot = &mut buf[spec.range()];
    slot[..value.len()].copy_from_slice(value);
    slot[value.len()..].fill(0);
}

/// Write a numeric field. `buf` must be at least [`SHM_LEN`] bytes.
pub fn write_u32(buf: &mut [u8], field: Field, value: u32) {
    let spec = field.spec();
    debug_assert_eq!(spec.kind, FieldKind::U32);
    buf[spec.range()].copy_from_slice(&value.to_ne_bytes());
}

pub fn read_text(buf: &[u8], field: Field) -> String {
    let slot = &buf[field.spec().range()];
    let end = slot.iter().position(|b| *b == 0).unwrap_or(slot.len());
    String::from_utf8_lossy(&slot[..end]).into_owned()
}

pub fn read_u32(buf: &[u8], field: Field) -> u32 {
    let spec = field.spec();
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[spec.range()]);
    u32::from_ne_bytes(raw)
}

/// Write every text field of a track slot, plus timing when the slot has it.
pub fn write_track(buf: &mut [u8], slot: &TrackFields, track: &PlaybackTrack) {
    write_text(buf, slot.artist, &track.artist);
    write_text(buf, slot.album, &track.album);
    write_text(buf, slot.title, &track.title);
    write_text(buf, slot.station, &track.station_name);
    write_text(buf, slot.cover_art, &track.cover_art);
    if let Some((duration, played)) = slot.timing {
        write_u32(buf, duration, track.duration_secs);
        write_u32(buf, played, track.played_secs);
    }
}

fn read_track(buf: &[u8], slot: &TrackFields) -> PlaybackTrack {
    let (duration_secs, played_secs) = slot
        .timing
        .map(|(d, p)| (read_u32(buf, d), read_u32(buf, p)))
        .unwrap_or((0, 0));
    PlaybackTrack {
        artist: read_text(buf, slot.artist),
        album: read_text(buf, slot.album),
        title: read_text(buf, slot.title),
        cover_art: read_text(buf, slot.cover_art),
        station_name: read_text(buf, slot.station),
        duration_secs,
        played_secs,
    }
}

/// Reset the record: zero everything, then stamp the version.
pub fn initialize(buf: &mut [u8]) {
    buf[..SHM_LEN].fill(0);
    write_u32(buf, Field::Version, SHM_VERSION);
    write_u32(buf, Field::Status, PlaybackStatus::Paused.as_u32());
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("segment too short: {0} bytes")]
    Truncated(usize),
    #[error("unsupported layout version {0:#010x}")]
    Version(u32),
    #[error("unknown playback status {0}")]
    Status(u32),
}

/// Decoded copy of the segment, as seen by an external reader.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct SegmentSnapshot {
    pub version: u32,
    pub status: PlaybackStatus,
    pub station_name: String,
    pub current: PlaybackTrack,
    pub next: PlaybackTrack,
}

impl SegmentSnapshot {
    /// Decode `buf`, refusing layouts with a foreign version tag.
    pub fn parse(buf: &[u8]) -> Result<Self, LayoutError> {
        if buf.len() < SHM_LEN {
            return Err(LayoutError::Truncated(buf.len()));
        }
        let version = read_u32(buf, Field::Version);
        if version != SHM_VERSION {
            return Err(LayoutError::Version(version));
        }
        let raw_status = read_u32(buf, Field::Status);
        let status = PlaybackStatus::from_u32(raw_status).ok_or(LayoutError::Status(raw_status))?;
        Ok(Self {
            version,
            status,
            station_name: read_text(buf, Field::StationName),
            current: read_track(buf, &CURRENT_TRACK),
            next: read_track(buf, &NEXT_TRACK),
        })
    }
}
