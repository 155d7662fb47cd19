use serde::{Deserialize, Serialize};

pub mod shm;

/// A named source of songs.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Station {
    /// Catalog identifier, stable across sessions.
    pub id: String,
    /// Display name.
    pub name: String,
    /// `true` when the station is a QuickMix of several other stations.
    #[serde(default)]
    pub is_quick_mix: bool,
}

/// One playable song as returned by the catalog.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Song {
    pub artist: String,
    pub album: String,
    pub title: String,
    /// Cover art URL, may be empty.
    #[serde(default)]
    pub cover_art: String,
    /// Stream URL handed to the external player.
    pub audio_url: Option<String>,
    /// Station the song originates from (differs from the active station for QuickMix).
    #[serde(default)]
    pub station_id: String,
    /// Declared length in seconds.
    #[serde(default)]
    pub duration_secs: u32,
    /// Replay gain in dB.
    #[serde(default)]
    pub file_gain: f32,
}

/// Stream quality requested from the catalog.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AudioQuality {
    Low,
    Medium,
    #[default]
    High,
}

impl AudioQuality {
    pub fn as_str(self) -> &'static str {
        match self {
            AudioQuality::Low => "low",
            AudioQuality::Medium => "medium",
            AudioQuality::High => "high",
        }
    }
}

/// Playback status published to external readers.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStatus {
    #[default]
    Paused = 0,
    Playing = 1,
}

impl PlaybackStatus {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Paused),
            1 => Some(Self::Playing),
            _ => None,
        }
    }
}

/// Display view of a song as exposed through the shared-state segment.
///
/// Missing songs render as the default value: empty strings and zero timings.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlaybackTrack {
    pub artist: String,
    pub album: String,
    pub title: String,
    pub cover_art: String,
    /// Origin station name, only set for songs played from a QuickMix.
    pub station_name: String,
    pub duration_secs: u32,
    pub played_secs: u32,
}

impl PlaybackTrack {
    /// Build the view for `song`, resolving its origin station when `quick_mix` is set.
    pub fn from_song(song: &Song, stations: &[Station], quick_mix: bool) -> Self {
        let station_name = if quick_mix {
            find_station_by_id(stations, &song.station_id)
                .map(|s| s.name.clone())
                .unwrap_or_default()
        } else {
            String::new()
        };
        Self {
            artist: song.artist.clone(),
            album: song.album.clone(),
            title: song.title.clone(),
            cover_art: song.cover_art.clone(),
            station_name,
            duration_secs: song.duration_secs,
            played_secs: 0,
        }
    }
}

/// Linear lookup of a station by identifier.
pub fn find_station_by_id<'a>(stations: &'a [Station], id: &str) -> Option<&'a Station> {
    stations.iter().find(|s| s.id == id)
}
