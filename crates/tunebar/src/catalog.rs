//! Station catalog.
//!
//! The playback loop only talks to the [`Catalog`] trait. [`FileCatalog`] serves
//! stations and songs from a local TOML file, paging playlists like a remote
//! service would.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tunebar_types::{AudioQuality, Song, Station};

/// Songs handed out per playlist request.
pub const PLAYLIST_PAGE_LEN: usize = 4;

/// Catalog-level result of a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtocolStatus {
    Ok,
    AuthFailed,
    NotAuthenticated,
    StationNotFound,
}

impl ProtocolStatus {
    pub fn code(self) -> u32 {
        match self {
            ProtocolStatus::Ok => 0,
            ProtocolStatus::AuthFailed => 1,
            ProtocolStatus::NotAuthenticated => 2,
            ProtocolStatus::StationNotFound => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolStatus::Ok => "Everything is fine :)",
            ProtocolStatus::AuthFailed => "Wrong username or password.",
            ProtocolStatus::NotAuthenticated => "Not logged in.",
            ProtocolStatus::StationNotFound => "Station does not exist.",
        }
    }
}

/// Transport-level result of a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportStatus {
    Ok,
    ReadFailed,
}

impl TransportStatus {
    pub fn code(self) -> u32 {
        match self {
            TransportStatus::Ok => 0,
            TransportStatus::ReadFailed => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransportStatus::Ok => "Everything's fine :)",
            TransportStatus::ReadFailed => "Read error.",
        }
    }
}

/// Both outcome codes of one catalog call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallOutcome {
    pub protocol: ProtocolStatus,
    pub transport: TransportStatus,
}

impl CallOutcome {
    pub const OK: CallOutcome = CallOutcome {
        protocol: ProtocolStatus::Ok,
        transport: TransportStatus::Ok,
    };

    pub fn protocol(protocol: ProtocolStatus) -> Self {
        Self {
            protocol,
            transport: TransportStatus::Ok,
        }
    }

    pub fn is_ok(&self) -> bool {
        *self == Self::OK
    }
}

impl fmt::Display for CallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.transport != TransportStatus::Ok {
            f.write_str(self.transport.as_str())
        } else {
            f.write_str(self.protocol.as_str())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct CatalogError {
    pub outcome: CallOutcome,
    pub message: String,
}

impl CatalogError {
    pub fn protocol(protocol: ProtocolStatus) -> Self {
        Self {
            outcome: CallOutcome::protocol(protocol),
            message: protocol.as_str().to_string(),
        }
    }

    pub fn transport(transport: TransportStatus, message: String) -> Self {
        Self {
            outcome: CallOutcome {
                protocol: ProtocolStatus::Ok,
                transport,
            },
            message,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Remote catalog client as seen by the playback loop.
pub trait Catalog {
    fn login(&mut self, credentials: &Credentials) -> Result<(), CatalogError>;
    fn stations(&mut self) -> Result<Vec<Station>, CatalogError>;
    /// Next page of songs for `station`; empty once the station is drained.
    fn playlist(
        &mut self,
        station: &Station,
        quality: AudioQuality,
    ) -> Result<Vec<Song>, CatalogError>;
}

#[derive(Debug, Default, Deserialize)]
struct CatalogFile {
    account: Option<AccountEntry>,
    #[serde(default)]
    stations: Vec<StationEntry>,
    #[serde(default)]
    songs: Vec<SongEntry>,
}

#[derive(Debug, Deserialize)]
struct AccountEntry {
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct StationEntry {
    id: String,
    name: String,
    /// Member station ids; makes this a QuickMix station.
    quick_mix: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct SongEntry {
    station: String,
    artist: String,
    #[serde(default)]
    album: String,
    title: String,
    #[serde(default)]
    cover_art: String,
    audio_url: Option<String>,
    /// Per-quality stream urls, falling back to `audio_url`.
    #[serde(default)]
    audio_urls: HashMap<String, String>,
    #[serde(default)]
    duration: u32,
    #[serde(default)]
    gain: f32,
}

impl SongEntry {
    fn to_song(&self, quality: AudioQuality) -> Song {
        Song {
            artist: self.artist.clone(),
            album: self.album.clone(),
            title: self.title.clone(),
            cover_art: self.cover_art.clone(),
            audio_url: self
                .audio_urls
                .get(quality.as_str())
                .cloned()
                .or_else(|| self.audio_url.clone()),
            station_id: self.station.clone(),
            duration_secs: self.duration,
            file_gain: self.gain,
        }
    }
}

/// Catalog backed by a TOML file.
#[derive(Debug)]
pub struct FileCatalog {
    file: CatalogFile,
    /// Backing file, re-read on every login.
    source: Option<PathBuf>,
    logged_in: bool,
    /// Songs already handed out, per requested station.
    served: HashMap<String, usize>,
}

impl FileCatalog {
    pub fn load(path: &Path) -> Result<Self> {
        let file = read_catalog_file(path)?;
        Ok(Self {
            file,
            source: Some(path.to_path_buf()),
            logged_in: false,
            served: HashMap::new(),
        })
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(Self {
            file: parse_catalog_file(raw)?,
            source: None,
            logged_in: false,
            served: HashMap::new(),
        })
    }

    /// Pick up edits to the backing file; paging starts over.
    fn reload(&mut self) -> Result<(), CatalogError> {
        let Some(path) = &self.source else {
            return Ok(());
        };
        let file = read_catalog_file(path).map_err(|e| {
            CatalogError::transport(TransportStatus::ReadFailed, format!("{e:#}"))
        })?;
        self.file = file;
        self.served.clear();
        Ok(())
    }


    fn songs_of(&self, station_id: &str) -> Vec<&SongEntry> {
        self.file
            .songs
            .iter()
            .filter(|s| s.station == station_id)
            .collect()
    }

    /// Full song order of a station; QuickMix stations interleave their members.
    fn sequence(&self, entry: &StationEntry) -> Vec<&SongEntry> {
        let Some(members) = entry.quick_mix.as_ref() else {
            return self.songs_of(&entry.id);
        };
        let lanes: Vec<Vec<&SongEntry>> = members
            .iter()
            .map(|id| self.songs_of(id))
            .collect();
        let mut out = Vec::new();
        let mut row = 0;
        while lanes.iter().any(|lane| row < lane.len()) {
            for lane in &lanes {
                if let Some(song) = lane.get(row) {
                    out.push(*song);
                }
            }
            row += 1;
        }
        out
    }
}

fn read_catalog_file(path: &Path) -> Result<CatalogFile> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("read catalog {:?}", path))?;
    parse_catalog_file(&raw).with_context(|| format!("parse catalog {:?}", path))
}

fn parse_catalog_file(raw: &str) -> Result<CatalogFile> {
    let file = toml::from_str::<CatalogFile>(raw)?;
    for station in &file.stations {
        for member in station.quick_mix.iter().flatten() {
            if !file.stations.iter().any(|s| &s.id == member) {
                anyhow::bail!("quick mix {} references unknown station {member}", station.id);
            }
        }
    }
    Ok(file)
}

impl Catalog for FileCatalog {
    fn login(&mut self, credentials: &Credentials) -> Result<(), CatalogError> {
        self.logged_in = false;
        self.reload()?;
        if let Some(account) = &self.file.account {
            if account.username != credentials.username || account.password != credentials.password
            {
                return Err(CatalogError::protocol(ProtocolStatus::AuthFailed));
            }
        }
        self.logged_in = true;
        Ok(())
    }

    fn stations(&mut self) -> Result<Vec<Station>, CatalogError> {
        if !self.logged_in {
            return Err(CatalogError::protocol(ProtocolStatus::NotAuthenticated));
        }
        Ok(self
            .file
            .stations
            .iter()
            .map(|s| Station {
                id: s.id.clone(),
                name: s.name.clone(),
                is_quick_mix: s.quick_mix.is_some(),
            })
            .collect())
    }

    fn playlist(
        &mut self,
        station: &Station,
        quality: AudioQuality,
    ) -> Result<Vec<Song>, CatalogError> {
        if !self.logged_in {
            return Err(CatalogError::protocol(ProtocolStatus::NotAuthenticated));
        }
        let entry = self
            .file
            .stations
            .iter()
            .find(|s| s.id == station.id)
            .ok_or_else(|| CatalogError::protocol(ProtocolStatus::StationNotFound))?;
        let served = self.served.get(&station.id).copied().unwrap_or(0);
        let page: Vec<Song> = self
            .sequence(entry)
            .into_iter()
            .skip(served)
            .take(PLAYLIST_PAGE_LEN)
            .map(|s| s.to_song(quality))
            .collect();
        self.served.insert(station.id.clone(), served + page.len());
        tracing::debug!(station = %station.id, songs = page.len(), "playlist page");
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tunebar_types::find_station_by_id;

    const CATALOG: &str = r#"
[account]
username = "alice"
password = "secret"

[[stations]]
id = "1"
name = "Jazz"

[[stations]]
id = "2"
name = "Rock"

[[stations]]
id = "9"
name = "Shuffle"
quick_mix = ["1", "2"]

[[songs]]
station = "1"
artist = "J1"
title = "j1"
audio_url = "http://host/j1.mp3"
audio_urls = { low = "http://host/j1-low.mp3" }
duration = 120
gain = -2.0

[[songs]]
station = "1"
artist = "J2"
title = "j2"
audio_url = "http://host/j2.mp3"

[[songs]]
station = "1"
artist = "J3"
title = "j3"
audio_url = "http://host/j3.mp3"

[[songs]]
station = "2"
artist = "R1"
title = "r1"
audio_url = "http://host/r1.mp3"
"#;

    fn logged_in() -> FileCatalog {
        let mut catalog = FileCatalog::parse(CATALOG).unwrap();
        catalog
            .login(&Credentials {
                username: "alice".to_string(),
                password: "secret".to_string(),
            })
            .unwrap();
        catalog
    }

    fn station(catalog: &mut FileCatalog, id: &str) -> Station {
        find_station_by_id(&catalog.stations().unwrap(), id)
            .cloned()
            .unwrap()
    }

    fn titles(songs: &[Song]) -> Vec<&str> {
        songs.iter().map(|s| s.title.as_str()).collect()
    }

    #[test]
    fn wrong_password_is_a_protocol_failure() {
        let mut catalog = FileCatalog::parse(CATALOG).unwrap();
        let err = catalog
            .login(&Credentials {
                username: "alice".to_string(),
                password: "nope".to_string(),
            })
            .unwrap_err();
        assert_eq!(err.outcome.protocol, ProtocolStatus::AuthFailed);
        assert_eq!(err.outcome.transport, TransportStatus::Ok);
        assert_eq!(
            catalog.stations().unwrap_err().outcome.protocol,
            ProtocolStatus::NotAuthenticated
        );
    }

    #[test]
    fn stations_flag_quick_mix() {
        let mut catalog = logged_in();
        let stations = catalog.stations().unwrap();
        assert_eq!(stations.len(), 3);
        assert!(find_station_by_id(&stations, "9").unwrap().is_quick_mix);
        assert!(!find_station_by_id(&stations, "1").unwrap().is_quick_mix);
        assert!(find_station_by_id(&stations, "5").is_none());
    }

    #[test]
    fn playlist_pages_until_drained() {
        let mut catalog = logged_in();
        let rock = station(&mut catalog, "2");
        let first = catalog.playlist(&rock, AudioQuality::High).unwrap();
        assert_eq!(titles(&first), vec!["r1"]);
        assert!(catalog.playlist(&rock, AudioQuality::High).unwrap().is_empty());
    }

    #[test]
    fn quality_selects_matching_url() {
        let mut catalog = logged_in();
        let jazz = station(&mut catalog, "1");
        let low = catalog.playlist(&jazz, AudioQuality::Low).unwrap();
        assert_eq!(low[0].audio_url.as_deref(), Some("http://host/j1-low.mp3"));
        assert_eq!(low[0].duration_secs, 120);
        assert_eq!(low[0].file_gain, -2.0);
        assert_eq!(low[1].audio_url.as_deref(), Some("http://host/j2.mp3"));
    }

    #[test]
    fn quick_mix_interleaves_members_and_keeps_origin() {
        let mut catalog = logged_in();
        let mix = station(&mut catalog, "9");
        let page = catalog.playlist(&mix, AudioQuality::High).unwrap();
        assert_eq!(titles(&page), vec!["j1", "r1", "j2", "j3"]);
        assert_eq!(page[1].station_id, "2");
        assert!(catalog.playlist(&mix, AudioQuality::High).unwrap().is_empty());
    }

    #[test]
    fn unknown_quick_mix_member_is_rejected() {
        let raw = r#"
[[stations]]
id = "9"
name = "Mix"
quick_mix = ["404"]
"#;
        assert!(FileCatalog::parse(raw).is_err());
    }

    #[test]
    fn vanished_catalog_file_is_a_transport_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.toml");
        std::fs::write(&path, CATALOG).unwrap();
        let mut catalog = FileCatalog::load(&path).unwrap();
        let credentials = Credentials {
            username: "alice".to_string(),
            password: "secret".to_string(),
        };
        catalog.login(&credentials).unwrap();

        std::fs::remove_file(&path).unwrap();
        let err = catalog.login(&credentials).unwrap_err();
        assert_eq!(err.outcome.transport, TransportStatus::ReadFailed);
        assert_eq!(err.outcome.protocol, ProtocolStatus::Ok);
        assert_eq!(err.outcome.to_string(), "Read error.");
        assert!(!err.outcome.is_ok());
        assert_eq!(
            catalog.stations().unwrap_err().outcome.protocol,
            ProtocolStatus::NotAuthenticated
        );
    }

    #[test]
    fn login_picks_up_catalog_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.toml");
        std::fs::write(&path, "[[stations]]\nid = \"1\"\nname = \"Jazz\"\n").unwrap();
        let mut catalog = FileCatalog::load(&path).unwrap();
        catalog.login(&Credentials::default()).unwrap();
        assert_eq!(catalog.stations().unwrap().len(), 1);

        std::fs::write(&path, CATALOG).unwrap();
        let credentials = Credentials {
            username: "alice".to_string(),
            password: "secret".to_string(),
        };
        catalog.login(&credentials).unwrap();
        assert_eq!(catalog.stations().unwrap().len(), 3);
        assert!(CallOutcome::OK.is_ok());
    }
}
