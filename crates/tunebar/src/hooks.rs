//! User event hooks.
//!
//! Notable events (login, playlist fetch, song start/finish) are reported to an
//! [`EventHook`]. The script hook runs the configured program with the event
//! name as its only argument and feeds a `key=value` description on stdin.
//! Hooks are fire-and-forget: failures are logged and never reach the caller.

use std::fmt::Write as _;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tunebar_types::{Song, Station, find_station_by_id};

use crate::catalog::CallOutcome;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookEvent {
    UserLogin,
    UserGetStations,
    StationFetchPlaylist,
    SongStart,
    SongFinish,
}

impl HookEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            HookEvent::UserLogin => "userlogin",
            HookEvent::UserGetStations => "usergetstations",
            HookEvent::StationFetchPlaylist => "stationfetchplaylist",
            HookEvent::SongStart => "songstart",
            HookEvent::SongFinish => "songfinish",
        }
    }
}

/// Snapshot handed to a hook together with the event.
#[derive(Clone, Copy, Debug)]
pub struct HookContext<'a> {
    pub station: Option<&'a Station>,
    pub song: Option<&'a Song>,
    pub stations: &'a [Station],
    pub outcome: CallOutcome,
    pub played_secs: u32,
    pub duration_secs: u32,
}

impl<'a> HookContext<'a> {
    pub fn new(stations: &'a [Station], outcome: CallOutcome) -> Self {
        Self {
            station: None,
            song: None,
            stations,
            outcome,
            played_secs: 0,
            duration_secs: 0,
        }
    }
}

pub trait EventHook {
    fn fire(&mut self, event: HookEvent, ctx: &HookContext<'_>);
}

/// Used when no `event_command` is configured.
pub struct NoopHook;

impl EventHook for NoopHook {
    fn fire(&mut self, _event: HookEvent, _ctx: &HookContext<'_>) {}
}

/// `key=value` lines describing `ctx`.
pub fn render_payload(ctx: &HookContext<'_>) -> String {
    let mut out = String::new();
    let (artist, title, album, cover_art) = match ctx.song {
        Some(s) => (
            s.artist.as_str(),
            s.title.as_str(),
            s.album.as_str(),
            s.cover_art.as_str(),
        ),
        None => ("", "", "", ""),
    };
    let song_station = ctx
        .song
        .and_then(|s| find_station_by_id(ctx.stations, &s.station_id))
        .map(|s| s.name.as_str())
        .unwrap_or_default();

    let _ = writeln!(out, "artist={artist}");
    let _ = writeln!(out, "title={title}");
    let _ = writeln!(out, "album={album}");
    let _ = writeln!(out, "coverArt={cover_art}");
    let _ = writeln!(
        out,
        "stationName={}",
        ctx.station.map(|s| s.name.as_str()).unwrap_or_default()
    );
    let _ = writeln!(out, "songStationName={song_station}");
    let _ = writeln!(out, "songDuration={}", ctx.duration_secs);
    let _ = writeln!(out, "songPlayed={}", ctx.played_secs);
    let _ = writeln!(out, "pRet={}", ctx.outcome.protocol.code());
    let _ = writeln!(out, "pRetStr={}", ctx.outcome.protocol.as_str());
    let _ = writeln!(out, "wRet={}", ctx.outcome.transport.code());
    let _ = writeln!(out, "wRetStr={}", ctx.outcome.transport.as_str());
    let _ = writeln!(out, "stationCount={}", ctx.stations.len());
    for (i, station) in ctx.stations.iter().enumerate() {
        let _ = writeln!(out, "station{i}={}", station.name);
    }
    out
}

/// Runs `<command> <event>` for every event.
pub struct ScriptHook {
    command: PathBuf,
}

impl ScriptHook {
    pub fn new(command: PathBuf) -> Self {
        Self { command }
    }
}

impl EventHook for ScriptHook {
    fn fire(&mut self, event: HookEvent, ctx: &HookContext<'_>) {
        let spawned = Command::new(&self.command)
            .arg(event.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(command = ?self.command, event = event.as_str(), "event hook: {e}");
                return;
            }
        };
        let payload = render_payload(ctx);
        let event = event.as_str();
        // a hook that never reads its stdin must not stall the caller
        std::thread::spawn(move || {
            if let Some(mut stdin) = child.stdin.take() {
                if let Err(e) = stdin.write_all(payload.as_bytes()) {
                    tracing::debug!(event, "event hook stdin: {e}");
                }
            }
            match child.wait() {
                Ok(status) if !status.success() => {
                    tracing::debug!(event, %status, "event hook exited");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(event, "wait for event hook: {e}"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ProtocolStatus, TransportStatus};
    use std::os::unix::fs::PermissionsExt;
    use std::time::{Duration, Instant};

    fn stations() -> Vec<Station> {
        vec![
            Station {
                id: "1".to_string(),
                name: "Jazz".to_string(),
                is_quick_mix: false,
            },
            Station {
                id: "9".to_string(),
                name: "Mix".to_string(),
                is_quick_mix: true,
            },
        ]
    }

    fn song() -> Song {
        Song {
            artist: "Artist".to_string(),
            title: "Title".to_string(),
            album: "Album".to_string(),
            station_id: "1".to_string(),
            ..Song::default()
        }
    }

    #[test]
    fn payload_lists_song_station_and_outcome() {
        let stations = stations();
        let song = song();
        let ctx = HookContext {
            station: Some(&stations[1]),
            song: Some(&song),
            played_secs: 42,
            duration_secs: 200,
            ..HookContext::new(
                &stations,
                CallOutcome {
                    protocol: ProtocolStatus::StationNotFound,
                    transport: TransportStatus::Ok,
                },
            )
        };
        let payload = render_payload(&ctx);
        let lines: Vec<&str> = payload.lines().collect();
        assert!(lines.contains(&"artist=Artist"));
        assert!(lines.contains(&"stationName=Mix"));
        assert!(lines.contains(&"songStationName=Jazz"));
        assert!(lines.contains(&"songPlayed=42"));
        assert!(lines.contains(&"pRet=3"));
        assert!(lines.contains(&"wRet=0"));
        assert!(lines.contains(&"stationCount=2"));
        assert!(lines.contains(&"station1=Mix"));
    }

    #[test]
    fn payload_without_song_has_empty_fields() {
        let ctx = HookContext::new(&[], CallOutcome::OK);
        let payload = render_payload(&ctx);
        assert!(payload.starts_with("artist=\ntitle=\n"));
        assert!(payload.contains("stationCount=0\n"));
    }

    #[test]
    fn script_hook_receives_event_and_payload() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let script = dir.path().join("hook.sh");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\ncat > \"{0}.tmp\"\necho \"$1\" >> \"{0}.tmp\"\nmv \"{0}.tmp\" \"{0}\"\n",
                out.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let stations = stations();
        let song = song();
        let mut hook = ScriptHook::new(script);
        let ctx = HookContext {
            song: Some(&song),
            ..HookContext::new(&stations, CallOutcome::OK)
        };
        hook.fire(HookEvent::SongStart, &ctx);

        let deadline = Instant::now() + Duration::from_secs(10);
        while !out.exists() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        let written = std::fs::read_to_string(&out).unwrap();
        assert!(written.contains("title=Title\n"));
        assert!(written.ends_with("songstart\n"));
    }

    #[test]
    fn hook_ignoring_stdin_does_not_block_fire() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("deaf.sh");
        std::fs::write(&script, "#!/bin/sh\nsleep 3\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        // well past a pipe buffer
        let stations: Vec<Station> = (0..4000)
            .map(|i| Station {
                id: i.to_string(),
                name: format!("station number {i} with a fairly long name"),
                is_quick_mix: false,
            })
            .collect();
        let ctx = HookContext::new(&stations, CallOutcome::OK);
        assert!(render_payload(&ctx).len() > 128 * 1024);

        let mut hook = ScriptHook::new(script);
        let started = Instant::now();
        hook.fire(HookEvent::UserGetStations, &ctx);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn missing_hook_program_is_only_logged() {
        let mut hook = ScriptHook::new(PathBuf::from("/nonexistent/tunebar-hook"));
        hook.fire(HookEvent::UserLogin, &HookContext::new(&[], CallOutcome::OK));
    }
}
