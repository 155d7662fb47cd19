//! Settings loading and state persistence.
//!
//! Every setting lives in an optional TOML file; missing keys fall back to
//! built-in defaults and CLI flags win over both. The last station is kept in a
//! separate state file that is edited in place.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use serde::Deserialize;
use tunebar_player::config::PlayerConfig;
use tunebar_types::AudioQuality;

use crate::cli::Args;
use crate::dispatch::{KeyCommand, KeyMap};

pub const DEFAULT_MAX_PLAYER_ERRORS: u32 = 5;
const LAST_STATION_KEY: &str = "last_station";

/// Settings file schema.
#[derive(Debug, Default, Deserialize)]
pub struct FileSettings {
    pub username: Option<String>,
    pub password: Option<String>,
    /// Shell command printing the password on stdout.
    pub password_command: Option<String>,
    pub autostart_station: Option<String>,
    pub audio_quality: Option<AudioQuality>,
    pub player_command: Option<String>,
    /// Consecutive player failures before the station is dropped.
    pub max_player_errors: Option<u32>,
    /// Constant gain offset in dB.
    pub volume: Option<f32>,
    /// Multiplier for the song's replay gain.
    pub gain_mul: Option<f32>,
    /// Control FIFO path.
    pub fifo: Option<String>,
    pub event_command: Option<String>,
    pub catalog: Option<String>,
    /// Existing file whose identity keys the shared-state segment.
    pub shm_key_path: Option<String>,
    pub publish_state: Option<bool>,
    pub state_file: Option<String>,
    pub keys: Option<KeyBindings>,
}

/// `[keys]` table: one character per command, empty string disables it.
#[derive(Debug, Default, Deserialize)]
pub struct KeyBindings {
    pub skip: Option<String>,
    pub quit: Option<String>,
    pub pause: Option<String>,
    pub select_station: Option<String>,
    pub history: Option<String>,
    pub song_info: Option<String>,
    pub upcoming: Option<String>,
    pub help: Option<String>,
}

impl KeyBindings {
    fn get(&self, cmd: KeyCommand) -> Option<&str> {
        match cmd {
            KeyCommand::Skip => self.skip.as_deref(),
            KeyCommand::Quit => self.quit.as_deref(),
            KeyCommand::Pause => self.pause.as_deref(),
            KeyCommand::SelectStation => self.select_station.as_deref(),
            KeyCommand::History => self.history.as_deref(),
            KeyCommand::SongInfo => self.song_info.as_deref(),
            KeyCommand::Upcoming => self.upcoming.as_deref(),
            KeyCommand::Help => self.help.as_deref(),
        }
    }

    /// Apply the overrides on top of the default key map.
    pub fn to_key_map(&self) -> Result<KeyMap> {
        let mut keys = KeyMap::default();
        for cmd in KeyCommand::ALL {
            let Some(raw) = self.get(cmd) else {
                continue;
            };
            let key = match raw.as_bytes() {
                [] => None,
                [byte] => Some(*byte),
                _ => anyhow::bail!("key for {cmd:?} must be a single ascii character, got {raw:?}"),
            };
            keys.set(cmd, key);
        }
        Ok(keys)
    }
}

impl FileSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<FileSettings>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }
}

/// Resolved settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub username: Option<String>,
    pub password: Option<String>,
    pub password_command: Option<String>,
    pub autostart_station: Option<String>,
    pub audio_quality: AudioQuality,
    pub player: PlayerConfig,
    pub max_player_errors: u32,
    pub fifo: Option<PathBuf>,
    pub event_command: Option<PathBuf>,
    pub catalog: Option<PathBuf>,
    pub shm_key_path: Option<PathBuf>,
    pub publish_state: bool,
    pub state_file: Option<PathBuf>,
    pub keys: KeyMap,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            password_command: None,
            autostart_station: None,
            audio_quality: AudioQuality::default(),
            player: PlayerConfig::default(),
            max_player_errors: DEFAULT_MAX_PLAYER_ERRORS,
            fifo: None,
            event_command: None,
            catalog: None,
            shm_key_path: None,
            publish_state: true,
            state_file: None,
            keys: KeyMap::default(),
        }
    }
}

/// `$XDG_CONFIG_HOME/tunebar`.
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tunebar"))
}

/// Trim, drop empty values and expand a leading `~/`.
fn path_value(raw: Option<String>) -> Option<PathBuf> {
    let raw = raw?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some(rest) = trimmed.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return Some(home.join(rest));
        }
    }
    Some(PathBuf::from(trimmed))
}

fn non_empty(raw: Option<String>) -> Option<String> {
    raw.filter(|v| !v.trim().is_empty())
}

impl Settings {
    /// Resolve file values against defaults rooted at `dir` (the config directory).
    pub fn resolve(file: FileSettings, dir: Option<&Path>) -> Result<Self> {
        let defaults = Settings::default();
        let keys = match &file.keys {
            Some(bindings) => bindings.to_key_map()?,
            None => defaults.keys.clone(),
        };
        let mut max_player_errors = file
            .max_player_errors
            .unwrap_or(defaults.max_player_errors);
        if max_player_errors == 0 {
            tracing::warn!("max_player_errors must be at least 1");
            max_player_errors = 1;
        }
        let player = PlayerConfig {
            command: non_empty(file.player_command).unwrap_or(defaults.player.command),
            volume_db: file.volume.unwrap_or(defaults.player.volume_db),
            gain_mul: file.gain_mul.unwrap_or(defaults.player.gain_mul),
            ..defaults.player
        };
        Ok(Self {
            username: non_empty(file.username),
            password: file.password,
            password_command: non_empty(file.password_command),
            autostart_station: non_empty(file.autostart_station),
            audio_quality: file.audio_quality.unwrap_or(defaults.audio_quality),
            player,
            max_player_errors,
            fifo: path_value(file.fifo).or_else(|| dir.map(|d| d.join("ctl"))),
            event_command: path_value(file.event_command),
            catalog: path_value(file.catalog),
            shm_key_path: path_value(file.shm_key_path).or_else(|| std::env::current_exe().ok()),
            publish_state: file.publish_state.unwrap_or(defaults.publish_state),
            state_file: path_value(file.state_file).or_else(|| dir.map(|d| d.join("state"))),
            keys,
        })
    }

    /// CLI flags take precedence over the settings file.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(catalog) = &args.catalog {
            self.catalog = Some(catalog.clone());
        }
        if let Some(station) = &args.autostart {
            self.autostart_station = Some(station.clone());
        }
        if let Some(command) = &args.player_command {
            self.player.command = command.clone();
        }
    }
}

/// Load the settings file named by `--config` (required to exist) or the default
/// one (optional), then layer CLI flags and the saved station on top.
pub fn load_settings(args: &Args) -> Result<Settings> {
    let dir = config_dir();
    let file = match &args.config {
        Some(path) => FileSettings::load(path)?,
        None => match dir.as_ref().map(|d| d.join("config.toml")) {
            Some(path) if path.exists() => FileSettings::load(&path)?,
            _ => FileSettings::default(),
        },
    };
    let mut settings = Settings::resolve(file, dir.as_deref())?;
    settings.apply_args(args);
    if settings.autostart_station.is_none() {
        if let Some(state) = &settings.state_file {
            match read_last_station(state) {
                Ok(station) => settings.autostart_station = station,
                Err(e) => tracing::warn!("state file: {e:#}"),
            }
        }
    }
    Ok(settings)
}

/// Run `command` through the shell and return its stdout without trailing newlines.
pub fn run_password_command(command: &str) -> Result<String> {
    let output = Command::new("/bin/sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stderr(Stdio::inherit())
        .output()
        .context("run password_command")?;
    if !output.status.success() {
        anyhow::bail!("password_command failed: {}", output.status);
    }
    let stdout = String::from_utf8(output.stdout).context("password_command output")?;
    Ok(stdout.trim_end_matches('\n').to_string())
}

/// Station id saved by the previous session, if any.
pub fn read_last_station(path: &Path) -> Result<Option<String>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("read state {:?}", path)),
    };
    let doc = raw
        .parse::<toml_edit::DocumentMut>()
        .with_context(|| format!("parse state {:?}", path))?;
    Ok(doc
        .get(LAST_STATION_KEY)
        .and_then(|item| item.as_str())
        .map(str::to_string))
}

/// Record the station to resume next time, keeping any other content of the file.
pub fn write_last_station(path: &Path, station_id: Option<&str>) -> Result<()> {
    let mut doc = match std::fs::read_to_string(path) {
        Ok(raw) => raw
            .parse::<toml_edit::DocumentMut>()
            .with_context(|| format!("parse state {:?}", path))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => toml_edit::DocumentMut::new(),
        Err(e) => return Err(e).with_context(|| format!("read state {:?}", path)),
    };
    match station_id {
        Some(id) => doc[LAST_STATION_KEY] = toml_edit::value(id),
        None => {
            doc.remove(LAST_STATION_KEY);
        }
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("create {:?}", parent))?;
    }
    std::fs::write(path, doc.to_string()).with_context(|| format!("write state {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(raw: &str) -> FileSettings {
        toml::from_str(raw).unwrap()
    }

    #[test]
    fn empty_file_resolves_to_defaults() {
        let settings = Settings::resolve(FileSettings::default(), Some(Path::new("/cfg"))).unwrap();
        assert_eq!(settings.max_player_errors, DEFAULT_MAX_PLAYER_ERRORS);
        assert_eq!(settings.audio_quality, AudioQuality::High);
        assert_eq!(settings.fifo, Some(PathBuf::from("/cfg/ctl")));
        assert_eq!(settings.state_file, Some(PathBuf::from("/cfg/state")));
        assert!(settings.publish_state);
        assert_eq!(settings.player.gain_mul, 1.0);
        assert_eq!(settings.keys, KeyMap::default());
    }

    #[test]
    fn file_values_are_resolved() {
        let file = parse(
            r#"
username = "alice"
audio_quality = "low"
player_command = "exec ffplay \"$TUNEBAR_AUDIO_URL\""
max_player_errors = 2
volume = -6.0
gain_mul = 0.5
fifo = "/run/tunebar.ctl"
event_command = ""
publish_state = false

[keys]
skip = "x"
help = ""
"#,
        );
        let settings = Settings::resolve(file, None).unwrap();
        assert_eq!(settings.username.as_deref(), Some("alice"));
        assert_eq!(settings.audio_quality, AudioQuality::Low);
        assert!(settings.player.command.starts_with("exec ffplay"));
        assert_eq!(settings.max_player_errors, 2);
        assert_eq!(settings.player.volume_db, -6.0);
        assert_eq!(settings.player.gain_mul, 0.5);
        assert_eq!(settings.fifo, Some(PathBuf::from("/run/tunebar.ctl")));
        assert!(settings.event_command.is_none());
        assert!(!settings.publish_state);
        assert_eq!(settings.keys.key(KeyCommand::Skip), Some(b'x'));
        assert_eq!(settings.keys.key(KeyCommand::Help), None);
        assert_eq!(settings.keys.key(KeyCommand::Quit), Some(b'q'));
        assert!(settings.state_file.is_none());
    }

    #[test]
    fn multi_character_key_is_rejected() {
        let file = parse("[keys]\nquit = \"qq\"\n");
        assert!(Settings::resolve(file, None).is_err());
    }

    #[test]
    fn zero_error_ceiling_is_raised_to_one() {
        let file = parse("max_player_errors = 0\n");
        assert_eq!(Settings::resolve(file, None).unwrap().max_player_errors, 1);
    }

    #[test]
    fn cli_flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("config.toml");
        std::fs::write(
            &config,
            format!(
                "autostart_station = \"1\"\ncatalog = \"/a.toml\"\nstate_file = \"{}\"\n",
                dir.path().join("state").display()
            ),
        )
        .unwrap();
        let args = Args::try_parse_from([
            "tunebar",
            "--config",
            config.to_str().unwrap(),
            "--catalog",
            "/b.toml",
            "--autostart",
            "7",
        ])
        .unwrap();
        let settings = load_settings(&args).unwrap();
        assert_eq!(settings.catalog, Some(PathBuf::from("/b.toml")));
        assert_eq!(settings.autostart_station.as_deref(), Some("7"));
    }

    #[test]
    fn saved_station_is_used_when_no_autostart_is_set() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("state");
        write_last_station(&state, Some("42")).unwrap();
        let config = dir.path().join("config.toml");
        std::fs::write(&config, format!("state_file = \"{}\"\n", state.display())).unwrap();

        let args = Args::try_parse_from(["tunebar", "--config", config.to_str().unwrap()]).unwrap();
        let settings = load_settings(&args).unwrap();
        assert_eq!(settings.autostart_station.as_deref(), Some("42"));
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let args = Args::try_parse_from(["tunebar", "--config", "/nonexistent/tunebar.toml"]).unwrap();
        assert!(load_settings(&args).is_err());
    }

    #[test]
    fn state_file_keeps_unrelated_content() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("nested").join("state");
        assert_eq!(read_last_station(&state).unwrap(), None);

        write_last_station(&state, Some("1")).unwrap();
        let raw = std::fs::read_to_string(&state).unwrap();
        std::fs::write(&state, format!("# keep me\nvolume_hint = 3\n{raw}")).unwrap();

        write_last_station(&state, Some("2")).unwrap();
        let raw = std::fs::read_to_string(&state).unwrap();
        assert!(raw.contains("# keep me"));
        assert!(raw.contains("volume_hint = 3"));
        assert_eq!(read_last_station(&state).unwrap().as_deref(), Some("2"));

        write_last_station(&state, None).unwrap();
        assert_eq!(read_last_station(&state).unwrap(), None);
    }

    #[test]
    fn password_command_output_is_trimmed() {
        assert_eq!(run_password_command("printf 'hunter2\\n\\n'").unwrap(), "hunter2");
        assert!(run_password_command("exit 4").is_err());
    }
}
