//! External player supervision.
//!
//! One player process at a time: spawned with three pipes, its output streams
//! drained by reader threads into the multiplexer queue, its status lines
//! parsed into [`Progress`], skipped by signalling its process group, and
//! reaped with the exit status folded into a consecutive-error counter.

use std::io::{self, Write};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;

use crossbeam_channel::Sender;
use tunebar_types::Song;

use crate::config::{AUDIO_URL_ENV, GAIN_ENV, PlayerConfig};
use crate::error::PlayerError;
use crate::mux::{MuxEvent, PlayerStream, spawn_stream_reader};
use crate::status::{LineBuffer, Progress};

/// Result of feeding one player read into the supervisor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoOutcome {
    /// Bytes consumed, no complete status line changed the progress.
    Continue,
    /// Position/duration were updated.
    Progress,
    /// Both output streams are closed: the song is over.
    Ended,
    /// Event belongs to a player that is no longer active.
    Stale,
}

/// How the last player exited.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitClass {
    Clean,
    Failed,
}

/// Accept only http(s) URLs without single quotes.
pub fn validate_stream_url(url: Option<&str>) -> Result<&str, PlayerError> {
    let url = url.filter(|u| !u.is_empty()).ok_or(PlayerError::MissingUrl)?;
    let trusted = ["http://", "https://"].iter().any(|scheme| {
        url.get(..scheme.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
    });
    if !trusted {
        let scheme = url.split(':').next().unwrap_or(url);
        return Err(PlayerError::UntrustedUrl(scheme.to_string()));
    }
    if url.contains('\'') {
        return Err(PlayerError::QuotedUrl);
    }
    Ok(url)
}

struct PlayerProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    _readers: [JoinHandle<()>; 2],
    generation: u64,
    progress: Progress,
    lines: [LineBuffer; 2],
    closed: [bool; 2],
    skip_requested: bool,
    reaped: bool,
}

impl PlayerProcess {
    fn signal_group(&self, signal: libc::c_int) -> io::Result<()> {
        let pgid = self.child.id() as libc::pid_t;
        // The child leads its own process group, see `start`.
        let rc = unsafe { libc::kill(-pgid, signal) };
        if rc == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for PlayerProcess {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        tracing::warn!(pid = self.child.id(), "player dropped while running; killing");
        let _ = self.signal_group(libc::SIGKILL);
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn stream_index(stream: PlayerStream) -> usize {
    match stream {
        PlayerStream::Stdout => 0,
        PlayerStream::Stderr => 1,
    }
}

fn classify_exit(status: &ExitStatus, skip_requested: bool) -> ExitClass {
    match status.code() {
        Some(0) => ExitClass::Clean,
        Some(_) => ExitClass::Failed,
        None if skip_requested && status.signal() == Some(libc::SIGTERM) => ExitClass::Clean,
        None => ExitClass::Failed,
    }
}

/// Owner of the (at most one) running player.
pub struct PlayerSupervisor {
    config: PlayerConfig,
    events: Sender<MuxEvent>,
    active: Option<PlayerProcess>,
    generation: u64,
    consecutive_errors: u32,
}

impl PlayerSupervisor {
    /// `events` receives the output of every player this supervisor starts.
    pub fn new(config: PlayerConfig, events: Sender<MuxEvent>) -> Self {
        Self {
            config,
            events,
            active: None,
            generation: 0,
            consecutive_errors: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Generation of the most recently started player.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn progress(&self) -> Option<Progress> {
        self.active.as_ref().map(|p| p.progress)
    }

    /// Spawn the player for `song`. Returns the generation tagging its output events.
    pub fn start(&mut self, song: &Song) -> Result<u64, PlayerError> {
        if self.active.is_some() {
            return Err(PlayerError::Busy);
        }
        let url = validate_stream_url(song.audio_url.as_deref())?;

        let mut child = Command::new(&self.config.shell)
            .arg("-c")
            .arg(&self.config.command)
            .env(AUDIO_URL_ENV, url)
            .env(GAIN_ENV, self.config.gain_env_value(song.file_gain))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()
            .map_err(PlayerError::Spawn)?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(PlayerError::MissingPipe);
        };

        self.generation += 1;
        let generation = self.generation;
        let chunk = self.config.read_chunk;
        let readers = [
            spawn_stream_reader(self.events.clone(), generation, PlayerStream::Stdout, stdout, chunk),
            spawn_stream_reader(self.events.clone(), generation, PlayerStream::Stderr, stderr, chunk),
        ];
        tracing::info!(pid = child.id(), generation, url = %url, "player started");

        self.active = Some(PlayerProcess {
            child,
            stdin: Some(stdin),
            _readers: readers,
            generation,
            progress: Progress::new(song.duration_secs),
            lines: [LineBuffer::default(), LineBuffer::default()],
            closed: [false, false],
            skip_requested: false,
            reaped: false,
        });
        Ok(generation)
    }

    /// Feed one chunk read from `stream`. An empty chunk marks that stream closed.
    pub fn io(&mut self, generation: u64, stream: PlayerStream, chunk: &[u8]) -> IoOutcome {
        let Some(player) = self.active.as_mut() else {
            return IoOutcome::Stale;
        };
        if player.generation != generation {
            return IoOutcome::Stale;
        }
        let idx = stream_index(stream);
        if chunk.is_empty() {
            player.closed[idx] = true;
            return if player.closed.iter().all(|c| *c) {
                IoOutcome::Ended
            } else {
                IoOutcome::Continue
            };
        }

        let progress = &mut player.progress;
        let mut updated = false;
        player.lines[idx].push(chunk, |line| {
            if progress.feed_line(line) {
                updated = true;
            }
        });
        if updated {
            IoOutcome::Progress
        } else {
            IoOutcome::Continue
        }
    }

    /// Forward raw bytes to the player's stdin.
    pub fn write_input(&mut self, bytes: &[u8]) -> io::Result<()> {
        let Some(stdin) = self.active.as_mut().and_then(|p| p.stdin.as_mut()) else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "no player running"));
        };
        stdin.write_all(bytes)?;
        stdin.flush()
    }

    /// Ask the running player to stop (SIGTERM to its process group). Does not reap.
    pub fn skip(&mut self) {
        let Some(player) = self.active.as_mut() else {
            tracing::warn!("skip requested without a running player");
            return;
        };
        player.skip_requested = true;
        if let Err(e) = player.signal_group(libc::SIGTERM) {
            tracing::warn!(pid = player.child.id(), "signal player: {e}");
        }
    }

    /// Count a song that could not be started as a player failure.
    pub fn record_start_failure(&mut self) {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
    }

    /// Wait for the player to exit, close its pipes and classify the exit.
    ///
    /// Returns `None` when no player was running.
    pub fn cleanup(&mut self) -> Option<ExitClass> {
        let mut player = self.active.take()?;
        drop(player.stdin.take());
        let class = match player.child.wait() {
            Ok(status) => {
                let class = classify_exit(&status, player.skip_requested);
                tracing::debug!(%status, ?class, "player exited");
                class
            }
            Err(e) => {
                tracing::warn!("wait for player: {e}");
                ExitClass::Failed
            }
        };
        player.reaped = true;

        if player.progress.parsed_lines() == 0 && player.progress.unparsed_lines() > 0 {
            tracing::warn!(
                lines = player.progress.unparsed_lines(),
                "player produced output but no status lines; check player_command"
            );
        }

        match class {
            ExitClass::Clean => self.consecutive_errors = 0,
            ExitClass::Failed => {
                self.consecutive_errors = self.consecutive_errors.saturating_add(1);
            }
        }
        Some(class)
    }
}

impl Drop for PlayerSupervisor {
    fn drop(&mut self) {
        if let Some(player) = self.active.as_mut() {
            player.skip_requested = true;
            let _ = player.signal_group(libc::SIGTERM);
        }
        let _ = self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mux::Multiplexer;
    use std::time::Duration;

    fn song(url: &str) -> Song {
        Song {
            title: "t".to_string(),
            audio_url: Some(url.to_string()),
            duration_secs: 30,
            ..Song::default()
        }
    }

    fn supervisor(mux: &Multiplexer, command: &str) -> PlayerSupervisor {
        PlayerSupervisor::new(
            PlayerConfig {
                command: command.to_string(),
                ..PlayerConfig::default()
            },
            mux.sender(),
        )
    }

    /// Pump player events until the song ends; returns every outcome observed.
    fn run_to_end(sup: &mut PlayerSupervisor, mux: &Multiplexer) -> Vec<IoOutcome> {
        let mut outcomes = Vec::new();
        loop {
            let event = mux
                .wait_timeout(Duration::from_secs(10))
                .expect("player event");
            if let MuxEvent::PlayerOutput {
                generation,
                stream,
                chunk,
            } = event
            {
                let outcome = sup.io(generation, stream, &chunk);
                outcomes.push(outcome);
                if outcome == IoOutcome::Ended {
                    return outcomes;
                }
            }
        }
    }

    #[test]
    fn validate_stream_url_rules() {
        assert!(validate_stream_url(Some("http://host/a.mp3")).is_ok());
        assert!(validate_stream_url(Some("HTTPS://host/a.mp3")).is_ok());
        assert!(matches!(validate_stream_url(None), Err(PlayerError::MissingUrl)));
        assert!(matches!(validate_stream_url(Some("")), Err(PlayerError::MissingUrl)));
        assert!(matches!(
            validate_stream_url(Some("file:///etc/passwd")),
            Err(PlayerError::UntrustedUrl(s)) if s == "file"
        ));
        assert!(matches!(
            validate_stream_url(Some("http://host/a'; rm -rf ~'")),
            Err(PlayerError::QuotedUrl)
        ));
    }

    #[test]
    fn rejected_song_never_spawns() {
        let mux = Multiplexer::new();
        let mut sup = supervisor(&mux, "exit 0");
        for url in ["ftp://host/a.mp3", "http://host/it's.mp3"] {
            assert!(sup.start(&song(url)).is_err());
            assert!(!sup.is_active());
        }
        assert!(sup.start(&Song::default()).is_err());
        assert_eq!(sup.generation(), 0);
        assert!(sup.cleanup().is_none());
        assert!(mux.try_wait().is_none());
    }

    #[test]
    fn rejected_song_runs_no_command() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("spawned");
        let mux = Multiplexer::new();
        let mut sup = supervisor(&mux, &format!("touch '{}'", marker.display()));

        for url in ["ftp://host/a.mp3", "http://host/it's.mp3", ""] {
            assert!(sup.start(&song(url)).is_err());
        }
        std::thread::sleep(Duration::from_millis(200));
        assert!(!marker.exists());
        assert!(mux.try_wait().is_none());

        sup.start(&song("http://host/a.mp3")).unwrap();
        run_to_end(&mut sup, &mux);
        assert_eq!(sup.cleanup(), Some(ExitClass::Clean));
        assert!(marker.exists());
    }

    #[test]
    fn status_lines_update_progress() {
        let mux = Multiplexer::new();
        let mut sup = supervisor(&mux, "printf '1.5 10.0\\n'; printf '2.5 12.0\\n'");
        sup.start(&song("http://host/a.mp3")).unwrap();
        assert_eq!(sup.progress().unwrap().duration_secs(), 30);

        let outcomes = run_to_end(&mut sup, &mux);
        assert!(outcomes.contains(&IoOutcome::Progress));
        let progress = sup.progress().unwrap();
        assert_eq!(progress.position(), 2.5);
        assert_eq!(progress.duration(), 12.0);

        assert_eq!(sup.cleanup(), Some(ExitClass::Clean));
        assert!(!sup.is_active());
        assert_eq!(sup.consecutive_errors(), 0);
    }

    #[test]
    fn environment_carries_url_and_gain() {
        let mux = Multiplexer::new();
        let mut sup = supervisor(
            &mux,
            "printf '%s 0\\n' \"$TUNEBAR_GAIN\"; \
             case \"$TUNEBAR_AUDIO_URL\" in http://host/a.mp3) exit 0;; *) exit 9;; esac",
        );
        let mut s = song("http://host/a.mp3");
        s.file_gain = -2.5;
        sup.start(&s).unwrap();
        run_to_end(&mut sup, &mux);
        assert_eq!(sup.progress().unwrap().position(), -2.5);
        assert_eq!(sup.cleanup(), Some(ExitClass::Clean));
    }

    #[test]
    fn nonzero_exits_accumulate_and_clean_exit_resets() {
        let mux = Multiplexer::new();
        let mut sup = supervisor(&mux, "exit 3");
        for expected in 1..=2 {
            sup.start(&song("http://host/a.mp3")).unwrap();
            run_to_end(&mut sup, &mux);
            assert_eq!(sup.cleanup(), Some(ExitClass::Failed));
            assert_eq!(sup.consecutive_errors(), expected);
        }

        sup.config.command = "exit 0".to_string();
        sup.start(&song("http://host/a.mp3")).unwrap();
        run_to_end(&mut sup, &mux);
        assert_eq!(sup.cleanup(), Some(ExitClass::Clean));
        assert_eq!(sup.consecutive_errors(), 0);
    }

    #[test]
    fn skip_terminates_player_and_counts_as_clean() {
        let mux = Multiplexer::new();
        let mut sup = supervisor(&mux, "exec sleep 30");
        sup.start(&song("http://host/a.mp3")).unwrap();
        sup.skip();
        let outcomes = run_to_end(&mut sup, &mux);
        assert_eq!(outcomes.last(), Some(&IoOutcome::Ended));
        assert_eq!(sup.cleanup(), Some(ExitClass::Clean));
        assert_eq!(sup.consecutive_errors(), 0);
    }

    #[test]
    fn unrequested_signal_death_is_a_failure() {
        let mux = Multiplexer::new();
        let mut sup = supervisor(&mux, "kill -TERM $$");
        sup.start(&song("http://host/a.mp3")).unwrap();
        run_to_end(&mut sup, &mux);
        assert_eq!(sup.cleanup(), Some(ExitClass::Failed));
        assert_eq!(sup.consecutive_errors(), 1);
    }

    #[test]
    fn input_is_forwarded_to_player_stdin() {
        let mux = Multiplexer::new();
        let mut sup = supervisor(&mux, "IFS= read -r x; printf '%s 60\\n' \"$x\"");
        sup.start(&song("http://host/a.mp3")).unwrap();
        sup.write_input(b"7\n").unwrap();
        run_to_end(&mut sup, &mux);
        assert_eq!(sup.progress().unwrap().played_secs(), 7);
        assert_eq!(sup.cleanup(), Some(ExitClass::Clean));
        assert!(sup.write_input(b"x").is_err());
    }

    #[test]
    fn events_from_previous_player_are_stale() {
        let mux = Multiplexer::new();
        let mut sup = supervisor(&mux, "exit 0");
        let first = sup.start(&song("http://host/a.mp3")).unwrap();
        run_to_end(&mut sup, &mux);
        sup.cleanup();
        assert_eq!(sup.io(first, PlayerStream::Stdout, b"1 2\n"), IoOutcome::Stale);

        let second = sup.start(&song("http://host/a.mp3")).unwrap();
        assert_ne!(first, second);
        assert_eq!(sup.io(first, PlayerStream::Stdout, b""), IoOutcome::Stale);
        run_to_end(&mut sup, &mux);
        sup.cleanup();
    }

    #[test]
    fn second_start_while_running_is_refused() {
        let mux = Multiplexer::new();
        let mut sup = supervisor(&mux, "exec sleep 30");
        sup.start(&song("http://host/a.mp3")).unwrap();
        assert!(matches!(sup.start(&song("http://host/b.mp3")), Err(PlayerError::Busy)));
        sup.skip();
        run_to_end(&mut sup, &mux);
        sup.cleanup();
    }
}
