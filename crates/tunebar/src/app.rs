//! Playback state machine.
//!
//! [`App`] owns the catalog session, the playlist and history, the player
//! supervisor and the shared-state publisher. Every call to [`App::step`]
//! performs one transition or services one multiplexer event; the only place
//! it blocks is the multiplexer wait.

use std::io::Read;

use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use tunebar_player::mux::{ControlSource, Multiplexer, MuxEvent, PlayerStream};
use tunebar_player::process::{IoOutcome, PlayerSupervisor};
use tunebar_player::publisher::{Publisher, TrackSnapshot};
use tunebar_types::{PlaybackStatus, PlaybackTrack, Song, Station, find_station_by_id};

use crate::catalog::{CallOutcome, Catalog, CatalogError, Credentials};
use crate::config::{Settings, run_password_command};
use crate::dispatch::{CommandDispatch, Dispatch, DispatchContext, KeyCommand};
use crate::hooks::{EventHook, HookContext, HookEvent};
use crate::playlist::{History, Playlist};
use crate::ui::{self, MsgKind, Ui};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    /// No station selected; only control input is serviced.
    Idle,
    /// Station selected, playlist empty.
    AwaitingPlaylist,
    /// A player is running for the playlist's front song.
    Playing,
    /// The song ended or was skipped; the player still needs to be reaped.
    Finishing,
    Stopped,
}

/// Collaborators handed to [`App::new`].
pub struct AppParts {
    pub catalog: Box<dyn Catalog>,
    pub hook: Box<dyn EventHook>,
    pub dispatch: Box<dyn CommandDispatch>,
    pub publisher: Publisher,
    pub ui: Ui,
}

pub struct App {
    settings: Settings,
    catalog: Box<dyn Catalog>,
    hook: Box<dyn EventHook>,
    dispatch: Box<dyn CommandDispatch>,
    publisher: Publisher,
    ui: Ui,
    mux: Multiplexer,
    player: PlayerSupervisor,
    stations: Vec<Station>,
    station: Option<Station>,
    /// Station chosen while a song was playing; applied once it finishes.
    pending_station: Option<Station>,
    playlist: Playlist,
    history: History,
    state: PlaybackState,
    quit: bool,
    paused: bool,
    open_controls: usize,
}

fn outcome_of<T>(result: &Result<T, CatalogError>) -> CallOutcome {
    match result {
        Ok(_) => CallOutcome::OK,
        Err(e) => e.outcome,
    }
}

impl App {
    pub fn new(settings: Settings, parts: AppParts) -> Self {
        let mux = Multiplexer::new();
        let player = PlayerSupervisor::new(settings.player.clone(), mux.sender());
        Self {
            settings,
            catalog: parts.catalog,
            hook: parts.hook,
            dispatch: parts.dispatch,
            publisher: parts.publisher,
            ui: parts.ui,
            mux,
            player,
            stations: Vec::new(),
            station: None,
            pending_station: None,
            playlist: Playlist::default(),
            history: History::default(),
            state: PlaybackState::Idle,
            quit: false,
            paused: false,
            open_controls: 0,
        }
    }

    /// Feed a control input (terminal, FIFO) into the event queue.
    pub fn attach_control<R>(&mut self, source: ControlSource, reader: R)
    where
        R: Read + Send + 'static,
    {
        self.mux.attach_control(source, reader);
        self.open_controls += 1;
    }

    /// Producer handle for out-of-band events such as Ctrl-C.
    pub fn event_sender(&self) -> Sender<MuxEvent> {
        self.mux.sender()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn station(&self) -> Option<&Station> {
        self.station.as_ref()
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    pub fn playlist(&self) -> &Playlist {
        &self.playlist
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.player.consecutive_errors()
    }

    /// Log in, load stations, pick the first station and play until quit.
    pub fn run(&mut self) -> Result<()> {
        self.login()?;
        self.select_initial_station();
        while self.state != PlaybackState::Stopped {
            self.step();
        }
        Ok(())
    }

    /// Authenticate and load the station list.
    pub fn login(&mut self) -> Result<()> {
        let credentials = self.credentials()?;

        self.ui.msg(MsgKind::Info, "Login... ");
        let result = self.catalog.login(&credentials);
        self.hook.fire(
            HookEvent::UserLogin,
            &HookContext::new(&self.stations, outcome_of(&result)),
        );
        if let Err(e) = result {
            self.ui.msg(MsgKind::Plain, format!("Error: {e}\n"));
            return Err(e).context("login");
        }
        self.ui.msg(MsgKind::Plain, "Ok.\n");

        self.ui.msg(MsgKind::Info, "Get stations... ");
        let result = self.catalog.stations();
        let outcome = outcome_of(&result);
        let loaded = match result {
            Ok(stations) => {
                self.stations = stations;
                self.ui.msg(MsgKind::Plain, "Ok.\n");
                Ok(())
            }
            Err(e) => {
                self.ui.msg(MsgKind::Plain, format!("Error: {e}\n"));
                Err(e)
            }
        };
        self.hook.fire(
            HookEvent::UserGetStations,
            &HookContext::new(&self.stations, outcome),
        );
        loaded.context("get stations")
    }

    fn credentials(&mut self) -> Result<Credentials> {
        let username = match self.settings.username.clone() {
            Some(username) => username,
            None => {
                self.ui.msg(MsgKind::Question, "Email: ");
                self.read_line(true)
                    .filter(|line| !line.is_empty())
                    .context("no username given")?
            }
        };
        let password = if let Some(password) = self.settings.password.clone() {
            password
        } else if let Some(command) = self.settings.password_command.clone() {
            run_password_command(&command)?
        } else {
            self.ui.msg(MsgKind::Question, "Password: ");
            let password = self.read_line(false).context("no password given")?;
            self.ui.msg(MsgKind::Plain, "\n");
            password
        };
        Ok(Credentials { username, password })
    }

    /// Autostart station if it exists, otherwise ask.
    pub fn select_initial_station(&mut self) {
        let mut station = None;
        if let Some(id) = self.settings.autostart_station.clone() {
            station = find_station_by_id(&self.stations, &id).cloned();
            if station.is_none() {
                self.ui
                    .msg(MsgKind::Error, "Error: Autostart station not found.\n");
            }
        }
        if station.is_none() {
            station = self.prompt_station();
        }
        match station {
            Some(station) => self.tune_in(station),
            None => self.enter_idle(),
        }
    }

    /// Advance the state machine by one transition or one event.
    pub fn step(&mut self) -> PlaybackState {
        if self.quit
            && matches!(
                self.state,
                PlaybackState::Idle | PlaybackState::AwaitingPlaylist
            )
        {
            self.state = PlaybackState::Stopped;
        }
        match self.state {
            PlaybackState::Idle => self.service_idle(),
            PlaybackState::AwaitingPlaylist => self.fetch_playlist(),
            PlaybackState::Playing => {
                let event = self.mux.wait();
                self.handle_event(event);
            }
            PlaybackState::Finishing => self.finish_song(),
            PlaybackState::Stopped => {}
        }
        self.state
    }

    /// Next event, or `None` once no control input is left and the queue is drained.
    fn next_control_event(&mut self) -> Option<MuxEvent> {
        if self.open_controls == 0 {
            self.mux.try_wait()
        } else {
            Some(self.mux.wait())
        }
    }

    fn service_idle(&mut self) {
        match self.next_control_event() {
            Some(event) => self.handle_event(event),
            None => {
                tracing::info!("no station and no control input left");
                self.quit = true;
                self.state = PlaybackState::Stopped;
            }
        }
    }

    fn handle_event(&mut self, event: MuxEvent) {
        match event {
            MuxEvent::PlayerOutput {
                generation,
                stream,
                chunk,
            } => self.player_output(generation, stream, &chunk),
            MuxEvent::Control { byte, .. } => self.handle_key(byte),
            MuxEvent::ControlClosed { source } => self.control_closed(source),
            MuxEvent::Interrupt => {
                tracing::info!("interrupted");
                self.request_quit();
            }
        }
    }

    fn control_closed(&mut self, source: ControlSource) {
        self.open_controls = self.open_controls.saturating_sub(1);
        tracing::info!(?source, remaining = self.open_controls, "control input closed");
    }

    fn player_output(&mut self, generation: u64, stream: PlayerStream, chunk: &[u8]) {
        match self.player.io(generation, stream, chunk) {
            IoOutcome::Progress => {
                if let Some(progress) = self.player.progress() {
                    let (played, duration) = (progress.played_secs(), progress.duration_secs());
                    self.publisher.publish_timing(duration, played);
                    self.ui.progress(played, duration);
                }
            }
            IoOutcome::Ended => {
                if self.state == PlaybackState::Playing {
                    self.state = PlaybackState::Finishing;
                }
            }
            IoOutcome::Continue | IoOutcome::Stale => {}
        }
    }

    fn request_quit(&mut self) {
        self.quit = true;
        if self.state == PlaybackState::Playing {
            self.player.skip();
        }
    }

    fn handle_key(&mut self, byte: u8) {
        let ctx = DispatchContext {
            has_song: self.state == PlaybackState::Playing,
        };
        match self.dispatch.dispatch(byte, &ctx) {
            Dispatch::Run(cmd) => self.run_command(cmd, byte),
            Dispatch::Unavailable(cmd) => {
                tracing::debug!(?cmd, "command needs a playing song");
                self.ui.msg(MsgKind::Error, "No song playing.\n");
            }
            Dispatch::Unrecognized => {
                if self.state == PlaybackState::Playing {
                    if let Err(e) = self.player.write_input(&[byte]) {
                        tracing::debug!("forward key to player: {e}");
                    }
                }
            }
        }
    }

    fn run_command(&mut self, cmd: KeyCommand, byte: u8) {
        match cmd {
            KeyCommand::Skip => self.player.skip(),
            KeyCommand::Quit => self.request_quit(),
            KeyCommand::Pause => {
                if let Err(e) = self.player.write_input(&[byte]) {
                    tracing::warn!("forward pause to player: {e}");
                }
                self.paused = !self.paused;
                self.publisher.publish_status(if self.paused {
                    PlaybackStatus::Paused
                } else {
                    PlaybackStatus::Playing
                });
            }
            KeyCommand::SelectStation => {
                if let Some(station) = self.prompt_station() {
                    self.change_station(station);
                }
            }
            KeyCommand::History => self.print_history(),
            KeyCommand::SongInfo => self.print_song_info(),
            KeyCommand::Upcoming => self.print_upcoming(),
            KeyCommand::Help => self.print_help(),
        }
    }

    fn change_station(&mut self, station: Station) {
        match self.state {
            PlaybackState::Playing => {
                self.ui.msg(
                    MsgKind::Info,
                    format!("Switching to \"{}\" after this song.\n", station.name),
                );
                self.pending_station = Some(station);
                self.player.skip();
            }
            PlaybackState::Finishing => self.pending_station = Some(station),
            _ => self.tune_in(station),
        }
    }

    fn tune_in(&mut self, station: Station) {
        self.ui.msg(
            MsgKind::Info,
            format!("Station \"{}\" ({})\n", station.name, station.id),
        );
        tracing::info!(station = %station.id, "station selected");
        self.station = Some(station);
        self.playlist.clear();
        self.state = PlaybackState::AwaitingPlaylist;
    }

    fn enter_idle(&mut self) {
        self.station = None;
        self.pending_station = None;
        self.playlist.clear();
        self.state = PlaybackState::Idle;
        self.publisher.publish_status(PlaybackStatus::Paused);
        if let Some(key) = self.settings.keys.key(KeyCommand::SelectStation) {
            self.ui.msg(
                MsgKind::Info,
                format!("No station. Press {} to select one.\n", key as char),
            );
        }
    }

    fn fetch_playlist(&mut self) {
        let Some(station) = self.station.clone() else {
            self.enter_idle();
            return;
        };
        self.ui.msg(MsgKind::Info, "Receiving new playlist... ");
        let outcome = match self.catalog.playlist(&station, self.settings.audio_quality) {
            Ok(songs) if songs.is_empty() => {
                self.ui.msg(MsgKind::Plain, "Ok.\n");
                self.ui.msg(MsgKind::Info, "No tracks left.\n");
                self.station = None;
                CallOutcome::OK
            }
            Ok(songs) => {
                self.ui.msg(MsgKind::Plain, "Ok.\n");
                self.playlist.replace(songs);
                CallOutcome::OK
            }
            Err(e) => {
                self.ui.msg(MsgKind::Plain, format!("Error: {e}\n"));
                tracing::warn!(station = %station.id, "fetch playlist: {e}");
                self.station = None;
                e.outcome
            }
        };
        let ctx = HookContext {
            station: self.station.as_ref(),
            song: self.playlist.current(),
            ..HookContext::new(&self.stations, outcome)
        };
        self.hook.fire(HookEvent::StationFetchPlaylist, &ctx);

        if self.station.is_some() && !self.playlist.is_empty() {
            self.start_current();
        } else {
            self.enter_idle();
        }
    }

    /// Start the front song; songs whose player cannot start are dropped.
    fn start_current(&mut self) {
        loop {
            let Some(song) = self.playlist.current().cloned() else {
                self.state = PlaybackState::AwaitingPlaylist;
                return;
            };
            let quick_mix = self.station.as_ref().is_some_and(|s| s.is_quick_mix);
            let origin = if quick_mix {
                find_station_by_id(&self.stations, &song.station_id)
            } else {
                None
            };
            self.ui
                .msg(MsgKind::Playing, format!("{}\n", ui::song_line(&song, origin)));

            match self.player.start(&song) {
                Ok(generation) => {
                    tracing::debug!(generation, title = %song.title, "song started");
                    self.paused = false;
                    self.publish_tracks();
                    self.publisher.publish_status(PlaybackStatus::Playing);
                    let ctx = HookContext {
                        station: self.station.as_ref(),
                        song: Some(&song),
                        duration_secs: song.duration_secs,
                        ..HookContext::new(&self.stations, CallOutcome::OK)
                    };
                    self.hook.fire(HookEvent::SongStart, &ctx);
                    self.state = PlaybackState::Playing;
                    return;
                }
                Err(e) => {
                    self.ui
                        .msg(MsgKind::Error, format!("Cannot start player: {e}\n"));
                    tracing::warn!(title = %song.title, "player start failed: {e}");
                    self.player.record_start_failure();
                    self.playlist.pop_current();
                    if self.error_ceiling_reached() {
                        self.enter_idle();
                        return;
                    }
                }
            }
        }
    }

    fn error_ceiling_reached(&mut self) -> bool {
        let reached = self.player.consecutive_errors() >= self.settings.max_player_errors;
        if reached {
            self.ui.msg(
                MsgKind::Error,
                "Player failed too often, dropping the station.\n",
            );
            tracing::warn!(
                errors = self.player.consecutive_errors(),
                "player error ceiling reached"
            );
        }
        reached
    }

    fn publish_tracks(&mut self) {
        let Some(station) = self.station.as_ref() else {
            return;
        };
        let quick_mix = station.is_quick_mix;
        let stations = &self.stations;
        let view = |song: &Song| PlaybackTrack::from_song(song, stations, quick_mix);
        let snapshot = TrackSnapshot {
            station_name: station.name.clone(),
            current: self.playlist.current().map(view),
            next: self.playlist.next().map(view),
        };
        self.publisher.publish(&snapshot);
    }

    /// Reap the player, move the song into history and decide what plays next.
    fn finish_song(&mut self) {
        let progress = self.player.progress();
        let exit = self.player.cleanup();
        tracing::debug!(?exit, errors = self.player.consecutive_errors(), "song finished");

        let finished = self.playlist.pop_current();
        let ctx = HookContext {
            station: self.station.as_ref(),
            song: finished.as_ref(),
            played_secs: progress.map(|p| p.played_secs()).unwrap_or(0),
            duration_secs: progress.map(|p| p.duration_secs()).unwrap_or(0),
            ..HookContext::new(&self.stations, CallOutcome::OK)
        };
        self.hook.fire(HookEvent::SongFinish, &ctx);
        if let Some(song) = finished {
            self.history.prepend(song);
        }

        if self.quit {
            self.publisher.publish_status(PlaybackStatus::Paused);
            self.state = PlaybackState::Stopped;
        } else if self.error_ceiling_reached() {
            self.enter_idle();
        } else if let Some(station) = self.pending_station.take() {
            self.tune_in(station);
        } else if self.station.is_none() {
            self.enter_idle();
        } else if self.playlist.is_empty() {
            self.state = PlaybackState::AwaitingPlaylist;
        } else {
            self.start_current();
        }
    }

    /// Collect one line from the control inputs, servicing player output meanwhile.
    fn read_line(&mut self, echo: bool) -> Option<String> {
        let mut line = Vec::new();
        loop {
            let event = self.next_control_event()?;
            match event {
                MuxEvent::Control {
                    byte: b'\n' | b'\r',
                    ..
                } => {
                    if echo {
                        self.ui.echo(b"\n");
                    }
                    return Some(String::from_utf8_lossy(&line).into_owned());
                }
                MuxEvent::Control {
                    byte: 0x7f | 0x08, ..
                } => {
                    if line.pop().is_some() && echo {
                        self.ui.echo(b"\x08 \x08");
                    }
                }
                MuxEvent::Control { byte, .. } => {
                    line.push(byte);
                    if echo {
                        self.ui.echo(&[byte]);
                    }
                }
                MuxEvent::ControlClosed { source } => self.control_closed(source),
                MuxEvent::Interrupt => {
                    self.request_quit();
                    return None;
                }
                MuxEvent::PlayerOutput {
                    generation,
                    stream,
                    chunk,
                } => self.player_output(generation, stream, &chunk),
            }
        }
    }

    fn prompt_station(&mut self) -> Option<Station> {
        if self.stations.is_empty() {
            self.ui.msg(MsgKind::Error, "No stations.\n");
            return None;
        }
        let mut sorted = self.stations.clone();
        sorted.sort_by(|a, b| {
            b.is_quick_mix
                .cmp(&a.is_quick_mix)
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        });
        for (i, station) in sorted.iter().enumerate() {
            self.ui
                .msg(MsgKind::List, format!("{i:2}) {}\n", ui::station_line(station)));
        }
        self.ui.msg(MsgKind::Question, "Select station: ");
        let line = self.read_line(true)?;
        let choice = line.trim();
        match choice.parse::<usize>().ok().and_then(|i| sorted.get(i)) {
            Some(station) => Some(station.clone()),
            None => {
                if !choice.is_empty() {
                    self.ui.msg(MsgKind::Error, "Invalid station.\n");
                }
                None
            }
        }
    }

    fn print_history(&mut self) {
        if self.history.is_empty() {
            self.ui.msg(MsgKind::Info, "No history yet.\n");
            return;
        }
        for (i, song) in self.history.iter().enumerate() {
            self.ui
                .msg(MsgKind::List, format!("{i:2}) {}\n", ui::song_line(song, None)));
        }
    }

    fn print_song_info(&mut self) {
        if let Some(station) = &self.station {
            self.ui.msg(
                MsgKind::Info,
                format!("Station \"{}\" ({})\n", station.name, station.id),
            );
        }
        if let Some(song) = self.playlist.current() {
            let origin = find_station_by_id(&self.stations, &song.station_id);
            self.ui
                .msg(MsgKind::Playing, format!("{}\n", ui::song_line(song, origin)));
        }
    }

    fn print_upcoming(&mut self) {
        let mut any = false;
        for (i, song) in self.playlist.upcoming().enumerate() {
            any = true;
            self.ui
                .msg(MsgKind::List, format!("{i:2}) {}\n", ui::song_line(song, None)));
        }
        if !any {
            self.ui.msg(MsgKind::Info, "No songs in queue.\n");
        }
    }

    fn print_help(&mut self) {
        for (key, cmd) in self.settings.keys.bindings() {
            self.ui
                .msg(MsgKind::List, format!("{}    {}\n", key as char, cmd.description()));
        }
    }
}
