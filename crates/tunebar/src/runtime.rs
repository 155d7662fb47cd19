//! Command runners.
//!
//! Wires settings, catalog, hook, publisher and control inputs into an [`App`].

use std::path::Path;

use anyhow::{Context, Result};
use tunebar_player::mux::{ControlSource, MuxEvent, open_control_fifo};
use tunebar_player::publisher::{Publisher, read_snapshot};

use crate::app::{App, AppParts};
use crate::catalog::FileCatalog;
use crate::cli::{Args, Command};
use crate::config::{Settings, load_settings, write_last_station};
use crate::dispatch::{KeyCommand, KeyDispatcher};
use crate::hooks::{EventHook, NoopHook, ScriptHook};
use crate::terminal::TermGuard;
use crate::ui::{self, MsgKind, Ui};

pub fn run(args: &Args) -> Result<()> {
    let settings = load_settings(args)?;
    match args.command() {
        Command::Play => run_play(settings),
        Command::Stations => run_stations(settings),
        Command::Status => run_status(&settings),
    }
}

/// Interactive session: log in, play, persist the last station on exit.
pub fn run_play(settings: Settings) -> Result<()> {
    let publisher = match (&settings.shm_key_path, settings.publish_state) {
        (Some(path), true) => Publisher::init(path),
        _ => Publisher::disabled(),
    };
    let hook: Box<dyn EventHook> = match &settings.event_command {
        Some(command) => Box::new(ScriptHook::new(command.clone())),
        None => Box::new(NoopHook),
    };
    let fifo = settings.fifo.clone();
    let state_file = settings.state_file.clone();

    let mut app = build_app(settings, hook, publisher)?;
    let _term = attach_terminal(&mut app);
    if let Some(path) = &fifo {
        attach_fifo(&mut app, path);
    }

    let tx = app.event_sender();
    ctrlc::set_handler(move || {
        let _ = tx.send(MuxEvent::Interrupt);
    })
    .context("install Ctrl-C handler")?;

    let mut ui = Ui::stdout();
    ui.msg(
        MsgKind::Plain,
        format!("Welcome to tunebar ({})! ", env!("CARGO_PKG_VERSION")),
    );
    match app.settings().keys.key(KeyCommand::Help) {
        Some(key) => ui.msg(
            MsgKind::Plain,
            format!("Press {} for a list of commands.\n", key as char),
        ),
        None => ui.msg(MsgKind::Plain, "\n"),
    }

    let result = app.run();

    if let Some(path) = &state_file {
        let station = app.station().map(|s| s.id.as_str());
        if let Err(e) = write_last_station(path, station) {
            tracing::warn!("save state: {e:#}");
        }
    }
    result
}

/// Log in and print the station list.
pub fn run_stations(settings: Settings) -> Result<()> {
    let mut app = build_app(settings, Box::new(NoopHook), Publisher::disabled())?;
    let _term = attach_terminal(&mut app);
    app.login()?;

    let mut stations = app.stations().to_vec();
    stations.sort_by_key(|s| s.name.to_lowercase());
    for station in &stations {
        println!("{}\t{}", station.id, ui::station_line(station));
    }
    Ok(())
}

/// Print the state published by a running instance as JSON.
pub fn run_status(settings: &Settings) -> Result<()> {
    let path = settings
        .shm_key_path
        .as_deref()
        .context("no shm_key_path configured")?;
    let snapshot = read_snapshot(path)
        .with_context(|| format!("read shared state keyed by {}", path.display()))?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

fn build_app(settings: Settings, hook: Box<dyn EventHook>, publisher: Publisher) -> Result<App> {
    let catalog_path = settings
        .catalog
        .clone()
        .context("no catalog configured (set `catalog` or pass --catalog)")?;
    let catalog = FileCatalog::load(&catalog_path)?;
    let dispatch = KeyDispatcher::new(settings.keys.clone());
    Ok(App::new(
        settings,
        AppParts {
            catalog: Box::new(catalog),
            hook,
            dispatch: Box::new(dispatch),
            publisher,
            ui: Ui::stdout(),
        },
    ))
}

fn attach_terminal(app: &mut App) -> Option<TermGuard> {
    let guard = TermGuard::engage();
    if guard.is_none() {
        tracing::debug!("stdin is not a terminal; reading it line-buffered");
    }
    app.attach_control(ControlSource::Primary, std::io::stdin());
    guard
}

fn attach_fifo(app: &mut App, path: &Path) {
    match open_control_fifo(path) {
        Ok(Some(fifo)) => {
            tracing::info!(path = %path.display(), "control fifo attached");
            app.attach_control(ControlSource::Secondary, fifo);
        }
        Ok(None) => tracing::debug!(path = %path.display(), "no control fifo"),
        Err(e) => tracing::warn!(path = %path.display(), "control fifo: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_catalog_is_reported() {
        let err = build_app(Settings::default(), Box::new(NoopHook), Publisher::disabled())
            .err()
            .unwrap();
        assert!(err.to_string().contains("no catalog configured"));
    }

    #[test]
    fn status_without_key_path_fails() {
        let settings = Settings {
            shm_key_path: None,
            ..Settings::default()
        };
        assert!(run_status(&settings).is_err());
    }

    #[test]
    fn catalog_file_builds_an_idle_app() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.toml");
        std::fs::write(
            &path,
            "[account]\nusername = \"u\"\npassword = \"p\"\n\n[[stations]]\nid = \"1\"\nname = \"Jazz\"\n",
        )
        .unwrap();
        let settings = Settings {
            catalog: Some(path),
            ..Settings::default()
        };
        let app = build_app(settings, Box::new(NoopHook), Publisher::disabled()).unwrap();
        assert!(app.station().is_none());
        assert!(app.stations().is_empty());
    }
}
