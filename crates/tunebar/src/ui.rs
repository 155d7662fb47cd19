//! Terminal output helpers.

use std::fmt::Display;
use std::io::{self, Write};

use tunebar_types::{Song, Station};

/// Prefix style of a message line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MsgKind {
    /// Raw text, continues the current line.
    Plain,
    Info,
    Playing,
    Time,
    Error,
    Question,
    List,
}

impl MsgKind {
    fn prefix(self) -> &'static str {
        match self {
            MsgKind::Plain => "",
            MsgKind::Info => "(i) ",
            MsgKind::Playing => "|>  ",
            MsgKind::Time => "#   ",
            MsgKind::Error => "/!\\ ",
            MsgKind::Question => "[?] ",
            MsgKind::List => "\t",
        }
    }
}

pub struct Ui {
    out: Box<dyn Write + Send>,
}

impl Ui {
    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self { out }
    }

    pub fn msg(&mut self, kind: MsgKind, text: impl Display) {
        let result = if kind == MsgKind::Plain {
            write!(self.out, "{text}")
        } else {
            // clear whatever the progress line left behind
            write!(self.out, "\r\x1b[2K{}{text}", kind.prefix())
        };
        if let Err(e) = result.and_then(|_| self.out.flush()) {
            tracing::debug!("terminal write failed: {e}");
        }
    }

    /// Echo raw input bytes back to the terminal.
    pub fn echo(&mut self, bytes: &[u8]) {
        if let Err(e) = self.out.write_all(bytes).and_then(|_| self.out.flush()) {
            tracing::debug!("terminal write failed: {e}");
        }
    }

    pub fn progress(&mut self, played_secs: u32, duration_secs: u32) {
        self.msg(MsgKind::Time, format_time(played_secs, duration_secs));
    }
}

/// `-MM:SS/MM:SS` remaining/total, or `+MM:SS/MM:SS` once past the declared duration.
pub fn format_time(played_secs: u32, duration_secs: u32) -> String {
    let (sign, remaining) = if played_secs <= duration_secs {
        ('-', duration_secs - played_secs)
    } else {
        ('+', played_secs - duration_secs)
    };
    format!(
        "{sign}{:02}:{:02}/{:02}:{:02}",
        remaining / 60,
        remaining % 60,
        duration_secs / 60,
        duration_secs % 60
    )
}

/// `"Title" by "Artist" on "Album"`, plus the origin station for QuickMix songs.
pub fn song_line(song: &Song, origin: Option<&Station>) -> String {
    let mut line = format!(
        "\"{}\" by \"{}\" on \"{}\"",
        song.title, song.artist, song.album
    );
    if let Some(station) = origin {
        line.push_str(&format!(" @ {}", station.name));
    }
    line
}

pub fn station_line(station: &Station) -> String {
    let marker = if station.is_quick_mix { "Q" } else { " " };
    format!("{marker} {}", station.name)
}
