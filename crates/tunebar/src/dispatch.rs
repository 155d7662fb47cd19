//! Key bindings and command dispatch.
//!
//! Each control byte is looked up in a [`KeyMap`]. Bytes without a binding are
//! reported as unrecognized so the caller can hand them to the player.

/// Commands reachable from a single key press.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyCommand {
    Skip,
    Quit,
    Pause,
    SelectStation,
    History,
    SongInfo,
    Upcoming,
    Help,
}

impl KeyCommand {
    pub const ALL: [KeyCommand; 8] = [
        KeyCommand::Skip,
        KeyCommand::Quit,
        KeyCommand::Pause,
        KeyCommand::SelectStation,
        KeyCommand::History,
        KeyCommand::SongInfo,
        KeyCommand::Upcoming,
        KeyCommand::Help,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Key used when the settings do not override it.
    pub fn default_key(self) -> u8 {
        match self {
            KeyCommand::Skip => b'n',
            KeyCommand::Quit => b'q',
            KeyCommand::Pause => b'p',
            KeyCommand::SelectStation => b's',
            KeyCommand::History => b'h',
            KeyCommand::SongInfo => b'i',
            KeyCommand::Upcoming => b'u',
            KeyCommand::Help => b'?',
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            KeyCommand::Skip => "next song",
            KeyCommand::Quit => "quit",
            KeyCommand::Pause => "pause/resume playback",
            KeyCommand::SelectStation => "change station",
            KeyCommand::History => "song history",
            KeyCommand::SongInfo => "print information about song/station",
            KeyCommand::Upcoming => "upcoming songs",
            KeyCommand::Help => "print this help",
        }
    }

    /// Commands that only make sense while a song is playing.
    pub fn needs_song(self) -> bool {
        matches!(
            self,
            KeyCommand::Skip | KeyCommand::Pause | KeyCommand::SongInfo | KeyCommand::Upcoming
        )
    }
}

/// Byte bound to each command; `None` disables the command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyMap {
    keys: [Option<u8>; 8],
}

impl Default for KeyMap {
    fn default() -> Self {
        let mut keys = [None; 8];
        for cmd in KeyCommand::ALL {
            keys[cmd.index()] = Some(cmd.default_key());
        }
        Self { keys }
    }
}

impl KeyMap {
    pub fn key(&self, cmd: KeyCommand) -> Option<u8> {
        self.keys[cmd.index()]
    }

    pub fn set(&mut self, cmd: KeyCommand, key: Option<u8>) {
        self.keys[cmd.index()] = key;
    }

    /// First command bound to `byte`.
    pub fn lookup(&self, byte: u8) -> Option<KeyCommand> {
        KeyCommand::ALL
            .into_iter()
            .find(|cmd| self.key(*cmd) == Some(byte))
    }

    /// Enabled bindings in declaration order.
    pub fn bindings(&self) -> impl Iterator<Item = (u8, KeyCommand)> + '_ {
        KeyCommand::ALL
            .into_iter()
            .filter_map(|cmd| self.key(cmd).map(|key| (key, cmd)))
    }
}

/// What the dispatcher knows about the current playback.
#[derive(Clone, Copy, Debug, Default)]
pub struct DispatchContext {
    pub has_song: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// Run the command.
    Run(KeyCommand),
    /// Bound key, but the command cannot run right now.
    Unavailable(KeyCommand),
    /// Not a command key; goes to the player verbatim.
    Unrecognized,
}

/// Maps one control byte to a command.
pub trait CommandDispatch {
    fn dispatch(&self, byte: u8, ctx: &DispatchContext) -> Dispatch;
}

pub struct KeyDispatcher {
    keys: KeyMap,
}

impl KeyDispatcher {
    pub fn new(keys: KeyMap) -> Self {
        Self { keys }
    }
}

impl CommandDispatch for KeyDispatcher {
    fn dispatch(&self, byte: u8, ctx: &DispatchContext) -> Dispatch {
        match self.keys.lookup(byte) {
            Some(cmd) if cmd.needs_song() && !ctx.has_song => Dispatch::Unavailable(cmd),
            Some(cmd) => Dispatch::Run(cmd),
            None => Dispatch::Unrecognized,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAYING: DispatchContext = DispatchContext { has_song: true };

    #[test]
    fn default_bindings_cover_every_command() {
        let keys = KeyMap::default();
        assert_eq!(keys.lookup(b'n'), Some(KeyCommand::Skip));
        assert_eq!(keys.lookup(b'?'), Some(KeyCommand::Help));
        assert_eq!(keys.bindings().count(), KeyCommand::ALL.len());
    }

    #[test]
    fn unknown_byte_is_unrecognized() {
        let dispatcher = KeyDispatcher::new(KeyMap::default());
        assert_eq!(dispatcher.dispatch(b'9', &PLAYING), Dispatch::Unrecognized);
        assert_eq!(dispatcher.dispatch(b'q', &PLAYING), Dispatch::Run(KeyCommand::Quit));
    }

    #[test]
    fn song_commands_need_a_running_song() {
        let dispatcher = KeyDispatcher::new(KeyMap::default());
        let idle = DispatchContext::default();
        assert_eq!(dispatcher.dispatch(b'n', &idle), Dispatch::Unavailable(KeyCommand::Skip));
        assert_eq!(
            dispatcher.dispatch(b's', &idle),
            Dispatch::Run(KeyCommand::SelectStation)
        );
    }

    #[test]
    fn disabled_and_rebound_keys() {
        let mut keys = KeyMap::default();
        keys.set(KeyCommand::Pause, None);
        keys.set(KeyCommand::Skip, Some(b'p'));
        let dispatcher = KeyDispatcher::new(keys);
        assert_eq!(dispatcher.dispatch(b'p', &PLAYING), Dispatch::Run(KeyCommand::Skip));
        assert_eq!(dispatcher.dispatch(b'n', &PLAYING), Dispatch::Unrecognized);
        assert_eq!(dispatcher.dispatch(b'?', &PLAYING), Dispatch::Run(KeyCommand::Help));
    }
}
