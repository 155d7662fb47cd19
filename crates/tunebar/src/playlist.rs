use std::collections::VecDeque;

use tunebar_types::Song;

/// Songs fetched for the active station. The front entry is the one playing.
#[derive(Debug, Default)]
pub struct Playlist {
    songs: VecDeque<Song>,
}

impl Playlist {
    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.songs.len()
    }

    pub fn current(&self) -> Option<&Song> {
        self.songs.front()
    }

    pub fn next(&self) -> Option<&Song> {
        self.songs.get(1)
    }

    /// Songs after the current one.
    pub fn upcoming(&self) -> impl Iterator<Item = &Song> {
        self.songs.iter().skip(1)
    }

    /// Detach the front song from the remainder.
    pub fn pop_current(&mut self) -> Option<Song> {
        self.songs.pop_front()
    }

    pub fn replace(&mut self, songs: Vec<Song>) {
        self.songs = songs.into();
    }

    pub fn clear(&mut self) {
        self.songs.clear();
    }
}

/// Already played songs, most recent first. Grows for the process lifetime.
#[derive(Debug, Default)]
pub struct History {
    songs: VecDeque<Song>,
}

impl History {
    pub fn prepend(&mut self, song: Song) {
        self.songs.push_front(song);
    }

    pub fn most_recent(&self) -> Option<&Song> {
        self.songs.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Song> {
        self.songs.iter()
    }

    pub fn len(&self) -> usize {
        self.songs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }
}
