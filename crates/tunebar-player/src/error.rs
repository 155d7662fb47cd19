use std::io;

use tunebar_types::shm::LayoutError;

/// Why a song could not be started.
#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("song has no stream url")]
    MissingUrl,
    #[error("untrusted stream url scheme: {0}")]
    UntrustedUrl(String),
    #[error("stream url contains a quote character")]
    QuotedUrl,
    #[error("a player is already running")]
    Busy,
    #[error("spawn player: {0}")]
    Spawn(#[source] io::Error),
    #[error("player pipe missing after spawn")]
    MissingPipe,
}

/// Shared-state segment failures.
#[derive(Debug, thiserror::Error)]
pub enum ShmError {
    #[error("invalid key path {0}")]
    KeyPath(String),
    #[error("derive segment key: {0}")]
    Key(#[source] io::Error),
    #[error("segment still attached by {0} other process(es)")]
    Busy(u64),
    #[error("{op}: {source}")]
    Sys {
        op: &'static str,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Layout(#[from] LayoutError),
}

impl ShmError {
    pub(crate) fn last_os(op: &'static str) -> Self {
        Self::Sys {
            op,
            source: io::Error::last_os_error(),
        }
    }
}
