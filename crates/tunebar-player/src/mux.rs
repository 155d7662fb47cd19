//! Input multiplexing.
//!
//! Every input source (player stdout/stderr, the terminal, the control FIFO)
//! is drained by its own reader thread that posts [`MuxEvent`]s into a single
//! ordered queue. The consumer services exactly one event per wakeup and blocks
//! indefinitely when nothing is pending.

use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::unix::fs::FileTypeExt;
use std::path::Path;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, unbounded};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayerStream {
    Stdout,
    Stderr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlSource {
    /// Interactive terminal.
    Primary,
    /// Optional control FIFO.
    Secondary,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MuxEvent {
    /// One read from a player output stream. An empty chunk means the stream reached EOF.
    PlayerOutput {
        generation: u64,
        stream: PlayerStream,
        chunk: Vec<u8>,
    },
    /// One byte from a control input.
    Control { source: ControlSource, byte: u8 },
    /// A control input reached EOF or failed.
    ControlClosed { source: ControlSource },
    /// Process-level interrupt (Ctrl-C).
    Interrupt,
}

/// The single event queue consumed by the playback loop.
pub struct Multiplexer {
    tx: Sender<MuxEvent>,
    rx: Receiver<MuxEvent>,
}

impl Default for Multiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl Multiplexer {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Producer handle for additional sources (player readers, signal handlers, tests).
    pub fn sender(&self) -> Sender<MuxEvent> {
        self.tx.clone()
    }

    /// Start a reader thread feeding one byte at a time from `reader`.
    pub fn attach_control<R>(&self, source: ControlSource, reader: R) -> JoinHandle<()>
    where
        R: Read + Send + 'static,
    {
        let tx = self.tx.clone();
        std::thread::spawn(move || read_control(source, reader, tx))
    }

    /// Block until the next event. No timeout.
    pub fn wait(&self) -> MuxEvent {
        // `self` keeps a sender alive, so the queue can never disconnect.
        self.rx.recv().unwrap_or(MuxEvent::Interrupt)
    }

    /// Next event if one is already queued.
    pub fn try_wait(&self) -> Option<MuxEvent> {
        self.rx.try_recv().ok()
    }

    /// Block for at most `timeout`.
    pub fn wait_timeout(&self, timeout: std::time::Duration) -> Option<MuxEvent> {
        self.rx.recv_timeout(timeout).ok()
    }
}

fn read_control<R: Read>(source: ControlSource, mut reader: R, tx: Sender<MuxEvent>) {
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(0) => break,
            Ok(_) => {
                if tx
                    .send(MuxEvent::Control {
                        source,
                        byte: byte[0],
                    })
                    .is_err()
                {
                    return;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!(?source, "control input read failed: {e}");
                break;
            }
        }
    }
    let _ = tx.send(MuxEvent::ControlClosed { source });
}

/// Start a reader thread for one player output stream.
///
/// Read errors are reported like EOF: the song cannot continue without its pipes.
pub(crate) fn spawn_stream_reader<R>(
    tx: Sender<MuxEvent>,
    generation: u64,
    stream: PlayerStream,
    mut reader: R,
    chunk_size: usize,
) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    std::thread::spawn(move || {
        let mut buf = vec![0u8; chunk_size.max(1)];
        loop {
            let chunk = match reader.read(&mut buf) {
                Ok(n) => buf[..n].to_vec(),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!(?stream, generation, "player stream read failed: {e}");
                    Vec::new()
                }
            };
            let closed = chunk.is_empty();
            let sent = tx.send(MuxEvent::PlayerOutput {
                generation,
                stream,
                chunk,
            });
            if closed || sent.is_err() {
                break;
            }
        }
    })
}

/// Open the control FIFO read/write so it never reports EOF while no writer is attached.
///
/// Returns `Ok(None)` when nothing exists at `path`; anything that is not a FIFO is an error.
pub fn open_control_fifo(path: &Path) -> io::Result<Option<File>> {
    let file = match OpenOptions::new().read(true).write(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    if !file.metadata()?.file_type().is_fifo() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a fifo", path.display()),
        ));
    }
    Ok(Some(file))
}
