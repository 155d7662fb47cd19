use std::io::{self, IsTerminal};
use std::os::fd::AsRawFd;

/// Puts the terminal on stdin into non-canonical, no-echo mode; restores it on drop.
///
/// Unlike a full raw mode, ISIG and OPOST stay set: Ctrl-C still raises SIGINT
/// for the `ctrlc` handler and `\n` still renders as a line break.
pub struct TermGuard {
    fd: libc::c_int,
    saved: libc::termios,
}

impl TermGuard {
    /// `None` when stdin is not a terminal or its attributes cannot be changed.
    pub fn engage() -> Option<Self> {
        let stdin = io::stdin();
        if !stdin.is_terminal() {
            return None;
        }
        let fd = stdin.as_raw_fd();
        let mut saved: libc::termios = unsafe { std::mem::zeroed() };
        if unsafe { libc::tcgetattr(fd, &mut saved) } != 0 {
            tracing::warn!("tcgetattr: {}", io::Error::last_os_error());
            return None;
        }
        let mode = key_at_a_time(saved);
        if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &mode) } != 0 {
            tracing::warn!("tcsetattr: {}", io::Error::last_os_error());
            return None;
        }
        Some(Self { fd, saved })
    }
}

/// `saved` with line buffering and echo off; every other flag is kept.
fn key_at_a_time(saved: libc::termios) -> libc::termios {
    let mut mode = saved;
    mode.c_lflag &= !(libc::ICANON | libc::ECHO);
    mode.c_cc[libc::VMIN] = 1;
    mode.c_cc[libc::VTIME] = 0;
    mode
}

impl Drop for TermGuard {
    fn drop(&mut self) {
        if unsafe { libc::tcsetattr(self.fd, libc::TCSANOW, &self.saved) } != 0 {
            tracing::warn!("restore terminal: {}", io::Error::last_os_error());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_mode_keeps_signals_and_output_processing() {
        let mut saved: libc::termios = unsafe { std::mem::zeroed() };
        saved.c_lflag = libc::ICANON | libc::ECHO | libc::ISIG;
        saved.c_oflag = libc::OPOST | libc::ONLCR;
        saved.c_cc[libc::VMIN] = 0;

        let mode = key_at_a_time(saved);
        assert_eq!(mode.c_lflag & (libc::ICANON | libc::ECHO), 0);
        assert_ne!(mode.c_lflag & libc::ISIG, 0);
        assert_eq!(mode.c_oflag, saved.c_oflag);
        assert_eq!(mode.c_cc[libc::VMIN], 1);
        assert_eq!(mode.c_cc[libc::VTIME], 0);
    }
}
