//! Raw-mode handling for the controlling terminal.
//!
//! While a session is shared interactively, the local terminal runs in raw
//! mode so every keystroke reaches the child unmodified. The original
//! settings are captured before any change and restored when the guard
//! drops, including on panic unwind.

use crossterm::tty::IsTty;

/// RAII guard that saves terminal settings and restores them on drop.
///
/// Construction never fails: when stdin is not a terminal the guard holds
/// nothing and every operation is a no-op.
pub struct RawModeGuard {
    original: Option<nix::sys::termios::Termios>,
}

impl RawModeGuard {
    /// Captures the current stdin settings without changing them.
    pub fn new() -> Self {
        use nix::sys::termios;
        let stdin = std::io::stdin();
        let original = termios::tcgetattr(&stdin).ok();
        Self { original }
    }

    /// Switches stdin to raw mode. The saved settings are left untouched.
    pub fn enter_raw_mode(&self) {
        if let Some(ref original) = self.original {
            use nix::sys::termios;
            let stdin = std::io::stdin();
            let mut raw = original.clone();
            termios::cfmakeraw(&mut raw);
            let _ = termios::tcsetattr(&stdin, termios::SetArg::TCSANOW, &raw);
        }
    }
}

impl Default for RawModeGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Some(ref original) = self.original {
            use nix::sys::termios;
            let stdin = std::io::stdin();
            let _ = termios::tcsetattr(&stdin, termios::SetArg::TCSANOW, original);
        }
    }
}

/// Whether stdin is attached to a terminal.
pub fn stdin_is_tty() -> bool {
    std::io::stdin().is_tty()
}

/// Current controlling-terminal size as `(cols, rows)`, if one is attached.
pub fn terminal_size() -> Option<(u16, u16)> {
    crossterm::terminal::size().ok()
}
