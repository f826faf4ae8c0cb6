//! Link session: exclusive owner of one open port plus the session log.
//!
//! All protocol components borrow the session mutably, so only one of them
//! can talk to the link at a time. Inbound data is delivered through
//! [`Session::wait_for`], which installs a single handler for the duration of
//! one wait; the handler is gone before the caller can start the next wait.

pub mod journal;

use std::io::ErrorKind;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use log::trace;

use crate::detect::describe_inbound;
use crate::error::{Error, Result};
use crate::port::Port;

pub use journal::{Direction, Journal, LogEntry};

/// Read buffer size for a single link poll.
const READ_CHUNK: usize = 1024;

/// Line terminator appended to every textual command.
pub const LINE_ENDING: &str = "\r\n";

/// Shared flag used to interrupt a running session from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// An open link together with its session log.
pub struct Session<P: Port> {
    port: P,
    journal: Journal,
    cancel: Option<CancelToken>,
    closed: bool,
}

impl<P: Port> Session<P> {
    /// Start a session on an already opened port.
    pub fn new(port: P) -> Self {
        Self {
            port,
            journal: Journal::new(),
            cancel: None,
            closed: false,
        }
    }

    /// Attach a cancel token checked on every wait tick.
    #[must_use]
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Session log so far.
    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Mutable session log.
    pub fn journal_mut(&mut self) -> &mut Journal {
        &mut self.journal
    }

    /// Record a host-side status note.
    pub fn note(&mut self, text: impl Into<String>) {
        self.journal.sent(text);
    }

    /// Port name of the underlying link.
    pub fn port_name(&self) -> &str {
        self.port.name()
    }

    fn check_cancel(&self) -> Result<()> {
        if self
            .cancel
            .as_ref()
            .is_some_and(CancelToken::is_cancelled)
        {
            Err(Error::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Write raw bytes and flush. Nothing is logged.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.check_cancel()?;
        self.port.write_all_bytes(data)
    }

    /// Write a textual command terminated by CR/LF and log it as sent.
    pub fn send_line(&mut self, line: &str) -> Result<()> {
        let mut data = String::with_capacity(line.len() + LINE_ENDING.len());
        data.push_str(line);
        data.push_str(LINE_ENDING);
        self.write(data.as_bytes())?;
        self.journal.sent(line);
        Ok(())
    }

    /// Drop pending inbound bytes.
    pub fn discard_input(&mut self) -> Result<()> {
        self.port.discard_input()
    }

    /// Sleep for `delay`, still honouring the cancel token.
    pub fn settle(&mut self, delay: Duration) -> Result<()> {
        let deadline = Instant::now() + delay;
        let tick = self.port.timeout().max(Duration::from_millis(1));
        loop {
            self.check_cancel()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::sleep(tick.min(deadline - now));
        }
    }

    /// Feed inbound chunks to `handler` until it returns `Some` or `timeout`
    /// elapses.
    ///
    /// Every chunk is logged as received before the handler sees it. Returns
    /// `Ok(None)` on timeout.
    pub fn wait_for<T, F>(&mut self, timeout: Duration, mut handler: F) -> Result<Option<T>>
    where
        F: FnMut(&[u8]) -> Option<T>,
    {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; READ_CHUNK];

        loop {
            self.check_cancel()?;

            match self.port.read(&mut buf) {
                Ok(0) => {},
                Ok(n) => {
                    let chunk = &buf[..n];
                    trace!("Received {n} bytes");
                    if let Some(text) = describe_inbound(chunk) {
                        self.journal.received(text);
                    }
                    if let Some(value) = handler(chunk) {
                        return Ok(Some(value));
                    }
                },
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) => {},
                Err(e) => return Err(Error::Io(e)),
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }
        }
    }

    /// Close the link. Further I/O fails; calling twice is harmless.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.port.close() {
            log::warn!("Failed to close {}: {e}", self.port.name());
        }
        self.closed = true;
    }

    /// Consume the session, returning the port and the log.
    pub fn into_parts(self) -> (P, Journal) {
        (self.port, self.journal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::MockPort;

    #[test]
    fn test_send_line_appends_crlf_and_logs() {
        let mut session = Session::new(MockPort::new());
        session.send_line("x 160000").unwrap();

        let (port, journal) = session.into_parts();
        assert_eq!(port.written(), b"x 160000\r\n");
        assert_eq!(journal.entries()[0].direction, Direction::Sent);
        assert_eq!(journal.entries()[0].text, "x 160000");
    }

    #[test]
    fn test_wait_for_returns_handler_value_and_logs_received() {
        let mut port = MockPort::new();
        port.feed(b"hello\r\n");
        let mut session = Session::new(port);

        let got = session
            .wait_for(Duration::from_millis(200), |chunk| {
                chunk.contains(&b'\n').then_some(chunk.len())
            })
            .unwrap();

        assert_eq!(got, Some(7));
        let entry = &session.journal().entries()[0];
        assert_eq!(entry.direction, Direction::Received);
        assert_eq!(entry.text, "hello");
    }

    #[test]
    fn test_wait_for_times_out_with_none() {
        let mut session = Session::new(MockPort::new());
        let start = Instant::now();
        let got: Option<()> = session
            .wait_for(Duration::from_millis(30), |_| Some(()))
            .unwrap();
        assert!(got.is_none());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_cancel_token_interrupts_wait() {
        let token = CancelToken::new();
        let mut session = Session::new(MockPort::new()).with_cancel(token.clone());
        token.cancel();

        let result: Result<Option<()>> = session.wait_for(Duration::from_secs(5), |_| None);
        assert!(matches!(result, Err(Error::Interrupted)));
        assert!(matches!(session.write(b"x"), Err(Error::Interrupted)));
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut session = Session::new(MockPort::new());
        session.close();
        session.close();
        let (port, _) = session.into_parts();
        assert!(port.closed);
    }
}
