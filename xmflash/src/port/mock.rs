//! Scripted in-memory port for protocol tests.
//!
//! Reads are served from a queue; every write is recorded and passed to an
//! optional responder that can queue the device's reply.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;
use crate::port::Port;

type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

pub(crate) struct MockPort {
    pub(crate) read_buf: VecDeque<u8>,
    pub(crate) writes: Vec<Vec<u8>>,
    pub(crate) discards: usize,
    pub(crate) closed: bool,
    pub(crate) fail_writes: usize,
    /// Stop each read after the first newline, like a device printing line
    /// by line.
    pub(crate) line_reads: bool,
    responder: Option<Responder>,
    timeout: Duration,
}

impl MockPort {
    pub(crate) fn new() -> Self {
        Self {
            read_buf: VecDeque::new(),
            writes: Vec::new(),
            discards: 0,
            closed: false,
            fail_writes: 0,
            line_reads: false,
            responder: None,
            timeout: Duration::from_millis(1),
        }
    }

    /// Port whose reply to each write is produced by `responder`.
    pub(crate) fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Vec<u8> + Send + 'static,
    {
        let mut port = Self::new();
        port.responder = Some(Box::new(responder));
        port
    }

    /// Port that answers every write with the next scripted reply.
    pub(crate) fn scripted(replies: Vec<Vec<u8>>) -> Self {
        let mut replies: VecDeque<Vec<u8>> = replies.into();
        Self::with_responder(move |_| replies.pop_front().unwrap_or_default())
    }

    pub(crate) fn feed(&mut self, data: &[u8]) {
        self.read_buf.extend(data);
    }

    pub(crate) fn written(&self) -> Vec<u8> {
        self.writes.concat()
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.read_buf.is_empty() {
            std::thread::sleep(self.timeout);
            return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "no data"));
        }
        let mut n = buf.len().min(self.read_buf.len());
        if self.line_reads {
            if let Some(end) = self.read_buf.iter().take(n).position(|&b| b == b'\n') {
                n = end + 1;
            }
        }
        for (slot, byte) in buf.iter_mut().zip(self.read_buf.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.fail_writes > 0 {
            self.fail_writes -= 1;
            return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "write failed"));
        }
        self.writes.push(buf.to_vec());
        if let Some(responder) = self.responder.as_mut() {
            let reply = responder(buf);
            self.read_buf.extend(reply);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn discard_input(&mut self) -> Result<()> {
        self.discards += 1;
        self.read_buf.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
