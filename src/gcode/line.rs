// src/gcode/line.rs - Per-source line accumulator
use super::GCODE_LINE_MAX;

/// Collects bytes until CR or LF. Leading whitespace is dropped, so blank
/// lines and CRLF pairs never produce an empty line.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: heapless::Vec<u8, GCODE_LINE_MAX>,
    complete: bool,
    overflow: bool,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one byte. Returns true once a full line is ready.
    pub fn push(&mut self, byte: u8) -> bool {
        if self.complete {
            return true;
        }
        match byte {
            b'\r' | b'\n' => {
                if !self.buf.is_empty() || self.overflow {
                    self.complete = true;
                }
            }
            b if self.buf.is_empty() && b.is_ascii_whitespace() => {}
            b => {
                if self.buf.push(b).is_err() {
                    self.overflow = true;
                }
            }
        }
        self.complete
    }

    /// End the current line without a terminator, e.g. at end of file.
    /// Returns true if there was anything to finish.
    pub fn finish(&mut self) -> bool {
        if !self.buf.is_empty() || self.overflow {
            self.complete = true;
        }
        self.complete
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty() && !self.overflow
    }

    /// The line was longer than the buffer and has been truncated.
    pub fn overflowed(&self) -> bool {
        self.overflow
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.complete = false;
        self.overflow = false;
    }
}
