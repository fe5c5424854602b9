/// Bounded line reading with AT-style terminator handling.
///
/// AT-class devices are sloppy about line endings: responses may end in a
/// bare CR, a bare LF, or a CR-LF pair, and the LF of a pair can trail the
/// CR by a few milliseconds. [`LineReader`] absorbs all three shapes into
/// one logical line per call.

use heapless::Vec;

use crate::diag::DiagSink;
use crate::transport::{ByteTransport, Deadline};
use crate::Error;

/// Default line buffer capacity. Matches the longest responses the SIMx00
/// command set produces outside of bulk payload reads.
pub const DEFAULT_LINE_CAP: usize = 64;

/// Grace window after a CR during which a trailing LF is absorbed into the
/// same line instead of producing an empty follow-up line.
pub const CR_LF_GRACE_MS: u32 = 50;

/// Accumulates one logical line from a transport.
///
/// The buffer is reset at the start of every read attempt; a line longer
/// than `CAP` is consumed in full but silently truncated to `CAP` bytes.
pub struct LineReader<const CAP: usize = DEFAULT_LINE_CAP> {
    buf: Vec<u8, CAP>,
}

impl<const CAP: usize> LineReader<CAP> {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// The most recently completed line, terminators excluded.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Read one line, blocking until a terminator or `deadline`.
    ///
    /// Returns the stored length on success; zero is a valid length (an
    /// empty line, which token matching skips). On timeout the partial
    /// accumulation is discarded.
    ///
    /// Terminator rules:
    /// - LF ends the line immediately.
    /// - CR ends the line too, but an LF arriving within
    ///   [`CR_LF_GRACE_MS`] is consumed as part of the same line. Any other
    ///   byte after the CR stays in the transport for the next read.
    ///
    /// Every consumed byte is mirrored to `diag`.
    pub fn read_from<T, D>(
        &mut self,
        transport: &mut T,
        diag: &mut D,
        deadline: Deadline,
    ) -> Result<usize, Error>
    where
        T: ByteTransport,
        D: DiagSink,
    {
        self.buf.clear();
        let mut lf_grace: Option<Deadline> = None;

        while !deadline.expired(transport.now_millis()) {
            if let Some(grace) = lf_grace {
                // A CR was just consumed. Peek for the optional LF; anything
                // else (or grace expiry) means the line ended at the CR.
                match transport.peek_byte() {
                    Some(b'\n') => {}
                    Some(_) => return Ok(self.buf.len()),
                    None => {
                        if grace.expired(transport.now_millis()) {
                            return Ok(self.buf.len());
                        }
                        continue;
                    }
                }
            }

            let byte = match transport.read_byte() {
                Some(b) => b,
                None => continue,
            };
            diag.rx_byte(byte);
            lf_grace = None;

            match byte {
                b'\r' => {
                    lf_grace = Some(Deadline::after(transport.now_millis(), CR_LF_GRACE_MS));
                }
                b'\n' => return Ok(self.buf.len()),
                other => {
                    // Overflow bytes are consumed and dropped, not an error.
                    let _ = self.buf.push(other);
                }
            }
        }

        log::debug!("read_line timed out");
        self.buf.clear();
        Err(Error::Timeout)
    }
}

impl<const CAP: usize> Default for LineReader<CAP> {
    fn default() -> Self {
        Self::new()
    }
}
