/// Diagnostic mirroring of modem traffic.
///
/// Every byte the engine consumes from the transport, and every byte it
/// writes, can be mirrored to a [`DiagSink`] for observability. The sink
/// never influences control flow — a dropped or truncated mirror is invisible
/// to the protocol.

use heapless::Vec;

/// Capacity of the line accumulator in [`LogDiag`]. Longer received lines are
/// flushed in chunks.
pub const DIAG_LINE_LEN: usize = 128;

/// Receives a copy of the traffic between engine and modem.
///
/// Both methods default to no-ops so implementations can mirror only one
/// direction.
pub trait DiagSink {
    /// A byte consumed from the transport.
    fn rx_byte(&mut self, _byte: u8) {}

    /// Bytes written to the transport.
    fn tx_bytes(&mut self, _data: &[u8]) {}
}

/// The silent sink, used when no diagnostics are wanted.
pub struct NullDiag;

impl DiagSink for NullDiag {}

/// Mirrors traffic onto the `log` facade.
///
/// Received bytes are accumulated until a line terminator and emitted as one
/// `trace!` record per line, prefixed `<<`. Written commands are emitted as
/// `>>` records. Non-UTF-8 payload bytes are reported by length only.
pub struct LogDiag {
    line: Vec<u8, DIAG_LINE_LEN>,
}

impl LogDiag {
    pub fn new() -> Self {
        Self { line: Vec::new() }
    }

    fn flush(&mut self) {
        if self.line.is_empty() {
            return;
        }
        match core::str::from_utf8(&self.line) {
            Ok(s) => log::trace!("<< {}", s),
            Err(_) => log::trace!("<< ({} raw bytes)", self.line.len()),
        }
        self.line.clear();
    }
}

impl Default for LogDiag {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagSink for LogDiag {
    fn rx_byte(&mut self, byte: u8) {
        match byte {
            b'\r' => {}
            b'\n' => self.flush(),
            _ => {
                if self.line.push(byte).is_err() {
                    self.flush();
                    let _ = self.line.push(byte);
                }
            }
        }
    }

    fn tx_bytes(&mut self, data: &[u8]) {
        let trimmed = match data {
            [head @ .., b'\r'] => head,
            other => other,
        };
        if trimmed.is_empty() {
            return;
        }
        match core::str::from_utf8(trimmed) {
            Ok(s) => log::trace!(">> {}", s),
            Err(_) => log::trace!(">> ({} raw bytes)", trimmed.len()),
        }
    }
}

#[cfg(test)]
pub(crate) mod capture {
    use super::DiagSink;

    /// Collecting sink used by engine tests to assert the mirror sees
    /// every consumed byte.
    pub(crate) struct CaptureDiag {
        pub rx: std::vec::Vec<u8>,
        pub tx: std::vec::Vec<u8>,
    }

    impl CaptureDiag {
        pub fn new() -> Self {
            Self {
                rx: std::vec::Vec::new(),
                tx: std::vec::Vec::new(),
            }
        }
    }

    impl DiagSink for CaptureDiag {
        fn rx_byte(&mut self, byte: u8) {
            self.rx.push(byte);
        }

        fn tx_bytes(&mut self, data: &[u8]) {
            self.tx.extend_from_slice(data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_diag_accumulates_without_panicking() {
        let mut diag = LogDiag::new();
        for b in b"+CSQ: 18,0\r\nOK\r\n" {
            diag.rx_byte(*b);
        }
        assert!(diag.line.is_empty());
    }

    #[test]
    fn log_diag_overflow_flushes_and_keeps_accepting() {
        let mut diag = LogDiag::new();
        for _ in 0..(DIAG_LINE_LEN + 10) {
            diag.rx_byte(b'x');
        }
        assert_eq!(diag.line.len(), 10);
    }
}
