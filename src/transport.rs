/// Byte-stream transport abstraction and monotonic deadlines.
///
/// The engine talks to the modem over any duplex byte stream — a hardware
/// UART, a software serial port, a PTY in integration tests. The stream is
/// polled, never blocked on: `read_byte`/`peek_byte` return immediately with
/// `None` when nothing has arrived, and all waiting is done by the engine's
/// own deadline loops.

/// A non-blocking duplex byte stream plus a millisecond clock.
///
/// The clock only has to be monotonic modulo 2^32; deadline comparisons are
/// wraparound-safe, so a free-running 32-bit millisecond counter is enough.
pub trait ByteTransport {
    /// Take the next received byte, or `None` if nothing is pending.
    fn read_byte(&mut self) -> Option<u8>;

    /// Look at the next received byte without consuming it.
    fn peek_byte(&mut self) -> Option<u8>;

    /// Queue bytes for transmission.
    fn write_bytes(&mut self, data: &[u8]);

    /// Current monotonic time in milliseconds. Wraps at 2^32.
    fn now_millis(&self) -> u32;
}

/// An absolute point in monotonic millisecond time.
///
/// Computed once per blocking call as "now + timeout" and then only compared
/// against, never recomputed. The comparison uses wrapping subtraction against
/// the half-range rather than a direct less-than, so it stays correct when the
/// clock rolls over.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadline {
    at: u32,
}

impl Deadline {
    /// Deadline `timeout_ms` milliseconds after `now`.
    pub fn after(now: u32, timeout_ms: u32) -> Self {
        Self {
            at: now.wrapping_add(timeout_ms),
        }
    }

    /// Whether `now` has reached or passed this deadline.
    pub fn expired(self, now: u32) -> bool {
        now.wrapping_sub(self.at) < 0x8000_0000
    }
}
