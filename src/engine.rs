/// The AT command/response engine.
///
/// One [`AtEngine`] owns one transport and implements the request/response
/// discipline of line-oriented AT devices: drain stale input, send a
/// CR-terminated command, then read response lines until an expected token
/// appears or the deadline passes. Retry policy is deliberately absent —
/// callers that want "try N times" wrap these primitives themselves (see
/// `modem`).

use crate::diag::{DiagSink, NullDiag};
use crate::line::{LineReader, DEFAULT_LINE_CAP};
use crate::prompt::PromptMatcher;
use crate::transport::{ByteTransport, Deadline};
use crate::Error;

/// Default deadline for a plain command/OK exchange.
pub const DEFAULT_OK_TIMEOUT_MS: u32 = 4_000;

/// Settle pause between draining stale input and writing the next command.
/// The device may still be emitting the tail of a previous response.
pub const COMMAND_SETTLE_MS: u32 = 50;

const OK_OR_ERROR: [&[u8]; 2] = [b"OK", b"ERROR"];

/// Blocking AT-command engine over a [`ByteTransport`].
///
/// Holds no protocol state between calls — only the transport, the line
/// buffer, and the diagnostic sink.
pub struct AtEngine<T, D = NullDiag, const LINE_CAP: usize = DEFAULT_LINE_CAP>
where
    T: ByteTransport,
    D: DiagSink,
{
    transport: T,
    diag: D,
    line: LineReader<LINE_CAP>,
}

impl<T: ByteTransport> AtEngine<T> {
    /// Engine with the default line capacity and no diagnostic mirror.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            diag: NullDiag,
            line: LineReader::new(),
        }
    }
}

impl<T, D> AtEngine<T, D>
where
    T: ByteTransport,
    D: DiagSink,
{
    /// Engine with the default line capacity, mirroring all traffic to
    /// `diag`.
    pub fn with_diag(transport: T, diag: D) -> Self {
        Self {
            transport,
            diag,
            line: LineReader::new(),
        }
    }
}

impl<T, D, const LINE_CAP: usize> AtEngine<T, D, LINE_CAP>
where
    T: ByteTransport,
    D: DiagSink,
{
    /// Engine with an explicit line capacity, named via turbofish:
    /// `AtEngine::<_, _, 128>::with_line_cap(transport, diag)`.
    pub fn with_line_cap(transport: T, diag: D) -> Self {
        Self {
            transport,
            diag,
            line: LineReader::new(),
        }
    }

    /// Current transport time in milliseconds.
    pub fn now(&self) -> u32 {
        self.transport.now_millis()
    }

    /// Deadline `timeout_ms` from now.
    pub fn deadline(&self, timeout_ms: u32) -> Deadline {
        Deadline::after(self.now(), timeout_ms)
    }

    /// Busy-wait for `ms` milliseconds on the transport clock.
    pub fn delay(&self, ms: u32) {
        let dl = self.deadline(ms);
        while !dl.expired(self.now()) {}
    }

    /// Drain whatever is pending in the receive direction, mirroring it to
    /// the diagnostic sink.
    pub fn flush_input(&mut self) {
        while let Some(byte) = self.transport.read_byte() {
            self.diag.rx_byte(byte);
        }
    }

    /// Write bytes as-is, mirrored to the diagnostic sink. Used for payload
    /// streaming after a prompt; commands go through [`send_command`].
    ///
    /// [`send_command`]: Self::send_command
    pub fn write_raw(&mut self, data: &[u8]) {
        self.diag.tx_bytes(data);
        self.transport.write_bytes(data);
    }

    /// Send one command line: drain stale input, pause briefly for the
    /// device to finish any trailing output, then write `cmd` followed by CR.
    pub fn send_command(&mut self, cmd: &[u8]) {
        self.flush_input();
        self.delay(COMMAND_SETTLE_MS);
        self.write_raw(cmd);
        self.write_raw(b"\r");
    }

    /// Read one response line into the engine's line buffer.
    pub fn read_line(&mut self, deadline: Deadline) -> Result<usize, Error> {
        self.line.read_from(&mut self.transport, &mut self.diag, deadline)
    }

    /// The most recently read line, terminators excluded.
    pub fn line(&self) -> &[u8] {
        self.line.as_bytes()
    }

    /// The diagnostic sink.
    pub fn diag(&self) -> &D {
        &self.diag
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Read lines until one equals a candidate, skipping empty lines.
    /// Returns the index of the first candidate that matched.
    ///
    /// This is the one generalized wait primitive: "wait for OK" and "wait
    /// for one of several connection states" are both instances of it.
    pub fn wait_for_token(
        &mut self,
        candidates: &[&[u8]],
        deadline: Deadline,
    ) -> Result<usize, Error> {
        loop {
            let len = self.read_line(deadline)?;
            if len == 0 {
                continue;
            }
            let line = self.line.as_bytes();
            if let Some(idx) = candidates.iter().position(|c| *c == line) {
                return Ok(idx);
            }
            // Unrecognized lines (echo, unsolicited notifications) are skipped.
        }
    }

    /// Read lines until one starts with `prefix`, skipping empty lines.
    /// The matched line stays in the line buffer for value extraction.
    pub fn wait_for_prefix(&mut self, prefix: &[u8], deadline: Deadline) -> Result<(), Error> {
        loop {
            let len = self.read_line(deadline)?;
            if len == 0 {
                continue;
            }
            if self.line.as_bytes().starts_with(prefix) {
                return Ok(());
            }
        }
    }

    /// Wait for the final "OK" / "ERROR" of a command. True only on "OK";
    /// an explicit "ERROR" and a timeout both come back false, deliberately
    /// indistinguishable.
    pub fn wait_for_ok(&mut self, deadline: Deadline) -> bool {
        matches!(self.wait_for_token(&OK_OR_ERROR, deadline), Ok(0))
    }

    /// Send `cmd` and wait up to `timeout_ms` for its "OK".
    pub fn send_command_ok(&mut self, cmd: &[u8], timeout_ms: u32) -> bool {
        self.send_command(cmd);
        let dl = self.deadline(timeout_ms);
        self.wait_for_ok(dl)
    }

    /// Scan the incoming stream for a literal prompt (e.g. `"> "`).
    /// Returns false if the deadline passes before the prompt appears.
    pub fn wait_for_prompt(&mut self, prompt: &[u8], deadline: Deadline) -> bool {
        let mut matcher = PromptMatcher::new(prompt);
        while !deadline.expired(self.transport.now_millis()) {
            let byte = match self.transport.read_byte() {
                Some(b) => b,
                None => continue,
            };
            self.diag.rx_byte(byte);
            if matcher.feed(byte) {
                return true;
            }
        }
        log::debug!("prompt not seen before deadline");
        false
    }

    /// Consume exactly `count` bytes, storing at most `out.len()` of them.
    /// Returns the number stored, or `Timeout` if the transport dries up
    /// before `count` bytes were seen.
    pub fn read_exact(
        &mut self,
        mut count: usize,
        out: &mut [u8],
        deadline: Deadline,
    ) -> Result<usize, Error> {
        let mut stored = 0;
        while count > 0 {
            if deadline.expired(self.transport.now_millis()) {
                return Err(Error::Timeout);
            }
            let byte = match self.transport.read_byte() {
                Some(b) => b,
                None => continue,
            };
            self.diag.rx_byte(byte);
            count -= 1;
            if stored < out.len() {
                out[stored] = byte;
                stored += 1;
            }
        }
        Ok(stored)
    }
}

/// Parse the decimal integer in a value-bearing response line.
///
/// Skips `prefix_len` bytes and any run of spaces, then consumes decimal
/// digits. "No digits at all" is `MalformedValue`, distinct from a parsed
/// zero. `+CSQ: 18,0` with `prefix_len` 5 yields 18.
pub fn extract_value(line: &[u8], prefix_len: usize) -> Result<u32, Error> {
    let mut rest = line.get(prefix_len..).ok_or(Error::MalformedValue)?;
    while let [b' ', tail @ ..] = rest {
        rest = tail;
    }
    let mut value: u32 = 0;
    let mut digits = 0;
    for &b in rest {
        if !b.is_ascii_digit() {
            break;
        }
        value = value.saturating_mul(10).saturating_add(u32::from(b - b'0'));
        digits += 1;
    }
    if digits == 0 {
        return Err(Error::MalformedValue);
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::capture::CaptureDiag;
    use crate::transport::script::ScriptTransport;

    fn engine_with(t: ScriptTransport) -> AtEngine<ScriptTransport> {
        AtEngine::new(t)
    }

    // ── Token matching ──────────────────────────────────────────────

    #[test]
    fn wait_for_token_skips_non_matching_lines() {
        let mut t = ScriptTransport::new();
        t.push_rx(b"+CSQ: 18,0\r\nOK\r\n");
        let mut e = engine_with(t);
        let dl = e.deadline(1000);
        let final_tokens: [&[u8]; 2] = [b"OK", b"ERROR"];
        assert_eq!(e.wait_for_token(&final_tokens, dl), Ok(0));
    }

    #[test]
    fn wait_for_token_returns_first_matching_candidate_index() {
        let mut t = ScriptTransport::new();
        t.push_rx(b"CONNECT FAIL\r\n");
        let mut e = engine_with(t);
        let dl = e.deadline(1000);
        let states: [&[u8]; 3] = [b"CONNECT OK", b"CONNECT FAIL", b"ALREADY CONNECT"];
        assert_eq!(e.wait_for_token(&states, dl), Ok(1));
    }

    #[test]
    fn wait_for_token_requires_exact_match() {
        let mut t = ScriptTransport::new();
        t.push_rx(b"OKAY\r\n");
        let mut e = engine_with(t);
        let dl = e.deadline(200);
        let tokens: [&[u8]; 1] = [b"OK"];
        assert_eq!(e.wait_for_token(&tokens, dl), Err(Error::Timeout));
    }

    #[test]
    fn wait_for_prefix_keeps_line_for_extraction() {
        let mut t = ScriptTransport::new();
        t.push_rx(b"\r\n+CSQ: 18,0\r\n");
        let mut e = engine_with(t);
        let dl = e.deadline(1000);
        assert_eq!(e.wait_for_prefix(b"+CSQ:", dl), Ok(()));
        assert_eq!(e.line(), b"+CSQ: 18,0");
    }

    // ── Value extraction ────────────────────────────────────────────

    #[test]
    fn extract_value_parses_csq_reply() {
        assert_eq!(extract_value(b"+CSQ: 18,0", 5), Ok(18));
    }

    #[test]
    fn extract_value_without_digits_is_malformed() {
        assert_eq!(extract_value(b"+CSQ: ,0", 5), Err(Error::MalformedValue));
    }

    #[test]
    fn extract_value_zero_is_a_value() {
        assert_eq!(extract_value(b"+CSQ: 0,0", 5), Ok(0));
    }

    #[test]
    fn extract_value_prefix_past_end_is_malformed() {
        assert_eq!(extract_value(b"OK", 5), Err(Error::MalformedValue));
    }

    // ── Command/OK exchange ─────────────────────────────────────────

    #[test]
    fn send_command_ok_with_echoed_ok() {
        let mut t = ScriptTransport::new();
        // Echo still on: the device repeats the command before answering.
        t.expect(b"AT\r", b"AT\r\r\nOK\r\n");
        let mut e = engine_with(t);
        assert!(e.send_command_ok(b"AT", 1000));
    }

    #[test]
    fn send_command_ok_false_on_error_reply() {
        let mut t = ScriptTransport::new();
        t.expect(b"AT\r", b"AT\r\r\nERROR\r\n");
        let mut e = engine_with(t);
        assert!(!e.send_command_ok(b"AT", 1000));
    }

    #[test]
    fn send_command_ok_false_on_silence() {
        let t = ScriptTransport::new();
        let mut e = engine_with(t);
        assert!(!e.send_command_ok(b"AT", 500));
    }

    #[test]
    fn send_command_drains_stale_input_first() {
        let mut t = ScriptTransport::new();
        t.push_rx(b"NORMAL POWER DOWN\r\n");
        t.expect(b"ATE0\r", b"\r\nOK\r\n");
        let mut e = AtEngine::with_diag(t, CaptureDiag::new());
        assert!(e.send_command_ok(b"ATE0", 1000));
    }

    #[test]
    fn traffic_is_mirrored_to_the_diag_sink() {
        let mut t = ScriptTransport::new();
        t.push_rx(b"stale\r\n");
        t.expect(b"AT\r", b"\r\nOK\r\n");
        let mut e = AtEngine::with_diag(t, CaptureDiag::new());
        assert!(e.send_command_ok(b"AT", 1000));
        // Every consumed byte appears in the mirror: the stale drain and
        // the full response.
        assert_eq!(e.diag().rx, b"stale\r\n\r\nOK\r\n".to_vec());
        assert_eq!(e.diag().tx, b"AT\r".to_vec());
    }

    #[test]
    fn with_diag_runs_csq_exchange_with_default_capacity() {
        let mut t = ScriptTransport::new();
        // Final OK ends in a bare CR; the grace window closes that line.
        t.push_rx(b"+CSQ: 18,0\r\nOK\r");
        let mut e = AtEngine::with_diag(t, CaptureDiag::new());
        let dl = e.deadline(1000);
        assert_eq!(e.wait_for_prefix(b"+CSQ:", dl), Ok(()));
        assert_eq!(extract_value(e.line(), 5), Ok(18));
        let dl = e.deadline(1000);
        assert_eq!(e.read_line(dl), Ok(2));
        assert_eq!(e.line(), b"OK");
    }

    #[test]
    fn with_line_cap_bounds_the_line_buffer() {
        let mut t = ScriptTransport::new();
        t.push_rx(b"ABCDEFGHIJ\r\n");
        let mut e = AtEngine::<_, _, 4>::with_line_cap(t, CaptureDiag::new());
        let dl = e.deadline(1000);
        assert_eq!(e.read_line(dl), Ok(4));
        assert_eq!(e.line(), b"ABCD");
    }

    // ── Prompt ──────────────────────────────────────────────────────

    #[test]
    fn wait_for_prompt_finds_prompt_after_echo() {
        let mut t = ScriptTransport::new();
        t.push_rx(b"AT+CMGS=\"123\"\r\n> ");
        let mut e = engine_with(t);
        let dl = e.deadline(1000);
        assert!(e.wait_for_prompt(b"> ", dl));
    }

    #[test]
    fn wait_for_prompt_false_on_timeout() {
        let mut t = ScriptTransport::new();
        t.push_rx(b"ERROR\r\n");
        let mut e = engine_with(t);
        let dl = e.deadline(200);
        assert!(!e.wait_for_prompt(b"> ", dl));
    }

    // ── Bulk reads ──────────────────────────────────────────────────

    #[test]
    fn read_exact_consumes_count_and_stores_up_to_capacity() {
        let mut t = ScriptTransport::new();
        t.push_rx(b"HELLOx");
        let mut e = engine_with(t);
        let mut out = [0u8; 3];
        let dl = e.deadline(1000);
        assert_eq!(e.read_exact(5, &mut out, dl), Ok(3));
        assert_eq!(&out, b"HEL");
        // The two overflow bytes were consumed; 'x' was not.
        let dl = e.deadline(1000);
        assert_eq!(e.read_exact(1, &mut out, dl), Ok(1));
        assert_eq!(out[0], b'x');
    }

    #[test]
    fn read_exact_times_out_when_short() {
        let mut t = ScriptTransport::new();
        t.push_rx(b"HI");
        let mut e = engine_with(t);
        let mut out = [0u8; 8];
        let dl = e.deadline(200);
        assert_eq!(e.read_exact(5, &mut out, dl), Err(Error::Timeout));
    }
}
