/// SIMx00 device helpers built on the command engine.
///
/// Everything here is plain engine consumption: liveness probing, echo
/// suppression, value queries, the signal-quality and network-registration
/// wait loops, SMS submission, and PWRKEY power sequencing. The bounded
/// retry loops the engine refuses to own live in this layer.

use embedded_hal::digital::{InputPin, OutputPin};
use heapless::Vec;

use crate::diag::{DiagSink, NullDiag};
use crate::engine::{extract_value, AtEngine, DEFAULT_OK_TIMEOUT_MS};
use crate::transport::{ByteTransport, Deadline};
use crate::Error;

/// Hold PWRKEY low this long before pulsing it, so the pulse always starts
/// from a known level.
const PWRKEY_SETTLE_MS: u32 = 200;

/// PWRKEY pulse width that toggles SIMx00 power state.
const PWRKEY_PULSE_MS: u32 = 2500;

/// How long to wait for the "NORMAL POWER DOWN" notice after pulsing off.
const POWER_DOWN_WAIT_MS: u32 = 4000;

/// Extra settle time after power-off before the supply is considered quiet.
const POWER_OFF_SETTLE_MS: u32 = 500;

/// Registration states reported by `AT+CREG?` that count as "on network".
const CREG_HOME: u32 = 1;
const CREG_ROAMING: u32 = 5;

/// Tunables for the modem helpers.
#[derive(Clone, Copy)]
pub struct ModemConfig {
    /// Minimum `AT+CSQ` value to accept as a usable connection.
    pub min_signal_quality: u32,
    /// Overall window for [`Modem::wait_for_signal_quality`].
    pub signal_window_ms: u32,
    /// Overall window for [`Modem::wait_for_registration`].
    pub registration_window_ms: u32,
    /// Per-query deadline for value-bearing replies.
    pub query_timeout_ms: u32,
    /// Deadline for an ordinary command/OK exchange.
    pub ok_timeout_ms: u32,
    /// Pause between attempts inside the wait loops.
    pub retry_pause_ms: u32,
    /// Deadline for the `"> "` prompt after `AT+CMGS`.
    pub prompt_timeout_ms: u32,
    /// Deadline for the final OK after an SMS body; the network round-trip
    /// makes this much longer than a local command.
    pub sms_ok_timeout_ms: u32,
}

impl ModemConfig {
    pub const fn new() -> Self {
        Self {
            min_signal_quality: 10,
            signal_window_ms: 30_000,
            registration_window_ms: 120_000,
            query_timeout_ms: 12_000,
            ok_timeout_ms: DEFAULT_OK_TIMEOUT_MS,
            retry_pause_ms: 500,
            prompt_timeout_ms: 4_000,
            sms_ok_timeout_ms: 30_000,
        }
    }
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// A SIMx00-class modem: an [`AtEngine`] plus the PWRKEY output and the
/// status input that frame its power state.
pub struct Modem<T, O, I, D = NullDiag>
where
    T: ByteTransport,
    O: OutputPin,
    I: InputPin,
    D: DiagSink,
{
    engine: AtEngine<T, D>,
    pwrkey: O,
    status: I,
    config: ModemConfig,
    echo_off: bool,
}

impl<T, O, I, D> Modem<T, O, I, D>
where
    T: ByteTransport,
    O: OutputPin,
    I: InputPin,
    D: DiagSink,
{
    pub fn new(engine: AtEngine<T, D>, pwrkey: O, status: I) -> Self {
        Self::with_config(engine, pwrkey, status, ModemConfig::new())
    }

    pub fn with_config(engine: AtEngine<T, D>, pwrkey: O, status: I, config: ModemConfig) -> Self {
        Self {
            engine,
            pwrkey,
            status,
            config,
            echo_off: false,
        }
    }

    /// Direct access to the engine, for commands this layer does not wrap.
    pub fn engine(&mut self) -> &mut AtEngine<T, D> {
        &mut self.engine
    }

    // ── Power sequencing ────────────────────────────────────────────

    /// Whether the status pin reports the device as powered.
    pub fn is_powered(&mut self) -> bool {
        self.status.is_high().unwrap_or(false)
    }

    /// Pulse PWRKEY. The same pulse switches the device on and off.
    fn toggle_pwrkey(&mut self) {
        let _ = self.pwrkey.set_low();
        self.engine.delay(PWRKEY_SETTLE_MS);
        let _ = self.pwrkey.set_high();
        self.engine.delay(PWRKEY_PULSE_MS);
        let _ = self.pwrkey.set_low();
    }

    /// Switch the device on and confirm it answers.
    ///
    /// The liveness probe can fail on a device that is still booting; the
    /// status pin has the final word.
    pub fn power_on(&mut self) -> bool {
        if !self.is_powered() {
            self.toggle_pwrkey();
        }
        if !self.is_alive() {
            log::debug!("powered on but not answering yet");
        }
        self.is_powered()
    }

    /// Switch the device off, waiting for its shutdown notice.
    pub fn power_off(&mut self) -> bool {
        if self.is_powered() {
            self.toggle_pwrkey();
            let dl = self.engine.deadline(POWER_DOWN_WAIT_MS);
            let _ = self.engine.wait_for_prefix(b"NORMAL POWER DOWN", dl);
            self.engine.delay(POWER_OFF_SETTLE_MS);
        }
        // Echo suppression does not survive a power cycle.
        self.echo_off = false;
        !self.is_powered()
    }

    // ── Liveness and session setup ──────────────────────────────────

    /// Probe with "AT", up to three attempts.
    pub fn is_alive(&mut self) -> bool {
        for _ in 0..3 {
            self.engine.send_command(b"AT");
            let dl = self.engine.deadline(self.config.ok_timeout_ms);
            if self.engine.wait_for_ok(dl) {
                return true;
            }
        }
        false
    }

    /// Suppress command echo (`ATE0`), once per power cycle.
    pub fn switch_echo_off(&mut self) {
        if !self.echo_off && self.engine.send_command_ok(b"ATE0", self.config.ok_timeout_ms) {
            self.echo_off = true;
        }
    }

    // ── Value queries ───────────────────────────────────────────────

    /// Send `cmd`, take the integer from the `prefix` reply line, then
    /// consume the trailing "OK".
    ///
    /// The canonical shape:
    /// ```text
    /// >> AT+CSQ
    /// << +CSQ: 18,0
    /// << OK
    /// ```
    pub fn query_int(&mut self, cmd: &[u8], prefix: &[u8]) -> Result<u32, Error> {
        self.engine.send_command(cmd);
        let dl = self.engine.deadline(self.config.query_timeout_ms);
        self.engine.wait_for_prefix(prefix, dl)?;
        let value = extract_value(self.engine.line(), prefix.len())?;
        self.finish_with_ok()?;
        Ok(value)
    }

    /// Send `cmd`, copy the remainder of the `prefix` reply line into `out`
    /// (truncating), then consume the trailing "OK". Returns the copied
    /// length.
    pub fn query_str(&mut self, cmd: &[u8], prefix: &[u8], out: &mut [u8]) -> Result<usize, Error> {
        self.engine.send_command(cmd);
        let dl = self.engine.deadline(self.config.query_timeout_ms);
        self.engine.wait_for_prefix(prefix, dl)?;
        let line = self.engine.line();
        let mut rest = &line[prefix.len()..];
        while let [b' ', tail @ ..] = rest {
            rest = tail;
        }
        let n = rest.len().min(out.len());
        out[..n].copy_from_slice(&rest[..n]);
        self.finish_with_ok()?;
        Ok(n)
    }

    /// Wait for the final token of a value query, distinguishing an
    /// explicit "ERROR" from silence.
    fn finish_with_ok(&mut self) -> Result<(), Error> {
        let final_tokens: [&[u8]; 2] = [b"OK", b"ERROR"];
        let dl = self.engine.deadline(self.config.ok_timeout_ms);
        match self.engine.wait_for_token(&final_tokens, dl)? {
            0 => Ok(()),
            _ => Err(Error::UnexpectedToken),
        }
    }

    /// Current signal quality (`AT+CSQ`), 0–31, 99 meaning unknown.
    pub fn signal_quality(&mut self) -> Result<u32, Error> {
        self.query_int(b"AT+CSQ", b"+CSQ:")
    }

    // ── Wait loops (caller-side retry policy) ───────────────────────

    /// Poll signal quality until it reaches the configured minimum.
    ///
    /// Gives up when the window closes or the device stops answering "AT"
    /// altogether — with no signal at all, further polling only burns
    /// battery.
    pub fn wait_for_signal_quality(&mut self) -> bool {
        let window = Deadline::after(self.engine.now(), self.config.signal_window_ms);
        while !window.expired(self.engine.now()) {
            if let Ok(csq) = self.signal_quality() {
                if csq >= self.config.min_signal_quality {
                    return true;
                }
            }
            self.engine.delay(self.config.retry_pause_ms);
            if !self.is_alive() {
                break;
            }
        }
        log::debug!("no usable signal");
        false
    }

    /// Poll `AT+CREG?` until the device is registered (home or roaming).
    pub fn wait_for_registration(&mut self) -> bool {
        let window = Deadline::after(self.engine.now(), self.config.registration_window_ms);
        while !window.expired(self.engine.now()) {
            self.engine.send_command(b"AT+CREG?");
            let dl = self.engine.deadline(self.config.query_timeout_ms);
            let mut stat = 0;
            if self.engine.wait_for_prefix(b"+CREG:", dl).is_ok() {
                stat = registration_stat(self.engine.line());
            }
            let dl = self.engine.deadline(self.config.ok_timeout_ms);
            let _ = self.engine.wait_for_ok(dl);
            if stat == CREG_HOME || stat == CREG_ROAMING {
                return true;
            }
            self.engine.delay(self.config.retry_pause_ms);
            if !self.is_alive() {
                break;
            }
        }
        log::debug!("not registered on the network");
        false
    }

    // ── SMS ─────────────────────────────────────────────────────────

    /// Send a text-mode SMS. The device must already be powered on.
    ///
    /// Waits for signal and registration, switches to text mode, then
    /// drives the `AT+CMGS` prompt exchange: command, `"> "` prompt, body,
    /// Ctrl-Z terminator, final OK.
    pub fn send_sms(&mut self, number: &str, text: &str) -> bool {
        self.switch_echo_off();
        if !self.wait_for_signal_quality() {
            return false;
        }
        if !self.wait_for_registration() {
            return false;
        }
        if !self.engine.send_command_ok(b"AT+CMGF=1", self.config.ok_timeout_ms) {
            return false;
        }

        let mut cmd: Vec<u8, 48> = Vec::new();
        let fits = cmd.extend_from_slice(b"AT+CMGS=\"").is_ok()
            && cmd.extend_from_slice(number.as_bytes()).is_ok()
            && cmd.push(b'"').is_ok();
        if !fits {
            log::debug!("destination number too long");
            return false;
        }

        self.engine.send_command(&cmd);
        let dl = self.engine.deadline(self.config.prompt_timeout_ms);
        if !self.engine.wait_for_prompt(b"> ", dl) {
            return false;
        }
        self.engine.write_raw(text.as_bytes());
        // Ctrl-Z ends the body and submits the message.
        self.engine.write_raw(&[0x1a]);
        let dl = self.engine.deadline(self.config.sms_ok_timeout_ms);
        self.engine.wait_for_ok(dl)
    }
}

/// The `<stat>` field of `+CREG: <n>,<stat>[,...]` — the digits after the
/// first comma. Unparseable replies count as "not registered".
fn registration_stat(line: &[u8]) -> u32 {
    line.iter()
        .position(|b| *b == b',')
        .and_then(|comma| extract_value(line, comma + 1).ok())
        .unwrap_or(0)
}
