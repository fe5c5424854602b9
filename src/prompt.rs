/// Inline prompt detection.
///
/// Before accepting raw payload bytes (SMS body, bulk upload), SIMx00-class
/// devices emit a short literal prompt — typically `"> "` — that is not a
/// full line and so cannot go through the line reader. [`PromptMatcher`]
/// scans the byte stream for it directly.

/// Byte-at-a-time matcher for a short literal prompt.
///
/// Matching restarts from the beginning on any mismatch; prompts are two or
/// three bytes in practice, so a real failure-function automaton would buy
/// nothing. CR bytes are transparent and LF restarts the match, which makes
/// unmatched response lines ahead of the prompt harmless.
pub struct PromptMatcher<'p> {
    prompt: &'p [u8],
    matched: usize,
}

impl<'p> PromptMatcher<'p> {
    pub fn new(prompt: &'p [u8]) -> Self {
        Self { prompt, matched: 0 }
    }

    /// Feed one received byte. Returns true once the full prompt has been
    /// seen; an empty prompt matches immediately.
    pub fn feed(&mut self, byte: u8) -> bool {
        match byte {
            b'\r' => {}
            b'\n' => self.matched = 0,
            _ => {
                if self.prompt.get(self.matched) == Some(&byte) {
                    self.matched += 1;
                } else {
                    self.matched = 0;
                }
            }
        }
        self.matched == self.prompt.len()
    }
}
