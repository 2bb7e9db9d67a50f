//! Line framer for `\r\n`-delimited text.

/// Delimiter separating incoming frames.
pub const LINE_DELIMITER: &str = "\r\n";

/// Stateful accumulator that turns text fragments into complete lines.
///
/// Text that does not yet end in [`LINE_DELIMITER`] is kept pending and
/// prefixed to the next fragment, so a line split across any number of
/// fragments (including a delimiter split between two fragments) is emitted
/// exactly once. The pending text never contains a delimiter.
#[derive(Debug, Default, Clone)]
pub struct LineFramer {
    pending: String,
}

impl LineFramer {
    /// Create a framer with an empty pending buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `fragment` and return every line it completed, in order.
    ///
    /// Returns an empty vector when the fragment does not complete a line.
    pub fn feed(&mut self, fragment: &str) -> Vec<String> {
        self.pending.push_str(fragment);

        let Some(last) = self.pending.rfind(LINE_DELIMITER) else {
            return Vec::new();
        };

        let rest = self.pending.split_off(last + LINE_DELIMITER.len());
        let complete = std::mem::replace(&mut self.pending, rest);

        complete
            .strip_suffix(LINE_DELIMITER)
            .unwrap_or(&complete)
            .split(LINE_DELIMITER)
            .map(str::to_owned)
            .collect()
    }

    /// Take whatever is pending, possibly an empty string.
    ///
    /// Called once the byte source reaches end of stream so a trailing
    /// unterminated line is not lost.
    pub fn flush(&mut self) -> String {
        std::mem::take(&mut self.pending)
    }

    /// Text received so far that does not end in a delimiter.
    #[must_use]
    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Drop the pending text, returning how many bytes were discarded.
    ///
    /// A trailing `\r` is kept: it may be the first half of a delimiter
    /// whose `\n` arrives with the next fragment.
    pub fn discard_pending(&mut self) -> usize {
        let keep = usize::from(self.pending.ends_with('\r'));
        let discarded = self.pending.len() - keep;
        self.pending.replace_range(..discarded, "");
        discarded
    }
}
