use memchr::memmem;

/// Result of scanning one decoded chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Sentinel seen; every occurrence removed from the returned text.
    Found(String),
    /// No sentinel; text safe to emit now. A trailing partial match is held back.
    Clean(String),
}

/// Streaming sentinel detector.
///
/// Keeps the longest suffix of the scanned text that is a proper prefix of the
/// sentinel, so a token split across chunk boundaries is still detected.
pub struct SentinelScanner {
    sentinel: Box<str>,
    finder: memmem::Finder<'static>,
    carry: String,
}

impl SentinelScanner {
    #[must_use]
    pub fn new(sentinel: &str) -> Self {
        Self {
            sentinel: Box::from(sentinel),
            finder: memmem::Finder::new(sentinel.as_bytes()).into_owned(),
            carry: String::new(),
        }
    }

    #[must_use]
    pub fn sentinel(&self) -> &str {
        &self.sentinel
    }

    pub fn scan(&mut self, text: &str) -> ScanOutcome {
        let mut combined = std::mem::take(&mut self.carry);
        combined.push_str(text);

        if self.finder.find(combined.as_bytes()).is_some() {
            return ScanOutcome::Found(strip_all(&combined, &self.sentinel));
        }

        let hold = partial_match_len(combined.as_bytes(), &self.sentinel);
        if hold > 0 {
            self.carry = combined.split_off(combined.len() - hold);
        }
        ScanOutcome::Clean(combined)
    }

    /// Text held back as a possible sentinel prefix.
    pub fn take_carry(&mut self) -> String {
        std::mem::take(&mut self.carry)
    }

    #[must_use]
    pub fn carry(&self) -> &str {
        &self.carry
    }
}

/// Remove every occurrence of `sentinel` in one pass.
#[must_use]
pub fn strip_all(text: &str, sentinel: &str) -> String {
    text.replace(sentinel, "")
}

fn partial_match_len(haystack: &[u8], sentinel: &str) -> usize {
    let sentinel_bytes = sentinel.as_bytes();
    let max = sentinel_bytes.len().saturating_sub(1).min(haystack.len());
    (1..=max)
        .rev()
        .find(|&len| {
            sentinel.is_char_boundary(len) && haystack.ends_with(&sentinel_bytes[..len])
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_found_strips_all_occurrences() {
        let mut scanner = SentinelScanner::new("FINISHED");
        assert_eq!(scanner.sentinel(), "FINISHED");
        assert_eq!(
            scanner.scan("bar FINISHEDxyz"),
            ScanOutcome::Found("bar xyz".to_string())
        );
        let mut scanner = SentinelScanner::new("FINISHED");
        assert_eq!(
            scanner.scan("FINISHEDaFINISHEDb"),
            ScanOutcome::Found("ab".to_string())
        );
    }

    #[test]
    fn test_clean_text_unchanged() {
        let mut scanner = SentinelScanner::new("FINISHED");
        assert_eq!(
            scanner.scan("data: foo\n\n"),
            ScanOutcome::Clean("data: foo\n\n".to_string())
        );
        assert_eq!(scanner.carry(), "");
    }

    #[test]
    fn test_split_sentinel_across_chunks() {
        let mut scanner = SentinelScanner::new("FINISHED");
        assert_eq!(
            scanner.scan("data: hi FIN"),
            ScanOutcome::Clean("data: hi ".to_string())
        );
        assert_eq!(scanner.carry(), "FIN");
        assert_eq!(
            scanner.scan("ISHED\n\n"),
            ScanOutcome::Found("\n\n".to_string())
        );
        assert_eq!(scanner.carry(), "");
    }

    #[test]
    fn test_false_partial_is_released() {
        let mut scanner = SentinelScanner::new("FINISHED");
        assert_eq!(scanner.scan("FINAL F"), ScanOutcome::Clean("FINAL ".to_string()));
        assert_eq!(scanner.scan("oo"), ScanOutcome::Clean("Foo".to_string()));
        assert_eq!(scanner.take_carry(), "");
    }

    #[test]
    fn test_take_carry_on_end() {
        let mut scanner = SentinelScanner::new("FINISHED");
        let _ = scanner.scan("tail FINISH");
        assert_eq!(scanner.take_carry(), "FINISH");
        assert_eq!(scanner.carry(), "");
    }

    #[test]
    fn test_multibyte_sentinel_prefix_on_char_boundary() {
        let mut scanner = SentinelScanner::new("完成");
        assert_eq!(scanner.scan("好完"), ScanOutcome::Clean("好".to_string()));
        assert_eq!(scanner.scan("成!"), ScanOutcome::Found("!".to_string()));
    }
}
