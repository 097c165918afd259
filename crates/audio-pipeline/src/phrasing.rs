//! Splits streamed brain tokens into phrases for incremental TTS
//! (§4.F Synthesiser): sentence or comma boundaries, capped by a
//! maximum character budget so one run-on clause can't block playback.

const MAX_PHRASE_CHARS: usize = 160;

pub struct PhraseSplitter {
    buffer: String,
}

impl Default for PhraseSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl PhraseSplitter {
    pub fn new() -> Self {
        Self { buffer: String::new() }
    }

    /// Feed one token chunk. Returns zero or more phrases now ready to
    /// synthesise, in order.
    pub fn push(&mut self, token: &str) -> Vec<String> {
        self.buffer.push_str(token);
        let mut ready = Vec::new();

        loop {
            if let Some(boundary) = find_boundary(&self.buffer) {
                let phrase: String = self.buffer.drain(..=boundary).collect();
                let trimmed = phrase.trim();
                if !trimmed.is_empty() {
                    ready.push(trimmed.to_string());
                }
                continue;
            }
            if self.buffer.len() >= MAX_PHRASE_CHARS {
                let phrase = std::mem::take(&mut self.buffer);
                let trimmed = phrase.trim();
                if !trimmed.is_empty() {
                    ready.push(trimmed.to_string());
                }
            }
            break;
        }
        ready
    }

    /// Flush any remaining buffered text as a final phrase.
    pub fn flush(&mut self) -> Option<String> {
        let remaining = std::mem::take(&mut self.buffer);
        let trimmed = remaining.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

/// Split non-streamed assistant text directly into phrases (used when
/// streaming is disabled — the whole reply arrives at once).
pub fn split_text(text: &str) -> Vec<String> {
    let mut splitter = PhraseSplitter::new();
    let mut phrases = splitter.push(text);
    if let Some(last) = splitter.flush() {
        phrases.push(last);
    }
    phrases
}

fn find_boundary(buffer: &str) -> Option<usize> {
    buffer
        .char_indices()
        .find(|(_, c)| matches!(c, '.' | '!' | '?' | ','))
        .map(|(i, c)| i + c.len_utf8() - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_sentence_boundary() {
        let mut splitter = PhraseSplitter::new();
        let phrases = splitter.push("We're open 9 to 5. Anything else?");
        assert_eq!(phrases, vec!["We're open 9 to 5."]);
        let rest = splitter.flush().unwrap();
        assert_eq!(rest, "Anything else?");
    }

    #[test]
    fn splits_on_comma_boundary() {
        let mut splitter = PhraseSplitter::new();
        let phrases = splitter.push("Sure, one moment");
        assert_eq!(phrases, vec!["Sure,"]);
    }

    #[test]
    fn forces_split_past_max_chars_with_no_punctuation() {
        let mut splitter = PhraseSplitter::new();
        let long_token = "a".repeat(200);
        let phrases = splitter.push(&long_token);
        assert_eq!(phrases.len(), 1);
        assert_eq!(phrases[0].len(), 200);
    }

    #[test]
    fn flush_returns_none_when_empty() {
        let mut splitter = PhraseSplitter::new();
        assert!(splitter.flush().is_none());
    }

    #[test]
    fn split_text_handles_whole_reply_at_once() {
        let phrases = split_text("Hello there. How can I help?");
        assert_eq!(phrases, vec!["Hello there.", "How can I help?"]);
    }
}
