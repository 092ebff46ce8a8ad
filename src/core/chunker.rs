//! Incremental chunking of generated text into speakable spans.
//!
//! A text generator produces an open-ended stream of fragments (tokens,
//! words, punctuation). Synthesizing fragment-by-fragment sounds robotic and
//! synthesizing only at the end wastes the stream; this module decides, after
//! every appended fragment, whether enough text has accumulated to cut a
//! natural-sounding unit.
//!
//! Cut triggers, in priority order:
//!
//! 1. **Sentence mark** (`.` `!` `?` or newline): cut directly after the last
//!    mark in the buffer.
//! 2. **Clause mark** (`,` `;` `:` ` - ` ` – `): arms a cut; the cut lands at
//!    the furthest word-safe position in the buffer (the last whitespace, or
//!    the mark itself when no whitespace follows it), so complete words that
//!    are already buffered ride along with the clause.
//! 3. **Length fallback**: once the buffer exceeds the configured size, cut
//!    at the last whitespace before the limit and keep the dangling partial
//!    word buffered.
//!
//! Spans never end mid-word, with one documented exception: [`SynthesisChunker::finish`]
//! flushes whatever remains when the fragment stream ends, and if the stream
//! itself stopped mid-word the final span mirrors that truncation.
//!
//! Concatenating all emitted spans reproduces the concatenated fragments
//! exactly, up to whitespace trimmed at span boundaries.

use tracing::trace;

/// Why a span was cut where it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanBoundary {
    /// Ended at a sentence mark.
    Sentence,
    /// Ended at a clause mark or the word boundary following it.
    Clause,
    /// Forced by the buffer size limit.
    Length,
    /// Final flush at end of the fragment stream.
    Flush,
}

/// A non-empty, whitespace-trimmed piece of text ready for synthesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizableSpan {
    pub text: String,
    pub boundary: SpanBoundary,
}

/// Configuration for [`SynthesisChunker`].
#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    /// Buffer size (in characters) past which a cut is forced at the last
    /// word boundary. Default: 80.
    pub max_buffered_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_buffered_chars: 80,
        }
    }
}

impl ChunkerConfig {
    pub fn with_max_buffered_chars(mut self, chars: usize) -> Self {
        self.max_buffered_chars = chars;
        self
    }
}

/// Accumulates text fragments and emits speakable spans.
///
/// Single-writer, synchronous: one instance per turn, driven by the task
/// consuming the generator stream. Malformed input cannot make it fail; an
/// unterminated stream is handled by the forced final flush.
pub struct SynthesisChunker {
    config: ChunkerConfig,
    buffer: String,
}

impl SynthesisChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self {
            config,
            buffer: String::new(),
        }
    }

    /// Append one fragment and return every span that became ready.
    ///
    /// Usually returns zero or one span; a fragment carrying several sentence
    /// marks can release more.
    pub fn push(&mut self, fragment: &str) -> Vec<SynthesizableSpan> {
        self.buffer.push_str(fragment);

        let mut spans = Vec::new();
        while let Some((cut, boundary)) = self.find_cut() {
            if let Some(span) = self.cut_at(cut, boundary) {
                trace!(text = %span.text, boundary = ?span.boundary, "span ready");
                spans.push(span);
            }
        }
        spans
    }

    /// Flush the remaining buffer as a final span, regardless of boundary
    /// quality. Returns `None` when nothing but whitespace is left.
    pub fn finish(&mut self) -> Option<SynthesizableSpan> {
        let rest = std::mem::take(&mut self.buffer);
        let text = rest.trim();
        if text.is_empty() {
            return None;
        }
        Some(SynthesizableSpan {
            text: text.to_string(),
            boundary: SpanBoundary::Flush,
        })
    }

    /// Characters currently buffered.
    pub fn pending_chars(&self) -> usize {
        self.buffer.chars().count()
    }

    /// Locate the next cut position (a byte index on a char boundary) and
    /// its kind, or `None` if the buffer should keep accumulating.
    fn find_cut(&self) -> Option<(usize, SpanBoundary)> {
        if let Some(idx) = self.buffer.rfind(['.', '!', '?', '\n']) {
            // Sentence marks are single-byte.
            return Some((idx + 1, SpanBoundary::Sentence));
        }

        if let Some(mark_end) = self.last_clause_mark_end() {
            let cut = self.last_whitespace_end().map_or(mark_end, |ws| ws.max(mark_end));
            return Some((cut, SpanBoundary::Clause));
        }

        if self.pending_chars() > self.config.max_buffered_chars {
            if let Some(cut) = self.length_fallback_cut() {
                return Some((cut, SpanBoundary::Length));
            }
        }

        None
    }

    /// Byte position just past the last clause mark, if any.
    fn last_clause_mark_end(&self) -> Option<usize> {
        let mut end: Option<usize> = None;
        if let Some(idx) = self.buffer.rfind([',', ';', ':']) {
            end = Some(idx + 1);
        }
        for dash in [" - ", " – "] {
            if let Some(idx) = self.buffer.rfind(dash) {
                let candidate = idx + dash.len();
                if end.is_none_or(|e| candidate > e) {
                    end = Some(candidate);
                }
            }
        }
        end
    }

    /// Byte position just past the last whitespace character, if any.
    fn last_whitespace_end(&self) -> Option<usize> {
        let idx = self.buffer.rfind(char::is_whitespace)?;
        let ws = self.buffer[idx..].chars().next()?;
        Some(idx + ws.len_utf8())
    }

    /// Last word boundary strictly before the size limit.
    fn length_fallback_cut(&self) -> Option<usize> {
        let limit_byte = self
            .buffer
            .char_indices()
            .nth(self.config.max_buffered_chars)
            .map_or(self.buffer.len(), |(idx, _)| idx);
        let head = &self.buffer[..limit_byte];
        let idx = head.rfind(char::is_whitespace)?;
        let ws = head[idx..].chars().next()?;
        Some(idx + ws.len_utf8())
    }

    /// Split the buffer at `cut`, returning the trimmed head as a span.
    ///
    /// Whitespace on either side of the cut is dropped; a head that trims to
    /// nothing yields no span but still shrinks the buffer.
    fn cut_at(&mut self, cut: usize, boundary: SpanBoundary) -> Option<SynthesizableSpan> {
        debug_assert!(cut > 0 && self.buffer.is_char_boundary(cut));
        let text = self.buffer[..cut].trim().to_string();
        self.buffer = self.buffer[cut..].trim_start().to_string();
        if text.is_empty() {
            return None;
        }
        Some(SynthesizableSpan { text, boundary })
    }
}

impl Default for SynthesisChunker {
    fn default() -> Self {
        Self::new(ChunkerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker() -> SynthesisChunker {
        SynthesisChunker::default()
    }

    /// Feed fragments, collect every span including the final flush.
    fn run(fragments: &[&str], config: ChunkerConfig) -> Vec<SynthesizableSpan> {
        let mut c = SynthesisChunker::new(config);
        let mut spans = Vec::new();
        for f in fragments {
            spans.extend(c.push(f));
        }
        spans.extend(c.finish());
        spans
    }

    fn texts(spans: &[SynthesizableSpan]) -> Vec<&str> {
        spans.iter().map(|s| s.text.as_str()).collect()
    }

    #[test]
    fn test_streamed_greeting_scenario() {
        let mut c = chunker();

        assert!(c.push("Hall").is_empty());

        let spans = c.push("o, wie ");
        assert_eq!(texts(&spans), ["Hallo, wie"]);
        assert_eq!(spans[0].boundary, SpanBoundary::Clause);

        assert!(c.push("geht es ").is_empty());

        let spans = c.push("dir?");
        assert_eq!(texts(&spans), ["geht es dir?"]);
        assert_eq!(spans[0].boundary, SpanBoundary::Sentence);

        assert!(c.finish().is_none());
    }

    #[test]
    fn test_sentence_cut_at_last_mark() {
        let mut c = chunker();
        let spans = c.push("One. Two. Thr");
        assert_eq!(texts(&spans), ["One. Two."]);
        assert_eq!(c.finish().unwrap().text, "Thr");
    }

    #[test]
    fn test_newline_counts_as_sentence_mark() {
        let mut c = chunker();
        let spans = c.push("Erste Zeile\nzweite");
        assert_eq!(texts(&spans), ["Erste Zeile"]);
        assert_eq!(spans[0].boundary, SpanBoundary::Sentence);
        assert_eq!(c.finish().unwrap().text, "zweite");
    }

    #[test]
    fn test_clause_cut_without_following_whitespace() {
        let mut c = chunker();
        let spans = c.push("a,b");
        assert_eq!(texts(&spans), ["a,"]);
        assert_eq!(c.finish().unwrap().text, "b");
    }

    #[test]
    fn test_clause_cut_keeps_partial_word_buffered() {
        let mut c = chunker();
        let spans = c.push("Hallo, wie geht");
        // "geht" may still grow; the cut stops at the preceding whitespace.
        assert_eq!(texts(&spans), ["Hallo, wie"]);
        let spans = c.push(" es weiter?");
        assert_eq!(texts(&spans), ["geht es weiter?"]);
    }

    #[test]
    fn test_en_dash_clause_break() {
        let mut c = chunker();
        let spans = c.push("warte – mal");
        assert_eq!(texts(&spans), ["warte –"]);
        assert_eq!(spans[0].boundary, SpanBoundary::Clause);
        assert_eq!(c.finish().unwrap().text, "mal");
    }

    #[test]
    fn test_hyphen_clause_break() {
        let mut c = chunker();
        let spans = c.push("so - und dann");
        assert_eq!(texts(&spans), ["so - und"]);
    }

    #[test]
    fn test_length_fallback_emits_complete_words() {
        let config = ChunkerConfig::default().with_max_buffered_chars(20);
        let mut c = SynthesisChunker::new(config);

        let spans = c.push("alpha beta gamma delta epsilon");
        assert!(!spans.is_empty());
        assert_eq!(spans[0].boundary, SpanBoundary::Length);
        for span in &spans {
            assert!(span.text.chars().count() <= 20);
        }
        // The dangling tail comes out on finish.
        let tail = c.finish().unwrap();
        assert_eq!(tail.boundary, SpanBoundary::Flush);

        let all: Vec<String> = spans
            .iter()
            .map(|s| s.text.clone())
            .chain(std::iter::once(tail.text))
            .collect();
        assert_eq!(all.join(" "), "alpha beta gamma delta epsilon");
    }

    #[test]
    fn test_single_giant_word_is_never_split() {
        let config = ChunkerConfig::default().with_max_buffered_chars(10);
        let mut c = SynthesisChunker::new(config);
        let word = "Donaudampfschifffahrtsgesellschaft";
        assert!(c.push(word).is_empty());
        assert!(c.push(word).is_empty());
        // Only the forced final flush may emit it.
        let span = c.finish().unwrap();
        assert_eq!(span.text, format!("{word}{word}"));
        assert_eq!(span.boundary, SpanBoundary::Flush);
    }

    #[test]
    fn test_punctuation_only_fragment_does_not_stall() {
        let mut c = chunker();
        assert!(c.push("Genau").is_empty());
        let spans = c.push(".");
        assert_eq!(texts(&spans), ["Genau."]);
        assert_eq!(c.pending_chars(), 0);

        // The chunker keeps accepting input after the buffer was consumed.
        let spans = c.push("Und dann?");
        assert_eq!(texts(&spans), ["Und dann?"]);
    }

    #[test]
    fn test_lone_punctuation_fragment_is_emitted() {
        let mut c = chunker();
        let spans = c.push("?");
        assert_eq!(texts(&spans), ["?"]);
    }

    #[test]
    fn test_multiple_sentences_in_one_fragment() {
        let spans = run(&["Ja. Nein. Vielleicht."], ChunkerConfig::default());
        assert_eq!(texts(&spans), ["Ja. Nein. Vielleicht."]);
    }

    #[test]
    fn test_finish_on_empty_buffer() {
        let mut c = chunker();
        assert!(c.finish().is_none());
        c.push("Hi there.");
        assert!(c.finish().is_none());
    }

    #[test]
    fn test_whitespace_only_fragments() {
        let mut c = chunker();
        assert!(c.push("   ").is_empty());
        assert!(c.push("\t ").is_empty());
        assert!(c.finish().is_none());
    }

    /// Non-whitespace characters survive any fragmentation in order.
    #[test]
    fn test_text_preservation_across_fragmentations() {
        let text = "Die KI erklärt: Sprache ist komplex, aber – mit Übung – lernbar. Wirklich!";
        let reference: String = text.chars().filter(|c| !c.is_whitespace()).collect();

        for chunk_size in [1usize, 2, 3, 5, 7, 11, 200] {
            let chars: Vec<char> = text.chars().collect();
            let fragments: Vec<String> = chars
                .chunks(chunk_size)
                .map(|c| c.iter().collect())
                .collect();
            let fragment_refs: Vec<&str> = fragments.iter().map(String::as_str).collect();

            let spans = run(&fragment_refs, ChunkerConfig::default());
            let reconstructed: String = spans
                .iter()
                .flat_map(|s| s.text.chars())
                .filter(|c| !c.is_whitespace())
                .collect();

            assert_eq!(
                reconstructed, reference,
                "characters lost or duplicated at chunk size {chunk_size}"
            );
        }
    }

    /// A span may only end with an alphanumeric character when the source
    /// text had whitespace right after the corresponding position.
    #[test]
    fn test_word_safety() {
        let text = "Guten Morgen, hier spricht der Assistent. Alles klar soweit";
        let chars: Vec<char> = text.chars().collect();
        let fragments: Vec<String> = chars.chunks(4).map(|c| c.iter().collect()).collect();
        let fragment_refs: Vec<&str> = fragments.iter().map(String::as_str).collect();

        let spans = run(&fragment_refs, ChunkerConfig::default());

        // Walk the source text in parallel with the spans, skipping
        // whitespace, and check the character following each span end.
        let source: Vec<char> = text.chars().collect();
        let mut pos = 0usize;
        for (i, span) in spans.iter().enumerate() {
            for ch in span.text.chars().filter(|c| !c.is_whitespace()) {
                while source[pos].is_whitespace() {
                    pos += 1;
                }
                assert_eq!(source[pos], ch);
                pos += 1;
            }
            let is_final = i == spans.len() - 1;
            let last = span.text.chars().next_back().unwrap();
            if !is_final && last.is_alphanumeric() {
                assert!(
                    pos >= source.len() || source[pos].is_whitespace(),
                    "span {i:?} ended inside a word: {:?}",
                    span.text
                );
            }
        }
    }

    #[test]
    fn test_umlauts_and_multibyte_boundaries() {
        let mut c = SynthesisChunker::new(ChunkerConfig::default().with_max_buffered_chars(12));
        let mut spans = Vec::new();
        for fragment in ["Schö", "ne Grü", "ße für", " müde Bären"] {
            spans.extend(c.push(fragment));
        }
        spans.extend(c.finish());
        let joined: String = spans
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        assert_eq!(joined, "Schöne Grüße für müde Bären");
    }
}
