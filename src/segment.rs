//! Transcript segmentation on spoken trigger phrases
//!
//! A transcript is cut into issues wherever a `nextIssue` phrase (or an
//! explicit ordinal such as "issue 3") is spoken, and truncated at the first
//! `stop` phrase. Matching is case-insensitive and tolerant of the punctuation
//! speech engines like to insert between words ("Next, issue.").

use regex::{Regex, RegexBuilder};

/// Characters allowed between the words of a trigger phrase.
const WORD_GAP: &str = r"[\s,.;:!?-]+";

/// "issue 2", "issue number 3": explicit ordinal boundary.
const ORDINAL_PATTERN: &str = r"\bissue\s+(?:number\s+)?\d+\b";

/// Characters stripped from both ends of a segment.
const TRIM_CHARS: [char; 5] = ['.', ',', ';', ':', '-'];

/// Splits transcripts into issue texts.
#[derive(Debug, Clone)]
pub struct Segmenter {
    /// Any `nextIssue` phrase or an ordinal marker
    boundary: Regex,
    /// Any `stop` phrase, if at least one is configured
    stop: Option<Regex>,
}

impl Segmenter {
    /// Compile the phrase sets. Blank phrases are ignored.
    pub fn new(next_issue: &[String], stop: &[String]) -> Result<Self, regex::Error> {
        let mut boundaries: Vec<String> = next_issue
            .iter()
            .filter_map(|phrase| phrase_pattern(phrase))
            .collect();
        boundaries.push(ORDINAL_PATTERN.to_owned());
        let boundary = compile(&boundaries)?;

        let stops: Vec<String> = stop
            .iter()
            .filter_map(|phrase| phrase_pattern(phrase))
            .collect();
        let stop = if stops.is_empty() {
            None
        } else {
            Some(compile(&stops)?)
        };

        Ok(Self { boundary, stop })
    }

    /// Split one complete transcript into trimmed, non-empty segments in spoken order.
    pub fn split(&self, transcript: &str) -> Vec<String> {
        let body = self.before_stop(transcript).unwrap_or(transcript);
        let mut segments = Vec::new();
        let mut start = 0;
        for boundary in self.boundary.find_iter(body) {
            push_segment(&mut segments, body.get(start..boundary.start()).unwrap_or_default());
            start = boundary.end();
        }
        push_segment(&mut segments, body.get(start..).unwrap_or_default());
        segments
    }

    /// Start an incremental segmentation over transcript chunks.
    pub const fn stream(&self) -> SegmentStream<'_> {
        SegmentStream {
            segmenter: self,
            buffer: String::new(),
            stopped: false,
        }
    }

    /// Text preceding the first stop phrase, or `None` if no stop phrase occurs.
    fn before_stop<'t>(&self, text: &'t str) -> Option<&'t str> {
        let found = self.stop.as_ref()?.find(text)?;
        text.get(..found.start())
    }
}

/// Incremental segmenter fed with transcript chunks as they arrive.
///
/// A segment is emitted once a later boundary confirms it ended. A boundary
/// touching the end of the buffered text is held back until more text arrives,
/// so phrases split across chunks ("next iss" + "ue") are still recognized.
/// Chunks are concatenated verbatim.
#[derive(Debug)]
pub struct SegmentStream<'a> {
    /// Phrase matcher
    segmenter: &'a Segmenter,
    /// Text not yet attributed to an emitted segment
    buffer: String,
    /// Set once a stop phrase was heard
    stopped: bool,
}

impl SegmentStream<'_> {
    /// Feed one chunk, returning the segments it completed.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        if self.stopped {
            return Vec::new();
        }
        self.buffer.push_str(chunk);

        if let Some(body) = self.segmenter.before_stop(&self.buffer) {
            let segments = self.segmenter.split(body);
            self.stopped = true;
            self.buffer.clear();
            return segments;
        }

        let mut segments = Vec::new();
        let mut consumed = 0;
        for boundary in self.segmenter.boundary.find_iter(&self.buffer) {
            if boundary.end() >= self.buffer.len() {
                break;
            }
            push_segment(
                &mut segments,
                self.buffer.get(consumed..boundary.start()).unwrap_or_default(),
            );
            consumed = boundary.end();
        }
        self.buffer.drain(..consumed);
        segments
    }

    /// Whether a stop phrase ended the stream.
    pub const fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Flush whatever is left after the last boundary.
    pub fn finish(self) -> Vec<String> {
        if self.stopped {
            return Vec::new();
        }
        self.segmenter.split(&self.buffer)
    }
}

/// Regex source for one phrase, or `None` for a blank phrase.
fn phrase_pattern(phrase: &str) -> Option<String> {
    let words: Vec<String> = phrase
        .split(|c: char| c.is_whitespace() || TRIM_CHARS.contains(&c) || c == '!' || c == '?')
        .filter(|word| !word.is_empty())
        .map(regex::escape)
        .collect();
    let first = words.first()?;
    let last = words.last()?;

    let lead = if first.starts_with(char::is_alphanumeric) { r"\b" } else { "" };
    let tail = if last.ends_with(char::is_alphanumeric) { r"\b" } else { "" };
    Some(format!("{lead}{}{tail}", words.join(WORD_GAP)))
}

/// Case-insensitive alternation of the given patterns.
fn compile(patterns: &[String]) -> Result<Regex, regex::Error> {
    let alternation = patterns
        .iter()
        .map(|p| format!("(?:{p})"))
        .collect::<Vec<_>>()
        .join("|");
    RegexBuilder::new(&alternation).case_insensitive(true).build()
}

/// Normalize a raw slice and keep it if anything is left.
fn push_segment(segments: &mut Vec<String>, raw: &str) {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_matches(|c: char| c.is_whitespace() || TRIM_CHARS.contains(&c));
    if !trimmed.is_empty() {
        segments.push(trimmed.to_owned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_segmenter() -> Segmenter {
        let next = vec!["next issue".to_owned(), "next point".to_owned()];
        let stop = vec!["end issues".to_owned(), "stop issues".to_owned()];
        Segmenter::new(&next, &stop).unwrap()
    }

    #[test]
    fn splits_on_next_issue_and_drops_after_stop() {
        let segments =
            default_segmenter().split("first issue next issue second issue end issues extra talk");
        assert_eq!(segments, vec!["first issue", "second issue"]);
    }

    #[test]
    fn stop_phrase_alone_yields_nothing() {
        assert!(default_segmenter().split("End issues.").is_empty());
        assert!(default_segmenter().split("  stop issues and more words").is_empty());
    }

    #[test]
    fn transcript_without_boundaries_is_one_segment() {
        let segments = default_segmenter().split("  the save button does nothing  ");
        assert_eq!(segments, vec!["the save button does nothing"]);
        assert!(default_segmenter().split("  \n ").is_empty());
    }

    #[test]
    fn consecutive_boundaries_do_not_create_empty_entries() {
        let segments =
            default_segmenter().split("next issue next point alpha next issue. next issue beta");
        assert_eq!(segments, vec!["alpha", "beta"]);
    }

    #[test]
    fn matching_ignores_case_and_punctuation() {
        let segments = default_segmenter().split("Login is slow. Next, issue: Crash on save. END ISSUES");
        assert_eq!(segments, vec!["Login is slow", "Crash on save"]);
    }

    #[test]
    fn ordinal_markers_are_boundaries() {
        let segments =
            default_segmenter().split("issue 1 broken login issue number 2 slow page issue 3");
        assert_eq!(segments, vec!["broken login", "slow page"]);
    }

    #[test]
    fn words_containing_phrases_do_not_match() {
        let segments = default_segmenter().split("the nextissue field and tissue box");
        assert_eq!(segments, vec!["the nextissue field and tissue box"]);
    }

    #[test]
    fn line_breaks_are_collapsed() {
        let segments = default_segmenter().split("menu\n  overlaps\tfooter next issue ok");
        assert_eq!(segments, vec!["menu overlaps footer", "ok"]);
    }

    #[test]
    fn n_boundaries_yield_n_plus_one_segments() {
        let segmenter = default_segmenter();
        for n in 0..6 {
            let parts: Vec<String> = (0..=n).map(|i| format!("problem {i} here")).collect();
            let transcript = parts.join(" next issue ");
            let segments = segmenter.split(&transcript);
            assert_eq!(segments.len(), n + 1, "transcript: {transcript}");
            assert_eq!(segments, parts);
        }
    }

    #[test]
    fn nothing_after_stop_survives() {
        let segmenter = default_segmenter();
        let transcript = "keep this next issue and this stop issues secret next issue hidden";
        for segment in segmenter.split(transcript) {
            assert!(!segment.contains("secret"), "leaked: {segment}");
            assert!(!segment.contains("hidden"), "leaked: {segment}");
        }
    }

    #[test]
    fn empty_phrase_sets_only_use_ordinals() {
        let segmenter = Segmenter::new(&[String::new()], &[]).unwrap();
        assert_eq!(
            segmenter.split("a next issue b issue 2 c"),
            vec!["a next issue b", "c"]
        );
    }

    #[test]
    fn stream_emits_confirmed_segments() {
        let segmenter = default_segmenter();
        let mut stream = segmenter.stream();
        assert!(stream.push("first problem next iss").is_empty());
        assert_eq!(stream.push("ue second"), vec!["first problem"]);
        assert!(stream.push(" problem next issue").is_empty());
        assert_eq!(stream.push(" third"), vec!["second problem"]);
        assert_eq!(stream.finish(), vec!["third"]);
    }

    #[test]
    fn stream_stops_on_split_stop_phrase() {
        let segmenter = default_segmenter();
        let mut stream = segmenter.stream();
        assert!(stream.push("alpha end iss").is_empty());
        assert_eq!(stream.push("ues beta"), vec!["alpha"]);
        assert!(stream.is_stopped());
        assert!(stream.push(" next issue gamma").is_empty());
        assert!(stream.finish().is_empty());
    }

    #[test]
    fn stream_holds_back_ordinal_at_buffer_end() {
        let segmenter = default_segmenter();
        let mut stream = segmenter.stream();
        assert!(stream.push("alpha issue 1").is_empty());
        assert_eq!(stream.push("2 beta"), vec!["alpha"]);
        assert_eq!(stream.finish(), vec!["beta"]);
    }
}
