//! Markdown checklist model
//!
//! The checklist file is parsed into a list of lines, each either an issue
//! entry or an opaque line (header, blank line, notes written by hand) that is
//! written back untouched. Entry lines keep their original bytes until they are
//! mutated, so rendering an unmodified checklist reproduces the input exactly.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;

/// Title written at the top of a freshly created checklist.
pub const HEADER_TITLE: &str = "Voice Issues";

/// Format of completion and header timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Lifecycle state of an issue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssueState {
    /// `[ ]` not started
    Pending,
    /// `[~]` picked up by the automation agent
    WorkingOn,
    /// `[x]` finished, optionally with a completion stamp and note
    Done,
    /// `[w]` deferred
    Waitlisted,
}

impl IssueState {
    /// Display order used when grouping entries.
    pub const ALL: [Self; 4] = [Self::Pending, Self::WorkingOn, Self::Done, Self::Waitlisted];

    /// Character written between the checkbox brackets.
    pub const fn marker(self) -> char {
        match self {
            Self::Pending => ' ',
            Self::WorkingOn => '~',
            Self::Done => 'x',
            Self::Waitlisted => 'w',
        }
    }

    /// Parse the text between the checkbox brackets.
    fn from_marker(marker: &str) -> Option<Self> {
        match marker {
            "" | " " => Some(Self::Pending),
            "~" => Some(Self::WorkingOn),
            "x" | "X" => Some(Self::Done),
            "w" | "W" => Some(Self::Waitlisted),
            _ => None,
        }
    }
}

impl fmt::Display for IssueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::WorkingOn => "working_on",
            Self::Done => "done",
            Self::Waitlisted => "waitlisted",
        };
        f.write_str(name)
    }
}

impl FromStr for IssueState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "pending" | "todo" | "open" => Ok(Self::Pending),
            "working_on" | "working" | "wip" => Ok(Self::WorkingOn),
            "done" | "completed" | "complete" => Ok(Self::Done),
            "waitlisted" | "waitlist" | "wait" => Ok(Self::Waitlisted),
            other => Err(format!(
                "unknown state '{other}' (expected pending, working_on, done or waitlisted)"
            )),
        }
    }
}

/// One spoken issue as stored in the checklist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueEntry {
    /// Issue text, single line, never empty
    pub text: String,
    /// Checkbox state
    pub state: IssueState,
    /// Annotation attached when the entry was marked done
    pub note: Option<String>,
    /// When the entry was marked done
    pub completed_at: Option<NaiveDateTime>,
}

impl IssueEntry {
    /// New pending entry; `None` if the text is blank.
    pub fn pending(text: &str) -> Option<Self> {
        let text = single_line(text);
        (!text.is_empty()).then_some(Self {
            text,
            state: IssueState::Pending,
            note: None,
            completed_at: None,
        })
    }

    /// Canonical checklist line for this entry.
    pub fn render(&self) -> String {
        let mut line = format!("- [{}] {}", self.state.marker(), self.text);
        if self.state == IssueState::Done {
            if let Some(at) = self.completed_at {
                line.push_str(&format!(" (completed {})", at.format(TIMESTAMP_FORMAT)));
            }
            if let Some(note) = &self.note {
                line.push(' ');
                line.push_str(note);
            }
        }
        line
    }

    /// Parse a checklist line; `None` for anything that is not an entry.
    pub fn parse(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        let rest = trimmed
            .strip_prefix("- [")
            .or_else(|| trimmed.strip_prefix("* ["))?;
        let (marker, body) = rest.split_once(']')?;
        let state = IssueState::from_marker(marker)?;
        let body = body.trim();
        if body.is_empty() {
            return None;
        }

        let mut entry = Self {
            text: body.to_owned(),
            state,
            note: None,
            completed_at: None,
        };
        if state == IssueState::Done
            && let Some((text, stamp)) = body.rsplit_once("(completed ")
            && let Some((at, note)) = stamp.split_once(')')
            && let Ok(at) = NaiveDateTime::parse_from_str(at.trim(), TIMESTAMP_FORMAT)
            && !text.trim().is_empty()
        {
            entry.text = text.trim().to_owned();
            entry.completed_at = Some(at);
            let note = note.trim();
            entry.note = (!note.is_empty()).then(|| note.to_owned());
        }
        Some(entry)
    }

    /// Case- and whitespace-insensitive form of the text, for matching.
    pub fn normalized_text(&self) -> String {
        normalize(&self.text)
    }
}

/// Which entry a mutation applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryRef {
    /// Zero-based position among the entries (non-entry lines are not counted)
    Index(usize),
    /// Entry whose text matches, ignoring case and extra whitespace
    Text(String),
}

impl fmt::Display for EntryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(index) => write!(f, "#{}", index + 1),
            Self::Text(text) => f.write_str(text),
        }
    }
}

/// Direction for [`Checklist::move_entry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveDirection {
    /// Towards the top of the file
    Up,
    /// Towards the bottom of the file
    Down,
}

/// Parsed entry together with the bytes it was read from.
///
/// An entry wrapped over several lines owns the continuation lines that follow
/// it up to the next entry, blank line or heading.
#[derive(Debug, Clone)]
struct EntryLine {
    /// Parsed content, continuation text joined in
    entry: IssueEntry,
    /// First line as it will be written
    raw: String,
    /// Wrapped tail, written verbatim after `raw`
    continuation: Vec<String>,
}

impl EntryLine {
    /// Entry written on a single line.
    fn single(entry: IssueEntry) -> Self {
        Self {
            raw: entry.render(),
            entry,
            continuation: Vec::new(),
        }
    }

    /// Take `raw` as the next wrapped line if it continues this entry.
    fn absorb(&mut self, raw: &str) -> bool {
        if !is_continuation(raw) {
            return false;
        }
        self.continuation.push(raw.to_owned());
        let joined = std::iter::once(self.raw.as_str())
            .chain(self.continuation.iter().map(String::as_str))
            .map(str::trim)
            .collect::<Vec<_>>()
            .join(" ");
        if let Some(entry) = IssueEntry::parse(&joined) {
            self.entry = entry;
        }
        true
    }

    /// Replace the content, collapsing a wrapped entry onto one line.
    fn rewrite(&mut self, entry: IssueEntry) {
        *self = Self::single(entry);
    }
}

/// One physical line of the checklist file.
#[derive(Debug, Clone)]
enum Line {
    /// Checklist item
    Entry(EntryLine),
    /// Anything else, kept verbatim
    Other(String),
}

/// In-memory view of one checklist file.
#[derive(Debug, Clone)]
pub struct Checklist {
    /// Lines without their terminators
    lines: Vec<Line>,
    /// Line terminator detected in the source
    newline: &'static str,
    /// Whether the last line was terminated
    trailing_newline: bool,
}

impl Checklist {
    /// Parse file content.
    pub fn parse(content: &str) -> Self {
        let mut lines: Vec<Line> = Vec::new();
        for raw in content.lines() {
            if let Some(Line::Entry(entry)) = lines.last_mut()
                && entry.absorb(raw)
            {
                continue;
            }
            lines.push(match IssueEntry::parse(raw) {
                Some(entry) => Line::Entry(EntryLine {
                    entry,
                    raw: raw.to_owned(),
                    continuation: Vec::new(),
                }),
                None => Line::Other(raw.to_owned()),
            });
        }
        Self {
            lines,
            newline: if content.contains("\r\n") { "\r\n" } else { "\n" },
            trailing_newline: content.ends_with('\n'),
        }
    }

    /// Empty checklist with the standard header, for a file that does not exist yet.
    pub fn with_header(created: NaiveDateTime) -> Self {
        Self {
            lines: vec![
                Line::Other(format!(
                    "# {HEADER_TITLE}  {}",
                    created.format(TIMESTAMP_FORMAT)
                )),
                Line::Other(String::new()),
            ],
            newline: "\n",
            trailing_newline: true,
        }
    }

    /// File content for this checklist.
    pub fn render(&self) -> String {
        let mut physical: Vec<&str> = Vec::with_capacity(self.lines.len());
        for line in &self.lines {
            match line {
                Line::Entry(entry) => {
                    physical.push(&entry.raw);
                    physical.extend(entry.continuation.iter().map(String::as_str));
                }
                Line::Other(raw) => physical.push(raw),
            }
        }
        let mut out = physical.join(self.newline);
        if self.trailing_newline && !self.lines.is_empty() {
            out.push_str(self.newline);
        }
        out
    }

    /// Entries in file order.
    pub fn entries(&self) -> impl Iterator<Item = &IssueEntry> {
        self.lines.iter().filter_map(|line| match line {
            Line::Entry(entry) => Some(&entry.entry),
            Line::Other(_) => None,
        })
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries().count()
    }

    /// Whether the checklist holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries().next().is_none()
    }

    /// Entries grouped by state, each paired with its zero-based entry index.
    pub fn grouped(&self) -> Vec<(IssueState, Vec<(usize, &IssueEntry)>)> {
        IssueState::ALL
            .iter()
            .map(|&state| {
                let members = self
                    .entries()
                    .enumerate()
                    .filter(|(_, entry)| entry.state == state)
                    .collect();
                (state, members)
            })
            .collect()
    }

    /// Entry at a zero-based entry index.
    pub fn get(&self, target: &EntryRef) -> Option<&IssueEntry> {
        match self.lines.get(self.locate(target)?) {
            Some(Line::Entry(entry)) => Some(&entry.entry),
            _ => None,
        }
    }

    /// Line index of the targeted entry.
    fn locate(&self, target: &EntryRef) -> Option<usize> {
        let mut entry_lines = self
            .lines
            .iter()
            .enumerate()
            .filter_map(|(pos, line)| match line {
                Line::Entry(entry) => Some((pos, &entry.entry)),
                Line::Other(_) => None,
            });
        match target {
            EntryRef::Index(index) => entry_lines.nth(*index).map(|(pos, _)| pos),
            EntryRef::Text(text) => {
                let wanted = normalize(text);
                entry_lines
                    .find(|(_, entry)| entry.normalized_text() == wanted)
                    .map(|(pos, _)| pos)
            }
        }
    }

    /// Append pending entries at the end; returns how many were added.
    pub fn push_pending<S: AsRef<str>>(&mut self, texts: &[S]) -> usize {
        let mut added = 0;
        for entry in texts.iter().filter_map(|text| IssueEntry::pending(text.as_ref())) {
            self.lines.push(Line::Entry(EntryLine::single(entry)));
            added += 1;
        }
        if added > 0 {
            self.trailing_newline = true;
        }
        added
    }

    /// Change the state of an entry.
    ///
    /// Returns `None` if the target does not exist, otherwise whether the line
    /// changed. Repeating a transition leaves the line as it was, including an
    /// existing completion stamp.
    pub fn set_state(
        &mut self,
        target: &EntryRef,
        state: IssueState,
        note: Option<&str>,
        now: NaiveDateTime,
    ) -> Option<bool> {
        let pos = self.locate(target)?;
        let Some(Line::Entry(line)) = self.lines.get_mut(pos) else {
            return None;
        };

        let mut updated = line.entry.clone();
        if state == IssueState::Done {
            if updated.state != IssueState::Done || updated.completed_at.is_none() {
                updated.completed_at = Some(now);
            }
            if let Some(note) = note.map(single_line).filter(|n| !n.is_empty()) {
                updated.note = Some(note);
            }
        } else {
            updated.completed_at = None;
            updated.note = None;
        }
        updated.state = state;

        if updated == line.entry {
            return Some(false);
        }
        line.rewrite(updated);
        Some(true)
    }

    /// Replace the text of an entry, keeping its state.
    ///
    /// Returns the resulting entry and whether it changed. Blank text is ignored.
    pub fn edit(&mut self, target: &EntryRef, text: &str) -> Option<(IssueEntry, bool)> {
        let pos = self.locate(target)?;
        let Some(Line::Entry(line)) = self.lines.get_mut(pos) else {
            return None;
        };
        let text = single_line(text);
        if text.is_empty() || line.entry.text == text {
            return Some((line.entry.clone(), false));
        }
        let mut updated = line.entry.clone();
        updated.text = text;
        line.rewrite(updated);
        Some((line.entry.clone(), true))
    }

    /// Remove an entry and hand it back.
    pub fn remove(&mut self, target: &EntryRef) -> Option<IssueEntry> {
        let pos = self.locate(target)?;
        match self.lines.remove(pos) {
            Line::Entry(line) => Some(line.entry),
            Line::Other(raw) => {
                self.lines.insert(pos, Line::Other(raw));
                None
            }
        }
    }

    /// Swap an entry with its nearest neighbour in the same state.
    ///
    /// Returns `Some(false)` when the entry is already first/last of its state.
    pub fn move_entry(&mut self, target: &EntryRef, direction: MoveDirection) -> Option<bool> {
        let pos = self.locate(target)?;
        let state = match self.lines.get(pos) {
            Some(Line::Entry(line)) => line.entry.state,
            _ => return None,
        };
        let same_state = |line: &Line| matches!(line, Line::Entry(l) if l.entry.state == state);

        let neighbour = match direction {
            MoveDirection::Up => self
                .lines
                .get(..pos)
                .and_then(|before| before.iter().rposition(same_state)),
            MoveDirection::Down => self
                .lines
                .get(pos + 1..)
                .and_then(|after| after.iter().position(same_state))
                .map(|offset| pos + 1 + offset),
        };
        let Some(other) = neighbour else {
            return Some(false);
        };
        self.lines.swap(pos, other);
        Some(true)
    }

    /// Drop entries whose normalized text repeats an earlier entry; returns how many.
    pub fn dedupe(&mut self) -> usize {
        let mut seen = std::collections::HashSet::new();
        let before = self.lines.len();
        self.lines.retain(|line| match line {
            Line::Entry(entry) => seen.insert(entry.entry.normalized_text()),
            Line::Other(_) => true,
        });
        before - self.lines.len()
    }
}

/// Whether a line continues the entry above it: text that is not blank, not
/// another checkbox and not a heading.
fn is_continuation(raw: &str) -> bool {
    let trimmed = raw.trim();
    !trimmed.is_empty()
        && !trimmed.starts_with('#')
        && !trimmed.starts_with("- [")
        && !trimmed.starts_with("* [")
}

/// Collapse whitespace so the text fits on one checklist line.
fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Matching key for entry text.
fn normalize(text: &str) -> String {
    single_line(text).to_lowercase()
}
