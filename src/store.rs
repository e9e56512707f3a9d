//! Checklist persistence
//!
//! The file on disk is the only source of truth. Every mutation re-reads it,
//! applies the change to the freshly parsed content and writes the result
//! through a temporary file that is renamed over the original, so an external
//! agent editing checkboxes between sessions never loses its edits and a
//! failed write never leaves half a file behind.
//!
//! The content before the latest mutation is kept in a hidden sidecar file
//! under the repo's `.voice/` directory, giving one level of undo across
//! process runs. A mutation that changes nothing clears it.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::checklist::{Checklist, EntryRef, IssueEntry, IssueState, MoveDirection};
use crate::error::{Result, VoiceIssuesError};

/// Snapshot pair persisted for undo.
#[derive(Debug, Serialize, Deserialize)]
struct UndoRecord {
    /// Content before the mutation, `None` if the file did not exist
    before: Option<String>,
    /// Content the mutation wrote
    after: String,
}

/// Read/write access to one checklist file.
#[derive(Debug)]
pub struct IssueStore {
    /// Checklist file
    path: PathBuf,
    /// Hidden sidecar holding the undo record
    undo_path: PathBuf,
    /// Keeps a single mutation in flight
    guard: Mutex<()>,
}

impl IssueStore {
    /// Store for the checklist at `path`. Nothing is touched until the first operation.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map_or_else(|| "voice-issues.md".into(), |name| name.to_string_lossy());
        let sidecar = format!(".{file_name}.undo");
        let undo_path = match path.parent() {
            Some(dir) if dir.file_name().is_some_and(|name| name == ".voice") => dir.join(sidecar),
            Some(dir) => dir.join(".voice").join(sidecar),
            None => PathBuf::from(".voice").join(sidecar),
        };
        Self {
            path,
            undo_path,
            guard: Mutex::new(()),
        }
    }

    /// Checklist file this store manages.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse the current on-disk content. A missing file reads as empty.
    pub fn load(&self) -> Result<Checklist> {
        Ok(read_optional(&self.path)?
            .map(|content| Checklist::parse(&content))
            .unwrap_or_else(|| Checklist::parse("")))
    }

    /// Create the file with its header if it does not exist yet.
    ///
    /// Returns whether the file was created. Not recorded for undo.
    pub fn ensure_exists(&self) -> Result<bool> {
        let _guard = self.lock();
        if read_optional(&self.path)?.is_some() {
            return Ok(false);
        }
        write_atomic(&self.path, Checklist::with_header(now()).render().as_bytes())?;
        info!("Created issues file {}", self.path.display());
        Ok(true)
    }

    /// Append one pending entry per non-empty segment, in order.
    pub fn append<S: AsRef<str>>(&self, segments: &[S]) -> Result<usize> {
        let added = self.mutate(|checklist| {
            let added = checklist.push_pending(segments);
            Ok((added, added > 0))
        })?;
        if added > 0 {
            info!("Appended {} issue(s) to {}", added, self.path.display());
        }
        Ok(added)
    }

    /// Move an entry to `state`; `note` is kept only for [`IssueState::Done`].
    pub fn set_state(
        &self,
        target: &EntryRef,
        state: IssueState,
        note: Option<&str>,
    ) -> Result<IssueEntry> {
        let entry = self.mutate(|checklist| {
            let changed = checklist
                .set_state(target, state, note, now())
                .ok_or_else(|| self.not_found(target))?;
            let entry = checklist
                .get(target)
                .cloned()
                .ok_or_else(|| self.not_found(target))?;
            Ok((entry, changed))
        })?;
        info!("Marked {} as {} in {}", target, state, self.path.display());
        Ok(entry)
    }

    /// Remove an entry, returning what was removed.
    pub fn delete(&self, target: &EntryRef) -> Result<IssueEntry> {
        self.delete_matching(target, None)
    }

    /// Remove an entry only if it still has the text the user confirmed.
    ///
    /// Fails with [`VoiceIssuesError::NotFound`], leaving the file alone, when
    /// the target now points at a different issue.
    pub fn delete_confirmed(&self, target: &EntryRef, confirmed: &IssueEntry) -> Result<IssueEntry> {
        self.delete_matching(target, Some(confirmed))
    }

    /// Shared body of [`Self::delete`] and [`Self::delete_confirmed`].
    fn delete_matching(&self, target: &EntryRef, expected: Option<&IssueEntry>) -> Result<IssueEntry> {
        let removed = self.mutate(|checklist| {
            if let Some(expected) = expected
                && checklist.get(target).map(IssueEntry::normalized_text)
                    != Some(expected.normalized_text())
            {
                return Err(VoiceIssuesError::NotFound {
                    target: format!("{target} \"{}\"", expected.text),
                    path: self.path.clone(),
                });
            }
            let removed = checklist.remove(target).ok_or_else(|| self.not_found(target))?;
            Ok((removed, true))
        })?;
        info!("Deleted {} from {}", target, self.path.display());
        Ok(removed)
    }

    /// Rewrite the text of an entry.
    pub fn edit(&self, target: &EntryRef, text: &str) -> Result<IssueEntry> {
        self.mutate(|checklist| {
            checklist
                .edit(target, text)
                .ok_or_else(|| self.not_found(target))
        })
    }

    /// Reorder an entry within its state. Returns whether anything moved.
    pub fn move_entry(&self, target: &EntryRef, direction: MoveDirection) -> Result<bool> {
        self.mutate(|checklist| {
            let moved = checklist
                .move_entry(target, direction)
                .ok_or_else(|| self.not_found(target))?;
            Ok((moved, moved))
        })
    }

    /// Remove duplicate entries. Returns how many were dropped.
    pub fn dedupe(&self) -> Result<usize> {
        let removed = self.mutate(|checklist| {
            let removed = checklist.dedupe();
            Ok((removed, removed > 0))
        })?;
        info!("Removed {} duplicate issue(s) from {}", removed, self.path.display());
        Ok(removed)
    }

    /// Revert the latest mutation. Returns `false` when there is nothing to undo.
    pub fn undo(&self) -> Result<bool> {
        let _guard = self.lock();
        let Some(raw) = read_optional(&self.undo_path)? else {
            return Ok(false);
        };
        let record: UndoRecord = serde_json::from_str(&raw).map_err(|e| {
            VoiceIssuesError::persistence(
                "parse undo record",
                &self.undo_path,
                std::io::Error::new(ErrorKind::InvalidData, e),
            )
        })?;

        let current = read_optional(&self.path)?;
        if current.as_deref() != Some(record.after.as_str()) {
            warn!("Issues file {} changed since last mutation", self.path.display());
            return Err(VoiceIssuesError::UndoConflict {
                path: self.path.clone(),
            });
        }

        match record.before {
            Some(before) => write_atomic(&self.path, before.as_bytes())?,
            None => fs::remove_file(&self.path)
                .map_err(|e| VoiceIssuesError::persistence("remove", &self.path, e))?,
        }
        remove_optional(&self.undo_path)?;
        info!("Reverted last change to {}", self.path.display());
        Ok(true)
    }

    /// Re-read, apply `change`, write back if it reports a modification.
    fn mutate<T>(&self, change: impl FnOnce(&mut Checklist) -> Result<(T, bool)>) -> Result<T> {
        let _guard = self.lock();
        let before = read_optional(&self.path)?;
        let mut checklist = before
            .as_deref()
            .map_or_else(|| Checklist::with_header(now()), Checklist::parse);

        let (value, changed) = change(&mut checklist)?;
        if !changed {
            // Undo must not reach past this call to an older change
            debug!("No change to {}", self.path.display());
            remove_optional(&self.undo_path)?;
            return Ok(value);
        }

        let after = checklist.render();
        let record = UndoRecord { before, after };
        let record_json = serde_json::to_string(&record).map_err(|e| {
            VoiceIssuesError::persistence(
                "serialize undo record",
                &self.undo_path,
                std::io::Error::other(e),
            )
        })?;
        write_atomic(&self.path, record.after.as_bytes())?;
        if let Err(e) = write_atomic(&self.undo_path, record_json.as_bytes()) {
            // A stale record no longer matches the file, so undo reports a conflict
            warn!("Change to {} cannot be undone: {}", self.path.display(), e);
        }
        Ok(value)
    }

    /// Acquire the write guard.
    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.guard.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Error for a target that is not in the file.
    fn not_found(&self, target: &EntryRef) -> VoiceIssuesError {
        VoiceIssuesError::NotFound {
            target: target.to_string(),
            path: self.path.clone(),
        }
    }
}

/// Local wall-clock time at minute precision.
fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// Read a UTF-8 file, `None` if it does not exist.
pub(crate) fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(VoiceIssuesError::persistence("read", path, e)),
    }
}

/// Remove a file that may already be gone.
fn remove_optional(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => {
            Err(VoiceIssuesError::persistence("remove", path, e))
        }
        _ => Ok(()),
    }
}

/// Replace `path` with `content` via a temp file in the same directory.
///
/// Creates the parent directory if needed and keeps the permissions of an
/// existing file. Either the full content lands or the old file stays.
pub(crate) fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)
        .map_err(|e| VoiceIssuesError::persistence("create directory", parent, e))?;

    let mut tmp = NamedTempFile::new_in(parent)
        .map_err(|e| VoiceIssuesError::persistence("create temporary file in", parent, e))?;
    if let Ok(metadata) = fs::metadata(path) {
        tmp.as_file()
            .set_permissions(metadata.permissions())
            .map_err(|e| VoiceIssuesError::persistence("copy permissions to", tmp.path(), e))?;
    }
    tmp.write_all(content)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| VoiceIssuesError::persistence("write", path, e))?;
    tmp.persist(path)
        .map_err(|e| VoiceIssuesError::persistence("replace", path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> IssueStore {
        IssueStore::new(dir.path().join(".voice").join("voice-issues.md"))
    }

    fn read(store: &IssueStore) -> String {
        fs::read_to_string(store.path()).unwrap()
    }

    fn entry_lines(content: &str) -> Vec<&str> {
        content.lines().filter(|l| l.starts_with("- [")).collect()
    }

    #[test]
    fn append_creates_file_and_directory() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert_eq!(store.append(&["first issue", "second issue"]).unwrap(), 2);

        let content = read(&store);
        assert!(content.starts_with("# Voice Issues  "), "header missing: {content}");
        assert_eq!(
            entry_lines(&content),
            vec!["- [ ] first issue", "- [ ] second issue"]
        );
    }

    #[test]
    fn appended_entries_are_the_last_lines() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.append(&["old"]).unwrap();
        let segments = ["alpha", "  ", "beta", "gamma"];
        let written = store.append(&segments).unwrap();
        assert_eq!(written, 3);

        let content = read(&store);
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines[lines.len() - written..],
            ["- [ ] alpha", "- [ ] beta", "- [ ] gamma"]
        );
    }

    #[test]
    fn empty_append_does_not_create_file() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert_eq!(store.append(&[" ", ""]).unwrap(), 0);
        assert!(!store.path().exists());
        assert!(!store.undo().unwrap());
    }

    #[test]
    fn marking_done_touches_one_line() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.append(&["first issue", "second issue"]).unwrap();
        let before = read(&store);

        let entry = store
            .set_state(&EntryRef::Index(0), IssueState::Done, Some("fixed in file X"))
            .unwrap();
        assert_eq!(entry.state, IssueState::Done);

        let after = read(&store);
        let changed: Vec<_> = before
            .lines()
            .zip(after.lines())
            .filter(|(a, b)| a != b)
            .collect();
        assert_eq!(changed.len(), 1);
        let (old, new) = changed[0];
        assert_eq!(old, "- [ ] first issue");
        assert!(new.starts_with("- [x] first issue (completed "), "{new}");
        assert!(new.ends_with(") fixed in file X"), "{new}");
    }

    #[test]
    fn set_state_twice_matches_once() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.append(&["a", "b"]).unwrap();
        let target = EntryRef::Text("b".to_owned());
        store.set_state(&target, IssueState::Done, Some("n")).unwrap();
        let once = read(&store);
        store.set_state(&target, IssueState::Done, Some("n")).unwrap();
        assert_eq!(read(&store), once);
    }

    #[test]
    fn delete_then_undo_restores_original() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.append(&["first issue", "second issue"]).unwrap();
        let original = read(&store);

        let removed = store.delete(&EntryRef::Index(1)).unwrap();
        assert_eq!(removed.text, "second issue");
        assert_eq!(entry_lines(&read(&store)), vec!["- [ ] first issue"]);

        assert!(store.undo().unwrap());
        assert_eq!(read(&store), original);
        assert!(!store.undo().unwrap(), "only one level of undo");
    }

    #[test]
    fn undo_of_first_append_removes_file() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.append(&["x"]).unwrap();
        assert!(store.undo().unwrap());
        assert!(!store.path().exists());
    }

    #[test]
    fn undo_reverts_every_kind_of_mutation() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.append(&["a", "b", "a"]).unwrap();

        let mutations: Vec<Box<dyn Fn(&IssueStore)>> = vec![
            Box::new(|s: &IssueStore| {
                s.set_state(&EntryRef::Index(1), IssueState::WorkingOn, None).unwrap();
            }),
            Box::new(|s: &IssueStore| {
                s.move_entry(&EntryRef::Index(1), MoveDirection::Up).unwrap();
            }),
            Box::new(|s: &IssueStore| {
                s.edit(&EntryRef::Index(0), "renamed").unwrap();
            }),
            Box::new(|s: &IssueStore| {
                s.dedupe().unwrap();
            }),
            Box::new(|s: &IssueStore| {
                s.append(&["c"]).unwrap();
            }),
        ];
        for mutation in mutations {
            let before = read(&store);
            mutation(&store);
            assert_ne!(read(&store), before);
            assert!(store.undo().unwrap());
            assert_eq!(read(&store), before);
        }
    }

    #[test]
    fn undo_after_a_no_op_keeps_older_changes() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.append(&["a", "b"]).unwrap();
        store.set_state(&EntryRef::Index(0), IssueState::Done, None).unwrap();
        let marked = read(&store);

        assert!(!store.move_entry(&EntryRef::Index(1), MoveDirection::Down).unwrap());
        assert!(!store.undo().unwrap());
        assert_eq!(read(&store), marked);

        store.set_state(&EntryRef::Index(1), IssueState::WorkingOn, None).unwrap();
        let working = read(&store);
        store.set_state(&EntryRef::Index(1), IssueState::WorkingOn, None).unwrap();
        assert!(!store.undo().unwrap());
        assert_eq!(read(&store), working);
    }

    #[test]
    fn checklist_is_written_before_undo_record() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        // A directory where the undo record goes cannot be replaced by a file
        fs::create_dir_all(store.undo_path.join("blocker")).unwrap();

        store.append(&["kept"]).unwrap();
        assert_eq!(entry_lines(&read(&store)), vec!["- [ ] kept"]);

        let before = read(&store);
        assert!(store.undo().is_err());
        assert_eq!(read(&store), before);
    }

    #[test]
    fn confirmed_delete_refuses_a_shifted_target() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.append(&["first", "second"]).unwrap();
        let confirmed = store.load().unwrap().get(&EntryRef::Index(1)).cloned().unwrap();

        let shifted = read(&store).replace("- [ ] first\n", "");
        fs::write(store.path(), &shifted).unwrap();
        store.append(&["third"]).unwrap();
        let before = read(&store);

        let err = store.delete_confirmed(&EntryRef::Index(1), &confirmed).unwrap_err();
        assert!(matches!(err, VoiceIssuesError::NotFound { .. }), "{err}");
        assert_eq!(read(&store), before);

        let removed = store.delete_confirmed(&EntryRef::Index(0), &confirmed).unwrap();
        assert_eq!(removed.text, "second");
    }

    #[test]
    fn undo_record_lives_under_voice_dir() {
        let dir = TempDir::new().unwrap();
        let legacy = IssueStore::new(dir.path().join("voice-issues.md"));
        assert_eq!(legacy.undo_path, dir.path().join(".voice/.voice-issues.md.undo"));
        let local = store_in(&dir);
        assert_eq!(local.undo_path, dir.path().join(".voice/.voice-issues.md.undo"));

        legacy.append(&["x"]).unwrap();
        assert!(legacy.undo_path.is_file());
        assert!(!dir.path().join(".voice-issues.md.undo").exists());
        assert!(legacy.undo().unwrap());
    }

    #[test]
    fn external_edits_survive_later_appends() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.append(&["first"]).unwrap();

        let edited = read(&store).replace("- [ ] first", "- [~] first");
        fs::write(store.path(), &edited).unwrap();

        store.append(&["second"]).unwrap();
        assert_eq!(
            entry_lines(&read(&store)),
            vec!["- [~] first", "- [ ] second"]
        );
    }

    #[test]
    fn undo_refuses_to_clobber_external_edits() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.append(&["first"]).unwrap();
        let edited = format!("{}- [ ] added by agent\n", read(&store));
        fs::write(store.path(), &edited).unwrap();

        let err = store.undo().unwrap_err();
        assert!(matches!(err, VoiceIssuesError::UndoConflict { .. }), "{err}");
        assert_eq!(read(&store), edited);
    }

    #[test]
    fn missing_target_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.append(&["only"]).unwrap();
        store.set_state(&EntryRef::Index(0), IssueState::WorkingOn, None).unwrap();
        let before = read(&store);

        let err = store
            .set_state(&EntryRef::Text("gone".to_owned()), IssueState::Done, None)
            .unwrap_err();
        assert!(matches!(err, VoiceIssuesError::NotFound { .. }), "{err}");
        assert!(store.delete(&EntryRef::Index(5)).is_err());
        assert_eq!(read(&store), before);

        assert!(store.undo().unwrap());
        assert_eq!(entry_lines(&read(&store)), vec!["- [ ] only"]);
    }

    #[test]
    fn unwritable_parent_reports_path_and_action() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "not a directory").unwrap();
        let store = IssueStore::new(blocker.join("issues.md"));

        let err = store.append(&["x"]).unwrap_err();
        match err {
            VoiceIssuesError::Persistence { action, path, .. } => {
                assert_eq!(action, "read");
                assert_eq!(path, blocker.join("issues.md"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn ensure_exists_writes_header_once() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(store.ensure_exists().unwrap());
        let header = read(&store);
        assert!(!store.ensure_exists().unwrap());
        assert_eq!(read(&store), header);
        assert!(store.load().unwrap().is_empty());
    }
}
