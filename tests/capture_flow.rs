//! End-to-end checklist lifecycle against a scratch repo.

use std::fs;
use std::path::Path;

use tempfile::TempDir;
use voice_issues::{App, EntryRef, IssueState, VoiceConfig, VoiceIssuesError};

fn write_config(dir: &Path, body: &str) -> VoiceConfig {
    let path = dir.join(".voice_config.json");
    fs::write(&path, body).unwrap();
    VoiceConfig::load(Some(&path)).unwrap()
}

fn scratch_app(dir: &TempDir) -> App {
    fs::create_dir_all(dir.path().join("app")).unwrap();
    let config = write_config(
        dir.path(),
        r#"{
            "defaultRepo": "app",
            "repos": { "app": { "issuesFile": "todo/issues.md" } },
            "phrases": { "nextIssue": ["next issue"], "stop": ["end issues"] }
        }"#,
    );
    App::new(config, None).unwrap()
}

#[test]
fn spoken_session_round_trip() {
    let dir = TempDir::new().unwrap();
    let app = scratch_app(&dir);
    let issues = dir.path().join("app/todo/issues.md");
    assert_eq!(app.store().path(), issues);

    let outcome = app
        .capture_transcript("first issue next issue second issue end issues extra talk")
        .unwrap();
    assert_eq!(outcome.segments, vec!["first issue", "second issue"]);

    let created = fs::read_to_string(&issues).unwrap();
    let entries: Vec<&str> = created.lines().filter(|l| l.starts_with("- [")).collect();
    assert_eq!(entries, vec!["- [ ] first issue", "- [ ] second issue"]);

    let done = app
        .store()
        .set_state(&EntryRef::Index(0), IssueState::Done, Some("fixed in file X"))
        .unwrap();
    assert_eq!(done.state, IssueState::Done);
    let marked = fs::read_to_string(&issues).unwrap();
    let line = marked.lines().find(|l| l.contains("first issue")).unwrap();
    assert!(line.starts_with("- [x] first issue (completed "), "{line}");
    assert!(line.ends_with(") fixed in file X"), "{line}");
    assert!(marked.contains("\n- [ ] second issue\n"));

    app.store()
        .delete(&EntryRef::Text("Second  Issue".to_owned()))
        .unwrap();
    assert!(!fs::read_to_string(&issues).unwrap().contains("second issue"));

    assert!(app.store().undo().unwrap());
    assert_eq!(fs::read_to_string(&issues).unwrap(), marked);
}

#[test]
fn undo_survives_a_new_session() {
    let dir = TempDir::new().unwrap();
    let before = {
        let app = scratch_app(&dir);
        app.capture_transcript("keep me").unwrap();
        let before = fs::read_to_string(app.store().path()).unwrap();
        app.capture_transcript("drop me").unwrap();
        before
    };

    let app = scratch_app(&dir);
    assert!(app.store().undo().unwrap());
    assert_eq!(fs::read_to_string(app.store().path()).unwrap(), before);
}

#[test]
fn agent_edits_are_not_clobbered() {
    let dir = TempDir::new().unwrap();
    let app = scratch_app(&dir);
    app.capture_transcript("a next issue b").unwrap();

    let path = app.store().path().to_path_buf();
    let agent = fs::read_to_string(&path)
        .unwrap()
        .replace("- [ ] a", "- [~] a");
    fs::write(&path, &agent).unwrap();

    app.capture_transcript("c").unwrap();
    let content = fs::read_to_string(&path).unwrap();
    assert!(content.contains("- [~] a\n- [ ] b\n- [ ] c\n"), "{content}");

    // The agent rewrites again; undo must not discard that
    fs::write(&path, content.replace("- [ ] b", "- [x] b")).unwrap();
    let err = app.store().undo().unwrap_err();
    assert!(matches!(err, VoiceIssuesError::UndoConflict { .. }), "{err}");
    assert!(fs::read_to_string(&path).unwrap().contains("- [x] b"));
}

#[test]
fn repo_local_checklist_is_the_default() {
    let dir = TempDir::new().unwrap();
    let repo = dir.path().join("svc");
    fs::create_dir_all(&repo).unwrap();
    let mut config = write_config(dir.path(), "{}");

    let target = config.register_repo(&repo);
    config.save().unwrap();
    assert_eq!(target.issues_file, repo.join(".voice/voice-issues.md"));

    let reloaded = VoiceConfig::load(Some(config.source())).unwrap();
    let app = App::new(reloaded, None).unwrap();
    assert_eq!(app.store().path(), target.issues_file);
}
