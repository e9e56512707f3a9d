//! Command implementations for the CLI.

use std::io::{BufRead, Read, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::info;

use voice_issues::checklist::TIMESTAMP_FORMAT;
use voice_issues::{
    App, CaptureOutcome, EntryRef, IssueEntry, IssueState, IssueStore, MoveDirection,
    SttProvider, VoiceConfig,
};

/// Where `capture` takes its transcript from
pub enum CaptureInput<'a> {
    /// Transcript given on the command line
    Text(&'a str),
    /// Transcript piped on stdin
    Stdin,
    /// Recording to transcribe
    AudioFile(&'a Path),
    /// Live microphone recording
    Record,
}

/// Capture issues and report what was appended.
pub fn capture(app: &App, input: CaptureInput<'_>, provider: Option<SttProvider>) -> Result<()> {
    let outcome = match input {
        CaptureInput::Text(text) => app.capture_transcript(text),
        CaptureInput::Stdin => app.capture_transcript(&read_stdin()?),
        CaptureInput::AudioFile(path) => app.capture_audio(path, provider),
        CaptureInput::Record => record(app, provider)?,
    }
    .context("Failed to capture issues")?;

    print_outcome(app, &outcome);
    Ok(())
}

#[cfg(feature = "capture")]
fn record(app: &App, provider: Option<SttProvider>) -> Result<voice_issues::Result<CaptureOutcome>> {
    println!("Recording... press Enter to stop.");
    Ok(app.record_and_capture(provider))
}

#[cfg(not(feature = "capture"))]
fn record(_app: &App, _provider: Option<SttProvider>) -> Result<voice_issues::Result<CaptureOutcome>> {
    bail!("microphone capture needs a build with --features capture")
}

fn print_outcome(app: &App, outcome: &CaptureOutcome) {
    if outcome.appended == 0 {
        println!("No issues heard; {} unchanged.", app.store().path().display());
        return;
    }
    println!(
        "Added {} issue(s) to {}:",
        outcome.appended,
        app.store().path().display()
    );
    for segment in &outcome.segments {
        println!("  - [ ] {segment}");
    }
}

/// Show how a transcript would be split without touching any file.
pub fn segment(config: &VoiceConfig, text: Option<&str>) -> Result<()> {
    let segmenter = config.segmenter()?;
    let transcript = match text {
        Some(text) => text.to_owned(),
        None => read_stdin()?,
    };
    for (i, segment) in segmenter.split(&transcript).iter().enumerate() {
        println!("{}. {segment}", i + 1);
    }
    Ok(())
}

/// Print entries grouped by state, numbered as the other commands expect.
pub fn list(app: &App) -> Result<()> {
    let checklist = app.store().load()?;
    if checklist.is_empty() {
        println!("No issues in {}", app.store().path().display());
        return Ok(());
    }

    println!("{}", app.store().path().display());
    for (state, entries) in checklist.grouped() {
        if entries.is_empty() {
            continue;
        }
        println!();
        println!("{} ({})", heading(state), entries.len());
        for (index, entry) in entries {
            println!("  {:>3}. {}", index + 1, describe(entry));
        }
    }
    Ok(())
}

/// Change the state of one entry.
pub fn mark(app: &App, target: &EntryRef, state: IssueState, note: Option<&str>) -> Result<()> {
    let entry = app
        .store()
        .set_state(target, state, note)
        .with_context(|| format!("Failed to mark {target} as {state}"))?;
    println!("Marked {state}: {}", describe(&entry));
    Ok(())
}

/// Delete one entry after confirmation.
///
/// The entry is only removed if it still has the text that was confirmed, so
/// an agent rewriting the file while the prompt is open cannot shift the
/// deletion onto another issue.
pub fn delete(app: &App, target: &EntryRef, assume_yes: bool) -> Result<()> {
    let store = app.store();
    let entry = if assume_yes {
        store.delete(target)
    } else {
        let checklist = store.load()?;
        let Some(confirmed) = checklist.get(target).cloned() else {
            return Err(not_found(store, target)).context("Failed to delete issue");
        };
        if !confirm(&format!("Delete \"{}\"?", confirmed.text))? {
            println!("Aborted.");
            return Ok(());
        }
        store.delete_confirmed(target, &confirmed)
    }
    .context("Failed to delete issue")?;

    println!("Deleted: {}", entry.text);
    println!("Run `voice-issues undo` to restore it.");
    Ok(())
}

/// Revert the most recent mutation.
pub fn undo(app: &App) -> Result<()> {
    if app.store().undo().context("Failed to undo")? {
        println!("Reverted the last change to {}", app.store().path().display());
    } else {
        println!("Nothing to undo.");
    }
    Ok(())
}

/// Move an entry past its neighbour in the same state.
pub fn move_entry(app: &App, target: &EntryRef, direction: MoveDirection) -> Result<()> {
    if app
        .store()
        .move_entry(target, direction)
        .context("Failed to move issue")?
    {
        println!("Moved {target} {}.", match direction {
            MoveDirection::Up => "up",
            MoveDirection::Down => "down",
        });
    } else {
        println!("{target} is already at the edge of its group.");
    }
    Ok(())
}

/// Replace the text of an entry.
pub fn edit(app: &App, target: &EntryRef, text: &str) -> Result<()> {
    let entry = app
        .store()
        .edit(target, text)
        .context("Failed to edit issue")?;
    println!("Updated: {}", describe(&entry));
    Ok(())
}

/// Remove repeated entries.
pub fn dedupe(app: &App) -> Result<()> {
    let removed = app.store().dedupe().context("Failed to remove duplicates")?;
    println!("Removed {removed} duplicate issue(s).");
    Ok(())
}

/// Print the checklist the selected repo resolves to.
pub fn resolve(app: &App) -> Result<()> {
    let repo = app.repo();
    println!("{}", repo.issues_file.display());
    info!(
        "Repo '{}' at {} ({:?})",
        repo.alias,
        repo.repo_path.display(),
        repo.source
    );
    Ok(())
}

/// Register a repo, create its checklist and make it the default.
pub fn init(config: &mut VoiceConfig, repo_path: &Path) -> Result<()> {
    let repo_path = std::path::absolute(repo_path)
        .with_context(|| format!("Failed to resolve {}", repo_path.display()))?;
    if !repo_path.is_dir() {
        bail!("{} is not a directory", repo_path.display());
    }

    let target = config.register_repo(&repo_path);
    let store = IssueStore::new(&target.issues_file);
    let created = store.ensure_exists()?;
    config.save().context("Failed to save configuration")?;

    info!("Registered {} in {}", repo_path.display(), config.source().display());
    if created {
        println!("Created {}", target.issues_file.display());
    } else {
        println!("Using existing {}", target.issues_file.display());
    }
    println!("Default repo is now {}", target.alias);
    Ok(())
}

fn heading(state: IssueState) -> &'static str {
    match state {
        IssueState::Pending => "Pending",
        IssueState::WorkingOn => "Working on",
        IssueState::Done => "Done",
        IssueState::Waitlisted => "Waitlist",
    }
}

fn describe(entry: &IssueEntry) -> String {
    let mut line = format!("[{}] {}", entry.state.marker(), entry.text);
    if let Some(completed) = entry.completed_at {
        line.push_str(&format!(" (completed {})", completed.format(TIMESTAMP_FORMAT)));
    }
    if let Some(note) = &entry.note {
        line.push_str(" - ");
        line.push_str(note);
    }
    line
}

fn not_found(store: &IssueStore, target: &EntryRef) -> voice_issues::VoiceIssuesError {
    voice_issues::VoiceIssuesError::NotFound {
        target: target.to_string(),
        path: store.path().to_path_buf(),
    }
}

fn confirm(question: &str) -> Result<bool> {
    print!("{question} [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("Failed to read confirmation")?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn read_stdin() -> Result<String> {
    let mut text = String::new();
    std::io::stdin()
        .read_to_string(&mut text)
        .context("Failed to read transcript from stdin")?;
    Ok(text)
}
