//! voice-issues: speak a list of issues, get a markdown checklist.

mod commands;
mod exit_codes;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, Subcommand, ValueEnum};
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use commands::CaptureInput;
use exit_codes::ExitCode;
use voice_issues::{App, EntryRef, IssueState, MoveDirection, SttProvider, VoiceConfig, VoiceIssuesError};

/// Capture spoken issues into a per-repo markdown checklist
#[derive(Parser, Debug)]
#[command(name = "voice-issues")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: $VOICE_ISSUES_CONFIG, then ./.voice_config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Repo alias or path (default: defaultRepo from the config)
    #[arg(long, global = true)]
    repo: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Split a transcript into issues and append them to the checklist
    #[command(group(
        ArgGroup::new("source")
            .required(true)
            .args(["text", "audio_file", "stdin", "record"])
    ))]
    Capture {
        /// Transcript text
        #[arg(long)]
        text: Option<String>,

        /// Recording to transcribe
        #[arg(long)]
        audio_file: Option<PathBuf>,

        /// Read the transcript from stdin
        #[arg(long)]
        stdin: bool,

        /// Record from the microphone until Enter is pressed
        #[arg(long)]
        record: bool,

        /// Speech-to-text provider: stub, whisper_cpp or whisper_rs
        #[arg(long)]
        provider: Option<SttProvider>,
    },
    /// Show how a transcript would be split, without writing anything
    Segment {
        /// Transcript text (read from stdin when omitted)
        #[arg(long)]
        text: Option<String>,
    },
    /// List issues grouped by state
    List,
    /// Change the state of an issue
    Mark {
        /// Issue number (see `list`) or issue text
        #[arg(value_parser = parse_target)]
        target: EntryRef,

        /// pending, working_on, done or waitlisted
        state: IssueState,

        /// Note appended to a done entry
        #[arg(long)]
        note: Option<String>,
    },
    /// Delete an issue
    Delete {
        /// Issue number (see `list`) or issue text
        #[arg(value_parser = parse_target)]
        target: EntryRef,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Revert the most recent change to the checklist
    Undo,
    /// Move an issue within its state group
    Move {
        /// Issue number (see `list`) or issue text
        #[arg(value_parser = parse_target)]
        target: EntryRef,

        /// Direction to move
        #[arg(value_enum)]
        direction: Direction,
    },
    /// Replace the text of an issue
    Edit {
        /// Issue number (see `list`) or issue text
        #[arg(value_parser = parse_target)]
        target: EntryRef,

        /// New issue text
        text: String,
    },
    /// Remove repeated issues
    Dedupe,
    /// Print the checklist file the selected repo resolves to
    Resolve,
    /// Register a repo with a repo-local checklist and make it the default
    Init {
        /// Repository root
        repo_path: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Direction {
    Up,
    Down,
}

impl From<Direction> for MoveDirection {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Up => Self::Up,
            Direction::Down => Self::Down,
        }
    }
}

/// `3` selects the third issue; anything else matches issue text.
fn parse_target(raw: &str) -> std::result::Result<EntryRef, String> {
    match raw.trim().parse::<usize>() {
        Ok(0) => Err("issue numbers start at 1".to_owned()),
        Ok(number) => Ok(EntryRef::Index(number - 1)),
        Err(_) if raw.trim().is_empty() => Err("issue text must not be empty".to_owned()),
        Err(_) => Ok(EntryRef::Text(raw.trim().to_owned())),
    }
}

fn main() {
    let cli = Cli::parse();

    let exit_code = match run(cli) {
        Ok(()) => ExitCode::Success,
        Err(err) => {
            let code = ExitCode::for_error(&err);
            error!("{err:#} ({code})");
            eprintln!("Error: {err:#}");
            code
        }
    };
    std::process::exit(exit_code.as_i32());
}

/// Load configuration, set up logging, and dispatch the command.
fn run(cli: Cli) -> Result<()> {
    let mut config = match (&cli.command, VoiceConfig::load(cli.config.as_deref())) {
        (_, Ok(config)) => config,
        (Commands::Init { .. }, Err(VoiceIssuesError::Config { path, .. })) if !path.exists() => {
            VoiceConfig::from_json("{}", &path)?
        }
        (_, Err(err)) => return Err(err).context("Failed to load configuration"),
    };
    setup_logging(&config)?;

    if let Some(legacy) = config.migrated_from() {
        warn!(
            "Copied legacy config {} to {}",
            legacy.display(),
            config.source().display()
        );
    }

    match cli.command {
        Commands::Init { repo_path } => commands::init(&mut config, &repo_path),
        Commands::Segment { text } => commands::segment(&config, text.as_deref()),
        command => {
            let app = App::new(config, cli.repo.as_deref()).context("Failed to select repo")?;
            dispatch(&app, command)
        }
    }
}

/// Run a command that works on the selected repo's checklist.
fn dispatch(app: &App, command: Commands) -> Result<()> {
    match command {
        Commands::Capture {
            text,
            audio_file,
            stdin,
            record: _,
            provider,
        } => {
            let input = match (text.as_deref(), audio_file.as_deref()) {
                (Some(text), _) => CaptureInput::Text(text),
                (None, Some(path)) => CaptureInput::AudioFile(path),
                (None, None) if stdin => CaptureInput::Stdin,
                (None, None) => CaptureInput::Record,
            };
            commands::capture(app, input, provider)
        }
        Commands::List => commands::list(app),
        Commands::Mark { target, state, note } => {
            commands::mark(app, &target, state, note.as_deref())
        }
        Commands::Delete { target, yes } => commands::delete(app, &target, yes),
        Commands::Undo => commands::undo(app),
        Commands::Move { target, direction } => {
            commands::move_entry(app, &target, direction.into())
        }
        Commands::Edit { target, text } => commands::edit(app, &target, &text),
        Commands::Dedupe => commands::dedupe(app),
        Commands::Resolve => commands::resolve(app),
        Commands::Init { .. } | Commands::Segment { .. } => Ok(()),
    }
}

/// Configure tracing from the configured level and optional log file.
fn setup_logging(config: &VoiceConfig) -> Result<()> {
    let configured = config.log_level();
    let level = match configured.trim().to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" => "error",
        _ => "info",
    };
    let filter = EnvFilter::new(level);
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if let Some(path) = &config.logging.file {
        let file = open_log_file(path)?;
        subscriber.with_writer(file).with_ansi(false).init();
    } else {
        subscriber.init();
    }

    Ok(())
}

fn open_log_file(path: &Path) -> Result<std::fs::File> {
    let path = voice_issues::config::expand_home(path);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    /// Verify the CLI definition is valid
    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn numeric_targets_are_one_based() {
        assert_eq!(parse_target("3"), Ok(EntryRef::Index(2)));
        assert_eq!(
            parse_target(" fix login "),
            Ok(EntryRef::Text("fix login".to_owned()))
        );
        assert!(parse_target("0").is_err());
    }

    #[test]
    fn parse_mark_with_note() {
        let cli = Cli::try_parse_from([
            "voice-issues",
            "--repo",
            "app",
            "mark",
            "1",
            "done",
            "--note",
            "fixed in file X",
        ])
        .unwrap();
        assert_eq!(cli.repo.as_deref(), Some("app"));
        assert!(matches!(
            cli.command,
            Commands::Mark {
                target: EntryRef::Index(0),
                state: IssueState::Done,
                note: Some(_),
            }
        ));
    }

    #[test]
    fn capture_needs_exactly_one_source() {
        assert!(Cli::try_parse_from(["voice-issues", "capture"]).is_err());
        assert!(
            Cli::try_parse_from(["voice-issues", "capture", "--text", "a", "--stdin"]).is_err()
        );
        let cli = Cli::try_parse_from([
            "voice-issues",
            "capture",
            "--audio-file",
            "take.wav",
            "--provider",
            "whisper_cpp",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Capture {
                provider: Some(SttProvider::WhisperCpp),
                ..
            }
        ));
    }

    #[test]
    fn parse_move_direction() {
        let cli = Cli::try_parse_from(["voice-issues", "move", "flaky test", "up"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Move {
                target: EntryRef::Text(_),
                direction: Direction::Up,
            }
        ));
    }
}
