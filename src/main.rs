//! chorus - talk to a group of AI personas from the terminal.
//!
//! Usage:
//!   chorus --roster group.json                 Scheduler picks who answers
//!   chorus --roster group.json --all-respond   Everyone answers every message
//!
//! Commands while chatting: `/mute <id>`, `/unmute <id>`, `/clear`, `/quit`.
//! Ctrl-C aborts the running turn; pressed while idle it exits.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use chorus_core::events::{ConversationEvent, FallbackReason};
use chorus_core::ids::{MessageId, ParticipantId};
use chorus_engine::{EngineConfig, EngineError, TurnSequencer};
use chorus_llm::BackendConfig;
use chorus_settings::ChorusSettings;
use chorus_telemetry::TelemetryConfig;

#[derive(Parser)]
#[command(name = "chorus")]
#[command(version, about = "Sequential group chat with AI personas")]
struct Cli {
    /// Roster document: the group and its personas
    #[arg(long, value_name = "FILE")]
    roster: PathBuf,

    /// Settings file (defaults to ~/.chorus/settings.json)
    #[arg(long, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// Every persona answers every message; the scheduler is not asked
    #[arg(long)]
    all_respond: bool,

    /// Backend base URL, overriding settings
    #[arg(long, value_name = "URL")]
    base_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings_path = cli.settings.clone().unwrap_or_else(chorus_settings::settings_path);
    let mut settings = chorus_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("loading settings from {}", settings_path.display()))?;
    if let Some(url) = &cli.base_url {
        settings.server.base_url = url.clone();
    }

    if let Err(e) = chorus_telemetry::init_telemetry(TelemetryConfig::from_level_name(
        &settings.logging.level,
        settings.logging.json,
    )) {
        eprintln!("chorus: logging unavailable: {e}");
    }

    let roster = chorus_settings::load_roster(&cli.roster, &settings.messages.user_display_name)
        .with_context(|| format!("loading roster from {}", cli.roster.display()))?;
    info!(
        group = %roster.group.name,
        personas = roster.personas.len(),
        base_url = %settings.server.base_url,
        "starting chorus"
    );

    let sequencer = Arc::new(
        TurnSequencer::connect(roster, backend_config(&settings), engine_config(&settings))
            .context("connecting to chat backend")?,
    );
    if cli.all_respond {
        sequencer.set_all_respond(true);
    }

    print_roster(&sequencer);

    let shutdown = CancellationToken::new();
    let render = tokio::spawn(render_events(sequencer.subscribe(), shutdown.clone()));
    tokio::spawn(handle_interrupts(sequencer.clone(), shutdown.clone()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line.context("reading stdin")?,
        };
        let Some(line) = line else { break };

        match parse_input(&line) {
            Input::Empty => {}
            Input::Quit => break,
            Input::Clear => {
                sequencer.clear();
                println!("(conversation cleared)");
            }
            Input::Mute(id) => report_mute(&sequencer, &id, sequencer.mute(&id), "muted"),
            Input::Unmute(id) => report_mute(&sequencer, &id, sequencer.unmute(&id), "unmuted"),
            Input::Unknown(command) => println!("(unknown command: {command})"),
            Input::Message(text) => match sequencer.submit(&text).await {
                Ok(report) => {
                    if report.cancelled {
                        println!("(turn aborted)");
                    }
                }
                Err(EngineError::EmptyInput) => {}
                Err(e) => println!("({e})"),
            },
        }
    }

    shutdown.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(1), render).await;
    info!("bye");
    Ok(())
}

fn backend_config(settings: &ChorusSettings) -> BackendConfig {
    let mut config = BackendConfig::new(settings.server.base_url.clone());
    config.api_token = settings.server.api_token();
    config.connect_timeout = Duration::from_millis(settings.server.connect_timeout_ms);
    config
}

fn engine_config(settings: &ChorusSettings) -> EngineConfig {
    EngineConfig {
        read_timeout: Duration::from_millis(settings.orchestrator.read_timeout_ms),
        pacing: Duration::from_millis(settings.orchestrator.pacing_ms),
        scheduler_fallback: settings.orchestrator.scheduler_fallback,
        fallback_text: settings.messages.fallback_text.clone(),
        error_template: settings.messages.error_template.clone(),
        user_label: settings.messages.user_label.clone(),
    }
}

fn print_roster(sequencer: &TurnSequencer) {
    let roster = sequencer.roster();
    println!("# {}", roster.group.name);
    for persona in &roster.personas {
        println!("  {} ({})", persona.name(), persona.id());
    }
    if sequencer.all_respond() {
        println!("(discussion mode: everyone answers)");
    }
}

fn report_mute(sequencer: &TurnSequencer, id: &ParticipantId, changed: bool, verb: &str) {
    match sequencer.roster().persona(id) {
        None => println!("(no persona with id {id})"),
        Some(persona) if changed => println!("({} {verb})", persona.name()),
        Some(persona) => println!("({} already {verb})", persona.name()),
    }
}

/// First Ctrl-C aborts a running turn; when idle it shuts down.
async fn handle_interrupts(sequencer: Arc<TurnSequencer>, shutdown: CancellationToken) {
    loop {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for ctrl-c");
            return;
        }
        if !sequencer.abort() {
            shutdown.cancel();
            return;
        }
    }
}

async fn render_events(mut rx: broadcast::Receiver<ConversationEvent>, shutdown: CancellationToken) {
    let mut renderer = Renderer::new(std::io::stdout());
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => return,
            event = rx.recv() => event,
        };
        match event {
            Ok(event) => {
                if let Err(e) = renderer.apply(&event) {
                    warn!(error = %e, "render failed");
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => warn!(skipped = n, "renderer lagged"),
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Empty,
    Quit,
    Clear,
    Mute(ParticipantId),
    Unmute(ParticipantId),
    Unknown(String),
    Message(String),
}

fn parse_input(line: &str) -> Input {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Input::Empty;
    }
    let Some(command) = trimmed.strip_prefix('/') else {
        return Input::Message(line.to_string());
    };
    let mut parts = command.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("quit" | "exit"), None) => Input::Quit,
        (Some("clear"), None) => Input::Clear,
        (Some("mute"), Some(id)) => Input::Mute(ParticipantId::from(id)),
        (Some("unmute"), Some(id)) => Input::Unmute(ParticipantId::from(id)),
        _ => Input::Unknown(trimmed.to_string()),
    }
}

/// Writes streaming persona output as it arrives. Only one message streams at
/// a time, so only the text already printed for it is tracked.
struct Renderer<W: Write> {
    out: W,
    current: Option<(MessageId, String)>,
}

impl<W: Write> Renderer<W> {
    fn new(out: W) -> Self {
        Self { out, current: None }
    }

    fn apply(&mut self, event: &ConversationEvent) -> std::io::Result<()> {
        match event {
            ConversationEvent::MessageAppended { message } if message.is_ai_response => {
                write!(self.out, "{}: ", message.sender.display_name)?;
                self.current = Some((message.id, String::new()));
            }
            ConversationEvent::MessageUpdated { id, content } => self.catch_up(*id, content)?,
            ConversationEvent::MessageFinalized { message } => {
                self.catch_up(message.id, &message.content)?;
                if message.is_error {
                    write!(self.out, " [error]")?;
                }
                writeln!(self.out)?;
                self.current = None;
            }
            ConversationEvent::SchedulerFallback { reason, .. } => match reason {
                FallbackReason::SchedulerFailed { error } => {
                    writeln!(self.out, "(scheduler unavailable: {error})")?
                }
                FallbackReason::EmptySelection => writeln!(self.out, "(scheduler picked nobody)")?,
            },
            ConversationEvent::Cleared => self.current = None,
            _ => {}
        }
        self.out.flush()
    }

    /// Print what `content` adds to the text already shown. When the text was
    /// rewritten (an echoed name removed, a fallback), start a fresh line.
    fn catch_up(&mut self, id: MessageId, content: &str) -> std::io::Result<()> {
        let Some((current, shown)) = self.current.as_mut() else {
            return Ok(());
        };
        if *current != id {
            return Ok(());
        }
        match content.strip_prefix(shown.as_str()) {
            Some(rest) => write!(self.out, "{rest}")?,
            None => write!(self.out, "\n  {content}")?,
        }
        shown.clear();
        shown.push_str(content);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_core::messages::Message;
    use chorus_core::roster::Participant;

    #[test]
    fn parses_commands() {
        assert_eq!(parse_input("   "), Input::Empty);
        assert_eq!(parse_input("/quit"), Input::Quit);
        assert_eq!(parse_input(" /clear "), Input::Clear);
        assert_eq!(parse_input("/mute 3"), Input::Mute(ParticipantId::from("3")));
        assert_eq!(parse_input("/unmute bob"), Input::Unmute(ParticipantId::from("bob")));
        assert_eq!(parse_input("/mute"), Input::Unknown("/mute".into()));
        assert_eq!(parse_input("hello /mute"), Input::Message("hello /mute".into()));
    }

    #[test]
    fn renders_stream_incrementally() {
        let mut renderer = Renderer::new(Vec::new());
        let placeholder = Message::placeholder(2, Participant::new("alice", "Alice"));
        let mut done = placeholder.clone();
        done.content = "Hello".into();
        done.is_streaming = false;

        for event in [
            ConversationEvent::MessageAppended { message: placeholder },
            ConversationEvent::MessageUpdated { id: 2, content: "Hel".into() },
            ConversationEvent::MessageUpdated { id: 2, content: "Hello".into() },
            ConversationEvent::MessageFinalized { message: done },
        ] {
            renderer.apply(&event).unwrap();
        }
        assert_eq!(String::from_utf8(renderer.out).unwrap(), "Alice: Hello\n");
    }

    #[test]
    fn rewritten_text_starts_fresh_line() {
        let mut renderer = Renderer::new(Vec::new());
        let placeholder = Message::placeholder(4, Participant::new("bob", "Bob"));
        let mut failed = placeholder.clone();
        failed.content = "oops".into();
        failed.is_error = true;
        failed.is_streaming = false;

        renderer
            .apply(&ConversationEvent::MessageAppended { message: placeholder })
            .unwrap();
        renderer
            .apply(&ConversationEvent::MessageUpdated { id: 4, content: "Hi the".into() })
            .unwrap();
        renderer
            .apply(&ConversationEvent::MessageFinalized { message: failed })
            .unwrap();
        assert_eq!(
            String::from_utf8(renderer.out).unwrap(),
            "Bob: Hi the\n  oops [error]\n"
        );
    }

    #[test]
    fn user_messages_are_not_echoed() {
        let mut renderer = Renderer::new(Vec::new());
        let user = Message::user(1, Participant::new("user", "Dana"), "hi");
        renderer
            .apply(&ConversationEvent::MessageAppended { message: user })
            .unwrap();
        assert!(renderer.out.is_empty());
    }
}
