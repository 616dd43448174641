//! Terminal stand-ins for the platform notification API and audio playback,
//! plus toast and status rendering.

use std::io::{self, IsTerminal, Write};
use std::sync::Arc;

use async_trait::async_trait;
use colored::*;
use pulse::channels::SoundHandle;
use pulse::{
    AudioBackend, ConnectionEvent, ConnectionStatus, DismissReason, Notification,
    NotificationPlatform, NotificationPriority, Result,
};

/// Desktop notifications through the OSC 9 escape sequence, understood by
/// most modern terminal emulators.
pub struct TerminalPlatform {
    allowed: bool,
}

impl TerminalPlatform {
    pub fn new(allowed: bool) -> Self {
        Self { allowed }
    }
}

#[async_trait]
impl NotificationPlatform for TerminalPlatform {
    fn is_supported(&self) -> bool {
        io::stdout().is_terminal()
    }

    async fn request_permission(&self) -> Result<bool> {
        Ok(self.allowed)
    }

    async fn show(&self, _tag: &str, notification: &Notification) -> Result<()> {
        let text = sanitize(&format!("{}: {}", notification.title, notification.message));
        let mut stdout = io::stdout().lock();
        write!(stdout, "\x1b]9;{text}\x07")?;
        stdout.flush()?;
        Ok(())
    }

    async fn close(&self, _tag: &str) -> Result<()> {
        // OSC 9 notifications cannot be withdrawn.
        Ok(())
    }
}

/// Strip control characters so text cannot terminate the escape early.
fn sanitize(text: &str) -> String {
    text.chars().filter(|c| !c.is_control()).collect()
}

/// Every sound is the terminal bell.
pub struct BellAudio;

struct Bell;

impl SoundHandle for Bell {
    fn rewind(&self) -> Result<()> {
        Ok(())
    }

    fn play(&self) -> Result<()> {
        let mut stderr = io::stderr().lock();
        stderr.write_all(b"\x07")?;
        stderr.flush()?;
        Ok(())
    }
}

#[async_trait]
impl AudioBackend for BellAudio {
    async fn load(&self, _resource: &str) -> Result<Option<Arc<dyn SoundHandle>>> {
        Ok(Some(Arc::new(Bell)))
    }
}

pub fn render_toast(notification: &Notification) -> String {
    let badge = match notification.priority {
        NotificationPriority::Low => " low ".dimmed(),
        NotificationPriority::Normal => " info ".blue().bold(),
        NotificationPriority::High => " high ".yellow().bold(),
        NotificationPriority::Urgent => " urgent ".on_red().white().bold(),
    };
    let mut line = format!(
        "{} {} {} {}",
        notification.created_at.format("%H:%M:%S").to_string().dimmed(),
        badge,
        format!("[{}]", notification.kind).cyan(),
        notification.title.bold(),
    );
    if !notification.message.is_empty() {
        line.push_str(&format!(" - {}", notification.message));
    }
    if let Some(action) = &notification.action {
        line.push_str(&format!(" {}", format!("({})", action.label).underline()));
    }
    line
}

pub fn render_dismissal(id: u64, reason: DismissReason) -> String {
    format!("  #{id} {reason}").dimmed().to_string()
}

pub fn render_connection(event: &ConnectionEvent) -> Option<String> {
    let line = match event {
        ConnectionEvent::StatusChanged(state) => {
            let status = match state.status {
                ConnectionStatus::Connected => "connected".green().bold(),
                ConnectionStatus::Connecting => "connecting".yellow(),
                ConnectionStatus::Disconnected => "disconnected".dimmed(),
                ConnectionStatus::Error => "error".red().bold(),
            };
            match &state.error_message {
                Some(message) if state.status == ConnectionStatus::Error => {
                    format!("● {status} ({message})")
                }
                _ => format!("● {status}"),
            }
        }
        ConnectionEvent::ReconnectScheduled { attempt, delay } => format!(
            "↻ reconnect attempt {} in {} ms",
            attempt,
            delay.as_millis()
        )
        .yellow()
        .to_string(),
        ConnectionEvent::ReconnectExhausted { attempts } => format!(
            "✗ gave up after {attempts} attempts; restart watch to try again"
        )
        .red()
        .to_string(),
        ConnectionEvent::ConnectionRejected { reason } => {
            format!("✗ stream rejected: {reason}").red().to_string()
        }
        ConnectionEvent::MessageDropped { .. } => return None,
    };
    Some(line)
}
