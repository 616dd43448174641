use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use pulse::NotificationPriority;

#[derive(Parser)]
#[command(name = "pulse")]
#[command(about = "Real-time notifications in your terminal")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, env = "PULSE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub log_format: LogFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Connect to an event stream and show notifications as they arrive
    Watch {
        /// Stream base URL; the subscriber id and `stream` are appended
        #[arg(short, long, env = "PULSE_ENDPOINT")]
        endpoint: Option<String>,

        /// Subscriber identity to stream for
        #[arg(short, long, env = "PULSE_SUBSCRIBER")]
        subscriber: Option<String>,

        /// Bearer token sent with the stream request
        #[arg(long, env = "PULSE_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },

    /// Inspect and manage the notification history
    History {
        #[command(subcommand)]
        command: HistoryCommand,
    },

    /// Show or reset the configuration file
    Config {
        /// Print the effective configuration
        #[arg(long)]
        show: bool,

        /// Overwrite the configuration file with defaults
        #[arg(long, conflicts_with = "show")]
        reset: bool,
    },

    /// Send a local notification through every channel
    Notify {
        #[arg(short, long)]
        title: String,

        #[arg(short, long, default_value = "")]
        message: String,

        /// Notification type tag
        #[arg(long = "type", default_value = "info")]
        kind: String,

        #[arg(short, long, default_value = "normal", value_parser = parse_priority)]
        priority: NotificationPriority,

        /// Time to live in milliseconds
        #[arg(long)]
        duration: Option<u64>,
    },
}

#[derive(Subcommand)]
pub enum HistoryCommand {
    /// List recorded notifications, oldest first
    List {
        /// Only unread notifications
        #[arg(long)]
        unread: bool,

        #[arg(long = "type")]
        kind: Option<String>,

        #[arg(long, value_parser = parse_priority)]
        priority: Option<NotificationPriority>,

        /// Case-insensitive match over title, message and type
        #[arg(long)]
        search: Option<String>,

        /// Only notifications created at or after this RFC 3339 time
        #[arg(long, value_parser = parse_time)]
        since: Option<DateTime<Utc>>,

        /// Show at most this many of the newest matches
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Mark one notification, or all of them, as read
    MarkRead {
        #[arg(required_unless_present = "all")]
        id: Option<u64>,

        #[arg(long, conflicts_with = "id")]
        all: bool,
    },

    /// Delete the whole history
    Clear,

    /// Show history counters
    Stats,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

fn parse_priority(value: &str) -> Result<NotificationPriority, String> {
    value
        .parse()
        .map_err(|_| format!("unknown priority '{value}' (low, normal, high, urgent)"))
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("invalid RFC 3339 time '{value}': {e}"))
}
