use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use colored::*;
use pulse::stream::EventStream;
use pulse::{
    EventTransport, FileStore, HistoricalNotification, HistoryFilter, HistoryLog,
    NotificationRequest, NotificationService, PersistedSettings, QueueEvent, ServiceDeps,
    SseTransport, SseTransportConfig,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use crate::cli::HistoryCommand;
use crate::config::AppConfig;
use crate::terminal::{
    BellAudio, TerminalPlatform, render_connection, render_dismissal, render_toast,
};

pub struct CommandExecutor {
    config: AppConfig,
}

/// Transport for commands that never open a stream.
struct Offline;

#[async_trait]
impl EventTransport for Offline {
    fn name(&self) -> &'static str {
        "offline"
    }

    async fn open(&self, _subscriber_id: &str) -> pulse::Result<Box<dyn EventStream>> {
        Err(pulse::Error::config("no stream endpoint configured"))
    }
}

impl CommandExecutor {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    fn store(&self) -> Result<Arc<FileStore>> {
        let dir = self.config.data_dir()?;
        debug!(dir = %dir.display(), "Using data directory");
        Ok(Arc::new(FileStore::new(dir)))
    }

    async fn service(&self, transport: Arc<dyn EventTransport>) -> Result<NotificationService> {
        let store = self.store()?;
        let settings = PersistedSettings::load(store.clone())
            .await
            .context("failed to load notification settings")?;
        let deps = ServiceDeps::new(transport)
            .with_history_store(store)
            .with_settings(Arc::new(settings))
            .with_platform(Arc::new(TerminalPlatform::new(
                self.config.engine.enable_system_notifications,
            )))
            .with_audio(Arc::new(BellAudio));
        NotificationService::new(self.config.engine.clone(), deps)
            .await
            .context("failed to start notification service")
    }

    async fn history(&self) -> Result<HistoryLog> {
        HistoryLog::load(self.store()?, self.config.engine.max_history)
            .await
            .context("failed to load notification history")
    }

    pub async fn watch(
        &self,
        endpoint: Option<String>,
        subscriber: Option<String>,
        token: Option<String>,
    ) -> Result<()> {
        let Some(endpoint) = endpoint.or_else(|| self.config.endpoint.clone()) else {
            bail!("no endpoint given; pass --endpoint or set `endpoint` in the config file");
        };
        let Some(subscriber) = subscriber.or_else(|| self.config.subscriber.clone()) else {
            bail!("no subscriber given; pass --subscriber or set `subscriber` in the config file");
        };

        let mut transport_config = SseTransportConfig::new(endpoint);
        transport_config.bearer_token = token.or_else(|| self.config.token.clone());
        let transport = SseTransport::new(transport_config).context("invalid stream endpoint")?;

        let service = self.service(Arc::new(transport)).await?;
        let mut toasts = service.toasts().subscribe();
        let mut connection = service.subscribe_connection();

        service
            .connect(&subscriber)
            .await
            .with_context(|| format!("cannot connect as '{subscriber}'"))?;
        info!(subscriber = %subscriber, "Watching for notifications, press Ctrl-C to stop");

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                event = toasts.recv() => match event {
                    Ok(QueueEvent::Shown(notification)) => {
                        println!("{}", render_toast(&notification))
                    }
                    Ok(QueueEvent::Dismissed { id, reason }) => {
                        debug!("{}", render_dismissal(id, reason))
                    }
                    Err(RecvError::Lagged(missed)) => debug!(missed, "Toast feed lagged"),
                    Err(RecvError::Closed) => break,
                },
                event = connection.recv() => match event {
                    Ok(event) => {
                        if let Some(line) = render_connection(&event) {
                            eprintln!("{line}");
                        }
                    }
                    Err(RecvError::Lagged(missed)) => debug!(missed, "Connection feed lagged"),
                    Err(RecvError::Closed) => break,
                },
            }
        }

        service.disconnect().await;
        let state = service.connection_state();
        let stats = service.queue_stats();
        let history = service.history().stats().await;
        eprintln!();
        eprintln!("{}", "Session summary".bold());
        eprintln!("  connections:    {}", state.total_connections);
        eprintln!("  shown:          {}", stats.shown);
        eprintln!("  expired:        {}", stats.expired);
        eprintln!("  evicted:        {}", stats.evicted);
        eprintln!("  history:        {} ({} unread)", history.total, history.unread);
        Ok(())
    }

    pub async fn history_command(&self, command: HistoryCommand) -> Result<()> {
        let history = self.history().await?;
        match command {
            HistoryCommand::List {
                unread,
                kind,
                priority,
                search,
                since,
                limit,
                json,
            } => {
                let filter = HistoryFilter {
                    read: unread.then_some(false),
                    kind,
                    priority,
                    since,
                    until: None,
                    text: search,
                    limit,
                };
                let records = history.query(&filter).await;
                if json {
                    println!("{}", serde_json::to_string_pretty(&records)?);
                } else if records.is_empty() {
                    println!("No notifications");
                } else {
                    for record in &records {
                        println!("{}", render_record(record));
                    }
                }
            }
            HistoryCommand::MarkRead { id, all } => {
                if all {
                    let changed = history.mark_all_read().await?;
                    println!("✓ Marked {changed} notifications as read");
                } else if let Some(id) = id {
                    if history.mark_read(id).await? {
                        println!("✓ Marked #{id} as read");
                    } else if history.get(id).await.is_some() {
                        println!("#{id} was already read");
                    } else {
                        bail!("no notification with id {id}");
                    }
                }
            }
            HistoryCommand::Clear => {
                let count = history.len().await;
                history.clear().await?;
                println!("✓ Cleared {count} notifications");
            }
            HistoryCommand::Stats => {
                let stats = history.stats().await;
                println!("total:  {}", stats.total);
                println!("unread: {}", stats.unread);
                for (priority, count) in &stats.by_priority {
                    println!("{priority:>6}: {count}");
                }
            }
        }
        Ok(())
    }

    pub async fn notify(&self, request: NotificationRequest) -> Result<()> {
        let service = self.service(Arc::new(Offline)).await?;
        let id = service.show_notification(request).await;
        if let Some(notification) = service.toasts().visible().iter().find(|n| n.id == id) {
            println!("{}", render_toast(notification));
        }
        Ok(())
    }

    pub fn config_command(&self, path: Option<PathBuf>, show: bool, reset: bool) -> Result<()> {
        if reset {
            let path = AppConfig::reset(path.as_deref())?;
            println!("✓ Configuration reset to defaults at {}", path.display());
        } else if show {
            println!("{}", self.config.show()?);
        } else {
            println!("Use --show to display current configuration or --reset to reset to defaults");
        }
        Ok(())
    }
}

fn render_record(record: &HistoricalNotification) -> String {
    let marker = if record.read {
        " ".normal()
    } else {
        "•".blue().bold()
    };
    format!(
        "{} {:>5}  {}",
        marker,
        format!("#{}", record.id()).dimmed(),
        render_toast(&record.notification)
    )
}
