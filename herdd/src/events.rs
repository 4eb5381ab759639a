//! Notification boundary and the broadcast event bus front ends subscribe to.

use chrono::Utc;
use herd_common::NotificationConfig;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

const DEFAULT_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Failure,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Success => write!(f, "success"),
            Self::Warning => write!(f, "warning"),
            Self::Failure => write!(f, "failure"),
        }
    }
}

/// A human-readable message for whoever requested the work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub severity: Severity,
}

impl Notification {
    pub fn new(severity: Severity, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            severity,
        }
    }

    pub fn info(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(Severity::Info, title, body)
    }

    pub fn success(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(Severity::Success, title, body)
    }

    pub fn failure(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(Severity::Failure, title, body)
    }
}

/// Where progress and build output are reported.
///
/// `target` names a channel/room; `None` means the default destination.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, target: Option<&str>, notification: Notification);

    /// One formatted line of build output.
    fn log_line(&self, line: &str);
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    event: &'a str,
    data: &'a T,
    timestamp: String,
}

#[derive(Serialize)]
struct NotificationEvent<'a> {
    target: Option<&'a str>,
    #[serde(flatten)]
    notification: &'a Notification,
}

#[derive(Serialize)]
struct LogLineEvent<'a> {
    target: Option<&'a str>,
    line: &'a str,
}

/// Fan-out of notifications and build output as JSON lines.
///
/// Slow subscribers lag and lose the oldest events; publishing never blocks.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<String>,
    default_target: Option<String>,
    log_target: Option<String>,
}

impl EventBus {
    /// `capacity` below the default is raised to it.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(DEFAULT_BUFFER));
        Self {
            sender,
            default_target: None,
            log_target: None,
        }
    }

    /// Default bus addressed per `[notifications]`.
    pub fn from_config(config: &NotificationConfig) -> Self {
        Self {
            default_target: config.default_target.clone(),
            log_target: config.log_target.clone(),
            ..Self::default()
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }

    pub fn emit<T: Serialize>(&self, event: &str, data: &T) {
        let envelope = Envelope {
            event,
            data,
            timestamp: Utc::now().to_rfc3339(),
        };
        match serde_json::to_string(&envelope) {
            // Err only means nobody is subscribed.
            Ok(line) => drop(self.sender.send(line)),
            Err(err) => warn!("Dropping {} event: {}", event, err),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

impl NotificationSink for EventBus {
    fn notify(&self, target: Option<&str>, notification: Notification) {
        let event = NotificationEvent {
            target: target.or(self.default_target.as_deref()),
            notification: &notification,
        };
        self.emit("notification", &event);
    }

    fn log_line(&self, line: &str) {
        self.emit(
            "log_line",
            &LogLineEvent {
                target: self.log_target.as_deref(),
                line,
            },
        );
    }
}

/// Tracing target build output is written to when a log channel is configured.
pub const BUILD_LOG_TARGET: &str = "herd::build_log";

/// Sink that only writes to the tracing subscriber.
///
/// Build output goes to [`BUILD_LOG_TARGET`] tagged with the configured log
/// channel. Without one, lines are left to the coordinator's own logging.
#[derive(Debug, Clone, Default)]
pub struct TracingSink {
    default_target: Option<String>,
    log_target: Option<String>,
}

impl TracingSink {
    pub fn from_config(config: &NotificationConfig) -> Self {
        Self {
            default_target: config.default_target.clone(),
            log_target: config.log_target.clone(),
        }
    }
}

impl NotificationSink for TracingSink {
    fn notify(&self, target: Option<&str>, notification: Notification) {
        let channel = target
            .or(self.default_target.as_deref())
            .unwrap_or("default");
        match notification.severity {
            Severity::Failure => error!(
                channel,
                "{}: {}", notification.title, notification.body
            ),
            Severity::Warning => warn!(
                channel,
                "{}: {}", notification.title, notification.body
            ),
            Severity::Info | Severity::Success => info!(
                channel,
                "{}: {}", notification.title, notification.body
            ),
        }
    }

    fn log_line(&self, line: &str) {
        if let Some(channel) = self.log_target.as_deref() {
            info!(target: BUILD_LOG_TARGET, channel, "{}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn next_event(rx: &mut broadcast::Receiver<String>) -> serde_json::Value {
        let raw = tokio::time::timeout(Duration::from_millis(50), rx.recv())
            .await
            .expect("no event within 50ms")
            .expect("bus closed");
        serde_json::from_str(&raw).expect("event is not JSON")
    }

    #[tokio::test]
    async fn notification_carries_target_and_timestamp() {
        let bus = EventBus::from_config(&NotificationConfig {
            default_target: Some("builds".to_string()),
            log_target: None,
        });
        let mut rx = bus.subscribe();

        bus.notify(None, Notification::success("Game build finished", "Windows64"));
        let event = next_event(&mut rx).await;
        assert_eq!(event["event"], "notification");
        assert_eq!(event["data"]["target"], "builds");
        assert_eq!(event["data"]["title"], "Game build finished");
        assert_eq!(event["data"]["severity"], "success");
        let ts = event["timestamp"].as_str().unwrap();
        chrono::DateTime::parse_from_rfc3339(ts).unwrap();

        bus.notify(Some("game-builds"), Notification::info("Game build started", ""));
        assert_eq!(next_event(&mut rx).await["data"]["target"], "game-builds");
    }

    #[tokio::test]
    async fn missing_target_serializes_as_null() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.notify(None, Notification::failure("Game build failed", "exit code 1"));
        assert!(next_event(&mut rx).await["data"]["target"].is_null());
    }

    #[tokio::test]
    async fn log_line_is_its_own_event() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.log_line("[1][12:00:00][Game]: Compiling");
        let event = next_event(&mut rx).await;
        assert_eq!(event["event"], "log_line");
        assert_eq!(event["data"]["line"], "[1][12:00:00][Game]: Compiling");
        assert!(event["data"]["target"].is_null());
    }

    #[tokio::test]
    async fn log_lines_go_to_the_log_channel() {
        let bus = EventBus::from_config(&NotificationConfig {
            default_target: Some("builds".to_string()),
            log_target: Some("build-log".to_string()),
        });
        let mut rx = bus.subscribe();

        bus.log_line("[2][12:00:01][Game]: Done");
        let line = next_event(&mut rx).await;
        assert_eq!(line["data"]["target"], "build-log");

        bus.notify(None, Notification::info("Game build started", ""));
        assert_eq!(next_event(&mut rx).await["data"]["target"], "builds");
    }

    #[test]
    fn publishing_without_subscribers_is_silent() {
        let bus = EventBus::default();
        bus.log_line("nobody listening");
        bus.notify(None, Notification::failure("Game build failed", "exit code 1"));
    }
}
