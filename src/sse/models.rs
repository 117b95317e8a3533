use crate::session::SessionView;
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Success,
    Info,
    Warning,
    Error,
}

/// Short user-facing notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum AppEvent {
    PollsUpdated { polls: usize },
    PollsFailed { error: String },
    Session(SessionView),
    Notice(Notice),
}

impl AppEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AppEvent::PollsUpdated { .. } => "polls_updated",
            AppEvent::PollsFailed { .. } => "polls_failed",
            AppEvent::Session(_) => "session",
            AppEvent::Notice(_) => "notice",
        }
    }
}

pub type EventSender = broadcast::Sender<AppEvent>;

pub fn notify(events: &EventSender, level: NoticeLevel, message: impl Into<String>) {
    let _ = events.send(AppEvent::Notice(Notice {
        level,
        message: message.into(),
    }));
}

pub fn event_channel() -> EventSender {
    broadcast::channel(100).0
}
