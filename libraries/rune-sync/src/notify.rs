//! Fire-and-forget messages to the user.

use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub message: String,
    pub severity: Severity,
    /// `None` keeps the notification up until the user dismisses it.
    pub auto_dismiss: Option<Duration>,
}

impl Notification {
    pub fn new(message: impl Into<String>, severity: Severity) -> Self {
        Self {
            message: message.into(),
            severity,
            auto_dismiss: None,
        }
    }

    pub fn dismiss_after(mut self, duration: Duration) -> Self {
        self.auto_dismiss = Some(duration);
        self
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Routes notifications into the `log` facade. Handy where there is no UI to show them.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        let level = match notification.severity {
            Severity::Info | Severity::Success => log::Level::Info,
            Severity::Warning => log::Level::Warn,
            Severity::Error => log::Level::Error,
        };
        log::log!(level, "{}", notification.message);
    }
}

pub(crate) fn plural(count: usize) -> &'static str {
    if count == 1 { "" } else { "s" }
}
