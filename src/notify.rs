//! Outbound notifications and feature usage metering. Delivery itself (push,
//! email) happens elsewhere; this crate only hands messages over.

use serde::Serialize;
use thiserror::Error;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    /// Sent to the other side of a debate when an appeal is filed.
    AppealReceived,
    /// Confirmation sent to whoever filed an appeal.
    AppealSubmitted,
    VerdictReady,
    TournamentStarted,
    TournamentPrize,
}

#[derive(Clone, Debug, Serialize)]
pub struct Notification {
    pub user_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub debate_id: Option<String>,
    pub tournament_id: Option<String>,
}

impl Notification {
    pub fn new(
        user_id: impl Into<String>,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            kind,
            title: title.into(),
            message: message.into(),
            debate_id: None,
            tournament_id: None,
        }
    }

    pub fn debate(mut self, debate_id: impl Into<String>) -> Self {
        self.debate_id = Some(debate_id.into());
        self
    }

    pub fn tournament(mut self, tournament_id: impl Into<String>) -> Self {
        self.tournament_id = Some(tournament_id.into());
        self
    }
}

#[derive(Debug, Error)]
#[error("failed to deliver notification: {0}")]
pub struct NotifyError(pub String);

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the log instead of delivering them.
#[derive(Default, Debug, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        tracing::info!(
            user = %notification.user_id,
            kind = ?notification.kind,
            debate = ?notification.debate_id,
            tournament = ?notification.tournament_id,
            "{}: {}",
            notification.title,
            notification.message
        );
        Ok(())
    }
}

pub const TOURNAMENT_CREATION_FEATURE: &str = "tournament_creation";

#[derive(Debug, Error)]
#[error("failed to record feature usage: {0}")]
pub struct UsageError(pub String);

pub trait UsageMeter: Send + Sync {
    fn record_usage(
        &self,
        user_id: &str,
        feature_key: &str,
    ) -> Result<(), UsageError>;
}

#[derive(Default, Debug, Clone, Copy)]
pub struct LogUsageMeter;

impl UsageMeter for LogUsageMeter {
    fn record_usage(
        &self,
        user_id: &str,
        feature_key: &str,
    ) -> Result<(), UsageError> {
        tracing::info!(user = user_id, feature = feature_key, "usage recorded");
        Ok(())
    }
}
