use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::models::{Alert, AlertSeverity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Sms,
    Email,
    Push,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Sms => "sms",
            Channel::Email => "email",
            Channel::Push => "push",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Critical alerts page by SMS and email, warnings go to email (and push
/// when enabled), info alerts are only stored.
pub fn channels_for(severity: AlertSeverity, warning_push: bool) -> Vec<Channel> {
    match severity {
        AlertSeverity::Critical => vec![Channel::Sms, Channel::Email],
        AlertSeverity::Warning if warning_push => vec![Channel::Email, Channel::Push],
        AlertSeverity::Warning => vec![Channel::Email],
        AlertSeverity::Info => Vec::new(),
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, channel: Channel, alert: &Alert) -> Result<()>;
}

/// Writes each notification to the log instead of a delivery provider.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    async fn send(&self, channel: Channel, alert: &Alert) -> Result<()> {
        info!(
            channel = channel.as_str(),
            resident_id = %alert.resident_id,
            alert_key = %alert.alert_key,
            "notification: {}",
            alert.details
        );
        Ok(())
    }
}

/// Keeps every successful send in memory. Channels listed in `failing`
/// reject all sends.
#[derive(Debug, Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<(Channel, Uuid)>>,
    failing: HashSet<Channel>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(channels: impl IntoIterator<Item = Channel>) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failing: channels.into_iter().collect(),
        }
    }

    pub async fn sent(&self) -> Vec<(Channel, Uuid)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(&self, channel: Channel, alert: &Alert) -> Result<()> {
        if self.failing.contains(&channel) {
            return Err(EngineError::Notification {
                channel: channel.to_string(),
                reason: "channel unavailable".to_string(),
            });
        }
        self.sent.lock().await.push((channel, alert.alert_id));
        Ok(())
    }
}
