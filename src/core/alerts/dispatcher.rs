// Alert dispatcher - renders alerts/status and fans out to every channel.
//
// Delivery is best effort: each channel is sent to independently and
// concurrently, failures are logged and never retried.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, warn};

use super::model::{AlertEvent, ChannelId};
use crate::core::error::DeliveryError;
use crate::core::status::StatusReport;

/// Per-message delivery flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Mention everyone in the channel
    pub broadcast: bool,
    /// Ask the platform to read the message aloud
    pub tts: bool,
}

/// Outbound channel capability provided by the chat integration.
/// Implementations own their own timeouts.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send(
        &self,
        channel: ChannelId,
        message: &str,
        options: SendOptions,
    ) -> Result<(), DeliveryError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub text: String,
    pub options: SendOptions,
}

/// Headline plus spoken follow-up for an alert.
pub fn render_alert(alert: &AlertEvent) -> Vec<RenderedMessage> {
    let (headline, spoken) = if alert.is_spawn() {
        (
            format!("**{} HAS SPAWNED!**", alert.entity),
            format!("{} has just spawned. Move before it's too late!", alert.entity),
        )
    } else {
        (
            format!("**{} spawns in {} minutes!**", alert.entity, alert.threshold),
            format!(
                "{} spawns in {} minutes. Get ready!",
                alert.entity, alert.threshold
            ),
        )
    };

    vec![
        RenderedMessage {
            text: headline,
            options: SendOptions {
                broadcast: true,
                tts: false,
            },
        },
        RenderedMessage {
            text: spoken,
            options: SendOptions {
                broadcast: false,
                tts: true,
            },
        },
    ]
}

pub fn render_status(report: &StatusReport) -> RenderedMessage {
    let mut text = String::from("**Respawn status:**\n");
    for entry in &report.entries {
        text.push_str(&format!("- **{}**: {}\n", entry.entity, entry.status));
    }
    RenderedMessage {
        text,
        options: SendOptions::default(),
    }
}

pub struct AlertDispatcher {
    sender: Arc<dyn ChannelSender>,
    channels: Vec<ChannelId>,
}

impl AlertDispatcher {
    pub fn new(sender: Arc<dyn ChannelSender>, channels: Vec<ChannelId>) -> Self {
        Self { sender, channels }
    }

    pub fn channels(&self) -> &[ChannelId] {
        &self.channels
    }

    /// Send one alert to every channel. Returns the failures, already logged.
    pub async fn dispatch(&self, alert: &AlertEvent) -> Vec<DeliveryError> {
        debug!(
            "Dispatching {} alert at {} minutes to {} channel(s)",
            alert.entity,
            alert.threshold,
            self.channels.len()
        );
        self.fan_out(&render_alert(alert)).await
    }

    /// Send a batch in one fan-out, so a stalled channel only holds up itself.
    pub async fn dispatch_all(&self, alerts: &[AlertEvent]) -> Vec<DeliveryError> {
        if alerts.is_empty() {
            return Vec::new();
        }
        let messages: Vec<RenderedMessage> = alerts.iter().flat_map(render_alert).collect();
        self.fan_out(&messages).await
    }

    /// Alerts followed by a status report, in that order on every channel.
    pub async fn dispatch_with_status(
        &self,
        alerts: &[AlertEvent],
        report: &StatusReport,
    ) -> Vec<DeliveryError> {
        let mut messages: Vec<RenderedMessage> = alerts.iter().flat_map(render_alert).collect();
        messages.push(render_status(report));
        self.fan_out(&messages).await
    }

    pub async fn broadcast_status(&self, report: &StatusReport) -> Vec<DeliveryError> {
        self.fan_out(&[render_status(report)]).await
    }

    /// Channels run concurrently; messages keep their order within a channel.
    async fn fan_out(&self, messages: &[RenderedMessage]) -> Vec<DeliveryError> {
        let sends = self.channels.iter().map(|channel| async move {
            let mut failures = Vec::new();
            for message in messages {
                if let Err(err) = self
                    .sender
                    .send(*channel, &message.text, message.options)
                    .await
                {
                    warn!("{}", err);
                    failures.push(err);
                }
            }
            failures
        });

        join_all(sends).await.into_iter().flatten().collect()
    }
}
