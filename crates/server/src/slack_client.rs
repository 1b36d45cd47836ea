//! Outbound Slack replies over the Web API.

use async_trait::async_trait;
use cabbot_core::config::SlackConfig;
use cabbot_slack::blocks::{Block, MessageTemplate, TextObject};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

const DM_FALLBACK_NOTE: &str =
    "_Note: I'm replying here because I don't have access to send messages in the other channel._";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Channel,
    DirectMessage,
    Skipped,
}

#[derive(Debug, Error)]
pub enum SlackClientError {
    #[error("slack request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("slack api `{method}` returned error `{error}`")]
    Api { method: &'static str, error: String },
}

#[async_trait]
pub trait ReplySink: Send + Sync {
    /// Posts `message` to `channel_id`, falling back to a DM with `user_id`.
    async fn deliver(
        &self,
        user_id: &str,
        channel_id: &str,
        message: &MessageTemplate,
        correlation_id: &str,
    ) -> Result<Delivery, SlackClientError>;
}

/// Used when no bot token is configured: replies are dropped.
pub struct NoopReplySink;

#[async_trait]
impl ReplySink for NoopReplySink {
    async fn deliver(
        &self,
        user_id: &str,
        _channel_id: &str,
        _message: &MessageTemplate,
        correlation_id: &str,
    ) -> Result<Delivery, SlackClientError> {
        debug!(
            event_name = "slack.reply.skipped",
            correlation_id = %correlation_id,
            user_id = %user_id,
            "no slack bot token configured; reply not posted"
        );
        Ok(Delivery::Skipped)
    }
}

pub struct SlackWebClient {
    client: Client,
    api_base_url: String,
    bot_token: SecretString,
}

#[derive(Serialize)]
struct PostMessageRequest<'a> {
    channel: &'a str,
    text: &'a str,
    blocks: &'a [Block],
}

#[derive(Serialize)]
struct OpenConversationRequest<'a> {
    users: &'a str,
}

#[derive(Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    channel: Option<ChannelRef>,
}

#[derive(Deserialize)]
struct ChannelRef {
    id: String,
}

impl SlackWebClient {
    pub fn from_config(config: &SlackConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder().build()?,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
        })
    }

    pub async fn post_message(
        &self,
        channel_id: &str,
        message: &MessageTemplate,
    ) -> Result<(), SlackClientError> {
        let request = PostMessageRequest {
            channel: channel_id,
            text: &message.fallback_text,
            blocks: &message.blocks,
        };
        self.call("chat.postMessage", &request).await.map(|_| ())
    }

    /// Opens (or reuses) the DM channel with `user_id`.
    pub async fn open_direct_message(&self, user_id: &str) -> Result<String, SlackClientError> {
        let response =
            self.call("conversations.open", &OpenConversationRequest { users: user_id }).await?;
        response.channel.map(|channel| channel.id).ok_or(SlackClientError::Api {
            method: "conversations.open",
            error: "missing channel".to_string(),
        })
    }

    async fn call<T: Serialize>(
        &self,
        method: &'static str,
        body: &T,
    ) -> Result<ApiResponse, SlackClientError> {
        let response: ApiResponse = self
            .client
            .post(format!("{}/{method}", self.api_base_url))
            .bearer_auth(self.bot_token.expose_secret())
            .json(body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !response.ok {
            return Err(SlackClientError::Api {
                method,
                error: response.error.unwrap_or_else(|| "unknown_error".to_string()),
            });
        }
        Ok(response)
    }
}

fn with_dm_note(message: &MessageTemplate) -> MessageTemplate {
    let mut message = message.clone();
    message.fallback_text = format!("{}\n\n{DM_FALLBACK_NOTE}", message.fallback_text);
    message.blocks.push(Block::Context {
        block_id: "cab.reply.dm_note.v1".to_string(),
        elements: vec![TextObject::mrkdwn(DM_FALLBACK_NOTE)],
    });
    message
}

#[async_trait]
impl ReplySink for SlackWebClient {
    async fn deliver(
        &self,
        user_id: &str,
        channel_id: &str,
        message: &MessageTemplate,
        correlation_id: &str,
    ) -> Result<Delivery, SlackClientError> {
        let channel_error = match self.post_message(channel_id, message).await {
            Ok(()) => return Ok(Delivery::Channel),
            Err(error) => error,
        };
        warn!(
            event_name = "slack.reply.channel_failed",
            correlation_id = %correlation_id,
            user_id = %user_id,
            channel_id = %channel_id,
            error = %channel_error,
            "channel post failed; falling back to a direct message"
        );

        let dm_channel = self.open_direct_message(user_id).await?;
        self.post_message(&dm_channel, &with_dm_note(message)).await?;
        Ok(Delivery::DirectMessage)
    }
}
