use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::blocks::{self, MessageTemplate};

pub const CAB_COMMAND: &str = "/cab";

/// Form fields Slack posts for a slash command; extra fields are ignored.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SlashCommandPayload {
    pub command: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub channel_id: String,
    pub user_id: String,
    #[serde(default)]
    pub trigger_id: String,
    #[serde(skip)]
    pub request_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandEnvelope {
    pub command: String,
    pub text: String,
    pub channel_id: String,
    pub user_id: String,
    pub request_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CabCommand {
    /// `/cab` with no text.
    Prompt,
    Help,
    Converse { text: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelType {
    Direct,
    Command,
}

impl ChannelType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Command => "command",
        }
    }
}

/// One user message handed to the conversation engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub user_id: String,
    pub channel_id: String,
    pub text: String,
    pub channel_type: ChannelType,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("unsupported slash command: {0}")]
    UnsupportedCommand(String),
    #[error("slash command is missing the user id")]
    MissingUser,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandRouteError {
    #[error("conversation service failed: {0}")]
    Service(String),
}

#[async_trait]
pub trait ConversationService: Send + Sync {
    async fn converse(
        &self,
        message: &InboundMessage,
        correlation_id: &str,
    ) -> Result<MessageTemplate, CommandRouteError>;
}

pub fn normalize_cab_command(
    payload: SlashCommandPayload,
) -> Result<CommandEnvelope, CommandParseError> {
    if payload.command.trim() != CAB_COMMAND {
        return Err(CommandParseError::UnsupportedCommand(payload.command));
    }
    if payload.user_id.trim().is_empty() {
        return Err(CommandParseError::MissingUser);
    }

    Ok(CommandEnvelope {
        command: "cab".to_owned(),
        text: payload.text.trim().to_owned(),
        channel_id: payload.channel_id,
        user_id: payload.user_id,
        request_id: payload.request_id,
    })
}

pub fn parse_cab_command(input: &str) -> CabCommand {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return CabCommand::Prompt;
    }
    if trimmed.eq_ignore_ascii_case("help") {
        return CabCommand::Help;
    }
    CabCommand::Converse { text: trimmed.to_owned() }
}

pub struct CommandRouter<S: ?Sized> {
    service: Arc<S>,
}

impl<S> CommandRouter<S>
where
    S: ConversationService + ?Sized,
{
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }

    pub async fn route(
        &self,
        envelope: CommandEnvelope,
    ) -> Result<MessageTemplate, CommandRouteError> {
        match parse_cab_command(&envelope.text) {
            CabCommand::Prompt => Ok(blocks::pickup_prompt_message()),
            CabCommand::Help => Ok(blocks::help_message()),
            CabCommand::Converse { text } => {
                let message = InboundMessage {
                    user_id: envelope.user_id,
                    channel_id: envelope.channel_id,
                    text,
                    channel_type: ChannelType::Command,
                };
                self.service.converse(&message, &envelope.request_id).await
            }
        }
    }
}

/// Echoes the message back; stands in for the engine in tests and previews.
#[derive(Default)]
pub struct EchoConversationService;

#[async_trait]
impl ConversationService for EchoConversationService {
    async fn converse(
        &self,
        message: &InboundMessage,
        _correlation_id: &str,
    ) -> Result<MessageTemplate, CommandRouteError> {
        Ok(blocks::text_message(&format!(
            "received ({}): {}",
            message.channel_type.as_str(),
            message.text
        )))
    }
}
