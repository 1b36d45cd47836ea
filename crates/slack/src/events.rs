use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::{
    blocks::{MessageTemplate, MORE_DRIVERS_ACTION, RESET_SESSION_ACTION},
    commands::{
        normalize_cab_command, ChannelType, CommandParseError, CommandRouteError, CommandRouter,
        ConversationService, InboundMessage, SlashCommandPayload,
    },
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlackEnvelope {
    pub envelope_id: String,
    pub event: SlackEvent,
}

impl SlackEnvelope {
    /// Keys a repeated delivery of the same message would share: the event id and user+ts.
    pub fn dedup_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        if !self.envelope_id.is_empty() {
            keys.push(format!("event:{}", self.envelope_id));
        }
        if let SlackEvent::Message(message) = &self.event {
            if !message.ts.is_empty() {
                keys.push(format!("message:{}:{}", message.user_id, message.ts));
            }
        }
        keys
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlackEvent {
    SlashCommand(SlashCommandPayload),
    Message(MessageEvent),
    BlockAction(BlockActionEvent),
    Unsupported { event_type: String },
}

impl SlackEvent {
    pub fn event_type(&self) -> SlackEventType {
        match self {
            Self::SlashCommand(_) => SlackEventType::SlashCommand,
            Self::Message(_) => SlackEventType::Message,
            Self::BlockAction(_) => SlackEventType::BlockAction,
            Self::Unsupported { .. } => SlackEventType::Unsupported,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SlackEventType {
    SlashCommand,
    Message,
    BlockAction,
    Unsupported,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageEvent {
    pub channel_id: String,
    pub user_id: String,
    pub text: String,
    pub ts: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockActionEvent {
    pub channel_id: String,
    pub user_id: String,
    pub action_id: String,
    pub value: Option<String>,
}

/// Body of a `POST /slack/events` request.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventsApiRequest {
    UrlVerification {
        challenge: String,
    },
    EventCallback {
        #[serde(default)]
        event_id: String,
        event: CallbackEvent,
    },
    #[serde(other)]
    Other,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct CallbackEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub ts: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
}

impl CallbackEvent {
    /// Turns a callback into a dispatchable envelope. Bot echoes, edits and other
    /// subtyped messages, and blank texts yield `None`.
    pub fn into_envelope(self, event_id: String) -> Option<SlackEnvelope> {
        if self.bot_id.is_some() || self.subtype.is_some() {
            return None;
        }

        let event = match self.event_type.as_str() {
            "message" | "app_mention" => {
                let text = strip_mentions(self.text.as_deref().unwrap_or_default());
                let user_id = self.user.filter(|user| !user.trim().is_empty())?;
                if text.is_empty() {
                    return None;
                }
                SlackEvent::Message(MessageEvent {
                    channel_id: self.channel.unwrap_or_default(),
                    user_id,
                    text,
                    ts: self.ts.unwrap_or_default(),
                })
            }
            other => SlackEvent::Unsupported { event_type: other.to_owned() },
        };

        Some(SlackEnvelope { envelope_id: event_id, event })
    }
}

/// Drops `<@U123>` mention tokens so app mentions read like direct messages.
fn strip_mentions(text: &str) -> String {
    text.split_whitespace()
        .filter(|word| !(word.starts_with("<@") && word.ends_with('>')))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn parse_events_request(body: &[u8]) -> Result<EventsApiRequest, serde_json::Error> {
    serde_json::from_slice(body)
}

#[derive(Debug, Deserialize)]
struct InteractionPayload {
    #[serde(rename = "type")]
    payload_type: String,
    user: InteractionUser,
    #[serde(default)]
    channel: Option<InteractionChannel>,
    #[serde(default)]
    actions: Vec<InteractionAction>,
}

#[derive(Debug, Deserialize)]
struct InteractionUser {
    id: String,
}

#[derive(Debug, Deserialize)]
struct InteractionChannel {
    id: String,
}

#[derive(Debug, Deserialize)]
struct InteractionAction {
    action_id: String,
    #[serde(default)]
    value: Option<String>,
}

/// Parses the JSON carried in the `payload` form field of an interactivity request.
pub fn parse_block_action(payload: &str) -> Result<Option<BlockActionEvent>, serde_json::Error> {
    let payload: InteractionPayload = serde_json::from_str(payload)?;
    if payload.payload_type != "block_actions" {
        return Ok(None);
    }
    Ok(payload.actions.into_iter().next().map(|action| BlockActionEvent {
        channel_id: payload.channel.map(|channel| channel.id).unwrap_or_default(),
        user_id: payload.user.id,
        action_id: action.action_id,
        value: action.value,
    }))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Responded(MessageTemplate),
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error(transparent)]
    Parse(#[from] CommandParseError),
    #[error(transparent)]
    Route(#[from] CommandRouteError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> SlackEventType;
    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<SlackEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    pub async fn dispatch(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            debug!(
                event_name = "slack.dispatch.unhandled",
                correlation_id = %ctx.correlation_id,
                event_type = ?envelope.event.event_type(),
                "no handler registered for event"
            );
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

/// Slash commands, messages, and button clicks all routed to one conversation service.
pub fn conversation_dispatcher<S>(service: Arc<S>) -> EventDispatcher
where
    S: ConversationService + ?Sized + 'static,
{
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(SlashCommandHandler::new(service.clone()));
    dispatcher.register(MessageHandler::new(service.clone()));
    dispatcher.register(BlockActionHandler::new(service));
    dispatcher
}

pub struct SlashCommandHandler<S: ?Sized> {
    router: CommandRouter<S>,
}

impl<S> SlashCommandHandler<S>
where
    S: ConversationService + ?Sized,
{
    pub fn new(service: Arc<S>) -> Self {
        Self { router: CommandRouter::new(service) }
    }
}

#[async_trait]
impl<S> EventHandler for SlashCommandHandler<S>
where
    S: ConversationService + ?Sized + 'static,
{
    fn event_type(&self) -> SlackEventType {
        SlackEventType::SlashCommand
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        _ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::SlashCommand(payload) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        let normalized = normalize_cab_command(payload.clone())?;
        let message = self.router.route(normalized).await?;
        Ok(HandlerResult::Responded(message))
    }
}

pub struct MessageHandler<S: ?Sized> {
    service: Arc<S>,
}

impl<S> MessageHandler<S>
where
    S: ConversationService + ?Sized,
{
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> EventHandler for MessageHandler<S>
where
    S: ConversationService + ?Sized + 'static,
{
    fn event_type(&self) -> SlackEventType {
        SlackEventType::Message
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::Message(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        let message = InboundMessage {
            user_id: event.user_id.clone(),
            channel_id: event.channel_id.clone(),
            text: event.text.clone(),
            channel_type: ChannelType::Direct,
        };
        let reply = self.service.converse(&message, &ctx.correlation_id).await?;
        Ok(HandlerResult::Responded(reply))
    }
}

pub struct BlockActionHandler<S: ?Sized> {
    service: Arc<S>,
}

impl<S> BlockActionHandler<S>
where
    S: ConversationService + ?Sized,
{
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> EventHandler for BlockActionHandler<S>
where
    S: ConversationService + ?Sized + 'static,
{
    fn event_type(&self) -> SlackEventType {
        SlackEventType::BlockAction
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::BlockAction(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };
        let Some(text) = block_action_text(&event.action_id) else {
            return Ok(HandlerResult::Ignored);
        };

        let message = InboundMessage {
            user_id: event.user_id.clone(),
            channel_id: event.channel_id.clone(),
            text: text.to_owned(),
            channel_type: ChannelType::Direct,
        };
        let reply = self.service.converse(&message, &ctx.correlation_id).await?;
        Ok(HandlerResult::Responded(reply))
    }
}

/// The message a button click stands for.
fn block_action_text(action_id: &str) -> Option<&'static str> {
    match action_id {
        MORE_DRIVERS_ACTION => Some("more"),
        RESET_SESSION_ACTION => Some("reset"),
        _ => None,
    }
}
