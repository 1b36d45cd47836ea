use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cabbot_agent::{AgentRuntime, Reply};
use cabbot_core::domain::driver::DriverRecord;
use cabbot_core::domain::session::UserId;
use cabbot_core::errors::ConversationError;
use cabbot_slack::blocks::{self, MessageTemplate};
use cabbot_slack::commands::{CommandRouteError, ConversationService, InboundMessage};
use serde::Serialize;
use tracing::warn;

/// Runs engine turns for every ingress, bounded by the per-turn deadline.
pub struct TurnService {
    runtime: Arc<AgentRuntime>,
    turn_timeout: Duration,
}

/// `response` payload of a `driverList` chat reply.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DriverListBody {
    pub drivers: Vec<DriverRecord>,
    pub suggestion: String,
}

impl TurnService {
    pub fn new(runtime: Arc<AgentRuntime>, turn_timeout: Duration) -> Self {
        Self { runtime, turn_timeout }
    }

    pub fn runtime(&self) -> &Arc<AgentRuntime> {
        &self.runtime
    }

    pub async fn reply(&self, user_id: &str, text: &str, correlation_id: &str) -> Reply {
        let user_id = UserId::new(user_id);
        match tokio::time::timeout(
            self.turn_timeout,
            self.runtime.handle_turn(&user_id, text, correlation_id),
        )
        .await
        {
            Ok(outcome) => outcome.reply,
            Err(_) => {
                warn!(
                    event_name = "session.turn.timeout",
                    correlation_id = %correlation_id,
                    user_id = %user_id,
                    timeout_secs = self.turn_timeout.as_secs(),
                    "turn exceeded its deadline"
                );
                Reply::LookupFailed(ConversationError::TurnTimeout {
                    timeout_secs: self.turn_timeout.as_secs(),
                })
            }
        }
    }
}

pub fn render_message(reply: &Reply) -> MessageTemplate {
    match reply {
        Reply::Drivers(page) => blocks::driver_list_message(page, &reply.text()),
        other => blocks::text_message(&other.text()),
    }
}

/// JSON body for `/chat`: structured drivers for lists, the reply text otherwise.
pub fn chat_body(reply: &Reply) -> serde_json::Value {
    match reply {
        Reply::Drivers(page) => {
            let suggestion = if page.has_more {
                "Type 'more' to see more drivers, or 'reset' to start over."
            } else {
                "Refine with a language or type 'reset' to start over."
            };
            serde_json::to_value(DriverListBody {
                drivers: page.drivers.clone(),
                suggestion: suggestion.to_string(),
            })
            .unwrap_or(serde_json::Value::Null)
        }
        other => serde_json::Value::String(other.text()),
    }
}

#[async_trait]
impl ConversationService for TurnService {
    async fn converse(
        &self,
        message: &InboundMessage,
        correlation_id: &str,
    ) -> Result<MessageTemplate, CommandRouteError> {
        let reply = self.reply(&message.user_id, &message.text, correlation_id).await;
        Ok(render_message(&reply))
    }
}
