use thiserror::Error;

use crate::flows::FlowTransitionError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("unauthorized: {message}")]
    Unauthorized { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Unauthorized { .. } => "The request signature could not be verified.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Unauthorized { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Unauthorized { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        match value {
            ApplicationError::Domain(DomainError::FlowTransition(_))
            | ApplicationError::Domain(DomainError::InvariantViolation(_)) => Self::BadRequest {
                message: "domain validation failed".to_owned(),
                correlation_id: "unassigned".to_owned(),
            },
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: "unassigned".to_owned() }
            }
        }
    }
}

/// Failures a single conversation turn can run into. None of them is fatal: each one
/// maps to a message the user sees, and the session is left in a consistent state.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConversationError {
    #[error("message did not match any known intent")]
    ExtractionAmbiguous,
    #[error("driver lookup timed out after {timeout_secs}s")]
    LookupTimeout { timeout_secs: u64 },
    #[error("driver lookup unavailable: {0}")]
    LookupUnavailable(String),
    #[error("session state corrupt: {0}")]
    SessionCorrupt(String),
    #[error("turn timed out after {timeout_secs}s")]
    TurnTimeout { timeout_secs: u64 },
}

impl ConversationError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::ExtractionAmbiguous => {
                "I didn't quite get that. Tell me a city, e.g. \"I need drivers in Jaipur\", or a language, e.g. \"drivers who speak Hindi\"."
            }
            Self::LookupTimeout { .. } | Self::TurnTimeout { .. } => {
                "Sorry, that request is taking too long. Please try again with a simpler query or type 'reset'."
            }
            Self::LookupUnavailable(_) => {
                "Sorry, I had an issue processing your request. Please try again or type 'reset'."
            }
            Self::SessionCorrupt(_) => {
                "Something went wrong with our conversation, so I've started over. Tell me where you need a driver."
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LookupTimeout { .. } | Self::LookupUnavailable(_) | Self::TurnTimeout { .. }
        )
    }
}

impl From<DomainError> for ConversationError {
    fn from(value: DomainError) -> Self {
        Self::SessionCorrupt(value.to_string())
    }
}

impl From<FlowTransitionError> for ConversationError {
    fn from(value: FlowTransitionError) -> Self {
        Self::SessionCorrupt(value.to_string())
    }
}
