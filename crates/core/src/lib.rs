pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;

pub use domain::driver::{DriverPage, DriverQuery, DriverRecord, Vehicle};
pub use domain::session::{Filter, FilterKey, FilterSet, Session, SessionAction, UserId};
pub use errors::{ApplicationError, ConversationError, DomainError, InterfaceError};
pub use flows::{DriverSearchFlow, FlowEngine, FlowState};
