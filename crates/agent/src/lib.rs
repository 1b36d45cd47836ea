//! Conversation session engine for the cab driver bot.
//!
//! A turn flows through four pieces:
//! 1. **Intent extraction** (`conversation`) - text → action + city/language filters
//! 2. **Session store** (`session`) - per-user state, one turn at a time per user
//! 3. **Driver lookup** (`lookup`) - the external search collaborator and its adapters
//! 4. **Engine** (`runtime`) - merges filters, drives the flow state machine, renders replies
//!
//! The engine never fails a turn: lookup timeouts, unavailable backends, and inconsistent
//! sessions all become user-facing replies.

pub mod conversation;
pub mod lookup;
pub mod nearby;
pub mod replies;
pub mod runtime;
pub mod session;

pub use conversation::{ExtractedIntent, IntentExtractor, Paging};
pub use lookup::{
    CachedDriverLookup, DriverLookup, HttpDriverLookup, LookupError, StaticDriverLookup,
};
pub use replies::Reply;
pub use runtime::{AgentRuntime, RuntimeSettings, TurnOutcome};
pub use session::{SessionGuard, SessionStore};
