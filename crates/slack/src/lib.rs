//! Slack surface for the cab bot
//!
//! - **Events** (`events`) - Events API payloads, message/command/button dispatch
//! - **Slash Commands** (`commands`) - `/cab <text>` and the conversation service seam
//! - **Block Kit** (`blocks`) - driver list cards and reply messages
//! - **Dedup** (`dedup`) - bounded memory of processed deliveries
//! - **Signatures** (`signature`) - `X-Slack-Signature` verification
//!
//! ```text
//! Slack → signature check → EventDispatcher → Handlers → ConversationService
//!                                 ↓
//!                          Block Kit reply
//! ```

pub mod blocks;
pub mod commands;
pub mod dedup;
pub mod events;
pub mod signature;
