//! # ClickMine Client
//!
//! Boundary to the chat platform: inbound event types, reply-markup
//! helpers, the [`ChatSession`] trait every miner drives, and the
//! [`BridgeSession`] implementation that talks to a local session
//! bridge daemon.

pub mod bridge;
pub mod session;
pub mod types;

pub use bridge::BridgeSession;
pub use session::{ChatSession, ClientError, ClientResult, Membership, ResolvedPeer};
pub use types::{ChatEvent, InlineButton, ReplyMarkup};
