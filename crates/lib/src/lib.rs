//! tgcord core library: relays Telegram chats into Discord channels.
//!
//! The poller long-polls Telegram, the router classifies each update into one event kind, and
//! the relay gates, formats and forwards it to Discord while recording message identities so
//! later edits can be applied to the relayed copy.

pub mod config;
pub mod identity;
pub mod platform;
pub mod poller;
pub mod relay;
pub mod router;
