//! Core types for knowledge-graph tool calling.
//!
//! Provides the conversation model ([`message::Conversation`]), the tool contract
//! ([`tool::Tool`] with static [`tool::CapabilitySpec`] tables), per-task session state
//! ([`session::TaskSession`]: provenance plus answer), and configuration loading.

pub mod config;
pub mod message;
pub mod session;
pub mod tool;
