//! Trading Assistant
//!
//! An AI operational assistant for a multi-trader crypto trading system:
//! - Tool-calling chat loop over any OpenAI-compatible completion API
//! - Bounded per-session conversation history
//! - Live trading context snapshots with threshold alerts
//! - Background monitor with alert dedup and position diffing
//!
//! TURN LOOP:
//! USER MESSAGE → MODEL → TOOL CALLS? → EXECUTE → FOLD BACK → FINAL ANSWER

pub mod agent;
pub mod ai;
pub mod api;
pub mod catalog;
pub mod context;
pub mod error;
pub mod manager;
pub mod models;
pub mod monitor;
pub mod prompts;
pub mod session;
pub mod store;
pub mod tools;

pub use error::Result;

// Re-export common types
pub use agent::{Agent, AgentConfig};
pub use models::*;
