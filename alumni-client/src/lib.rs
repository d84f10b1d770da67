// Library interface for the alumni comment thread client
#[macro_use]
pub mod logging;

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod likes;
pub mod notice;
pub mod optimistic;
pub mod session;
pub mod storage;
pub mod thread;
pub mod tree;

pub use error::{categorize_error, ThreadError, ThreadResult};
pub use thread::{Affordances, Confirm, DeleteOutcome, ThreadController};
pub use tree::{NodeId, RowKind};
