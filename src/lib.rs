//! Sigwatch Library
//!
//! Trading-signal lifecycle monitor: admission, tracking, outcomes

pub mod cache;
pub mod config;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod feeds;
pub mod jobs;
pub mod journal;
pub mod persistence;
pub mod replay;
pub mod tracker;
pub mod types;
