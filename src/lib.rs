//! AI CLI Bridge - Concurrent stream-json sessions with Claude Code.

pub mod cli;
pub mod config;
pub mod permission;
pub mod runner;
