//! Telegram Autopilot Library
//!
//! Core of a multi-account Telegram userbot.
//!
//! This crate provides:
//! - A priority task queue gated by a rate limiter, with retries
//! - Automation rules (auto-reply, auto-forward, auto-post) and their evaluation
//! - Dispatch of incoming updates to automation, commands and subscribers
//! - Persistence of tasks, rules and the activity log
//! - Chat commands for the account owner

pub mod automation;
pub mod commands;
pub mod config;
pub mod events;
pub mod queue;
pub mod storage;
pub mod telegram;

#[cfg(test)]
mod test_support;
