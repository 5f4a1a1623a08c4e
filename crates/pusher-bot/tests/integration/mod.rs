//! Integration tests for pusher-bot.
//!
//! These tests verify the interaction between components:
//! - Price service subscription lifecycle
//! - Subscription -> feed cache -> chain scheduler pipeline

pub mod common;
