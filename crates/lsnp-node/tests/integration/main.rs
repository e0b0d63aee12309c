//! Integration test entry point for lsnp-node.
//!
//! Run with: cargo test --test integration

mod harness;
mod social;
mod transfer;
mod game;
mod groups;
mod live;
