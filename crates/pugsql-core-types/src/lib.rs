//! Core types shared across PugSQL facilities
//!
//! This crate provides foundational constants used by both the error
//! handling and logging facilities:
//!
//! - **Schema constants**: Canonical field keys and event names

pub mod schema;
