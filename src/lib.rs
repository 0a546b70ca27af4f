//! invsync - offline-first invoice storage with background sync
//!
//! This crate provides the core functionality for the `invsync` CLI tool.
//!
//! # Architecture
//!
//! - [`cli`] - Command-line interface using clap
//! - [`model`] - Data types (InvoicePayload, Record, QueueEntry, ConflictEntry)
//! - [`storage`] - SQLite record store, sync queue and audit events
//! - [`sync`] - Hashing, conflict resolution, OCC, duplicate screening, engine
//! - [`remote`] - Remote record store trait and its HTTP client
//! - [`config`] - Configuration management
//! - [`validate`] - Invoice validation and input normalization
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod error;
pub mod model;
pub mod remote;
pub mod storage;
pub mod sync;
pub mod validate;

pub use error::{Error, Result};
