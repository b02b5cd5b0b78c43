//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the sync pipeline:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that other modules depend on.
//! It establishes the logging conventions, the configuration model loaded
//! from TOML, and the event broadcasting used to report sync progress.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
