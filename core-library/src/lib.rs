//! # Library Layout Module
//!
//! Describes where files live in the date-structured library tree.
//!
//! ## Overview
//!
//! This module provides:
//! - [`DateContext`] parsing and rendering (`YYYY/MM month/DD`)
//! - [`FileMapping`], a source/destination pair with a validated date context
//! - Manifest loading and the [`MappingGenerator`]
//! - A [`DirectoryScanner`] for trees that are already date-structured

pub mod date_context;
pub mod error;
pub mod generator;
pub mod manifest;
pub mod models;
pub mod scan;

pub use date_context::{find_date_context, DateContext};
pub use error::{LibraryError, Result};
pub use generator::MappingGenerator;
pub use manifest::{Manifest, ManifestRecord};
pub use models::FileMapping;
pub use scan::DirectoryScanner;
