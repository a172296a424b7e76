//! Common utilities and types shared across SpanStore crates.
//!
//! This module provides the error taxonomy every backend adapter reports
//! through, and the validated identifiers used to address spaces and
//! content items.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{ContentId, Properties, SpaceId};
