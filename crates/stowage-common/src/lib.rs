//! Stowage-Common: shared types, entities, and errors.
//!
//! This crate provides the vocabulary used across stowage:
//!
//! - **Typed IDs**: UUID wrappers for images and tasks
//! - **Core Types**: status and visibility enums
//! - **Request Context**: the opaque caller identity threaded through every layer
//! - **Models**: the raw `Image`, `Task` and `ImageMember` entities
//! - **Error Handling**: the unified error type and result alias
//!
//! # Examples
//!
//! ```
//! use stowage_common::{Error, Image, NewImage, RequestContext, Result};
//!
//! let ctx = RequestContext::new("tenant-a", "alice");
//! let image = Image::new(NewImage {
//!     owner: ctx.owner().map(str::to_string),
//!     ..Default::default()
//! })
//! .unwrap();
//! assert_eq!(image.owner.as_deref(), Some("tenant-a"));
//!
//! fn example() -> Result<()> {
//!     Err(Error::not_found("image"))
//! }
//! assert!(example().is_err());
//! ```

pub mod context;
pub mod error;
pub mod ids;
pub mod models;
pub mod types;

pub use context::RequestContext;
pub use error::{Error, Result};
pub use ids::*;
pub use models::*;
pub use types::*;
