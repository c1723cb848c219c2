//! Stowage-DB: database schema, migrations, and query operations
//!
//! Reference SQLite persistence for stowage using rusqlite and r2d2
//! connection pooling. The entities themselves live in `stowage-common`;
//! this crate only maps them to and from rows.
//!
//! # Modules
//!
//! - `migrations` - Database schema migrations
//! - `pool` - Connection pool management
//! - `queries` - Database query operations
//!
//! # Example
//!
//! ```no_run
//! use stowage_common::{Image, NewImage};
//! use stowage_db::pool::{get_conn, init_pool};
//! use stowage_db::queries::{images, usage};
//!
//! let pool = init_pool("/var/lib/stowage/stowage.db").unwrap();
//! let conn = get_conn(&pool).unwrap();
//!
//! let image = Image::new(NewImage::default()).unwrap();
//! images::insert_image(&conn, &image).unwrap();
//! println!("used: {}", usage::storage_usage(&conn, "tenant-a", None).unwrap());
//! ```

pub mod migrations;
pub mod pool;
pub mod queries;
