//! Async client for TheOldReader REST API.
//!
//! Three pieces, composed top-down:
//!
//! - [`Connection`] - credentials, the auth-token lifecycle, and the generic
//!   authenticated-request primitive
//! - [`Item`] - one feed entry: state edits (read/starred/liked/shared) and
//!   a lazy details fetch
//! - [`ItemsSearch`] - cursor-paginated listings materialized as [`Item`]
//!   handles
//!
//! # Example
//!
//! ```ignore
//! use oldreader::{Connection, ItemsSearch};
//! use std::sync::Arc;
//!
//! let connection = Arc::new(Connection::builder(email, password).build()?);
//! let unread = ItemsSearch::new(Arc::clone(&connection))
//!     .get_unread_only()
//!     .await?;
//! for mut item in unread {
//!     let details = item.get_details().await?;
//!     println!("{}: {}", details.title, details.href);
//!     item.mark_as_read().await?;
//! }
//! ```
//!
//! All calls are blocking round trips to the remote service; the only local
//! state is the in-memory auth token, acquired lazily on the first request.

mod connection;
mod error;
mod item;
mod search;

pub use connection::{Connection, ConnectionBuilder, Method};
pub use error::ApiError;
pub use item::{Item, ItemDetails, StateTag};
pub use search::ItemsSearch;
