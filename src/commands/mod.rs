//! Caller-facing operations.
//!
//! Each takes the open store explicitly and reports failure as an
//! [`AppError`](crate::error::AppError); use
//! [`status_message`](crate::error::status_message) for the plain status
//! string.

pub mod attachments;
pub mod bats;
pub mod recordings;
pub mod sessions;
pub mod stats;
pub mod store;

pub use attachments::*;
pub use bats::*;
pub use recordings::*;
pub use sessions::*;
pub use stats::*;
pub use store::*;
