//! Request admission logic, independent of the HTTP framework.
//!
//! - [`auth`]: credential matching and `Basic` header encoding
//! - [`validation`]: the ordered admission checks and the rejection envelope

pub mod auth;
pub mod validation;

pub use auth::credentials_match;
pub use validation::{read_limited, Rejection, RequestValidator, ValidatedRequest};
