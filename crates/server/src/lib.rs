//! HTTP front end for the node guard.
//!
//! [`app::run`] binds the axum router to the hyper accept loop and stops it on shutdown or on a
//! fatal upstream report.

pub mod app;
pub mod listener;
pub mod router;
