//! Coordinator command handlers
//!
//! One function per command kind. The session's dispatch match decodes the
//! envelope and calls into these; each returns the response to send back.

pub mod capture;
pub mod snapshot;
