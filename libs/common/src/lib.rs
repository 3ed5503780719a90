//! Shared building blocks for the file-exchange services
//!
//! Only ambient concerns live here: log bootstrap and shutdown signals.

pub mod logging;
pub mod shutdown;
