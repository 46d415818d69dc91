//! Stream relay
//!
//! HTTP producers and logging consumers wired to logical channels. The
//! [`messaging`] layer binds those channels to whichever broker backend the
//! active configuration profile selects.

pub mod api;
pub mod config;
pub mod consumers;
pub mod error;
pub mod messaging;

pub use error::{AppError, Result};
