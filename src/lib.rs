//! a11yscope command-line front end.
//!
//! Exposes the CLI modules for integration testing; the scan engine itself lives in
//! `a11yscope-kernel`.

pub mod cli;

pub use cli::{ExitStatus, ReportFormat};
