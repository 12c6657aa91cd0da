//! sysupdater CLI library
//!
//! Manifest loading and report rendering used by the `sysupdater` binary.

pub mod manifest;
pub mod output;
