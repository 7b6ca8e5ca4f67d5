//! Messaging support for nearchat

pub mod keyring;

pub use keyring::*;
