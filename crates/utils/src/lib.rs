//! Shared error types for the DexCloak crates.

pub mod errors;
