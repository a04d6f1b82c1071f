//! Command-line interface crate for DexCloak.

pub mod commands;
