//! Cross-crate integration tests for DexCloak.

#[cfg(test)]
mod core;
#[cfg(test)]
mod transforms;
