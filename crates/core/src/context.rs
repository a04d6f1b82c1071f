//! The mutable unit of work for one application package.
//!
//! A `ProjectContext` is created after the external decode step has unpacked
//! the package into a working directory, is borrowed mutably by each patch
//! stage in sequence, and is discarded once the rebuild stage has handed the
//! result to external packaging. It owns everything stages must not share:
//! the injected-instruction budget, the one-shot support-file flag, and the
//! package secret.

use crate::feature::Feature;
use dexcloak_utils::errors::PatchError;
use rand::distr::Alphanumeric;
use rand::Rng;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Length of the generated package secret.
const SECRET_LEN: usize = 32;

/// Monotone counter of instructions injected for the reflection support
/// class, bounded by a fixed ceiling.
#[derive(Debug, Clone)]
pub struct InstructionBudget {
    used: usize,
    ceiling: usize,
}

impl InstructionBudget {
    /// Default ceiling on injected support instructions per package.
    pub const DEFAULT_CEILING: usize = 60_000;

    /// Creates a budget with the given ceiling.
    pub fn new(ceiling: usize) -> Self {
        Self { used: 0, ceiling }
    }

    /// Records `count` injected instructions.
    pub fn consume(&mut self, count: usize) {
        self.used += count;
    }

    /// True once the ceiling has been met or exceeded.
    pub fn exhausted(&self) -> bool {
        self.used >= self.ceiling
    }

    /// Instructions consumed so far.
    pub fn used(&self) -> usize {
        self.used
    }
}

impl Default for InstructionBudget {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CEILING)
    }
}

/// Signing parameters for the rebuild stage.
#[derive(Debug, Clone)]
pub struct SignConfig {
    pub keystore: PathBuf,
    pub keystore_password: String,
    pub key_alias: String,
    pub key_password: String,
}

/// Per-package mutable state shared by the pipeline stages.
#[derive(Debug)]
pub struct ProjectContext {
    root: PathBuf,
    smali_files: Vec<PathBuf>,
    manifest: PathBuf,
    /// Features applied to this package, kept for reporting.
    pub features: Vec<Feature>,
    /// Injected-instruction budget for the reflection support class.
    pub budget: InstructionBudget,
    /// Set once the string-decrypt support file has been emitted.
    pub decrypt_support_emitted: bool,
    secret: String,
    /// Final packaged output path; nothing may exist there on failure.
    pub output_apk: PathBuf,
    /// Signing parameters consumed by the rebuild stage.
    pub sign: SignConfig,
}

impl ProjectContext {
    /// Opens a decoded package directory: locates the manifest, collects the
    /// smali file tree, and generates the package secret.
    pub fn open(
        root: PathBuf,
        features: Vec<Feature>,
        output_apk: PathBuf,
        sign: SignConfig,
    ) -> Result<Self, PatchError> {
        let manifest = root.join("AndroidManifest.xml");
        if !manifest.is_file() {
            return Err(PatchError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no AndroidManifest.xml under '{}'", root.display()),
            )));
        }

        let mut smali_files = Vec::new();
        collect_smali_files(&root, &mut smali_files)?;
        if smali_files.is_empty() {
            return Err(PatchError::NoSmaliFiles(root.display().to_string()));
        }
        smali_files.sort();

        Ok(Self {
            root,
            smali_files,
            manifest,
            features,
            budget: InstructionBudget::default(),
            decrypt_support_emitted: false,
            secret: generate_secret(),
            output_apk,
            sign,
        })
    }

    /// The working directory holding the decoded package.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The manifest file path.
    pub fn manifest_file(&self) -> &Path {
        &self.manifest
    }

    /// The smali files collected at open time, in sorted order. Support
    /// files emitted by stages are intentionally not re-scanned.
    pub fn smali_files(&self) -> &[PathBuf] {
        &self.smali_files
    }

    /// The package secret feeding key derivation and the emitted
    /// decrypt-support artifact.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Replaces the generated secret; used by tests that need determinism.
    pub fn set_secret(&mut self, secret: impl Into<String>) {
        self.secret = secret.into();
    }
}

/// Generates a fresh alphanumeric package secret from OS entropy.
pub fn generate_secret() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(SECRET_LEN)
        .map(char::from)
        .collect()
}

fn collect_smali_files(dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_smali_files(&path, out)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some("smali") {
            out.push(path);
        }
    }
    Ok(())
}
