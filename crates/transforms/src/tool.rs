//! Wrappers around the external build tools the pipeline shells out to.
//!
//! Each tool is located once at startup, via its environment override or a
//! PATH search; a missing tool is fatal before any package work begins.
//! Invocations are single awaited child processes with no partial-result
//! handling; any nonzero exit aborts the package.

use dexcloak_core::context::SignConfig;
use dexcloak_utils::errors::ToolError;
use std::env;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

/// Decodes and rebuilds packages.
#[derive(Debug, Clone)]
pub struct Apktool {
    path: PathBuf,
}

/// Signs rebuilt packages.
#[derive(Debug, Clone)]
pub struct Jarsigner {
    path: PathBuf,
}

/// Aligns signed packages.
#[derive(Debug, Clone)]
pub struct Zipalign {
    path: PathBuf,
}

/// All three tools, located together at startup.
#[derive(Debug, Clone)]
pub struct ToolSuite {
    pub apktool: Apktool,
    pub jarsigner: Jarsigner,
    pub zipalign: Zipalign,
}

impl ToolSuite {
    /// Locates every required tool, failing fast on the first missing one.
    pub fn locate() -> Result<Self, ToolError> {
        Ok(Self {
            apktool: Apktool::locate()?,
            jarsigner: Jarsigner::locate()?,
            zipalign: Zipalign::locate()?,
        })
    }
}

impl Apktool {
    /// Locates apktool via `APKTOOL_PATH` or the search path.
    pub fn locate() -> Result<Self, ToolError> {
        locate_executable("apktool", "APKTOOL_PATH").map(|path| Self { path })
    }

    /// Decodes `apk` into `out_dir`, replacing any previous decode.
    pub async fn decode(&self, apk: &Path, out_dir: &Path) -> Result<(), ToolError> {
        run(
            "apktool",
            Command::new(&self.path)
                .arg("d")
                .arg("--force")
                .arg(apk)
                .arg("-o")
                .arg(out_dir),
        )
        .await
    }

    /// Rebuilds the decoded tree in `dir` into `out_apk`.
    pub async fn build(&self, dir: &Path, out_apk: &Path) -> Result<(), ToolError> {
        run(
            "apktool",
            Command::new(&self.path)
                .arg("b")
                .arg(dir)
                .arg("-o")
                .arg(out_apk),
        )
        .await
    }
}

impl Jarsigner {
    /// Locates jarsigner via `JARSIGNER_PATH` or the search path.
    pub fn locate() -> Result<Self, ToolError> {
        locate_executable("jarsigner", "JARSIGNER_PATH").map(|path| Self { path })
    }

    /// Signs `apk` in place with the configured keystore.
    pub async fn sign(&self, apk: &Path, sign: &SignConfig) -> Result<(), ToolError> {
        run(
            "jarsigner",
            Command::new(&self.path)
                .arg("-sigalg")
                .arg("SHA1withRSA")
                .arg("-digestalg")
                .arg("SHA-1")
                .arg("-keystore")
                .arg(&sign.keystore)
                .arg("-storepass")
                .arg(&sign.keystore_password)
                .arg("-keypass")
                .arg(&sign.key_password)
                .arg(apk)
                .arg(&sign.key_alias),
        )
        .await
    }
}

impl Zipalign {
    /// Locates zipalign via `ZIPALIGN_PATH` or the search path.
    pub fn locate() -> Result<Self, ToolError> {
        locate_executable("zipalign", "ZIPALIGN_PATH").map(|path| Self { path })
    }

    /// Aligns `input` into `output` on 4-byte boundaries.
    pub async fn align(&self, input: &Path, output: &Path) -> Result<(), ToolError> {
        run(
            "zipalign",
            Command::new(&self.path)
                .arg("-p")
                .arg("-f")
                .arg("4")
                .arg(input)
                .arg(output),
        )
        .await
    }
}

fn locate_executable(name: &'static str, env_var: &'static str) -> Result<PathBuf, ToolError> {
    if let Some(override_path) = env::var_os(env_var) {
        let path = PathBuf::from(override_path);
        if path.is_file() {
            return Ok(path);
        }
        return Err(ToolError::NotFound(name, env_var));
    }
    let search_path = env::var_os("PATH").unwrap_or_default();
    for dir in env::split_paths(&search_path) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    Err(ToolError::NotFound(name, env_var))
}

async fn run(tool: &'static str, command: &mut Command) -> Result<(), ToolError> {
    debug!(tool, ?command, "running external tool");
    let output = command
        .output()
        .await
        .map_err(|source| ToolError::Spawn { tool, source })?;
    if !output.status.success() {
        return Err(ToolError::CommandFailed {
            tool,
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_tool_is_reported_with_its_override_var() {
        let err = locate_executable("definitely-not-a-real-tool", "DEXCLOAK_TEST_TOOL_PATH")
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("definitely-not-a-real-tool"));
        assert!(message.contains("DEXCLOAK_TEST_TOOL_PATH"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_surfaces_stderr() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("failing-tool");
        std::fs::write(&script, "#!/bin/sh\necho boom >&2\nexit 3\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let err = run("apktool", &mut Command::new(&script)).await.unwrap_err();
        match err {
            ToolError::CommandFailed { status, stderr, .. } => {
                assert_eq!(status, 3);
                assert!(stderr.contains("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn zero_exit_succeeds() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("ok-tool");
        std::fs::write(&script, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        run("zipalign", &mut Command::new(&script)).await.unwrap();
    }
}
