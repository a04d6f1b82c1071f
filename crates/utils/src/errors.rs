use thiserror::Error;

/// Error type for loading and classifying the feature-patch input.
#[derive(Debug, Error)]
pub enum FeatureError {
    /// The feature file could not be read.
    #[error("could not read feature file '{path}': {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// The feature file is not a flat JSON object of name → number pairs.
    #[error("malformed feature file: {0}")]
    Malformed(#[from] serde_json::Error),
    /// A feature value fell outside the [0, 1] range.
    #[error("feature '{name}' has value {value} outside [0, 1]")]
    ValueOutOfRange { name: String, value: f64 },
}

/// Error type for manifest parsing and mutation.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// XML reader/writer failure from quick-xml.
    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),
    /// Attribute bytes were not valid XML attribute syntax.
    #[error("malformed attribute: {0}")]
    Attribute(#[from] quick_xml::events::attributes::AttrError),
    /// The manifest is not valid UTF-8.
    #[error("manifest is not valid utf-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),
    /// The document ended before the root element was closed.
    #[error("unexpected end of document")]
    UnexpectedEof,
    /// A closing tag did not match the open element.
    #[error("mismatched closing tag </{0}>")]
    MismatchedTag(String),
    /// The document contained no root element.
    #[error("no root element found")]
    NoRoot,
    /// The manifest has no <application> element.
    #[error("manifest has no <application> element")]
    NoApplication,
    /// File read/write error.
    #[error("manifest i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error type for locating and invoking the external build tools.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The executable was not found via its env override or the search path.
    #[error("external tool '{0}' not found (set {1} or add it to PATH)")]
    NotFound(&'static str, &'static str),
    /// Spawning the process failed.
    #[error("could not run '{tool}': {source}")]
    Spawn {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },
    /// The tool exited with a nonzero status.
    #[error("'{tool}' failed with status {status}: {stderr}")]
    CommandFailed {
        tool: &'static str,
        status: i32,
        stderr: String,
    },
}

/// Error type for patch-stage failures.
#[derive(Debug, Error)]
pub enum PatchError {
    /// Smali file read/write error.
    #[error("smali i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// Manifest lookup or mutation failed.
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),
    /// An external tool invocation failed.
    #[error("tool error: {0}")]
    Tool(#[from] ToolError),
    /// The working directory holds no smali files to patch.
    #[error("no smali files found under '{0}'")]
    NoSmaliFiles(String),
    /// A construct the stage relies on was missing where it was assumed.
    #[error("expected {construct} in '{file}'")]
    MissingConstruct {
        construct: &'static str,
        file: String,
    },
}

/// Error type covering the whole lifecycle of one package.
#[derive(Debug, Error)]
pub enum PackageError {
    /// The input application file does not exist.
    #[error("unable to find application file '{0}'")]
    MissingInput(String),
    /// The feature-patch input was missing or malformed.
    #[error("feature input error: {0}")]
    Feature(#[from] FeatureError),
    /// A patch stage failed; the package is abandoned.
    #[error("patch stage '{stage}' failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: PatchError,
    },
    /// Opening the decoded working directory failed.
    #[error("workspace setup failed: {0}")]
    Setup(#[from] PatchError),
    /// Decoding the package into the working directory failed.
    #[error("decode failed: {0}")]
    Decode(#[from] ToolError),
    /// Working directory setup failed.
    #[error("workspace i/o error: {0}")]
    Io(#[from] std::io::Error),
}
