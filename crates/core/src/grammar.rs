//! Line-local recognizers for the smali constructs the patch engine needs.
//!
//! Every recognizer takes one line of disassembly and returns a structured
//! match or `None`. Malformed lines are non-matches, never errors; the first
//! syntactically valid interpretation wins. No recognizer keeps state across
//! lines — any lookahead is the caller's business.

use regex::Regex;
use std::sync::LazyLock;

static CLASS_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\.class.+?(?P<class_name>\S+?;)").unwrap());

static METHOD_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\.method.+?(?P<method_name>\S+?)\((?P<method_param>\S*?)\)(?P<method_return>\S+)")
        .unwrap()
});

static LOCALS_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s+\.locals\s+(?P<local_count>\d+)").unwrap());

static INVOKE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s+(?P<invoke_type>invoke-\S+)\s+\{(?P<invoke_pass>[vp0-9,.\s]*)\},\s+(?P<invoke_object>\S+?)->(?P<invoke_method>\S+?)\((?P<invoke_param>\S*?)\)(?P<invoke_return>\S+)",
    )
    .unwrap()
});

static MOVE_RESULT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s+move-result.*?\s(?P<register>[vp0-9]+)").unwrap());

static CONST_STRING_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s+const-string(/jumbo)?\s+(?P<register>[vp0-9]+),\s+"(?P<string>.+)""#)
        .unwrap()
});

static STATIC_STRING_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^\.field.+?static.+?(?P<string_name>\S+?):Ljava/lang/String;\s+=\s+"(?P<string_value>.+)""#,
    )
    .unwrap()
});

static SIGNATURE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<class>\[*L[^;]+;)->(?P<method>[^(]+)\((?P<param>[^)]*)\)(?P<return>\S+)$")
        .unwrap()
});

/// A `.class` header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDecl {
    /// Class descriptor, e.g. `Lcom/example/Main;`.
    pub name: String,
}

impl ClassDecl {
    /// Recognizes a class header, or returns `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let caps = CLASS_PATTERN.captures(line)?;
        Some(Self {
            name: caps["class_name"].to_string(),
        })
    }
}

/// A `.method` header line with its raw parameter and return descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDecl {
    /// Method name as written, e.g. `onCreate`.
    pub name: String,
    /// Raw parameter descriptor between the parentheses.
    pub params: String,
    /// Raw return descriptor after the closing parenthesis.
    pub return_type: String,
}

impl MethodDecl {
    /// Recognizes a method header, or returns `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let caps = METHOD_PATTERN.captures(line)?;
        Some(Self {
            name: caps["method_name"].to_string(),
            params: caps["method_param"].to_string(),
            return_type: caps["method_return"].to_string(),
        })
    }
}

/// A `.locals N` declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalsDecl {
    /// Number of local registers declared by the enclosing method.
    pub count: usize,
}

impl LocalsDecl {
    /// Recognizes a locals declaration, or returns `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let caps = LOCALS_PATTERN.captures(line)?;
        let count = caps["local_count"].parse().ok()?;
        Some(Self { count })
    }
}

/// The dispatch kind of an invoke instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvokeKind {
    Static,
    Virtual,
    Interface,
    Direct,
    Super,
    /// Any other mnemonic (polymorphic, custom, ...), kept verbatim.
    Other(String),
}

impl InvokeKind {
    fn from_mnemonic(mnemonic: &str) -> Self {
        // `/range` and similar suffixes fold into the base kind.
        let base = mnemonic
            .strip_prefix("invoke-")
            .unwrap_or(mnemonic)
            .split('/')
            .next()
            .unwrap_or_default();
        match base {
            "static" => Self::Static,
            "virtual" => Self::Virtual,
            "interface" => Self::Interface,
            "direct" => Self::Direct,
            "super" => Self::Super,
            _ => Self::Other(mnemonic.to_string()),
        }
    }

    /// True for kinds that pass the receiver in the first register.
    pub fn has_receiver(&self) -> bool {
        matches!(self, Self::Virtual | Self::Interface)
    }
}

/// An invoke instruction: kind, passed registers, and the full target
/// signature split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoke {
    pub kind: InvokeKind,
    /// Registers between the braces, in order, trimmed and non-empty.
    pub registers: Vec<String>,
    /// Target class descriptor.
    pub class_name: String,
    /// Target method name.
    pub method: String,
    /// Raw parameter descriptor.
    pub params: String,
    /// Raw return descriptor.
    pub return_type: String,
}

impl Invoke {
    /// Recognizes an invoke instruction, or returns `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let caps = INVOKE_PATTERN.captures(line)?;
        let registers = caps["invoke_pass"]
            .split(", ")
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .collect();
        Some(Self {
            kind: InvokeKind::from_mnemonic(&caps["invoke_type"]),
            registers,
            class_name: caps["invoke_object"].to_string(),
            method: caps["invoke_method"].to_string(),
            params: caps["invoke_param"].to_string(),
            return_type: caps["invoke_return"].to_string(),
        })
    }

    /// The `Lcls;->name(params)ret` form used to match directives.
    pub fn signature(&self) -> String {
        format!(
            "{}->{}({}){}",
            self.class_name, self.method, self.params, self.return_type
        )
    }
}

/// A `move-result`, `move-result-wide` or `move-result-object` instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveResult {
    /// The destination register.
    pub register: String,
}

impl MoveResult {
    /// Recognizes a result-move instruction, or returns `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let caps = MOVE_RESULT_PATTERN.captures(line)?;
        Some(Self {
            register: caps["register"].to_string(),
        })
    }
}

/// A `const-string` (or `/jumbo`) declaration. The value carries the smali
/// literal escaping exactly as written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstString {
    pub register: String,
    pub value: String,
}

impl ConstString {
    /// Recognizes a constant-string declaration, or returns `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let caps = CONST_STRING_PATTERN.captures(line)?;
        Some(Self {
            register: caps["register"].to_string(),
            value: caps["string"].to_string(),
        })
    }
}

/// A static `Ljava/lang/String;` field declaration with an inline literal
/// initializer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticStringField {
    pub name: String,
    pub value: String,
}

impl StaticStringField {
    /// Recognizes a static string field with initializer, or returns `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let caps = STATIC_STRING_PATTERN.captures(line)?;
        if caps["string_value"].is_empty() {
            return None;
        }
        Some(Self {
            name: caps["string_name"].to_string(),
            value: caps["string_value"].to_string(),
        })
    }
}

/// A bare method signature (`Lcls;->name(params)ret`) as it appears in
/// feature identifiers, without a surrounding instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSignature {
    pub class_name: String,
    pub method: String,
    pub params: String,
    pub return_type: String,
}

impl MethodSignature {
    /// Parses a bare signature, or returns `None`.
    pub fn parse(signature: &str) -> Option<Self> {
        let caps = SIGNATURE_PATTERN.captures(signature.trim())?;
        Some(Self {
            class_name: caps["class"].to_string(),
            method: caps["method"].to_string(),
            params: caps["param"].to_string(),
            return_type: caps["return"].to_string(),
        })
    }
}
