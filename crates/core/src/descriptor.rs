//! Descriptor and register arithmetic.
//!
//! Dalvik method descriptors pack parameter types into one string: one-letter
//! codes for primitives, `L...;` for class references, `[` prefixes for array
//! dimensions. These helpers split a descriptor into its ordered type tokens,
//! count the registers a token list occupies (wide primitives take two), and
//! map primitive codes to their boxed counterparts for reflection codegen.

/// The eight Dalvik primitive type codes.
pub const PRIMITIVE_CODES: [char; 8] = ['I', 'Z', 'B', 'S', 'J', 'F', 'D', 'C'];

/// True if `c` is one of the eight primitive type codes.
pub fn is_primitive_code(c: char) -> bool {
    PRIMITIVE_CODES.contains(&c)
}

/// True if `token` is a single primitive code.
pub fn is_primitive(token: &str) -> bool {
    let mut chars = token.chars();
    matches!((chars.next(), chars.next()), (Some(c), None) if is_primitive_code(c))
}

/// True for wide primitives (`J` long and `D` double), which occupy two
/// consecutive register slots.
pub fn is_wide(token: &str) -> bool {
    token == "J" || token == "D"
}

/// Splits a raw parameter descriptor into its ordered type tokens.
///
/// Handles concatenated parameters, class references, primitive codes, and
/// arbitrarily nested array dimensions over either. Malformed input degrades
/// to an empty tail rather than an error, so re-concatenating the tokens of a
/// well-formed descriptor reproduces it exactly.
pub fn split_parameters(descriptor: &str) -> Vec<String> {
    let mut params = Vec::new();

    for chunk in descriptor.split(';') {
        if chunk.is_empty() {
            continue;
        }
        if chunk.starts_with('L') {
            // Class reference; the split consumed its terminator.
            params.push(format!("{chunk};"));
        } else if chunk.starts_with('[') {
            let chars: Vec<char> = chunk.chars().collect();
            for pos in 1..chars.len() {
                match chars[pos] {
                    // Multi-dimensional array, keep consuming prefixes.
                    '[' => {}
                    // Class array, the whole chunk is one token.
                    'L' => {
                        params.push(format!("{chunk};"));
                        break;
                    }
                    // Primitive array, then whatever follows it.
                    _ => {
                        params.push(chars[..=pos].iter().collect());
                        let rest: String = chars[pos + 1..].iter().collect();
                        params.extend(split_parameters(&rest));
                        break;
                    }
                }
            }
        } else if chunk.chars().next().is_some_and(is_primitive_code) {
            params.push(chunk[..1].to_string());
            params.extend(split_parameters(&chunk[1..]));
        }
    }

    params
}

/// Number of registers needed to pass the given parameter tokens: one per
/// token, two for wide primitives.
pub fn register_count(tokens: &[String]) -> usize {
    tokens
        .iter()
        .map(|t| if is_wide(t) { 2 } else { 1 })
        .sum()
}

/// A parsed method descriptor: the ordered parameter type tokens and the
/// return type token, as captured by the grammar layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    /// Parameter tokens in source order.
    pub parameter_types: Vec<String>,
    /// Return type token.
    pub return_type: String,
}

impl MethodDescriptor {
    /// Builds the descriptor from the raw parameter and return strings.
    pub fn new(params: &str, return_type: &str) -> Self {
        Self {
            parameter_types: split_parameters(params),
            return_type: return_type.to_string(),
        }
    }

    /// Registers consumed by the parameters; wide types take two.
    pub fn parameter_registers(&self) -> usize {
        register_count(&self.parameter_types)
    }
}

/// The reflection-side representation of one primitive type: its boxed class,
/// the `TYPE` field yielding its `Class` object, and the boxing/unboxing
/// conversion calls.
#[derive(Debug)]
pub struct Boxing {
    /// Boxed class descriptor, e.g. `Ljava/lang/Integer;`.
    pub boxed_class: &'static str,
    /// `sget-object` target yielding the primitive `Class`, e.g.
    /// `Ljava/lang/Integer;->TYPE:Ljava/lang/Class;`.
    pub type_field: &'static str,
    /// Static boxing conversion, e.g.
    /// `Ljava/lang/Integer;->valueOf(I)Ljava/lang/Integer;`.
    pub box_call: &'static str,
    /// Virtual unboxing conversion, e.g. `Ljava/lang/Integer;->intValue()I`.
    pub unbox_call: &'static str,
}

macro_rules! boxing_entry {
    ($code:literal, $class:literal, $unbox:literal) => {
        (
            $code,
            Boxing {
                boxed_class: concat!("Ljava/lang/", $class, ";"),
                type_field: concat!("Ljava/lang/", $class, ";->TYPE:Ljava/lang/Class;"),
                box_call: concat!(
                    "Ljava/lang/",
                    $class,
                    ";->valueOf(",
                    $code,
                    ")Ljava/lang/",
                    $class,
                    ";"
                ),
                unbox_call: concat!("Ljava/lang/", $class, ";->", $unbox, "()", $code),
            },
        )
    };
}

static BOXING: [(&str, Boxing); 8] = [
    boxing_entry!("I", "Integer", "intValue"),
    boxing_entry!("Z", "Boolean", "booleanValue"),
    boxing_entry!("B", "Byte", "byteValue"),
    boxing_entry!("S", "Short", "shortValue"),
    boxing_entry!("J", "Long", "longValue"),
    boxing_entry!("F", "Float", "floatValue"),
    boxing_entry!("D", "Double", "doubleValue"),
    boxing_entry!("C", "Character", "charValue"),
];

/// Looks up the boxing entry for a primitive type token. Object and array
/// tokens return `None`; they go through `const-class` directly and never
/// need this table.
pub fn boxing(token: &str) -> Option<&'static Boxing> {
    BOXING.iter().find(|(code, _)| *code == token).map(|(_, b)| b)
}

/// Converts a dotted plain Java type name (optionally with `[]` suffixes) to
/// descriptor form: `int` → `I`, `java.lang.String` → `Ljava/lang/String;`,
/// `byte[]` → `[B`.
pub fn plain_to_descriptor(plain: &str) -> String {
    let mut dims = 0;
    let mut base = plain.trim();
    while let Some(stripped) = base.strip_suffix("[]") {
        dims += 1;
        base = stripped;
    }
    let code = match base {
        "int" => "I".to_string(),
        "boolean" => "Z".to_string(),
        "byte" => "B".to_string(),
        "short" => "S".to_string(),
        "long" => "J".to_string(),
        "float" => "F".to_string(),
        "double" => "D".to_string(),
        "char" => "C".to_string(),
        "void" => "V".to_string(),
        class => format!("L{};", class.replace('.', "/")),
    };
    format!("{}{}", "[".repeat(dims), code)
}
