//! String literal encryption with deferred runtime decryption.
//!
//! Literals selected for removal are replaced by their AES-256-ECB
//! ciphertext (hex-encoded) plus a synchronous call to the emitted decrypter,
//! so the runtime observes the original value while static scanners see
//! noise. The 256-bit key derives from the per-package secret via
//! PBKDF2-HMAC-SHA1 with the secret doubling as salt; the same secret is
//! embedded in the decrypt-support smali so each package round-trips with its
//! own key.

use crate::inject::inject_before_return_void;
use crate::{support, Patcher};
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes256;
use async_trait::async_trait;
use dexcloak_core::context::ProjectContext;
use dexcloak_core::feature::StringDirectives;
use dexcloak_core::grammar::{ClassDecl, ConstString, LocalsDecl, StaticStringField};
use dexcloak_core::manifest::{find_main_activity, Element};
use dexcloak_utils::errors::PatchError;
use pbkdf2::pbkdf2_hmac;
use rand::rngs::StdRng;
use sha1::Sha1;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// The decrypt call every rewritten literal goes through.
const DECRYPT_CALL: &str =
    "Lcom/decryptstringmanager/DecryptString;->decryptString(Ljava/lang/String;)Ljava/lang/String;";

/// PBKDF2 iteration count; fixed, mirrored by the emitted support code.
const KDF_ROUNDS: u32 = 128;

const BLOCK: usize = 16;

/// Derives the package's 256-bit AES key from its secret. The secret is its
/// own salt; determinism across the encryptor and the emitted decrypter is
/// the point, not salting hygiene.
pub fn derive_key(secret: &str) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha1>(secret.as_bytes(), secret.as_bytes(), KDF_ROUNDS, &mut key);
    key
}

/// Encrypts a smali string literal: unescapes it exactly once (the payload is
/// the logical string, not its smali encoding), pads PKCS#7, encrypts each
/// block, and hex-encodes the result.
pub fn encrypt_string(literal: &str, key: &[u8; 32]) -> String {
    let mut data = unescape_literal(literal).into_bytes();
    let pad = BLOCK - data.len() % BLOCK;
    data.extend(std::iter::repeat(pad as u8).take(pad));

    let cipher = Aes256::new(GenericArray::from_slice(key));
    for chunk in data.chunks_mut(BLOCK) {
        cipher.encrypt_block(GenericArray::from_mut_slice(chunk));
    }
    hex::encode(data)
}

/// Inverse of [`encrypt_string`]; mirrors what the emitted support code does
/// at runtime. Returns `None` for malformed ciphertext.
pub fn decrypt_string(ciphertext: &str, key: &[u8; 32]) -> Option<String> {
    let mut data = hex::decode(ciphertext).ok()?;
    if data.is_empty() || data.len() % BLOCK != 0 {
        return None;
    }
    let cipher = Aes256::new(GenericArray::from_slice(key));
    for chunk in data.chunks_mut(BLOCK) {
        cipher.decrypt_block(GenericArray::from_mut_slice(chunk));
    }
    let pad = *data.last()? as usize;
    if pad == 0 || pad > BLOCK || pad > data.len() {
        return None;
    }
    data.truncate(data.len() - pad);
    String::from_utf8(data).ok()
}

/// Removes one level of smali literal escaping. Unknown escapes pass through
/// unchanged; the decrypter returns the logical string at runtime, so this
/// must run exactly once before encryption.
pub fn unescape_literal(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    let mut chars = literal.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('b') => out.push('\u{0008}'),
            Some('f') => out.push('\u{000c}'),
            Some('0') => out.push('\0'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('u') => {
                let digits: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&digits, 16)
                    .ok()
                    .and_then(char::from_u32)
                {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push_str("\\u");
                        out.push_str(&digits);
                    }
                }
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// A local constant-string site eligible for in-place rewriting.
struct LocalSite {
    line: usize,
    register: String,
    value: String,
}

/// A static string field with an inline initializer.
struct StaticSite {
    line: usize,
    name: String,
    value: String,
}

/// Everything one forward scan collects from a smali file.
#[derive(Default)]
struct FileScan {
    class_name: Option<String>,
    direct_methods_line: Option<usize>,
    static_constructor_line: Option<usize>,
    locals: Vec<LocalSite>,
    statics: Vec<StaticSite>,
}

fn scan_file(lines: &[String]) -> FileScan {
    let mut scan = FileScan::default();
    let mut current_local_count = 0usize;

    for (idx, line) in lines.iter().enumerate() {
        if scan.class_name.is_none() {
            if let Some(class) = ClassDecl::parse(line) {
                // First match wins and is sticky for the file.
                scan.class_name = Some(class.name);
                continue;
            }
        }
        if line.starts_with("# direct methods") {
            scan.direct_methods_line = Some(idx);
            continue;
        }
        if line.starts_with(".method static constructor <clinit>()V") {
            scan.static_constructor_line = Some(idx);
            continue;
        }
        if let Some(field) = StaticStringField::parse(line) {
            scan.statics.push(StaticSite {
                line: idx,
                name: field.name,
                value: field.value,
            });
            continue;
        }
        if let Some(locals) = LocalsDecl::parse(line) {
            current_local_count = locals.count;
            continue;
        }
        if let Some(c) = ConstString::parse(line) {
            // The decrypt invoke only addresses registers up to 15: direct
            // v-registers must be <= 15, parameter registers shift up by the
            // method's local count.
            let (kind, number) = c.register.split_at(1);
            let Ok(number) = number.parse::<usize>() else {
                continue;
            };
            let addressable = match kind {
                "v" => number <= 15,
                "p" => number + current_local_count <= 15,
                _ => false,
            };
            if addressable {
                scan.locals.push(LocalSite {
                    line: idx,
                    register: c.register,
                    value: c.value,
                });
            }
        }
    }
    scan
}

/// The string patch stage.
#[derive(Debug)]
pub struct StringPatcher {
    directives: StringDirectives,
}

impl StringPatcher {
    /// Creates the stage for the given string directives.
    pub fn new(directives: StringDirectives) -> Self {
        Self { directives }
    }

    fn encrypt_strings(&self, ctx: &mut ProjectContext) -> Result<(), PatchError> {
        if self.directives.remove.is_empty() {
            return Ok(());
        }
        let targets: HashSet<&str> = self.directives.remove.iter().map(String::as_str).collect();
        let key = derive_key(ctx.secret());
        let mut encrypted_any = false;

        for smali_file in ctx.smali_files() {
            debug!(file = %smali_file.display(), "encrypting constant strings");
            encrypted_any |= encrypt_file(smali_file, &targets, &key)?;
        }

        if encrypted_any && !ctx.decrypt_support_emitted {
            let first = ctx
                .smali_files()
                .first()
                .ok_or_else(|| PatchError::NoSmaliFiles(ctx.root().display().to_string()))?;
            let dir = first.parent().unwrap_or_else(|| ctx.root());
            fs::write(
                dir.join("DecryptString.smali"),
                support::string_decrypter(ctx.secret()),
            )?;
            ctx.decrypt_support_emitted = true;
        }
        Ok(())
    }

    fn add_strings(&self, ctx: &ProjectContext) -> Result<(), PatchError> {
        if self.directives.add.is_empty() {
            return Ok(());
        }
        let manifest = Element::parse_document(&fs::read_to_string(ctx.manifest_file())?)?;
        let Some(activity) = find_main_activity(&manifest) else {
            warn!("no main activity found, skipping plaintext string insertion");
            return Ok(());
        };
        let needle = format!("{}.smali", activity.replace('.', "/"));
        let payload = println_block(&self.directives.add);

        for smali_file in ctx.smali_files() {
            if !smali_file.to_string_lossy().ends_with(&needle) {
                continue;
            }
            let content = fs::read_to_string(smali_file)?;
            let (rewritten, changed) =
                inject_before_return_void(&content, is_on_create, &payload);
            if changed {
                fs::write(smali_file, rewritten)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Patcher for StringPatcher {
    fn name(&self) -> &'static str {
        "StringEncrypt"
    }

    async fn apply(
        &mut self,
        ctx: &mut ProjectContext,
        _rng: &mut StdRng,
    ) -> Result<(), PatchError> {
        // Encryption (removal) runs before plaintext injection (addition);
        // the two paths never see each other's literals.
        self.encrypt_strings(ctx)?;
        self.add_strings(ctx)?;
        Ok(())
    }
}

fn is_on_create(line: &str) -> bool {
    line.starts_with(".method ")
        && line.contains("onCreate")
        && !line.contains(" abstract ")
        && !line.contains(" native ")
}

/// Applies the removal rewrites to one file. Returns whether any literal was
/// actually encrypted.
fn encrypt_file(
    smali_file: &Path,
    targets: &HashSet<&str>,
    key: &[u8; 32],
) -> Result<bool, PatchError> {
    let content = fs::read_to_string(smali_file)?;
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
    let scan = scan_file(&lines);
    let mut encrypted = false;

    // Local constants: same register throughout, no renumbering needed.
    for site in &scan.locals {
        if !targets.contains(site.value.as_str()) {
            continue;
        }
        let register = &site.register;
        lines[site.line] = format!(
            "\tconst-string/jumbo {register}, \"{}\"\n\n\tinvoke-static {{{register}}}, {DECRYPT_CALL}\n\n\tmove-result-object {register}",
            encrypt_string(&site.value, key),
        );
        encrypted = true;
    }

    // Static fields: every matched declaration loses its inline initializer
    // so the plaintext never survives in the declaration; only requested
    // values get decrypt-and-assign code in the static constructor.
    let mut assign_code = String::new();
    for site in &scan.statics {
        let declaration = lines[site.line]
            .split(" = ")
            .next()
            .map(str::to_string);
        if let Some(declaration) = declaration {
            lines[site.line] = declaration;
        }
        if !targets.contains(site.value.as_str()) {
            continue;
        }
        let class_name =
            scan.class_name
                .as_deref()
                .ok_or_else(|| PatchError::MissingConstruct {
                    construct: "class declaration",
                    file: smali_file.display().to_string(),
                })?;
        assign_code.push_str(&format!(
            "\tconst-string/jumbo v0, \"{}\"\n\n\tinvoke-static {{v0}}, {DECRYPT_CALL}\n\n\tmove-result-object v0\n\n\tsput-object v0, {class_name}->{}:Ljava/lang/String;\n\n",
            encrypt_string(&site.value, key),
            site.name,
        ));
        encrypted = true;
    }

    if !assign_code.is_empty() {
        let assign_code = assign_code.trim_end_matches('\n');
        match scan.static_constructor_line {
            Some(ctor_line) => {
                // Merge into the existing static constructor, right after
                // its locals line; at least one register is needed.
                let locals_line = ctor_line + 1;
                let locals = lines
                    .get(locals_line)
                    .and_then(|l| LocalsDecl::parse(l))
                    .ok_or_else(|| PatchError::MissingConstruct {
                        construct: ".locals after <clinit>",
                        file: smali_file.display().to_string(),
                    })?;
                if locals.count == 0 {
                    lines[locals_line] = "\t.locals 1".to_string();
                }
                lines[locals_line] = format!("{}\n\n{assign_code}", lines[locals_line]);
            }
            None => {
                // Synthesize a full static constructor at the start of the
                // direct-methods section, or at file end when absent.
                let ctor = format!(
                    ".method static constructor <clinit>()V\n\t.locals 1\n\n{assign_code}\n\n\treturn-void\n.end method\n",
                );
                match scan.direct_methods_line {
                    Some(marker) => lines[marker] = format!("{}\n{ctor}", lines[marker]),
                    None => {
                        if let Some(last) = lines.last_mut() {
                            *last = format!("{last}\n{ctor}");
                        }
                    }
                }
            }
        }
    }

    fs::write(smali_file, format!("{}\n", lines.join("\n")))?;
    Ok(encrypted)
}

/// The plaintext decoy payload: one `System.out.println` per string.
fn println_block(strings: &[String]) -> String {
    let mut block: Vec<String> = Vec::with_capacity(strings.len() * 3);
    for value in strings {
        block.push(
            "\tsget-object v14, Ljava/lang/System;->out:Ljava/io/PrintStream;".to_string(),
        );
        block.push(format!("\tconst-string v15, \"{value}\""));
        block.push(
            "\tinvoke-virtual {v14, v15}, Ljava/io/PrintStream;->println(Ljava/lang/String;)V"
                .to_string(),
        );
    }
    block.join("\n\n")
}
