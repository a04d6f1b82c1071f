//! API call indirection through runtime reflection.
//!
//! The remove path rewrites directly named call sites into calls through a
//! generic dispatcher resolved at runtime, defeating static API-reference
//! scanning. The add path plants decoy invocations of the requested APIs
//! behind a never-taken branch in the main activity.
//!
//! Rewriting is register-safe by construction: a call site is only touched
//! when its enclosing method leaves four scratch registers free above the
//! declared locals, and the locals declaration is raised by exactly four.
//! Registration code for the dispatcher accumulates against a per-package
//! instruction budget; once the ceiling is reached no further sites are
//! rewritten and prior edits are kept.

use crate::inject::inject_before_return_void;
use crate::{support, Patcher};
use async_trait::async_trait;
use dexcloak_core::context::{InstructionBudget, ProjectContext};
use dexcloak_core::descriptor::{boxing, is_wide, split_parameters, MethodDescriptor};
use dexcloak_core::feature::ApiDirectives;
use dexcloak_core::grammar::{
    Invoke, InvokeKind, LocalsDecl, MethodDecl, MethodSignature, MoveResult,
};
use dexcloak_core::manifest::{find_main_activity, Element};
use dexcloak_utils::errors::PatchError;
use rand::rngs::StdRng;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// The fixed runtime dispatcher the rewritten call sites go through.
const DISPATCHER_CALL: &str = "Lcom/apireflectionmanager/AdvancedApiReflection;->obfuscate(ILjava/lang/Object;[Ljava/lang/Object;)Ljava/lang/Object;";

/// Locals assumed when a method declaration carries no locals line; high
/// enough to fail the reflectability gate.
const ASSUMED_LOCALS: usize = 16;

/// Reflectability ceiling: parameter registers plus locals must stay at or
/// below this so that v[locals]..v[locals+3] are free without renumbering.
const REFLECTABLE_LIMIT: usize = 11;

/// A method declaration located during the per-file scan.
struct MethodSite {
    decl_line: usize,
    locals: usize,
    reflectable: bool,
}

/// The API patch stage.
#[derive(Debug)]
pub struct ApiPatcher {
    directives: ApiDirectives,
    /// Monotone index assigned to each rewritten call site, package-wide.
    method_index: usize,
    /// Accumulated registration code for the dispatcher's `<clinit>`.
    support_code: String,
}

impl ApiPatcher {
    /// Creates the stage for the given API directives.
    pub fn new(directives: ApiDirectives) -> Self {
        Self {
            directives,
            method_index: 0,
            support_code: String::new(),
        }
    }

    fn remove_apis(&mut self, ctx: &mut ProjectContext) -> Result<(), PatchError> {
        if self.directives.remove.is_empty() {
            return Ok(());
        }
        let dangerous: HashSet<String> = self.directives.remove.iter().cloned().collect();

        let files: Vec<_> = ctx.smali_files().to_vec();
        for smali_file in &files {
            if ctx.budget.exhausted() {
                break;
            }
            debug!(file = %smali_file.display(), "rewriting dangerous API calls through reflection");
            self.rewrite_file(smali_file, &dangerous, &mut ctx.budget)?;
        }

        // The support class can live in any smali directory; the rebuild
        // step relocates it.
        let first = ctx
            .smali_files()
            .first()
            .ok_or_else(|| PatchError::NoSmaliFiles(ctx.root().display().to_string()))?;
        let dir = first.parent().unwrap_or_else(|| ctx.root());
        fs::write(
            dir.join("AdvancedApiReflection.smali"),
            support::reflection_dispatcher(&self.support_code),
        )?;
        Ok(())
    }

    fn rewrite_file(
        &mut self,
        smali_file: &Path,
        dangerous: &HashSet<String>,
        budget: &mut InstructionBudget,
    ) -> Result<(), PatchError> {
        let content = fs::read_to_string(smali_file)?;
        let mut lines: Vec<String> = content.lines().map(str::to_string).collect();

        let mut methods = Vec::new();
        for (idx, line) in lines.iter().enumerate() {
            let Some(decl) = MethodDecl::parse(line) else {
                continue;
            };
            let param_registers =
                MethodDescriptor::new(&decl.params, &decl.return_type).parameter_registers();
            // The locals declaration sits on the next line; when it is
            // missing, assume every register is taken.
            let locals = lines
                .get(idx + 1)
                .and_then(|l| LocalsDecl::parse(l))
                .map_or(ASSUMED_LOCALS, |l| l.count);
            methods.push(MethodSite {
                decl_line: idx,
                locals,
                reflectable: param_registers + locals <= REFLECTABLE_LIMIT,
            });
        }

        let mut changed = false;
        for site in methods.iter().filter(|m| m.reflectable) {
            let mut cur = site.decl_line;
            loop {
                if budget.exhausted() {
                    break;
                }
                cur += 1;
                let Some(line) = lines.get(cur) else {
                    break;
                };
                if line.starts_with(".end method") {
                    break;
                }
                let Some(invoke) = Invoke::parse(line) else {
                    continue;
                };
                if !dangerous.contains(invoke.signature().as_str()) {
                    continue;
                }
                let receiver = match invoke.kind {
                    InvokeKind::Static => None,
                    InvokeKind::Virtual | InvokeKind::Interface => Some(
                        invoke
                            .registers
                            .first()
                            .cloned()
                            .ok_or_else(|| PatchError::MissingConstruct {
                                construct: "receiver register",
                                file: smali_file.display().to_string(),
                            })?,
                    ),
                    _ => continue,
                };

                // Fix the result move, if the call's result is consumed.
                let window_end = (cur + 10).min(lines.len().saturating_sub(1));
                for mr_idx in cur + 1..window_end {
                    if lines[mr_idx].contains("invoke-") {
                        // A new invocation; the previous result is unused.
                        break;
                    }
                    if let Some(mv) = MoveResult::parse(&lines[mr_idx]) {
                        lines[mr_idx] = rewrite_move_result(&mv.register, &invoke.return_type);
                        break;
                    }
                }

                self.support_code.push_str(&registration_code(
                    &invoke.class_name,
                    &invoke.method,
                    &invoke.params,
                    budget,
                ));

                lines[cur] = reflection_call(
                    self.method_index,
                    site.locals,
                    receiver.as_deref(),
                    &invoke.registers,
                    &invoke.params,
                )
                .ok_or_else(|| PatchError::MissingConstruct {
                    construct: "invoke argument registers",
                    file: smali_file.display().to_string(),
                })?;
                self.method_index += 1;

                // Four scratch registers on top of the declared locals.
                lines[site.decl_line + 1] = format!("\t.locals {}", site.locals + 4);
                changed = true;
            }
        }

        if changed {
            fs::write(smali_file, format!("{}\n", lines.join("\n")))?;
        }
        Ok(())
    }

    fn add_apis(&self, ctx: &ProjectContext) -> Result<(), PatchError> {
        if self.directives.add.is_empty() {
            return Ok(());
        }
        let manifest = Element::parse_document(&fs::read_to_string(ctx.manifest_file())?)?;
        let Some(activity) = find_main_activity(&manifest) else {
            warn!("no main activity found, skipping decoy API insertion");
            return Ok(());
        };
        let needle = format!("{}.smali", activity.replace('.', "/"));
        let Some(payload) = decoy_block(&self.directives.add) else {
            warn!("no usable API signatures among add directives");
            return Ok(());
        };

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
impl Patcher for ApiPatcher {
    fn name(&self) -> &'static str {
        "ApiReflection"
    }

    async fn apply(
        &mut self,
        ctx: &mut ProjectContext,
        _rng: &mut StdRng,
    ) -> Result<(), PatchError> {
        // Removals run before additions.
        self.remove_apis(ctx)?;
        self.add_apis(ctx)?;
        Ok(())
    }
}

fn is_on_create(line: &str) -> bool {
    line.starts_with(".method ")
        && line.contains("onCreate")
        && !line.contains(" abstract ")
        && !line.contains(" native ")
}

/// Emits the replacement for one intercepted call site: boxes the arguments
/// into an `Object[]`, loads the call-site index, and invokes the dispatcher
/// with the receiver or a null sentinel. Uses exactly the four scratch
/// registers above `local_count`. Returns `None` when the passed registers
/// do not cover the parameter list.
fn reflection_call(
    index: usize,
    local_count: usize,
    receiver: Option<&str>,
    registers: &[String],
    params_descriptor: &str,
) -> Option<String> {
    let params = split_parameters(params_descriptor);

    // Map each parameter to the register(s) carrying it; the receiver, when
    // present, occupies the first passed register.
    let mut reg_idx = usize::from(receiver.is_some());
    let mut param_registers: Vec<(&str, &[String])> = Vec::with_capacity(params.len());
    for param in &params {
        let width = if is_wide(param) { 2 } else { 1 };
        let regs = registers.get(reg_idx..reg_idx + width)?;
        param_registers.push((param.as_str(), regs));
        reg_idx += width;
    }

    let r1 = format!("v{local_count}");
    let r2 = format!("v{}", local_count + 1);
    let r3 = format!("v{}", local_count + 2);
    let r4 = format!("v{}", local_count + 3);

    let mut code = format!("\tconst/4 {r1}, {:#x}\n\n", params.len());
    if !params.is_empty() {
        code.push_str(&format!("\tnew-array {r1}, {r1}, [Ljava/lang/Object;\n\n"));
        for (position, &(param, regs)) in param_registers.iter().enumerate() {
            match boxing(param) {
                Some(entry) => {
                    code.push_str(&format!(
                        "\tinvoke-static {{{}}}, {}\n\n\tmove-result-object {r2}\n\n",
                        regs.join(", "),
                        entry.box_call,
                    ));
                    code.push_str(&format!(
                        "\tconst/4 {r4}, {position:#x}\n\n\taput-object {r2}, {r1}, {r4}\n\n",
                    ));
                }
                None => {
                    code.push_str(&format!(
                        "\tconst/4 {r3}, {position:#x}\n\n\taput-object {}, {r1}, {r3}\n\n",
                        regs[0],
                    ));
                }
            }
        }
    }

    code.push_str(&format!("\tconst/16 {r3}, {index:#x}\n\n"));
    match receiver {
        Some(instance) => {
            code.push_str(&format!(
                "\tinvoke-static {{{r3}, {instance}, {r1}}}, {DISPATCHER_CALL}",
            ));
        }
        None => {
            code.push_str(&format!("\tconst/4 {r4}, 0x0\n\n"));
            code.push_str(&format!(
                "\tinvoke-static {{{r3}, {r4}, {r1}}}, {DISPATCHER_CALL}",
            ));
        }
    }
    Some(code)
}

/// Rewrites the result move following a rewritten call: the dispatcher
/// returns `Object`, so primitive results unbox through the table (wide ones
/// with the wide move variant) and object results cast directly.
fn rewrite_move_result(register: &str, return_type: &str) -> String {
    match boxing(return_type) {
        Some(entry) => {
            let mut code = format!(
                "\tmove-result-object {register}\n\n\tcheck-cast {register}, {}\n\n",
                entry.boxed_class,
            );
            code.push_str(&format!(
                "\tinvoke-virtual {{{register}}}, {}\n\n",
                entry.unbox_call,
            ));
            if is_wide(return_type) {
                code.push_str(&format!("\tmove-result-wide {register}"));
            } else {
                code.push_str(&format!("\tmove-result {register}"));
            }
            code
        }
        None => format!(
            "\tmove-result-object {register}\n\n\tcheck-cast {register}, {return_type}",
        ),
    }
}

/// Emits the registration code for one call site: the `Class[]` of parameter
/// types, the reflective method lookup, and the append to the shared method
/// list. Each emitted instruction charges the budget with its estimated
/// length.
fn registration_code(
    class_name: &str,
    method: &str,
    params_descriptor: &str,
    budget: &mut InstructionBudget,
) -> String {
    let params = split_parameters(params_descriptor);

    let mut code = format!("\n\tconst/4 v1, {:#x}\n\n", params.len());
    budget.consume(1);

    if !params.is_empty() {
        code.push_str("\tnew-array v1, v1, [Ljava/lang/Class;\n\n");
        budget.consume(2);
    }

    for (position, param) in params.iter().enumerate() {
        code.push_str(&format!("\tconst/4 v2, {position:#x}\n\n"));
        budget.consume(1);

        match boxing(param) {
            Some(entry) => {
                code.push_str(&format!("\tsget-object v3, {}\n\n", entry.type_field));
                budget.consume(2);
            }
            None => {
                code.push_str(&format!("\tconst-class v3, {param}\n\n"));
                budget.consume(2);
            }
        }

        code.push_str("\taput-object v3, v1, v2\n\n");
        budget.consume(2);
    }

    code.push_str(&format!(
        "\tconst-class v2, {class_name}\n\n\tconst-string v3, \"{method}\"\n\n",
    ));
    budget.consume(4);

    code.push_str(
        "\tinvoke-virtual {v2, v3, v1}, Ljava/lang/Class;->getDeclaredMethod(Ljava/lang/String;[Ljava/lang/Class;)Ljava/lang/reflect/Method;\n\n",
    );
    budget.consume(3);

    code.push_str(
        "\tmove-result-object v1\n\n\tsget-object v2, Lcom/apireflectionmanager/AdvancedApiReflection;->obfuscatedMethods:Ljava/util/List;\n\n",
    );
    budget.consume(3);

    code.push_str("\tinvoke-interface {v2, v1}, Ljava/util/List;->add(Ljava/lang/Object;)Z\n");
    budget.consume(3);

    code
}

/// Builds the decoy block injected into `onCreate`: a try/catch-guarded
/// branch on `currentTimeMillis() < 0` that constructs each requested API's
/// class and invokes it with zeroed arguments. Returns `None` when no
/// directive parses as a method signature.
fn decoy_block(apis: &[String]) -> Option<String> {
    let unique: BTreeSet<&String> = apis.iter().collect();
    let mut calls: Vec<String> = Vec::new();

    for api in unique {
        let Some(sig) = MethodSignature::parse(api) else {
            warn!(api = %api, "unparseable API signature in add directive, skipping");
            continue;
        };
        let params = split_parameters(&sig.params);
        if params.len() > 14 {
            warn!(api = %api, "too many parameters for decoy call, skipping");
            continue;
        }
        calls.push(format!("new-instance v1, {}", sig.class_name));
        calls.push(format!("invoke-direct {{v1}}, {}-><init>()V", sig.class_name));

        // Zeroed arguments in the top registers, cast where a class type is
        // expected.
        let mut names = Vec::with_capacity(params.len());
        for (position, param) in params.iter().enumerate() {
            let reg = format!("v{}", 15 - params.len() + position);
            calls.push(format!("const/4 {reg}, 0x0"));
            if param.starts_with('L') {
                calls.push(format!("check-cast {reg}, {param}"));
            }
            names.push(reg);
        }
        let passed = if names.is_empty() {
            "v1".to_string()
        } else {
            format!("v1, {}", names.join(", "))
        };
        calls.push(format!("invoke-virtual {{{passed}}}, {api}"));
    }

    if calls.is_empty() {
        return None;
    }

    let mut block: Vec<String> = vec![
        "nop".to_string(),
        ":try_start_a".to_string(),
        "invoke-static {}, Ljava/lang/System;->currentTimeMillis()J".to_string(),
        "move-result-wide v2".to_string(),
        ".local v2, \"timestamp\":J".to_string(),
        "const-wide/16 v4, 0x0".to_string(),
        "cmp-long v1, v2, v4".to_string(),
        "if-gez v1, :cond_19".to_string(),
    ];
    block.extend(calls);
    block.extend(
        [
            ":try_end_19",
            ".catch Ljava/lang/Exception; {:try_start_a .. :try_end_19} :catch_1a",
            ".end local v2    # \"timestamp\":J",
            ":cond_19",
            ":goto_19",
            "return-void",
            ":catch_1a",
            "move-exception v0",
            ".local v0, \"e\":Ljava/lang/Exception;",
            "invoke-virtual {v0}, Ljava/lang/Exception;->printStackTrace()V",
            "goto :goto_19",
        ]
        .map(str::to_string),
    );

    Some(
        block
            .iter()
            .map(|line| format!("\t{line}"))
            .collect::<Vec<_>>()
            .join("\n\n"),
    )
}
