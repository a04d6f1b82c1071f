//! Single forward-scan injection into a target method body.

/// Per-file injection state.
enum Scan {
    Outside,
    InsideTargetMethod,
}

/// Rewrites `content` by inserting `payload` immediately before the first
/// `return-void` of every method matching `is_target`. One forward pass, no
/// lookahead; returns the new content and whether anything was injected.
pub(crate) fn inject_before_return_void<F>(
    content: &str,
    is_target: F,
    payload: &str,
) -> (String, bool)
where
    F: Fn(&str) -> bool,
{
    let mut out: Vec<&str> = Vec::new();
    let mut state = Scan::Outside;
    let mut changed = false;

    for line in content.lines() {
        match state {
            Scan::Outside => {
                if is_target(line) {
                    state = Scan::InsideTargetMethod;
                }
                out.push(line);
            }
            Scan::InsideTargetMethod => {
                if line.contains("return-void") {
                    out.push(payload);
                    changed = true;
                    state = Scan::Outside;
                } else if line.starts_with(".end method") {
                    // Target method without a matching return; leave it be.
                    state = Scan::Outside;
                }
                out.push(line);
            }
        }
    }

    (format!("{}\n", out.join("\n")), changed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const METHOD: &str = "\
.method protected onCreate(Landroid/os/Bundle;)V
    .locals 1

    return-void
.end method

.method public other()V
    .locals 0

    return-void
.end method
";

    fn is_on_create(line: &str) -> bool {
        line.starts_with(".method ") && line.contains("onCreate")
    }

    #[test]
    fn injects_before_first_return_void_of_target() {
        let (out, changed) = inject_before_return_void(METHOD, is_on_create, "    nop");
        assert!(changed);
        let nop_at = out.find("    nop").unwrap();
        let ret_at = out.find("    return-void").unwrap();
        assert!(nop_at < ret_at);
        // The non-target method is untouched.
        assert_eq!(out.matches("    nop").count(), 1);
    }

    #[test]
    fn no_target_means_no_change() {
        let (out, changed) =
            inject_before_return_void(METHOD, |l| l.contains("missing"), "    nop");
        assert!(!changed);
        assert_eq!(out, METHOD);
    }
}
