//! In-page helper scripts shipped with the kernel.

use serde_json::Value;

pub(crate) const REACT_COMMON: &str = include_str!("../scripts/react_common.js");
pub(crate) const DETECT_FRAMEWORK: &str = include_str!("../scripts/detect_framework.js");
pub(crate) const SCAN: &str = include_str!("../scripts/scan.js");
pub(crate) const RESOLVE_TARGETS: &str = include_str!("../scripts/resolve_targets.js");
pub(crate) const HISTORY_GUARD: &str = include_str!("../scripts/history_guard.js");
pub(crate) const HISTORY_RESTORE: &str = include_str!("../scripts/history_restore.js");
pub(crate) const TARGET_SIZE_CHECK: &str = include_str!("../scripts/checks/target_size.js");
pub(crate) const FOCUS_VISIBLE_CHECK: &str = include_str!("../scripts/checks/focus_visible.js");

/// Expression that installs the shared helpers, then calls `function_src` with `args`.
pub(crate) fn invoke(function_src: &str, args: &Value) -> String {
    format!("{REACT_COMMON};\n({function_src})({args})")
}

/// Expression that installs the shared helpers, then evaluates `expression` as-is.
pub(crate) fn with_helpers(expression: &str) -> String {
    format!("{REACT_COMMON};\n{expression}")
}

/// `true` when `window[marker].run` is callable.
pub(crate) fn marker_probe(marker: &str) -> String {
    let key = Value::String(marker.to_string());
    format!("typeof (window[{key}] && window[{key}].run) === \"function\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn invocation_separates_helpers_from_call() {
        let expr = invoke(RESOLVE_TARGETS, &json!({ "selectors": ["#a"] }));
        assert!(expr.starts_with("/* a11yscope:react-common */"));
        assert!(expr.contains("a11yscope:resolve-targets"));
        assert!(expr.contains(";\n(/* a11yscope:resolve-targets */"));
        assert!(expr.ends_with(r##"({"selectors":["#a"]})"##));
    }

    #[test]
    fn marker_probe_quotes_the_marker() {
        assert_eq!(
            marker_probe("__A11YSCOPE__"),
            r#"typeof (window["__A11YSCOPE__"] && window["__A11YSCOPE__"].run) === "function""#
        );
    }
}
