//! Job output resolution.
//!
//! A job declares outputs as `name: ${{ steps.<id>.outputs.<name> }}`; on
//! completion the runner reports a flat `"<id>.<name>" -> value` map. The
//! resolver joins the two and silently drops declarations it cannot match.

use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static STEP_OUTPUT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"\$\{\{\s*steps\.([^.]+)\.outputs\.([^}\s]+)\s*\}\}").ok()
});

/// Pull `(step_id, output_name)` out of a declared output expression.
pub fn parse_step_output(expr: &str) -> Option<(&str, &str)> {
    let caps = STEP_OUTPUT.as_ref()?.captures(expr)?;
    let step = caps.get(1)?.as_str();
    let name = caps.get(2)?.as_str();
    Some((step, name))
}

/// Flatten the runner's `outputVariables` object into plain strings.
///
/// Values arrive either as bare strings or as `{"value": "..."}` objects.
pub fn extract_output_variables(raw: &Value) -> BTreeMap<String, String> {
    let Some(entries) = raw.as_object() else {
        return BTreeMap::new();
    };
    entries
        .iter()
        .filter_map(|(key, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                Value::Object(obj) => obj.get("value")?.as_str()?.to_string(),
                _ => return None,
            };
            Some((key.clone(), value))
        })
        .collect()
}

/// Resolve declared outputs against the runner-reported step outputs.
pub fn resolve_job_outputs(
    declared: &BTreeMap<String, String>,
    step_outputs: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    declared
        .iter()
        .filter_map(|(name, expr)| {
            let (step, output) = parse_step_output(expr)?;
            let value = step_outputs.get(&format!("{step}.{output}"))?;
            Some((name.clone(), value.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn parses_step_output_expressions() {
        assert_eq!(
            parse_step_output("${{ steps.meta.outputs.tag }}"),
            Some(("meta", "tag"))
        );
        assert_eq!(
            parse_step_output("${{steps.build-1.outputs.artifact_path}}"),
            Some(("build-1", "artifact_path"))
        );
        assert_eq!(parse_step_output("${{ needs.a.outputs.b }}"), None);
        assert_eq!(parse_step_output("literal"), None);
    }

    #[test]
    fn extracts_both_value_shapes() {
        let raw = json!({
            "meta.tag": "v1.0",
            "meta.digest": {"value": "sha256:abc"},
            "meta.bad": 42,
        });
        let vars = extract_output_variables(&raw);
        assert_eq!(vars.len(), 2);
        assert_eq!(vars["meta.tag"], "v1.0");
        assert_eq!(vars["meta.digest"], "sha256:abc");
        assert!(extract_output_variables(&json!(null)).is_empty());
    }

    #[test]
    fn resolves_declared_outputs() {
        let declared = BTreeMap::from([
            ("tag".to_string(), "${{ steps.t.outputs.tag }}".to_string()),
            ("missing".to_string(), "${{ steps.x.outputs.y }}".to_string()),
            ("static".to_string(), "hello".to_string()),
        ]);
        let step_outputs = BTreeMap::from([("t.tag".to_string(), "v1.0".to_string())]);

        let resolved = resolve_job_outputs(&declared, &step_outputs);
        assert_eq!(
            resolved,
            BTreeMap::from([("tag".to_string(), "v1.0".to_string())])
        );
    }
}
