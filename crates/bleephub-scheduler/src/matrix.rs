//! Matrix expansion for parallel job generation.

use bleephub_core::workflow::{Combination, JobDef, MatrixDef, WorkflowDef, value_to_string};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MatrixError {
    #[error("job {job:?}: matrix expansion produces key {key:?} which is already a job")]
    DuplicateJobKey { job: String, key: String },
}

impl From<MatrixError> for bleephub_core::Error {
    fn from(err: MatrixError) -> Self {
        match &err {
            MatrixError::DuplicateJobKey { job, .. } => {
                bleephub_core::Error::invalid_job(job, err.to_string())
            }
        }
    }
}

/// A job after matrix expansion, ready to become a `WorkflowJob`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandedJob {
    pub key: String,
    pub display_name: String,
    /// Dependencies rewritten to expanded keys.
    pub needs: Vec<String>,
    /// Base key of the matrix this cell came from.
    pub matrix_group: Option<String>,
    pub matrix: Combination,
    pub def: JobDef,
}

/// Expander for matrix strategies.
#[derive(Debug, Default)]
pub struct MatrixExpander;

impl MatrixExpander {
    pub fn new() -> Self {
        Self
    }

    /// Expand a matrix into its combinations.
    ///
    /// Returns `None` when the matrix has neither axes nor includes, in
    /// which case the job is not expanded at all.
    pub fn expand(&self, matrix: &MatrixDef) -> Option<Vec<Combination>> {
        if matrix.values.is_empty() {
            return (!matrix.include.is_empty()).then(|| matrix.include.clone());
        }

        let mut combos = self.cartesian(&matrix.values);
        self.apply_includes(&mut combos, &matrix.include);
        combos.retain(|combo| {
            !matrix
                .exclude
                .iter()
                .any(|exclude| matches_all_keys(combo, exclude))
        });
        Some(combos)
    }

    /// Display name such as `test (ubuntu, 3.9)`, values in sorted-axis order.
    pub fn job_name(&self, base: &str, combo: &Combination) -> String {
        if combo.is_empty() {
            return base.to_string();
        }
        let values: Vec<String> = combo.values().map(value_to_string).collect();
        format!("{base} ({})", values.join(", "))
    }

    /// Expand every matrix job of a workflow and rewrite dependent `needs`.
    ///
    /// A job `test` with three cells becomes `test_0`, `test_1`, `test_2`;
    /// any job that needed `test` now needs all three.
    pub fn expand_workflow(
        &self,
        def: &WorkflowDef,
    ) -> Result<BTreeMap<String, ExpandedJob>, MatrixError> {
        let mut expanded = BTreeMap::new();
        let mut groups: BTreeMap<&str, Vec<String>> = BTreeMap::new();

        for (key, job) in &def.jobs {
            let base_name = job.name.as_deref().unwrap_or(key);
            let Some(combos) = job.matrix().and_then(|m| self.expand(m)) else {
                expanded.insert(
                    key.clone(),
                    ExpandedJob {
                        key: key.clone(),
                        display_name: base_name.to_string(),
                        needs: job.needs.clone(),
                        matrix_group: None,
                        matrix: Combination::new(),
                        def: job.clone(),
                    },
                );
                continue;
            };

            let mut cell_keys = Vec::with_capacity(combos.len());
            for (index, combo) in combos.into_iter().enumerate() {
                let cell_key = format!("{key}_{index}");
                if def.jobs.contains_key(&cell_key) {
                    return Err(MatrixError::DuplicateJobKey {
                        job: key.clone(),
                        key: cell_key,
                    });
                }
                expanded.insert(
                    cell_key.clone(),
                    ExpandedJob {
                        key: cell_key.clone(),
                        display_name: self.job_name(base_name, &combo),
                        needs: job.needs.clone(),
                        matrix_group: Some(key.clone()),
                        matrix: combo,
                        def: job.clone(),
                    },
                );
                cell_keys.push(cell_key);
            }
            groups.insert(key, cell_keys);
        }

        for job in expanded.values_mut() {
            let mut seen = BTreeSet::new();
            job.needs = job
                .needs
                .iter()
                .flat_map(|need| match groups.get(need.as_str()) {
                    Some(cells) => cells.clone(),
                    None => vec![need.clone()],
                })
                .filter(|need| seen.insert(need.clone()))
                .collect();
        }

        Ok(expanded)
    }

    fn cartesian(&self, values: &BTreeMap<String, Vec<serde_json::Value>>) -> Vec<Combination> {
        let mut combos = vec![Combination::new()];
        for (axis, axis_values) in values {
            combos = combos
                .iter()
                .flat_map(|combo| {
                    axis_values.iter().map(move |value| {
                        let mut next = combo.clone();
                        next.insert(axis.clone(), value.clone());
                        next
                    })
                })
                .collect();
        }
        combos
    }

    fn apply_includes(&self, combos: &mut Vec<Combination>, includes: &[Combination]) {
        for include in includes {
            let mut matched = false;
            for combo in combos.iter_mut() {
                if matches_shared_keys(combo, include) {
                    for (key, value) in include {
                        combo.entry(key.clone()).or_insert_with(|| value.clone());
                    }
                    matched = true;
                }
            }
            if !matched {
                combos.push(include.clone());
            }
        }
    }
}

/// Every key present in both has the same value.
fn matches_shared_keys(combo: &Combination, entry: &Combination) -> bool {
    entry.iter().all(|(key, value)| {
        combo
            .get(key)
            .is_none_or(|existing| value_to_string(existing) == value_to_string(value))
    })
}

/// The combination carries every key-value pair of the entry.
fn matches_all_keys(combo: &Combination, entry: &Combination) -> bool {
    entry.iter().all(|(key, value)| {
        combo
            .get(key)
            .is_some_and(|existing| value_to_string(existing) == value_to_string(value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bleephub_core::workflow::parse_workflow;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn combo(pairs: &[(&str, serde_json::Value)]) -> Combination {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn matrix(values: &[(&str, Vec<serde_json::Value>)]) -> MatrixDef {
        MatrixDef {
            values: values
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn cartesian_product_in_sorted_axis_order() {
        let m = matrix(&[
            ("version", vec![json!("1"), json!("2")]),
            ("os", vec![json!("ubuntu"), json!("macos")]),
        ]);
        let combos = MatrixExpander::new().expand(&m).unwrap();
        assert_eq!(
            combos,
            vec![
                combo(&[("os", json!("ubuntu")), ("version", json!("1"))]),
                combo(&[("os", json!("ubuntu")), ("version", json!("2"))]),
                combo(&[("os", json!("macos")), ("version", json!("1"))]),
                combo(&[("os", json!("macos")), ("version", json!("2"))]),
            ]
        );
    }

    #[test]
    fn include_extends_matching_combos_without_overwriting() {
        let mut m = matrix(&[("os", vec![json!("ubuntu"), json!("macos")])]);
        m.include = vec![
            combo(&[("os", json!("ubuntu")), ("experimental", json!(true))]),
            combo(&[("os", json!("windows")), ("shell", json!("pwsh"))]),
        ];
        let combos = MatrixExpander::new().expand(&m).unwrap();
        assert_eq!(
            combos,
            vec![
                combo(&[("experimental", json!(true)), ("os", json!("ubuntu"))]),
                combo(&[("os", json!("macos"))]),
                combo(&[("os", json!("windows")), ("shell", json!("pwsh"))]),
            ]
        );
    }

    #[test]
    fn include_without_shared_keys_extends_every_combo() {
        let mut m = matrix(&[("os", vec![json!("a"), json!("b")])]);
        m.include = vec![combo(&[("arch", json!("arm64"))])];
        let combos = MatrixExpander::new().expand(&m).unwrap();
        assert!(combos.iter().all(|c| c["arch"] == json!("arm64")));
        assert_eq!(combos.len(), 2);
    }

    #[test]
    fn exclude_uses_string_coercion() {
        let mut m = matrix(&[
            ("os", vec![json!("ubuntu"), json!("macos")]),
            ("version", vec![json!(1), json!(2)]),
        ]);
        m.exclude = vec![combo(&[("os", json!("macos")), ("version", json!("1"))])];
        let combos = MatrixExpander::new().expand(&m).unwrap();
        assert_eq!(combos.len(), 3);
        assert!(!combos.contains(&combo(&[("os", json!("macos")), ("version", json!(1))])));
    }

    #[test]
    fn include_only_and_empty_matrices() {
        let expander = MatrixExpander::new();
        let mut m = MatrixDef::default();
        assert_eq!(expander.expand(&m), None);

        m.include = vec![combo(&[("target", json!("wasm"))])];
        assert_eq!(expander.expand(&m), Some(m.include.clone()));
    }

    #[test]
    fn expansion_count_matches_algebra() {
        let mut m = matrix(&[
            ("a", vec![json!(1), json!(2), json!(3)]),
            ("b", vec![json!("x"), json!("y")]),
        ]);
        m.include = vec![combo(&[("a", json!(9)), ("b", json!("z"))])];
        m.exclude = vec![
            combo(&[("a", json!(1))]),
            combo(&[("b", json!("nope"))]),
        ];
        let combos = MatrixExpander::new().expand(&m).unwrap();
        // 6 product cells + 1 new include - 2 cells with a=1
        assert_eq!(combos.len(), 6 + 1 - 2);
    }

    #[test]
    fn display_names() {
        let expander = MatrixExpander::new();
        assert_eq!(
            expander.job_name("test", &combo(&[("version", json!(3.9)), ("os", json!("ubuntu"))])),
            "test (ubuntu, 3.9)"
        );
        assert_eq!(expander.job_name("build", &Combination::new()), "build");
    }

    #[test]
    fn expands_workflow_and_rewrites_needs() {
        let wf = parse_workflow(
            r#"
jobs:
  test:
    name: Test
    strategy:
      matrix:
        os: [ubuntu, macos]
    steps: [{run: make test}]
  lint:
    steps: [{run: make lint}]
  release:
    needs: [test, lint]
    steps: [{run: make release}]
"#,
        )
        .unwrap();

        let jobs = MatrixExpander::new().expand_workflow(&wf).unwrap();
        assert_eq!(
            jobs.keys().collect::<Vec<_>>(),
            vec!["lint", "release", "test_0", "test_1"]
        );
        assert_eq!(jobs["test_0"].display_name, "Test (ubuntu)");
        assert_eq!(jobs["test_1"].matrix_group.as_deref(), Some("test"));
        assert_eq!(jobs["test_1"].matrix["os"], json!("macos"));
        assert_eq!(jobs["release"].needs, vec!["test_0", "test_1", "lint"]);
        assert_eq!(jobs["lint"].matrix_group, None);
    }

    #[test]
    fn colliding_cell_key_is_rejected() {
        let wf = parse_workflow(
            r#"
jobs:
  test:
    strategy:
      matrix:
        n: [1]
    steps: [{run: x}]
  test_0:
    steps: [{run: y}]
"#,
        )
        .unwrap();
        let err = MatrixExpander::new().expand_workflow(&wf).unwrap_err();
        assert!(matches!(err, MatrixError::DuplicateJobKey { .. }));
    }
}
