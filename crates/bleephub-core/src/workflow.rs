//! Workflow definitions and the YAML parser.
//!
//! Fields that accept more than one shape (`needs`, `runs-on`, `container`,
//! `services`, `concurrency`) go through untagged enums. Jobs are
//! deserialized one at a time so every failure names the job it came from.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// One matrix cell: axis name to value. Keys iterate in sorted order.
pub type Combination = BTreeMap<String, Value>;

/// A parsed workflow file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowDef {
    pub name: String,
    pub env: BTreeMap<String, String>,
    pub concurrency: Option<ConcurrencyDef>,
    pub jobs: BTreeMap<String, JobDef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyDef {
    #[serde(deserialize_with = "text")]
    pub group: String,
    #[serde(rename = "cancel-in-progress")]
    pub cancel_in_progress: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct JobDef {
    #[serde(deserialize_with = "optional_text")]
    pub name: Option<String>,
    #[serde(deserialize_with = "runs_on")]
    pub runs_on: Vec<String>,
    #[serde(deserialize_with = "container")]
    pub container: Option<ContainerDef>,
    #[serde(deserialize_with = "services")]
    pub services: BTreeMap<String, ServiceDef>,
    #[serde(deserialize_with = "needs")]
    pub needs: Vec<String>,
    #[serde(deserialize_with = "text_map")]
    pub env: BTreeMap<String, String>,
    #[serde(deserialize_with = "text_map")]
    pub outputs: BTreeMap<String, String>,
    pub strategy: Option<StrategyDef>,
    pub steps: Vec<StepDef>,
    #[serde(rename = "if", deserialize_with = "optional_text")]
    pub if_expr: Option<String>,
    pub continue_on_error: bool,
    /// Zero means the server default applies.
    pub timeout_minutes: u32,
}

impl JobDef {
    /// The job container image, whichever shape `container:` was written in.
    pub fn container_image(&self) -> Option<&str> {
        self.container
            .as_ref()
            .map(|c| c.image.as_str())
            .filter(|image| !image.is_empty())
    }

    pub fn matrix(&self) -> Option<&MatrixDef> {
        self.strategy.as_ref().and_then(|s| s.matrix.as_ref())
    }

    /// Fail-fast defaults to on when the strategy leaves it unset.
    pub fn fail_fast(&self) -> bool {
        self.strategy
            .as_ref()
            .and_then(|s| s.fail_fast)
            .unwrap_or(true)
    }

    pub fn max_parallel(&self) -> u32 {
        self.strategy.as_ref().map(|s| s.max_parallel).unwrap_or(0)
    }
}

/// A job or service container. `container: "img"` yields only `image`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ContainerDef {
    pub image: String,
    #[serde(deserialize_with = "text_map")]
    pub env: BTreeMap<String, String>,
    #[serde(deserialize_with = "text_list")]
    pub ports: Vec<String>,
    #[serde(deserialize_with = "text_list")]
    pub volumes: Vec<String>,
    #[serde(deserialize_with = "optional_text")]
    pub options: Option<String>,
    pub credentials: Option<Credentials>,
}

pub type ServiceDef = ContainerDef;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Credentials {
    #[serde(deserialize_with = "text")]
    pub username: String,
    #[serde(deserialize_with = "text")]
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct StrategyDef {
    pub matrix: Option<MatrixDef>,
    pub fail_fast: Option<bool>,
    /// Zero means unlimited.
    pub max_parallel: u32,
}

/// Axes plus the reserved `include`/`exclude` lists.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(try_from = "BTreeMap<String, Value>")]
pub struct MatrixDef {
    pub values: BTreeMap<String, Vec<Value>>,
    pub include: Vec<Combination>,
    pub exclude: Vec<Combination>,
}

impl TryFrom<BTreeMap<String, Value>> for MatrixDef {
    type Error = String;

    fn try_from(raw: BTreeMap<String, Value>) -> std::result::Result<Self, String> {
        let mut matrix = MatrixDef::default();
        for (key, value) in raw {
            let Value::Array(items) = value else {
                return Err(format!("matrix.{key} must be a list"));
            };
            if key != "include" && key != "exclude" {
                matrix.values.insert(key, items);
                continue;
            }

            let entries = items
                .into_iter()
                .map(|item| match item {
                    Value::Object(entry) => Ok(entry.into_iter().collect::<Combination>()),
                    _ => Err(format!("matrix.{key} entries must be maps")),
                })
                .collect::<std::result::Result<Vec<_>, _>>()?;
            if key == "include" {
                matrix.include = entries;
            } else {
                matrix.exclude = entries;
            }
        }
        Ok(matrix)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StepDef {
    #[serde(deserialize_with = "optional_text")]
    pub id: Option<String>,
    #[serde(deserialize_with = "optional_text")]
    pub name: Option<String>,
    #[serde(deserialize_with = "optional_text")]
    pub uses: Option<String>,
    #[serde(deserialize_with = "optional_text")]
    pub run: Option<String>,
    #[serde(deserialize_with = "text_map")]
    pub with: BTreeMap<String, String>,
    #[serde(deserialize_with = "text_map")]
    pub env: BTreeMap<String, String>,
    #[serde(rename = "if", deserialize_with = "optional_text")]
    pub if_expr: Option<String>,
    #[serde(deserialize_with = "optional_text")]
    pub shell: Option<String>,
}

/// What a step executes. `run` wins when both are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction<'a> {
    Run(&'a str),
    Uses(&'a str),
}

impl StepDef {
    pub fn action(&self) -> Option<StepAction<'_>> {
        match (&self.run, &self.uses) {
            (Some(run), _) => Some(StepAction::Run(run)),
            (None, Some(uses)) => Some(StepAction::Uses(uses)),
            (None, None) => None,
        }
    }
}

/// A parsed `uses:` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionRef {
    /// `./path` or `../path` inside the checked-out repository.
    Local { path: String },
    /// `owner/repo[/path]@ref`.
    Repository {
        name_with_owner: String,
        path: Option<String>,
        git_ref: String,
    },
}

impl ActionRef {
    pub fn parse(uses: &str) -> Self {
        if uses.starts_with("./") || uses.starts_with("../") {
            return ActionRef::Local {
                path: uses.to_string(),
            };
        }

        let (target, git_ref) = match uses.rsplit_once('@') {
            Some((target, git_ref)) => (target, git_ref.to_string()),
            None => (uses, String::new()),
        };

        let mut parts = target.splitn(3, '/');
        let owner = parts.next().unwrap_or_default();
        let (name_with_owner, path) = match parts.next() {
            Some(repo) => (
                format!("{owner}/{repo}"),
                parts.next().map(str::to_string),
            ),
            None => (target.to_string(), None),
        };

        ActionRef::Repository {
            name_with_owner,
            path,
            git_ref,
        }
    }
}

/// String coercion used wherever matrix values meet strings: comparisons,
/// display names and context data.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Top level of a workflow file. Jobs stay raw until parsed one by one.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WorkflowFile {
    #[serde(deserialize_with = "text")]
    name: String,
    #[serde(deserialize_with = "text_map")]
    env: BTreeMap<String, String>,
    #[serde(deserialize_with = "concurrency")]
    concurrency: Option<ConcurrencyDef>,
    jobs: Option<BTreeMap<String, serde_yaml::Value>>,
}

/// Parse a workflow file.
pub fn parse_workflow(source: &str) -> Result<WorkflowDef> {
    let file = serde_yaml::from_str::<Option<WorkflowFile>>(source)?.unwrap_or_default();
    let raw_jobs = file.jobs.unwrap_or_default();
    if raw_jobs.is_empty() {
        return Err(Error::InvalidWorkflow("workflow has no jobs".to_string()));
    }

    let mut jobs = BTreeMap::new();
    for (key, node) in raw_jobs {
        let job: JobDef =
            serde_yaml::from_value(node).map_err(|e| Error::invalid_job(&key, e.to_string()))?;
        if let Some(index) = job.steps.iter().position(|step| step.action().is_none()) {
            return Err(Error::invalid_job(
                &key,
                format!("step {}: must define run or uses", index + 1),
            ));
        }
        jobs.insert(key, job);
    }

    Ok(WorkflowDef {
        name: file.name,
        env: file.env,
        concurrency: file.concurrency,
        jobs,
    })
}

/// A YAML scalar read as text, so `fetch-depth: 0` and `fetch-depth: "0"` agree.
#[derive(Deserialize)]
#[serde(untagged, expecting = "a string, number or boolean")]
enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<Scalar> for String {
    fn from(scalar: Scalar) -> Self {
        match scalar {
            Scalar::Bool(b) => b.to_string(),
            Scalar::Int(n) => n.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Text(s) => s,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged, expecting = "a value or a list of values")]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> From<OneOrMany<T>> for Vec<T> {
    fn from(value: OneOrMany<T>) -> Self {
        match value {
            OneOrMany::One(item) => vec![item],
            OneOrMany::Many(items) => items,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged, expecting = "needs must be a job key or a list of job keys")]
enum Needs {
    One(String),
    Many(Vec<String>),
}

#[derive(Deserialize)]
#[serde(untagged, expecting = "runs-on must be a label, a list of labels or a group mapping")]
enum RunsOn {
    Label(String),
    Labels(Vec<String>),
    Group {
        #[serde(default, deserialize_with = "text_list")]
        labels: Vec<String>,
    },
}

#[derive(Deserialize)]
#[serde(untagged, expecting = "concurrency must be a group name or a mapping")]
enum ConcurrencySpec {
    Group(Scalar),
    Full(ConcurrencyDef),
}

#[derive(Deserialize)]
#[serde(untagged, expecting = "an image name or a container mapping")]
enum ContainerSpec {
    Image(String),
    Full(ContainerDef),
}

impl From<ContainerSpec> for ContainerDef {
    fn from(spec: ContainerSpec) -> Self {
        match spec {
            ContainerSpec::Image(image) => ContainerDef {
                image,
                ..Default::default()
            },
            ContainerSpec::Full(container) => container,
        }
    }
}

type FieldResult<T, E> = std::result::Result<T, E>;

fn text<'de, D: Deserializer<'de>>(deserializer: D) -> FieldResult<String, D::Error> {
    Ok(Option::<Scalar>::deserialize(deserializer)?
        .map(String::from)
        .unwrap_or_default())
}

fn optional_text<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> FieldResult<Option<String>, D::Error> {
    text(deserializer).map(|s| Some(s).filter(|s| !s.is_empty()))
}

fn text_map<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> FieldResult<BTreeMap<String, String>, D::Error> {
    let map = Option::<BTreeMap<String, Option<Scalar>>>::deserialize(deserializer)?;
    Ok(map
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| (key, value.map(String::from).unwrap_or_default()))
        .collect())
}

fn text_list<'de, D: Deserializer<'de>>(deserializer: D) -> FieldResult<Vec<String>, D::Error> {
    let items = Option::<OneOrMany<Scalar>>::deserialize(deserializer)?;
    Ok(items
        .map(Vec::from)
        .unwrap_or_default()
        .into_iter()
        .map(String::from)
        .collect())
}

fn needs<'de, D: Deserializer<'de>>(deserializer: D) -> FieldResult<Vec<String>, D::Error> {
    Ok(match Option::<Needs>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(Needs::One(key)) => vec![key],
        Some(Needs::Many(keys)) => keys,
    })
}

fn runs_on<'de, D: Deserializer<'de>>(deserializer: D) -> FieldResult<Vec<String>, D::Error> {
    Ok(match Option::<RunsOn>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(RunsOn::Label(label)) => vec![label],
        Some(RunsOn::Labels(labels)) | Some(RunsOn::Group { labels }) => labels,
    })
}

fn concurrency<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> FieldResult<Option<ConcurrencyDef>, D::Error> {
    let def = Option::<ConcurrencySpec>::deserialize(deserializer)?.map(|spec| match spec {
        ConcurrencySpec::Group(group) => ConcurrencyDef {
            group: group.into(),
            cancel_in_progress: false,
        },
        ConcurrencySpec::Full(def) => def,
    });
    Ok(def.filter(|d| !d.group.is_empty()))
}

fn container<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> FieldResult<Option<ContainerDef>, D::Error> {
    Ok(Option::<ContainerSpec>::deserialize(deserializer)?.map(ContainerDef::from))
}

fn services<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> FieldResult<BTreeMap<String, ServiceDef>, D::Error> {
    let services = Option::<BTreeMap<String, ContainerSpec>>::deserialize(deserializer)?;
    Ok(services
        .unwrap_or_default()
        .into_iter()
        .map(|(alias, spec)| (alias, ContainerDef::from(spec)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn assert_job_error(err: &Error, key: &str, needle: &str) {
        match err {
            Error::InvalidJob { job, message } => {
                assert_eq!(job, key);
                assert!(message.contains(needle), "{message:?} lacks {needle:?}");
            }
            other => panic!("expected an invalid job error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_workflow_without_jobs() {
        let err = parse_workflow("name: empty\njobs: {}\n").unwrap_err();
        assert_eq!(err.to_string(), "invalid workflow: workflow has no jobs");

        assert!(parse_workflow("name: nothing\n").is_err());
    }

    #[test]
    fn needs_accepts_string_and_list() {
        let wf = parse_workflow(
            r#"
jobs:
  a:
    steps: [{run: echo a}]
  b:
    needs: a
    steps: [{run: echo b}]
  c:
    needs: [a, b]
    steps: [{run: echo c}]
"#,
        )
        .unwrap();

        assert_eq!(wf.jobs["b"].needs, vec!["a"]);
        assert_eq!(wf.jobs["c"].needs, vec!["a", "b"]);
        assert!(wf.jobs["a"].needs.is_empty());
    }

    #[test]
    fn needs_with_non_string_element_names_the_job() {
        let err = parse_workflow(
            r#"
jobs:
  broken:
    needs: [a, 3]
    steps: [{run: echo}]
"#,
        )
        .unwrap_err();
        assert_job_error(&err, "broken", "needs must be a job key or a list of job keys");
    }

    #[test]
    fn concurrency_string_and_object_forms() {
        let wf = parse_workflow("concurrency: deploy\njobs:\n  a:\n    steps: [{run: x}]\n").unwrap();
        assert_eq!(
            wf.concurrency,
            Some(ConcurrencyDef {
                group: "deploy".into(),
                cancel_in_progress: false
            })
        );

        let wf = parse_workflow(
            "concurrency:\n  group: ci\n  cancel-in-progress: true\n  extra: ignored\njobs:\n  a:\n    steps: [{run: x}]\n",
        )
        .unwrap();
        assert_eq!(
            wf.concurrency,
            Some(ConcurrencyDef {
                group: "ci".into(),
                cancel_in_progress: true
            })
        );
    }

    #[test]
    fn container_and_services_shapes() {
        let wf = parse_workflow(
            r#"
jobs:
  short:
    container: node:20
    services:
      redis: redis:7
    steps: [{run: x}]
  long:
    container:
      image: rust:1.80
      env:
        CARGO_TERM_COLOR: always
      ports: [8080, "9090:90"]
      options: --cpus 2
    services:
      db:
        image: postgres:16
        env:
          POSTGRES_PASSWORD: secret
        credentials:
          username: bot
          password: pw
    steps: [{run: x}]
"#,
        )
        .unwrap();

        assert_eq!(wf.jobs["short"].container_image(), Some("node:20"));
        assert_eq!(wf.jobs["short"].services["redis"].image, "redis:7");

        let long = &wf.jobs["long"];
        assert_eq!(long.container_image(), Some("rust:1.80"));
        let container = long.container.as_ref().unwrap();
        assert_eq!(container.ports, vec!["8080", "9090:90"]);
        assert_eq!(container.options.as_deref(), Some("--cpus 2"));
        assert_eq!(container.env["CARGO_TERM_COLOR"], "always");
        let db = &long.services["db"];
        assert_eq!(db.env["POSTGRES_PASSWORD"], "secret");
        assert_eq!(db.credentials.as_ref().unwrap().username, "bot");
    }

    #[test]
    fn bad_service_shape_is_reported() {
        let err = parse_workflow(
            "jobs:\n  a:\n    services:\n      db: [1, 2]\n    steps: [{run: x}]\n",
        )
        .unwrap_err();
        assert_job_error(&err, "a", "an image name or a container mapping");
    }

    #[test]
    fn matrix_splits_reserved_keys() {
        let wf = parse_workflow(
            r#"
jobs:
  test:
    strategy:
      fail-fast: false
      max-parallel: 2
      matrix:
        os: [ubuntu, macos]
        version: [1, "2"]
        include:
          - os: windows
            version: 3
        exclude:
          - os: macos
            version: 1
    steps: [{run: x}]
"#,
        )
        .unwrap();

        let job = &wf.jobs["test"];
        assert!(!job.fail_fast());
        assert_eq!(job.max_parallel(), 2);
        let matrix = job.matrix().unwrap();
        assert_eq!(matrix.values.keys().collect::<Vec<_>>(), vec!["os", "version"]);
        assert_eq!(matrix.values["version"], vec![json!(1), json!("2")]);
        assert_eq!(matrix.include.len(), 1);
        assert_eq!(matrix.exclude[0]["os"], json!("macos"));
    }

    #[test]
    fn matrix_shape_errors() {
        let cases = [
            ("matrix:\n        include: nope", "matrix.include must be a list"),
            ("matrix:\n        exclude: [1]", "matrix.exclude entries must be maps"),
            ("matrix:\n        os: ubuntu", "matrix.os must be a list"),
        ];
        for (matrix, expected) in cases {
            let yaml = format!(
                "jobs:\n  t:\n    strategy:\n      {matrix}\n    steps: [{{run: x}}]\n"
            );
            let err = parse_workflow(&yaml).unwrap_err();
            assert_job_error(&err, "t", expected);
        }
    }

    #[test]
    fn steps_preserve_order_and_fields() {
        let wf = parse_workflow(
            r#"
jobs:
  build:
    timeout-minutes: 15
    continue-on-error: true
    if: github.ref == 'refs/heads/main'
    outputs:
      tag: ${{ steps.meta.outputs.tag }}
    steps:
      - uses: actions/checkout@v4
        with:
          fetch-depth: 0
      - id: meta
        name: Compute tag
        run: echo "tag=v1" >> "$GITHUB_OUTPUT"
        shell: bash
      - run: echo a
        uses: ignored/action@v1
"#,
        )
        .unwrap();

        let job = &wf.jobs["build"];
        assert_eq!(job.timeout_minutes, 15);
        assert!(job.continue_on_error);
        assert_eq!(job.if_expr.as_deref(), Some("github.ref == 'refs/heads/main'"));
        assert_eq!(job.outputs["tag"], "${{ steps.meta.outputs.tag }}");
        assert_eq!(job.steps.len(), 3);
        assert_eq!(job.steps[0].action(), Some(StepAction::Uses("actions/checkout@v4")));
        assert_eq!(job.steps[0].with["fetch-depth"], "0");
        assert_eq!(job.steps[1].id.as_deref(), Some("meta"));
        assert_eq!(job.steps[1].shell.as_deref(), Some("bash"));
        assert_eq!(job.steps[2].action(), Some(StepAction::Run("echo a")));
    }

    #[test]
    fn runs_on_label_list_and_group() {
        let wf = parse_workflow(
            r#"
jobs:
  one:
    runs-on: ubuntu-latest
    steps: [{run: x}]
  many:
    runs-on: [self-hosted, linux]
    steps: [{run: x}]
  group:
    runs-on:
      group: large
      labels: gpu
    steps: [{run: x}]
"#,
        )
        .unwrap();

        assert_eq!(wf.jobs["one"].runs_on, vec!["ubuntu-latest"]);
        assert_eq!(wf.jobs["many"].runs_on, vec!["self-hosted", "linux"]);
        assert_eq!(wf.jobs["group"].runs_on, vec!["gpu"]);
    }

    #[test]
    fn mistyped_job_fields_are_rejected() {
        let cases = [
            ("timeout-minutes: abc", "timeout-minutes"),
            ("continue-on-error: 1", "continue-on-error"),
            ("strategy:\n      max-parallel: many", "strategy"),
        ];
        for (field, label) in cases {
            let yaml = format!("jobs:\n  slow:\n    {field}\n    steps: [{{run: x}}]\n");
            let err = parse_workflow(&yaml).unwrap_err();
            assert!(
                matches!(&err, Error::InvalidJob { job, .. } if job == "slow"),
                "{label}: {err:?}"
            );
        }
    }

    #[test]
    fn step_without_run_or_uses_fails() {
        let err = parse_workflow("jobs:\n  a:\n    steps:\n      - name: nothing\n").unwrap_err();
        assert_eq!(err.to_string(), r#"job "a": step 1: must define run or uses"#);
    }

    #[test]
    fn action_refs() {
        assert_eq!(
            ActionRef::parse("actions/checkout@v4"),
            ActionRef::Repository {
                name_with_owner: "actions/checkout".into(),
                path: None,
                git_ref: "v4".into(),
            }
        );
        assert_eq!(
            ActionRef::parse("github/codeql-action/init@v3"),
            ActionRef::Repository {
                name_with_owner: "github/codeql-action".into(),
                path: Some("init".into()),
                git_ref: "v3".into(),
            }
        );
        assert_eq!(
            ActionRef::parse("./.github/actions/setup"),
            ActionRef::Local {
                path: "./.github/actions/setup".into()
            }
        );
        assert_eq!(
            ActionRef::parse("owner/repo"),
            ActionRef::Repository {
                name_with_owner: "owner/repo".into(),
                path: None,
                git_ref: String::new(),
            }
        );
    }

    #[test]
    fn value_coercion() {
        assert_eq!(value_to_string(&json!("a")), "a");
        assert_eq!(value_to_string(&json!(3)), "3");
        assert_eq!(value_to_string(&json!(true)), "true");
        assert_eq!(value_to_string(&json!(1.5)), "1.5");
    }
}
