//! Job request envelope sent to runners.
//!
//! The runner deserializes this with strict converters, so every key below
//! is part of the wire contract. Dynamic leaves go through
//! [`TemplateToken`] and [`PipelineContextData`].

use bleephub_core::ids::{JobId, PlanId, ScopeId, TimelineId};
use bleephub_core::jwt::make_jwt;
use bleephub_core::run::{MESSAGE_TYPE_JOB_REQUEST, Workflow, WorkflowJob, result_str};
use bleephub_core::token::{PipelineContextData, TemplateToken};
use bleephub_core::workflow::{ActionRef, ServiceDef, StepAction, StepDef};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Image used when neither the job nor the submitter names one.
pub const FALLBACK_IMAGE: &str = "alpine:latest";
const WORKSPACE: &str = "/github/workspace";
const WORKFLOW_FILE: &str = ".github/workflows/test.yml";
const NO_LOCK: &str = "0001-01-01T00:00:00";
const DISPLAY_TRUNCATE: usize = 40;

/// Ids allocated for one dispatch.
#[derive(Debug, Clone, Copy)]
pub struct DispatchIds {
    pub plan_id: PlanId,
    pub timeline_id: TimelineId,
    pub request_id: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequestMessage {
    pub message_type: &'static str,
    pub plan: PlanReference,
    pub timeline: TimelineReference,
    pub job_id: JobId,
    pub job_display_name: String,
    pub job_name: String,
    pub request_id: u64,
    pub locked_until: &'static str,
    pub job_container: String,
    pub job_service_containers: Option<BTreeMap<String, ServiceContainer>>,
    pub job_outputs: Option<()>,
    pub resources: JobResources,
    pub context_data: ContextData,
    pub variables: BTreeMap<&'static str, Variable>,
    pub mask: Vec<MaskHint>,
    pub steps: Vec<ActionStep>,
    pub workspace: BTreeMap<String, String>,
    pub defaults: Option<()>,
    pub environment_variables: Option<()>,
    pub actions_environment: Option<()>,
    pub file_table: Vec<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanReference {
    pub scope_identifier: ScopeId,
    pub plan_id: PlanId,
    pub plan_type: &'static str,
    pub plan_group: &'static str,
    pub version: u32,
    pub owner: PlanOwner,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanOwner {
    pub id: u64,
    pub name: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineReference {
    pub id: TimelineId,
    pub change_id: u32,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceContainer {
    pub image: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<String>,
}

impl From<&ServiceDef> for ServiceContainer {
    fn from(def: &ServiceDef) -> Self {
        Self {
            image: def.image.clone(),
            environment: def.env.clone(),
            ports: def.ports.clone(),
            volumes: def.volumes.clone(),
            options: def.options.clone().filter(|o| !o.is_empty()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobResources {
    pub endpoints: Vec<ServiceEndpoint>,
    pub repositories: Vec<()>,
    pub containers: Vec<()>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEndpoint {
    pub name: &'static str,
    pub url: String,
    pub authorization: EndpointAuthorization,
    pub data: BTreeMap<&'static str, String>,
    pub is_shared: bool,
    pub is_ready: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EndpointAuthorization {
    pub scheme: &'static str,
    pub parameters: BTreeMap<&'static str, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextData {
    pub github: PipelineContextData,
    pub runner: PipelineContextData,
    pub env: PipelineContextData,
    pub vars: PipelineContextData,
    pub secrets: PipelineContextData,
    pub needs: PipelineContextData,
    pub inputs: Option<PipelineContextData>,
    pub matrix: Option<PipelineContextData>,
    pub strategy: Option<PipelineContextData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub value: String,
    pub is_secret: bool,
}

impl Variable {
    fn plain(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            is_secret: false,
        }
    }

    fn secret(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            is_secret: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaskHint {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionStep {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub id: Uuid,
    pub name: String,
    pub reference: StepReference,
    pub display_name_token: String,
    pub context_name: String,
    pub condition: String,
    pub inputs: TemplateToken,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<TemplateToken>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StepReference {
    Script {
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    Repository {
        name: String,
        #[serde(rename = "ref")]
        git_ref: String,
        #[serde(rename = "repositoryType")]
        repository_type: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
}

/// Builds envelopes for the jobs of one workflow.
pub struct JobMessageBuilder<'a> {
    workflow: &'a Workflow,
    secrets: &'a [(String, String)],
    fallback_image: &'a str,
}

impl<'a> JobMessageBuilder<'a> {
    pub fn new(workflow: &'a Workflow, secrets: &'a [(String, String)]) -> Self {
        Self {
            workflow,
            secrets,
            fallback_image: FALLBACK_IMAGE,
        }
    }

    pub fn with_fallback_image(mut self, image: &'a str) -> Self {
        self.fallback_image = image;
        self
    }

    pub fn build(&self, job: &WorkflowJob, ids: DispatchIds) -> JobRequestMessage {
        let wf = self.workflow;
        let scope_id = ScopeId::new();
        let token = make_jwt(&scope_id.to_string(), "actions");
        let server_url = wf.server_url().trim_end_matches('/');
        let run_id = wf.run_id.to_string();

        let image = job
            .def
            .container_image()
            .or(wf.default_image())
            .unwrap_or(self.fallback_image)
            .to_string();

        let services = (!job.def.services.is_empty()).then(|| {
            job.def
                .services
                .iter()
                .map(|(alias, def)| (alias.clone(), ServiceContainer::from(def)))
                .collect()
        });

        let mut mask = vec![MaskHint {
            kind: "regex",
            value: token.clone(),
        }];
        let mut secrets = PipelineContextData::dict().with("GITHUB_TOKEN", token.as_str());
        for (name, value) in self.secrets {
            secrets = secrets.with(name, value);
            if !value.is_empty() {
                mask.push(MaskHint {
                    kind: "regex",
                    value: value.clone(),
                });
            }
        }

        let endpoint_url = format!("{server_url}/");
        let endpoint = ServiceEndpoint {
            name: "SystemVssConnection",
            url: endpoint_url.clone(),
            authorization: EndpointAuthorization {
                scheme: "OAuth",
                parameters: BTreeMap::from([("AccessToken", token.clone())]),
            },
            data: BTreeMap::from([
                ("CacheServerUrl", endpoint_url.clone()),
                ("ResultsServiceUrl", endpoint_url),
            ]),
            is_shared: false,
            is_ready: true,
        };

        let github = PipelineContextData::dict()
            .with("server_url", server_url)
            .with("api_url", server_url)
            .with("repository", wf.event.repository.as_str())
            .with("repository_owner", wf.event.repository_owner())
            .with("run_id", run_id.as_str())
            .with("run_number", wf.run_number.to_string())
            .with("workflow", wf.name.as_str())
            .with("job", job.key.as_str())
            .with("event_name", wf.event.event_name.as_str())
            .with("sha", wf.event.sha.as_str())
            .with("ref", wf.event.git_ref.as_str())
            .with("action", "__run")
            .with("workspace", WORKSPACE)
            .with("token", token.as_str());

        let runner = PipelineContextData::dict()
            .with("os", "Linux")
            .with("arch", runner_arch())
            .with("name", "bleephub-runner")
            .with("tool_cache", "/opt/hostedtoolcache")
            .with("temp", "/home/runner/work/_temp");

        let mut env: BTreeMap<&String, &String> = wf.user_env().collect();
        env.extend(job.def.env.iter());

        let variables = BTreeMap::from([
            ("system.github.job", Variable::plain(&job.key)),
            ("system.github.runid", Variable::plain(&run_id)),
            ("system.github.token", Variable::secret(&token)),
            ("github_token", Variable::secret(&token)),
            ("system.phaseDisplayName", Variable::plain(&job.display_name)),
            ("system.runnerGroupName", Variable::plain("Default")),
            ("DistributedTask.NewActionMetadata", Variable::plain("true")),
            ("DistributedTask.EnableCompositeActions", Variable::plain("true")),
        ]);

        JobRequestMessage {
            message_type: MESSAGE_TYPE_JOB_REQUEST,
            plan: PlanReference {
                scope_identifier: scope_id,
                plan_id: ids.plan_id,
                plan_type: "free",
                plan_group: "free",
                version: 12,
                owner: PlanOwner {
                    id: 0,
                    name: "Community",
                },
            },
            timeline: TimelineReference {
                id: ids.timeline_id,
                change_id: 1,
                location: None,
            },
            job_id: job.job_id,
            job_display_name: job.display_name.clone(),
            job_name: job.key.clone(),
            request_id: ids.request_id,
            locked_until: NO_LOCK,
            job_container: image,
            job_service_containers: services,
            job_outputs: None,
            resources: JobResources {
                endpoints: vec![endpoint],
                repositories: Vec::new(),
                containers: Vec::new(),
            },
            context_data: ContextData {
                github,
                runner,
                env: env.into_iter().collect(),
                vars: PipelineContextData::dict(),
                secrets,
                needs: self.needs_context(job),
                inputs: (!wf.inputs.is_empty()).then(|| wf.inputs.iter().collect()),
                matrix: (!job.matrix.is_empty())
                    .then(|| job.matrix_strings().into_iter().collect()),
                strategy: None,
            },
            variables,
            mask,
            steps: job
                .def
                .steps
                .iter()
                .enumerate()
                .filter_map(|(index, step)| action_step(index, step))
                .collect(),
            workspace: BTreeMap::new(),
            defaults: None,
            environment_variables: None,
            actions_environment: None,
            file_table: vec![WORKFLOW_FILE],
        }
    }

    /// `needs.<dep>.result` and `needs.<dep>.outputs` for each dependency.
    fn needs_context(&self, job: &WorkflowJob) -> PipelineContextData {
        job.needs
            .iter()
            .filter_map(|dep| {
                let dep_job = self.workflow.jobs.get(dep)?;
                let outputs: PipelineContextData = dep_job.outputs.iter().collect();
                let entry = PipelineContextData::dict()
                    .with("result", result_str(dep_job.result.as_ref()))
                    .with("outputs", outputs);
                Some((dep.as_str(), entry))
            })
            .collect()
    }
}

fn action_step(index: usize, step: &StepDef) -> Option<ActionStep> {
    let position = index + 1;
    let (reference, display_name, context_name, inputs) = match step.action()? {
        StepAction::Run(script) => {
            let mut inputs = vec![("script", script)];
            if let Some(shell) = step.shell.as_deref() {
                inputs.push(("shell", shell));
            }
            (
                StepReference::Script { path: None },
                step.name
                    .clone()
                    .unwrap_or_else(|| format!("Run {}", truncate(script, DISPLAY_TRUNCATE))),
                step.id.clone().unwrap_or_else(|| format!("__run_{position}")),
                TemplateToken::string_mapping(inputs),
            )
        }
        StepAction::Uses(uses) => {
            let reference = match ActionRef::parse(uses) {
                ActionRef::Local { path } => StepReference::Script { path: Some(path) },
                ActionRef::Repository {
                    name_with_owner,
                    path,
                    git_ref,
                } => StepReference::Repository {
                    name: name_with_owner,
                    git_ref,
                    repository_type: "GitHub",
                    path,
                },
            };
            (
                reference,
                step.name.clone().unwrap_or_else(|| uses.to_string()),
                step.id.clone().unwrap_or_else(|| format!("__action_{position}")),
                TemplateToken::string_mapping(step.with.iter().map(|(k, v)| (k.as_str(), v.as_str()))),
            )
        }
    };

    Some(ActionStep {
        kind: "action",
        id: Uuid::new_v4(),
        name: context_name.clone(),
        reference,
        display_name_token: display_name,
        context_name,
        condition: step
            .if_expr
            .clone()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| "success()".to_string()),
        inputs,
        environment: (!step.env.is_empty())
            .then(|| TemplateToken::string_mapping(step.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))),
    })
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

fn runner_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "X64",
        "aarch64" => "ARM64",
        "x86" => "X86",
        "arm" => "ARM",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bleephub_core::ids::WorkflowId;
    use bleephub_core::run::{
        DEFAULT_IMAGE_KEY, EventMeta, JobStatus, RunResult, SERVER_URL_KEY, WorkflowStatus,
    };
    use bleephub_core::workflow::{ContainerDef, JobDef};
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};

    fn step(run: Option<&str>, uses: Option<&str>) -> StepDef {
        StepDef {
            run: run.map(str::to_string),
            uses: uses.map(str::to_string),
            ..Default::default()
        }
    }

    fn job(key: &str, needs: &[&str], def: JobDef) -> WorkflowJob {
        WorkflowJob {
            key: key.to_string(),
            job_id: JobId::new(),
            display_name: key.to_string(),
            needs: needs.iter().map(|n| n.to_string()).collect(),
            matrix_group: None,
            matrix: Default::default(),
            status: JobStatus::Pending,
            result: None,
            continue_on_error: false,
            started_at: None,
            outputs: BTreeMap::new(),
            def,
        }
    }

    fn workflow(jobs: Vec<WorkflowJob>) -> Workflow {
        Workflow {
            id: WorkflowId::new(),
            name: "ci".to_string(),
            run_id: 7,
            run_number: 7,
            event: EventMeta {
                repository: "acme/app".to_string(),
                ..Default::default()
            },
            inputs: BTreeMap::new(),
            status: WorkflowStatus::Running,
            result: None,
            max_parallel: 0,
            env: BTreeMap::from([
                (SERVER_URL_KEY.to_string(), "http://hub:5555".to_string()),
                (DEFAULT_IMAGE_KEY.to_string(), "node:20".to_string()),
                ("WF".to_string(), "1".to_string()),
                ("SHARED".to_string(), "workflow".to_string()),
            ]),
            jobs: jobs.into_iter().map(|j| (j.key.clone(), j)).collect(),
            concurrency: None,
            created_at: chrono::Utc::now(),
        }
    }

    fn ids() -> DispatchIds {
        DispatchIds {
            plan_id: PlanId::new(),
            timeline_id: TimelineId::new(),
            request_id: 3,
        }
    }

    fn render(wf: &Workflow, key: &str, secrets: &[(String, String)]) -> Value {
        let message = JobMessageBuilder::new(wf, secrets).build(&wf.jobs[key], ids());
        serde_json::to_value(&message).unwrap()
    }

    /// Flatten a `{t:2,d:[...]}` dictionary into a map for assertions.
    fn dict(value: &Value) -> BTreeMap<String, Value> {
        value["d"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| (e["k"].as_str().unwrap().to_string(), e["v"].clone()))
            .collect()
    }

    #[test]
    fn envelope_has_every_top_level_key() {
        let wf = workflow(vec![job("build", &[], JobDef {
            steps: vec![step(Some("make"), None)],
            ..Default::default()
        })]);
        let json = render(&wf, "build", &[]);
        let keys: Vec<&str> = json.as_object().unwrap().keys().map(String::as_str).collect();
        for key in [
            "messageType", "plan", "timeline", "jobId", "jobDisplayName", "jobName",
            "requestId", "lockedUntil", "jobContainer", "jobServiceContainers", "jobOutputs",
            "resources", "contextData", "variables", "mask", "steps", "workspace", "defaults",
            "environmentVariables", "actionsEnvironment", "fileTable",
        ] {
            assert!(keys.contains(&key), "missing {key}");
        }
        assert_eq!(json["messageType"], "PipelineAgentJobRequest");
        assert_eq!(json["requestId"], 3);
        assert_eq!(json["jobContainer"], "node:20");
        assert_eq!(json["jobServiceContainers"], Value::Null);
        assert_eq!(json["timeline"]["changeId"], 1);
        assert_eq!(json["plan"]["owner"]["name"], "Community");
        assert_eq!(json["resources"]["endpoints"][0]["url"], "http://hub:5555/");
    }

    #[test]
    fn script_and_action_steps() {
        let long = "echo ".to_string() + &"x".repeat(60);
        let mut checkout = step(None, Some("actions/checkout@v4"));
        checkout.with = BTreeMap::from([("fetch-depth".to_string(), "0".to_string())]);
        let mut named = step(Some("make"), None);
        named.name = Some("Build".into());
        named.id = Some("build".into());
        named.if_expr = Some("always()".into());

        let wf = workflow(vec![job("build", &[], JobDef {
            steps: vec![
                step(Some(&long), None),
                checkout,
                step(None, Some("./local/action")),
                named,
                step(None, Some("org/repo/sub/dir@main")),
            ],
            ..Default::default()
        })]);
        let json = render(&wf, "build", &[]);
        let steps = json["steps"].as_array().unwrap();

        assert_eq!(steps[0]["reference"], json!({"type": "script"}));
        assert_eq!(steps[0]["contextName"], "__run_1");
        assert_eq!(steps[0]["condition"], "success()");
        assert_eq!(
            steps[0]["displayNameToken"],
            format!("Run {}...", &long[..40])
        );
        assert_eq!(
            steps[0]["inputs"],
            json!({"type": 2, "map": [{"Key": {"type": 0, "lit": "script"}, "Value": {"type": 0, "lit": long}}]})
        );

        assert_eq!(
            steps[1]["reference"],
            json!({"type": "repository", "name": "actions/checkout", "ref": "v4", "repositoryType": "GitHub"})
        );
        assert_eq!(steps[1]["contextName"], "__action_2");
        assert_eq!(steps[1]["displayNameToken"], "actions/checkout@v4");
        assert_eq!(steps[1]["inputs"]["map"][0]["Key"]["lit"], "fetch-depth");

        assert_eq!(steps[2]["reference"], json!({"type": "script", "path": "./local/action"}));

        assert_eq!(steps[3]["contextName"], "build");
        assert_eq!(steps[3]["displayNameToken"], "Build");
        assert_eq!(steps[3]["condition"], "always()");

        assert_eq!(steps[4]["reference"]["path"], "sub/dir");
        assert_eq!(steps[4]["reference"]["name"], "org/repo");
    }

    #[test]
    fn context_data_and_secrets() {
        let mut build = job("build", &[], JobDef {
            env: BTreeMap::from([("SHARED".to_string(), "job".to_string())]),
            ..Default::default()
        });
        build.matrix = BTreeMap::from([("os".to_string(), json!("linux")), ("n".to_string(), json!(2))]);
        let mut wf = workflow(vec![build]);
        wf.inputs = BTreeMap::from([("level".to_string(), "debug".to_string())]);

        let secrets = vec![("DEPLOY_KEY".to_string(), "s3cr3t".to_string())];
        let json = render(&wf, "build", &secrets);
        let ctx = &json["contextData"];

        let github = dict(&ctx["github"]);
        assert_eq!(github.len(), 14);
        assert_eq!(github["repository"], "acme/app");
        assert_eq!(github["repository_owner"], "acme");
        assert_eq!(github["run_id"], "7");
        assert_eq!(github["job"], "build");
        assert_eq!(github["server_url"], "http://hub:5555");

        let env = dict(&ctx["env"]);
        assert_eq!(env["SHARED"], "job");
        assert_eq!(env["WF"], "1");
        assert!(!env.keys().any(|k| k.starts_with("__")));

        let secrets_ctx = dict(&ctx["secrets"]);
        assert!(secrets_ctx.contains_key("GITHUB_TOKEN"));
        assert_eq!(secrets_ctx["DEPLOY_KEY"], "s3cr3t");

        let masked: Vec<&str> = json["mask"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["value"].as_str().unwrap())
            .collect();
        assert_eq!(masked.len(), 2);
        assert!(masked.contains(&"s3cr3t"));

        assert_eq!(dict(&ctx["matrix"])["n"], "2");
        assert_eq!(dict(&ctx["inputs"])["level"], "debug");
        assert_eq!(ctx["strategy"], Value::Null);
        assert_eq!(ctx["vars"], json!({"t": 2, "d": []}));

        assert_eq!(json["variables"]["github_token"]["isSecret"], true);
        assert_eq!(json["variables"]["system.github.job"]["value"], "build");
        assert_eq!(json["variables"]["DistributedTask.NewActionMetadata"]["value"], "true");
    }

    #[test]
    fn needs_context_reports_results_and_outputs() {
        let mut root = job("root", &[], JobDef::default());
        root.finish(RunResult::Failure);
        root.outputs = BTreeMap::from([("tag".to_string(), "v1.0".to_string())]);
        let wf = workflow(vec![root, job("leaf", &["root"], JobDef::default())]);

        let json = render(&wf, "leaf", &[]);
        let needs = dict(&json["contextData"]["needs"]);
        let root_ctx = dict(&needs["root"]);
        assert_eq!(root_ctx["result"], "failure");
        assert_eq!(dict(&root_ctx["outputs"])["tag"], "v1.0");

        let plain = render(&wf, "root", &[]);
        assert_eq!(plain["contextData"]["needs"], json!({"t": 2, "d": []}));
        assert_eq!(plain["contextData"]["inputs"], Value::Null);
        assert_eq!(plain["contextData"]["matrix"], Value::Null);
    }

    #[test]
    fn container_and_services() {
        let def = JobDef {
            container: Some(ContainerDef {
                image: "rust:1.85".into(),
                ..Default::default()
            }),
            services: BTreeMap::from([(
                "db".to_string(),
                ContainerDef {
                    image: "postgres:16".into(),
                    env: BTreeMap::from([("POSTGRES_PASSWORD".to_string(), "pw".to_string())]),
                    ports: vec!["5432:5432".into()],
                    ..Default::default()
                },
            )]),
            ..Default::default()
        };
        let wf = workflow(vec![job("test", &[], def)]);
        let json = render(&wf, "test", &[]);
        assert_eq!(json["jobContainer"], "rust:1.85");
        assert_eq!(
            json["jobServiceContainers"],
            json!({"db": {"image": "postgres:16", "environment": {"POSTGRES_PASSWORD": "pw"}, "ports": ["5432:5432"]}})
        );
    }

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate("short", 40), "short");
        assert_eq!(truncate("ééééé", 2), "éé...");
    }
}
