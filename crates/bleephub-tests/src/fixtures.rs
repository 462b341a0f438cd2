//! Workflow documents and request bodies shared by the end-to-end tests.

use serde_json::{Value, json};

/// `version` publishes an output that `release` reads through `needs`.
pub const OUTPUT_CHAIN_WORKFLOW: &str = r#"
name: release
on: push
jobs:
  version:
    runs-on: self-hosted
    outputs:
      version: ${{ steps.ver.outputs.version }}
    steps:
      - id: ver
        run: echo "version=1.2.3" >> "$GITHUB_OUTPUT"
  release:
    runs-on: self-hosted
    needs: version
    steps:
      - run: echo "releasing ${{ needs.version.outputs.version }}"
"#;

/// A single job, the smallest runnable workflow.
pub const SINGLE_JOB_WORKFLOW: &str = r#"
name: single
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - run: make
"#;

/// Two by two matrix with fail-fast on.
pub const MATRIX_WORKFLOW: &str = r#"
name: matrix
jobs:
  test:
    strategy:
      matrix:
        os: [linux, macos]
        node: [18, 20]
    steps:
      - run: npm test
"#;

/// Cycle between `a` and `b`; rejected at submission.
pub const CYCLIC_WORKFLOW: &str = r#"
jobs:
  a:
    needs: b
    steps: [{run: echo a}]
  b:
    needs: a
    steps: [{run: echo b}]
"#;

/// Workflow in concurrency group `group` with cancel-in-progress off.
pub fn grouped_workflow(group: &str) -> String {
    format!(
        r#"
name: deploy
concurrency:
  group: {group}
jobs:
  deploy:
    steps:
      - run: ./deploy.sh
"#
    )
}

/// Body a runner sends when opening a session.
pub fn session_body(name: &str) -> Value {
    json!({
        "ownerName": format!("{name}-host"),
        "agent": {
            "id": 1,
            "name": name,
            "version": "2.321.0",
        },
    })
}

/// Body the runner's `config.sh` sends when registering itself.
pub fn agent_body(name: &str) -> Value {
    json!({
        "name": name,
        "version": "2.321.0",
        "osDescription": "Linux",
        "labels": [
            {"id": 0, "name": "self-hosted", "type": "system"},
            {"id": 0, "name": "linux", "type": "system"},
        ],
        "maxParallelism": 1,
        "createdOn": "0001-01-01T00:00:00",
        "authorization": {"publicKey": {"exponent": "AQAB", "modulus": "AAAA"}},
    })
}
