use std::io::Write;

use hpipe_core::definition::FlowDefinition;
use hpipe_core::error::{GraphError, HpipeError};
use hpipe_core::status::Status;

const DAILY: &str = r#"
name = "daily"
entry = "publish"

[var]
date = "${bizdate}"

[prop]
owner = "data"

[[step]]
name = "extract"
resource = "odps"

[[step.job]]
name = "dump"
id = "daily.extract.dump"
type = "odps"
file = "sql/dump.sql"
[step.job.prop]
access_id = "AK"
access_key = "SK"
project = "warehouse"
endpoint = "http://service.odps.example/api"
cmd = "select 1;"

[[step]]
name = "clean"
dep = ["extract"]

[[step.job]]
name = "tidy"
type = "shell"
[step.job.prop]
cmd = "rm -f out/*.tmp"

[[step]]
name = "publish"
dep = ["extract", "clean"]
"#;

#[test]
fn test_load_flow_file() {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(DAILY.as_bytes()).expect("write flow");

    let flow = FlowDefinition::load(tmp.path()).expect("load flow");
    assert_eq!(flow.name, "daily");
    assert_eq!(flow.props.get("owner").map(String::as_str), Some("data"));

    let entry = flow.entry().expect("entry");
    assert_eq!(flow.step(entry).name, "publish");
    assert_eq!(flow.reachable().len(), 3);

    let ids: Vec<&str> = flow.jobs().map(|j| j.instance_id.as_str()).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&"daily.extract.dump"));
    assert!(ids.contains(&"daily.clean.tidy"));
    assert!(flow.jobs().all(|j| j.status == Status::Todo));

    let extract = flow.step_by_name("extract").expect("extract");
    assert_eq!(flow.step(extract).resource.as_deref(), Some("odps"));
    assert_eq!(
        flow.step(extract).jobs[0].file.as_deref(),
        Some("sql/dump.sql")
    );
}

#[test]
fn test_shared_dependency_rendered_under_each_dependent() {
    let flow = FlowDefinition::parse(DAILY)
        .and_then(|d| d.into_flow())
        .expect("flow");
    let dump = flow.debug_string();
    assert!(dump.starts_with("publish:{\n"));
    // extract is a dependency of both publish and clean.
    assert_eq!(dump.matches("extract:{").count(), 2);
    assert_eq!(dump.matches("id:daily.extract.dump").count(), 2);
}

#[test]
fn test_cyclic_flow_rejected() {
    let text = r#"
name = "loop"
entry = "a"

[[step]]
name = "a"
dep = ["b"]

[[step]]
name = "b"
dep = ["a"]
"#;
    let err = FlowDefinition::parse(text)
        .and_then(|d| d.into_flow())
        .unwrap_err();
    assert!(matches!(
        err,
        HpipeError::Graph(GraphError::CycleDetected { .. })
    ));
}

#[test]
fn test_unreadable_flow_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = FlowDefinition::load(&dir.path().join("missing.toml")).unwrap_err();
    assert!(matches!(err, HpipeError::Definition(_)));
}
