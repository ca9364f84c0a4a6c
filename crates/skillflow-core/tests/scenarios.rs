//! End-to-end engine scenarios driven through `WorkflowRunner`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Map, Value};
use skillflow_core::event::{EventBus, EventSink, MemorySink, SinkError};
use skillflow_core::tool::{FnTool, Tool, ToolRegistry};
use skillflow_core::workflow::{parse_workflow_yaml, WorkflowRunner};
use skillflow_types::config::EngineConfig;
use skillflow_types::event::{EventKind, EventRecord};
use skillflow_types::heal::AutoHealRule;
use skillflow_types::run::{RunStatus, StepErrorKind, StepStatus};
use skillflow_types::tool::{ErrorKind, ToolError};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Records every argument map a tool receives.
#[derive(Clone, Default)]
struct CallLog(Arc<Mutex<Vec<(String, Map<String, Value>)>>>);

impl CallLog {
    fn push(&self, tool: &str, args: &Map<String, Value>) {
        self.0.lock().unwrap().push((tool.to_string(), args.clone()));
    }

    fn calls_to(&self, tool: &str) -> Vec<Map<String, Value>> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == tool)
            .map(|(_, a)| a.clone())
            .collect()
    }
}

fn engine(registry: ToolRegistry, config: EngineConfig) -> (WorkflowRunner, MemorySink) {
    let bus = EventBus::new(256);
    let sink = MemorySink::new();
    bus.register(sink.clone());
    (WorkflowRunner::new(Arc::new(registry), bus, &config), sink)
}

fn inputs(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn event_kinds(sink: &MemorySink, run_id: Uuid) -> Vec<EventKind> {
    sink.kinds_for(run_id).into_iter().map(|(k, _)| k).collect()
}

/// A tool that fails with `auth` the first time and succeeds afterwards.
fn expiring_session(log: CallLog) -> impl Tool + 'static {
    let calls = Arc::new(AtomicUsize::new(0));
    FnTool::new("issues.create", move |args: Map<String, Value>| {
        log.push("issues.create", &args);
        let result = if calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(ToolError::auth("401: token expired"))
        } else {
            Ok(json!({ "number": 7 }))
        };
        std::future::ready(result)
    })
}

const HEAL_WORKFLOW: &str = r#"
name: file-issue
steps:
  - name: create
    kind: tool
    tool: issues.create
    args: { title: "crash" }
    on_error: retry-with-heal
    fallback: continue
  - name: note
    kind: description
    text: "created: {{ steps.create.status }}"
"#;

fn relogin_rule() -> AutoHealRule {
    AutoHealRule::new("refresh-session", "auth.refresh")
        .with_kinds([ErrorKind::Auth])
        .with_patterns(["token expired"])
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_scenario_a_output_flows_into_next_step() {
    let log = CallLog::default();
    let mut registry = ToolRegistry::new();
    let l = log.clone();
    registry.register(FnTool::new("issues.get", move |args: Map<String, Value>| {
        l.push("issues.get", &args);
        async { Ok(json!({ "id": 42, "title": "Crash on start" })) }
    }));
    let l = log.clone();
    registry.register(FnTool::new("issues.comment", move |args: Map<String, Value>| {
        l.push("issues.comment", &args);
        async { Ok(json!({ "ok": true })) }
    }));
    let (runner, _) = engine(registry, EngineConfig::default());

    let def = parse_workflow_yaml(
        r#"
name: triage
steps:
  - { name: first, kind: tool, tool: issues.get }
  - name: second
    kind: tool
    tool: issues.comment
    args: { id: "{{steps.first.output.id}}", body: "Looking at {{ steps.first.output.title }}" }
"#,
    )
    .unwrap();
    let report = runner.run(&def, Map::new()).await.unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    let comment = &log.calls_to("issues.comment")[0];
    assert_eq!(comment["id"], json!(42));
    assert_eq!(comment["body"], json!("Looking at Crash on start"));
    assert_eq!(report.step_order, vec!["first", "second"]);
}

#[tokio::test]
async fn test_scenario_b_false_condition_skips_step() {
    let mut registry = ToolRegistry::new();
    registry.register(FnTool::new("deploy", |_| async { Ok(json!("deployed")) }));
    let (runner, sink) = engine(registry, EngineConfig::default());

    let def = parse_workflow_yaml(
        r#"
name: maybe-deploy
inputs:
  - { name: skip, type: boolean, default: false }
steps:
  - name: ship
    kind: tool
    tool: deploy
    condition: '"{{inputs.skip}}" == false'
  - name: report
    kind: description
    text: "ship output: {{ steps.ship.output | default('nothing') }}"
"#,
    )
    .unwrap();
    let report = runner.run(&def, inputs(json!({ "skip": true }))).await.unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    let ship = &report.steps["ship"];
    assert_eq!(ship.status, StepStatus::Skipped);
    assert_eq!(ship.output, Some(Value::Null));
    assert_eq!(report.steps["report"].output, Some(json!("ship output: nothing")));
    assert!(event_kinds(&sink, report.run_id).contains(&EventKind::StepSkipped));

    let report = runner.run(&def, Map::new()).await.unwrap();
    assert_eq!(report.steps["ship"].status, StepStatus::Succeeded);
}

#[tokio::test]
async fn test_scenario_c_auth_failure_healed() {
    let log = CallLog::default();
    let mut registry = ToolRegistry::new();
    registry.register(expiring_session(log.clone()));
    let refreshes = Arc::new(AtomicUsize::new(0));
    let r = refreshes.clone();
    registry.register(FnTool::new("auth.refresh", move |_| {
        r.fetch_add(1, Ordering::SeqCst);
        async { Ok(json!({ "refreshed": true })) }
    }));
    let config = EngineConfig {
        auto_heal: vec![relogin_rule()],
        ..EngineConfig::default()
    };
    let (runner, sink) = engine(registry, config);

    let def = parse_workflow_yaml(HEAL_WORKFLOW).unwrap();
    let report = runner.run(&def, Map::new()).await.unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    let create = &report.steps["create"];
    assert_eq!(create.status, StepStatus::HealedSucceeded);
    assert_eq!(create.healed, 1);
    assert_eq!(create.output, Some(json!({ "number": 7 })));
    assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(log.calls_to("issues.create").len(), 2);
    assert_eq!(
        report.steps["note"].output,
        Some(json!("created: healed-succeeded"))
    );

    let healed: Vec<EventRecord> = sink
        .for_run(report.run_id)
        .into_iter()
        .filter(|e| e.kind == EventKind::StepHealed)
        .collect();
    assert_eq!(healed.len(), 1);
    assert_eq!(healed[0].payload["rule"], json!("refresh-session"));
}

#[tokio::test]
async fn test_scenario_d_failed_remediation_keeps_auth_error() {
    let mut registry = ToolRegistry::new();
    registry.register(expiring_session(CallLog::default()));
    registry.register(FnTool::new("auth.refresh", |_| async {
        Err(ToolError::network("identity provider unreachable"))
    }));
    let config = EngineConfig {
        auto_heal: vec![relogin_rule()],
        ..EngineConfig::default()
    };
    let (runner, _) = engine(registry, config);

    // fallback: continue -> partial
    let def = parse_workflow_yaml(HEAL_WORKFLOW).unwrap();
    let report = runner.run(&def, Map::new()).await.unwrap();
    assert_eq!(report.status, RunStatus::Partial);
    let create = &report.steps["create"];
    assert_eq!(create.status, StepStatus::Failed);
    assert_eq!(create.output, None);
    let error = create.error.as_ref().unwrap();
    assert_eq!(error.kind, StepErrorKind::Auth);
    assert!(error.detail.contains("token expired"));
    assert_eq!(report.steps["note"].output, Some(json!("created: failed")));

    // fallback: fail -> failed, later steps never run
    let strict = parse_workflow_yaml(&HEAL_WORKFLOW.replace("fallback: continue", "fallback: fail")).unwrap();
    let report = runner.run(&strict, Map::new()).await.unwrap();
    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.error.as_ref().unwrap().kind, StepErrorKind::Auth);
    assert!(!report.steps.contains_key("note"));
}

#[tokio::test]
async fn test_scenario_e_undeclared_read_is_sandbox_violation() {
    let (runner, _) = engine(ToolRegistry::new(), EngineConfig::default());
    let def = parse_workflow_yaml(
        r#"
name: leak
inputs:
  - { name: visible, type: integer, default: 1 }
  - { name: secret, type: string, default: "hunter2" }
steps:
  - name: shape
    kind: transform
    reads: [visible]
    code: "visible + secret"
    on_error: continue
  - name: after
    kind: description
    text: "saw {{ steps.shape.output | default('no output') }}"
outputs:
  - { name: shaped, template: "{{ steps.shape.output }}" }
"#,
    )
    .unwrap();
    let report = runner.run(&def, Map::new()).await.unwrap();

    assert_eq!(report.status, RunStatus::Partial);
    let shape = &report.steps["shape"];
    assert_eq!(shape.status, StepStatus::Failed);
    assert_eq!(shape.output, None);
    let error = shape.error.as_ref().unwrap();
    assert_eq!(error.kind, StepErrorKind::SandboxViolation);
    assert!(error.detail.contains("secret"));
    assert_eq!(report.steps["after"].output, Some(json!("saw no output")));
    assert!(!report.outputs.contains_key("shaped"));
    assert!(report.output_errors.contains_key("shaped"));
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_transform_shapes_upstream_output() {
    let mut registry = ToolRegistry::new();
    registry.register(FnTool::new("issues.get", |_| async {
        Ok(json!({
            "title": "crash",
            "user": { "login": "ada" },
            "labels": [{ "name": "bug" }, { "name": "p1" }]
        }))
    }));
    let (runner, _) = engine(registry, EngineConfig::default());
    let def = parse_workflow_yaml(
        r#"
name: shape
steps:
  - { name: fetch, kind: tool, tool: issues.get }
  - name: shape
    kind: transform
    reads: [fetch, { name: owner, from: "steps.fetch.output.user.login" }]
    code: "{ title: fetch.title|upper, owner: owner, labels: fetch.labels|pluck('name') }"
outputs:
  - { name: summary, template: { title: "{{ steps.shape.output.title }}", count: "{{ steps.shape.output.labels | length }}" } }
"#,
    )
    .unwrap();
    let report = runner.run(&def, Map::new()).await.unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(
        report.steps["shape"].output,
        Some(json!({ "title": "CRASH", "owner": "ada", "labels": ["bug", "p1"] }))
    );
    assert_eq!(report.outputs["summary"], json!({ "title": "CRASH", "count": 2 }));
}

#[tokio::test]
async fn test_events_follow_causal_order() {
    let mut registry = ToolRegistry::new();
    registry.register(expiring_session(CallLog::default()));
    registry.register(FnTool::new("auth.refresh", |_| async { Ok(json!(null)) }));
    let config = EngineConfig {
        auto_heal: vec![relogin_rule()],
        ..EngineConfig::default()
    };
    let (runner, sink) = engine(registry, config);
    let def = parse_workflow_yaml(HEAL_WORKFLOW).unwrap();
    let report = runner.run(&def, Map::new()).await.unwrap();

    assert_eq!(
        event_kinds(&sink, report.run_id),
        vec![
            EventKind::RunStarted,
            EventKind::StepStarted,
            EventKind::StepFailed,
            EventKind::StepHealed,
            EventKind::StepStarted,
            EventKind::StepSucceeded,
            EventKind::StepStarted,
            EventKind::StepSucceeded,
            EventKind::RunCompleted,
        ]
    );
    let events = sink.for_run(report.run_id);
    assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert_eq!(events.last().unwrap().payload["status"], json!("succeeded"));
}

#[tokio::test]
async fn test_one_rule_heals_every_step_that_needs_it() {
    fn expires_once(name: &'static str) -> impl Tool + 'static {
        let calls = Arc::new(AtomicUsize::new(0));
        FnTool::new(name, move |_| {
            let result = if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ToolError::auth("token expired"))
            } else {
                Ok(json!({ "ok": true }))
            };
            std::future::ready(result)
        })
    }

    let mut registry = ToolRegistry::new();
    registry.register(expires_once("issues.create"));
    registry.register(expires_once("chat.post"));
    let refreshes = Arc::new(AtomicUsize::new(0));
    let r = refreshes.clone();
    registry.register(FnTool::new("auth.refresh", move |_| {
        r.fetch_add(1, Ordering::SeqCst);
        async { Ok(json!(null)) }
    }));
    let config = EngineConfig {
        auto_heal: vec![AutoHealRule::new("relogin", "auth.refresh")],
        ..EngineConfig::default()
    };
    let (runner, _sink) = engine(registry, config);
    let def = parse_workflow_yaml(
        r#"
name: file-and-announce
steps:
  - { name: a, kind: tool, tool: issues.create, on_error: retry-with-heal }
  - { name: b, kind: tool, tool: chat.post, on_error: retry-with-heal }
"#,
    )
    .unwrap();

    let report = runner.run(&def, Map::new()).await.unwrap();
    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.steps["a"].status, StepStatus::HealedSucceeded);
    assert_eq!(report.steps["b"].status, StepStatus::HealedSucceeded);
    assert_eq!(refreshes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_heal_runs_at_most_once_per_step() {
    let mut registry = ToolRegistry::new();
    registry.register(FnTool::new("issues.create", |_| async {
        Err(ToolError::auth("token expired"))
    }));
    let refreshes = Arc::new(AtomicUsize::new(0));
    let r = refreshes.clone();
    registry.register(FnTool::new("auth.refresh", move |_| {
        r.fetch_add(1, Ordering::SeqCst);
        async { Ok(json!(null)) }
    }));
    let config = EngineConfig {
        auto_heal: vec![relogin_rule().with_max_attempts(10)],
        ..EngineConfig::default()
    };
    let (runner, sink) = engine(registry, config);
    let def = parse_workflow_yaml(HEAL_WORKFLOW).unwrap();

    let report = runner.run(&def, Map::new()).await.unwrap();
    assert_eq!(report.steps["create"].status, StepStatus::Failed);
    assert_eq!(report.steps["create"].healed, 1);
    assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    let healed = event_kinds(&sink, report.run_id)
        .into_iter()
        .filter(|k| *k == EventKind::StepHealed)
        .count();
    assert_eq!(healed, 1);

    // A second run starts with a fresh ledger.
    runner.run(&def, Map::new()).await.unwrap();
    assert_eq!(refreshes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_cancelled_run_stops_dispatching() {
    let log = CallLog::default();
    let mut registry = ToolRegistry::new();
    registry.register(FnTool::new("slow", |_| async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(json!(null))
    }));
    let l = log.clone();
    registry.register(FnTool::new("after", move |args: Map<String, Value>| {
        l.push("after", &args);
        async { Ok(json!(null)) }
    }));
    let config = EngineConfig {
        cancel_grace_secs: 0,
        ..EngineConfig::default()
    };
    let (runner, sink) = engine(registry, config);
    let def = parse_workflow_yaml(
        r#"
name: long
steps:
  - { name: wait, kind: tool, tool: slow, on_error: continue }
  - { name: next, kind: tool, tool: after }
"#,
    )
    .unwrap();

    let run_id = Uuid::now_v7();
    let cancel = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        runner.cancel(run_id).unwrap();
    };
    let (report, ()) = tokio::join!(runner.run_with_id(run_id, &def, Map::new()), cancel);
    let report = report.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.error.as_ref().unwrap().kind, StepErrorKind::Cancelled);
    assert_eq!(
        report.steps["wait"].error.as_ref().unwrap().kind,
        StepErrorKind::Cancelled
    );
    assert!(!report.steps.contains_key("next"));
    assert!(log.calls_to("after").is_empty());
    assert_eq!(event_kinds(&sink, run_id).last(), Some(&EventKind::RunCompleted));
    assert!(runner.cancel(run_id).is_err());
}

#[tokio::test]
async fn test_failing_sinks_do_not_block_delivery() {
    struct Broken;
    impl EventSink for Broken {
        fn deliver(&self, _: &EventRecord) -> Result<(), SinkError> {
            Err(SinkError::Other("disk full".into()))
        }
    }
    struct Panicky;
    impl EventSink for Panicky {
        fn deliver(&self, _: &EventRecord) -> Result<(), SinkError> {
            panic!("sink exploded");
        }
    }

    let bus = EventBus::new(16);
    bus.register(Broken);
    bus.register(Panicky);
    let sink = MemorySink::new();
    bus.register(sink.clone());
    let runner = WorkflowRunner::new(Arc::new(ToolRegistry::new()), bus, &EngineConfig::default());

    let def = parse_workflow_yaml("name: hi\nsteps:\n  - {name: a, kind: description, text: hello}\n").unwrap();
    let report = runner.run(&def, Map::new()).await.unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.guidance[0].text, "hello");
    assert_eq!(event_kinds(&sink, report.run_id).len(), 4);
}

#[tokio::test]
async fn test_concurrent_runs_do_not_share_context() {
    let mut registry = ToolRegistry::new();
    registry.register(FnTool::new("echo", |args: Map<String, Value>| async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(Value::Object(args))
    }));
    let (runner, sink) = engine(registry, EngineConfig::default());
    let def = parse_workflow_yaml(
        r#"
name: echo
inputs: [{ name: who, type: string, required: true }]
steps:
  - { name: say, kind: tool, tool: echo, args: { who: "{{ inputs.who }}" } }
outputs:
  - { name: who, template: "{{ steps.say.output.who }}" }
"#,
    )
    .unwrap();

    let (a, b) = tokio::join!(
        runner.run(&def, inputs(json!({ "who": "ada" }))),
        runner.run(&def, inputs(json!({ "who": "grace" }))),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_ne!(a.run_id, b.run_id);
    assert_eq!(a.outputs["who"], json!("ada"));
    assert_eq!(b.outputs["who"], json!("grace"));
    assert_eq!(event_kinds(&sink, a.run_id).len(), 4);
    assert_eq!(event_kinds(&sink, b.run_id).len(), 4);
}
