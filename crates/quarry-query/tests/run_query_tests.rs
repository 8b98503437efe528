//! Integration tests for QueryRunner
//!
//! Every test drives the orchestrator against a scripted worker over an
//! in-memory JSON-RPC pipe and a host that records what its panels show.

mod common;

use pretty_assertions::assert_eq;
use quarry_core::{
    DOWNLOAD_RESULTS_COMMAND, PanelId, PanelMessage, PanelRequest, QuarryError, QuerySpec,
    QueryStatus,
};
use quarry_panel::PanelEvent;
use quarry_query::{NoopCommands, ProgressReport, ProgressSink, QueryRunner, RunOptions};
use quarry_transport::{CancellationToken, RpcConnection};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use common::{
    MockPanelHost, RecordingCommands, RecordingProgress, ScriptedWorker, Step, done, eventually,
    stats,
};

fn query() -> QuerySpec {
    QuerySpec::Named {
        uri: "file:///flights.sql".into(),
        name: "by_carrier".into(),
    }
}

fn runner(editor: Arc<RpcConnection>, host: Arc<MockPanelHost>) -> Arc<QueryRunner> {
    Arc::new(QueryRunner::new(editor, host, Arc::new(NoopCommands)))
}

fn full_run() -> Vec<Step> {
    vec![
        Step::Emit(QueryStatus::Compiling),
        Step::Emit(QueryStatus::Running {
            dialect: "duckdb".into(),
        }),
        Step::Emit(done(r#"{"rows":[{"carrier":"AA","n":10}]}"#)),
    ]
}

fn parked_run() -> Vec<Step> {
    vec![
        Step::Emit(QueryStatus::Compiling),
        Step::Emit(QueryStatus::Running {
            dialect: "duckdb".into(),
        }),
        Step::UntilCancelled,
    ]
}

// ============ Staged runs ============

#[tokio::test]
async fn sql_only_run_resolves_empty_and_shows_sql_once() {
    let (editor, worker) = ScriptedWorker::spawn(vec![vec![
        Step::Emit(QueryStatus::Compiling),
        Step::Emit(QueryStatus::Compiled {
            sql: "SELECT 1".into(),
        }),
    ]]);
    let host = MockPanelHost::new();
    let runner = runner(editor, host.clone());
    let id = PanelId::new("p1");

    let options = RunOptions {
        show_sql_only: true,
        ..RunOptions::with_webview()
    };
    let result = runner
        .run_query(query(), id.clone(), "by_carrier", options, CancellationToken::new(), None)
        .await
        .unwrap();
    assert_eq!(result, None);

    let panel = host.panel(&id);
    eventually("sql to be shown", || panel.message_count() == 2).await;
    let sql_messages: Vec<PanelMessage> = panel
        .messages
        .lock()
        .iter()
        .filter(|m| m.kind() == "compiled")
        .cloned()
        .collect();
    assert_eq!(
        sql_messages,
        vec![PanelMessage::Compiled {
            sql: "SELECT 1".into(),
            show_sql_only: true,
        }]
    );
    assert!(worker.requests()[0].show_sql_only);
}

#[tokio::test]
async fn schema_only_run_resolves_empty_with_one_schema_message() {
    let (editor, _worker) = ScriptedWorker::spawn(vec![vec![
        Step::Emit(QueryStatus::Compiling),
        Step::Emit(QueryStatus::Schema {
            schema: json!([{"name": "carrier", "type": "string"}]),
        }),
    ]]);
    let host = MockPanelHost::new();
    let runner = runner(editor, host.clone());
    let id = PanelId::new("p1");

    let options = RunOptions {
        show_schema_only: true,
        ..RunOptions::with_webview()
    };
    let result = runner
        .run_query(query(), id.clone(), "by_carrier", options, CancellationToken::new(), None)
        .await
        .unwrap();
    assert_eq!(result, None);

    let panel = host.panel(&id);
    eventually("schema to be shown", || panel.message_count() == 2).await;
    assert_eq!(panel.kinds(), vec!["compiling", "schema"]);
}

#[tokio::test]
async fn full_run_resolves_with_result_and_shows_stages_in_order() {
    let (editor, _worker) = ScriptedWorker::spawn(vec![full_run()]);
    let host = MockPanelHost::new();
    let runner = runner(editor, host.clone());
    let id = PanelId::new("p1");
    let progress = Arc::new(RecordingProgress::default());

    let result = runner
        .run_query(
            query(),
            id.clone(),
            "by_carrier",
            RunOptions::with_webview(),
            CancellationToken::new(),
            Some(progress.clone() as Arc<dyn ProgressSink>),
        )
        .await
        .unwrap()
        .expect("full run has a result");

    assert_eq!(result.result, json!({"rows": [{"carrier": "AA", "n": 10}]}));
    assert_eq!(result.stats, stats());
    assert_eq!(result.profiling_url, None);

    let panel = host.panel(&id);
    eventually("results to be shown", || panel.message_count() == 3).await;
    assert_eq!(panel.kinds(), vec!["compiling", "running", "done"]);

    assert_eq!(
        *progress.reports.lock(),
        vec![ProgressReport::new(20, "Compiling"), ProgressReport::new(40, "Running")]
    );
    assert_eq!(runner.usage().get("duckdb"), Some(&1));
}

#[tokio::test]
async fn estimated_cost_ends_a_cost_only_run() {
    let (editor, _worker) = ScriptedWorker::spawn(vec![vec![
        Step::Emit(QueryStatus::Compiling),
        Step::Emit(QueryStatus::EstimatedCost {
            query_cost_bytes: Some(2048),
            schema: json!([]),
        }),
    ]]);
    let host = MockPanelHost::new();
    let runner = runner(editor, host.clone());
    let id = PanelId::new("p1");

    let options = RunOptions {
        estimate_cost_only: true,
        ..RunOptions::with_webview()
    };
    let result = runner
        .run_query(query(), id.clone(), "by_carrier", options, CancellationToken::new(), None)
        .await
        .unwrap();
    assert_eq!(result, None);

    let panel = host.panel(&id);
    eventually("estimate to be shown", || panel.message_count() == 2).await;
    assert_eq!(panel.kinds(), vec!["compiling", "estimatedCost"]);
}

#[tokio::test]
async fn run_without_panel_returns_result() {
    let (editor, _worker) = ScriptedWorker::spawn(vec![full_run()]);
    let host = MockPanelHost::new();
    let runner = runner(editor, host.clone());

    let result = runner
        .run_query(
            query(),
            PanelId::new("p1"),
            "by_carrier",
            RunOptions::default(),
            CancellationToken::new(),
            None,
        )
        .await
        .unwrap();

    assert!(result.is_some());
    assert_eq!(host.created_count(), 0);
    assert!(runner.registry().is_empty());
}

// ============ Failures ============

#[tokio::test]
async fn error_status_is_shown_in_panel_and_resolves_empty() {
    let (editor, _worker) = ScriptedWorker::spawn(vec![vec![
        Step::Emit(QueryStatus::Compiling),
        Step::Emit(QueryStatus::Error {
            error: "no such table: flights".into(),
        }),
    ]]);
    let host = MockPanelHost::new();
    let runner = runner(editor, host.clone());
    let id = PanelId::new("p1");

    let result = runner
        .run_query(
            query(),
            id.clone(),
            "by_carrier",
            RunOptions::with_webview(),
            CancellationToken::new(),
            None,
        )
        .await
        .unwrap();
    assert_eq!(result, None);

    let panel = host.panel(&id);
    eventually("error to be shown", || panel.message_count() == 2).await;
    assert_eq!(
        panel.messages.lock()[1],
        PanelMessage::Error {
            error: "no such table: flights".into()
        }
    );
}

#[tokio::test]
async fn error_status_without_panel_is_returned() {
    let (editor, _worker) = ScriptedWorker::spawn(vec![vec![Step::Emit(QueryStatus::Error {
        error: "no such table: flights".into(),
    })]]);
    let runner = runner(editor, MockPanelHost::new());

    let err = runner
        .run_query(
            query(),
            PanelId::new("p1"),
            "by_carrier",
            RunOptions::default(),
            CancellationToken::new(),
            None,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, QuarryError::Query(message) if message == "no such table: flights"));
}

#[tokio::test]
async fn failed_request_without_status_is_returned() {
    let (editor, _worker) = ScriptedWorker::spawn(vec![vec![Step::Fail("bad request".into())]]);
    let runner = runner(editor, MockPanelHost::new());

    let err = runner
        .run_query(
            query(),
            PanelId::new("p1"),
            "by_carrier",
            RunOptions::default(),
            CancellationToken::new(),
            None,
        )
        .await
        .unwrap_err();

    assert!(err.to_string().contains("bad request"), "{err}");
}

#[tokio::test]
async fn worker_crash_is_reported_in_panel() {
    let (editor, _worker) = ScriptedWorker::spawn(vec![vec![
        Step::Emit(QueryStatus::Compiling),
        Step::Crash,
    ]]);
    let host = MockPanelHost::new();
    let runner = runner(editor, host.clone());
    let id = PanelId::new("p1");

    let result = runner
        .run_query(
            query(),
            id.clone(),
            "by_carrier",
            RunOptions::with_webview(),
            CancellationToken::new(),
            None,
        )
        .await
        .unwrap();
    assert_eq!(result, None);

    let panel = host.panel(&id);
    eventually("crash to be shown", || panel.kinds().contains(&"error")).await;
    let messages = panel.messages.lock();
    let Some(PanelMessage::Error { error }) = messages.last() else {
        panic!("last message is not an error: {messages:?}");
    };
    assert!(error.contains("stopped unexpectedly"), "{error}");
}

#[tokio::test]
async fn worker_crash_without_panel_is_returned() {
    let (editor, _worker) = ScriptedWorker::spawn(vec![vec![Step::Crash]]);
    let runner = runner(editor, MockPanelHost::new());

    let err = runner
        .run_query(
            query(),
            PanelId::new("p1"),
            "by_carrier",
            RunOptions::default(),
            CancellationToken::new(),
            None,
        )
        .await
        .unwrap_err();

    assert!(err.to_string().contains("stopped unexpectedly"), "{err}");
}

#[tokio::test]
async fn undecodable_result_fails_the_run() {
    let (editor, _worker) = ScriptedWorker::spawn(vec![vec![Step::Emit(done("{not json"))]]);
    let runner = runner(editor, MockPanelHost::new());

    let err = runner
        .run_query(
            query(),
            PanelId::new("p1"),
            "by_carrier",
            RunOptions::default(),
            CancellationToken::new(),
            None,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, QuarryError::Query(_)), "{err:?}");
}

// ============ Settling ============

#[tokio::test]
async fn statuses_after_done_are_ignored() {
    let mut script = full_run();
    script.push(Step::Emit(QueryStatus::Error {
        error: "late".into(),
    }));
    script.push(Step::Emit(done("{}")));
    let (editor, _worker) = ScriptedWorker::spawn(vec![script]);
    let host = MockPanelHost::new();
    let runner = runner(editor, host.clone());
    let id = PanelId::new("p1");

    let result = runner
        .run_query(
            query(),
            id.clone(),
            "by_carrier",
            RunOptions::with_webview(),
            CancellationToken::new(),
            None,
        )
        .await
        .unwrap();
    assert!(result.is_some());

    let panel = host.panel(&id);
    eventually("results to be shown", || panel.message_count() >= 3).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(panel.kinds(), vec!["compiling", "running", "done"]);
}

#[tokio::test]
async fn response_without_final_status_resolves_empty() {
    let (editor, _worker) = ScriptedWorker::spawn(vec![vec![Step::Emit(QueryStatus::Compiling)]]);
    let runner = runner(editor, MockPanelHost::new());

    let result = runner
        .run_query(
            query(),
            PanelId::new("p1"),
            "by_carrier",
            RunOptions::default(),
            CancellationToken::new(),
            None,
        )
        .await
        .unwrap();

    assert_eq!(result, None);
}

// ============ Cancellation ============

#[tokio::test]
async fn cancel_between_running_and_done_disposes_current_panel() {
    let (editor, worker) = ScriptedWorker::spawn(vec![parked_run()]);
    let host = MockPanelHost::new();
    let runner = runner(editor, host.clone());
    let id = PanelId::new("p1");
    let cancel = CancellationToken::new();

    let handle = {
        let runner = runner.clone();
        let (id, cancel) = (id.clone(), cancel.clone());
        tokio::spawn(async move {
            runner
                .run_query(query(), id, "by_carrier", RunOptions::with_webview(), cancel, None)
                .await
        })
    };

    eventually("panel to be created", || host.created_count() == 1).await;
    let panel = host.panel(&id);
    eventually("run to be running", || panel.kinds().contains(&"running")).await;

    cancel.cancel();
    let result = handle.await.unwrap().unwrap();
    assert_eq!(result, None);

    eventually("worker to see the cancel", || worker.cancelled_count() == 1).await;
    assert_eq!(panel.dispose_count(), 1);
    assert!(!panel.kinds().contains(&"done"));
    assert!(runner.registry().get(&id).is_none());
}

#[tokio::test]
async fn caller_cancel_before_start_sends_nothing() {
    let (editor, worker) = ScriptedWorker::spawn(vec![full_run()]);
    let host = MockPanelHost::new();
    let runner = runner(editor, host.clone());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = runner
        .run_query(query(), PanelId::new("p1"), "by_carrier", RunOptions::with_webview(), cancel, None)
        .await
        .unwrap();

    assert_eq!(result, None);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(worker.request_count(), 0);
}

#[tokio::test]
async fn new_run_supersedes_active_run_on_same_panel() {
    let (editor, worker) = ScriptedWorker::spawn(vec![parked_run(), full_run()]);
    let host = MockPanelHost::new();
    let runner = runner(editor, host.clone());
    let id = PanelId::new("p1");

    let first = {
        let runner = runner.clone();
        let id = id.clone();
        tokio::spawn(async move {
            runner
                .run_query(query(), id, "first", RunOptions::with_webview(), CancellationToken::new(), None)
                .await
        })
    };
    eventually("first run to start", || worker.request_count() == 1).await;
    let panel = host.panel(&id);
    eventually("first run to be running", || panel.kinds().contains(&"running")).await;

    let second = runner
        .run_query(query(), id.clone(), "second", RunOptions::with_webview(), CancellationToken::new(), None)
        .await
        .unwrap();

    assert_eq!(first.await.unwrap().unwrap(), None);
    assert!(second.is_some());
    assert_eq!(host.created_count(), 1);
    assert_eq!(panel.dispose_count(), 0);
    assert_eq!(panel.titles.lock().last().map(String::as_str), Some("second"));
    eventually("worker to see the cancel", || worker.cancelled_count() == 1).await;
    // The first run's cancellation reaches the worker before the second run
    assert_eq!(worker.editor_frames(), vec!["run", "$/cancelRequest", "run"]);
}

#[tokio::test]
async fn run_without_panel_supersedes_panel_run_on_same_identity() {
    let (editor, worker) = ScriptedWorker::spawn(vec![
        parked_run(),
        vec![Step::Emit(QueryStatus::Compiling), Step::Emit(done(r#"{"second":true}"#))],
    ]);
    let host = MockPanelHost::new();
    let runner = runner(editor, host.clone());
    let id = PanelId::new("p1");

    let first = {
        let runner = runner.clone();
        let id = id.clone();
        tokio::spawn(async move {
            runner
                .run_query(query(), id, "first", RunOptions::with_webview(), CancellationToken::new(), None)
                .await
        })
    };
    eventually("first run to start", || worker.request_count() == 1).await;
    let panel = host.panel(&id);
    eventually("first run to be running", || panel.kinds().contains(&"running")).await;

    let second = runner
        .run_query(query(), id.clone(), "second", RunOptions::default(), CancellationToken::new(), None)
        .await
        .unwrap();

    assert_eq!(first.await.unwrap().unwrap(), None);
    assert_eq!(second.map(|r| r.result), Some(json!({"second": true})));
    // The second run's stages never reach the first run's panel
    assert_eq!(panel.kinds(), vec!["compiling", "running"]);
    assert_eq!(panel.dispose_count(), 0);
    eventually("worker to see the cancel", || worker.cancelled_count() == 1).await;
    assert_eq!(worker.editor_frames(), vec!["run", "$/cancelRequest", "run"]);
}

#[tokio::test]
async fn runs_without_panel_on_same_identity_do_not_share_statuses() {
    let (editor, worker) = ScriptedWorker::spawn(vec![
        parked_run(),
        vec![Step::Emit(done(r#"{"second":true}"#))],
    ]);
    let host = MockPanelHost::new();
    let runner = runner(editor, host.clone());
    let id = PanelId::new("p1");

    let first = {
        let runner = runner.clone();
        let id = id.clone();
        tokio::spawn(async move {
            runner
                .run_query(query(), id, "first", RunOptions::default(), CancellationToken::new(), None)
                .await
        })
    };
    eventually("first run to start", || worker.request_count() == 1).await;

    let second = runner
        .run_query(query(), id, "second", RunOptions::default(), CancellationToken::new(), None)
        .await
        .unwrap();

    assert_eq!(first.await.unwrap().unwrap(), None);
    assert_eq!(second.map(|r| r.result), Some(json!({"second": true})));
    assert_eq!(host.created_count(), 0);
    eventually("worker to see the cancel", || worker.cancelled_count() == 1).await;
}

#[tokio::test]
async fn late_cancel_of_superseded_run_keeps_new_runs_panel() {
    let gate = Arc::new(Notify::new());
    let second_script = vec![
        Step::Emit(QueryStatus::Compiling),
        Step::Wait(gate.clone()),
        Step::Emit(done("{}")),
    ];
    let (editor, worker) = ScriptedWorker::spawn(vec![parked_run(), second_script]);
    let host = MockPanelHost::new();
    let runner = runner(editor, host.clone());
    let id = PanelId::new("p1");
    let first_cancel = CancellationToken::new();

    let first = {
        let runner = runner.clone();
        let (id, cancel) = (id.clone(), first_cancel.clone());
        tokio::spawn(async move {
            runner
                .run_query(query(), id, "first", RunOptions::with_webview(), cancel, None)
                .await
        })
    };
    eventually("first run to start", || worker.request_count() == 1).await;

    let second = {
        let runner = runner.clone();
        let id = id.clone();
        tokio::spawn(async move {
            runner
                .run_query(query(), id, "second", RunOptions::with_webview(), CancellationToken::new(), None)
                .await
        })
    };
    eventually("second run to start", || worker.request_count() == 2).await;
    assert_eq!(first.await.unwrap().unwrap(), None);

    // The first caller gives up only now; the panel belongs to the second run
    first_cancel.cancel();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let panel = host.panel(&id);
    assert_eq!(panel.dispose_count(), 0);
    assert!(runner.registry().get(&id).is_some());

    gate.notify_one();
    assert!(second.await.unwrap().unwrap().is_some());
}

#[tokio::test]
async fn runs_on_different_panels_are_independent() {
    let (editor, worker) = ScriptedWorker::spawn(vec![parked_run(), full_run()]);
    let host = MockPanelHost::new();
    let runner = runner(editor, host.clone());

    let first = {
        let runner = runner.clone();
        tokio::spawn(async move {
            runner
                .run_query(
                    query(),
                    PanelId::new("a"),
                    "a",
                    RunOptions::with_webview(),
                    CancellationToken::new(),
                    None,
                )
                .await
        })
    };
    eventually("first run to start", || worker.request_count() == 1).await;

    let second = runner
        .run_query(
            query(),
            PanelId::new("b"),
            "b",
            RunOptions::with_webview(),
            CancellationToken::new(),
            None,
        )
        .await
        .unwrap();

    assert!(second.is_some());
    assert!(!first.is_finished());
    assert_eq!(worker.cancelled_count(), 0);
    assert_eq!(host.created_count(), 2);
    first.abort();
}

// ============ Panel lifecycle ============

#[tokio::test]
async fn messages_wait_for_panel_content() {
    let (editor, _worker) = ScriptedWorker::spawn(vec![vec![
        Step::Emit(QueryStatus::Compiling),
        Step::Emit(QueryStatus::Compiled {
            sql: "SELECT 1".into(),
        }),
    ]]);
    let host = MockPanelHost::with_auto_ready(false);
    let runner = runner(editor, host.clone());
    let id = PanelId::new("p1");

    let options = RunOptions {
        show_sql_only: true,
        ..RunOptions::with_webview()
    };
    runner
        .run_query(query(), id.clone(), "by_carrier", options, CancellationToken::new(), None)
        .await
        .unwrap();

    let panel = host.panel(&id);
    assert_eq!(panel.message_count(), 0);

    host.send(&id, PanelEvent::Message(PanelRequest::Ready));
    eventually("queued messages to flush", || panel.message_count() == 2).await;
    assert_eq!(panel.kinds(), vec!["compiling", "compiled"]);
}

#[tokio::test]
async fn hidden_panel_holds_messages_until_shown() {
    let (editor, _worker) = ScriptedWorker::spawn(vec![vec![Step::Emit(QueryStatus::Compiling)], full_run()]);
    let host = MockPanelHost::new();
    let runner = runner(editor, host.clone());
    let id = PanelId::new("p1");

    runner
        .run_query(query(), id.clone(), "q", RunOptions::with_webview(), CancellationToken::new(), None)
        .await
        .unwrap();
    let panel = host.panel(&id);
    eventually("first run to be shown", || panel.message_count() == 1).await;

    host.send(&id, PanelEvent::VisibilityChanged(false));
    tokio::time::sleep(Duration::from_millis(20)).await;
    runner
        .run_query(query(), id.clone(), "q", RunOptions::with_webview(), CancellationToken::new(), None)
        .await
        .unwrap();
    assert_eq!(panel.message_count(), 1);

    host.send(&id, PanelEvent::VisibilityChanged(true));
    eventually("held messages to flush", || panel.message_count() == 4).await;
    assert_eq!(panel.kinds(), vec!["compiling", "compiling", "running", "done"]);
}

#[tokio::test]
async fn closing_the_panel_cancels_its_run() {
    let (editor, worker) = ScriptedWorker::spawn(vec![parked_run(), full_run()]);
    let host = MockPanelHost::new();
    let runner = runner(editor, host.clone());
    let id = PanelId::new("p1");

    let first = {
        let runner = runner.clone();
        let id = id.clone();
        tokio::spawn(async move {
            runner
                .run_query(query(), id, "q", RunOptions::with_webview(), CancellationToken::new(), None)
                .await
        })
    };
    eventually("run to start", || worker.request_count() == 1).await;

    host.send(&id, PanelEvent::Disposed);
    assert_eq!(first.await.unwrap().unwrap(), None);
    eventually("registry to forget the panel", || runner.registry().get(&id).is_none()).await;
    eventually("worker to see the cancel", || worker.cancelled_count() == 1).await;

    runner
        .run_query(query(), id.clone(), "q", RunOptions::with_webview(), CancellationToken::new(), None)
        .await
        .unwrap();
    assert_eq!(host.created_count(), 2);
}

#[tokio::test]
async fn download_request_is_forwarded_after_results() {
    let (editor, _worker) = ScriptedWorker::spawn(vec![full_run()]);
    let host = MockPanelHost::new();
    let (commands, mut executed) = RecordingCommands::new();
    let runner = QueryRunner::new(editor, host.clone(), commands);
    let id = PanelId::new("p1");

    runner
        .run_query(
            query(),
            id.clone(),
            "by_carrier",
            RunOptions::with_webview(),
            CancellationToken::new(),
            None,
        )
        .await
        .unwrap();

    host.send(
        &id,
        PanelEvent::Message(PanelRequest::StartDownload {
            download_options: json!({"format": "csv"}),
        }),
    );
    let (command, args) = tokio::time::timeout(Duration::from_secs(5), executed.recv())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(command, DOWNLOAD_RESULTS_COMMAND);
    assert_eq!(
        args,
        vec![
            json!({"format": "csv"}),
            serde_json::to_value(query()).unwrap(),
            json!("p1"),
            json!("by_carrier"),
        ]
    );
}

#[tokio::test]
async fn panel_commands_are_ignored_while_running() {
    let (editor, worker) = ScriptedWorker::spawn(vec![parked_run()]);
    let host = MockPanelHost::new();
    let (commands, mut executed) = RecordingCommands::new();
    let runner = Arc::new(QueryRunner::new(editor, host.clone(), commands));
    let id = PanelId::new("p1");
    let cancel = CancellationToken::new();

    let handle = {
        let runner = runner.clone();
        let (id, cancel) = (id.clone(), cancel.clone());
        tokio::spawn(async move {
            runner
                .run_query(query(), id, "q", RunOptions::with_webview(), cancel, None)
                .await
        })
    };
    eventually("run to start", || worker.request_count() == 1).await;

    host.send(
        &id,
        PanelEvent::Message(PanelRequest::RunCommand {
            command: "quarry.copyToClipboard".into(),
            args: vec![],
        }),
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(executed.try_recv().is_err());

    cancel.cancel();
    handle.await.unwrap().unwrap();
}
