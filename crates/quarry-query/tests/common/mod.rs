//! Common test utilities and mocks
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use quarry_core::{
    PanelId, PanelMessage, PanelRequest, QUERY_PROGRESS, QuarryError, QueryRunStats, QueryStatus,
    RUN_METHOD, Result, RunRequest,
};
use quarry_panel::{Panel, PanelEvent, PanelEvents, PanelHost};
use quarry_query::{CommandExecutor, ProgressReport, ProgressSink};
use quarry_transport::{CancellationToken, Disposable, RpcConnection, TransportExt};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{Notify, mpsc};

/// Poll `condition` until it holds, failing the test after a few seconds
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

pub fn stats() -> QueryRunStats {
    QueryRunStats {
        compile_time: 0.25,
        run_time: 1.5,
        total_time: 1.75,
    }
}

pub fn done(result_json: &str) -> QueryStatus {
    QueryStatus::Done {
        result_json: result_json.to_string(),
        stats: stats(),
        profiling_url: None,
        can_download_stream: false,
    }
}

// ============ Panels ============

/// Panel that records everything delivered to it
pub struct MockPanel {
    id: PanelId,
    pub messages: Mutex<Vec<PanelMessage>>,
    pub titles: Mutex<Vec<String>>,
    pub reveal_count: AtomicUsize,
    pub dispose_count: AtomicUsize,
    visible: AtomicBool,
    disposed: AtomicBool,
}

impl MockPanel {
    pub fn new(id: PanelId, title: &str) -> Self {
        Self {
            id,
            messages: Mutex::new(Vec::new()),
            titles: Mutex::new(vec![title.to_string()]),
            reveal_count: AtomicUsize::new(0),
            dispose_count: AtomicUsize::new(0),
            visible: AtomicBool::new(true),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.messages.lock().iter().map(PanelMessage::kind).collect()
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn dispose_count(&self) -> usize {
        self.dispose_count.load(Ordering::SeqCst)
    }
}

impl Panel for MockPanel {
    fn id(&self) -> &PanelId {
        &self.id
    }

    fn post_message(&self, message: PanelMessage) {
        self.messages.lock().push(message);
    }

    fn reveal(&self) {
        self.reveal_count.fetch_add(1, Ordering::SeqCst);
    }

    fn set_title(&self, title: &str) {
        self.titles.lock().push(title.to_string());
    }

    fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    fn dispose(&self) {
        self.dispose_count.fetch_add(1, Ordering::SeqCst);
        self.disposed.store(true, Ordering::SeqCst);
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

/// Host that hands out [`MockPanel`]s.
///
/// With `auto_ready` every new panel reports its content ready right away.
pub struct MockPanelHost {
    auto_ready: bool,
    pub created: Mutex<Vec<Arc<MockPanel>>>,
    events: Mutex<HashMap<PanelId, mpsc::UnboundedSender<PanelEvent>>>,
}

impl MockPanelHost {
    pub fn new() -> Arc<Self> {
        Self::with_auto_ready(true)
    }

    pub fn with_auto_ready(auto_ready: bool) -> Arc<Self> {
        Arc::new(Self {
            auto_ready,
            created: Mutex::new(Vec::new()),
            events: Mutex::new(HashMap::new()),
        })
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().len()
    }

    /// Latest panel created for `id`
    pub fn panel(&self, id: &PanelId) -> Arc<MockPanel> {
        self.created
            .lock()
            .iter()
            .rev()
            .find(|p| p.id() == id)
            .cloned()
            .expect("no panel created for id")
    }

    /// Send a host event to the latest panel created for `id`
    pub fn send(&self, id: &PanelId, event: PanelEvent) {
        let events = self.events.lock();
        let sender = events.get(id).expect("no panel created for id");
        sender.send(event).expect("panel event pump stopped");
    }
}

#[async_trait]
impl PanelHost for MockPanelHost {
    async fn create_panel(&self, id: &PanelId, title: &str) -> Result<(Arc<dyn Panel>, PanelEvents)> {
        let panel = Arc::new(MockPanel::new(id.clone(), title));
        let (tx, rx) = mpsc::unbounded_channel();
        if self.auto_ready {
            let _ = tx.send(PanelEvent::Message(PanelRequest::Ready));
        }
        self.events.lock().insert(id.clone(), tx);
        self.created.lock().push(panel.clone());
        Ok((panel, rx))
    }
}

// ============ Editor capabilities ============

/// Records executed commands and hands them to the test as they happen
pub struct RecordingCommands {
    sender: mpsc::UnboundedSender<(String, Vec<Value>)>,
}

impl RecordingCommands {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<(String, Vec<Value>)>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Arc::new(Self { sender }), receiver)
    }
}

#[async_trait]
impl CommandExecutor for RecordingCommands {
    async fn execute_command(&self, command: &str, args: Vec<Value>) -> Result<Value> {
        let _ = self.sender.send((command.to_string(), args));
        Ok(Value::Null)
    }
}

#[derive(Default)]
pub struct RecordingProgress {
    pub reports: Mutex<Vec<ProgressReport>>,
}

impl ProgressSink for RecordingProgress {
    fn report(&self, report: ProgressReport) {
        self.reports.lock().push(report);
    }
}

// ============ Worker ============

/// One step a scripted worker takes while serving a `run` request
pub enum Step {
    Emit(QueryStatus),
    /// Park until the test calls `notify_one` on the gate
    Wait(Arc<Notify>),
    /// Park until the editor cancels the request, then answer cancelled
    UntilCancelled,
    /// Answer the request with an error
    Fail(String),
    /// Drop the connection, as if the worker process died
    Crash,
}

struct WorkerState {
    connection: Arc<RpcConnection>,
    scripts: Mutex<VecDeque<Vec<Step>>>,
    requests: Mutex<Vec<RunRequest>>,
    cancelled: AtomicUsize,
    /// Method of every request and notification the editor wrote, in wire order
    editor_frames: Arc<Mutex<Vec<String>>>,
}

/// Worker peer that replays one script per `run` request, in order
pub struct ScriptedWorker {
    state: Arc<WorkerState>,
    _handler: Disposable,
}

impl ScriptedWorker {
    /// Returns the editor end of the connection together with the worker
    pub fn spawn(scripts: Vec<Vec<Step>>) -> (Arc<RpcConnection>, Self) {
        let (editor_end, editor_tap) = tokio::io::duplex(64 * 1024);
        let (worker_end, worker_tap) = tokio::io::duplex(64 * 1024);
        let (editor_read, editor_write) = tokio::io::split(editor_end);
        let (worker_read, worker_write) = tokio::io::split(worker_end);
        let editor = RpcConnection::new(editor_read, editor_write);
        let worker = RpcConnection::new(worker_read, worker_write);

        let editor_frames = Arc::new(Mutex::new(Vec::new()));
        let (mut from_editor, mut to_editor) = tokio::io::split(editor_tap);
        let (mut from_worker, mut to_worker) = tokio::io::split(worker_tap);
        tokio::spawn(async move {
            let _ = tokio::io::copy(&mut from_worker, &mut to_editor).await;
            let _ = to_editor.shutdown().await;
        });
        let frames = editor_frames.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(&mut from_editor).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Ok(frame) = serde_json::from_str::<Value>(&line)
                    && let Some(method) = frame.get("method").and_then(Value::as_str)
                    && method != "$/progress"
                {
                    frames.lock().push(method.to_string());
                }
                if to_worker.write_all(format!("{line}\n").as_bytes()).await.is_err() {
                    break;
                }
            }
            let _ = to_worker.shutdown().await;
        });

        let state = Arc::new(WorkerState {
            connection: worker.clone(),
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
            cancelled: AtomicUsize::new(0),
            editor_frames,
        });

        let serving = state.clone();
        let handler = worker.handle_request(RUN_METHOD, move |request: RunRequest, cancel: CancellationToken| {
            let state = serving.clone();
            async move { play(state, request, cancel).await }
        });

        (
            editor,
            Self {
                state,
                _handler: handler,
            },
        )
    }

    pub fn requests(&self) -> Vec<RunRequest> {
        self.state.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.requests.lock().len()
    }

    /// `run` and `$/cancelRequest` frames as the editor wrote them
    pub fn editor_frames(&self) -> Vec<String> {
        self.state.editor_frames.lock().clone()
    }

    /// Requests the editor cancelled while the script was parked
    pub fn cancelled_count(&self) -> usize {
        self.state.cancelled.load(Ordering::SeqCst)
    }
}

async fn play(state: Arc<WorkerState>, request: RunRequest, cancel: CancellationToken) -> Result<Value> {
    let token = request.panel_id.to_string();
    state.requests.lock().push(request);
    let script = state.scripts.lock().pop_front().unwrap_or_default();

    for step in script {
        match step {
            Step::Emit(status) => state.connection.progress(QUERY_PROGRESS, &token, &status).await?,
            Step::Wait(gate) => gate.notified().await,
            Step::UntilCancelled => {
                cancel.cancelled().await;
                state.cancelled.fetch_add(1, Ordering::SeqCst);
                return Err(QuarryError::Cancelled);
            }
            Step::Fail(message) => return Err(QuarryError::Query(message)),
            Step::Crash => {
                state.connection.close();
                return Err(QuarryError::WorkerCrashed("worker exited".to_string()));
            }
        }
    }
    Ok(Value::Null)
}
