//! Test doubles shared by the watchdog and review component tests.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::controller::{ProcessController, RestartOutcome};
use crate::health::{HealthProbe, ProbeOutcome};
use crate::mailbox::Mailbox;
use crate::notifier::Notifier;
use crate::review::developer::{FixRequest, TaskBackend};
use crate::review::source::{CommentSource, PrComment};

#[derive(Default)]
pub struct FakeController {
    outcomes: Mutex<VecDeque<RestartOutcome>>,
    calls: Mutex<Vec<Instant>>,
    processing_seen: Mutex<Vec<bool>>,
    watch: Option<Mailbox>,
}

impl FakeController {
    pub fn succeeding() -> Self {
        Self::default()
    }

    /// Records whether the processing marker existed when each restart ran.
    pub fn watching(mailbox: &Mailbox) -> Self {
        Self {
            watch: Some(mailbox.clone()),
            ..Self::default()
        }
    }

    pub fn push(&self, outcome: RestartOutcome) {
        self.outcomes
            .lock()
            .expect("outcome lock poisoned")
            .push_back(outcome);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock poisoned").len()
    }

    pub fn calls(&self) -> Vec<Instant> {
        self.calls.lock().expect("calls lock poisoned").clone()
    }

    pub fn processing_seen(&self) -> Vec<bool> {
        self.processing_seen
            .lock()
            .expect("processing lock poisoned")
            .clone()
    }
}

impl ProcessController for FakeController {
    async fn restart(&self) -> RestartOutcome {
        self.calls
            .lock()
            .expect("calls lock poisoned")
            .push(Instant::now());
        if let Some(mailbox) = &self.watch {
            self.processing_seen
                .lock()
                .expect("processing lock poisoned")
                .push(mailbox.has_processing());
        }
        self.outcomes
            .lock()
            .expect("outcome lock poisoned")
            .pop_front()
            .unwrap_or(RestartOutcome::Succeeded)
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().expect("messages lock poisoned").clone()
    }
}

impl Notifier for RecordingNotifier {
    async fn notify(&self, message: &str) -> bool {
        self.messages
            .lock()
            .expect("messages lock poisoned")
            .push(message.to_string());
        true
    }
}

/// Probe that replays scripted outcomes, then keeps reporting healthy.
#[derive(Default)]
pub struct ScriptedProbe {
    outcomes: Mutex<VecDeque<ProbeOutcome>>,
    calls: Mutex<usize>,
}

impl ScriptedProbe {
    pub fn with(outcomes: impl IntoIterator<Item = ProbeOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            calls: Mutex::new(0),
        }
    }

    pub fn failing_forever() -> Self {
        Self::with(std::iter::repeat(ProbeOutcome::Status(503)).take(1000))
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().expect("calls lock poisoned")
    }
}

impl HealthProbe for ScriptedProbe {
    async fn probe(&self) -> ProbeOutcome {
        *self.calls.lock().expect("calls lock poisoned") += 1;
        self.outcomes
            .lock()
            .expect("outcome lock poisoned")
            .pop_front()
            .unwrap_or(ProbeOutcome::Healthy)
    }
}

/// Serves scripted comment pages in order and keeps repeating the last one.
pub struct FakeCommentSource {
    pages: Mutex<VecDeque<Vec<PrComment>>>,
    last: Mutex<Vec<PrComment>>,
    fetches: Mutex<usize>,
}

impl FakeCommentSource {
    pub fn with_pages(pages: impl IntoIterator<Item = Vec<PrComment>>) -> Self {
        Self {
            pages: Mutex::new(pages.into_iter().collect()),
            last: Mutex::new(Vec::new()),
            fetches: Mutex::new(0),
        }
    }

    pub fn fetch_count(&self) -> usize {
        *self.fetches.lock().expect("fetch lock poisoned")
    }
}

impl CommentSource for FakeCommentSource {
    async fn fetch_comments(&self, _pr: u64) -> Result<Vec<PrComment>> {
        *self.fetches.lock().expect("fetch lock poisoned") += 1;
        let mut last = self.last.lock().expect("page lock poisoned");
        if let Some(page) = self.pages.lock().expect("page lock poisoned").pop_front() {
            *last = page;
        }
        Ok(last.clone())
    }
}

/// Task backend with a fake HEAD. `advancing` moves HEAD whenever a task is
/// created; `with_heads` replays scripted HEAD values, then keeps the last.
pub struct FakeBackend {
    heads: Mutex<VecDeque<String>>,
    current: Mutex<String>,
    advance_on_task: bool,
    created: Mutex<Vec<(String, u8)>>,
    pulls: Mutex<usize>,
}

impl FakeBackend {
    pub fn advancing() -> Self {
        Self::build(Vec::new(), true)
    }

    pub fn with_heads<'a>(heads: impl IntoIterator<Item = &'a str>) -> Self {
        Self::build(heads.into_iter().map(str::to_string).collect(), false)
    }

    fn build(heads: Vec<String>, advance_on_task: bool) -> Self {
        Self {
            heads: Mutex::new(heads.into()),
            current: Mutex::new("aaa".to_string()),
            advance_on_task,
            created: Mutex::new(Vec::new()),
            pulls: Mutex::new(0),
        }
    }

    pub fn created_titles(&self) -> Vec<String> {
        self.created
            .lock()
            .expect("task lock poisoned")
            .iter()
            .map(|(title, _)| title.clone())
            .collect()
    }

    pub fn created_priorities(&self) -> Vec<u8> {
        self.created
            .lock()
            .expect("task lock poisoned")
            .iter()
            .map(|(_, priority)| *priority)
            .collect()
    }

    pub fn pull_count(&self) -> usize {
        *self.pulls.lock().expect("pull lock poisoned")
    }
}

impl TaskBackend for FakeBackend {
    async fn create_task(&self, request: &FixRequest) -> Result<String> {
        let mut created = self.created.lock().expect("task lock poisoned");
        created.push((request.title(), request.priority()));
        if self.advance_on_task {
            *self.current.lock().expect("head lock poisoned") = format!("fix-{}", created.len());
        }
        Ok(format!("slime-arena-t{}", created.len()))
    }

    async fn pull(&self) -> Result<()> {
        *self.pulls.lock().expect("pull lock poisoned") += 1;
        Ok(())
    }

    async fn head_commit(&self) -> Result<String> {
        let mut current = self.current.lock().expect("head lock poisoned");
        if let Some(head) = self.heads.lock().expect("head lock poisoned").pop_front() {
            *current = head;
        }
        Ok(current.clone())
    }
}

pub fn review_comment(reviewer: &str, iteration: u32, status: &str, report: &str) -> PrComment {
    PrComment {
        body: format!(
            "<!-- {{\"type\":\"review\",\"reviewer\":\"{reviewer}\",\"iteration\":{iteration},\"status\":\"{status}\"}} -->\n{report}"
        ),
        created_at: "2026-03-01T10:00:00Z".to_string(),
    }
}

pub fn temp_mailbox(prefix: &str) -> Mailbox {
    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock failure")
        .as_nanos();
    let root: PathBuf = std::env::temp_dir().join(format!("arena-ops-{prefix}-{nonce}"));
    let mailbox = Mailbox::new(root);
    mailbox.ensure_layout().expect("failed to create mailbox");
    mailbox
}

/// Serves exactly one HTTP request with the given status and body. The
/// returned handle resolves to the raw request text.
pub async fn spawn_http_stub(status: u16, body: &'static str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind stub listener");
    let addr = listener.local_addr().expect("failed to resolve stub addr");

    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept failed");
        let raw = read_http_request(&mut stream).await;
        let response = format!(
            "HTTP/1.1 {status} STUB\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        stream
            .write_all(response.as_bytes())
            .await
            .expect("write failed");
        let _ = stream.shutdown().await;
        raw
    });

    (format!("http://{addr}"), handle)
}

async fn read_http_request(stream: &mut tokio::net::TcpStream) -> String {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 1024];
    loop {
        let read = stream.read(&mut chunk).await.expect("read failed");
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);

        let text = String::from_utf8_lossy(&buffer);
        let Some(header_end) = text.find("\r\n\r\n") else {
            continue;
        };
        let content_length = text[..header_end]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                if name.trim().eq_ignore_ascii_case("content-length") {
                    value.trim().parse::<usize>().ok()
                } else {
                    None
                }
            })
            .unwrap_or(0);
        if buffer.len() >= header_end + 4 + content_length {
            break;
        }
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
