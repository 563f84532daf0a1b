//! Resumable SSE subscription to one run's event stream.
//!
//! The connector owns transport state only. Envelopes go out on an ordered
//! channel, lifecycle changes on a `watch` channel, and the highest stream
//! cursor seen is carried into every reconnect.

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use runwatch_core::contracts;
use runwatch_core::sse::{decode_envelope, SseFrameDecoder, DEFAULT_MAX_FRAME_BYTES};
use runwatch_core::{Envelope, EventKind, StreamCursor};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

const ITEM_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    /// Delay before reconnect number `attempt` (1-based):
    /// `min(base * 2^(attempt-1), cap)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .map(|delay| delay.min(self.cap))
            .unwrap_or(self.cap)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(10),
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    RunCompleted,
    RunFailed,
    RetriesExhausted,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting { attempt: u32 },
    Connected,
    Reconnecting { attempt: u32, delay: Duration },
    Closed(CloseReason),
}

impl ConnectionState {
    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed(_))
    }

    pub fn label(&self) -> String {
        match self {
            ConnectionState::Disconnected => "disconnected".to_string(),
            ConnectionState::Connecting { attempt } => format!("connecting (attempt {attempt})"),
            ConnectionState::Connected => "connected".to_string(),
            ConnectionState::Reconnecting { attempt, delay } => {
                format!("reconnecting in {}ms (retry {attempt})", delay.as_millis())
            }
            ConnectionState::Closed(reason) => format!("closed: {reason:?}"),
        }
    }
}

/// Pure transition logic. Consecutive failures count toward the retry
/// ceiling; a successful open resets the count.
#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    policy: BackoffPolicy,
    state: ConnectionState,
    failures: u32,
}

impl ConnectionMachine {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::Disconnected,
            failures: 0,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn begin_attempt(&mut self) -> ConnectionState {
        self.state = ConnectionState::Connecting {
            attempt: self.failures + 1,
        };
        self.state.clone()
    }

    pub fn on_open(&mut self) -> ConnectionState {
        self.failures = 0;
        self.state = ConnectionState::Connected;
        self.state.clone()
    }

    /// Returns `Reconnecting` with the delay to wait, or `Closed` once the
    /// retry ceiling is passed.
    pub fn on_failure(&mut self) -> ConnectionState {
        self.failures += 1;
        self.state = if self.failures > self.policy.max_attempts {
            ConnectionState::Closed(CloseReason::RetriesExhausted)
        } else {
            ConnectionState::Reconnecting {
                attempt: self.failures,
                delay: self.policy.delay(self.failures),
            }
        };
        self.state.clone()
    }

    pub fn close(&mut self, reason: CloseReason) -> ConnectionState {
        self.state = ConnectionState::Closed(reason);
        self.state.clone()
    }
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("stream idle for {0:?}")]
    Idle(Duration),
    #[error("stream closed by upstream")]
    Eof,
}

#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub base_url: Url,
    pub backoff: BackoffPolicy,
    pub idle_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_frame_bytes: usize,
}

impl ConnectorConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            backoff: BackoffPolicy::default(),
            idle_timeout: Duration::from_secs(45),
            connect_timeout: Duration::from_secs(10),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Envelope(Envelope),
    Heartbeat { at: DateTime<Utc> },
}

pub struct Subscription {
    pub items: mpsc::Receiver<StreamItem>,
    pub status: watch::Receiver<ConnectionState>,
}

pub struct ConnectionHandle {
    cancelled: Arc<AtomicBool>,
    status: Arc<watch::Sender<ConnectionState>>,
    cursor: watch::Receiver<Option<StreamCursor>>,
    task: JoinHandle<()>,
}

impl ConnectionHandle {
    /// Cancels any pending reconnect timer and drops the active transport.
    /// Safe to call any number of times.
    pub fn disconnect(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.task.abort();
        publish(&self.status, ConnectionState::Closed(CloseReason::Cancelled));
        info!(event = "stream_disconnect");
    }

    pub fn cursor(&self) -> Option<StreamCursor> {
        self.cursor.borrow().clone()
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Terminal states are sticky: once closed, nothing reopens the status.
fn publish(status: &watch::Sender<ConnectionState>, next: ConnectionState) {
    status.send_if_modified(|current| {
        if current.is_terminal() || *current == next {
            return false;
        }
        *current = next;
        true
    });
}

pub fn connect(
    config: ConnectorConfig,
    run_id: &str,
    resume_from: Option<StreamCursor>,
) -> Result<(ConnectionHandle, Subscription), ConnectError> {
    let client = reqwest::Client::builder()
        .connect_timeout(config.connect_timeout)
        .build()?;
    // Validate up front so a bad base URL fails the call, not the task.
    events_url(&config.base_url, run_id, None)?;

    let (item_tx, item_rx) = mpsc::channel(ITEM_QUEUE_CAPACITY);
    let (status_tx, status_rx) = watch::channel(ConnectionState::Disconnected);
    let (cursor_tx, cursor_rx) = watch::channel(resume_from);
    let status_tx = Arc::new(status_tx);
    let cancelled = Arc::new(AtomicBool::new(false));

    let session = StreamSession {
        client,
        config,
        run_id: run_id.to_string(),
        items: item_tx,
        status: status_tx.clone(),
        cursor: cursor_tx,
        cancelled: cancelled.clone(),
    };
    let task = tokio::spawn(session.run());

    Ok((
        ConnectionHandle {
            cancelled,
            status: status_tx,
            cursor: cursor_rx,
            task,
        },
        Subscription {
            items: item_rx,
            status: status_rx,
        },
    ))
}

pub fn events_url(
    base: &Url,
    run_id: &str,
    cursor: Option<&StreamCursor>,
) -> Result<Url, ConnectError> {
    let mut url = base.join(&contracts::events_path(run_id))?;
    if let Some(cursor) = cursor {
        url.query_pairs_mut().append_pair("since", cursor.as_str());
    }
    Ok(url)
}

enum SessionEnd {
    Terminal(CloseReason),
    Dropped(ConnectError),
    ReceiverGone,
}

struct StreamSession {
    client: reqwest::Client,
    config: ConnectorConfig,
    run_id: String,
    items: mpsc::Sender<StreamItem>,
    status: Arc<watch::Sender<ConnectionState>>,
    cursor: watch::Sender<Option<StreamCursor>>,
    cancelled: Arc<AtomicBool>,
}

impl StreamSession {
    async fn run(self) {
        let mut machine = ConnectionMachine::new(self.config.backoff);
        loop {
            if self.cancelled.load(Ordering::SeqCst) {
                return;
            }
            self.set_state(machine.begin_attempt());

            let end = match self.open().await {
                Ok(response) => {
                    self.set_state(machine.on_open());
                    let cursor = self
                        .current_cursor()
                        .map(|cursor| cursor.to_string())
                        .unwrap_or_default();
                    info!(event = "stream_connected", run_id = %self.run_id, cursor = %cursor);
                    self.pump(response).await
                }
                Err(err) => SessionEnd::Dropped(err),
            };

            match end {
                SessionEnd::Terminal(reason) => {
                    info!(event = "stream_closed", run_id = %self.run_id, reason = ?reason);
                    self.set_state(machine.close(reason));
                    return;
                }
                SessionEnd::ReceiverGone => {
                    self.set_state(machine.close(CloseReason::Cancelled));
                    return;
                }
                SessionEnd::Dropped(err) => {
                    let next = machine.on_failure();
                    match next {
                        ConnectionState::Reconnecting { attempt, delay } => {
                            warn!(
                                event = "stream_reconnecting",
                                run_id = %self.run_id,
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                error = %err
                            );
                            self.set_state(next);
                            tokio::time::sleep(delay).await;
                        }
                        _ => {
                            error!(
                                event = "stream_retries_exhausted",
                                run_id = %self.run_id,
                                max_attempts = self.config.backoff.max_attempts,
                                error = %err
                            );
                            self.set_state(next);
                            return;
                        }
                    }
                }
            }
        }
    }

    fn set_state(&self, next: ConnectionState) {
        if self.cancelled.load(Ordering::SeqCst) {
            return;
        }
        publish(&self.status, next);
    }

    fn current_cursor(&self) -> Option<StreamCursor> {
        self.cursor.borrow().clone()
    }

    async fn open(&self) -> Result<reqwest::Response, ConnectError> {
        let cursor = self.current_cursor();
        let url = events_url(&self.config.base_url, &self.run_id, cursor.as_ref())?;
        let mut request = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .header(reqwest::header::CACHE_CONTROL, "no-cache");
        if let Some(cursor) = &cursor {
            request = request.header("Last-Event-ID", cursor.as_str());
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ConnectError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn pump(&self, response: reqwest::Response) -> SessionEnd {
        let mut decoder = SseFrameDecoder::new(self.config.max_frame_bytes);
        let mut body = response.bytes_stream();
        loop {
            let chunk = match tokio::time::timeout(self.config.idle_timeout, body.next()).await {
                Err(_) => return SessionEnd::Dropped(ConnectError::Idle(self.config.idle_timeout)),
                Ok(None) => break,
                Ok(Some(Err(err))) => return SessionEnd::Dropped(ConnectError::Transport(err)),
                Ok(Some(Ok(chunk))) => chunk,
            };
            let report = decoder.push_chunk(&chunk);
            if let Some(end) = self.dispatch(report).await {
                return end;
            }
        }
        if let Some(end) = self.dispatch(decoder.finish()).await {
            return end;
        }
        SessionEnd::Dropped(ConnectError::Eof)
    }

    async fn dispatch(
        &self,
        report: runwatch_core::sse::DecodeReport<runwatch_core::sse::SseFrame>,
    ) -> Option<SessionEnd> {
        for err in report.errors {
            warn!(event = "stream_decode_error", run_id = %self.run_id, error = %err);
        }
        for frame in report.frames {
            if let Some(retry_ms) = frame.retry_ms {
                debug!(event = "stream_retry_hint", retry_ms);
            }
            let mut envelope = match decode_envelope(&frame) {
                Ok(envelope) => envelope,
                Err(err) => {
                    warn!(
                        event = "stream_decode_error",
                        run_id = %self.run_id,
                        frame_id = frame.id.as_deref().unwrap_or(""),
                        error = %err
                    );
                    continue;
                }
            };
            self.advance_cursor(&envelope, frame.id.as_deref());

            let terminal = match envelope.kind {
                EventKind::RunCompleted => Some(CloseReason::RunCompleted),
                EventKind::RunFailed => Some(CloseReason::RunFailed),
                _ => None,
            };
            let item = if envelope.kind.is_heartbeat() {
                StreamItem::Heartbeat {
                    at: envelope.timestamp.unwrap_or_else(Utc::now),
                }
            } else {
                if envelope.timestamp.is_none() {
                    envelope.timestamp = Some(Utc::now());
                }
                StreamItem::Envelope(envelope)
            };
            if self.items.send(item).await.is_err() {
                return Some(SessionEnd::ReceiverGone);
            }
            if let Some(reason) = terminal {
                return Some(SessionEnd::Terminal(reason));
            }
        }
        None
    }

    fn advance_cursor(&self, envelope: &Envelope, frame_id: Option<&str>) {
        let candidate = envelope
            .stream_id
            .as_deref()
            .and_then(StreamCursor::new)
            .or_else(|| frame_id.and_then(StreamCursor::from_frame_id));
        let Some(candidate) = candidate else {
            return;
        };
        self.cursor.send_if_modified(|current| {
            let newer = current
                .as_ref()
                .map_or(true, |existing| candidate.is_after(existing));
            if newer {
                *current = Some(candidate);
            }
            newer
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sse_frame, LoopbackServer};

    fn fast_policy(max_attempts: u32) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(10),
            cap: Duration::from_millis(40),
            max_attempts,
        }
    }

    async fn wait_for_terminal(status: &mut watch::Receiver<ConnectionState>) -> ConnectionState {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let current = status.borrow_and_update().clone();
                if current.is_terminal() {
                    return current;
                }
                if status.changed().await.is_err() {
                    return status.borrow().clone();
                }
            }
        })
        .await
        .expect("terminal state in time")
    }

    #[test]
    fn backoff_doubles_until_cap() {
        let policy = BackoffPolicy::default();
        let delays = (1..=6).map(|n| policy.delay(n).as_secs()).collect::<Vec<_>>();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
        assert_eq!(policy.delay(64), Duration::from_secs(10));
    }

    #[test]
    fn machine_resets_retries_on_open_and_exhausts_after_ceiling() {
        let mut machine = ConnectionMachine::new(BackoffPolicy {
            max_attempts: 2,
            ..BackoffPolicy::default()
        });
        assert_eq!(
            machine.begin_attempt(),
            ConnectionState::Connecting { attempt: 1 }
        );
        assert_eq!(
            machine.on_failure(),
            ConnectionState::Reconnecting {
                attempt: 1,
                delay: Duration::from_secs(1)
            }
        );
        assert_eq!(
            machine.begin_attempt(),
            ConnectionState::Connecting { attempt: 2 }
        );
        machine.on_open();
        assert!(matches!(
            machine.on_failure(),
            ConnectionState::Reconnecting { attempt: 1, .. }
        ));
        assert!(matches!(
            machine.on_failure(),
            ConnectionState::Reconnecting { attempt: 2, .. }
        ));
        assert_eq!(
            machine.on_failure(),
            ConnectionState::Closed(CloseReason::RetriesExhausted)
        );
    }

    #[test]
    fn events_url_carries_cursor_as_since() {
        let base = Url::parse("http://127.0.0.1:5001").expect("base");
        let cursor = StreamCursor::new("1770000000000-3");
        let url = events_url(&base, "run-1", cursor.as_ref()).expect("url");
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:5001/api/av/runs/run-1/events?since=1770000000000-3"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reconnect_resumes_from_highest_cursor() {
        let first = [
            sse_frame("1770000000000-1", "stage_started", r#"{"event_id":"e1","run_id":"run-1","stream_id":"1770000000000-1","kind":"stage_started"}"#),
            sse_frame("1770000000000-2", "heartbeat", r#"{"event_id":"hb","run_id":"run-1","stream_id":"1770000000000-2","kind":"heartbeat"}"#),
        ]
        .concat();
        let second = [
            sse_frame("1770000000000-3", "agent.activated", r#"{"event_id":"e3","run_id":"run-1","stream_id":"1770000000000-3","kind":"agent.activated","payload":{"agentId":"crew"}}"#),
            sse_frame("1770000000000-4", "run_completed", r#"{"event_id":"e4","run_id":"run-1","stream_id":"1770000000000-4","kind":"run_completed"}"#),
        ]
        .concat();
        let server = LoopbackServer::sse(vec![first, second]).await;

        let mut config = ConnectorConfig::new(server.base_url());
        config.backoff = fast_policy(3);
        let (handle, mut subscription) = connect(config, "run-1", None).expect("connect");

        let mut items = Vec::new();
        while let Some(item) = tokio::time::timeout(Duration::from_secs(10), subscription.items.recv())
            .await
            .expect("item in time")
        {
            items.push(item);
        }

        assert_eq!(items.len(), 4);
        assert!(matches!(items[1], StreamItem::Heartbeat { .. }));
        let kinds = items
            .iter()
            .filter_map(|item| match item {
                StreamItem::Envelope(envelope) => Some(envelope.kind.clone()),
                StreamItem::Heartbeat { .. } => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![
                EventKind::StageStarted,
                EventKind::AgentActivated,
                EventKind::RunCompleted
            ]
        );

        let state = wait_for_terminal(&mut subscription.status).await;
        assert_eq!(state, ConnectionState::Closed(CloseReason::RunCompleted));
        assert_eq!(
            handle.cursor().map(|cursor| cursor.to_string()).as_deref(),
            Some("1770000000000-4")
        );

        let requests = server.requests().await;
        assert_eq!(requests.len(), 2);
        assert!(!requests[0].to_ascii_lowercase().contains("last-event-id"));
        assert!(requests[1]
            .to_ascii_lowercase()
            .contains("last-event-id: 1770000000000-2"));
        assert!(requests[1].contains("since=1770000000000-2"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn malformed_frames_are_skipped() {
        let body = [
            sse_frame("1", "stage_started", r#"{"run_id":"run-1","#),
            sse_frame("2", "stage_started", r#"{"event_id":"ok","run_id":"run-1","kind":"stage_started"}"#),
            sse_frame("3", "run_failed", r#"{"event_id":"end","run_id":"run-1","kind":"run_failed"}"#),
        ]
        .concat();
        let server = LoopbackServer::sse(vec![body]).await;
        let mut config = ConnectorConfig::new(server.base_url());
        config.backoff = fast_policy(1);
        let (_handle, mut subscription) = connect(config, "run-1", None).expect("connect");

        let mut ids = Vec::new();
        while let Some(item) = subscription.items.recv().await {
            if let StreamItem::Envelope(envelope) = item {
                assert!(envelope.timestamp.is_some());
                ids.push(envelope.event_id);
            }
        }
        assert_eq!(ids, vec!["ok", "end"]);
        let state = wait_for_terminal(&mut subscription.status).await;
        assert_eq!(state, ConnectionState::Closed(CloseReason::RunFailed));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn refused_connections_exhaust_retries() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let base = Url::parse(&format!("http://{addr}")).expect("url");
        let mut config = ConnectorConfig::new(base);
        config.backoff = fast_policy(2);
        let (_handle, mut subscription) = connect(config, "run-1", None).expect("connect");

        let state = wait_for_terminal(&mut subscription.status).await;
        assert_eq!(state, ConnectionState::Closed(CloseReason::RetriesExhausted));
        assert!(subscription.items.recv().await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn disconnect_is_idempotent_and_closes_stream() {
        let server = LoopbackServer::hold_open().await;
        let mut config = ConnectorConfig::new(server.base_url());
        config.backoff = fast_policy(3);
        let resume = StreamCursor::new("7");
        let (handle, mut subscription) = connect(config, "run-1", resume).expect("connect");

        tokio::time::timeout(Duration::from_secs(10), async {
            while !subscription.status.borrow_and_update().is_live() {
                subscription.status.changed().await.expect("status open");
            }
        })
        .await
        .expect("connected in time");

        handle.disconnect();
        handle.disconnect();
        assert_eq!(
            *subscription.status.borrow(),
            ConnectionState::Closed(CloseReason::Cancelled)
        );
        let next = tokio::time::timeout(Duration::from_secs(5), subscription.items.recv())
            .await
            .expect("channel closes after abort");
        assert!(next.is_none());
        assert_eq!(handle.cursor().map(|c| c.to_string()).as_deref(), Some("7"));
    }

    async fn wait_for_requests(server: &LoopbackServer, count: usize) -> Vec<String> {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let requests = server.requests().await;
                if requests.len() >= count {
                    return requests;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("requests in time")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn disconnect_cancels_pending_reconnect() {
        let server = LoopbackServer::sse(vec![String::new()]).await;
        let mut config = ConnectorConfig::new(server.base_url());
        config.backoff = BackoffPolicy {
            base: Duration::from_millis(500),
            cap: Duration::from_millis(500),
            max_attempts: 3,
        };
        let (handle, mut subscription) = connect(config, "run-1", None).expect("connect");

        tokio::time::timeout(Duration::from_secs(10), async {
            while !matches!(
                *subscription.status.borrow_and_update(),
                ConnectionState::Reconnecting { .. }
            ) {
                subscription.status.changed().await.expect("status open");
            }
        })
        .await
        .expect("reconnecting in time");

        handle.disconnect();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(server.requests().await.len(), 1);
        assert_eq!(
            *subscription.status.borrow(),
            ConnectionState::Closed(CloseReason::Cancelled)
        );
        assert!(subscription.items.recv().await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn idle_stream_reconnects_with_cursor() {
        let server = LoopbackServer::hold_open().await;
        let mut config = ConnectorConfig::new(server.base_url());
        config.backoff = fast_policy(5);
        config.idle_timeout = Duration::from_millis(200);
        let (handle, _subscription) =
            connect(config, "run-1", StreamCursor::new("7")).expect("connect");

        let requests = wait_for_requests(&server, 2).await;
        handle.disconnect();

        let resumed = requests[1].to_ascii_lowercase();
        assert!(resumed.contains("last-event-id: 7"));
        assert!(resumed.contains("since=7"));
    }
}
