//! One newline-delimited TCP connection to a downstream instance.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use marionette_core::InstanceId;
use parking_lot::Mutex;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::{Frame, LineCodec};

/// Invoked for every line received from an instance.
pub type MessageCallback = Arc<dyn Fn(&InstanceId, &str) + Send + Sync>;

const BROADCAST_CAPACITY: usize = 256;

/// `Disconnected` is terminal: a closed link is never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// Per-link framing and buffering limits.
#[derive(Clone, Copy, Debug)]
pub struct LinkOptions {
    pub max_line_length: usize,
    pub history_size: usize,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            max_line_length: 1024 * 1024,
            history_size: 500,
        }
    }
}

/// Received lines: a bounded history plus live subscribers.
struct Inbox {
    history: Mutex<VecDeque<String>>,
    capacity: usize,
    tx: broadcast::Sender<String>,
}

impl Inbox {
    fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            history: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            tx,
        }
    }

    fn push(&self, line: String) {
        if self.capacity > 0 {
            let mut history = self.history.lock();
            while history.len() >= self.capacity {
                let _ = history.pop_front();
            }
            history.push_back(line.clone());
        }
        // No subscribers is the common case.
        let _ = self.tx.send(line);
    }

    fn recent(&self, limit: usize) -> Vec<String> {
        let history = self.history.lock();
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }
}

pub struct InstanceLink {
    instance_id: InstanceId,
    addr: String,
    options: LinkOptions,
    state: Mutex<LinkState>,
    writer: tokio::sync::Mutex<Option<FramedWrite<OwnedWriteHalf, LineCodec>>>,
    /// Cancels the receive loop; doubles as the single-shot disconnect signal.
    cancel: CancellationToken,
    closed: AtomicBool,
    inbox: Inbox,
    on_message: Option<MessageCallback>,
}

impl InstanceLink {
    /// Create a disconnected link. Cancelling `parent` closes it.
    pub fn new(
        instance_id: InstanceId,
        addr: impl Into<String>,
        options: LinkOptions,
        parent: &CancellationToken,
        on_message: Option<MessageCallback>,
    ) -> Arc<Self> {
        Arc::new(Self {
            instance_id,
            addr: addr.into(),
            options,
            state: Mutex::new(LinkState::Disconnected),
            writer: tokio::sync::Mutex::new(None),
            cancel: parent.child_token(),
            closed: AtomicBool::new(false),
            inbox: Inbox::new(options.history_size),
            on_message,
        })
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn state(&self) -> LinkState {
        *self.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// Fires once when the link closes, for any reason.
    pub fn closed_signal(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Receiver for lines that arrive after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.inbox.tx.subscribe()
    }

    /// Up to `limit` most recent lines, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<String> {
        self.inbox.recent(limit)
    }

    /// Establish the stream within `timeout`. Failures are reported as `false`.
    ///
    /// Returns `true` immediately if already connected. A closed link, or one
    /// with a connect already in flight, returns `false`.
    pub async fn connect(self: &Arc<Self>, timeout: Duration) -> bool {
        {
            let mut state = self.state.lock();
            match *state {
                LinkState::Connected => return true,
                LinkState::Connecting => return false,
                LinkState::Disconnected if self.closed.load(Ordering::Acquire) => return false,
                LinkState::Disconnected => *state = LinkState::Connecting,
            }
        }

        let attempt = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = tokio::time::timeout(timeout, TcpStream::connect(&self.addr)) => Some(result),
        };

        let stream = match attempt {
            Some(Ok(Ok(stream))) => stream,
            Some(Ok(Err(e))) => {
                warn!(instance_id = %self.instance_id, addr = %self.addr, error = %e, "connect failed");
                self.close();
                return false;
            }
            Some(Err(_elapsed)) => {
                warn!(
                    instance_id = %self.instance_id,
                    addr = %self.addr,
                    timeout_ms = timeout.as_millis() as u64,
                    "connect timed out"
                );
                self.close();
                return false;
            }
            None => {
                debug!(instance_id = %self.instance_id, "connect cancelled");
                self.close();
                return false;
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!(instance_id = %self.instance_id, error = %e, "set_nodelay failed");
        }
        let (read_half, write_half) = stream.into_split();
        let codec = || LineCodec::new(self.options.max_line_length);
        *self.writer.lock().await = Some(FramedWrite::new(write_half, codec()));

        let closed_meanwhile = {
            let mut state = self.state.lock();
            if self.closed.load(Ordering::Acquire) {
                true
            } else {
                *state = LinkState::Connected;
                false
            }
        };
        if closed_meanwhile {
            let _ = self.writer.lock().await.take();
            return false;
        }

        let reader = FramedRead::new(read_half, codec());
        let _ = tokio::spawn(Arc::clone(self).receive_loop(reader));

        info!(instance_id = %self.instance_id, addr = %self.addr, "instance link connected");
        true
    }

    /// Write one line, appending the terminator if absent.
    ///
    /// Returns `false` when not connected or when the write fails; a failed
    /// write closes the link. Closing the link aborts a send blocked on a
    /// peer that stopped reading.
    pub async fn send(&self, line: &str) -> bool {
        if !self.is_connected() {
            return false;
        }
        let line = line
            .strip_suffix('\n')
            .map(|l| l.strip_suffix('\r').unwrap_or(l))
            .unwrap_or(line);
        if line.contains('\n') {
            warn!(instance_id = %self.instance_id, "refusing to send multi-line message");
            return false;
        }

        let mut guard = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return false,
            guard = self.writer.lock() => guard,
        };
        let Some(writer) = guard.as_mut() else {
            return false;
        };
        let written = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = writer.send(line) => Some(result),
        };
        match written {
            None => {
                // A partially written frame leaves the stream unusable.
                let _ = guard.take();
                false
            }
            Some(Ok(())) => true,
            Some(Err(e)) => {
                warn!(instance_id = %self.instance_id, error = %e, "write failed");
                let _ = guard.take();
                drop(guard);
                self.close();
                false
            }
        }
    }

    /// Stop the receive loop and release the stream. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let was = std::mem::replace(&mut *self.state.lock(), LinkState::Disconnected);
        self.cancel.cancel();
        // The receive loop releases the writer if a send currently holds it.
        if let Ok(mut writer) = self.writer.try_lock() {
            let _ = writer.take();
        }
        if was == LinkState::Connected {
            info!(instance_id = %self.instance_id, addr = %self.addr, "instance link closed");
        }
    }

    async fn receive_loop(self: Arc<Self>, mut reader: FramedRead<OwnedReadHalf, LineCodec>) {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                frame = reader.next() => match frame {
                    Some(Ok(Frame::Line(line))) => self.dispatch(line),
                    Some(Ok(Frame::Oversized)) => {
                        warn!(
                            instance_id = %self.instance_id,
                            max = self.options.max_line_length,
                            "discarding oversized line"
                        );
                    }
                    Some(Err(e)) => {
                        warn!(instance_id = %self.instance_id, error = %e, "read failed");
                        break;
                    }
                    None => {
                        info!(instance_id = %self.instance_id, "instance closed the connection");
                        break;
                    }
                },
            }
        }

        self.close();
        let _ = self.writer.lock().await.take();
    }

    fn dispatch(&self, line: String) {
        if let Some(callback) = &self.on_message {
            callback(&self.instance_id, &line);
        }
        self.inbox.push(line);
    }
}

impl Drop for InstanceLink {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for InstanceLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceLink")
            .field("instance_id", &self.instance_id)
            .field("addr", &self.addr)
            .field("state", &self.state())
            .finish()
    }
}
