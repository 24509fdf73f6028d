use crate::queue::HandoffQueue;
use crate::scheduler::{SchedulerStatus, SourceStatus};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Requests a remote caller can make of the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Ping,
    ListSources,
    Status,
    StopSource { name: String },
    Shutdown,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum Reply {
    Pong,
    Sources { sources: Vec<SourceStatus> },
    Status { status: SchedulerStatus },
    Stopped { name: String, final_traces: usize },
    ShuttingDown,
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Call {
    pub id: u64,
    pub command: Command,
}

/// Answer to the call with the same `id`.
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub id: u64,
    pub reply: Reply,
}

struct Channel {
    calls: HandoffQueue<Call>,
    responses: HandoffQueue<Response>,
    next_id: AtomicU64,
}

/// Creates the two ends of a command channel.
pub fn channel() -> (RemoteClient, RemoteEndpoint) {
    let inner = Arc::new(Channel {
        calls: HandoffQueue::new(),
        responses: HandoffQueue::new(),
        next_id: AtomicU64::new(1),
    });
    (
        RemoteClient {
            inner: Arc::clone(&inner),
        },
        RemoteEndpoint { inner },
    )
}

/// Caller side; cheap to clone and usable from any thread.
#[derive(Clone)]
pub struct RemoteClient {
    inner: Arc<Channel>,
}

impl RemoteClient {
    /// Queues a command and returns the id its response will carry.
    pub fn submit(&self, command: Command) -> u64 {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.calls.append(Call { id, command });
        id
    }

    /// Takes every response produced since the last call.
    pub fn take_responses(&self) -> Vec<Response> {
        self.inner.responses.drain()
    }
}

/// Controller side of the channel.
pub struct RemoteEndpoint {
    inner: Arc<Channel>,
}

impl RemoteEndpoint {
    pub fn pending(&self) -> usize {
        self.inner.calls.len()
    }

    /// Answers every queued call, in submission order, with `handler`.
    /// Returns the number of calls served.
    pub fn serve<F>(&self, mut handler: F) -> usize
    where
        F: FnMut(&Command) -> Reply,
    {
        let calls = self.inner.calls.drain();
        let served = calls.len();
        for call in calls {
            let reply = handler(&call.command);
            self.inner.responses.append(Response { id: call.id, reply });
        }
        served
    }
}
