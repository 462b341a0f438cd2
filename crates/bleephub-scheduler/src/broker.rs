//! Runner broker: long-poll sessions, round-robin delivery and the pending
//! queue for envelopes no session could take.

use bleephub_core::ids::SessionId;
use bleephub_core::run::{SessionAgent, SessionInfo, TaskAgentMessage};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

/// Per-session queue depth. Full queues are skipped during round-robin.
pub const SESSION_QUEUE_CAPACITY: usize = 10;

/// How long a message poll waits before answering empty.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(30);

pub type MessageReceiver = Arc<Mutex<mpsc::Receiver<TaskAgentMessage>>>;

/// A runner's long-poll attachment.
#[derive(Debug)]
pub struct Session {
    pub info: SessionInfo,
    sender: mpsc::Sender<TaskAgentMessage>,
    receiver: MessageReceiver,
}

impl Session {
    fn new(owner_name: String, agent: SessionAgent) -> Self {
        let (sender, receiver) = mpsc::channel(SESSION_QUEUE_CAPACITY);
        Self {
            info: SessionInfo {
                session_id: SessionId::new(),
                owner_name,
                agent,
                encryption_key: None,
            },
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
        }
    }

    /// Messages sitting in the channel, not yet picked up by a poll.
    pub fn queued(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn receiver(&self) -> MessageReceiver {
        Arc::clone(&self.receiver)
    }
}

/// Sessions ordered by id plus the pending list.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: BTreeMap<SessionId, Session>,
    pending: VecDeque<TaskAgentMessage>,
    cursor: usize,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a session, then hand it (or its peers) any pending envelopes.
    pub fn open(&mut self, owner_name: String, agent: SessionAgent) -> SessionInfo {
        let session = Session::new(owner_name, agent);
        let info = session.info.clone();
        self.sessions.insert(info.session_id, session);
        let delivered = self.drain_pending();
        debug!(session_id = %info.session_id, delivered, "session opened");
        info
    }

    /// Remove a session. Dropping its sender closes the channel, so any
    /// in-flight poll wakes up with nothing.
    pub fn close(&mut self, session_id: SessionId) -> Option<SessionInfo> {
        self.sessions.remove(&session_id).map(|session| session.info)
    }

    pub fn get(&self, session_id: SessionId) -> Option<&Session> {
        self.sessions.get(&session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    /// Deliver to one session or park on the pending list.
    ///
    /// Returns whether a session accepted the message. A successful send
    /// while envelopes are pending re-attempts the pending list.
    pub fn dispatch(&mut self, message: TaskAgentMessage) -> bool {
        match self.try_deliver(message) {
            Ok(()) => {
                if !self.pending.is_empty() {
                    self.drain_pending();
                }
                true
            }
            Err(message) => {
                debug!(message_id = message.message_id, "no session accepted message, queued");
                self.pending.push_back(message);
                false
            }
        }
    }

    /// Re-attempt every pending envelope head to tail; survivors stay queued
    /// in their original order.
    pub fn drain_pending(&mut self) -> usize {
        if self.pending.is_empty() || self.sessions.is_empty() {
            return 0;
        }
        let waiting = std::mem::take(&mut self.pending);
        let mut delivered = 0;
        for message in waiting {
            match self.try_deliver(message) {
                Ok(()) => delivered += 1,
                Err(message) => self.pending.push_back(message),
            }
        }
        delivered
    }

    /// Non-blocking send starting at the round-robin cursor. The cursor
    /// moves past the chosen session on success and by one on failure.
    fn try_deliver(&mut self, mut message: TaskAgentMessage) -> Result<(), TaskAgentMessage> {
        let count = self.sessions.len();
        if count == 0 {
            return Err(message);
        }

        let start = self.cursor % count;
        let senders: Vec<&mpsc::Sender<TaskAgentMessage>> =
            self.sessions.values().map(|s| &s.sender).collect();
        for offset in 0..count {
            let index = (start + offset) % count;
            match senders[index].try_send(message) {
                Ok(()) => {
                    self.cursor = index + 1;
                    return Ok(());
                }
                Err(mpsc::error::TrySendError::Full(back))
                | Err(mpsc::error::TrySendError::Closed(back)) => message = back,
            }
        }
        self.cursor = start + 1;
        Err(message)
    }
}

/// Wait for the next message on a session's channel.
///
/// `None` means the wait timed out or the session was closed.
pub async fn poll_message(receiver: MessageReceiver, timeout: Duration) -> Option<TaskAgentMessage> {
    tokio::time::timeout(timeout, async move {
        let mut receiver = receiver.lock().await;
        receiver.recv().await
    })
    .await
    .ok()
    .flatten()
}
