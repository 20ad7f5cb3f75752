//! Connection manager
//!
//! One task owns the `clients` map and serves four queues: register,
//! unregister, inbound frames, and a global ping tick. Everything that
//! touches the map goes through the command channel, so the map needs no
//! lock and re-registration ordering is deterministic.
//!
//! Delivery never blocks the manager: per-client send buffers are bounded,
//! and a full buffer drops the frame for that recipient (logged and
//! counted).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::frame::{Frame, RelayEnvelope};
use crate::core::constants::{CHANNEL_WS_BROADCAST, MANAGER_QUEUE_CAPACITY, WS_PING_INTERVAL_SECS};
use crate::data::store::StoreService;
use crate::data::topics::TopicService;
use crate::data::types::ChatMessage;
use crate::domain::breaker::Breakers;

/// A registered client connection
pub struct ClientHandle {
    pub client_id: u64,
    pub username: String,
    /// Bounded send buffer drained by the client's writer task
    pub sender: mpsc::Sender<Frame>,
    /// Group set captured at connect time, cached for the connection's
    /// lifetime
    pub groups: Arc<HashSet<String>>,
}

enum Command {
    Register(ClientHandle),
    Unregister {
        username: String,
        client_id: u64,
    },
    /// A frame from a connected client's reader, already stamped
    Inbound {
        from: String,
        frame: Frame,
    },
    /// A pipeline message from the chat bridge, filtered by visibility
    Deliver(ChatMessage),
    /// An addressed frame from the cross-process relay
    RelayDeliver {
        to: String,
        frame: Frame,
    },
    OnlineUsers(oneshot::Sender<Vec<String>>),
}

/// Handle to the manager loop
pub struct ConnectionManager {
    cmd_tx: mpsc::Sender<Command>,
    next_client_id: AtomicU64,
}

impl ConnectionManager {
    /// Spawn the manager loop
    pub fn start(
        store: Arc<StoreService>,
        topics: Arc<TopicService>,
        breakers: Arc<Breakers>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(MANAGER_QUEUE_CAPACITY);
        let manager = Arc::new(Self {
            cmd_tx,
            next_client_id: AtomicU64::new(1),
        });

        let manager_loop = ManagerLoop {
            cmd_rx,
            clients: HashMap::new(),
            store,
            topics,
            breakers,
        };
        let handle = tokio::spawn(manager_loop.run(shutdown_rx));

        (manager, handle)
    }

    /// Register a client; returns its id for the matching unregister
    pub async fn register(
        &self,
        username: &str,
        groups: Arc<HashSet<String>>,
        sender: mpsc::Sender<Frame>,
    ) -> u64 {
        let client_id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        self.send(Command::Register(ClientHandle {
            client_id,
            username: username.to_string(),
            sender,
            groups,
        }))
        .await;
        client_id
    }

    pub async fn unregister(&self, username: &str, client_id: u64) {
        self.send(Command::Unregister {
            username: username.to_string(),
            client_id,
        })
        .await;
    }

    /// Route a stamped frame from a connected client
    pub async fn inbound(&self, from: &str, frame: Frame) {
        self.send(Command::Inbound {
            from: from.to_string(),
            frame,
        })
        .await;
    }

    /// Deliver a pipeline message to every relevant local client
    pub async fn deliver(&self, msg: ChatMessage) {
        self.send(Command::Deliver(msg)).await;
    }

    /// Deliver a relayed frame iff its recipient is locally connected
    pub async fn relay_deliver(&self, to: &str, frame: Frame) {
        self.send(Command::RelayDeliver {
            to: to.to_string(),
            frame,
        })
        .await;
    }

    /// Locally connected usernames
    pub async fn online_users(&self) -> Vec<String> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::OnlineUsers(reply_tx)).await;
        reply_rx.await.unwrap_or_default()
    }

    async fn send(&self, cmd: Command) {
        if self.cmd_tx.send(cmd).await.is_err() {
            tracing::debug!("Manager loop is gone, dropping command");
        }
    }
}

/// Whether `client` should receive `msg` (group visibility filter)
fn is_relevant(client: &ClientHandle, msg: &ChatMessage) -> bool {
    if msg.is_group {
        client.groups.contains(&msg.group_id)
    } else {
        client.username == msg.from || client.username == msg.to
    }
}

/// The single-owner loop state
struct ManagerLoop {
    cmd_rx: mpsc::Receiver<Command>,
    clients: HashMap<String, ClientHandle>,
    store: Arc<StoreService>,
    topics: Arc<TopicService>,
    breakers: Arc<Breakers>,
}

impl ManagerLoop {
    async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ping = tokio::time::interval(Duration::from_secs(WS_PING_INTERVAL_SECS));
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::debug!("Connection manager started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle(cmd).await,
                        None => break,
                    }
                }
                _ = ping.tick() => {
                    self.ping_all();
                }
            }
        }

        // Dropping the handles closes every per-client channel; writer
        // tasks observe the close and shut their sockets.
        let count = self.clients.len();
        self.clients.clear();
        metrics::gauge!("ws_connections").set(0.0);
        tracing::debug!(clients = count, "Connection manager stopped, clients closed");
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Register(handle) => {
                let username = handle.username.clone();
                if let Some(old) = self.clients.insert(username.clone(), handle) {
                    // One connection per user per process: the old sender
                    // drops here, closing the previous client.
                    tracing::info!(
                        username = %username,
                        old_client_id = old.client_id,
                        "Replaced existing connection"
                    );
                }
                metrics::gauge!("ws_connections").set(self.clients.len() as f64);
                tracing::debug!(username = %username, "Client registered");
            }
            Command::Unregister {
                username,
                client_id,
            } => {
                // Only remove the matching connection; a stale unregister
                // from a replaced client must not evict its successor.
                if self
                    .clients
                    .get(&username)
                    .is_some_and(|c| c.client_id == client_id)
                {
                    self.clients.remove(&username);
                    tracing::debug!(username = %username, "Client unregistered");
                }
                metrics::gauge!("ws_connections").set(self.clients.len() as f64);
            }
            Command::Inbound { from, frame } => match &frame {
                Frame::GroupChat { group_id, .. } => {
                    let group_id = group_id.clone();
                    self.group_fanout(&from, &group_id, frame).await;
                }
                _ => {
                    if let Some(to) = frame.recipient().map(str::to_string) {
                        self.direct_send(&to, frame).await;
                    } else {
                        tracing::debug!(from = %from, kind = frame.kind(), "Ignoring unroutable inbound frame");
                    }
                }
            },
            Command::Deliver(msg) => {
                for client in self.clients.values() {
                    if is_relevant(client, &msg) {
                        push_to_client(client, Frame::from_message(&msg));
                    }
                }
            }
            Command::RelayDeliver { to, frame } => {
                if let Some(client) = self.clients.get(&to) {
                    push_to_client(client, frame);
                }
                // Not locally connected: some other process owns this user
            }
            Command::OnlineUsers(reply) => {
                let _ = reply.send(self.clients.keys().cloned().collect());
            }
        }
    }

    /// Local push or addressed cross-process publish
    async fn direct_send(&self, to: &str, frame: Frame) {
        if let Some(client) = self.clients.get(to) {
            push_to_client(client, frame);
        } else {
            self.publish_remote(to, frame).await;
        }
    }

    /// Fan a group frame out to local members and publish one addressed
    /// copy per non-local member
    ///
    /// Cross-process traffic is bounded by the number of non-local members,
    /// not the cluster size.
    async fn group_fanout(&self, from: &str, group_id: &str, frame: Frame) {
        let members = match self
            .breakers
            .database
            .call(|| self.store.group_members(group_id))
            .await
        {
            Ok(members) => members,
            Err(e) => {
                tracing::warn!(group_id = %group_id, error = %e, "Group member lookup failed, dropping fan-out");
                return;
            }
        };

        for member in members {
            if member == from {
                continue;
            }
            if let Some(client) = self.clients.get(&member) {
                push_to_client(client, frame.clone());
            } else {
                self.publish_remote(&member, frame.clone()).await;
            }
        }
    }

    async fn publish_remote(&self, to: &str, frame: Frame) {
        let envelope = RelayEnvelope {
            to: to.to_string(),
            frame,
        };
        if let Err(e) = self
            .topics
            .publish_json(CHANNEL_WS_BROADCAST, &envelope)
            .await
        {
            tracing::warn!(to = %to, error = %e, "Cross-process publish failed");
        }
    }

    fn ping_all(&self) {
        for client in self.clients.values() {
            // Best-effort; a full buffer just skips this tick
            let _ = client.sender.try_send(Frame::Ping);
        }
    }
}

/// Non-blocking push; a full buffer drops the frame for that recipient
fn push_to_client(client: &ClientHandle, frame: Frame) {
    match client.sender.try_send(frame) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(frame)) => {
            metrics::counter!("messages_dropped").increment(1);
            tracing::warn!(
                username = %client.username,
                kind = frame.kind(),
                "Client send buffer full, dropping frame"
            );
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            tracing::debug!(username = %client.username, "Client channel closed");
        }
    }
}
