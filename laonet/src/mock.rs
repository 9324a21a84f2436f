//! In-process server for exercising the client without a socket

use crate::*;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

struct ClientLink {
    tx: mpsc::UnboundedSender<String>,
    open: Arc<AtomicBool>,
    subscriptions: HashSet<Channel>,
}

#[derive(Default)]
struct ServerState {
    history: HashMap<Channel, Vec<Envelope>>,
    seen: HashSet<MessageId>,
    clients: HashMap<usize, ClientLink>,
    next_client: usize,
    connections: usize,
    queries: Vec<Query>,
    silent: bool,
    refusing: bool,
}

/// Answers queries and relays publishes to subscribers, the way a real server does
#[derive(Clone, Default)]
pub struct MockServer {
    state: Arc<Mutex<ServerState>>,
}

impl MockServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop answering queries (they are still recorded)
    pub fn set_silent(&self, silent: bool) {
        self.state.lock().silent = silent;
    }

    /// Refuse new connections
    pub fn set_refusing(&self, refusing: bool) {
        self.state.lock().refusing = refusing;
    }

    /// Every query received so far
    pub fn queries(&self) -> Vec<Query> {
        self.state.lock().queries.clone()
    }

    /// Number of connections accepted so far
    pub fn connections(&self) -> usize {
        self.state.lock().connections
    }

    /// Hang up on every client
    pub fn drop_connections(&self) {
        let mut state = self.state.lock();
        for (_, client) in state.clients.drain() {
            client.open.store(false, Ordering::SeqCst);
        }
    }

    /// Publish a message as if another client had sent it
    pub fn inject(&self, channel: &Channel, message: Envelope) {
        let mut state = self.state.lock();
        Self::store_and_relay(&mut state, channel, message);
    }

    fn store_and_relay(state: &mut ServerState, channel: &Channel, message: Envelope) -> bool {
        if !state.seen.insert(message.message_id().clone()) {
            return false;
        }
        state
            .history
            .entry(channel.clone())
            .or_default()
            .push(message.clone());

        let frame = match serde_json::to_string(&Broadcast::new(channel.clone(), message)) {
            Ok(frame) => frame,
            Err(_) => return true,
        };
        for client in state.clients.values() {
            if client.subscriptions.contains(channel) {
                let _ = client.tx.send(frame.clone());
            }
        }
        true
    }

    fn connect(&self) -> Result<(usize, Arc<AtomicBool>, Inbound), TransportError> {
        let mut state = self.state.lock();
        if state.refusing {
            return Err(TransportError::ConnectionFailed("refused".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));
        let id = state.next_client;
        state.next_client += 1;
        state.connections += 1;
        state.clients.insert(
            id,
            ClientLink {
                tx,
                open: open.clone(),
                subscriptions: HashSet::new(),
            },
        );
        Ok((id, open, rx))
    }

    fn handle(&self, client: usize, frame: &str) -> Result<(), TransportError> {
        let query: Query =
            serde_json::from_str(frame).map_err(|e| TransportError::Protocol(e.to_string()))?;

        let mut state = self.state.lock();
        state.queries.push(query.clone());
        if state.silent {
            return Ok(());
        }

        let channel = query.params.channel.clone();
        let answer = match query.method {
            Method::Subscribe => {
                if let Some(link) = state.clients.get_mut(&client) {
                    link.subscriptions.insert(channel.clone());
                }
                Answer::success(query.id, AnswerResult::General(0))
            }
            Method::Unsubscribe => {
                if let Some(link) = state.clients.get_mut(&client) {
                    link.subscriptions.remove(&channel);
                }
                Answer::success(query.id, AnswerResult::General(0))
            }
            Method::Catchup => {
                let history = state.history.get(&channel).cloned().unwrap_or_default();
                Answer::success(query.id, AnswerResult::Messages(history))
            }
            Method::Publish => match query.params.message.clone() {
                Some(message) if message.is_valid() => {
                    // Answer before relaying, as the broadcast follows the publish
                    if state.seen.contains(message.message_id()) {
                        Answer::failure(query.id, ErrorCode::ResourceAlreadyExists, "duplicate message")
                    } else {
                        let answer = Answer::success(query.id, AnswerResult::General(0));
                        Self::send(&state, client, &answer);
                        Self::store_and_relay(&mut state, &channel, message);
                        return Ok(());
                    }
                }
                _ => Answer::failure(query.id, ErrorCode::InvalidMessageField, "invalid message"),
            },
            Method::Broadcast => {
                Answer::failure(query.id, ErrorCode::InvalidAction, "clients cannot broadcast")
            }
        };

        Self::send(&state, client, &answer);
        Ok(())
    }

    fn send(state: &ServerState, client: usize, answer: &Answer) {
        if let (Some(link), Ok(frame)) = (state.clients.get(&client), serde_json::to_string(answer)) {
            let _ = link.tx.send(frame);
        }
    }
}

pub struct MockConnector {
    server: MockServer,
}

impl MockConnector {
    pub fn new(server: &MockServer) -> Self {
        MockConnector {
            server: server.clone(),
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<(Arc<dyn Connection>, Inbound), TransportError> {
        let (client, open, inbound) = self.server.connect()?;
        let connection = MockConnection {
            server: self.server.clone(),
            client,
            open,
        };
        Ok((Arc::new(connection), inbound))
    }
}

struct MockConnection {
    server: MockServer,
    client: usize,
    open: Arc<AtomicBool>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn send(&self, frame: String) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ConnectionLost);
        }
        self.server.handle(self.client, &frame)
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.server.state.lock().clients.remove(&self.client);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
