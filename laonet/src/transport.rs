use crate::*;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

type Slot = oneshot::Sender<Result<AnswerResult, TransportError>>;

/// Broadcast messages received on subscribed channels, in arrival order
pub type Broadcasts = mpsc::UnboundedReceiver<(Channel, Envelope)>;

struct PendingRequest {
    method: Method,
    channel: Channel,
    submitted_at: Instant,
    generation: u64,
    slot: Slot,
}

struct RequestTable {
    next_id: i32,
    pending: HashMap<i32, PendingRequest>,
}

impl RequestTable {
    /// Next free request id; wraps to 1 and never hands out an id still in use
    fn allocate(&mut self) -> i32 {
        loop {
            let id = self.next_id;
            self.next_id = if id == i32::MAX { 1 } else { id + 1 };
            if !self.pending.contains_key(&id) {
                return id;
            }
        }
    }
}

struct Live {
    connection: Arc<dyn Connection>,
    generation: u64,
}

struct Inner {
    config: Config,
    connector: Arc<dyn Connector>,
    requests: parking_lot::Mutex<RequestTable>,
    link: tokio::sync::Mutex<Option<Live>>,
    generation: AtomicU64,
    subscriptions: parking_lot::Mutex<BTreeSet<Channel>>,
    broadcasts: mpsc::UnboundedSender<(Channel, Envelope)>,
}

/// Client side of the channel protocol
///
/// Correlates queries with their answers, forwards broadcasts, fails queries
/// that outlive the request timeout and reconnects on demand after the
/// connection is lost.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

/// A submitted query whose answer has not been consumed yet
pub struct PendingAnswer {
    id: i32,
    deadline: Instant,
    inner: Arc<Inner>,
    rx: oneshot::Receiver<Result<AnswerResult, TransportError>>,
}

impl PendingAnswer {
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Abandon the query; a late answer is then reported as unknown
    pub fn cancel(self) {
        self.inner.resolve(self.id, Err(TransportError::Cancelled));
    }

    /// Wait for the answer, at most until the request timeout
    pub async fn wait(self) -> Result<AnswerResult, TransportError> {
        let PendingAnswer {
            id,
            deadline,
            inner,
            mut rx,
        } = self;

        match tokio::time::timeout_at(deadline, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(TransportError::ConnectionLost),
            Err(_) => {
                if inner.resolve(id, Err(TransportError::Timeout(id))) {
                    warn!(id, "transport: request timed out");
                }
                // Whoever resolved first decides the outcome
                rx.try_recv()
                    .unwrap_or(Err(TransportError::Timeout(id)))
            }
        }
    }
}

impl Inner {
    fn resolve(&self, id: i32, outcome: Result<AnswerResult, TransportError>) -> bool {
        let pending = self.requests.lock().pending.remove(&id);
        match pending {
            Some(request) => {
                let _ = request.slot.send(outcome);
                true
            }
            None => false,
        }
    }

    fn fail_generation(&self, generation: u64, error: TransportError) {
        let failed: Vec<(i32, PendingRequest)> = {
            let mut requests = self.requests.lock();
            let ids: Vec<i32> = requests
                .pending
                .iter()
                .filter(|(_, r)| r.generation == generation)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| requests.pending.remove(&id).map(|r| (id, r)))
                .collect()
        };

        for (id, request) in failed {
            debug!(id, method = %request.method, channel = %request.channel, "transport: failing request: {}", error);
            let _ = request.slot.send(Err(error.clone()));
        }
    }

    fn on_incoming(&self, raw: &str) -> Result<(), TransportError> {
        match parse_incoming(raw)? {
            Incoming::Answer(answer) => {
                let id = answer.id;
                let pending = self.requests.lock().pending.remove(&id);
                match pending {
                    Some(request) => {
                        debug!(id, method = %request.method, channel = %request.channel, "transport: answer");
                        let _ = request.slot.send(answer.into_outcome());
                        Ok(())
                    }
                    None => Err(TransportError::UnknownRequest(id)),
                }
            }
            Incoming::Broadcast { channel, message } => {
                debug!(channel = %channel, message_id = %message.message_id(), "transport: broadcast");
                let _ = self.broadcasts.send((channel, message));
                Ok(())
            }
        }
    }

    fn reap_expired(&self) -> usize {
        let now = Instant::now();
        let timeout = self.config.request_timeout;
        let expired: Vec<(i32, PendingRequest)> = {
            let mut requests = self.requests.lock();
            let ids: Vec<i32> = requests
                .pending
                .iter()
                .filter(|(_, r)| r.submitted_at + timeout <= now)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| requests.pending.remove(&id).map(|r| (id, r)))
                .collect()
        };

        let count = expired.len();
        for (id, request) in expired {
            warn!(id, method = %request.method, channel = %request.channel, "transport: request timed out");
            let _ = request.slot.send(Err(TransportError::Timeout(id)));
        }
        count
    }

    /// Register a query and write it to `connection`
    async fn send_query(
        self: &Arc<Self>,
        connection: &Arc<dyn Connection>,
        generation: u64,
        method: Method,
        channel: &Channel,
        message: Option<Envelope>,
    ) -> Result<PendingAnswer, TransportError> {
        let (slot, rx) = oneshot::channel();
        let submitted_at = Instant::now();
        let id = {
            let mut requests = self.requests.lock();
            let id = requests.allocate();
            requests.pending.insert(
                id,
                PendingRequest {
                    method,
                    channel: channel.clone(),
                    submitted_at,
                    generation,
                    slot,
                },
            );
            id
        };

        let query = Query::new(id, method, channel.clone(), message);
        let frame = match serde_json::to_string(&query) {
            Ok(frame) => frame,
            Err(e) => {
                self.requests.lock().pending.remove(&id);
                return Err(TransportError::Protocol(e.to_string()));
            }
        };

        debug!(id, method = %method, channel = %channel, "transport: query");
        if let Err(e) = connection.send(frame).await {
            self.requests.lock().pending.remove(&id);
            return Err(e);
        }

        Ok(PendingAnswer {
            id,
            deadline: submitted_at + self.config.request_timeout,
            inner: self.clone(),
            rx,
        })
    }

    /// Open a new connection and start reading from it
    async fn connect(self: &Arc<Self>) -> Result<Live, TransportError> {
        let (connection, mut inbound) = self.connector.connect().await?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(generation, "transport: connected");

        let weak: Weak<Inner> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(frame) = inbound.recv().await {
                let inner = match weak.upgrade() {
                    Some(inner) => inner,
                    None => return,
                };
                if let Err(e) = inner.on_incoming(&frame) {
                    warn!(generation, "transport: dropped frame: {}", e);
                }
            }
            if let Some(inner) = weak.upgrade() {
                warn!(generation, "transport: connection lost");
                inner.fail_generation(generation, TransportError::ConnectionLost);
            }
        });

        Ok(Live {
            connection,
            generation,
        })
    }

    /// Subscribe again to every channel after a reconnection
    async fn resubscribe(self: &Arc<Self>, live: &Live) {
        let channels: Vec<Channel> = self.subscriptions.lock().iter().cloned().collect();
        if channels.is_empty() {
            return;
        }
        info!(count = channels.len(), "transport: re-subscribing");

        let mut answers = Vec::new();
        for channel in channels {
            match self
                .send_query(&live.connection, live.generation, Method::Subscribe, &channel, None)
                .await
            {
                Ok(answer) => answers.push((channel, answer)),
                Err(e) => warn!(channel = %channel, "transport: re-subscribe failed: {}", e),
            }
        }

        tokio::spawn(async move {
            for (channel, answer) in answers {
                if let Err(e) = answer.wait().await {
                    warn!(channel = %channel, "transport: re-subscribe failed: {}", e);
                }
            }
        });
    }

    async fn submit(
        self: &Arc<Self>,
        method: Method,
        channel: &Channel,
        message: Option<Envelope>,
    ) -> Result<PendingAnswer, TransportError> {
        let mut link = self.link.lock().await;

        let stale = match link.as_ref() {
            Some(live) if live.connection.is_open() => None,
            Some(live) => Some(live.generation),
            None => None,
        };
        if let Some(generation) = stale {
            self.fail_generation(generation, TransportError::ConnectionLost);
            *link = None;
        }

        if link.is_none() {
            let live = self.connect().await?;
            if live.generation > 1 {
                self.resubscribe(&live).await;
            }
            *link = Some(live);
        }

        let (connection, generation) = match link.as_ref() {
            Some(live) => (live.connection.clone(), live.generation),
            None => return Err(TransportError::ConnectionLost),
        };

        let result = self
            .send_query(&connection, generation, method, channel, message)
            .await;
        if let Err(TransportError::ConnectionLost) = &result {
            self.fail_generation(generation, TransportError::ConnectionLost);
            *link = None;
        }
        result
    }
}

impl Client {
    pub fn new(config: Config, connector: Arc<dyn Connector>) -> (Self, Broadcasts) {
        let (broadcasts, rx) = mpsc::unbounded_channel();
        let inner = Inner {
            config,
            connector,
            requests: parking_lot::Mutex::new(RequestTable {
                next_id: 1,
                pending: HashMap::new(),
            }),
            link: tokio::sync::Mutex::new(None),
            generation: AtomicU64::new(0),
            subscriptions: parking_lot::Mutex::new(BTreeSet::new()),
            broadcasts,
        };
        (
            Client {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Send a query without waiting for its answer
    ///
    /// Connects first if there is no live connection. A failed connection
    /// attempt fails this query with `ConnectionFailed`.
    pub async fn submit(
        &self,
        method: Method,
        channel: &Channel,
        message: Option<Envelope>,
    ) -> Result<PendingAnswer, TransportError> {
        self.inner.submit(method, channel, message).await
    }

    async fn request(
        &self,
        method: Method,
        channel: &Channel,
        message: Option<Envelope>,
    ) -> Result<AnswerResult, TransportError> {
        self.submit(method, channel, message).await?.wait().await
    }

    pub async fn subscribe(&self, channel: &Channel) -> Result<(), TransportError> {
        self.request(Method::Subscribe, channel, None).await?;
        self.inner.subscriptions.lock().insert(channel.clone());
        info!(channel = %channel, "transport: subscribed");
        Ok(())
    }

    pub async fn unsubscribe(&self, channel: &Channel) -> Result<(), TransportError> {
        self.request(Method::Unsubscribe, channel, None).await?;
        self.inner.subscriptions.lock().remove(channel);
        info!(channel = %channel, "transport: unsubscribed");
        Ok(())
    }

    pub async fn publish(&self, channel: &Channel, message: Envelope) -> Result<(), TransportError> {
        self.request(Method::Publish, channel, Some(message)).await?;
        Ok(())
    }

    /// Every message published so far on a channel
    pub async fn catchup(&self, channel: &Channel) -> Result<Vec<Envelope>, TransportError> {
        match self.request(Method::Catchup, channel, None).await? {
            AnswerResult::Messages(messages) => Ok(messages),
            AnswerResult::General(_) => Err(TransportError::Protocol(
                "catchup answered without messages".into(),
            )),
        }
    }

    /// Feed one raw frame received from the server
    pub fn on_incoming(&self, raw: &str) -> Result<(), TransportError> {
        self.inner.on_incoming(raw)
    }

    /// Fail every query older than the request timeout; returns how many
    pub fn reap_expired(&self) -> usize {
        self.inner.reap_expired()
    }

    /// Reap expired queries every `reap_interval` for as long as the client lives
    pub fn spawn_reaper(&self) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.config.reap_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                match weak.upgrade() {
                    Some(inner) => {
                        inner.reap_expired();
                    }
                    None => return,
                }
            }
        })
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.requests.lock().pending.len()
    }

    pub fn subscriptions(&self) -> Vec<Channel> {
        self.inner.subscriptions.lock().iter().cloned().collect()
    }

    /// Close the connection; queries still in flight fail with `ConnectionLost`
    pub async fn close(&self) {
        let live = self.inner.link.lock().await.take();
        if let Some(live) = live {
            live.connection.close().await;
            self.inner
                .fail_generation(live.generation, TransportError::ConnectionLost);
        }
    }
}
