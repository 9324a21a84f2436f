use crate::*;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A message waiting to be applied, and how often it was tried before
struct Delivery {
    channel: Channel,
    envelope: Envelope,
    attempt: u32,
}

#[derive(Clone)]
struct Pipeline {
    client: Client,
    handler: Arc<MessageHandler>,
    max_reprocessing: u32,
    reprocessing_delay: std::time::Duration,
    inbox: mpsc::UnboundedSender<Delivery>,
}

impl Pipeline {
    /// Apply a message, scheduling it again if it arrived before what it depends on
    ///
    /// Fails with the handler's error when the message is rejected for good.
    fn deliver(&self, channel: Channel, envelope: Envelope, attempt: u32) -> Result<(), HandlerError> {
        match self.handler.handle_message(&channel, &envelope) {
            Ok(handled) => {
                for next in handled.join {
                    let pipeline = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = pipeline.join(&next).await {
                            warn!(channel = %next, "network: failed to join: {}", e);
                        }
                    });
                }
                Ok(())
            }
            Err(e) if e.is_retriable() && attempt < self.max_reprocessing => {
                debug!(
                    message_id = %envelope.message_id(),
                    attempt = attempt + 1,
                    "network: will reprocess"
                );
                let inbox = self.inbox.clone();
                let delay = self.reprocessing_delay;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = inbox.send(Delivery {
                        channel,
                        envelope,
                        attempt: attempt + 1,
                    });
                });
                Ok(())
            }
            Err(e) => {
                if e.is_retriable() {
                    warn!(
                        message_id = %envelope.message_id(),
                        attempts = attempt + 1,
                        "network: giving up on message: {}", e
                    );
                }
                Err(e)
            }
        }
    }

    /// Subscribe to a channel and apply everything already published on it
    async fn join(&self, channel: &Channel) -> Result<(), TransportError> {
        self.client.subscribe(channel).await?;

        let history = self.client.catchup(channel).await?;
        debug!(channel = %channel, messages = history.len(), "network: caught up");
        for envelope in history {
            // Rejections are logged by the handler; the rest of the history still applies
            let _ = self.deliver(channel.clone(), envelope, 0);
        }
        Ok(())
    }

    async fn run(self, mut broadcasts: Broadcasts, mut retries: mpsc::UnboundedReceiver<Delivery>) {
        loop {
            let delivery = tokio::select! {
                Some((channel, envelope)) = broadcasts.recv() => Delivery { channel, envelope, attempt: 0 },
                Some(delivery) = retries.recv() => delivery,
                else => break,
            };
            let _ = self.deliver(delivery.channel, delivery.envelope, delivery.attempt);
        }
        debug!("network: broadcast loop stopped");
    }
}

/// A client that keeps local LAO state in step with the network
///
/// Broadcasts on joined channels are applied in arrival order. Joining a
/// channel that leads to further channels (a LAO, an election) joins those too.
pub struct LaoNetwork {
    pipeline: Pipeline,
    store: Arc<MemStore>,
    tasks: Vec<JoinHandle<()>>,
}

impl LaoNetwork {
    /// Start the broadcast loop and the request reaper
    pub fn start(config: Config, connector: Arc<dyn Connector>) -> Self {
        let (client, broadcasts) = Client::new(config.clone(), connector);
        let store = Arc::new(MemStore::new());
        let handler = Arc::new(MessageHandler::new(store.clone()));
        let (inbox, retries) = mpsc::unbounded_channel();

        let pipeline = Pipeline {
            client: client.clone(),
            handler,
            max_reprocessing: config.max_reprocessing,
            reprocessing_delay: config.reprocessing_delay,
            inbox,
        };

        let tasks = vec![
            tokio::spawn(pipeline.clone().run(broadcasts, retries)),
            client.spawn_reaper(),
        ];
        info!(server = %config.server_address, "network: started");

        LaoNetwork {
            pipeline,
            store,
            tasks,
        }
    }

    /// Start against the configured server, over WebSocket for `ws://` URLs
    pub fn connect(config: Config) -> Self {
        let connector = connector_for(&config.server_address);
        Self::start(config, connector)
    }

    pub fn client(&self) -> &Client {
        &self.pipeline.client
    }

    pub fn store(&self) -> &Arc<MemStore> {
        &self.store
    }

    pub fn handler(&self) -> &MessageHandler {
        &self.pipeline.handler
    }

    /// Subscribe to `channel`, catch up on its history and follow it from now on
    pub async fn join(&self, channel: &Channel) -> Result<(), TransportError> {
        self.pipeline.join(channel).await
    }

    /// Sign `data`, publish it on `channel` and apply it locally
    ///
    /// Fails with [`Error::Rejected`] when the local state refuses the message,
    /// even though the server accepted it. A message that only waits on earlier
    /// ones is scheduled for reprocessing and does not fail.
    pub async fn publish<K: Keyring + ?Sized>(
        &self,
        keys: &K,
        channel: &Channel,
        data: MessageData,
    ) -> Result<Envelope, Error> {
        let envelope = Envelope::sign(keys, data)?;
        self.pipeline
            .client
            .publish(channel, envelope.clone())
            .await?;
        self.pipeline.deliver(channel.clone(), envelope.clone(), 0)?;
        Ok(envelope)
    }

    /// Stop background work and close the connection
    pub async fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        self.pipeline.client.close().await;
        info!("network: stopped");
    }
}
