use crate::*;
use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

/// Frames received on a connection; the stream ends when the connection is lost
pub type Inbound = mpsc::UnboundedReceiver<String>;

/// A live, ordered, bidirectional text-frame link to a server
#[async_trait]
pub trait Connection: Send + Sync {
    async fn send(&self, frame: String) -> Result<(), TransportError>;

    async fn close(&self);

    fn is_open(&self) -> bool;
}

/// Opens connections to the server
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<(Arc<dyn Connection>, Inbound), TransportError>;
}

/// Pick a connector from the address: `ws://` URLs speak WebSocket, plain
/// `host:port` addresses use [`TcpConnector`]
pub fn connector_for(address: &str) -> Arc<dyn Connector> {
    if address.starts_with("ws://") || address.starts_with("wss://") {
        Arc::new(WsConnector::new(address))
    } else {
        Arc::new(TcpConnector::new(address))
    }
}

/// Newline-delimited JSON frames over raw TCP
///
/// Not a WebSocket: it only talks to servers or relays that frame messages
/// one per line. Use [`WsConnector`] for a regular LAO server.
pub struct TcpConnector {
    address: String,
}

impl TcpConnector {
    pub fn new(address: &str) -> Self {
        TcpConnector {
            address: address.to_string(),
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<(Arc<dyn Connection>, Inbound), TransportError> {
        let stream = TcpStream::connect(&self.address)
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", self.address, e)))?;
        debug!(address = %self.address, "connection: established");

        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));

        let reader_open = open.clone();
        let address = self.address.clone();
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!(address = %address, "connection: closed by server");
                        break;
                    }
                    Err(e) => {
                        warn!(address = %address, "connection: read failed: {}", e);
                        break;
                    }
                }
            }
            reader_open.store(false, Ordering::SeqCst);
        });

        let connection = TcpConnection {
            writer: Mutex::new(write_half),
            open,
            reader,
        };
        Ok((Arc::new(connection), rx))
    }
}

struct TcpConnection {
    writer: Mutex<OwnedWriteHalf>,
    open: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

#[async_trait]
impl Connection for TcpConnection {
    async fn send(&self, mut frame: String) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ConnectionLost);
        }
        frame.push('\n');

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.write_all(frame.as_bytes()).await {
            warn!("connection: write failed: {}", e);
            self.open.store(false, Ordering::SeqCst);
            return Err(TransportError::ConnectionLost);
        }
        Ok(())
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.writer.lock().await.shutdown().await;
        self.reader.abort();
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// One JSON message per WebSocket text frame
///
/// Built without TLS support, so `wss://` URLs fail to connect.
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: &str) -> Self {
        WsConnector {
            url: url.to_string(),
        }
    }
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<(Arc<dyn Connection>, Inbound), TransportError> {
        let (stream, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", self.url, e)))?;
        debug!(url = %self.url, "connection: websocket established");

        let (sink, mut source) = stream.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));

        let reader_open = open.clone();
        let url = self.url.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if tx.send(text).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!(url = %url, "connection: closed by server");
                        break;
                    }
                    // Control frames are answered by tungstenite
                    Ok(_) => {}
                    Err(e) => {
                        warn!(url = %url, "connection: read failed: {}", e);
                        break;
                    }
                }
            }
            reader_open.store(false, Ordering::SeqCst);
        });

        let connection = WsConnection {
            sink: Mutex::new(sink),
            open,
            reader,
        };
        Ok((Arc::new(connection), rx))
    }
}

struct WsConnection {
    sink: Mutex<WsSink>,
    open: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

#[async_trait]
impl Connection for WsConnection {
    async fn send(&self, frame: String) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ConnectionLost);
        }

        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.send(Message::Text(frame)).await {
            warn!("connection: websocket write failed: {}", e);
            self.open.store(false, Ordering::SeqCst);
            return Err(TransportError::ConnectionLost);
        }
        Ok(())
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.sink.lock().await.close().await;
        self.reader.abort();
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = socket.into_split();
            let mut lines = BufReader::new(read_half).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            write_half
                .write_all(format!("echo {}\n", line).as_bytes())
                .await
                .unwrap();
        });

        let (connection, mut inbound) = TcpConnector::new(&address).connect().await.unwrap();
        assert!(connection.is_open());
        connection.send("hello".to_string()).await.unwrap();
        assert_eq!(inbound.recv().await.unwrap(), "echo hello");

        // The server hangs up after one frame
        server.await.unwrap();
        assert!(inbound.recv().await.is_none());
        assert!(!connection.is_open());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        assert!(matches!(
            TcpConnector::new(&address).connect().await,
            Err(TransportError::ConnectionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_websocket_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            let text = ws.next().await.unwrap().unwrap().into_text().unwrap();
            ws.send(Message::Text(format!("echo {}", text)))
                .await
                .unwrap();
            let _ = ws.close(None).await;
        });

        let (connection, mut inbound) = connector_for(&url).connect().await.unwrap();
        assert!(connection.is_open());
        connection.send(r#"{"jsonrpc":"2.0"}"#.to_string()).await.unwrap();
        assert_eq!(inbound.recv().await.unwrap(), r#"echo {"jsonrpc":"2.0"}"#);

        server.await.unwrap();
        assert!(inbound.recv().await.is_none());
        assert!(!connection.is_open());
        assert!(matches!(
            connection.send("late".to_string()).await,
            Err(TransportError::ConnectionLost)
        ));
    }

    #[tokio::test]
    async fn test_websocket_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        drop(listener);

        assert!(matches!(
            WsConnector::new(&url).connect().await,
            Err(TransportError::ConnectionFailed(_))
        ));
    }
}
