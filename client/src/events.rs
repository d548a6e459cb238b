use crate::{Error, Result};
use futures_util::{Stream as FutStream, StreamExt};
use gridstake_types::Notification;
use tokio::sync::mpsc;
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};
use tracing::{debug, error};

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Stream of notifications from the WebSocket connection.
///
/// The underlying socket is pumped by a background task that is aborted when
/// the stream is dropped.
pub struct Stream {
    receiver: mpsc::Receiver<Result<Notification>>,
    _handle: tokio::task::JoinHandle<()>,
}

impl Drop for Stream {
    fn drop(&mut self) {
        self._handle.abort();
    }
}

impl Stream {
    pub(crate) fn new<S>(ws: WebSocketStream<S>) -> Self
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        Self::new_with_capacity(ws, DEFAULT_CHANNEL_CAPACITY)
    }

    pub(crate) fn new_with_capacity<S>(mut ws: WebSocketStream<S>, capacity: usize) -> Self
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let capacity = if capacity == 0 {
            DEFAULT_CHANNEL_CAPACITY
        } else {
            capacity
        };
        let (tx, rx) = mpsc::channel(capacity);

        let handle = tokio::spawn(async move {
            while let Some(msg) = ws.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        debug!("Received text message: {} bytes", text.len());
                        match serde_json::from_str::<Notification>(&text) {
                            Ok(notification) => {
                                if tx.send(Ok(notification)).await.is_err() {
                                    break; // Receiver dropped
                                }
                            }
                            Err(e) => {
                                error!("Failed to decode notification: {}", e);
                                let err = Error::InvalidData(e);
                                if tx.send(Err(err)).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("WebSocket closed");
                        let _ = tx.send(Err(Error::ConnectionClosed)).await;
                        break;
                    }
                    Ok(_) => {} // Ignore other message types
                    Err(e) => {
                        error!("WebSocket error: {}", e);
                        let _ = tx.send(Err(e.into())).await;
                        break;
                    }
                }
            }
        });

        Self {
            receiver: rx,
            _handle: handle,
        }
    }

    /// Receive the next notification from the stream
    pub async fn next(&mut self) -> Option<Result<Notification>> {
        self.receiver.recv().await
    }
}

impl FutStream for Stream {
    type Item = Result<Notification>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
