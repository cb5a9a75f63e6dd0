//! WebSocket push channel built on `tokio-tungstenite`.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use crate::client::{BoxFuture, PushChannel, PushConnector};
use crate::config::BackendConfig;
use crate::models::message::ClientMessage;
use crate::{AppError, Result};

/// Opens WebSocket connections to the live status endpoint.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: Url,
    connect_timeout: Duration,
}

impl WsConnector {
    /// Build a connector for `config.live_status_path`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the URL cannot be derived.
    pub fn new(config: &BackendConfig) -> Result<Self> {
        Ok(Self {
            url: config.ws_url()?,
            connect_timeout: config.request_timeout(),
        })
    }

    /// Endpoint this connector dials.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn open(&self) -> Result<Box<dyn PushChannel>> {
        debug!(url = %self.url, "opening push channel");
        let (stream, _response) =
            tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str()))
                .await
                .map_err(|_| {
                    AppError::Timeout(format!(
                        "push channel did not open within {}ms",
                        self.connect_timeout.as_millis()
                    ))
                })??;
        Ok(Box::new(WsChannel {
            stream,
            closed: false,
        }))
    }
}

impl PushConnector for WsConnector {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn PushChannel>>> {
        Box::pin(self.open())
    }
}

struct WsChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

impl WsChannel {
    async fn read_text(&mut self) -> Option<Result<String>> {
        if self.closed {
            return None;
        }
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => {
                    return Some(String::from_utf8(bytes.to_vec()).map_err(|err| {
                        AppError::Payload(format!("binary frame is not utf-8: {err}"))
                    }));
                }
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "push channel closed by server");
                    self.closed = true;
                    return None;
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {
                    trace!("control frame");
                }
                Err(err) => return Some(Err(err.into())),
            }
        }
    }
}

impl PushChannel for WsChannel {
    fn send(&mut self, message: ClientMessage) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let text = message.to_json()?;
            self.stream.send(Message::text(text)).await?;
            Ok(())
        })
    }

    fn next_frame(&mut self) -> BoxFuture<'_, Option<Result<String>>> {
        Box::pin(self.read_text())
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if self.closed {
                return;
            }
            self.closed = true;
            if let Err(err) = self.stream.close(None).await {
                debug!(%err, "push channel close failed");
            }
        })
    }
}
