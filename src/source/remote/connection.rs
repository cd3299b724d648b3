use std::{future::Future, sync::Arc};

use async_trait::async_trait;
use fastwebsockets::{FragmentCollector, Frame, OpCode, WebSocketError, handshake};
use http_body_util::Empty;
use hyper::{
    Request, Uri,
    body::Bytes,
    header::{CONNECTION, HOST, UPGRADE},
    upgrade::Upgraded,
};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio_rustls::{
    TlsConnector,
    rustls::{ClientConfig, RootCertStore, pki_types::ServerName},
};
use webpki_roots::TLS_SERVER_ROOTS;

use super::{
    super::error::{FeedConnectionError, FeedConnectionResult},
    FeedConnector, FeedEvent, FeedStream,
};

struct SpawnExecutor;

impl<Fut> hyper::rt::Executor<Fut> for SpawnExecutor
where
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    fn execute(&self, fut: Fut) {
        tokio::task::spawn(fut);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scheme {
    Ws,
    Wss,
}

impl Scheme {
    fn default_port(&self) -> u16 {
        match self {
            Self::Ws => 80,
            Self::Wss => 443,
        }
    }
}

/// Parsed `ws://` or `wss://` endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FeedEndpoint {
    scheme: Scheme,
    host: String,
    port: u16,
    uri: Uri,
}

impl FeedEndpoint {
    pub fn parse(url: &str) -> FeedConnectionResult<Self> {
        let uri: Uri = url.parse().map_err(FeedConnectionError::InvalidUrl)?;

        let scheme = match uri.scheme_str() {
            Some("ws") => Scheme::Ws,
            Some("wss") => Scheme::Wss,
            other => {
                return Err(FeedConnectionError::UnsupportedScheme(
                    other.map(str::to_string),
                ));
            }
        };

        let host = uri
            .host()
            .filter(|host| !host.is_empty())
            .ok_or(FeedConnectionError::MissingHost)?
            .to_string();
        let port = uri.port_u16().unwrap_or(scheme.default_port());

        Ok(Self {
            scheme,
            host,
            port,
            uri,
        })
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_secure(&self) -> bool {
        self.scheme == Scheme::Wss
    }
}

/// [`FeedConnector`] opening `ws://` and `wss://` endpoints.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketFeedConnector;

impl WebSocketFeedConnector {
    fn tls_connector() -> TlsConnector {
        let mut root_cert_store = RootCertStore::empty();
        root_cert_store.extend(TLS_SERVER_ROOTS.iter().cloned());

        let config = ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        TlsConnector::from(Arc::new(config))
    }

    async fn handshake<S>(
        endpoint: &FeedEndpoint,
        stream: S,
    ) -> FeedConnectionResult<WebSocketFeedStream>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
    {
        let req = Request::builder()
            .method("GET")
            .uri(endpoint.uri.clone())
            .header(HOST, endpoint.addr())
            .header(UPGRADE, "websocket")
            .header(CONNECTION, "upgrade")
            .header("Sec-WebSocket-Key", handshake::generate_key())
            .header("Sec-WebSocket-Version", "13")
            .body(Empty::<Bytes>::new())
            .map_err(FeedConnectionError::HttpUpgradeRequest)?;

        let (ws, _) = handshake::client(&SpawnExecutor, req, stream)
            .await
            .map_err(FeedConnectionError::Handshake)?;

        Ok(WebSocketFeedStream(FragmentCollector::new(ws)))
    }
}

#[async_trait]
impl FeedConnector for WebSocketFeedConnector {
    async fn open(&self, url: &str) -> FeedConnectionResult<Box<dyn FeedStream>> {
        let endpoint = FeedEndpoint::parse(url)?;

        let tcp_stream = TcpStream::connect(endpoint.addr())
            .await
            .map_err(FeedConnectionError::CreateTcpStream)?;

        let stream = if endpoint.is_secure() {
            let server_name = ServerName::try_from(endpoint.host.clone())
                .map_err(FeedConnectionError::InvalidDnsName)?;

            let tls_stream = Self::tls_connector()
                .connect(server_name, tcp_stream)
                .await
                .map_err(FeedConnectionError::ConnectTlsStream)?;

            Self::handshake(&endpoint, tls_stream).await?
        } else {
            Self::handshake(&endpoint, tcp_stream).await?
        };

        Ok(Box::new(stream))
    }
}

pub(crate) struct WebSocketFeedStream(FragmentCollector<TokioIo<Upgraded>>);

impl WebSocketFeedStream {
    async fn send_frame(&mut self, frame: Frame<'_>) -> FeedConnectionResult<()> {
        self.0
            .write_frame(frame)
            .await
            .map_err(FeedConnectionError::WriteFrame)
    }
}

#[async_trait]
impl FeedStream for WebSocketFeedStream {
    async fn next_event(&mut self) -> FeedConnectionResult<FeedEvent> {
        loop {
            let frame = match self.0.read_frame().await {
                Ok(frame) => frame,
                // Peer may drop the connection without a close frame
                Err(WebSocketError::ConnectionClosed) => return Ok(FeedEvent::Closed),
                Err(e) => return Err(FeedConnectionError::ReadFrame(e)),
            };

            match frame.opcode {
                OpCode::Text | OpCode::Binary => {
                    let text = String::from_utf8(frame.payload.to_vec())
                        .map_err(FeedConnectionError::DecodeText)?;
                    return Ok(FeedEvent::Message(text));
                }
                OpCode::Close => return Ok(FeedEvent::Closed),
                OpCode::Ping => {
                    let payload = frame.payload.to_vec();
                    self.send_frame(Frame::pong(payload.into())).await?;
                }
                OpCode::Pong => {}
                unhandled_opcode => {
                    return Err(FeedConnectionError::UnhandledOpCode(unhandled_opcode));
                }
            }
        }
    }

    async fn close(&mut self) -> FeedConnectionResult<()> {
        self.send_frame(Frame::close(1000, &[])).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_secure_endpoint_with_default_port() {
        let endpoint = FeedEndpoint::parse("wss://ramiel.example.com/socket?token=abc").unwrap();

        assert!(endpoint.is_secure());
        assert_eq!(endpoint.addr(), "ramiel.example.com:443");
        assert_eq!(
            endpoint.uri.path_and_query().map(|pq| pq.as_str()),
            Some("/socket?token=abc")
        );
    }

    #[test]
    fn parses_plain_endpoint_with_explicit_port() {
        let endpoint = FeedEndpoint::parse("ws://127.0.0.1:8080/feed").unwrap();

        assert!(!endpoint.is_secure());
        assert_eq!(endpoint.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn rejects_non_websocket_schemes() {
        assert!(matches!(
            FeedEndpoint::parse("https://example.com/feed"),
            Err(FeedConnectionError::UnsupportedScheme(Some(scheme))) if scheme == "https"
        ));
        assert!(matches!(
            FeedEndpoint::parse("/relative/path"),
            Err(FeedConnectionError::UnsupportedScheme(None))
        ));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            FeedEndpoint::parse("wss://exa mple.com"),
            Err(FeedConnectionError::InvalidUrl(_))
        ));
    }
}
