//! Frame adapters: every client transport becomes a `Sink<Packet>` plus a
//! `Stream<Item = Result<Packet, _>>`, so the session loop is transport
//! agnostic.

// Layer 1: Standard library imports
use std::collections::VecDeque;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

// Layer 2: Third-party crate imports
use bytes::BytesMut;
use futures::stream::SplitStream;
use futures::{Sink, SinkExt, Stream, StreamExt, TryStreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::codec::{Decoder, Encoder, Framed};

// Layer 3: Internal module imports
use crate::error::SessionError;
use playhouse_comm::packet::{ClientFrameCodec, Packet};

pub(crate) type ClientSink = Pin<Box<dyn Sink<Packet, Error = SessionError> + Send>>;
pub(crate) type ClientRx = Pin<Box<dyn Stream<Item = Result<Packet, SessionError>> + Send>>;

/// Split a raw socket (TCP or TLS) into framed packet halves.
pub(crate) fn split_socket<S>(stream: S) -> (ClientSink, ClientRx)
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let framed = Framed::new(stream, ClientFrameCodec::new());
    let (sink, stream) = framed.split();
    (
        Box::pin(sink.sink_map_err(SessionError::from)),
        Box::pin(stream.map_err(SessionError::from)),
    )
}

/// Split a websocket into framed packet halves.
///
/// The same wire framing rides inside binary websocket messages; one
/// message may carry several frames or a partial one.
pub(crate) fn split_ws<S>(ws: WebSocketStream<S>) -> (ClientSink, ClientRx)
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (sink, stream) = ws.split();
    let sink = sink.with(|packet: Packet| async move {
        let mut codec = ClientFrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(packet, &mut buf)?;
        Ok::<Message, SessionError>(Message::Binary(buf.to_vec()))
    });
    (
        Box::pin(sink),
        Box::pin(WsPacketStream {
            inner: stream,
            codec: ClientFrameCodec::new(),
            buf: BytesMut::new(),
            pending: VecDeque::new(),
        }),
    )
}

struct WsPacketStream<S> {
    inner: SplitStream<WebSocketStream<S>>,
    codec: ClientFrameCodec,
    buf: BytesMut,
    pending: VecDeque<Packet>,
}

impl<S> Stream for WsPacketStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    type Item = Result<Packet, SessionError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(packet) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(packet)));
            }
            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(Message::Binary(data)))) => {
                    this.buf.extend_from_slice(&data);
                    loop {
                        match this.codec.decode(&mut this.buf) {
                            Ok(Some(packet)) => this.pending.push_back(packet),
                            Ok(None) => break,
                            Err(error) => return Poll::Ready(Some(Err(error.into()))),
                        }
                    }
                }
                Poll::Ready(Some(Ok(Message::Close(_)))) | Poll::Ready(None) => {
                    return Poll::Ready(None);
                }
                // Pings are answered by tungstenite; text frames are not
                // part of the protocol.
                Poll::Ready(Some(Ok(_))) => {}
                Poll::Ready(Some(Err(error))) => {
                    return Poll::Ready(Some(Err(error.into())));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Build a TLS acceptor from a PEM certificate chain and private key.
pub(crate) fn load_tls_acceptor(
    cert_path: &Path,
    key_path: &Path,
) -> Result<TlsAcceptor, SessionError> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
        .collect::<Result<Vec<_>, _>>()?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
        .ok_or_else(|| SessionError::Tls(format!("no private key in {}", key_path.display())))?;

    let config = tokio_rustls::rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|error| SessionError::Tls(error.to_string()))?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}
