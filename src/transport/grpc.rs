//! gRPC transport over tonic HTTP/2 channels.
//!
//! Every [`GrpcConnection`] wraps its own [`Channel`], so N connections mean N
//! independent HTTP/2 connections and N server-side stream handlers.

use super::{AckStream, Connection, Credential, DialOptions, Dialer, EventSink};
use crate::domain::TransportError;
use crate::transport::wire::{AckRecord, EventRecord};
use futures::SinkExt;
use futures::channel::mpsc;
use std::future::Future;
use std::pin::Pin;
use tonic::codec::{ProstCodec, Streaming};
use tonic::codegen::http::uri::PathAndQuery;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tonic::{Request, Status};
use tracing::debug;

/// Fully qualified method of the bidirectional ingestion call.
pub const STREAM_EVENTS_PATH: &str = "/ingest.v1.EventService/StreamEvents";

/// Request metadata key carrying the API key.
pub const API_KEY_HEADER: &str = "x-api-key";

const DEFAULT_OUTBOUND_BUFFER: usize = 1024;

#[derive(Debug, Clone)]
pub struct GrpcDialer {
    outbound_buffer: usize,
}

impl Default for GrpcDialer {
    fn default() -> Self {
        Self {
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
        }
    }
}

impl GrpcDialer {
    /// Number of encoded events buffered between the worker and HTTP/2 flow control.
    pub fn with_outbound_buffer(mut self, outbound_buffer: usize) -> Self {
        self.outbound_buffer = outbound_buffer.max(1);
        self
    }
}

/// Builds a URI tonic accepts from a bare `host:port` or a full URL.
pub fn endpoint_uri(endpoint: &str, secure: bool) -> String {
    if endpoint.contains("://") {
        endpoint.to_string()
    } else if secure {
        format!("https://{endpoint}")
    } else {
        format!("http://{endpoint}")
    }
}

impl Dialer for GrpcDialer {
    type Connection = GrpcConnection;

    async fn dial(&self, options: &DialOptions) -> Result<GrpcConnection, TransportError> {
        let uri = endpoint_uri(&options.endpoint, options.secure);

        let mut endpoint = Endpoint::from_shared(uri.clone())
            .map_err(|e| TransportError::InvalidEndpoint {
                endpoint: options.endpoint.clone(),
                reason: e.to_string(),
            })?
            .connect_timeout(options.timeout)
            .tcp_nodelay(true);

        if options.secure {
            endpoint = endpoint
                .tls_config(ClientTlsConfig::new().with_webpki_roots())
                .map_err(|e| TransportError::Dial {
                    endpoint: options.endpoint.clone(),
                    reason: format!("TLS configuration rejected: {e}"),
                })?;
        }

        let channel = endpoint.connect().await.map_err(|e| TransportError::Dial {
            endpoint: options.endpoint.clone(),
            reason: e.to_string(),
        })?;

        debug!(endpoint = %uri, secure = options.secure, "gRPC channel established");

        Ok(GrpcConnection {
            channel,
            outbound_buffer: self.outbound_buffer,
        })
    }
}

#[derive(Debug, Clone)]
pub struct GrpcConnection {
    channel: Channel,
    outbound_buffer: usize,
}

impl Connection for GrpcConnection {
    type Sink = GrpcEventSink;
    type Acks = GrpcAckStream;

    async fn open_stream(
        &self,
        credential: &Credential,
    ) -> Result<(GrpcEventSink, GrpcAckStream), TransportError> {
        let api_key: MetadataValue<Ascii> = MetadataValue::try_from(credential.expose())
            .map_err(|_| TransportError::InvalidCredential)?;

        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        grpc.ready()
            .await
            .map_err(|e| TransportError::StreamOpen(format!("service not ready: {e}")))?;

        let (tx, rx) = mpsc::channel::<EventRecord>(self.outbound_buffer);
        let mut request = Request::new(rx);
        request.metadata_mut().insert(API_KEY_HEADER, api_key);

        // The call is driven by the receive side; the request body streams
        // concurrently once the call has been dispatched.
        let call: PendingCall = Box::pin(async move {
            let codec: ProstCodec<EventRecord, AckRecord> = ProstCodec::default();
            let path = PathAndQuery::from_static(STREAM_EVENTS_PATH);
            grpc.streaming(request, path, codec)
                .await
                .map(tonic::Response::into_inner)
        });

        Ok((
            GrpcEventSink { tx },
            GrpcAckStream {
                state: AckState::Pending(call),
            },
        ))
    }

    async fn close(self) -> Result<(), TransportError> {
        // A tonic channel shuts its connection down once the last handle drops
        drop(self.channel);
        Ok(())
    }
}

#[derive(Debug)]
pub struct GrpcEventSink {
    tx: mpsc::Sender<EventRecord>,
}

impl EventSink for GrpcEventSink {
    async fn send(&mut self, record: EventRecord) -> Result<(), TransportError> {
        self.tx
            .send(record)
            .await
            .map_err(|_| TransportError::StreamClosed)
    }

    async fn close_send(&mut self) {
        self.tx.close_channel();
    }
}

type PendingCall = Pin<Box<dyn Future<Output = Result<Streaming<AckRecord>, Status>> + Send>>;

enum AckState {
    Pending(PendingCall),
    Open(Streaming<AckRecord>),
    Done,
}

enum AckStep {
    Opened(Result<Streaming<AckRecord>, Status>),
    Message(Result<Option<AckRecord>, Status>),
}

pub struct GrpcAckStream {
    state: AckState,
}

impl std::fmt::Debug for GrpcAckStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            AckState::Pending(_) => "pending",
            AckState::Open(_) => "open",
            AckState::Done => "done",
        };
        f.debug_struct("GrpcAckStream").field("state", &state).finish()
    }
}

fn receive_error(status: &Status) -> TransportError {
    TransportError::Receive(format!("{:?}: {}", status.code(), status.message()))
}

impl AckStream for GrpcAckStream {
    async fn next_ack(&mut self) -> Option<Result<AckRecord, TransportError>> {
        loop {
            let step = match &mut self.state {
                AckState::Pending(call) => AckStep::Opened(call.await),
                AckState::Open(stream) => AckStep::Message(stream.message().await),
                AckState::Done => return None,
            };

            match step {
                AckStep::Opened(Ok(stream)) => self.state = AckState::Open(stream),
                AckStep::Opened(Err(status)) | AckStep::Message(Err(status)) => {
                    self.state = AckState::Done;
                    return Some(Err(receive_error(&status)));
                }
                AckStep::Message(Ok(Some(ack))) => return Some(Ok(ack)),
                AckStep::Message(Ok(None)) => {
                    self.state = AckState::Done;
                    return None;
                }
            }
        }
    }
}
