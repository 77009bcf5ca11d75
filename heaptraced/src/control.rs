//! Correlates outgoing `ClientMessage::References/Pause/Resume` requests
//! with the server's eventual reply, keyed by a monotonic `request_id`.
//! The read side of the transport hands every decoded `ServerMessage`
//! that isn't an `Alloc`/`Free` to [`Control::dispatch_reply`]; whoever
//! is waiting on that `request_id` gets woken with the reply.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{oneshot, Mutex};

use heaptrace_protocol::message::{ClientMessage, ServerMessage};
use heaptrace_protocol::transport::FrameWriter;

#[derive(Debug)]
pub enum ControlError {
    TransportClosed,
    ReplyDropped,
}

impl std::fmt::Display for ControlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlError::TransportClosed => write!(f, "control: transport writer has shut down"),
            ControlError::ReplyDropped => write!(f, "control: reply channel dropped before a reply arrived"),
        }
    }
}

impl std::error::Error for ControlError {}

pub struct Control {
    writer: FrameWriter,
    next_request_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<ServerMessage>>>,
}

impl Control {
    pub fn new(writer: FrameWriter) -> Self {
        Self { writer, next_request_id: AtomicU64::new(1), pending: Mutex::new(HashMap::new()) }
    }

    fn allocate_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn roundtrip(&self, request_id: u64, msg: ClientMessage) -> Result<ServerMessage, ControlError> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id, tx);

        if self.writer.send(msg.kind(), msg.encode_payload()).await.is_err() {
            self.pending.lock().await.remove(&request_id);
            return Err(ControlError::TransportClosed);
        }

        rx.await.map_err(|_| ControlError::ReplyDropped)
    }

    pub async fn references(&self, addrs: Vec<u64>) -> Result<ServerMessage, ControlError> {
        let request_id = self.allocate_request_id();
        self.roundtrip(request_id, ClientMessage::References { request_id, addrs }).await
    }

    pub async fn pause(&self) -> Result<ServerMessage, ControlError> {
        let request_id = self.allocate_request_id();
        self.roundtrip(request_id, ClientMessage::Pause { request_id }).await
    }

    pub async fn resume(&self) -> Result<ServerMessage, ControlError> {
        let request_id = self.allocate_request_id();
        self.roundtrip(request_id, ClientMessage::Resume { request_id }).await
    }

    /// Feeds a decoded reply frame to whichever caller is waiting on its
    /// `request_id`. Returns `false` for `Alloc`/`Free` (not a reply at
    /// all) or for a `request_id` nobody is waiting on anymore (the
    /// caller already timed out or the process is shutting down).
    pub async fn dispatch_reply(&self, msg: ServerMessage) -> bool {
        let request_id = match &msg {
            ServerMessage::References { request_id, .. }
            | ServerMessage::Pause { request_id, .. }
            | ServerMessage::Resume { request_id, .. } => *request_id,
            ServerMessage::Alloc { .. } | ServerMessage::Free { .. } => return false,
        };

        match self.pending.lock().await.remove(&request_id) {
            Some(tx) => tx.send(msg).is_ok(),
            None => {
                log::warn!("control: reply for unknown request_id {request_id}, dropping");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heaptrace_protocol::transport;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    /// Connects a `Control` to a fake server: a task on the far end
    /// decodes each `ClientMessage`, builds a reply via `respond`, and
    /// sends it back; a task on the near end decodes each `ServerMessage`
    /// and feeds it to `dispatch_reply`, exactly as the real serve loop
    /// eventually will.
    async fn control_with_fake_server(
        respond: impl Fn(ClientMessage) -> ServerMessage + Send + 'static,
    ) -> Arc<Control> {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (mut client_reader, client_writer, _jh) = transport::connect(addr).await.unwrap();
        let (server_stream, _) = listener.accept().await.unwrap();
        let (mut server_reader, server_writer, _jh2) = transport::split(server_stream);

        tokio::spawn(async move {
            while let Some(frame) = server_reader.recv().await {
                let Ok(msg) = ClientMessage::decode(frame.kind, &frame.payload) else { break };
                let reply = respond(msg);
                if server_writer.send(reply.kind(), reply.encode_payload()).await.is_err() {
                    break;
                }
            }
        });

        let control = Arc::new(Control::new(client_writer));
        let dispatch_control = control.clone();
        tokio::spawn(async move {
            while let Some(frame) = client_reader.recv().await {
                let Ok(msg) = ServerMessage::decode(frame.kind, &frame.payload) else { break };
                dispatch_control.dispatch_reply(msg).await;
            }
        });

        control
    }

    #[tokio::test]
    async fn pause_round_trips_through_a_fake_server() {
        let control = control_with_fake_server(|msg| match msg {
            ClientMessage::Pause { request_id } => ServerMessage::Pause { request_id, error_code: 0 },
            other => panic!("unexpected client message: {other:?}"),
        })
        .await;

        let result = control.pause().await.unwrap();
        assert!(matches!(result, ServerMessage::Pause { error_code: 0, .. }));
    }

    #[tokio::test]
    async fn references_round_trips_with_entries() {
        let control = control_with_fake_server(|msg| match msg {
            ClientMessage::References { request_id, addrs } => ServerMessage::References {
                request_id,
                entries: addrs
                    .into_iter()
                    .map(|addr| heaptrace_protocol::message::ReferenceEntry { addr, type_name: "A.B".into(), parents: vec![] })
                    .collect(),
            },
            other => panic!("unexpected client message: {other:?}"),
        })
        .await;

        let result = control.references(vec![0x10, 0x20]).await.unwrap();
        match result {
            ServerMessage::References { entries, .. } => assert_eq!(entries.len(), 2),
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn dispatch_reply_for_an_unknown_request_id_is_a_noop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (_client_reader, client_writer, _jh) = transport::connect(addr).await.unwrap();
        let _server_stream = listener.accept().await.unwrap();
        let control = Control::new(client_writer);
        let delivered = control.dispatch_reply(ServerMessage::Resume { request_id: 99, error_code: 0 }).await;
        assert!(!delivered);
    }
}
