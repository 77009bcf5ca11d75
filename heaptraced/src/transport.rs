//! Client-side connection handling: the daemon connects out to the
//! server's listening address (it is loaded into the target process
//! first and waits for us to attach), then pumps decoded frames into
//! the ingestor and the control-plane correlation table.

use std::sync::Arc;

use heaptrace_protocol::message::ServerMessage;
use heaptrace_protocol::transport::{self, FrameReader};

use crate::control::Control;
use crate::ingestor::{IngestError, Ingestor};
use crate::metrics::Metrics;

pub struct ClientTransport {
    pub reader: FrameReader,
    pub control: Arc<Control>,
}

pub async fn connect(server_addr: &str) -> std::io::Result<ClientTransport> {
    let (reader, writer, _writer_task) = transport::connect(server_addr).await?;
    log::info!("transport: connected to {server_addr}");
    Ok(ClientTransport { reader, control: Arc::new(Control::new(writer)) })
}

#[derive(Debug)]
pub enum PumpError {
    Ingest(IngestError),
}

impl std::fmt::Display for PumpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PumpError::Ingest(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for PumpError {}

impl From<IngestError> for PumpError {
    fn from(e: IngestError) -> Self {
        PumpError::Ingest(e)
    }
}

/// Drains `reader` until the peer disconnects, routing `Alloc`/`Free`
/// frames into `ingestor` and everything else into `control`'s reply
/// table. Returns once the connection closes or a frame-order violation
/// makes the capture unrecoverable; either way `ingestor.finish()` has
/// already been called.
pub async fn run_pump(
    mut reader: FrameReader,
    control: Arc<Control>,
    ingestor: &mut Ingestor,
    metrics: &Metrics,
) -> Result<(), PumpError> {
    loop {
        metrics.set_transport_queue_depth(reader.queue_depth());
        let Some(frame) = reader.recv().await else {
            log::info!("transport: server disconnected");
            break;
        };

        let msg = match ServerMessage::decode(frame.kind, &frame.payload) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("transport: dropping malformed server frame: {e}");
                continue;
            }
        };

        match msg {
            ServerMessage::Alloc { frame, addr, size, type_name, call_stack } => {
                ingestor.on_alloc(frame, addr, size, type_name, call_stack).await?;
            }
            ServerMessage::Free { frame, addr, size } => {
                ingestor.on_free(frame, addr, size).await?;
            }
            reply @ (ServerMessage::References { .. } | ServerMessage::Pause { .. } | ServerMessage::Resume { .. }) => {
                control.dispatch_reply(reply).await;
            }
        }
    }

    ingestor.finish().await?;
    Ok(())
}
