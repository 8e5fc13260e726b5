//! The background task that owns one transport connection.
//!
//! The task reads inbound units, frames and decodes them, and routes each
//! message to the correlation table or the subscription dispatcher. Outbound
//! text arrives over an unbounded channel from the client facade. When the
//! transport ends for any reason every pending call is failed and the state
//! moves to [`ConnectionState::Disconnected`] for good.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

use super::codec::{self, Incoming};
use super::correlation::CorrelationTable;
use super::framing::LineFramer;
use super::subscriptions::SubscriptionDispatcher;
use crate::error::TransportError;
use crate::transport::{Connector, Inbound, TransportHalves, TransportReader, TransportWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// Messages from the client facade to the connection task.
#[derive(Debug)]
pub(crate) enum Outbound {
    Text(String),
    Close,
}

/// State shared between the client facade and its connection task.
pub(crate) struct Shared {
    pub(crate) pending: CorrelationTable,
    pub(crate) subscriptions: SubscriptionDispatcher,
    pub(crate) state: watch::Sender<ConnectionState>,
    /// Why the transport failed to open, kept for [`Shared::take_connect_error`].
    connect_error: Mutex<Option<TransportError>>,
}

impl Shared {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Self {
            pending: CorrelationTable::new(),
            subscriptions: SubscriptionDispatcher::new(),
            state,
            connect_error: Mutex::new(None),
        }
    }

    /// The error that stopped the transport from opening, if any. Taken once.
    pub(crate) fn take_connect_error(&self) -> Option<TransportError> {
        self.connect_error.lock().take()
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Move from `Connecting` to `Connected`. Returns `false` if the client
    /// was closed while the transport was still opening.
    fn set_connected(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Connected;
                true
            } else {
                false
            }
        })
    }

    /// Enter the terminal state and fail every outstanding call.
    pub(crate) fn mark_disconnected(&self) {
        let changed = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                false
            } else {
                *state = ConnectionState::Disconnected;
                true
            }
        });
        let rejected = self.pending.reject_all();
        if rejected > 0 {
            warn!(rpc.rejected = rejected, "failed outstanding calls on disconnect");
        }
        if changed {
            debug!("connection state -> disconnected");
        }
    }

    /// Route one complete inbound JSON text.
    pub(crate) fn handle_text(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        trace!(body = %text, "inbound message");

        match codec::decode(text) {
            Ok(Incoming::Response(response)) => {
                self.pending.resolve(response);
            }
            Ok(Incoming::Batch(responses)) => {
                for response in responses {
                    self.pending.resolve(response);
                }
            }
            Ok(Incoming::Notification(notification)) => {
                let delivered = self.subscriptions.dispatch(&notification);
                debug!(
                    rpc.method = %notification.method,
                    listeners = delivered,
                    "notification dispatched"
                );
            }
            Err(err) => {
                warn!(error = %err, "dropping malformed inbound message");
            }
        }
    }
}

/// Drive one connection from open to close.
pub(crate) async fn run(
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    let endpoint = connector.endpoint();
    debug!(transport.endpoint = %endpoint, "connecting");

    let TransportHalves { reader, mut writer } = match connector.connect().await {
        Ok(halves) => halves,
        Err(err) => {
            error!(transport.endpoint = %endpoint, error = %err, "connection failed");
            *shared.connect_error.lock() = Some(err);
            shared.mark_disconnected();
            return;
        }
    };

    if !shared.set_connected() {
        debug!(transport.endpoint = %endpoint, "closed before connect completed");
        if let Err(err) = writer.close().await {
            debug!(error = %err, "transport close failed");
        }
        shared.mark_disconnected();
        return;
    }
    info!(transport.endpoint = %endpoint, "connected");

    tokio::select! {
        () = read_loop(reader, &shared) => {}
        () = write_loop(writer, &mut outbound) => {}
    }

    shared.mark_disconnected();
    info!(transport.endpoint = %endpoint, "disconnected");
}

async fn read_loop(mut reader: Box<dyn TransportReader>, shared: &Shared) {
    let mut framer = LineFramer::new();
    loop {
        match reader.recv().await {
            Ok(Some(Inbound::Chunk(bytes))) => {
                for line in framer.push(&bytes) {
                    shared.handle_text(&line);
                }
            }
            Ok(Some(Inbound::Message(text))) => shared.handle_text(&text),
            Ok(None) => {
                debug!(buffered = framer.pending_len(), "transport reached end of stream");
                return;
            }
            Err(err) => {
                error!(error = %err, "transport read failed");
                return;
            }
        }
    }
}

async fn write_loop(
    mut writer: Box<dyn TransportWriter>,
    outbound: &mut mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(message) = outbound.recv().await {
        match message {
            Outbound::Text(text) => {
                if let Err(err) = writer.send(&text).await {
                    error!(error = %err, "transport write failed");
                    return;
                }
            }
            Outbound::Close => break,
        }
    }
    if let Err(err) = writer.close().await {
        debug!(error = %err, "transport close failed");
    }
}
