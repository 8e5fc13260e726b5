use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, try_join_all};
use serde_json::Value;
use tokio::sync::{mpsc, OnceCell};
use tracing::{debug, trace};

use super::capabilities::Capabilities;
use super::codec::{self, Notification, Request};
use super::connection::{self, ConnectionState, Outbound, Shared};
use super::correlation::PendingCall;
use super::subscriptions::ListenerError;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::transport::{self, Connector};

/// Electrum protocol client over a single persistent connection.
///
/// Construction spawns the connection task immediately; requests issued
/// while the transport is still opening suspend until it is up. Once the
/// connection ends (peer close, transport error, or [`close`](Self::close))
/// the client is permanently disconnected and every call fails with
/// [`ClientError::ConnectionClosed`].
///
/// Must be constructed from within a Tokio runtime.
pub struct ElectrumClient {
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<Outbound>,
    config: ClientConfig,
    pub(super) capabilities: OnceCell<Capabilities>,
}

impl ElectrumClient {
    /// Validate `config`, pick the transport it names and start connecting.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let connector = transport::connector_for(&config)?;
        Self::with_connector(connector, config)
    }

    /// Start a client over a caller-supplied transport.
    pub fn with_connector(
        connector: Arc<dyn Connector>,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let shared = Arc::new(Shared::new());
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(connection::run(connector, Arc::clone(&shared), outbound_rx));

        Ok(Self {
            shared,
            outbound,
            config,
            capabilities: OnceCell::new(),
        })
    }

    /// Connect, wait for the transport, and negotiate the protocol version.
    ///
    /// A transport that fails to open is reported as
    /// [`ClientError::Transport`] with the underlying cause.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        Self::new(config)?.established().await
    }

    async fn established(self) -> Result<Self, ClientError> {
        if let Err(err) = self.wait_for_connection().await {
            return Err(self
                .shared
                .take_connect_error()
                .map_or(err, ClientError::Transport));
        }
        self.negotiate().await?;
        Ok(self)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn max_batch_size(&self) -> usize {
        self.config.max_batch_size
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Number of requests still awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.len()
    }

    /// Suspend until the transport is open. Fails with `ConnectionClosed` if
    /// connecting failed or the client was closed first.
    pub async fn wait_for_connection(&self) -> Result<(), ClientError> {
        let mut state = self.shared.state.subscribe();
        let reached = *state
            .wait_for(|s| *s != ConnectionState::Connecting)
            .await
            .map_err(|_| ClientError::ConnectionClosed)?;
        match reached {
            ConnectionState::Connected => Ok(()),
            _ => Err(ClientError::ConnectionClosed),
        }
    }

    // ==========================================================================
    // Requests
    // ==========================================================================

    /// Send one request and wait for its result. Server errors come back as
    /// [`ClientError::Rpc`] with code, message and data untouched.
    ///
    /// Dropping the returned future (for example under an external
    /// `tokio::time::timeout`) evicts the call, so a late response is ignored.
    pub async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, ClientError> {
        let call = self.start_request(method, &params).await?;
        call.wait().await
    }

    /// Like [`request`](Self::request), but gives up after `after`. The
    /// abandoned call is evicted so a late response is ignored.
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Vec<Value>,
        after: Duration,
    ) -> Result<Value, ClientError> {
        match tokio::time::timeout(after, self.request(method, params)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                debug!(rpc.method = method, "request timed out");
                Err(ClientError::Timeout {
                    method: method.to_owned(),
                    after,
                })
            }
        }
    }

    /// Send every call in one batch envelope and return the results in the
    /// order given, regardless of the order the server answers in.
    ///
    /// Fails as a whole on the first element that fails; use
    /// [`request_batch_settled`](Self::request_batch_settled) to keep every
    /// outcome.
    pub async fn request_batch(&self, calls: &[(String, Vec<Value>)]) -> Result<Vec<Value>, ClientError> {
        let pending = self.start_batch(calls).await?;
        try_join_all(pending.into_iter().map(PendingCall::wait)).await
    }

    /// Send every call in one batch envelope and return each outcome
    /// separately, in the order given.
    pub async fn request_batch_settled(
        &self,
        calls: &[(String, Vec<Value>)],
    ) -> Result<Vec<Result<Value, ClientError>>, ClientError> {
        let pending = self.start_batch(calls).await?;
        Ok(join_all(pending.into_iter().map(PendingCall::wait)).await)
    }

    async fn start_request(&self, method: &str, params: &[Value]) -> Result<PendingCall, ClientError> {
        self.wait_for_connection().await?;

        // Any early return below drops `call`, which evicts it.
        let call = self.shared.pending.register()?;
        let id = call.id();
        let text = codec::encode_request(method, params, id)?;

        debug!(rpc.id = id, rpc.method = method, rpc.params = params.len(), "rpc call");
        trace!(rpc.id = id, body = %text, "outbound message");
        self.send(text)?;
        Ok(call)
    }

    async fn start_batch(&self, calls: &[(String, Vec<Value>)]) -> Result<Vec<PendingCall>, ClientError> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }
        self.wait_for_connection().await?;

        let pending = self.shared.pending.register_batch(calls.len())?;
        let ids: Vec<u64> = pending.iter().map(PendingCall::id).collect();
        let requests: Vec<Request> = ids
            .iter()
            .zip(calls)
            .map(|(id, (method, params))| Request {
                id: *id,
                method: method.clone(),
                params: params.clone(),
            })
            .collect();

        let text = codec::encode_batch(&requests)?;

        debug!(
            rpc.batch_size = requests.len(),
            rpc.first_id = ids.first().copied().unwrap_or_default(),
            rpc.method = %requests[0].method,
            "rpc batch"
        );
        trace!(body = %text, "outbound message");
        self.send(text)?;
        Ok(pending)
    }

    fn send(&self, text: String) -> Result<(), ClientError> {
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| ClientError::ConnectionClosed)
    }

    // ==========================================================================
    // Notifications
    // ==========================================================================

    /// Register a listener for server notifications named `event` (e.g.
    /// `blockchain.headers.subscribe`). Listeners run on the connection task
    /// in registration order and must not block.
    pub fn subscribe<F>(&self, event: impl Into<String>, listener: F)
    where
        F: Fn(&Notification) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.shared.subscriptions.subscribe(event, listener);
    }

    /// Receive notifications named `event` on a channel.
    pub fn notifications(&self, event: impl Into<String>) -> mpsc::UnboundedReceiver<Notification> {
        self.shared.subscriptions.channel(event)
    }

    // ==========================================================================
    // Teardown
    // ==========================================================================

    /// Close the connection. Outstanding calls fail with `ConnectionClosed`.
    /// Calling it again is a no-op.
    pub fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
        self.shared.mark_disconnected();
    }
}

impl Drop for ElectrumClient {
    fn drop(&mut self) {
        self.close();
    }
}
