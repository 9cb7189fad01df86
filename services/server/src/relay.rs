//! Federation relay pump.
//!
//! The relay is an external service with two operations: `read` returns up
//! to `max` bundles after a cursor, `write` publishes one locally authored
//! message as a `(user, conversation, message)` pack triple.  The pump is a
//! recurring timeline task: every tick it pulls bundles, materializes any
//! component the model has not seen, advances its cursor, and reschedules
//! itself.  Everything here is best effort — failures are logged and the
//! next tick retries; a locally created message that fails to publish simply
//! stays local.

use crate::SharedController;
use crate::timeline::Timeline;
use chat_core::Controller;
use chat_protocol::{Blob, Bundle, Pack, Uuid, Wire, WireError, opcodes as op};
use std::rc::Rc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncWriteExt, AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Error type for relay transport calls.  All variants are transient from
/// the pump's point of view.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay connection failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("relay wire error: {0}")]
    Wire(#[from] WireError),
    #[error("relay answered opcode {0}, expected {1}")]
    UnexpectedOpcode(i32, i32),
    #[error("relay rejected the write")]
    Rejected,
}

/// The seam to the external relay service.
#[allow(async_fn_in_trait)]
pub trait Relay {
    /// Fetch up to `max` bundles after `since`, oldest first.
    async fn read(
        &self,
        server: Uuid,
        secret: &[u8],
        since: Uuid,
        max: i32,
    ) -> Result<Vec<Bundle>, RelayError>;

    /// Publish one locally authored message.
    async fn write(
        &self,
        server: Uuid,
        secret: &[u8],
        user: Pack,
        conversation: Pack,
        message: Pack,
    ) -> Result<(), RelayError>;
}

// ---------------------------------------------------------------------------
// Remote transport
// ---------------------------------------------------------------------------

/// Relay client over TCP: one fresh connection per call, same codec and
/// request/response discipline as the client protocol.
pub struct RemoteRelay {
    addr: String,
}

impl RemoteRelay {
    pub fn new(addr: impl Into<String>) -> RemoteRelay {
        RemoteRelay { addr: addr.into() }
    }
}

impl Relay for RemoteRelay {
    async fn read(
        &self,
        server: Uuid,
        secret: &[u8],
        since: Uuid,
        max: i32,
    ) -> Result<Vec<Bundle>, RelayError> {
        let mut stream = TcpStream::connect(&self.addr).await?;
        let mut request = Vec::new();
        op::RELAY_READ_REQUEST.put(&mut request);
        server.put(&mut request);
        Blob(secret.to_vec()).put(&mut request);
        since.put(&mut request);
        max.put(&mut request);
        stream.write_all(&request).await?;

        expect_opcode(&mut stream, op::RELAY_READ_RESPONSE).await?;
        let bundles = Vec::<Bundle>::read(&mut stream).await?;
        let _ = stream.shutdown().await;
        Ok(bundles)
    }

    async fn write(
        &self,
        server: Uuid,
        secret: &[u8],
        user: Pack,
        conversation: Pack,
        message: Pack,
    ) -> Result<(), RelayError> {
        let mut stream = TcpStream::connect(&self.addr).await?;
        let mut request = Vec::new();
        op::RELAY_WRITE_REQUEST.put(&mut request);
        server.put(&mut request);
        Blob(secret.to_vec()).put(&mut request);
        user.put(&mut request);
        conversation.put(&mut request);
        message.put(&mut request);
        stream.write_all(&request).await?;

        expect_opcode(&mut stream, op::RELAY_WRITE_RESPONSE).await?;
        let accepted = bool::read(&mut stream).await?;
        let _ = stream.shutdown().await;
        if accepted { Ok(()) } else { Err(RelayError::Rejected) }
    }
}

async fn expect_opcode<S>(stream: &mut S, expected: i32) -> Result<(), RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let opcode = i32::read(stream).await?;
    if opcode != expected {
        return Err(RelayError::UnexpectedOpcode(opcode, expected));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Outbound publishing
// ---------------------------------------------------------------------------

/// A locally authored message with its author and conversation context,
/// queued for `relay.write`.
#[derive(Debug, Clone)]
pub struct OutboundEvent {
    pub user: Pack,
    pub conversation: Pack,
    pub message: Pack,
}

/// Start the outbound loop: drains queued events into `relay.write`, one at
/// a time.  Returns the queue handle the dispatcher feeds.
///
/// Must be called from within the timeline's `LocalSet`.
pub fn start_outbound<R: Relay + 'static>(
    relay: Rc<R>,
    server: Uuid,
    secret: Vec<u8>,
) -> mpsc::UnboundedSender<OutboundEvent> {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundEvent>();
    tokio::task::spawn_local(async move {
        while let Some(event) = rx.recv().await {
            let id = event.message.id;
            match relay
                .write(
                    server,
                    &secret,
                    event.user,
                    event.conversation,
                    event.message,
                )
                .await
            {
                Ok(()) => debug!(message = %id, "relayed message"),
                Err(error) => warn!(message = %id, %error, "relay write failed, message stays local"),
            }
        }
    });
    tx
}

// ---------------------------------------------------------------------------
// Pump
// ---------------------------------------------------------------------------

/// The recurring pull task.
pub struct RelayPump<R> {
    controller: SharedController,
    relay: Rc<R>,
    server: Uuid,
    secret: Vec<u8>,
    poll: Duration,
    batch_limit: i32,
    last_seen: std::cell::Cell<Uuid>,
}

impl<R: Relay + 'static> RelayPump<R> {
    pub fn new(
        controller: SharedController,
        relay: Rc<R>,
        server: Uuid,
        secret: Vec<u8>,
        poll: Duration,
        batch_limit: u32,
    ) -> RelayPump<R> {
        RelayPump {
            controller,
            relay,
            server,
            secret,
            poll,
            batch_limit: batch_limit as i32,
            last_seen: std::cell::Cell::new(Uuid::NULL),
        }
    }

    /// Schedule the first tick immediately; every tick reschedules the next.
    pub fn start(self: Rc<Self>, timeline: &Timeline) {
        info!(poll_ms = self.poll.as_millis() as u64, "relay pump starting");
        let pump = Rc::clone(&self);
        let again = timeline.clone();
        timeline.schedule_now(async move {
            pump.run_once().await;
            Rc::clone(&pump).schedule_next(&again);
        });
    }

    fn schedule_next(self: Rc<Self>, timeline: &Timeline) {
        let pump = Rc::clone(&self);
        let again = timeline.clone();
        timeline.schedule_in(self.poll, async move {
            pump.run_once().await;
            Rc::clone(&pump).schedule_next(&again);
        });
    }

    /// One pull: fetch bundles after the cursor and apply them in order.
    pub async fn run_once(&self) {
        let bundles = match self
            .relay
            .read(self.server, &self.secret, self.last_seen.get(), self.batch_limit)
            .await
        {
            Ok(bundles) => bundles,
            Err(error) => {
                warn!(%error, "relay read failed, retrying next tick");
                return;
            }
        };
        if bundles.is_empty() {
            return;
        }
        debug!(count = bundles.len(), "applying relay bundles");
        let mut hub = self.controller.borrow_mut();
        for bundle in bundles {
            apply_bundle(&mut hub, &bundle);
            self.last_seen.set(bundle.id);
        }
    }
}

/// Materialize the missing components of one bundle: user, then
/// conversation (owned by the bundle's user), then message (authored by the
/// bundle's user in the bundle's conversation).  Components the model
/// already knows are left untouched, so re-delivered bundles are no-ops.
fn apply_bundle(hub: &mut Controller, bundle: &Bundle) {
    if hub.model().find_user(bundle.user.id).is_none() {
        if let Err(error) = hub.replay_user(bundle.user.id, &bundle.user.text, bundle.user.time) {
            warn!(bundle = %bundle.id, %error, "skipping bundle user");
        }
    }
    if hub.model().find_conversation(bundle.conversation.id).is_none() {
        if let Err(error) = hub.replay_conversation(
            bundle.conversation.id,
            bundle.user.id,
            &bundle.conversation.text,
            bundle.conversation.time,
        ) {
            warn!(bundle = %bundle.id, %error, "skipping bundle conversation");
        }
    }
    if hub.model().find_message(bundle.message.id).is_none() {
        if let Err(error) = hub.replay_message(
            bundle.message.id,
            bundle.user.id,
            bundle.conversation.id,
            &bundle.message.text,
            bundle.message.time,
        ) {
            warn!(bundle = %bundle.id, %error, "skipping bundle message");
        }
    }
}
