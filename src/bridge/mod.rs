//! The host bridge: the boundary between the interpreter and the live
//! chat platform.
//!
//! Scripts never talk to the platform directly. Accessor globals such as
//! `Member(id)` turn into named request topics carrying JSON payloads, sent
//! through a [`PlatformBridge`] implementation. Every request is subject to
//! the [`BRIDGE_TIMEOUT`]; a timeout or a remote rejection reaches the script
//! as an ordinary script error, never as a host crash.
//!
//! This module provides:
//! - [`PlatformBridge`]: the request/response contract
//! - [`RemoteBridge`]: the production implementation over an async channel
//! - [`StaticBridge`]: a canned-response implementation for tests and the CLI
//! - [`Sleeper`]: the injected implementation of the `sleep` statement

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value as Json;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

pub mod storage;

/// Every outbound platform request is abandoned after this long.
pub const BRIDGE_TIMEOUT: Duration = Duration::from_secs(5);

/// An error crossing back from the platform boundary.
#[derive(Debug, Error)]
pub enum BridgeErr {
    /// The platform did not answer within [`BRIDGE_TIMEOUT`].
    #[error("platform request timed out")]
    Timeout,

    /// The platform answered with a rejection.
    #[error("platform rejected the request: {0}")]
    Rejected(String),

    /// The transport to the platform is gone.
    #[error("platform connection is closed")]
    Closed,
}

/// Request topics understood by the platform side of the bridge.
pub mod topic {
    #![allow(missing_docs)]

    pub const MEMBER_GET: &str = "member.get";
    pub const ROLE_GET: &str = "role.get";
    pub const ROLE_GET_MEMBERS: &str = "role.getMembers";
    pub const CHANNEL_GET: &str = "channel.get";
    pub const MESSAGE_GET: &str = "message.get";
    pub const MESSAGE_EDIT: &str = "message.edit";
}

/// The request/response contract the interpreter executes against.
///
/// Implementations must apply the timeout themselves ([`RemoteBridge`] does);
/// the interpreter treats any `Err` as a script-level failure.
pub trait PlatformBridge: Send + Sync {
    /// Send one request and wait for its response.
    fn request(&self, topic: &str, payload: Json) -> Result<Json, BridgeErr>;
}

/// One in-flight request travelling to the platform task.
pub struct BridgeRequest {
    /// The request topic (see [`topic`]).
    pub topic: String,
    /// The JSON payload.
    pub payload: Json,
    /// Channel the platform task answers on. `Err` carries the rejection text.
    pub respond: oneshot::Sender<Result<Json, String>>,
}

/// The production bridge: forwards requests over an async channel to
/// whatever task owns the platform connection, and blocks the (dedicated)
/// interpreter thread until the response or the timeout.
pub struct RemoteBridge {
    handle: tokio::runtime::Handle,
    tx: mpsc::Sender<BridgeRequest>,
}

impl RemoteBridge {
    /// Wire a bridge to the platform task listening on `tx`.
    ///
    /// The interpreter must run on a thread that is allowed to block
    /// (`spawn_blocking` or a plain thread), not on a runtime worker.
    pub fn new(handle: tokio::runtime::Handle, tx: mpsc::Sender<BridgeRequest>) -> Self {
        Self { handle, tx }
    }
}

impl PlatformBridge for RemoteBridge {
    fn request(&self, topic: &str, payload: Json) -> Result<Json, BridgeErr> {
        let (respond, rx) = oneshot::channel();
        let req = BridgeRequest {
            topic: topic.to_string(),
            payload,
            respond,
        };

        debug!(topic, "bridge request");
        let tx = self.tx.clone();
        let result = self.handle.block_on(async move {
            tx.send(req).await.map_err(|_| BridgeErr::Closed)?;

            match tokio::time::timeout(BRIDGE_TIMEOUT, rx).await {
                Err(_) => Err(BridgeErr::Timeout),
                Ok(Err(_)) => Err(BridgeErr::Closed),
                Ok(Ok(Err(rejection))) => Err(BridgeErr::Rejected(rejection)),
                Ok(Ok(Ok(value))) => Ok(value),
            }
        });

        if let Err(e) = &result {
            warn!(topic, error = %e, "bridge request failed");
        }
        result
    }
}

/// A bridge that answers from a fixed topic → response table.
///
/// Used by the CLI and tests; topics with no canned response are rejected,
/// which doubles as coverage for the rejection path.
#[derive(Default)]
pub struct StaticBridge {
    responses: Mutex<HashMap<String, Json>>,
}

impl StaticBridge {
    /// An empty bridge that rejects everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the canned response for a topic.
    pub fn provide(&self, topic: &str, response: Json) {
        self.responses.lock().unwrap().insert(topic.to_string(), response);
    }
}

impl PlatformBridge for StaticBridge {
    fn request(&self, topic: &str, _payload: Json) -> Result<Json, BridgeErr> {
        self.responses
            .lock()
            .unwrap()
            .get(topic)
            .cloned()
            .ok_or_else(|| BridgeErr::Rejected(format!("no handler for '{topic}'")))
    }
}

/// The injected implementation of the `sleep` statement's pause.
///
/// Production uses [`ThreadSleeper`]; tests inject a recorder so suites
/// never actually wait.
pub trait Sleeper: Send + Sync {
    /// Pause the current script for the given span.
    fn sleep(&self, d: Duration);
}

/// Blocks the interpreter thread for real.
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, d: Duration) {
        if !d.is_zero() {
            std::thread::sleep(d);
        }
    }
}
