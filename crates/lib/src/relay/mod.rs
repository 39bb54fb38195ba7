//! Relay dispatcher: readiness gate, authorization gate, and the per-kind handlers that move
//! Telegram content into Discord and record message identities.
//!
//! `Relay` is the composition root. It resolves the Discord bot identity once (the readiness
//! gate), builds an `EventRouter` with every kind wrapped in an `AuthorizationGate`, and starts
//! the `UpdatePoller`.

mod files;
mod gate;
mod handlers;

pub use files::{
    collect_stream, compose_caption, extension_for_mime, extension_of, FileRelayPipeline,
    RelayJob,
};
pub use gate::{
    is_chat_info_command, AuthorizationGate, BridgeContext, BridgeLookup, NOT_BRIDGED_REPLY,
};
pub use handlers::{
    BridgeHandler, EditHandler, MediaHandler, PlainFormatter, TextFormatter, TextHandler,
};

use crate::config::{Config, ConfigBridgeLookup};
use crate::identity::{IdentityError, IdentityMap};
use crate::platform::{DestinationPlatform, PlatformError, SelfIdentity, SourcePlatform};
use crate::poller::{PollerOptions, UpdatePoller};
use crate::router::{EventKind, EventRouter};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("destination client is not ready")]
    NotReady,
    #[error("downloading attachment failed: {0}")]
    Download(#[source] PlatformError),
    #[error("uploading attachment failed: {0}")]
    Upload(#[source] PlatformError),
    #[error("sending message failed: {0}")]
    Send(#[source] PlatformError),
    #[error("editing message failed: {0}")]
    Edit(#[source] PlatformError),
    #[error("recording message identity failed: {0}")]
    Identity(#[from] IdentityError),
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("resolving the Discord bot identity failed: {0}")]
    Identity(#[source] PlatformError),
}

#[derive(Debug, Clone)]
enum GateState {
    NotReady,
    Ready(SelfIdentity),
    Failed,
}

/// One-shot readiness signal: `NotReady` until the destination identity is resolved, then `Ready`
/// for good. If resolution fails the gate is marked failed and every waiter gets `NotReady`
/// instead of blocking forever.
#[derive(Clone)]
pub struct ReadinessGate {
    state: Arc<watch::Sender<GateState>>,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessGate {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(GateState::NotReady);
        Self {
            state: Arc::new(tx),
        }
    }

    pub fn open(&self, identity: SelfIdentity) {
        self.state.send_replace(GateState::Ready(identity));
    }

    pub fn fail(&self) {
        self.state.send_replace(GateState::Failed);
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.state.borrow(), GateState::Ready(_))
    }

    /// Wait until the gate is resolved either way.
    pub async fn wait(&self) -> Result<SelfIdentity, RelayError> {
        let mut rx = self.state.subscribe();
        let state = rx
            .wait_for(|s| !matches!(s, GateState::NotReady))
            .await
            .map_err(|_| RelayError::NotReady)?;
        match &*state {
            GateState::Ready(identity) => Ok(identity.clone()),
            _ => Err(RelayError::NotReady),
        }
    }
}

/// Wires platforms, bridge table, identity store and handlers together.
pub struct Relay {
    source: Arc<dyn SourcePlatform>,
    destination: Arc<dyn DestinationPlatform>,
    bridges: Arc<dyn BridgeLookup>,
    formatter: Arc<dyn TextFormatter>,
    identities: IdentityMap,
    ready: ReadinessGate,
    poller: PollerOptions,
    max_in_flight: usize,
}

impl Relay {
    pub fn new(
        config: &Config,
        source: Arc<dyn SourcePlatform>,
        destination: Arc<dyn DestinationPlatform>,
    ) -> Self {
        Self {
            source,
            destination,
            bridges: Arc::new(ConfigBridgeLookup::new(&config.bridges)),
            formatter: Arc::new(PlainFormatter),
            identities: IdentityMap::new(),
            ready: ReadinessGate::new(),
            poller: PollerOptions::from(&config.source),
            max_in_flight: config.relay.max_in_flight,
        }
    }

    pub fn with_bridges(mut self, bridges: Arc<dyn BridgeLookup>) -> Self {
        self.bridges = bridges;
        self
    }

    pub fn with_formatter(mut self, formatter: Arc<dyn TextFormatter>) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn with_poller_options(mut self, options: PollerOptions) -> Self {
        self.poller = options;
        self
    }

    pub fn identities(&self) -> &IdentityMap {
        &self.identities
    }

    pub fn readiness(&self) -> &ReadinessGate {
        &self.ready
    }

    /// Resolve the Discord bot identity and open the readiness gate. On failure the gate is
    /// failed too, so nothing waits on it forever.
    pub async fn initialize(&self) -> Result<SelfIdentity, StartupError> {
        match self.destination.resolve_self_identity().await {
            Ok(identity) => {
                log::info!(
                    "relay: Discord identity resolved as {} ({})",
                    identity.username,
                    identity.id
                );
                self.ready.open(identity.clone());
                Ok(identity)
            }
            Err(e) => {
                self.ready.fail();
                Err(StartupError::Identity(e))
            }
        }
    }

    fn gated(&self, handler: Arc<dyn BridgeHandler>) -> Arc<AuthorizationGate> {
        Arc::new(AuthorizationGate::new(
            self.bridges.clone(),
            self.source.clone(),
            handler,
        ))
    }

    /// Dispatch table with every event kind behind the authorization gate.
    pub fn router(&self) -> EventRouter {
        let mut router = EventRouter::new(self.max_in_flight);

        let text = self.gated(Arc::new(TextHandler::new(
            self.destination.clone(),
            self.identities.clone(),
            self.formatter.clone(),
            self.ready.clone(),
        )));
        router.register(EventKind::Text, text);

        let pipeline = FileRelayPipeline::new(
            self.source.clone(),
            self.destination.clone(),
            self.ready.clone(),
        );
        let media = self.gated(Arc::new(MediaHandler::new(
            pipeline,
            self.identities.clone(),
        )));
        for kind in [
            EventKind::Photo,
            EventKind::Document,
            EventKind::Voice,
            EventKind::Audio,
            EventKind::Video,
            EventKind::Sticker,
        ] {
            router.register(kind, media.clone());
        }

        let edits = self.gated(Arc::new(EditHandler::new(
            self.destination.clone(),
            self.identities.clone(),
            self.formatter.clone(),
            self.ready.clone(),
        )));
        router.register(EventKind::EditedMessage, edits);

        router
    }

    /// Initialize, then spawn the poller. Returns the poller task; it runs until `cancel` fires.
    /// Fails fast if the Discord identity cannot be resolved.
    pub async fn start(
        &self,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, StartupError> {
        self.initialize().await?;
        let router = Arc::new(self.router());
        let poller = UpdatePoller::new(self.source.clone(), router, self.poller.clone(), cancel);
        Ok(poller.start())
    }
}
