use crate::{
    broker::{Broker, Event},
    ident::IdentityPool,
    metrics,
    session::{Session, MAILBOX_SIZE},
    tasks::TaskSet,
    types::IdentExhausted,
};
use std::{
    collections::HashMap,
    sync::{Arc, RwLock, Weak},
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Server tunables.
#[derive(Debug, Copy, Clone)]
pub struct Config {
    /// How long a session tolerates neither an event nor a poller before
    /// terminating. Advertised to clients in `advice.timeout`; long polls
    /// are held for at most half of it.
    pub max_session_idle: Duration,
    /// How long an unused identity stays valid. Kept well above
    /// `max_session_idle` so a live session never outlives its identity.
    pub kept_window: Duration,
    /// Cap on undelivered events buffered per session; the oldest event is
    /// dropped on overflow.
    pub mailbox_size: usize,
    /// How long a held poll lingers after its most recent event, batching a
    /// burst into one response.
    pub quiescence: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_session_idle: Duration::from_secs(60),
            kept_window: Duration::from_secs(30 * 60),
            mailbox_size: MAILBOX_SIZE,
            quiescence: Duration::from_secs(1),
        }
    }
}

impl Config {
    /// Set the session idle window.
    pub const fn with_max_session_idle(mut self, window: Duration) -> Self {
        self.max_session_idle = window;
        self
    }

    /// Set the identity kept window.
    pub const fn with_kept_window(mut self, window: Duration) -> Self {
        self.kept_window = window;
        self
    }

    /// Set the per-session mailbox cap.
    pub const fn with_mailbox_size(mut self, size: usize) -> Self {
        self.mailbox_size = size;
        self
    }

    /// Set the long-poll quiescence window.
    pub const fn with_quiescence(mut self, window: Duration) -> Self {
        self.quiescence = window;
        self
    }
}

/// The Bayeux protocol core.
///
/// Composes the identity pool, the broker, and the per-client session
/// actors, and exposes the protocol verbs the transport dispatches to.
/// Cheap to clone; clones share state.
///
/// Every verb that names a client identity touches the pool first and
/// reports `None` when the identity is not live; the transport answers
/// `successful: false`, with re-handshake advice on connect.
#[derive(Debug, Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

#[derive(Debug)]
struct ServerInner {
    cfg: Config,
    idents: IdentityPool,
    sessions: RwLock<HashMap<String, Session>>,
    broker: Broker,
    tasks: TaskSet,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    /// Create a server with default [`Config`].
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Create a server with the given [`Config`].
    pub fn with_config(cfg: Config) -> Self {
        let idents = IdentityPool::new(|| uuid::Uuid::new_v4().to_string(), cfg.kept_window);
        Self {
            inner: Arc::new(ServerInner {
                cfg,
                idents,
                sessions: RwLock::new(HashMap::new()),
                broker: Broker::new(),
                tasks: TaskSet::default(),
            }),
        }
    }

    /// The server's configuration.
    pub fn config(&self) -> &Config {
        &self.inner.cfg
    }

    /// Issue a fresh identity and bring up its session, so subscriptions
    /// may arrive before the first connect.
    ///
    /// ## Panics
    ///
    /// Panics if called outside the context of a Tokio runtime, which is
    /// needed to spawn the session actor.
    pub fn handshake(&self) -> Result<String, IdentExhausted> {
        let client = self.inner.idents.get()?;

        let inbound = self.inner.broker.register(&client);
        let weak = Arc::downgrade(&self.inner);
        let hook = {
            let client = client.clone();
            move || ServerInner::cleanup(weak, client)
        };
        let session = Session::spawn(
            client.clone(),
            inbound,
            self.inner.cfg.max_session_idle,
            self.inner.cfg.mailbox_size,
            hook,
            &self.inner.tasks,
        );
        self.inner
            .sessions
            .write()
            .expect("session table poisoned")
            .insert(client.clone(), session);

        metrics::handshakes().increment(1);
        metrics::sessions_active().increment(1.0);
        debug!(%client, "handshake");
        Ok(client)
    }

    /// Attach a long-poll poller to the client's session.
    ///
    /// May supersede other non-connect waiting channels. `None` when the
    /// identity or its session is no longer live; the client must
    /// re-handshake.
    pub async fn connect(&self, client: &str) -> Option<mpsc::Receiver<Event>> {
        if !self.touch(client) {
            return None;
        }
        let session = self.session(client)?;
        metrics::connects().increment(1);
        debug!(%client, "connect");
        Some(session.attach(true).await)
    }

    /// Tear the client's session down. The returned channel flushes the
    /// undelivered mailbox, in order.
    pub async fn disconnect(&self, client: &str) -> Option<mpsc::Receiver<Event>> {
        if !self.touch(client) {
            return None;
        }
        let session = self
            .inner
            .sessions
            .write()
            .expect("session table poisoned")
            .remove(client)?;
        debug!(%client, "disconnect");
        Some(session.close().await)
    }

    /// Subscribe the client to a channel pattern and drain any buffered
    /// events through the returned noop channel.
    pub async fn subscribe(&self, client: &str, channel: &str) -> Option<mpsc::Receiver<Event>> {
        if !self.touch(client) {
            return None;
        }
        let session = self.session(client)?;
        self.inner.broker.subscribe(client, channel);
        debug!(%client, %channel, "subscribe");
        Some(session.attach(false).await)
    }

    /// Remove a subscription. `None` when the subscription did not exist.
    pub async fn unsubscribe(&self, client: &str, channel: &str) -> Option<mpsc::Receiver<Event>> {
        if !self.touch(client) {
            return None;
        }
        if !self.inner.broker.unsubscribe(client, channel) {
            return None;
        }
        let session = self.session(client)?;
        debug!(%client, %channel, "unsubscribe");
        Some(session.attach(false).await)
    }

    /// Broadcast an event on behalf of an authenticated client, then drain
    /// the publisher's own buffered events.
    ///
    /// The broadcast happens even when the publisher's session is gone; the
    /// response is unsuccessful in that case but subscribers still hear the
    /// event.
    pub async fn publish(
        &self,
        client: &str,
        channel: &str,
        data: &str,
    ) -> Option<mpsc::Receiver<Event>> {
        if !self.touch(client) {
            return None;
        }
        self.inner.broker.broadcast(channel, data).await;
        metrics::publishes().increment(1);
        trace!(%client, %channel, "publish");
        let session = self.session(client)?;
        Some(session.attach(false).await)
    }

    /// Broadcast an event without an authenticated publisher.
    pub async fn whisper(&self, channel: &str, data: &str) {
        self.inner.broker.broadcast(channel, data).await;
        metrics::publishes().increment(1);
        trace!(%channel, "whisper");
    }

    /// Detach the client's current poller, pushing an undelivered in-flight
    /// event back so the next poller observes it first.
    pub async fn fail(&self, client: &str, pushback: Option<Event>) {
        let Some(session) = self.session(client) else {
            return;
        };
        session.fail(pushback).await;
    }

    /// Terminate every session and wait for the actors to finish.
    pub async fn shutdown(&self) {
        self.inner.tasks.shutdown().await;
        self.inner
            .sessions
            .write()
            .expect("session table poisoned")
            .clear();
    }

    fn touch(&self, client: &str) -> bool {
        let live = self.inner.idents.touch(client);
        if !live {
            metrics::unknown_clients().increment(1);
            debug!(%client, "unknown client");
        }
        live
    }

    fn session(&self, client: &str) -> Option<Session> {
        self.inner
            .sessions
            .read()
            .expect("session table poisoned")
            .get(client)
            .cloned()
    }
}

impl ServerInner {
    /// Session cleanup hook: runs in the actor task after its loop exits.
    fn cleanup(inner: Weak<Self>, client: String) {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner
            .sessions
            .write()
            .expect("session table poisoned")
            .remove(&client);
        inner.broker.deregister(&client);
        metrics::sessions_active().decrement(1.0);
        trace!(%client, "session cleaned up");
    }
}
