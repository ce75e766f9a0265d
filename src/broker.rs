use crate::route::{ChannelRouter, RuleId};
use std::{collections::HashMap, sync::RwLock};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// A text event flowing from a publisher to the subscribers of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// The channel the event was published to.
    pub channel: String,
    /// The event payload.
    pub data: String,
}

/// Transmits events between clients through subscribed channels.
///
/// Owns the per-client inbound queues and the [`ChannelRouter`]. Rule
/// handles are recorded per `(client, channel)` so a deregister or an
/// unsubscribe can retract exactly the rules the client installed.
#[derive(Debug)]
pub(crate) struct Broker {
    inner: RwLock<Inner>,
    router: ChannelRouter,
}

#[derive(Debug)]
struct Inner {
    clients: HashMap<String, mpsc::Sender<Event>>,
    rules: HashMap<String, HashMap<String, RuleId>>,
}

impl Broker {
    pub(crate) fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                clients: HashMap::new(),
                rules: HashMap::new(),
            }),
            router: ChannelRouter::new(),
        }
    }

    /// Register a client and obtain its inbound queue. A stale entry for
    /// the same identity is replaced.
    pub(crate) fn register(&self, client: &str) -> mpsc::Receiver<Event> {
        // capacity 1: the queue is a hand-off, backpressured by the session
        let (tx, rx) = mpsc::channel(1);
        let mut inner = self.inner.write().expect("broker lock poisoned");
        inner.clients.insert(client.to_owned(), tx);
        inner.rules.entry(client.to_owned()).or_default();
        rx
    }

    /// Drop a client's queue and retract every rule it installed.
    pub(crate) fn deregister(&self, client: &str) {
        let mut inner = self.inner.write().expect("broker lock poisoned");
        inner.clients.remove(client);
        let rules = inner.rules.remove(client).unwrap_or_default();
        drop(inner);

        for (channel, rule) in rules {
            if self.router.remove(rule).is_err() {
                debug!(%client, %channel, "rule already retracted");
            }
        }
        trace!(%client, "client deregistered");
    }

    /// Subscribe the client to a channel pattern. No-op when the client is
    /// not registered.
    pub(crate) fn subscribe(&self, client: &str, channel: &str) {
        if !self.has_client(client) {
            return;
        }
        let rule = self.router.add(channel, client);

        let mut inner = self.inner.write().expect("broker lock poisoned");
        let stale = match inner.rules.get_mut(client) {
            // a re-subscribe normally dedupes to the same handle; retract
            // the old rule if it somehow differs so nothing is leaked
            Some(rules) => match rules.insert(channel.to_owned(), rule) {
                Some(old) if old != rule => Some(old),
                _ => None,
            },
            // deregistered while we were installing the rule
            None => Some(rule),
        };
        drop(inner);

        if let Some(old) = stale {
            if self.router.remove(old).is_err() {
                debug!(%client, %channel, "rule already retracted");
            }
        }
    }

    /// Unsubscribe the client from a channel pattern. False when the client
    /// is unknown or was not subscribed.
    pub(crate) fn unsubscribe(&self, client: &str, channel: &str) -> bool {
        let mut inner = self.inner.write().expect("broker lock poisoned");
        let Some(rule) = inner
            .rules
            .get_mut(client)
            .and_then(|rules| rules.remove(channel))
        else {
            return false;
        };
        drop(inner);

        if self.router.remove(rule).is_err() {
            debug!(%client, %channel, "rule already retracted");
        }
        true
    }

    /// Fan an event out to every subscriber matching `channel`.
    ///
    /// The sender snapshot is taken under the read lock and the sends happen
    /// after it is released, so a concurrent deregister cannot deadlock
    /// against a slow subscriber. A queue whose session has ended aborts the
    /// fan-out for that subscriber only.
    pub(crate) async fn broadcast(&self, channel: &str, data: &str) {
        let subscribers = self.router.resolve(channel);
        if subscribers.is_empty() {
            return;
        }

        let targets: Vec<(String, mpsc::Sender<Event>)> = {
            let inner = self.inner.read().expect("broker lock poisoned");
            subscribers
                .into_iter()
                .filter_map(|id| inner.clients.get(&id).map(|tx| (id, tx.clone())))
                .collect()
        };

        for (client, tx) in targets {
            let event = Event {
                channel: channel.to_owned(),
                data: data.to_owned(),
            };
            if tx.send(event).await.is_err() {
                debug!(%client, %channel, "subscriber gone, event dropped");
            }
        }
    }

    fn has_client(&self, client: &str) -> bool {
        self.inner
            .read()
            .expect("broker lock poisoned")
            .clients
            .contains_key(client)
    }
}
