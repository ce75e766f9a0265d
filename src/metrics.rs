use metrics::{counter, gauge, Counter, Gauge};
use std::sync::LazyLock;

/// Metric name for counting issued identities.
pub(crate) const SERVER_HANDSHAKES: &str = "bayeux.server.handshakes";
pub(crate) const SERVER_HANDSHAKES_HELP: &str =
    "Number of handshakes that issued a client identity.";

/// Metric name for counting accepted connect requests.
pub(crate) const SERVER_CONNECTS: &str = "bayeux.server.connects";
pub(crate) const SERVER_CONNECTS_HELP: &str =
    "Number of connect requests that attached a poller to a live session.";

/// Metric name for counting published events.
pub(crate) const SERVER_PUBLISHES: &str = "bayeux.server.publishes";
pub(crate) const SERVER_PUBLISHES_HELP: &str =
    "Number of events accepted for broadcast, whispers included.";

/// Metric name for counting requests naming a dead or unknown identity.
pub(crate) const SERVER_UNKNOWN_CLIENTS: &str = "bayeux.server.unknown_clients";
pub(crate) const SERVER_UNKNOWN_CLIENTS_HELP: &str =
    "Number of protocol calls rejected because the client identity was not live.";

/// Metric name for tracking live sessions.
pub(crate) const SESSIONS_ACTIVE: &str = "bayeux.sessions.active";
pub(crate) const SESSIONS_ACTIVE_HELP: &str = "Number of live session actors.";

static DESCRIBE: LazyLock<()> = LazyLock::new(|| {
    metrics::describe_counter!(
        SERVER_HANDSHAKES,
        metrics::Unit::Count,
        SERVER_HANDSHAKES_HELP
    );
    metrics::describe_counter!(SERVER_CONNECTS, metrics::Unit::Count, SERVER_CONNECTS_HELP);
    metrics::describe_counter!(
        SERVER_PUBLISHES,
        metrics::Unit::Count,
        SERVER_PUBLISHES_HELP
    );
    metrics::describe_counter!(
        SERVER_UNKNOWN_CLIENTS,
        metrics::Unit::Count,
        SERVER_UNKNOWN_CLIENTS_HELP
    );
    metrics::describe_gauge!(SESSIONS_ACTIVE, metrics::Unit::Count, SESSIONS_ACTIVE_HELP);
});

/// Get or register the handshake counter.
pub(crate) fn handshakes() -> Counter {
    let _ = &DESCRIBE;
    counter!(SERVER_HANDSHAKES)
}

/// Get or register the connect counter.
pub(crate) fn connects() -> Counter {
    let _ = &DESCRIBE;
    counter!(SERVER_CONNECTS)
}

/// Get or register the publish counter.
pub(crate) fn publishes() -> Counter {
    let _ = &DESCRIBE;
    counter!(SERVER_PUBLISHES)
}

/// Get or register the unknown-client counter.
pub(crate) fn unknown_clients() -> Counter {
    let _ = &DESCRIBE;
    counter!(SERVER_UNKNOWN_CLIENTS)
}

/// Get or register the live-session gauge.
pub(crate) fn sessions_active() -> Gauge {
    let _ = &DESCRIBE;
    gauge!(SESSIONS_ACTIVE)
}
