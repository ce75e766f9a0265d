/// Error when decoding an inbound message batch.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// The body was not valid JSON, or not an array of protocol messages.
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// The batch decoded but contained no messages.
    #[error("found no message")]
    Empty,
}

/// The identity generator collided with live identities beyond its retry
/// budget.
#[derive(Debug, Copy, Clone, thiserror::Error)]
#[error("unable to obtain new unique ID, try again later")]
pub struct IdentExhausted;

/// A routing rule handle no longer resident in the router.
///
/// Internal only: logged when a stale handle is removed twice, never
/// surfaced to clients.
#[derive(Debug, Copy, Clone, thiserror::Error)]
#[error("rule is not found")]
pub struct RuleNotFound;
