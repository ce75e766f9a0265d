//! Core protocol types, like [`MetaMessage`] and [`EventMessage`].

mod batch;
pub use batch::InboundBatch;

mod error;
pub use error::{BatchError, IdentExhausted, RuleNotFound};

mod msg;
pub use msg::{
    Advice, EventMessage, MetaMessage, DEFAULT_INTERVAL, LONG_POLLING, MINIMUM_VERSION, VERSION,
};
