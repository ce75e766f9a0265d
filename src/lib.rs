//! bayeux: a server-side implementation of the Bayeux v1.0 pub/sub protocol
//! over long-polling HTTP.
//!
//! Clients handshake to obtain an identity, subscribe to channel patterns,
//! and hold a `/meta/connect` poll open while the server accumulates
//! matching events; when events arrive or the hold budget elapses, the
//! server returns a batch and the client re-polls.
//!
//! ## Basic usage
//!
//! The [`Server`] type is the main type provided by this crate. It owns the
//! identity pool, the channel router, and one session actor per client, and
//! exposes the protocol verbs.
//!
//! ```no_run
//! use bayeux::{Config, Server};
//! use std::time::Duration;
//!
//! # fn test_fn() -> Server {
//! let server = Server::with_config(
//!     Config::default().with_max_session_idle(Duration::from_secs(120)),
//! );
//! # server
//! # }
//! ```
//!
//! The verbs can be driven directly when embedding the core without HTTP:
//!
//! ```no_run
//! # async fn _main(server: bayeux::Server) {
//! let publisher = server.handshake().unwrap();
//! let subscriber = server.handshake().unwrap();
//!
//! let mut poller = server.connect(&subscriber).await.unwrap();
//! let _ = server.subscribe(&subscriber, "/chat/**").await;
//!
//! let _ = server.publish(&publisher, "/chat/lobby", "hello").await;
//! let event = poller.recv().await.unwrap();
//! assert_eq!(event.data, "hello");
//! # }
//! ```
//!
//! ## Serving over HTTP
//!
//! When the `"axum"` feature flag is enabled (the default), the [`Server`]
//! provides `Server::into_axum(path: &str)` to instantiate a new
//! [`axum::Router`] serving the long-poll endpoint. You can then serve the
//! [`axum::Router`] as normal, or add additional routes to it.
//!
//! ```no_run
//! # #[cfg(feature = "axum")]
//! # {
//! # use bayeux::Server;
//! # async fn _main(server: Server) {
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//! axum::serve(listener, server.into_axum("/comet")).await.unwrap();
//! # }}
//! ```
//!
//! Request bodies are JSON arrays of protocol messages; each response is a
//! JSON array of event messages followed by one response object per request
//! message, in request order. Connect polls are held for at most half of
//! [`Config::max_session_idle`], and a burst is batched until it quiesces
//! for [`Config::quiescence`].
//!
//! [`axum::Router`]: https://docs.rs/axum/latest/axum/routing/struct.Router.html

#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    unreachable_pub,
    clippy::missing_const_for_fn,
    rustdoc::all
)]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![deny(unused_must_use, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

#[cfg(feature = "axum")]
mod axum;

mod broker;
pub use broker::Event;

mod ident;

mod metrics;

mod route;

mod server;
pub use server::{Config, Server};

mod session;

mod tasks;

pub mod types;
