use crate::{
    broker::Event,
    server::{Config, Server},
    types::{Advice, EventMessage, InboundBatch, MetaMessage, LONG_POLLING, VERSION},
};
use axum::{
    extract::FromRequest,
    http::{header, HeaderValue, StatusCode},
    response::IntoResponse,
};
use bytes::Bytes;
use serde::Serialize;
use std::{future::Future, pin::Pin};
use tokio::{sync::mpsc, time::Instant};
use tracing::{debug, trace};

/// The protocol pins the exact header, charset spelling included.
const CONTENT_TYPE_JSON: &str = "application/json;charset=UTF-8";

/// A wrapper around a [`Server`] that implements the
/// [`axum::handler::Handler`] trait. This struct is an implementation
/// detail of the [`Server::into_axum`] method.
#[derive(Debug, Clone)]
pub(crate) struct IntoAxum {
    pub(crate) server: Server,
}

impl Server {
    /// Instantiate a new [`axum::Router`] serving this server's long-poll
    /// endpoint at `path`.
    ///
    /// Only POST is routed; the body must be a JSON array of protocol
    /// messages. The response is a JSON array of event messages followed by
    /// one response object per request message, in request order.
    pub fn into_axum(self, path: &str) -> axum::Router<()> {
        axum::Router::new().route(path, axum::routing::post(IntoAxum { server: self }))
    }
}

impl<S> axum::handler::Handler<Bytes, S> for IntoAxum
where
    S: Clone + Send + Sync + 'static,
{
    type Future = Pin<Box<dyn Future<Output = axum::response::Response> + Send>>;

    fn call(self, req: axum::extract::Request, state: S) -> Self::Future {
        Box::pin(async move {
            let start = Instant::now();

            let Ok(bytes) = Bytes::from_request(req, &state).await else {
                return (StatusCode::BAD_REQUEST, "unable to read request body").into_response();
            };
            let batch = match InboundBatch::try_from(bytes) {
                Ok(batch) => batch,
                Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
            };

            let body = self.serve_batch(batch, start).await;
            let headers = [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(CONTENT_TYPE_JSON),
            )];
            (headers, body).into_response()
        })
    }
}

/// Response body element: events first, then per-request responses.
#[derive(Serialize)]
#[serde(untagged)]
enum Outbound {
    Event(EventMessage),
    Meta(MetaMessage),
}

impl IntoAxum {
    /// Dispatch every message in the batch, run the long-poll hold if the
    /// batch carried a connect, and serialize the reply.
    async fn serve_batch(&self, batch: InboundBatch, start: Instant) -> Vec<u8> {
        let cfg = *self.server.config();
        let timeout_ms = cfg.max_session_idle.as_millis() as u64;

        let mut responses: Vec<MetaMessage> = Vec::with_capacity(batch.len());
        let mut events: Vec<Event> = Vec::new();
        let mut hold: Option<(String, mpsc::Receiver<Event>)> = None;

        for message in batch.iter() {
            let mut response = MetaMessage::response_to(message);
            // a drained channel is pre-closed: buffered events, then None
            let mut drain: Option<mpsc::Receiver<Event>> = None;

            match message.channel.as_str() {
                "/meta/handshake" => {
                    response.advice = Some(Advice::retry(timeout_ms));
                    match self.server.handshake() {
                        Ok(client) => {
                            response.version = Some(VERSION.into());
                            response.supported_connection_types = vec![LONG_POLLING.into()];
                            response.client_id = Some(client);
                            response.successful = true;
                        }
                        Err(err) => response.error = Some(err.to_string()),
                    }
                }
                "/meta/connect" => match self.server.connect(message.client_id()).await {
                    // only one connect message may hold the poll
                    Some(rx) if hold.is_none() => {
                        hold = Some((message.client_id().to_owned(), rx));
                        response.successful = true;
                        response.advice = Some(Advice::retry(timeout_ms));
                    }
                    _ => {
                        debug!(client = message.client_id(), "connect refused");
                        response.advice = Some(Advice::rehandshake(timeout_ms));
                    }
                },
                "/meta/disconnect" => {
                    if let Some(rx) = self.server.disconnect(message.client_id()).await {
                        drain = Some(rx);
                        response.successful = true;
                    }
                }
                "/meta/subscribe" => {
                    response.subscription = message.subscription.clone();
                    let pattern = message.subscription.as_deref().unwrap_or_default();
                    if let Some(rx) = self.server.subscribe(message.client_id(), pattern).await {
                        drain = Some(rx);
                        response.successful = true;
                    }
                }
                "/meta/unsubscribe" => {
                    response.subscription = message.subscription.clone();
                    let pattern = message.subscription.as_deref().unwrap_or_default();
                    if let Some(rx) = self.server.unsubscribe(message.client_id(), pattern).await {
                        drain = Some(rx);
                        response.successful = true;
                    }
                }
                channel => match message.data.as_deref() {
                    Some(data) if !data.is_empty() => {
                        if message.client_id().is_empty() {
                            self.server.whisper(channel, data).await;
                            response.successful = true;
                        } else if let Some(rx) =
                            self.server.publish(message.client_id(), channel, data).await
                        {
                            drain = Some(rx);
                            response.successful = true;
                        }
                    }
                    _ => {
                        response.error = Some(format!("400:{channel}:Bad request"));
                    }
                },
            }

            if let Some(mut rx) = drain {
                while let Some(event) = rx.recv().await {
                    events.push(event);
                }
            }
            responses.push(response);
        }

        if let Some((client, rx)) = hold {
            self.hold_poll(&client, rx, start, &cfg, &mut events).await;
        }

        let mut body: Vec<Outbound> = Vec::with_capacity(events.len() + responses.len());
        body.extend(events.into_iter().map(|event| {
            Outbound::Event(EventMessage {
                channel: event.channel,
                data: event.data,
                id: None,
                client_id: None,
            })
        }));
        body.extend(responses.into_iter().map(Outbound::Meta));
        serde_json::to_vec(&body).expect("protocol messages serialize")
    }

    /// Hold the connect poller open: wait out the first event (or half the
    /// idle window), then keep draining until the burst quiesces or the
    /// deadline passes, then release the session and drain the closed
    /// channel dry.
    async fn hold_poll(
        &self,
        client: &str,
        mut rx: mpsc::Receiver<Event>,
        start: Instant,
        cfg: &Config,
        events: &mut Vec<Event>,
    ) {
        let deadline = start + cfg.max_session_idle / 2;
        let mut released = false;

        tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(event) => events.push(event),
                // closed under us: session ended or another connect owns it
                None => released = true,
            },
            _ = tokio::time::sleep_until(deadline) => {
                trace!(%client, "long poll released before first event");
                self.server.fail(client, None).await;
                released = true;
            }
        }

        loop {
            if released {
                // the output is closed or closing; drain what is buffered
                match rx.recv().await {
                    Some(event) => events.push(event),
                    None => break,
                }
                continue;
            }
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(event) => events.push(event),
                    None => break,
                },
                _ = tokio::time::sleep(cfg.quiescence) => {
                    self.server.fail(client, None).await;
                    released = true;
                }
                _ = tokio::time::sleep_until(deadline) => {
                    self.server.fail(client, None).await;
                    released = true;
                }
            }
        }
        debug!(%client, events = events.len(), "long poll finished");
    }
}
