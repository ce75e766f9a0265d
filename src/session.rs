use crate::{broker::Event, tasks::TaskSet};
use std::{collections::VecDeque, time::Duration};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

/// Default cap on undelivered events buffered per session.
pub(crate) const MAILBOX_SIZE: usize = 1000;

/// Handle to a per-client session actor.
///
/// The actor serializes everything that touches a client's delivery state:
/// upstream events from the broker, poller attach requests, pushback after a
/// failed delivery, explicit close, and the idle deadline. Callers talk to
/// it over a control channel; every operation on a session that has already
/// terminated degrades to a pre-closed channel rather than an error.
#[derive(Debug, Clone)]
pub(crate) struct Session {
    control: mpsc::Sender<Command>,
}

enum Command {
    Attach {
        connect: bool,
        resp: oneshot::Sender<mpsc::Receiver<Event>>,
    },
    Fail {
        pushback: Option<Event>,
    },
    Close {
        resp: oneshot::Sender<mpsc::Receiver<Event>>,
    },
}

/// A receiver whose sender is already gone: reads drain nothing and report
/// closed. Signals "another connect owns the session" to the caller.
fn closed_channel() -> mpsc::Receiver<Event> {
    let (_tx, rx) = mpsc::channel(1);
    rx
}

impl Session {
    /// Spawn the actor for `client` on `tasks`. `cleanup` runs in the actor
    /// task after the loop exits, whatever the reason for termination.
    pub(crate) fn spawn(
        client: String,
        inbound: mpsc::Receiver<Event>,
        idle: Duration,
        mailbox_size: usize,
        cleanup: impl FnOnce() + Send + 'static,
        tasks: &TaskSet,
    ) -> Self {
        let (control, commands) = mpsc::channel(8);
        let actor = Actor {
            client,
            inbound,
            commands,
            idle,
            mailbox_size,
            mailbox: VecDeque::new(),
            output: None,
        };
        tasks.spawn(async move {
            actor.run().await;
            cleanup();
        });
        Self { control }
    }

    /// Obtain a delivery channel. A `connect` attach stays open for future
    /// events; a noop attach drains the mailbox and is returned pre-closed.
    /// While a connect poller is attached, any further attach gets a
    /// pre-closed empty channel.
    pub(crate) async fn attach(&self, connect: bool) -> mpsc::Receiver<Event> {
        let (resp, rx) = oneshot::channel();
        if self
            .control
            .send(Command::Attach { connect, resp })
            .await
            .is_err()
        {
            return closed_channel();
        }
        rx.await.unwrap_or_else(|_| closed_channel())
    }

    /// Detach the current poller. A pushed-back in-flight event goes to the
    /// front of the mailbox, making it the next event observed.
    pub(crate) async fn fail(&self, pushback: Option<Event>) {
        let _ = self.control.send(Command::Fail { pushback }).await;
    }

    /// Terminate the session. The returned channel flushes whatever the
    /// mailbox still held, in order, then reports closed.
    pub(crate) async fn close(&self) -> mpsc::Receiver<Event> {
        let (resp, rx) = oneshot::channel();
        if self.control.send(Command::Close { resp }).await.is_err() {
            return closed_channel();
        }
        rx.await.unwrap_or_else(|_| closed_channel())
    }
}

struct Actor {
    client: String,
    inbound: mpsc::Receiver<Event>,
    commands: mpsc::Receiver<Command>,
    idle: Duration,
    mailbox_size: usize,
    mailbox: VecDeque<Event>,
    output: Option<mpsc::Sender<Event>>,
}

/// Reserve a delivery slot on the attached poller, or park forever when no
/// poller is attached. Owning a sender clone keeps the future detached from
/// the actor's state.
async fn reserve(
    output: Option<mpsc::Sender<Event>>,
) -> Result<mpsc::OwnedPermit<Event>, mpsc::error::SendError<()>> {
    match output {
        Some(tx) => tx.reserve_owned().await,
        None => std::future::pending().await,
    }
}

impl Actor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                // inbound first: events already queued when a control
                // message lands are observed before it takes effect
                biased;

                maybe = self.inbound.recv() => match maybe {
                    Some(event) => self.buffer(event),
                    None => {
                        debug!(client = %self.client, "session upstream closed");
                        break;
                    }
                },

                cmd = self.commands.recv() => match cmd {
                    Some(Command::Attach { connect, resp }) => self.attach(connect, resp),
                    Some(Command::Fail { pushback }) => self.fail(pushback),
                    Some(Command::Close { resp }) => {
                        debug!(client = %self.client, "session closed");
                        self.flush(resp);
                        break;
                    }
                    // every handle dropped, the server is gone
                    None => break,
                },

                permit = reserve(self.output.clone()),
                    if self.output.is_some() && !self.mailbox.is_empty() =>
                {
                    match permit {
                        Ok(permit) => {
                            if let Some(event) = self.mailbox.pop_front() {
                                trace!(client = %self.client, channel = %event.channel, "event delivered");
                                let _ = permit.send(event);
                            }
                        }
                        // poller receiver dropped without a release
                        Err(_) => self.output = None,
                    }
                }

                _ = tokio::time::sleep(self.idle) => {
                    debug!(client = %self.client, "session idle deadline elapsed");
                    break;
                }
            }
        }
        // dropping `output` closes any still-attached poller channel
    }

    fn attach(&mut self, connect: bool, resp: oneshot::Sender<mpsc::Receiver<Event>>) {
        if self.output.is_some() {
            // an active connect poller already owns the session
            let _ = resp.send(closed_channel());
            return;
        }

        let (tx, rx) = mpsc::channel(self.mailbox.len().max(1));
        for event in self.mailbox.drain(..) {
            // capacity covers the whole mailbox
            let _ = tx.try_send(event);
        }
        if connect {
            trace!(client = %self.client, "connect poller attached");
            self.output = Some(tx);
        }
        // for a noop attach the sender drops here: the caller drains the
        // buffered events and then unblocks on the closed channel
        let _ = resp.send(rx);
    }

    fn fail(&mut self, pushback: Option<Event>) {
        if let Some(event) = pushback {
            self.mailbox.push_front(event);
        }
        self.output = None;
    }

    fn buffer(&mut self, event: Event) {
        self.mailbox.push_back(event);
        if self.mailbox.len() > self.mailbox_size {
            // drop-oldest overflow policy
            self.mailbox.pop_front();
        }
    }

    fn flush(&mut self, resp: oneshot::Sender<mpsc::Receiver<Event>>) {
        self.output = None;
        let (tx, rx) = mpsc::channel(self.mailbox.len().max(1));
        for event in self.mailbox.drain(..) {
            let _ = tx.try_send(event);
        }
        let _ = resp.send(rx);
    }
}
