//! The task that owns the stream's write side and the pending-call table.
//!
//! Two inputs feed it: envelopes decoded by the reader task, and submissions
//! from callers. Nothing else touches the table or writes to the stream, so
//! no locks are needed anywhere.
use crate::lsp::call::{Completer, Submission};
use crate::lsp::codec::{MessageReader, MessageWriter};
use crate::lsp::error::Error;
use crate::lsp::message::{Event, Message, Response};
use lsp_types::NumberOrString;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

struct PendingCall {
    method: String,
    complete: Completer,
}

pub(crate) struct Dispatcher {
    writer: Option<Box<dyn MessageWriter>>,
    inbound: mpsc::Receiver<Message>,
    submissions: mpsc::UnboundedReceiver<Submission>,
    events: mpsc::Sender<Event>,
    write_closed: Option<oneshot::Sender<Result<(), Error>>>,
    pending: HashMap<i32, PendingCall>,
    last_id: i32,
    reader_done: bool,
}

impl Dispatcher {
    pub(crate) fn new(
        writer: Box<dyn MessageWriter>,
        inbound: mpsc::Receiver<Message>,
        submissions: mpsc::UnboundedReceiver<Submission>,
        events: mpsc::Sender<Event>,
        write_closed: oneshot::Sender<Result<(), Error>>,
    ) -> Self {
        Dispatcher {
            writer: Some(writer),
            inbound,
            submissions,
            events,
            write_closed: Some(write_closed),
            pending: HashMap::new(),
            last_id: 0,
            reader_done: false,
        }
    }

    /// Service both inputs until each is exhausted. Dropping `self` at the
    /// end closes the event feed.
    pub(crate) async fn run(mut self) {
        let mut submissions_open = true;
        loop {
            tokio::select! {
                msg = self.inbound.recv(), if !self.reader_done => match msg {
                    Some(msg) => self.handle_inbound(msg),
                    None => {
                        self.reader_done = true;
                        self.fail_pending();
                    }
                },
                sub = self.submissions.recv(), if submissions_open => match sub {
                    Some(sub) => self.handle_submission(sub).await,
                    None => {
                        submissions_open = false;
                        self.close_writer().await;
                    }
                },
                else => break,
            }
        }
        debug!("dispatcher terminated");
    }

    fn handle_inbound(&mut self, msg: Message) {
        match msg {
            Message::Request(r) => self.forward(Event::Request(r)),
            Message::Notification(n) => self.forward(Event::Notification(n)),
            Message::Response(r) => self.complete_response(r),
        }
    }

    // Never waits for the consumer: a full feed loses the event, not a reply.
    fn forward(&self, event: Event) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                debug!(method = event.method(), "event feed full, dropping message")
            }
            Err(TrySendError::Closed(event)) => {
                trace!(method = event.method(), "event feed closed, dropping message")
            }
        }
    }

    fn complete_response(&mut self, response: Response) {
        let Some(NumberOrString::Number(id)) = response.id else {
            debug!(id = ?response.id, "dropping response without a call id");
            return;
        };
        let Some(call) = self.pending.remove(&id) else {
            debug!(id, "dropping response for unknown call id");
            return;
        };
        trace!(id, method = %call.method, "completing call");
        (call.complete)(response.outcome.map_err(Error::Protocol));
    }

    async fn handle_submission(&mut self, sub: Submission) {
        let Submission {
            method,
            params,
            expects_reply,
            complete,
        } = sub;

        // Nothing can answer once the reader is gone.
        if expects_reply && self.reader_done {
            complete(Err(Error::ConnectionClosed));
            return;
        }
        let id = if expects_reply {
            Some(next_id(&mut self.last_id, &self.pending))
        } else {
            None
        };
        let Some(writer) = self.writer.as_mut() else {
            complete(Err(Error::ConnectionClosed));
            return;
        };

        let message = match id {
            Some(id) => Message::request(id, method.as_str(), params),
            None => Message::notification(method.as_str(), params),
        };

        if let Err(e) = writer.write_message(&message).await {
            warn!(%method, error = %e, "can't write message");
            complete(Err(e));
            return;
        }

        match id {
            Some(id) => {
                self.pending.insert(id, PendingCall { method, complete });
            }
            None => complete(Ok(Value::Null)),
        }
    }

    fn fail_pending(&mut self) {
        if !self.pending.is_empty() {
            debug!(
                count = self.pending.len(),
                "stream closed with calls outstanding"
            );
        }
        for (id, call) in self.pending.drain() {
            trace!(id, method = %call.method, "failing call");
            (call.complete)(Err(Error::ConnectionClosed));
        }
    }

    async fn close_writer(&mut self) {
        let result = match self.writer.take() {
            Some(mut writer) => writer.close().await,
            None => Ok(()),
        };
        if let Some(tx) = self.write_closed.take() {
            let _ = tx.send(result);
        }
    }
}

/// Next positive id not held by an outstanding call.
fn next_id(last_id: &mut i32, pending: &HashMap<i32, PendingCall>) -> i32 {
    loop {
        *last_id = if *last_id == i32::MAX { 1 } else { *last_id + 1 };
        if !pending.contains_key(last_id) {
            return *last_id;
        }
    }
}

/// Decode envelopes and push them to the dispatcher until the stream ends.
pub(crate) async fn read_loop(mut reader: Box<dyn MessageReader>, inbound: mpsc::Sender<Message>) {
    loop {
        match reader.read_message().await {
            Ok(Some(msg)) => {
                if inbound.send(msg).await.is_err() {
                    return;
                }
            }
            Ok(None) => {
                debug!("peer closed the stream");
                return;
            }
            // The frame was consumed whole, so the stream is still in sync.
            Err(Error::Decode(e)) => {
                warn!(error = %e, "skipping undecodable message");
            }
            Err(e) => {
                warn!(error = %e, "stopped reading from peer");
                return;
            }
        }
    }
}
