use crate::lsp::call::{self, Call};
use crate::lsp::codec::{FramedReader, FramedWriter, MessageReader, MessageWriter};
use crate::lsp::config::ClientConfig;
use crate::lsp::dispatcher::{read_loop, Dispatcher};
use crate::lsp::error::Error;
use crate::lsp::message::Event;
use crate::lsp::process::{ChildProcess, PipeConn};
use lsp_types::Url;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A JSON-RPC client bound to one peer for its whole lifetime.
///
/// Calls are submitted without blocking and completed by a background
/// dispatcher task; see [`Call::wait`]. Messages the peer starts on its own
/// arrive on the feed returned by [`Client::take_events`].
///
/// ```ignore
/// let client = Client::spawn("rust-analyzer", &[] as &[&str], ClientConfig::default())?;
/// let caps: serde_json::Value = client.request("initialize", &params).await?;
/// client.notify("initialized", &serde_json::json!({})).wait().await?;
/// client.close().await?;
/// ```
pub struct Client {
    submissions: mpsc::UnboundedSender<call::Submission>,
    events: Option<mpsc::Receiver<Event>>,
    write_closed: oneshot::Receiver<Result<(), Error>>,
    reader_task: JoinHandle<()>,
    dispatcher_task: JoinHandle<()>,
    process: Option<ChildProcess>,
    root_uri: Option<Url>,
}

impl Client {
    /// Start `program` and talk to it over its stdin/stdout.
    pub fn spawn<S: AsRef<str>>(
        program: &str,
        args: &[S],
        config: ClientConfig,
    ) -> Result<Self, Error> {
        let conn = PipeConn::open(program, args)?;
        let (reader, writer, process) = conn.into_split()?;
        let mut client = Client::with_parts(reader, writer, config);
        client.process = Some(process);
        Ok(client)
    }

    /// Talk to a peer over an already connected duplex stream.
    pub fn connect<S>(stream: S, config: ClientConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Client::with_parts(reader, writer, config)
    }

    pub fn with_parts<R, W>(reader: R, writer: W, config: ClientConfig) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let reader = FramedReader::new(reader).with_max_content_length(config.max_content_length);
        let writer = FramedWriter::new(writer);
        Client::with_transport(Box::new(reader), Box::new(writer), config)
    }

    /// Start the reader and dispatcher tasks over arbitrary message endpoints.
    pub fn with_transport(
        reader: Box<dyn MessageReader>,
        writer: Box<dyn MessageWriter>,
        config: ClientConfig,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity.max(1));
        let (submissions, submissions_rx) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::channel(config.event_capacity.max(1));
        let (write_closed_tx, write_closed) = oneshot::channel();

        let dispatcher = Dispatcher::new(
            writer,
            inbound_rx,
            submissions_rx,
            events_tx,
            write_closed_tx,
        );
        let reader_task = tokio::spawn(read_loop(reader, inbound_tx));
        let dispatcher_task = tokio::spawn(dispatcher.run());
        debug!("client started");

        Client {
            submissions,
            events: Some(events),
            write_closed,
            reader_task,
            dispatcher_task,
            process: None,
            root_uri: config.root_uri,
        }
    }

    /// Send a request; the handle completes with the peer's result decoded
    /// as `R`.
    pub fn call<R, P>(&self, method: &str, args: &P) -> Call<R>
    where
        R: DeserializeOwned + Send + 'static,
        P: Serialize + ?Sized,
    {
        self.submit(method, args, true)
    }

    /// Send a notification; the handle completes once it is written.
    pub fn notify<P>(&self, method: &str, args: &P) -> Call<()>
    where
        P: Serialize + ?Sized,
    {
        self.submit(method, args, false)
    }

    /// [`Client::call`] followed by [`Call::wait`].
    pub async fn request<R, P>(&self, method: &str, args: &P) -> Result<R, Error>
    where
        R: DeserializeOwned + Send + 'static,
        P: Serialize + ?Sized,
    {
        self.call(method, args).wait().await
    }

    /// Queue `method` for the dispatcher. With `expects_reply` unset the
    /// message goes out as a notification and the handle completes with
    /// `R` decoded from `null` once it is written.
    pub fn submit<R, P>(&self, method: &str, args: &P, expects_reply: bool) -> Call<R>
    where
        R: DeserializeOwned + Send + 'static,
        P: Serialize + ?Sized,
    {
        let (call, submission) = call::prepare(method, args, expects_reply);
        if let Some(submission) = submission {
            if let Err(mpsc::error::SendError(submission)) = self.submissions.send(submission) {
                (submission.complete)(Err(Error::ConnectionClosed));
            }
        }
        call
    }

    /// The feed of requests and notifications the peer sent unprompted.
    /// It can be taken once; it ends when the connection terminates.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<Event>> {
        self.events.take()
    }

    pub fn root_uri(&self) -> Option<&Url> {
        self.root_uri.as_ref()
    }

    /// Resolve `relative` against the root URI.
    pub fn document_uri(&self, relative: &str) -> Option<Url> {
        self.root_uri.as_ref()?.join(relative).ok()
    }

    /// Pid of the spawned peer, if this client owns one.
    pub fn process_id(&self) -> Option<u32> {
        self.process.as_ref().and_then(ChildProcess::id)
    }

    /// Stop taking submissions and tear the connection down: write side,
    /// read side, then the peer process if this client spawned it. Every
    /// step runs; the first failure is returned.
    pub async fn close(self) -> Result<(), Error> {
        let Client {
            submissions,
            write_closed,
            reader_task,
            dispatcher_task,
            process,
            ..
        } = self;
        let mut first: Option<Error> = None;

        // The dispatcher drains queued submissions, then closes its writer.
        drop(submissions);
        if let Ok(Err(e)) = write_closed.await {
            first.get_or_insert(e);
        }

        reader_task.abort();
        let _ = reader_task.await;

        if let Some(mut process) = process {
            info!(program = process.program(), "terminating peer process");
            if let Err(e) = process.terminate().await {
                first.get_or_insert(Error::Io(e));
            }
        }

        if let Err(e) = dispatcher_task.await {
            warn!(error = %e, "dispatcher task failed");
        }
        debug!("client closed");

        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
