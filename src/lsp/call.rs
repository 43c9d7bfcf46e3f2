use crate::lsp::error::Error;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;

/// Invoked by the dispatcher exactly once per submission. For calls that
/// expect a reply it receives the peer's result; otherwise `Value::Null`
/// after the write succeeded.
pub(crate) type Completer = Box<dyn FnOnce(Result<Value, Error>) + Send>;

/// What a caller hands to the dispatcher.
pub(crate) struct Submission {
    pub method: String,
    pub params: Value,
    pub expects_reply: bool,
    pub complete: Completer,
}

/// Handle to one outstanding request or notification.
///
/// The dispatcher completes it exactly once; [`Call::wait`] consumes the
/// handle, so it can be waited on at most once.
#[must_use = "a call does nothing useful unless it is waited on"]
pub struct Call<R> {
    method: String,
    done: oneshot::Receiver<Result<R, Error>>,
}

impl<R> std::fmt::Debug for Call<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Call").field("method", &self.method).finish()
    }
}

impl<R> Call<R> {
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Suspend until the call completes. A dispatcher that went away without
    /// completing the call reports `ConnectionClosed`.
    pub async fn wait(self) -> Result<R, Error> {
        self.done.await.unwrap_or(Err(Error::ConnectionClosed))
    }
}

/// Build the handle and, unless `args` fails to serialize, the submission
/// that will complete it. Decoding the reply into `R` happens inside the
/// completer, so it runs on the dispatcher.
pub(crate) fn prepare<R, P>(
    method: &str,
    args: &P,
    expects_reply: bool,
) -> (Call<R>, Option<Submission>)
where
    R: DeserializeOwned + Send + 'static,
    P: Serialize + ?Sized,
{
    let (tx, rx) = oneshot::channel();
    let call = Call {
        method: method.to_string(),
        done: rx,
    };

    let params = match serde_json::to_value(args) {
        Ok(params) => params,
        Err(e) => {
            let _ = tx.send(Err(Error::Encode(e)));
            return (call, None);
        }
    };

    let complete: Completer = Box::new(move |outcome: Result<Value, Error>| {
        let reply = outcome.and_then(|v| serde_json::from_value::<R>(v).map_err(Error::Decode));
        // The caller may have dropped its handle; nobody is left to tell.
        let _ = tx.send(reply);
    });

    let submission = Submission {
        method: method.to_string(),
        params,
        expects_reply,
        complete,
    };
    (call, Some(submission))
}
