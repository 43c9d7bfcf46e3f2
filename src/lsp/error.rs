use crate::lsp::message::ResponseError;
use thiserror::Error;

/// Everything that can go wrong between a caller and the peer.
///
/// Per-call failures (`Encode`, `Decode`, `Protocol`) only ever reach the
/// handle that caused them. Stream failures (`Framing`, `Io`) end the
/// connection, after which outstanding calls observe `ConnectionClosed`.
#[derive(Debug, Error)]
pub enum Error {
    /// The peer process or one of its pipes could not be created.
    #[error("can't start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A header block or body was malformed or cut short.
    #[error("framing error: {0}")]
    Framing(String),

    /// A body was not valid JSON for the expected shape.
    #[error("can't decode: {0}")]
    Decode(#[source] serde_json::Error),

    /// An outgoing payload could not be serialized.
    #[error("can't encode: {0}")]
    Encode(#[source] serde_json::Error),

    /// The peer answered with a JSON-RPC error object.
    #[error("peer error {0}")]
    Protocol(ResponseError),

    /// Reading from or writing to the stream failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream closed before a reply arrived, or the dispatcher is gone.
    #[error("connection closed")]
    ConnectionClosed,
}

impl From<ResponseError> for Error {
    fn from(err: ResponseError) -> Self {
        Error::Protocol(err)
    }
}

impl Error {
    /// The peer's error object, when this failure came from the peer.
    pub fn response_error(&self) -> Option<&ResponseError> {
        match self {
            Error::Protocol(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Protocol(ResponseError {
            code: -32601,
            message: "method not found".to_string(),
            data: None,
        });
        assert_eq!(err.to_string(), "peer error -32601: method not found");

        let err = Error::Framing("missing Content-Length header".to_string());
        assert_eq!(
            err.to_string(),
            "framing error: missing Content-Length header"
        );

        assert_eq!(Error::ConnectionClosed.to_string(), "connection closed");
    }

    #[test]
    fn test_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.response_error().is_none());
    }
}
