//! `Content-Length` framing over any tokio byte stream.
//!
//! ```text
//! Content-Length: <n>\r\n
//! \r\n
//! <n bytes of JSON>
//! ```
use crate::lsp::error::Error;
use crate::lsp::message::Message;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::trace;

/// Largest body accepted by default (100MB).
pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 100 * 1024 * 1024;

const CONTENT_LENGTH: &str = "Content-Length";

/// Longest header line accepted, terminator included.
pub const MAX_HEADER_LINE: usize = 8 * 1024;

/// Source of decoded envelopes. The reader task is written against this.
#[async_trait]
pub trait MessageReader: Send {
    /// Returns `Ok(None)` when the peer closed the stream between messages.
    async fn read_message(&mut self) -> Result<Option<Message>, Error>;
}

/// Sink for envelopes. The dispatcher is written against this.
#[async_trait]
pub trait MessageWriter: Send {
    async fn write_message(&mut self, message: &Message) -> Result<(), Error>;

    /// Close the write side so a cooperative peer sees end of input.
    async fn close(&mut self) -> Result<(), Error>;
}

/// Serialize `message` and prepend its header block.
pub fn encode(message: &Message) -> Result<Vec<u8>, Error> {
    let body = serde_json::to_vec(message).map_err(Error::Encode)?;
    let mut frame = format!("{}: {}\r\n\r\n", CONTENT_LENGTH, body.len()).into_bytes();
    frame.extend_from_slice(&body);
    Ok(frame)
}

pub struct FramedReader<R> {
    reader: BufReader<R>,
    max_content_length: usize,
}

impl<R> FramedReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(reader: R) -> Self {
        FramedReader {
            reader: BufReader::new(reader),
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
        }
    }

    pub fn with_max_content_length(mut self, max_content_length: usize) -> Self {
        self.max_content_length = max_content_length;
        self
    }

    /// Read one raw body. `Ok(None)` means the stream ended cleanly before
    /// the first byte of a new message.
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, Error> {
        let mut content_length: Option<usize> = None;
        let mut line = Vec::new();
        let mut first_line = true;

        loop {
            line.clear();
            let n = (&mut self.reader)
                .take(MAX_HEADER_LINE as u64 + 1)
                .read_until(b'\n', &mut line)
                .await?;
            if n == 0 && first_line {
                return Ok(None);
            }
            if n > MAX_HEADER_LINE {
                return Err(Error::Framing(format!(
                    "header line longer than {} bytes",
                    MAX_HEADER_LINE
                )));
            }
            if n == 0 || !line.ends_with(b"\n") {
                return Err(Error::Framing(
                    "stream ended inside header block".to_string(),
                ));
            }
            first_line = false;

            let text = String::from_utf8_lossy(&line);
            let text = text.trim();
            if text.is_empty() {
                break;
            }
            // Unknown header lines, including ones without a colon, are skipped.
            let Some((name, value)) = text.split_once(':') else {
                continue;
            };
            if name.trim() == CONTENT_LENGTH {
                let value = value.trim();
                let parsed = value.parse::<usize>().map_err(|_| {
                    Error::Framing(format!("invalid Content-Length value: {}", value))
                })?;
                content_length = Some(parsed);
            }
        }

        let size = content_length
            .ok_or_else(|| Error::Framing("missing Content-Length header".to_string()))?;
        if size > self.max_content_length {
            return Err(Error::Framing(format!(
                "message size {} exceeds maximum {} bytes",
                size, self.max_content_length
            )));
        }

        let mut body = vec![0u8; size];
        self.reader.read_exact(&mut body).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::Framing(format!("stream ended inside a {}-byte body", size))
            } else {
                Error::Io(e)
            }
        })?;
        Ok(Some(body))
    }
}

#[async_trait]
impl<R> MessageReader for FramedReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn read_message(&mut self) -> Result<Option<Message>, Error> {
        let Some(body) = self.read_frame().await? else {
            return Ok(None);
        };
        trace!(body = %String::from_utf8_lossy(&body), "<-");
        let message = serde_json::from_slice(&body).map_err(Error::Decode)?;
        Ok(Some(message))
    }
}

pub struct FramedWriter<W> {
    writer: W,
}

impl<W> FramedWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        FramedWriter { writer }
    }
}

#[async_trait]
impl<W> MessageWriter for FramedWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write_message(&mut self, message: &Message) -> Result<(), Error> {
        let frame = encode(message)?;
        trace!(frame = %String::from_utf8_lossy(&frame), "->");
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), Error> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsp::message::{Request, Response, ResponseError};
    use lsp_types::NumberOrString;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::{json, Value};
    use tokio::io::duplex;

    async fn read_from(raw: &[u8]) -> Result<Option<Message>, Error> {
        let mut reader = FramedReader::new(raw);
        reader.read_message().await
    }

    #[test]
    fn test_encode_header_and_body() {
        let msg = Message::request(1, "ping", Value::Null);
        let frame = encode(&msg).unwrap();
        let body = r#"{"jsonrpc":"2.0","id":1,"method":"ping","params":null}"#;
        assert_eq!(
            String::from_utf8(frame).unwrap(),
            format!("Content-Length: {}\r\n\r\n{}", body.len(), body)
        );
    }

    #[tokio::test]
    async fn test_read_message_from_duplex() {
        let (a, b) = duplex(1024);
        let mut writer = FramedWriter::new(a);
        let mut reader = FramedReader::new(b);

        let sent = Message::notification("textDocument/publishDiagnostics", json!({"uri": "file:///a.rs"}));
        writer.write_message(&sent).await.unwrap();

        let received = reader.read_message().await.unwrap();
        assert_eq!(received, Some(sent));
    }

    #[tokio::test]
    async fn test_clean_eof_is_stream_closed() {
        assert!(read_from(b"").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_inside_header_is_framing_error() {
        let err = read_from(b"Content-Length: 10\r\n").await.unwrap_err();
        assert!(matches!(err, Error::Framing(_)), "got {:?}", err);

        let err = read_from(b"Content-Len").await.unwrap_err();
        assert!(matches!(err, Error::Framing(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_eof_inside_body_is_framing_error() {
        let err = read_from(b"Content-Length: 10\r\n\r\n{\"a\"")
            .await
            .unwrap_err();
        match err {
            Error::Framing(reason) => assert!(reason.contains("10-byte body")),
            other => panic!("expected framing error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_and_colonless_headers_are_skipped() {
        let body = r#"{"jsonrpc":"2.0","id":1,"result":"pong"}"#;
        let raw = format!(
            "Content-Type: application/vscode-jsonrpc; charset=utf-8\r\nX-Garbage\r\nContent-Length :  {} \r\n\r\n{}",
            body.len(),
            body
        );
        let msg = read_from(raw.as_bytes()).await.unwrap().unwrap();
        assert_eq!(
            msg,
            Message::Response(Response {
                id: Some(NumberOrString::Number(1)),
                outcome: Ok(json!("pong")),
            })
        );
    }

    #[tokio::test]
    async fn test_header_key_is_case_sensitive() {
        let raw = b"content-length: 2\r\n\r\n{}";
        let err = read_from(raw).await.unwrap_err();
        match err {
            Error::Framing(reason) => assert!(reason.contains("missing Content-Length")),
            other => panic!("expected framing error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_content_length() {
        let err = read_from(b"Content-Length: abc\r\n\r\n").await.unwrap_err();
        assert!(matches!(err, Error::Framing(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_oversized_message_is_rejected() {
        let raw = b"Content-Length: 4096\r\n\r\n";
        let mut reader = FramedReader::new(&raw[..]).with_max_content_length(1024);
        let err = reader.read_message().await.unwrap_err();
        match err {
            Error::Framing(reason) => assert!(reason.contains("exceeds maximum")),
            other => panic!("expected framing error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_endless_header_line_is_rejected_early() {
        let noise = vec![b'A'; 8 * 1024 * 1024];
        let mut reader = FramedReader::new(&noise[..]).with_max_content_length(1024);
        let err = reader.read_message().await.unwrap_err();
        match err {
            Error::Framing(reason) => assert!(reason.contains("header line longer"), "{}", reason),
            other => panic!("expected framing error, got {:?}", other),
        }
        // Only one capped line was pulled off the stream.
        let consumed = noise.len() - reader.reader.get_ref().len();
        assert!(consumed <= MAX_HEADER_LINE + 1 + 8192, "consumed {} bytes", consumed);
    }

    #[tokio::test]
    async fn test_header_line_at_the_limit_is_accepted() {
        let body = "{}";
        let mut header = String::from("X-Pad: ");
        header.push_str(&"p".repeat(MAX_HEADER_LINE - header.len() - 2));
        header.push_str("\r\n");
        assert_eq!(header.len(), MAX_HEADER_LINE);
        let raw = format!("{}Content-Length: {}\r\n\r\n{}", header, body.len(), body);
        let err = read_from(raw.as_bytes()).await.unwrap_err();
        // The padded line is fine; the empty object then fails only as an envelope.
        assert!(matches!(err, Error::Decode(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_invalid_json_body_is_decode_error() {
        let raw = b"Content-Length: 5\r\n\r\nnope!";
        let err = read_from(raw).await.unwrap_err();
        assert!(matches!(err, Error::Decode(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_decode_error_keeps_framing_in_sync() {
        let good = r#"{"jsonrpc":"2.0","method":"exit"}"#;
        let raw = format!(
            "Content-Length: 5\r\n\r\nnope!Content-Length: {}\r\n\r\n{}",
            good.len(),
            good
        );
        let mut reader = FramedReader::new(raw.as_bytes());
        assert!(matches!(reader.read_message().await, Err(Error::Decode(_))));
        assert_eq!(
            reader.read_message().await.unwrap(),
            Some(Message::notification("exit", Value::Null))
        );
        assert!(reader.read_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let (a, b) = duplex(64);
        drop(b);
        let mut writer = FramedWriter::new(a);
        let err = writer
            .write_message(&Message::notification("exit", Value::Null))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_stream_of_mixed_messages_round_trips() {
        let sent = vec![
            Message::Request(Request {
                id: NumberOrString::Number(i32::MAX),
                method: "textDocument/hover".to_string(),
                params: json!({"position": {"line": 0, "character": 4}}),
            }),
            Message::Request(Request {
                id: NumberOrString::String("srv-7".to_string()),
                method: "workspace/configuration".to_string(),
                params: json!({"items": [{"section": "gopls"}]}),
            }),
            Message::notification("$/progress", json!({"token": "t", "value": {"kind": "end"}})),
            Message::notification("exit", Value::Null),
            Message::Response(Response {
                id: Some(NumberOrString::Number(3)),
                outcome: Ok(Value::Null),
            }),
            Message::Response(Response {
                id: Some(NumberOrString::Number(4)),
                outcome: Ok(json!(["ünïcödé", "\r\n", {"nested": [1, 2.5, null]}])),
            }),
            Message::Response(Response {
                id: None,
                outcome: Err(ResponseError {
                    code: -32700,
                    message: "parse error".to_string(),
                    data: None,
                }),
            }),
            Message::Response(Response {
                id: Some(NumberOrString::Number(5)),
                outcome: Err(ResponseError {
                    code: -32603,
                    message: "internal".to_string(),
                    data: Some(Value::Null),
                }),
            }),
        ];

        let mut raw = Vec::new();
        for msg in &sent {
            raw.extend(encode(msg).unwrap());
        }
        let mut reader = FramedReader::new(&raw[..]);
        for msg in sent {
            assert_eq!(reader.read_message().await.unwrap(), Some(msg));
        }
        assert!(reader.read_message().await.unwrap().is_none());
    }

    fn json_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            ".{0,12}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-zA-Z_$]{0,6}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    fn call_id() -> impl Strategy<Value = NumberOrString> {
        prop_oneof![
            any::<i32>()
                .prop_filter("zero means no reply", |n| *n != 0)
                .prop_map(NumberOrString::Number),
            "[a-z0-9-]{1,8}".prop_map(NumberOrString::String),
        ]
    }

    fn message() -> impl Strategy<Value = Message> {
        let method = "[a-z$]{1,8}(/[a-zA-Z]{1,8})?";
        let response_error = (any::<i64>(), ".{0,16}", prop::option::of(json_value()))
            .prop_map(|(code, message, data)| ResponseError { code, message, data });
        prop_oneof![
            (call_id(), method, json_value())
                .prop_map(|(id, method, params)| Message::Request(Request { id, method, params })),
            (method, json_value()).prop_map(|(method, params)| Message::notification(method, params)),
            (
                prop::option::of(call_id()),
                prop_oneof![
                    json_value().prop_map(Ok::<Value, ResponseError>),
                    response_error.prop_map(Err::<Value, ResponseError>),
                ]
            )
                .prop_map(|(id, outcome)| Message::Response(Response { id, outcome })),
        ]
    }

    proptest! {
        #[test]
        fn test_any_envelope_survives_framing(msg in message()) {
            let frame = encode(&msg).unwrap();
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let decoded = rt.block_on(read_from(&frame)).unwrap();
            prop_assert_eq!(decoded, Some(msg));
        }
    }
}
