//! Language server protocol client transport.
//!
//! Wire framing lives in [`codec`], the child process in [`process`], and the
//! call/response bookkeeping in a background dispatcher owned by [`Client`].
pub mod call;
pub mod client;
pub mod codec;
pub mod config;
mod dispatcher;
pub mod error;
pub mod message;
pub mod process;

pub use call::Call;
pub use client::Client;
pub use codec::{FramedReader, FramedWriter, MessageReader, MessageWriter};
pub use config::ClientConfig;
pub use error::Error;
pub use message::{Event, Message, Notification, Request, Response, ResponseError};
pub use process::{ChildProcess, PipeConn};
