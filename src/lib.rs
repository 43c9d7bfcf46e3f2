pub mod lsp;

pub use lsp::{Call, Client, ClientConfig, Error, Event};
