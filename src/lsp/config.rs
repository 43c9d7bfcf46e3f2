use crate::lsp::codec::DEFAULT_MAX_CONTENT_LENGTH;
use lsp_types::Url;
use std::path::Path;

/// Tuning knobs for a [`Client`](crate::lsp::Client).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Peer-initiated messages buffered for the event consumer. Messages
    /// arriving while the buffer is full are dropped.
    pub event_capacity: usize,
    /// Decoded envelopes buffered between the reader task and the dispatcher.
    pub inbound_capacity: usize,
    pub max_content_length: usize,
    /// Workspace root as a `file://` URL, if one was set.
    pub root_uri: Option<Url>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            event_capacity: 10,
            inbound_capacity: 16,
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
            root_uri: None,
        }
    }
}

impl ClientConfig {
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn with_max_content_length(mut self, max_content_length: usize) -> Self {
        self.max_content_length = max_content_length;
        self
    }

    /// Resolve `dir` against the current directory and store it as the
    /// workspace root URI.
    pub fn with_root_dir(mut self, dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let dir = std::path::absolute(dir.as_ref())?;
        let url = Url::from_directory_path(&dir).map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("can't convert {} to a file URL", dir.display()),
            )
        })?;
        self.root_uri = Some(url);
        Ok(self)
    }
}
