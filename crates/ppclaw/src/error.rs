use thiserror::Error;

/// Fatal errors that stop the connector.
///
/// Everything recoverable (discovery, transport, per-message processing) is
/// handled inside the supervisor and router and never surfaces here.
#[derive(Error, Debug)]
pub enum ConnectorError {
    /// Startup precondition failed.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// The bind-token exchange was rejected.
    #[error(transparent)]
    Binding(#[from] BindingError),
}

/// Invalid or missing configuration.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    /// Neither an API key nor a bind token is configured.
    #[error("no api_key and no bind_token configured")]
    MissingCredentials,
    /// A configuration value is out of bounds or malformed.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// The configuration file could not be written.
    #[error("failed to persist configuration: {0}")]
    Persist(String),
}

/// The relay directory could not be refreshed.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// The discovery endpoint could not be reached.
    #[error("discovery request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The discovery endpoint answered with a non-success status.
    #[error("discovery endpoint returned status {0}")]
    Status(u16),
    /// The body did not contain a relay list.
    #[error("malformed discovery payload: {0}")]
    Malformed(String),
}

/// The bind-token exchange failed permanently.
#[derive(Error, Debug)]
pub enum BindingError {
    /// The relay answered without an `api_key`.
    #[error("binding failed: {body}")]
    Rejected {
        /// Raw response body.
        body: String,
    },
}

/// A connection attempt or a live connection failed.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// WebSocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    /// HTTP transport error while talking to a relay.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    /// The upgrade request could not be built.
    #[error("invalid connection request: {0}")]
    InvalidRequest(String),
    /// An outbound frame could not be encoded.
    #[error("frame error: {0}")]
    Frame(#[from] ppclaw_common::FrameError),
}

/// The agent failed to process one message.
#[derive(Error, Debug)]
pub enum ProcessingError {
    /// The agent endpoint could not be reached.
    #[error("agent request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The agent endpoint answered with a non-success status.
    #[error("agent returned status {0}")]
    Status(u16),
    /// The agent answer could not be decoded.
    #[error("malformed agent response: {0}")]
    Malformed(String),
    /// The agent reported a failure.
    #[error("agent error: {0}")]
    Agent(String),
}

/// Input rejected at the notes storage boundary.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    /// The group id is not a hyphenated UUID.
    #[error("invalid group id: {0:?}")]
    InvalidGroupId(String),
    /// The notes namespace is not a safe path segment.
    #[error("invalid notes namespace: {0:?}")]
    InvalidNamespace(String),
    /// The notes document exceeds the size limit.
    #[error("notes too large: max {max} bytes, got {actual}")]
    TooLarge {
        /// Maximum allowed size in bytes.
        max: usize,
        /// Size of the rejected content in bytes.
        actual: usize,
    },
}

/// Notes storage failure.
#[derive(Error, Debug)]
pub enum NotesError {
    /// Rejected input.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Underlying I/O error.
    #[error("notes io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A tool invocation could not be carried out.
#[derive(Error, Debug)]
pub enum ToolError {
    /// The tool only works while a group message is being served.
    #[error("no group in scope for this invocation")]
    NoGroupScope,
    /// The tool name is not known.
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    /// The tool arguments are malformed.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    /// The notes store refused the operation.
    #[error(transparent)]
    Notes(#[from] NotesError),
}
