use thiserror::Error;

/// Error kinds surfaced at the HTTP boundary.
///
/// Every inner crate defines its own narrower error type and converts
/// into this one at the seam where it meets an HTTP handler; nothing
/// downstream of the state-machine apply path is allowed to throw
/// across it.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("current node is not the leader")]
    NotLeader,

    #[error("no route: {0}")]
    NoRoute(String),

    #[error("upstream request failed: {0}")]
    UpstreamFail(String),

    #[error("fatal initialization error: {0}")]
    FatalInit(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl CoreError {
    /// HTTP status code this error maps to.
    pub fn status_code(&self) -> u16 {
        match self {
            CoreError::BadRequest(_) | CoreError::NotLeader => 400,
            CoreError::NoRoute(_) => 503,
            CoreError::UpstreamFail(_) => 500,
            CoreError::FatalInit(_) => 500,
            CoreError::Io(_) => 500,
            CoreError::Serde(_) => 400,
        }
    }
}
