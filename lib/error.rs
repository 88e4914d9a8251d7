use thiserror::Error;

/// Error type for all tracelink operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Custom error: {0}")]
    Custom(String),
    #[error("Failed to disassemble instruction at 0x{0:x}: {1}")]
    Disassembly(u64, Box<Error>),
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid memory access of {size} bytes at 0x{address:x}")]
    InvalidMemoryAccess { address: u64, size: usize },
    #[error("No context override is queued")]
    NoQueuedContext,
    #[error("Script file {0} can't be found")]
    ScriptNotFound(String),
    #[error("Failed to build semantics at 0x{0:x}: {1}")]
    Semantics(u64, Box<Error>),
}

impl From<&str> for Error {
    fn from(error: &str) -> Error {
        Error::Custom(error.to_string())
    }
}

impl From<String> for Error {
    fn from(error: String) -> Error {
        Error::Custom(error)
    }
}
