use serde::{Deserialize, Serialize};

/// JSON body returned by the hub for rejected requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            status: "error".to_string(),
            code: code.to_string(),
            message: message.to_string(),
        }
    }

    /// Short human-readable form, e.g. for a client log line.
    pub fn summary(&self) -> String {
        format!("{}: {}", self.code, self.message)
    }
}
