pub mod error_codes;
pub mod routes;
pub mod types;

use serde::Deserialize;

/// Standard response envelope. `code == "0000"` means success; any other
/// code is a domain error carried as data, never a panic.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    pub code: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
}

pub const SUCCESS_CODE: &str = "0000";

impl<T> Envelope<T> {
    pub fn is_success(&self) -> bool {
        self.code == SUCCESS_CODE
    }
}
