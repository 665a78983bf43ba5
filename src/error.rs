use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("invalid accession: {0}")]
    InvalidAccession(String),

    #[error("unsupported accession namespace: {0}")]
    UnsupportedNamespace(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config value: {0}")]
    InvalidConfig(String),

    #[error("failed to read accession list at {0}")]
    InputRead(PathBuf),

    #[error("NCBI request failed: {0}")]
    NcbiHttp(String),

    #[error("NCBI returned status {status}: {message}")]
    NcbiStatus { status: u16, message: String },

    #[error("EBI request failed: {0}")]
    EbiHttp(String),

    #[error("EBI returned status {status}: {message}")]
    EbiStatus { status: u16, message: String },

    #[error("malformed {source_name} response: {message}")]
    MalformedResponse {
        source_name: &'static str,
        message: String,
    },

    #[error("cache error: {0}")]
    Cache(String),
}

impl KiraError {
    /// Errors worth another attempt: transport failures, retryable statuses and
    /// bodies that did not decode.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            KiraError::NcbiHttp(_)
                | KiraError::NcbiStatus { .. }
                | KiraError::EbiHttp(_)
                | KiraError::EbiStatus { .. }
                | KiraError::MalformedResponse { .. }
        )
    }

    pub fn malformed(source_name: &'static str, message: impl Into<String>) -> Self {
        KiraError::MalformedResponse {
            source_name,
            message: message.into(),
        }
    }
}
