use std::{io, path::PathBuf};

use fileshare_core::CoreError;
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("failed to build http client: {0}")]
    Build(#[source] reqwest::Error),
    #[error("server responded {status} to {endpoint}: {body}")]
    Server {
        endpoint: String,
        status: StatusCode,
        body: String,
    },
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("no file selected")]
    NoFileSelected,
    #[error("no file pending upload")]
    NoUploadCandidate,
    #[error("failed to read {}: {source}", path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to save {}: {source}", path.display())]
    SaveFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ClientError {
    /// Text shown to the user: the server's own error payload when it sent one.
    pub fn server_text(&self) -> String {
        match self {
            ClientError::Server { body, .. } if !body.trim().is_empty() => body.clone(),
            ClientError::Server { status, .. } => status.to_string(),
            ClientError::Transport { source, .. } | ClientError::Decode { source, .. } => {
                source.to_string()
            }
            other => other.to_string(),
        }
    }
}
