// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bifrost_types::{Chain, KeysignError};

/// Metrics functionality
pub mod metric;
/// A module used for debugging the daemon lifecycle, sync state, or other
/// component state.
pub mod probe;
/// Retry functionality
pub mod retry;

/// Cosmos SDK code returned when a broadcast raced another one on the
/// same account sequence.
pub const CODE_UNAUTHORIZED: u32 = 4;

/// An enum of all possible errors that could be encountered during the
/// execution of the bridge daemon.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An Io error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// JSON Error occurred.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Config loading error.
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    /// Error while iterating over a glob pattern.
    #[error(transparent)]
    GlobPattern(#[from] glob::PatternError),
    /// Error from Glob Iterator.
    #[error(transparent)]
    Glob(#[from] glob::GlobError),
    /// Error while parsing a URL.
    #[error(transparent)]
    Url(#[from] url::ParseError),
    /// HTTP Error
    #[error(transparent)]
    Hyper(#[from] hyper::Error),
    /// Sled database error.
    #[error(transparent)]
    Sled(#[from] sled::Error),
    /// Reqwest error
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error(transparent)]
    PrometheusError(#[from] prometheus::Error),
    /// Invalid chain, asset, address or transaction id.
    #[error(transparent)]
    Types(#[from] bifrost_types::Error),
    /// The TSS engine failed to sign.
    #[error(transparent)]
    Keysign(#[from] KeysignError),
    /// Generic error.
    #[error("{}", _0)]
    Generic(&'static str),
    /// Error while parsing the config files.
    #[error("Config parse error: {}", _0)]
    ParseConfig(#[from] serde_path_to_error::Error<config::ConfigError>),
    /// Chain not configured or not enabled.
    #[error("Chain Not Found: {}", chain)]
    ChainNotFound {
        /// The chain.
        chain: Chain,
    },
    /// The requested block is not available yet.
    #[error("block is not available yet")]
    UnavailableBlock,
    /// A memo could not be parsed.
    #[error("invalid memo: {}", _0)]
    Memo(String),
    /// An address is not one of our vaults.
    #[error("{} is not a valid pool address", _0)]
    InvalidPoolAddress(String),
    /// Failed to encrypt a value.
    #[error("fail to encrypt")]
    Encryption,
    /// Failed to decrypt a value, wrong passphrase or corrupted data.
    #[error("fail to decrypt")]
    Decryption,
    /// This node is not an active validator.
    #[error("node is not active")]
    NotActive,
    /// The home chain is still catching up.
    #[error("thorchain is catching up")]
    CatchingUp,
    /// The home chain answered with an HTTP error.
    #[error("thorchain responded with {}: {}", status, body)]
    Bridge {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
    /// The home chain rejected a broadcast transaction.
    #[error("broadcast rejected with code {}: {}", code, log)]
    BroadcastRejected {
        /// Cosmos SDK response code.
        code: u32,
        /// Raw log.
        log: String,
    },
    /// The block scanner of a chain is unhealthy.
    #[error("the block scanner for chain {} is unhealthy", chain)]
    ScannerUnhealthy {
        /// The chain.
        chain: Chain,
    },
    /// A keysign did not complete in time.
    #[error("keysign timeout")]
    KeysignTimeout,
    /// A channel to another component was closed.
    #[error("channel closed: {}", _0)]
    ChannelClosed(&'static str),
    /// a background task failed and force restarted.
    #[error("Task Force Restarted from an error")]
    ForceRestart,
}

impl Error {
    /// Whether the error only means the block is not produced yet.
    pub fn is_unavailable_block(&self) -> bool {
        matches!(self, Error::UnavailableBlock)
    }

    /// Whether the error is a sequence collision with another validator
    /// broadcasting from the same account.
    pub fn is_sequence_collision(&self) -> bool {
        matches!(
            self,
            Error::BroadcastRejected {
                code: CODE_UNAUTHORIZED,
                ..
            }
        )
    }

    /// The keysign error, when this is one.
    pub fn as_keysign(&self) -> Option<&KeysignError> {
        match self {
            Error::Keysign(e) => Some(e),
            _ => None,
        }
    }
}

/// A type alias for the result for the bridge daemon, that uses the `Error`
/// enum.
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for HandlerError {
    fn from(value: Error) -> Self {
        HandlerError(StatusCode::INTERNAL_SERVER_ERROR, value.to_string())
    }
}

/// Error type for HTTP handlers
pub struct HandlerError(
    /// HTTP status code for response
    pub StatusCode,
    /// Response message
    pub String,
);

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        (self.0, self.1).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bifrost_types::Blame;

    #[test]
    fn classifies_errors() {
        let e = Error::BroadcastRejected {
            code: CODE_UNAUTHORIZED,
            log: "account sequence mismatch".into(),
        };
        assert!(e.is_sequence_collision());
        assert!(!Error::UnavailableBlock.is_sequence_collision());
        assert!(Error::UnavailableBlock.is_unavailable_block());

        let ks: Error = KeysignError::new(Blame::default()).into();
        assert!(ks.as_keysign().is_some());
    }
}
