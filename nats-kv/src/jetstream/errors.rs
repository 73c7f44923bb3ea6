// Copyright 2020-2024 The NATS Authors
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

use std::{error, fmt};

use serde::{Deserialize, Serialize};

/// Server side JetStream error code.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Deserialize, Serialize)]
pub struct ErrorCode(pub(crate) u64);

impl ErrorCode {
    /// Bad request
    pub const BAD_REQUEST: ErrorCode = ErrorCode(10003);

    /// Consumer not found
    pub const CONSUMER_NOT_FOUND: ErrorCode = ErrorCode(10014);

    /// No message found
    pub const NO_MESSAGE_FOUND: ErrorCode = ErrorCode(10037);

    /// Stream message exceeds maximum size
    pub const STREAM_MESSAGE_EXCEEDS_MAXIMUM: ErrorCode = ErrorCode(10054);

    /// Stream name already in use with a different configuration
    pub const STREAM_NAME_EXIST: ErrorCode = ErrorCode(10058);

    /// Stream not found
    pub const STREAM_NOT_FOUND: ErrorCode = ErrorCode(10059);

    /// Subjects overlap with the subjects of another stream
    pub const STREAM_SUBJECT_OVERLAP: ErrorCode = ErrorCode(10065);

    /// Wrong last sequence
    pub const STREAM_WRONG_LAST_SEQUENCE: ErrorCode = ErrorCode(10071);

    /// Expected stream does not match
    pub const STREAM_NOT_MATCH: ErrorCode = ErrorCode(10060);

    /// Message delete is not permitted by stream configuration
    pub const STREAM_DELETE_DENIED: ErrorCode = ErrorCode(10050);

    /// Invalid stream configuration
    pub const STREAM_INVALID_CONFIG: ErrorCode = ErrorCode(10052);

    /// Resource limits exceeded for stream
    pub const STREAM_STORE_FAILED: ErrorCode = ErrorCode(10077);

    /// Invalid operation on sealed stream
    pub const STREAM_SEALED: ErrorCode = ErrorCode(10109);

    /// Maximum bytes exceeded, discarding new messages
    pub const STREAM_MAXIMUM_BYTES_EXCEEDED: ErrorCode = ErrorCode(10164);

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// `Error` type returned from an API response when an error occurs.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Error {
    code: usize,
    err_code: ErrorCode,
    description: Option<String>,
}

impl Error {
    pub(crate) fn new(code: usize, err_code: ErrorCode, description: impl Into<String>) -> Error {
        Error {
            code,
            err_code,
            description: Some(description.into()),
        }
    }

    /// Returns the status code associated with this error
    pub fn code(&self) -> usize {
        self.code
    }

    /// Returns the server side error code associated with this error.
    pub fn error_code(&self) -> ErrorCode {
        self.err_code
    }

    pub fn kind(&self) -> ErrorCode {
        self.err_code
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            fmt,
            "{} (code {}, error code {})",
            self.description.as_deref().unwrap_or("unknown"),
            self.code,
            self.err_code.0,
        )
    }
}

impl error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize() {
        let error: Error = serde_json::from_str(
            r#"{"code":400,"err_code":10071,"description":"wrong last sequence: 3"}"#,
        )
        .unwrap();
        assert_eq!(error.kind(), ErrorCode::STREAM_WRONG_LAST_SEQUENCE);
        assert_eq!(error.code(), 400);
        assert_eq!(
            error.to_string(),
            "wrong last sequence: 3 (code 400, error code 10071)"
        );
    }
}
