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

use crate::header::HeaderMap;
use crate::status::StatusCode;
use bytes::Bytes;

/// A message received from a [Transport][crate::client::Transport].
#[derive(Debug, Clone, Default)]
pub struct Message {
    pub subject: String,
    pub reply: Option<String>,
    pub payload: Bytes,
    pub headers: Option<HeaderMap>,
    /// Status of a control message (heartbeat, no responders, ...).
    pub status: Option<StatusCode>,
    pub description: Option<String>,
}

impl Message {
    pub fn new(subject: impl Into<String>, payload: Bytes) -> Message {
        Message {
            subject: subject.into(),
            payload,
            ..Default::default()
        }
    }

    pub(crate) fn with_status(
        subject: impl Into<String>,
        status: StatusCode,
        description: &str,
    ) -> Message {
        Message {
            subject: subject.into(),
            status: Some(status),
            description: Some(description.to_string()),
            ..Default::default()
        }
    }

    pub(crate) fn header(&self, name: crate::header::HeaderName) -> Option<&str> {
        self.headers
            .as_ref()
            .and_then(|headers| headers.get_last(name))
    }
}
