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

//! Status codes carried in the `NATS/1.0 <code> <description>` header line.

use std::fmt;
use std::num::NonZeroU16;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidStatusCode;

impl fmt::Display for InvalidStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid status code")
    }
}

impl std::error::Error for InvalidStatusCode {}

/// A NATS status code in the range 100-999.
///
/// ```
/// use nats_kv::StatusCode;
///
/// assert_eq!(StatusCode::from_u16(404).unwrap(), StatusCode::NOT_FOUND);
/// assert!(StatusCode::from_u16(1000).is_err());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StatusCode(NonZeroU16);

impl StatusCode {
    pub const IDLE_HEARTBEAT: StatusCode = StatusCode(new_nonzero_u16(100));
    pub const OK: StatusCode = StatusCode(new_nonzero_u16(200));
    pub const BAD_REQUEST: StatusCode = StatusCode(new_nonzero_u16(400));
    pub const NOT_FOUND: StatusCode = StatusCode(new_nonzero_u16(404));
    pub const TIMEOUT: StatusCode = StatusCode(new_nonzero_u16(408));
    pub const REQUEST_TERMINATED: StatusCode = StatusCode(new_nonzero_u16(409));
    pub const NO_RESPONDERS: StatusCode = StatusCode(new_nonzero_u16(503));

    #[inline]
    pub fn from_u16(src: u16) -> Result<StatusCode, InvalidStatusCode> {
        if !(100..1000).contains(&src) {
            return Err(InvalidStatusCode);
        }
        NonZeroU16::new(src)
            .map(StatusCode)
            .ok_or(InvalidStatusCode)
    }

    #[inline]
    pub fn as_u16(&self) -> u16 {
        self.0.get()
    }

    /// Heartbeats and flow control requests.
    #[inline]
    pub fn is_informational(&self) -> bool {
        (100..200).contains(&self.0.get())
    }

    #[inline]
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.0.get())
    }

    #[inline]
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.0.get())
    }
}

impl fmt::Debug for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.get())
    }
}

impl PartialEq<u16> for StatusCode {
    #[inline]
    fn eq(&self, other: &u16) -> bool {
        self.as_u16() == *other
    }
}

impl From<StatusCode> for u16 {
    #[inline]
    fn from(status: StatusCode) -> u16 {
        status.0.get()
    }
}

impl FromStr for StatusCode {
    type Err = InvalidStatusCode;

    fn from_str(s: &str) -> Result<StatusCode, InvalidStatusCode> {
        if s.len() != 3 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(InvalidStatusCode);
        }
        s.parse::<u16>()
            .map_err(|_| InvalidStatusCode)
            .and_then(StatusCode::from_u16)
    }
}

impl TryFrom<u16> for StatusCode {
    type Error = InvalidStatusCode;

    #[inline]
    fn try_from(t: u16) -> Result<Self, Self::Error> {
        StatusCode::from_u16(t)
    }
}

// `Option::unwrap` is not usable in const context on older toolchains.
const fn new_nonzero_u16(n: u16) -> NonZeroU16 {
    match NonZeroU16::new(n) {
        Some(d) => d,
        None => panic!("invalid non-zero u16"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse() {
        assert_eq!("503".parse::<StatusCode>().unwrap(), StatusCode::NO_RESPONDERS);
        assert!("50".parse::<StatusCode>().is_err());
        assert!("09x".parse::<StatusCode>().is_err());
        assert!("099".parse::<StatusCode>().is_err());
    }

    #[test]
    fn classes() {
        assert!(StatusCode::IDLE_HEARTBEAT.is_informational());
        assert!(StatusCode::TIMEOUT.is_client_error());
        assert!(StatusCode::NO_RESPONDERS.is_server_error());
        assert_eq!(StatusCode::NOT_FOUND, 404);
    }
}
