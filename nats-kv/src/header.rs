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

//! NATS [Message][crate::Message] headers and the well known header names used by
//! key-value and object buckets.

use std::{collections::HashMap, fmt, slice, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::status::StatusCode;

/// A multimap of NATS headers.
///
/// Header names are case sensitive, and every name can carry several values.
/// Lookups through [HeaderMap::get] return the whole set, while
/// [HeaderMap::get_last] returns the most recently appended value.
///
/// # Examples
///
/// ```
/// use nats_kv::header::{self, HeaderMap};
///
/// let mut headers = HeaderMap::new();
/// headers.insert(header::KV_OPERATION, "DEL");
/// assert_eq!(headers.get(header::KV_OPERATION).unwrap().as_str(), "DEL");
/// ```
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct HeaderMap {
    inner: HashMap<HeaderName, HeaderValue>,
}

impl FromIterator<(HeaderName, HeaderValue)> for HeaderMap {
    fn from_iter<T: IntoIterator<Item = (HeaderName, HeaderValue)>>(iter: T) -> Self {
        let mut header_map = HeaderMap::new();
        for (key, value) in iter {
            header_map.insert(key, value);
        }
        header_map
    }
}

impl HeaderMap {
    pub fn new() -> Self {
        HeaderMap::default()
    }

    pub fn iter(&self) -> std::collections::hash_map::Iter<'_, HeaderName, HeaderValue> {
        self.inner.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Replaces all values stored under `name`.
    pub fn insert<K: IntoHeaderName, V: IntoHeaderValue>(&mut self, name: K, value: V) {
        self.inner
            .insert(name.into_header_name(), value.into_header_value());
    }

    /// Adds a value to the set stored under `name`.
    pub fn append<K: IntoHeaderName, V: ToString>(&mut self, name: K, value: V) {
        let key = name.into_header_name();
        match self.inner.get_mut(&key) {
            Some(v) => v.value.push(value.to_string()),
            None => self.insert(key, value.to_string().as_str()),
        }
    }

    pub fn get<T: IntoHeaderName>(&self, name: T) -> Option<&HeaderValue> {
        self.inner.get(&name.into_header_name())
    }

    pub fn get_last<T: IntoHeaderName>(&self, name: T) -> Option<&str> {
        self.inner
            .get(&name.into_header_name())
            .and_then(|value| value.value.last())
            .map(|value| value.as_str())
    }

    pub fn remove<T: IntoHeaderName>(&mut self, name: T) -> Option<HeaderValue> {
        self.inner.remove(&name.into_header_name())
    }

    /// Encodes the map in the `NATS/1.0` wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![];
        buf.extend_from_slice(b"NATS/1.0\r\n");
        for (k, vs) in &self.inner {
            for v in vs.iter() {
                buf.extend_from_slice(k.as_str().as_bytes());
                buf.extend_from_slice(b": ");
                buf.extend_from_slice(v.as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
        }
        buf.extend_from_slice(b"\r\n");
        buf
    }
}

// Object metadata stores headers as a JSON map of name to values.
impl Serialize for HeaderMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(
            self.inner
                .iter()
                .map(|(name, value)| (name.as_str(), &value.value)),
        )
    }
}

impl<'de> Deserialize<'de> for HeaderMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = HashMap::<String, Vec<String>>::deserialize(deserializer)?;
        let mut headers = HeaderMap::new();
        for (name, values) in raw {
            let name = HeaderName::from_str(&name).map_err(serde::de::Error::custom)?;
            for value in values {
                headers.append(name.clone(), value);
            }
        }
        Ok(headers)
    }
}

/// Parsed `NATS/1.0` header block: the status line and the header map.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HeaderBlock {
    pub headers: HeaderMap,
    pub status: Option<StatusCode>,
    pub description: Option<String>,
}

/// Parses a raw header block, as found base64 encoded in stream API responses.
pub fn parse_headers(buf: &[u8]) -> Result<HeaderBlock, ParseError> {
    let text = std::str::from_utf8(buf).map_err(|_| ParseError)?;
    let mut lines = text.split("\r\n");

    let version_line = lines.next().ok_or(ParseError)?;
    let rest = version_line.strip_prefix("NATS/1.0").ok_or(ParseError)?;

    let mut block = HeaderBlock::default();
    let rest = rest.trim();
    if !rest.is_empty() {
        let (code, description) = match rest.split_once(' ') {
            Some((code, description)) => (code, Some(description.trim())),
            None => (rest, None),
        };
        block.status = Some(code.parse().map_err(|_| ParseError)?);
        block.description = description
            .filter(|description| !description.is_empty())
            .map(ToString::to_string);
    }

    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line.split_once(':').ok_or(ParseError)?;
        block
            .headers
            .append(HeaderName::from_str(name.trim())?, value.trim());
    }

    Ok(block)
}

/// All values set for a single header name.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct HeaderValue {
    value: Vec<String>,
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<HeaderValue> for String {
    fn from(header: HeaderValue) -> Self {
        header.to_string()
    }
}

impl From<&HeaderValue> for String {
    fn from(header: &HeaderValue) -> Self {
        header.to_string()
    }
}

impl<'a> From<&'a HeaderValue> for &'a str {
    fn from(header: &'a HeaderValue) -> Self {
        header.iter().next().map(|v| v.as_str()).unwrap_or("")
    }
}

impl FromStr for HeaderValue {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains(['\r', '\n']) {
            return Err(ParseError);
        }
        Ok(HeaderValue::from(s))
    }
}

impl From<u64> for HeaderValue {
    fn from(v: u64) -> Self {
        HeaderValue {
            value: vec![v.to_string()],
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(v: &str) -> Self {
        HeaderValue {
            value: vec![v.to_string()],
        }
    }
}

impl IntoIterator for HeaderValue {
    type Item = String;

    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.value.into_iter()
    }
}

impl HeaderValue {
    pub fn new() -> HeaderValue {
        HeaderValue::default()
    }

    pub fn iter(&self) -> slice::Iter<String> {
        self.value.iter()
    }

    /// Returns the first value.
    pub fn as_str(&self) -> &str {
        self.into()
    }
}

pub trait IntoHeaderName {
    fn into_header_name(self) -> HeaderName;
}

impl IntoHeaderName for &str {
    fn into_header_name(self) -> HeaderName {
        match StandardHeader::from_bytes(self.as_bytes()) {
            Some(standard) => HeaderName {
                inner: HeaderRepr::Standard(standard),
            },
            None => HeaderName {
                inner: HeaderRepr::Custom(self.to_string()),
            },
        }
    }
}

impl IntoHeaderName for HeaderName {
    fn into_header_name(self) -> HeaderName {
        self
    }
}

pub trait IntoHeaderValue {
    fn into_header_value(self) -> HeaderValue;
}

impl IntoHeaderValue for &str {
    fn into_header_value(self) -> HeaderValue {
        HeaderValue::from(self)
    }
}

impl IntoHeaderValue for String {
    fn into_header_value(self) -> HeaderValue {
        HeaderValue { value: vec![self] }
    }
}

impl IntoHeaderValue for u64 {
    fn into_header_value(self) -> HeaderValue {
        HeaderValue::from(self)
    }
}

impl IntoHeaderValue for HeaderValue {
    fn into_header_value(self) -> HeaderValue {
        self
    }
}

macro_rules! standard_headers {
    (
        $(
            $(#[$docs:meta])*
            ($variant:ident, $constant:ident, $name:literal);
        )+
    ) => {
        #[allow(clippy::enum_variant_names)]
        #[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
        enum StandardHeader {
            $(
                $variant,
            )+
        }

        $(
            $(#[$docs])*
            pub const $constant: HeaderName = HeaderName {
                inner: HeaderRepr::Standard(StandardHeader::$variant),
            };
        )+

        impl StandardHeader {
            #[inline]
            fn as_str(&self) -> &'static str {
                match *self {
                    $(
                    StandardHeader::$variant => $name,
                    )+
                }
            }

            fn from_bytes(bytes: &[u8]) -> Option<StandardHeader> {
                $(
                    if bytes == $name.as_bytes() {
                        return Some(StandardHeader::$variant);
                    }
                )+
                None
            }
        }

        #[cfg(test)]
        mod standard_header_tests {
            use super::HeaderName;
            use std::str::FromStr;

            const TEST_HEADERS: &[(&HeaderName, &str)] = &[
                $(
                (&super::$constant, $name),
                )+
            ];

            #[test]
            fn from_str() {
                for &(header, name) in TEST_HEADERS {
                    assert_eq!(HeaderName::from_str(name).unwrap(), *header);
                    assert_eq!(header.as_str(), name);
                }
            }
        }
    }
}

standard_headers! {
    /// Stream that stored a direct get response.
    (NatsStream, NATS_STREAM, "Nats-Stream");
    /// Stream sequence of a direct get response.
    (NatsSequence, NATS_SEQUENCE, "Nats-Sequence");
    /// Storage timestamp of a direct get response.
    (NatsTimeStamp, NATS_TIME_STAMP, "Nats-Time-Stamp");
    /// Original subject of a direct get response.
    (NatsSubject, NATS_SUBJECT, "Nats-Subject");
    (NatsMessageId, NATS_MESSAGE_ID, "Nats-Msg-Id");
    (NatsLastStream, NATS_LAST_STREAM, "Nats-Last-Stream");
    /// Last consumer sequence announced by an idle heartbeat.
    (NatsLastConsumer, NATS_LAST_CONSUMER, "Nats-Last-Consumer");
    (NatsLastSequence, NATS_LAST_SEQUENCE, "Nats-Last-Sequence");
    /// Per subject optimistic concurrency predicate.
    (NatsExpectedLastSubjectSequence, NATS_EXPECTED_LAST_SUBJECT_SEQUENCE, "Nats-Expected-Last-Subject-Sequence");
    /// Stream wide optimistic concurrency predicate.
    (NatsExpectedLastSequence, NATS_EXPECTED_LAST_SEQUENCE, "Nats-Expected-Last-Sequence");
    (NatsExpectedStream, NATS_EXPECTED_STREAM, "Nats-Expected-Stream");
    /// Rollup directive, `sub` discards all prior messages on the subject.
    (NatsRollup, NATS_ROLLUP, "Nats-Rollup");
    /// Payload size of a headers only delivery.
    (NatsMessageSize, NATS_MESSAGE_SIZE, "Nats-Msg-Size");
    /// Tombstone kind of a key-value entry.
    (KvOperation, KV_OPERATION, "KV-Operation");
}

#[derive(Debug, Hash, PartialEq, Eq, Clone)]
enum HeaderRepr {
    Standard(StandardHeader),
    Custom(String),
}

/// A header name, either one of the well known constants or a custom one.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct HeaderName {
    inner: HeaderRepr,
}

impl HeaderName {
    #[inline]
    pub fn as_str(&self) -> &str {
        match self.inner {
            HeaderRepr::Standard(v) => v.as_str(),
            HeaderRepr::Custom(ref v) => v.as_str(),
        }
    }
}

impl FromStr for HeaderName {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.contains([':', ' ', '\r', '\n']) {
            return Err(ParseError);
        }
        Ok(s.into_header_name())
    }
}

impl fmt::Display for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.as_str(), f)
    }
}

impl AsRef<[u8]> for HeaderName {
    fn as_ref(&self) -> &[u8] {
        self.as_str().as_bytes()
    }
}

impl AsRef<str> for HeaderName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[derive(Debug, Clone)]
pub struct ParseError;

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to parse header")
    }
}

impl std::error::Error for ParseError {}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    #[test]
    fn serde_as_json_map() {
        let headers: super::HeaderMap =
            serde_json::from_str(r#"{"Content-Type":["text/plain"],"X-Tag":["a","b"]}"#).unwrap();
        assert_eq!(headers.get_last("Content-Type"), Some("text/plain"));
        assert_eq!(headers.get("X-Tag").unwrap().iter().count(), 2);

        let encoded = serde_json::to_value(&headers).unwrap();
        assert_eq!(encoded["X-Tag"], serde_json::json!(["a", "b"]));
    }

    use super::*;

    #[test]
    fn append_keeps_every_value() {
        let mut headers = HeaderMap::new();
        headers.append(NATS_ROLLUP, "sub");
        headers.append(NATS_ROLLUP, "all");

        let values: Vec<&String> = headers.get(NATS_ROLLUP).unwrap().iter().collect();
        assert_eq!(values, vec!["sub", "all"]);
        assert_eq!(headers.get_last(NATS_ROLLUP), Some("all"));
        assert_eq!(headers.get(NATS_ROLLUP).unwrap().as_str(), "sub");
    }

    #[test]
    fn custom_names_resolve_to_constants() {
        let mut headers = HeaderMap::new();
        headers.insert("KV-Operation", "PURGE");
        assert_eq!(headers.get(KV_OPERATION).unwrap().as_str(), "PURGE");
    }

    #[test]
    fn rejects_values_with_line_breaks() {
        assert!(HeaderValue::from_str("a\r\nb").is_err());
        assert!(HeaderName::from_str("bad name").is_err());
    }

    #[test]
    fn parse_status_and_headers() {
        let block = parse_headers(b"NATS/1.0 404 Message Not Found\r\nNats-Stream: KV_test\r\n\r\n")
            .unwrap();
        assert_eq!(block.status, Some(StatusCode::NOT_FOUND));
        assert_eq!(block.description.as_deref(), Some("Message Not Found"));
        assert_eq!(block.headers.get_last(NATS_STREAM), Some("KV_test"));
    }

    #[test]
    fn encode_then_parse() {
        let mut headers = HeaderMap::new();
        headers.insert(KV_OPERATION, "DEL");
        headers.insert(NATS_EXPECTED_LAST_SUBJECT_SEQUENCE, 7u64);

        let block = parse_headers(&headers.to_bytes()).unwrap();
        assert!(block.status.is_none());
        assert_eq!(block.headers, headers);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_headers(b"HTTP/1.1 200 OK\r\n\r\n").is_err());
        assert!(parse_headers(b"NATS/1.0\r\nno-colon-here\r\n\r\n").is_err());
    }
}
