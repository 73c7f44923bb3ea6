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

//! Message storage of a single in-memory stream.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use bytes::Bytes;
use time::OffsetDateTime;
use tracing::trace;

use crate::header::{self, HeaderMap};
use crate::jetstream::consumer;
use crate::jetstream::errors::{Error as ApiError, ErrorCode};
use crate::jetstream::publish::PublishAck;
use crate::jetstream::stream::{
    Config, DiscardPolicy, Info, PurgeRequest, PurgeResponse, State, StreamGetMessage,
};
use crate::subject::subject_matches;
use crate::Message;

use super::consumer::PushConsumer;

const DEFAULT_DUPLICATE_WINDOW: Duration = Duration::from_secs(2 * 60);

#[derive(Debug, Clone)]
pub(crate) struct StoredMessage {
    pub(crate) subject: String,
    pub(crate) headers: Option<HeaderMap>,
    pub(crate) payload: Bytes,
    pub(crate) time: OffsetDateTime,
}

impl StoredMessage {
    fn size(&self) -> u64 {
        let headers = self
            .headers
            .as_ref()
            .map(|headers| headers.to_bytes().len())
            .unwrap_or_default();
        (self.subject.len() + headers + self.payload.len()) as u64
    }
}

fn sealed() -> ApiError {
    ApiError::new(400, ErrorCode::STREAM_SEALED, "invalid operation on sealed stream")
}

fn no_message() -> ApiError {
    ApiError::new(404, ErrorCode::NO_MESSAGE_FOUND, "no message found")
}

pub(crate) struct MemoryStream {
    pub(crate) config: Config,
    created: OffsetDateTime,
    pub(crate) messages: BTreeMap<u64, StoredMessage>,
    last_sequence: u64,
    last_time: OffsetDateTime,
    bytes: u64,
    message_ids: HashMap<String, (u64, OffsetDateTime)>,
    pub(crate) consumers: BTreeMap<String, PushConsumer>,
}

impl MemoryStream {
    pub(crate) fn new(mut config: Config) -> MemoryStream {
        if config.subjects.is_empty() {
            config.subjects = vec![config.name.clone()];
        }
        MemoryStream {
            config,
            created: OffsetDateTime::now_utc(),
            messages: BTreeMap::new(),
            last_sequence: 0,
            last_time: OffsetDateTime::UNIX_EPOCH,
            bytes: 0,
            message_ids: HashMap::new(),
            consumers: BTreeMap::new(),
        }
    }

    pub(crate) fn captures(&self, subject: &str) -> bool {
        self.config
            .subjects
            .iter()
            .any(|pattern| subject_matches(pattern, subject))
    }

    pub(crate) fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    pub(crate) fn info(&mut self) -> Info {
        self.expire();

        let (first_sequence, first_timestamp) = match self.messages.iter().next() {
            Some((sequence, message)) => (*sequence, message.time),
            None => (self.last_sequence + 1, OffsetDateTime::UNIX_EPOCH),
        };
        let mut subjects: Vec<&str> = self
            .messages
            .values()
            .map(|message| message.subject.as_str())
            .collect();
        subjects.sort_unstable();
        subjects.dedup();

        Info {
            config: self.config.clone(),
            created: self.created,
            state: State {
                messages: self.messages.len() as u64,
                bytes: self.bytes,
                first_sequence,
                first_timestamp,
                last_sequence: self.last_sequence,
                last_timestamp: self.last_time,
                consumer_count: self.consumers.len(),
                subjects_count: subjects.len() as u64,
            },
        }
    }

    /// Replaces the configuration, trimming stored messages to the new limits.
    pub(crate) fn update(&mut self, mut config: Config) -> Result<Info, ApiError> {
        if self.config.sealed {
            return Err(sealed());
        }
        if config.storage != self.config.storage {
            return Err(ApiError::new(
                500,
                ErrorCode::STREAM_INVALID_CONFIG,
                "stream configuration update can not change storage type",
            ));
        }
        if config.subjects.is_empty() {
            config.subjects = vec![config.name.clone()];
        }
        self.config = config;

        let subjects: Vec<String> = self
            .messages
            .values()
            .map(|message| message.subject.clone())
            .collect();
        for subject in subjects {
            self.trim_subject(&subject);
        }
        self.trim_old();
        Ok(self.info())
    }

    fn last_for_subject(&self, subject: &str) -> Option<u64> {
        self.messages
            .iter()
            .rev()
            .find(|(_, message)| subject_matches(subject, &message.subject))
            .map(|(sequence, _)| *sequence)
    }

    /// Stores a published message, enforcing the optimistic concurrency
    /// headers and the limits of the stream.
    pub(crate) fn store(&mut self, message: &Message) -> Result<PublishAck, ApiError> {
        self.expire();
        let name = self.config.name.clone();

        if self.config.sealed {
            return Err(sealed());
        }

        let headers = message.headers.as_ref();
        let get = |name: header::HeaderName| headers.and_then(|headers| headers.get_last(name));

        if let Some(expected) = get(header::NATS_EXPECTED_STREAM) {
            if expected != name {
                return Err(ApiError::new(
                    400,
                    ErrorCode::STREAM_NOT_MATCH,
                    "expected stream does not match",
                ));
            }
        }

        if let Some(expected) = get(header::NATS_EXPECTED_LAST_SEQUENCE) {
            let expected = parse_sequence(expected)?;
            if expected != self.last_sequence {
                return Err(ApiError::new(
                    400,
                    ErrorCode::STREAM_WRONG_LAST_SEQUENCE,
                    format!("wrong last sequence: {}", self.last_sequence),
                ));
            }
        }

        if let Some(expected) = get(header::NATS_EXPECTED_LAST_SUBJECT_SEQUENCE) {
            let expected = parse_sequence(expected)?;
            let last = self
                .messages
                .iter()
                .rev()
                .find(|(_, stored)| stored.subject == message.subject)
                .map(|(sequence, _)| *sequence)
                .unwrap_or_default();
            if expected != last {
                return Err(ApiError::new(
                    400,
                    ErrorCode::STREAM_WRONG_LAST_SEQUENCE,
                    format!("wrong last sequence: {}", last),
                ));
            }
        }

        let rollup = match get(header::NATS_ROLLUP) {
            Some(_) if !self.config.allow_rollup => {
                return Err(ApiError::new(
                    400,
                    ErrorCode::BAD_REQUEST,
                    "rollup not permitted",
                ));
            }
            Some("sub") => Some(Rollup::Subject),
            Some("all") => Some(Rollup::All),
            Some(other) => {
                return Err(ApiError::new(
                    400,
                    ErrorCode::BAD_REQUEST,
                    format!("rollup value invalid: {}", other),
                ));
            }
            None => None,
        };

        let now = OffsetDateTime::now_utc();
        let window = if self.config.duplicate_window.is_zero() {
            DEFAULT_DUPLICATE_WINDOW
        } else {
            self.config.duplicate_window
        };
        self.message_ids.retain(|_, (_, time)| now - *time < window);
        if let Some(id) = get(header::NATS_MESSAGE_ID) {
            if let Some((sequence, _)) = self.message_ids.get(id) {
                return Ok(PublishAck {
                    stream: name,
                    sequence: *sequence,
                    domain: String::new(),
                    duplicate: true,
                });
            }
        }

        let stored = StoredMessage {
            subject: message.subject.clone(),
            headers: message.headers.clone().filter(|headers| !headers.is_empty()),
            payload: message.payload.clone(),
            time: now,
        };
        let size = stored.size();

        if self.config.max_message_size > 0
            && message.payload.len() > self.config.max_message_size as usize
        {
            return Err(ApiError::new(
                400,
                ErrorCode::STREAM_MESSAGE_EXCEEDS_MAXIMUM,
                "message size exceeds maximum allowed",
            ));
        }
        if self.config.discard == DiscardPolicy::New && rollup.is_none() {
            if self.config.max_messages > 0
                && self.messages.len() as i64 >= self.config.max_messages
            {
                return Err(ApiError::new(
                    503,
                    ErrorCode::STREAM_STORE_FAILED,
                    "maximum messages exceeded",
                ));
            }
            if self.config.max_bytes > 0 && (self.bytes + size) as i64 > self.config.max_bytes {
                return Err(ApiError::new(
                    503,
                    ErrorCode::STREAM_STORE_FAILED,
                    "maximum bytes exceeded",
                ));
            }
        }

        self.last_sequence += 1;
        self.last_time = now;
        let sequence = self.last_sequence;
        if let Some(id) = get(header::NATS_MESSAGE_ID) {
            self.message_ids.insert(id.to_string(), (sequence, now));
        }
        let subject = stored.subject.clone();
        self.bytes += size;
        self.messages.insert(sequence, stored);
        trace!("stored {} on {} at {}", subject, name, sequence);

        match rollup {
            Some(Rollup::Subject) => {
                let rolled: Vec<u64> = self
                    .messages
                    .range(..sequence)
                    .filter(|(_, message)| message.subject == subject)
                    .map(|(sequence, _)| *sequence)
                    .collect();
                self.remove_all(rolled);
            }
            Some(Rollup::All) => {
                let rolled: Vec<u64> = self.messages.range(..sequence).map(|(s, _)| *s).collect();
                self.remove_all(rolled);
            }
            None => self.trim_subject(&subject),
        }
        self.trim_old();

        Ok(PublishAck {
            stream: name,
            sequence,
            domain: String::new(),
            duplicate: false,
        })
    }

    fn remove(&mut self, sequence: u64) -> bool {
        match self.messages.remove(&sequence) {
            Some(message) => {
                self.bytes -= message.size();
                true
            }
            None => false,
        }
    }

    fn remove_all(&mut self, sequences: Vec<u64>) -> u64 {
        sequences
            .into_iter()
            .filter(|sequence| self.remove(*sequence))
            .count() as u64
    }

    /// Keeps at most `max_messages_per_subject` messages on `subject`.
    fn trim_subject(&mut self, subject: &str) {
        let limit = self.config.max_messages_per_subject;
        if limit <= 0 {
            return;
        }
        let sequences: Vec<u64> = self
            .messages
            .iter()
            .filter(|(_, message)| message.subject == subject)
            .map(|(sequence, _)| *sequence)
            .collect();
        let excess = sequences.len().saturating_sub(limit as usize);
        self.remove_all(sequences.into_iter().take(excess).collect());
    }

    /// Drops the oldest messages while the stream is over its message or
    /// byte limits.
    fn trim_old(&mut self) {
        loop {
            let over_messages = self.config.max_messages > 0
                && self.messages.len() as i64 > self.config.max_messages;
            let over_bytes = self.config.max_bytes > 0 && self.bytes as i64 > self.config.max_bytes;
            if !over_messages && !over_bytes {
                return;
            }
            match self.messages.keys().next().copied() {
                Some(first) => {
                    self.remove(first);
                }
                None => return,
            }
        }
    }

    /// Removes messages older than `max_age`.
    fn expire(&mut self) {
        if self.config.max_age.is_zero() {
            return;
        }
        let cutoff = OffsetDateTime::now_utc() - self.config.max_age;
        let expired: Vec<u64> = self
            .messages
            .iter()
            .take_while(|(_, message)| message.time < cutoff)
            .map(|(sequence, _)| *sequence)
            .collect();
        if !expired.is_empty() {
            trace!("expiring {} messages of {}", expired.len(), self.config.name);
            self.remove_all(expired);
        }
    }

    pub(crate) fn get(
        &mut self,
        request: &StreamGetMessage,
    ) -> Result<(u64, &StoredMessage), ApiError> {
        self.expire();
        let sequence = match (request.sequence, request.last_by_subject.as_deref()) {
            (Some(sequence), None) => sequence,
            (None, Some(subject)) => self.last_for_subject(subject).ok_or_else(no_message)?,
            _ => {
                return Err(ApiError::new(
                    400,
                    ErrorCode::BAD_REQUEST,
                    "bad request",
                ))
            }
        };
        self.messages
            .get(&sequence)
            .map(|message| (sequence, message))
            .ok_or_else(no_message)
    }

    pub(crate) fn delete_message(&mut self, sequence: u64) -> Result<(), ApiError> {
        if self.config.sealed {
            return Err(sealed());
        }
        if self.config.deny_delete {
            return Err(ApiError::new(
                400,
                ErrorCode::STREAM_DELETE_DENIED,
                "message delete not permitted",
            ));
        }
        if self.remove(sequence) {
            Ok(())
        } else {
            Err(no_message())
        }
    }

    /// Purges messages matching the request. With a filter, `keep` applies
    /// to each matching subject.
    pub(crate) fn purge(&mut self, request: &PurgeRequest) -> Result<PurgeResponse, ApiError> {
        if self.config.sealed {
            return Err(sealed());
        }
        if request.sequence.is_some() && request.keep.is_some() {
            return Err(ApiError::new(
                400,
                ErrorCode::BAD_REQUEST,
                "sequence and keep are mutually exclusive",
            ));
        }

        let filter = request.filter.as_deref().unwrap_or(">");
        let mut by_subject: BTreeMap<&str, Vec<u64>> = BTreeMap::new();
        for (sequence, message) in &self.messages {
            if !subject_matches(filter, &message.subject) {
                continue;
            }
            if request.sequence.is_some_and(|upto| *sequence >= upto) {
                continue;
            }
            let group = if request.filter.is_some() {
                message.subject.as_str()
            } else {
                ""
            };
            by_subject.entry(group).or_default().push(*sequence);
        }

        let keep = request.keep.unwrap_or_default() as usize;
        let purge: Vec<u64> = by_subject
            .into_values()
            .flat_map(|sequences| {
                let excess = sequences.len().saturating_sub(keep);
                sequences.into_iter().take(excess)
            })
            .collect();
        let purged = self.remove_all(purge);
        trace!("purged {} messages from {}", purged, self.config.name);

        Ok(PurgeResponse {
            success: true,
            purged,
        })
    }

    pub(crate) fn add_consumer(
        &mut self,
        name: String,
        config: consumer::Config,
    ) -> Result<consumer::Info, ApiError> {
        if let Some(existing) = self.consumers.get(&name) {
            if existing.config == config {
                return Ok(existing.info(&self.config.name, &self.messages));
            }
            return Err(ApiError::new(
                400,
                ErrorCode::BAD_REQUEST,
                "consumer already exists",
            ));
        }
        let consumer = PushConsumer::new(name.clone(), config, &self.messages, self.last_sequence)?;
        let info = consumer.info(&self.config.name, &self.messages);
        self.consumers.insert(name, consumer);
        Ok(info)
    }
}

enum Rollup {
    Subject,
    All,
}

fn parse_sequence(value: &str) -> Result<u64, ApiError> {
    value.trim().parse().map_err(|_| {
        ApiError::new(
            400,
            ErrorCode::BAD_REQUEST,
            format!("invalid sequence header: {}", value),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(config: Config) -> MemoryStream {
        MemoryStream::new(config)
    }

    fn publish(
        stream: &mut MemoryStream,
        subject: &str,
        headers: &[(&str, &str)],
    ) -> Result<u64, ApiError> {
        let mut message = Message::new(subject, Bytes::from_static(b"data"));
        if !headers.is_empty() {
            let mut map = HeaderMap::new();
            for (name, value) in headers {
                map.insert(*name, *value);
            }
            message.headers = Some(map);
        }
        stream.store(&message).map(|ack| ack.sequence)
    }

    #[test]
    fn history_per_subject() {
        let mut kv = stream(Config {
            name: "KV_test".into(),
            subjects: vec!["$KV.test.>".into()],
            max_messages_per_subject: 2,
            ..Default::default()
        });
        for _ in 0..3 {
            publish(&mut kv, "$KV.test.a", &[]).unwrap();
        }
        publish(&mut kv, "$KV.test.b", &[]).unwrap();

        let info = kv.info();
        assert_eq!(info.state.messages, 3);
        assert_eq!(info.state.first_sequence, 2);
        assert_eq!(info.state.last_sequence, 4);
        assert_eq!(info.state.subjects_count, 2);
    }

    #[test]
    fn expected_last_subject_sequence() {
        let mut kv = stream(Config {
            name: "KV_test".into(),
            subjects: vec!["$KV.test.>".into()],
            ..Default::default()
        });
        let expect = "Nats-Expected-Last-Subject-Sequence";
        assert_eq!(publish(&mut kv, "$KV.test.a", &[(expect, "0")]).unwrap(), 1);
        let err = publish(&mut kv, "$KV.test.a", &[(expect, "0")]).unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::STREAM_WRONG_LAST_SEQUENCE);
        assert_eq!(publish(&mut kv, "$KV.test.b", &[(expect, "0")]).unwrap(), 2);
        assert_eq!(publish(&mut kv, "$KV.test.a", &[(expect, "1")]).unwrap(), 3);
    }

    #[test]
    fn rollup_and_sealed() {
        let mut objects = stream(Config {
            name: "OBJ_test".into(),
            subjects: vec!["$O.test.>".into()],
            allow_rollup: true,
            ..Default::default()
        });
        publish(&mut objects, "$O.test.M.a", &[]).unwrap();
        publish(&mut objects, "$O.test.M.a", &[]).unwrap();
        publish(&mut objects, "$O.test.M.b", &[]).unwrap();
        publish(&mut objects, "$O.test.M.a", &[("Nats-Rollup", "sub")]).unwrap();
        assert_eq!(objects.info().state.messages, 2);

        let mut config = objects.config.clone();
        config.sealed = true;
        objects.update(config).unwrap();
        let err = publish(&mut objects, "$O.test.M.a", &[]).unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::STREAM_SEALED);
    }

    #[test]
    fn purge_keep_per_subject() {
        let mut kv = stream(Config {
            name: "KV_test".into(),
            subjects: vec!["$KV.test.>".into()],
            ..Default::default()
        });
        for subject in ["a", "a", "b", "a", "b"] {
            publish(&mut kv, &format!("$KV.test.{}", subject), &[]).unwrap();
        }
        let response = kv
            .purge(&PurgeRequest {
                filter: Some("$KV.test.>".into()),
                keep: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(response.purged, 3);
        let remaining: Vec<u64> = kv.messages.keys().copied().collect();
        assert_eq!(remaining, vec![4, 5]);
    }

    #[test]
    fn discard_new() {
        let mut limited = stream(Config {
            name: "limited".into(),
            max_messages: 1,
            discard: DiscardPolicy::New,
            ..Default::default()
        });
        publish(&mut limited, "limited", &[]).unwrap();
        let err = publish(&mut limited, "limited", &[]).unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::STREAM_STORE_FAILED);
    }

    #[test]
    fn duplicates() {
        let mut events = stream(Config {
            name: "events".into(),
            ..Default::default()
        });
        let id = [("Nats-Msg-Id", "1")];
        assert_eq!(publish(&mut events, "events", &id).unwrap(), 1);
        assert_eq!(publish(&mut events, "events", &id).unwrap(), 1);
        assert_eq!(events.info().state.messages, 1);
    }
}
