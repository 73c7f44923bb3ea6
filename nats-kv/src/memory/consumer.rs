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

//! Push consumers of the in-memory server.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use bytes::Bytes;
use time::OffsetDateTime;
use tracing::{debug, trace};

use crate::header::{self, HeaderMap};
use crate::jetstream::consumer::{Config, DeliverPolicy, Info, SequenceInfo};
use crate::jetstream::errors::{Error as ApiError, ErrorCode};
use crate::subject::subject_matches;
use crate::{Message, StatusCode};

use super::stream::StoredMessage;
use super::Router;

/// Deliveries between two flow control requests.
const FLOW_CONTROL_INTERVAL: u64 = 64;

pub(crate) struct PushConsumer {
    pub(crate) name: String,
    pub(crate) config: Config,
    deliver_subject: String,
    created: OffsetDateTime,
    /// Sequences selected when the consumer was created, delivered first.
    initial: VecDeque<u64>,
    /// Next stream sequence to look at once `initial` is drained.
    cursor: u64,
    consumer_sequence: u64,
    stream_sequence: u64,
    since_flow_control: u64,
    flow_control_requests: u64,
    /// Reply subject of the unanswered flow control request. Deliveries
    /// stall until it is answered.
    stalled: Option<String>,
    last_activity: Instant,
    inactive_since: Option<Instant>,
}

impl PushConsumer {
    pub(crate) fn new(
        name: String,
        config: Config,
        messages: &BTreeMap<u64, StoredMessage>,
        last_sequence: u64,
    ) -> Result<PushConsumer, ApiError> {
        let deliver_subject = config.deliver_subject.clone().ok_or_else(|| {
            ApiError::new(
                400,
                ErrorCode::BAD_REQUEST,
                "consumer requires a deliver subject",
            )
        })?;

        let filter = config.filter_subject.clone();
        let matches =
            |message: &StoredMessage| filter.is_empty() || subject_matches(&filter, &message.subject);

        let mut initial = VecDeque::new();
        let cursor = match config.deliver_policy {
            DeliverPolicy::All => 1,
            DeliverPolicy::New => last_sequence + 1,
            DeliverPolicy::Last => messages
                .iter()
                .rev()
                .find(|(_, message)| matches(message))
                .map(|(sequence, _)| *sequence)
                .unwrap_or(last_sequence + 1),
            DeliverPolicy::ByStartSequence { start_sequence } => start_sequence.max(1),
            DeliverPolicy::ByStartTime { start_time } => messages
                .iter()
                .find(|(_, message)| message.time >= start_time)
                .map(|(sequence, _)| *sequence)
                .unwrap_or(last_sequence + 1),
            DeliverPolicy::LastPerSubject => {
                let mut seen = HashSet::new();
                let mut last: Vec<u64> = messages
                    .iter()
                    .rev()
                    .filter(|(_, message)| matches(message))
                    .filter(|(_, message)| seen.insert(message.subject.as_str()))
                    .map(|(sequence, _)| *sequence)
                    .collect();
                last.sort_unstable();
                initial.extend(last);
                last_sequence + 1
            }
        };

        // Positional policies report the sequence right before their start
        // point as already delivered.
        let stream_sequence = match config.deliver_policy {
            DeliverPolicy::All | DeliverPolicy::LastPerSubject => 0,
            _ => cursor.saturating_sub(1),
        };

        Ok(PushConsumer {
            name,
            config,
            deliver_subject,
            created: OffsetDateTime::now_utc(),
            initial,
            cursor,
            consumer_sequence: 0,
            stream_sequence,
            since_flow_control: 0,
            flow_control_requests: 0,
            stalled: None,
            last_activity: Instant::now(),
            inactive_since: None,
        })
    }

    pub(crate) fn deliver_subject(&self) -> &str {
        &self.deliver_subject
    }

    fn matches(&self, subject: &str) -> bool {
        self.config.filter_subject.is_empty() || subject_matches(&self.config.filter_subject, subject)
    }

    /// Messages still to be delivered.
    fn pending(&self, messages: &BTreeMap<u64, StoredMessage>) -> u64 {
        let initial = self
            .initial
            .iter()
            .filter(|sequence| messages.contains_key(sequence))
            .count();
        let rest = messages
            .range(self.cursor..)
            .filter(|(_, message)| self.matches(&message.subject))
            .count();
        (initial + rest) as u64
    }

    fn next_sequence(&mut self, messages: &BTreeMap<u64, StoredMessage>) -> Option<u64> {
        while let Some(sequence) = self.initial.pop_front() {
            if messages.contains_key(&sequence) {
                return Some(sequence);
            }
        }
        let sequence = messages
            .range(self.cursor..)
            .find(|(_, message)| self.matches(&message.subject))
            .map(|(sequence, _)| *sequence)?;
        self.cursor = sequence + 1;
        Some(sequence)
    }

    pub(crate) fn info(&self, stream: &str, messages: &BTreeMap<u64, StoredMessage>) -> Info {
        let delivered = SequenceInfo {
            consumer_sequence: self.consumer_sequence,
            stream_sequence: self.stream_sequence,
        };
        Info {
            stream_name: stream.to_string(),
            name: self.name.clone(),
            created: self.created,
            config: self.config.clone(),
            delivered,
            ack_floor: delivered,
            num_ack_pending: 0,
            num_redelivered: 0,
            num_waiting: 0,
            num_pending: self.pending(messages),
            push_bound: true,
        }
    }

    /// Delivers everything available until caught up or stalled by flow
    /// control. `skip` makes the next delivery go missing.
    pub(crate) fn pump(
        &mut self,
        stream: &str,
        messages: &BTreeMap<u64, StoredMessage>,
        router: &mut Router,
        skip: &mut bool,
    ) {
        while self.stalled.is_none() {
            let Some(sequence) = self.next_sequence(messages) else {
                return;
            };
            let Some(stored) = messages.get(&sequence) else {
                continue;
            };

            self.consumer_sequence += 1;
            self.stream_sequence = sequence;
            self.last_activity = Instant::now();
            if std::mem::take(skip) {
                debug!(
                    "dropping delivery {} of consumer {}",
                    self.consumer_sequence, self.name
                );
                continue;
            }

            let pending = self.pending(messages);
            let reply = format!(
                "$JS.ACK.{}.{}.1.{}.{}.{}.{}",
                stream,
                self.name,
                sequence,
                self.consumer_sequence,
                stored.time.unix_timestamp_nanos(),
                pending
            );

            let mut headers = stored.headers.clone();
            let payload = if self.config.headers_only {
                headers
                    .get_or_insert_with(HeaderMap::new)
                    .insert(header::NATS_MESSAGE_SIZE, stored.payload.len().to_string());
                Bytes::new()
            } else {
                stored.payload.clone()
            };

            router.route_to(
                &self.deliver_subject,
                Message {
                    subject: stored.subject.clone(),
                    reply: Some(reply),
                    payload,
                    headers,
                    ..Default::default()
                },
            );

            self.since_flow_control += 1;
            if self.config.flow_control && self.since_flow_control >= FLOW_CONTROL_INTERVAL {
                self.request_flow_control(stream, router);
            }
        }
    }

    fn request_flow_control(&mut self, stream: &str, router: &mut Router) {
        self.flow_control_requests += 1;
        self.since_flow_control = 0;
        let reply = format!(
            "$JS.FC.{}.{}.{}",
            stream, self.name, self.flow_control_requests
        );
        trace!("consumer {} waiting on flow control {}", self.name, reply);

        let mut request = Message::with_status(
            self.deliver_subject.clone(),
            StatusCode::IDLE_HEARTBEAT,
            "FlowControl Request",
        );
        request.reply = Some(reply.clone());
        router.route_to(&self.deliver_subject, request);
        self.stalled = Some(reply);
    }

    /// Resumes deliveries if `reply` answers the pending flow control request.
    pub(crate) fn flow_control_answered(&mut self, reply: &str) -> bool {
        if self.stalled.as_deref() == Some(reply) {
            self.stalled = None;
            self.last_activity = Instant::now();
            return true;
        }
        false
    }

    /// Sends an idle heartbeat if nothing was delivered for `idle_heartbeat`
    /// and tracks interest on the deliver subject. Returns `false` once the
    /// consumer has been inactive longer than its threshold.
    pub(crate) fn tick(&mut self, router: &mut Router) -> bool {
        let heartbeat = self.config.idle_heartbeat;
        if !heartbeat.is_zero() && self.last_activity.elapsed() >= heartbeat {
            let mut message = Message::with_status(
                self.deliver_subject.clone(),
                StatusCode::IDLE_HEARTBEAT,
                "Idle Heartbeat",
            );
            let mut headers = HeaderMap::new();
            headers.insert(header::NATS_LAST_CONSUMER, self.consumer_sequence);
            headers.insert(header::NATS_LAST_STREAM, self.stream_sequence);
            message.headers = Some(headers);
            router.route_to(&self.deliver_subject, message);
            self.last_activity = Instant::now();
        }

        if self.config.durable_name.is_some() {
            return true;
        }
        if router.has_interest(&self.deliver_subject) {
            self.inactive_since = None;
            return true;
        }
        let threshold = if self.config.inactive_threshold.is_zero() {
            Duration::from_secs(5)
        } else {
            self.config.inactive_threshold
        };
        let since = *self.inactive_since.get_or_insert_with(Instant::now);
        since.elapsed() < threshold
    }

    /// How often [PushConsumer::tick] should run.
    pub(crate) fn tick_interval(&self) -> Duration {
        [self.config.idle_heartbeat, self.config.inactive_threshold]
            .into_iter()
            .filter(|interval| !interval.is_zero())
            .min()
            .unwrap_or(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(subject: &str) -> StoredMessage {
        StoredMessage {
            subject: subject.to_string(),
            headers: None,
            payload: Bytes::from_static(b"value"),
            time: OffsetDateTime::now_utc(),
        }
    }

    fn messages() -> BTreeMap<u64, StoredMessage> {
        let mut messages = BTreeMap::new();
        messages.insert(1, stored("$KV.b.a"));
        messages.insert(2, stored("$KV.b.b"));
        messages.insert(3, stored("$KV.b.a"));
        messages.insert(5, stored("$KV.b.c"));
        messages
    }

    fn config(deliver_policy: DeliverPolicy) -> Config {
        Config {
            deliver_subject: Some("_INBOX.test".to_string()),
            filter_subject: "$KV.b.>".to_string(),
            deliver_policy,
            ..Default::default()
        }
    }

    #[test]
    fn last_per_subject() {
        let messages = messages();
        let mut consumer =
            PushConsumer::new("c".into(), config(DeliverPolicy::LastPerSubject), &messages, 5)
                .unwrap();
        assert_eq!(consumer.pending(&messages), 3);
        let delivered: Vec<u64> = std::iter::from_fn(|| consumer.next_sequence(&messages)).collect();
        assert_eq!(delivered, vec![2, 3, 5]);
    }

    #[test]
    fn start_positions() {
        let messages = messages();
        let all = PushConsumer::new("c".into(), config(DeliverPolicy::All), &messages, 5).unwrap();
        assert_eq!(all.pending(&messages), 4);

        let new = PushConsumer::new("c".into(), config(DeliverPolicy::New), &messages, 5).unwrap();
        assert_eq!(new.pending(&messages), 0);

        let by_sequence = PushConsumer::new(
            "c".into(),
            config(DeliverPolicy::ByStartSequence { start_sequence: 3 }),
            &messages,
            5,
        )
        .unwrap();
        assert_eq!(by_sequence.pending(&messages), 2);
    }

    #[test]
    fn requires_deliver_subject() {
        let config = Config::default();
        assert!(PushConsumer::new("c".into(), config, &BTreeMap::new(), 0).is_err());
    }
}
