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

//! Reads, purges and consumers of a single [Stream].

use std::{
    fmt::{self, Debug, Display},
    future::IntoFuture,
    marker::PhantomData,
    time::Duration,
};

use base64::engine::general_purpose::STANDARD;
use base64::engine::Engine;
use bytes::Bytes;
use futures::{future::BoxFuture, TryFutureExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::{
    format_description::well_known::Rfc3339, macros::format_description, serde::rfc3339,
    OffsetDateTime, PrimitiveDateTime,
};

use crate::{
    client,
    error::Error,
    header::{self, HeaderMap},
    StatusCode,
};

use super::{
    consumer::{push, Consumer, IntoConsumerConfig},
    context::{ConsumerError, ConsumerErrorKind, RequestError, RequestErrorKind},
    errors::ErrorCode,
    response::Response,
    Context,
};

pub type InfoError = RequestError;

#[derive(Clone, Debug, PartialEq)]
pub enum DirectGetErrorKind {
    NotFound,
    InvalidSubject,
    TimedOut,
    NoResponders,
    Request,
    ErrorResponse(StatusCode, String),
    Other,
}

impl Display for DirectGetErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSubject => write!(f, "invalid subject"),
            Self::NotFound => write!(f, "message not found"),
            Self::ErrorResponse(status, description) => {
                write!(f, "unable to get message: {} {}", status, description)
            }
            Self::Other => write!(f, "error getting message"),
            Self::TimedOut => write!(f, "timed out"),
            Self::NoResponders => write!(f, "no responders"),
            Self::Request => write!(f, "request failed"),
        }
    }
}

pub type DirectGetError = Error<DirectGetErrorKind>;

impl From<client::RequestError> for DirectGetError {
    fn from(err: client::RequestError) -> Self {
        match err.kind() {
            client::RequestErrorKind::TimedOut => {
                DirectGetError::new(DirectGetErrorKind::TimedOut)
            }
            client::RequestErrorKind::NoResponders => {
                DirectGetError::new(DirectGetErrorKind::NoResponders)
            }
            _ => DirectGetError::with_source(DirectGetErrorKind::Request, err),
        }
    }
}

impl From<serde_json::Error> for DirectGetError {
    fn from(err: serde_json::Error) -> Self {
        DirectGetError::with_source(DirectGetErrorKind::Other, err)
    }
}

impl From<StreamMessageError> for DirectGetError {
    fn from(err: StreamMessageError) -> Self {
        DirectGetError::with_source(DirectGetErrorKind::Other, err)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum LastRawMessageErrorKind {
    NoMessageFound,
    InvalidSubject,
    TimedOut,
    JetStream(super::errors::Error),
    Other,
}

impl Display for LastRawMessageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMessageFound => write!(f, "no message found"),
            Self::InvalidSubject => write!(f, "invalid subject"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Other => write!(f, "failed to get last raw message"),
            Self::JetStream(err) => write!(f, "JetStream error: {}", err),
        }
    }
}

pub type LastRawMessageError = Error<LastRawMessageErrorKind>;
pub type RawMessageErrorKind = LastRawMessageErrorKind;
pub type RawMessageError = LastRawMessageError;

/// Handle to operations that can be performed on a `Stream`.
#[derive(Debug, Clone)]
pub struct Stream {
    pub(crate) info: Info,
    pub(crate) context: Context,
    pub(crate) name: String,
}

impl Stream {
    /// Retrieves `info` about [Stream] from the server, updates the cached `info` inside
    /// [Stream] and returns it.
    pub async fn info(&mut self) -> Result<&Info, InfoError> {
        self.info = self.get_info().await?;
        Ok(&self.info)
    }

    /// Returns cached [Info] for the [Stream].
    pub fn cached_info(&self) -> &Info {
        &self.info
    }

    /// Fetches fresh [Info] without touching the cache.
    pub async fn get_info(&self) -> Result<Info, InfoError> {
        let subject = format!("STREAM.INFO.{}", self.name);

        match self.context.request(subject, &json!({})).await? {
            Response::Ok::<Info>(info) => Ok(info),
            Response::Err { error } => Err(error.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets a message by stream sequence through the direct get API, which
    /// can be answered by any replica.
    ///
    /// Requires a [Stream] with `allow_direct` set to `true`.
    pub async fn direct_get(&self, sequence: u64) -> Result<StreamMessage, DirectGetError> {
        let subject = format!("DIRECT.GET.{}", &self.name);
        let payload = json!({
            "seq": sequence,
        });

        let response = self
            .context
            .raw_request(subject, serde_json::to_vec(&payload).map(Bytes::from)?)
            .await?;

        direct_get_response(response)
    }

    /// Gets the last message stored on a subject through the direct get API.
    ///
    /// The subject travels in the request subject itself, so the request
    /// payload stays empty.
    pub async fn direct_get_last_for_subject<T: AsRef<str>>(
        &self,
        subject: T,
    ) -> Result<StreamMessage, DirectGetError> {
        if subject.as_ref().is_empty() {
            return Err(DirectGetError::new(DirectGetErrorKind::InvalidSubject));
        }
        let subject = format!("DIRECT.GET.{}.{}", &self.name, subject.as_ref());

        let response = self.context.raw_request(subject, Bytes::new()).await?;

        direct_get_response(response)
    }

    /// Get a raw message from the stream for a given stream sequence.
    /// This low-level API always reaches stream leader.
    pub async fn get_raw_message(&self, sequence: u64) -> Result<StreamMessage, RawMessageError> {
        self.raw_message(StreamGetMessage {
            sequence: Some(sequence),
            last_by_subject: None,
        })
        .await
    }

    /// Get the last message stored on a subject.
    /// This low-level API always reaches stream leader.
    pub async fn get_last_raw_message_by_subject(
        &self,
        stream_subject: &str,
    ) -> Result<StreamMessage, LastRawMessageError> {
        self.raw_message(StreamGetMessage {
            sequence: None,
            last_by_subject: Some(stream_subject.to_string()),
        })
        .await
    }

    async fn raw_message(
        &self,
        request: StreamGetMessage,
    ) -> Result<StreamMessage, RawMessageError> {
        if let Some(subject) = request.last_by_subject.as_ref() {
            if subject.is_empty() {
                return Err(RawMessageError::new(RawMessageErrorKind::InvalidSubject));
            }
        }

        let subject = format!("STREAM.MSG.GET.{}", &self.name);

        let response: Response<GetRawMessage> = self
            .context
            .request(subject, &request)
            .map_err(|err| match err.kind() {
                RequestErrorKind::TimedOut => RawMessageError::new(RawMessageErrorKind::TimedOut),
                _ => RawMessageError::with_source(RawMessageErrorKind::Other, err),
            })
            .await?;

        match response {
            Response::Err { error } => {
                if error.error_code() == ErrorCode::NO_MESSAGE_FOUND {
                    Err(RawMessageError::new(RawMessageErrorKind::NoMessageFound))
                } else {
                    Err(RawMessageError::new(RawMessageErrorKind::JetStream(error)))
                }
            }
            Response::Ok(value) => StreamMessage::try_from(value.message)
                .map_err(|err| RawMessageError::with_source(RawMessageErrorKind::Other, err)),
        }
    }

    /// Purge `Stream` messages.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # async fn example(stream: nats_kv::jetstream::stream::Stream) -> Result<(), nats_kv::Error> {
    /// // drop every message on the subject but the newest one
    /// stream.purge().filter("$KV.config.key").keep(1).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn purge(&self) -> Purge<No, No> {
        Purge::build(self)
    }

    /// Creates an ephemeral or durable consumer and returns it with the info
    /// reported by the server.
    pub async fn create_consumer<C: IntoConsumerConfig + Clone>(
        &self,
        config: C,
    ) -> Result<Consumer<C>, ConsumerError> {
        self.context
            .create_consumer_on_stream(config, self.name.clone())
            .await
    }

    /// Starts an ordered push consumer and returns the stream of its messages.
    ///
    /// The consumer is recreated transparently whenever a delivery goes
    /// missing, see [push::Ordered].
    pub async fn ordered(
        &self,
        config: push::OrderedConfig,
    ) -> Result<push::Ordered, push::OrderedError> {
        push::Ordered::start(self, config).await
    }

    pub async fn delete_consumer(&self, name: &str) -> Result<DeleteStatus, ConsumerError> {
        let subject = format!("CONSUMER.DELETE.{}.{}", self.name, name);

        match self.context.request(subject, &json!({})).await? {
            Response::Ok(delete_status) => Ok(delete_status),
            Response::Err { error } => Err(ConsumerError::new(ConsumerErrorKind::JetStream(error))),
        }
    }
}

fn direct_get_response(response: crate::Message) -> Result<StreamMessage, DirectGetError> {
    if let Some(status) = response.status {
        match status {
            StatusCode::NOT_FOUND => {
                return Err(DirectGetError::new(DirectGetErrorKind::NotFound));
            }
            StatusCode::TIMEOUT => {
                return Err(DirectGetError::new(DirectGetErrorKind::TimedOut));
            }
            StatusCode::NO_RESPONDERS => {
                return Err(DirectGetError::new(DirectGetErrorKind::NoResponders));
            }
            status if status != StatusCode::OK => {
                return Err(DirectGetError::new(DirectGetErrorKind::ErrorResponse(
                    status,
                    response.description.clone().unwrap_or_default(),
                )));
            }
            _ => (),
        }
    }
    StreamMessage::try_from(response).map_err(Into::into)
}

/// `StreamConfig` determines the properties for a stream.
/// There are sensible defaults for most. If no subjects are
/// given the name will be used as the only subject.
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Config {
    /// A name for the Stream. Must not have spaces, tabs or period `.` characters
    pub name: String,
    /// How large the Stream may become in total bytes before the configured discard policy kicks in
    #[serde(default)]
    pub max_bytes: i64,
    /// How large the Stream may become in total messages before the configured discard policy kicks in
    #[serde(default, rename = "max_msgs")]
    pub max_messages: i64,
    /// Maximum amount of messages to keep per subject
    #[serde(default, rename = "max_msgs_per_subject")]
    pub max_messages_per_subject: i64,
    /// When a Stream has reached its configured `max_bytes` or `max_msgs`, this policy kicks in.
    #[serde(default)]
    pub discard: DiscardPolicy,
    /// Which NATS subjects to populate this stream with. Supports wildcards. Defaults to just the
    /// configured stream `name`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subjects: Vec<String>,
    /// How message retention is considered, `Limits` (default), `Interest` or `WorkQueue`
    #[serde(default)]
    pub retention: RetentionPolicy,
    /// How many Consumers can be defined for a given Stream, -1 for unlimited
    #[serde(default)]
    pub max_consumers: i32,
    /// Maximum age of any message in the stream, expressed in nanoseconds
    #[serde(default, with = "serde_nanos")]
    pub max_age: Duration,
    /// The largest message that will be accepted by the Stream
    #[serde(default, skip_serializing_if = "is_default", rename = "max_msg_size")]
    pub max_message_size: i32,
    /// The type of storage backend, `File` (default) and `Memory`
    #[serde(default)]
    pub storage: StorageType,
    /// How many replicas to keep for each message in a clustered JetStream, maximum 5
    #[serde(default)]
    pub num_replicas: usize,
    /// The window within which to track duplicate messages.
    #[serde(default, skip_serializing_if = "is_default", with = "serde_nanos")]
    pub duplicate_window: Duration,
    /// Indicates the stream is sealed and cannot be modified in any way
    #[serde(default, skip_serializing_if = "is_default")]
    pub sealed: bool,
    /// A short description of the purpose of this stream.
    #[serde(default, skip_serializing_if = "is_default")]
    pub description: Option<String>,
    /// Indicates if rollups will be allowed or not.
    #[serde(
        default,
        rename = "allow_rollup_hdrs",
        skip_serializing_if = "is_default"
    )]
    pub allow_rollup: bool,
    /// Indicates deletes will be denied or not.
    #[serde(default, skip_serializing_if = "is_default")]
    pub deny_delete: bool,
    /// Indicates if purges will be denied or not.
    #[serde(default, skip_serializing_if = "is_default")]
    pub deny_purge: bool,
    /// Enables direct get, which would get messages from
    /// non-leader.
    #[serde(default, skip_serializing_if = "is_default")]
    pub allow_direct: bool,
    /// Override compression config for this stream.
    /// Wrapping enum that has `None` type with [Option] is there
    /// because [Stream] can override global compression set to [Compression::S2]
    /// to [Compression::None], which is different from not overriding global config with anything.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<Compression>,
}

impl From<&Config> for Config {
    fn from(sc: &Config) -> Config {
        sc.clone()
    }
}

impl From<&str> for Config {
    fn from(s: &str) -> Config {
        Config {
            name: s.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq)]
pub enum Compression {
    #[serde(rename = "s2")]
    S2,
    #[serde(rename = "none")]
    None,
}

/// `DiscardPolicy` determines how we proceed when limits of messages or bytes are hit. The default, `Old` will
/// remove older messages. `New` will fail to store the new message.
#[derive(Default, Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum DiscardPolicy {
    /// will remove older messages when limits are hit.
    #[default]
    #[serde(rename = "old")]
    Old,
    /// will error on a StoreMsg call when limits are hit
    #[serde(rename = "new")]
    New,
}

/// `RetentionPolicy` determines how messages in a set are retained.
#[derive(Default, Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// `Limits` (default) means that messages are retained until any given limit is reached.
    /// This could be one of messages, bytes, or age.
    #[default]
    #[serde(rename = "limits")]
    Limits,
    /// `Interest` specifies that when all known observables have acknowledged a message it can be removed.
    #[serde(rename = "interest")]
    Interest,
    /// `WorkQueue` specifies that when the first worker or subscriber acknowledges the message it can be removed.
    #[serde(rename = "workqueue")]
    WorkQueue,
}

/// determines how messages are stored for retention.
#[derive(Default, Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    /// Stream data is kept in files. This is the default.
    #[default]
    #[serde(rename = "file")]
    File,
    /// Stream data is kept only in memory.
    #[serde(rename = "memory")]
    Memory,
}

/// Shows config and current state for this stream.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Info {
    /// The configuration associated with this stream.
    pub config: Config,
    /// The time that this stream was created.
    #[serde(with = "rfc3339")]
    pub created: time::OffsetDateTime,
    /// Various metrics associated with this stream.
    pub state: State,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct DeleteStatus {
    pub success: bool,
}

/// information about the given stream.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct State {
    /// The number of messages contained in this stream
    pub messages: u64,
    /// The number of bytes of all messages contained in this stream
    pub bytes: u64,
    /// The lowest sequence number still present in this stream
    #[serde(rename = "first_seq")]
    pub first_sequence: u64,
    /// The time associated with the oldest message still present in this stream
    #[serde(with = "rfc3339", rename = "first_ts")]
    pub first_timestamp: time::OffsetDateTime,
    /// The last sequence number assigned to a message in this stream
    #[serde(rename = "last_seq")]
    pub last_sequence: u64,
    /// The time that the last message was received by this stream
    #[serde(with = "rfc3339", rename = "last_ts")]
    pub last_timestamp: time::OffsetDateTime,
    /// The number of consumers configured to consume this stream
    pub consumer_count: usize,
    /// The number of subjects in the stream
    #[serde(default, rename = "num_subjects")]
    pub subjects_count: u64,
}

/// A raw stream message in the representation it is stored.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RawMessage {
    /// Subject of the message.
    #[serde(rename = "subject")]
    pub subject: String,

    /// Sequence of the message.
    #[serde(rename = "seq")]
    pub sequence: u64,

    /// Raw payload of the message as a base64 encoded string.
    #[serde(default, rename = "data")]
    pub payload: String,

    /// Raw header string, if any.
    #[serde(default, rename = "hdrs", skip_serializing_if = "Option::is_none")]
    pub headers: Option<String>,

    /// The time the message was published.
    #[serde(rename = "time", with = "rfc3339")]
    pub time: time::OffsetDateTime,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub(crate) struct GetRawMessage {
    pub(crate) message: RawMessage,
}

/// Request body of `STREAM.MSG.GET`.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub(crate) struct StreamGetMessage {
    #[serde(rename = "seq", skip_serializing_if = "is_default")]
    pub(crate) sequence: Option<u64>,
    #[serde(rename = "last_by_subj", skip_serializing_if = "is_default")]
    pub(crate) last_by_subject: Option<String>,
}

/// A message read back from a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMessage {
    pub subject: String,
    pub sequence: u64,
    pub headers: HeaderMap,
    pub payload: Bytes,
    /// When the message was stored.
    pub time: OffsetDateTime,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StreamMessageErrorKind {
    MissingHeader(String),
    ParseError,
}

impl Display for StreamMessageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingHeader(name) => write!(f, "missing message header: {}", name),
            Self::ParseError => write!(f, "failed to parse stored message"),
        }
    }
}

pub type StreamMessageError = Error<StreamMessageErrorKind>;

impl TryFrom<RawMessage> for StreamMessage {
    type Error = StreamMessageError;

    fn try_from(value: RawMessage) -> Result<Self, Self::Error> {
        let payload = STANDARD
            .decode(value.payload)
            .map_err(|err| StreamMessageError::with_source(StreamMessageErrorKind::ParseError, err))?;

        let headers = match value.headers {
            Some(headers) if !headers.is_empty() => {
                let raw = STANDARD.decode(headers).map_err(|err| {
                    StreamMessageError::with_source(StreamMessageErrorKind::ParseError, err)
                })?;
                header::parse_headers(&raw)
                    .map_err(|err| {
                        StreamMessageError::with_source(StreamMessageErrorKind::ParseError, err)
                    })?
                    .headers
            }
            _ => HeaderMap::new(),
        };

        Ok(StreamMessage {
            subject: value.subject,
            sequence: value.sequence,
            headers,
            payload: payload.into(),
            time: value.time,
        })
    }
}

impl TryFrom<crate::Message> for StreamMessage {
    type Error = StreamMessageError;

    /// Decodes a direct get reply, where the storage metadata travels in headers.
    fn try_from(message: crate::Message) -> Result<Self, Self::Error> {
        let headers = message.headers.unwrap_or_default();

        let required = |name: header::HeaderName| {
            headers.get_last(name.clone()).ok_or_else(|| {
                StreamMessageError::new(StreamMessageErrorKind::MissingHeader(name.to_string()))
            })
        };

        required(header::NATS_STREAM)?;
        let subject = required(header::NATS_SUBJECT)?.to_string();
        let sequence = required(header::NATS_SEQUENCE)?
            .parse::<u64>()
            .map_err(|err| StreamMessageError::with_source(StreamMessageErrorKind::ParseError, err))?;
        let time = parse_time_stamp(required(header::NATS_TIME_STAMP)?)?;

        Ok(StreamMessage {
            subject,
            sequence,
            payload: message.payload,
            time,
            headers,
        })
    }
}

/// Parses `Nats-Time-Stamp`, either RFC3339 or the legacy
/// `2006-01-02 15:04:05.999999999 +0000 UTC` layout.
pub(crate) fn parse_time_stamp(value: &str) -> Result<OffsetDateTime, StreamMessageError> {
    if let Ok(time) = OffsetDateTime::parse(value, &Rfc3339) {
        return Ok(time);
    }

    let legacy = value
        .strip_suffix(" UTC")
        .and_then(|value| value.strip_suffix(" +0000"))
        .ok_or_else(|| StreamMessageError::new(StreamMessageErrorKind::ParseError))?;

    let parsed = if legacy.contains('.') {
        PrimitiveDateTime::parse(
            legacy,
            format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]"),
        )
    } else {
        PrimitiveDateTime::parse(
            legacy,
            format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
        )
    };

    parsed
        .map(PrimitiveDateTime::assume_utc)
        .map_err(|err| StreamMessageError::with_source(StreamMessageErrorKind::ParseError, err))
}

/// The response generated by trying to purge a stream.
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct PurgeResponse {
    /// Whether the purge request was successful.
    pub success: bool,
    /// The number of purged messages in a stream.
    pub purged: u64,
}

/// The payload used to generate a purge request.
#[derive(Default, Debug, Serialize, Deserialize, Clone)]
pub struct PurgeRequest {
    /// Purge up to but not including sequence.
    #[serde(default, rename = "seq", skip_serializing_if = "is_default")]
    pub sequence: Option<u64>,

    /// Subject to match against messages for the purge command.
    #[serde(default, skip_serializing_if = "is_default")]
    pub filter: Option<String>,

    /// Number of messages to keep.
    #[serde(default, skip_serializing_if = "is_default")]
    pub keep: Option<u64>,
}

#[derive(Debug, Default)]
pub struct Yes;
#[derive(Debug, Default)]
pub struct No;

pub trait ToAssign: Debug {}

impl ToAssign for Yes {}
impl ToAssign for No {}

/// Builder of a `STREAM.PURGE` request. `keep` and `sequence` are exclusive.
#[derive(Debug)]
pub struct Purge<SEQUENCE, KEEP>
where
    SEQUENCE: ToAssign,
    KEEP: ToAssign,
{
    inner: PurgeRequest,
    sequence_set: PhantomData<SEQUENCE>,
    keep_set: PhantomData<KEEP>,
    context: Context,
    stream_name: String,
}

impl<SEQUENCE, KEEP> Purge<SEQUENCE, KEEP>
where
    SEQUENCE: ToAssign,
    KEEP: ToAssign,
{
    /// Adds subject filter to [PurgeRequest]
    pub fn filter<T: Into<String>>(mut self, filter: T) -> Purge<SEQUENCE, KEEP> {
        self.inner.filter = Some(filter.into());
        self
    }
}

impl Purge<No, No> {
    pub(crate) fn build(stream: &Stream) -> Purge<No, No> {
        Purge {
            context: stream.context.clone(),
            stream_name: stream.name.clone(),
            inner: Default::default(),
            sequence_set: PhantomData {},
            keep_set: PhantomData {},
        }
    }
}

impl<KEEP> Purge<No, KEEP>
where
    KEEP: ToAssign,
{
    /// Keeps the newest `keep` messages matching the filter.
    pub fn keep(self, keep: u64) -> Purge<No, Yes> {
        Purge {
            context: self.context,
            stream_name: self.stream_name,
            sequence_set: PhantomData {},
            keep_set: PhantomData {},
            inner: PurgeRequest {
                keep: Some(keep),
                ..self.inner
            },
        }
    }
}

impl<SEQUENCE> Purge<SEQUENCE, No>
where
    SEQUENCE: ToAssign,
{
    /// Purges messages up to, but not including, `sequence`.
    pub fn sequence(self, sequence: u64) -> Purge<Yes, No> {
        Purge {
            context: self.context,
            stream_name: self.stream_name,
            sequence_set: PhantomData {},
            keep_set: PhantomData {},
            inner: PurgeRequest {
                sequence: Some(sequence),
                ..self.inner
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PurgeErrorKind {
    Request,
    TimedOut,
    JetStream(super::errors::Error),
}

impl Display for PurgeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request => write!(f, "request failed"),
            Self::TimedOut => write!(f, "timed out"),
            Self::JetStream(err) => write!(f, "JetStream error: {}", err),
        }
    }
}

pub type PurgeError = Error<PurgeErrorKind>;

impl<S, K> IntoFuture for Purge<S, K>
where
    S: ToAssign + std::marker::Send,
    K: ToAssign + std::marker::Send,
{
    type Output = Result<PurgeResponse, PurgeError>;

    type IntoFuture = BoxFuture<'static, Result<PurgeResponse, PurgeError>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move {
            let request_subject = format!("STREAM.PURGE.{}", self.stream_name);
            let response: Response<PurgeResponse> = self
                .context
                .request(request_subject, &self.inner)
                .map_err(|err| match err.kind() {
                    RequestErrorKind::TimedOut => PurgeError::new(PurgeErrorKind::TimedOut),
                    _ => PurgeError::with_source(PurgeErrorKind::Request, err),
                })
                .await?;

            match response {
                Response::Err { error } => Err(PurgeError::new(PurgeErrorKind::JetStream(error))),
                Response::Ok(response) => Ok(response),
            }
        })
    }
}

fn is_default<T: Default + PartialEq>(t: &T) -> bool {
    t == &T::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct_reply(time_stamp: &str) -> crate::Message {
        let mut headers = HeaderMap::new();
        headers.insert(header::NATS_STREAM, "KV_cfg");
        headers.insert(header::NATS_SUBJECT, "$KV.cfg.a");
        headers.insert(header::NATS_SEQUENCE, "12");
        headers.insert(header::NATS_TIME_STAMP, time_stamp);
        crate::Message {
            subject: "_INBOX.x".into(),
            payload: Bytes::from_static(b"v"),
            headers: Some(headers),
            ..Default::default()
        }
    }

    #[test]
    fn direct_get_rfc3339() {
        let message =
            StreamMessage::try_from(direct_reply("2023-04-05T06:07:08.123456789Z")).unwrap();
        assert_eq!(message.sequence, 12);
        assert_eq!(message.subject, "$KV.cfg.a");
        assert_eq!(message.time.nanosecond(), 123_456_789);
    }

    #[test]
    fn direct_get_legacy_time_stamp() {
        let message =
            StreamMessage::try_from(direct_reply("2023-04-05 06:07:08.5 +0000 UTC")).unwrap();
        assert_eq!(message.time.second(), 8);
        assert_eq!(message.time.millisecond(), 500);

        let message = StreamMessage::try_from(direct_reply("2023-04-05 06:07:08 +0000 UTC")).unwrap();
        assert_eq!(message.time.nanosecond(), 0);

        assert!(StreamMessage::try_from(direct_reply("yesterday")).is_err());
    }

    #[test]
    fn direct_get_requires_headers() {
        let mut message = direct_reply("2023-04-05T06:07:08Z");
        message.headers.as_mut().unwrap().remove(header::NATS_SEQUENCE);
        let err = StreamMessage::try_from(message).unwrap_err();
        assert_eq!(
            err.kind(),
            StreamMessageErrorKind::MissingHeader("Nats-Sequence".to_string())
        );
    }

    #[test]
    fn direct_get_status() {
        let not_found = crate::Message::with_status("_INBOX.x", StatusCode::NOT_FOUND, "Message Not Found");
        assert_eq!(
            direct_get_response(not_found).unwrap_err().kind(),
            DirectGetErrorKind::NotFound
        );
        let timed_out =
            crate::Message::with_status("_INBOX.x", StatusCode::TIMEOUT, "Empty Request");
        assert_eq!(
            direct_get_response(timed_out).unwrap_err().kind(),
            DirectGetErrorKind::TimedOut
        );
        let unavailable =
            crate::Message::with_status("_INBOX.x", StatusCode::NO_RESPONDERS, "No Responders");
        assert_eq!(
            direct_get_response(unavailable).unwrap_err().kind(),
            DirectGetErrorKind::NoResponders
        );
    }

    #[test]
    fn raw_message() {
        let mut headers = HeaderMap::new();
        headers.insert(header::KV_OPERATION, "DEL");
        let raw = RawMessage {
            subject: "$KV.cfg.a".into(),
            sequence: 3,
            payload: STANDARD.encode(b"hello"),
            headers: Some(STANDARD.encode(headers.to_bytes())),
            time: OffsetDateTime::UNIX_EPOCH,
        };
        let message = StreamMessage::try_from(raw).unwrap();
        assert_eq!(message.payload.as_ref(), b"hello");
        assert_eq!(message.headers.get_last(header::KV_OPERATION), Some("DEL"));
    }

    #[test]
    fn purge_request_body() {
        let request = PurgeRequest {
            filter: Some("$KV.cfg.a".into()),
            keep: Some(1),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r#"{"filter":"$KV.cfg.a","keep":1}"#
        );
    }
}
