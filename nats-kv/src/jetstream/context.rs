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

//! Manage operations on [Context], create/delete/update [Stream] and buckets.

use std::collections::VecDeque;
use std::fmt::{self, Display};
use std::future::IntoFuture;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt, TryFutureExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{oneshot, Semaphore};
use tracing::{debug, trace};

use crate::client::{self, Client, Request};
use crate::error::Error;
use crate::header::HeaderMap;
use crate::subject;
use crate::{Message, StatusCode};

use super::consumer::{self, Consumer, IntoConsumerConfig};
use super::errors::ErrorCode;
use super::kv::{self, MAX_HISTORY};
use super::object_store::{self, ObjectStore};
use super::publish::PublishAck;
use super::response::Response;
use super::stream::{self, Compression, DeleteStatus, DiscardPolicy, Info, Stream};

const DEFAULT_API_PREFIX: &str = "$JS.API";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_PUBLISH_WINDOW: usize = 4000;
const DEFAULT_PUBLISH_STALL_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_DUPLICATE_WINDOW: Duration = Duration::from_secs(2 * 60);

/// Options of a [Context].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextOptions {
    /// Prefix of the JetStream API subjects.
    pub prefix: String,
    /// Timeout of every request made through the context.
    #[serde(with = "serde_nanos")]
    pub timeout: Duration,
    /// Maximum number of publishes awaiting their ack.
    pub publish_window: usize,
    /// How long a publish waits for room in a full window.
    #[serde(with = "serde_nanos")]
    pub publish_stall_timeout: Duration,
}

impl Default for ContextOptions {
    fn default() -> Self {
        ContextOptions {
            prefix: DEFAULT_API_PREFIX.to_string(),
            timeout: DEFAULT_TIMEOUT,
            publish_window: DEFAULT_PUBLISH_WINDOW,
            publish_stall_timeout: DEFAULT_PUBLISH_STALL_TIMEOUT,
        }
    }
}

/// A context which can perform jetstream scoped requests.
#[derive(Debug, Clone)]
pub struct Context {
    pub(crate) client: Client,
    pub(crate) prefix: String,
    pub(crate) timeout: Duration,
    pub(crate) publish_window: Arc<Semaphore>,
    pub(crate) publish_stall_timeout: Duration,
}

impl Context {
    pub fn new(client: Client) -> Context {
        Context::with_options(client, ContextOptions::default())
    }

    pub fn with_prefix(client: Client, prefix: &str) -> Context {
        Context::with_options(
            client,
            ContextOptions {
                prefix: prefix.to_string(),
                ..Default::default()
            },
        )
    }

    pub fn with_options(client: Client, options: ContextOptions) -> Context {
        Context {
            client,
            prefix: options.prefix,
            timeout: options.timeout,
            publish_window: Arc::new(Semaphore::new(options.publish_window.max(1))),
            publish_stall_timeout: options.publish_stall_timeout,
        }
    }

    /// Sets the timeout of requests made through this context.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    /// Publishes a message to a stream and returns a future resolving to its
    /// [PublishAck].
    ///
    /// The returned future can be awaited later, which allows several
    /// publishes to be in flight, bounded by the context's publish window.
    ///
    /// # Examples
    ///
    /// ```
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), nats_kv::Error> {
    /// let server = nats_kv::memory::Server::new();
    /// let jetstream = nats_kv::jetstream::new(server.connect());
    /// jetstream
    ///     .create_stream(nats_kv::jetstream::stream::Config {
    ///         name: "events".to_string(),
    ///         subjects: vec!["events.>".to_string()],
    ///         ..Default::default()
    ///     })
    ///     .await?;
    ///
    /// let ack = jetstream.publish("events.data", "data".into()).await?;
    /// assert_eq!(ack.await?.sequence, 1);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn publish<S: Into<String>>(
        &self,
        subject: S,
        payload: Bytes,
    ) -> Result<PublishAckFuture, PublishError> {
        self.publish_message(subject.into(), None, payload).await
    }

    /// Publish a message with headers to a given subject associated with a stream and returns an acknowledgment from
    /// the server that the message has been successfully delivered.
    pub async fn publish_with_headers<S: Into<String>>(
        &self,
        subject: S,
        headers: HeaderMap,
        payload: Bytes,
    ) -> Result<PublishAckFuture, PublishError> {
        self.publish_message(subject.into(), Some(headers), payload)
            .await
    }

    async fn publish_message(
        &self,
        subject: String,
        headers: Option<HeaderMap>,
        payload: Bytes,
    ) -> Result<PublishAckFuture, PublishError> {
        let permit = tokio::time::timeout(
            self.publish_stall_timeout,
            self.publish_window.clone().acquire_owned(),
        )
        .await
        .map_err(|_| {
            debug!("publish window stalled for {:?}", self.publish_stall_timeout);
            PublishError::new(PublishErrorKind::TimedOut)
        })?
        .map_err(|err| PublishError::with_source(PublishErrorKind::Other, err))?;

        let inbox = self.client.new_inbox();
        let mut subscriber = self
            .client
            .subscribe(inbox.clone())
            .await
            .map_err(|err| PublishError::with_source(PublishErrorKind::BrokenPipe, err))?;
        self.client
            .publish_with_reply(subject, inbox, headers, payload)
            .await
            .map_err(|err| PublishError::with_source(PublishErrorKind::BrokenPipe, err))?;

        let (sender, receiver) = oneshot::channel();
        let timeout = self.timeout;
        tokio::spawn(async move {
            let reply = tokio::time::timeout(timeout, subscriber.next()).await;
            // the slot is released as soon as the ack arrives, whether or not
            // someone awaits the future.
            drop(permit);
            sender.send(reply.ok()).ok();
        });

        Ok(PublishAckFuture { receiver })
    }

    /// Send a request to the jetstream JSON API.
    ///
    /// `subject` is relative to the API prefix, e.g. `STREAM.INFO.events`.
    pub async fn request<T, V>(&self, subject: String, payload: &T) -> Result<V, RequestError>
    where
        T: ?Sized + Serialize,
        V: DeserializeOwned,
    {
        let request = serde_json::to_vec(&payload)
            .map(Bytes::from)
            .map_err(|err| RequestError::with_source(RequestErrorKind::Other, err))?;

        let message = self
            .raw_request(subject, request)
            .map_err(|err| match err.kind() {
                client::RequestErrorKind::TimedOut => RequestError::new(RequestErrorKind::TimedOut),
                client::RequestErrorKind::NoResponders => {
                    RequestError::new(RequestErrorKind::NoResponders)
                }
                _ => RequestError::with_source(RequestErrorKind::Other, err),
            })
            .await?;

        serde_json::from_slice(message.payload.as_ref())
            .map_err(|err| RequestError::with_source(RequestErrorKind::Other, err))
    }

    /// Sends a request to `<prefix>.<subject>` and returns the raw reply.
    pub(crate) async fn raw_request(
        &self,
        subject: String,
        payload: Bytes,
    ) -> Result<Message, client::RequestError> {
        let subject = format!("{}.{}", self.prefix, subject);
        trace!("JetStream request sent: {}", subject);
        self.client
            .send_request(
                subject,
                Request::new().payload(payload).timeout(Some(self.timeout)),
            )
            .await
    }

    /// Creates a new stream, or returns the existing one if the configuration
    /// is identical.
    pub async fn create_stream<S>(&self, stream_config: S) -> Result<Stream, CreateStreamError>
    where
        stream::Config: From<S>,
    {
        let config: stream::Config = stream_config.into();
        if config.name.is_empty() {
            return Err(CreateStreamError::new(CreateStreamErrorKind::EmptyStreamName));
        }
        if config.name.contains(['.', '*', '>', ' ']) {
            return Err(CreateStreamError::new(CreateStreamErrorKind::InvalidStreamName));
        }

        let subject = format!("STREAM.CREATE.{}", config.name);
        match self.request(subject, &config).await? {
            Response::Err { error } => Err(error.into()),
            Response::Ok::<Info>(info) => Ok(Stream {
                context: self.clone(),
                name: info.config.name.clone(),
                info,
            }),
        }
    }

    /// Looks up a stream by name.
    pub async fn get_stream<T: AsRef<str>>(&self, stream: T) -> Result<Stream, GetStreamError> {
        let stream = stream.as_ref();
        if stream.is_empty() {
            return Err(GetStreamError::new(GetStreamErrorKind::EmptyName));
        }

        let subject = format!("STREAM.INFO.{}", stream);
        match self
            .request(subject, &())
            .await
            .map_err(|err| match err.kind() {
                RequestErrorKind::TimedOut => GetStreamError::new(GetStreamErrorKind::TimedOut),
                _ => GetStreamError::with_source(GetStreamErrorKind::Request, err),
            })? {
            Response::Err { error } => Err(GetStreamError::new(GetStreamErrorKind::JetStream(error))),
            Response::Ok::<Info>(info) => Ok(Stream {
                context: self.clone(),
                info,
                name: stream.to_string(),
            }),
        }
    }

    /// Updates the configuration of an existing stream.
    pub async fn update_stream<S>(&self, config: S) -> Result<Info, UpdateStreamError>
    where
        S: std::borrow::Borrow<stream::Config>,
    {
        let config = config.borrow();
        if config.name.is_empty() {
            return Err(UpdateStreamError::new(CreateStreamErrorKind::EmptyStreamName));
        }

        let subject = format!("STREAM.UPDATE.{}", config.name);
        match self.request(subject, config).await? {
            Response::Err { error } => Err(error.into()),
            Response::Ok(info) => Ok(info),
        }
    }

    /// Deletes a stream and every message in it.
    pub async fn delete_stream<T: AsRef<str>>(
        &self,
        stream: T,
    ) -> Result<DeleteStatus, DeleteStreamError> {
        let stream = stream.as_ref();
        if stream.is_empty() {
            return Err(DeleteStreamError::new(GetStreamErrorKind::EmptyName));
        }

        let subject = format!("STREAM.DELETE.{}", stream);
        match self
            .request(subject, &json!({}))
            .await
            .map_err(|err| match err.kind() {
                RequestErrorKind::TimedOut => DeleteStreamError::new(GetStreamErrorKind::TimedOut),
                _ => DeleteStreamError::with_source(GetStreamErrorKind::Request, err),
            })? {
            Response::Err { error } => Err(DeleteStreamError::new(GetStreamErrorKind::JetStream(
                error,
            ))),
            Response::Ok(delete_status) => Ok(delete_status),
        }
    }

    /// Lists names of all streams.
    pub fn stream_names(&self) -> StreamNames {
        StreamNames {
            context: self.clone(),
            subject: None,
            offset: 0,
            page_request: None,
            streams: VecDeque::new(),
            done: false,
        }
    }

    pub(crate) async fn create_consumer_on_stream<C: IntoConsumerConfig + Clone>(
        &self,
        config: C,
        stream: String,
    ) -> Result<Consumer<C>, ConsumerError> {
        let consumer_config = config.clone().into_consumer_config();

        let subject = match consumer_config.durable_name {
            Some(ref durable_name) => {
                format!("CONSUMER.DURABLE.CREATE.{}.{}", stream, durable_name)
            }
            None => format!("CONSUMER.CREATE.{}", stream),
        };

        match self
            .request(
                subject,
                &json!({"stream_name": stream.as_str(), "config": consumer_config}),
            )
            .await?
        {
            Response::Err { error } => Err(ConsumerError::new(ConsumerErrorKind::JetStream(error))),
            Response::Ok::<consumer::Info>(info) => Ok(Consumer::new(config, info, self.clone())),
        }
    }

    /// Creates a new key-value bucket.
    ///
    /// # Examples
    ///
    /// ```
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), nats_kv::Error> {
    /// let server = nats_kv::memory::Server::new();
    /// let jetstream = nats_kv::jetstream::new(server.connect());
    ///
    /// let kv = jetstream
    ///     .create_key_value(nats_kv::jetstream::kv::Config {
    ///         bucket: "kv".to_string(),
    ///         history: 10,
    ///         ..Default::default()
    ///     })
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn create_key_value(
        &self,
        config: kv::Config,
    ) -> Result<kv::Store, CreateKeyValueError> {
        if !subject::is_valid_bucket_name(&config.bucket) {
            return Err(CreateKeyValueError::new(
                CreateKeyValueErrorKind::InvalidBucketName,
            ));
        }

        let history = match config.history {
            history if history > MAX_HISTORY => {
                return Err(CreateKeyValueError::new(
                    CreateKeyValueErrorKind::HistoryTooLarge,
                ));
            }
            history if history < 1 => 1,
            history => history,
        };

        let duplicate_window = if config.max_age > Duration::ZERO
            && config.max_age < MAX_DUPLICATE_WINDOW
        {
            config.max_age
        } else {
            MAX_DUPLICATE_WINDOW
        };

        let stream = self
            .create_stream(stream::Config {
                name: subject::kv_stream_name(&config.bucket),
                description: (!config.description.is_empty()).then(|| config.description.clone()),
                subjects: vec![subject::kv_watch_all(&config.bucket)],
                max_messages_per_subject: history,
                max_messages: -1,
                max_bytes: or_unlimited(config.max_bytes),
                max_age: config.max_age,
                max_message_size: if config.max_value_size == 0 {
                    -1
                } else {
                    config.max_value_size
                },
                max_consumers: -1,
                storage: config.storage,
                num_replicas: config.num_replicas.max(1),
                discard: DiscardPolicy::New,
                allow_rollup: true,
                allow_direct: true,
                deny_delete: true,
                duplicate_window,
                compression: config.compression.then_some(Compression::S2),
                ..Default::default()
            })
            .await
            .map_err(|err| match err.kind() {
                CreateStreamErrorKind::TimedOut => {
                    CreateKeyValueError::new(CreateKeyValueErrorKind::TimedOut)
                }
                CreateStreamErrorKind::JetStream(error)
                    if error.error_code() == ErrorCode::STREAM_NAME_EXIST =>
                {
                    CreateKeyValueError::with_source(CreateKeyValueErrorKind::BucketExists, err)
                }
                _ => CreateKeyValueError::with_source(CreateKeyValueErrorKind::BucketCreate, err),
            })?;

        Ok(kv::Store::new(config.bucket, stream))
    }

    /// Binds to an existing key-value bucket.
    pub async fn get_key_value<T: Into<String>>(
        &self,
        bucket: T,
    ) -> Result<kv::Store, KeyValueError> {
        let bucket: String = bucket.into();
        if !subject::is_valid_bucket_name(&bucket) {
            return Err(KeyValueError::new(KeyValueErrorKind::InvalidBucketName));
        }

        let stream = self
            .get_stream(subject::kv_stream_name(&bucket))
            .await
            .map_err(|err| match err.kind() {
                GetStreamErrorKind::JetStream(error)
                    if error.error_code() == ErrorCode::STREAM_NOT_FOUND =>
                {
                    KeyValueError::new(KeyValueErrorKind::BucketNotFound)
                }
                _ => KeyValueError::with_source(KeyValueErrorKind::GetBucket, err),
            })?;

        if stream.info.config.max_messages_per_subject < 1 {
            return Err(KeyValueError::new(KeyValueErrorKind::BadBucket));
        }

        Ok(kv::Store::new(bucket, stream))
    }

    /// Deletes a key-value bucket together with its backing stream.
    pub async fn delete_key_value<T: AsRef<str>>(
        &self,
        bucket: T,
    ) -> Result<DeleteStatus, KeyValueError> {
        if !subject::is_valid_bucket_name(bucket.as_ref()) {
            return Err(KeyValueError::new(KeyValueErrorKind::InvalidBucketName));
        }

        self.delete_stream(subject::kv_stream_name(bucket.as_ref()))
            .await
            .map_err(|err| match err.kind() {
                GetStreamErrorKind::JetStream(error)
                    if error.error_code() == ErrorCode::STREAM_NOT_FOUND =>
                {
                    KeyValueError::new(KeyValueErrorKind::BucketNotFound)
                }
                _ => KeyValueError::with_source(KeyValueErrorKind::GetBucket, err),
            })
    }

    /// Lists names of the key-value buckets.
    pub fn key_value_store_names(&self) -> BucketNames {
        BucketNames::new(self, "$KV.*.>", "KV_")
    }

    /// Creates a new object bucket.
    pub async fn create_object_store(
        &self,
        config: object_store::Config,
    ) -> Result<ObjectStore, CreateObjectStoreError> {
        if !subject::is_valid_bucket_name(&config.bucket) {
            return Err(CreateObjectStoreError::new(
                CreateObjectStoreErrorKind::InvalidBucketName,
            ));
        }

        let stream = self
            .create_stream(stream::Config {
                name: subject::object_stream_name(&config.bucket),
                description: config.description.clone(),
                subjects: vec![
                    subject::object_all_chunks(&config.bucket),
                    subject::object_all_meta(&config.bucket),
                ],
                max_messages: -1,
                max_bytes: or_unlimited(config.max_bytes),
                max_age: config.max_age,
                max_message_size: -1,
                max_consumers: -1,
                storage: config.storage,
                num_replicas: config.num_replicas.max(1),
                discard: DiscardPolicy::New,
                allow_rollup: true,
                allow_direct: true,
                compression: config.compression.then_some(Compression::S2),
                ..Default::default()
            })
            .await
            .map_err(|err| match err.kind() {
                CreateStreamErrorKind::TimedOut => {
                    CreateObjectStoreError::new(CreateObjectStoreErrorKind::TimedOut)
                }
                _ => CreateObjectStoreError::with_source(
                    CreateObjectStoreErrorKind::BucketCreate,
                    err,
                ),
            })?;

        Ok(ObjectStore::new(config.bucket, stream))
    }

    /// Binds to an existing object bucket.
    pub async fn get_object_store<T: AsRef<str>>(
        &self,
        bucket: T,
    ) -> Result<ObjectStore, ObjectStoreError> {
        let bucket = bucket.as_ref();
        if !subject::is_valid_bucket_name(bucket) {
            return Err(ObjectStoreError::new(ObjectStoreErrorKind::InvalidBucketName));
        }

        let stream = self
            .get_stream(subject::object_stream_name(bucket))
            .await
            .map_err(|err| match err.kind() {
                GetStreamErrorKind::JetStream(error)
                    if error.error_code() == ErrorCode::STREAM_NOT_FOUND =>
                {
                    ObjectStoreError::new(ObjectStoreErrorKind::BucketNotFound)
                }
                _ => ObjectStoreError::with_source(ObjectStoreErrorKind::GetStore, err),
            })?;

        Ok(ObjectStore::new(bucket.to_string(), stream))
    }

    /// Deletes an object bucket together with its backing stream.
    pub async fn delete_object_store<T: AsRef<str>>(
        &self,
        bucket: T,
    ) -> Result<(), ObjectStoreError> {
        if !subject::is_valid_bucket_name(bucket.as_ref()) {
            return Err(ObjectStoreError::new(ObjectStoreErrorKind::InvalidBucketName));
        }

        self.delete_stream(subject::object_stream_name(bucket.as_ref()))
            .await
            .map_err(|err| match err.kind() {
                GetStreamErrorKind::JetStream(error)
                    if error.error_code() == ErrorCode::STREAM_NOT_FOUND =>
                {
                    ObjectStoreError::new(ObjectStoreErrorKind::BucketNotFound)
                }
                _ => ObjectStoreError::with_source(ObjectStoreErrorKind::GetStore, err),
            })?;
        Ok(())
    }

    /// Lists names of the object buckets.
    pub fn object_store_names(&self) -> BucketNames {
        BucketNames::new(self, "$O.*.>", "OBJ_")
    }
}

fn or_unlimited(limit: i64) -> i64 {
    if limit == 0 {
        -1
    } else {
        limit
    }
}

/// Pending acknowledgment of a JetStream publish.
///
/// Await it to learn the sequence the message was stored at.
#[derive(Debug)]
pub struct PublishAckFuture {
    receiver: oneshot::Receiver<Option<Option<Message>>>,
}

impl PublishAckFuture {
    async fn next_with_timeout(self) -> Result<PublishAck, PublishError> {
        let message = match self.receiver.await {
            Ok(Some(Some(message))) => message,
            Ok(Some(None)) | Err(_) => {
                return Err(PublishError::new(PublishErrorKind::BrokenPipe));
            }
            Ok(None) => return Err(PublishError::new(PublishErrorKind::TimedOut)),
        };

        if message.status == Some(StatusCode::NO_RESPONDERS) {
            return Err(PublishError::new(PublishErrorKind::StreamNotFound));
        }

        let response: Response<PublishAck> = serde_json::from_slice(message.payload.as_ref())
            .map_err(|err| PublishError::with_source(PublishErrorKind::InvalidAck, err))?;

        match response {
            Response::Err { error } => match error.error_code() {
                ErrorCode::STREAM_WRONG_LAST_SEQUENCE => Err(PublishError::with_source(
                    PublishErrorKind::WrongLastSequence,
                    error,
                )),
                ErrorCode::STREAM_NOT_FOUND => Err(PublishError::with_source(
                    PublishErrorKind::StreamNotFound,
                    error,
                )),
                _ => Err(PublishError::with_source(PublishErrorKind::Other, error)),
            },
            Response::Ok(publish_ack) => Ok(publish_ack),
        }
    }
}

impl IntoFuture for PublishAckFuture {
    type Output = Result<PublishAck, PublishError>;

    type IntoFuture = BoxFuture<'static, Result<PublishAck, PublishError>>;

    fn into_future(self) -> Self::IntoFuture {
        self.next_with_timeout().boxed()
    }
}

#[derive(Deserialize)]
struct StreamPage {
    total: usize,
    streams: Option<Vec<String>>,
}

async fn stream_names_page(
    context: Context,
    subject: Option<String>,
    offset: usize,
) -> Result<(Vec<String>, usize), RequestError> {
    match context
        .request(
            "STREAM.NAMES".to_string(),
            &json!({ "offset": offset, "subject": subject }),
        )
        .await?
    {
        Response::Err { error } => Err(error.into()),
        Response::Ok::<StreamPage>(page) => Ok((page.streams.unwrap_or_default(), page.total)),
    }
}

type PageRequest = BoxFuture<'static, Result<(Vec<String>, usize), RequestError>>;

/// Lazily fetched, paged list of stream names.
pub struct StreamNames {
    context: Context,
    pub(crate) subject: Option<String>,
    offset: usize,
    page_request: Option<PageRequest>,
    streams: VecDeque<String>,
    done: bool,
}

impl futures::Stream for StreamNames {
    type Item = Result<String, StreamsError>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(stream) = self.streams.pop_front() {
                return Poll::Ready(Some(Ok(stream)));
            }
            if self.done {
                return Poll::Ready(None);
            }

            match self.page_request.as_mut() {
                Some(page) => match page.poll_unpin(cx) {
                    Poll::Ready(page) => {
                        self.page_request = None;
                        let (streams, total) = page.map_err(|err| match err.kind() {
                            RequestErrorKind::TimedOut => {
                                StreamsError::new(StreamsErrorKind::TimedOut)
                            }
                            _ => StreamsError::with_source(StreamsErrorKind::Other, err),
                        })?;
                        self.offset += streams.len();
                        if streams.is_empty() || self.offset >= total {
                            self.done = true;
                        }
                        self.streams.extend(streams);
                    }
                    Poll::Pending => return Poll::Pending,
                },
                None => {
                    let context = self.context.clone();
                    let subject = self.subject.clone();
                    let offset = self.offset;
                    self.page_request = Some(Box::pin(stream_names_page(context, subject, offset)));
                }
            }
        }
    }
}

/// Names of the buckets of one kind, with the stream name prefix removed.
pub struct BucketNames {
    stream_names: StreamNames,
    prefix: &'static str,
}

impl BucketNames {
    fn new(context: &Context, subjects: &str, prefix: &'static str) -> BucketNames {
        let mut stream_names = context.stream_names();
        stream_names.subject = Some(subjects.to_owned());
        BucketNames {
            stream_names,
            prefix,
        }
    }
}

impl futures::Stream for BucketNames {
    type Item = Result<String, StreamsError>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        loop {
            match futures::ready!(self.stream_names.poll_next_unpin(cx)) {
                Some(Ok(name)) => {
                    if let Some(bucket) = name.strip_prefix(self.prefix) {
                        return Poll::Ready(Some(Ok(bucket.to_string())));
                    }
                }
                other => return Poll::Ready(other),
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RequestErrorKind {
    NoResponders,
    TimedOut,
    Other,
}

impl Display for RequestErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimedOut => write!(f, "timed out"),
            Self::Other => write!(f, "request failed"),
            Self::NoResponders => write!(f, "requested JetStream resource does not exist"),
        }
    }
}

pub type RequestError = Error<RequestErrorKind>;

impl From<super::errors::Error> for RequestError {
    fn from(err: super::errors::Error) -> Self {
        RequestError::with_source(RequestErrorKind::Other, err)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PublishErrorKind {
    StreamNotFound,
    WrongLastSequence,
    TimedOut,
    BrokenPipe,
    InvalidAck,
    Other,
}

impl Display for PublishErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StreamNotFound => write!(f, "no stream found for given subject"),
            Self::TimedOut => write!(f, "timed out: didn't receive ack in time"),
            Self::Other => write!(f, "publish failed"),
            Self::BrokenPipe => write!(f, "broken pipe"),
            Self::WrongLastSequence => write!(f, "wrong last sequence"),
            Self::InvalidAck => write!(f, "malformed publish ack"),
        }
    }
}

pub type PublishError = Error<PublishErrorKind>;

#[derive(Clone, Debug, PartialEq)]
pub enum CreateStreamErrorKind {
    EmptyStreamName,
    InvalidStreamName,
    JetStream(super::errors::Error),
    TimedOut,
    Response,
}

impl Display for CreateStreamErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyStreamName => write!(f, "stream name cannot be empty"),
            Self::InvalidStreamName => write!(f, "stream name cannot contain `.`, `*`, `>` or spaces"),
            Self::JetStream(err) => write!(f, "jetstream error: {}", err),
            Self::TimedOut => write!(f, "jetstream request timed out"),
            Self::Response => write!(f, "failed to parse server response"),
        }
    }
}

pub type CreateStreamError = Error<CreateStreamErrorKind>;
pub type UpdateStreamError = CreateStreamError;

impl From<super::errors::Error> for CreateStreamError {
    fn from(error: super::errors::Error) -> Self {
        CreateStreamError::new(CreateStreamErrorKind::JetStream(error))
    }
}

impl From<RequestError> for CreateStreamError {
    fn from(error: RequestError) -> Self {
        match error.kind() {
            RequestErrorKind::TimedOut => CreateStreamError::new(CreateStreamErrorKind::TimedOut),
            _ => CreateStreamError::with_source(CreateStreamErrorKind::Response, error),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum GetStreamErrorKind {
    EmptyName,
    Request,
    TimedOut,
    JetStream(super::errors::Error),
}

impl Display for GetStreamErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyName => write!(f, "empty name cannot be empty"),
            Self::Request => write!(f, "request error"),
            Self::TimedOut => write!(f, "timed out"),
            Self::JetStream(err) => write!(f, "jetstream error: {}", err),
        }
    }
}

pub type GetStreamError = Error<GetStreamErrorKind>;
pub type DeleteStreamError = GetStreamError;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StreamsErrorKind {
    TimedOut,
    Other,
}

impl Display for StreamsErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimedOut => write!(f, "timed out"),
            Self::Other => write!(f, "error listing streams"),
        }
    }
}

pub type StreamsError = Error<StreamsErrorKind>;

#[derive(Clone, Debug, PartialEq)]
pub enum ConsumerErrorKind {
    TimedOut,
    Request,
    JetStream(super::errors::Error),
}

impl Display for ConsumerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimedOut => write!(f, "timed out"),
            Self::Request => write!(f, "request failed"),
            Self::JetStream(err) => write!(f, "JetStream error: {}", err),
        }
    }
}

pub type ConsumerError = Error<ConsumerErrorKind>;

impl From<RequestError> for ConsumerError {
    fn from(err: RequestError) -> Self {
        match err.kind() {
            RequestErrorKind::TimedOut => ConsumerError::new(ConsumerErrorKind::TimedOut),
            _ => ConsumerError::with_source(ConsumerErrorKind::Request, err),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CreateKeyValueErrorKind {
    InvalidBucketName,
    HistoryTooLarge,
    BucketExists,
    BucketCreate,
    TimedOut,
}

impl Display for CreateKeyValueErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidBucketName => write!(f, "invalid bucket name"),
            Self::HistoryTooLarge => write!(f, "history limited to a max of {}", MAX_HISTORY),
            Self::BucketExists => {
                write!(f, "bucket already exists with a different configuration")
            }
            Self::BucketCreate => write!(f, "failed to create key value store"),
            Self::TimedOut => write!(f, "timed out"),
        }
    }
}

pub type CreateKeyValueError = Error<CreateKeyValueErrorKind>;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum KeyValueErrorKind {
    InvalidBucketName,
    BucketNotFound,
    BadBucket,
    GetBucket,
}

impl Display for KeyValueErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidBucketName => write!(f, "invalid bucket name"),
            Self::BucketNotFound => write!(f, "bucket not found"),
            Self::BadBucket => write!(f, "bucket is not a valid key value store"),
            Self::GetBucket => write!(f, "failed to get the bucket"),
        }
    }
}

pub type KeyValueError = Error<KeyValueErrorKind>;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CreateObjectStoreErrorKind {
    InvalidBucketName,
    BucketCreate,
    TimedOut,
}

impl Display for CreateObjectStoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidBucketName => write!(f, "invalid bucket name"),
            Self::BucketCreate => write!(f, "failed to create object store"),
            Self::TimedOut => write!(f, "timed out"),
        }
    }
}

pub type CreateObjectStoreError = Error<CreateObjectStoreErrorKind>;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ObjectStoreErrorKind {
    InvalidBucketName,
    BucketNotFound,
    GetStore,
}

impl Display for ObjectStoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidBucketName => write!(f, "invalid bucket name"),
            Self::BucketNotFound => write!(f, "bucket not found"),
            Self::GetStore => write!(f, "failed to get the object store"),
        }
    }
}

pub type ObjectStoreError = Error<ObjectStoreErrorKind>;
