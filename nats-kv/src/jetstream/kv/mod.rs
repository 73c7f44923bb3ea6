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

//! A key-value store built on a JetStream stream.

pub mod bucket;

use std::fmt::{self, Display};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;

use crate::error::Error;
use crate::header::{self, HeaderMap};
use crate::subject::{is_valid_key, is_valid_search_key};

use self::bucket::Status;

use super::context::{PublishError, PublishErrorKind};
use super::stream::{
    DirectGetErrorKind, LastRawMessageErrorKind, StorageType, Stream, StreamMessage,
};
use super::watcher::{Decoded, Update, WatchOptions, Watcher, WatcherError, WatcherErrorKind};

pub(crate) const MAX_HISTORY: i64 = 64;
const ALL_KEYS: &str = ">";

const KV_OPERATION_DELETE: &str = "DEL";
const KV_OPERATION_PURGE: &str = "PURGE";
const ROLLUP_SUBJECT: &str = "sub";

const DEFAULT_PURGE_DELETES_OLDER_THAN: Duration = Duration::from_secs(30 * 60);

/// Configuration values for key value stores.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Name of the bucket
    pub bucket: String,
    /// Human readable description.
    #[serde(default)]
    pub description: String,
    /// Maximum size of a single value. `0` means unlimited.
    #[serde(default)]
    pub max_value_size: i32,
    /// Maximum historical entries, at most 64. `0` keeps a single revision.
    #[serde(default)]
    pub history: i64,
    /// Maximum age of any entry in the bucket, expressed in nanoseconds
    #[serde(default, with = "serde_nanos")]
    pub max_age: Duration,
    /// How large the bucket may become in total bytes before the configured discard policy kicks in
    #[serde(default)]
    pub max_bytes: i64,
    /// The type of storage backend, `File` (default) and `Memory`
    #[serde(default)]
    pub storage: StorageType,
    /// How many replicas to keep for each entry in a cluster.
    #[serde(default)]
    pub num_replicas: usize,
    /// Whether the underlying stream should be compressed
    #[serde(default)]
    pub compression: bool,
}

/// Describes what kind of operation and entry represents
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Operation {
    /// A value was put into the bucket
    Put,
    /// A value was deleted from a bucket
    Delete,
    /// A value was purged from a bucket
    Purge,
}

fn operation_from_headers(headers: Option<&HeaderMap>) -> Operation {
    match headers.and_then(|headers| headers.get_last(header::KV_OPERATION)) {
        Some(KV_OPERATION_DELETE) => Operation::Delete,
        Some(KV_OPERATION_PURGE) => Operation::Purge,
        _ => Operation::Put,
    }
}

/// Options of [Store::purge_deletes].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurgeDeletesOptions {
    /// Markers younger than this keep their last message so that other
    /// watchers still see the deletion. [Duration::ZERO] purges every
    /// marker entirely.
    pub delete_markers_older_than: Duration,
}

impl Default for PurgeDeletesOptions {
    fn default() -> Self {
        PurgeDeletesOptions {
            delete_markers_older_than: DEFAULT_PURGE_DELETES_OLDER_THAN,
        }
    }
}

/// A struct used as a handle for the bucket.
#[derive(Debug, Clone)]
pub struct Store {
    pub name: String,
    pub stream_name: String,
    pub prefix: String,
    pub stream: Stream,
}

impl Store {
    pub(crate) fn new(bucket: String, stream: Stream) -> Store {
        Store {
            prefix: format!("{}.{}.", crate::subject::KV_PREFIX, bucket),
            stream_name: stream.name.clone(),
            name: bucket,
            stream,
        }
    }

    /// The name of the bucket.
    pub fn bucket(&self) -> &str {
        &self.name
    }

    fn subject(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Queries the server and returns status from the server.
    ///
    /// # Examples
    ///
    /// ```
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), nats_kv::Error> {
    /// let server = nats_kv::memory::Server::new();
    /// let jetstream = nats_kv::jetstream::new(server.connect());
    /// let kv = jetstream.create_key_value(nats_kv::jetstream::kv::Config {
    ///     bucket: "kv".to_string(),
    ///     history: 10,
    ///     ..Default::default()
    /// }).await?;
    /// let status = kv.status().await?;
    /// assert_eq!(status.history(), 10);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn status(&self) -> Result<Status, StatusError> {
        let info = self.stream.get_info().await.map_err(|err| match err.kind() {
            super::context::RequestErrorKind::TimedOut => {
                StatusError::new(StatusErrorKind::TimedOut)
            }
            _ => StatusError::with_source(StatusErrorKind::Other, err),
        })?;

        Ok(Status {
            info,
            bucket: self.name.to_string(),
        })
    }

    /// Puts new key value pair into the bucket.
    /// If key didn't exist, it is created. If it did exist, a new value with a new version is
    /// added.
    ///
    /// # Examples
    ///
    /// ```
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), nats_kv::Error> {
    /// let server = nats_kv::memory::Server::new();
    /// let jetstream = nats_kv::jetstream::new(server.connect());
    /// let kv = jetstream.create_key_value(nats_kv::jetstream::kv::Config {
    ///     bucket: "kv".to_string(),
    ///     history: 10,
    ///     ..Default::default()
    /// }).await?;
    /// let revision = kv.put("key", "value".into()).await?;
    /// assert_eq!(revision, 1);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn put<T: AsRef<str>>(&self, key: T, value: Bytes) -> Result<u64, PutError> {
        if !is_valid_key(key.as_ref()) {
            return Err(PutError::new(PutErrorKind::InvalidKey));
        }

        let publish_ack = self
            .stream
            .context
            .publish(self.subject(key.as_ref()), value)
            .await
            .map_err(|err| PutError::with_source(PutErrorKind::Publish, err))?;
        let ack = publish_ack
            .await
            .map_err(|err| PutError::with_source(PutErrorKind::Ack, err))?;

        Ok(ack.sequence)
    }

    /// Puts a string value, see [Store::put].
    pub async fn put_string<T: AsRef<str>>(&self, key: T, value: &str) -> Result<u64, PutError> {
        self.put(key, Bytes::copy_from_slice(value.as_bytes()))
            .await
    }

    /// Retrieves the last [Entry] for a given key from a bucket, delete and
    /// purge markers included.
    ///
    /// Returns `None` if the key was never written or has been purged by
    /// [Store::purge_deletes].
    pub async fn entry<T: Into<String>>(&self, key: T) -> Result<Option<Entry>, EntryError> {
        let key: String = key.into();
        if !is_valid_key(key.as_ref()) {
            return Err(EntryError::new(EntryErrorKind::InvalidKey));
        }

        let subject = self.subject(&key);

        let message = if self.stream.info.config.allow_direct {
            match self.stream.direct_get_last_for_subject(&subject).await {
                Ok(message) => message,
                Err(err) => {
                    return match err.kind() {
                        DirectGetErrorKind::NotFound => Ok(None),
                        DirectGetErrorKind::TimedOut => {
                            Err(EntryError::new(EntryErrorKind::TimedOut))
                        }
                        _ => Err(EntryError::with_source(EntryErrorKind::Other, err)),
                    }
                }
            }
        } else {
            match self.stream.get_last_raw_message_by_subject(&subject).await {
                Ok(message) => message,
                Err(err) => {
                    return match err.kind() {
                        LastRawMessageErrorKind::NoMessageFound => Ok(None),
                        LastRawMessageErrorKind::TimedOut => {
                            Err(EntryError::new(EntryErrorKind::TimedOut))
                        }
                        _ => Err(EntryError::with_source(EntryErrorKind::Other, err)),
                    }
                }
            }
        };

        Ok(Some(Entry::from_stream_message(self.name.clone(), key, message)))
    }

    /// Retrieves the current value of a key.
    ///
    /// Fails with [EntryErrorKind::NotFound] if there is no value, or if the
    /// key was deleted or purged.
    ///
    /// # Examples
    ///
    /// ```
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), nats_kv::Error> {
    /// let server = nats_kv::memory::Server::new();
    /// let jetstream = nats_kv::jetstream::new(server.connect());
    /// let kv = jetstream.create_key_value(nats_kv::jetstream::kv::Config {
    ///     bucket: "kv".to_string(),
    ///     ..Default::default()
    /// }).await?;
    /// kv.put("key", "value".into()).await?;
    /// let entry = kv.get("key").await?;
    /// assert_eq!(entry.value.as_ref(), b"value");
    /// # Ok(())
    /// # }
    /// ```
    pub async fn get<T: Into<String>>(&self, key: T) -> Result<Entry, EntryError> {
        match self.entry(key).await? {
            Some(entry) if entry.operation == Operation::Put => Ok(entry),
            _ => Err(EntryError::new(EntryErrorKind::NotFound)),
        }
    }

    /// Retrieves the value stored at a given revision of a key.
    ///
    /// Fails with [EntryErrorKind::NotFound] if the revision belongs to
    /// another key, or is a delete or purge marker.
    pub async fn get_revision<T: Into<String>>(
        &self,
        key: T,
        revision: u64,
    ) -> Result<Entry, EntryError> {
        let key: String = key.into();
        if !is_valid_key(key.as_ref()) {
            return Err(EntryError::new(EntryErrorKind::InvalidKey));
        }

        let message = if self.stream.info.config.allow_direct {
            self.stream
                .direct_get(revision)
                .await
                .map_err(|err| match err.kind() {
                    DirectGetErrorKind::NotFound => EntryError::new(EntryErrorKind::NotFound),
                    DirectGetErrorKind::TimedOut => EntryError::new(EntryErrorKind::TimedOut),
                    _ => EntryError::with_source(EntryErrorKind::Other, err),
                })?
        } else {
            self.stream
                .get_raw_message(revision)
                .await
                .map_err(|err| match err.kind() {
                    LastRawMessageErrorKind::NoMessageFound => {
                        EntryError::new(EntryErrorKind::NotFound)
                    }
                    LastRawMessageErrorKind::TimedOut => EntryError::new(EntryErrorKind::TimedOut),
                    _ => EntryError::with_source(EntryErrorKind::Other, err),
                })?
        };

        if message.subject != self.subject(&key) {
            return Err(EntryError::new(EntryErrorKind::NotFound));
        }

        let entry = Entry::from_stream_message(self.name.clone(), key, message);
        if entry.operation != Operation::Put {
            return Err(EntryError::new(EntryErrorKind::NotFound));
        }
        Ok(entry)
    }

    /// Creates a key only if it has no value, or if its last entry is a
    /// delete or purge marker.
    ///
    /// # Examples
    ///
    /// ```
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), nats_kv::Error> {
    /// use nats_kv::jetstream::kv::CreateErrorKind;
    ///
    /// let server = nats_kv::memory::Server::new();
    /// let jetstream = nats_kv::jetstream::new(server.connect());
    /// let kv = jetstream.create_key_value(nats_kv::jetstream::kv::Config {
    ///     bucket: "kv".to_string(),
    ///     ..Default::default()
    /// }).await?;
    /// kv.create("key", "value".into()).await?;
    /// let err = kv.create("key", "other".into()).await.unwrap_err();
    /// assert_eq!(err.kind(), CreateErrorKind::AlreadyExists);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn create<T: AsRef<str>>(&self, key: T, value: Bytes) -> Result<u64, CreateError> {
        let err = match self.update(key.as_ref(), value.clone(), 0).await {
            Ok(revision) => return Ok(revision),
            Err(err) => err,
        };

        match err.kind() {
            UpdateErrorKind::WrongLastRevision => (),
            UpdateErrorKind::InvalidKey => return Err(CreateError::new(CreateErrorKind::InvalidKey)),
            UpdateErrorKind::TimedOut => return Err(CreateError::new(CreateErrorKind::TimedOut)),
            UpdateErrorKind::Other => {
                return Err(CreateError::with_source(CreateErrorKind::Other, err));
            }
        }

        // Deleted keys can be created again, at the revision of the marker.
        let entry = self
            .entry(key.as_ref())
            .await
            .map_err(|err| CreateError::with_source(CreateErrorKind::Other, err))?;
        match entry {
            Some(entry) if entry.operation != Operation::Put => {
                debug!("recreating deleted key at revision {}", entry.revision);
                self.update(key, value, entry.revision)
                    .await
                    .map_err(|err| match err.kind() {
                        UpdateErrorKind::WrongLastRevision => {
                            CreateError::new(CreateErrorKind::AlreadyExists)
                        }
                        UpdateErrorKind::TimedOut => CreateError::new(CreateErrorKind::TimedOut),
                        _ => CreateError::with_source(CreateErrorKind::Other, err),
                    })
            }
            _ => Err(CreateError::with_source(CreateErrorKind::AlreadyExists, err)),
        }
    }

    /// Updates a value for a given key, but only if passed `revision` is the last `revision` in
    /// the bucket.
    ///
    /// # Examples
    ///
    /// ```
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), nats_kv::Error> {
    /// let server = nats_kv::memory::Server::new();
    /// let jetstream = nats_kv::jetstream::new(server.connect());
    /// let kv = jetstream.create_key_value(nats_kv::jetstream::kv::Config {
    ///     bucket: "kv".to_string(),
    ///     history: 10,
    ///     ..Default::default()
    /// }).await?;
    /// let revision = kv.put("key", "value".into()).await?;
    /// kv.update("key", "updated".into(), revision).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn update<T: AsRef<str>>(
        &self,
        key: T,
        value: Bytes,
        revision: u64,
    ) -> Result<u64, UpdateError> {
        if !is_valid_key(key.as_ref()) {
            return Err(UpdateError::new(UpdateErrorKind::InvalidKey));
        }

        let mut headers = HeaderMap::default();
        headers.insert(header::NATS_EXPECTED_LAST_SUBJECT_SEQUENCE, revision);

        let ack = self
            .stream
            .context
            .publish_with_headers(self.subject(key.as_ref()), headers, value)
            .await?
            .await?;

        Ok(ack.sequence)
    }

    /// Deletes a given key. This is a non-destructive operation, which sets a `DELETE` marker.
    ///
    /// # Examples
    ///
    /// ```
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), nats_kv::Error> {
    /// let server = nats_kv::memory::Server::new();
    /// let jetstream = nats_kv::jetstream::new(server.connect());
    /// let kv = jetstream.create_key_value(nats_kv::jetstream::kv::Config {
    ///     bucket: "kv".to_string(),
    ///     history: 10,
    ///     ..Default::default()
    /// }).await?;
    /// kv.put("key", "value".into()).await?;
    /// kv.delete("key").await?;
    /// assert!(kv.get("key").await.is_err());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn delete<T: AsRef<str>>(&self, key: T) -> Result<(), DeleteError> {
        self.delete_expect_revision(key, None).await
    }

    /// Deletes a given key if its last revision is `revision`.
    pub async fn delete_expect_revision<T: AsRef<str>>(
        &self,
        key: T,
        revision: Option<u64>,
    ) -> Result<(), DeleteError> {
        self.publish_marker(key.as_ref(), Operation::Delete, revision)
            .await
    }

    /// Purges all the revisions of a entry destructively, leaving behind a single purge entry in-place.
    ///
    /// # Examples
    ///
    /// ```
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), nats_kv::Error> {
    /// let server = nats_kv::memory::Server::new();
    /// let jetstream = nats_kv::jetstream::new(server.connect());
    /// let kv = jetstream.create_key_value(nats_kv::jetstream::kv::Config {
    ///     bucket: "kv".to_string(),
    ///     history: 10,
    ///     ..Default::default()
    /// }).await?;
    /// kv.put("key", "value".into()).await?;
    /// kv.put("key", "another".into()).await?;
    /// kv.purge("key").await?;
    /// assert_eq!(kv.history_entries("key").await?.len(), 1);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn purge<T: AsRef<str>>(&self, key: T) -> Result<(), PurgeError> {
        self.purge_expect_revision(key, None).await
    }

    /// Purges a key if its last revision is `revision`.
    pub async fn purge_expect_revision<T: AsRef<str>>(
        &self,
        key: T,
        revision: Option<u64>,
    ) -> Result<(), PurgeError> {
        self.publish_marker(key.as_ref(), Operation::Purge, revision)
            .await
    }

    async fn publish_marker(
        &self,
        key: &str,
        operation: Operation,
        revision: Option<u64>,
    ) -> Result<(), DeleteError> {
        if !is_valid_key(key) {
            return Err(DeleteError::new(DeleteErrorKind::InvalidKey));
        }

        let mut headers = HeaderMap::default();
        match operation {
            Operation::Purge => {
                headers.insert(header::KV_OPERATION, KV_OPERATION_PURGE);
                headers.insert(header::NATS_ROLLUP, ROLLUP_SUBJECT);
            }
            _ => headers.insert(header::KV_OPERATION, KV_OPERATION_DELETE),
        }
        if let Some(revision) = revision.filter(|revision| *revision > 0) {
            headers.insert(header::NATS_EXPECTED_LAST_SUBJECT_SEQUENCE, revision);
        }

        self.stream
            .context
            .publish_with_headers(self.subject(key), headers, Bytes::new())
            .await?
            .await?;
        Ok(())
    }

    /// Returns a [futures::Stream] over every stored revision of a key,
    /// oldest first. The stream ends after the latest revision.
    ///
    /// # Examples
    ///
    /// ```
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), nats_kv::Error> {
    /// use futures::TryStreamExt;
    ///
    /// let server = nats_kv::memory::Server::new();
    /// let jetstream = nats_kv::jetstream::new(server.connect());
    /// let kv = jetstream.create_key_value(nats_kv::jetstream::kv::Config {
    ///     bucket: "kv".to_string(),
    ///     history: 10,
    ///     ..Default::default()
    /// }).await?;
    /// kv.put("key", "a".into()).await?;
    /// kv.put("key", "b".into()).await?;
    ///
    /// let values: Vec<_> = kv
    ///     .history("key")
    ///     .await?
    ///     .map_ok(|entry| entry.value)
    ///     .try_collect()
    ///     .await?;
    /// assert_eq!(values, vec!["a", "b"]);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn history<T: AsRef<str>>(&self, key: T) -> Result<History, HistoryError> {
        if !is_valid_key(key.as_ref()) {
            return Err(HistoryError::new(HistoryErrorKind::InvalidKey));
        }

        let watcher = self
            .watcher(
                key.as_ref(),
                "kv history consumer",
                WatchOptions {
                    include_history: true,
                    ..Default::default()
                },
            )
            .await
            .map_err(|err| HistoryError::with_source(HistoryErrorKind::Watch, err))?;

        if watcher.initial_pending() == 0 {
            return Err(HistoryError::new(HistoryErrorKind::NotFound));
        }

        Ok(History {
            watcher,
            done: false,
        })
    }

    /// Collects [Store::history] into a vector.
    pub async fn history_entries<T: AsRef<str>>(&self, key: T) -> Result<Vec<Entry>, HistoryError> {
        self.history(key)
            .await?
            .try_collect()
            .await
            .map_err(|err| HistoryError::with_source(HistoryErrorKind::Watch, err))
    }

    /// Creates a [futures::Stream] over [Entries][Entry] of keys matching
    /// `key`, which may contain wildcards. The latest value of every matching
    /// key is delivered first, then [Update::InitialValuesDone], then changes.
    ///
    /// # Examples
    ///
    /// ```
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), nats_kv::Error> {
    /// use futures::StreamExt;
    /// use nats_kv::jetstream::watcher::Update;
    ///
    /// let server = nats_kv::memory::Server::new();
    /// let jetstream = nats_kv::jetstream::new(server.connect());
    /// let kv = jetstream.create_key_value(nats_kv::jetstream::kv::Config {
    ///     bucket: "kv".to_string(),
    ///     history: 10,
    ///     ..Default::default()
    /// }).await?;
    /// let mut entries = kv.watch("sensors.*").await?;
    /// assert!(matches!(entries.next().await, Some(Ok(Update::InitialValuesDone))));
    /// # Ok(())
    /// # }
    /// ```
    pub async fn watch<T: AsRef<str>>(&self, key: T) -> Result<Watch, WatcherError> {
        self.watch_with_options(key, WatchOptions::default()).await
    }

    /// Like [Store::watch], starting from every stored revision instead of
    /// the latest one per key.
    pub async fn watch_with_history<T: AsRef<str>>(&self, key: T) -> Result<Watch, WatcherError> {
        self.watch_with_options(
            key,
            WatchOptions {
                include_history: true,
                ..Default::default()
            },
        )
        .await
    }

    pub async fn watch_with_options<T: AsRef<str>>(
        &self,
        key: T,
        options: WatchOptions,
    ) -> Result<Watch, WatcherError> {
        if !is_valid_search_key(key.as_ref()) {
            return Err(WatcherError::new(WatcherErrorKind::InvalidKey));
        }
        self.watcher(key.as_ref(), "kv watch consumer", options)
            .await
    }

    /// Creates a [futures::Stream] over [Entries][Entry] for all keys, which yields
    /// values whenever there are changes in the bucket.
    pub async fn watch_all(&self) -> Result<Watch, WatcherError> {
        self.watch(ALL_KEYS).await
    }

    pub async fn watch_all_with_options(
        &self,
        options: WatchOptions,
    ) -> Result<Watch, WatcherError> {
        self.watch_with_options(ALL_KEYS, options).await
    }

    async fn watcher(
        &self,
        key: &str,
        description: &str,
        options: WatchOptions,
    ) -> Result<Watch, WatcherError> {
        let bucket = self.name.clone();
        let prefix = self.prefix.clone();

        Watcher::start(
            &self.stream,
            self.subject(key),
            description,
            options,
            move |message| {
                let super::Message { message, info } = message;
                let key = message
                    .subject
                    .strip_prefix(prefix.as_str())
                    .ok_or_else(|| WatcherError::new(WatcherErrorKind::Decode))?
                    .to_string();
                let operation = operation_from_headers(message.headers.as_ref());

                Ok(Decoded {
                    deleted: operation != Operation::Put,
                    value: Entry {
                        bucket: bucket.clone(),
                        key,
                        value: message.payload,
                        revision: info.stream_sequence,
                        delta: info.pending,
                        created: info.published,
                        operation,
                    },
                })
            },
        )
        .await
    }

    /// Returns the keys holding a value, deleted keys excluded.
    ///
    /// # Examples
    ///
    /// ```
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), nats_kv::Error> {
    /// let server = nats_kv::memory::Server::new();
    /// let jetstream = nats_kv::jetstream::new(server.connect());
    /// let kv = jetstream.create_key_value(nats_kv::jetstream::kv::Config {
    ///     bucket: "kv".to_string(),
    ///     history: 10,
    ///     ..Default::default()
    /// }).await?;
    /// kv.put("a", "1".into()).await?;
    /// kv.put("b", "2".into()).await?;
    /// kv.delete("a").await?;
    /// assert_eq!(kv.keys().await?, vec!["b".to_string()]);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn keys(&self) -> Result<Vec<String>, KeysError> {
        let keys: Vec<String> = self
            .list_keys()
            .await
            .map_err(|err| KeysError::with_source(KeysErrorKind::Watch, err))?
            .try_collect()
            .await
            .map_err(|err| KeysError::with_source(KeysErrorKind::Watch, err))?;

        if keys.is_empty() {
            return Err(KeysError::new(KeysErrorKind::NoKeysFound));
        }
        Ok(keys)
    }

    /// Lazy variant of [Store::keys]. Ends once every key present when it
    /// was called has been yielded.
    pub async fn list_keys(&self) -> Result<Keys, WatcherError> {
        let watcher = self
            .watch_all_with_options(WatchOptions {
                ignore_deletes: true,
                meta_only: true,
                ..Default::default()
            })
            .await?;

        Ok(Keys {
            watcher,
            done: false,
        })
    }

    /// Removes delete and purge markers from the bucket.
    ///
    /// Markers younger than [PurgeDeletesOptions::delete_markers_older_than]
    /// are reduced to the marker itself, older ones are removed entirely.
    pub async fn purge_deletes(&self, options: PurgeDeletesOptions) -> Result<(), PurgeDeletesError> {
        let mut watcher = self
            .watch_all_with_options(WatchOptions {
                meta_only: true,
                ..Default::default()
            })
            .await
            .map_err(|err| PurgeDeletesError::with_source(PurgeDeletesErrorKind::Watch, err))?;

        let mut markers = Vec::new();
        while let Some(update) = watcher
            .try_next()
            .await
            .map_err(|err| PurgeDeletesError::with_source(PurgeDeletesErrorKind::Watch, err))?
        {
            match update {
                Update::Value(entry) if entry.operation != Operation::Put => markers.push(entry),
                Update::Value(_) => (),
                Update::InitialValuesDone => break,
            }
        }
        watcher.stop();

        let limit = OffsetDateTime::now_utc() - options.delete_markers_older_than;
        for entry in markers {
            let purge = self.stream.purge().filter(self.subject(&entry.key));
            let keep_marker =
                !options.delete_markers_older_than.is_zero() && entry.created > limit;
            let response = if keep_marker {
                purge.keep(1).await
            } else {
                purge.await
            };
            response.map_err(|err| {
                PurgeDeletesError::with_source(PurgeDeletesErrorKind::Purge, err)
            })?;
        }

        Ok(())
    }
}

/// Watch over a key-value bucket.
pub type Watch = Watcher<Entry>;

/// Every revision of a key, see [Store::history].
pub struct History {
    watcher: Watch,
    done: bool,
}

impl futures::Stream for History {
    type Item = Result<Entry, WatcherError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        match futures::ready!(self.watcher.poll_next_unpin(cx)) {
            Some(Ok(Update::Value(entry))) => {
                if entry.delta == 0 {
                    self.done = true;
                }
                Poll::Ready(Some(Ok(entry)))
            }
            Some(Ok(Update::InitialValuesDone)) | None => {
                self.done = true;
                Poll::Ready(None)
            }
            Some(Err(err)) => Poll::Ready(Some(Err(err))),
        }
    }
}

/// Keys of a bucket, see [Store::list_keys].
pub struct Keys {
    watcher: Watch,
    done: bool,
}

impl futures::Stream for Keys {
    type Item = Result<String, WatcherError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        match futures::ready!(self.watcher.poll_next_unpin(cx)) {
            Some(Ok(Update::Value(entry))) => Poll::Ready(Some(Ok(entry.key))),
            Some(Ok(Update::InitialValuesDone)) | None => {
                self.done = true;
                Poll::Ready(None)
            }
            Some(Err(err)) => Poll::Ready(Some(Err(err))),
        }
    }
}

/// An entry in a key-value bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// Name of the bucket the entry is in.
    pub bucket: String,
    /// The key that was retrieved.
    pub key: String,
    /// The value that was retrieved.
    pub value: Bytes,
    /// A unique sequence for this value.
    pub revision: u64,
    /// Distance from the latest value.
    pub delta: u64,
    /// The time the data was put in the bucket.
    pub created: OffsetDateTime,
    /// The kind of operation that caused this entry.
    pub operation: Operation,
}

impl Entry {
    fn from_stream_message(bucket: String, key: String, message: StreamMessage) -> Entry {
        Entry {
            bucket,
            key,
            operation: operation_from_headers(Some(&message.headers)),
            value: message.payload,
            revision: message.sequence,
            delta: 0,
            created: message.time,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StatusErrorKind {
    TimedOut,
    Other,
}

impl Display for StatusErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimedOut => write!(f, "timed out"),
            Self::Other => write!(f, "failed getting stream info"),
        }
    }
}

pub type StatusError = Error<StatusErrorKind>;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PutErrorKind {
    InvalidKey,
    Publish,
    Ack,
}

impl Display for PutErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKey => write!(f, "key cannot be empty or start/end with `.`"),
            Self::Publish => write!(f, "failed to put key into store"),
            Self::Ack => write!(f, "ack error"),
        }
    }
}

pub type PutError = Error<PutErrorKind>;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EntryErrorKind {
    InvalidKey,
    NotFound,
    TimedOut,
    Other,
}

impl Display for EntryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKey => write!(f, "key cannot be empty or start/end with `.`"),
            Self::NotFound => write!(f, "key not found"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Other => write!(f, "failed getting entry"),
        }
    }
}

pub type EntryError = Error<EntryErrorKind>;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CreateErrorKind {
    InvalidKey,
    AlreadyExists,
    TimedOut,
    Other,
}

impl Display for CreateErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKey => write!(f, "key cannot be empty or start/end with `.`"),
            Self::AlreadyExists => write!(f, "key already exists"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Other => write!(f, "failed to create key in store"),
        }
    }
}

pub type CreateError = Error<CreateErrorKind>;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UpdateErrorKind {
    InvalidKey,
    /// The key has a newer revision than the expected one.
    WrongLastRevision,
    TimedOut,
    Other,
}

impl Display for UpdateErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKey => write!(f, "key cannot be empty or start/end with `.`"),
            Self::WrongLastRevision => write!(f, "wrong last revision"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Other => write!(f, "failed to update entry"),
        }
    }
}

pub type UpdateError = Error<UpdateErrorKind>;

impl From<PublishError> for UpdateError {
    fn from(err: PublishError) -> Self {
        match err.kind() {
            PublishErrorKind::WrongLastSequence => {
                UpdateError::with_source(UpdateErrorKind::WrongLastRevision, err)
            }
            PublishErrorKind::TimedOut => UpdateError::new(UpdateErrorKind::TimedOut),
            _ => UpdateError::with_source(UpdateErrorKind::Other, err),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DeleteErrorKind {
    InvalidKey,
    WrongLastRevision,
    TimedOut,
    Other,
}

impl Display for DeleteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKey => write!(f, "key cannot be empty or start/end with `.`"),
            Self::WrongLastRevision => write!(f, "wrong last revision"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Other => write!(f, "failed to delete entry"),
        }
    }
}

pub type DeleteError = Error<DeleteErrorKind>;
pub type PurgeError = DeleteError;

impl From<PublishError> for DeleteError {
    fn from(err: PublishError) -> Self {
        match err.kind() {
            PublishErrorKind::WrongLastSequence => {
                DeleteError::with_source(DeleteErrorKind::WrongLastRevision, err)
            }
            PublishErrorKind::TimedOut => DeleteError::new(DeleteErrorKind::TimedOut),
            _ => DeleteError::with_source(DeleteErrorKind::Other, err),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum HistoryErrorKind {
    InvalidKey,
    NotFound,
    Watch,
}

impl Display for HistoryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKey => write!(f, "key cannot be empty or start/end with `.`"),
            Self::NotFound => write!(f, "key not found"),
            Self::Watch => write!(f, "failed to read history"),
        }
    }
}

pub type HistoryError = Error<HistoryErrorKind>;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum KeysErrorKind {
    NoKeysFound,
    Watch,
}

impl Display for KeysErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoKeysFound => write!(f, "no keys found"),
            Self::Watch => write!(f, "failed to list keys"),
        }
    }
}

pub type KeysError = Error<KeysErrorKind>;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PurgeDeletesErrorKind {
    Watch,
    Purge,
}

impl Display for PurgeDeletesErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Watch => write!(f, "failed to collect delete markers"),
            Self::Purge => write!(f, "failed to purge delete markers"),
        }
    }
}

pub type PurgeDeletesError = Error<PurgeDeletesErrorKind>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_header() {
        assert_eq!(operation_from_headers(None), Operation::Put);

        let mut headers = HeaderMap::new();
        assert_eq!(operation_from_headers(Some(&headers)), Operation::Put);
        headers.insert(header::KV_OPERATION, "DEL");
        assert_eq!(operation_from_headers(Some(&headers)), Operation::Delete);
        headers.insert(header::KV_OPERATION, "PURGE");
        assert_eq!(operation_from_headers(Some(&headers)), Operation::Purge);
    }

    #[test]
    fn config_defaults() {
        let config: Config = serde_json::from_str(r#"{"bucket":"profiles"}"#).unwrap();
        assert_eq!(config.bucket, "profiles");
        assert_eq!(config.history, 0);
        assert_eq!(config.storage, StorageType::File);
        assert_eq!(
            PurgeDeletesOptions::default().delete_markers_older_than,
            Duration::from_secs(1800)
        );
    }
}
