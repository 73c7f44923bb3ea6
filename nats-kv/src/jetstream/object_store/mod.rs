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

//! Object Store module
//!
//! Objects are split into chunks published on a per-upload subject, and
//! described by a single rolled up metadata message per object name.

pub mod bucket;

use std::fmt::{self, Display};
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::{cmp, io, time::Duration};

use base64::engine::general_purpose::URL_SAFE;
use base64::engine::Engine;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use ring::digest::SHA256;
use serde::{Deserialize, Serialize};
use time::{serde::rfc3339, OffsetDateTime};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tracing::{debug, trace, warn};

use crate::error::Error;
use crate::header::{self, HeaderMap};
use crate::subject::{self, is_valid_object_name};

use self::bucket::Status;

use super::consumer::push::{Ordered, OrderedConfig};
use super::consumer::{DeliverPolicy, ReplayPolicy};
use super::context::{PublishAckFuture, PublishError, PublishErrorKind, RequestErrorKind};
use super::stream::{LastRawMessageErrorKind, PurgeError, PurgeErrorKind, StorageType, Stream};
use super::watcher::{Decoded, Update, WatchOptions, Watcher, WatcherError, WatcherErrorKind};

const DEFAULT_CHUNK_SIZE: usize = 128 * 1024;
const DIGEST_PREFIX: &str = "SHA-256=";
const ROLLUP_SUBJECT: &str = "sub";

/// Configuration values for object store buckets.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Name of the storage bucket.
    pub bucket: String,
    /// A short description of the purpose of this storage bucket.
    #[serde(default)]
    pub description: Option<String>,
    /// Maximum age of any value in the bucket, expressed in nanoseconds
    #[serde(default, with = "serde_nanos")]
    pub max_age: Duration,
    /// How large the bucket may become in total bytes.
    #[serde(default)]
    pub max_bytes: i64,
    /// The type of storage backend, `File` (default) and `Memory`
    #[serde(default)]
    pub storage: StorageType,
    /// How many replicas to keep for each value in a cluster, maximum 5.
    #[serde(default)]
    pub num_replicas: usize,
    /// Whether the underlying stream should be compressed
    #[serde(default)]
    pub compression: bool,
}

fn digest_value(digest: ring::digest::Digest) -> String {
    format!("{}{}", DIGEST_PREFIX, URL_SAFE.encode(digest))
}

/// A blob store capable of storing large objects efficiently in streams.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    pub(crate) name: String,
    pub(crate) stream: Stream,
}

impl ObjectStore {
    pub(crate) fn new(bucket: String, stream: Stream) -> ObjectStore {
        ObjectStore {
            name: bucket,
            stream,
        }
    }

    /// The name of the bucket.
    pub fn bucket(&self) -> &str {
        &self.name
    }

    /// Retrieves [ObjectInfo] of an object, deleted objects are reported as
    /// not found.
    ///
    /// # Examples
    ///
    /// ```
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), nats_kv::Error> {
    /// let server = nats_kv::memory::Server::new();
    /// let jetstream = nats_kv::jetstream::new(server.connect());
    /// let bucket = jetstream
    ///     .create_object_store(nats_kv::jetstream::object_store::Config {
    ///         bucket: "store".to_string(),
    ///         ..Default::default()
    ///     })
    ///     .await?;
    /// bucket.put_string("FOO", "data").await?;
    /// let info = bucket.info("FOO").await?;
    /// assert_eq!(info.size, 4);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn info<T: AsRef<str>>(&self, object_name: T) -> Result<ObjectInfo, InfoError> {
        self.object_info(object_name.as_ref(), false).await
    }

    /// Like [ObjectStore::info], but returns the tombstone of a deleted object.
    pub async fn info_with_deleted<T: AsRef<str>>(
        &self,
        object_name: T,
    ) -> Result<ObjectInfo, InfoError> {
        self.object_info(object_name.as_ref(), true).await
    }

    async fn object_info(
        &self,
        object_name: &str,
        show_deleted: bool,
    ) -> Result<ObjectInfo, InfoError> {
        if !is_valid_object_name(object_name) {
            return Err(InfoError::new(InfoErrorKind::InvalidName));
        }

        // Grab last meta value we have.
        let subject = subject::object_meta_subject(&self.name, object_name);
        let message = self
            .stream
            .get_last_raw_message_by_subject(subject.as_str())
            .await
            .map_err(|err| match err.kind() {
                LastRawMessageErrorKind::NoMessageFound => InfoError::new(InfoErrorKind::NotFound),
                LastRawMessageErrorKind::TimedOut => InfoError::new(InfoErrorKind::TimedOut),
                _ => InfoError::with_source(InfoErrorKind::Other, err),
            })?;

        let mut object_info = serde_json::from_slice::<ObjectInfo>(&message.payload)
            .map_err(|err| InfoError::with_source(InfoErrorKind::BadObjectMeta, err))?;
        if object_info.deleted && !show_deleted {
            return Err(InfoError::new(InfoErrorKind::NotFound));
        }
        object_info.modified = message.time;

        Ok(object_info)
    }

    /// Puts an [Object] into the [ObjectStore], reading it from any
    /// [tokio::io::AsyncRead].
    ///
    /// Chunks are published without waiting for each acknowledgment, bounded
    /// by the publish window of the context. A previous version of the object
    /// is purged once the new one is complete.
    ///
    /// # Examples
    ///
    /// ```
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), nats_kv::Error> {
    /// let server = nats_kv::memory::Server::new();
    /// let jetstream = nats_kv::jetstream::new(server.connect());
    /// let bucket = jetstream
    ///     .create_object_store(nats_kv::jetstream::object_store::Config {
    ///         bucket: "store".to_string(),
    ///         ..Default::default()
    ///     })
    ///     .await?;
    ///
    /// let mut data: &[u8] = b"some object data";
    /// let info = bucket.put("file", &mut data).await?;
    /// assert_eq!(info.chunks, 1);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn put<T>(
        &self,
        meta: T,
        data: &mut (impl AsyncRead + Unpin),
    ) -> Result<ObjectInfo, PutError>
    where
        ObjectMeta: From<T>,
    {
        let object_meta: ObjectMeta = meta.into();
        if !is_valid_object_name(&object_meta.name) {
            return Err(PutError::new(PutErrorKind::InvalidName));
        }
        if object_meta
            .options
            .as_ref()
            .is_some_and(|options| options.link.is_some())
        {
            return Err(PutError::new(PutErrorKind::LinkNotAllowed));
        }

        // Fetch any existing object info, its chunks are purged at the end.
        let existing_object_info = match self.info_with_deleted(&object_meta.name).await {
            Ok(object_info) => Some(object_info),
            Err(err) if err.kind() == InfoErrorKind::NotFound => None,
            Err(err) => return Err(PutError::with_source(PutErrorKind::Other, err)),
        };

        let chunk_size = object_meta
            .options
            .as_ref()
            .and_then(|options| options.max_chunk_size)
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_CHUNK_SIZE);

        let object_nuid = nuid::next().to_string();
        let chunk_subject = subject::object_chunk_subject(&self.name, &object_nuid);

        let mut object_chunks = 0;
        let mut object_size = 0;
        let mut acks: Vec<PublishAckFuture> = Vec::new();
        let mut context = ring::digest::Context::new(&SHA256);
        let mut chunk = vec![0; chunk_size];

        loop {
            let mut filled = 0;
            while filled < chunk_size {
                let n = match data.read(&mut chunk[filled..]).await {
                    Ok(n) => n,
                    Err(err) => {
                        self.purge_partial(&chunk_subject).await;
                        return Err(PutError::with_source(PutErrorKind::ReadChunks, err));
                    }
                };
                if n == 0 {
                    break;
                }
                filled += n;
            }
            if filled == 0 {
                break;
            }

            let payload = Bytes::copy_from_slice(&chunk[..filled]);
            context.update(&payload);
            object_size += filled;
            object_chunks += 1;

            match self
                .stream
                .context
                .publish(chunk_subject.clone(), payload)
                .await
            {
                Ok(ack) => acks.push(ack),
                Err(err) => {
                    self.purge_partial(&chunk_subject).await;
                    return Err(PutError::with_source(PutErrorKind::PublishChunks, err));
                }
            }

            if filled < chunk_size {
                break;
            }
        }
        trace!(
            "published {} chunks of object {}",
            object_chunks,
            object_meta.name
        );

        let object_info = ObjectInfo {
            name: object_meta.name,
            description: object_meta.description,
            headers: object_meta.headers,
            options: Some(ObjectOptions {
                link: None,
                max_chunk_size: Some(chunk_size),
            }),
            bucket: self.name.clone(),
            nuid: object_nuid,
            chunks: object_chunks,
            size: object_size,
            digest: Some(digest_value(context.finish())),
            modified: OffsetDateTime::now_utc(),
            deleted: false,
        };

        let metadata_ack = match self.publish_meta(&object_info).await {
            Ok(ack) => ack,
            Err(err) => {
                self.purge_partial(&chunk_subject).await;
                return Err(PutError::with_source(PutErrorKind::PublishMetadata, err));
            }
        };

        for ack in acks {
            if let Err(err) = ack.await {
                self.purge_partial(&chunk_subject).await;
                let kind = match err.kind() {
                    PublishErrorKind::TimedOut => PutErrorKind::TimedOut,
                    _ => PutErrorKind::PublishChunks,
                };
                return Err(PutError::with_source(kind, err));
            }
        }
        if let Err(err) = metadata_ack.await {
            self.purge_partial(&chunk_subject).await;
            return Err(PutError::with_source(PutErrorKind::PublishMetadata, err));
        }

        // Purge any old chunks.
        if let Some(existing_object_info) = existing_object_info {
            if !existing_object_info.deleted && !existing_object_info.nuid.is_empty() {
                let chunk_subject =
                    subject::object_chunk_subject(&self.name, &existing_object_info.nuid);
                self.stream
                    .purge()
                    .filter(chunk_subject)
                    .await
                    .map_err(|err| PutError::with_source(PutErrorKind::PurgeOldChunks, err))?;
            }
        }

        Ok(object_info)
    }

    async fn purge_partial(&self, chunk_subject: &str) {
        if let Err(err) = self.stream.purge().filter(chunk_subject).await {
            warn!("failed to purge partial object chunks {}: {}", chunk_subject, err);
        }
    }

    /// Publishes metadata as a rollup message, dropping previous metadata of
    /// the same object.
    async fn publish_meta(&self, object_info: &ObjectInfo) -> Result<PublishAckFuture, PublishError> {
        let data = serde_json::to_vec(object_info)
            .map_err(|err| PublishError::with_source(PublishErrorKind::Other, err))?;

        let mut headers = HeaderMap::new();
        headers.insert(header::NATS_ROLLUP, ROLLUP_SUBJECT);

        self.stream
            .context
            .publish_with_headers(
                subject::object_meta_subject(&self.name, &object_info.name),
                headers,
                data.into(),
            )
            .await
    }

    /// Gets an [Object] from the [ObjectStore].
    ///
    /// [Object] implements [tokio::io::AsyncRead] that allows
    /// to read the data from Object Store. Links are followed.
    ///
    /// # Examples
    ///
    /// ```
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), nats_kv::Error> {
    /// use tokio::io::AsyncReadExt;
    ///
    /// let server = nats_kv::memory::Server::new();
    /// let jetstream = nats_kv::jetstream::new(server.connect());
    /// let bucket = jetstream
    ///     .create_object_store(nats_kv::jetstream::object_store::Config {
    ///         bucket: "store".to_string(),
    ///         ..Default::default()
    ///     })
    ///     .await?;
    /// bucket.put_bytes("FOO", b"data".to_vec()).await?;
    ///
    /// let mut object = bucket.get("FOO").await?;
    /// let mut bytes = vec![];
    /// object.read_to_end(&mut bytes).await?;
    /// assert_eq!(bytes, b"data");
    /// # Ok(())
    /// # }
    /// ```
    pub async fn get<T: AsRef<str>>(&self, object_name: T) -> Result<Object, GetError> {
        let object_info = self.info(object_name).await?;
        if object_info.nuid.is_empty() {
            return Err(GetError::new(GetErrorKind::BadObjectMeta));
        }

        let Some(link) = object_info.link().cloned() else {
            return self.open(object_info).await;
        };

        let target = match link.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => return Err(GetError::new(GetErrorKind::BucketLink)),
        };
        debug!("following link {} to {}/{}", object_info.name, link.bucket, target);

        let store = if link.bucket == self.name {
            self.clone()
        } else {
            self.stream
                .context
                .get_object_store(&link.bucket)
                .await
                .map_err(|err| GetError::with_source(GetErrorKind::NotFound, err))?
        };

        let target_info = store.info(target).await?;
        if target_info.is_link() {
            return Err(GetError::new(GetErrorKind::LinkToLink));
        }
        store.open(target_info).await
    }

    async fn open(&self, object_info: ObjectInfo) -> Result<Object, GetError> {
        if object_info.size == 0 {
            return Ok(Object::empty(object_info));
        }

        let chunks = self
            .stream
            .ordered(OrderedConfig {
                filter_subject: subject::object_chunk_subject(&self.name, &object_info.nuid),
                description: Some("object store get".to_string()),
                deliver_policy: DeliverPolicy::All,
                replay_policy: ReplayPolicy::Instant,
                ..Default::default()
            })
            .await
            .map_err(|err| GetError::with_source(GetErrorKind::ConsumerCreate, err))?;

        Ok(Object::new(chunks, object_info))
    }

    /// Deletes an object, leaving a tombstone behind in its metadata and
    /// purging its chunks.
    ///
    /// # Examples
    ///
    /// ```
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), nats_kv::Error> {
    /// let server = nats_kv::memory::Server::new();
    /// let jetstream = nats_kv::jetstream::new(server.connect());
    /// let bucket = jetstream
    ///     .create_object_store(nats_kv::jetstream::object_store::Config {
    ///         bucket: "store".to_string(),
    ///         ..Default::default()
    ///     })
    ///     .await?;
    /// bucket.put_string("FOO", "data").await?;
    /// bucket.delete("FOO").await?;
    /// assert!(bucket.info("FOO").await.is_err());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn delete<T: AsRef<str>>(&self, object_name: T) -> Result<(), DeleteError> {
        let mut object_info = self.info_with_deleted(object_name).await?;
        if object_info.nuid.is_empty() {
            return Err(DeleteError::new(DeleteErrorKind::BadObjectMeta));
        }

        object_info.chunks = 0;
        object_info.size = 0;
        object_info.digest = None;
        object_info.deleted = true;

        // Metadata first, so readers see the deletion before chunks go away.
        self.publish_meta(&object_info)
            .await
            .map_err(|err| DeleteError::with_source(DeleteErrorKind::Metadata, err))?
            .await
            .map_err(|err| DeleteError::with_source(DeleteErrorKind::Metadata, err))?;

        self.stream
            .purge()
            .filter(subject::object_chunk_subject(&self.name, &object_info.nuid))
            .await?;

        Ok(())
    }

    /// Adds a link to another object, possibly in another bucket.
    ///
    /// Links to deleted objects or to other links are rejected. An existing
    /// link with the same name is replaced, an existing object is not.
    pub async fn add_link<T: AsRef<str>>(
        &self,
        name: T,
        object: &ObjectInfo,
    ) -> Result<ObjectInfo, AddLinkError> {
        let name = name.as_ref();
        if object.name.is_empty() {
            return Err(AddLinkError::new(AddLinkErrorKind::ObjectRequired));
        }
        if object.deleted {
            return Err(AddLinkError::new(AddLinkErrorKind::LinkToDeleted));
        }
        if object.is_link() {
            return Err(AddLinkError::new(AddLinkErrorKind::LinkToLink));
        }

        self.put_link(
            name,
            ObjectLink {
                bucket: object.bucket.clone(),
                name: Some(object.name.clone()),
            },
        )
        .await
    }

    /// Adds a link to a whole bucket.
    pub async fn add_bucket_link<T: AsRef<str>>(
        &self,
        name: T,
        bucket: &ObjectStore,
    ) -> Result<ObjectInfo, AddLinkError> {
        self.put_link(
            name.as_ref(),
            ObjectLink {
                bucket: bucket.name.clone(),
                name: None,
            },
        )
        .await
    }

    async fn put_link(&self, name: &str, link: ObjectLink) -> Result<ObjectInfo, AddLinkError> {
        if !is_valid_object_name(name) {
            return Err(AddLinkError::new(AddLinkErrorKind::InvalidName));
        }

        match self.info(name).await {
            Ok(existing) if !existing.is_link() => {
                return Err(AddLinkError::new(AddLinkErrorKind::AlreadyExists));
            }
            Ok(_) => (),
            Err(err) if err.kind() == InfoErrorKind::NotFound => (),
            Err(err) => return Err(AddLinkError::with_source(AddLinkErrorKind::Other, err)),
        }

        let object_info = ObjectInfo {
            name: name.to_string(),
            description: None,
            headers: None,
            options: Some(ObjectOptions {
                link: Some(link),
                max_chunk_size: None,
            }),
            bucket: self.name.clone(),
            nuid: nuid::next().to_string(),
            size: 0,
            chunks: 0,
            modified: OffsetDateTime::now_utc(),
            digest: None,
            deleted: false,
        };

        self.publish_meta(&object_info)
            .await
            .map_err(|err| AddLinkError::with_source(AddLinkErrorKind::PublishMetadata, err))?
            .await
            .map_err(|err| AddLinkError::with_source(AddLinkErrorKind::PublishMetadata, err))?;

        Ok(object_info)
    }

    /// Creates a [Watch] stream over changes in the [ObjectStore].
    ///
    /// The latest metadata of every object is yielded first, followed by
    /// [Update::InitialValuesDone].
    pub async fn watch(&self) -> Result<Watch, WatcherError> {
        self.watch_with_options(WatchOptions::default()).await
    }

    /// Like [ObjectStore::watch], replaying every stored metadata revision.
    pub async fn watch_with_history(&self) -> Result<Watch, WatcherError> {
        self.watch_with_options(WatchOptions {
            include_history: true,
            ..Default::default()
        })
        .await
    }

    pub async fn watch_with_options(&self, options: WatchOptions) -> Result<Watch, WatcherError> {
        // metadata lives in the payload
        let options = WatchOptions {
            meta_only: false,
            ..options
        };

        Watcher::start(
            &self.stream,
            subject::object_all_meta(&self.name),
            "object store watcher",
            options,
            |message| {
                let mut object_info: ObjectInfo = serde_json::from_slice(&message.payload)
                    .map_err(|err| WatcherError::with_source(WatcherErrorKind::Decode, err))?;
                object_info.modified = message.info.published;
                Ok(Decoded {
                    deleted: object_info.deleted,
                    value: object_info,
                })
            },
        )
        .await
    }

    /// Returns every object which is not deleted.
    ///
    /// # Examples
    ///
    /// ```
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), nats_kv::Error> {
    /// let server = nats_kv::memory::Server::new();
    /// let jetstream = nats_kv::jetstream::new(server.connect());
    /// let bucket = jetstream
    ///     .create_object_store(nats_kv::jetstream::object_store::Config {
    ///         bucket: "store".to_string(),
    ///         ..Default::default()
    ///     })
    ///     .await?;
    /// bucket.put_string("A", "a").await?;
    /// bucket.put_string("B", "b").await?;
    /// assert_eq!(bucket.list().await?.len(), 2);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn list(&self) -> Result<Vec<ObjectInfo>, ListError> {
        let objects: Vec<ObjectInfo> = self
            .list_stream()
            .await
            .map_err(|err| ListError::with_source(ListErrorKind::Watch, err))?
            .try_collect()
            .await
            .map_err(|err| ListError::with_source(ListErrorKind::Watch, err))?;

        if objects.is_empty() {
            return Err(ListError::new(ListErrorKind::NoObjectsFound));
        }
        Ok(objects)
    }

    /// Lazy variant of [ObjectStore::list].
    pub async fn list_stream(&self) -> Result<List, WatcherError> {
        trace!("starting object list");
        let watcher = self
            .watch_with_options(WatchOptions {
                ignore_deletes: true,
                ..Default::default()
            })
            .await?;

        Ok(List {
            watcher,
            done: false,
        })
    }

    /// Seals a [ObjectStore], preventing any further changes to it or its [Objects][Object].
    pub async fn seal(&self) -> Result<(), SealError> {
        let mut info = self
            .stream
            .get_info()
            .await
            .map_err(|err| SealError::with_source(SealErrorKind::Info, err))?;
        info.config.sealed = true;

        self.stream
            .context
            .update_stream(&info.config)
            .await
            .map_err(|err| SealError::with_source(SealErrorKind::Update, err))?;
        Ok(())
    }

    /// Updates [Object] [ObjectMeta], renaming the object if the name changes.
    ///
    /// Renaming onto an existing object fails with
    /// [UpdateMetadataErrorKind::NameAlreadyInUse].
    ///
    /// # Examples
    ///
    /// ```
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), nats_kv::Error> {
    /// use nats_kv::jetstream::object_store::ObjectMeta;
    ///
    /// let server = nats_kv::memory::Server::new();
    /// let jetstream = nats_kv::jetstream::new(server.connect());
    /// let bucket = jetstream
    ///     .create_object_store(nats_kv::jetstream::object_store::Config {
    ///         bucket: "store".to_string(),
    ///         ..Default::default()
    ///     })
    ///     .await?;
    /// bucket.put_string("object", "data").await?;
    /// bucket
    ///     .update_metadata(
    ///         "object",
    ///         ObjectMeta {
    ///             name: "new_name".to_string(),
    ///             description: Some("a new description".to_string()),
    ///             ..Default::default()
    ///         },
    ///     )
    ///     .await?;
    /// assert_eq!(bucket.get_string("new_name").await?, "data");
    /// # Ok(())
    /// # }
    /// ```
    pub async fn update_metadata<A: AsRef<str>>(
        &self,
        object: A,
        metadata: ObjectMeta,
    ) -> Result<ObjectInfo, UpdateMetadataError> {
        let mut info = self.info(object.as_ref()).await?;

        if metadata.name != info.name {
            if !is_valid_object_name(&metadata.name) {
                return Err(UpdateMetadataError::new(
                    UpdateMetadataErrorKind::InvalidName,
                ));
            }
            match self.info(&metadata.name).await {
                Ok(_) => {
                    return Err(UpdateMetadataError::new(
                        UpdateMetadataErrorKind::NameAlreadyInUse,
                    ))
                }
                Err(err) if err.kind() == InfoErrorKind::NotFound => (),
                Err(err) => {
                    return Err(UpdateMetadataError::with_source(
                        UpdateMetadataErrorKind::Other,
                        err,
                    ))
                }
            }
        }

        let old_name = std::mem::replace(&mut info.name, metadata.name);
        info.description = metadata.description;
        info.headers = metadata.headers;

        self.publish_meta(&info)
            .await
            .map_err(|err| {
                UpdateMetadataError::with_source(UpdateMetadataErrorKind::PublishMetadata, err)
            })?
            .await
            .map_err(|err| {
                UpdateMetadataError::with_source(UpdateMetadataErrorKind::PublishMetadata, err)
            })?;

        if old_name != info.name {
            debug!("purging old metadata of {}", old_name);
            self.stream
                .purge()
                .filter(subject::object_meta_subject(&self.name, &old_name))
                .await
                .map_err(|err| {
                    UpdateMetadataError::with_source(UpdateMetadataErrorKind::Purge, err)
                })?;
        }

        Ok(info)
    }

    /// Queries the server for the status of the bucket.
    pub async fn status(&self) -> Result<Status, StatusError> {
        let info = self.stream.get_info().await.map_err(|err| match err.kind() {
            RequestErrorKind::TimedOut => StatusError::new(StatusErrorKind::TimedOut),
            _ => StatusError::with_source(StatusErrorKind::Other, err),
        })?;

        Ok(Status {
            info,
            bucket: self.name.clone(),
        })
    }

    /// Puts an object from a byte buffer.
    pub async fn put_bytes<T, D>(&self, name: T, data: D) -> Result<ObjectInfo, PutError>
    where
        T: AsRef<str>,
        D: AsRef<[u8]>,
    {
        let mut reader = data.as_ref();
        self.put(name.as_ref(), &mut reader).await
    }

    /// Reads a whole object into memory.
    pub async fn get_bytes<T: AsRef<str>>(&self, name: T) -> Result<Vec<u8>, GetError> {
        let mut object = self.get(name).await?;
        let mut data = Vec::with_capacity(object.info.size);
        object
            .read_to_end(&mut data)
            .await
            .map_err(GetError::from_read)?;
        Ok(data)
    }

    pub async fn put_string<T: AsRef<str>>(
        &self,
        name: T,
        data: &str,
    ) -> Result<ObjectInfo, PutError> {
        self.put_bytes(name, data).await
    }

    pub async fn get_string<T: AsRef<str>>(&self, name: T) -> Result<String, GetError> {
        let data = self.get_bytes(name).await?;
        String::from_utf8(data).map_err(|err| GetError::with_source(GetErrorKind::Other, err))
    }

    /// Puts the contents of a file, named after its path.
    pub async fn put_file<P: AsRef<Path>>(&self, path: P) -> Result<ObjectInfo, PutError> {
        let path = path.as_ref();
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|err| PutError::with_source(PutErrorKind::ReadChunks, err))?;
        self.put(path.to_string_lossy().as_ref(), &mut file).await
    }

    /// Writes an object into a file. The file is removed if the object
    /// cannot be fetched.
    pub async fn get_file<T, P>(&self, name: T, path: P) -> Result<(), GetError>
    where
        T: AsRef<str>,
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|err| GetError::with_source(GetErrorKind::Read, err))?;

        let mut object = match self.get(name).await {
            Ok(object) => object,
            Err(err) => {
                drop(file);
                tokio::fs::remove_file(path).await.ok();
                return Err(err);
            }
        };

        tokio::io::copy(&mut object, &mut file)
            .await
            .map_err(GetError::from_read)?;
        Ok(())
    }
}

/// Watch over the metadata of an object bucket.
pub type Watch = Watcher<ObjectInfo>;

/// Objects of a bucket, see [ObjectStore::list_stream].
pub struct List {
    watcher: Watch,
    done: bool,
}

impl futures::Stream for List {
    type Item = Result<ObjectInfo, WatcherError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        match futures::ready!(self.watcher.poll_next_unpin(cx)) {
            Some(Ok(Update::Value(object_info))) => Poll::Ready(Some(Ok(object_info))),
            Some(Ok(Update::InitialValuesDone)) | None => {
                debug!("object store list done");
                self.done = true;
                Poll::Ready(None)
            }
            Some(Err(err)) => Poll::Ready(Some(Err(err))),
        }
    }
}

/// Represents an object stored in a bucket.
pub struct Object {
    pub info: ObjectInfo,
    remaining_bytes: Bytes,
    digest: Option<ring::digest::Context>,
    chunks: Option<Ordered>,
}

impl Object {
    pub(crate) fn new(chunks: Ordered, info: ObjectInfo) -> Self {
        Object {
            info,
            remaining_bytes: Bytes::new(),
            digest: Some(ring::digest::Context::new(&SHA256)),
            chunks: Some(chunks),
        }
    }

    fn empty(info: ObjectInfo) -> Self {
        Object {
            info,
            remaining_bytes: Bytes::new(),
            digest: None,
            chunks: None,
        }
    }

    /// Returns information about the object.
    pub fn info(&self) -> &ObjectInfo {
        &self.info
    }

    fn verify_digest(&mut self) -> io::Result<()> {
        let Some(context) = self.digest.take() else {
            return Ok(());
        };
        let digest = digest_value(context.finish());
        match self.info.digest.as_deref() {
            Some(expected) if expected != digest => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                ReadError::new(ReadErrorKind::DigestMismatch),
            )),
            _ => Ok(()),
        }
    }
}

impl AsyncRead for Object {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.remaining_bytes.is_empty() {
                let len = cmp::min(buf.remaining(), this.remaining_bytes.len());
                buf.put_slice(&this.remaining_bytes.split_to(len));
                return Poll::Ready(Ok(()));
            }

            let Some(chunks) = this.chunks.as_mut() else {
                return Poll::Ready(Ok(()));
            };

            match futures::ready!(chunks.poll_next_unpin(cx)) {
                Some(Ok(message)) => {
                    let pending = message.info.pending;
                    let payload = message.message.payload;
                    if let Some(context) = this.digest.as_mut() {
                        context.update(&payload);
                    }
                    this.remaining_bytes = payload;

                    if pending == 0 {
                        this.chunks = None;
                        this.verify_digest()?;
                    }
                }
                Some(Err(err)) => {
                    this.chunks = None;
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::Other,
                        ReadError::with_source(ReadErrorKind::Consumer, err),
                    )));
                }
                None => {
                    this.chunks = None;
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        ReadError::new(ReadErrorKind::Incomplete),
                    )));
                }
            }
        }
    }
}

/// Meta and instance information about an object.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ObjectInfo {
    /// Name of the object
    pub name: String,
    /// A short human readable description of the object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HeaderMap>,
    /// Chunk size and link of the object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<ObjectOptions>,
    /// Name of the bucket the object is stored in.
    pub bucket: String,
    /// Unique identifier used to uniquely identify this version of the object.
    pub nuid: String,
    /// Size in bytes of the object.
    pub size: usize,
    /// Number of chunks the object is stored in.
    pub chunks: usize,
    /// Date and time the object was last modified.
    #[serde(with = "rfc3339", rename = "mtime")]
    pub modified: OffsetDateTime,
    /// Digest of the object stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    /// Set to true if the object has been deleted.
    #[serde(default, skip_serializing_if = "is_default")]
    pub deleted: bool,
}

impl ObjectInfo {
    /// The object this one links to, if any.
    pub fn link(&self) -> Option<&ObjectLink> {
        self.options.as_ref().and_then(|options| options.link.as_ref())
    }

    pub fn is_link(&self) -> bool {
        self.link().is_some()
    }
}

fn is_default<T: Default + Eq>(t: &T) -> bool {
    t == &T::default()
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ObjectOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<ObjectLink>,
    /// Size of the chunks, 128 KiB when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_chunk_size: Option<usize>,
}

/// A link to another object, potentially in another bucket.
#[derive(Debug, Default, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ObjectLink {
    /// Name of the bucket the object is stored in.
    pub bucket: String,
    /// Name of the object. A link without a name points to the whole bucket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Meta information about an object.
#[derive(Debug, Default, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ObjectMeta {
    /// Name of the object
    pub name: String,
    /// A short human readable description of the object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HeaderMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<ObjectOptions>,
}

impl From<&str> for ObjectMeta {
    fn from(s: &str) -> ObjectMeta {
        ObjectMeta {
            name: s.to_string(),
            ..Default::default()
        }
    }
}

impl From<ObjectInfo> for ObjectMeta {
    fn from(info: ObjectInfo) -> Self {
        ObjectMeta {
            name: info.name,
            description: info.description,
            headers: info.headers,
            options: info.options,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum InfoErrorKind {
    InvalidName,
    NotFound,
    BadObjectMeta,
    TimedOut,
    Other,
}

impl Display for InfoErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidName => write!(f, "invalid object name"),
            Self::NotFound => write!(f, "not found"),
            Self::BadObjectMeta => write!(f, "failed to decode object metadata"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Other => write!(f, "getting info failed"),
        }
    }
}

pub type InfoError = Error<InfoErrorKind>;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GetErrorKind {
    InvalidName,
    NotFound,
    BadObjectMeta,
    /// The object is a link to a whole bucket.
    BucketLink,
    LinkToLink,
    ConsumerCreate,
    DigestMismatch,
    Read,
    TimedOut,
    Other,
}

impl Display for GetErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidName => write!(f, "invalid object name"),
            Self::NotFound => write!(f, "object not found"),
            Self::BadObjectMeta => write!(f, "invalid object metadata"),
            Self::BucketLink => write!(f, "object is a link to a bucket"),
            Self::LinkToLink => write!(f, "link points to another link"),
            Self::ConsumerCreate => write!(f, "failed creating consumer for fetching object"),
            Self::DigestMismatch => write!(f, "object digest does not match its data"),
            Self::Read => write!(f, "failed reading object"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Other => write!(f, "failed getting object"),
        }
    }
}

pub type GetError = Error<GetErrorKind>;

impl GetError {
    fn from_read(err: io::Error) -> GetError {
        let kind = match err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<ReadError>())
            .map(|inner| inner.kind())
        {
            Some(ReadErrorKind::DigestMismatch) => GetErrorKind::DigestMismatch,
            _ => GetErrorKind::Read,
        };
        GetError::with_source(kind, err)
    }
}

impl From<InfoError> for GetError {
    fn from(err: InfoError) -> Self {
        match err.kind() {
            InfoErrorKind::InvalidName => GetError::new(GetErrorKind::InvalidName),
            InfoErrorKind::NotFound => GetError::new(GetErrorKind::NotFound),
            InfoErrorKind::BadObjectMeta => GetError::with_source(GetErrorKind::BadObjectMeta, err),
            InfoErrorKind::TimedOut => GetError::new(GetErrorKind::TimedOut),
            InfoErrorKind::Other => GetError::with_source(GetErrorKind::Other, err),
        }
    }
}

/// Failure while reading the data of an [Object], carried inside the
/// [std::io::Error] returned by its [AsyncRead] implementation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ReadErrorKind {
    DigestMismatch,
    Consumer,
    /// The chunk subscription ended before the last chunk.
    Incomplete,
}

impl Display for ReadErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DigestMismatch => write!(f, "wrong digest"),
            Self::Consumer => write!(f, "error from chunk subscription"),
            Self::Incomplete => write!(f, "subscription ended before reading whole object"),
        }
    }
}

pub type ReadError = Error<ReadErrorKind>;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DeleteErrorKind {
    InvalidName,
    NotFound,
    BadObjectMeta,
    Metadata,
    Chunks,
    TimedOut,
    Other,
}

impl Display for DeleteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidName => write!(f, "invalid object name"),
            Self::NotFound => write!(f, "object not found"),
            Self::BadObjectMeta => write!(f, "invalid object metadata"),
            Self::Metadata => write!(f, "failed rolling up metadata"),
            Self::Chunks => write!(f, "failed purging chunks"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Other => write!(f, "delete failed"),
        }
    }
}

pub type DeleteError = Error<DeleteErrorKind>;

impl From<InfoError> for DeleteError {
    fn from(err: InfoError) -> Self {
        match err.kind() {
            InfoErrorKind::InvalidName => DeleteError::new(DeleteErrorKind::InvalidName),
            InfoErrorKind::NotFound => DeleteError::new(DeleteErrorKind::NotFound),
            InfoErrorKind::BadObjectMeta => {
                DeleteError::with_source(DeleteErrorKind::BadObjectMeta, err)
            }
            InfoErrorKind::TimedOut => DeleteError::new(DeleteErrorKind::TimedOut),
            InfoErrorKind::Other => DeleteError::with_source(DeleteErrorKind::Other, err),
        }
    }
}

impl From<PurgeError> for DeleteError {
    fn from(err: PurgeError) -> Self {
        match err.kind() {
            PurgeErrorKind::TimedOut => DeleteError::new(DeleteErrorKind::TimedOut),
            _ => DeleteError::with_source(DeleteErrorKind::Chunks, err),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PutErrorKind {
    InvalidName,
    /// Links are created with [ObjectStore::add_link].
    LinkNotAllowed,
    ReadChunks,
    PublishChunks,
    PublishMetadata,
    PurgeOldChunks,
    TimedOut,
    Other,
}

impl Display for PutErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidName => write!(f, "invalid object name"),
            Self::LinkNotAllowed => write!(f, "link cannot be set when putting an object"),
            Self::ReadChunks => write!(f, "error while reading the buffer"),
            Self::PublishChunks => write!(f, "failed publishing object chunks"),
            Self::PublishMetadata => write!(f, "failed publishing metadata"),
            Self::PurgeOldChunks => write!(f, "failed purging old chunks"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Other => write!(f, "error"),
        }
    }
}

pub type PutError = Error<PutErrorKind>;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AddLinkErrorKind {
    InvalidName,
    ObjectRequired,
    LinkToDeleted,
    LinkToLink,
    AlreadyExists,
    PublishMetadata,
    Other,
}

impl Display for AddLinkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidName => write!(f, "invalid link name"),
            Self::ObjectRequired => write!(f, "linked object name is required"),
            Self::LinkToDeleted => write!(f, "not allowed to link to a deleted object"),
            Self::LinkToLink => write!(f, "not allowed to link to another link"),
            Self::AlreadyExists => write!(f, "an object with the link name already exists"),
            Self::PublishMetadata => write!(f, "failed publishing link metadata"),
            Self::Other => write!(f, "failed adding link"),
        }
    }
}

pub type AddLinkError = Error<AddLinkErrorKind>;

#[derive(Debug, PartialEq, Clone)]
pub enum UpdateMetadataErrorKind {
    InvalidName,
    NotFound,
    TimedOut,
    Other,
    PublishMetadata,
    NameAlreadyInUse,
    Purge,
}

impl Display for UpdateMetadataErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidName => write!(f, "invalid object name"),
            Self::NotFound => write!(f, "object not found"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Other => write!(f, "error"),
            Self::PublishMetadata => write!(f, "failed publishing metadata"),
            Self::NameAlreadyInUse => write!(f, "object with updated name already exists"),
            Self::Purge => write!(f, "failed purging old name metadata"),
        }
    }
}

pub type UpdateMetadataError = Error<UpdateMetadataErrorKind>;

impl From<InfoError> for UpdateMetadataError {
    fn from(error: InfoError) -> Self {
        match error.kind() {
            InfoErrorKind::InvalidName => {
                UpdateMetadataError::new(UpdateMetadataErrorKind::InvalidName)
            }
            InfoErrorKind::NotFound => UpdateMetadataError::new(UpdateMetadataErrorKind::NotFound),
            InfoErrorKind::TimedOut => UpdateMetadataError::new(UpdateMetadataErrorKind::TimedOut),
            InfoErrorKind::BadObjectMeta | InfoErrorKind::Other => {
                UpdateMetadataError::with_source(UpdateMetadataErrorKind::Other, error)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ListErrorKind {
    NoObjectsFound,
    Watch,
}

impl Display for ListErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoObjectsFound => write!(f, "no objects found"),
            Self::Watch => write!(f, "failed listing objects"),
        }
    }
}

pub type ListError = Error<ListErrorKind>;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SealErrorKind {
    Info,
    Update,
}

impl Display for SealErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "failed getting stream info before sealing bucket"),
            Self::Update => write!(f, "failed sealing the bucket"),
        }
    }
}

pub type SealError = Error<SealErrorKind>;

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_info_wire_format() {
        let payload = r#"{
            "name": "report.pdf",
            "bucket": "docs",
            "nuid": "Q6TpEd1sSbTMHeMkGu6bNe",
            "size": 3,
            "mtime": "2022-05-25T11:17:49.918374Z",
            "chunks": 1,
            "digest": "SHA-256=ungWv48Bz-pBQUDeXa4iI7ADYaOWF3qctBD_YfIAFa0=",
            "options": {"max_chunk_size": 131072}
        }"#;
        let info: ObjectInfo = serde_json::from_str(payload).unwrap();
        assert_eq!(info.name, "report.pdf");
        assert_eq!(info.size, 3);
        assert!(!info.deleted);
        assert!(!info.is_link());
        assert_eq!(
            info.options.as_ref().and_then(|o| o.max_chunk_size),
            Some(128 * 1024)
        );

        let encoded = serde_json::to_value(&info).unwrap();
        assert!(encoded.get("deleted").is_none());
        assert!(encoded.get("description").is_none());
    }

    #[test]
    fn bucket_link_has_no_name() {
        let payload = r#"{
            "name": "all-docs",
            "bucket": "links",
            "nuid": "abc",
            "size": 0,
            "mtime": "0001-01-01T00:00:00Z",
            "chunks": 0,
            "options": {"link": {"bucket": "docs"}}
        }"#;
        let info: ObjectInfo = serde_json::from_str(payload).unwrap();
        let link = info.link().unwrap();
        assert_eq!(link.bucket, "docs");
        assert_eq!(link.name, None);
    }

    #[test]
    fn digest_matches_sha256() {
        let digest = ring::digest::digest(&SHA256, b"abc");
        assert_eq!(
            digest_value(digest),
            "SHA-256=ungWv48Bz-pBQUDeXa4iI7ADYaOWF3qctBD_YfIAFa0="
        );
    }
}
