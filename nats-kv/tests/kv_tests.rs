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

mod kv {
    use std::time::Duration;

    use bytes::Bytes;
    use futures::{StreamExt, TryStreamExt};
    use nats_kv::jetstream::{
        self,
        context::{CreateKeyValueErrorKind, KeyValueErrorKind},
        kv::{
            self, CreateErrorKind, EntryErrorKind, HistoryErrorKind, KeysErrorKind, Operation,
            PurgeDeletesOptions, PutErrorKind, UpdateErrorKind,
        },
        stream::{DiscardPolicy, StorageType},
    };
    use nats_kv::memory::Server;

    async fn bucket(server: &Server, name: &str, history: i64) -> kv::Store {
        jetstream::new(server.connect())
            .create_key_value(kv::Config {
                bucket: name.to_string(),
                history,
                ..Default::default()
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_bucket() {
        let server = Server::new();
        let context = jetstream::new(server.connect());

        let kv = context
            .create_key_value(kv::Config {
                bucket: "test".into(),
                description: "test_description".into(),
                history: 10,
                storage: StorageType::Memory,
                num_replicas: 1,
                ..Default::default()
            })
            .await
            .unwrap();

        let info = kv.stream.get_info().await.unwrap();
        assert_eq!("KV_test", kv.stream_name);
        assert_eq!(info.config.discard, DiscardPolicy::New);
        assert_eq!(info.config.max_messages_per_subject, 10);
        assert_eq!(info.config.subjects, vec!["$KV.test.>".to_string()]);
        assert!(info.config.allow_direct);
        assert!(info.config.allow_rollup);
        assert!(info.config.deny_delete);
    }

    #[tokio::test]
    async fn create_bucket_validation() {
        let server = Server::new();
        let context = jetstream::new(server.connect());

        let err = context
            .create_key_value(kv::Config {
                bucket: "bad.name".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), CreateKeyValueErrorKind::InvalidBucketName);

        let err = context
            .create_key_value(kv::Config {
                bucket: "deep".into(),
                history: 65,
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), CreateKeyValueErrorKind::HistoryTooLarge);

        let deepest = bucket(&server, "deepest", 64).await;
        assert_eq!(deepest.status().await.unwrap().history(), 64);

        // same configuration twice is fine, a different one is not
        bucket(&server, "twice", 5).await;
        bucket(&server, "twice", 5).await;
        let err = context
            .create_key_value(kv::Config {
                bucket: "twice".into(),
                history: 2,
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), CreateKeyValueErrorKind::BucketExists);
    }

    #[tokio::test]
    async fn get_and_delete_bucket() {
        let server = Server::new();
        let context = jetstream::new(server.connect());

        let err = context.get_key_value("missing").await.unwrap_err();
        assert_eq!(err.kind(), KeyValueErrorKind::BucketNotFound);

        bucket(&server, "present", 1).await;
        let kv = context.get_key_value("present").await.unwrap();
        assert_eq!(kv.name, "present");

        context.delete_key_value("present").await.unwrap();
        let err = context.get_key_value("present").await.unwrap_err();
        assert_eq!(err.kind(), KeyValueErrorKind::BucketNotFound);
    }

    #[tokio::test]
    async fn not_a_bucket() {
        let server = Server::new();
        let context = jetstream::new(server.connect());
        context
            .create_stream(jetstream::stream::Config {
                name: "KV_plain".into(),
                subjects: vec!["plain.>".into()],
                ..Default::default()
            })
            .await
            .unwrap();

        let err = context.get_key_value("plain").await.unwrap_err();
        assert_eq!(err.kind(), KeyValueErrorKind::BadBucket);
    }

    #[tokio::test]
    async fn put_and_get() {
        let server = Server::new();
        let kv = bucket(&server, "test", 10).await;

        let payload: Bytes = "data".into();
        let revision = kv.put("key", payload.clone()).await.unwrap();
        assert_eq!(revision, 1);

        let entry = kv.get("key").await.unwrap();
        assert_eq!(entry.value, payload);
        assert_eq!(entry.revision, 1);
        assert_eq!(entry.bucket, "test");
        assert_eq!(entry.operation, Operation::Put);

        let revision = kv.put_string("key", "other").await.unwrap();
        assert_eq!(revision, 2);
        assert_eq!(kv.get("key").await.unwrap().value, "other");

        assert!(kv.entry("missing").await.unwrap().is_none());
        let err = kv.get("missing").await.unwrap_err();
        assert_eq!(err.kind(), EntryErrorKind::NotFound);
    }

    #[tokio::test]
    async fn invalid_keys() {
        let server = Server::new();
        let kv = bucket(&server, "test", 1).await;

        for key in ["", ".key", "key.", "spa ce", "wild.*", "tail.>"] {
            let err = kv.put(key, "data".into()).await.unwrap_err();
            assert_eq!(err.kind(), PutErrorKind::InvalidKey, "key {:?}", key);
        }
        let err = kv.get("").await.unwrap_err();
        assert_eq!(err.kind(), EntryErrorKind::InvalidKey);
    }

    #[tokio::test]
    async fn get_revision() {
        let server = Server::new();
        let kv = bucket(&server, "test", 10).await;

        let first = kv.put("key", "one".into()).await.unwrap();
        kv.put("other", "x".into()).await.unwrap();
        kv.put("key", "two".into()).await.unwrap();

        let entry = kv.get_revision("key", first).await.unwrap();
        assert_eq!(entry.value, "one");
        assert_eq!(entry.revision, first);

        // revision 2 belongs to another key
        let err = kv.get_revision("key", 2).await.unwrap_err();
        assert_eq!(err.kind(), EntryErrorKind::NotFound);

        let err = kv.get_revision("key", 100).await.unwrap_err();
        assert_eq!(err.kind(), EntryErrorKind::NotFound);
    }

    #[tokio::test]
    async fn create() {
        let server = Server::new();
        let kv = bucket(&server, "test", 10).await;

        let revision = kv.create("key", "data".into()).await.unwrap();
        assert_eq!(revision, 1);

        let err = kv.create("key", "again".into()).await.unwrap_err();
        assert_eq!(err.kind(), CreateErrorKind::AlreadyExists);

        kv.delete("key").await.unwrap();
        let revision = kv.create("key", "recreated".into()).await.unwrap();
        assert_eq!(revision, 3);
        assert_eq!(kv.get("key").await.unwrap().value, "recreated");

        kv.purge("key").await.unwrap();
        kv.create("key", "after purge".into()).await.unwrap();
    }

    #[tokio::test]
    async fn update() {
        let server = Server::new();
        let kv = bucket(&server, "test", 10).await;

        let revision = kv.put("key", "one".into()).await.unwrap();
        let revision = kv.update("key", "two".into(), revision).await.unwrap();
        assert_eq!(revision, 2);

        let err = kv.update("key", "stale".into(), 1).await.unwrap_err();
        assert_eq!(err.kind(), UpdateErrorKind::WrongLastRevision);
        assert_eq!(kv.get("key").await.unwrap().value, "two");
    }

    #[tokio::test]
    async fn delete_and_purge() {
        let server = Server::new();
        let kv = bucket(&server, "test", 10).await;

        kv.put("key", "one".into()).await.unwrap();
        kv.put("key", "two".into()).await.unwrap();
        kv.delete("key").await.unwrap();

        let entry = kv.entry("key").await.unwrap().unwrap();
        assert_eq!(entry.operation, Operation::Delete);
        assert!(entry.value.is_empty());
        let err = kv.get("key").await.unwrap_err();
        assert_eq!(err.kind(), EntryErrorKind::NotFound);
        assert_eq!(kv.history_entries("key").await.unwrap().len(), 3);

        kv.purge("key").await.unwrap();
        let history = kv.history_entries("key").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].operation, Operation::Purge);

        // a second purge replaces the first marker
        kv.purge("key").await.unwrap();
        let history = kv.history_entries("key").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].operation, Operation::Purge);
        assert_eq!(history[0].revision, 5);
    }

    #[tokio::test]
    async fn concurrent_create() {
        let server = Server::new();
        let kv = bucket(&server, "test", 10).await;
        let other = kv.clone();

        let (first, second) = tokio::join!(
            kv.create("key", "first".into()),
            other.create("key", "second".into())
        );
        let (created, rejected) = match (first, second) {
            (Ok(revision), Err(err)) | (Err(err), Ok(revision)) => (revision, err),
            results => panic!("expected exactly one create to win: {:?}", results),
        };
        assert_eq!(created, 1);
        assert_eq!(rejected.kind(), CreateErrorKind::AlreadyExists);
        assert_eq!(kv.history_entries("key").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_expect_revision() {
        let server = Server::new();
        let kv = bucket(&server, "test", 10).await;

        let revision = kv.put("key", "one".into()).await.unwrap();
        kv.put("key", "two".into()).await.unwrap();

        let err = kv
            .delete_expect_revision("key", Some(revision))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), kv::DeleteErrorKind::WrongLastRevision);

        kv.delete_expect_revision("key", Some(revision + 1))
            .await
            .unwrap();
        assert!(kv.get("key").await.is_err());

        // zero means no expectation
        kv.put("key", "three".into()).await.unwrap();
        kv.delete_expect_revision("key", Some(0)).await.unwrap();
        let entry = kv.entry("key").await.unwrap().unwrap();
        assert_eq!(entry.operation, Operation::Delete);
    }

    #[tokio::test]
    async fn history() {
        let server = Server::new();
        let kv = bucket(&server, "test", 3).await;

        for value in 0..5 {
            kv.put("key", value.to_string().into()).await.unwrap();
        }
        kv.put("other", "x".into()).await.unwrap();

        let history = kv.history_entries("key").await.unwrap();
        let values: Vec<_> = history.iter().map(|entry| entry.value.clone()).collect();
        assert_eq!(values, vec!["2", "3", "4"]);
        let deltas: Vec<_> = history.iter().map(|entry| entry.delta).collect();
        assert_eq!(deltas, vec![2, 1, 0]);

        let err = kv.history("missing").await.err().unwrap();
        assert_eq!(err.kind(), HistoryErrorKind::NotFound);
    }

    #[tokio::test]
    async fn keys() {
        let server = Server::new();
        let kv = bucket(&server, "test", 10).await;

        let err = kv.keys().await.unwrap_err();
        assert_eq!(err.kind(), KeysErrorKind::NoKeysFound);

        kv.put("a", "1".into()).await.unwrap();
        kv.put("b", "2".into()).await.unwrap();
        kv.put("a", "3".into()).await.unwrap();
        kv.put("c", "4".into()).await.unwrap();
        kv.delete("c").await.unwrap();

        let mut keys = kv.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);

        let streamed: Vec<String> = kv.list_keys().await.unwrap().try_collect().await.unwrap();
        assert_eq!(streamed.len(), 2);
    }

    #[tokio::test]
    async fn purge_deletes() {
        let server = Server::new();
        let kv = bucket(&server, "test", 10).await;

        kv.put("kept", "value".into()).await.unwrap();
        kv.put("gone", "one".into()).await.unwrap();
        kv.put("gone", "two".into()).await.unwrap();
        kv.delete("gone").await.unwrap();
        kv.put("purged", "value".into()).await.unwrap();
        kv.purge("purged").await.unwrap();

        // recent markers keep their last message
        kv.purge_deletes(PurgeDeletesOptions::default())
            .await
            .unwrap();
        assert_eq!(kv.status().await.unwrap().values(), 3);

        kv.purge_deletes(PurgeDeletesOptions {
            delete_markers_older_than: Duration::ZERO,
        })
        .await
        .unwrap();
        assert_eq!(kv.status().await.unwrap().values(), 1);
        assert_eq!(kv.keys().await.unwrap(), vec!["kept".to_string()]);
    }

    #[tokio::test]
    async fn status() {
        let server = Server::new();
        let context = jetstream::new(server.connect());
        let kv = context
            .create_key_value(kv::Config {
                bucket: "status".into(),
                description: "described".into(),
                history: 5,
                max_age: Duration::from_secs(60),
                ..Default::default()
            })
            .await
            .unwrap();
        kv.put("key", "value".into()).await.unwrap();

        let status = kv.status().await.unwrap();
        assert_eq!(status.bucket(), "status");
        assert_eq!(status.values(), 1);
        assert_eq!(status.history(), 5);
        assert_eq!(status.max_age(), Duration::from_secs(60));
        assert_eq!(status.description(), Some("described"));
        assert_eq!(status.backing_store(), "JetStream");
        assert!(!status.is_compressed());
        assert!(status.bytes() > 0);
    }

    #[tokio::test]
    async fn max_value_size() {
        let server = Server::new();
        let context = jetstream::new(server.connect());
        let kv = context
            .create_key_value(kv::Config {
                bucket: "small".into(),
                max_value_size: 8,
                ..Default::default()
            })
            .await
            .unwrap();

        kv.put("key", "tiny".into()).await.unwrap();
        let err = kv
            .put("key", "far too large for this bucket".into())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), PutErrorKind::Ack);
    }

    #[tokio::test]
    async fn bucket_names() {
        let server = Server::new();
        let context = jetstream::new(server.connect());

        bucket(&server, "first", 1).await;
        bucket(&server, "second", 1).await;
        context
            .create_object_store(jetstream::object_store::Config {
                bucket: "objects".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let mut names: Vec<String> = context
            .key_value_store_names()
            .try_collect()
            .await
            .unwrap();
        names.sort();
        assert_eq!(names, vec!["first".to_string(), "second".to_string()]);

        let objects: Vec<String> = context.object_store_names().try_collect().await.unwrap();
        assert_eq!(objects, vec!["objects".to_string()]);
    }

    #[tokio::test]
    async fn watch_after_reconnect_of_handle() {
        let server = Server::new();
        let writer = bucket(&server, "shared", 5).await;
        let reader = jetstream::new(server.connect())
            .get_key_value("shared")
            .await
            .unwrap();

        let mut watch = reader.watch_all().await.unwrap();
        assert!(matches!(
            watch.next().await,
            Some(Ok(jetstream::watcher::Update::InitialValuesDone))
        ));

        writer.put("key", "value".into()).await.unwrap();
        let entry = watch.next().await.unwrap().unwrap().into_value().unwrap();
        assert_eq!(entry.key, "key");
        assert_eq!(entry.value, "value");
    }
}
