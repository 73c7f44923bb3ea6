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

mod watcher {
    use std::time::Duration;

    use futures::StreamExt;
    use nats_kv::jetstream::{
        self,
        kv::{self, Entry, Operation, Watch},
        watcher::{Update, WatchOptions, WatcherErrorKind},
    };
    use nats_kv::memory::Server;

    async fn bucket(server: &Server, history: i64) -> kv::Store {
        jetstream::new(server.connect())
            .create_key_value(kv::Config {
                bucket: "watched".to_string(),
                history,
                ..Default::default()
            })
            .await
            .unwrap()
    }

    async fn next(watch: &mut Watch) -> Update<Entry> {
        tokio::time::timeout(Duration::from_secs(5), watch.next())
            .await
            .expect("watch timed out")
            .expect("watch ended")
            .unwrap()
    }

    async fn next_entry(watch: &mut Watch) -> Entry {
        match next(watch).await {
            Update::Value(entry) => entry,
            Update::InitialValuesDone => panic!("expected an entry"),
        }
    }

    #[tokio::test]
    async fn initial_values_then_updates() {
        let server = Server::new();
        let kv = bucket(&server, 10).await;

        kv.put("foo.a", "1".into()).await.unwrap();
        kv.put("foo.b", "2".into()).await.unwrap();
        kv.put("foo.a", "3".into()).await.unwrap();
        kv.put("bar", "ignored".into()).await.unwrap();

        let mut watch = kv.watch("foo.*").await.unwrap();
        let first = next_entry(&mut watch).await;
        assert_eq!((first.key.as_str(), first.revision), ("foo.b", 2));
        assert_eq!(first.delta, 1);
        let second = next_entry(&mut watch).await;
        assert_eq!((second.key.as_str(), second.revision), ("foo.a", 3));
        assert_eq!(second.delta, 0);
        assert_eq!(next(&mut watch).await, Update::InitialValuesDone);

        kv.put("bar", "still ignored".into()).await.unwrap();
        kv.put("foo.c", "4".into()).await.unwrap();
        kv.delete("foo.a").await.unwrap();

        let entry = next_entry(&mut watch).await;
        assert_eq!(entry.key, "foo.c");
        assert_eq!(entry.value, "4");
        let entry = next_entry(&mut watch).await;
        assert_eq!(entry.key, "foo.a");
        assert_eq!(entry.operation, Operation::Delete);
    }

    #[tokio::test]
    async fn empty_bucket_signals_done_first() {
        let server = Server::new();
        let kv = bucket(&server, 1).await;

        let mut watch = kv.watch_all().await.unwrap();
        assert_eq!(next(&mut watch).await, Update::InitialValuesDone);

        kv.put("key", "value".into()).await.unwrap();
        assert_eq!(next_entry(&mut watch).await.revision, 1);
    }

    #[tokio::test]
    async fn updates_only() {
        let server = Server::new();
        let kv = bucket(&server, 1).await;
        kv.put("old", "value".into()).await.unwrap();

        let mut watch = kv
            .watch_all_with_options(WatchOptions {
                updates_only: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(next(&mut watch).await, Update::InitialValuesDone);

        kv.put("new", "value".into()).await.unwrap();
        assert_eq!(next_entry(&mut watch).await.key, "new");
    }

    #[tokio::test]
    async fn history_and_ignore_deletes() {
        let server = Server::new();
        let kv = bucket(&server, 10).await;

        kv.put("key", "1".into()).await.unwrap();
        kv.put("key", "2".into()).await.unwrap();
        kv.delete("key").await.unwrap();
        kv.put("other", "3".into()).await.unwrap();

        let mut watch = kv.watch_with_history("key").await.unwrap();
        let revisions: Vec<u64> = vec![
            next_entry(&mut watch).await.revision,
            next_entry(&mut watch).await.revision,
            next_entry(&mut watch).await.revision,
        ];
        assert_eq!(revisions, vec![1, 2, 3]);
        assert_eq!(next(&mut watch).await, Update::InitialValuesDone);

        let mut watch = kv
            .watch_all_with_options(WatchOptions {
                ignore_deletes: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(next_entry(&mut watch).await.key, "other");
        assert_eq!(next(&mut watch).await, Update::InitialValuesDone);
    }

    #[tokio::test]
    async fn invalid_options() {
        let server = Server::new();
        let kv = bucket(&server, 1).await;

        let err = kv
            .watch_all_with_options(WatchOptions {
                include_history: true,
                updates_only: true,
                ..Default::default()
            })
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), WatcherErrorKind::InvalidOptions);

        let err = kv.watch("bad..key").await.err().unwrap();
        assert_eq!(err.kind(), WatcherErrorKind::InvalidKey);
    }

    #[tokio::test]
    async fn meta_only() {
        let server = Server::new();
        let kv = bucket(&server, 1).await;
        kv.put("key", "large value".into()).await.unwrap();

        let mut watch = kv
            .watch_all_with_options(WatchOptions {
                meta_only: true,
                ..Default::default()
            })
            .await
            .unwrap();
        let entry = next_entry(&mut watch).await;
        assert_eq!(entry.key, "key");
        assert!(entry.value.is_empty());
    }

    #[tokio::test]
    async fn recovers_from_lost_delivery() {
        let server = Server::new();
        let kv = bucket(&server, 10).await;

        let mut watch = kv.watch_all().await.unwrap();
        assert_eq!(next(&mut watch).await, Update::InitialValuesDone);

        server.drop_next_delivery();
        kv.put("a", "1".into()).await.unwrap();
        kv.put("b", "2".into()).await.unwrap();

        // the gap is noticed on "b" and the consumer is recreated
        let first = next_entry(&mut watch).await;
        assert_eq!((first.key.as_str(), first.revision), ("a", 1));
        let second = next_entry(&mut watch).await;
        assert_eq!((second.key.as_str(), second.revision), ("b", 2));

        kv.put("c", "3".into()).await.unwrap();
        assert_eq!(next_entry(&mut watch).await.revision, 3);
        assert_eq!(server.consumer_count("KV_watched"), Some(1));
    }

    #[tokio::test]
    async fn recovers_lost_first_update() {
        let server = Server::new();
        let kv = bucket(&server, 10).await;
        kv.put("old", "value".into()).await.unwrap();

        let mut watch = kv
            .watch_all_with_options(WatchOptions {
                updates_only: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(next(&mut watch).await, Update::InitialValuesDone);

        server.drop_next_delivery();
        kv.put("a", "1".into()).await.unwrap();
        kv.put("b", "2".into()).await.unwrap();
        kv.put("c", "3".into()).await.unwrap();

        // the recreated consumer starts right after "old", not after "b"
        let mut keys = Vec::new();
        for _ in 0..3 {
            let entry = next_entry(&mut watch).await;
            keys.push((entry.key, entry.revision));
        }
        assert_eq!(
            keys,
            vec![
                ("a".to_string(), 2),
                ("b".to_string(), 3),
                ("c".to_string(), 4)
            ]
        );
        assert_eq!(server.consumer_count("KV_watched"), Some(1));
    }

    #[tokio::test]
    async fn flow_control() {
        let server = Server::new();
        let kv = bucket(&server, 1).await;

        for i in 0..300 {
            kv.put(format!("key.{}", i), i.to_string().into())
                .await
                .unwrap();
        }

        let mut watch = kv.watch_all().await.unwrap();
        for i in 0..300 {
            let entry = next_entry(&mut watch).await;
            assert_eq!(entry.key, format!("key.{}", i));
        }
        assert_eq!(next(&mut watch).await, Update::InitialValuesDone);
    }

    #[tokio::test]
    async fn stop_releases_the_subscription() {
        let server = Server::new();
        let kv = bucket(&server, 1).await;
        let baseline = server.subscription_count();

        let watch = kv.watch_all().await.unwrap();
        assert_eq!(server.subscription_count(), baseline + 1);
        watch.stop();

        let released = async {
            while server.subscription_count() > baseline {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), released)
            .await
            .unwrap();
    }
}
