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

mod object_store {
    use std::io;

    use futures::StreamExt;
    use nats_kv::jetstream::{
        self,
        context::ObjectStoreErrorKind,
        object_store::{
            self, AddLinkErrorKind, GetErrorKind, InfoErrorKind, ListErrorKind, ObjectMeta,
            ObjectOptions, ObjectStore, PutErrorKind, UpdateMetadataErrorKind,
        },
        watcher::Update,
    };
    use nats_kv::memory::Server;
    use rand::RngCore;
    use tokio::io::AsyncReadExt;

    async fn bucket(server: &Server, name: &str) -> ObjectStore {
        jetstream::new(server.connect())
            .create_object_store(object_store::Config {
                bucket: name.to_string(),
                ..Default::default()
            })
            .await
            .unwrap()
    }

    fn random_bytes(len: usize) -> Vec<u8> {
        let mut bytes = vec![0; len];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes
    }

    #[tokio::test]
    async fn get_and_put() {
        let server = Server::new();
        let bucket = bucket(&server, "bucket").await;

        let data = random_bytes(1024 * 1024 + 17);
        let info = bucket
            .put("FOO", &mut io::Cursor::new(data.clone()))
            .await
            .unwrap();
        assert_eq!(info.name, "FOO");
        assert_eq!(info.bucket, "bucket");
        assert_eq!(info.size, data.len());
        assert_eq!(info.chunks, 9);
        assert!(info.digest.as_deref().unwrap().starts_with("SHA-256="));

        let mut object = bucket.get("FOO").await.unwrap();
        let mut result = Vec::new();
        object.read_to_end(&mut result).await.unwrap();
        assert_eq!(result, data);
        assert_eq!(object.info().size, data.len());

        // overwriting purges the chunks of the previous version
        bucket.put_bytes("FOO", b"small").await.unwrap();
        assert_eq!(bucket.get_bytes("FOO").await.unwrap(), b"small");
        let status = bucket.status().await.unwrap();
        assert!(status.size() < 1024);
    }

    #[tokio::test]
    async fn chunk_boundaries() {
        let server = Server::new();
        let bucket = bucket(&server, "sizes").await;

        for size in [1, 127, 128 * 1024, 129 * 1024, 10 * 1024 * 1024] {
            let name = format!("object-{}", size);
            let data = random_bytes(size);
            let info = bucket.put_bytes(name.as_str(), data.clone()).await.unwrap();
            assert_eq!(info.size, size);
            assert_eq!(info.chunks, (size + 128 * 1024 - 1) / (128 * 1024));
            assert_eq!(bucket.get_bytes(name.as_str()).await.unwrap(), data);
        }
    }

    #[tokio::test]
    async fn chunks_and_meta_in_stream() {
        let server = Server::new();
        let bucket = bucket(&server, "layout").await;

        let info = bucket.put_bytes("FOO", vec![0xAB; 300_000]).await.unwrap();
        assert_eq!(info.chunks, 3);
        // three chunks followed by the meta message
        assert_eq!(server.last_sequence("OBJ_layout"), Some(4));
        assert_eq!(bucket.get_bytes("FOO").await.unwrap(), vec![0xAB; 300_000]);
    }

    #[tokio::test]
    async fn custom_chunk_size() {
        let server = Server::new();
        let bucket = bucket(&server, "chunks").await;

        let data = random_bytes(1000);
        let info = bucket
            .put(
                ObjectMeta {
                    name: "chunked".into(),
                    options: Some(ObjectOptions {
                        max_chunk_size: Some(100),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                &mut data.as_slice(),
            )
            .await
            .unwrap();
        assert_eq!(info.chunks, 10);
        assert_eq!(bucket.get_bytes("chunked").await.unwrap(), data);
    }

    #[tokio::test]
    async fn empty_object() {
        let server = Server::new();
        let bucket = bucket(&server, "empty").await;

        let info = bucket.put_bytes("nothing", b"").await.unwrap();
        assert_eq!(info.size, 0);
        assert_eq!(info.chunks, 0);
        assert!(bucket.get_bytes("nothing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn strings_and_names() {
        let server = Server::new();
        let bucket = bucket(&server, "names").await;

        bucket
            .put_string("dir/file name.txt", "contents")
            .await
            .unwrap();
        assert_eq!(
            bucket.get_string("dir/file name.txt").await.unwrap(),
            "contents"
        );

        let err = bucket.put_string("", "contents").await.unwrap_err();
        assert_eq!(err.kind(), PutErrorKind::InvalidName);
        let err = bucket.info("").await.unwrap_err();
        assert_eq!(err.kind(), InfoErrorKind::InvalidName);
        let err = bucket.get("missing").await.err().unwrap();
        assert_eq!(err.kind(), GetErrorKind::NotFound);
    }

    #[tokio::test]
    async fn delete() {
        let server = Server::new();
        let bucket = bucket(&server, "delete").await;

        bucket
            .put_bytes("FOO", random_bytes(300 * 1024))
            .await
            .unwrap();
        bucket.delete("FOO").await.unwrap();

        let err = bucket.info("FOO").await.unwrap_err();
        assert_eq!(err.kind(), InfoErrorKind::NotFound);

        let deleted = bucket.info_with_deleted("FOO").await.unwrap();
        assert!(deleted.deleted);
        assert_eq!(deleted.size, 0);
        assert_eq!(deleted.chunks, 0);
        assert!(deleted.digest.is_none());

        // only the tombstone is left
        let status = bucket.status().await.unwrap();
        assert!(status.size() < 1024);

        let err = bucket.get("FOO").await.err().unwrap();
        assert_eq!(err.kind(), GetErrorKind::NotFound);

        // and the name can be reused
        bucket.put_string("FOO", "again").await.unwrap();
        assert_eq!(bucket.get_string("FOO").await.unwrap(), "again");
    }

    #[tokio::test]
    async fn digest_mismatch() {
        let server = Server::new();
        let bucket = bucket(&server, "corrupt").await;

        bucket.put_string("FOO", "original data").await.unwrap();
        assert!(server.corrupt_message("OBJ_corrupt", 1, "tampered data"));

        let err = bucket.get_bytes("FOO").await.unwrap_err();
        assert_eq!(err.kind(), GetErrorKind::DigestMismatch);
    }

    #[tokio::test]
    async fn links() {
        let server = Server::new();
        let bucket = bucket(&server, "links").await;
        let other = bucket_other(&server).await;

        let object = bucket.put_string("target", "linked data").await.unwrap();
        let link = bucket.add_link("link", &object).await.unwrap();
        assert!(link.is_link());
        assert_eq!(bucket.get_string("link").await.unwrap(), "linked data");

        // links across buckets
        other.add_link("remote", &object).await.unwrap();
        assert_eq!(other.get_string("remote").await.unwrap(), "linked data");

        let err = bucket.add_link("again", &link).await.unwrap_err();
        assert_eq!(err.kind(), AddLinkErrorKind::LinkToLink);

        let err = bucket.add_link("target", &object).await.unwrap_err();
        assert_eq!(err.kind(), AddLinkErrorKind::AlreadyExists);

        let bucket_link = bucket.add_bucket_link("everything", &other).await.unwrap();
        assert_eq!(bucket_link.link().unwrap().name, None);
        let err = bucket.get("everything").await.err().unwrap();
        assert_eq!(err.kind(), GetErrorKind::BucketLink);

        bucket.delete("target").await.unwrap();
        let deleted = bucket.info_with_deleted("target").await.unwrap();
        let err = bucket.add_link("dangling", &deleted).await.unwrap_err();
        assert_eq!(err.kind(), AddLinkErrorKind::LinkToDeleted);
    }

    async fn bucket_other(server: &Server) -> ObjectStore {
        bucket(server, "other").await
    }

    #[tokio::test]
    async fn list() {
        let server = Server::new();
        let bucket = bucket(&server, "list").await;

        let err = bucket.list().await.unwrap_err();
        assert_eq!(err.kind(), ListErrorKind::NoObjectsFound);

        bucket.put_string("A", "a").await.unwrap();
        bucket.put_string("B", "b").await.unwrap();
        bucket.put_string("C", "c").await.unwrap();
        bucket.delete("B").await.unwrap();

        let mut names: Vec<String> = bucket
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|info| info.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["A".to_string(), "C".to_string()]);
    }

    #[tokio::test]
    async fn watch() {
        let server = Server::new();
        let bucket = bucket(&server, "watch").await;
        bucket.put_string("existing", "data").await.unwrap();

        let mut watch = bucket.watch().await.unwrap();
        let update = watch.next().await.unwrap().unwrap();
        assert_eq!(update.into_value().unwrap().name, "existing");
        assert_eq!(
            watch.next().await.unwrap().unwrap(),
            Update::InitialValuesDone
        );

        bucket.put_string("new", "data").await.unwrap();
        let info = watch.next().await.unwrap().unwrap().into_value().unwrap();
        assert_eq!(info.name, "new");
        assert!(!info.deleted);

        bucket.delete("new").await.unwrap();
        let info = watch.next().await.unwrap().unwrap().into_value().unwrap();
        assert_eq!(info.name, "new");
        assert!(info.deleted);
    }

    #[tokio::test]
    async fn update_metadata() {
        let server = Server::new();
        let bucket = bucket(&server, "meta").await;

        bucket.put_string("old", "data").await.unwrap();
        bucket.put_string("taken", "other").await.unwrap();

        let err = bucket
            .update_metadata("old", ObjectMeta::from("taken"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), UpdateMetadataErrorKind::NameAlreadyInUse);

        let info = bucket
            .update_metadata(
                "old",
                ObjectMeta {
                    name: "new".into(),
                    description: Some("renamed".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(info.description.as_deref(), Some("renamed"));
        assert_eq!(bucket.get_string("new").await.unwrap(), "data");
        let err = bucket.info("old").await.unwrap_err();
        assert_eq!(err.kind(), InfoErrorKind::NotFound);
    }

    #[tokio::test]
    async fn seal() {
        let server = Server::new();
        let bucket = bucket(&server, "sealed").await;
        bucket.put_string("FOO", "data").await.unwrap();

        bucket.seal().await.unwrap();
        assert!(bucket.status().await.unwrap().sealed());
        assert!(bucket.put_string("BAR", "data").await.is_err());
        assert_eq!(bucket.get_string("FOO").await.unwrap(), "data");
    }

    #[tokio::test]
    async fn files() {
        let server = Server::new();
        let bucket = bucket(&server, "files").await;

        let dir = std::env::temp_dir().join(format!("nats-kv-{}", nuid::next()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let source = dir.join("source.bin");
        let data = random_bytes(200 * 1024);
        tokio::fs::write(&source, &data).await.unwrap();

        let info = bucket.put_file(&source).await.unwrap();
        assert_eq!(info.name, source.to_string_lossy());

        let target = dir.join("target.bin");
        bucket.get_file(&info.name, &target).await.unwrap();
        assert_eq!(tokio::fs::read(&target).await.unwrap(), data);

        let missing = dir.join("missing.bin");
        assert!(bucket.get_file("missing", &missing).await.is_err());
        assert!(!missing.exists());

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn get_and_delete_store() {
        let server = Server::new();
        let context = jetstream::new(server.connect());

        let err = context.get_object_store("missing").await.unwrap_err();
        assert_eq!(err.kind(), ObjectStoreErrorKind::BucketNotFound);

        bucket(&server, "present").await;
        let store = context.get_object_store("present").await.unwrap();
        assert_eq!(store.bucket(), "present");

        context.delete_object_store("present").await.unwrap();
        let err = context.get_object_store("present").await.unwrap_err();
        assert_eq!(err.kind(), ObjectStoreErrorKind::BucketNotFound);
    }
}
