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

//! Key-Value and Object Store buckets on top of NATS JetStream.
//!
//! A key-value bucket is a stream named `KV_<bucket>` capturing
//! `$KV.<bucket>.>`. Every write is a single message whose stream sequence
//! becomes the revision of the key; reads fetch the last message of the key's
//! subject and watchers are ordered, ephemeral push consumers.
//!
//! An object bucket is a stream named `OBJ_<bucket>`. Objects are split into
//! chunk messages on `$O.<bucket>.C.<nuid>`, described by a rolled up metadata
//! message on `$O.<bucket>.M.<name>`.
//!
//! The crate does not manage connections. It talks to the server through the
//! [client::Transport] trait, implemented by [memory::Server] for in-process use
//! and, with the `async-nats` feature, by `adapter::AsyncNatsTransport`.
//!
//! # Examples
//!
//! ```
//! # #[tokio::main]
//! # async fn main() -> Result<(), nats_kv::Error> {
//! use nats_kv::jetstream::{self, kv};
//!
//! let server = nats_kv::memory::Server::new();
//! let context = jetstream::new(server.connect());
//!
//! let store = context
//!     .create_key_value(kv::Config {
//!         bucket: "profiles".to_string(),
//!         history: 5,
//!         ..Default::default()
//!     })
//!     .await?;
//!
//! let revision = store.put("greeting", "hello".into()).await?;
//! let entry = store.get("greeting").await?;
//! assert_eq!(entry.revision, revision);
//! assert_eq!(entry.value.as_ref(), b"hello");
//! # Ok(())
//! # }
//! ```

#![deny(unreachable_pub)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]

#[cfg(feature = "async-nats")]
pub mod adapter;
pub mod client;
pub mod error;
pub mod header;
pub mod jetstream;
pub mod memory;
pub mod message;
pub mod status;
pub mod subject;

pub use client::{Client, Subscriber, Transport};
pub use header::{HeaderMap, HeaderName, HeaderValue};
pub use message::Message;
pub use status::StatusCode;

/// Type-erased error, used as the source of every [error::Error].
pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;
