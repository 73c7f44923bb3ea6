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

//! JetStream is the persistence layer key-value and object buckets are built on.
//!
//! Everything starts from a [Context], created from a [crate::Client]:
//!
//! ```
//! # #[tokio::main]
//! # async fn main() -> Result<(), nats_kv::Error> {
//! let server = nats_kv::memory::Server::new();
//! let jetstream = nats_kv::jetstream::new(server.connect());
//!
//! let bucket = jetstream
//!     .create_object_store(nats_kv::jetstream::object_store::Config {
//!         bucket: "files".to_string(),
//!         ..Default::default()
//!     })
//!     .await?;
//! bucket.put_bytes("hello.txt", b"hello world".to_vec()).await?;
//! # Ok(())
//! # }
//! ```

use crate::Client;

pub mod consumer;
pub mod context;
pub mod errors;
pub mod kv;
pub mod message;
pub mod object_store;
pub mod publish;
pub mod response;
pub mod stream;
pub mod watcher;

pub use context::{Context, ContextOptions};
pub use errors::{Error, ErrorCode};
pub use message::Message;

/// Creates a new JetStream [Context] using the default `$JS.API` prefix.
pub fn new(client: Client) -> Context {
    Context::new(client)
}

/// Creates a new JetStream [Context] with a custom API prefix, e.g. to reach
/// a different domain.
pub fn with_prefix(client: Client, prefix: &str) -> Context {
    Context::with_prefix(client, prefix)
}

/// Creates a new JetStream [Context] from explicit [ContextOptions].
pub fn with_options(client: Client, options: ContextOptions) -> Context {
    Context::with_options(client, options)
}
