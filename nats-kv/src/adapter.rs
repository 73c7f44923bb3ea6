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

//! [Transport] backed by an [async_nats::Client].
//!
//! ```no_run
//! # #[tokio::main]
//! # async fn main() -> Result<(), nats_kv::Error> {
//! let nats = async_nats::connect("demo.nats.io").await?;
//! let client = nats_kv::adapter::AsyncNatsTransport::new(nats).into_client();
//! let context = nats_kv::jetstream::new(client);
//! let kv = context.get_key_value("profiles").await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use futures::StreamExt;
use tracing::warn;

use crate::client::{Client, Subscriber, Transport};
use crate::header::HeaderMap;
use crate::{Message, StatusCode};

/// Forwards publishes and subscriptions to a NATS connection.
#[derive(Clone, Debug)]
pub struct AsyncNatsTransport {
    client: async_nats::Client,
}

impl AsyncNatsTransport {
    pub fn new(client: async_nats::Client) -> AsyncNatsTransport {
        AsyncNatsTransport { client }
    }

    pub fn into_client(self) -> Client {
        Client::new(self)
    }
}

fn to_nats_headers(headers: &HeaderMap) -> async_nats::HeaderMap {
    let mut nats_headers = async_nats::HeaderMap::new();
    for (name, values) in headers.iter() {
        for value in values.iter() {
            nats_headers.append(name.as_str(), value.as_str());
        }
    }
    nats_headers
}

fn from_nats_message(message: async_nats::Message) -> Message {
    let headers = message.headers.map(|nats_headers| {
        let mut headers = HeaderMap::new();
        for (name, values) in nats_headers.iter() {
            let name = name.to_string();
            for value in values.iter() {
                headers.append(name.as_str(), value.as_str());
            }
        }
        headers
    });

    let status = message
        .status
        .and_then(|status| StatusCode::from_u16(status.as_u16()).ok());

    Message {
        subject: message.subject.to_string(),
        reply: message.reply.map(|reply| reply.to_string()),
        payload: message.payload,
        headers,
        status,
        description: message.description,
    }
}

#[async_trait]
impl Transport for AsyncNatsTransport {
    async fn publish(&self, message: Message) -> Result<(), crate::Error> {
        let headers = message
            .headers
            .as_ref()
            .map(to_nats_headers)
            .unwrap_or_default();

        match message.reply {
            Some(reply) => {
                self.client
                    .publish_with_reply_and_headers(
                        message.subject,
                        reply,
                        headers,
                        message.payload,
                    )
                    .await?
            }
            None => {
                self.client
                    .publish_with_headers(message.subject, headers, message.payload)
                    .await?
            }
        }
        Ok(())
    }

    async fn subscribe(&self, subject: String) -> Result<Subscriber, crate::Error> {
        let subscriber = self.client.subscribe(subject.clone()).await?;
        Ok(Subscriber::new(subject, subscriber.map(from_nats_message)))
    }

    fn new_inbox(&self) -> String {
        self.client.new_inbox()
    }

    fn shutdown(&self) {
        let client = self.client.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(err) = client.flush().await {
                    warn!("failed to flush on shutdown: {}", err);
                }
            });
        }
    }
}
