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

//! An in-process NATS server with JetStream, for tests and embedding.
//!
//! Only what buckets need is implemented: core publish/subscribe with
//! wildcards, streams with their limits and optimistic concurrency headers,
//! message get, direct get, purge, and ephemeral push consumers with idle
//! heartbeats and flow control.
//!
//! ```
//! # #[tokio::main]
//! # async fn main() -> Result<(), nats_kv::Error> {
//! use futures::StreamExt;
//!
//! let server = nats_kv::memory::Server::new();
//! let client = server.connect();
//!
//! let mut subscriber = client.subscribe("events.*".to_string()).await?;
//! client.publish("events.login".to_string(), "data".into()).await?;
//! let message = subscriber.next().await.unwrap();
//! assert_eq!(message.subject, "events.login");
//! # Ok(())
//! # }
//! ```

mod api;
mod consumer;
mod stream;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::client::{Client, ConnectionClosed, Subscriber, Transport};
use crate::{Message, StatusCode};

use self::stream::MemoryStream;

const API_PREFIX: &str = "$JS.API.";
const FLOW_CONTROL_PREFIX: &str = "$JS.FC.";
const ACK_PREFIX: &str = "$JS.ACK.";

struct Subscription {
    connection: u64,
    subject: String,
    sender: mpsc::UnboundedSender<Message>,
}

/// Live subscriptions, keyed by subscription id.
#[derive(Default)]
pub(crate) struct Router {
    subscriptions: HashMap<u64, Subscription>,
    next_id: u64,
}

impl Router {
    fn subscribe(
        &mut self,
        connection: u64,
        subject: String,
    ) -> mpsc::UnboundedReceiver<Message> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.next_id += 1;
        self.subscriptions.insert(
            self.next_id,
            Subscription {
                connection,
                subject,
                sender,
            },
        );
        receiver
    }

    /// Sends `message` to every subscription matching `subject`. Returns
    /// whether anyone received it.
    pub(crate) fn route_to(&mut self, subject: &str, message: Message) -> bool {
        // dropped subscribers unsubscribe lazily
        self.subscriptions
            .retain(|_, subscription| !subscription.sender.is_closed());

        let mut delivered = false;
        for subscription in self.subscriptions.values() {
            if crate::subject::subject_matches(&subscription.subject, subject) {
                delivered |= subscription.sender.send(message.clone()).is_ok();
            }
        }
        delivered
    }

    pub(crate) fn has_interest(&self, subject: &str) -> bool {
        self.subscriptions.values().any(|subscription| {
            !subscription.sender.is_closed()
                && crate::subject::subject_matches(&subscription.subject, subject)
        })
    }

    fn close(&mut self, connection: u64) {
        self.subscriptions
            .retain(|_, subscription| subscription.connection != connection);
    }

    fn live(&self) -> usize {
        self.subscriptions
            .values()
            .filter(|subscription| !subscription.sender.is_closed())
            .count()
    }
}

pub(crate) struct State {
    router: Router,
    pub(crate) streams: BTreeMap<String, MemoryStream>,
    drop_next_delivery: bool,
}

impl State {
    /// Delivers pending messages of every consumer.
    fn pump(&mut self) {
        for (name, stream) in self.streams.iter_mut() {
            let messages = &stream.messages;
            for consumer in stream.consumers.values_mut() {
                consumer.pump(name, messages, &mut self.router, &mut self.drop_next_delivery);
            }
        }
    }

    fn flow_control_answered(&mut self, reply: &str) {
        for stream in self.streams.values_mut() {
            for consumer in stream.consumers.values_mut() {
                if consumer.flow_control_answered(reply) {
                    return;
                }
            }
        }
    }

    /// Periodic housekeeping of one consumer. Returns `false` once the
    /// consumer is gone.
    fn monitor(&mut self, stream_name: &str, consumer_name: &str) -> bool {
        let Some(stream) = self.streams.get_mut(stream_name) else {
            return false;
        };
        let Some(consumer) = stream.consumers.get_mut(consumer_name) else {
            return false;
        };
        if consumer.tick(&mut self.router) {
            return true;
        }
        debug!(
            "deleting inactive consumer {} on {} (deliver subject {})",
            consumer_name,
            stream_name,
            consumer.deliver_subject()
        );
        stream.consumers.remove(consumer_name);
        false
    }
}

pub(crate) struct Inner {
    state: Mutex<State>,
    next_connection: AtomicU64,
}

impl Inner {
    fn publish(self: &Arc<Self>, message: Message) {
        let mut state = self.state.lock().unwrap();
        let reply = message.reply.clone();

        let answered = if let Some(api) = message.subject.strip_prefix(API_PREFIX) {
            match api::handle(&mut state, &Arc::downgrade(self), api, &message) {
                Some(mut response) => {
                    if let Some(reply) = reply.as_deref() {
                        response.subject = reply.to_string();
                        state.router.route_to(reply, response);
                    }
                    true
                }
                None => false,
            }
        } else if message.subject.starts_with(FLOW_CONTROL_PREFIX) {
            state.flow_control_answered(&message.subject);
            true
        } else if message.subject.starts_with(ACK_PREFIX) {
            // push consumers here never wait for acks
            true
        } else {
            let stored = match state
                .streams
                .values_mut()
                .find(|stream| stream.captures(&message.subject))
            {
                Some(stream) => Some(stream.store(&message)),
                None => None,
            };
            let delivered = state.router.route_to(&message.subject.clone(), message);

            match (stored, reply.as_deref()) {
                (Some(result), Some(reply)) => {
                    let mut response = api::respond(result);
                    response.subject = reply.to_string();
                    state.router.route_to(reply, response);
                    true
                }
                (Some(_), None) => true,
                (None, _) => delivered,
            }
        };

        if !answered {
            if let Some(reply) = reply.as_deref() {
                trace!("no responders for request with reply {}", reply);
                let response =
                    Message::with_status(reply, StatusCode::NO_RESPONDERS, "No Responders");
                state.router.route_to(reply, response);
            }
        }

        state.pump();
    }
}

/// Starts the task sending heartbeats for a consumer and deleting it once
/// nobody listens on its deliver subject.
pub(crate) fn spawn_monitor(
    server: Weak<Inner>,
    stream: String,
    consumer: String,
    interval: Duration,
) {
    tokio::task::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(server) = server.upgrade() else {
                return;
            };
            let alive = {
                let mut state = server.state.lock().unwrap();
                state.monitor(&stream, &consumer)
            };
            if !alive {
                trace!("monitor of {} on {} stopped", consumer, stream);
                return;
            }
        }
    });
}

/// An in-process server. Clones share the same state.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

impl Default for Server {
    fn default() -> Self {
        Server::new()
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server").finish_non_exhaustive()
    }
}

impl Server {
    pub fn new() -> Server {
        Server {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    router: Router::default(),
                    streams: BTreeMap::new(),
                    drop_next_delivery: false,
                }),
                next_connection: AtomicU64::new(0),
            }),
        }
    }

    /// Opens a new connection to the server.
    pub fn connect(&self) -> Client {
        let id = self.inner.next_connection.fetch_add(1, Ordering::Relaxed);
        Client::new(Connection {
            id,
            server: self.inner.clone(),
            closed: AtomicBool::new(false),
        })
    }

    /// Names of the streams on the server.
    pub fn stream_names(&self) -> Vec<String> {
        self.inner.state.lock().unwrap().streams.keys().cloned().collect()
    }

    /// Number of consumers on a stream, `None` if the stream does not exist.
    pub fn consumer_count(&self, stream: &str) -> Option<usize> {
        self.inner
            .state
            .lock()
            .unwrap()
            .streams
            .get(stream)
            .map(|stream| stream.consumers.len())
    }

    /// Number of subscriptions whose subscriber is still alive.
    pub fn subscription_count(&self) -> usize {
        self.inner.state.lock().unwrap().router.live()
    }

    /// Rewrites the payload of a stored message, returns `false` if there is
    /// no such message.
    pub fn corrupt_message(&self, stream: &str, sequence: u64, payload: impl Into<Bytes>) -> bool {
        let mut state = self.inner.state.lock().unwrap();
        match state
            .streams
            .get_mut(stream)
            .and_then(|stream| stream.messages.get_mut(&sequence))
        {
            Some(message) => {
                message.payload = payload.into();
                true
            }
            None => false,
        }
    }

    /// The next message a push consumer delivers is lost, as if the network
    /// dropped it.
    pub fn drop_next_delivery(&self) {
        self.inner.state.lock().unwrap().drop_next_delivery = true;
    }

    /// Last sequence of a stream, `None` if the stream does not exist.
    pub fn last_sequence(&self, stream: &str) -> Option<u64> {
        self.inner
            .state
            .lock()
            .unwrap()
            .streams
            .get(stream)
            .map(MemoryStream::last_sequence)
    }
}

/// A client connection. Shutting it down drops its subscriptions.
struct Connection {
    id: u64,
    server: Arc<Inner>,
    closed: AtomicBool,
}

#[async_trait]
impl Transport for Connection {
    async fn publish(&self, message: Message) -> Result<(), crate::Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Box::new(ConnectionClosed));
        }
        self.server.publish(message);
        Ok(())
    }

    async fn subscribe(&self, subject: String) -> Result<Subscriber, crate::Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Box::new(ConnectionClosed));
        }
        let receiver = self
            .server
            .state
            .lock()
            .unwrap()
            .router
            .subscribe(self.id, subject.clone());

        let messages = futures::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|message| (message, receiver))
        });
        Ok(Subscriber::new(subject, messages))
    }

    fn shutdown(&self) {
        debug!("connection {} closed", self.id);
        self.closed.store(true, Ordering::Release);
        self.server.state.lock().unwrap().router.close(self.id);
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    #[tokio::test]
    async fn no_responders() {
        let server = Server::new();
        let client = server.connect();
        let err = client
            .request("nobody.home".into(), Bytes::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::client::RequestErrorKind::NoResponders);
    }

    #[tokio::test]
    async fn request_reply() {
        let server = Server::new();
        let client = server.connect();
        let mut service = client.subscribe("service".into()).await.unwrap();

        let responder = client.clone();
        tokio::spawn(async move {
            let request = service.next().await.unwrap();
            responder
                .publish(request.reply.unwrap(), "pong".into())
                .await
                .unwrap();
        });

        let response = client.request("service".into(), "ping".into()).await.unwrap();
        assert_eq!(response.payload, "pong");
    }

    #[tokio::test]
    async fn dropped_subscriber_unsubscribes() {
        let server = Server::new();
        let client = server.connect();
        let subscriber = client.subscribe("foo.>".into()).await.unwrap();
        assert_eq!(server.subscription_count(), 1);
        drop(subscriber);
        assert_eq!(server.subscription_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_closes_subscriptions() {
        let server = Server::new();
        let client = server.connect();
        let mut subscriber = client.subscribe("foo".into()).await.unwrap();
        drop(client);
        assert!(subscriber.next().await.is_none());
    }
}
