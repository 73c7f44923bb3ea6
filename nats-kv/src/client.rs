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

//! The pub/sub contract buckets are built on.
//!
//! Connection management lives outside of this crate. Anything able to publish,
//! subscribe and mint inbox subjects can back a [Client] by implementing
//! [Transport]; see [crate::memory] for the in-process implementation.

use std::fmt::{self, Display};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt, TryFutureExt};
use thiserror::Error;
use tracing::trace;

use crate::error::Error;
use crate::header::HeaderMap;
use crate::status::StatusCode;
use crate::Message;

/// Publish/subscribe primitives of a NATS connection.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Publishes a message. `message.reply` is forwarded as the reply subject.
    async fn publish(&self, message: Message) -> Result<(), crate::Error>;

    /// Subscribes to a subject, possibly containing wildcards. Dropping the
    /// returned [Subscriber] unsubscribes.
    async fn subscribe(&self, subject: String) -> Result<Subscriber, crate::Error>;

    /// Returns a unique subject to receive replies on.
    fn new_inbox(&self) -> String {
        format!("_INBOX.{}", nuid::next())
    }

    /// Called once, when the last [Client] handle is dropped.
    fn shutdown(&self) {}
}

/// Returned by transports that have been shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("connection closed")]
pub struct ConnectionClosed;

fn is_connection_closed(err: &crate::Error) -> bool {
    err.downcast_ref::<ConnectionClosed>().is_some()
}

struct Shared {
    transport: Arc<dyn Transport>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        trace!("last client handle dropped, shutting transport down");
        self.transport.shutdown();
    }
}

/// A cloneable handle to a [Transport].
///
/// All clones share the transport. Dropping the last clone shuts it down.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
    request_timeout: Option<Duration>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl Client {
    pub fn new<T: Transport>(transport: T) -> Client {
        Client::from_arc(Arc::new(transport))
    }

    pub fn from_arc(transport: Arc<dyn Transport>) -> Client {
        Client {
            shared: Arc::new(Shared { transport }),
            request_timeout: Some(Duration::from_secs(10)),
        }
    }

    /// Sets the default timeout of [Client::request]. `None` waits forever.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Client {
        self.request_timeout = timeout;
        self
    }

    pub fn new_inbox(&self) -> String {
        self.shared.transport.new_inbox()
    }

    pub async fn publish(&self, subject: String, payload: Bytes) -> Result<(), PublishError> {
        self.send(Message::new(subject, payload)).await
    }

    pub async fn publish_with_headers(
        &self,
        subject: String,
        headers: HeaderMap,
        payload: Bytes,
    ) -> Result<(), PublishError> {
        let mut message = Message::new(subject, payload);
        message.headers = Some(headers);
        self.send(message).await
    }

    pub async fn publish_with_reply(
        &self,
        subject: String,
        reply: String,
        headers: Option<HeaderMap>,
        payload: Bytes,
    ) -> Result<(), PublishError> {
        let mut message = Message::new(subject, payload);
        message.reply = Some(reply);
        message.headers = headers;
        self.send(message).await
    }

    async fn send(&self, message: Message) -> Result<(), PublishError> {
        self.shared
            .transport
            .publish(message)
            .await
            .map_err(|err| {
                if is_connection_closed(&err) {
                    PublishError::new(PublishErrorKind::ConnectionClosed)
                } else {
                    PublishError::with_source(PublishErrorKind::Send, err)
                }
            })
    }

    pub async fn subscribe(&self, subject: String) -> Result<Subscriber, SubscribeError> {
        self.shared
            .transport
            .subscribe(subject)
            .await
            .map_err(SubscribeError)
    }

    pub async fn request(&self, subject: String, payload: Bytes) -> Result<Message, RequestError> {
        self.send_request(subject, Request::new().payload(payload))
            .await
    }

    /// Publishes a request on a fresh inbox and waits for the first reply.
    ///
    /// The inbox subscription only lives for the duration of the call, so a
    /// reply arriving after the timeout, or after the future was dropped, is
    /// discarded.
    pub async fn send_request(
        &self,
        subject: String,
        request: Request,
    ) -> Result<Message, RequestError> {
        let inbox = self.new_inbox();
        let timeout = request.timeout.unwrap_or(self.request_timeout);
        trace!("request sent to subject: {} ({:?})", subject, timeout);

        let mut subscriber = self.subscribe(inbox.clone()).await?;
        self.publish_with_reply(
            subject,
            inbox,
            request.headers,
            request.payload.unwrap_or_default(),
        )
        .await?;

        let response = match timeout {
            Some(timeout) => {
                tokio::time::timeout(timeout, subscriber.next())
                    .map_err(|err| RequestError::with_source(RequestErrorKind::TimedOut, err))
                    .await?
            }
            None => subscriber.next().await,
        };

        match response {
            Some(message) if message.status == Some(StatusCode::NO_RESPONDERS) => {
                Err(RequestError::new(RequestErrorKind::NoResponders))
            }
            Some(message) => Ok(message),
            None => Err(RequestError::new(RequestErrorKind::ConnectionClosed)),
        }
    }
}

/// Options of a single [Client::send_request] call.
#[derive(Default, Debug, Clone)]
pub struct Request {
    payload: Option<Bytes>,
    headers: Option<HeaderMap>,
    timeout: Option<Option<Duration>>,
}

impl Request {
    pub fn new() -> Request {
        Default::default()
    }

    pub fn payload(mut self, payload: Bytes) -> Request {
        self.payload = Some(payload);
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Request {
        self.headers = Some(headers);
        self
    }

    /// Overrides the client's request timeout. `None` waits forever.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Request {
        self.timeout = Some(timeout);
        self
    }
}

/// Messages delivered for a subscription.
///
/// Unsubscribes when dropped.
pub struct Subscriber {
    subject: String,
    messages: BoxStream<'static, Message>,
}

impl Subscriber {
    pub fn new<S>(subject: String, messages: S) -> Subscriber
    where
        S: Stream<Item = Message> + Send + 'static,
    {
        Subscriber {
            subject,
            messages: messages.boxed(),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn unsubscribe(self) {}
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("subject", &self.subject)
            .finish()
    }
}

impl Stream for Subscriber {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.messages.poll_next_unpin(cx)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PublishErrorKind {
    ConnectionClosed,
    Send,
}

impl Display for PublishErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionClosed => write!(f, "connection closed"),
            Self::Send => write!(f, "failed to send message"),
        }
    }
}

pub type PublishError = Error<PublishErrorKind>;

#[derive(Error, Debug)]
#[error("failed to subscribe: {0}")]
pub struct SubscribeError(#[source] crate::Error);

impl SubscribeError {
    pub fn is_connection_closed(&self) -> bool {
        is_connection_closed(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RequestErrorKind {
    /// Nobody answered in time.
    TimedOut,
    /// No one is listening on the request subject.
    NoResponders,
    ConnectionClosed,
    Other,
}

impl Display for RequestErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimedOut => write!(f, "request timed out"),
            Self::NoResponders => write!(f, "no responders"),
            Self::ConnectionClosed => write!(f, "connection closed"),
            Self::Other => write!(f, "request failed"),
        }
    }
}

pub type RequestError = Error<RequestErrorKind>;

impl From<PublishError> for RequestError {
    fn from(e: PublishError) -> Self {
        match e.kind() {
            PublishErrorKind::ConnectionClosed => {
                RequestError::new(RequestErrorKind::ConnectionClosed)
            }
            PublishErrorKind::Send => RequestError::with_source(RequestErrorKind::Other, e),
        }
    }
}

impl From<SubscribeError> for RequestError {
    fn from(e: SubscribeError) -> Self {
        if e.is_connection_closed() {
            RequestError::new(RequestErrorKind::ConnectionClosed)
        } else {
            RequestError::with_source(RequestErrorKind::Other, e)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    struct Closed {
        shut: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Transport for Closed {
        async fn publish(&self, _message: Message) -> Result<(), crate::Error> {
            Err(Box::new(ConnectionClosed))
        }

        async fn subscribe(&self, subject: String) -> Result<Subscriber, crate::Error> {
            Ok(Subscriber::new(subject, futures::stream::pending()))
        }

        fn shutdown(&self) {
            self.shut.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn closed_transport() {
        let shut = Arc::new(AtomicBool::new(false));
        let client = Client::new(Closed { shut: shut.clone() });

        let err = client
            .publish("foo".into(), Bytes::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), PublishErrorKind::ConnectionClosed);

        let err = client
            .request("foo".into(), Bytes::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), RequestErrorKind::ConnectionClosed);

        let clone = client.clone();
        drop(client);
        assert!(!shut.load(Ordering::SeqCst));
        drop(clone);
        assert!(shut.load(Ordering::SeqCst));
    }
}
