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

//! Ordered push consumers.
//!
//! An ordered consumer is an ephemeral push consumer whose deliveries are
//! checked for gaps in the consumer sequence. When a gap is found, heartbeats
//! stop arriving, or the server reports a heartbeat for a sequence the client
//! never saw, the consumer is recreated from the next expected stream sequence.
//! The reader of [Ordered] never observes the reset.

use std::fmt::{self, Display};
use std::pin::Pin;
use std::task::{self, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::{AckPolicy, Config, DeliverPolicy, IntoConsumerConfig, ReplayPolicy};
use crate::{
    error::Error,
    header,
    jetstream::{self, stream::Stream, Context},
    Client, StatusCode, Subscriber,
};

const ORDERED_IDLE_HEARTBEAT: Duration = Duration::from_secs(5);
const ORDERED_INACTIVE_THRESHOLD: Duration = Duration::from_secs(30);
const ORDERED_BUFFER: usize = 256;
const RECREATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration of an ordered push consumer.
///
/// Acknowledgements, redeliveries and the heartbeat cadence are fixed, see
/// [IntoConsumerConfig] for the resulting [Config].
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct OrderedConfig {
    /// The delivery subject used by the push consumer. Replaced by a fresh
    /// inbox whenever the consumer is started or recreated.
    #[serde(default)]
    pub deliver_subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filter_subject: String,
    /// Whether messages are sent as quickly as possible or at the rate of receipt
    #[serde(default)]
    pub replay_policy: ReplayPolicy,
    /// Only deliver headers without payloads.
    #[serde(default)]
    pub headers_only: bool,
    /// Where the first delivery starts. Only used until the first message
    /// arrives, later resets resume after the last delivered stream sequence.
    #[serde(flatten)]
    pub deliver_policy: DeliverPolicy,
}

impl IntoConsumerConfig for OrderedConfig {
    fn into_consumer_config(self) -> Config {
        Config {
            deliver_subject: Some(self.deliver_subject),
            durable_name: None,
            name: self.name,
            description: self.description,
            deliver_policy: self.deliver_policy,
            ack_policy: AckPolicy::None,
            ack_wait: Duration::default(),
            max_deliver: 1,
            filter_subject: self.filter_subject,
            replay_policy: self.replay_policy,
            headers_only: self.headers_only,
            flow_control: true,
            idle_heartbeat: ORDERED_IDLE_HEARTBEAT,
            inactive_threshold: ORDERED_INACTIVE_THRESHOLD,
            num_replicas: 1,
            memory_storage: true,
        }
    }
}

/// What travels from the consumer task to the reader.
#[derive(Debug)]
enum Delivery {
    Message(jetstream::Message),
    /// Reply subject of a flow control request. Answered once the reader got
    /// past every message queued before it.
    FlowControl(String),
    Error(OrderedError),
    /// Consumer could not be recreated. Always the last delivery.
    Failed(OrderedError),
}

/// State of the consumer task.
enum State {
    Healthy(Subscriber),
    Resetting,
    Failed(OrderedError),
}

/// Stream of messages of an ordered push consumer.
///
/// Messages are delivered in stream order without gaps. Dropping it stops
/// the background task and unsubscribes.
pub struct Ordered {
    client: Client,
    receiver: mpsc::Receiver<Delivery>,
    handle: JoinHandle<()>,
    info: super::Info,
    terminated: bool,
}

impl Ordered {
    /// Subscribes to a fresh inbox, creates the consumer delivering to it
    /// and starts the task watching over the subscription.
    pub(crate) async fn start(
        stream: &Stream,
        mut config: OrderedConfig,
    ) -> Result<Ordered, OrderedError> {
        let context = stream.context.clone();
        config.deliver_subject = context.client.new_inbox();

        let subscriber = context
            .client
            .subscribe(config.deliver_subject.clone())
            .await
            .map_err(|err| OrderedError::with_source(OrderedErrorKind::Subscription, err))?;

        let consumer = stream
            .create_consumer(config.clone())
            .await
            .map_err(|err| OrderedError::with_source(OrderedErrorKind::Consumer, err))?;
        trace!(
            "ordered consumer {} created on {}",
            consumer.info.name,
            consumer.info.stream_name
        );

        let (sender, receiver) = mpsc::channel(ORDERED_BUFFER);
        let task = OrderedTask {
            start_sequence: consumer.info.delivered.stream_sequence,
            context: context.clone(),
            config,
            stream_name: stream.name.clone(),
            consumer_name: consumer.info.name.clone(),
            stream_sequence: 0,
            consumer_sequence: 0,
            sender,
        };
        let handle = tokio::task::spawn(task.run(subscriber));

        Ok(Ordered {
            client: context.client,
            receiver,
            handle,
            info: consumer.info,
            terminated: false,
        })
    }

    /// Info of the consumer as it was created, before any reset.
    pub fn cached_info(&self) -> &super::Info {
        &self.info
    }

    /// Stops the consumer. Same as dropping it.
    pub fn stop(self) {}
}

impl Drop for Ordered {
    fn drop(&mut self) {
        self.handle.abort()
    }
}

impl futures::Stream for Ordered {
    type Item = Result<jetstream::Message, OrderedError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<Option<Self::Item>> {
        if self.terminated {
            return Poll::Ready(None);
        }
        loop {
            match futures::ready!(self.receiver.poll_recv(cx)) {
                Some(Delivery::Message(message)) => return Poll::Ready(Some(Ok(message))),
                Some(Delivery::FlowControl(reply)) => {
                    trace!("answering flow control request");
                    let client = self.client.clone();
                    tokio::task::spawn(async move {
                        client.publish(reply, Bytes::new()).await.ok();
                    });
                }
                Some(Delivery::Error(err)) => return Poll::Ready(Some(Err(err))),
                Some(Delivery::Failed(err)) => {
                    self.terminated = true;
                    return Poll::Ready(Some(Err(err)));
                }
                None => return Poll::Ready(None),
            }
        }
    }
}

/// Outcome of handling one message of the subscription.
enum Step {
    Continue,
    Reset,
    Stop,
}

struct OrderedTask {
    context: Context,
    config: OrderedConfig,
    stream_name: String,
    consumer_name: String,
    /// Stream sequence the first consumer was positioned after.
    start_sequence: u64,
    stream_sequence: u64,
    consumer_sequence: u64,
    sender: mpsc::Sender<Delivery>,
}

impl OrderedTask {
    async fn run(mut self, subscriber: Subscriber) {
        let mut state = State::Healthy(subscriber);
        loop {
            state = match state {
                State::Healthy(mut subscriber) => {
                    match tokio::time::timeout(
                        ORDERED_IDLE_HEARTBEAT.saturating_mul(2),
                        subscriber.next(),
                    )
                    .await
                    {
                        Err(_) => {
                            debug!(
                                "idle heartbeats expired. recreating consumer s: {}, c: {}",
                                self.stream_name, self.consumer_name
                            );
                            State::Resetting
                        }
                        Ok(None) => {
                            debug!("ordered consumer subscription closed");
                            State::Resetting
                        }
                        Ok(Some(message)) => match self.handle(message).await {
                            Step::Continue => State::Healthy(subscriber),
                            Step::Reset => State::Resetting,
                            Step::Stop => return,
                        },
                    }
                }
                State::Resetting => match self.reset().await {
                    Ok(subscriber) => State::Healthy(subscriber),
                    Err(err) => State::Failed(err),
                },
                State::Failed(err) => {
                    debug!("ordered consumer failed: {}", err);
                    self.sender.send(Delivery::Failed(err)).await.ok();
                    return;
                }
            }
        }
    }

    async fn handle(&mut self, message: crate::Message) -> Step {
        match message.status {
            Some(StatusCode::IDLE_HEARTBEAT) => {
                if let Some(reply) = message.reply.clone() {
                    trace!("received flow control message");
                    return self.deliver(Delivery::FlowControl(reply)).await;
                }
                debug!("received idle heartbeats");
                if let Some(sequence) = message.header(header::NATS_LAST_CONSUMER) {
                    match sequence.parse::<u64>() {
                        Ok(sequence) if sequence != self.consumer_sequence => {
                            debug!(
                                "hearbeats sequence mismatch. got {}, expected {}, resetting consumer",
                                sequence, self.consumer_sequence
                            );
                            return Step::Reset;
                        }
                        Ok(_) => (),
                        Err(err) => {
                            let err = OrderedError::with_source(OrderedErrorKind::Other, err);
                            return self.deliver(Delivery::Error(err)).await;
                        }
                    }
                }
                Step::Continue
            }
            Some(StatusCode::REQUEST_TERMINATED) => {
                debug!(
                    "consumer {} terminated: {:?}, resetting",
                    self.consumer_name, message.description
                );
                Step::Reset
            }
            Some(status) => {
                debug!("received status message: {}", status);
                Step::Continue
            }
            None => {
                let message = match jetstream::Message::try_from(message) {
                    Ok(message) => message,
                    Err(err) => {
                        let err = OrderedError::with_source(OrderedErrorKind::Other, err);
                        return self.deliver(Delivery::Error(err)).await;
                    }
                };
                trace!(
                    "consumer sequence: {}, stream sequence {}, in message: {} / {}",
                    self.consumer_sequence,
                    self.stream_sequence,
                    message.info.consumer_sequence,
                    message.info.stream_sequence
                );
                if message.info.consumer_sequence != self.consumer_sequence + 1 {
                    debug!(
                        "ordered consumer mismatch. current {}, info: {}",
                        self.consumer_sequence, message.info.consumer_sequence
                    );
                    return Step::Reset;
                }
                self.stream_sequence = message.info.stream_sequence;
                self.consumer_sequence = message.info.consumer_sequence;
                self.deliver(Delivery::Message(message)).await
            }
        }
    }

    async fn deliver(&self, delivery: Delivery) -> Step {
        match self.sender.send(delivery).await {
            Ok(()) => Step::Continue,
            // reader is gone
            Err(_) => Step::Stop,
        }
    }

    async fn reset(&mut self) -> Result<Subscriber, OrderedError> {
        // Nothing delivered yet: `New` and the other positional policies
        // must not move past messages published since the first consumer
        // was created.
        let resume_after = self.stream_sequence.max(self.start_sequence);
        let deliver_policy = match self.config.deliver_policy {
            DeliverPolicy::All | DeliverPolicy::LastPerSubject if self.stream_sequence == 0 => {
                self.config.deliver_policy
            }
            _ if resume_after == 0 => self.config.deliver_policy,
            _ => DeliverPolicy::ByStartSequence {
                start_sequence: resume_after + 1,
            },
        };
        let config = OrderedConfig {
            deliver_policy,
            ..self.config.clone()
        };

        let (subscriber, consumer_name) = tryhard::retry_fn(|| {
            recreate_consumer_and_subscription(
                self.context.clone(),
                config.clone(),
                self.stream_name.clone(),
                self.consumer_name.clone(),
            )
        })
        .retries(5)
        .exponential_backoff(Duration::from_millis(500))
        .await
        .map_err(|err| OrderedError::with_source(OrderedErrorKind::Recreate, err))?;

        debug!("resetting consume sequence to 0");
        self.consumer_sequence = 0;
        self.consumer_name = consumer_name;
        Ok(subscriber)
    }
}

async fn recreate_consumer_and_subscription(
    context: Context,
    mut config: OrderedConfig,
    stream_name: String,
    old_consumer: String,
) -> Result<(Subscriber, String), ConsumerRecreateError> {
    config.deliver_subject = context.client.new_inbox();

    let subscriber = context
        .client
        .subscribe(config.deliver_subject.clone())
        .await
        .map_err(|err| {
            ConsumerRecreateError::with_source(ConsumerRecreateErrorKind::Subscription, err)
        })?;

    let stream = tokio::time::timeout(RECREATE_TIMEOUT, context.get_stream(&stream_name))
        .await
        .map_err(|_| ConsumerRecreateError::new(ConsumerRecreateErrorKind::TimedOut))?
        .map_err(|err| {
            ConsumerRecreateError::with_source(ConsumerRecreateErrorKind::GetStream, err)
        })?;

    // The old consumer may already be gone.
    if let Err(err) = stream.delete_consumer(&old_consumer).await {
        trace!("failed to delete consumer {}: {}", old_consumer, err);
    }

    let consumer = tokio::time::timeout(RECREATE_TIMEOUT, stream.create_consumer(config))
        .await
        .map_err(|_| ConsumerRecreateError::new(ConsumerRecreateErrorKind::TimedOut))?
        .map_err(|err| {
            ConsumerRecreateError::with_source(ConsumerRecreateErrorKind::Recreate, err)
        })?;

    Ok((subscriber, consumer.info.name))
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OrderedErrorKind {
    Subscription,
    Consumer,
    Recreate,
    Other,
}

impl Display for OrderedErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subscription => write!(f, "failed to subscribe"),
            Self::Consumer => write!(f, "consumer creation failed"),
            Self::Recreate => write!(f, "consumer recreation failed"),
            Self::Other => write!(f, "error"),
        }
    }
}

pub type OrderedError = Error<OrderedErrorKind>;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ConsumerRecreateErrorKind {
    GetStream,
    Subscription,
    Recreate,
    TimedOut,
}

impl Display for ConsumerRecreateErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GetStream => write!(f, "error getting stream"),
            Self::Recreate => write!(f, "consumer creation failed"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Subscription => write!(f, "failed to resubscribe"),
        }
    }
}

pub type ConsumerRecreateError = Error<ConsumerRecreateErrorKind>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_config() {
        let config = OrderedConfig {
            deliver_subject: "_INBOX.1".into(),
            filter_subject: "$KV.config.>".into(),
            deliver_policy: DeliverPolicy::LastPerSubject,
            headers_only: true,
            ..Default::default()
        }
        .into_consumer_config();

        assert_eq!(config.deliver_subject.as_deref(), Some("_INBOX.1"));
        assert_eq!(config.ack_policy, AckPolicy::None);
        assert_eq!(config.max_deliver, 1);
        assert!(config.flow_control);
        assert!(config.memory_storage);
        assert!(config.headers_only);
        assert_eq!(config.idle_heartbeat, Duration::from_secs(5));
        assert_eq!(config.inactive_threshold, Duration::from_secs(30));
        assert!(config.durable_name.is_none());
    }
}
