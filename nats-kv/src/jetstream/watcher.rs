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

//! Watching a subject of a bucket.
//!
//! A [Watcher] first replays what the bucket holds when the watch starts,
//! then yields [Update::InitialValuesDone] exactly once, then follows live
//! changes.

use std::fmt::{self, Display};
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::StreamExt;

use super::consumer::push::{Ordered, OrderedConfig, OrderedErrorKind};
use super::consumer::{DeliverPolicy, ReplayPolicy};
use super::stream::Stream;
use crate::error::Error;

/// Options of a watch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    /// Replay every stored revision instead of only the latest per subject.
    pub include_history: bool,
    /// Skip the stored values and only follow changes.
    pub updates_only: bool,
    /// Do not yield delete and purge markers.
    pub ignore_deletes: bool,
    /// Only fetch headers, values are left empty.
    pub meta_only: bool,
}

impl WatchOptions {
    fn deliver_policy(&self) -> Result<DeliverPolicy, WatcherError> {
        match (self.include_history, self.updates_only) {
            (true, true) => Err(WatcherError::new(WatcherErrorKind::InvalidOptions)),
            (true, false) => Ok(DeliverPolicy::All),
            (false, true) => Ok(DeliverPolicy::New),
            (false, false) => Ok(DeliverPolicy::LastPerSubject),
        }
    }
}

/// Item yielded by a [Watcher].
#[derive(Debug, Clone, PartialEq)]
pub enum Update<T> {
    Value(T),
    /// Everything stored when the watch started has been delivered.
    InitialValuesDone,
}

impl<T> Update<T> {
    pub fn into_value(self) -> Option<T> {
        match self {
            Update::Value(value) => Some(value),
            Update::InitialValuesDone => None,
        }
    }
}

/// A decoded delivery, `deleted` marks tombstones.
pub(crate) struct Decoded<T> {
    pub(crate) value: T,
    pub(crate) deleted: bool,
}

type Decoder<T> = Box<dyn Fn(super::Message) -> Result<Decoded<T>, WatcherError> + Send + Sync>;

/// Stream of [Update]s over the subjects of a bucket.
///
/// Dropping the watcher, or calling [Watcher::stop], deletes the
/// subscription.
pub struct Watcher<T> {
    messages: Ordered,
    decode: Decoder<T>,
    ignore_deletes: bool,
    init_pending: u64,
    received: u64,
    init_done: bool,
    sentinel_due: bool,
}

impl<T> Watcher<T> {
    pub(crate) async fn start<F>(
        stream: &Stream,
        filter_subject: String,
        description: &str,
        options: WatchOptions,
        decode: F,
    ) -> Result<Watcher<T>, WatcherError>
    where
        F: Fn(super::Message) -> Result<Decoded<T>, WatcherError> + Send + Sync + 'static,
    {
        let deliver_policy = options.deliver_policy()?;

        let messages = stream
            .ordered(OrderedConfig {
                description: Some(description.to_string()),
                filter_subject,
                headers_only: options.meta_only,
                deliver_policy,
                replay_policy: ReplayPolicy::Instant,
                ..Default::default()
            })
            .await
            .map_err(|err| WatcherError::with_source(WatcherErrorKind::Consumer, err))?;

        let init_pending = messages.cached_info().num_pending;
        let init_done = options.updates_only || init_pending == 0;

        Ok(Watcher {
            messages,
            decode: Box::new(decode),
            ignore_deletes: options.ignore_deletes,
            init_pending,
            received: 0,
            init_done,
            sentinel_due: init_done,
        })
    }

    /// Number of messages stored when the watch started.
    pub(crate) fn initial_pending(&self) -> u64 {
        self.init_pending
    }

    /// Stops watching. Same as dropping the watcher.
    pub fn stop(self) {}
}

impl<T> futures::Stream for Watcher<T> {
    type Item = Result<Update<T>, WatcherError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if self.sentinel_due {
                self.sentinel_due = false;
                return Poll::Ready(Some(Ok(Update::InitialValuesDone)));
            }

            let message = match futures::ready!(self.messages.poll_next_unpin(cx)) {
                Some(Ok(message)) => message,
                Some(Err(err)) => {
                    let kind = match err.kind() {
                        OrderedErrorKind::Recreate => WatcherErrorKind::Failed,
                        _ => WatcherErrorKind::Decode,
                    };
                    return Poll::Ready(Some(Err(WatcherError::with_source(kind, err))));
                }
                None => return Poll::Ready(None),
            };

            // Tombstones count towards the initial set even when they are
            // not yielded.
            let delta = message.info.pending;
            if !self.init_done {
                self.received += 1;
                if self.received > self.init_pending || delta == 0 {
                    self.init_done = true;
                    self.sentinel_due = true;
                }
            }

            let decoded = match (self.decode)(message) {
                Ok(decoded) => decoded,
                Err(err) => return Poll::Ready(Some(Err(err))),
            };
            if decoded.deleted && self.ignore_deletes {
                continue;
            }
            return Poll::Ready(Some(Ok(Update::Value(decoded.value))));
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum WatcherErrorKind {
    InvalidKey,
    InvalidOptions,
    Consumer,
    Decode,
    Failed,
}

impl Display for WatcherErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKey => write!(f, "invalid key"),
            Self::InvalidOptions => {
                write!(f, "include_history and updates_only are mutually exclusive")
            }
            Self::Consumer => write!(f, "failed to create watch consumer"),
            Self::Decode => write!(f, "failed to decode watched entry"),
            Self::Failed => write!(f, "watch consumer failed"),
        }
    }
}

pub type WatcherError = Error<WatcherErrorKind>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deliver_policy() {
        assert_eq!(
            WatchOptions::default().deliver_policy().unwrap(),
            DeliverPolicy::LastPerSubject
        );
        let history = WatchOptions {
            include_history: true,
            ..Default::default()
        };
        assert_eq!(history.deliver_policy().unwrap(), DeliverPolicy::All);
        let updates = WatchOptions {
            updates_only: true,
            meta_only: true,
            ..Default::default()
        };
        assert_eq!(updates.deliver_policy().unwrap(), DeliverPolicy::New);

        let both = WatchOptions {
            include_history: true,
            updates_only: true,
            ..Default::default()
        };
        assert_eq!(
            both.deliver_policy().unwrap_err().kind(),
            WatcherErrorKind::InvalidOptions
        );
    }

    #[test]
    fn update_value() {
        assert_eq!(Update::Value(3).into_value(), Some(3));
        assert_eq!(Update::<u8>::InitialValuesDone.into_value(), None);
    }
}
