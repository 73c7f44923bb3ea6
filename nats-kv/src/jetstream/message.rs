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

//! A wrapped [crate::Message] carrying the delivery metadata of a push consumer.

use std::fmt::{self, Display};

use time::OffsetDateTime;

use crate::error::Error;

const ACK_PREFIX: &str = "$JS.ACK.";

/// A message delivered by a JetStream consumer.
#[derive(Debug, Clone)]
pub struct Message {
    pub message: crate::Message,
    pub info: Info,
}

impl std::ops::Deref for Message {
    type Target = crate::Message;

    fn deref(&self) -> &Self::Target {
        &self.message
    }
}

impl From<Message> for crate::Message {
    fn from(source: Message) -> crate::Message {
        source.message
    }
}

impl TryFrom<crate::Message> for Message {
    type Error = InfoError;

    fn try_from(message: crate::Message) -> Result<Self, Self::Error> {
        let reply = message
            .reply
            .as_deref()
            .ok_or_else(|| InfoError::new(InfoErrorKind::NotJetStream))?;
        let info = Info::parse(reply)?;
        Ok(Message { message, info })
    }
}

/// Metadata encoded in the ack subject of a delivery.
///
/// The subject is either
/// `$JS.ACK.<stream>.<consumer>.<delivered>.<stream seq>.<consumer seq>.<timestamp>.<pending>`
/// or the longer form prefixed with a domain and an account hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Info {
    pub domain: Option<String>,
    pub acc_hash: Option<String>,
    pub stream: String,
    pub consumer: String,
    /// Number of times this message was delivered.
    pub delivered: u64,
    pub stream_sequence: u64,
    pub consumer_sequence: u64,
    pub published: OffsetDateTime,
    /// Messages left in the consumer after this one.
    pub pending: u64,
}

impl Info {
    pub fn parse(reply: &str) -> Result<Info, InfoError> {
        let tokens: Vec<&str> = reply
            .strip_prefix(ACK_PREFIX)
            .ok_or_else(|| InfoError::new(InfoErrorKind::NotJetStream))?
            .split('.')
            .collect();

        let (domain, acc_hash, tokens) = match tokens.len() {
            7 => (None, None, &tokens[..]),
            n if n >= 9 => {
                let domain = match tokens[0] {
                    "_" => None,
                    domain => Some(domain.to_string()),
                };
                (domain, Some(tokens[1].to_string()), &tokens[2..9])
            }
            _ => return Err(InfoError::new(InfoErrorKind::TokenCount)),
        };

        let number = |token: &str| {
            token
                .parse::<u64>()
                .map_err(|err| InfoError::with_source(InfoErrorKind::Parse, err))
        };

        let timestamp = tokens[5]
            .parse::<i128>()
            .map_err(|err| InfoError::with_source(InfoErrorKind::Parse, err))?;

        Ok(Info {
            domain,
            acc_hash,
            stream: tokens[0].to_string(),
            consumer: tokens[1].to_string(),
            delivered: number(tokens[2])?,
            stream_sequence: number(tokens[3])?,
            consumer_sequence: number(tokens[4])?,
            published: OffsetDateTime::from_unix_timestamp_nanos(timestamp)
                .map_err(|err| InfoError::with_source(InfoErrorKind::Parse, err))?,
            pending: number(tokens[6])?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum InfoErrorKind {
    NotJetStream,
    TokenCount,
    Parse,
}

impl Display for InfoErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotJetStream => write!(f, "not a JetStream message"),
            Self::TokenCount => write!(f, "unexpected number of tokens in ack subject"),
            Self::Parse => write!(f, "failed to parse ack subject"),
        }
    }
}

pub type InfoError = Error<InfoErrorKind>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_form() {
        let info = Info::parse("$JS.ACK.KV_config.wQq2.1.42.7.1700000000000000000.3").unwrap();
        assert_eq!(info.stream, "KV_config");
        assert_eq!(info.consumer, "wQq2");
        assert_eq!(info.delivered, 1);
        assert_eq!(info.stream_sequence, 42);
        assert_eq!(info.consumer_sequence, 7);
        assert_eq!(info.pending, 3);
        assert_eq!(info.published.unix_timestamp(), 1_700_000_000);
        assert!(info.domain.is_none());
    }

    #[test]
    fn domain_form() {
        let info =
            Info::parse("$JS.ACK.hub.ACCHASH.OBJ_files.c.1.5.2.1700000000000000000.0.token")
                .unwrap();
        assert_eq!(info.domain.as_deref(), Some("hub"));
        assert_eq!(info.acc_hash.as_deref(), Some("ACCHASH"));
        assert_eq!(info.stream, "OBJ_files");
        assert_eq!(info.stream_sequence, 5);

        let info = Info::parse("$JS.ACK._.ACCHASH.S.c.1.5.2.1700000000000000000.0").unwrap();
        assert!(info.domain.is_none());
    }

    #[test]
    fn malformed() {
        assert_eq!(
            Info::parse("_INBOX.abc").unwrap_err().kind(),
            InfoErrorKind::NotJetStream
        );
        assert_eq!(
            Info::parse("$JS.ACK.S.c.1.2").unwrap_err().kind(),
            InfoErrorKind::TokenCount
        );
        assert_eq!(
            Info::parse("$JS.ACK.S.c.1.x.2.0.0").unwrap_err().kind(),
            InfoErrorKind::Parse
        );
    }
}
