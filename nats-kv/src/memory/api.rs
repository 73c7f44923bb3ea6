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

//! The `$JS.API` request handlers of the in-memory server.

use std::sync::Weak;

use base64::engine::general_purpose::STANDARD;
use base64::engine::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, trace};

use crate::header::{self, HeaderMap};
use crate::jetstream::consumer;
use crate::jetstream::errors::{Error as ApiError, ErrorCode};
use crate::jetstream::stream::{
    self, DeleteStatus, GetRawMessage, PurgeRequest, RawMessage, StreamGetMessage,
};
use crate::{Message, StatusCode};

use super::stream::MemoryStream;
use super::{Inner, State};

const PAGE_LIMIT: usize = 1024;

#[derive(Debug, Deserialize)]
struct NamesRequest {
    #[serde(default)]
    offset: usize,
    #[serde(default)]
    subject: Option<String>,
}

#[derive(Debug, Serialize)]
struct NamesPage {
    total: usize,
    offset: usize,
    limit: usize,
    streams: Vec<String>,
}

#[derive(Debug, Serialize)]
struct InfoPage {
    total: usize,
    offset: usize,
    limit: usize,
    streams: Vec<stream::Info>,
}

#[derive(Debug, Deserialize)]
struct CreateConsumer {
    config: consumer::Config,
}

#[derive(Debug, Deserialize)]
struct DeleteMessage {
    seq: u64,
}

fn json_reply<T: Serialize>(value: &T) -> Message {
    match serde_json::to_vec(value) {
        Ok(payload) => Message::new("", payload.into()),
        Err(err) => error_reply(ApiError::new(
            500,
            ErrorCode::BAD_REQUEST,
            format!("failed to encode response: {}", err),
        )),
    }
}

fn error_reply(error: ApiError) -> Message {
    trace!("api error: {}", error);
    let payload = json!({ "error": error }).to_string();
    Message::new("", payload.into())
}

pub(crate) fn respond<T: Serialize>(result: Result<T, ApiError>) -> Message {
    match result {
        Ok(value) => json_reply(&value),
        Err(error) => error_reply(error),
    }
}

fn stream_not_found() -> ApiError {
    ApiError::new(404, ErrorCode::STREAM_NOT_FOUND, "stream not found")
}

fn bad_request(description: impl Into<String>) -> ApiError {
    ApiError::new(400, ErrorCode::BAD_REQUEST, description)
}

fn parse<'a, T: Deserialize<'a>>(payload: &'a [u8]) -> Result<T, ApiError> {
    serde_json::from_slice(payload).map_err(|err| bad_request(err.to_string()))
}

/// Handles a request to `$JS.API.<api>`. `None` means nobody answers, which
/// the requester sees as no responders.
pub(crate) fn handle(
    state: &mut State,
    server: &Weak<Inner>,
    api: &str,
    request: &Message,
) -> Option<Message> {
    let tokens: Vec<&str> = api.split('.').collect();
    trace!("api request {}", api);

    let reply = match tokens.as_slice() {
        ["STREAM", "CREATE", name] => respond(create_stream(state, name, &request.payload)),
        ["STREAM", "UPDATE", name] => respond(update_stream(state, name, &request.payload)),
        ["STREAM", "INFO", name] => respond(
            state
                .streams
                .get_mut(*name)
                .map(MemoryStream::info)
                .ok_or_else(stream_not_found),
        ),
        ["STREAM", "DELETE", name] => respond(
            state
                .streams
                .remove(*name)
                .map(|_| {
                    debug!("deleted stream {}", name);
                    DeleteStatus { success: true }
                })
                .ok_or_else(stream_not_found),
        ),
        ["STREAM", "NAMES"] => respond(stream_names(state, &request.payload)),
        ["STREAM", "LIST"] => respond(stream_list(state, &request.payload)),
        ["STREAM", "MSG", "GET", name] => respond(get_message(state, name, &request.payload)),
        ["STREAM", "MSG", "DELETE", name] => {
            respond(delete_message(state, name, &request.payload))
        }
        ["STREAM", "PURGE", name] => respond(purge(state, name, &request.payload)),
        ["DIRECT", "GET", name, subject @ ..] => {
            return direct_get(state, name, subject, &request.payload)
        }
        ["CONSUMER", "CREATE", name] | ["CONSUMER", "DURABLE", "CREATE", name, _] => {
            respond(create_consumer(state, server, name, &request.payload))
        }
        ["CONSUMER", "INFO", name, consumer] => respond(
            state
                .streams
                .get(*name)
                .ok_or_else(stream_not_found)
                .and_then(|stream| {
                    stream
                        .consumers
                        .get(*consumer)
                        .map(|found| found.info(name, &stream.messages))
                        .ok_or_else(consumer_not_found)
                }),
        ),
        ["CONSUMER", "DELETE", name, consumer] => respond(
            state
                .streams
                .get_mut(*name)
                .ok_or_else(stream_not_found)
                .and_then(|stream| {
                    stream
                        .consumers
                        .remove(*consumer)
                        .map(|_| DeleteStatus { success: true })
                        .ok_or_else(consumer_not_found)
                }),
        ),
        _ => return None,
    };
    Some(reply)
}

fn consumer_not_found() -> ApiError {
    ApiError::new(404, ErrorCode::CONSUMER_NOT_FOUND, "consumer not found")
}

/// Two subject patterns overlap when some subject matches both.
fn subjects_overlap(left: &str, right: &str) -> bool {
    let left: Vec<&str> = left.split('.').collect();
    let right: Vec<&str> = right.split('.').collect();
    for (index, (l, r)) in left.iter().zip(right.iter()).enumerate() {
        if *l == ">" || *r == ">" {
            return true;
        }
        if *l != "*" && *r != "*" && l != r {
            return false;
        }
        if index + 1 == left.len() || index + 1 == right.len() {
            return left.len() == right.len();
        }
    }
    false
}

fn check_overlap(state: &State, config: &stream::Config) -> Result<(), ApiError> {
    let subjects = if config.subjects.is_empty() {
        vec![config.name.clone()]
    } else {
        config.subjects.clone()
    };
    let overlaps = state
        .streams
        .values()
        .filter(|other| other.config.name != config.name)
        .flat_map(|other| other.config.subjects.iter())
        .any(|existing| subjects.iter().any(|subject| subjects_overlap(existing, subject)));
    if overlaps {
        return Err(ApiError::new(
            400,
            ErrorCode::STREAM_SUBJECT_OVERLAP,
            "subjects overlap with an existing stream",
        ));
    }
    Ok(())
}

fn create_stream(state: &mut State, name: &str, payload: &[u8]) -> Result<stream::Info, ApiError> {
    let config: stream::Config = parse(payload)?;
    if config.name != name {
        return Err(ApiError::new(
            400,
            ErrorCode::STREAM_INVALID_CONFIG,
            "stream name in subject does not match request",
        ));
    }

    if let Some(existing) = state.streams.get_mut(name) {
        let mut normalized = config;
        if normalized.subjects.is_empty() {
            normalized.subjects = vec![normalized.name.clone()];
        }
        if existing.config == normalized {
            return Ok(existing.info());
        }
        return Err(ApiError::new(
            400,
            ErrorCode::STREAM_NAME_EXIST,
            "stream name already in use with a different configuration",
        ));
    }

    check_overlap(state, &config)?;
    debug!("created stream {}", name);
    let mut stream = MemoryStream::new(config);
    let info = stream.info();
    state.streams.insert(name.to_string(), stream);
    Ok(info)
}

fn update_stream(state: &mut State, name: &str, payload: &[u8]) -> Result<stream::Info, ApiError> {
    let config: stream::Config = parse(payload)?;
    if config.name != name {
        return Err(ApiError::new(
            400,
            ErrorCode::STREAM_INVALID_CONFIG,
            "stream name in subject does not match request",
        ));
    }
    check_overlap(state, &config)?;
    state
        .streams
        .get_mut(name)
        .ok_or_else(stream_not_found)?
        .update(config)
}

fn stream_names(state: &mut State, payload: &[u8]) -> Result<NamesPage, ApiError> {
    let request: NamesRequest = if payload.is_empty() {
        NamesRequest {
            offset: 0,
            subject: None,
        }
    } else {
        parse(payload)?
    };

    let names: Vec<String> = state
        .streams
        .values()
        .filter(|stream| match request.subject.as_deref() {
            Some(subject) if !subject.is_empty() => stream
                .config
                .subjects
                .iter()
                .any(|existing| subjects_overlap(existing, subject)),
            _ => true,
        })
        .map(|stream| stream.config.name.clone())
        .collect();

    Ok(NamesPage {
        total: names.len(),
        offset: request.offset,
        limit: PAGE_LIMIT,
        streams: names
            .into_iter()
            .skip(request.offset)
            .take(PAGE_LIMIT)
            .collect(),
    })
}

fn stream_list(state: &mut State, payload: &[u8]) -> Result<InfoPage, ApiError> {
    let offset = if payload.is_empty() {
        0
    } else {
        parse::<NamesRequest>(payload)?.offset
    };
    let total = state.streams.len();
    let streams = state
        .streams
        .values_mut()
        .skip(offset)
        .take(PAGE_LIMIT)
        .map(MemoryStream::info)
        .collect();

    Ok(InfoPage {
        total,
        offset,
        limit: PAGE_LIMIT,
        streams,
    })
}

fn get_message(state: &mut State, name: &str, payload: &[u8]) -> Result<GetRawMessage, ApiError> {
    let request: StreamGetMessage = parse(payload)?;
    let stream = state.streams.get_mut(name).ok_or_else(stream_not_found)?;
    let (sequence, message) = stream.get(&request)?;

    Ok(GetRawMessage {
        message: RawMessage {
            subject: message.subject.clone(),
            sequence,
            payload: STANDARD.encode(&message.payload),
            headers: message
                .headers
                .as_ref()
                .map(|headers| STANDARD.encode(headers.to_bytes())),
            time: message.time,
        },
    })
}

fn delete_message(state: &mut State, name: &str, payload: &[u8]) -> Result<DeleteStatus, ApiError> {
    let request: DeleteMessage = parse(payload)?;
    state
        .streams
        .get_mut(name)
        .ok_or_else(stream_not_found)?
        .delete_message(request.seq)?;
    Ok(DeleteStatus { success: true })
}

fn purge(
    state: &mut State,
    name: &str,
    payload: &[u8],
) -> Result<stream::PurgeResponse, ApiError> {
    let request: PurgeRequest = if payload.is_empty() {
        PurgeRequest::default()
    } else {
        parse(payload)?
    };
    state
        .streams
        .get_mut(name)
        .ok_or_else(stream_not_found)?
        .purge(&request)
}

/// Direct gets answer with the stored message itself, the storage metadata
/// travelling in headers. Streams without `allow_direct` do not answer.
fn direct_get(
    state: &mut State,
    name: &str,
    subject: &[&str],
    payload: &[u8],
) -> Option<Message> {
    let stream = state
        .streams
        .get_mut(name)
        .filter(|stream| stream.config.allow_direct)?;

    let request = if subject.is_empty() {
        if payload.is_empty() {
            return Some(Message::with_status("", StatusCode::TIMEOUT, "Empty Request"));
        }
        match serde_json::from_slice::<StreamGetMessage>(payload) {
            Ok(request) => request,
            Err(_) => return Some(Message::with_status("", StatusCode::BAD_REQUEST, "Bad Request")),
        }
    } else {
        StreamGetMessage {
            sequence: None,
            last_by_subject: Some(subject.join(".")),
        }
    };

    let (sequence, stored) = match stream.get(&request) {
        Ok(found) => found,
        Err(_) => {
            return Some(Message::with_status(
                "",
                StatusCode::NOT_FOUND,
                "Message Not Found",
            ))
        }
    };

    let mut headers = stored.headers.clone().unwrap_or_else(HeaderMap::new);
    headers.insert(header::NATS_STREAM, name);
    headers.insert(header::NATS_SUBJECT, stored.subject.as_str());
    headers.insert(header::NATS_SEQUENCE, sequence);
    let time_stamp = stored
        .time
        .format(&Rfc3339)
        .unwrap_or_else(|_| stored.time.to_string());
    headers.insert(header::NATS_TIME_STAMP, time_stamp);

    let mut reply = Message::new("", stored.payload.clone());
    reply.headers = Some(headers);
    Some(reply)
}

fn create_consumer(
    state: &mut State,
    server: &Weak<Inner>,
    name: &str,
    payload: &[u8],
) -> Result<consumer::Info, ApiError> {
    let request: CreateConsumer = parse(payload)?;
    let stream = state.streams.get_mut(name).ok_or_else(stream_not_found)?;

    let config = request.config;
    let consumer_name = config
        .durable_name
        .clone()
        .or_else(|| config.name.clone())
        .unwrap_or_else(|| nuid::next().to_string());

    let existed = stream.consumers.contains_key(&consumer_name);
    let info = stream.add_consumer(consumer_name.clone(), config)?;
    if existed {
        return Ok(info);
    }
    if let Some(consumer) = stream.consumers.get(&consumer_name) {
        super::spawn_monitor(
            server.clone(),
            name.to_string(),
            consumer_name,
            consumer.tick_interval(),
        );
    }
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlap() {
        assert!(subjects_overlap("$KV.*.>", "$KV.config.>"));
        assert!(subjects_overlap("foo.bar", "foo.*"));
        assert!(subjects_overlap(">", "anything.at.all"));
        assert!(!subjects_overlap("$KV.*.>", "$O.files.>"));
        assert!(!subjects_overlap("foo.bar", "foo.bar.baz"));
        assert!(!subjects_overlap("foo", "bar"));
        assert!(subjects_overlap("foo", "foo"));
    }

    #[test]
    fn error_body() {
        let reply = error_reply(stream_not_found());
        let value: serde_json::Value = serde_json::from_slice(&reply.payload).unwrap();
        assert_eq!(value["error"]["err_code"], 10059);
        assert_eq!(value["error"]["code"], 404);
    }
}
