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

//! Subject layout of key-value and object buckets, and name validation.
//!
//! | what | subject |
//! |---|---|
//! | key-value entry | `$KV.<bucket>.<key>` |
//! | object chunk | `$O.<bucket>.C.<nuid>` |
//! | object metadata | `$O.<bucket>.M.<sanitized name>` |

use once_cell::sync::Lazy;
use regex::Regex;

static VALID_BUCKET_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\A[a-zA-Z0-9_-]+\z").unwrap());
static VALID_KEY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\A[-/_=\.a-zA-Z0-9]+\z").unwrap());
static VALID_SEARCH_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\A[-/_=\.a-zA-Z0-9*]*>?\z").unwrap());

pub(crate) const KV_PREFIX: &str = "$KV";
pub(crate) const OBJECT_PREFIX: &str = "$O";

pub fn is_valid_bucket_name(bucket_name: &str) -> bool {
    VALID_BUCKET_RE.is_match(bucket_name)
}

/// A key is non empty, does not start or end with `.` and only contains
/// `[-/_=.a-zA-Z0-9]`.
pub fn is_valid_key(key: &str) -> bool {
    if key.is_empty() || key.starts_with('.') || key.ends_with('.') {
        return false;
    }
    VALID_KEY_RE.is_match(key)
}

/// Like [is_valid_key], but also accepts `*` tokens and a trailing `>`.
pub fn is_valid_search_key(key: &str) -> bool {
    if key.is_empty() || key.starts_with('.') || key.ends_with('.') {
        return false;
    }
    if !VALID_SEARCH_KEY_RE.is_match(key) {
        return false;
    }
    // wildcards must be whole tokens
    key.split('.')
        .all(|token| !token.is_empty() && (token.len() == 1 || !token.contains(['*', '>'])))
}

pub fn is_valid_object_name(name: &str) -> bool {
    !name.is_empty()
}

/// Replaces characters that would split or break a subject token.
pub fn sanitize_object_name(name: &str) -> String {
    name.replace(['.', ' '], "_")
}

pub fn kv_stream_name(bucket: &str) -> String {
    format!("KV_{bucket}")
}

pub fn kv_subject(bucket: &str, key: &str) -> String {
    format!("{KV_PREFIX}.{bucket}.{key}")
}

pub fn kv_watch_all(bucket: &str) -> String {
    format!("{KV_PREFIX}.{bucket}.>")
}

pub fn object_stream_name(bucket: &str) -> String {
    format!("OBJ_{bucket}")
}

pub fn object_chunk_subject(bucket: &str, nuid: &str) -> String {
    format!("{OBJECT_PREFIX}.{bucket}.C.{nuid}")
}

pub fn object_meta_subject(bucket: &str, name: &str) -> String {
    format!("{OBJECT_PREFIX}.{bucket}.M.{}", sanitize_object_name(name))
}

pub fn object_all_chunks(bucket: &str) -> String {
    format!("{OBJECT_PREFIX}.{bucket}.C.>")
}

pub fn object_all_meta(bucket: &str) -> String {
    format!("{OBJECT_PREFIX}.{bucket}.M.>")
}

/// Checks if `subject` is matched by `pattern`, which can contain `*` and a
/// trailing `>` wildcard.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut subject_tokens = subject.split('.');
    for pattern_token in pattern.split('.') {
        match subject_tokens.next() {
            Some(_) if pattern_token == ">" => return true,
            Some(token) if pattern_token == "*" || pattern_token == token => continue,
            _ => return false,
        }
    }
    subject_tokens.next().is_none()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys() {
        assert!(is_valid_key("greeting"));
        assert!(is_valid_key("a/b=c_d-e.f"));
        assert!(!is_valid_key(""));
        assert!(!is_valid_key(".leading"));
        assert!(!is_valid_key("trailing."));
        assert!(!is_valid_key("with space"));
        assert!(!is_valid_key("new\nline"));
        assert!(!is_valid_key("star*"));
    }

    #[test]
    fn search_keys() {
        assert!(is_valid_search_key("foo.*"));
        assert!(is_valid_search_key("foo.>"));
        assert!(is_valid_search_key(">"));
        assert!(is_valid_search_key("*.bar"));
        assert!(!is_valid_search_key("foo.>.bar"));
        assert!(!is_valid_search_key("fo*"));
        assert!(!is_valid_search_key("foo..bar"));
        assert!(!is_valid_search_key(""));
    }

    #[test]
    fn buckets() {
        assert!(is_valid_bucket_name("my-bucket_1"));
        assert!(!is_valid_bucket_name("my.bucket"));
        assert!(!is_valid_bucket_name(""));
    }

    #[test]
    fn layout() {
        assert_eq!(kv_subject("B", "a.b"), "$KV.B.a.b");
        assert_eq!(kv_watch_all("B"), "$KV.B.>");
        assert_eq!(kv_stream_name("B"), "KV_B");
        assert_eq!(object_chunk_subject("B", "N"), "$O.B.C.N");
        assert_eq!(object_meta_subject("B", "my file.tar.gz"), "$O.B.M.my_file_tar_gz");
        assert_eq!(object_stream_name("B"), "OBJ_B");
    }

    #[test]
    fn matching() {
        assert!(subject_matches("foo", "foo"));
        assert!(subject_matches("foo.*", "foo.bar"));
        assert!(subject_matches("foo.>", "foo.bar.baz"));
        assert!(subject_matches(">", "foo"));
        assert!(!subject_matches("foo.>", "foo"));
        assert!(!subject_matches("foo.*", "foo.bar.baz"));
        assert!(!subject_matches("foo.bar", "foo"));
        assert!(!subject_matches("foo", "foo.bar"));
    }
}
