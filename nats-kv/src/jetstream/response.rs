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

use serde::{Deserialize, Serialize};

/// A response returned from a request to jetstream.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response<T> {
    Err { error: super::errors::Error },
    Ok(T),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jetstream::errors::ErrorCode;

    #[derive(Debug, Deserialize)]
    struct Names {
        streams: Option<Vec<String>>,
    }

    #[test]
    fn error_wins_over_ok() {
        let response: Response<Names> = serde_json::from_str(
            r#"{"type":"io.nats.jetstream.api.v1.stream_names_response","error":{"code":404,"err_code":10059,"description":"stream not found"}}"#,
        )
        .unwrap();
        match response {
            Response::Err { error } => assert_eq!(error.kind(), ErrorCode::STREAM_NOT_FOUND),
            Response::Ok(_) => panic!("expected error"),
        }

        let response: Response<Names> =
            serde_json::from_str(r#"{"streams":["KV_a","OBJ_b"]}"#).unwrap();
        match response {
            Response::Ok(names) => assert_eq!(names.streams.unwrap().len(), 2),
            Response::Err { .. } => panic!("expected names"),
        }
    }
}
