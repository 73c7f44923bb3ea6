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

use std::time::Duration;

use crate::jetstream::stream::{Compression, Info, StorageType};

/// Status of an object bucket, derived from the info of its stream.
#[derive(Debug, Clone)]
pub struct Status {
    pub info: Info,
    pub bucket: String,
}

impl Status {
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn description(&self) -> Option<&str> {
        self.info.config.description.as_deref()
    }

    /// How long objects are kept in the bucket
    pub fn max_age(&self) -> Duration {
        self.info.config.max_age
    }

    pub fn storage(&self) -> StorageType {
        self.info.config.storage
    }

    pub fn replicas(&self) -> usize {
        self.info.config.num_replicas
    }

    /// Sealed buckets reject every change.
    pub fn sealed(&self) -> bool {
        self.info.config.sealed
    }

    /// Combined size of chunks and metadata, in bytes
    pub fn size(&self) -> u64 {
        self.info.state.bytes
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self.info.config.compression, Some(Compression::S2))
    }

    pub fn backing_store(&self) -> &str {
        "JetStream"
    }
}
