// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration of a resource context.

use serde::Deserialize;
use std::path::PathBuf;

/// Configuration of a resource context and everything it owns.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ContextConfig {
    /// Base directory for host paths that are not absolute.
    pub root_dir: PathBuf,
    /// Number of reads that may be in flight at once across every manager.
    pub read_slots: usize,
    /// Slot count of a manager created with a capacity of zero.
    pub default_capacity: usize,
    /// Decompression pipeline settings.
    pub decompression: DecompressionConfig,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            read_slots: 16,
            default_capacity: 32,
            decompression: DecompressionConfig::default(),
        }
    }
}

impl ContextConfig {
    /// Parses a configuration from a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(source)
    }
}

/// Settings of the decompression pipeline.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct DecompressionConfig {
    /// Run large decompressions on the worker pool.
    pub background: bool,
    /// Entries whose uncompressed size is below this are always decompressed inline.
    pub foreground_threshold: usize,
    /// Background jobs whose compressed size exceeds this read their input in chunks
    /// of this size, issuing the next read while the current chunk decompresses.
    pub double_buffer_threshold: usize,
    /// Number of worker threads.
    pub pool_size: usize,
}

impl Default for DecompressionConfig {
    fn default() -> Self {
        Self {
            background: false,
            foreground_threshold: 64 * 1024,
            double_buffer_threshold: 256 * 1024,
            pool_size: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = ContextConfig::from_toml_str("").unwrap();
        assert_eq!(config, ContextConfig::default());
    }

    #[test]
    fn partial_document_overrides_given_keys() {
        let config = ContextConfig::from_toml_str(
            r#"
            read_slots = 2

            [decompression]
            background = true
            pool_size = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.read_slots, 2);
        assert_eq!(config.default_capacity, 32);
        assert!(config.decompression.background);
        assert_eq!(config.decompression.pool_size, 4);
        assert_eq!(config.decompression.foreground_threshold, 64 * 1024);
    }
}
