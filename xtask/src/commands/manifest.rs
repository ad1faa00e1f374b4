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


use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Represents the structure of the `Assets.toml` manifest file.
///
/// Relative paths are resolved against the directory holding the manifest.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AssetManifest {
    /// Directories scanned recursively for files to pack.
    pub source_directories: Vec<PathBuf>,
    /// Where the package is written.
    pub output: PathBuf,
    /// File extensions (without the dot, case-insensitive) stored compressed.
    pub compress_extensions: Vec<String>,
    /// Files smaller than this are stored raw even if their extension matches.
    pub min_compress_size: u64,
}

impl Default for AssetManifest {
    /// Used when no `Assets.toml` is found: packs `assets/` into
    /// `target/assets.lpak`.
    fn default() -> Self {
        Self {
            source_directories: vec![PathBuf::from("assets")],
            output: PathBuf::from("target/assets.lpak"),
            compress_extensions: ["bin", "json", "txt", "fnt", "wav"].map(String::from).to_vec(),
            min_compress_size: 256,
        }
    }
}

impl AssetManifest {
    /// Rewrites relative paths so they are relative to `base` instead.
    pub fn rebase(mut self, base: &Path) -> Self {
        let rebase = |path: PathBuf| if path.is_relative() { base.join(path) } else { path };
        self.source_directories = self.source_directories.into_iter().map(rebase).collect();
        self.output = rebase(self.output);
        self
    }

    /// `true` if a file at `path` of `len` bytes should be stored compressed.
    pub fn should_compress(&self, path: &Path, len: u64) -> bool {
        if len < self.min_compress_size {
            return false;
        }
        let Some(extension) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        self.compress_extensions
            .iter()
            .any(|wanted| wanted.trim_start_matches('.').eq_ignore_ascii_case(extension))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let manifest: AssetManifest = toml::from_str(r#"output = "out/game.lpak""#).unwrap();
        assert_eq!(manifest.output, PathBuf::from("out/game.lpak"));
        assert_eq!(manifest.source_directories, AssetManifest::default().source_directories);
        assert_eq!(manifest.min_compress_size, 256);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<AssetManifest>("compress = true").is_err());
    }

    #[test]
    fn compression_follows_extension_and_size() {
        let manifest = AssetManifest {
            compress_extensions: vec![".BIN".into(), "txt".into()],
            min_compress_size: 10,
            ..Default::default()
        };
        assert!(manifest.should_compress(Path::new("a/level.bin"), 10));
        assert!(manifest.should_compress(Path::new("notes.TXT"), 64));
        assert!(!manifest.should_compress(Path::new("level.bin"), 9));
        assert!(!manifest.should_compress(Path::new("image.png"), 64));
        assert!(!manifest.should_compress(Path::new("README"), 64));
    }

    #[test]
    fn rebase_keeps_absolute_paths() {
        let absolute = std::env::temp_dir().join("abs");
        let manifest = AssetManifest {
            source_directories: vec![PathBuf::from("assets"), absolute.clone()],
            ..Default::default()
        }
        .rebase(Path::new("project"));
        assert_eq!(manifest.source_directories, [PathBuf::from("project/assets"), absolute]);
        assert_eq!(manifest.output, PathBuf::from("project/target/assets.lpak"));
    }
}
