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


use super::manifest::AssetManifest;
use crate::helpers::*;
use anyhow::{Context, Result};
use larder_io::pack::PackSummary;
use larder_io::PackWriter;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A source file and the entry name it is stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub entry: String,
}

pub fn run(manifest_path: &Path, out: Option<PathBuf>) -> Result<()> {
    print_task_start("Packing Assets", PACKAGE, MAGENTA);

    let mut manifest = load_manifest(manifest_path)?;
    if let Some(out) = out {
        manifest.output = out;
    }

    let sources = collect_sources(&manifest)?;
    if sources.is_empty() {
        print_error("No source files found. Nothing to pack.");
        return Ok(());
    }
    print_info(&format!("Found {} files to pack.", sources.len()));

    let summary = build_package(&manifest, &sources)?;
    print_success(&format!(
        "Wrote {} entries ({} compressed) to '{}': {} -> {}",
        summary.entries,
        summary.compressed,
        manifest.output.display(),
        human_size(summary.raw_bytes),
        human_size(summary.packed_bytes),
    ));
    Ok(())
}

/// Loads the manifest at `path`, or the default configuration if it does not exist.
fn load_manifest(path: &Path) -> Result<AssetManifest> {
    let base = path.parent().unwrap_or(Path::new(""));
    if !path.exists() {
        print_info(&format!("No '{}' found. Using default configuration.", path.display()));
        return Ok(AssetManifest::default().rebase(base));
    }
    print_info(&format!("Found '{}'. Loading configuration.", path.display()));
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest file at '{}'", path.display()))?;
    let manifest: AssetManifest = toml::from_str(&text)
        .with_context(|| format!("Failed to parse TOML from '{}'", path.display()))?;
    Ok(manifest.rebase(base))
}

/// Walks every source directory and names each file after its path relative to
/// that directory.
///
/// Directories are walked in manifest order and files in name order, so the
/// result is stable. When two directories provide the same entry, the first wins.
pub fn collect_sources(manifest: &AssetManifest) -> Result<Vec<SourceFile>> {
    let output = fs::canonicalize(&manifest.output).ok();
    let mut seen = HashSet::new();
    let mut files = Vec::new();

    for dir in &manifest.source_directories {
        if !dir.is_dir() {
            log::warn!("Skipping missing source directory '{}'", dir.display());
            continue;
        }
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.with_context(|| format!("Failed to walk '{}'", dir.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if output.is_some() && fs::canonicalize(entry.path()).ok() == output {
                continue;
            }
            let relative = entry.path().strip_prefix(dir)?;
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_str())
                .collect::<Option<Vec<_>>>()
                .with_context(|| format!("Non UTF-8 path '{}'", entry.path().display()))?
                .join("/");
            if !seen.insert(name.to_lowercase()) {
                log::warn!("'{}' shadowed by an earlier source directory", entry.path().display());
                continue;
            }
            files.push(SourceFile { path: entry.into_path(), entry: name });
        }
    }
    Ok(files)
}

/// Writes `sources` into the manifest's output package.
pub fn build_package(manifest: &AssetManifest, sources: &[SourceFile]) -> Result<PackSummary> {
    let mut writer = PackWriter::new().with_checksums(true);
    for source in sources {
        let bytes = fs::read(&source.path)
            .with_context(|| format!("Failed to read asset file '{}'", source.path.display()))?;
        let compress = manifest.should_compress(&source.path, bytes.len() as u64);
        log::debug!("{} ({} bytes, compress: {compress})", source.entry, bytes.len());
        writer
            .add(&source.entry, &bytes, compress)
            .with_context(|| format!("Failed to add '{}'", source.entry))?;
    }

    if let Some(parent) = manifest.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create '{}'", parent.display()))?;
    }
    writer
        .write_file(&manifest.output)
        .with_context(|| format!("Failed to write package to '{}'", manifest.output.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use larder_core::PackageModule;
    use larder_io::PackModule;

    fn write(root: &Path, name: &str, bytes: &[u8]) {
        let path = root.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, bytes).unwrap();
    }

    fn manifest(root: &Path) -> AssetManifest {
        AssetManifest {
            source_directories: vec![root.join("base"), root.join("mod")],
            output: root.join("base/out.lpak"),
            compress_extensions: vec!["bin".into()],
            min_compress_size: 4,
        }
    }

    #[test]
    fn first_source_directory_wins() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "base/maps/one.bin", b"base map");
        write(dir.path(), "base/readme.txt", b"hi");
        write(dir.path(), "mod/Maps/One.bin", b"modded");
        write(dir.path(), "mod/extra.bin", b"extra");

        let sources = collect_sources(&manifest(dir.path())).unwrap();
        let entries: Vec<&str> = sources.iter().map(|s| s.entry.as_str()).collect();
        assert_eq!(entries, ["maps/one.bin", "readme.txt", "extra.bin"]);
    }

    #[test]
    fn packed_output_is_readable() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "base/level.bin", &[7u8; 4096]);
        write(dir.path(), "base/tiny.bin", b"abc");
        write(dir.path(), "base/sub/notes.txt", b"plain text, stored raw");
        let manifest = manifest(dir.path());

        let sources = collect_sources(&manifest).unwrap();
        let summary = build_package(&manifest, &sources).unwrap();
        assert_eq!(summary.entries, 3);
        assert_eq!(summary.compressed, 1);

        // A second run must not pick up its own output.
        assert_eq!(collect_sources(&manifest).unwrap().len(), 3);

        let module = PackModule::new("assets/", &manifest.output);
        module.init().unwrap();
        let level = module.file_info("level.bin").unwrap();
        assert!(level.is_compressed());
        assert_eq!(level.logical_size(), 4096);
        assert!(!module.file_info("tiny.bin").unwrap().is_compressed());
        assert!(module.file_info("sub/notes.txt").is_some());
        module.cleanup();
    }

    #[test]
    fn missing_manifest_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = load_manifest(&dir.path().join("Assets.toml")).unwrap();
        assert_eq!(manifest.source_directories, [dir.path().join("assets")]);
    }
}
