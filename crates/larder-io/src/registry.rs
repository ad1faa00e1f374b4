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

//! Package dispatch: routing logical paths to package modules or the host filesystem.

use larder_core::{PackageError, PackageModule, ResourceError, ResourceResult};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use walkdir::WalkDir;

/// Prefix that forces a path to be resolved on the host filesystem.
pub const HOST_PREFIX: &str = "host:";

/// Deepest directory level `list_files` descends to.
pub const MAX_LIST_DEPTH: usize = 15;

/// Where the bytes of a logical path live.
#[derive(Clone)]
pub struct FileSource {
    /// The logical path, as requested.
    pub path: String,
    /// Host file holding the bytes.
    pub container: PathBuf,
    /// Offset of the bytes within `container`.
    pub offset: u64,
    /// Stored length.
    pub length: u64,
    /// Decoded length if the bytes are compressed.
    pub uncompressed_size: Option<u64>,
    /// The module that resolved the path, or `None` for host files.
    pub module: Option<Arc<dyn PackageModule>>,
}

impl FileSource {
    /// `true` if the bytes must be decompressed before use.
    pub fn is_compressed(&self) -> bool {
        self.uncompressed_size.is_some()
    }

    /// Size of the file as seen by a loader.
    pub fn logical_size(&self) -> u64 {
        self.uncompressed_size.unwrap_or(self.length)
    }
}

impl fmt::Debug for FileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSource")
            .field("path", &self.path)
            .field("container", &self.container)
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("uncompressed_size", &self.uncompressed_size)
            .field("module", &self.module.as_ref().map(|m| m.prefix().to_owned()))
            .finish()
    }
}

/// The set of registered package modules, plus the host fallback.
pub struct PackageRegistry {
    root_dir: PathBuf,
    modules: RwLock<Vec<Arc<dyn PackageModule>>>,
}

fn starts_with_ignore_case(path: &str, prefix: &str) -> bool {
    path.len() >= prefix.len()
        && path.is_char_boundary(prefix.len())
        && path[..prefix.len()].eq_ignore_ascii_case(prefix)
}

impl PackageRegistry {
    /// Creates a registry whose host fallback resolves relative paths against `root_dir`.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self { root_dir: root_dir.into(), modules: RwLock::new(Vec::new()) }
    }

    /// Base directory of the host fallback.
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Initialises and registers `module`.
    ///
    /// Fails if the module is already registered or its `init` fails; in both cases
    /// the registry is unchanged.
    pub fn register(&self, module: Arc<dyn PackageModule>) -> Result<(), PackageError> {
        let mut modules = self.modules.write().unwrap_or_else(PoisonError::into_inner);
        if modules.iter().any(|m| Arc::ptr_eq(m, &module)) {
            return Err(PackageError::AlreadyRegistered(module.prefix().to_owned()));
        }
        module.init()?;
        log::info!("Registered package module '{}'", module.prefix());
        modules.push(module);
        Ok(())
    }

    /// Cleans up and removes `module`. Unregistering a module that was never
    /// registered does nothing.
    pub fn unregister(&self, module: &Arc<dyn PackageModule>) {
        let mut modules = self.modules.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(position) = modules.iter().position(|m| Arc::ptr_eq(m, module)) {
            let removed = modules.remove(position);
            removed.cleanup();
            log::info!("Unregistered package module '{}'", removed.prefix());
        }
    }

    /// Cleans up and removes every module.
    pub fn clear(&self) {
        let mut modules = self.modules.write().unwrap_or_else(PoisonError::into_inner);
        for module in modules.drain(..) {
            log::warn!("Package module '{}' still registered at teardown", module.prefix());
            module.cleanup();
        }
    }

    /// Number of registered modules.
    pub fn len(&self) -> usize {
        self.modules.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// `true` if no module is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The module with the longest prefix matching `path`, and the rest of the path.
    fn claim<'p>(&self, path: &'p str) -> Option<(Arc<dyn PackageModule>, &'p str)> {
        let modules = self.modules.read().unwrap_or_else(PoisonError::into_inner);
        modules
            .iter()
            .filter(|m| starts_with_ignore_case(path, m.prefix()))
            .max_by_key(|m| m.prefix().len())
            .map(|m| (m.clone(), &path[m.prefix().len()..]))
    }

    fn host_path(&self, path: &str) -> PathBuf {
        let relative = Path::new(path);
        if relative.is_absolute() {
            relative.to_path_buf()
        } else {
            self.root_dir.join(relative)
        }
    }

    /// Finds where the bytes of `path` live.
    pub fn resolve(&self, path: &str) -> ResourceResult<FileSource> {
        if path.is_empty() {
            return Err(ResourceError::invalid("empty path"));
        }

        let host_only = starts_with_ignore_case(path, HOST_PREFIX);
        if !host_only {
            if let Some((module, rest)) = self.claim(path) {
                let entry = module
                    .file_info(rest)
                    .ok_or_else(|| ResourceError::NotFound(path.to_owned()))?;
                return Ok(FileSource {
                    path: path.to_owned(),
                    container: entry.container,
                    offset: entry.offset,
                    length: entry.length,
                    uncompressed_size: entry.uncompressed_size,
                    module: Some(module),
                });
            }
        }

        let stripped = if host_only { &path[HOST_PREFIX.len()..] } else { path };
        let host = self.host_path(stripped);
        let metadata = std::fs::metadata(&host)
            .map_err(|_| ResourceError::NotFound(path.to_owned()))?;
        if !metadata.is_file() {
            return Err(ResourceError::NotFound(path.to_owned()));
        }
        Ok(FileSource {
            path: path.to_owned(),
            container: host,
            offset: 0,
            length: metadata.len(),
            uncompressed_size: None,
            module: None,
        })
    }

    /// `true` if `path` resolves to a module entry or a host file.
    pub fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_ok()
    }

    /// Lists the files below the directory `path`, relative to it.
    ///
    /// Paths claimed by a module list the module's entries under that directory. Other
    /// paths walk the host directory; recursion stops at [`MAX_LIST_DEPTH`] levels and
    /// directories themselves are never returned. Every call starts a fresh listing.
    pub fn list_files(&self, path: &str, recursive: bool) -> Box<dyn Iterator<Item = String>> {
        let host_only = starts_with_ignore_case(path, HOST_PREFIX);
        if !host_only {
            if let Some((module, rest)) = self.claim(path) {
                return module_listing(module.as_ref(), rest, recursive);
            }
        }

        let stripped = if host_only { &path[HOST_PREFIX.len()..] } else { path };
        let base = self.host_path(stripped);
        let depth = if recursive { MAX_LIST_DEPTH } else { 1 };
        let walker = WalkDir::new(&base).min_depth(1).max_depth(depth).into_iter();
        Box::new(walker.filter_map(|entry| entry.ok()).filter_map(move |entry| {
            if !entry.file_type().is_file() {
                return None;
            }
            let relative = entry.path().strip_prefix(&base).ok()?;
            let parts: Vec<_> = relative.iter().map(|part| part.to_string_lossy()).collect();
            Some(parts.join("/"))
        }))
    }
}

fn module_listing(
    module: &dyn PackageModule,
    dir: &str,
    recursive: bool,
) -> Box<dyn Iterator<Item = String>> {
    let dir = dir.trim_end_matches('/').to_owned();
    let max_depth = if recursive { MAX_LIST_DEPTH } else { 1 };
    Box::new(module.list_files().filter_map(move |name| {
        let relative = if dir.is_empty() {
            name.as_str()
        } else if starts_with_ignore_case(&name, &dir) && name[dir.len()..].starts_with('/') {
            &name[dir.len() + 1..]
        } else {
            return None;
        };
        (relative.split('/').count() <= max_depth).then(|| relative.to_owned())
    }))
}

impl Drop for PackageRegistry {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use larder_core::{DecompressError, Decompressor, PackageEntry};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubModule {
        prefix: &'static str,
        files: Vec<&'static str>,
        fail_init: bool,
        cleanups: AtomicUsize,
    }

    impl StubModule {
        fn new(prefix: &'static str, files: Vec<&'static str>) -> Self {
            Self { prefix, files, fail_init: false, cleanups: AtomicUsize::new(0) }
        }
    }

    impl PackageModule for StubModule {
        fn prefix(&self) -> &str {
            self.prefix
        }
        fn init(&self) -> Result<(), PackageError> {
            if self.fail_init {
                return Err(PackageError::InitFailed {
                    prefix: self.prefix.to_owned(),
                    reason: "stub".to_owned(),
                });
            }
            Ok(())
        }
        fn cleanup(&self) {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
        }
        fn list_files(&self) -> Box<dyn Iterator<Item = String> + Send> {
            Box::new(self.files.clone().into_iter().map(str::to_owned))
        }
        fn file_info(&self, path: &str) -> Option<PackageEntry> {
            self.files.iter().any(|f| f.eq_ignore_ascii_case(path)).then(|| PackageEntry {
                container: PathBuf::from(self.prefix),
                offset: 0,
                length: path.len() as u64,
                uncompressed_size: None,
            })
        }
        fn decompressor(&self, _: u64) -> Result<Box<dyn Decompressor>, DecompressError> {
            Err(DecompressError::BadSignature)
        }
    }

    #[test]
    fn longest_prefix_wins() {
        let registry = PackageRegistry::new(".");
        registry.register(Arc::new(StubModule::new("pkg/", vec!["a.txt"]))).unwrap();
        registry.register(Arc::new(StubModule::new("pkg/sub/", vec!["a.txt"]))).unwrap();

        let source = registry.resolve("PKG/Sub/A.TXT").unwrap();
        assert_eq!(source.container, PathBuf::from("pkg/sub/"));
        let source = registry.resolve("pkg/a.txt").unwrap();
        assert_eq!(source.container, PathBuf::from("pkg/"));
        assert!(matches!(registry.resolve("pkg/b.txt"), Err(ResourceError::NotFound(_))));
    }

    #[test]
    fn registration_is_checked() {
        let registry = PackageRegistry::new(".");
        let module: Arc<dyn PackageModule> = Arc::new(StubModule::new("pkg/", vec![]));
        registry.register(module.clone()).unwrap();
        assert!(matches!(
            registry.register(module.clone()),
            Err(PackageError::AlreadyRegistered(_))
        ));

        let failing = StubModule { fail_init: true, ..StubModule::new("bad/", vec![]) };
        assert!(registry.register(Arc::new(failing)).is_err());
        assert_eq!(registry.len(), 1);

        let stranger: Arc<dyn PackageModule> = Arc::new(StubModule::new("other/", vec![]));
        registry.unregister(&stranger);
        assert_eq!(registry.len(), 1);
        registry.unregister(&module);
        assert!(registry.is_empty());
    }

    #[test]
    fn unregister_runs_cleanup_once() {
        let registry = PackageRegistry::new(".");
        let stub = Arc::new(StubModule::new("pkg/", vec![]));
        let module: Arc<dyn PackageModule> = stub.clone();
        registry.register(module.clone()).unwrap();
        registry.unregister(&module);
        registry.unregister(&module);
        assert_eq!(stub.cleanups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn module_listing_filters_by_directory() {
        let registry = PackageRegistry::new(".");
        let files = vec!["top.txt", "data/1.txt", "data/deep/2.txt", "database.txt"];
        registry.register(Arc::new(StubModule::new("pkg/", files))).unwrap();

        let mut flat: Vec<_> = registry.list_files("pkg/data", false).collect();
        flat.sort();
        assert_eq!(flat, ["1.txt"]);

        let mut deep: Vec<_> = registry.list_files("PKG/DATA/", true).collect();
        deep.sort();
        assert_eq!(deep, ["1.txt", "deep/2.txt"]);

        assert_eq!(registry.list_files("pkg/", true).count(), 4);
    }

    #[test]
    fn module_listing_outlives_unregistration() {
        let registry = PackageRegistry::new(".");
        let module: Arc<dyn PackageModule> =
            Arc::new(StubModule::new("pkg/", vec!["a.txt", "b.txt"]));
        registry.register(module.clone()).unwrap();
        let listing = registry.list_files("pkg/", false);

        registry.unregister(&module);
        drop(module);
        let mut names: Vec<_> = listing.collect();
        names.sort();
        assert_eq!(names, ["a.txt", "b.txt"]);
    }

    #[test]
    fn host_prefix_bypasses_modules() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("pkg")).unwrap();
        std::fs::write(dir.path().join("pkg/a.txt"), b"host").unwrap();

        let registry = PackageRegistry::new(dir.path());
        registry.register(Arc::new(StubModule::new("pkg/", vec![]))).unwrap();
        assert!(!registry.exists("pkg/a.txt"));
        let source = registry.resolve("host:pkg/a.txt").unwrap();
        assert!(source.module.is_none());
        assert_eq!(source.length, 4);
    }

    #[test]
    fn host_listing_omits_directories_and_respects_depth() {
        let dir = tempfile::tempdir().unwrap();
        let mut deep = dir.path().to_path_buf();
        for level in 0..20 {
            deep.push(format!("d{level}"));
        }
        std::fs::create_dir_all(&deep).unwrap();
        std::fs::create_dir(dir.path().join("empty")).unwrap();
        std::fs::write(dir.path().join("root.txt"), b"r").unwrap();
        std::fs::write(dir.path().join("d0/one.txt"), b"1").unwrap();
        std::fs::write(deep.join("too-deep.txt"), b"x").unwrap();

        let registry = PackageRegistry::new(dir.path());
        let mut flat: Vec<_> = registry.list_files("", false).collect();
        flat.sort();
        assert_eq!(flat, ["root.txt"]);

        let mut all: Vec<_> = registry.list_files("", true).collect();
        all.sort();
        assert_eq!(all, ["d0/one.txt", "root.txt"]);
    }
}
