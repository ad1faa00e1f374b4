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

mod common;

use common::{background, big_payload, eventually, Fixture, BIG_LEN};
use larder_io::pack::format::{ENTRY_SIZE, HEADER_SIZE};
use larder_io::{PackModule, PackWriter};
use larder_resource::{
    AllocSite, ContextConfig, LoadState, PackageModule, ResourceError, ResourceManager,
};
use std::sync::Arc;

#[test]
fn package_entries_resolve_and_list() -> anyhow::Result<()> {
    for compress in [false, true] {
        let fixture = Fixture::new(|_| {})?;
        fixture.mount_package(compress)?;
        let ctx = &fixture.ctx;

        assert!(ctx.exists("pkg/top.txt"));
        assert!(ctx.exists("PKG/DATA/1.TXT"));
        assert!(!ctx.exists("pkg/missing.txt"));

        let mut all: Vec<String> = ctx.list_files("pkg/", true).collect();
        all.sort();
        assert_eq!(all, ["data/1.txt", "data/big.bin", "top.txt"]);
        let top: Vec<String> = ctx.list_files("pkg/", false).collect();
        assert_eq!(top, ["top.txt"]);
        let mut data: Vec<String> = ctx.list_files("Pkg/Data", false).collect();
        data.sort();
        assert_eq!(data, ["1.txt", "big.bin"]);

        let manager = ResourceManager::new(ctx, 0)?;
        let top = manager.load_data("pkg/top.txt")?;
        let hello = manager.load_data("pkg/data/1.txt")?;
        manager.wait(manager.mark())?;
        assert_eq!(manager.get_data(top).unwrap().as_slice(), b"top");
        assert_eq!(manager.get_data(hello).unwrap().as_slice(), b"hello");
    }
    Ok(())
}

#[test]
fn host_prefix_bypasses_packages() -> anyhow::Result<()> {
    let fixture = Fixture::new(|_| {})?;
    fixture.mount_package(false)?;
    fixture.write("pkg/top.txt", b"from host")?;

    let manager = ResourceManager::new(&fixture.ctx, 0)?;
    let packaged = manager.load_data("pkg/top.txt")?;
    let host = manager.load_data("host:pkg/top.txt")?;
    manager.wait(manager.mark())?;
    assert_eq!(manager.get_data(packaged).unwrap().as_slice(), b"top");
    assert_eq!(manager.get_data(host).unwrap().as_slice(), b"from host");
    Ok(())
}

#[test]
fn background_and_foreground_decompression_agree() -> anyhow::Result<()> {
    let foreground = Fixture::new(|_| {})?;
    foreground.mount_package(true)?;
    let threaded = Fixture::new(background)?;
    threaded.mount_package(true)?;

    let inline = ResourceManager::new(&foreground.ctx, 0)?;
    let pooled = ResourceManager::new(&threaded.ctx, 0)?;
    let a = inline.load_data("pkg/data/big.bin")?;
    let b = pooled.load_data("pkg/data/big.bin")?;
    inline.wait(inline.mark())?;
    pooled.wait(pooled.mark())?;

    let a = inline.get_data(a).unwrap();
    let b = pooled.get_data(b).unwrap();
    assert_eq!(a.len(), BIG_LEN);
    assert_eq!(a, b);
    assert_eq!(a.as_slice(), big_payload(BIG_LEN).as_slice());
    assert!(eventually(|| threaded.ctx.stats().background_jobs == 0));
    Ok(())
}

#[test]
fn saturated_pool_falls_back_to_foreground() -> anyhow::Result<()> {
    let fixture = Fixture::new(|config| {
        background(config);
        config.decompression.pool_size = 1;
    })?;
    fixture.mount_package(true)?;
    let manager = ResourceManager::new(&fixture.ctx, 0)?;

    let ids = (0..6)
        .map(|_| manager.load_data("pkg/data/big.bin"))
        .collect::<Result<Vec<_>, _>>()?;
    manager.wait(manager.mark())?;
    let expected = big_payload(BIG_LEN);
    for id in ids {
        assert_eq!(manager.get_data(id).unwrap().as_slice(), expected.as_slice());
    }
    Ok(())
}

#[test]
fn background_job_failure_is_silent() -> anyhow::Result<()> {
    let fixture = Fixture::new(background)?;
    fixture.mount_package(true)?;
    let manager = ResourceManager::new(&fixture.ctx, 0)?;

    fixture.ctx.fail_points().fail_site(AllocSite::BackgroundJob);
    let id = manager.load_data("pkg/data/big.bin")?;
    manager.wait(manager.mark())?;
    assert_eq!(manager.load_state(id), Some(LoadState::Done));
    assert_eq!(manager.get_data(id).unwrap().len(), BIG_LEN);
    Ok(())
}

#[test]
fn corrupt_stream_ends_in_error() -> anyhow::Result<()> {
    let configs: [fn(&mut ContextConfig); 2] = [|_| {}, background];
    for configure in configs {
        let fixture = Fixture::new(configure)?;
        let container = fixture.dir.path().join("broken.lpak");
        let mut writer = PackWriter::new();
        writer.add("only.bin", &big_payload(100_000), true)?;
        writer.write_file(&container)?;

        // The single entry's data starts right after the index: clobber its magic.
        let mut bytes = std::fs::read(&container)?;
        bytes[HEADER_SIZE + ENTRY_SIZE] ^= 0xFF;
        std::fs::write(&container, &bytes)?;

        let module: Arc<dyn PackageModule> = Arc::new(PackModule::new("broken/", container));
        fixture.ctx.register_package(module)?;
        let manager = ResourceManager::new(&fixture.ctx, 0)?;
        let id = manager.load_data("broken/only.bin")?;
        let sibling = manager.strdup("unaffected")?;
        manager.wait(manager.mark())?;

        assert_eq!(manager.load_state(id), Some(LoadState::Error));
        assert!(matches!(*manager.load_error(id).unwrap(), ResourceError::Decompress { .. }));
        assert!(manager.get_data(id).is_none());
        assert!(manager.get_data(sibling).is_some());
    }
    Ok(())
}

#[test]
fn truncated_container_ends_in_short_read() -> anyhow::Result<()> {
    let fixture = Fixture::new(|_| {})?;
    let module = fixture.mount_package(false)?;
    fixture.write("plain.txt", b"plain")?;
    // The index is already loaded; cut the container in the middle of the big entry.
    let entry = module.file_info("data/big.bin").unwrap();
    std::fs::OpenOptions::new()
        .write(true)
        .open(&entry.container)?
        .set_len(entry.offset + entry.length / 2)?;

    let manager = ResourceManager::new(&fixture.ctx, 0)?;
    let big = manager.load_data("pkg/data/big.bin")?;
    let plain = manager.load_data("plain.txt")?;
    manager.wait(manager.mark())?;

    assert_eq!(manager.load_state(big), Some(LoadState::Error));
    let err = manager.load_error(big).unwrap();
    assert!(
        matches!(*err, ResourceError::ShortRead { expected, actual, .. }
            if expected == BIG_LEN as u64 && actual < expected),
        "{err}"
    );
    assert!(manager.get_data(big).is_none());
    assert_eq!(manager.get_data(plain).unwrap().as_slice(), b"plain");
    assert_eq!(fixture.ctx.stats().live_load_tasks, 0);
    Ok(())
}

#[test]
fn raw_access_refuses_compressed_entries() -> anyhow::Result<()> {
    let fixture = Fixture::new(|_| {})?;
    fixture.mount_package(true)?;
    let manager = ResourceManager::new(&fixture.ctx, 0)?;

    assert!(matches!(manager.open_file("pkg/top.txt"), Err(ResourceError::Compressed(_))));
    assert!(matches!(manager.open_sound("pkg/top.txt"), Err(ResourceError::Compressed(_))));
    assert_eq!(manager.live_records(), 0);
    Ok(())
}

#[test]
fn raw_access_reads_uncompressed_entries() -> anyhow::Result<()> {
    let fixture = Fixture::new(|_| {})?;
    fixture.mount_package(false)?;
    let manager = ResourceManager::new(&fixture.ctx, 0)?;

    let file = manager.open_file("pkg/data/1.txt")?;
    assert_eq!(manager.file_size(file)?, 5);
    let mut buffer = [0u8; 8];
    assert_eq!(manager.read_file(file, &mut buffer)?, 5);
    assert_eq!(&buffer[..5], b"hello");
    assert_eq!(manager.read_file_at(file, 1, &mut buffer[..3])?, 3);
    assert_eq!(&buffer[..3], b"ell");

    let (handle, base) = manager.file_handle(file)?;
    assert!(base > 0);
    assert!(handle.metadata()?.len() > base);
    Ok(())
}

#[test]
fn unregistered_package_stops_resolving() -> anyhow::Result<()> {
    let fixture = Fixture::new(|_| {})?;
    let module = fixture.mount_package(false)?;
    assert!(fixture.ctx.exists("pkg/top.txt"));

    fixture.ctx.unregister_package(&module);
    assert!(!fixture.ctx.exists("pkg/top.txt"));
    // A second unregister is a no-op.
    fixture.ctx.unregister_package(&module);
    assert!(fixture.ctx.register_package(module.clone()).is_ok());
    assert!(fixture.ctx.register_package(module).is_err());
    Ok(())
}

#[test]
fn malformed_package_is_rejected() -> anyhow::Result<()> {
    let fixture = Fixture::new(|_| {})?;
    let container = fixture.write("junk.lpak", b"definitely not a package")?;
    let module: Arc<dyn PackageModule> = Arc::new(PackModule::new("junk/", container));
    assert!(fixture.ctx.register_package(module).is_err());
    assert!(!fixture.ctx.exists("junk/anything"));
    Ok(())
}
