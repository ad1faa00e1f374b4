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

#![allow(dead_code)]

use larder_core::{
    ByteSource, FinalizeResult, Finalizers, Font, FontParser, Sound, SoundDecoder, Texture,
    TextureDecoder, TextureOptions,
};
use larder_io::{PackModule, PackWriter};
use larder_resource::{ContextConfig, DecompressionConfig, PackageModule, ResourceContext};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub const PACKAGE_PREFIX: &str = "pkg/";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A temporary asset directory with a context rooted in it.
pub struct Fixture {
    pub dir: TempDir,
    pub ctx: ResourceContext,
}

impl Fixture {
    pub fn new(configure: impl FnOnce(&mut ContextConfig)) -> anyhow::Result<Self> {
        init_logging();
        let dir = tempfile::tempdir()?;
        let mut config = ContextConfig { root_dir: dir.path().to_path_buf(), ..Default::default() };
        configure(&mut config);
        Ok(Self { ctx: ResourceContext::new(config), dir })
    }

    pub fn write(&self, name: &str, bytes: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, bytes)?;
        Ok(path)
    }

    /// Writes and registers the standard test package under [`PACKAGE_PREFIX`].
    pub fn mount_package(&self, compress: bool) -> anyhow::Result<Arc<dyn PackageModule>> {
        let container = self.dir.path().join("assets.lpak");
        write_package(&container, compress)?;
        let module: Arc<dyn PackageModule> = Arc::new(PackModule::new(PACKAGE_PREFIX, container));
        self.ctx.register_package(module.clone())?;
        Ok(module)
    }
}

pub fn background(config: &mut ContextConfig) {
    config.decompression = DecompressionConfig {
        background: true,
        foreground_threshold: 1,
        double_buffer_threshold: 16 * 1024,
        pool_size: 2,
    };
}

/// Deterministic, compressible filler.
pub fn big_payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i / 13) % 251) as u8 ^ (i % 7) as u8).collect()
}

pub const BIG_LEN: usize = 300_000;

pub fn write_package(path: &Path, compress: bool) -> anyhow::Result<()> {
    let mut writer = PackWriter::new().with_checksums(true);
    writer.add("top.txt", b"top", compress)?;
    writer.add("Data/1.txt", b"hello", compress)?;
    writer.add("data/big.bin", &big_payload(BIG_LEN), compress)?;
    writer.write_file(path)?;
    Ok(())
}

/// Polls `condition` until it holds or five seconds pass.
pub fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Texture decoder that records the bytes it was given, in call order.
#[derive(Default)]
pub struct RecordingTextures {
    pub calls: Mutex<Vec<Vec<u8>>>,
}

impl RecordingTextures {
    pub fn calls(&self) -> Vec<Vec<u8>> {
        self.calls.lock().unwrap().clone()
    }
}

impl TextureDecoder for RecordingTextures {
    fn decode(&self, bytes: &[u8], options: TextureOptions) -> FinalizeResult<Texture> {
        self.calls.lock().unwrap().push(bytes.to_vec());
        if bytes.starts_with(b"bad") {
            return Err("unsupported image".into());
        }
        Ok(Texture::new((bytes.to_vec(), options.mipmaps)))
    }

    fn create(&self, width: u32, height: u32, _: TextureOptions) -> FinalizeResult<Texture> {
        Ok(Texture::new((width, height)))
    }
}

pub struct TextFonts;

impl FontParser for TextFonts {
    fn parse_bitmap(&self, bytes: &[u8]) -> FinalizeResult<Font> {
        Ok(Font::new(String::from_utf8(bytes.to_vec())?))
    }

    fn parse_freetype(&self, bytes: &[u8], size: f32) -> FinalizeResult<Font> {
        Ok(Font::new((bytes.len(), size)))
    }
}

/// Sound decoder keeping the raw bytes; streamed sounds are read to the end.
pub struct RawSounds;

impl SoundDecoder for RawSounds {
    fn decode(&self, bytes: Vec<u8>) -> FinalizeResult<Sound> {
        Ok(Sound::new(bytes))
    }

    fn open_stream(&self, mut source: Box<dyn ByteSource>) -> FinalizeResult<Sound> {
        let mut bytes = Vec::with_capacity(source.size() as usize);
        source.read_to_end(&mut bytes)?;
        Ok(Sound::new(bytes))
    }
}

pub fn finalizers(textures: Arc<RecordingTextures>) -> Finalizers {
    Finalizers::new()
        .with_textures(textures)
        .with_fonts(Arc::new(TextFonts))
        .with_sounds(Arc::new(RawSounds))
}
