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

//! Typed finalizers and the opaque payloads they produce.
//!
//! The resource manager never interprets texture, font or sound data itself. Once the
//! bytes of a load have arrived (and been decompressed), they are handed to the decoder
//! registered for the record's kind. The decoder returns an opaque payload which the
//! manager stores and hands back from its `get_*` queries.

use std::any::Any;
use std::error::Error;
use std::fmt;
use std::io::{Read, Seek};
use std::sync::Arc;

/// The result type returned by every finalizer.
///
/// Finalizers are supplied by the embedding application, so their errors are boxed
/// rather than forced into the crate's own error enum.
pub type FinalizeResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

macro_rules! opaque_payload {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone)]
        pub struct $name(Arc<dyn Any + Send + Sync>);

        impl $name {
            /// Wraps a decoder-specific value.
            pub fn new<T: Any + Send + Sync>(value: T) -> Self {
                Self(Arc::new(value))
            }

            /// Borrows the wrapped value if it has type `T`.
            pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
                self.0.downcast_ref::<T>()
            }

            /// `true` if both handles share the same underlying value.
            pub fn ptr_eq(&self, other: &Self) -> bool {
                Arc::ptr_eq(&self.0, &other.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:p})", stringify!($name), Arc::as_ptr(&self.0))
            }
        }
    };
}

opaque_payload!(
    /// A texture handle produced by a [`TextureDecoder`].
    Texture
);
opaque_payload!(
    /// A font handle produced by a [`FontParser`].
    Font
);
opaque_payload!(
    /// A sound handle produced by a [`SoundDecoder`].
    Sound
);

/// Options forwarded to the texture decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextureOptions {
    /// Generate a mipmap chain.
    pub mipmaps: bool,
}

/// A seekable byte stream handed to streaming sound decoders.
pub trait ByteSource: Read + Seek + Send {
    /// Total length of the stream in bytes.
    fn size(&self) -> u64;
}

/// Turns encoded image bytes into a [`Texture`].
pub trait TextureDecoder: Send + Sync {
    /// Decodes a complete image file.
    fn decode(&self, bytes: &[u8], options: TextureOptions) -> FinalizeResult<Texture>;

    /// Creates a blank texture of the given dimensions.
    fn create(&self, width: u32, height: u32, options: TextureOptions) -> FinalizeResult<Texture>;
}

/// Turns font files into a [`Font`].
pub trait FontParser: Send + Sync {
    /// Parses a bitmap font description.
    fn parse_bitmap(&self, bytes: &[u8]) -> FinalizeResult<Font>;

    /// Parses a scalable font file rendered at `size` pixels.
    fn parse_freetype(&self, bytes: &[u8], size: f32) -> FinalizeResult<Font>;
}

/// Turns audio files into a [`Sound`].
pub trait SoundDecoder: Send + Sync {
    /// Decodes a sound whose encoded bytes were loaded in full. The decoder takes
    /// ownership of the buffer so it can keep it for deferred decoding.
    fn decode(&self, bytes: Vec<u8>) -> FinalizeResult<Sound>;

    /// Opens a sound that streams from `source` as it plays.
    fn open_stream(&self, source: Box<dyn ByteSource>) -> FinalizeResult<Sound>;
}

/// The set of typed finalizers available to a resource context.
///
/// Any of them may be missing; loading a kind whose finalizer is missing fails with a
/// format error.
#[derive(Clone, Default)]
pub struct Finalizers {
    textures: Option<Arc<dyn TextureDecoder>>,
    fonts: Option<Arc<dyn FontParser>>,
    sounds: Option<Arc<dyn SoundDecoder>>,
}

impl Finalizers {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the texture decoder.
    pub fn with_textures(mut self, decoder: Arc<dyn TextureDecoder>) -> Self {
        self.textures = Some(decoder);
        self
    }

    /// Registers the font parser.
    pub fn with_fonts(mut self, parser: Arc<dyn FontParser>) -> Self {
        self.fonts = Some(parser);
        self
    }

    /// Registers the sound decoder.
    pub fn with_sounds(mut self, decoder: Arc<dyn SoundDecoder>) -> Self {
        self.sounds = Some(decoder);
        self
    }

    /// The registered texture decoder.
    pub fn textures(&self) -> Option<&dyn TextureDecoder> {
        self.textures.as_deref()
    }

    /// The registered font parser.
    pub fn fonts(&self) -> Option<&dyn FontParser> {
        self.fonts.as_deref()
    }

    /// The registered sound decoder.
    pub fn sounds(&self) -> Option<&dyn SoundDecoder> {
        self.sounds.as_deref()
    }
}

impl fmt::Debug for Finalizers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Finalizers")
            .field("textures", &self.textures.is_some())
            .field("fonts", &self.fonts.is_some())
            .field("sounds", &self.sounds.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_downcasts_to_wrapped_type() {
        let texture = Texture::new((64u32, 32u32));
        assert_eq!(texture.downcast_ref::<(u32, u32)>(), Some(&(64, 32)));
        assert!(texture.downcast_ref::<String>().is_none());
    }

    #[test]
    fn payload_clones_share_identity() {
        let sound = Sound::new(vec![1u8, 2, 3]);
        let copy = sound.clone();
        assert!(sound.ptr_eq(&copy));
        assert!(!sound.ptr_eq(&Sound::new(vec![1u8, 2, 3])));
    }
}
