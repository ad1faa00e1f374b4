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

use super::Cancellation;
use crate::error::{DecodeError, ReadError};
use crate::file::read_path_range_into;
use crate::read_pool::{ReadPool, ReadRequest};
use larder_core::{DecompressError, Decompressor, Progress};
use std::path::{Path, PathBuf};

/// Feeds an in-memory compressed buffer to `decompressor`, at most `chunk` bytes at a
/// time, appending the decoded bytes to `output`.
pub fn decompress_buffer(
    decompressor: &mut dyn Decompressor,
    input: &[u8],
    chunk: usize,
    output: &mut Vec<u8>,
) -> Result<(), DecompressError> {
    let mut progress = Progress::NeedInput;
    for piece in input.chunks(chunk.max(1)) {
        progress = decompressor.decompress(piece, output)?;
    }
    finish(decompressor, progress, output)
}

fn finish(
    decompressor: &mut dyn Decompressor,
    progress: Progress,
    output: &mut Vec<u8>,
) -> Result<(), DecompressError> {
    let progress = match progress {
        Progress::Done => Progress::Done,
        // Empty input lets a decoder that only needed its header finish.
        Progress::NeedInput => decompressor.decompress(&[], output)?,
    };
    match progress {
        Progress::Done => Ok(()),
        Progress::NeedInput => Err(DecompressError::Truncated(output.len() as u64)),
    }
}

/// The compressed byte range a streamed decode reads.
#[derive(Debug, Clone)]
pub struct StreamInput {
    /// Host file holding the compressed bytes.
    pub container: PathBuf,
    /// Offset of the compressed bytes.
    pub offset: u64,
    /// Length of the compressed bytes.
    pub length: u64,
    /// Size of each read.
    pub chunk: usize,
}

enum PendingRead {
    Issued(ReadRequest),
    Finished(Result<Vec<u8>, ReadError>),
}

impl PendingRead {
    fn issue(reads: &ReadPool, container: &Path, offset: u64, len: u64, mut buffer: Vec<u8>) -> Self {
        buffer.clear();
        match reads.try_acquire() {
            Ok(slot) => PendingRead::Issued(slot.submit(container.to_path_buf(), offset, len, buffer)),
            // A full pool must never stall a running job: read directly instead.
            Err(_) => PendingRead::Finished(
                read_path_range_into(container, offset, len, &mut buffer).map(|()| buffer),
            ),
        }
    }

    fn wait(self) -> Result<Vec<u8>, ReadError> {
        match self {
            PendingRead::Issued(request) => request.wait(),
            PendingRead::Finished(result) => result,
        }
    }
}

/// Reads `input` in chunks and decompresses it, keeping the read of the next chunk in
/// flight while the current chunk is being decompressed.
///
/// `buffers` are the two staging buffers chunks are read into alternately.
pub fn decompress_streamed(
    reads: &ReadPool,
    input: &StreamInput,
    buffers: [Vec<u8>; 2],
    decompressor: &mut dyn Decompressor,
    output: &mut Vec<u8>,
    cancel: &Cancellation<'_>,
) -> Result<(), DecodeError> {
    let chunk = input.chunk.max(1) as u64;
    let [first, second] = buffers;
    let mut spare = Some(second);

    let mut position = chunk.min(input.length);
    let mut current = PendingRead::issue(reads, &input.container, input.offset, position, first);
    let mut progress;

    loop {
        if cancel.is_cancelled() {
            return Err(DecodeError::Cancelled);
        }
        let data = current.wait()?;

        let next = (position < input.length).then(|| {
            let len = chunk.min(input.length - position);
            let read = PendingRead::issue(
                reads,
                &input.container,
                input.offset + position,
                len,
                spare.take().unwrap_or_default(),
            );
            position += len;
            read
        });

        progress = decompressor.decompress(&data, output)?;
        spare = Some(data);

        match next {
            Some(read) => current = read,
            None => break,
        }
    }

    finish(decompressor, progress, output).map_err(DecodeError::from)
}
