//! Chunk planning for multipart uploads

use checkpoint_core::{Chunk, Error, Result};

/// Split `[0, total_size)` into contiguous chunks of `chunk_size` bytes
///
/// The last chunk may be shorter. A zero-byte payload still yields one
/// empty chunk so that every multipart upload carries at least one part.
pub fn plan_chunks(total_size: u64, chunk_size: u64) -> Result<Vec<Chunk>> {
    if chunk_size == 0 {
        return Err(Error::InvalidConfig {
            message: "chunk_size must be greater than zero".to_string(),
        });
    }

    if total_size == 0 {
        return Ok(vec![Chunk {
            index: 0,
            offset: 0,
            length: 0,
        }]);
    }

    let count = total_size.div_ceil(chunk_size) as usize;
    let mut chunks = Vec::with_capacity(count);
    let mut offset = 0;

    while offset < total_size {
        let length = chunk_size.min(total_size - offset);
        chunks.push(Chunk {
            index: chunks.len(),
            offset,
            length,
        });
        offset += length;
    }

    Ok(chunks)
}
