//! Splits ingested text into overlapping fixed-width windows for embedding.
//!
//! Windows are measured in characters (Unicode scalar values), never bytes, so a
//! window never ends inside a code point. No trimming or boundary detection is
//! done; a chunk is exactly `text[i..i + window_size]` for `i = 0, stride, 2 * stride, ...`.

use thiserror::Error;

/// Default window size in characters.
pub const DEFAULT_WINDOW_SIZE: usize = 500;
/// Default distance between window starts. With the default window this leaves a
/// 50-character overlap between neighbouring chunks.
pub const DEFAULT_STRIDE: usize = 450;

/// How raw text is cut into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPolicy {
    window_size: usize,
    stride: usize,
}

impl ChunkPolicy {
    /// Both values must be positive and `stride <= window_size`, otherwise
    /// some characters would fall between windows.
    pub fn new(window_size: usize, stride: usize) -> Result<Self, ChunkError> {
        if window_size == 0 {
            return Err(ChunkError::ZeroWindow);
        }
        if stride == 0 {
            return Err(ChunkError::ZeroStride);
        }
        if stride > window_size {
            return Err(ChunkError::StrideExceedsWindow { window_size, stride });
        }
        Ok(Self { window_size, stride })
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Characters shared by two neighbouring windows.
    pub fn overlap(&self) -> usize {
        self.window_size - self.stride
    }

    /// Split `text` into windows. Empty text gives no chunks; the last window may be short.
    pub fn split(&self, text: &str) -> Vec<String> {
        // Byte offset of every char boundary, including the end of the string.
        let bounds: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let char_len = bounds.len() - 1;

        (0..char_len)
            .step_by(self.stride)
            .map(|start| {
                let end = (start + self.window_size).min(char_len);
                text[bounds[start]..bounds[end]].to_string()
            })
            .collect()
    }
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            stride: DEFAULT_STRIDE,
        }
    }
}

/// Split `text` with an explicit window and stride.
pub fn chunk_text(
    text: &str,
    window_size: usize,
    stride: usize,
) -> Result<Vec<String>, ChunkError> {
    Ok(ChunkPolicy::new(window_size, stride)?.split(text))
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("window size must be positive")]
    ZeroWindow,
    #[error("stride must be positive")]
    ZeroStride,
    #[error("stride {stride} exceeds window size {window_size}; text between windows is lost")]
    StrideExceedsWindow { window_size: usize, stride: usize },
}
