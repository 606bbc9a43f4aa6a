//! Demo file framing.
//!
//! A `.dem` file is a CD track line followed by message blocks:
//!
//! ```text
//! ┌──────────────────────────┐
//! │ CD track ("-1\n")        │  ASCII, newline terminated
//! ├──────────────────────────┤
//! │ Block 0                  │  u32 length, 3 × f32 view angles,
//! │ Block 1                  │  `length` bytes of server messages
//! │ ...                      │
//! └──────────────────────────┘
//! ```
//!
//! Nothing here looks inside the message bytes.

use serde::{Deserialize, Serialize};

use crate::error::{DemoError, Error};

/// Size of the fixed part in front of each block
pub const BLOCK_HEADER_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct BlockHeader {
    length: u32,
    view_angles: [f32; 3],
}

/// One block, message bytes still undecoded
#[derive(Debug, Clone, PartialEq)]
pub struct RawBlock {
    /// Client view angles (pitch, yaw, roll) in degrees
    pub view_angles: [f32; 3],
    pub payload: Vec<u8>,
}

/// A whole demo file split into blocks
#[derive(Debug, Clone, PartialEq)]
pub struct DemoFile {
    /// CD track line without its newline
    pub cd_track: Vec<u8>,
    pub blocks: Vec<RawBlock>,
}

impl DemoFile {
    /// Split `bytes` into blocks
    pub fn read(bytes: &[u8]) -> Result<Self, Error> {
        let newline = bytes
            .iter()
            .position(|&b| b == b'\n')
            .ok_or(DemoError::InvalidHeader)?;
        let cd_track = bytes[..newline].to_vec();

        let mut pos = newline + 1;
        let mut blocks = Vec::new();
        while pos < bytes.len() {
            let index = blocks.len();
            let truncated = |needed: usize| {
                Error::in_block(
                    index,
                    DemoError::TruncatedInput {
                        offset: pos,
                        needed,
                        available: bytes.len() - pos,
                    },
                )
            };

            if bytes.len() - pos < BLOCK_HEADER_SIZE {
                return Err(truncated(BLOCK_HEADER_SIZE));
            }
            let header: BlockHeader = bincode::deserialize(&bytes[pos..pos + BLOCK_HEADER_SIZE])
                .map_err(|e| Error::in_block(index, e.into()))?;

            let length = header.length as usize;
            if bytes.len() - pos - BLOCK_HEADER_SIZE < length {
                return Err(truncated(BLOCK_HEADER_SIZE + length));
            }
            let start = pos + BLOCK_HEADER_SIZE;
            blocks.push(RawBlock {
                view_angles: header.view_angles,
                payload: bytes[start..start + length].to_vec(),
            });
            pos = start + length;
        }

        Ok(DemoFile { cd_track, blocks })
    }

    /// Serialize, recomputing every block length
    pub fn write(&self) -> Result<Vec<u8>, Error> {
        let total: usize = self
            .blocks
            .iter()
            .map(|b| BLOCK_HEADER_SIZE + b.payload.len())
            .sum();
        let mut out = Vec::with_capacity(self.cd_track.len() + 1 + total);
        out.extend_from_slice(&self.cd_track);
        out.push(b'\n');

        for (index, block) in self.blocks.iter().enumerate() {
            let header = BlockHeader {
                length: block.payload.len() as u32,
                view_angles: block.view_angles,
            };
            bincode::serialize_into(&mut out, &header)
                .map_err(|e| Error::in_block(index, e.into()))?;
            out.extend_from_slice(&block.payload);
        }
        Ok(out)
    }
}
