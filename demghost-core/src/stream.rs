//! A recording with every block decoded into records.

use crate::demo::{DemoFile, RawBlock};
use crate::error::Error;
use crate::protocol::{decode_block, encode_records, Record};

/// One decoded block
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub view_angles: [f32; 3],
    pub records: Vec<Record>,
}

impl Block {
    /// Timestamp of the block, from a leading `Time` record
    pub fn time(&self) -> Option<f32> {
        match self.records.first() {
            Some(Record::Time(t)) => Some(*t),
            _ => None,
        }
    }

    pub fn has_baseline(&self) -> bool {
        self.records.iter().any(|r| matches!(r, Record::Baseline(_)))
    }

    pub fn has_server_info(&self) -> bool {
        self.records.iter().any(|r| matches!(r, Record::ServerInfo(_)))
    }
}

/// A decoded recording
#[derive(Debug, Clone, PartialEq)]
pub struct Stream {
    pub cd_track: Vec<u8>,
    pub blocks: Vec<Block>,
}

impl Stream {
    /// Frame and decode a whole file. Errors carry the block index.
    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        Self::decode(DemoFile::read(bytes)?)
    }

    pub fn decode(file: DemoFile) -> Result<Self, Error> {
        let blocks = file
            .blocks
            .into_iter()
            .enumerate()
            .map(|(index, raw)| {
                let records =
                    decode_block(&raw.payload).map_err(|kind| Error::in_block(index, kind))?;
                Ok(Block {
                    view_angles: raw.view_angles,
                    records,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        Ok(Stream {
            cd_track: file.cd_track,
            blocks,
        })
    }

    pub fn encode(&self) -> DemoFile {
        DemoFile {
            cd_track: self.cd_track.clone(),
            blocks: self
                .blocks
                .iter()
                .map(|b| RawBlock {
                    view_angles: b.view_angles,
                    payload: encode_records(&b.records),
                })
                .collect(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        self.encode().write()
    }
}
