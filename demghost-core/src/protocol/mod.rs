//! NetQuake (protocol 15) server message parsing and formatting.
//!
//! All functions are pure (no I/O): `&[u8]` → `Result<Vec<Record>>` and back.
//!
//! # Structure
//!
//! - [`wire`] - little-endian read cursor and writer
//! - [`entity`] - entity state, baselines, static entities and fast updates
//! - [`message`] - the [`Record`] enumeration, block decoding and encoding
//! - [`passthrough`] - implicit-length rules for commands kept as opaque bytes
//!
//! # Example
//!
//! ```rust
//! use demghost_core::protocol::{decode_block, encode_records, Record};
//!
//! let payload = [0x07, 0x00, 0x00, 0x80, 0x3f, 0x01]; // svc_time 1.0, svc_nop
//! let records = decode_block(&payload).unwrap();
//! assert_eq!(records[0], Record::Time(1.0));
//! assert_eq!(encode_records(&records), payload.to_vec());
//! ```

pub mod entity;
pub mod message;
pub mod passthrough;
pub mod wire;

pub use entity::{EntityState, EntityUpdate, SpawnBaseline, SpawnStatic, UpdateFlags};
pub use message::{
    decode_block, encode_records, ClientData, ClientDataFlags, Opaque, Record, ServerInfo,
};

// =============================================================================
// Constants
// =============================================================================

/// The only protocol version this crate understands
pub const PROTOCOL_NETQUAKE: i32 = 15;

/// Entity table size used when nothing else is configured
pub const DEFAULT_MAX_ENTITIES: usize = 8192;

/// Model indices are a single byte and index 0 means "no model"
pub const MAX_MODELS: usize = 255;

/// Largest server message the classic client accepts
pub const MAX_MESSAGE_LEN: usize = 8000;

/// Server command tag bit marking a fast entity update
pub const FAST_UPDATE_BIT: u8 = 0x80;

// =============================================================================
// Server commands
// =============================================================================

/// Server-to-client command tags (protocol 15)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerCommand {
    Bad = 0,
    Nop = 1,
    Disconnect = 2,
    UpdateStat = 3,
    Version = 4,
    SetView = 5,
    Sound = 6,
    Time = 7,
    Print = 8,
    StuffText = 9,
    SetAngle = 10,
    ServerInfo = 11,
    LightStyle = 12,
    UpdateName = 13,
    UpdateFrags = 14,
    ClientData = 15,
    StopSound = 16,
    UpdateColors = 17,
    Particle = 18,
    Damage = 19,
    SpawnStatic = 20,
    SpawnBinary = 21,
    SpawnBaseline = 22,
    TempEntity = 23,
    SetPause = 24,
    SignonNum = 25,
    CenterPrint = 26,
    KilledMonster = 27,
    FoundSecret = 28,
    SpawnStaticSound = 29,
    Intermission = 30,
    Finale = 31,
    CdTrack = 32,
    SellScreen = 33,
    Cutscene = 34,
}

impl ServerCommand {
    pub fn from_byte(tag: u8) -> Option<Self> {
        use ServerCommand::*;
        Some(match tag {
            0 => Bad,
            1 => Nop,
            2 => Disconnect,
            3 => UpdateStat,
            4 => Version,
            5 => SetView,
            6 => Sound,
            7 => Time,
            8 => Print,
            9 => StuffText,
            10 => SetAngle,
            11 => ServerInfo,
            12 => LightStyle,
            13 => UpdateName,
            14 => UpdateFrags,
            15 => ClientData,
            16 => StopSound,
            17 => UpdateColors,
            18 => Particle,
            19 => Damage,
            20 => SpawnStatic,
            21 => SpawnBinary,
            22 => SpawnBaseline,
            23 => TempEntity,
            24 => SetPause,
            25 => SignonNum,
            26 => CenterPrint,
            27 => KilledMonster,
            28 => FoundSecret,
            29 => SpawnStaticSound,
            30 => Intermission,
            31 => Finale,
            32 => CdTrack,
            33 => SellScreen,
            34 => Cutscene,
            _ => return None,
        })
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Helper to display a raw protocol string
pub fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
