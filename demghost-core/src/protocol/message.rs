//! Typed server messages and the block-level decoder/encoder.

use bitflags::bitflags;

use super::entity::{EntityUpdate, SpawnBaseline, SpawnStatic};
use super::passthrough::{skip_body, SkipError};
use super::wire::{MessageReader, MessageWriter, ReadResult};
use super::{ServerCommand, FAST_UPDATE_BIT, PROTOCOL_NETQUAKE};
use crate::error::DemoError;

// =============================================================================
// Records
// =============================================================================

/// One decoded server command
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// Level boundary; exactly one per demo
    ServerInfo(ServerInfo),
    /// Initial state of an entity (svc_spawnbaseline)
    Baseline(SpawnBaseline),
    /// Fast update of an entity's fields
    EntityUpdate(EntityUpdate),
    /// Local player status (svc_clientdata)
    PlayerState(ClientData),
    /// Non-moving world decoration carrying a model index
    SpawnStatic(SpawnStatic),
    /// Binds the camera to an entity
    SetView(u16),
    /// Server time of the message, in seconds
    Time(f32),
    /// Anything else, replayed byte for byte
    Opaque(Opaque),
}

impl Record {
    pub fn write(&self, w: &mut MessageWriter) {
        match self {
            Record::EntityUpdate(u) => u.write(w),
            Record::Opaque(o) => {
                w.write_u8(o.tag);
                w.write_bytes(&o.body);
            }
            Record::ServerInfo(info) => {
                w.write_u8(ServerCommand::ServerInfo.as_byte());
                info.write(w);
            }
            Record::Baseline(b) => {
                w.write_u8(ServerCommand::SpawnBaseline.as_byte());
                b.write(w);
            }
            Record::PlayerState(cd) => {
                w.write_u8(ServerCommand::ClientData.as_byte());
                cd.write(w);
            }
            Record::SpawnStatic(s) => {
                w.write_u8(ServerCommand::SpawnStatic.as_byte());
                s.write(w);
            }
            Record::SetView(entity) => {
                w.write_u8(ServerCommand::SetView.as_byte());
                w.write_u16(*entity);
            }
            Record::Time(t) => {
                w.write_u8(ServerCommand::Time.as_byte());
                w.write_f32(*t);
            }
        }
    }
}

/// A command kept as raw bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opaque {
    pub tag: u8,
    /// Everything after the tag byte
    pub body: Vec<u8>,
}

// =============================================================================
// Server info
// =============================================================================

/// svc_serverinfo
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerInfo {
    pub protocol: i32,
    pub max_clients: u8,
    pub game_type: u8,
    pub level_name: Vec<u8>,
    /// Model precache; model index `n` refers to `models[n - 1]`
    pub models: Vec<Vec<u8>>,
    pub sounds: Vec<Vec<u8>>,
}

impl ServerInfo {
    fn read(r: &mut MessageReader, tag: u8, start: usize) -> Result<Self, DemoError> {
        let malformed = |_| DemoError::MalformedRecord { tag, offset: start };

        let protocol = r.read_i32().map_err(malformed)?;
        if protocol != PROTOCOL_NETQUAKE {
            return Err(DemoError::UnsupportedProtocol(protocol));
        }
        let max_clients = r.read_u8().map_err(malformed)?;
        let game_type = r.read_u8().map_err(malformed)?;
        let level_name = r.read_string().map_err(malformed)?;
        let models = read_string_list(r).map_err(malformed)?;
        let sounds = read_string_list(r).map_err(malformed)?;

        Ok(ServerInfo {
            protocol,
            max_clients,
            game_type,
            level_name,
            models,
            sounds,
        })
    }

    fn write(&self, w: &mut MessageWriter) {
        w.write_i32(self.protocol);
        w.write_u8(self.max_clients);
        w.write_u8(self.game_type);
        w.write_string(&self.level_name);
        for list in [&self.models, &self.sounds] {
            for name in list {
                w.write_string(name);
            }
            w.write_string(b"");
        }
    }

    /// The world model, e.g. `maps/e1m1.bsp`
    pub fn map(&self) -> Option<&[u8]> {
        self.models.first().map(Vec::as_slice)
    }
}

fn read_string_list(r: &mut MessageReader) -> ReadResult<Vec<Vec<u8>>> {
    let mut list = Vec::new();
    loop {
        let name = r.read_string()?;
        if name.is_empty() {
            return Ok(list);
        }
        list.push(name);
    }
}

// =============================================================================
// Client data
// =============================================================================

bitflags! {
    /// svc_clientdata field mask
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ClientDataFlags: u16 {
        const VIEWHEIGHT = 1 << 0;
        const IDEALPITCH = 1 << 1;
        const PUNCH1 = 1 << 2;
        const PUNCH2 = 1 << 3;
        const PUNCH3 = 1 << 4;
        const VELOCITY1 = 1 << 5;
        const VELOCITY2 = 1 << 6;
        const VELOCITY3 = 1 << 7;
        const AIMENT = 1 << 8;
        /// Items are always sent regardless of this bit
        const ITEMS = 1 << 9;
        const ONGROUND = 1 << 10;
        const INWATER = 1 << 11;
        const WEAPONFRAME = 1 << 12;
        const ARMOR = 1 << 13;
        const WEAPON = 1 << 14;
    }
}

impl ClientDataFlags {
    const PUNCH: [ClientDataFlags; 3] = [
        ClientDataFlags::PUNCH1,
        ClientDataFlags::PUNCH2,
        ClientDataFlags::PUNCH3,
    ];
    const VELOCITY: [ClientDataFlags; 3] = [
        ClientDataFlags::VELOCITY1,
        ClientDataFlags::VELOCITY2,
        ClientDataFlags::VELOCITY3,
    ];
    const FIELDS: ClientDataFlags = ClientDataFlags::VIEWHEIGHT
        .union(ClientDataFlags::IDEALPITCH)
        .union(ClientDataFlags::PUNCH1)
        .union(ClientDataFlags::PUNCH2)
        .union(ClientDataFlags::PUNCH3)
        .union(ClientDataFlags::VELOCITY1)
        .union(ClientDataFlags::VELOCITY2)
        .union(ClientDataFlags::VELOCITY3)
        .union(ClientDataFlags::WEAPONFRAME)
        .union(ClientDataFlags::ARMOR)
        .union(ClientDataFlags::WEAPON);
}

/// svc_clientdata: status of the player the demo was recorded from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClientData {
    /// Mask as recorded; field bits are recomputed on encode
    pub flags: ClientDataFlags,
    pub view_height: Option<i8>,
    pub ideal_pitch: Option<i8>,
    pub punch_angle: [Option<i8>; 3],
    /// Velocity in 16 unit steps
    pub velocity: [Option<i8>; 3],
    pub items: i32,
    pub weapon_frame: Option<u8>,
    pub armor: Option<u8>,
    pub weapon: Option<u8>,
    pub health: i16,
    pub ammo: u8,
    /// Shells, nails, rockets, cells
    pub ammo_counts: [u8; 4],
    pub active_weapon: u8,
}

impl ClientData {
    fn read(r: &mut MessageReader) -> ReadResult<Self> {
        let flags = ClientDataFlags::from_bits_retain(r.read_u16()?);
        let mut cd = ClientData {
            flags,
            ..Default::default()
        };

        fn char_if(
            r: &mut MessageReader,
            flags: ClientDataFlags,
            flag: ClientDataFlags,
        ) -> ReadResult<Option<i8>> {
            if flags.contains(flag) {
                r.read_i8().map(Some)
            } else {
                Ok(None)
            }
        }

        cd.view_height = char_if(r, flags, ClientDataFlags::VIEWHEIGHT)?;
        cd.ideal_pitch = char_if(r, flags, ClientDataFlags::IDEALPITCH)?;
        for i in 0..3 {
            cd.punch_angle[i] = char_if(r, flags, ClientDataFlags::PUNCH[i])?;
            cd.velocity[i] = char_if(r, flags, ClientDataFlags::VELOCITY[i])?;
        }

        cd.items = r.read_i32()?;
        for (flag, slot) in [
            (ClientDataFlags::WEAPONFRAME, &mut cd.weapon_frame),
            (ClientDataFlags::ARMOR, &mut cd.armor),
            (ClientDataFlags::WEAPON, &mut cd.weapon),
        ] {
            if flags.contains(flag) {
                *slot = Some(r.read_u8()?);
            }
        }
        cd.health = r.read_i16()?;
        cd.ammo = r.read_u8()?;
        for count in cd.ammo_counts.iter_mut() {
            *count = r.read_u8()?;
        }
        cd.active_weapon = r.read_u8()?;
        Ok(cd)
    }

    /// The mask that will actually go on the wire
    pub fn wire_flags(&self) -> ClientDataFlags {
        let mut bits = self.flags - ClientDataFlags::FIELDS;
        bits.set(ClientDataFlags::VIEWHEIGHT, self.view_height.is_some());
        bits.set(ClientDataFlags::IDEALPITCH, self.ideal_pitch.is_some());
        for i in 0..3 {
            bits.set(ClientDataFlags::PUNCH[i], self.punch_angle[i].is_some());
            bits.set(ClientDataFlags::VELOCITY[i], self.velocity[i].is_some());
        }
        bits.set(ClientDataFlags::WEAPONFRAME, self.weapon_frame.is_some());
        bits.set(ClientDataFlags::ARMOR, self.armor.is_some());
        bits.set(ClientDataFlags::WEAPON, self.weapon.is_some());
        bits
    }

    fn write(&self, w: &mut MessageWriter) {
        w.write_u16(self.wire_flags().bits());
        for v in [self.view_height, self.ideal_pitch].into_iter().flatten() {
            w.write_i8(v);
        }
        for i in 0..3 {
            if let Some(p) = self.punch_angle[i] {
                w.write_i8(p);
            }
            if let Some(v) = self.velocity[i] {
                w.write_i8(v);
            }
        }
        w.write_i32(self.items);
        for v in [self.weapon_frame, self.armor, self.weapon].into_iter().flatten() {
            w.write_u8(v);
        }
        w.write_i16(self.health);
        w.write_u8(self.ammo);
        w.write_bytes(&self.ammo_counts);
        w.write_u8(self.active_weapon);
    }
}

// =============================================================================
// Block decoding / encoding
// =============================================================================

/// Decode one block's message bytes into records
pub fn decode_block(payload: &[u8]) -> Result<Vec<Record>, DemoError> {
    let mut r = MessageReader::new(payload);
    let mut records = Vec::new();
    while !r.is_empty() {
        let start = r.position();
        let tag = r
            .read_u8()
            .map_err(|_| DemoError::MalformedRecord { tag: 0, offset: start })?;
        records.push(decode_record(tag, start, &mut r)?);
    }
    Ok(records)
}

fn decode_record(tag: u8, start: usize, r: &mut MessageReader) -> Result<Record, DemoError> {
    let malformed = |_| DemoError::MalformedRecord { tag, offset: start };

    if tag & FAST_UPDATE_BIT != 0 {
        return EntityUpdate::read(tag, r)
            .map(Record::EntityUpdate)
            .map_err(malformed);
    }

    let cmd = ServerCommand::from_byte(tag).ok_or(DemoError::UnsupportedRecordVariant {
        tag,
        offset: start,
    })?;
    let record = match cmd {
        ServerCommand::Time => Record::Time(r.read_f32().map_err(malformed)?),
        ServerCommand::SetView => Record::SetView(r.read_u16().map_err(malformed)?),
        ServerCommand::ServerInfo => Record::ServerInfo(ServerInfo::read(r, tag, start)?),
        ServerCommand::ClientData => {
            Record::PlayerState(ClientData::read(r).map_err(malformed)?)
        }
        ServerCommand::SpawnStatic => {
            Record::SpawnStatic(SpawnStatic::read(r).map_err(malformed)?)
        }
        ServerCommand::SpawnBaseline => {
            Record::Baseline(SpawnBaseline::read(r).map_err(malformed)?)
        }
        _ => {
            skip_body(cmd, start, r).map_err(|e| match e {
                SkipError::Short(_) => DemoError::MalformedRecord { tag, offset: start },
                SkipError::Unsupported { tag, offset } => {
                    DemoError::UnsupportedRecordVariant { tag, offset }
                }
            })?;
            Record::Opaque(Opaque {
                tag,
                body: r.since(start + 1).to_vec(),
            })
        }
    };
    Ok(record)
}

/// Encode records back into message bytes
pub fn encode_records(records: &[Record]) -> Vec<u8> {
    let mut w = MessageWriter::new();
    for record in records {
        record.write(&mut w);
    }
    w.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::entity::EntityState;

    fn server_info_bytes(protocol: i32) -> Vec<u8> {
        let mut w = MessageWriter::new();
        w.write_u8(ServerCommand::ServerInfo.as_byte());
        w.write_i32(protocol);
        w.write_u8(1);
        w.write_u8(0);
        w.write_string(b"The Slipgate Complex");
        w.write_string(b"maps/e1m1.bsp");
        w.write_string(b"progs/player.mdl");
        w.write_string(b"");
        w.write_string(b"weapons/ric1.wav");
        w.write_string(b"");
        w.into_bytes()
    }

    #[test]
    fn test_decode_server_info() {
        let bytes = server_info_bytes(15);
        let records = decode_block(&bytes).unwrap();
        assert_eq!(records.len(), 1);
        match &records[0] {
            Record::ServerInfo(info) => {
                assert_eq!(info.max_clients, 1);
                assert_eq!(info.map(), Some(&b"maps/e1m1.bsp"[..]));
                assert_eq!(info.models.len(), 2);
                assert_eq!(info.sounds, vec![b"weapons/ric1.wav".to_vec()]);
            }
            other => panic!("unexpected record {:?}", other),
        }
        assert_eq!(encode_records(&records), bytes);
    }

    #[test]
    fn test_other_protocol_rejected() {
        let bytes = server_info_bytes(666);
        assert_eq!(
            decode_block(&bytes),
            Err(DemoError::UnsupportedProtocol(666))
        );
    }

    #[test]
    fn test_mixed_block_roundtrip() {
        let mut w = MessageWriter::new();
        // time
        w.write_u8(7);
        w.write_f32(12.5);
        // sound with volume
        w.write_bytes(&[6, 1, 200, 0x0b, 0x00, 3, 1, 0, 2, 0, 3, 0]);
        // print
        w.write_u8(8);
        w.write_string(b"You got the shells\n");
        // temp entity explosion
        w.write_bytes(&[23, 3, 0, 1, 0, 2, 0, 3]);
        // setview
        w.write_bytes(&[5, 1, 0]);
        // fast update, origin x for entity 1
        w.write_bytes(&[0x82, 0x01, 0x40, 0x00]);
        // baseline
        w.write_u8(22);
        SpawnBaseline {
            entity: 1,
            state: EntityState::default(),
        }
        .write(&mut w);
        let bytes = w.into_bytes();

        let records = decode_block(&bytes).unwrap();
        assert_eq!(records.len(), 7);
        assert_eq!(records[0], Record::Time(12.5));
        assert!(matches!(&records[1], Record::Opaque(o) if o.tag == 6 && o.body.len() == 11));
        assert!(matches!(&records[2], Record::Opaque(o) if o.tag == 8));
        assert!(matches!(&records[3], Record::Opaque(o) if o.tag == 23 && o.body.len() == 7));
        assert_eq!(records[4], Record::SetView(1));
        assert!(matches!(&records[5], Record::EntityUpdate(u) if u.origin[0] == Some(64)));
        assert!(matches!(&records[6], Record::Baseline(b) if b.entity == 1));
        assert_eq!(encode_records(&records), bytes);
    }

    #[test]
    fn test_client_data_roundtrip() {
        let cd = ClientData {
            flags: ClientDataFlags::ITEMS | ClientDataFlags::ONGROUND,
            view_height: Some(22),
            punch_angle: [Some(-2), None, None],
            velocity: [Some(10), Some(-3), None],
            items: 0x1001,
            weapon: Some(2),
            health: 100,
            ammo: 25,
            ammo_counts: [25, 0, 0, 0],
            active_weapon: 1,
            ..Default::default()
        };
        let bytes = encode_records(&[Record::PlayerState(cd)]);
        let records = decode_block(&bytes).unwrap();
        // decoded mask carries the field bits the encoder derived
        let expected = ClientData {
            flags: cd.wire_flags(),
            ..cd
        };
        assert_eq!(records, vec![Record::PlayerState(expected)]);
        assert_eq!(encode_records(&records), bytes);
        // tag, mask, 4 chars, items, weapon, health, ammo, counts, active weapon
        assert_eq!(bytes.len(), 1 + 2 + 4 + 4 + 1 + 2 + 1 + 4 + 1);
    }

    #[test]
    fn test_truncated_record() {
        // svc_time missing its last byte
        let bytes = [7, 0, 0, 0x80];
        assert_eq!(
            decode_block(&bytes),
            Err(DemoError::MalformedRecord { tag: 7, offset: 0 })
        );
    }

    #[test]
    fn test_unknown_tag() {
        let bytes = [1, 1, 0x50, 0xaa];
        assert_eq!(
            decode_block(&bytes),
            Err(DemoError::UnsupportedRecordVariant { tag: 0x50, offset: 2 })
        );
    }

    #[test]
    fn test_bad_command() {
        assert_eq!(
            decode_block(&[0]),
            Err(DemoError::UnsupportedRecordVariant { tag: 0, offset: 0 })
        );
    }
}
