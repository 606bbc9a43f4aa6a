//! Implicit-length rules for the commands the merger doesn't interpret.
//!
//! None of these commands carry an explicit length, so skipping one means
//! knowing its layout. The bytes are kept verbatim and written back as-is.

use super::wire::{MessageReader, ShortRead};
use super::ServerCommand;

/// Why a command's body could not be skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipError {
    Short(ShortRead),
    /// Layout unknown; carries the offending tag and where it starts
    Unsupported { tag: u8, offset: usize },
}

impl From<ShortRead> for SkipError {
    fn from(e: ShortRead) -> Self {
        SkipError::Short(e)
    }
}

const COORD: usize = 2;
const POSITION: usize = 3 * COORD;

/// Temp entity sub-types (svc_temp_entity)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TempEntityKind {
    Spike = 0,
    SuperSpike = 1,
    Gunshot = 2,
    Explosion = 3,
    TarExplosion = 4,
    Lightning1 = 5,
    Lightning2 = 6,
    WizSpike = 7,
    KnightSpike = 8,
    Lightning3 = 9,
    LavaSplash = 10,
    Teleport = 11,
    Explosion2 = 12,
    Beam = 13,
}

impl TempEntityKind {
    pub fn from_byte(v: u8) -> Option<Self> {
        use TempEntityKind::*;
        Some(match v {
            0 => Spike,
            1 => SuperSpike,
            2 => Gunshot,
            3 => Explosion,
            4 => TarExplosion,
            5 => Lightning1,
            6 => Lightning2,
            7 => WizSpike,
            8 => KnightSpike,
            9 => Lightning3,
            10 => LavaSplash,
            11 => Teleport,
            12 => Explosion2,
            13 => Beam,
            _ => return None,
        })
    }

    /// Body size after the sub-type byte
    pub fn body_len(self) -> usize {
        use TempEntityKind::*;
        match self {
            Spike | SuperSpike | Gunshot | Explosion | TarExplosion | WizSpike | KnightSpike
            | LavaSplash | Teleport => POSITION,
            // owning entity, start, end
            Lightning1 | Lightning2 | Lightning3 | Beam => 2 + 2 * POSITION,
            // position, colour start, colour length
            Explosion2 => POSITION + 2,
        }
    }
}

/// Sound field mask bits (svc_sound)
const SND_VOLUME: u8 = 1 << 0;
const SND_ATTENUATION: u8 = 1 << 1;

/// Advance `r` past the body of `cmd`, whose tag byte started at `start`
pub fn skip_body(cmd: ServerCommand, start: usize, r: &mut MessageReader) -> Result<(), SkipError> {
    use ServerCommand::*;
    match cmd {
        Nop | Disconnect | KilledMonster | FoundSecret | Intermission | SellScreen => {}
        SetPause | SignonNum => r.skip(1)?,
        SetView | StopSound | UpdateColors | CdTrack => r.skip(2)?,
        SetAngle | UpdateFrags => r.skip(3)?,
        Version | Time => r.skip(4)?,
        UpdateStat => r.skip(5)?,
        // armor, blood, origin
        Damage => r.skip(2 + POSITION)?,
        // origin, sound, volume, attenuation
        SpawnStaticSound => r.skip(POSITION + 3)?,
        // origin, direction, count, colour
        Particle => r.skip(POSITION + 3 + 2)?,
        Print | StuffText | CenterPrint | Finale | Cutscene => r.skip_string()?,
        LightStyle | UpdateName => {
            r.skip(1)?;
            r.skip_string()?;
        }
        Sound => {
            let mask = r.read_u8()?;
            if mask & SND_VOLUME != 0 {
                r.skip(1)?;
            }
            if mask & SND_ATTENUATION != 0 {
                r.skip(1)?;
            }
            // channel, sound number, origin
            r.skip(2 + 1 + POSITION)?;
        }
        TempEntity => {
            let sub = r.read_u8()?;
            let te = TempEntityKind::from_byte(sub).ok_or(SkipError::Unsupported {
                tag: cmd.as_byte(),
                offset: start,
            })?;
            r.skip(te.body_len())?;
        }
        // Same layout as a baseline minus the entity number
        SpawnStatic => r.skip(4 + POSITION + 3)?,
        SpawnBaseline => r.skip(2 + 4 + POSITION + 3)?,
        ClientData | ServerInfo | Bad | SpawnBinary => {
            return Err(SkipError::Unsupported {
                tag: cmd.as_byte(),
                offset: start,
            })
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_len(cmd: ServerCommand, body: &[u8]) -> Result<usize, SkipError> {
        let mut r = MessageReader::new(body);
        skip_body(cmd, 0, &mut r)?;
        Ok(r.position())
    }

    #[test]
    fn test_fixed_lengths() {
        let zeros = [0u8; 32];
        assert_eq!(body_len(ServerCommand::Nop, &zeros), Ok(0));
        assert_eq!(body_len(ServerCommand::UpdateStat, &zeros), Ok(5));
        assert_eq!(body_len(ServerCommand::Damage, &zeros), Ok(8));
        assert_eq!(body_len(ServerCommand::Particle, &zeros), Ok(11));
        assert_eq!(body_len(ServerCommand::SpawnStaticSound, &zeros), Ok(9));
        assert_eq!(body_len(ServerCommand::SpawnBaseline, &zeros), Ok(15));
    }

    #[test]
    fn test_string_commands() {
        assert_eq!(body_len(ServerCommand::Print, b"hello\n\0rest"), Ok(7));
        assert_eq!(body_len(ServerCommand::LightStyle, b"\x05mmnm\0"), Ok(6));
    }

    #[test]
    fn test_sound_mask() {
        // no optional bytes
        assert_eq!(body_len(ServerCommand::Sound, &[0u8; 16]), Ok(1 + 9));
        // volume and attenuation
        let mut body = [0u8; 16];
        body[0] = SND_VOLUME | SND_ATTENUATION;
        assert_eq!(body_len(ServerCommand::Sound, &body), Ok(1 + 2 + 9));
    }

    #[test]
    fn test_temp_entities() {
        let mut body = [0u8; 32];
        body[0] = TempEntityKind::Gunshot as u8;
        assert_eq!(body_len(ServerCommand::TempEntity, &body), Ok(7));
        body[0] = TempEntityKind::Lightning2 as u8;
        assert_eq!(body_len(ServerCommand::TempEntity, &body), Ok(15));
        body[0] = TempEntityKind::Explosion2 as u8;
        assert_eq!(body_len(ServerCommand::TempEntity, &body), Ok(9));
        body[0] = 99;
        assert_eq!(
            body_len(ServerCommand::TempEntity, &body),
            Err(SkipError::Unsupported { tag: 23, offset: 0 })
        );
    }

    #[test]
    fn test_short_body() {
        assert!(matches!(
            body_len(ServerCommand::UpdateStat, &[1, 2]),
            Err(SkipError::Short(_))
        ));
    }

    #[test]
    fn test_unskippable() {
        assert_eq!(
            body_len(ServerCommand::SpawnBinary, &[]),
            Err(SkipError::Unsupported { tag: 21, offset: 0 })
        );
    }
}
