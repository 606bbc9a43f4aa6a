//! Entity state and the three commands that carry it: baselines, static
//! entities and fast updates.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use super::wire::{MessageReader, MessageWriter, ReadResult};
use super::FAST_UPDATE_BIT;

bitflags! {
    /// Fast update field mask. The low byte shares the command tag with
    /// [`FAST_UPDATE_BIT`](super::FAST_UPDATE_BIT).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct UpdateFlags: u16 {
        /// A second mask byte follows
        const MOREBITS = 1 << 0;
        const ORIGIN1 = 1 << 1;
        const ORIGIN2 = 1 << 2;
        const ORIGIN3 = 1 << 3;
        const ANGLE2 = 1 << 4;
        /// Don't interpolate from the previous position
        const NOLERP = 1 << 5;
        const FRAME = 1 << 6;
        /// Always set on the wire, marks the tag as a fast update
        const SIGNAL = 1 << 7;
        const ANGLE1 = 1 << 8;
        const ANGLE3 = 1 << 9;
        const MODEL = 1 << 10;
        const COLORMAP = 1 << 11;
        const SKIN = 1 << 12;
        const EFFECTS = 1 << 13;
        /// Entity number is a short instead of a byte
        const LONGENTITY = 1 << 14;
    }
}

impl UpdateFlags {
    /// Bits that announce a field on the wire
    pub const FIELDS: UpdateFlags = UpdateFlags::ORIGIN1
        .union(UpdateFlags::ORIGIN2)
        .union(UpdateFlags::ORIGIN3)
        .union(UpdateFlags::ANGLE1)
        .union(UpdateFlags::ANGLE2)
        .union(UpdateFlags::ANGLE3)
        .union(UpdateFlags::FRAME)
        .union(UpdateFlags::MODEL)
        .union(UpdateFlags::COLORMAP)
        .union(UpdateFlags::SKIN)
        .union(UpdateFlags::EFFECTS);

    const ORIGINS: [UpdateFlags; 3] = [
        UpdateFlags::ORIGIN1,
        UpdateFlags::ORIGIN2,
        UpdateFlags::ORIGIN3,
    ];
    const ANGLES: [UpdateFlags; 3] = [
        UpdateFlags::ANGLE1,
        UpdateFlags::ANGLE2,
        UpdateFlags::ANGLE3,
    ];
}

/// Everything the protocol says about where an entity is and how it looks.
///
/// Origin and angles stay in their wire quantisation (1/8 unit coords,
/// 256-step angles) so that re-encoding never loses a bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityState {
    pub model: u8,
    pub frame: u8,
    pub colormap: u8,
    pub skin: u8,
    pub effects: u8,
    pub origin: [i16; 3],
    pub angles: [u8; 3],
}

impl EntityState {
    // Baselines and statics share this layout; effects are not sent.
    fn read(r: &mut MessageReader) -> ReadResult<Self> {
        let mut state = EntityState {
            model: r.read_u8()?,
            frame: r.read_u8()?,
            colormap: r.read_u8()?,
            skin: r.read_u8()?,
            ..Default::default()
        };
        for i in 0..3 {
            state.origin[i] = r.read_i16()?;
            state.angles[i] = r.read_u8()?;
        }
        Ok(state)
    }

    fn write(&self, w: &mut MessageWriter) {
        w.write_u8(self.model);
        w.write_u8(self.frame);
        w.write_u8(self.colormap);
        w.write_u8(self.skin);
        for i in 0..3 {
            w.write_i16(self.origin[i]);
            w.write_u8(self.angles[i]);
        }
    }
}

/// svc_spawnbaseline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnBaseline {
    pub entity: u16,
    pub state: EntityState,
}

impl SpawnBaseline {
    pub fn read(r: &mut MessageReader) -> ReadResult<Self> {
        let entity = r.read_u16()?;
        let state = EntityState::read(r)?;
        Ok(Self { entity, state })
    }

    pub fn write(&self, w: &mut MessageWriter) {
        w.write_u16(self.entity);
        self.state.write(w);
    }
}

/// svc_spawnstatic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnStatic {
    pub state: EntityState,
}

impl SpawnStatic {
    pub fn read(r: &mut MessageReader) -> ReadResult<Self> {
        Ok(Self {
            state: EntityState::read(r)?,
        })
    }

    pub fn write(&self, w: &mut MessageWriter) {
        self.state.write(w);
    }
}

/// Fast entity update: only the fields flagged in the mask are present,
/// the rest come from the entity's baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntityUpdate {
    /// Mask as recorded. Field bits are recomputed from the options below
    /// when encoding; `NOLERP`, `MOREBITS` and `LONGENTITY` are kept.
    pub flags: UpdateFlags,
    pub entity: u16,
    pub model: Option<u8>,
    pub frame: Option<u8>,
    pub colormap: Option<u8>,
    pub skin: Option<u8>,
    pub effects: Option<u8>,
    pub origin: [Option<i16>; 3],
    pub angles: [Option<u8>; 3],
}

impl EntityUpdate {
    /// Decode the body of a fast update whose tag byte was `tag`
    pub fn read(tag: u8, r: &mut MessageReader) -> ReadResult<Self> {
        let mut bits = (tag & !FAST_UPDATE_BIT) as u16;
        if bits & UpdateFlags::MOREBITS.bits() != 0 {
            bits |= (r.read_u8()? as u16) << 8;
        }
        let flags = UpdateFlags::from_bits_retain(bits);

        let entity = if flags.contains(UpdateFlags::LONGENTITY) {
            r.read_u16()?
        } else {
            r.read_u8()? as u16
        };

        let mut update = EntityUpdate {
            flags,
            entity,
            ..Default::default()
        };
        fn byte_if(
            r: &mut MessageReader,
            flags: UpdateFlags,
            flag: UpdateFlags,
        ) -> ReadResult<Option<u8>> {
            if flags.contains(flag) {
                r.read_u8().map(Some)
            } else {
                Ok(None)
            }
        }

        update.model = byte_if(r, flags, UpdateFlags::MODEL)?;
        update.frame = byte_if(r, flags, UpdateFlags::FRAME)?;
        update.colormap = byte_if(r, flags, UpdateFlags::COLORMAP)?;
        update.skin = byte_if(r, flags, UpdateFlags::SKIN)?;
        update.effects = byte_if(r, flags, UpdateFlags::EFFECTS)?;
        for i in 0..3 {
            if flags.contains(UpdateFlags::ORIGINS[i]) {
                update.origin[i] = Some(r.read_i16()?);
            }
            update.angles[i] = byte_if(r, flags, UpdateFlags::ANGLES[i])?;
        }
        Ok(update)
    }

    /// The mask that will actually go on the wire
    pub fn wire_flags(&self) -> UpdateFlags {
        let mut bits = self.flags - UpdateFlags::FIELDS - UpdateFlags::SIGNAL;
        bits.set(UpdateFlags::MODEL, self.model.is_some());
        bits.set(UpdateFlags::FRAME, self.frame.is_some());
        bits.set(UpdateFlags::COLORMAP, self.colormap.is_some());
        bits.set(UpdateFlags::SKIN, self.skin.is_some());
        bits.set(UpdateFlags::EFFECTS, self.effects.is_some());
        for i in 0..3 {
            bits.set(UpdateFlags::ORIGINS[i], self.origin[i].is_some());
            bits.set(UpdateFlags::ANGLES[i], self.angles[i].is_some());
        }
        if self.entity > 0xff {
            bits |= UpdateFlags::LONGENTITY;
        }
        if bits.bits() & 0xff00 != 0 {
            bits |= UpdateFlags::MOREBITS;
        }
        bits
    }

    /// Encode including the tag byte
    pub fn write(&self, w: &mut MessageWriter) {
        let bits = self.wire_flags().bits();
        w.write_u8((bits & 0xff) as u8 | FAST_UPDATE_BIT);
        if bits & UpdateFlags::MOREBITS.bits() != 0 {
            w.write_u8((bits >> 8) as u8);
        }
        if bits & UpdateFlags::LONGENTITY.bits() != 0 {
            w.write_u16(self.entity);
        } else {
            w.write_u8(self.entity as u8);
        }
        for v in [self.model, self.frame, self.colormap, self.skin, self.effects]
            .into_iter()
            .flatten()
        {
            w.write_u8(v);
        }
        for i in 0..3 {
            if let Some(c) = self.origin[i] {
                w.write_i16(c);
            }
            if let Some(a) = self.angles[i] {
                w.write_u8(a);
            }
        }
    }

    /// Full state once absent fields are taken from `baseline`
    pub fn resolve(&self, baseline: &EntityState) -> EntityState {
        let mut state = EntityState {
            model: self.model.unwrap_or(baseline.model),
            frame: self.frame.unwrap_or(baseline.frame),
            colormap: self.colormap.unwrap_or(baseline.colormap),
            skin: self.skin.unwrap_or(baseline.skin),
            effects: self.effects.unwrap_or(baseline.effects),
            ..*baseline
        };
        for i in 0..3 {
            state.origin[i] = self.origin[i].unwrap_or(baseline.origin[i]);
            state.angles[i] = self.angles[i].unwrap_or(baseline.angles[i]);
        }
        state
    }

    /// Smallest update that resolves to `state` against `baseline`
    pub fn delta(entity: u16, baseline: &EntityState, state: &EntityState, no_lerp: bool) -> Self {
        fn changed<T: PartialEq + Copy>(old: T, new: T) -> Option<T> {
            (old != new).then_some(new)
        }

        let mut update = EntityUpdate {
            flags: if no_lerp {
                UpdateFlags::NOLERP
            } else {
                UpdateFlags::empty()
            },
            entity,
            model: changed(baseline.model, state.model),
            frame: changed(baseline.frame, state.frame),
            colormap: changed(baseline.colormap, state.colormap),
            skin: changed(baseline.skin, state.skin),
            effects: changed(baseline.effects, state.effects),
            ..Default::default()
        };
        for i in 0..3 {
            update.origin[i] = changed(baseline.origin[i], state.origin[i]);
            update.angles[i] = changed(baseline.angles[i], state.angles[i]);
        }
        update.flags = update.wire_flags();
        update
    }

    pub fn no_lerp(&self) -> bool {
        self.flags.contains(UpdateFlags::NOLERP)
    }
}
