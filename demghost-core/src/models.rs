//! Model precache merging
//!
//! Ghosts reference models by index into their own precache list. The
//! merged list keeps the base list untouched and appends whatever the
//! ghosts need; each ghost gets a [`ModelRemap`] translating its indices.

use crate::error::DemoError;
use crate::protocol::{EntityState, MAX_MODELS};

/// Merged model precache
#[derive(Debug, Clone)]
pub struct ModelTable {
    names: Vec<Vec<u8>>,
    base_len: usize,
}

impl ModelTable {
    pub fn new(base: &[Vec<u8>]) -> Result<Self, DemoError> {
        if base.len() > MAX_MODELS {
            return Err(DemoError::TooManyModels { count: base.len() });
        }
        Ok(ModelTable {
            names: base.to_vec(),
            base_len: base.len(),
        })
    }

    /// Merge a ghost's precache, returning its index translation
    pub fn add(&mut self, ghost: &[Vec<u8>]) -> Result<ModelRemap, DemoError> {
        let before = self.names.len();
        let mut map = Vec::with_capacity(ghost.len() + 1);
        map.push(0);

        for name in ghost {
            let position = match self.names.iter().position(|n| n == name) {
                Some(p) => p,
                None => {
                    self.names.push(name.clone());
                    self.names.len() - 1
                }
            };
            if self.names.len() > MAX_MODELS {
                let count = self.names.len();
                self.names.truncate(before);
                return Err(DemoError::TooManyModels { count });
            }
            map.push((position + 1) as u8);
        }
        Ok(ModelRemap { map })
    }

    /// Whether any ghost model had to be appended
    pub fn grew(&self) -> bool {
        self.names.len() > self.base_len
    }

    pub fn names(&self) -> &[Vec<u8>] {
        &self.names
    }
}

/// One ghost's model index translation. Index 0 ("no model") maps to 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRemap {
    map: Vec<u8>,
}

impl ModelRemap {
    pub fn apply(&self, index: u8) -> Result<u8, DemoError> {
        self.map
            .get(index as usize)
            .copied()
            .ok_or(DemoError::UnknownModel {
                index,
                count: self.map.len() - 1,
            })
    }

    pub fn apply_state(&self, state: &EntityState) -> Result<EntityState, DemoError> {
        Ok(EntityState {
            model: self.apply(state.model)?,
            ..*state
        })
    }
}
