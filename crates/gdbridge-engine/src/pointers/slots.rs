//! Generation-tagged slot table backing the pointer registry

use gdbridge_sdk::VariantType;

use super::{Ownership, Pointer};

/// Key of a registry slot: index plus the generation it was issued under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotKey {
    /// Slot index
    pub index: u32,
    /// Generation, never zero for an issued key
    pub generation: u32,
}

pub(super) struct Slot {
    /// Zero while the slot is free
    pub generation: u32,
    last_generation: u32,
    pub kind: VariantType,
    pub ownership: Ownership,
    pub words: [u64; 3],
    pub referenced: bool,
    pub dependents: Vec<Pointer>,
}

impl Slot {
    fn empty() -> Self {
        Slot {
            generation: 0,
            last_generation: 0,
            kind: VariantType::Nil,
            ownership: Ownership::Borrowed,
            words: [0; 3],
            referenced: false,
            dependents: Vec::new(),
        }
    }
}

/// What a freed slot held, for destruction outside the lock.
pub(super) struct Released {
    pub kind: VariantType,
    pub ownership: Ownership,
    pub words: [u64; 3],
    pub dependents: Vec<Pointer>,
}

#[derive(Default)]
pub(super) struct SlotTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl SlotTable {
    pub fn insert(&mut self, kind: VariantType, ownership: Ownership, words: [u64; 3]) -> SlotKey {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::empty());
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        let generation = slot.last_generation.wrapping_add(1).max(1);
        slot.generation = generation;
        slot.last_generation = generation;
        slot.kind = kind;
        slot.ownership = ownership;
        slot.words = words;
        slot.referenced = true;
        self.live += 1;
        SlotKey { index, generation }
    }

    pub fn get(&self, key: SlotKey) -> Option<&Slot> {
        self.slots
            .get(key.index as usize)
            .filter(|slot| slot.generation != 0 && slot.generation == key.generation)
    }

    pub fn get_mut(&mut self, key: SlotKey) -> Option<&mut Slot> {
        self.slots
            .get_mut(key.index as usize)
            .filter(|slot| slot.generation != 0 && slot.generation == key.generation)
    }

    pub fn remove(&mut self, key: SlotKey) -> Option<Released> {
        let slot = self.get_mut(key)?;
        slot.generation = 0;
        slot.referenced = false;
        let released = Released {
            kind: slot.kind,
            ownership: slot.ownership,
            words: std::mem::take(&mut slot.words),
            dependents: std::mem::take(&mut slot.dependents),
        };
        self.free.push(key.index);
        self.live -= 1;
        Some(released)
    }

    /// Keys of live slots matching `pred`.
    pub fn keys_where(&self, pred: impl Fn(&Slot) -> bool) -> Vec<SlotKey> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.generation != 0 && pred(slot))
            .map(|(index, slot)| SlotKey {
                index: index as u32,
                generation: slot.generation,
            })
            .collect()
    }

    pub fn live(&self) -> usize {
        self.live
    }
}
