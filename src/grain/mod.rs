mod data;

pub use data::{Grain, GrainId};

use std::collections::BTreeSet;

/// Arena owning every sampled grain, indexed by [`GrainId`].
///
/// Identities start at one. Released identities go back to a free pool and
/// the lowest free identity is reused first, so identity assignment is
/// deterministic for a fixed operation sequence.
#[derive(Debug, Default, Clone)]
pub struct GrainStore {
    slots: Vec<Option<Grain>>,
    free: BTreeSet<GrainId>,
}

impl GrainStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: vec![None],
            free: BTreeSet::new(),
        }
    }

    /// Inserts a grain as inactive and returns its new identity.
    pub fn insert(&mut self, mut grain: Grain) -> GrainId {
        if self.slots.is_empty() {
            self.slots.push(None);
        }
        let id = match self.free.pop_first() {
            Some(id) => id,
            None => {
                let raw = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
                self.slots.push(None);
                GrainId::new(raw)
            }
        };
        grain.id = id;
        grain.active = false;
        self.slots[id.index()] = Some(grain);
        id
    }

    /// Puts a previously released grain back under its own identity.
    ///
    /// Returns `false` if the identity is occupied.
    pub fn restore(&mut self, grain: Grain) -> bool {
        let index = grain.id.index();
        if index == 0 {
            return false;
        }
        if self.slots.is_empty() {
            self.slots.push(None);
        }
        if index >= self.slots.len() {
            for raw in self.slots.len()..index {
                self.free.insert(GrainId::new(u32::try_from(raw).unwrap_or(u32::MAX)));
            }
            self.slots.resize(index + 1, None);
        }
        if self.slots[index].is_some() {
            return false;
        }
        self.free.remove(&grain.id);
        self.slots[index] = Some(grain);
        true
    }

    /// Removes a grain and returns its identity to the free pool.
    pub fn release(&mut self, id: GrainId) -> Option<Grain> {
        let grain = self.slots.get_mut(id.index())?.take()?;
        self.free.insert(id);
        Some(grain)
    }

    /// Returns the grain with the given identity.
    #[must_use]
    pub fn get(&self, id: GrainId) -> Option<&Grain> {
        self.slots.get(id.index())?.as_ref()
    }

    /// Returns the grain with the given identity mutably.
    pub fn get_mut(&mut self, id: GrainId) -> Option<&mut Grain> {
        self.slots.get_mut(id.index())?.as_mut()
    }

    /// Marks a grain active or inactive. Returns `false` if absent.
    pub fn set_active(&mut self, id: GrainId, active: bool) -> bool {
        match self.get_mut(id) {
            Some(grain) => {
                grain.active = active;
                true
            }
            None => false,
        }
    }

    /// Iterates all grains in ascending identity order.
    pub fn iter(&self) -> impl Iterator<Item = &Grain> {
        self.slots.iter().flatten()
    }

    /// Iterates active grains in ascending identity order.
    pub fn active(&self) -> impl Iterator<Item = &Grain> {
        self.iter().filter(|g| g.active)
    }

    /// Iterates active grains mutably in ascending identity order.
    pub fn active_mut(&mut self) -> impl Iterator<Item = &mut Grain> {
        self.slots.iter_mut().flatten().filter(|g| g.active)
    }

    /// Identities of the active grains, ascending.
    #[must_use]
    pub fn active_ids(&self) -> Vec<GrainId> {
        self.active().map(|g| g.id).collect()
    }

    /// Number of active grains.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active().count()
    }

    /// One past the largest identity ever issued.
    #[must_use]
    pub fn id_bound(&self) -> usize {
        self.slots.len().max(1)
    }

    /// Drops every inactive grain, returning their identities to the pool.
    pub fn purge_inactive(&mut self) {
        let inactive: Vec<GrainId> = self.iter().filter(|g| !g.active).map(|g| g.id).collect();
        for id in inactive {
            self.release(id);
        }
    }
}
