//! Entity identity and slot management.
//!
//! An [`Entity`] is an opaque 64-bit handle combining a slot [`Id`] with a
//! [`Generation`]. The id addresses a slot; the generation counts how many
//! times that slot has been recycled. A handle whose generation does not
//! match the slot's current generation is *stale*: every lookup made with it
//! silently finds nothing, which is how use-after-destroy stays harmless.
//!
//! The [`Manager`] owns the slots: it allocates, recycles through a dead
//! pool (bumping the generation on free), tracks liveness, and keeps each
//! live entity's component-membership mask for the schedulers' joins.

use fixedbitset::FixedBitSet;

use crate::ecs::component::ComponentId;

/// The generation of an entity slot, incremented each time the slot is
/// recycled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u32);

impl Generation {
    /// The generation of a slot that has never been recycled.
    const FIRST: Self = Self(0);

    /// The next generation after this one.
    #[inline]
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

/// An entity slot index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(u32);

impl From<u32> for Id {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl Id {
    /// The slot index for indexable storage.
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// An entity handle: slot id plus generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Entity {
    id: Id,
    generation: Generation,
}

impl Entity {
    #[inline]
    pub(crate) const fn new(id: Id, generation: Generation) -> Self {
        Self { id, generation }
    }

    /// The slot id.
    #[inline]
    pub fn id(&self) -> Id {
        self.id
    }

    /// The handle's generation.
    #[inline]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// The slot index for indexable storage.
    #[inline]
    pub fn index(&self) -> usize {
        self.id.index()
    }

    /// Pack the handle into its opaque 64-bit form: generation in the high
    /// word, slot id in the low word.
    #[inline]
    pub fn bits(&self) -> u64 {
        ((self.generation.0 as u64) << 32) | self.id.0 as u64
    }

    /// Unpack a handle previously produced by [`bits`](Entity::bits).
    #[inline]
    pub fn from_bits(bits: u64) -> Self {
        Self {
            id: Id(bits as u32),
            generation: Generation((bits >> 32) as u32),
        }
    }
}

impl PartialOrd for Entity {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entity {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match self.id.cmp(&other.id) {
            std::cmp::Ordering::Equal => self.generation.cmp(&other.generation),
            ord => ord,
        }
    }
}

/// Slot allocator and liveness/membership tracker.
///
/// Freed slots go to a dead pool with their generation already bumped, so a
/// recycled slot hands out a handle distinguishable from every stale one.
#[derive(Default, Debug)]
pub struct Manager {
    /// Current generation per slot.
    generations: Vec<Generation>,
    /// Liveness per slot.
    alive: FixedBitSet,
    /// Component membership per slot; bit N = component id N attached.
    masks: Vec<FixedBitSet>,
    /// Freed slots available for reuse.
    dead_pool: Vec<Id>,
    /// Number of live entities.
    live: usize,
}

impl Manager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an entity, reusing a freed slot when one exists.
    pub fn create(&mut self) -> Entity {
        self.live += 1;
        match self.dead_pool.pop() {
            Some(id) => {
                self.alive.insert(id.index());
                self.masks[id.index()].clear();
                Entity::new(id, self.generations[id.index()])
            }
            None => {
                let id = Id(self.generations.len() as u32);
                self.generations.push(Generation::FIRST);
                self.alive.grow(id.index() + 1);
                self.alive.insert(id.index());
                self.masks.push(FixedBitSet::new());
                Entity::new(id, Generation::FIRST)
            }
        }
    }

    /// Free an entity's slot, bumping its generation so the handle goes
    /// stale. Returns `false` for an already-stale handle.
    pub fn destroy(&mut self, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        let index = entity.index();
        self.alive.set(index, false);
        self.masks[index].clear();
        self.generations[index] = self.generations[index].next();
        self.dead_pool.push(entity.id());
        self.live -= 1;
        true
    }

    /// `true` when the handle refers to the slot's current incarnation.
    pub fn is_alive(&self, entity: Entity) -> bool {
        let index = entity.index();
        index < self.generations.len()
            && self.alive.contains(index)
            && self.generations[index] == entity.generation()
    }

    /// Record that `entity` gained or lost `component`. Stale handles are
    /// ignored.
    pub fn set_membership(&mut self, entity: Entity, component: ComponentId, attached: bool) {
        if !self.is_alive(entity) {
            return;
        }
        let mask = &mut self.masks[entity.index()];
        if attached {
            mask.grow(component.index() + 1);
            mask.insert(component.index());
        } else if component.index() < mask.len() {
            mask.set(component.index(), false);
        }
    }

    /// `true` when `entity` is live and has `component` attached.
    pub fn has_membership(&self, entity: Entity, component: ComponentId) -> bool {
        self.is_alive(entity)
            && component.index() < self.masks[entity.index()].len()
            && self.masks[entity.index()].contains(component.index())
    }

    /// Number of live entities.
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    /// `true` when no entities are live.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Iterate every live entity handle.
    pub fn iter(&self) -> impl Iterator<Item = Entity> + '_ {
        self.alive
            .ones()
            .map(|index| Entity::new(Id(index as u32), self.generations[index]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_allocates_unique_handles() {
        let mut manager = Manager::new();

        let mut entities: Vec<Entity> = (0..200).map(|_| manager.create()).collect();

        let before = entities.len();
        entities.sort();
        entities.dedup();
        assert_eq!(entities.len(), before);
        assert_eq!(manager.len(), 200);
    }

    #[test]
    fn destroy_then_create_recycles_with_new_generation() {
        let mut manager = Manager::new();
        let first = manager.create();

        assert!(manager.destroy(first));
        let second = manager.create();

        // Same slot, different incarnation.
        assert_eq!(second.id(), first.id());
        assert_ne!(second, first);
        assert_eq!(second.generation(), first.generation().next());
    }

    #[test]
    fn stale_handles_are_dead() {
        let mut manager = Manager::new();
        let first = manager.create();
        manager.destroy(first);
        let second = manager.create();

        assert!(!manager.is_alive(first));
        assert!(manager.is_alive(second));
        // Destroying through the stale handle is a no-op.
        assert!(!manager.destroy(first));
        assert!(manager.is_alive(second));
    }

    #[test]
    fn bits_roundtrip() {
        let mut manager = Manager::new();
        let e = manager.create();
        manager.destroy(e);
        let e = manager.create(); // generation 1

        let packed = e.bits();
        assert_eq!(Entity::from_bits(packed), e);
    }

    #[test]
    fn membership_tracks_attach_and_detach() {
        let mut manager = Manager::new();
        let e = manager.create();
        let c = ComponentId::new(3);

        assert!(!manager.has_membership(e, c));
        manager.set_membership(e, c, true);
        assert!(manager.has_membership(e, c));
        manager.set_membership(e, c, false);
        assert!(!manager.has_membership(e, c));
    }

    #[test]
    fn membership_clears_on_recycle() {
        let mut manager = Manager::new();
        let c = ComponentId::new(0);

        let first = manager.create();
        manager.set_membership(first, c, true);
        manager.destroy(first);
        let second = manager.create();

        assert!(!manager.has_membership(second, c));
        // The stale handle sees nothing either.
        assert!(!manager.has_membership(first, c));
    }

    #[test]
    fn iter_visits_live_entities_only() {
        let mut manager = Manager::new();
        let a = manager.create();
        let b = manager.create();
        let c = manager.create();
        manager.destroy(b);

        let live: Vec<Entity> = manager.iter().collect();
        assert_eq!(live, vec![a, c]);
        assert_eq!(manager.len(), 2);
    }
}
