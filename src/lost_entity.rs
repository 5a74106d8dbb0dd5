//! Generational lost-entity detector: an entity missing for one full scan
//! cycle is reported lost exactly once.

use std::collections::HashSet;
use std::hash::Hash;

#[derive(Debug, Clone)]
pub struct LostEntityTracker<T: Eq + Hash + Clone> {
    current_generation: HashSet<T>,
    previous_generation: HashSet<T>,
}

impl<T: Eq + Hash + Clone> LostEntityTracker<T> {
    pub fn new() -> Self {
        Self {
            current_generation: HashSet::new(),
            previous_generation: HashSet::new(),
        }
    }

    /// Marks `entity` as seen in the current generation.
    pub fn record_found_entity(&mut self, entity: T) {
        self.current_generation.insert(entity);
    }

    /// Returns entities seen in the previous generation but not the
    /// current one, then rolls the generations forward.
    pub fn compute_lost_entities(&mut self) -> Vec<T> {
        let lost: Vec<T> = self
            .previous_generation
            .iter()
            .filter(|e| !self.current_generation.contains(*e))
            .cloned()
            .collect();
        self.previous_generation = std::mem::take(&mut self.current_generation);
        lost
    }
}

impl<T: Eq + Hash + Clone> Default for LostEntityTracker<T> {
    fn default() -> Self {
        Self::new()
    }
}
