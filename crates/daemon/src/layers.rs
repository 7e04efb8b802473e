//! Layer allocation for overlapping playback
//!
//! Every category owns two (layer, instance) slots. Successive acquisitions
//! alternate between them so a clip can start on one layer while the previous
//! clip of the same category is still tearing down on the other.

use crate::catalog::Category;
use crate::config::{LayersConfig, SlotConfig};
use std::sync::{Mutex, PoisonError};

/// A hardware layer paired with the player instance id that drives it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LayerSlot {
    pub layer: u32,
    pub instance: String,
}

impl From<&SlotConfig> for LayerSlot {
    fn from(cfg: &SlotConfig) -> Self {
        Self {
            layer: cfg.layer,
            instance: cfg.instance.clone(),
        }
    }
}

/// Two slots plus which one was handed out last
#[derive(Debug, Clone)]
struct SlotPair {
    slots: [LayerSlot; 2],
    /// Index of the slot handed out last; `None` before the first acquire
    last: Option<usize>,
}

impl SlotPair {
    fn new(cfg: &[SlotConfig; 2]) -> Self {
        Self {
            slots: [LayerSlot::from(&cfg[0]), LayerSlot::from(&cfg[1])],
            last: None,
        }
    }

    fn next(&mut self) -> LayerSlot {
        let idx = match self.last {
            Some(0) => 1,
            _ => 0,
        };
        self.last = Some(idx);
        self.slots[idx].clone()
    }
}

/// Toggle state for all categories
#[derive(Debug, Clone)]
pub struct CategoryState {
    content: SlotPair,
    looping: SlotPair,
    transition: SlotPair,
}

impl CategoryState {
    pub fn from_config(cfg: &LayersConfig) -> Self {
        Self {
            content: SlotPair::new(&cfg.content),
            looping: SlotPair::new(&cfg.looping),
            transition: SlotPair::new(&cfg.transition),
        }
    }

    fn pair_mut(&mut self, category: Category) -> &mut SlotPair {
        match category {
            Category::Content => &mut self.content,
            Category::Loop => &mut self.looping,
            Category::Transition => &mut self.transition,
        }
    }
}

/// Hands out slots; the toggle read-modify-write happens under one lock.
#[derive(Debug)]
pub struct LayerAllocator {
    state: Mutex<CategoryState>,
}

impl LayerAllocator {
    pub fn new(cfg: &LayersConfig) -> Self {
        Self {
            state: Mutex::new(CategoryState::from_config(cfg)),
        }
    }

    /// Returns the slot after the one handed out last for `category`.
    ///
    /// The first call for a category yields its first slot.
    pub fn acquire(&self, category: Category) -> LayerSlot {
        // Toggle state is never left half-updated.
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.pair_mut(category).next()
    }
}

impl Default for LayerAllocator {
    fn default() -> Self {
        Self::new(&LayersConfig::default())
    }
}
