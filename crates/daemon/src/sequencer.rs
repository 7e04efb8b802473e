//! Recipe sequencing
//!
//! Walks the recipe round-robin and turns each step into a playlist by
//! drawing a random clip carrying the step's tag.

use crate::catalog::Catalog;
use crate::config::RecipeStepConfig;
use crate::supervisor::Playlist;
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Error type for recipe construction
#[derive(Debug, Error)]
pub enum RecipeError {
    #[error("recipe must contain at least one step")]
    Empty,
}

/// One (tag, duration override) step
#[derive(Debug, Clone, PartialEq)]
pub struct RecipeStep {
    pub tag: String,
    /// Replaces the clip length for this dispatch when non-zero
    pub length: f64,
    /// Tag of the clips placed before and after the selected clip
    pub bracket: Option<String>,
}

impl RecipeStep {
    pub fn new(tag: &str, length: f64) -> Self {
        Self {
            tag: tag.to_string(),
            length,
            bracket: None,
        }
    }
}

impl From<&RecipeStepConfig> for RecipeStep {
    fn from(cfg: &RecipeStepConfig) -> Self {
        Self {
            tag: cfg.tag.clone(),
            length: cfg.length,
            bracket: cfg.bracket.clone(),
        }
    }
}

/// Non-empty, circular list of steps
#[derive(Debug, Clone)]
pub struct Recipe {
    steps: Vec<RecipeStep>,
}

impl Recipe {
    pub fn new(steps: Vec<RecipeStep>) -> Result<Self, RecipeError> {
        if steps.is_empty() {
            return Err(RecipeError::Empty);
        }
        Ok(Self { steps })
    }

    pub fn from_config(steps: &[RecipeStepConfig]) -> Result<Self, RecipeError> {
        Self::new(steps.iter().map(RecipeStep::from).collect())
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[RecipeStep] {
        &self.steps
    }
}

/// Result of one sequencer tick
#[derive(Debug)]
pub enum Tick {
    Dispatch { step: usize, playlist: Playlist },
    /// The step's tag had no candidates
    Skip { step: usize, tag: String },
}

pub struct RecipeSequencer {
    recipe: Recipe,
    catalog: Arc<Catalog>,
    index: usize,
}

impl RecipeSequencer {
    pub fn new(recipe: Recipe, catalog: Arc<Catalog>) -> Self {
        Self {
            recipe,
            catalog,
            index: 0,
        }
    }

    /// Index of the step the next tick will use
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn recipe(&self) -> &Recipe {
        &self.recipe
    }

    /// Reads the current step, advances the index and picks the playlist.
    pub fn tick<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Tick {
        let step_idx = self.index;
        self.index = (self.index + 1) % self.recipe.len();
        let step = &self.recipe.steps[step_idx];

        let candidates = self.catalog.lookup(&step.tag);
        let Some(chosen) = candidates.choose(rng) else {
            debug!(step = step_idx, tag = %step.tag, "no clips for tag, skipping");
            return Tick::Skip {
                step: step_idx,
                tag: step.tag.clone(),
            };
        };

        let mut clip = chosen.as_ref().clone();
        if step.length > 0.0 {
            clip.length = step.length;
        }
        info!(
            step = step_idx,
            tag = %step.tag,
            choices = candidates.len(),
            clip = %clip.name,
            length_override = step.length,
            "selected"
        );

        let mut playlist = Vec::with_capacity(3);
        let bracket = step.bracket.as_deref();
        let push_bracket = |playlist: &mut Playlist, rng: &mut R| {
            if let Some(b) = bracket.and_then(|tag| self.catalog.lookup(tag).choose(rng)) {
                playlist.push(b.as_ref().clone());
            }
        };
        push_bracket(&mut playlist, &mut *rng);
        playlist.push(clip);
        push_bracket(&mut playlist, &mut *rng);

        Tick::Dispatch {
            step: step_idx,
            playlist,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ClipRecord;
    use crate::supervisor::resolve_entry;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn record(name: &str, tags: &[&str], file_duration: f64) -> ClipRecord {
        let mut c = ClipRecord::new(name, format!("/media/{}.mp4", name), tags);
        c.file_duration = Some(file_duration);
        c
    }

    fn catalog() -> Arc<Catalog> {
        Arc::new(Catalog::from_records(vec![
            record("intro", &["transition"], 4.0),
            record("alice", &["interview"], 10.0),
            record("bob", &["interview", "playful"], 25.0),
            record("river", &["loop"], 8.0),
            record("lake", &["loop"], 300.0),
        ]))
    }

    fn step_of(tick: &Tick) -> usize {
        match tick {
            Tick::Dispatch { step, .. } | Tick::Skip { step, .. } => *step,
        }
    }

    #[test]
    fn test_empty_recipe_rejected() {
        assert!(matches!(Recipe::new(vec![]), Err(RecipeError::Empty)));
    }

    #[test]
    fn test_empty_tag_is_skipped_and_index_advances() {
        let recipe = Recipe::new(vec![RecipeStep::new("scenic", 0.0), RecipeStep::new("interview", 0.0)]).unwrap();
        let mut seq = RecipeSequencer::new(recipe, catalog());
        let mut rng = StdRng::seed_from_u64(7);

        match seq.tick(&mut rng) {
            Tick::Skip { step, tag } => {
                assert_eq!(step, 0);
                assert_eq!(tag, "scenic");
            }
            other => panic!("expected skip, got {:?}", other),
        }
        assert_eq!(seq.index(), 1);
        assert!(matches!(seq.tick(&mut rng), Tick::Dispatch { step: 1, .. }));
    }

    #[test]
    fn test_interview_dispatch_resolves_to_file_duration() {
        let cat = Arc::new(Catalog::from_records(vec![record("alice", &["interview"], 10.0)]));
        let recipe = Recipe::new(vec![RecipeStep::new("interview", 0.0)]).unwrap();
        let mut seq = RecipeSequencer::new(recipe, cat);

        let Tick::Dispatch { playlist, .. } = seq.tick(&mut StdRng::seed_from_u64(1)) else {
            panic!("expected dispatch");
        };
        assert_eq!(playlist.len(), 1);
        let entry = resolve_entry(&playlist[0], playlist[0].file_duration.unwrap()).unwrap();
        assert_eq!(entry.length, 10.0);
        assert_eq!(entry.start, 0.0);
    }

    #[test]
    fn test_loop_override_applies_per_dispatch_only() {
        let cat = catalog();
        let recipe = Recipe::new(vec![RecipeStep::new("loop", 120.0)]).unwrap();
        let mut seq = RecipeSequencer::new(recipe, Arc::clone(&cat));
        let mut rng = StdRng::seed_from_u64(3);

        for _ in 0..10 {
            let Tick::Dispatch { playlist, .. } = seq.tick(&mut rng) else {
                panic!("expected dispatch");
            };
            let clip = &playlist[0];
            let entry = resolve_entry(clip, clip.file_duration.unwrap()).unwrap();
            assert_eq!(entry.length, 120.0);
        }
        assert!(cat.lookup("loop").iter().all(|c| c.length == 0.0));
    }

    #[test]
    fn test_choice_covers_all_candidates() {
        let recipe = Recipe::new(vec![RecipeStep::new("interview", 0.0)]).unwrap();
        let mut seq = RecipeSequencer::new(recipe, catalog());
        let mut rng = StdRng::seed_from_u64(11);
        let mut seen = HashSet::new();

        for _ in 0..200 {
            if let Tick::Dispatch { playlist, .. } = seq.tick(&mut rng) {
                seen.insert(playlist[0].name.clone());
            }
        }
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_bracketed_step_builds_three_entry_playlist() {
        let mut step = RecipeStep::new("playful", 0.0);
        step.bracket = Some("transition".to_string());
        let mut seq = RecipeSequencer::new(Recipe::new(vec![step]).unwrap(), catalog());

        let Tick::Dispatch { playlist, .. } = seq.tick(&mut StdRng::seed_from_u64(5)) else {
            panic!("expected dispatch");
        };
        let names: Vec<&str> = playlist.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["intro", "bob", "intro"]);
    }

    #[test]
    fn test_bracket_with_no_clips_is_omitted() {
        let mut step = RecipeStep::new("interview", 0.0);
        step.bracket = Some("scenic".to_string());
        let mut seq = RecipeSequencer::new(Recipe::new(vec![step]).unwrap(), catalog());

        let Tick::Dispatch { playlist, .. } = seq.tick(&mut StdRng::seed_from_u64(5)) else {
            panic!("expected dispatch");
        };
        assert_eq!(playlist.len(), 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_index_wraps_modulo_recipe_length(
            tags in proptest::collection::vec(
                prop_oneof![Just("interview"), Just("loop"), Just("scenic"), Just("transition")],
                1..10,
            ),
            seed in any::<u64>(),
        ) {
            let n = tags.len();
            let recipe = Recipe::new(tags.iter().map(|t| RecipeStep::new(t, 0.0)).collect()).unwrap();
            let mut seq = RecipeSequencer::new(recipe, catalog());
            let mut rng = StdRng::seed_from_u64(seed);

            let steps: Vec<usize> = (0..2 * n + 1).map(|_| step_of(&seq.tick(&mut rng))).collect();
            for (i, step) in steps.iter().enumerate() {
                prop_assert_eq!(*step, i % n);
            }
            prop_assert_eq!(steps[n], steps[0]);
        }
    }
}
