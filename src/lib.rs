//! # rubeam
//!
//! Beam search and early-update averaged perceptron for transition-based structured prediction
#![cfg_attr(
    feature = "train",
    doc = "
## Examples

```rust
use std::sync::Arc;

use rubeam::{
    Beam, BeamConfig, Feature, FeatureExtractor, Instance, Oracle, State, StoreKind, Trainer,
    Transition, TransitionSystem, WeightStore,
};

// Tags every input bit with 0 or 1.
#[derive(Clone, Default, PartialEq)]
struct Tagging {
    input: Arc<[u8]>,
    output: Vec<u8>,
    last: Option<Transition>,
    previous: Option<Arc<Tagging>>,
}

impl State for Tagging {
    type Problem = [u8];

    fn clear(&mut self) {
        *self = Self::default();
    }

    fn init(&mut self, problem: &[u8]) {
        self.input = problem.into();
    }

    fn is_terminal(&self) -> bool {
        self.output.len() == self.input.len()
    }

    fn previous(&self) -> Option<&Self> {
        self.previous.as_deref()
    }

    fn last_transition(&self) -> Option<Transition> {
        self.last
    }

    fn set_last_transition(&mut self, transition: Transition) {
        self.last = Some(transition);
    }
}

struct Tagger;

impl TransitionSystem<Tagging> for Tagger {
    fn transition(&self, from: &Arc<Tagging>, transition: Transition) -> Tagging {
        let mut output = from.output.clone();
        output.push(transition.value as u8);
        Tagging {
            input: Arc::clone(&from.input),
            output,
            last: Some(transition),
            previous: Some(Arc::clone(from)),
        }
    }

    fn transitions(&self, state: &Tagging) -> (u8, Vec<usize>) {
        if state.is_terminal() {
            (b'T', vec![])
        } else {
            (b'T', vec![0, 1])
        }
    }
}

// One template: the bit to tag next.
struct NextBit;

impl FeatureExtractor<Tagging> for NextBit {
    type Key = u8;

    fn features(
        &self,
        state: &Tagging,
        _idle: bool,
        _kind: u8,
        _transitions: &[usize],
    ) -> Vec<Option<Feature<u8>>> {
        vec![state.input.get(state.output.len()).map(|&b| Feature::Single(b))]
    }
}

// Replays the reference tags.
#[derive(Default)]
struct Replay(Vec<u8>);

impl Oracle<Tagging> for Replay {
    type Gold = [u8];

    fn set_gold(&mut self, gold: &[u8]) {
        self.0 = gold.to_vec();
    }

    fn transition(&self, state: &Tagging) -> Option<Transition> {
        self.0
            .get(state.output.len())
            .map(|&b| Transition::new(b'T', usize::from(b)))
    }
}

// Train: copy the input bits
let instances: Vec<Instance<Vec<u8>, Vec<u8>>> = [vec![1, 0, 1], vec![0, 1, 1], vec![1, 1, 0]]
    .into_iter()
    .map(|bits| Instance::new(bits.clone(), bits))
    .collect();

let beam = Beam::new(Tagging::default(), Tagger, NextBit, BeamConfig::new(1)?);
let model = WeightStore::new(1, StoreKind::Sparse)?;
let (model, stats) = Trainer::new()
    .max_iter(3)?
    .train(&beam, &mut Replay::default(), &instances, model)?;
assert_eq!(0, stats.failed);

// Test
let result = beam.parse(&[0, 1, 1, 0], &model)?;
assert_eq!(vec![0, 1, 1, 0], result.state.output);
# Ok::<(), rubeam::RubeamError>(())
```
"
)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod agenda;
mod beam;
mod candidate;
pub mod errors;
mod feature;
pub mod heap;
pub mod logging;
mod model;
mod score;
mod transition;
mod utils;
mod vector;

#[cfg(feature = "train")]
mod trainer;

#[cfg(test)]
mod test_utils;

pub use agenda::Agenda;
pub use beam::{Beam, BeamConfig, EarlyUpdate, GoldSequence, ParseResult, Trace, MAX_ROUNDS};
pub use candidate::{AssignmentScore, ScoreState, ScoredCandidate};
pub use errors::{Result, RubeamError};
pub use feature::{Feature, FeatureKey, FeatureStep, FeatureVector, Steps};
pub use heap::Heap;
pub use model::{WeightSnapshot, WeightStore};
pub use score::{ScoreBuffer, ScorePool};
pub use transition::{
    shared_transitions, Address, Addressable, FeatureExtractor, Oracle, State, Transition,
    TransitionSystem,
};
pub use vector::{AvgSparse, HistoryValue, SlotValues, StoreKind};

#[cfg(feature = "train")]
pub use trainer::{
    Averaging, Instance, IterationStats, LazyAveraging, SimpleAveraging, Trainer, TrainingStats,
    TrivialStrategy, UpdateStrategy,
};
