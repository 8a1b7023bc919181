use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use bincode::{
    de::Decoder,
    enc::Encoder,
    error::{DecodeError, EncodeError},
    Decode, Encode,
};

use crate::errors::{Result, RubeamError};
use crate::feature::{Feature, FeatureKey, FeatureStep};
use crate::score::ScoreBuffer;
use crate::transition::Transition;
use crate::vector::{AvgSparse, SlotValues, StoreKind};

/// Linear model over sparse features: one lazily averaged vector per feature template slot and a
/// shared generation counter.
#[derive(Debug)]
pub struct WeightStore<K> {
    mat: Vec<AvgSparse<K>>,
    generation: AtomicU64,
    n_threads: usize,
}

impl<K> WeightStore<K>
where
    K: FeatureKey,
{
    /// Creates an empty model with `features` template slots.
    ///
    /// # Errors
    ///
    /// [`RubeamError::InvalidArgument`] is returned when `features` is 0 or `kind` is invalid.
    pub fn new(features: usize, kind: StoreKind) -> Result<Self> {
        if features == 0 {
            return Err(RubeamError::invalid_argument("features must not be 0"));
        }
        let kind = kind.validate()?;
        Ok(Self {
            mat: (0..features).map(|_| AvgSparse::new(kind)).collect(),
            generation: AtomicU64::new(0),
            n_threads: 1,
        })
    }

    /// Sets the number of threads applying the steps of one update.
    ///
    /// # Errors
    ///
    /// [`RubeamError::InvalidArgument`] is returned when `n_threads` is 0.
    pub fn n_threads(mut self, n_threads: usize) -> Result<Self> {
        if n_threads == 0 {
            return Err(RubeamError::invalid_argument("n_threads must not be 0"));
        }
        self.n_threads = n_threads;
        Ok(self)
    }

    /// Number of template slots.
    pub fn features(&self) -> usize {
        self.mat.len()
    }

    /// Vector of one template slot.
    pub fn slot(&self, i: usize) -> Option<&AvgSparse<K>> {
        self.mat.get(i)
    }

    /// Current generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Advances the generation by one.
    pub fn increment_generation(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    fn check_width(&self, features: &[Option<Feature<K>>]) -> Result<()> {
        if features.len() > self.mat.len() {
            return Err(RubeamError::consistency(
                "feature vector is wider than the model",
            ));
        }
        Ok(())
    }

    fn step_score(&self, step: &FeatureStep<K>) -> i64 {
        let t = step.transition().value;
        let mut score = 0;
        for (slot, feature) in self.mat.iter().zip(step.features()) {
            if let Some(feature) = feature {
                feature.for_each_key_of(t, |k| score += slot.value(t, k));
            }
        }
        score
    }

    /// Sum of the raw weights of every step of the history.
    pub fn score(&self, history: Option<&FeatureStep<K>>) -> Result<i64> {
        let mut score = 0;
        for step in history.into_iter().flat_map(FeatureStep::iter) {
            self.check_width(step.features())?;
            score += self.step_score(step);
        }
        Ok(score)
    }

    /// Raw score of one transition given the features of the current state.
    pub fn transition_score(
        &self,
        transition: Transition,
        features: &[Option<Feature<K>>],
    ) -> Result<i64> {
        self.check_width(features)?;
        let t = transition.value;
        let mut score = 0;
        for (slot, feature) in self.mat.iter().zip(features) {
            if let Some(feature) = feature {
                feature.for_each_key_of(t, |k| score += slot.value(t, k));
            }
        }
        Ok(score)
    }

    /// Adds the weights of every key of `features` to the legal transitions registered in
    /// `scores`. Transition-associated keys contribute to every legal transition.
    pub fn set_transition_scores(
        &self,
        features: &[Option<Feature<K>>],
        scores: &mut ScoreBuffer,
        integrated: bool,
    ) -> Result<()> {
        self.check_width(features)?;
        for (slot, feature) in self.mat.iter().zip(features) {
            if let Some(feature) = feature {
                feature.for_each_key(|k| slot.set_scores(k, scores, integrated));
            }
        }
        Ok(())
    }

    fn apply_step(&self, step: &FeatureStep<K>, generation: u64, amount: i64) {
        let t = step.transition().value;
        for (slot, feature) in self.mat.iter().zip(step.features()) {
            if let Some(feature) = feature {
                feature.for_each_key_of(t, |k| slot.add(generation, t, k, amount));
            }
        }
    }

    fn apply_steps(&self, steps: &[&FeatureStep<K>], amount: i64) -> Result<()> {
        for step in steps {
            self.check_width(step.features())?;
        }
        let generation = self.generation();
        let n_threads = self.n_threads.min(steps.len());
        if n_threads <= 1 {
            for step in steps {
                self.apply_step(step, generation, amount);
            }
            return Ok(());
        }
        let (s, r) = crossbeam_channel::unbounded();
        for &step in steps {
            s.send(step)
                .map_err(|_| RubeamError::consistency("update channel closed"))?;
        }
        thread::scope(|scope| {
            for _ in 0..n_threads {
                scope.spawn(|| {
                    while let Ok(step) = r.try_recv() {
                        self.apply_step(step, generation, amount);
                    }
                });
            }
        });
        Ok(())
    }

    /// Adds `amount` to the weight of every key at every step of the history.
    pub fn add(&self, history: Option<&FeatureStep<K>>, amount: i64) -> Result<()> {
        let steps: Vec<_> = history.into_iter().flat_map(FeatureStep::iter).collect();
        self.apply_steps(&steps, amount)
    }

    /// Subtracts `amount` from the weight of every key at every step of the history.
    pub fn subtract(&self, history: Option<&FeatureStep<K>>, amount: i64) -> Result<()> {
        self.add(history, -amount)
    }

    /// Walks both histories from the newest step and adds `amount` to the steps of `gold`, as
    /// long as `decoded` has a step at the same depth.
    pub fn add_subtract(
        &self,
        gold: Option<&FeatureStep<K>>,
        decoded: Option<&FeatureStep<K>>,
        amount: i64,
    ) -> Result<()> {
        let steps: Vec<_> = gold
            .into_iter()
            .flat_map(FeatureStep::iter)
            .zip(decoded.into_iter().flat_map(FeatureStep::iter))
            .map(|(g, _)| g)
            .collect();
        self.apply_steps(&steps, amount)
    }

    /// Divides every raw weight by `n`.
    ///
    /// # Errors
    ///
    /// [`RubeamError::Consistency`] is returned when `n` is not positive.
    pub fn scalar_divide(&self, n: i64) -> Result<()> {
        if n <= 0 {
            return Err(RubeamError::consistency("divisor must be positive"));
        }
        for slot in &self.mat {
            slot.scalar_divide(n)?;
        }
        Ok(())
    }

    /// Replaces every weight with its integral up to the current generation.
    pub fn integrate(&self) {
        let generation = self.generation();
        for slot in &self.mat {
            slot.integrate(generation);
        }
    }

    /// Creates an empty model with the same shape.
    pub fn empty_like(&self) -> Self {
        Self {
            mat: self.mat.iter().map(|s| AvgSparse::new(s.kind())).collect(),
            generation: AtomicU64::new(0),
            n_threads: self.n_threads,
        }
    }

    /// Adds the raw weights of another model of the same shape.
    pub fn add_model(&self, other: &Self) -> Result<()> {
        if other.mat.len() != self.mat.len() {
            return Err(RubeamError::consistency("models have different shapes"));
        }
        let generation = self.generation();
        for (slot, other) in self.mat.iter().zip(&other.mat) {
            slot.add_vector(generation, other);
        }
        Ok(())
    }

    /// Exports the weights: raw if `generation` is [`None`], integrated at `generation`
    /// otherwise.
    pub fn snapshot(&self, generation: Option<u64>) -> WeightSnapshot<K> {
        WeightSnapshot {
            generation: self.generation(),
            kind: self.mat.first().map_or_else(StoreKind::default, AvgSparse::kind),
            slots: self.mat.iter().map(|s| s.serialize(generation)).collect(),
        }
    }

    /// Rebuilds a model from a snapshot. Every weight starts at the snapshot generation.
    ///
    /// # Errors
    ///
    /// [`RubeamError::InvalidArgument`] is returned when the snapshot has no slot.
    pub fn from_snapshot(snapshot: &WeightSnapshot<K>) -> Result<Self> {
        if snapshot.slots.is_empty() {
            return Err(RubeamError::invalid_argument("snapshot has no slot"));
        }
        let kind = snapshot.kind.validate()?;
        Ok(Self {
            mat: snapshot
                .slots
                .iter()
                .map(|s| AvgSparse::deserialize(kind, s, snapshot.generation))
                .collect(),
            generation: AtomicU64::new(snapshot.generation),
            n_threads: 1,
        })
    }
}

/// Weights exported from a [`WeightStore`].
#[derive(Clone, Debug)]
pub struct WeightSnapshot<K> {
    /// Generation of the model at export time.
    pub generation: u64,

    /// Backing representation of the exported model.
    pub kind: StoreKind,

    /// Per template slot: feature key to transition identifier to weight.
    pub slots: Vec<SlotValues<K>>,
}

impl<K> PartialEq for WeightSnapshot<K>
where
    K: Eq + Hash,
{
    fn eq(&self, other: &Self) -> bool {
        self.generation == other.generation && self.kind == other.kind && self.slots == other.slots
    }
}

impl<K> Eq for WeightSnapshot<K> where K: Eq + Hash {}

impl<Context, K> Decode<Context> for WeightSnapshot<K>
where
    K: FeatureKey + Decode<Context>,
{
    #[allow(clippy::type_complexity)]
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        let generation = Decode::decode(decoder)?;
        let kind = Decode::decode(decoder)?;
        let slots: Vec<Vec<(K, Vec<(usize, i64)>)>> = Decode::decode(decoder)?;
        Ok(Self {
            generation,
            kind,
            slots: slots
                .into_iter()
                .map(|v| {
                    v.into_iter()
                        .map(|(k, scores)| (k, scores.into_iter().collect()))
                        .collect()
                })
                .collect(),
        })
    }
}

impl<K> Encode for WeightSnapshot<K>
where
    K: FeatureKey + Encode,
{
    #[allow(clippy::type_complexity)]
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        let slots: Vec<Vec<(&K, Vec<(usize, i64)>)>> = self
            .slots
            .iter()
            .map(|v| {
                v.iter()
                    .map(|(k, scores)| (k, scores.iter().map(|(&t, &w)| (t, w)).collect()))
                    .collect()
            })
            .collect();
        Encode::encode(&self.generation, encoder)?;
        Encode::encode(&self.kind, encoder)?;
        Encode::encode(&slots, encoder)?;
        Ok(())
    }
}
