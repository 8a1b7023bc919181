use core::fmt;
use core::hash::Hash;
use std::sync::Arc;

use crate::transition::Transition;

/// Requirements of a feature key.
pub trait FeatureKey: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

impl<T> FeatureKey for T where T: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

/// Value extracted by one feature template.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Feature<K> {
    /// A single key.
    Single(K),

    /// Keys produced by a generator template. Each key carries the full weight.
    Generated(Vec<K>),

    /// Keys that only apply to the listed transitions.
    TransitionAssociated(Vec<(K, Vec<usize>)>),
}

impl<K> Feature<K> {
    /// Calls `f` with every key that fires together with the given transition.
    #[inline(always)]
    pub fn for_each_key_of<F>(&self, transition: usize, mut f: F)
    where
        F: FnMut(&K),
    {
        match self {
            Self::Single(k) => f(k),
            Self::Generated(ks) => ks.iter().for_each(f),
            Self::TransitionAssociated(ks) => {
                for (k, transitions) in ks {
                    if transitions.contains(&transition) {
                        f(k);
                    }
                }
            }
        }
    }

    /// Calls `f` with every key, regardless of the transitions they are associated with.
    #[inline(always)]
    pub fn for_each_key<F>(&self, mut f: F)
    where
        F: FnMut(&K),
    {
        match self {
            Self::Single(k) => f(k),
            Self::Generated(ks) => ks.iter().for_each(f),
            Self::TransitionAssociated(ks) => ks.iter().for_each(|(k, _)| f(k)),
        }
    }
}

/// Features extracted from one state, shared by every candidate expanded from that state.
pub type FeatureVector<K> = Arc<[Option<Feature<K>>]>;

/// One step of a feature history.
///
/// A step pairs the features of a state with the transition that was applied to it. Steps are
/// immutable and linked newest first, so siblings in the beam share their common history.
pub struct FeatureStep<K> {
    features: FeatureVector<K>,
    transition: Transition,
    previous: Option<Arc<FeatureStep<K>>>,
}

#[allow(clippy::len_without_is_empty)]
impl<K> FeatureStep<K> {
    /// Creates a new step on top of `previous`.
    pub fn new(
        features: FeatureVector<K>,
        transition: Transition,
        previous: Option<Arc<Self>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            features,
            transition,
            previous,
        })
    }

    /// Features of the state before the transition.
    #[inline(always)]
    pub fn features(&self) -> &[Option<Feature<K>>] {
        &self.features
    }

    /// Applied transition.
    #[inline(always)]
    pub const fn transition(&self) -> Transition {
        self.transition
    }

    /// Older step.
    #[inline(always)]
    pub fn previous(&self) -> Option<&Arc<Self>> {
        self.previous.as_ref()
    }

    /// Number of steps in the history ending at this step.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Iterates over the history, newest first.
    pub fn iter(&self) -> Steps<'_, K> {
        Steps { cur: Some(self) }
    }

    /// Returns a copy of the newest `keep` steps, or [`None`] if `keep` is 0.
    pub fn truncated(self: &Arc<Self>, keep: usize) -> Option<Arc<Self>> {
        if keep == 0 {
            return None;
        }
        if keep >= self.len() {
            return Some(Arc::clone(self));
        }
        let kept: Vec<&Self> = self.iter().take(keep).collect();
        let mut previous = None;
        for step in kept.into_iter().rev() {
            previous = Some(Self::new(
                Arc::clone(&step.features),
                step.transition,
                previous,
            ));
        }
        previous
    }
}

impl<K> Drop for FeatureStep<K> {
    fn drop(&mut self) {
        // Unlinks uniquely owned ancestors iteratively so long histories do not recurse.
        let mut previous = self.previous.take();
        while let Some(step) = previous {
            match Arc::try_unwrap(step) {
                Ok(mut step) => previous = step.previous.take(),
                Err(_) => break,
            }
        }
    }
}

impl<K: fmt::Debug> fmt::Debug for FeatureStep<K> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list()
            .entries(self.iter().map(|step| (step.transition, &step.features)))
            .finish()
    }
}

/// Iterator over a feature history.
pub struct Steps<'a, K> {
    cur: Option<&'a FeatureStep<K>>,
}

impl<'a, K> Iterator for Steps<'a, K> {
    type Item = &'a FeatureStep<K>;

    fn next(&mut self) -> Option<Self::Item> {
        let step = self.cur?;
        self.cur = step.previous.as_deref();
        Some(step)
    }
}
