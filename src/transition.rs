//! Contracts for the states, transition systems, oracles, and feature extractors that drive the
//! search.

use core::fmt;
use std::sync::Arc;

use bincode::{Decode, Encode};

use crate::feature::{Feature, FeatureKey};

/// Typed action moving one state to the next.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Decode, Encode)]
pub struct Transition {
    /// Transition type tag reported by the transition system.
    pub kind: u8,

    /// Transition identifier, used as the column index of the weight store.
    pub value: usize,
}

impl Transition {
    /// Creates a new transition.
    #[inline(always)]
    pub const fn new(kind: u8, value: usize) -> Self {
        Self { kind, value }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", char::from(self.kind), self.value)
    }
}

/// Search state (configuration).
///
/// States are immutable once they enter the search. A transition system derives a new state from
/// an existing one and links it through [`State::previous()`], so a state also represents the
/// whole sequence that produced it.
#[allow(clippy::len_without_is_empty)]
pub trait State: Clone + PartialEq + Send + Sync {
    /// Input the state is initialized from.
    type Problem: ?Sized + Sync;

    /// Resets the state to an empty configuration.
    fn clear(&mut self);

    /// Initializes the state for the given input.
    fn init(&mut self, problem: &Self::Problem);

    /// Returns `true` if no further transition is required.
    fn is_terminal(&self) -> bool;

    /// State this one was derived from.
    fn previous(&self) -> Option<&Self>;

    /// Transition that produced this state, or [`None`] for an initial state.
    fn last_transition(&self) -> Option<Transition>;

    /// Overrides the transition that produced this state.
    fn set_last_transition(&mut self, transition: Transition);

    /// Scoring slot the next transition is accounted to.
    fn assignment(&self) -> u16 {
        0
    }

    /// Number of states in the sequence ending at this one, including the initial state.
    fn len(&self) -> usize {
        let mut len = 1;
        let mut cur = self.previous();
        while let Some(s) = cur {
            len += 1;
            cur = s.previous();
        }
        len
    }

    /// States of the sequence ending at this one, newest first.
    fn sequence(&self) -> Vec<&Self> {
        let mut seq = vec![self];
        let mut cur = self.previous();
        while let Some(s) = cur {
            seq.push(s);
            cur = s.previous();
        }
        seq
    }
}

/// Location resolved by [`Addressable::address()`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Address {
    /// Node identifier inside the state.
    pub node: usize,

    /// `true` if the location expands into several values.
    pub generator: bool,
}

/// Address resolution used by feature extractors to read the inside of a state.
pub trait Addressable {
    /// Attribute value type.
    type Value;

    /// Resolves a locator such as `b"S0"` to a node of the state.
    fn address(&self, locator: &[u8], offset: usize) -> Option<Address>;

    /// Reads an attribute of a node.
    fn attribute(&self, node: usize, attribute: &[u8]) -> Option<Self::Value>;
}

/// Transition system.
pub trait TransitionSystem<S: State>: Sync {
    /// Applies a transition. The returned state must refer to `from` as its previous state.
    fn transition(&self, from: &Arc<S>, transition: Transition) -> S;

    /// Returns the type tag and the identifiers of the legal transitions from the given state.
    fn transitions(&self, state: &S) -> (u8, Vec<usize>);
}

/// Static policy producing the reference transition sequence for a training instance.
pub trait Oracle<S: State> {
    /// Reference structure.
    type Gold: ?Sized;

    /// Sets the reference structure of the next instance.
    fn set_gold(&mut self, gold: &Self::Gold);

    /// Returns the correct transition from the given state.
    fn transition(&self, state: &S) -> Option<Transition>;
}

/// Feature extractor.
pub trait FeatureExtractor<S: State>: Sync {
    /// Feature key type.
    type Key: FeatureKey;

    /// Extracts one feature per template slot. A slot is [`None`] when the requirements of its
    /// template are not met.
    fn features(
        &self,
        state: &S,
        idle: bool,
        kind: u8,
        transitions: &[usize],
    ) -> Vec<Option<Feature<Self::Key>>>;
}

/// Counts the leading transitions two sequences agree on. Both sequences are newest first, as
/// returned by [`State::sequence()`], and are compared from the oldest state.
pub fn shared_transitions<S: State>(seq: &[&S], other: &[&S]) -> usize {
    seq.iter()
        .rev()
        .zip(other.iter().rev())
        .take_while(|(a, b)| a.last_transition() == b.last_transition())
        .count()
}
