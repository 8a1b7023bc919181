use std::sync::Arc;

use crate::errors::{Result, RubeamError};
use crate::feature::FeatureStep;
use crate::transition::{State, Transition, TransitionSystem};

/// Scores accumulated for one assignment slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AssignmentScore {
    /// Sum of the scores.
    pub total: i64,

    /// Number of scores.
    pub count: u16,
}

impl AssignmentScore {
    #[inline(always)]
    fn add(&mut self, score: i64) {
        self.total += score;
        self.count += 1;
    }

    /// Mean score, 0 if empty.
    #[inline(always)]
    pub fn average(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.total as f64 / f64::from(self.count)
    }
}

/// Per-assignment running scores of a candidate.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScoreState(Vec<AssignmentScore>);

impl ScoreState {
    /// Adds a score to an assignment slot, growing the state with empty slots if needed.
    pub fn add(&mut self, score: i64, assignment: u16) {
        let i = usize::from(assignment);
        if self.0.len() <= i {
            self.0.resize(i + 1, AssignmentScore::default());
        }
        self.0[i].add(score);
    }

    /// Sum of every score.
    pub fn total(&self) -> f64 {
        self.0.iter().map(|a| a.total).sum::<i64>() as f64
    }

    /// Sum of the per-slot means.
    pub fn average(&self) -> f64 {
        self.0.iter().map(AssignmentScore::average).sum()
    }

    /// Slots.
    pub fn slots(&self) -> &[AssignmentScore] {
        &self.0
    }
}

/// State on the beam together with its score and feature history.
///
/// A candidate produced by an expansion is not expanded yet: it holds the state it came from and
/// the pending transition. [`ScoredCandidate::expand()`] applies the transition.
#[derive(Debug)]
pub struct ScoredCandidate<S, K> {
    state: Arc<S>,
    transition: Option<Transition>,
    scores: ScoreState,
    features: Option<Arc<FeatureStep<K>>>,
    candidate_num: usize,
    trans_num: usize,
    expanded: bool,
    averaged: bool,
}

impl<S, K> Clone for ScoredCandidate<S, K> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            transition: self.transition,
            scores: self.scores.clone(),
            features: self.features.clone(),
            candidate_num: self.candidate_num,
            trans_num: self.trans_num,
            expanded: self.expanded,
            averaged: self.averaged,
        }
    }
}

#[allow(clippy::len_without_is_empty)]
impl<S, K> ScoredCandidate<S, K>
where
    S: State,
{
    /// Creates the candidate of an initial state.
    pub fn initial(state: S, averaged: bool) -> Self {
        Self {
            state: Arc::new(state),
            transition: None,
            scores: ScoreState::default(),
            features: None,
            candidate_num: 0,
            trans_num: 0,
            expanded: true,
            averaged,
        }
    }

    /// Creates an unexpanded successor that applies `transition` with the given score.
    ///
    /// `features` is the history of the successor: its newest step holds the features of this
    /// candidate's state and `transition`.
    pub fn successor(
        &self,
        transition: Transition,
        score: i64,
        features: Option<Arc<FeatureStep<K>>>,
        candidate_num: usize,
        trans_num: usize,
    ) -> Self {
        let mut scores = self.scores.clone();
        scores.add(score, self.state.assignment());
        Self {
            state: Arc::clone(&self.state),
            transition: Some(transition),
            scores,
            features,
            candidate_num,
            trans_num,
            expanded: false,
            averaged: self.averaged,
        }
    }

    /// Score used for ranking.
    #[inline(always)]
    pub fn score(&self) -> f64 {
        if self.averaged {
            self.scores.average()
        } else {
            self.scores.total()
        }
    }

    /// Adds a score to an assignment slot.
    pub fn add_score(&mut self, score: i64, assignment: u16) {
        self.scores.add(score, assignment);
    }

    /// Applies the pending transition, if any.
    pub fn expand<T>(&mut self, system: &T)
    where
        T: TransitionSystem<S> + ?Sized,
    {
        if self.expanded {
            return;
        }
        if let Some(t) = self.transition {
            self.state = Arc::new(system.transition(&self.state, t));
        }
        self.expanded = true;
    }

    /// Compares the states two candidates stand for. An unexpanded candidate matches an
    /// expanded one when its pending transition and its state are the last transition and the
    /// previous state of the other.
    ///
    /// # Errors
    ///
    /// [`RubeamError::Consistency`] is returned when neither candidate is expanded.
    pub fn same_state(&self, other: &Self) -> Result<bool> {
        match (self.expanded, other.expanded) {
            (true, true) => Ok(*self.state == *other.state),
            (true, false) => other.same_state(self),
            (false, true) => Ok(self.transition == other.state.last_transition()
                && other.state.previous() == Some(&*self.state)),
            (false, false) => Err(RubeamError::consistency(
                "cannot compare two unexpanded candidates",
            )),
        }
    }

    /// Returns `true` if the current state is terminal. An unexpanded candidate reports the
    /// state it was created from.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Number of states in the sequence of the current state.
    pub fn len(&self) -> usize {
        self.state.len()
    }

    /// Current state.
    pub fn state(&self) -> &Arc<S> {
        &self.state
    }

    /// Pending transition of an unexpanded candidate, or the last applied one.
    pub const fn transition(&self) -> Option<Transition> {
        self.transition
    }

    /// Feature history.
    pub fn features(&self) -> Option<&Arc<FeatureStep<K>>> {
        self.features.as_ref()
    }

    /// Running scores.
    pub const fn scores(&self) -> &ScoreState {
        &self.scores
    }

    /// Index of the candidate this one was expanded from.
    pub const fn candidate_num(&self) -> usize {
        self.candidate_num
    }

    /// Index among the successors of the same candidate.
    pub const fn trans_num(&self) -> usize {
        self.trans_num
    }

    /// Returns `true` if the pending transition is applied.
    pub const fn is_expanded(&self) -> bool {
        self.expanded
    }

    pub(crate) fn set_candidate_num(&mut self, i: usize) {
        self.candidate_num = i;
    }
}
