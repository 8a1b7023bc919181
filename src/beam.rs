//! Beam-search scheduler.
//!
//! Every round expands the retained candidates, scores their legal transitions against a
//! [`WeightStore`], and keeps the best successors on an [`Agenda`]. With a gold sequence the search
//! stops as soon as the gold state falls out of the beam (early update).

use std::panic;
use std::sync::Arc;
use std::thread;

use slog::{debug, o, warn, Logger};

use crate::agenda::Agenda;
use crate::candidate::ScoredCandidate;
use crate::errors::{Result, RubeamError};
use crate::feature::{FeatureStep, FeatureVector};
use crate::model::WeightStore;
use crate::score::ScorePool;
use crate::transition::{
    shared_transitions, FeatureExtractor, Oracle, State, Transition, TransitionSystem,
};

/// Hard limit of search rounds.
pub const MAX_ROUNDS: usize = 800;

/// Debug records to emit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Trace {
    /// Agenda insertions, evictions and sorts.
    pub agenda: bool,

    /// Extracted feature vectors.
    pub features: bool,

    /// Per-round progress.
    pub rounds: bool,
}

/// Configuration of a [`Beam`].
#[derive(Clone, Debug)]
pub struct BeamConfig {
    beam_size: usize,
    estimated_transitions: usize,
    averaged: bool,
    n_threads: usize,
    short_temp_agenda: bool,
    dense_score_buffers: bool,
    pool_capacity: usize,
    integration_generation: Option<u64>,
    return_model_value: bool,
    return_sequence: bool,
    max_rounds: usize,
    logger: Logger,
    trace: Trace,
}

impl BeamConfig {
    /// Creates a configuration for a beam of the given size.
    ///
    /// # Errors
    ///
    /// [`RubeamError::InvalidArgument`] is returned when `beam_size` is 0.
    pub fn new(beam_size: usize) -> Result<Self> {
        if beam_size == 0 {
            return Err(RubeamError::invalid_argument("beam_size must not be 0"));
        }
        Ok(Self {
            beam_size,
            estimated_transitions: beam_size,
            averaged: false,
            n_threads: 1,
            short_temp_agenda: false,
            dense_score_buffers: false,
            pool_capacity: beam_size,
            integration_generation: None,
            return_model_value: false,
            return_sequence: false,
            max_rounds: MAX_ROUNDS,
            logger: Logger::root(slog::Discard, o!()),
            trace: Trace::default(),
        })
    }

    /// Sets the expected number of legal transitions per state, which sizes the temporary agenda
    /// of every expansion.
    ///
    /// # Errors
    ///
    /// [`RubeamError::InvalidArgument`] is returned when `n` is 0.
    pub fn estimated_transitions(mut self, n: usize) -> Result<Self> {
        if n == 0 {
            return Err(RubeamError::invalid_argument(
                "estimated_transitions must not be 0",
            ));
        }
        self.estimated_transitions = n;
        Ok(self)
    }

    /// Ranks candidates by the sum of their per-assignment means instead of the plain sum.
    pub const fn averaged(mut self, averaged: bool) -> Self {
        self.averaged = averaged;
        self
    }

    /// Sets the number of threads expanding the candidates of a round.
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

    /// Bounds the temporary agenda of every expansion by the beam size. Candidates worse than
    /// the worst one kept are dropped before they reach the shared agenda.
    pub const fn short_temp_agenda(mut self, short: bool) -> Self {
        self.short_temp_agenda = short;
        self
    }

    /// Uses array-backed scoring buffers.
    pub const fn dense_score_buffers(mut self, dense: bool) -> Self {
        self.dense_score_buffers = dense;
        self
    }

    /// Sets the number of idle scoring buffers kept for reuse.
    pub const fn pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    /// Scores with weights integrated at the given generation instead of the raw weights.
    pub const fn integration_generation(mut self, generation: Option<u64>) -> Self {
        self.integration_generation = generation;
        self
    }

    /// Keeps the whole feature history of every candidate and returns it with parse results.
    pub const fn return_model_value(mut self, yes: bool) -> Self {
        self.return_model_value = yes;
        self
    }

    /// Returns the state sequence with parse results.
    pub const fn return_sequence(mut self, yes: bool) -> Self {
        self.return_sequence = yes;
        self
    }

    /// Sets the hard limit of search rounds.
    ///
    /// # Errors
    ///
    /// [`RubeamError::InvalidArgument`] is returned when `n` is 0.
    pub fn max_rounds(mut self, n: usize) -> Result<Self> {
        if n == 0 {
            return Err(RubeamError::invalid_argument("max_rounds must not be 0"));
        }
        self.max_rounds = n;
        Ok(self)
    }

    /// Sets the logger.
    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Sets the debug records to emit.
    pub const fn trace(mut self, trace: Trace) -> Self {
        self.trace = trace;
        self
    }

    /// Beam size.
    pub const fn beam_size(&self) -> usize {
        self.beam_size
    }

    /// Hard limit of search rounds.
    pub const fn rounds_limit(&self) -> usize {
        self.max_rounds
    }
}

/// Outcome of [`Beam::parse()`].
#[derive(Debug)]
pub struct ParseResult<S, K> {
    /// Final state.
    pub state: Arc<S>,

    /// Score of the final state.
    pub score: f64,

    /// Feature history of the final state, if requested.
    pub model_value: Option<Arc<FeatureStep<K>>>,

    /// States from the final one back to the initial one, if requested.
    pub sequence: Option<Vec<S>>,
}

/// Reference candidates of a training instance, from the initial state to the terminal one.
#[derive(Debug)]
pub struct GoldSequence<S, K> {
    candidates: Vec<ScoredCandidate<S, K>>,
}

#[allow(clippy::len_without_is_empty)]
impl<S, K> GoldSequence<S, K> {
    /// Candidates, oldest first. The first one holds the initial state.
    pub fn candidates(&self) -> &[ScoredCandidate<S, K>] {
        &self.candidates
    }

    /// Number of states, including the initial one.
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Terminal candidate, carrying the whole gold feature history.
    pub fn last(&self) -> &ScoredCandidate<S, K> {
        // never empty: built from the initial state onward
        &self.candidates[self.candidates.len() - 1]
    }
}

/// Outcome of [`Beam::decode_early_update()`].
#[derive(Debug)]
pub struct EarlyUpdate<S, K> {
    /// Candidate the search stopped with.
    pub predicted: ScoredCandidate<S, K>,

    /// Gold candidate at the same depth.
    pub gold: ScoredCandidate<S, K>,

    /// Predicted feature steps from the first wrong transition on.
    pub predicted_features: Option<Arc<FeatureStep<K>>>,

    /// Gold feature steps from the first wrong transition on.
    pub gold_features: Option<Arc<FeatureStep<K>>>,

    /// Number of transitions made before the gold state fell out of the beam, or [`None`] if the
    /// search reached a terminal state first.
    pub early_update_at: Option<usize>,

    /// Number of gold transitions.
    pub gold_len: usize,

    /// Score of the predicted candidate.
    pub score: f64,
}

impl<S, K> EarlyUpdate<S, K>
where
    S: State,
{
    /// Returns `true` if the predicted state differs from the gold one.
    pub fn is_error(&self) -> bool {
        *self.predicted.state() != *self.gold.state()
    }
}

struct SearchOutcome<S, K> {
    best: ScoredCandidate<S, K>,
    gold_index: usize,
    early_update_at: Option<usize>,
    rounds: usize,
}

/// Beam-search decoder.
pub struct Beam<S, T, E>
where
    S: State,
    E: FeatureExtractor<S>,
{
    base: S,
    system: T,
    extractor: E,
    config: BeamConfig,
    pool: ScorePool,
}

impl<S, T, E> Beam<S, T, E>
where
    S: State,
    T: TransitionSystem<S>,
    E: FeatureExtractor<S>,
{
    /// Creates a decoder. Every search starts from a cleared copy of `base` initialized with the
    /// problem.
    pub fn new(base: S, system: T, extractor: E, config: BeamConfig) -> Self {
        let pool = ScorePool::new(config.dense_score_buffers, config.pool_capacity);
        Self {
            base,
            system,
            extractor,
            config,
            pool,
        }
    }

    /// Configuration.
    pub const fn config(&self) -> &BeamConfig {
        &self.config
    }

    /// Transition system.
    pub const fn system(&self) -> &T {
        &self.system
    }

    /// Feature extractor.
    pub const fn extractor(&self) -> &E {
        &self.extractor
    }

    fn initial_state(&self, problem: &S::Problem) -> S {
        let mut state = self.base.clone();
        state.clear();
        state.init(problem);
        state
    }

    /// Scores every legal transition of `candidate` and emits one successor per transition, or
    /// the candidate itself if no transition is legal. Emission stops when `emit` returns
    /// `false`.
    fn expand(
        &self,
        candidate: &ScoredCandidate<S, E::Key>,
        candidate_num: usize,
        model: &WeightStore<E::Key>,
        history: bool,
        emit: &mut dyn FnMut(ScoredCandidate<S, E::Key>) -> bool,
    ) -> Result<()> {
        let state = candidate.state();
        let mut scores = self.pool.acquire();
        let (kind, transitions) = self.system.transitions(state);
        scores.set_transitions(&transitions);
        let integrated = match self.config.integration_generation {
            Some(generation) => {
                scores.set_generation(generation);
                true
            }
            None => false,
        };
        let features: FeatureVector<E::Key> = self
            .extractor
            .features(state, false, kind, &transitions)
            .into();
        if self.config.trace.features {
            debug!(
                self.config.logger, "features";
                "candidate" => candidate_num, "features" => ?features
            );
        }
        let result = model.set_transition_scores(&features, &mut scores, integrated);
        if result.is_ok() {
            if transitions.is_empty() {
                emit(candidate.clone());
            }
            let previous = if history {
                candidate.features().cloned()
            } else {
                None
            };
            for (trans_num, &t) in transitions.iter().enumerate() {
                let transition = Transition::new(kind, t);
                let step =
                    FeatureStep::new(Arc::clone(&features), transition, previous.clone());
                let score = scores.get(t).unwrap_or(0);
                let successor =
                    candidate.successor(transition, score, Some(step), candidate_num, trans_num);
                if !emit(successor) {
                    break;
                }
            }
        }
        self.pool.release(scores);
        result
    }

    fn temp_agenda(&self) -> Agenda<S, E::Key> {
        let size = if self.config.short_temp_agenda {
            self.config.beam_size
        } else {
            self.config.estimated_transitions
        };
        Agenda::new(size, self.config.logger.clone())
    }

    /// Expands every candidate and merges the successors into `agenda` in candidate order.
    /// Returns the best successor seen.
    fn expand_round(
        &self,
        candidates: &[ScoredCandidate<S, E::Key>],
        model: &WeightStore<E::Key>,
        history: bool,
        agenda: &mut Agenda<S, E::Key>,
    ) -> Result<Option<ScoredCandidate<S, E::Key>>> {
        let short = self.config.short_temp_agenda;
        let mut best = None;
        let n_threads = self.config.n_threads.min(candidates.len());
        if n_threads <= 1 {
            for (i, candidate) in candidates.iter().enumerate() {
                let mut temp = self.temp_agenda();
                self.expand(candidate, i, model, history, &mut |c| {
                    temp.collect(c, short);
                    true
                })?;
                best = agenda.add_candidates(temp.into_candidates(), best);
            }
            return Ok(best);
        }
        let (s, r) = crossbeam_channel::unbounded();
        for job in candidates.iter().enumerate() {
            s.send(job)
                .map_err(|_| RubeamError::consistency("expansion channel closed"))?;
        }
        let (result_s, result_r) = crossbeam_channel::unbounded();
        thread::scope(|scope| {
            let workers: Vec<_> = (0..n_threads)
                .map(|_| {
                    let r = r.clone();
                    let result_s = result_s.clone();
                    scope.spawn(move || {
                        while let Ok((i, candidate)) = r.try_recv() {
                            let mut temp = self.temp_agenda();
                            let expanded = self.expand(candidate, i, model, history, &mut |c| {
                                temp.collect(c, short);
                                true
                            });
                            let result = expanded.map(|()| temp.into_candidates());
                            if result_s.send((i, result)).is_err() {
                                break;
                            }
                        }
                    })
                })
                .collect();
            for handle in workers {
                if let Err(e) = handle.join() {
                    panic::resume_unwind(e);
                }
            }
        });
        drop(result_s);
        let mut temps: Vec<Option<Result<Vec<_>>>> = candidates.iter().map(|_| None).collect();
        for (i, temp) in result_r.try_iter() {
            temps[i] = Some(temp);
        }
        for temp in temps {
            let temp = temp.ok_or(RubeamError::consistency("candidate was not expanded"))?;
            best = agenda.add_candidates(temp?, best);
        }
        Ok(best)
    }

    fn search(
        &self,
        problem: &S::Problem,
        model: &WeightStore<E::Key>,
        gold: Option<&GoldSequence<S, E::Key>>,
        history: bool,
    ) -> Result<SearchOutcome<S, E::Key>> {
        let logger = &self.config.logger;
        let start = ScoredCandidate::initial(self.initial_state(problem), self.config.averaged);
        let mut candidates = vec![start];
        let mut agenda =
            Agenda::new(self.config.beam_size, logger.clone()).trace(self.config.trace.agenda);
        let mut gold_index = 0;
        let mut early_update_at = None;
        let mut rounds = 0;
        let mut best;
        loop {
            let mut best_beam: Option<usize> = None;
            let mut gold_exists = false;
            if let Some(gold) = gold {
                let gold_value = &gold.candidates[gold_index];
                for (i, c) in candidates.iter().enumerate() {
                    if best_beam.is_none_or(|b| c.score() > candidates[b].score()) {
                        best_beam = Some(i);
                    }
                    if c.same_state(gold_value)? {
                        gold_exists = true;
                    }
                }
            }

            best = self.expand_round(&candidates, model, history, &mut agenda)?;
            rounds += 1;

            if let Some(gold) = gold {
                if !gold_exists || gold_index + 1 >= gold.len() {
                    let b = best_beam.ok_or(RubeamError::consistency(
                        "early update without a beam candidate",
                    ))?;
                    let at = gold_index.min(candidates[b].len().saturating_sub(1));
                    if self.config.trace.rounds {
                        debug!(
                            logger, "early update";
                            "at" => at, "gold_in_beam" => gold_exists, "round" => rounds
                        );
                    }
                    early_update_at = Some(at);
                    best = Some(candidates.swap_remove(b));
                    break;
                }
                gold_index += 1;
                best = Some(agenda.top(&self.system)?);
            }

            let all_terminal;
            (candidates, all_terminal) = agenda.top_b(&self.system, self.config.n_threads);

            if self.config.trace.rounds {
                debug!(
                    logger, "round";
                    "round" => rounds,
                    "candidates" => candidates.len(),
                    "best" => best.as_ref().map_or(f64::NAN, ScoredCandidate::score)
                );
            }

            let goal = match best.as_mut() {
                Some(b) if all_terminal || gold.is_some() => {
                    b.expand(&self.system);
                    b.is_terminal()
                }
                _ => false,
            };
            if goal {
                break;
            }
            if rounds > self.config.max_rounds {
                warn!(logger, "search exceeded the round limit"; "rounds" => rounds);
                break;
            }
            agenda.clear();
        }
        let best = match (gold, best) {
            (None, _) => agenda.best(&self.system)?,
            (Some(_), Some(best)) => best,
            (Some(_), None) => {
                return Err(RubeamError::consistency("search ended without a candidate"))
            }
        };
        Ok(SearchOutcome {
            best,
            gold_index,
            early_update_at,
            rounds,
        })
    }

    /// Searches the best terminal state for the problem.
    ///
    /// # Errors
    ///
    /// Errors of the weight store are propagated, e.g. when the extractor produces more
    /// feature slots than the model has.
    pub fn parse(
        &self,
        problem: &S::Problem,
        model: &WeightStore<E::Key>,
    ) -> Result<ParseResult<S, E::Key>> {
        let outcome = self.search(problem, model, None, self.config.return_model_value)?;
        let best = outcome.best;
        if self.config.trace.rounds {
            debug!(
                self.config.logger, "parsed";
                "rounds" => outcome.rounds, "score" => best.score()
            );
        }
        let model_value = if self.config.return_model_value {
            best.features().cloned()
        } else {
            None
        };
        let sequence = self
            .config
            .return_sequence
            .then(|| best.state().sequence().into_iter().cloned().collect());
        Ok(ParseResult {
            score: best.score(),
            state: Arc::clone(best.state()),
            model_value,
            sequence,
        })
    }

    /// Runs the oracle from the initial state of the problem to a terminal state and extracts
    /// the features of every gold step.
    ///
    /// Returns [`None`] if the oracle gives up or does not reach a terminal state within the
    /// round limit.
    pub fn decode_gold<O>(
        &self,
        oracle: &O,
        problem: &S::Problem,
    ) -> Option<GoldSequence<S, E::Key>>
    where
        O: Oracle<S> + ?Sized,
    {
        let mut current = ScoredCandidate::initial(self.initial_state(problem), false);
        let mut candidates = vec![current.clone()];
        while !current.is_terminal() {
            if candidates.len() > self.config.max_rounds {
                warn!(self.config.logger, "oracle exceeded the round limit");
                return None;
            }
            let Some(transition) = oracle.transition(current.state()) else {
                debug!(
                    self.config.logger, "oracle has no transition";
                    "step" => candidates.len() - 1
                );
                return None;
            };
            let features: FeatureVector<E::Key> = self
                .extractor
                .features(current.state(), false, transition.kind, &[transition.value])
                .into();
            let step = FeatureStep::new(features, transition, current.features().cloned());
            current = current.successor(transition, 0, Some(step), 0, 0);
            current.expand(&self.system);
            candidates.push(current.clone());
        }
        Some(GoldSequence { candidates })
    }

    /// Searches with early update against a gold sequence and returns the feature histories to
    /// update the model with. Both histories start at the first transition where the prediction
    /// leaves the gold path.
    ///
    /// # Errors
    ///
    /// [`RubeamError::Consistency`] is returned when the search breaks a candidate contract.
    pub fn decode_early_update(
        &self,
        problem: &S::Problem,
        gold: &GoldSequence<S, E::Key>,
        model: &WeightStore<E::Key>,
    ) -> Result<EarlyUpdate<S, E::Key>> {
        let outcome = self.search(problem, model, Some(gold), true)?;
        let predicted = outcome.best;
        let gold_value = gold.candidates[outcome.gold_index].clone();

        let predicted_seq = predicted.state().sequence();
        let gold_seq = gold_value.state().sequence();
        // the initial states always agree
        let shared = shared_transitions(&predicted_seq, &gold_seq).saturating_sub(1);
        let keep_predicted = (predicted_seq.len() - 1).saturating_sub(shared);
        let keep_gold = (gold_seq.len() - 1).saturating_sub(shared);
        let predicted_features = predicted
            .features()
            .and_then(|f| f.truncated(keep_predicted));
        let gold_features = gold_value.features().and_then(|f| f.truncated(keep_gold));

        if self.config.trace.rounds {
            debug!(
                self.config.logger, "decoded with early update";
                "early_update_at" => ?outcome.early_update_at,
                "shared" => shared,
                "predicted" => predicted_seq.len() - 1,
                "gold" => gold.len() - 1
            );
        }

        Ok(EarlyUpdate {
            score: predicted.score(),
            predicted,
            gold: gold_value,
            predicted_features,
            gold_features,
            early_update_at: outcome.early_update_at,
            gold_len: gold.len() - 1,
        })
    }
}
