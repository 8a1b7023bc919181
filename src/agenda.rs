use std::thread;

use slog::{debug, warn, Logger};

use crate::candidate::ScoredCandidate;
use crate::errors::{Result, RubeamError};
use crate::feature::FeatureKey;
use crate::heap::{self, Heap};
use crate::transition::{State, TransitionSystem};

/// Bounded best-of-B collection of candidates.
///
/// The candidates form a min-heap on the score, so the root is the worst retained candidate.
pub struct Agenda<S, K> {
    beam_size: usize,
    confs: Vec<ScoredCandidate<S, K>>,
    reverse: bool,
    logger: Logger,
    trace: bool,
}

impl<S, K> Heap for Agenda<S, K>
where
    S: State,
{
    type Item = ScoredCandidate<S, K>;

    #[inline(always)]
    fn len(&self) -> usize {
        self.confs.len()
    }

    #[inline(always)]
    fn less(&self, i: usize, j: usize) -> bool {
        let (a, b) = (self.confs[i].score(), self.confs[j].score());
        if self.reverse {
            a > b
        } else {
            a < b
        }
    }

    #[inline(always)]
    fn swap(&mut self, i: usize, j: usize) {
        self.confs.swap(i, j);
    }

    fn push_item(&mut self, x: Self::Item) {
        self.confs.push(x);
    }

    fn pop_item(&mut self) -> Option<Self::Item> {
        self.confs.pop()
    }
}

impl<S, K> Agenda<S, K>
where
    S: State,
    K: FeatureKey,
{
    /// Creates an empty agenda retaining at most `beam_size` candidates.
    pub fn new(beam_size: usize, logger: Logger) -> Self {
        Self {
            beam_size,
            confs: Vec::with_capacity(beam_size),
            reverse: false,
            logger,
            trace: false,
        }
    }

    /// Enables per-operation debug records.
    pub const fn trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    /// Capacity.
    pub const fn beam_size(&self) -> usize {
        self.beam_size
    }

    /// Retained candidates in heap order.
    pub fn candidates(&self) -> &[ScoredCandidate<S, K>] {
        &self.confs
    }

    /// Worst retained candidate.
    pub fn peek(&self) -> Option<&ScoredCandidate<S, K>> {
        self.confs.first()
    }

    /// Removes every candidate, keeping the allocation.
    pub fn clear(&mut self) {
        self.confs.clear();
        self.reverse = false;
    }

    fn conf_str(&self) -> String {
        self.confs
            .iter()
            .map(|c| {
                let t = c.transition().map_or_else(String::new, |t| t.to_string());
                format!("{}:{}:{}", c.candidate_num(), t, c.score())
            })
            .collect::<Vec<_>>()
            .join(" , ")
    }

    /// Inserts a candidate, evicting the worst one when full and `c` is strictly better.
    ///
    /// Returns the best candidate seen so far: `best`, or `c` if its score is strictly greater.
    #[allow(clippy::neg_cmp_op_on_partial_ord)]
    pub fn add_candidate(
        &mut self,
        c: ScoredCandidate<S, K>,
        best: Option<ScoredCandidate<S, K>>,
    ) -> Option<ScoredCandidate<S, K>> {
        let best = match best {
            Some(b) if c.score() <= b.score() => b,
            _ => c.clone(),
        };
        if self.confs.len() < self.beam_size {
            heap::push(self, c);
            if self.trace {
                debug!(self.logger, "pushed onto agenda"; "agenda" => self.conf_str());
            }
            return Some(best);
        }
        let worst = match self.peek() {
            Some(worst) => worst.score(),
            // beam_size is 0
            None => return Some(best),
        };
        if !(worst < c.score()) {
            if self.trace {
                debug!(
                    self.logger, "not pushed onto agenda";
                    "transition" => ?c.transition(), "score" => c.score(), "worst" => worst
                );
            }
            return Some(best);
        }
        let popped = heap::pop(self);
        heap::push(self, c);
        if self.trace {
            debug!(
                self.logger, "replaced worst candidate";
                "popped" => ?popped.map(|p| p.score()), "agenda" => self.conf_str()
            );
        }
        Some(best)
    }

    /// Inserts candidates in order, see [`Agenda::add_candidate()`].
    pub fn add_candidates<I>(
        &mut self,
        cs: I,
        mut best: Option<ScoredCandidate<S, K>>,
    ) -> Option<ScoredCandidate<S, K>>
    where
        I: IntoIterator<Item = ScoredCandidate<S, K>>,
    {
        for c in cs {
            best = self.add_candidate(c, best);
        }
        if self.confs.len() > self.beam_size {
            warn!(self.logger, "agenda exceeded beam size"; "len" => self.confs.len());
        }
        best
    }

    /// Pushes a candidate without the beam-size eviction test.
    ///
    /// With `short` set and the agenda full, a candidate strictly worse than the root is dropped
    /// and any other candidate replaces the root.
    pub(crate) fn collect(&mut self, c: ScoredCandidate<S, K>, short: bool) {
        if short && self.confs.len() == self.beam_size {
            match self.peek() {
                Some(worst) if worst.score() > c.score() => return,
                Some(_) => {
                    heap::pop(self);
                }
                None => return,
            }
        }
        heap::push(self, c);
    }

    /// Consumes the agenda, returning the candidates in heap order.
    pub(crate) fn into_candidates(self) -> Vec<ScoredCandidate<S, K>> {
        self.confs
    }

    /// Returns `true` if a retained candidate stands for the same state as `gold`.
    ///
    /// # Errors
    ///
    /// [`RubeamError::Consistency`] is returned when neither of a compared pair is expanded.
    pub fn contains(&self, gold: &ScoredCandidate<S, K>) -> Result<bool> {
        for c in &self.confs {
            if c.same_state(gold)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Expands and returns the first candidate with the highest score, without reordering.
    ///
    /// # Errors
    ///
    /// [`RubeamError::Consistency`] is returned when the agenda is empty.
    pub fn top<T>(&mut self, system: &T) -> Result<ScoredCandidate<S, K>>
    where
        T: TransitionSystem<S> + ?Sized,
    {
        let mut best: Option<usize> = None;
        for (i, c) in self.confs.iter().enumerate() {
            if best.is_none_or(|b| c.score() > self.confs[b].score()) {
                best = Some(i);
            }
        }
        let i = best.ok_or(RubeamError::consistency("empty agenda has no top candidate"))?;
        self.confs[i].expand(system);
        Ok(self.confs[i].clone())
    }

    /// Sorts the agenda best first and returns the expanded winner.
    ///
    /// # Errors
    ///
    /// [`RubeamError::Consistency`] is returned when the agenda is empty.
    pub fn best<T>(&mut self, system: &T) -> Result<ScoredCandidate<S, K>>
    where
        T: TransitionSystem<S> + ?Sized,
    {
        if self.confs.is_empty() {
            return Err(RubeamError::consistency(
                "cannot retrieve the best candidate from an empty agenda",
            ));
        }
        if self.trace {
            self.renumber();
            debug!(self.logger, "agenda pre sort"; "agenda" => self.conf_str());
        }
        self.reverse = true;
        heap::sort_heap(self);
        self.reverse = false;
        if self.trace {
            debug!(self.logger, "agenda after sort"; "agenda" => self.conf_str());
        }
        self.confs[0].expand(system);
        Ok(self.confs[0].clone())
    }

    fn renumber(&mut self) {
        for (i, c) in self.confs.iter_mut().enumerate() {
            c.set_candidate_num(i);
        }
    }

    /// Expands every retained candidate and returns copies of them as the input of the next round,
    /// together with a flag telling whether all of them were terminal before the expansion.
    /// The expansions are split across `n_threads` threads.
    pub fn top_b<T>(&mut self, system: &T, n_threads: usize) -> (Vec<ScoredCandidate<S, K>>, bool)
    where
        T: TransitionSystem<S> + ?Sized,
    {
        let all_terminal = self.confs.iter().all(ScoredCandidate::is_terminal);
        let n_threads = n_threads.min(self.confs.len());
        if n_threads > 1 {
            let chunk_size = self.confs.len().div_ceil(n_threads);
            thread::scope(|scope| {
                for chunk in self.confs.chunks_mut(chunk_size) {
                    scope.spawn(move || {
                        for c in chunk {
                            c.expand(system);
                        }
                    });
                }
            });
        } else {
            for c in &mut self.confs {
                c.expand(system);
            }
        }
        (self.confs.clone(), all_terminal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use crate::test_utils::{initial_state, BitState, BitSystem};
    use crate::transition::Transition;

    type Cand = ScoredCandidate<BitState, u32>;

    fn logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    fn cands(scores: &[i64]) -> Vec<Cand> {
        let start = Cand::initial(initial_state(&[1, 0, 1]), false);
        scores
            .iter()
            .enumerate()
            .map(|(i, &s)| start.successor(Transition::new(b'B', i % 2), s, None, i, 0))
            .collect()
    }

    fn sorted_scores(agenda: &Agenda<BitState, u32>) -> Vec<i64> {
        let mut scores: Vec<_> = agenda.candidates().iter().map(|c| c.score() as i64).collect();
        scores.sort_unstable();
        scores
    }

    #[test]
    fn test_capacity() {
        let mut agenda = Agenda::new(3, logger());
        let mut best = None;
        for c in cands(&[5, 1, 7, 3, 9, 2, 8]) {
            best = agenda.add_candidate(c, best);
            assert!(agenda.len() <= 3);
        }
        // Popping 1 leaves [7, 5]: a lone child is only swapped up on a tie, so 7 stays at the
        // root and 5 is never the eviction target again.
        assert_eq!(vec![5, 8, 9], sorted_scores(&agenda));
        assert_eq!(9.0, best.unwrap().score());
        assert_eq!(8.0, agenda.peek().unwrap().score());
    }

    #[test]
    fn test_tie_with_worst_is_discarded() {
        let mut agenda = Agenda::new(2, logger());
        let best = agenda.add_candidates(cands(&[4, 6, 4]), None);
        assert_eq!(vec![4, 6], sorted_scores(&agenda));
        assert_eq!(0, agenda.peek().unwrap().candidate_num());
        assert_eq!(1, best.as_ref().unwrap().candidate_num());

        // an equal score does not replace the best seen so far
        let best = agenda.add_candidate(cands(&[4, 6, 4, 6])[3].clone(), best);
        assert_eq!(vec![6, 6], sorted_scores(&agenda));
        assert_eq!(1, best.unwrap().candidate_num());
        let mut nums: Vec<_> = agenda.candidates().iter().map(|c| c.candidate_num()).collect();
        nums.sort_unstable();
        assert_eq!(vec![1, 3], nums);
    }

    #[test]
    fn test_best_seen_across_pruning() {
        let mut agenda = Agenda::new(0, logger());
        let best = agenda.add_candidates(cands(&[1, 3, 2]), None);
        assert!(agenda.is_empty());
        assert_eq!(3.0, best.unwrap().score());
    }

    #[test]
    fn test_best_and_top() {
        let mut agenda = Agenda::new(4, logger());
        agenda.add_candidates(cands(&[2, 9, 4, 9]), None);
        let top = agenda.top(&BitSystem).unwrap();
        assert_eq!(1, top.candidate_num());
        assert!(top.is_expanded());

        let best = agenda.best(&BitSystem).unwrap();
        assert_eq!(9.0, best.score());
        assert!(best.is_expanded());
        let scores: Vec<_> = agenda.candidates().iter().map(|c| c.score()).collect();
        assert_eq!(vec![9.0, 9.0, 4.0, 2.0], scores);

        agenda.clear();
        assert!(agenda.best(&BitSystem).is_err());
        assert!(agenda.top(&BitSystem).is_err());
    }

    #[test]
    fn test_capacity_random() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let beam_size = rng.gen_range(1..6);
            let n = rng.gen_range(0..30);
            let scores: Vec<i64> = (0..n).map(|_| rng.gen_range(-5..5)).collect();
            let mut agenda = Agenda::new(beam_size, logger());
            let mut best: Option<Cand> = None;
            for (i, c) in cands(&scores).into_iter().enumerate() {
                let len = agenda.len();
                let worst = agenda.peek().map(ScoredCandidate::score);
                let before = sorted_scores(&agenda);
                best = agenda.add_candidate(c, best);

                assert!(agenda.len() <= beam_size);
                if len < beam_size {
                    assert_eq!(len + 1, agenda.len());
                    assert!(sorted_scores(&agenda).contains(&scores[i]));
                } else if worst.is_some_and(|w| w < scores[i] as f64) {
                    assert_eq!(len, agenda.len());
                    assert!(sorted_scores(&agenda).contains(&scores[i]));
                } else {
                    assert_eq!(before, sorted_scores(&agenda));
                }
                let max = scores[..=i].iter().max().map(|&m| m as f64);
                assert_eq!(max, best.as_ref().map(ScoredCandidate::score));
            }
        }
    }

    #[test]
    fn test_top_b() {
        for n_threads in [1, 2, 8] {
            let mut agenda = Agenda::new(3, logger());
            agenda.add_candidates(cands(&[1, 2, 3]), None);
            let (next, all_terminal) = agenda.top_b(&BitSystem, n_threads);
            assert!(!all_terminal);
            assert_eq!(3, next.len());
            assert!(next.iter().all(|c| c.is_expanded() && c.len() == 2));
            assert!(agenda.candidates().iter().all(ScoredCandidate::is_expanded));
        }

        let mut agenda = Agenda::new(1, logger());
        let start = Cand::initial(initial_state(&[]), false);
        agenda.add_candidate(start, None);
        let (next, all_terminal) = agenda.top_b(&BitSystem, 2);
        assert!(all_terminal);
        assert_eq!(1, next.len());
    }

    #[test]
    fn test_contains() {
        let mut agenda = Agenda::new(2, logger());
        let cs = cands(&[1, 2]);
        agenda.add_candidates(cs.clone(), None);

        let mut gold = cs[1].clone();
        gold.expand(&BitSystem);
        assert!(agenda.contains(&gold).unwrap());

        let s0 = Arc::new(initial_state(&[1, 0, 1]));
        let s1 = Arc::new(BitSystem.transition(&s0, Transition::new(b'B', 1)));
        let other = Cand::initial(BitSystem.transition(&s1, Transition::new(b'B', 1)), false);
        assert!(!agenda.contains(&other).unwrap());

        assert!(agenda.contains(&cs[0]).is_err());
    }

    #[test]
    fn test_collect_short() {
        let mut temp = Agenda::new(2, logger());
        for c in cands(&[3, 1, 5, 3]) {
            temp.collect(c, true);
        }
        assert_eq!(vec![3, 5], sorted_scores(&temp));

        let mut temp = Agenda::new(2, logger());
        for c in cands(&[3, 1, 5, 3]) {
            temp.collect(c, false);
        }
        assert_eq!(4, temp.into_candidates().len());
    }
}
