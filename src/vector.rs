use std::sync::{Mutex, RwLock};

use bincode::{Decode, Encode};
use hashbrown::HashMap;

use crate::errors::{Result, RubeamError};
use crate::feature::FeatureKey;
use crate::score::ScoreBuffer;
use crate::utils::{self, FromU64};

/// One lazily averaged parameter.
///
/// The sum of the value over all generations is kept as `total` up to `generation`, and the
/// value is assumed constant from `generation` on. Folding elapsed time into `total` only
/// happens when a write lands in a newer generation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HistoryValue {
    generation: u64,
    prev_generation: u64,
    value: i64,
    total: i64,
}

impl HistoryValue {
    /// Creates a parameter first written at `generation`.
    #[inline(always)]
    pub const fn new(generation: u64, value: i64) -> Self {
        Self {
            generation,
            prev_generation: generation,
            value,
            total: 0,
        }
    }

    /// Adds `amount` to the value, effective from `generation` on.
    #[inline(always)]
    pub fn add(&mut self, generation: u64, amount: i64) {
        if self.generation < generation {
            self.total += i64::from_u64(generation - self.generation) * self.value;
            self.prev_generation = self.generation;
            self.generation = generation;
        }
        self.value += amount;
    }

    /// Current raw value.
    #[inline(always)]
    pub const fn value(&self) -> i64 {
        self.value
    }

    /// Generation of the last write.
    #[inline(always)]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Generation of the write before the last one.
    #[inline(always)]
    pub const fn prev_generation(&self) -> u64 {
        self.prev_generation
    }

    /// Sum of the value over every generation before `generation`.
    #[inline(always)]
    pub fn integrated_value(&self, generation: u64) -> i64 {
        self.total
            + (i64::from_u64(generation) - i64::from_u64(self.generation)) * self.value
    }

    /// Replaces the value with its integral up to `generation`.
    #[inline(always)]
    pub fn integrate(&mut self, generation: u64) {
        self.value = self.integrated_value(generation);
    }

    #[inline(always)]
    fn divide(&mut self, n: i64) {
        self.value /= n;
    }
}

/// Backing representation of the per-transition cells of a feature.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Decode, Encode)]
pub enum StoreKind {
    /// Array indexed by the transition identifier.
    Dense,

    /// Map keyed by the transition identifier.
    #[default]
    Sparse,

    /// Array for identifiers below `cutoff`, map for the rest.
    Hybrid {
        /// First identifier stored in the map.
        cutoff: usize,
    },
}

impl StoreKind {
    /// Checks the configuration.
    pub fn validate(self) -> Result<Self> {
        if let Self::Hybrid { cutoff: 0 } = self {
            return Err(RubeamError::invalid_argument("hybrid cutoff must not be 0"));
        }
        Ok(self)
    }

    #[inline(always)]
    const fn cutoff(self) -> usize {
        match self {
            Self::Dense => usize::MAX,
            Self::Sparse => 0,
            Self::Hybrid { cutoff } => cutoff,
        }
    }
}

#[derive(Debug)]
struct Cells {
    cutoff: usize,
    dense: Vec<Option<Mutex<HistoryValue>>>,
    sparse: HashMap<usize, Mutex<HistoryValue>>,
}

impl Cells {
    fn new(kind: StoreKind) -> Self {
        Self {
            cutoff: kind.cutoff(),
            dense: vec![],
            sparse: HashMap::new(),
        }
    }

    #[inline(always)]
    fn get(&self, transition: usize) -> Option<&Mutex<HistoryValue>> {
        if transition < self.cutoff {
            self.dense.get(transition).and_then(Option::as_ref)
        } else {
            self.sparse.get(&transition)
        }
    }

    fn insert(&mut self, transition: usize, value: HistoryValue) {
        if transition < self.cutoff {
            if self.dense.len() <= transition {
                self.dense.resize_with(transition + 1, || None);
            }
            self.dense[transition] = Some(Mutex::new(value));
        } else {
            self.sparse.insert(transition, Mutex::new(value));
        }
    }

    fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(usize, &Mutex<HistoryValue>),
    {
        for (t, cell) in self.dense.iter().enumerate() {
            if let Some(cell) = cell {
                f(t, cell);
            }
        }
        for (&t, cell) in &self.sparse {
            f(t, cell);
        }
    }

    fn len(&self) -> usize {
        self.dense.iter().filter(|c| c.is_some()).count() + self.sparse.len()
    }
}

/// Per-transition cells of one feature. New cells take the write lock, existing cells are
/// updated under their own lock.
#[derive(Debug)]
struct TransitionStore {
    cells: RwLock<Cells>,
}

impl TransitionStore {
    fn new(kind: StoreKind) -> Self {
        Self {
            cells: RwLock::new(Cells::new(kind)),
        }
    }

    fn add(&self, generation: u64, transition: usize, amount: i64) {
        {
            let cells = utils::read(&self.cells);
            if let Some(cell) = cells.get(transition) {
                utils::lock(cell).add(generation, amount);
                return;
            }
        }
        let mut cells = utils::write(&self.cells);
        if let Some(cell) = cells.get(transition) {
            utils::lock(cell).add(generation, amount);
        } else {
            cells.insert(transition, HistoryValue::new(generation, amount));
        }
    }

    fn get(&self, transition: usize) -> Option<HistoryValue> {
        utils::read(&self.cells)
            .get(transition)
            .map(|cell| *utils::lock(cell))
    }

    fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(usize, &mut HistoryValue),
    {
        utils::read(&self.cells).for_each(|t, cell| f(t, &mut utils::lock(cell)));
    }

    fn len(&self) -> usize {
        utils::read(&self.cells).len()
    }
}

/// Raw values of a feature slot: feature key to transition identifier to value.
pub type SlotValues<K> = HashMap<K, HashMap<usize, i64>>;

/// Lazily averaged sparse vector of one feature template slot.
#[derive(Debug)]
pub struct AvgSparse<K> {
    kind: StoreKind,
    vals: RwLock<HashMap<K, TransitionStore>>,
}

impl<K> AvgSparse<K>
where
    K: FeatureKey,
{
    /// Creates an empty vector.
    pub fn new(kind: StoreKind) -> Self {
        Self {
            kind,
            vals: RwLock::new(HashMap::new()),
        }
    }

    /// Backing representation.
    pub const fn kind(&self) -> StoreKind {
        self.kind
    }

    /// Number of known feature keys.
    pub fn len(&self) -> usize {
        utils::read(&self.vals).len()
    }

    /// Returns `true` if no feature is known.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds `amount` to the cell of `(feature, transition)`, creating it if needed.
    pub fn add(&self, generation: u64, transition: usize, feature: &K, amount: i64) {
        {
            let vals = utils::read(&self.vals);
            if let Some(store) = vals.get(feature) {
                store.add(generation, transition, amount);
                return;
            }
        }
        let mut vals = utils::write(&self.vals);
        vals.entry(feature.clone())
            .or_insert_with(|| TransitionStore::new(self.kind))
            .add(generation, transition, amount);
    }

    fn cell(&self, transition: usize, feature: &K) -> Option<HistoryValue> {
        utils::read(&self.vals)
            .get(feature)
            .and_then(|store| store.get(transition))
    }

    /// Raw value of `(feature, transition)`, 0 if never written.
    pub fn value(&self, transition: usize, feature: &K) -> i64 {
        self.cell(transition, feature).map_or(0, |h| h.value())
    }

    /// Integrated value of `(feature, transition)` at `generation`, 0 if never written.
    pub fn integrated_value(&self, generation: u64, transition: usize, feature: &K) -> i64 {
        self.cell(transition, feature)
            .map_or(0, |h| h.integrated_value(generation))
    }

    /// Adds the value of every cell of `feature` to the matching legal transition of `scores`.
    /// Integrated values are taken at the generation of the buffer.
    pub fn set_scores(&self, feature: &K, scores: &mut ScoreBuffer, integrated: bool) {
        let vals = utils::read(&self.vals);
        let Some(store) = vals.get(feature) else {
            return;
        };
        let generation = scores.generation();
        let cells = utils::read(&store.cells);
        scores.inc_with(|t| {
            cells.get(t).map(|cell| {
                let h = utils::lock(cell);
                if integrated {
                    h.integrated_value(generation)
                } else {
                    h.value()
                }
            })
        });
    }

    /// Divides every raw value by `n`.
    ///
    /// # Errors
    ///
    /// [`RubeamError::Consistency`] is returned when `n` is not positive.
    pub fn scalar_divide(&self, n: i64) -> Result<()> {
        if n <= 0 {
            return Err(RubeamError::consistency("divisor must be positive"));
        }
        for store in utils::read(&self.vals).values() {
            store.for_each(|_, h| h.divide(n));
        }
        Ok(())
    }

    /// Replaces every value with its integral up to `generation`.
    pub fn integrate(&self, generation: u64) {
        for store in utils::read(&self.vals).values() {
            store.for_each(|_, h| h.integrate(generation));
        }
    }

    /// Adds the raw values of `other` at `generation`.
    pub fn add_vector(&self, generation: u64, other: &Self) {
        for (feature, store) in utils::read(&other.vals).iter() {
            store.for_each(|t, h| self.add(generation, t, feature, h.value()));
        }
    }

    /// Exports the values: raw if `generation` is [`None`], integrated otherwise.
    pub fn serialize(&self, generation: Option<u64>) -> SlotValues<K> {
        let vals = utils::read(&self.vals);
        let mut result = HashMap::with_capacity(vals.len());
        for (feature, store) in vals.iter() {
            let mut scores = HashMap::with_capacity(store.len());
            store.for_each(|t, h| {
                let v = generation.map_or(h.value(), |g| h.integrated_value(g));
                scores.insert(t, v);
            });
            result.insert(feature.clone(), scores);
        }
        result
    }

    /// Imports values exported by [`AvgSparse::serialize()`]. Every cell starts at `generation`.
    pub fn deserialize(kind: StoreKind, data: &SlotValues<K>, generation: u64) -> Self {
        let mut vals = HashMap::with_capacity(data.len());
        for (feature, scores) in data {
            let mut cells = Cells::new(kind);
            for (&t, &v) in scores {
                cells.insert(t, HistoryValue::new(generation, v));
            }
            vals.insert(
                feature.clone(),
                TransitionStore {
                    cells: RwLock::new(cells),
                },
            );
        }
        Self {
            kind,
            vals: RwLock::new(vals),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Sums the value at every generation before `until`, one generation at a time.
    fn brute_force(trace: &[(u64, i64)], until: u64) -> i64 {
        let mut sum = 0;
        for g in 0..until {
            let value: i64 = trace.iter().filter(|&&(w, _)| w <= g).map(|&(_, a)| a).sum();
            sum += value;
        }
        sum
    }

    #[test]
    fn test_history_value_two_writes() {
        let mut h = HistoryValue::new(2, 3);
        h.add(5, -1);
        assert_eq!(2, h.value());
        assert_eq!(5, h.generation());
        assert_eq!(2, h.prev_generation());
        // 3 for generations 2..5, then 2 for generations 5..8
        assert_eq!(9 + 6, h.integrated_value(8));
    }

    #[test]
    fn test_history_value_same_generation() {
        let mut h = HistoryValue::new(4, 1);
        h.add(4, 1);
        h.add(4, 1);
        assert_eq!(3, h.value());
        assert_eq!(0, h.integrated_value(4));
        assert_eq!(6, h.integrated_value(6));
    }

    #[test]
    fn test_history_value_against_brute_force() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let mut generation = rng.gen_range(0..5);
            let mut trace = vec![(generation, rng.gen_range(-3..=3))];
            let mut h = HistoryValue::new(trace[0].0, trace[0].1);
            for _ in 0..rng.gen_range(0..20) {
                generation += rng.gen_range(0..4);
                let amount = rng.gen_range(-3..=3);
                trace.push((generation, amount));
                h.add(generation, amount);
            }
            let until = generation + rng.gen_range(0..10);
            assert_eq!(brute_force(&trace, until), h.integrated_value(until));
        }
    }

    #[test]
    fn test_integrate() {
        let mut h = HistoryValue::new(0, 2);
        h.add(3, 1);
        h.integrate(4);
        assert_eq!(2 * 3 + 3, h.value());
    }

    #[test]
    fn test_store_kinds_agree() {
        let kinds = [
            StoreKind::Dense,
            StoreKind::Sparse,
            StoreKind::Hybrid { cutoff: 3 },
        ];
        let vectors: Vec<AvgSparse<&str>> = kinds.iter().map(|&k| AvgSparse::new(k)).collect();
        let writes = [
            (0, 1, "a", 1),
            (0, 5, "a", 2),
            (1, 1, "a", -1),
            (1, 2, "b", 4),
            (3, 7, "b", 1),
            (3, 1, "a", 3),
        ];
        for v in &vectors {
            for &(g, t, f, a) in &writes {
                v.add(g, t, &f, a);
            }
        }
        for v in &vectors {
            assert_eq!(2, v.len());
            assert_eq!(3, v.value(1, &"a"));
            assert_eq!(2, v.value(5, &"a"));
            assert_eq!(4, v.value(2, &"b"));
            assert_eq!(1, v.value(7, &"b"));
            assert_eq!(0, v.value(0, &"b"));
            assert_eq!(0, v.value(1, &"c"));
            // a/1: 1 at generation 0, 0 at generations 1..3, 3 from generation 3
            assert_eq!(1 + 3, v.integrated_value(4, 1, &"a"));
            assert_eq!(vectors[0].serialize(None), v.serialize(None));
            assert_eq!(vectors[0].serialize(Some(6)), v.serialize(Some(6)));
        }
    }

    #[test]
    fn test_set_scores() {
        let v = AvgSparse::new(StoreKind::Dense);
        v.add(0, 0, &10u32, 2);
        v.add(0, 1, &10u32, -1);
        v.add(0, 4, &10u32, 7);
        let mut scores = ScoreBuffer::new(false);
        scores.set_transitions(&[0, 1, 2]);
        v.set_scores(&10, &mut scores, false);
        v.set_scores(&10, &mut scores, false);
        v.set_scores(&11, &mut scores, false);
        assert_eq!(Some(4), scores.get(0));
        assert_eq!(Some(-2), scores.get(1));
        assert_eq!(Some(0), scores.get(2));
        assert_eq!(None, scores.get(4));

        let mut scores = ScoreBuffer::new(true);
        scores.set_transitions(&[0, 4]);
        scores.set_generation(3);
        v.set_scores(&10, &mut scores, true);
        assert_eq!(Some(6), scores.get(0));
        assert_eq!(Some(21), scores.get(4));
    }

    #[test]
    fn test_scalar_divide() {
        let v = AvgSparse::new(StoreKind::Sparse);
        v.add(0, 0, &1u32, 9);
        v.add(0, 1, &1u32, -7);
        assert!(v.scalar_divide(0).is_err());
        assert!(v.scalar_divide(-2).is_err());
        assert_eq!(9, v.value(0, &1));
        v.scalar_divide(2).unwrap();
        assert_eq!(4, v.value(0, &1));
        assert_eq!(-3, v.value(1, &1));
    }

    #[test]
    fn test_serialize_round_trip() {
        let v = AvgSparse::new(StoreKind::Hybrid { cutoff: 2 });
        v.add(0, 0, &"x", 1);
        v.add(1, 3, &"x", 2);
        v.add(2, 1, &"y", -4);
        let raw = v.serialize(None);
        let w = AvgSparse::deserialize(StoreKind::Sparse, &raw, 2);
        assert_eq!(raw, w.serialize(None));
        assert_eq!(-4, w.value(1, &"y"));
        assert_eq!(0, w.integrated_value(2, 1, &"y"));
    }

    #[test]
    fn test_hybrid_cutoff_validation() {
        assert!(StoreKind::Hybrid { cutoff: 0 }.validate().is_err());
        assert!(StoreKind::Hybrid { cutoff: 4 }.validate().is_ok());
    }

    #[test]
    fn test_concurrent_add() {
        let v = AvgSparse::new(StoreKind::Sparse);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for i in 0..100u32 {
                        v.add(0, (i % 3) as usize, &(i % 5), 1);
                    }
                });
            }
        });
        let total: i64 = v
            .serialize(None)
            .values()
            .flat_map(|m| m.values())
            .sum();
        assert_eq!(800, total);
    }
}
