use std::sync::Mutex;

use hashbrown::HashMap;

use crate::utils;

/// Scratch accumulator for the scores of the legal transitions of one state.
#[derive(Debug, Default)]
pub struct ScoreBuffer {
    dense: bool,
    array: Vec<Option<i64>>,
    map: HashMap<usize, i64>,
    legal: Vec<usize>,
    generation: u64,
}

impl ScoreBuffer {
    /// Creates an empty buffer backed by an array if `dense` is `true`, by a map otherwise.
    pub fn new(dense: bool) -> Self {
        Self {
            dense,
            ..Self::default()
        }
    }

    /// Returns `true` if the buffer is backed by an array.
    pub const fn is_dense(&self) -> bool {
        self.dense
    }

    /// Removes every transition and resets the generation. Allocations are kept.
    pub fn clear(&mut self) {
        self.array.clear();
        self.map.clear();
        self.legal.clear();
        self.generation = 0;
    }

    /// Registers legal transitions with a score of 0.
    pub fn set_transitions(&mut self, transitions: &[usize]) {
        for &t in transitions {
            if self.dense {
                if self.array.len() <= t {
                    self.array.resize(t + 1, None);
                }
                if self.array[t].is_some() {
                    continue;
                }
                self.array[t] = Some(0);
            } else {
                if self.map.contains_key(&t) {
                    continue;
                }
                self.map.insert(t, 0);
            }
            self.legal.push(t);
        }
    }

    /// Score of a legal transition.
    #[inline(always)]
    pub fn get(&self, transition: usize) -> Option<i64> {
        if self.dense {
            self.array.get(transition).copied().flatten()
        } else {
            self.map.get(&transition).copied()
        }
    }

    /// Adds `score` to a legal transition. Returns `false` if the transition is not legal.
    #[inline(always)]
    pub fn inc(&mut self, transition: usize, score: i64) -> bool {
        let slot = if self.dense {
            self.array.get_mut(transition).and_then(Option::as_mut)
        } else {
            self.map.get_mut(&transition)
        };
        match slot {
            Some(s) => {
                *s += score;
                true
            }
            None => false,
        }
    }

    /// Adds `f(t)` to every legal transition `t` for which it returns a value.
    pub fn inc_with<F>(&mut self, mut f: F)
    where
        F: FnMut(usize) -> Option<i64>,
    {
        for i in 0..self.legal.len() {
            let t = self.legal[i];
            if let Some(score) = f(t) {
                self.inc(t, score);
            }
        }
    }

    /// Generation integrated scores are taken at.
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Sets the generation integrated scores are taken at.
    pub fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
    }

    /// Number of legal transitions.
    pub fn len(&self) -> usize {
        self.legal.len()
    }

    /// Returns `true` if no transition is registered.
    pub fn is_empty(&self) -> bool {
        self.legal.is_empty()
    }
}

/// Bounded pool of [`ScoreBuffer`]s shared by the expansion workers.
#[derive(Debug)]
pub struct ScorePool {
    dense: bool,
    capacity: usize,
    buffers: Mutex<Vec<ScoreBuffer>>,
}

impl ScorePool {
    /// Creates an empty pool keeping at most `capacity` idle buffers.
    pub fn new(dense: bool, capacity: usize) -> Self {
        Self {
            dense,
            capacity,
            buffers: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    /// Takes an empty buffer from the pool, allocating one if the pool is empty.
    pub fn acquire(&self) -> ScoreBuffer {
        utils::lock(&self.buffers)
            .pop()
            .unwrap_or_else(|| ScoreBuffer::new(self.dense))
    }

    /// Clears a buffer and returns it to the pool. The buffer is dropped if the pool is full.
    pub fn release(&self, mut buffer: ScoreBuffer) {
        buffer.clear();
        let mut buffers = utils::lock(&self.buffers);
        if buffers.len() < self.capacity {
            buffers.push(buffer);
        }
    }

    /// Number of idle buffers.
    pub fn idle(&self) -> usize {
        utils::lock(&self.buffers).len()
    }
}
