use std::sync::Arc;

use crate::feature::Feature;
use crate::transition::{
    Address, Addressable, FeatureExtractor, Oracle, State, Transition, TransitionSystem,
};

macro_rules! hashmap {
    ( $($k:expr => $v:expr,)* ) => {
        {
            #[allow(unused_mut)]
            let mut h = hashbrown::HashMap::new();
            $(
                h.insert($k, $v);
            )*
            h
        }
    };
    ( $($k:expr => $v:expr),* ) => {
        hashmap![$( $k => $v, )*]
    };
}

pub(crate) use hashmap;

/// Labels every input bit with 0 or 1, one position per transition.
#[derive(Clone, Debug, Default)]
pub struct BitState {
    bits: Arc<[u8]>,
    labels: Vec<u8>,
    last: Option<Transition>,
    previous: Option<Arc<BitState>>,
    depthless: bool,
}

impl BitState {
    pub fn labels(&self) -> &[u8] {
        &self.labels
    }
}

impl PartialEq for BitState {
    fn eq(&self, other: &Self) -> bool {
        self.bits == other.bits && self.labels == other.labels
    }
}

impl State for BitState {
    type Problem = [u8];

    fn clear(&mut self) {
        self.bits = Arc::new([]);
        self.labels.clear();
        self.last = None;
        self.previous = None;
    }

    fn init(&mut self, problem: &[u8]) {
        self.bits = problem.into();
    }

    fn is_terminal(&self) -> bool {
        self.labels.len() == self.bits.len()
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

    fn len(&self) -> usize {
        if self.depthless {
            0
        } else {
            self.labels.len() + 1
        }
    }
}

impl Addressable for BitState {
    type Value = u8;

    fn address(&self, locator: &[u8], offset: usize) -> Option<Address> {
        match locator {
            b"N0" => {
                let node = self.labels.len() + offset;
                (node < self.bits.len()).then_some(Address {
                    node,
                    generator: false,
                })
            }
            _ => None,
        }
    }

    fn attribute(&self, node: usize, attribute: &[u8]) -> Option<u8> {
        match attribute {
            b"b" => self.bits.get(node).copied(),
            b"l" => self.labels.get(node).copied(),
            _ => None,
        }
    }
}

pub fn initial_state(bits: &[u8]) -> BitState {
    let mut s = BitState::default();
    s.init(bits);
    s
}

/// A state that reports a length of 0 at every depth.
pub fn depthless_state() -> BitState {
    BitState {
        depthless: true,
        ..BitState::default()
    }
}

/// Legal labels are listed wrong label first, so an untrained model prefers the wrong one.
pub struct BitSystem;

impl TransitionSystem<BitState> for BitSystem {
    fn transition(&self, from: &Arc<BitState>, transition: Transition) -> BitState {
        let mut labels = from.labels.clone();
        labels.push(u8::try_from(transition.value).unwrap());
        BitState {
            bits: Arc::clone(&from.bits),
            labels,
            last: Some(transition),
            previous: Some(Arc::clone(from)),
            depthless: from.depthless,
        }
    }

    fn transitions(&self, state: &BitState) -> (u8, Vec<usize>) {
        match state.bits.get(state.labels.len()) {
            Some(&bit) => (b'B', vec![usize::from(1 - bit), usize::from(bit)]),
            None => (b'B', vec![]),
        }
    }
}

/// Replays the gold labels.
#[derive(Default)]
pub struct BitOracle {
    gold: Vec<u8>,
}

impl Oracle<BitState> for BitOracle {
    type Gold = [u8];

    fn set_gold(&mut self, gold: &[u8]) {
        self.gold = gold.to_vec();
    }

    fn transition(&self, state: &BitState) -> Option<Transition> {
        self.gold
            .get(state.labels.len())
            .map(|&l| Transition::new(b'B', usize::from(l)))
    }
}

/// One template: the bit at the current position.
pub struct BitExtractor;

impl FeatureExtractor<BitState> for BitExtractor {
    type Key = u32;

    fn features(
        &self,
        state: &BitState,
        _idle: bool,
        _kind: u8,
        _transitions: &[usize],
    ) -> Vec<Option<Feature<u32>>> {
        let bit = state
            .address(b"N0", 0)
            .and_then(|a| state.attribute(a.node, b"b"));
        vec![bit.map(|b| Feature::Single(u32::from(b)))]
    }
}

/// Emits one slot more than a single-slot model has.
pub struct WideExtractor;

impl FeatureExtractor<BitState> for WideExtractor {
    type Key = u32;

    fn features(
        &self,
        _state: &BitState,
        _idle: bool,
        _kind: u8,
        _transitions: &[usize],
    ) -> Vec<Option<Feature<u32>>> {
        vec![None, Some(Feature::Single(1))]
    }
}

/// Sentences used to train and evaluate the bit labeller: rotations of `[1, 0, 1, 1]`.
pub fn bit_corpus(n: usize) -> Vec<Vec<u8>> {
    let base = [1, 0, 1, 1];
    (0..n)
        .map(|i| (0..base.len()).map(|j| base[(i + j) % base.len()]).collect())
        .collect()
}

#[test]
fn test_bit_system() {
    let system = BitSystem;
    let s0 = Arc::new(initial_state(&[1, 0]));
    assert_eq!((b'B', vec![0, 1]), system.transitions(&s0));
    let s1 = Arc::new(system.transition(&s0, Transition::new(b'B', 1)));
    assert_eq!((b'B', vec![1, 0]), system.transitions(&s1));
    let s2 = system.transition(&s1, Transition::new(b'B', 0));
    assert!(s2.is_terminal());
    assert_eq!(3, s2.len());
    assert_eq!(&[1, 0], s2.labels());
    assert_eq!((b'B', vec![]), system.transitions(&s2));

    let features = BitExtractor.features(&s1, false, b'B', &[1, 0]);
    assert_eq!(vec![Some(Feature::Single(0))], features);
    assert_eq!(vec![None], BitExtractor.features(&s2, false, b'B', &[]));

    let mut oracle = BitOracle::default();
    oracle.set_gold(&[1, 0]);
    assert_eq!(Some(Transition::new(b'B', 0)), oracle.transition(&s1));
    assert_eq!(None, oracle.transition(&s2));

    let m = hashmap!["a" => 1];
    assert_eq!(Some(&1), m.get("a"));
    assert_eq!(vec![vec![1, 0, 1, 1], vec![0, 1, 1, 1]], bit_corpus(2));
}
