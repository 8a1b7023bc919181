use core::borrow::Borrow;

use slog::{debug, error, info, o, Logger};

use crate::beam::{Beam, GoldSequence};
use crate::errors::{Result, RubeamError};
use crate::feature::FeatureKey;
use crate::model::WeightStore;
use crate::transition::{FeatureExtractor, Oracle, State, TransitionSystem};

/// Turns the weights seen during training into the deployed model.
#[cfg_attr(docsrs, doc(cfg(feature = "train")))]
pub trait UpdateStrategy<K> {
    /// Called once before the first instance.
    fn init(&mut self, model: &WeightStore<K>, iterations: usize);

    /// Called after every instance that was not skipped, once the generation of the model has
    /// been advanced.
    fn update(&mut self, model: &WeightStore<K>) -> Result<()>;

    /// Produces the deployed model.
    fn finalize(&mut self, model: WeightStore<K>) -> Result<WeightStore<K>>;
}

/// Deploys the last weights.
#[cfg_attr(docsrs, doc(cfg(feature = "train")))]
#[derive(Debug, Default)]
pub struct TrivialStrategy;

impl<K> UpdateStrategy<K> for TrivialStrategy
where
    K: FeatureKey,
{
    fn init(&mut self, _model: &WeightStore<K>, _iterations: usize) {}

    fn update(&mut self, _model: &WeightStore<K>) -> Result<()> {
        Ok(())
    }

    fn finalize(&mut self, model: WeightStore<K>) -> Result<WeightStore<K>> {
        Ok(model)
    }
}

/// Sums a copy of the weights after every instance and deploys the mean.
#[cfg_attr(docsrs, doc(cfg(feature = "train")))]
#[derive(Debug)]
pub struct SimpleAveraging<K> {
    accum: Option<WeightStore<K>>,
    n: i64,
}

impl<K> Default for SimpleAveraging<K> {
    fn default() -> Self {
        Self { accum: None, n: 0 }
    }
}

impl<K> UpdateStrategy<K> for SimpleAveraging<K>
where
    K: FeatureKey,
{
    fn init(&mut self, model: &WeightStore<K>, _iterations: usize) {
        self.accum = Some(model.empty_like());
        self.n = 0;
    }

    fn update(&mut self, model: &WeightStore<K>) -> Result<()> {
        let accum = self.accum.as_ref().ok_or(RubeamError::consistency(
            "update strategy is not initialized",
        ))?;
        accum.add_model(model)?;
        self.n += 1;
        Ok(())
    }

    fn finalize(&mut self, model: WeightStore<K>) -> Result<WeightStore<K>> {
        match self.accum.take() {
            Some(accum) if self.n != 0 => {
                accum.scalar_divide(self.n)?;
                Ok(accum)
            }
            _ => Ok(model),
        }
    }
}

/// Deploys the weights integrated over all generations of the model.
///
/// The trainer advances the generation after every instance, so a model restored from a snapshot
/// keeps integrating from the snapshot generation.
#[cfg_attr(docsrs, doc(cfg(feature = "train")))]
#[derive(Debug, Default)]
pub struct LazyAveraging;

impl<K> UpdateStrategy<K> for LazyAveraging
where
    K: FeatureKey,
{
    fn init(&mut self, _model: &WeightStore<K>, _iterations: usize) {}

    fn update(&mut self, _model: &WeightStore<K>) -> Result<()> {
        Ok(())
    }

    fn finalize(&mut self, model: WeightStore<K>) -> Result<WeightStore<K>> {
        model.integrate();
        Ok(model)
    }
}

/// Averaging applied to the trained weights.
#[cfg_attr(docsrs, doc(cfg(feature = "train")))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Averaging {
    /// No averaging, see [`TrivialStrategy`].
    None,

    /// See [`SimpleAveraging`].
    Simple,

    /// See [`LazyAveraging`].
    #[default]
    Lazy,
}

/// Training instance: a problem and the reference structure the oracle replays.
#[cfg_attr(docsrs, doc(cfg(feature = "train")))]
#[derive(Clone, Debug)]
pub struct Instance<P, G> {
    /// Input.
    pub problem: P,

    /// Reference structure.
    pub gold: G,
}

impl<P, G> Instance<P, G> {
    /// Creates a new instance.
    pub const fn new(problem: P, gold: G) -> Self {
        Self { problem, gold }
    }
}

/// Counters of one training iteration.
#[cfg_attr(docsrs, doc(cfg(feature = "train")))]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IterationStats {
    /// Iteration number, starting at 0.
    pub iteration: usize,

    /// Instances decoded.
    pub instances: usize,

    /// Instances whose prediction differed from gold, i.e. updates applied.
    pub errors: usize,

    /// Instances skipped because their gold sequence is unavailable or decoding failed.
    pub skipped: usize,
}

/// Counters of a training run.
#[cfg_attr(docsrs, doc(cfg(feature = "train")))]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrainingStats {
    /// One entry per iteration run.
    pub iterations: Vec<IterationStats>,

    /// Instances whose gold sequence could not be decoded.
    pub failed: usize,
}

/// Early-update structured perceptron trainer.
#[cfg_attr(docsrs, doc(cfg(feature = "train")))]
pub struct Trainer {
    max_iter: usize,
    averaging: Averaging,
    strict: bool,
    n_threads: Option<usize>,
    logger: Logger,
}

impl Trainer {
    /// Creates a new trainer.
    pub fn new() -> Self {
        Self {
            max_iter: 10,
            averaging: Averaging::default(),
            strict: false,
            n_threads: None,
            logger: Logger::root(slog::Discard, o!()),
        }
    }

    /// Sets the number of iterations over the instances.
    ///
    /// # Errors
    ///
    /// [`RubeamError::InvalidArgument`] is returned when `max_iter` is 0.
    pub fn max_iter(mut self, max_iter: usize) -> Result<Self> {
        if max_iter == 0 {
            return Err(RubeamError::invalid_argument("max_iter must not be 0"));
        }
        self.max_iter = max_iter;
        Ok(self)
    }

    /// Sets the averaging strategy.
    pub const fn averaging(mut self, averaging: Averaging) -> Self {
        self.averaging = averaging;
        self
    }

    /// Propagates decoding errors instead of skipping the instance.
    pub const fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Sets the number of threads applying every update to the model. The setting of the model
    /// is kept if this is not called.
    ///
    /// # Errors
    ///
    /// [`RubeamError::InvalidArgument`] is returned when `n_threads` is 0.
    pub fn n_threads(mut self, n_threads: usize) -> Result<Self> {
        if n_threads == 0 {
            return Err(RubeamError::invalid_argument("n_threads must not be 0"));
        }
        self.n_threads = Some(n_threads);
        Ok(self)
    }

    /// Sets the logger.
    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    fn strategy<K>(&self) -> Box<dyn UpdateStrategy<K>>
    where
        K: FeatureKey,
    {
        match self.averaging {
            Averaging::None => Box::new(TrivialStrategy),
            Averaging::Simple => Box::new(SimpleAveraging::default()),
            Averaging::Lazy => Box::new(LazyAveraging::default()),
        }
    }

    /// Trains `model` on the instances and returns the deployed model.
    ///
    /// # Errors
    ///
    /// In strict mode, the first decoding error is returned. Errors of the update strategy are
    /// always returned.
    pub fn train<S, T, E, O, P, G>(
        &self,
        beam: &Beam<S, T, E>,
        oracle: &mut O,
        instances: &[Instance<P, G>],
        model: WeightStore<E::Key>,
    ) -> Result<(WeightStore<E::Key>, TrainingStats)>
    where
        S: State,
        T: TransitionSystem<S>,
        E: FeatureExtractor<S>,
        O: Oracle<S> + ?Sized,
        P: Borrow<S::Problem>,
        G: Borrow<O::Gold>,
    {
        self.train_with(beam, oracle, instances, model, |_, _| true)
    }

    /// Same as [`Trainer::train()`], calling `on_iteration` after every iteration with the raw
    /// model. Training stops early when it returns `false`.
    ///
    /// # Errors
    ///
    /// See [`Trainer::train()`].
    pub fn train_with<S, T, E, O, P, G, F>(
        &self,
        beam: &Beam<S, T, E>,
        oracle: &mut O,
        instances: &[Instance<P, G>],
        model: WeightStore<E::Key>,
        mut on_iteration: F,
    ) -> Result<(WeightStore<E::Key>, TrainingStats)>
    where
        S: State,
        T: TransitionSystem<S>,
        E: FeatureExtractor<S>,
        O: Oracle<S> + ?Sized,
        P: Borrow<S::Problem>,
        G: Borrow<O::Gold>,
        F: FnMut(&IterationStats, &WeightStore<E::Key>) -> bool,
    {
        let model = match self.n_threads {
            Some(n_threads) => model.n_threads(n_threads)?,
            None => model,
        };
        let mut stats = TrainingStats::default();
        let golds: Vec<Option<GoldSequence<S, E::Key>>> = instances
            .iter()
            .enumerate()
            .map(|(j, instance)| {
                oracle.set_gold(instance.gold.borrow());
                let gold = beam.decode_gold(oracle, instance.problem.borrow());
                if gold.is_none() {
                    info!(self.logger, "skipped (gold decode)"; "instance" => j);
                    stats.failed += 1;
                }
                gold
            })
            .collect();

        let mut strategy = self.strategy();
        strategy.init(&model, self.max_iter);

        for iteration in 0..self.max_iter {
            let mut it = IterationStats {
                iteration,
                ..IterationStats::default()
            };
            for (j, (instance, gold)) in instances.iter().zip(&golds).enumerate() {
                let Some(gold) = gold else {
                    it.skipped += 1;
                    continue;
                };
                it.instances += 1;
                let update =
                    match beam.decode_early_update(instance.problem.borrow(), gold, &model) {
                        Ok(update) => update,
                        Err(e) if self.strict => return Err(e),
                        Err(e) => {
                            error!(
                                self.logger, "skipped (decode)";
                                "iteration" => iteration, "instance" => j, "error" => %e
                            );
                            it.skipped += 1;
                            continue;
                        }
                    };
                if update.is_error() {
                    let at = update.early_update_at.unwrap_or(update.gold_len);
                    info!(
                        self.logger, "failed";
                        "iteration" => iteration, "instance" => j,
                        "at" => at, "of" => update.gold_len, "score" => update.score
                    );
                    let gold_features = update.gold_features.as_deref();
                    let predicted_features = update.predicted_features.as_deref();
                    model.add_subtract(gold_features, predicted_features, 1)?;
                    model.add_subtract(predicted_features, predicted_features, -1)?;
                    it.errors += 1;
                } else {
                    debug!(
                        self.logger, "success";
                        "iteration" => iteration, "instance" => j
                    );
                }
                model.increment_generation();
                strategy.update(&model)?;
            }
            info!(
                self.logger, "iteration finished";
                "iteration" => iteration,
                "instances" => it.instances,
                "errors" => it.errors,
                "skipped" => it.skipped
            );
            let proceed = on_iteration(&it, &model);
            stats.iterations.push(it);
            if !proceed {
                break;
            }
        }

        let model = strategy.finalize(model)?;
        Ok((model, stats))
    }
}

impl Default for Trainer {
    fn default() -> Self {
        Self::new()
    }
}
