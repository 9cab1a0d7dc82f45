pub mod isolation_forest {
    extern crate rand;
    use rand::seq::index;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
    use std::thread::{self, JoinHandle};

    extern crate rayon;
    use rayon::prelude::*;

    use log::{debug, info};
    use serde::{Deserialize, Serialize};

    use crate::module_data_source::data_source::DataSource;
    use crate::module_error::error::{ForestError, Result};
    use crate::module_isolation_tree::isolation_tree::{average_path_length, IsolationTree};

    // Hyperparameters of a forest.
    // Missing fields take their default when deserialized, so a config file
    // only has to name what it changes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct ForestParams {
        // Observations sampled (without replacement) for each tree.
        pub tree_size: usize,
        // Trees built by `grow_forest`.
        pub forest_size: usize,
        pub random_seed: u64,
    }

    impl Default for ForestParams {
        fn default() -> Self {
            ForestParams {
                tree_size: 256,
                forest_size: 100,
                random_seed: 0,
            }
        }
    }

    impl ForestParams {
        pub fn validate<D: DataSource + ?Sized>(&self, data: &D) -> Result<()> {
            let n_obs = data.observation_count();
            if self.tree_size < 1 {
                return Err(ForestError::InvalidConfiguration(
                    "tree size must be at least 1".to_string(),
                ));
            }
            if self.tree_size > n_obs {
                return Err(ForestError::InvalidConfiguration(format!(
                    "tree size {} exceeds the {} available observations",
                    self.tree_size, n_obs
                )));
            }
            if self.tree_size > 1 && data.attribute_count() == 0 {
                return Err(ForestError::InvalidConfiguration(
                    "data source has no attributes to split on".to_string(),
                ));
            }
            Ok(())
        }

        // `ceil(log2(tree_size))`, the average height a tree needs to
        // isolate its sample.
        pub fn max_tree_height(&self) -> u32 {
            (self.tree_size.max(1) as f64).log2().ceil() as u32
        }
    }

    // Where a tree came from: the synchronous path or background job `n`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Origin {
        Forest,
        Job(u64),
    }

    // Trees of the synchronous path, then each job's trees keyed by job index.
    // Iteration order depends on the origin only, never on which thread
    // finished first.
    struct TreeStore {
        forest: Vec<IsolationTree>,
        jobs: BTreeMap<u64, Vec<IsolationTree>>,
    }

    impl TreeStore {
        fn push(&mut self, origin: Origin, tree: IsolationTree) {
            match origin {
                Origin::Forest => self.forest.push(tree),
                Origin::Job(job) => self.jobs.entry(job).or_default().push(tree),
            }
        }

        fn iter(&self) -> impl Iterator<Item = &IsolationTree> {
            self.forest.iter().chain(self.jobs.values().flatten())
        }

        fn len(&self) -> usize {
            self.forest.len() + self.jobs.values().map(Vec::len).sum::<usize>()
        }
    }

    // State read by the forest and every background grow job.
    struct Shared<D> {
        data: D,
        params: ForestParams,
        max_tree_height: u32,
        trees: Mutex<TreeStore>,
    }

    impl<D: DataSource> Shared<D> {
        // Draw a sample and grow one tree from it.
        fn make_isotree<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<IsolationTree> {
            let sample = index::sample(rng, self.data.observation_count(), self.params.tree_size).into_vec();
            let tree = IsolationTree::grow(&self.data, sample, self.max_tree_height, rng)?;
            debug!("grew tree: depth {}, {} nodes", tree.depth(), tree.node_count());
            Ok(tree)
        }

        // The lock covers the append only.
        fn push(&self, origin: Origin, tree: IsolationTree) {
            self.lock_trees().push(origin, tree);
        }

        // A job that panicked never leaves a half-pushed tree behind.
        fn lock_trees(&self) -> MutexGuard<'_, TreeStore> {
            self.trees.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    // Generator of background job `job`: the forest seed on its own ChaCha stream.
    // Stream 0 belongs to the forest itself.
    fn job_rng(seed: u64, job: u64) -> ChaCha8Rng {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rng.set_stream(job + 1);
        rng
    }

    fn score_observation<S: DataSource + ?Sized>(
        trees: &[&IsolationTree],
        source: &S,
        observation: usize,
        tree_size: usize,
    ) -> Result<f64> {
        if trees.is_empty() {
            return Err(ForestError::EmptyForest);
        }
        if observation >= source.observation_count() {
            return Err(ForestError::ObservationOutOfRange {
                observation,
                observation_count: source.observation_count(),
            });
        }

        let normalizer = average_path_length(tree_size);
        if normalizer == 0. {
            // Single-observation trees cannot tell points apart. Taking c(1)
            // literally drives every score to 2^0 = 1; c(n) is only defined
            // for n > 1, so report the neutral 0.5 instead.
            return Ok(0.5);
        }

        let sum: f64 = trees.iter().map(|tree| tree.path_length(source, observation)).sum();
        let path_mean = sum / trees.len() as f64;
        Ok((2. as f64).powf(-path_mean / normalizer))
    }

    // Handle to a background grow job started by `IsolationForest::grow`.
    pub struct GrowJob {
        job: u64,
        handle: JoinHandle<Result<usize>>,
    }

    impl GrowJob {
        pub fn job_index(&self) -> u64 {
            self.job
        }

        pub fn is_finished(&self) -> bool {
            self.handle.is_finished()
        }

        // Wait for the job and return how many trees it added.
        pub fn join(self) -> Result<usize> {
            let job = self.job;
            self.handle
                .join()
                .map_err(|_| ForestError::GrowJobPanicked { job })?
        }
    }

    // Ensemble of isolation trees over one data source.
    pub struct IsolationForest<D> {
        shared: Arc<Shared<D>>,
        rng: ChaCha8Rng,
        next_job: u64,
    }

    impl<D: DataSource> IsolationForest<D> {
        pub fn new(data: D, tree_size: usize, forest_size: usize, random_seed: u64) -> Result<Self> {
            Self::with_params(
                data,
                &ForestParams {
                    tree_size,
                    forest_size,
                    random_seed,
                },
            )
        }

        pub fn with_params(data: D, params: &ForestParams) -> Result<Self> {
            params.validate(&data)?;
            let shared = Shared {
                data,
                params: *params,
                max_tree_height: params.max_tree_height(),
                trees: Mutex::new(TreeStore {
                    forest: Vec::with_capacity(params.forest_size),
                    jobs: BTreeMap::new(),
                }),
            };
            Ok(IsolationForest {
                shared: Arc::new(shared),
                rng: ChaCha8Rng::seed_from_u64(params.random_seed),
                next_job: 0,
            })
        }

        // Build `forest_size` trees on the calling thread.
        // Sampling and growth share the forest's generator in a fixed
        // order, so equal seeds give equal forests.
        pub fn grow_forest(&mut self) -> Result<()> {
            for _ in 0..self.shared.params.forest_size {
                let tree = self.shared.make_isotree(&mut self.rng)?;
                self.shared.push(Origin::Forest, tree);
            }
            info!(
                "grew {} trees (tree size {}, max height {})",
                self.shared.params.forest_size,
                self.shared.params.tree_size,
                self.shared.max_tree_height
            );
            Ok(())
        }

        // Score an observation of the training data.
        pub fn anomaly_score(&self, observation: usize) -> Result<f64> {
            let store = self.shared.lock_trees();
            let trees: Vec<&IsolationTree> = store.iter().collect();
            score_observation(&trees, &self.shared.data, observation, self.shared.params.tree_size)
        }

        // Score an observation of another data source with the same attributes.
        pub fn anomaly_score_in<S: DataSource + ?Sized>(&self, source: &S, observation: usize) -> Result<f64> {
            if source.numeric_attribute_count() != self.numeric_attribute_count()
                || source.text_attribute_count() != self.text_attribute_count()
            {
                return Err(ForestError::SchemaMismatch {
                    expected_numeric: self.numeric_attribute_count(),
                    expected_text: self.text_attribute_count(),
                    found_numeric: source.numeric_attribute_count(),
                    found_text: source.text_attribute_count(),
                });
            }
            let store = self.shared.lock_trees();
            let trees: Vec<&IsolationTree> = store.iter().collect();
            score_observation(&trees, source, observation, self.shared.params.tree_size)
        }

        pub fn is_anomaly(&self, observation: usize, threshold: f64) -> Result<bool> {
            Ok(self.anomaly_score(observation)? > threshold)
        }

        // Run `f` over a copy of the trees grown so far, synchronous trees
        // first, then each job's trees by job index. The lock is released
        // before `f` runs, so `f` may call back into the forest.
        pub fn with_trees<T, F: FnOnce(&[IsolationTree]) -> T>(&self, f: F) -> T {
            let trees: Vec<IsolationTree> = self.shared.lock_trees().iter().cloned().collect();
            f(&trees)
        }

        pub fn num_trees(&self) -> usize {
            self.shared.lock_trees().len()
        }

        pub fn tree_size(&self) -> usize {
            self.shared.params.tree_size
        }

        pub fn forest_size(&self) -> usize {
            self.shared.params.forest_size
        }

        pub fn random_seed(&self) -> u64 {
            self.shared.params.random_seed
        }

        pub fn max_tree_height(&self) -> u32 {
            self.shared.max_tree_height
        }

        pub fn numeric_attribute_count(&self) -> usize {
            self.shared.data.numeric_attribute_count()
        }

        pub fn text_attribute_count(&self) -> usize {
            self.shared.data.text_attribute_count()
        }

        pub fn observation_count(&self) -> usize {
            self.shared.data.observation_count()
        }
    }

    impl<D: DataSource + Sync> IsolationForest<D> {
        // Scores of every observation of the training data, computed in parallel.
        pub fn anomaly_scores(&self) -> Result<Vec<f64>> {
            let store = self.shared.lock_trees();
            let trees: Vec<&IsolationTree> = store.iter().collect();
            let trees: &[&IsolationTree] = &trees;
            let data = &self.shared.data;
            let tree_size = self.shared.params.tree_size;

            (0..data.observation_count())
                .into_par_iter()
                .map(|ob| score_observation(trees, data, ob, tree_size))
                .collect()
        }
    }

    impl<D: DataSource + Send + Sync + 'static> IsolationForest<D> {
        // Build `jobs` more trees on a background thread.
        // Each job draws from its own generator, derived from the forest seed
        // and the job's index, and its trees are stored under that index, so
        // concurrent jobs never share random state and the forest they leave
        // behind does not depend on thread timing. Join before scoring.
        pub fn grow(&mut self, jobs: usize) -> GrowJob {
            let job = self.next_job;
            self.next_job += 1;

            let shared = Arc::clone(&self.shared);
            let handle = thread::spawn(move || -> Result<usize> {
                let mut rng = job_rng(shared.params.random_seed, job);
                for _ in 0..jobs {
                    let tree = shared.make_isotree(&mut rng)?;
                    shared.push(Origin::Job(job), tree);
                }
                info!("grow job {} added {} trees", job, jobs);
                Ok(jobs)
            });
            GrowJob { job, handle }
        }
    }

}
