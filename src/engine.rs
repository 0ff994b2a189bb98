//! The caller-facing environment collection.
//!
//! [`EnvironmentsEngine`] wraps the top-level [`Locators`] and adds what a
//! single locator does not provide: identity deduplication across sources,
//! a snapshot of the last full listing that change events invalidate, final
//! kind filtering, and an observable scan state.

use futures::stream::{self, BoxStream, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::Config;
use crate::error::Result;
use crate::locator::{
    ChangeEmitter, Locator, Locators, PathEnvVarLocator, PyenvLocator, PythonEnvsChangedEvent,
    PythonEnvsIterator, PythonLocatorQuery, RankedEnv, VirtualEnvLocator,
};
use crate::model::{EnvKey, EnvRef, PythonEnvInfo};
use crate::watcher::{FileWatcher, NotifyWatcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Scanning,
    Disposed,
}

/// Builds the default locator set: `PATH`, pyenv and project virtual
/// environments, in that registration order.
pub fn build_locators(config: &Config, watcher: Option<&dyn FileWatcher>) -> Locators {
    let mut locators: Vec<Box<dyn Locator>> = vec![Box::new(PathEnvVarLocator::from_env())];

    let pyenv = match &config.pyenv_root {
        Some(root) => Some(PyenvLocator::new(root, watcher)),
        None => PyenvLocator::from_env(watcher),
    };
    if let Some(pyenv) = pyenv {
        locators.push(Box::new(pyenv));
    }

    if !config.venv_roots.is_empty() {
        locators.push(Box::new(VirtualEnvLocator::new(
            config.venv_roots.clone(),
            watcher,
        )));
    }

    Locators::new(locators).with_resolve_timeout(config.resolve_timeout())
}

/// Collapses records sharing an [`EnvKey`] into one.
///
/// The first record seen for a key keeps its position. Later records fill
/// in fields it lacks; on a conflict the record from the lower-ranked
/// (earlier registered) source wins.
#[derive(Default)]
struct Deduper {
    index: HashMap<EnvKey, (usize, usize)>,
    records: Vec<PythonEnvInfo>,
}

impl Deduper {
    /// Adds a record. Returns its key when the key is new.
    fn insert(&mut self, rank: usize, env: PythonEnvInfo) -> Option<EnvKey> {
        let key = env.key();
        match self.index.get_mut(&key) {
            Some((position, best_rank)) => {
                let kept = &self.records[*position];
                let merged = kept.merged_with(&env, rank < *best_rank);
                self.records[*position] = merged;
                *best_rank = (*best_rank).min(rank);
                None
            }
            None => {
                self.index.insert(key.clone(), (self.records.len(), rank));
                self.records.push(env);
                Some(key)
            }
        }
    }

    /// The merged record for `key` and the best rank that reported it.
    fn get(&self, key: &EnvKey) -> Option<(&PythonEnvInfo, usize)> {
        self.index
            .get(key)
            .map(|(position, rank)| (&self.records[*position], *rank))
    }

    fn into_records(self) -> Vec<PythonEnvInfo> {
        self.records
    }
}

/// State shared with the change relay task.
#[derive(Default)]
struct Shared {
    snapshot: Mutex<Option<Arc<Vec<PythonEnvInfo>>>>,
    generation: AtomicU64,
    active_scans: AtomicUsize,
}

impl Shared {
    fn invalidate(&self) {
        let mut snapshot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        self.generation.fetch_add(1, Ordering::SeqCst);
        if snapshot.take().is_some() {
            debug!("Environment snapshot invalidated");
        }
    }

    fn cached(&self) -> Option<Arc<Vec<PythonEnvInfo>>> {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stores a snapshot unless a change arrived since `generation` was read.
    fn store(&self, generation: u64, records: Vec<PythonEnvInfo>) {
        let mut snapshot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        if self.generation.load(Ordering::SeqCst) == generation {
            debug!("Cached snapshot of {} environments", records.len());
            *snapshot = Some(Arc::new(records));
        }
    }
}

/// Keeps the engine in the `Scanning` state while alive.
struct ScanGuard(Arc<Shared>);

impl ScanGuard {
    fn new(shared: &Arc<Shared>) -> Self {
        shared.active_scans.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(shared))
    }
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        self.0.active_scans.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One in-flight scan over the aggregate.
///
/// A record is held back until every source registered before the best one
/// that reported it has finished. From then on no source can win a conflict
/// against it, so its kind is final and the kind filter can be applied.
struct Scan {
    ranked: BoxStream<'static, RankedEnv>,
    dedup: Deduper,
    query: PythonLocatorQuery,
    /// Keys seen but not yet released, in first-seen order.
    held: Vec<EnvKey>,
    ready: VecDeque<PythonEnvInfo>,
    exhausted: Vec<bool>,
    drained: bool,
    /// Generation at scan start; `None` when the listing is not cacheable.
    snapshot: Option<u64>,
    guard: ScanGuard,
}

impl Scan {
    /// Next settled record matching the query, merged so far.
    async fn next_settled(&mut self) -> Option<PythonEnvInfo> {
        loop {
            if let Some(env) = self.ready.pop_front() {
                return Some(env);
            }
            if self.drained {
                return None;
            }
            match self.ranked.next().await {
                Some(RankedEnv::Found(rank, env)) => {
                    if let Some(key) = self.dedup.insert(rank, env) {
                        self.held.push(key);
                    }
                }
                Some(RankedEnv::Exhausted(rank)) => {
                    if let Some(done) = self.exhausted.get_mut(rank) {
                        *done = true;
                    }
                }
                None => {
                    self.drained = true;
                    self.exhausted.fill(true);
                }
            }
            self.release_settled();
        }
    }

    fn release_settled(&mut self) {
        let frontier = self
            .exhausted
            .iter()
            .position(|done| !done)
            .unwrap_or(usize::MAX);
        let dedup = &self.dedup;
        let query = &self.query;
        let ready = &mut self.ready;
        self.held.retain(|key| match dedup.get(key) {
            Some((_, rank)) if rank > frontier => true,
            Some((env, _)) => {
                if query.allows_kind(env.kind) {
                    ready.push_back(env.clone());
                }
                false
            }
            None => false,
        });
    }

    /// Runs the rest of the scan without yielding.
    async fn drain(&mut self) {
        while let Some(item) = self.ranked.next().await {
            if let RankedEnv::Found(rank, env) = item {
                self.dedup.insert(rank, env);
            }
        }
        self.drained = true;
    }

    /// Consumes the finished scan, caching it when eligible, and returns
    /// the merged records matching the query.
    fn finish(self) -> Vec<PythonEnvInfo> {
        let records = self.dedup.into_records();
        if let Some(generation) = self.snapshot {
            self.guard.0.store(generation, records.clone());
        }
        filter_kinds(&records, &self.query)
    }
}

fn filter_kinds(records: &[PythonEnvInfo], query: &PythonLocatorQuery) -> Vec<PythonEnvInfo> {
    records
        .iter()
        .filter(|env| query.allows_kind(env.kind))
        .cloned()
        .collect()
}

enum Plan {
    Cached(Vec<PythonEnvInfo>),
    Scan(Scan),
}

/// Deduplicated, cached view over a set of locators.
///
/// # Example
///
/// ```no_run
/// use envscan::{Config, EnvironmentsEngine};
/// use envscan::locator::PythonLocatorQuery;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let engine = EnvironmentsEngine::from_config(&Config::default());
///     for env in engine.get_envs(&PythonLocatorQuery::default()).await? {
///         println!("{} {}", env.display_name(), env.executable.display());
///     }
///     engine.dispose();
///     Ok(())
/// }
/// ```
pub struct EnvironmentsEngine {
    locators: Locators,
    shared: Arc<Shared>,
    emitter: ChangeEmitter,
    relay: Mutex<Option<JoinHandle<()>>>,
    cache_enabled: bool,
}

impl EnvironmentsEngine {
    /// Takes ownership of `locators`. Must be called inside a Tokio runtime.
    pub fn new(locators: Locators) -> Self {
        let shared = Arc::new(Shared::default());
        let emitter = ChangeEmitter::new();
        let relay = spawn_invalidation_relay(
            locators.subscribe(),
            Arc::downgrade(&shared),
            emitter.clone(),
        );
        Self {
            locators,
            shared,
            emitter,
            relay: Mutex::new(Some(relay)),
            cache_enabled: true,
        }
    }

    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    /// Builds the default locator set described by `config`.
    pub fn from_config(config: &Config) -> Self {
        let notify = NotifyWatcher::new(config.watch_debounce());
        let watcher: Option<&dyn FileWatcher> = if config.watch { Some(&notify) } else { None };
        Self::new(build_locators(config, watcher)).with_cache(config.cache)
    }

    pub fn state(&self) -> EngineState {
        if self.locators.ensure_active().is_err() {
            EngineState::Disposed
        } else if self.shared.active_scans.load(Ordering::SeqCst) > 0 {
            EngineState::Scanning
        } else {
            EngineState::Idle
        }
    }

    fn plan(&self, query: &PythonLocatorQuery) -> Result<Plan> {
        self.locators.ensure_active()?;
        query.validate()?;

        let cacheable = self.cache_enabled && !query.has_search_locations();
        if cacheable {
            if let Some(snapshot) = self.shared.cached() {
                debug!("Serving {} environments from snapshot", snapshot.len());
                return Ok(Plan::Cached(filter_kinds(&snapshot, query)));
            }
        }

        // sources see every kind: a duplicate of another kind can still
        // decide the merged record's kind
        let generation = self.shared.generation.load(Ordering::SeqCst);
        let ranked = self.locators.iter_envs_ranked(&query.without_kinds())?;
        Ok(Plan::Scan(Scan {
            ranked,
            dedup: Deduper::default(),
            query: query.clone(),
            held: Vec::new(),
            ready: VecDeque::new(),
            exhausted: vec![false; self.locators.len()],
            drained: false,
            snapshot: cacheable.then_some(generation),
            guard: ScanGuard::new(&self.shared),
        }))
    }

    /// Lazily yields each environment once.
    ///
    /// A record is yielded as soon as every locator registered before the
    /// one that found it has finished, so its kind agrees with
    /// [`get_envs`](Self::get_envs) and [`resolve_env`](Self::resolve_env).
    /// Fields a later-registered duplicate fills in afterwards only show up
    /// in [`get_envs`](Self::get_envs) and listings served from the snapshot.
    ///
    /// # Errors
    ///
    /// [`LocatorError::Disposed`](crate::error::LocatorError::Disposed)
    /// after disposal and
    /// [`LocatorError::InvalidQuery`](crate::error::LocatorError::InvalidQuery)
    /// for a malformed query.
    pub fn iter_envs(&self, query: &PythonLocatorQuery) -> Result<PythonEnvsIterator> {
        match self.plan(query)? {
            Plan::Cached(envs) => Ok(stream::iter(envs).boxed()),
            Plan::Scan(scan) => Ok(stream::unfold(Some(scan), |scan| async move {
                let mut scan = scan?;
                match scan.next_settled().await {
                    Some(env) => Some((env, Some(scan))),
                    None => {
                        scan.finish();
                        None
                    }
                }
            })
            .boxed()),
        }
    }

    /// Collects the full, merged listing.
    pub async fn get_envs(&self, query: &PythonLocatorQuery) -> Result<Vec<PythonEnvInfo>> {
        match self.plan(query)? {
            Plan::Cached(envs) => Ok(envs),
            Plan::Scan(mut scan) => {
                scan.drain().await;
                Ok(scan.finish())
            }
        }
    }

    /// Resolves through the locators in registration order.
    pub async fn resolve_env(&self, env: &EnvRef) -> Result<Option<PythonEnvInfo>> {
        self.locators.ensure_active()?;
        self.locators.resolve_env(env).await
    }

    /// Change events from every locator, relayed after the snapshot has
    /// been invalidated.
    pub fn subscribe(&self) -> broadcast::Receiver<PythonEnvsChangedEvent> {
        self.emitter.subscribe()
    }

    /// Disposes every locator exactly once and drops the snapshot.
    /// Idempotent.
    pub fn dispose(&self) {
        if self.locators.ensure_active().is_err() {
            return;
        }
        if let Some(relay) = self
            .relay
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            relay.abort();
        }
        self.locators.dispose();
        self.shared.invalidate();
        self.emitter.close();
    }
}

impl Drop for EnvironmentsEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn spawn_invalidation_relay(
    mut rx: broadcast::Receiver<PythonEnvsChangedEvent>,
    shared: Weak<Shared>,
    emitter: ChangeEmitter,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(_)) => PythonEnvsChangedEvent::default(),
                Err(RecvError::Closed) => break,
            };
            let Some(shared) = shared.upgrade() else {
                break;
            };
            shared.invalidate();
            emitter.fire(event);
        }
    })
}
