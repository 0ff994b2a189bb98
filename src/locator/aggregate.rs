use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{
    ChangeEmitter, DisposeState, Locator, PythonEnvsChangedEvent, PythonEnvsIterator,
    PythonLocatorQuery,
};
use crate::error::{LocatorError, Result};
use crate::model::{EnvRef, PythonEnvInfo};

/// Default bound on how long one child may take to resolve an environment.
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Composes child locators into one logical locator.
///
/// Iteration fans in every child's stream as records arrive, so a slow child
/// never holds back a fast one; order is kept within each child only.
/// Resolution asks children in registration order and stops at the first
/// match. Change events from every child are relayed unchanged.
///
/// Construction spawns one relay task per child and must happen inside a
/// Tokio runtime.
pub struct Locators {
    locators: Vec<Box<dyn Locator>>,
    emitter: ChangeEmitter,
    relays: Mutex<Vec<JoinHandle<()>>>,
    resolve_timeout: Duration,
    state: DisposeState,
}

impl Locators {
    pub fn new(locators: Vec<Box<dyn Locator>>) -> Self {
        let emitter = ChangeEmitter::new();
        let relays = locators
            .iter()
            .map(|locator| spawn_relay(locator.name(), locator.subscribe(), emitter.clone()))
            .collect();
        Self {
            locators,
            emitter,
            relays: Mutex::new(relays),
            resolve_timeout: DEFAULT_RESOLVE_TIMEOUT,
            state: DisposeState::default(),
        }
    }

    pub fn with_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    pub fn len(&self) -> usize {
        self.locators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locators.is_empty()
    }

    pub(crate) fn ensure_active(&self) -> Result<()> {
        self.state.ensure_active()
    }

    /// Like [`Locator::iter_envs`], tagging each record with the
    /// registration index of the child that produced it. Each child also
    /// reports [`RankedEnv::Exhausted`] once its scan is over, including a
    /// child that could not start one.
    pub fn iter_envs_ranked(
        &self,
        query: &PythonLocatorQuery,
    ) -> Result<BoxStream<'static, RankedEnv>> {
        self.state.ensure_active()?;
        let streams: Vec<BoxStream<'static, RankedEnv>> = self
            .locators
            .iter()
            .enumerate()
            .map(|(rank, locator)| match locator.iter_envs(query) {
                Ok(envs) => envs
                    .map(move |env| RankedEnv::Found(rank, env))
                    .chain(stream::once(async move { RankedEnv::Exhausted(rank) }))
                    .boxed(),
                Err(err) => {
                    warn!("{} could not start a scan: {}", locator.name(), err);
                    stream::once(async move { RankedEnv::Exhausted(rank) }).boxed()
                }
            })
            .collect();
        Ok(stream::select_all(streams).boxed())
    }
}

/// One item of a ranked scan.
#[derive(Debug, Clone, PartialEq)]
pub enum RankedEnv {
    /// A record from the child registered at this index.
    Found(usize, PythonEnvInfo),
    /// The child registered at this index has nothing more to yield.
    Exhausted(usize),
}

#[async_trait]
impl Locator for Locators {
    fn name(&self) -> &'static str {
        "Locators"
    }

    fn iter_envs(&self, query: &PythonLocatorQuery) -> Result<PythonEnvsIterator> {
        Ok(self
            .iter_envs_ranked(query)?
            .filter_map(|item| async move {
                match item {
                    RankedEnv::Found(_, env) => Some(env),
                    RankedEnv::Exhausted(_) => None,
                }
            })
            .boxed())
    }

    async fn resolve_env(&self, env: &EnvRef) -> Result<Option<PythonEnvInfo>> {
        self.state.ensure_active()?;
        let mut first_error: Option<LocatorError> = None;

        for locator in &self.locators {
            match tokio::time::timeout(self.resolve_timeout, locator.resolve_env(env)).await {
                Ok(Ok(Some(resolved))) => return Ok(Some(resolved)),
                Ok(Ok(None)) => {}
                Ok(Err(err)) => {
                    warn!(
                        "{} failed to resolve {:?}: {}",
                        locator.name(),
                        env.executable(),
                        err
                    );
                    first_error.get_or_insert(err);
                }
                Err(_) => warn!(
                    "{} timed out resolving {:?} after {:?}",
                    locator.name(),
                    env.executable(),
                    self.resolve_timeout
                ),
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<PythonEnvsChangedEvent> {
        self.emitter.subscribe()
    }

    fn dispose(&self) {
        if !self.state.mark_disposed() {
            return;
        }
        for relay in self
            .relays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            relay.abort();
        }
        for locator in &self.locators {
            locator.dispose();
        }
        self.emitter.close();
    }
}

impl Drop for Locators {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn spawn_relay(
    name: &'static str,
    mut rx: broadcast::Receiver<PythonEnvsChangedEvent>,
    emitter: ChangeEmitter,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    emitter.fire(event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!("{} change relay lagged by {} events", name, skipped);
                    emitter.fire(PythonEnvsChangedEvent::default());
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
