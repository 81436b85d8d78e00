//! In-memory indexer for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{Result, ShipError};
use crate::indexer::{Indexer, IndexerFactory};
use crate::payload::LogPayload;
use crate::types::{IndexerConfig, IndexerKind};

/// What the fake does with one push.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PushOutcome {
    /// Record the payload and succeed.
    #[default]
    Accept,
    /// Fail as if the backend were unreachable.
    TransportError,
    /// Fail as if the backend answered with this HTTP status.
    HttpStatus(u16),
}

#[derive(Debug, Default)]
struct FakeState {
    script: VecDeque<PushOutcome>,
    fallback: PushOutcome,
    attempts: usize,
    payloads: Vec<LogPayload>,
}

/// Indexer that records payloads and plays back scripted outcomes.
///
/// Clones share state, so a test can keep a handle after handing a clone to
/// a writer.
#[derive(Debug, Clone)]
pub struct FakeIndexer {
    kind: IndexerKind,
    state: Arc<Mutex<FakeState>>,
}

impl Default for FakeIndexer {
    fn default() -> Self {
        Self::new(IndexerKind::Search)
    }
}

impl FakeIndexer {
    /// Creates a fake that accepts every push.
    #[must_use]
    pub fn new(kind: IndexerKind) -> Self {
        Self {
            kind,
            state: Arc::new(Mutex::new(FakeState::default())),
        }
    }

    /// Queues outcomes for the next pushes, in order.
    #[must_use]
    pub fn with_outcomes(self, outcomes: impl IntoIterator<Item = PushOutcome>) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.script.extend(outcomes);
        }
        self
    }

    /// Sets the outcome used once the script is exhausted.
    #[must_use]
    pub fn with_fallback(self, outcome: PushOutcome) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.fallback = outcome;
        }
        self
    }

    /// Returns how many pushes were attempted.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.state.lock().map(|s| s.attempts).unwrap_or(0)
    }

    /// Returns the accepted payloads.
    #[must_use]
    pub fn payloads(&self) -> Vec<LogPayload> {
        self.state
            .lock()
            .map(|s| s.payloads.clone())
            .unwrap_or_default()
    }

    /// Returns every accepted line, in order.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.payloads()
            .into_iter()
            .flat_map(|p| p.message)
            .collect()
    }
}

impl Indexer for FakeIndexer {
    fn kind(&self) -> IndexerKind {
        self.kind
    }

    fn description(&self) -> String {
        "fake".to_string()
    }

    fn push(&mut self, payload: &LogPayload) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| ShipError::transport(self.kind, "lock poisoned"))?;
        state.attempts += 1;
        let outcome = state.script.pop_front().unwrap_or(state.fallback);

        match outcome {
            PushOutcome::Accept => {
                state.payloads.push(payload.clone());
                Ok(())
            }
            PushOutcome::TransportError => {
                Err(ShipError::transport(self.kind, "connection refused"))
            }
            PushOutcome::HttpStatus(status) => Err(ShipError::HttpStatus {
                status,
                uri: "fake://indexer".to_string(),
                body: String::new(),
            }),
        }
    }
}

/// Factory handing out clones of one [`FakeIndexer`].
#[derive(Debug, Clone, Default)]
pub struct FakeIndexerFactory {
    indexer: FakeIndexer,
    reject: bool,
    creations: Arc<AtomicUsize>,
}

impl FakeIndexerFactory {
    /// Creates a factory for `indexer`.
    #[must_use]
    pub fn new(indexer: FakeIndexer) -> Self {
        Self {
            indexer,
            reject: false,
            creations: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Creates a factory whose every `create` fails with a configuration error.
    #[must_use]
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }

    /// Returns the shared indexer.
    #[must_use]
    pub const fn indexer(&self) -> &FakeIndexer {
        &self.indexer
    }

    /// Returns how many times `create` was called.
    #[must_use]
    pub fn creations(&self) -> usize {
        self.creations.load(Ordering::SeqCst)
    }
}

impl IndexerFactory for FakeIndexerFactory {
    fn create(&self, _config: &IndexerConfig) -> Result<Box<dyn Indexer>> {
        self.creations.fetch_add(1, Ordering::SeqCst);
        if self.reject {
            return Err(ShipError::config("fake factory rejects every configuration"));
        }
        Ok(Box::new(self.indexer.clone()))
    }
}
