use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio::time::Instant;

use super::normalize::normalize;
use super::RefreshError;
use crate::provider::Providers;
use crate::storage::{CanonicalItem, Content, Database, Reconciled, Source};

// ============================================================================
// Unit State
// ============================================================================

/// Lifecycle of one source's refresh unit.
///
/// `Succeeded` and `Failed` are terminal; nothing is retried within one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Pending,
    Fetching,
    Normalizing,
    Reconciling,
    Succeeded,
    Failed,
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnitState::Pending => "pending",
            UnitState::Fetching => "fetching",
            UnitState::Normalizing => "normalizing",
            UnitState::Reconciling => "reconciling",
            UnitState::Succeeded => "succeeded",
            UnitState::Failed => "failed",
        })
    }
}

fn transition(source: &Source, state: UnitState) {
    tracing::debug!(
        source_id = %source.source_id,
        source_type = %source.source_type,
        state = %state,
        "Refresh unit"
    );
}

/// Fetch, normalize and reconcile one source.
///
/// Every failure is returned; nothing here panics or retries.
pub async fn run_unit(
    providers: &Providers,
    db: &Database,
    source: &Source,
    force: bool,
) -> Result<Reconciled, RefreshError> {
    let result = async {
        transition(source, UnitState::Fetching);
        let raw = providers
            .for_type(source.source_type)
            .fetch_items(source)
            .await?;

        transition(source, UnitState::Normalizing);
        let items: Vec<CanonicalItem> = raw
            .into_iter()
            .map(|item| normalize(source.source_type, item))
            .collect();

        transition(source, UnitState::Reconciling);
        let reconciled = db.reconcile(source, &items, force).await?;
        Ok::<_, RefreshError>(reconciled)
    }
    .await;

    match &result {
        Ok(reconciled) => {
            transition(source, UnitState::Succeeded);
            tracing::info!(
                source_id = %source.source_id,
                created = reconciled.created.len(),
                updated = reconciled.updated.len(),
                "Source refreshed"
            );
        }
        Err(e) => {
            transition(source, UnitState::Failed);
            tracing::warn!(source_id = %source.source_id, error = %e, "Source refresh failed");
        }
    }
    result
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Per-source results of one multi-source refresh, keyed by external ID.
#[derive(Debug, Default)]
pub struct RefreshOutcome {
    /// Rows written per source: created first, then force-updated
    pub contents: BTreeMap<String, Vec<Content>>,
    pub errors: BTreeMap<String, RefreshError>,
}

type UnitResult = (String, Result<Reconciled, RefreshError>);

impl RefreshOutcome {
    fn record(&mut self, source_id: String, result: Result<Reconciled, RefreshError>) {
        match result {
            Ok(reconciled) => {
                let mut rows = reconciled.created;
                rows.extend(reconciled.updated);
                self.contents.insert(source_id, rows);
            }
            Err(e) => {
                self.errors.insert(source_id, e);
            }
        }
    }

    /// Close out a call once every worker has stopped.
    ///
    /// Results still queued are recorded first: a unit may commit right
    /// before the deadline fires. Sources left without a result become
    /// `TimedOut` after a deadline and `Aborted` otherwise.
    fn settle(
        &mut self,
        expected: &[String],
        results: &mut mpsc::Receiver<UnitResult>,
        timed_out: bool,
    ) {
        while let Ok((source_id, result)) = results.try_recv() {
            self.record(source_id, result);
        }
        for source_id in expected {
            if self.contents.contains_key(source_id) || self.errors.contains_key(source_id) {
                continue;
            }
            let err = if timed_out {
                RefreshError::TimedOut
            } else {
                RefreshError::Aborted
            };
            self.errors.insert(source_id.clone(), err);
        }
    }
}

/// Runs refresh units on a fixed-size worker pool.
///
/// Sources go out over a task channel shared by the workers and results
/// come back over a result channel. Each unit runs in its own task, so a
/// failing or panicking unit only affects its own source.
#[derive(Clone)]
pub struct Orchestrator {
    providers: Arc<Providers>,
    db: Database,
    workers: usize,
}

impl Orchestrator {
    pub fn new(providers: Arc<Providers>, db: Database, workers: usize) -> Self {
        Self {
            providers,
            db,
            workers: workers.max(1),
        }
    }

    /// Refresh every source in `sources`.
    ///
    /// Units still running when `timeout` expires are cancelled (their
    /// transactions roll back) and reported as `RefreshError::TimedOut`;
    /// results gathered before that are kept.
    pub async fn refresh_sources(
        &self,
        sources: Vec<Source>,
        force: bool,
        timeout: Duration,
    ) -> RefreshOutcome {
        let mut outcome = RefreshOutcome::default();
        if sources.is_empty() {
            return outcome;
        }

        let deadline = Instant::now() + timeout;
        let expected: Vec<String> = sources.iter().map(|s| s.source_id.clone()).collect();
        for source in &sources {
            transition(source, UnitState::Pending);
        }

        let (task_tx, task_rx) = mpsc::channel::<Source>(sources.len());
        let (result_tx, mut result_rx) = mpsc::channel::<UnitResult>(sources.len());
        for source in sources {
            if task_tx.send(source).await.is_err() {
                break;
            }
        }
        // Workers stop once the queue drains
        drop(task_tx);

        let task_rx = Arc::new(Mutex::new(task_rx));
        let mut workers = JoinSet::new();
        for worker in 0..self.workers.min(expected.len()) {
            let task_rx = Arc::clone(&task_rx);
            let result_tx = result_tx.clone();
            let providers = Arc::clone(&self.providers);
            let db = self.db.clone();

            workers.spawn(async move {
                loop {
                    let next = task_rx.lock().await.recv().await;
                    let Some(source) = next else {
                        break;
                    };
                    let source_id = source.source_id.clone();

                    // Own task per unit: a panic surfaces as a JoinError here
                    // instead of killing the worker. Dropping the set aborts it.
                    let mut unit = JoinSet::new();
                    let providers = Arc::clone(&providers);
                    let db = db.clone();
                    unit.spawn(async move { run_unit(&providers, &db, &source, force).await });

                    let result = match unit.join_next().await {
                        Some(Ok(result)) => result,
                        Some(Err(e)) => {
                            tracing::error!(worker, source_id = %source_id, error = %e, "Refresh unit panicked");
                            Err(RefreshError::Aborted)
                        }
                        None => Err(RefreshError::Aborted),
                    };
                    if result_tx.send((source_id, result)).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        let mut timed_out = false;
        loop {
            match tokio::time::timeout_at(deadline, result_rx.recv()).await {
                Ok(Some((source_id, result))) => outcome.record(source_id, result),
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        pending = expected.len() - outcome.contents.len() - outcome.errors.len(),
                        "Refresh deadline reached, cancelling remaining units"
                    );
                    workers.abort_all();
                    timed_out = true;
                    break;
                }
            }
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                if !e.is_cancelled() {
                    tracing::error!(error = %e, "Refresh worker failed");
                }
            }
        }

        outcome.settle(&expected, &mut result_rx, timed_out);

        tracing::info!(
            succeeded = outcome.contents.len(),
            failed = outcome.errors.len(),
            created = outcome.contents.values().map(Vec::len).sum::<usize>(),
            "Refresh finished"
        );
        outcome
    }
}
