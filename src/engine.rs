//! Top-level remediation pipeline.
//!
//! [`RemediationEngine`] wires the stages end to end:
//! scan (chunked) → remote overrides (chunked) → resolve → artifact
//! download (chunked) → transactional apply. Bulk queries run concurrently
//! through the [`ChunkDispatcher`]; fix application runs sequentially on a
//! blocking task via `tokio::task::spawn_blocking`.

use crate::dispatch::{BoxError, ChunkDispatcher, DispatchError};
use crate::fix::{FixCoordinator, FixError, Fixer};
use crate::model::{
    local_ids, ArtifactPayload, DependencyDescriptor, DependencyMap, FixMap, Override,
    PackageVersion,
};
use crate::resolve::{build_fix_map, merge_override_sources, resolve_overrides};
use crate::traits::Backend;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::info;

/// Default number of ids per bulk-query chunk.
const DEFAULT_CHUNK_SIZE: usize = 100;

/// Errors that can occur while running the remediation pipeline.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A bulk remote query failed; first chunk error wins
    #[error("Bulk query failed: {0}")]
    Dispatch(#[from] DispatchError),

    /// Fix application failed; the store was rolled back to its pre-run state
    #[error("Fix application failed: {0}")]
    Fix(#[from] FixError),

    /// The blocking apply task could not be joined
    #[error("Apply task failed: {0}")]
    ApplyTask(String),
}

/// Everything resolution produced, before any disk mutation: the override
/// set to persist and the fix work to apply.
#[derive(Debug)]
pub struct ResolvedPlan {
    /// Authoritative override per surviving origin id, for the actions-file
    /// writer
    pub overrides: HashMap<String, Override>,

    /// Fix work joined to physical locations
    pub fix_map: FixMap,

    /// Raw scan results, kept for reporting
    pub remote_packages: Vec<PackageVersion>,
}

/// Result of a full remediation run.
#[derive(Debug)]
pub struct RemediationOutcome {
    /// Applied descriptors with their actually-patched locations, for the
    /// reporting collaborator
    pub applied: Vec<DependencyDescriptor>,

    /// The resolved override set, for persistence
    pub overrides: HashMap<String, Override>,
}

/// Sequencer for one dependency-store target.
///
/// # Concurrency
///
/// Only the bulk queries are concurrent. Two engines must never remediate
/// the same store root at once; callers guard that externally (e.g. a lock
/// file at the target root). There is no deadline at this layer; wrap the
/// whole call when one is needed.
pub struct RemediationEngine<B> {
    backend: Arc<B>,
    dispatcher: ChunkDispatcher,
    chunk_size: usize,
}

impl<B: Backend + 'static> RemediationEngine<B> {
    /// Creates an engine with the default chunk size and an unbounded
    /// dispatcher.
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            dispatcher: ChunkDispatcher::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Sets the number of ids per chunk; `0` disables chunking (one request
    /// carries the whole input).
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Replaces the dispatcher, e.g. to cap concurrent requests.
    pub fn with_dispatcher(mut self, dispatcher: ChunkDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Fetches fresh scan results for the given ids, one page per chunk.
    pub async fn query_scan(&self, ids: Vec<String>) -> Result<Vec<PackageVersion>, EngineError> {
        let gathered = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&gathered);
        let backend = Arc::clone(&self.backend);

        self.dispatcher
            .run(
                ids,
                self.chunk_size,
                move |chunk: Vec<String>, _idx| {
                    let backend = Arc::clone(&backend);
                    async move {
                        backend
                            .query_package_versions(&chunk)
                            .await
                            .map_err(|e| -> BoxError { Box::new(e) })
                    }
                },
                move |page: Vec<PackageVersion>, _idx| {
                    sink.lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .extend(page);
                    Ok(())
                },
            )
            .await?;

        Ok(drain(&gathered))
    }

    /// Fetches the remotely approved override configuration for the given
    /// ids, keyed by origin id.
    pub async fn query_remote_overrides(
        &self,
        ids: Vec<String>,
    ) -> Result<HashMap<String, Override>, EngineError> {
        let gathered = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&gathered);
        let backend = Arc::clone(&self.backend);

        self.dispatcher
            .run(
                ids,
                self.chunk_size,
                move |chunk: Vec<String>, _idx| {
                    let backend = Arc::clone(&backend);
                    async move {
                        backend
                            .query_remote_overrides(&chunk)
                            .await
                            .map_err(|e| -> BoxError { Box::new(e) })
                    }
                },
                move |page: Vec<Override>, _idx| {
                    sink.lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .extend(page);
                    Ok(())
                },
            )
            .await?;

        Ok(drain(&gathered)
            .into_iter()
            .map(|rule| (rule.from_id(), rule))
            .collect())
    }

    /// Downloads the patched artifact for every descriptor in the fix map,
    /// keyed by origin id.
    pub async fn fetch_payloads(
        &self,
        fix_map: &FixMap,
    ) -> Result<HashMap<String, ArtifactPayload>, EngineError> {
        let mut wanted: Vec<(String, PackageVersion)> = fix_map
            .iter()
            .map(|(id, descriptor)| (id.clone(), descriptor.replacement.clone()))
            .collect();
        wanted.sort_by(|a, b| a.0.cmp(&b.0));

        let gathered = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&gathered);
        let backend = Arc::clone(&self.backend);

        self.dispatcher
            .run(
                wanted,
                self.chunk_size,
                move |chunk: Vec<(String, PackageVersion)>, _idx| {
                    let backend = Arc::clone(&backend);
                    async move {
                        let mut page = Vec::with_capacity(chunk.len());
                        for (id, replacement) in chunk {
                            let payload = backend
                                .fetch_artifact(&replacement)
                                .await
                                .map_err(|e| -> BoxError { Box::new(e) })?;
                            page.push((id, payload));
                        }
                        Ok(page)
                    }
                },
                move |page: Vec<(String, ArtifactPayload)>, _idx| {
                    sink.lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .extend(page);
                    Ok(())
                },
            )
            .await?;

        Ok(drain(&gathered).into_iter().collect())
    }

    /// Runs scan, remote-override lookup and resolution, producing the plan
    /// without touching disk.
    pub async fn plan(
        &self,
        deps: &DependencyMap,
        local_actions: &HashMap<String, Override>,
    ) -> Result<ResolvedPlan, EngineError> {
        let mut ids: Vec<String> = deps.keys().cloned().collect();
        // Deterministic chunking regardless of map iteration order.
        ids.sort();

        info!(dependencies = ids.len(), "Starting remediation scan");
        let remote_packages = self.query_scan(ids.clone()).await?;
        let remote_config = self.query_remote_overrides(ids).await?;

        let existing = merge_override_sources(local_actions, &remote_config);
        let installed = local_ids(deps);
        let overrides = resolve_overrides(&installed, &remote_packages, &existing);
        let fix_map = build_fix_map(&overrides, deps, &remote_packages);

        info!(
            overrides = overrides.len(),
            fixes = fix_map.len(),
            "Resolution completed"
        );
        Ok(ResolvedPlan {
            overrides,
            fix_map,
            remote_packages,
        })
    }

    /// Full pipeline for one store target: plan, download payloads and apply
    /// transactionally through `fixer`.
    ///
    /// # Errors
    ///
    /// Any bulk-query failure aborts before disk mutation. A fix failure
    /// surfaces after the batch has been rolled back, leaving the store in
    /// its pre-run state, never partially patched.
    pub async fn remediate(
        &self,
        deps: &DependencyMap,
        local_actions: &HashMap<String, Override>,
        mut fixer: Box<dyn Fixer>,
        target: &str,
    ) -> Result<RemediationOutcome, EngineError> {
        let plan = self.plan(deps, local_actions).await?;
        if plan.fix_map.is_empty() {
            info!(target, "Nothing to fix");
            return Ok(RemediationOutcome {
                applied: Vec::new(),
                overrides: plan.overrides,
            });
        }

        let payloads = self.fetch_payloads(&plan.fix_map).await?;

        let coordinator = FixCoordinator::new(target);
        let fix_map = plan.fix_map;
        let applied = tokio::task::spawn_blocking(move || {
            coordinator.apply(fixer.as_mut(), fix_map, &payloads)
        })
        .await
        .map_err(|e| EngineError::ApplyTask(e.to_string()))??;

        Ok(RemediationOutcome {
            applied,
            overrides: plan.overrides,
        })
    }
}

/// Takes the accumulator's contents once every chunk task has finished.
fn drain<T>(gathered: &Arc<Mutex<Vec<T>>>) -> Vec<T> {
    std::mem::take(
        &mut *gathered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()),
    )
}
