//! Migration storage
//!
//! [`MigrationRepository`] is the persistence seam of the workflow engine.
//! [`MemoryStore`] keeps everything behind one lock and is used when no
//! database is configured and in tests.

use super::models::{Cluster, MetaRequest, Migration, MigrationStatus};
use super::transition::{ApplyOutcome, BatchPolicy, Effect, Transition};
use crate::error::AppError;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Result of applying several transitions together
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    /// One entry per requested transition, in order
    pub outcomes: Vec<ApplyOutcome>,
    /// Whether any change was kept
    pub committed: bool,
}

impl BatchOutcome {
    pub fn all_applied(&self) -> bool {
        self.outcomes.iter().all(ApplyOutcome::is_applied)
    }
}

#[async_trait]
pub trait MigrationRepository: Send + Sync {
    // Clusters

    async fn upsert_cluster(&self, cluster: Cluster) -> Result<Cluster, AppError>;
    async fn get_cluster(&self, name: &str) -> Result<Option<Cluster>, AppError>;
    async fn list_clusters(&self) -> Result<Vec<Cluster>, AppError>;

    // Meta requests

    /// Insert a meta request together with its member migrations
    async fn insert_meta_request(&self, meta: MetaRequest, members: Vec<Migration>) -> Result<(), AppError>;
    async fn get_meta_request(&self, id: Uuid) -> Result<Option<MetaRequest>, AppError>;
    async fn update_meta_request(&self, meta: MetaRequest) -> Result<(), AppError>;

    // Migrations

    async fn insert(&self, migration: Migration) -> Result<Migration, AppError>;
    async fn get(&self, id: Uuid) -> Result<Option<Migration>, AppError>;
    /// Most recently updated first
    async fn list(&self, status: Option<MigrationStatus>) -> Result<Vec<Migration>, AppError>;
    async fn list_by_meta_request(&self, meta_request_id: Uuid) -> Result<Vec<Migration>, AppError>;
    /// Staged migrations in machine-owned statuses, most recently updated first
    async fn staged(&self, limit: usize) -> Result<Vec<Migration>, AppError>;
    /// Oldest auto-run migration in `status` for every cluster
    async fn oldest_auto_run(&self, status: MigrationStatus) -> Result<Vec<Migration>, AppError>;

    // Transitions

    /// The only way to change a stored migration
    async fn apply(&self, id: Uuid, transition: &Transition) -> Result<ApplyOutcome, AppError>;
    async fn apply_all(
        &self,
        batch: Vec<(Uuid, Transition)>,
        policy: BatchPolicy,
    ) -> Result<BatchOutcome, AppError>;
}

#[derive(Debug, Default, Clone)]
struct MemoryState {
    migrations: HashMap<Uuid, Migration>,
    clusters: HashMap<String, Cluster>,
    meta_requests: HashMap<Uuid, MetaRequest>,
}

impl MemoryState {
    fn running_alters(&self, cluster_name: &str, except: Uuid) -> i64 {
        self.migrations
            .values()
            .filter(|m| m.id != except && m.cluster_name() == cluster_name && m.is_running_alter())
            .count() as i64
    }

    fn apply(&mut self, id: Uuid, transition: &Transition) -> ApplyOutcome {
        let Some(current) = self.migrations.get(&id) else {
            return ApplyOutcome::Rejected;
        };
        if !transition.guard.matches(current) {
            return ApplyOutcome::Rejected;
        }
        if transition.guard.admission_limit.is_some() {
            let running = self.running_alters(current.cluster_name(), id);
            if !transition.guard.admits(running) {
                return ApplyOutcome::AtCapacity;
            }
        }

        match &transition.effect {
            Effect::Delete => self
                .migrations
                .remove(&id)
                .map_or(ApplyOutcome::Rejected, ApplyOutcome::Applied),
            Effect::Update(_) => match self.migrations.get_mut(&id) {
                Some(m) => {
                    transition.apply_to(m, Utc::now());
                    ApplyOutcome::Applied(m.clone())
                }
                None => ApplyOutcome::Rejected,
            },
        }
    }
}

/// Thread-safe in-memory store
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn newest_first(mut migrations: Vec<Migration>) -> Vec<Migration> {
    migrations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.created_at.cmp(&a.created_at)));
    migrations
}

#[async_trait]
impl MigrationRepository for MemoryStore {
    async fn upsert_cluster(&self, cluster: Cluster) -> Result<Cluster, AppError> {
        let mut state = self.state.write().await;
        state.clusters.insert(cluster.name.clone(), cluster.clone());
        Ok(cluster)
    }

    async fn get_cluster(&self, name: &str) -> Result<Option<Cluster>, AppError> {
        Ok(self.state.read().await.clusters.get(name).cloned())
    }

    async fn list_clusters(&self) -> Result<Vec<Cluster>, AppError> {
        let state = self.state.read().await;
        let mut clusters: Vec<Cluster> = state.clusters.values().cloned().collect();
        clusters.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(clusters)
    }

    async fn insert_meta_request(&self, meta: MetaRequest, members: Vec<Migration>) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        if state.meta_requests.contains_key(&meta.id) {
            return Err(AppError::Conflict(format!("Meta request {} already exists", meta.id)));
        }
        if let Some(dup) = members.iter().find(|m| state.migrations.contains_key(&m.id)) {
            return Err(AppError::Conflict(format!("Migration {} already exists", dup.id)));
        }
        state.meta_requests.insert(meta.id, meta);
        for member in members {
            state.migrations.insert(member.id, member);
        }
        Ok(())
    }

    async fn get_meta_request(&self, id: Uuid) -> Result<Option<MetaRequest>, AppError> {
        Ok(self.state.read().await.meta_requests.get(&id).cloned())
    }

    async fn update_meta_request(&self, meta: MetaRequest) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        if !state.meta_requests.contains_key(&meta.id) {
            return Err(AppError::NotFound(format!("Meta request {} not found", meta.id)));
        }
        state.meta_requests.insert(meta.id, meta);
        Ok(())
    }

    async fn insert(&self, migration: Migration) -> Result<Migration, AppError> {
        let mut state = self.state.write().await;
        if state.migrations.contains_key(&migration.id) {
            return Err(AppError::Conflict(format!("Migration {} already exists", migration.id)));
        }
        state.migrations.insert(migration.id, migration.clone());
        Ok(migration)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Migration>, AppError> {
        Ok(self.state.read().await.migrations.get(&id).cloned())
    }

    async fn list(&self, status: Option<MigrationStatus>) -> Result<Vec<Migration>, AppError> {
        let state = self.state.read().await;
        Ok(newest_first(
            state
                .migrations
                .values()
                .filter(|m| status.map_or(true, |s| m.status == s))
                .cloned()
                .collect(),
        ))
    }

    async fn list_by_meta_request(&self, meta_request_id: Uuid) -> Result<Vec<Migration>, AppError> {
        let state = self.state.read().await;
        let mut members: Vec<Migration> = state
            .migrations
            .values()
            .filter(|m| m.meta_request_id == Some(meta_request_id))
            .cloned()
            .collect();
        members.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(members)
    }

    async fn staged(&self, limit: usize) -> Result<Vec<Migration>, AppError> {
        let state = self.state.read().await;
        let mut staged = newest_first(
            state
                .migrations
                .values()
                .filter(|m| m.staged && m.status.is_machine_owned())
                .cloned()
                .collect(),
        );
        staged.truncate(limit);
        Ok(staged)
    }

    async fn oldest_auto_run(&self, status: MigrationStatus) -> Result<Vec<Migration>, AppError> {
        let state = self.state.read().await;
        let mut oldest: HashMap<&str, &Migration> = HashMap::new();
        for m in state.migrations.values().filter(|m| m.status == status && m.auto_run) {
            let slot = oldest.entry(m.cluster_name()).or_insert(m);
            if (m.created_at, m.id) < (slot.created_at, slot.id) {
                *slot = m;
            }
        }
        let mut picked: Vec<Migration> = oldest.into_values().cloned().collect();
        picked.sort_by(|a, b| a.cluster_name().cmp(b.cluster_name()));
        Ok(picked)
    }

    async fn apply(&self, id: Uuid, transition: &Transition) -> Result<ApplyOutcome, AppError> {
        let mut state = self.state.write().await;
        Ok(state.apply(id, transition))
    }

    async fn apply_all(
        &self,
        batch: Vec<(Uuid, Transition)>,
        policy: BatchPolicy,
    ) -> Result<BatchOutcome, AppError> {
        let mut state = self.state.write().await;
        let mut working = state.clone();
        let outcomes: Vec<ApplyOutcome> = batch
            .iter()
            .map(|(id, transition)| working.apply(*id, transition))
            .collect();

        let all_applied = outcomes.iter().all(ApplyOutcome::is_applied);
        let committed = match policy {
            BatchPolicy::AllOrNothing => all_applied,
            BatchPolicy::BestEffort => outcomes.iter().any(ApplyOutcome::is_applied),
        };
        if committed {
            *state = working;
        }

        Ok(BatchOutcome { outcomes, committed })
    }
}
