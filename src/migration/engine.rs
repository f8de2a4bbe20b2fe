//! Workflow engine
//!
//! Authorizes and executes every change to a migration. Each action is
//! turned into a guarded [`Transition`] and handed to the repository, which
//! applies it atomically or not at all.

use super::actions::{authorized_actions, merge_actions};
use super::models::{
    Cluster, MetaRequest, Migration, MigrationDefinition, MigrationStatus, RunProgress, RunType,
    WorkflowAction,
};
use super::policy::Capabilities;
use super::requests::{BulkActionRequest, EditMetaRequest, EditMigrationRequest, MetaRequestForm, MigrationRequest};
use super::store::MigrationRepository;
use super::transition::{self, ApplyOutcome, BatchPolicy, Transition};
use crate::auth::Principal;
use crate::config::WorkflowConfig;
use crate::ddl::{classify_sql, Checkers, ClassifiedRun, Classifier, Classification, DdlAction};
use crate::error::{not_found_error, validation_error, AppError};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Source of the schema checks the classifier runs against a target.
///
/// Implementations introspect the live cluster; the engine only asks for a
/// [`Checkers`] set per cluster/database pair.
pub trait SchemaInspector: Send + Sync {
    fn checkers(&self, cluster: &Cluster, database: &str) -> Checkers;
}

/// Classifies without consulting any server
#[derive(Debug, Clone, Copy, Default)]
pub struct NoInspection;

impl SchemaInspector for NoInspection {
    fn checkers(&self, _cluster: &Cluster, _database: &str) -> Checkers {
        Checkers::none()
    }
}

/// A migration together with what the caller may do next
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationView {
    #[serde(flatten)]
    pub migration: Migration,
    pub available_actions: Vec<WorkflowAction>,
}

/// A migration handed to the execution agent
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedMigration {
    #[serde(flatten)]
    pub migration: Migration,
    pub host: String,
    pub port: i32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaRequestView {
    #[serde(flatten)]
    pub meta_request: MetaRequest,
    pub members: Vec<MigrationView>,
    /// Union of the members' actions
    pub available_actions: Vec<WorkflowAction>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkResult {
    pub action: WorkflowAction,
    pub applied: Vec<Uuid>,
    pub rejected: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub started: usize,
    pub renamed: usize,
}

pub struct WorkflowEngine {
    store: Arc<dyn MigrationRepository>,
    inspector: Arc<dyn SchemaInspector>,
    config: WorkflowConfig,
}

/// `enqueue` is a deferred `start` and needs the same permission
fn required_action(action: WorkflowAction) -> WorkflowAction {
    match action {
        WorkflowAction::Enqueue => WorkflowAction::Start,
        other => other,
    }
}

fn for_target(err: AppError, cluster: &str, database: &str) -> AppError {
    match err {
        AppError::Validation(msg) => AppError::Validation(format!("{}/{}: {}", cluster, database, msg)),
        other => other,
    }
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn MigrationRepository>,
        inspector: Arc<dyn SchemaInspector>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            store,
            inspector,
            config,
        }
    }

    // Clusters

    pub async fn register_cluster(&self, cluster: Cluster) -> Result<Cluster, AppError> {
        if cluster.name.trim().is_empty() {
            return Err(validation_error("Cluster name is required"));
        }
        if cluster.rw_host.trim().is_empty() {
            return Err(validation_error("Cluster host is required"));
        }
        if !(1..=65535).contains(&cluster.port) {
            return Err(validation_error(format!("Invalid port {}", cluster.port)));
        }

        let cluster = self.store.upsert_cluster(cluster).await?;
        info!(cluster = %cluster.name, owners = cluster.owners.len(), "Cluster registered");
        Ok(cluster)
    }

    pub async fn list_clusters(&self) -> Result<Vec<Cluster>, AppError> {
        self.store.list_clusters().await
    }

    async fn cluster(&self, name: &str) -> Result<Cluster, AppError> {
        self.store
            .get_cluster(name)
            .await?
            .ok_or_else(|| not_found_error(format!("Cluster {} not found", name)))
    }

    // Classification

    /// Classify a statement without consulting any server
    pub fn classify_statement(&self, sql: &str) -> Result<Classification, AppError> {
        Ok(classify_sql(sql, &Checkers::none())?)
    }

    /// Validate a request against its cluster and classify its statement
    async fn define(&self, request: MigrationRequest) -> Result<MigrationDefinition, AppError> {
        let request = request.checked()?;
        let cluster = self
            .store
            .get_cluster(&request.cluster_name)
            .await?
            .ok_or_else(|| validation_error(format!("Cluster {} does not exist", request.cluster_name)))?;

        let checkers = self.inspector.checkers(&cluster, &request.database);
        let classification = Classifier::new(checkers).classify(&request.ddl_statement)?;
        debug!(
            cluster = %cluster.name,
            database = %request.database,
            run = %classification.run,
            action = %classification.action,
            "Statement classified"
        );

        let custom_options = request.custom_options();
        Ok(MigrationDefinition::from_classification(
            request.cluster_name,
            request.database,
            request.ddl_statement,
            request.final_insert,
            request.pr_url,
            custom_options,
            classification,
        ))
    }

    /// Run type used for approval decisions: re-classified while awaiting
    /// approval, the initial classification otherwise
    fn current_run(&self, cluster: &Cluster, m: &Migration) -> ClassifiedRun {
        if m.status != MigrationStatus::AwaitingApproval {
            return m.definition.initial_runtype;
        }
        let checkers = self.inspector.checkers(cluster, &m.definition.database);
        match Classifier::new(checkers).classify(&m.definition.ddl_statement) {
            Ok(classification) => classification.run,
            Err(e) => {
                warn!(migration_id = %m.id, error = %e, "Re-classification failed, using initial run type");
                m.definition.initial_runtype
            }
        }
    }

    fn actions_for(&self, m: &Migration, caps: Capabilities, run: ClassifiedRun) -> Vec<WorkflowAction> {
        authorized_actions(
            m.status,
            run,
            m.action(),
            m.small_enough_for_short_run(self.config.small_table_row_limit),
            caps,
        )
    }

    /// Approvals that pick the cheaper run over the classifier's advice
    fn ensure_dangerous_allowed(
        &self,
        m: &Migration,
        action: WorkflowAction,
        run: ClassifiedRun,
        caps: Capabilities,
    ) -> Result<(), AppError> {
        let dangerous = match action {
            WorkflowAction::ApproveShort => {
                run == ClassifiedRun::MaybeShort
                    && !m.small_enough_for_short_run(self.config.small_table_row_limit)
            }
            WorkflowAction::ApproveNoCheckAlter => run == ClassifiedRun::MaybeNoCheckAlter,
            _ => false,
        };
        if dangerous && !caps.approve_dangerous {
            return Err(AppError::Forbidden(format!(
                "{} on migration {} requires an admin",
                action, m.id
            )));
        }
        Ok(())
    }

    /// Cluster cap for a start; creates and drops are exempt
    fn admission(&self, m: &Migration) -> Option<i64> {
        match m.action() {
            DdlAction::Alter => Some(self.config.parallel_run_limit),
            DdlAction::Create | DdlAction::Drop => None,
        }
    }

    /// Transition for a caller action. Bulk starts only enqueue and bulk
    /// resumes keep running on their own.
    fn transition_for(
        &self,
        m: &Migration,
        action: WorkflowAction,
        lock_version: Option<i64>,
        bulk: bool,
        actor: &str,
    ) -> Result<Transition, AppError> {
        let lock = || {
            lock_version.ok_or_else(|| AppError::BadRequest(format!("lock_version is required to {}", action)))
        };
        let now = Utc::now();

        Ok(match action {
            WorkflowAction::ApproveLong => transition::approve(lock()?, RunType::Long, actor, now),
            WorkflowAction::ApproveShort => transition::approve(lock()?, RunType::Short, actor, now),
            WorkflowAction::ApproveNoCheckAlter => transition::approve(lock()?, RunType::NoCheckAlter, actor, now),
            WorkflowAction::Unapprove => transition::unapprove(lock()?),
            WorkflowAction::Start if bulk => transition::enqueue(lock()?),
            WorkflowAction::Start => transition::start(lock()?, false, self.admission(m), now),
            WorkflowAction::Enqueue => transition::enqueue(lock()?),
            WorkflowAction::Dequeue => transition::dequeue(lock()?),
            WorkflowAction::Rename => transition::rename(lock()?),
            WorkflowAction::Pause => transition::pause(),
            WorkflowAction::Resume => transition::resume(lock()?, bulk),
            WorkflowAction::Cancel => transition::cancel(),
            WorkflowAction::Delete => transition::delete(lock()?),
        })
    }

    async fn commit(&self, id: Uuid, transition: Transition) -> Result<Migration, AppError> {
        match self.store.apply(id, &transition).await? {
            ApplyOutcome::Applied(m) => {
                info!(
                    migration_id = %id,
                    transition = transition.name,
                    status = %m.status,
                    lock_version = m.lock_version,
                    "Transition applied"
                );
                Ok(m)
            }
            ApplyOutcome::Rejected => {
                warn!(migration_id = %id, transition = transition.name, "Transition rejected");
                Err(AppError::TransitionRejected(format!(
                    "Cannot {} migration {}: it was changed concurrently or its status does not allow it",
                    transition.name, id
                )))
            }
            ApplyOutcome::AtCapacity => {
                warn!(migration_id = %id, transition = transition.name, "Cluster at capacity");
                Err(AppError::AdmissionRejected(format!(
                    "Migration {} was not started: its cluster already runs {} alter(s)",
                    id, self.config.parallel_run_limit
                )))
            }
        }
    }

    // Migrations

    pub async fn create(&self, principal: &Principal, request: MigrationRequest) -> Result<Migration, AppError> {
        let definition = self.define(request).await?;
        let migration = self
            .store
            .insert(Migration::new(definition, principal.username.clone(), None))
            .await?;

        info!(
            migration_id = %migration.id,
            cluster = %migration.cluster_name(),
            run = %migration.definition.initial_runtype,
            requestor = %migration.requestor,
            "Migration created"
        );
        Ok(migration)
    }

    pub async fn get(&self, id: Uuid) -> Result<Migration, AppError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| not_found_error(format!("Migration {} not found", id)))
    }

    pub async fn list(&self, status: Option<MigrationStatus>) -> Result<Vec<Migration>, AppError> {
        self.store.list(status).await
    }

    pub async fn view(&self, principal: &Principal, id: Uuid) -> Result<MigrationView, AppError> {
        let migration = self.get(id).await?;
        let cluster = self.cluster(migration.cluster_name()).await?;
        let caps = Capabilities::for_migration(principal, &cluster, &migration);
        let run = self.current_run(&cluster, &migration);
        let available_actions = self.actions_for(&migration, caps, run);

        Ok(MigrationView {
            migration,
            available_actions,
        })
    }

    pub async fn edit(
        &self,
        principal: &Principal,
        id: Uuid,
        edit: EditMigrationRequest,
    ) -> Result<Migration, AppError> {
        let migration = self.get(id).await?;
        if let Some(meta_id) = migration.meta_request_id {
            return Err(AppError::Conflict(format!(
                "Migration {} belongs to meta request {}; edit the meta request instead",
                id, meta_id
            )));
        }

        let cluster = self.cluster(migration.cluster_name()).await?;
        if !Capabilities::for_migration(principal, &cluster, &migration).destroy {
            return Err(AppError::Forbidden(format!("You may not edit migration {}", id)));
        }
        if !migration.editable {
            return Err(AppError::Conflict(format!("Migration {} can no longer be edited", id)));
        }

        let definition = self.define(edit.request).await?;
        self.commit(id, transition::edit(edit.lock_version, definition)).await
    }

    /// Perform a caller action on one migration
    pub async fn perform(
        &self,
        principal: &Principal,
        id: Uuid,
        action: WorkflowAction,
        lock_version: Option<i64>,
    ) -> Result<Migration, AppError> {
        let migration = self.get(id).await?;
        let cluster = self.cluster(migration.cluster_name()).await?;
        let caps = Capabilities::for_migration(principal, &cluster, &migration);
        let run = self.current_run(&cluster, &migration);

        if !self.actions_for(&migration, caps, run).contains(&required_action(action)) {
            warn!(
                migration_id = %id,
                action = %action,
                status = %migration.status,
                user = %principal,
                "Action not available"
            );
            return Err(AppError::Forbidden(format!(
                "{} is not available for migration {} in status {}",
                action, id, migration.status
            )));
        }
        self.ensure_dangerous_allowed(&migration, action, run, caps)?;

        let transition = self.transition_for(&migration, action, lock_version, false, &principal.username)?;
        self.commit(id, transition).await
    }

    // Execution agent

    /// Staged work for the execution agent, with a concrete run type
    pub async fn staged(&self) -> Result<Vec<StagedMigration>, AppError> {
        let mut staged = Vec::new();
        for mut migration in self.store.staged(self.config.unstage_limit).await? {
            let Some(cluster) = self.store.get_cluster(migration.cluster_name()).await? else {
                warn!(migration_id = %migration.id, "Staged migration has no cluster, skipping");
                continue;
            };
            if migration.runtype == RunType::Undecided {
                migration.runtype = match migration.definition.initial_runtype {
                    ClassifiedRun::Short => RunType::Short,
                    _ => RunType::Long,
                };
            }
            staged.push(StagedMigration {
                migration,
                host: cluster.rw_host,
                port: cluster.port,
            });
        }
        Ok(staged)
    }

    async fn runner_commit(&self, id: Uuid, transition: Transition) -> Result<Migration, AppError> {
        self.get(id).await?;
        self.commit(id, transition).await
    }

    pub async fn unstage(&self, id: Uuid) -> Result<Migration, AppError> {
        self.runner_commit(id, transition::unstage()).await
    }

    pub async fn next_step(&self, id: Uuid) -> Result<Migration, AppError> {
        let migration = self.get(id).await?;
        let transition = transition::next_step(migration.status).ok_or_else(|| {
            AppError::TransitionRejected(format!(
                "Migration {} has no machine step from {}",
                id, migration.status
            ))
        })?;
        self.commit(id, transition).await
    }

    pub async fn offer(&self, id: Uuid) -> Result<Migration, AppError> {
        self.runner_commit(id, transition::offer()).await
    }

    pub async fn update_progress(&self, id: Uuid, progress: RunProgress) -> Result<Migration, AppError> {
        if let Some(pct) = progress.copy_percentage {
            if !(0..=100).contains(&pct) {
                return Err(validation_error(format!("Copy percentage {} is out of range", pct)));
            }
        }
        self.runner_commit(id, transition::update_progress(progress)).await
    }

    pub async fn complete(&self, id: Uuid) -> Result<Migration, AppError> {
        self.runner_commit(id, transition::complete(Utc::now())).await
    }

    pub async fn fail(&self, id: Uuid, message: Option<String>) -> Result<Migration, AppError> {
        self.runner_commit(id, transition::fail(message)).await
    }

    pub async fn error(&self, id: Uuid, message: Option<String>) -> Result<Migration, AppError> {
        self.runner_commit(id, transition::error(message)).await
    }

    pub async fn cancel(&self, id: Uuid) -> Result<Migration, AppError> {
        self.runner_commit(id, transition::cancel()).await
    }

    // Meta requests

    pub async fn create_meta_request(
        &self,
        principal: &Principal,
        form: MetaRequestForm,
    ) -> Result<(MetaRequest, Vec<Migration>), AppError> {
        let mut definitions = Vec::new();
        for request in form.member_requests()? {
            let (cluster, database) = (request.cluster_name.clone(), request.database.clone());
            let definition = self
                .define(request)
                .await
                .map_err(|e| for_target(e, &cluster, &database))?;
            definitions.push(definition);
        }
        let first = definitions
            .first()
            .ok_or_else(|| validation_error("At least one target is required"))?;

        let meta = MetaRequest::new(
            first.ddl_statement.clone(),
            first.final_insert.clone(),
            first.pr_url.clone(),
            principal.username.clone(),
            first.custom_options.clone(),
        );
        let members: Vec<Migration> = definitions
            .into_iter()
            .map(|d| Migration::new(d, principal.username.clone(), Some(meta.id)))
            .collect();

        self.store.insert_meta_request(meta.clone(), members.clone()).await?;
        info!(meta_request_id = %meta.id, members = members.len(), "Meta request created");
        Ok((meta, members))
    }

    async fn meta_request(&self, id: Uuid) -> Result<MetaRequest, AppError> {
        self.store
            .get_meta_request(id)
            .await?
            .ok_or_else(|| not_found_error(format!("Meta request {} not found", id)))
    }

    /// Members are judged on their initial classification
    pub async fn view_meta_request(&self, principal: &Principal, id: Uuid) -> Result<MetaRequestView, AppError> {
        let meta_request = self.meta_request(id).await?;
        let mut members = Vec::new();
        for migration in self.store.list_by_meta_request(id).await? {
            let cluster = self.cluster(migration.cluster_name()).await?;
            let caps = Capabilities::for_migration(principal, &cluster, &migration);
            let available_actions = self.actions_for(&migration, caps, migration.definition.initial_runtype);
            members.push(MigrationView {
                migration,
                available_actions,
            });
        }
        let available_actions = merge_actions(members.iter().map(|m| m.available_actions.clone()));

        Ok(MetaRequestView {
            meta_request,
            members,
            available_actions,
        })
    }

    /// Replace the statement of every member at once
    pub async fn edit_meta_request(
        &self,
        principal: &Principal,
        id: Uuid,
        edit: EditMetaRequest,
    ) -> Result<(MetaRequest, Vec<Migration>), AppError> {
        let mut meta = self.meta_request(id).await?;
        if !(principal.is_admin() || principal.username == meta.requestor) {
            return Err(AppError::Forbidden(format!("You may not edit meta request {}", id)));
        }

        let versions: HashMap<Uuid, i64> = edit.members.iter().map(|m| (m.id, m.lock_version)).collect();
        let members = self.store.list_by_meta_request(id).await?;
        if versions.len() != members.len() || members.iter().any(|m| !versions.contains_key(&m.id)) {
            return Err(AppError::BadRequest(format!(
                "Every member of meta request {} must be listed exactly once with its lock version",
                id
            )));
        }

        let mut batch = Vec::new();
        let mut first_definition = None;
        for migration in &members {
            if !migration.editable {
                return Err(AppError::Conflict(format!(
                    "Migration {} can no longer be edited",
                    migration.id
                )));
            }
            let database = migration.definition.database.clone();
            let cluster = migration.cluster_name().to_string();
            let definition = async {
                let request = edit.shared.for_target(&cluster, &database)?;
                self.define(request).await
            }
            .await
            .map_err(|e| for_target(e, &cluster, &database))?;

            first_definition.get_or_insert_with(|| definition.clone());
            let version = versions.get(&migration.id).copied().unwrap_or(migration.lock_version);
            batch.push((migration.id, transition::edit(version, definition)));
        }

        let outcome = self.store.apply_all(batch, BatchPolicy::AllOrNothing).await?;
        if !outcome.committed {
            warn!(meta_request_id = %id, "Meta request edit rolled back");
            return Err(AppError::TransitionRejected(format!(
                "Meta request {} was not edited: a member changed concurrently or is no longer editable",
                id
            )));
        }

        if let Some(definition) = first_definition {
            meta.ddl_statement = definition.ddl_statement;
            meta.final_insert = definition.final_insert;
            meta.pr_url = definition.pr_url;
            meta.custom_options = definition.custom_options;
            meta.updated_at = Utc::now();
            self.store.update_meta_request(meta.clone()).await?;
        }

        let updated = outcome
            .outcomes
            .into_iter()
            .filter_map(|o| match o {
                ApplyOutcome::Applied(m) => Some(m),
                _ => None,
            })
            .collect();
        info!(meta_request_id = %id, "Meta request edited");
        Ok((meta, updated))
    }

    /// Apply one action to several members. All or nothing, except cancel,
    /// which keeps every member it managed to cancel.
    pub async fn bulk_action(
        &self,
        principal: &Principal,
        id: Uuid,
        request: BulkActionRequest,
    ) -> Result<BulkResult, AppError> {
        let meta = self.meta_request(id).await?;
        if request.members.is_empty() {
            return Err(AppError::BadRequest("No migrations selected".to_string()));
        }

        let action = request.action;
        let mut batch = Vec::new();
        for member in &request.members {
            let migration = self.get(member.id).await?;
            if migration.meta_request_id != Some(meta.id) {
                return Err(AppError::BadRequest(format!(
                    "Migration {} is not part of meta request {}",
                    member.id, id
                )));
            }
            if migration.definition.ddl_statement != meta.ddl_statement || migration.requestor != meta.requestor {
                return Err(AppError::Conflict(format!(
                    "Migration {} is out of sync with meta request {}",
                    member.id, id
                )));
            }

            let cluster = self.cluster(migration.cluster_name()).await?;
            let caps = Capabilities::for_migration(principal, &cluster, &migration);
            let run = migration.definition.initial_runtype;
            // members that already stopped are left to the cancel guard
            let permitted = match action {
                WorkflowAction::Cancel => caps.any_action || caps.run_action,
                _ => self.actions_for(&migration, caps, run).contains(&required_action(action)),
            };
            if !permitted {
                return Err(AppError::Forbidden(format!(
                    "{} is not available for migration {} in status {}",
                    action, migration.id, migration.status
                )));
            }
            self.ensure_dangerous_allowed(&migration, action, run, caps)?;

            let transition =
                self.transition_for(&migration, action, Some(member.lock_version), true, &principal.username)?;
            batch.push((migration.id, transition));
        }

        let policy = match action {
            WorkflowAction::Cancel => BatchPolicy::BestEffort,
            _ => BatchPolicy::AllOrNothing,
        };
        let ids: Vec<Uuid> = batch.iter().map(|(id, _)| *id).collect();
        let outcome = self.store.apply_all(batch, policy).await?;

        if policy == BatchPolicy::AllOrNothing && !outcome.committed {
            let failed = outcome.outcomes.iter().filter(|o| !o.is_applied()).count();
            warn!(meta_request_id = %id, action = %action, failed, "Bulk action rolled back");
            return Err(AppError::TransitionRejected(format!(
                "Bulk {} on meta request {} was rolled back: {} of {} migrations could not be updated",
                action,
                id,
                failed,
                ids.len()
            )));
        }

        let (applied, rejected): (Vec<_>, Vec<_>) = ids
            .into_iter()
            .zip(outcome.outcomes.iter())
            .partition(|(_, o)| o.is_applied());
        let result = BulkResult {
            action,
            applied: applied.into_iter().map(|(id, _)| id).collect(),
            rejected: rejected.into_iter().map(|(id, _)| id).collect(),
        };
        info!(
            meta_request_id = %id,
            action = %action,
            applied = result.applied.len(),
            rejected = result.rejected.len(),
            "Bulk action applied"
        );
        Ok(result)
    }

    // Auto-run

    /// Start the oldest enqueued migration and rename the oldest migration
    /// awaiting rename on every cluster. Losing a race is not an error.
    pub async fn run_auto_sweep(&self) -> Result<SweepReport, AppError> {
        let mut report = SweepReport::default();

        for m in self.store.oldest_auto_run(MigrationStatus::Enqueued).await? {
            let start = transition::start(m.lock_version, true, self.admission(&m), Utc::now());
            match self.store.apply(m.id, &start).await? {
                ApplyOutcome::Applied(_) => {
                    info!(migration_id = %m.id, cluster = %m.cluster_name(), "Auto-run started migration");
                    report.started += 1;
                }
                other => debug!(migration_id = %m.id, outcome = ?other, "Auto-run start skipped"),
            }
        }

        for m in self.store.oldest_auto_run(MigrationStatus::AwaitingRename).await? {
            match self.store.apply(m.id, &transition::rename(m.lock_version)).await? {
                ApplyOutcome::Applied(_) => {
                    info!(migration_id = %m.id, cluster = %m.cluster_name(), "Auto-run renamed migration");
                    report.renamed += 1;
                }
                other => debug!(migration_id = %m.id, outcome = ?other, "Auto-run rename skipped"),
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ddl::{ColumnInfo, DdlMode};
    use crate::migration::models::fixtures;
    use crate::migration::requests::{MemberVersion, SharedRequest};
    use crate::migration::store::MemoryStore;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn admin() -> Principal {
        Principal::new("root", ["admin"])
    }

    fn owner() -> Principal {
        Principal::new("olga", Vec::<String>::new())
    }

    fn requestor() -> Principal {
        Principal::new("ann", Vec::<String>::new())
    }

    fn cluster(name: &str) -> Cluster {
        Cluster {
            name: name.to_string(),
            rw_host: format!("{}.db", name),
            port: 3306,
            admin_review_required: false,
            owners: vec!["olga".to_string()],
        }
    }

    async fn engine_with(inspector: Arc<dyn SchemaInspector>) -> (WorkflowEngine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let engine = WorkflowEngine::new(store.clone(), inspector, WorkflowConfig::default());
        engine.register_cluster(cluster("c1")).await.unwrap();
        engine.register_cluster(cluster("c2")).await.unwrap();
        (engine, store)
    }

    async fn engine() -> (WorkflowEngine, Arc<MemoryStore>) {
        engine_with(Arc::new(NoInspection)).await
    }

    fn request(cluster: &str, ddl: &str) -> MigrationRequest {
        serde_json::from_value(serde_json::json!({
            "clusterName": cluster,
            "database": "app",
            "ddlStatement": ddl,
            "prUrl": "https://example.com/pr/1",
        }))
        .unwrap()
    }

    async fn insert(store: &MemoryStore, cluster: &str, action: DdlAction, status: MigrationStatus) -> Migration {
        store
            .insert(fixtures::migration(cluster, action, status))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_table_end_to_end() {
        let (engine, _) = engine().await;
        let m = engine
            .create(&requestor(), request("c1", "CREATE TABLE t (id INT)"))
            .await
            .unwrap();

        assert_eq!(m.status, MigrationStatus::Preparing);
        assert_eq!(m.definition.action, DdlAction::Create);
        assert_eq!(m.definition.mode, DdlMode::Table);
        assert_eq!(m.definition.initial_runtype, ClassifiedRun::Short);
        assert_eq!(m.runtype, RunType::Undecided);
        assert!(m.staged && m.editable);

        let view = engine.view(&requestor(), m.id).await.unwrap();
        assert_eq!(view.available_actions, vec![WorkflowAction::Delete]);

        engine.unstage(m.id).await.unwrap();
        let m = engine.next_step(m.id).await.unwrap();
        assert_eq!(m.status, MigrationStatus::AwaitingApproval);

        let view = engine.view(&admin(), m.id).await.unwrap();
        assert_eq!(
            view.available_actions,
            vec![WorkflowAction::ApproveShort, WorkflowAction::Delete]
        );
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_cluster_and_bad_sql() {
        let (engine, _) = engine().await;

        let err = engine
            .create(&requestor(), request("nope", "CREATE TABLE t (id INT)"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = engine
            .create(&requestor(), request("c1", "ALTERTABLE t DROP INDEX ix1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Classification(_)));
    }

    #[tokio::test]
    async fn test_create_consults_the_inspector() {
        struct ExistingTables;
        impl SchemaInspector for ExistingTables {
            fn checkers(&self, _cluster: &Cluster, _database: &str) -> Checkers {
                Checkers::none()
                    .with_table_exists(|_, name| name == "t")
                    .with_get_columns(|_| {
                        HashMap::from([("c".to_string(), ColumnInfo::new("enum('a','b')"))])
                    })
            }
        }

        let (engine, _) = engine_with(Arc::new(ExistingTables)).await;
        let err = engine
            .create(&requestor(), request("c1", "CREATE TABLE t (id INT)"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid DDL statement: table already exists!");

        let m = engine
            .create(&requestor(), request("c1", "ALTER TABLE t MODIFY COLUMN c ENUM ('a', 'b', 'c')"))
            .await
            .unwrap();
        assert_eq!(m.definition.initial_runtype, ClassifiedRun::MaybeShort);
        assert_eq!(m.definition.parsed_statement, "ALTER TABLE t MODIFY COLUMN c ENUM ('a','b','c')");
    }

    #[tokio::test]
    async fn test_approve_requires_current_lock_version() {
        let (engine, store) = engine().await;
        let m = insert(&store, "c1", DdlAction::Alter, MigrationStatus::AwaitingApproval).await;

        let err = engine
            .perform(&admin(), m.id, WorkflowAction::ApproveLong, Some(7))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::TransitionRejected(_)));

        let approved = engine
            .perform(&admin(), m.id, WorkflowAction::ApproveLong, Some(0))
            .await
            .unwrap();
        assert_eq!(approved.status, MigrationStatus::AwaitingStart);
        assert_eq!(approved.runtype, RunType::Long);
        assert_eq!(approved.approved_by.as_deref(), Some("root"));
        assert!(approved.approved_at.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_approvals_through_the_engine() {
        let (engine, store) = engine().await;
        let engine = Arc::new(engine);
        let m = insert(&store, "c1", DdlAction::Alter, MigrationStatus::AwaitingApproval).await;

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    engine
                        .perform(&admin(), m.id, WorkflowAction::ApproveLong, Some(0))
                        .await
                })
            })
            .collect();

        let mut ok = 0;
        let mut rejected = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(AppError::TransitionRejected(_)) => rejected += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!((ok, rejected), (1, 4));
    }

    #[tokio::test]
    async fn test_lock_version_is_required_for_guarded_actions() {
        let (engine, store) = engine().await;
        let m = insert(&store, "c1", DdlAction::Alter, MigrationStatus::AwaitingStart).await;

        let err = engine
            .perform(&admin(), m.id, WorkflowAction::Start, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_start_respects_cluster_admission() {
        let (engine, store) = engine().await;
        insert(&store, "c1", DdlAction::Alter, MigrationStatus::CopyInProgress).await;
        let waiting = insert(&store, "c1", DdlAction::Alter, MigrationStatus::AwaitingStart).await;
        let create = insert(&store, "c1", DdlAction::Create, MigrationStatus::AwaitingStart).await;

        let err = engine
            .perform(&owner(), waiting.id, WorkflowAction::Start, Some(0))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AdmissionRejected(_)));
        let unchanged = engine.get(waiting.id).await.unwrap();
        assert_eq!(unchanged.status, MigrationStatus::AwaitingStart);
        assert_eq!(unchanged.lock_version, 0);

        let started = engine
            .perform(&owner(), create.id, WorkflowAction::Start, Some(0))
            .await
            .unwrap();
        assert_eq!(started.status, MigrationStatus::CopyInProgress);
        assert!(!started.editable);
        assert!(started.started_at.is_some());
    }

    #[tokio::test]
    async fn test_unavailable_actions_are_forbidden() {
        let (engine, store) = engine().await;
        let m = insert(&store, "c1", DdlAction::Alter, MigrationStatus::AwaitingApproval).await;

        // the requestor may not approve their own migration
        let err = engine
            .perform(&requestor(), m.id, WorkflowAction::ApproveLong, Some(0))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        // owners get the safe choice only for an ambiguous alter
        let view = engine.view(&owner(), m.id).await.unwrap();
        assert_eq!(
            view.available_actions,
            vec![WorkflowAction::ApproveLong, WorkflowAction::Delete]
        );
        let err = engine
            .perform(&owner(), m.id, WorkflowAction::ApproveShort, Some(0))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_pause_resume_cancel_cycle() {
        let (engine, store) = engine().await;
        let m = insert(&store, "c1", DdlAction::Alter, MigrationStatus::CopyInProgress).await;

        let m = engine.perform(&owner(), m.id, WorkflowAction::Pause, None).await.unwrap();
        assert_eq!(m.status, MigrationStatus::Pausing);

        engine.unstage(m.id).await.unwrap();
        let m = engine.next_step(m.id).await.unwrap();
        assert_eq!(m.status, MigrationStatus::Paused);

        let m = engine
            .perform(&owner(), m.id, WorkflowAction::Resume, Some(m.lock_version))
            .await
            .unwrap();
        assert_eq!(m.status, MigrationStatus::CopyInProgress);
        assert!(m.staged);

        let m = engine.error(m.id, Some("boom".to_string())).await.unwrap();
        assert_eq!(m.status, MigrationStatus::Error);
        assert_eq!(m.error_message.as_deref(), Some("boom"));

        let m = engine.perform(&owner(), m.id, WorkflowAction::Cancel, None).await.unwrap();
        assert_eq!(m.status, MigrationStatus::Canceled);
        assert!(m.staged);

        let view = engine.view(&admin(), m.id).await.unwrap();
        assert!(view.available_actions.is_empty());
    }

    #[tokio::test]
    async fn test_next_step_requires_unstaged_row() {
        let (engine, store) = engine().await;
        let m = insert(&store, "c1", DdlAction::Alter, MigrationStatus::Preparing).await;

        assert!(matches!(
            engine.next_step(m.id).await.unwrap_err(),
            AppError::TransitionRejected(_)
        ));

        let approved = insert(&store, "c1", DdlAction::Alter, MigrationStatus::AwaitingStart).await;
        assert!(matches!(
            engine.next_step(approved.id).await.unwrap_err(),
            AppError::TransitionRejected(_)
        ));
    }

    #[tokio::test]
    async fn test_delete_and_missing_rows() {
        let (engine, store) = engine().await;
        let m = insert(&store, "c1", DdlAction::Alter, MigrationStatus::Preparing).await;

        engine
            .perform(&requestor(), m.id, WorkflowAction::Delete, Some(0))
            .await
            .unwrap();
        assert!(matches!(engine.get(m.id).await.unwrap_err(), AppError::NotFound(_)));
        assert!(matches!(engine.complete(m.id).await.unwrap_err(), AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_edit_resets_and_reclassifies() {
        let (engine, _) = engine().await;
        let m = engine
            .create(&requestor(), request("c1", "ALTER TABLE t DROP INDEX ix1"))
            .await
            .unwrap();

        let edit = EditMigrationRequest {
            lock_version: m.lock_version,
            request: request("c1", "ALTER TABLE t ADD COLUMN c INT, DROP INDEX ix1"),
        };
        let edited = engine.edit(&requestor(), m.id, edit).await.unwrap();
        assert_eq!(edited.definition.initial_runtype, ClassifiedRun::Long);
        assert_eq!(edited.status, MigrationStatus::Preparing);
        assert_eq!(edited.lock_version, 1);

        let stale = EditMigrationRequest {
            lock_version: 0,
            request: request("c1", "ALTER TABLE t DROP INDEX ix2"),
        };
        assert!(matches!(
            engine.edit(&requestor(), m.id, stale).await.unwrap_err(),
            AppError::TransitionRejected(_)
        ));
    }

    #[tokio::test]
    async fn test_started_migrations_are_not_editable() {
        let (engine, store) = engine().await;
        let mut m = fixtures::migration("c1", DdlAction::Alter, MigrationStatus::CopyInProgress);
        m.editable = false;
        let m = store.insert(m).await.unwrap();

        let edit = EditMigrationRequest {
            lock_version: 0,
            request: request("c1", "ALTER TABLE t DROP INDEX ix2"),
        };
        assert!(matches!(
            engine.edit(&admin(), m.id, edit).await.unwrap_err(),
            AppError::Conflict(_)
        ));
    }

    #[tokio::test]
    async fn test_staged_reports_a_concrete_runtype() {
        let (engine, store) = engine().await;
        let m = insert(&store, "c1", DdlAction::Alter, MigrationStatus::Preparing).await;

        let staged = engine.staged().await.unwrap();
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].migration.id, m.id);
        assert_eq!(staged[0].migration.runtype, RunType::Long);
        assert_eq!(staged[0].host, "c1.db");
    }

    #[tokio::test]
    async fn test_progress_updates() {
        let (engine, store) = engine().await;
        let m = insert(&store, "c1", DdlAction::Alter, MigrationStatus::CopyInProgress).await;

        let progress = RunProgress {
            copy_percentage: Some(40),
            run_host: Some("runner-1".to_string()),
            ..RunProgress::default()
        };
        let m = engine.update_progress(m.id, progress).await.unwrap();
        assert_eq!(m.progress.copy_percentage, Some(40));

        let bad = RunProgress {
            copy_percentage: Some(140),
            ..RunProgress::default()
        };
        assert!(matches!(
            engine.update_progress(m.id, bad).await.unwrap_err(),
            AppError::Validation(_)
        ));
    }

    fn meta_form(targets: &[(&str, &str)]) -> MetaRequestForm {
        serde_json::from_value(serde_json::json!({
            "ddlStatement": "ALTER TABLE t DROP INDEX ix1",
            "prUrl": "https://example.com/pr/9",
            "targets": targets
                .iter()
                .map(|(c, d)| serde_json::json!({"clusterName": c, "database": d}))
                .collect::<Vec<_>>(),
        }))
        .unwrap()
    }

    async fn meta_in_status(
        engine: &WorkflowEngine,
        store: &MemoryStore,
        status: MigrationStatus,
    ) -> (MetaRequest, Vec<Migration>) {
        let (meta, members) = engine
            .create_meta_request(&requestor(), meta_form(&[("c1", "a"), ("c2", "b")]))
            .await
            .unwrap();
        let mut moved = Vec::new();
        for m in members {
            let t = Transition::update(
                "test",
                transition::Guard::any(),
                vec![transition::Assignment::Status(status)],
            );
            match store.apply(m.id, &t).await.unwrap() {
                ApplyOutcome::Applied(m) => moved.push(m),
                other => panic!("setup failed: {:?}", other),
            }
        }
        (meta, moved)
    }

    fn versions(members: &[Migration]) -> Vec<MemberVersion> {
        members
            .iter()
            .map(|m| MemberVersion {
                id: m.id,
                lock_version: m.lock_version,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_meta_request_creation_is_all_or_nothing() {
        let (engine, store) = engine().await;
        let err = engine
            .create_meta_request(&requestor(), meta_form(&[("c1", "a"), ("missing", "b")]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing/b"));
        assert!(store.list(None).await.unwrap().is_empty());

        let (meta, members) = engine
            .create_meta_request(&requestor(), meta_form(&[("c1", "a"), ("c2", "b")]))
            .await
            .unwrap();
        assert_eq!(members.len(), 2);
        assert!(members.iter().all(|m| m.meta_request_id == Some(meta.id)));

        let view = engine.view_meta_request(&requestor(), meta.id).await.unwrap();
        assert_eq!(view.available_actions, vec![WorkflowAction::Delete]);
    }

    #[tokio::test]
    async fn test_meta_members_cannot_be_edited_alone() {
        let (engine, _) = engine().await;
        let (_, members) = engine
            .create_meta_request(&requestor(), meta_form(&[("c1", "a")]))
            .await
            .unwrap();
        let edit = EditMigrationRequest {
            lock_version: 0,
            request: request("c1", "ALTER TABLE t DROP INDEX ix2"),
        };
        assert!(matches!(
            engine.edit(&requestor(), members[0].id, edit).await.unwrap_err(),
            AppError::Conflict(_)
        ));
    }

    #[tokio::test]
    async fn test_bulk_approve_rolls_back_on_stale_member() {
        let (engine, store) = engine().await;
        let (meta, members) = meta_in_status(&engine, &store, MigrationStatus::AwaitingApproval).await;

        let mut stale = versions(&members);
        stale[1].lock_version = 99;
        let err = engine
            .bulk_action(
                &admin(),
                meta.id,
                BulkActionRequest {
                    action: WorkflowAction::ApproveLong,
                    members: stale,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::TransitionRejected(_)));
        for m in &members {
            assert_eq!(engine.get(m.id).await.unwrap().status, MigrationStatus::AwaitingApproval);
        }

        let result = engine
            .bulk_action(
                &admin(),
                meta.id,
                BulkActionRequest {
                    action: WorkflowAction::ApproveLong,
                    members: versions(&members),
                },
            )
            .await
            .unwrap();
        assert_eq!(result.applied.len(), 2);
    }

    #[tokio::test]
    async fn test_bulk_cancel_keeps_going() {
        let (engine, store) = engine().await;
        let (meta, members) = meta_in_status(&engine, &store, MigrationStatus::CopyInProgress).await;

        // the first member finishes before the cancel arrives
        engine.complete(members[0].id).await.unwrap();

        let result = engine
            .bulk_action(
                &admin(),
                meta.id,
                BulkActionRequest {
                    action: WorkflowAction::Cancel,
                    members: versions(&members),
                },
            )
            .await
            .unwrap();
        assert_eq!(result.applied, vec![members[1].id]);
        assert_eq!(result.rejected, vec![members[0].id]);
    }

    #[tokio::test]
    async fn test_bulk_start_enqueues_and_sweep_starts_one_per_cluster() {
        let (engine, store) = engine().await;
        let (meta, members) = meta_in_status(&engine, &store, MigrationStatus::AwaitingStart).await;

        let result = engine
            .bulk_action(
                &owner(),
                meta.id,
                BulkActionRequest {
                    action: WorkflowAction::Start,
                    members: versions(&members),
                },
            )
            .await
            .unwrap();
        assert_eq!(result.applied.len(), 2);
        for m in &members {
            let m = engine.get(m.id).await.unwrap();
            assert_eq!(m.status, MigrationStatus::Enqueued);
            assert!(m.auto_run);
        }

        // a second enqueued alter on c1 has to wait for the first
        let mut later = fixtures::migration("c1", DdlAction::Alter, MigrationStatus::Enqueued);
        later.auto_run = true;
        later.created_at = Utc::now() + Duration::seconds(60);
        let later = store.insert(later).await.unwrap();

        let report = engine.run_auto_sweep().await.unwrap();
        assert_eq!(report, SweepReport { started: 2, renamed: 0 });
        for m in &members {
            assert_eq!(engine.get(m.id).await.unwrap().status, MigrationStatus::CopyInProgress);
        }

        let report = engine.run_auto_sweep().await.unwrap();
        assert_eq!(report.started, 0);
        assert_eq!(engine.get(later.id).await.unwrap().status, MigrationStatus::Enqueued);
    }

    #[tokio::test]
    async fn test_sweep_renames_auto_run_migrations() {
        let (engine, store) = engine().await;
        let mut m = fixtures::migration("c1", DdlAction::Alter, MigrationStatus::AwaitingRename);
        m.auto_run = true;
        let m = store.insert(m).await.unwrap();
        insert(&store, "c2", DdlAction::Alter, MigrationStatus::AwaitingRename).await;

        let report = engine.run_auto_sweep().await.unwrap();
        assert_eq!(report, SweepReport { started: 0, renamed: 1 });
        assert_eq!(engine.get(m.id).await.unwrap().status, MigrationStatus::RenameInProgress);
    }

    #[tokio::test]
    async fn test_bulk_rejects_foreign_members() {
        let (engine, store) = engine().await;
        let (meta, _) = meta_in_status(&engine, &store, MigrationStatus::AwaitingApproval).await;
        let outsider = insert(&store, "c1", DdlAction::Alter, MigrationStatus::AwaitingApproval).await;

        let err = engine
            .bulk_action(
                &admin(),
                meta.id,
                BulkActionRequest {
                    action: WorkflowAction::ApproveLong,
                    members: versions(&[outsider]),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_meta_request_edit_updates_every_member() {
        let (engine, _) = engine().await;
        let (meta, members) = engine
            .create_meta_request(&requestor(), meta_form(&[("c1", "a"), ("c2", "b")]))
            .await
            .unwrap();

        let shared: SharedRequest = serde_json::from_value(serde_json::json!({
            "ddlStatement": "ALTER TABLE t ADD COLUMN c INT",
            "prUrl": "https://example.com/pr/10",
        }))
        .unwrap();

        let (meta, updated) = engine
            .edit_meta_request(
                &requestor(),
                meta.id,
                EditMetaRequest {
                    shared: shared.clone(),
                    members: versions(&members),
                },
            )
            .await
            .unwrap();
        assert_eq!(meta.ddl_statement, "ALTER TABLE t ADD COLUMN c INT");
        assert_eq!(updated.len(), 2);
        assert!(updated
            .iter()
            .all(|m| m.definition.initial_runtype == ClassifiedRun::Long && m.lock_version == 1));

        // stale versions touch nothing
        let err = engine
            .edit_meta_request(
                &requestor(),
                meta.id,
                EditMetaRequest {
                    shared,
                    members: versions(&members),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::TransitionRejected(_)));

        let err = engine
            .edit_meta_request(
                &owner(),
                meta.id,
                EditMetaRequest {
                    shared: serde_json::from_value(serde_json::json!({
                        "ddlStatement": "ALTER TABLE t DROP INDEX ix1",
                        "prUrl": "https://example.com/pr/10",
                    }))
                    .unwrap(),
                    members: versions(&updated),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }
}
