//! Migration data models
//!
//! Defines the migration record, its lifecycle states and the clusters and
//! meta requests it belongs to.

use crate::ddl::{text_enum, ClassifiedRun, Classification, DdlAction, DdlMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle state of a migration.
///
/// The integer codes are the persisted representation and keep the gaps of
/// retired states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    Preparing,
    AwaitingApproval,
    AwaitingStart,
    CopyInProgress,
    AwaitingRename,
    RenameInProgress,
    Completed,
    Canceled,
    Failed,
    Pausing,
    Paused,
    Error,
    /// A deferred `awaiting_start`, picked up by the auto-run sweep
    Enqueued,
}

impl Default for MigrationStatus {
    fn default() -> Self {
        MigrationStatus::Preparing
    }
}

text_enum!(MigrationStatus {
    Preparing => "preparing",
    AwaitingApproval => "awaiting_approval",
    AwaitingStart => "awaiting_start",
    CopyInProgress => "copy_in_progress",
    AwaitingRename => "awaiting_rename",
    RenameInProgress => "rename_in_progress",
    Completed => "completed",
    Canceled => "canceled",
    Failed => "failed",
    Pausing => "pausing",
    Paused => "paused",
    Error => "error",
    Enqueued => "enqueued",
});

impl MigrationStatus {
    pub const ALL: [MigrationStatus; 13] = [
        MigrationStatus::Preparing,
        MigrationStatus::AwaitingApproval,
        MigrationStatus::AwaitingStart,
        MigrationStatus::CopyInProgress,
        MigrationStatus::AwaitingRename,
        MigrationStatus::RenameInProgress,
        MigrationStatus::Completed,
        MigrationStatus::Canceled,
        MigrationStatus::Failed,
        MigrationStatus::Pausing,
        MigrationStatus::Paused,
        MigrationStatus::Error,
        MigrationStatus::Enqueued,
    ];

    /// Statuses that count against the cluster admission limit
    pub const RUNNING: [MigrationStatus; 6] = [
        MigrationStatus::CopyInProgress,
        MigrationStatus::AwaitingRename,
        MigrationStatus::RenameInProgress,
        MigrationStatus::Pausing,
        MigrationStatus::Paused,
        MigrationStatus::Error,
    ];

    /// Statuses the execution agent acts on
    pub const MACHINE: [MigrationStatus; 5] = [
        MigrationStatus::Preparing,
        MigrationStatus::CopyInProgress,
        MigrationStatus::RenameInProgress,
        MigrationStatus::Canceled,
        MigrationStatus::Pausing,
    ];

    pub const STARTABLE: [MigrationStatus; 2] =
        [MigrationStatus::AwaitingStart, MigrationStatus::Enqueued];

    pub const RESUMABLE: [MigrationStatus; 2] = [MigrationStatus::Paused, MigrationStatus::Error];

    pub const DELETABLE: [MigrationStatus; 4] = [
        MigrationStatus::Preparing,
        MigrationStatus::AwaitingApproval,
        MigrationStatus::AwaitingStart,
        MigrationStatus::Enqueued,
    ];

    pub const CANCELABLE: [MigrationStatus; 6] = Self::RUNNING;

    pub fn code(&self) -> i16 {
        match self {
            MigrationStatus::Preparing => 0,
            MigrationStatus::AwaitingApproval => 1,
            MigrationStatus::AwaitingStart => 2,
            MigrationStatus::CopyInProgress => 3,
            MigrationStatus::AwaitingRename => 4,
            MigrationStatus::RenameInProgress => 5,
            MigrationStatus::Completed => 8,
            MigrationStatus::Canceled => 9,
            MigrationStatus::Failed => 10,
            MigrationStatus::Pausing => 11,
            MigrationStatus::Paused => 12,
            MigrationStatus::Error => 13,
            MigrationStatus::Enqueued => 14,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.code() == code)
    }

    pub fn is_running(&self) -> bool {
        Self::RUNNING.contains(self)
    }

    pub fn is_machine_owned(&self) -> bool {
        Self::MACHINE.contains(self)
    }

    /// Where the execution agent moves a migration once it has finished
    /// with the current machine-owned step
    pub fn machine_successor(&self) -> Option<MigrationStatus> {
        match self {
            MigrationStatus::Preparing => Some(MigrationStatus::AwaitingApproval),
            MigrationStatus::CopyInProgress => Some(MigrationStatus::AwaitingRename),
            MigrationStatus::Pausing => Some(MigrationStatus::Paused),
            _ => None,
        }
    }
}

/// Execution strategy chosen at approval time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunType {
    Undecided,
    Long,
    Short,
    NoCheckAlter,
}

impl Default for RunType {
    fn default() -> Self {
        RunType::Undecided
    }
}

text_enum!(RunType {
    Undecided => "undecided",
    Long => "long",
    Short => "short",
    NoCheckAlter => "nocheckalter",
});

/// Actions a caller may invoke on a migration, in display order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowAction {
    ApproveLong,
    ApproveShort,
    ApproveNoCheckAlter,
    Unapprove,
    Start,
    Enqueue,
    Rename,
    Pause,
    Resume,
    Cancel,
    Delete,
    Dequeue,
}

text_enum!(WorkflowAction {
    ApproveLong => "approve_long",
    ApproveShort => "approve_short",
    ApproveNoCheckAlter => "approve_nocheckalter",
    Unapprove => "unapprove",
    Start => "start",
    Enqueue => "enqueue",
    Rename => "rename",
    Pause => "pause",
    Resume => "resume",
    Cancel => "cancel",
    Delete => "delete",
    Dequeue => "dequeue",
});

impl WorkflowAction {
    pub fn approval_for(runtype: RunType) -> Option<WorkflowAction> {
        match runtype {
            RunType::Long => Some(WorkflowAction::ApproveLong),
            RunType::Short => Some(WorkflowAction::ApproveShort),
            RunType::NoCheckAlter => Some(WorkflowAction::ApproveNoCheckAlter),
            RunType::Undecided => None,
        }
    }
}

/// Tuning knobs handed to the execution agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomOptions {
    pub max_threads_running: i32,
    pub max_replication_lag: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recursion_method: Option<String>,
}

impl Default for CustomOptions {
    fn default() -> Self {
        Self {
            max_threads_running: 200,
            max_replication_lag: 1,
            config_path: None,
            recursion_method: None,
        }
    }
}

impl CustomOptions {
    pub fn encode(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Decode a stored blob, falling back to defaults for anything unreadable
    pub fn decode(value: &serde_json::Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }
}

/// Table size counters reported by the execution agent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableStats {
    pub table_rows_start: Option<i64>,
    pub table_rows_end: Option<i64>,
    pub table_size_start: Option<i64>,
    pub table_size_end: Option<i64>,
    pub index_size_start: Option<i64>,
    pub index_size_end: Option<i64>,
}

/// Progress fields the execution agent may patch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunProgress {
    #[serde(flatten)]
    pub stats: TableStats,
    pub copy_percentage: Option<i32>,
    pub run_host: Option<String>,
    pub work_directory: Option<String>,
}

/// Everything a requestor decides, plus what classification derived from it.
///
/// Created by a validated request and replaced wholesale on edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationDefinition {
    pub cluster_name: String,
    pub database: String,
    pub ddl_statement: String,
    pub final_insert: Option<String>,
    pub pr_url: String,
    pub custom_options: CustomOptions,
    pub initial_runtype: ClassifiedRun,
    pub action: DdlAction,
    pub mode: DdlMode,
    pub table: String,
    /// Normalized statement the execution agent runs
    pub parsed_statement: String,
}

impl MigrationDefinition {
    pub fn from_classification(
        cluster_name: String,
        database: String,
        ddl_statement: String,
        final_insert: Option<String>,
        pr_url: String,
        custom_options: CustomOptions,
        classification: Classification,
    ) -> Self {
        Self {
            cluster_name,
            database,
            ddl_statement,
            final_insert,
            pr_url,
            custom_options,
            initial_runtype: classification.run,
            action: classification.action,
            mode: classification.mode,
            table: classification.table,
            parsed_statement: classification.statement,
        }
    }
}

/// A single schema change against one cluster/database pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Migration {
    pub id: Uuid,
    /// Optimistic concurrency token, bumped by every successful transition
    pub lock_version: i64,
    #[serde(flatten)]
    pub definition: MigrationDefinition,
    pub requestor: String,
    pub meta_request_id: Option<Uuid>,
    pub status: MigrationStatus,
    pub runtype: RunType,
    /// Queued for pickup by the execution agent
    pub staged: bool,
    pub auto_run: bool,
    pub editable: bool,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    #[serde(flatten)]
    pub progress: RunProgress,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Migration {
    pub fn new(definition: MigrationDefinition, requestor: String, meta_request_id: Option<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            lock_version: 0,
            definition,
            requestor,
            meta_request_id,
            status: MigrationStatus::Preparing,
            runtype: RunType::Undecided,
            staged: true,
            auto_run: false,
            editable: true,
            approved_by: None,
            approved_at: None,
            started_at: None,
            completed_at: None,
            error_message: None,
            progress: RunProgress::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn cluster_name(&self) -> &str {
        &self.definition.cluster_name
    }

    pub fn action(&self) -> DdlAction {
        self.definition.action
    }

    /// Small tables outside meta requests may skip the copy-based run
    pub fn small_enough_for_short_run(&self, row_limit: i64) -> bool {
        self.meta_request_id.is_none()
            && self
                .progress
                .stats
                .table_rows_start
                .map_or(false, |rows| rows <= row_limit)
    }

    /// Counts against the cluster admission limit
    pub fn is_running_alter(&self) -> bool {
        self.status.is_running() && self.definition.action == DdlAction::Alter
    }
}

/// A database cluster migrations run against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub name: String,
    pub rw_host: String,
    pub port: i32,
    /// Owners may not approve; only admins can
    pub admin_review_required: bool,
    pub owners: Vec<String>,
}

impl Cluster {
    pub fn is_owner(&self, username: &str) -> bool {
        self.owners.iter().any(|o| o == username)
    }
}

/// One DDL statement fanned out to several cluster/database pairs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaRequest {
    pub id: Uuid,
    pub ddl_statement: String,
    pub final_insert: Option<String>,
    pub pr_url: String,
    pub requestor: String,
    pub custom_options: CustomOptions,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MetaRequest {
    pub fn new(
        ddl_statement: String,
        final_insert: Option<String>,
        pr_url: String,
        requestor: String,
        custom_options: CustomOptions,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            ddl_statement,
            final_insert,
            pr_url,
            requestor,
            custom_options,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Parse a status from either its name or its integer code
pub fn parse_status(value: &str) -> Option<MigrationStatus> {
    MigrationStatus::from_str(value)
        .ok()
        .or_else(|| value.parse::<i16>().ok().and_then(MigrationStatus::from_code))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn definition(cluster: &str, action: DdlAction, run: ClassifiedRun) -> MigrationDefinition {
        MigrationDefinition {
            cluster_name: cluster.to_string(),
            database: "app".to_string(),
            ddl_statement: "ALTER TABLE t DROP INDEX ix1".to_string(),
            final_insert: None,
            pr_url: "https://example.com/pr/1".to_string(),
            custom_options: CustomOptions::default(),
            initial_runtype: run,
            action,
            mode: DdlMode::Table,
            table: "t".to_string(),
            parsed_statement: "ALTER TABLE t DROP INDEX ix1".to_string(),
        }
    }

    pub fn migration(cluster: &str, action: DdlAction, status: MigrationStatus) -> Migration {
        let mut m = Migration::new(definition(cluster, action, ClassifiedRun::Long), "ann".to_string(), None);
        m.status = status;
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_status_codes_round_trip() {
        for status in MigrationStatus::ALL {
            assert_eq!(MigrationStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(MigrationStatus::from_code(6), None);
        assert_eq!(MigrationStatus::Enqueued.code(), 14);
    }

    #[test]
    fn test_status_groups() {
        assert!(MigrationStatus::Paused.is_running());
        assert!(!MigrationStatus::Enqueued.is_running());
        assert!(MigrationStatus::Canceled.is_machine_owned());
    }

    #[test]
    fn test_machine_successor_only_covers_agent_steps() {
        assert_eq!(
            MigrationStatus::Preparing.machine_successor(),
            Some(MigrationStatus::AwaitingApproval)
        );
        assert_eq!(
            MigrationStatus::CopyInProgress.machine_successor(),
            Some(MigrationStatus::AwaitingRename)
        );
        assert_eq!(MigrationStatus::Pausing.machine_successor(), Some(MigrationStatus::Paused));
        assert_eq!(MigrationStatus::RenameInProgress.machine_successor(), None);
        assert_eq!(MigrationStatus::Canceled.machine_successor(), None);
    }

    #[test]
    fn test_parse_status_accepts_names_and_codes() {
        assert_eq!(parse_status("paused"), Some(MigrationStatus::Paused));
        assert_eq!(parse_status("3"), Some(MigrationStatus::CopyInProgress));
        assert_eq!(parse_status("7"), None);
    }

    #[test]
    fn test_small_enough_for_short_run() {
        let mut m = fixtures::migration("c1", DdlAction::Alter, MigrationStatus::AwaitingApproval);
        assert!(!m.small_enough_for_short_run(5000));

        m.progress.stats.table_rows_start = Some(5000);
        assert!(m.small_enough_for_short_run(5000));

        m.progress.stats.table_rows_start = Some(5001);
        assert!(!m.small_enough_for_short_run(5000));

        m.progress.stats.table_rows_start = Some(10);
        m.meta_request_id = Some(Uuid::new_v4());
        assert!(!m.small_enough_for_short_run(5000));
    }

    #[test]
    fn test_custom_options_decode_falls_back_to_defaults() {
        let options = CustomOptions {
            config_path: Some("/etc/osc.cnf".to_string()),
            ..CustomOptions::default()
        };
        assert_eq!(CustomOptions::decode(&options.encode()), options);
        assert_eq!(CustomOptions::decode(&serde_json::json!("garbage")), CustomOptions::default());
    }

    #[test]
    fn test_migration_serializes_flat() {
        let m = fixtures::migration("c1", DdlAction::Alter, MigrationStatus::Preparing);
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["clusterName"], "c1");
        assert_eq!(json["status"], "preparing");
        assert_eq!(json["initialRuntype"], "long");
        assert_eq!(json["lockVersion"], 0);
    }
}
