//! Request payloads for creating and editing migrations

use super::models::CustomOptions;
use crate::error::{validation_error, AppError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

static DATABASE_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^;]+$").expect("valid regex"));

static FINAL_INSERT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^INSERT\s+INTO\s+[^;]+$").expect("valid regex"));

fn default_max_threads_running() -> i32 {
    CustomOptions::default().max_threads_running
}

fn default_max_replication_lag() -> i32 {
    CustomOptions::default().max_replication_lag
}

/// Blank optional strings count as absent
fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// One DDL statement against one cluster/database pair
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRequest {
    #[validate(length(min = 1, message = "Cluster name is required"))]
    pub cluster_name: String,

    #[validate(
        length(min = 1, message = "Database is required"),
        regex(path = *DATABASE_NAME, message = "Database may not contain ';'")
    )]
    pub database: String,

    #[validate(length(min = 1, message = "DDL statement is required"))]
    pub ddl_statement: String,

    #[validate(length(min = 1, message = "Pull request URL is required"))]
    pub pr_url: String,

    #[serde(default)]
    #[validate(regex(path = *FINAL_INSERT, message = "Final insert must be a single INSERT INTO statement"))]
    pub final_insert: Option<String>,

    #[serde(default = "default_max_threads_running")]
    #[validate(range(min = 1, message = "Max threads running must be greater than 0"))]
    pub max_threads_running: i32,

    #[serde(default = "default_max_replication_lag")]
    #[validate(range(min = 1, message = "Max replication lag must be greater than 0"))]
    pub max_replication_lag: i32,

    #[serde(default)]
    pub config_path: Option<String>,

    #[serde(default)]
    pub recursion_method: Option<String>,
}

impl MigrationRequest {
    /// Trimmed and validated copy of the request
    pub fn checked(self) -> Result<Self, AppError> {
        let request = Self {
            cluster_name: self.cluster_name.trim().to_string(),
            database: self.database.trim().to_string(),
            ddl_statement: self.ddl_statement.trim().to_string(),
            pr_url: self.pr_url.trim().to_string(),
            final_insert: non_blank(self.final_insert),
            config_path: non_blank(self.config_path),
            recursion_method: non_blank(self.recursion_method),
            ..self
        };
        request.validate().map_err(|e| validation_error(e.to_string()))?;
        Ok(request)
    }

    pub fn custom_options(&self) -> CustomOptions {
        CustomOptions {
            max_threads_running: self.max_threads_running,
            max_replication_lag: self.max_replication_lag,
            config_path: self.config_path.clone(),
            recursion_method: self.recursion_method.clone(),
        }
    }
}

/// Edit of an existing migration, guarded by its lock version
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditMigrationRequest {
    pub lock_version: i64,
    #[serde(flatten)]
    pub request: MigrationRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    #[validate(length(min = 1, message = "Cluster name is required"))]
    pub cluster_name: String,
    #[validate(
        length(min = 1, message = "Database is required"),
        regex(path = *DATABASE_NAME, message = "Database may not contain ';'")
    )]
    pub database: String,
}

/// Fields shared by every member of a meta request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedRequest {
    pub ddl_statement: String,

    pub pr_url: String,

    #[serde(default)]
    pub final_insert: Option<String>,

    #[serde(default = "default_max_threads_running")]
    pub max_threads_running: i32,

    #[serde(default = "default_max_replication_lag")]
    pub max_replication_lag: i32,

    #[serde(default)]
    pub config_path: Option<String>,

    #[serde(default)]
    pub recursion_method: Option<String>,
}

impl SharedRequest {
    /// Validated migration request for one cluster/database pair
    pub fn for_target(&self, cluster_name: &str, database: &str) -> Result<MigrationRequest, AppError> {
        MigrationRequest {
            cluster_name: cluster_name.to_string(),
            database: database.to_string(),
            ddl_statement: self.ddl_statement.clone(),
            pr_url: self.pr_url.clone(),
            final_insert: self.final_insert.clone(),
            max_threads_running: self.max_threads_running,
            max_replication_lag: self.max_replication_lag,
            config_path: self.config_path.clone(),
            recursion_method: self.recursion_method.clone(),
        }
        .checked()
    }
}

/// One DDL statement fanned out to several targets
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MetaRequestForm {
    #[serde(flatten)]
    pub shared: SharedRequest,

    #[validate(length(min = 1, message = "At least one target is required"), nested)]
    pub targets: Vec<Target>,
}

impl MetaRequestForm {
    /// Per-target migration requests, each validated on its own
    pub fn member_requests(&self) -> Result<Vec<MigrationRequest>, AppError> {
        self.validate().map_err(|e| validation_error(e.to_string()))?;
        self.targets
            .iter()
            .map(|target| self.shared.for_target(&target.cluster_name, &target.database))
            .collect()
    }
}

/// Edit of a meta request: new shared fields for every member
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditMetaRequest {
    #[serde(flatten)]
    pub shared: SharedRequest,
    /// Every member and the lock version it was read at
    pub members: Vec<MemberVersion>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberVersion {
    pub id: Uuid,
    pub lock_version: i64,
}

/// One action applied to several members of a meta request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkActionRequest {
    pub action: super::models::WorkflowAction,
    pub members: Vec<MemberVersion>,
}
