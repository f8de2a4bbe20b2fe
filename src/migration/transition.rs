//! Guarded conditional updates
//!
//! Every write to a migration is a [`Transition`]: a [`Guard`] the stored row
//! must satisfy and an [`Effect`] applied only if it does. Stores evaluate the
//! guard and the effect as one atomic step and bump `lock_version` on
//! success; a failed guard changes nothing.

use super::models::{Migration, MigrationDefinition, MigrationStatus, RunProgress, RunType};
use chrono::{DateTime, Utc};

/// Preconditions on the stored row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Guard {
    /// Allowed current statuses; `None` accepts any
    pub statuses: Option<Vec<MigrationStatus>>,
    pub lock_version: Option<i64>,
    pub staged: Option<bool>,
    pub editable: Option<bool>,
    /// Cluster-wide cap on running alters, excluding the row itself
    pub admission_limit: Option<i64>,
}

impl Guard {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn from_status(status: MigrationStatus) -> Self {
        Self::from_statuses(&[status])
    }

    pub fn from_statuses(statuses: &[MigrationStatus]) -> Self {
        Self {
            statuses: Some(statuses.to_vec()),
            ..Self::default()
        }
    }

    pub fn at_version(mut self, lock_version: i64) -> Self {
        self.lock_version = Some(lock_version);
        self
    }

    pub fn staged(mut self, staged: bool) -> Self {
        self.staged = Some(staged);
        self
    }

    pub fn editable(mut self) -> Self {
        self.editable = Some(true);
        self
    }

    pub fn admission(mut self, limit: i64) -> Self {
        self.admission_limit = Some(limit);
        self
    }

    /// Row-local part of the guard
    pub fn matches(&self, m: &Migration) -> bool {
        self.statuses.as_ref().map_or(true, |s| s.contains(&m.status))
            && self.lock_version.map_or(true, |v| v == m.lock_version)
            && self.staged.map_or(true, |s| s == m.staged)
            && self.editable.map_or(true, |e| e == m.editable)
    }

    /// Aggregate part of the guard, given how many other alters are running
    /// on the same cluster
    pub fn admits(&self, running_alters: i64) -> bool {
        self.admission_limit.map_or(true, |limit| running_alters < limit)
    }
}

/// One field written by a transition
#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    Status(MigrationStatus),
    RunType(RunType),
    Staged(bool),
    AutoRun(bool),
    Editable(bool),
    ApprovedBy(Option<String>),
    ApprovedAt(Option<DateTime<Utc>>),
    StartedAt(DateTime<Utc>),
    CompletedAt(DateTime<Utc>),
    ErrorMessage(Option<String>),
    /// Replaces the requested change and its classification
    Definition(Box<MigrationDefinition>),
    /// Overwrites the progress fields that are present
    Progress(RunProgress),
    /// Forgets table counters from an earlier run
    ClearStats,
}

impl Assignment {
    pub fn apply(&self, m: &mut Migration) {
        match self {
            Assignment::Status(status) => m.status = *status,
            Assignment::RunType(runtype) => m.runtype = *runtype,
            Assignment::Staged(staged) => m.staged = *staged,
            Assignment::AutoRun(auto_run) => m.auto_run = *auto_run,
            Assignment::Editable(editable) => m.editable = *editable,
            Assignment::ApprovedBy(by) => m.approved_by = by.clone(),
            Assignment::ApprovedAt(at) => m.approved_at = *at,
            Assignment::StartedAt(at) => m.started_at = Some(*at),
            Assignment::CompletedAt(at) => m.completed_at = Some(*at),
            Assignment::ErrorMessage(msg) => m.error_message = msg.clone(),
            Assignment::Definition(definition) => m.definition = (**definition).clone(),
            Assignment::Progress(progress) => merge_progress(&mut m.progress, progress),
            Assignment::ClearStats => m.progress.stats = Default::default(),
        }
    }
}

fn merge_progress(into: &mut RunProgress, from: &RunProgress) {
    fn merge<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
        if value.is_some() {
            slot.clone_from(value);
        }
    }

    merge(&mut into.stats.table_rows_start, &from.stats.table_rows_start);
    merge(&mut into.stats.table_rows_end, &from.stats.table_rows_end);
    merge(&mut into.stats.table_size_start, &from.stats.table_size_start);
    merge(&mut into.stats.table_size_end, &from.stats.table_size_end);
    merge(&mut into.stats.index_size_start, &from.stats.index_size_start);
    merge(&mut into.stats.index_size_end, &from.stats.index_size_end);
    merge(&mut into.copy_percentage, &from.copy_percentage);
    merge(&mut into.run_host, &from.run_host);
    merge(&mut into.work_directory, &from.work_directory);
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Update(Vec<Assignment>),
    /// Removes the row
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// Short name used in logs
    pub name: &'static str,
    pub guard: Guard,
    pub effect: Effect,
}

impl Transition {
    pub fn update(name: &'static str, guard: Guard, assignments: Vec<Assignment>) -> Self {
        Self {
            name,
            guard,
            effect: Effect::Update(assignments),
        }
    }

    pub fn delete(guard: Guard) -> Self {
        Self {
            name: "delete",
            guard,
            effect: Effect::Delete,
        }
    }

    /// Apply the effect to an in-memory copy that already passed the guard
    pub fn apply_to(&self, m: &mut Migration, now: DateTime<Utc>) {
        if let Effect::Update(assignments) = &self.effect {
            for assignment in assignments {
                assignment.apply(m);
            }
            m.lock_version += 1;
            m.updated_at = now;
        }
    }
}

/// What a store reports back for one transition
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// The row as it is after the update (as it was, for a delete)
    Applied(Migration),
    /// Stale lock version, wrong status or missing row
    Rejected,
    /// Row guard held but the cluster is at its running limit
    AtCapacity,
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied(_))
    }
}

/// How a batch of transitions treats partial failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPolicy {
    /// Commit only if every transition applies
    AllOrNothing,
    /// Keep every transition that applies
    BestEffort,
}

// Catalogue of workflow transitions.

pub fn approve(lock_version: i64, runtype: RunType, approver: &str, now: DateTime<Utc>) -> Transition {
    Transition::update(
        "approve",
        Guard::from_status(MigrationStatus::AwaitingApproval).at_version(lock_version),
        vec![
            Assignment::Status(MigrationStatus::AwaitingStart),
            Assignment::RunType(runtype),
            Assignment::ApprovedBy(Some(approver.to_string())),
            Assignment::ApprovedAt(Some(now)),
        ],
    )
}

pub fn unapprove(lock_version: i64) -> Transition {
    Transition::update(
        "unapprove",
        Guard::from_status(MigrationStatus::AwaitingStart).at_version(lock_version),
        vec![
            Assignment::Status(MigrationStatus::AwaitingApproval),
            Assignment::RunType(RunType::Undecided),
            Assignment::ApprovedBy(None),
            Assignment::ApprovedAt(None),
        ],
    )
}

/// `admission_limit` is `None` for creates and drops
pub fn start(lock_version: i64, auto_run: bool, admission_limit: Option<i64>, now: DateTime<Utc>) -> Transition {
    let mut guard = Guard::from_statuses(&MigrationStatus::STARTABLE).at_version(lock_version);
    if let Some(limit) = admission_limit {
        guard = guard.admission(limit);
    }
    Transition::update(
        "start",
        guard,
        vec![
            Assignment::Status(MigrationStatus::CopyInProgress),
            Assignment::StartedAt(now),
            Assignment::Editable(false),
            Assignment::Staged(true),
            Assignment::AutoRun(auto_run),
        ],
    )
}

pub fn enqueue(lock_version: i64) -> Transition {
    Transition::update(
        "enqueue",
        Guard::from_status(MigrationStatus::AwaitingStart).at_version(lock_version),
        vec![
            Assignment::Status(MigrationStatus::Enqueued),
            Assignment::AutoRun(true),
        ],
    )
}

pub fn dequeue(lock_version: i64) -> Transition {
    Transition::update(
        "dequeue",
        Guard::from_status(MigrationStatus::Enqueued).at_version(lock_version),
        vec![
            Assignment::Status(MigrationStatus::AwaitingStart),
            Assignment::AutoRun(false),
        ],
    )
}

pub fn pause() -> Transition {
    Transition::update(
        "pause",
        Guard::from_status(MigrationStatus::CopyInProgress),
        vec![
            Assignment::Status(MigrationStatus::Pausing),
            Assignment::Staged(true),
            Assignment::AutoRun(false),
        ],
    )
}

pub fn rename(lock_version: i64) -> Transition {
    Transition::update(
        "rename",
        Guard::from_status(MigrationStatus::AwaitingRename).at_version(lock_version),
        vec![
            Assignment::Status(MigrationStatus::RenameInProgress),
            Assignment::Staged(true),
        ],
    )
}

pub fn resume(lock_version: i64, auto_run: bool) -> Transition {
    Transition::update(
        "resume",
        Guard::from_statuses(&MigrationStatus::RESUMABLE).at_version(lock_version),
        vec![
            Assignment::Status(MigrationStatus::CopyInProgress),
            Assignment::Staged(true),
            Assignment::ErrorMessage(None),
            Assignment::AutoRun(auto_run),
        ],
    )
}

pub fn cancel() -> Transition {
    Transition::update(
        "cancel",
        Guard::from_statuses(&MigrationStatus::CANCELABLE),
        vec![
            Assignment::Status(MigrationStatus::Canceled),
            Assignment::Staged(true),
        ],
    )
}

pub fn complete(now: DateTime<Utc>) -> Transition {
    Transition::update(
        "complete",
        Guard::any(),
        vec![
            Assignment::Status(MigrationStatus::Completed),
            Assignment::CompletedAt(now),
        ],
    )
}

pub fn fail(message: Option<String>) -> Transition {
    Transition::update(
        "fail",
        Guard::any(),
        vec![
            Assignment::Status(MigrationStatus::Failed),
            Assignment::ErrorMessage(message),
            Assignment::AutoRun(false),
        ],
    )
}

pub fn error(message: Option<String>) -> Transition {
    Transition::update(
        "error",
        Guard::from_status(MigrationStatus::CopyInProgress),
        vec![
            Assignment::Status(MigrationStatus::Error),
            Assignment::ErrorMessage(message),
            Assignment::AutoRun(false),
        ],
    )
}

pub fn delete(lock_version: i64) -> Transition {
    Transition::delete(Guard::from_statuses(&MigrationStatus::DELETABLE).at_version(lock_version))
}

/// Re-stage a copy in progress so another agent can pick it up
pub fn offer() -> Transition {
    Transition::update(
        "offer",
        Guard::from_status(MigrationStatus::CopyInProgress),
        vec![Assignment::Staged(true)],
    )
}

pub fn unstage() -> Transition {
    Transition::update("unstage", Guard::any().staged(true), vec![Assignment::Staged(false)])
}

/// Machine step from `from`; `None` when the agent owns no step there
pub fn next_step(from: MigrationStatus) -> Option<Transition> {
    let to = from.machine_successor()?;
    Some(Transition::update(
        "next_step",
        Guard::from_status(from).staged(false),
        vec![Assignment::Status(to)],
    ))
}

pub fn update_progress(progress: RunProgress) -> Transition {
    Transition::update("update_progress", Guard::any(), vec![Assignment::Progress(progress)])
}

/// Replace the definition of an editable migration and send it back through
/// preparation
pub fn edit(lock_version: i64, definition: MigrationDefinition) -> Transition {
    Transition::update(
        "edit",
        Guard::any().at_version(lock_version).editable(),
        vec![
            Assignment::Definition(Box::new(definition)),
            Assignment::Status(MigrationStatus::Preparing),
            Assignment::Staged(true),
            Assignment::RunType(RunType::Undecided),
            Assignment::ApprovedBy(None),
            Assignment::ApprovedAt(None),
            Assignment::ErrorMessage(None),
            Assignment::ClearStats,
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ddl::DdlAction;
    use crate::migration::models::fixtures;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_guard_checks_status_version_and_flags() {
        let mut m = fixtures::migration("c1", DdlAction::Alter, MigrationStatus::AwaitingApproval);
        m.lock_version = 3;

        assert!(Guard::from_status(MigrationStatus::AwaitingApproval).at_version(3).matches(&m));
        assert!(!Guard::from_status(MigrationStatus::AwaitingApproval).at_version(2).matches(&m));
        assert!(!Guard::from_status(MigrationStatus::AwaitingStart).matches(&m));
        assert!(Guard::any().staged(true).matches(&m));
        m.editable = false;
        assert!(!Guard::any().editable().matches(&m));
    }

    #[test]
    fn test_admission_guard() {
        let guard = Guard::any().admission(1);
        assert!(guard.admits(0));
        assert!(!guard.admits(1));
        assert!(Guard::any().admits(10));
    }

    #[test]
    fn test_apply_bumps_lock_version() {
        let mut m = fixtures::migration("c1", DdlAction::Alter, MigrationStatus::AwaitingApproval);
        let now = Utc::now();
        approve(0, RunType::Short, "olga", now).apply_to(&mut m, now);

        assert_eq!(m.status, MigrationStatus::AwaitingStart);
        assert_eq!(m.runtype, RunType::Short);
        assert_eq!(m.approved_by.as_deref(), Some("olga"));
        assert_eq!(m.lock_version, 1);
    }

    #[test]
    fn test_start_guard_depends_on_action() {
        let now = Utc::now();
        assert_eq!(start(1, false, Some(1), now).guard.admission_limit, Some(1));
        assert_eq!(start(1, false, None, now).guard.admission_limit, None);
    }

    #[test]
    fn test_next_step_requires_unstaged_machine_status() {
        assert!(next_step(MigrationStatus::AwaitingApproval).is_none());
        let t = next_step(MigrationStatus::CopyInProgress).unwrap();
        assert_eq!(t.guard.staged, Some(false));
        assert_eq!(t.effect, Effect::Update(vec![Assignment::Status(MigrationStatus::AwaitingRename)]));
    }

    #[test]
    fn test_progress_only_overwrites_present_fields() {
        let mut m = fixtures::migration("c1", DdlAction::Alter, MigrationStatus::CopyInProgress);
        m.progress.run_host = Some("runner-1".to_string());
        m.progress.stats.table_rows_start = Some(42);

        let mut patch = RunProgress::default();
        patch.copy_percentage = Some(50);
        update_progress(patch).apply_to(&mut m, Utc::now());

        assert_eq!(m.progress.copy_percentage, Some(50));
        assert_eq!(m.progress.run_host.as_deref(), Some("runner-1"));
        assert_eq!(m.progress.stats.table_rows_start, Some(42));
    }

    #[test]
    fn test_edit_resets_workflow_fields() {
        let mut m = fixtures::migration("c1", DdlAction::Alter, MigrationStatus::AwaitingStart);
        m.runtype = RunType::Long;
        m.approved_by = Some("olga".to_string());
        m.staged = false;
        m.progress.stats.table_rows_start = Some(7);

        let mut definition = m.definition.clone();
        definition.database = "other".to_string();
        edit(0, definition).apply_to(&mut m, Utc::now());

        assert_eq!(m.status, MigrationStatus::Preparing);
        assert_eq!(m.runtype, RunType::Undecided);
        assert_eq!(m.approved_by, None);
        assert!(m.staged);
        assert_eq!(m.progress.stats.table_rows_start, None);
        assert_eq!(m.definition.database, "other");
    }
}
