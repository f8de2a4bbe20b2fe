//! Available-action computation
//!
//! Answers "what may this caller do next" for a migration. The result drives
//! both the UI and the authorization checks in the engine.

use super::models::{MigrationStatus, WorkflowAction};
use super::policy::Capabilities;
use crate::ddl::{ClassifiedRun, DdlAction};

use WorkflowAction::*;

/// Ordered list of actions `caps` allows on a migration in `status`.
///
/// `run` is the classified run type (the initial one for bulk decisions),
/// `small_enough` whether the table qualifies for a short run.
pub fn authorized_actions(
    status: MigrationStatus,
    run: ClassifiedRun,
    action: DdlAction,
    small_enough: bool,
    caps: Capabilities,
) -> Vec<WorkflowAction> {
    let runner = caps.any_action || caps.run_action;

    match status {
        MigrationStatus::Preparing => {
            if runner || caps.requestor {
                vec![Delete]
            } else {
                vec![]
            }
        }
        MigrationStatus::AwaitingApproval => {
            if caps.any_action {
                match run {
                    ClassifiedRun::Long => vec![short_if(small_enough, ApproveLong), Delete],
                    ClassifiedRun::Short => vec![ApproveShort, Delete],
                    ClassifiedRun::MaybeShort if small_enough => vec![ApproveShort, Delete],
                    ClassifiedRun::MaybeShort => vec![ApproveLong, ApproveShort, Delete],
                    ClassifiedRun::MaybeNoCheckAlter => {
                        vec![short_if(small_enough, ApproveNoCheckAlter), Delete]
                    }
                }
            } else if caps.approve {
                match run {
                    ClassifiedRun::Long | ClassifiedRun::MaybeShort => {
                        vec![short_if(small_enough, ApproveLong), Delete]
                    }
                    ClassifiedRun::Short => vec![ApproveShort, Delete],
                    ClassifiedRun::MaybeNoCheckAlter if small_enough => vec![ApproveShort, Delete],
                    ClassifiedRun::MaybeNoCheckAlter => vec![Delete],
                }
            } else if caps.run_action || caps.requestor {
                vec![Delete]
            } else {
                vec![]
            }
        }
        MigrationStatus::AwaitingStart => {
            if caps.approve {
                vec![Unapprove, Start, Delete]
            } else if caps.run_action {
                vec![Start, Delete]
            } else if caps.requestor {
                vec![Delete]
            } else {
                vec![]
            }
        }
        MigrationStatus::CopyInProgress if runner => match action {
            DdlAction::Alter => vec![Pause, Cancel],
            DdlAction::Create | DdlAction::Drop => vec![Cancel],
        },
        MigrationStatus::AwaitingRename if runner => vec![Rename, Cancel],
        MigrationStatus::RenameInProgress | MigrationStatus::Pausing if runner => vec![Cancel],
        MigrationStatus::Paused | MigrationStatus::Error if runner => vec![Resume, Cancel],
        MigrationStatus::Enqueued if runner => vec![Dequeue, Delete],
        MigrationStatus::CopyInProgress
        | MigrationStatus::AwaitingRename
        | MigrationStatus::RenameInProgress
        | MigrationStatus::Pausing
        | MigrationStatus::Paused
        | MigrationStatus::Error
        | MigrationStatus::Enqueued
        | MigrationStatus::Completed
        | MigrationStatus::Canceled
        | MigrationStatus::Failed => vec![],
    }
}

fn short_if(small_enough: bool, otherwise: WorkflowAction) -> WorkflowAction {
    if small_enough {
        ApproveShort
    } else {
        otherwise
    }
}

/// Union of several action lists in display order
pub fn merge_actions<I>(lists: I) -> Vec<WorkflowAction>
where
    I: IntoIterator<Item = Vec<WorkflowAction>>,
{
    let mut merged: Vec<WorkflowAction> = lists.into_iter().flatten().collect();
    merged.sort();
    merged.dedup();
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const ADMIN: Capabilities = Capabilities {
        any_action: true,
        run_action: true,
        requestor: false,
        approve: true,
        approve_dangerous: true,
        destroy: true,
    };

    const APPROVER: Capabilities = Capabilities {
        any_action: false,
        run_action: true,
        requestor: false,
        approve: true,
        approve_dangerous: false,
        destroy: true,
    };

    const REQUESTOR: Capabilities = Capabilities {
        any_action: false,
        run_action: false,
        requestor: true,
        approve: false,
        approve_dangerous: false,
        destroy: true,
    };

    const NOBODY: Capabilities = Capabilities {
        any_action: false,
        run_action: false,
        requestor: false,
        approve: false,
        approve_dangerous: false,
        destroy: false,
    };

    fn approval(run: ClassifiedRun, small: bool, caps: Capabilities) -> Vec<WorkflowAction> {
        authorized_actions(MigrationStatus::AwaitingApproval, run, DdlAction::Alter, small, caps)
    }

    #[test]
    fn test_preparing_offers_delete_to_involved_callers() {
        for caps in [ADMIN, APPROVER, REQUESTOR] {
            assert_eq!(
                authorized_actions(MigrationStatus::Preparing, ClassifiedRun::Short, DdlAction::Create, false, caps),
                vec![Delete]
            );
        }
        assert!(authorized_actions(MigrationStatus::Preparing, ClassifiedRun::Short, DdlAction::Create, false, NOBODY)
            .is_empty());
    }

    #[test]
    fn test_admin_approval_choices() {
        assert_eq!(approval(ClassifiedRun::Long, false, ADMIN), vec![ApproveLong, Delete]);
        assert_eq!(approval(ClassifiedRun::Long, true, ADMIN), vec![ApproveShort, Delete]);
        assert_eq!(approval(ClassifiedRun::Short, false, ADMIN), vec![ApproveShort, Delete]);
        assert_eq!(
            approval(ClassifiedRun::MaybeShort, false, ADMIN),
            vec![ApproveLong, ApproveShort, Delete]
        );
        assert_eq!(approval(ClassifiedRun::MaybeShort, true, ADMIN), vec![ApproveShort, Delete]);
        assert_eq!(
            approval(ClassifiedRun::MaybeNoCheckAlter, false, ADMIN),
            vec![ApproveNoCheckAlter, Delete]
        );
        assert_eq!(approval(ClassifiedRun::MaybeNoCheckAlter, true, ADMIN), vec![ApproveShort, Delete]);
    }

    #[test]
    fn test_approver_sees_a_single_preselected_choice() {
        assert_eq!(approval(ClassifiedRun::MaybeShort, false, APPROVER), vec![ApproveLong, Delete]);
        assert_eq!(approval(ClassifiedRun::MaybeShort, true, APPROVER), vec![ApproveShort, Delete]);
        assert_eq!(approval(ClassifiedRun::MaybeNoCheckAlter, false, APPROVER), vec![Delete]);
        assert_eq!(approval(ClassifiedRun::MaybeNoCheckAlter, true, APPROVER), vec![ApproveShort, Delete]);
    }

    #[test]
    fn test_requestor_only_deletes_while_awaiting_approval() {
        assert_eq!(approval(ClassifiedRun::Long, false, REQUESTOR), vec![Delete]);
        assert!(approval(ClassifiedRun::Long, false, NOBODY).is_empty());
    }

    #[test]
    fn test_awaiting_start() {
        let run = |caps| {
            authorized_actions(MigrationStatus::AwaitingStart, ClassifiedRun::Long, DdlAction::Alter, false, caps)
        };
        assert_eq!(run(APPROVER), vec![Unapprove, Start, Delete]);
        assert_eq!(
            run(Capabilities { approve: false, ..APPROVER }),
            vec![Start, Delete]
        );
        assert_eq!(run(REQUESTOR), vec![Delete]);
    }

    #[test]
    fn test_copy_in_progress_pause_only_for_alters() {
        let copy = |action| {
            authorized_actions(MigrationStatus::CopyInProgress, ClassifiedRun::Long, action, false, ADMIN)
        };
        assert_eq!(copy(DdlAction::Alter), vec![Pause, Cancel]);
        assert_eq!(copy(DdlAction::Create), vec![Cancel]);
        assert_eq!(copy(DdlAction::Drop), vec![Cancel]);
    }

    #[test]
    fn test_running_states_need_run_capability() {
        let at = |status, caps| authorized_actions(status, ClassifiedRun::Long, DdlAction::Alter, false, caps);
        assert_eq!(at(MigrationStatus::AwaitingRename, APPROVER), vec![Rename, Cancel]);
        assert_eq!(at(MigrationStatus::RenameInProgress, APPROVER), vec![Cancel]);
        assert_eq!(at(MigrationStatus::Pausing, APPROVER), vec![Cancel]);
        assert_eq!(at(MigrationStatus::Paused, APPROVER), vec![Resume, Cancel]);
        assert_eq!(at(MigrationStatus::Error, APPROVER), vec![Resume, Cancel]);
        assert_eq!(at(MigrationStatus::Enqueued, APPROVER), vec![Dequeue, Delete]);
        assert!(at(MigrationStatus::Paused, REQUESTOR).is_empty());
    }

    #[test]
    fn test_terminal_states_offer_nothing() {
        for status in [MigrationStatus::Completed, MigrationStatus::Canceled, MigrationStatus::Failed] {
            assert!(authorized_actions(status, ClassifiedRun::Long, DdlAction::Alter, false, ADMIN).is_empty());
        }
    }

    #[test]
    fn test_merge_actions_keeps_display_order() {
        assert_eq!(
            merge_actions(vec![vec![Delete, Dequeue], vec![ApproveShort, Delete]]),
            vec![ApproveShort, Delete, Dequeue]
        );
    }
}
