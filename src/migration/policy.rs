//! Who may do what to a migration
//!
//! Capabilities are derived from the caller, the migration's cluster and the
//! migration's requestor. They are computed once per request and handed to
//! [`authorized_actions`](super::actions::authorized_actions).

use super::models::{Cluster, Migration};
use crate::auth::Principal;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    /// Admins may perform any action
    pub any_action: bool,
    /// start, pause, rename, resume, dequeue and cancel
    pub run_action: bool,
    pub requestor: bool,
    /// approve and unapprove
    pub approve: bool,
    /// approve choices that skip safety checks
    pub approve_dangerous: bool,
    pub destroy: bool,
}

impl Capabilities {
    pub fn for_migration(principal: &Principal, cluster: &Cluster, migration: &Migration) -> Self {
        Self::resolve(principal, cluster, &migration.requestor)
    }

    pub fn resolve(principal: &Principal, cluster: &Cluster, requestor: &str) -> Self {
        let admin = principal.is_admin();
        let owner = cluster.is_owner(&principal.username);
        let is_requestor = principal.username == requestor;

        Self {
            any_action: admin,
            run_action: admin || owner,
            requestor: is_requestor,
            approve: admin || (owner && !cluster.admin_review_required && !is_requestor),
            approve_dangerous: admin,
            destroy: admin || owner || is_requestor,
        }
    }
}
