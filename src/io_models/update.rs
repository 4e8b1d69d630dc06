use serde_derive::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Options of an update invocation, produced by the CLI layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    /// Classify only, apply nothing.
    pub dry_run: bool,
    /// Accept recreate-category changes instead of failing.
    pub force: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
/// How a single descriptor change can be brought to the running cluster.
pub enum ChangeCategory {
    /// Applicable against the live cluster, no node restart involved.
    InPlace,
    /// Requires restarting nodes but not recreating the cluster.
    Reboot,
    /// Only applicable by deleting and recreating the cluster.
    Recreate,
}

impl Display for ChangeCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ChangeCategory::InPlace => "in-place",
            ChangeCategory::Reboot => "reboot",
            ChangeCategory::Recreate => "recreate",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// One classified difference between the current and the desired descriptor.
pub struct Change {
    /// Dotted field path, e.g. `k3d.agents` or `cluster.cni`.
    pub field: String,
    pub old_value: String,
    pub new_value: String,
    pub category: ChangeCategory,
    /// Human-readable reason for the chosen category.
    pub reason: String,
}

impl Display for Change {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: `{}` -> `{}` ({})",
            self.field, self.old_value, self.new_value, self.category
        )
    }
}

/// Outcome of an update invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateResult {
    pub in_place_changes: Vec<Change>,
    pub reboot_required: Vec<Change>,
    pub recreate_required: Vec<Change>,
    pub applied_changes: Vec<Change>,
    pub failed_changes: Vec<Change>,
}

impl UpdateResult {
    pub fn is_noop(&self) -> bool {
        self.in_place_changes.is_empty() && self.reboot_required.is_empty() && self.recreate_required.is_empty()
    }

    /// All classified changes, in classification order.
    pub fn changes(&self) -> impl Iterator<Item = &Change> {
        self.in_place_changes
            .iter()
            .chain(self.reboot_required.iter())
            .chain(self.recreate_required.iter())
    }
}
