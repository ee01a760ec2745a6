//! Data types for the registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use svcmgr_binder::CapabilityHandle;
use svcmgr_common::DumpPriority;

/// Who is asking.
///
/// Isolated (sandboxed) callers only see publications that opted in with
/// `allow_isolated`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallerContext {
    pub isolated: bool,
}

impl CallerContext {
    /// An ordinary, non-isolated caller.
    pub fn trusted() -> Self {
        Self { isolated: false }
    }

    /// A sandboxed caller.
    pub fn isolated() -> Self {
        Self { isolated: true }
    }
}

/// One publication held by the authority.
///
/// Unlike the client-side cache, the authority's entries may be replaced: a
/// republication under the same name overwrites the previous one.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    /// Handle clients resolve the name to.
    pub handle: CapabilityHandle,

    /// Whether isolated callers may see this publication.
    pub allow_isolated: bool,

    /// Dump priority flags used to filter listings.
    pub dump_priority: DumpPriority,

    /// When this entry was registered.
    pub registered_at: DateTime<Utc>,
}

impl RegistryEntry {
    pub fn new(handle: CapabilityHandle, allow_isolated: bool, dump_priority: DumpPriority) -> Self {
        Self {
            handle,
            allow_isolated,
            dump_priority,
            registered_at: Utc::now(),
        }
    }

    /// Returns true if `caller` may see this entry.
    pub fn visible_to(&self, caller: &CallerContext) -> bool {
        !caller.isolated || self.allow_isolated
    }
}
