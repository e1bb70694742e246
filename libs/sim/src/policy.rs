//! Permission demands made before any mutation

use crate::{models::Principal, Result};

/// Permission identifiers demanded by the engine
pub mod permissions {
    /// Merge, ignore, un-ignore and single-record detection
    pub const WRITE_CLINICAL_DATA: &str = "write-clinical-data";
    /// Global detection, clearing and reset
    pub const UNRESTRICTED_ADMINISTRATION: &str = "unrestricted-administration";
}

pub trait PolicyEnforcement: Send + Sync {
    /// Return `Error::PermissionDenied` if `principal` lacks `permission`
    fn demand(&self, permission: &str, principal: &Principal) -> Result<()>;
}
