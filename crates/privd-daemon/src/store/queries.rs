//! The fixed query set of the privilege store.
//!
//! Every logical query the store can issue is a [`QueryKind`] mapped to one
//! SQL string. The store primes all of them through the connection's
//! prepared-statement cache at construction, because statement compilation is
//! the expensive step; afterwards each use fetches the already-compiled,
//! reset handle.

/// Logical query kinds, one per prepared statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// Privileges granted to any app of a package, for a uid.
    GetPkgPrivileges,
    /// Privileges granted to one app, for a uid.
    GetAppPrivileges,
    /// Create the package row if it does not exist yet.
    EnsurePkgId,
    /// Insert an app row.
    AddApplication,
    /// Delete an app row.
    RemoveApplication,
    /// Insert one privilege row for an app.
    AddAppPrivilege,
    /// Delete all privilege rows for an app.
    RemoveAppPrivileges,
    /// Probe package existence.
    PkgIdExists,
    /// Resolve the package owning an app (any uid).
    GetPkgId,
    /// Resolve the package owning an app row for one uid.
    GetAppPkgForUser,
    /// Groups implied by a privilege.
    GetPrivilegeGroups,
    /// Insert one privilege-to-group mapping row.
    AddPrivilegeGroup,
    /// All app ids installed for a uid.
    GetUserApps,
    /// All app ids in a package.
    GetAppsInPkg,
    /// Count of app rows remaining in a package.
    CountAppsInPkg,
    /// Delete an empty package row.
    RemovePkg,
}

impl QueryKind {
    /// Every query kind, in priming order.
    pub const ALL: [Self; 16] = [
        Self::GetPkgPrivileges,
        Self::GetAppPrivileges,
        Self::EnsurePkgId,
        Self::AddApplication,
        Self::RemoveApplication,
        Self::AddAppPrivilege,
        Self::RemoveAppPrivileges,
        Self::PkgIdExists,
        Self::GetPkgId,
        Self::GetAppPkgForUser,
        Self::GetPrivilegeGroups,
        Self::AddPrivilegeGroup,
        Self::GetUserApps,
        Self::GetAppsInPkg,
        Self::CountAppsInPkg,
        Self::RemovePkg,
    ];

    /// The SQL text for this query kind.
    #[must_use]
    pub const fn sql(self) -> &'static str {
        match self {
            Self::GetPkgPrivileges => {
                "SELECT DISTINCT ap.privilege_name FROM app_privilege ap \
                 JOIN app a ON a.app_id = ap.app_id AND a.uid = ap.uid \
                 WHERE a.pkg_id = ?1 AND ap.uid = ?2 \
                 ORDER BY ap.privilege_name"
            }
            Self::GetAppPrivileges => {
                "SELECT DISTINCT privilege_name FROM app_privilege \
                 WHERE app_id = ?1 AND uid = ?2 \
                 ORDER BY privilege_name"
            }
            Self::EnsurePkgId => "INSERT OR IGNORE INTO pkg (pkg_id) VALUES (?1)",
            Self::AddApplication => "INSERT INTO app (app_id, uid, pkg_id) VALUES (?1, ?2, ?3)",
            Self::RemoveApplication => "DELETE FROM app WHERE app_id = ?1 AND uid = ?2",
            Self::AddAppPrivilege => {
                "INSERT OR IGNORE INTO app_privilege (app_id, uid, privilege_name) \
                 VALUES (?1, ?2, ?3)"
            }
            Self::RemoveAppPrivileges => {
                "DELETE FROM app_privilege WHERE app_id = ?1 AND uid = ?2"
            }
            Self::PkgIdExists => "SELECT 1 FROM pkg WHERE pkg_id = ?1 LIMIT 1",
            Self::GetPkgId => "SELECT pkg_id FROM app WHERE app_id = ?1 LIMIT 1",
            Self::GetAppPkgForUser => {
                "SELECT pkg_id FROM app WHERE app_id = ?1 AND uid = ?2 LIMIT 1"
            }
            Self::GetPrivilegeGroups => {
                "SELECT group_name FROM privilege_group \
                 WHERE privilege_name = ?1 \
                 ORDER BY group_name"
            }
            Self::AddPrivilegeGroup => {
                "INSERT OR IGNORE INTO privilege_group (privilege_name, group_name) \
                 VALUES (?1, ?2)"
            }
            Self::GetUserApps => "SELECT app_id FROM app WHERE uid = ?1 ORDER BY app_id",
            Self::GetAppsInPkg => "SELECT app_id FROM app WHERE pkg_id = ?1 ORDER BY app_id",
            Self::CountAppsInPkg => "SELECT COUNT(*) FROM app WHERE pkg_id = ?1",
            Self::RemovePkg => "DELETE FROM pkg WHERE pkg_id = ?1",
        }
    }
}
