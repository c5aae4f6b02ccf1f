//! The privilege-manager service.
//!
//! Decodes client requests, authorizes them against the connection's peer
//! credentials, executes them against the privilege store, and encodes the
//! reply. Multi-step mutations (install, uninstall) run inside an explicit
//! store transaction and roll back on any error, so no client ever observes
//! partial state.
//!
//! # Credential policy
//!
//! Mutating requests name a target uid. A root caller may act for any uid;
//! every other caller is restricted to its own uid and gets
//! [`StatusCode::AccessDenied`] otherwise. Queries are not restricted:
//! platform components legitimately inspect other users' app state.

use std::path::Path;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use privd_core::protocol::messages::{
    AppIdsReply, AppInstallRequest, AppUninstallReply, AppUninstallRequest, GroupsReply,
    PkgIdReply, PrivilegesReply,
};
use privd_core::protocol::{ProtocolError, Request, Response, StatusCode};
use tracing::{debug, error, info};

use crate::protocol::{ConnectionInfo, ServiceDescription, SocketService};
use crate::store::{PrivilegeDb, StoreError};

/// Socket file name of the privilege-manager service.
pub const SOCKET_NAME: &str = "privilege-manager.sock";

/// The single interface the service exposes.
const INTERFACE_PRIVILEGE: u32 = 0;

/// Shared handle to the daemon's one privilege store.
pub type SharedStore = Arc<Mutex<PrivilegeDb>>;

/// The daemon's privilege-manager service.
pub struct PrivilegeService {
    db: SharedStore,
    socket_path: std::path::PathBuf,
}

impl PrivilegeService {
    /// Create the service over the shared store, with its socket placed in
    /// `runtime_dir`.
    #[must_use]
    pub fn new(db: SharedStore, runtime_dir: &Path) -> Self {
        Self {
            db,
            socket_path: runtime_dir.join(SOCKET_NAME),
        }
    }

    fn lock_db(&self) -> std::sync::MutexGuard<'_, PrivilegeDb> {
        // A poisoned lock means another worker panicked mid-operation; the
        // store's transaction state machine still guards consistency.
        self.db.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Whether `creds` may mutate state owned by `target_uid`.
    fn uid_allowed(conn: &ConnectionInfo, target_uid: u32) -> bool {
        conn.creds.is_root() || conn.creds.uid == target_uid
    }

    fn handle(&mut self, conn: &ConnectionInfo, request: Request) -> Response {
        match request {
            Request::AppInstall(body) => {
                if !Self::uid_allowed(conn, body.uid) {
                    debug!(
                        caller_uid = conn.creds.uid,
                        target_uid = body.uid,
                        app_id = body.app_id,
                        "install denied"
                    );
                    return Response::error(StatusCode::AccessDenied);
                }
                self.app_install(&body)
            }
            Request::AppUninstall(body) => {
                if !Self::uid_allowed(conn, body.uid) {
                    debug!(
                        caller_uid = conn.creds.uid,
                        target_uid = body.uid,
                        app_id = body.app_id,
                        "uninstall denied"
                    );
                    return Response::error(StatusCode::AccessDenied);
                }
                self.app_uninstall(&body)
            }
            Request::GetPkgId(body) => match self.lock_db().get_app_pkg_id(&body.app_id) {
                Ok(Some(pkg_id)) => Response::PkgId(PkgIdReply { pkg_id }),
                Ok(None) => Response::error(StatusCode::NotFound),
                Err(e) => internal(&e, "get_app_pkg_id"),
            },
            Request::GetAppPrivileges(body) => {
                match self.lock_db().get_app_privileges(&body.app_id, body.uid) {
                    Ok(privileges) => Response::AppPrivileges(PrivilegesReply { privileges }),
                    Err(e) => internal(&e, "get_app_privileges"),
                }
            }
            Request::GetPkgPrivileges(body) => {
                match self.lock_db().get_pkg_privileges(&body.pkg_id, body.uid) {
                    Ok(privileges) => Response::PkgPrivileges(PrivilegesReply { privileges }),
                    Err(e) => internal(&e, "get_pkg_privileges"),
                }
            }
            Request::GetUserApps(body) => match self.lock_db().get_user_apps(body.uid) {
                Ok(app_ids) => Response::UserApps(AppIdsReply { app_ids }),
                Err(e) => internal(&e, "get_user_apps"),
            },
            Request::GetAppsInPkg(body) => {
                match self.lock_db().get_app_ids_for_pkg_id(&body.pkg_id) {
                    Ok(app_ids) => Response::AppsInPkg(AppIdsReply { app_ids }),
                    Err(e) => internal(&e, "get_app_ids_for_pkg_id"),
                }
            }
            Request::GetPrivilegeGroups(body) => {
                match self.lock_db().get_privilege_groups(&body.privilege) {
                    Ok(groups) => Response::PrivilegeGroups(GroupsReply { groups }),
                    Err(e) => internal(&e, "get_privilege_groups"),
                }
            }
        }
    }

    fn app_install(&mut self, request: &AppInstallRequest) -> Response {
        let mut db = self.lock_db();
        match in_transaction(&mut db, |db| {
            if !db.app_id_exists(&request.app_id, request.uid)? {
                db.add_application(&request.app_id, &request.pkg_id, request.uid)?;
            }
            db.update_app_privileges(&request.app_id, request.uid, &request.privileges)
        }) {
            Ok(()) => {
                info!(
                    app_id = request.app_id,
                    pkg_id = request.pkg_id,
                    uid = request.uid,
                    privileges = request.privileges.len(),
                    "application installed"
                );
                Response::AppInstall
            }
            Err(e) => internal(&e, "app_install"),
        }
    }

    fn app_uninstall(&mut self, request: &AppUninstallRequest) -> Response {
        let mut db = self.lock_db();
        match in_transaction(&mut db, |db| {
            if !db.app_id_exists(&request.app_id, request.uid)? {
                return Ok(None);
            }
            db.remove_application(&request.app_id, request.uid).map(Some)
        }) {
            Ok(Some(pkg_id_is_no_more)) => {
                info!(
                    app_id = request.app_id,
                    uid = request.uid,
                    pkg_id_is_no_more, "application uninstalled"
                );
                Response::AppUninstall(AppUninstallReply { pkg_id_is_no_more })
            }
            Ok(None) => Response::error(StatusCode::NotFound),
            Err(e) => internal(&e, "app_uninstall"),
        }
    }
}

/// Run `body` inside a store transaction, rolling back on any error.
///
/// Rollback failure is logged but the original error is what surfaces; the
/// store's state machine marks the connection unusable either way.
fn in_transaction<T>(
    db: &mut PrivilegeDb,
    body: impl FnOnce(&mut PrivilegeDb) -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    db.begin_transaction()?;
    match body(db) {
        Ok(value) => {
            db.commit_transaction()?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = db.rollback_transaction() {
                error!("rollback failed after {e}: {rollback_err}");
            }
            Err(e)
        }
    }
}

fn internal(error: &StoreError, operation: &str) -> Response {
    error!(operation, "store operation failed: {error}");
    Response::error(StatusCode::InternalError)
}

impl SocketService for PrivilegeService {
    fn name(&self) -> &'static str {
        "privilege-manager"
    }

    fn descriptions(&self) -> Vec<ServiceDescription> {
        vec![ServiceDescription {
            name: "privd::privilege-manager".to_string(),
            interface: INTERFACE_PRIVILEGE,
            socket_path: self.socket_path.clone(),
        }]
    }

    fn process(&mut self, conn: &ConnectionInfo, request: Bytes) -> Result<Bytes, ProtocolError> {
        let request = Request::decode(&request)?;
        let response = self.handle(conn, request);
        response.encode()
    }
}
