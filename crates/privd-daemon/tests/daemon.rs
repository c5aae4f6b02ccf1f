//! End-to-end tests driving the daemon through a real Unix socket.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use privd_core::protocol::messages::{
    AppIdsReply, AppInstallRequest, AppUninstallReply, AppUninstallRequest,
    GetAppPrivilegesRequest, GetPkgIdRequest, GetUserAppsRequest, PkgIdReply, PrivilegesReply,
};
use privd_core::protocol::{encode_frame, Request, Response, StatusCode};
use privd_daemon::protocol::SocketManager;
use privd_daemon::service::{PrivilegeService, SOCKET_NAME};
use privd_daemon::store::PrivilegeDb;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::timeout;

const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Bind a daemon in a temp dir and return the manager plus the service
/// socket path.
fn start_daemon(dir: &TempDir) -> (SocketManager, std::path::PathBuf) {
    let db = PrivilegeDb::open(&dir.path().join("privilege.db")).expect("open store");
    let service = PrivilegeService::new(Arc::new(Mutex::new(db)), dir.path());

    let mut manager = SocketManager::new();
    manager
        .register_service(Box::new(service))
        .expect("register service");
    manager.start();

    (manager, dir.path().join(SOCKET_NAME))
}

async fn read_response(stream: &mut UnixStream) -> Option<Response> {
    let mut len_buf = [0u8; 4];
    timeout(IO_TIMEOUT, stream.read_exact(&mut len_buf))
        .await
        .expect("read timed out")
        .ok()?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    timeout(IO_TIMEOUT, stream.read_exact(&mut payload))
        .await
        .expect("read timed out")
        .ok()?;
    Some(Response::decode(&payload).expect("decode response"))
}

async fn roundtrip(stream: &mut UnixStream, request: &Request) -> Response {
    let payload = request.encode().expect("encode request");
    let frame = encode_frame(&payload).expect("encode frame");
    stream.write_all(&frame).await.expect("write frame");
    read_response(stream).await.expect("response")
}

fn own_uid() -> u32 {
    nix::unistd::getuid().as_raw()
}

fn install_request(app_id: &str, pkg_id: &str, uid: u32, privileges: &[&str]) -> Request {
    Request::AppInstall(AppInstallRequest {
        app_id: app_id.to_string(),
        pkg_id: pkg_id.to_string(),
        uid,
        privileges: privileges.iter().map(ToString::to_string).collect(),
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn install_query_uninstall_over_socket() {
    let dir = TempDir::new().expect("temp dir");
    let (_manager, socket) = start_daemon(&dir);
    let mut stream = UnixStream::connect(&socket).await.expect("connect");
    let uid = own_uid();

    let response = roundtrip(&mut stream, &install_request("app1", "pkgA", uid, &["net"])).await;
    assert_eq!(response, Response::AppInstall);

    let response = roundtrip(
        &mut stream,
        &Request::GetPkgId(GetPkgIdRequest {
            app_id: "app1".to_string(),
        }),
    )
    .await;
    assert_eq!(
        response,
        Response::PkgId(PkgIdReply {
            pkg_id: "pkgA".to_string()
        })
    );

    let response = roundtrip(
        &mut stream,
        &Request::GetAppPrivileges(GetAppPrivilegesRequest {
            app_id: "app1".to_string(),
            uid,
        }),
    )
    .await;
    assert_eq!(
        response,
        Response::AppPrivileges(PrivilegesReply {
            privileges: vec!["net".to_string()]
        })
    );

    let response = roundtrip(
        &mut stream,
        &Request::AppUninstall(AppUninstallRequest {
            app_id: "app1".to_string(),
            uid,
        }),
    )
    .await;
    assert_eq!(
        response,
        Response::AppUninstall(AppUninstallReply {
            pkg_id_is_no_more: true
        })
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn frame_split_across_writes_decodes_once() {
    let dir = TempDir::new().expect("temp dir");
    let (_manager, socket) = start_daemon(&dir);
    let mut stream = UnixStream::connect(&socket).await.expect("connect");
    let uid = own_uid();

    let payload = install_request("app1", "pkgA", uid, &["net"])
        .encode()
        .expect("encode request");
    let frame = encode_frame(&payload).expect("encode frame");

    // First three bytes, a pause, then the remainder.
    stream.write_all(&frame[..3]).await.expect("write head");
    stream.flush().await.expect("flush");
    tokio::time::sleep(Duration::from_millis(50)).await;
    stream.write_all(&frame[3..]).await.expect("write tail");

    let response = read_response(&mut stream).await.expect("response");
    assert_eq!(response, Response::AppInstall);

    // Exactly one install happened.
    let response = roundtrip(
        &mut stream,
        &Request::GetUserApps(GetUserAppsRequest { uid }),
    )
    .await;
    assert_eq!(
        response,
        Response::UserApps(AppIdsReply {
            app_ids: vec!["app1".to_string()]
        })
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn two_requests_in_one_write_get_two_ordered_responses() {
    let dir = TempDir::new().expect("temp dir");
    let (_manager, socket) = start_daemon(&dir);
    let mut stream = UnixStream::connect(&socket).await.expect("connect");
    let uid = own_uid();

    let mut wire = Vec::new();
    for request in [
        install_request("app1", "pkgA", uid, &[]),
        install_request("app2", "pkgB", uid, &[]),
    ] {
        let payload = request.encode().expect("encode request");
        wire.extend_from_slice(&encode_frame(&payload).expect("encode frame"));
    }
    stream.write_all(&wire).await.expect("write both");

    assert_eq!(read_response(&mut stream).await, Some(Response::AppInstall));
    assert_eq!(read_response(&mut stream).await, Some(Response::AppInstall));

    let response = roundtrip(
        &mut stream,
        &Request::GetUserApps(GetUserAppsRequest { uid }),
    )
    .await;
    assert_eq!(
        response,
        Response::UserApps(AppIdsReply {
            app_ids: vec!["app1".to_string(), "app2".to_string()]
        })
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_request_closes_the_connection() {
    let dir = TempDir::new().expect("temp dir");
    let (_manager, socket) = start_daemon(&dir);
    let mut stream = UnixStream::connect(&socket).await.expect("connect");

    let frame = encode_frame(&[0xFF, 1, 2, 3]).expect("encode frame");
    stream.write_all(&frame).await.expect("write");

    // No response; the daemon shuts the connection down.
    assert!(read_response(&mut stream).await.is_none());

    // Other connections keep working.
    let mut fresh = UnixStream::connect(&socket).await.expect("connect");
    let response = roundtrip(
        &mut fresh,
        &Request::GetUserApps(GetUserAppsRequest { uid: own_uid() }),
    )
    .await;
    assert_eq!(response, Response::UserApps(AppIdsReply { app_ids: vec![] }));
}

#[tokio::test(flavor = "multi_thread")]
async fn uid_policy_is_enforced_from_peer_credentials() {
    let dir = TempDir::new().expect("temp dir");
    let (_manager, socket) = start_daemon(&dir);
    let mut stream = UnixStream::connect(&socket).await.expect("connect");

    let foreign_uid = own_uid() + 1;
    let response = roundtrip(
        &mut stream,
        &install_request("app1", "pkgA", foreign_uid, &[]),
    )
    .await;

    if own_uid() == 0 {
        // Root may install for any uid.
        assert_eq!(response, Response::AppInstall);
    } else {
        assert_eq!(response, Response::error(StatusCode::AccessDenied));
    }

    // An error reply is not a protocol violation: the connection stays open.
    let response = roundtrip(
        &mut stream,
        &Request::GetUserApps(GetUserAppsRequest { uid: own_uid() }),
    )
    .await;
    assert_eq!(response, Response::UserApps(AppIdsReply { app_ids: vec![] }));
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_removes_socket_files() {
    let dir = TempDir::new().expect("temp dir");
    let (mut manager, socket) = start_daemon(&dir);
    assert!(socket.exists());

    manager.shutdown();
    assert!(!socket.exists());
}
