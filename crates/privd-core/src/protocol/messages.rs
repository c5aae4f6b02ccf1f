//! Protocol message types for the privilege-manager service.
//!
//! A frame payload is one [`MessageTag`] byte followed by a bincode-encoded
//! body. Responses reuse the tag of the request they answer; tag 0 is the
//! status envelope used for every error reply, so clients can always decode
//! a failure without knowing which request produced it.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::error::{ProtocolError, ProtocolResult};

/// Message type tags for request/response routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageTag {
    /// Status/error envelope (responses only).
    Status             = 0,
    /// Install an application with its privilege set.
    AppInstall         = 1,
    /// Uninstall an application.
    AppUninstall       = 2,
    /// Resolve the package owning an application.
    GetPkgId           = 3,
    /// List privileges granted to an application for a uid.
    GetAppPrivileges   = 4,
    /// List privileges granted to any app of a package for a uid.
    GetPkgPrivileges   = 5,
    /// List all applications installed for a uid.
    GetUserApps        = 6,
    /// List all applications belonging to a package.
    GetAppsInPkg       = 7,
    /// List OS groups implied by a privilege.
    GetPrivilegeGroups = 8,
}

impl MessageTag {
    /// Attempts to parse a message tag from its wire byte.
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Status),
            1 => Some(Self::AppInstall),
            2 => Some(Self::AppUninstall),
            3 => Some(Self::GetPkgId),
            4 => Some(Self::GetAppPrivileges),
            5 => Some(Self::GetPkgPrivileges),
            6 => Some(Self::GetUserApps),
            7 => Some(Self::GetAppsInPkg),
            8 => Some(Self::GetPrivilegeGroups),
            _ => None,
        }
    }

    /// Returns the wire byte for this message type.
    #[must_use]
    pub const fn tag(self) -> u8 {
        self as u8
    }
}

/// Outcome of a request, carried in every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusCode {
    /// Request succeeded.
    Success,
    /// The named app/package/privilege does not exist. Not a daemon fault.
    NotFound,
    /// Caller credentials do not permit the requested operation.
    AccessDenied,
    /// The store or daemon failed while processing the request.
    InternalError,
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

/// Install (or re-install) an application and replace its privilege set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInstallRequest {
    /// Application identifier, unique within `uid`.
    pub app_id: String,
    /// Package the application belongs to.
    pub pkg_id: String,
    /// User the application is installed for.
    pub uid: u32,
    /// Complete new privilege set for the application.
    pub privileges: Vec<String>,
}

/// Uninstall an application for a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppUninstallRequest {
    /// Application identifier.
    pub app_id: String,
    /// User the application is removed for.
    pub uid: u32,
}

/// Resolve the package id owning an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetPkgIdRequest {
    /// Application identifier.
    pub app_id: String,
}

/// List privileges of one application for a uid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetAppPrivilegesRequest {
    /// Application identifier.
    pub app_id: String,
    /// User scope.
    pub uid: u32,
}

/// List privileges granted to any application of a package for a uid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetPkgPrivilegesRequest {
    /// Package identifier.
    pub pkg_id: String,
    /// User scope.
    pub uid: u32,
}

/// List all application ids installed for a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetUserAppsRequest {
    /// User scope.
    pub uid: u32,
}

/// List all application ids belonging to a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetAppsInPkgRequest {
    /// Package identifier.
    pub pkg_id: String,
}

/// List OS group names implied by a privilege.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetPrivilegeGroupsRequest {
    /// Privilege name.
    pub privilege: String,
}

/// A decoded client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Install an application.
    AppInstall(AppInstallRequest),
    /// Uninstall an application.
    AppUninstall(AppUninstallRequest),
    /// Resolve owning package.
    GetPkgId(GetPkgIdRequest),
    /// List app privileges.
    GetAppPrivileges(GetAppPrivilegesRequest),
    /// List package privileges.
    GetPkgPrivileges(GetPkgPrivilegesRequest),
    /// List a user's apps.
    GetUserApps(GetUserAppsRequest),
    /// List a package's apps.
    GetAppsInPkg(GetAppsInPkgRequest),
    /// List a privilege's groups.
    GetPrivilegeGroups(GetPrivilegeGroupsRequest),
}

impl Request {
    /// Returns the wire tag for this request.
    #[must_use]
    pub const fn tag(&self) -> MessageTag {
        match self {
            Self::AppInstall(_) => MessageTag::AppInstall,
            Self::AppUninstall(_) => MessageTag::AppUninstall,
            Self::GetPkgId(_) => MessageTag::GetPkgId,
            Self::GetAppPrivileges(_) => MessageTag::GetAppPrivileges,
            Self::GetPkgPrivileges(_) => MessageTag::GetPkgPrivileges,
            Self::GetUserApps(_) => MessageTag::GetUserApps,
            Self::GetAppsInPkg(_) => MessageTag::GetAppsInPkg,
            Self::GetPrivilegeGroups(_) => MessageTag::GetPrivilegeGroups,
        }
    }

    /// Decode a request from a frame payload (tag byte + body).
    ///
    /// # Errors
    ///
    /// Returns a protocol-violation error on an empty payload, an unknown or
    /// response-only tag, or an undecodable body.
    pub fn decode(payload: &[u8]) -> ProtocolResult<Self> {
        let (&tag, body) = payload
            .split_first()
            .ok_or(ProtocolError::EmptyFrame)?;
        let tag = MessageTag::from_tag(tag).ok_or(ProtocolError::UnknownMessageTag { tag })?;
        match tag {
            // The status envelope only flows daemon -> client.
            MessageTag::Status => Err(ProtocolError::UnknownMessageTag { tag: tag.tag() }),
            MessageTag::AppInstall => Ok(Self::AppInstall(decode_body(body)?)),
            MessageTag::AppUninstall => Ok(Self::AppUninstall(decode_body(body)?)),
            MessageTag::GetPkgId => Ok(Self::GetPkgId(decode_body(body)?)),
            MessageTag::GetAppPrivileges => Ok(Self::GetAppPrivileges(decode_body(body)?)),
            MessageTag::GetPkgPrivileges => Ok(Self::GetPkgPrivileges(decode_body(body)?)),
            MessageTag::GetUserApps => Ok(Self::GetUserApps(decode_body(body)?)),
            MessageTag::GetAppsInPkg => Ok(Self::GetAppsInPkg(decode_body(body)?)),
            MessageTag::GetPrivilegeGroups => Ok(Self::GetPrivilegeGroups(decode_body(body)?)),
        }
    }

    /// Encode this request to a frame payload (tag byte + body).
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Encode`] if serialization fails.
    pub fn encode(&self) -> ProtocolResult<Bytes> {
        match self {
            Self::AppInstall(body) => encode_tagged(self.tag(), body),
            Self::AppUninstall(body) => encode_tagged(self.tag(), body),
            Self::GetPkgId(body) => encode_tagged(self.tag(), body),
            Self::GetAppPrivileges(body) => encode_tagged(self.tag(), body),
            Self::GetPkgPrivileges(body) => encode_tagged(self.tag(), body),
            Self::GetUserApps(body) => encode_tagged(self.tag(), body),
            Self::GetAppsInPkg(body) => encode_tagged(self.tag(), body),
            Self::GetPrivilegeGroups(body) => encode_tagged(self.tag(), body),
        }
    }
}

// ---------------------------------------------------------------------------
// Response bodies
// ---------------------------------------------------------------------------

/// Status envelope carried under [`MessageTag::Status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReply {
    /// Outcome code.
    pub code: StatusCode,
}

/// Successful uninstall reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppUninstallReply {
    /// `true` when the removed app was the last one in its package and the
    /// package row was removed with it.
    pub pkg_id_is_no_more: bool,
}

/// Successful package-resolution reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkgIdReply {
    /// Owning package id.
    pub pkg_id: String,
}

/// Privilege-name list reply, deduplicated and lexicographically sorted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivilegesReply {
    /// Privilege names.
    pub privileges: Vec<String>,
}

/// Application-id list reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppIdsReply {
    /// Application ids.
    pub app_ids: Vec<String>,
}

/// Group-name list reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupsReply {
    /// OS group names.
    pub groups: Vec<String>,
}

/// A daemon response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Error or bare-status reply (wire tag 0).
    Status(StatusReply),
    /// Successful install (bare success under the request's tag).
    AppInstall,
    /// Successful uninstall.
    AppUninstall(AppUninstallReply),
    /// Package id for an app.
    PkgId(PkgIdReply),
    /// App privilege list.
    AppPrivileges(PrivilegesReply),
    /// Package privilege list.
    PkgPrivileges(PrivilegesReply),
    /// A user's app ids.
    UserApps(AppIdsReply),
    /// A package's app ids.
    AppsInPkg(AppIdsReply),
    /// A privilege's group names.
    PrivilegeGroups(GroupsReply),
}

impl Response {
    /// Shorthand for an error envelope.
    #[must_use]
    pub const fn error(code: StatusCode) -> Self {
        Self::Status(StatusReply { code })
    }

    /// Encode this response to a frame payload (tag byte + body).
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Encode`] if serialization fails.
    pub fn encode(&self) -> ProtocolResult<Bytes> {
        match self {
            Self::Status(body) => encode_tagged(MessageTag::Status, body),
            Self::AppInstall => encode_tagged(
                MessageTag::AppInstall,
                &StatusReply {
                    code: StatusCode::Success,
                },
            ),
            Self::AppUninstall(body) => encode_tagged(MessageTag::AppUninstall, body),
            Self::PkgId(body) => encode_tagged(MessageTag::GetPkgId, body),
            Self::AppPrivileges(body) => encode_tagged(MessageTag::GetAppPrivileges, body),
            Self::PkgPrivileges(body) => encode_tagged(MessageTag::GetPkgPrivileges, body),
            Self::UserApps(body) => encode_tagged(MessageTag::GetUserApps, body),
            Self::AppsInPkg(body) => encode_tagged(MessageTag::GetAppsInPkg, body),
            Self::PrivilegeGroups(body) => encode_tagged(MessageTag::GetPrivilegeGroups, body),
        }
    }

    /// Decode a response from a frame payload.
    ///
    /// Used by clients and tests; the daemon never decodes responses.
    ///
    /// # Errors
    ///
    /// Returns a protocol-violation error on an unknown tag or undecodable
    /// body.
    pub fn decode(payload: &[u8]) -> ProtocolResult<Self> {
        let (&tag, body) = payload
            .split_first()
            .ok_or(ProtocolError::EmptyFrame)?;
        let tag = MessageTag::from_tag(tag).ok_or(ProtocolError::UnknownMessageTag { tag })?;
        match tag {
            MessageTag::Status => Ok(Self::Status(decode_body(body)?)),
            MessageTag::AppInstall => {
                let reply: StatusReply = decode_body(body)?;
                match reply.code {
                    StatusCode::Success => Ok(Self::AppInstall),
                    code => Ok(Self::Status(StatusReply { code })),
                }
            }
            MessageTag::AppUninstall => Ok(Self::AppUninstall(decode_body(body)?)),
            MessageTag::GetPkgId => Ok(Self::PkgId(decode_body(body)?)),
            MessageTag::GetAppPrivileges => Ok(Self::AppPrivileges(decode_body(body)?)),
            MessageTag::GetPkgPrivileges => Ok(Self::PkgPrivileges(decode_body(body)?)),
            MessageTag::GetUserApps => Ok(Self::UserApps(decode_body(body)?)),
            MessageTag::GetAppsInPkg => Ok(Self::AppsInPkg(decode_body(body)?)),
            MessageTag::GetPrivilegeGroups => Ok(Self::PrivilegeGroups(decode_body(body)?)),
        }
    }
}

fn encode_tagged<T: Serialize>(tag: MessageTag, body: &T) -> ProtocolResult<Bytes> {
    let encoded = bincode::serialize(body).map_err(|e| ProtocolError::encode(e.to_string()))?;
    let mut buf = Vec::with_capacity(1 + encoded.len());
    buf.push(tag.tag());
    buf.extend_from_slice(&encoded);
    Ok(Bytes::from(buf))
}

fn decode_body<'a, T: Deserialize<'a>>(body: &'a [u8]) -> ProtocolResult<T> {
    bincode::deserialize(body).map_err(|e| ProtocolError::decode(e.to_string()))
}
