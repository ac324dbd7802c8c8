//! Which RPCs a connection may reach, decided by the TLS server name.
//!
//! The controller serves two TLS identities on one port. A node without
//! credentials dials the enrollment name and may only ask for credentials; an
//! enrolled node dials the production name with its client certificate.
//!
//! | Server name | Allowed methods |
//! |---|---|
//! | enrollment | [`REQUEST_CREDENTIALS_METHOD`] only |
//! | production | all |
//! | anything else | none |

use thiserror::Error;

/// Server name for nodes that already hold credentials.
pub const PRODUCTION_SERVER_NAME: &str = "v1.community.controller.mec";

/// Server name for nodes requesting credentials.
pub const ENROLLMENT_SERVER_NAME: &str = "v1.enroll.community.controller.mec";

/// Full gRPC method path of the credential request.
pub const REQUEST_CREDENTIALS_METHOD: &str = "/openness.auth.AuthService/RequestCredentials";

/// Trust gate rejections.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("missing TLS server name in peer info")]
    MissingServerName,

    #[error("unexpected server name: {0}")]
    UnexpectedServerName(String),

    #[error("unauthorized RPC: {0}")]
    MethodNotAllowed(String),
}

impl GateError {
    /// True when the request never reached the point of carrying a server name,
    /// as opposed to carrying one that is refused.
    pub fn is_precondition(&self) -> bool {
        matches!(self, GateError::MissingServerName)
    }
}

/// The pair of server names the controller answers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerNames {
    pub production: String,
    pub enrollment: String,
}

impl Default for ServerNames {
    fn default() -> Self {
        Self {
            production: PRODUCTION_SERVER_NAME.to_string(),
            enrollment: ENROLLMENT_SERVER_NAME.to_string(),
        }
    }
}

/// Identity of a channel, resolved from its server name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelIdentity {
    Enrollment,
    Production,
}

impl ChannelIdentity {
    pub fn from_server_name(
        server_name: Option<&str>,
        names: &ServerNames,
    ) -> Result<Self, GateError> {
        let name = server_name.ok_or(GateError::MissingServerName)?;
        // DNS names compare case-insensitively.
        if name.eq_ignore_ascii_case(&names.production) {
            Ok(ChannelIdentity::Production)
        } else if name.eq_ignore_ascii_case(&names.enrollment) {
            Ok(ChannelIdentity::Enrollment)
        } else {
            Err(GateError::UnexpectedServerName(name.to_string()))
        }
    }

    pub fn permits(&self, method: &str) -> bool {
        match self {
            ChannelIdentity::Production => true,
            ChannelIdentity::Enrollment => method == REQUEST_CREDENTIALS_METHOD,
        }
    }
}

/// Per-call authorization policy.
#[derive(Debug, Clone, Default)]
pub struct TrustGate {
    names: ServerNames,
}

impl TrustGate {
    pub fn new(names: ServerNames) -> Self {
        Self { names }
    }

    /// Decide whether `method` may run on a channel negotiated with `server_name`.
    pub fn check(
        &self,
        server_name: Option<&str>,
        method: &str,
    ) -> Result<ChannelIdentity, GateError> {
        let identity = ChannelIdentity::from_server_name(server_name, &self.names)?;
        if !identity.permits(method) {
            return Err(GateError::MethodNotAllowed(method.to_string()));
        }
        Ok(identity)
    }
}
