//! Access-control boundary consumed by the transport handlers: an authentication oracle and a
//! permission oracle, composed into a single `checkGitService` gate evaluated once per request.

use async_trait::async_trait;

use crate::protocol::types::{ProtocolError, ServiceType};

/// Permission hierarchy: `None < Read < Write < Admin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PermissionLevel {
    None,
    Read,
    Write,
    Admin,
}

/// Result of an authentication attempt.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    pub authenticated: bool,
    pub user_id: Option<String>,
    pub teams: Vec<String>,
    pub is_admin: bool,
}

/// Resolves raw request credentials into an [`AuthContext`]. Left abstract so embedders can back
/// it with whatever session/token store they use.
#[async_trait]
pub trait AuthOracle: Send + Sync {
    async fn resolve_auth(
        &self,
        headers: &std::collections::HashMap<String, String>,
    ) -> Result<AuthContext, ProtocolError>;
}

/// Resolves a user's effective permission level on a repository. Left abstract so embedders can
/// back it with whatever team/org model they use.
#[async_trait]
pub trait PermissionOracle: Send + Sync {
    async fn effective_permission(
        &self,
        user_id: Option<&str>,
        teams: &[String],
        repo_id: &str,
    ) -> Result<PermissionLevel, ProtocolError>;
}

/// The minimum permission level a Git service requires.
pub fn required_level(service: ServiceType) -> PermissionLevel {
    match service {
        ServiceType::UploadPack => PermissionLevel::Read,
        ServiceType::ReceivePack => PermissionLevel::Write,
    }
}

/// Gate decision returned by [`check_git_service`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied(String),
}

/// Check whether `auth` may perform `service` against `repo_id`, consulting `permissions` for
/// the effective level. Called once per transport handler invocation; per-ref policy (branch
/// protection) is evaluated separately inside the push pipeline.
pub async fn check_git_service(
    permissions: &dyn PermissionOracle,
    auth: &AuthContext,
    repo_id: &str,
    service: ServiceType,
) -> Result<Decision, ProtocolError> {
    if !auth.authenticated {
        return Ok(Decision::Denied("authentication required".to_string()));
    }

    if auth.is_admin {
        return Ok(Decision::Allowed);
    }

    let level = permissions
        .effective_permission(auth.user_id.as_deref(), &auth.teams, repo_id)
        .await?;
    let needed = required_level(service);

    if level >= needed {
        Ok(Decision::Allowed)
    } else {
        Ok(Decision::Denied(format!(
            "{service} requires {needed:?}, caller has {level:?}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedPermission(PermissionLevel);

    #[async_trait]
    impl PermissionOracle for FixedPermission {
        async fn effective_permission(
            &self,
            _user_id: Option<&str>,
            _teams: &[String],
            _repo_id: &str,
        ) -> Result<PermissionLevel, ProtocolError> {
            Ok(self.0)
        }
    }

    #[tokio::test]
    async fn unauthenticated_is_denied() {
        let oracle = FixedPermission(PermissionLevel::Admin);
        let auth = AuthContext::default();
        let decision = check_git_service(&oracle, &auth, "org/repo", ServiceType::UploadPack)
            .await
            .unwrap();
        assert_eq!(decision, Decision::Denied("authentication required".to_string()));
    }

    #[tokio::test]
    async fn read_permission_allows_fetch_but_not_push() {
        let oracle = FixedPermission(PermissionLevel::Read);
        let auth = AuthContext {
            authenticated: true,
            user_id: Some("alice".to_string()),
            ..Default::default()
        };
        assert_eq!(
            check_git_service(&oracle, &auth, "org/repo", ServiceType::UploadPack)
                .await
                .unwrap(),
            Decision::Allowed
        );
        assert!(matches!(
            check_git_service(&oracle, &auth, "org/repo", ServiceType::ReceivePack)
                .await
                .unwrap(),
            Decision::Denied(_)
        ));
    }

    #[tokio::test]
    async fn admin_flag_bypasses_permission_oracle() {
        let oracle = FixedPermission(PermissionLevel::None);
        let auth = AuthContext {
            authenticated: true,
            is_admin: true,
            ..Default::default()
        };
        assert_eq!(
            check_git_service(&oracle, &auth, "org/repo", ServiceType::ReceivePack)
                .await
                .unwrap(),
            Decision::Allowed
        );
    }
}
