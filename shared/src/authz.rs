use crate::error::AppError;
use crate::types::{User, UserRole};

/// Capabilities gating the workflow operations. Each one is a fixed
/// predicate over the user's role; the full matrix lives in
/// `allowed_roles` so it can be audited in one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    CreateProject,
    AddSample,
    ViewAnalytics,
    SubmitAnnotation,
    ReviewAnnotation,
    Authenticated,
}

pub fn allowed_roles(capability: Capability) -> &'static [UserRole] {
    match capability {
        Capability::CreateProject | Capability::AddSample | Capability::ViewAnalytics => {
            &[UserRole::Admin]
        }
        // Narrow gates: admins and reviewers do not annotate, admins and
        // annotators do not review.
        Capability::SubmitAnnotation => &[UserRole::Annotator],
        Capability::ReviewAnnotation => &[UserRole::Reviewer],
        Capability::Authenticated => &[UserRole::Admin, UserRole::Annotator, UserRole::Reviewer],
    }
}

/// Check that an authenticated user holds a capability. Denials are
/// logged with the held and required roles and surface as Forbidden.
pub fn require_capability(user: &User, capability: Capability) -> Result<(), AppError> {
    let allowed = allowed_roles(capability);
    if allowed.contains(&user.role) {
        return Ok(());
    }

    let required: Vec<&str> = allowed.iter().map(|r| r.as_str()).collect();
    tracing::warn!(
        "user {} with role {} denied {:?} (requires: {})",
        user.user_id,
        user.role,
        capability,
        required.join(", ")
    );
    Err(AppError::Forbidden(format!(
        "Operation requires one of the following roles: {}",
        required.join(", ")
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: UserRole) -> User {
        User {
            user_id: "u-1".to_string(),
            email: "u@example.com".to_string(),
            password_hash: String::new(),
            role,
            created_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn admin_only_capabilities() {
        for cap in [
            Capability::CreateProject,
            Capability::AddSample,
            Capability::ViewAnalytics,
        ] {
            assert!(require_capability(&user(UserRole::Admin), cap).is_ok());
            assert!(require_capability(&user(UserRole::Annotator), cap).is_err());
            assert!(require_capability(&user(UserRole::Reviewer), cap).is_err());
        }
    }

    #[test]
    fn annotate_gate_excludes_admin_and_reviewer() {
        assert!(require_capability(&user(UserRole::Annotator), Capability::SubmitAnnotation).is_ok());
        assert!(require_capability(&user(UserRole::Admin), Capability::SubmitAnnotation).is_err());
        assert!(require_capability(&user(UserRole::Reviewer), Capability::SubmitAnnotation).is_err());
    }

    #[test]
    fn review_gate_excludes_admin_and_annotator() {
        assert!(require_capability(&user(UserRole::Reviewer), Capability::ReviewAnnotation).is_ok());
        assert!(require_capability(&user(UserRole::Admin), Capability::ReviewAnnotation).is_err());
        assert!(require_capability(&user(UserRole::Annotator), Capability::ReviewAnnotation).is_err());
    }

    #[test]
    fn authenticated_accepts_every_role() {
        for role in [UserRole::Admin, UserRole::Annotator, UserRole::Reviewer] {
            assert!(require_capability(&user(role), Capability::Authenticated).is_ok());
        }
    }

    #[test]
    fn denial_names_required_roles() {
        let err = require_capability(&user(UserRole::Annotator), Capability::CreateProject)
            .unwrap_err();
        assert!(err.to_string().contains("admin"));
    }
}
