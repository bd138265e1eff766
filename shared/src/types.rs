use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ========== ENUMS ==========

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Annotator,
    Reviewer,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Annotator => "annotator",
            UserRole::Reviewer => "reviewer",
        }
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(UserRole::Admin),
            "annotator" => Ok(UserRole::Annotator),
            "reviewer" => Ok(UserRole::Reviewer),
            other => Err(format!("invalid user role '{}'", other)),
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SampleStatus {
    Pending,
    Annotated,
    Reviewed,
}

impl SampleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleStatus::Pending => "pending",
            SampleStatus::Annotated => "annotated",
            SampleStatus::Reviewed => "reviewed",
        }
    }
}

impl FromStr for SampleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SampleStatus::Pending),
            "annotated" => Ok(SampleStatus::Annotated),
            "reviewed" => Ok(SampleStatus::Reviewed),
            other => Err(format!("invalid sample status '{}'", other)),
        }
    }
}

impl fmt::Display for SampleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationLabel {
    Positive,
    Negative,
    Neutral,
}

impl AnnotationLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnnotationLabel::Positive => "positive",
            AnnotationLabel::Negative => "negative",
            AnnotationLabel::Neutral => "neutral",
        }
    }
}

impl FromStr for AnnotationLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "positive" => Ok(AnnotationLabel::Positive),
            "negative" => Ok(AnnotationLabel::Negative),
            "neutral" => Ok(AnnotationLabel::Neutral),
            other => Err(format!("invalid annotation label '{}'", other)),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
    Approved,
    Rejected,
}

impl ReviewDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewDecision::Approved => "approved",
            ReviewDecision::Rejected => "rejected",
        }
    }
}

impl FromStr for ReviewDecision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approved" => Ok(ReviewDecision::Approved),
            "rejected" => Ok(ReviewDecision::Rejected),
            other => Err(format!("invalid review decision '{}'", other)),
        }
    }
}

impl fmt::Display for ReviewDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ========== USER ==========

#[derive(Debug, Serialize, Clone)]
pub struct User {
    pub user_id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: UserRole,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub role: Option<UserRole>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyTokenRequest {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<UserRole>,
}

// ========== PROJECT ==========

#[derive(Debug, Serialize, Clone)]
pub struct Project {
    pub project_id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_by: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProjectRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Serialize, Default, PartialEq)]
pub struct ProjectStats {
    pub total_samples: u64,
    pub pending_samples: u64,
    pub annotated_samples: u64,
    pub reviewed_samples: u64,
}

// ========== DATA SAMPLE ==========

#[derive(Debug, Serialize, Clone)]
pub struct DataSample {
    pub sample_id: String,
    pub project_id: String,
    pub text_content: String,
    pub status: SampleStatus,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateSampleRequest {
    pub project_id: String,
    pub text_content: String,
}

// Status is deliberately absent: the workflow engine is the only status
// writer.
#[derive(Debug, Deserialize)]
pub struct UpdateSampleRequest {
    pub text_content: Option<String>,
}

// ========== ANNOTATION ==========

#[derive(Debug, Serialize, Clone)]
pub struct Annotation {
    pub annotation_id: String,
    pub sample_id: String,
    pub annotator_id: String,
    pub label: AnnotationLabel,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateAnnotationRequest {
    pub sample_id: String,
    pub label: AnnotationLabel,
}

// ========== REVIEW ==========

#[derive(Debug, Serialize, Clone)]
pub struct Review {
    pub review_id: String,
    pub annotation_id: String,
    pub reviewer_id: String,
    pub decision: ReviewDecision,
    pub feedback: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateReviewRequest {
    pub annotation_id: String,
    pub decision: ReviewDecision,
    pub feedback: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    pub annotation_id: String,
    pub feedback: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub annotation_id: String,
    pub feedback: String,
}

// ========== ANALYTICS ==========

#[derive(Debug, Serialize, PartialEq)]
pub struct AnalyticsResponse {
    pub total_samples: u64,
    pub pending_samples: u64,
    pub annotated_samples: u64,
    pub reviewed_samples: u64,
    pub approval_rate: f64,
    pub rejection_rate: f64,
    pub annotator_contribution_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enums_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&UserRole::Admin).unwrap(), "\"admin\"");
        assert_eq!(
            serde_json::to_string(&SampleStatus::Annotated).unwrap(),
            "\"annotated\""
        );
        assert_eq!(
            serde_json::to_string(&AnnotationLabel::Neutral).unwrap(),
            "\"neutral\""
        );
        assert_eq!(
            serde_json::to_string(&ReviewDecision::Rejected).unwrap(),
            "\"rejected\""
        );
    }

    #[test]
    fn enum_parse_round_trips() {
        for role in [UserRole::Admin, UserRole::Annotator, UserRole::Reviewer] {
            assert_eq!(role.as_str().parse::<UserRole>().unwrap(), role);
        }
        for status in [
            SampleStatus::Pending,
            SampleStatus::Annotated,
            SampleStatus::Reviewed,
        ] {
            assert_eq!(status.as_str().parse::<SampleStatus>().unwrap(), status);
        }
        for decision in [ReviewDecision::Approved, ReviewDecision::Rejected] {
            assert_eq!(
                decision.as_str().parse::<ReviewDecision>().unwrap(),
                decision
            );
        }
    }

    #[test]
    fn unknown_enum_values_rejected() {
        assert!("superadmin".parse::<UserRole>().is_err());
        assert!("archived".parse::<SampleStatus>().is_err());
        assert!("maybe".parse::<AnnotationLabel>().is_err());
        assert!("deferred".parse::<ReviewDecision>().is_err());
        assert!(serde_json::from_str::<SampleStatus>("\"archived\"").is_err());
    }

    #[test]
    fn user_serialization_excludes_password_hash() {
        let user = User {
            user_id: "u-1".to_string(),
            email: "a@b.c".to_string(),
            password_hash: "secret-hash".to_string(),
            role: UserRole::Annotator,
            created_at: "2026-01-01T00:00:00Z".to_string(),
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("secret-hash"));
        assert!(json.contains("a@b.c"));
    }
}
