use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::ReportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Submitted,
    Verified,
    Pending,
    Noted,
    OnProgress,
    Resolved,
    Rejected,
    Deleted,
}

impl ReportStatus {
    pub const ALL: [ReportStatus; 8] = [
        ReportStatus::Submitted,
        ReportStatus::Verified,
        ReportStatus::Pending,
        ReportStatus::Noted,
        ReportStatus::OnProgress,
        ReportStatus::Resolved,
        ReportStatus::Rejected,
        ReportStatus::Deleted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ReportStatus::Submitted => "submitted",
            ReportStatus::Verified => "verified",
            ReportStatus::Pending => "pending",
            ReportStatus::Noted => "noted",
            ReportStatus::OnProgress => "on_progress",
            ReportStatus::Resolved => "resolved",
            ReportStatus::Rejected => "rejected",
            ReportStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportStatus {
    type Err = ReportError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ReportStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| ReportError::InvalidStatus(value.to_string()))
    }
}

/// Account role, snapshotted onto each report at submission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Citizen,
    Viewer,
    #[value(name = "county_official")]
    CountyOfficial,
    Admin,
    Superadmin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Citizen => "citizen",
            Role::Viewer => "viewer",
            Role::CountyOfficial => "county_official",
            Role::Admin => "admin",
            Role::Superadmin => "superadmin",
        }
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "citizen" => Ok(Role::Citizen),
            "viewer" => Ok(Role::Viewer),
            "county_official" => Ok(Role::CountyOfficial),
            "admin" => Ok(Role::Admin),
            "superadmin" => Ok(Role::Superadmin),
            other => anyhow::bail!("unknown role '{other}'"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reporter {
    pub id: Uuid,
    pub role: Role,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Location {
    pub county: Option<String>,
    pub subcounty: Option<String>,
    pub ward: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Everything a citizen submits, before validation and classification.
#[derive(Debug, Clone)]
pub struct ReportDraft {
    pub title: String,
    pub description: String,
    pub location: Location,
    pub reporter: Reporter,
    pub images: Vec<ImageUpload>,
}

/// A photo named on submission, not yet stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub path: String,
    pub caption: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportImage {
    pub id: Uuid,
    pub path: String,
    pub caption: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

/// A county-specific department office that reports can be routed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepartmentRef {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GovernmentResponse {
    pub text: String,
    pub official_id: Uuid,
    pub responded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub reporter_id: Uuid,
    pub role_at_submission: Role,
    pub location: Location,
    pub department: Option<DepartmentRef>,
    pub status: ReportStatus,
    pub verified_by_ai: bool,
    pub ai_confidence: Option<f64>,
    pub ai_predicted_county: Option<String>,
    /// At least one photo accompanied the submission.
    pub image_required_passed: bool,
    pub images: Vec<ReportImage>,
    pub response: Option<GovernmentResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<Uuid>,
}

/// Outcome of one classification call. Never persisted on its own.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub verified: bool,
    pub confidence: f64,
    pub predicted_department: Option<String>,
    pub predicted_county: Option<String>,
}

impl ClassificationResult {
    pub fn fallback() -> Self {
        Self {
            verified: false,
            confidence: 0.0,
            predicted_department: None,
            predicted_county: None,
        }
    }

    /// Second gate: the model's own `verified` flag is only trusted above the threshold.
    pub fn auto_verifies(&self, threshold: f64) -> bool {
        self.verified && self.confidence >= threshold
    }
}
