use tracing::warn;

use crate::classifier::{ClassificationClient, ModelBackend, STANDARD_DEPARTMENTS};
use crate::error::ClassificationError;
use crate::matcher::DepartmentMatcher;
use crate::models::ClassificationResult;

/// What the report-creation path hands to classification.
#[derive(Debug, Clone)]
pub struct ClassificationRequest {
    pub title: String,
    pub description: String,
    pub known_departments: Vec<String>,
}

/// Single entry point for classification. Never fails: errors become the fallback result.
pub struct Orchestrator<B> {
    client: ClassificationClient<B>,
    matcher: DepartmentMatcher,
}

impl<B: ModelBackend> Orchestrator<B> {
    pub fn new(client: ClassificationClient<B>, matcher: DepartmentMatcher) -> Self {
        Self { client, matcher }
    }

    pub async fn classify(&self, request: &ClassificationRequest) -> ClassificationResult {
        self.judge(request)
            .await
            .unwrap_or_else(ClassificationResult::fallback)
    }

    /// The model's judgment, or `None` when no model produced one.
    ///
    /// An empty department list means the county has no catalog yet; the
    /// standard departments are then offered to the model and to the matcher alike.
    pub async fn judge(&self, request: &ClassificationRequest) -> Option<ClassificationResult> {
        if request.title.trim().is_empty() || request.description.trim().is_empty() {
            return None;
        }

        let known_departments: Vec<String> = if request.known_departments.is_empty() {
            STANDARD_DEPARTMENTS.iter().map(|name| name.to_string()).collect()
        } else {
            request.known_departments.clone()
        };

        let raw = match self
            .client
            .classify(&request.title, &request.description, &known_departments)
            .await
        {
            Ok(raw) => raw,
            Err(error @ ClassificationError::Exhausted { .. })
            | Err(error @ ClassificationError::DeadlineExceeded(_)) => {
                warn!(error = %error, "classification unavailable, report stays unclassified");
                return None;
            }
            Err(error) => {
                warn!(error = %error, "unexpected classification failure, report stays unclassified");
                return None;
            }
        };

        let predicted_department = self
            .matcher
            .resolve(raw.predicted_department.as_deref(), &known_departments);
        if raw.predicted_department.is_some() && predicted_department.is_none() {
            warn!(
                guess = raw.predicted_department.as_deref().unwrap_or_default(),
                "model department does not match any known department"
            );
        }

        Some(ClassificationResult {
            verified: raw.verified,
            confidence: clamp_confidence(raw.confidence),
            predicted_department,
            predicted_county: raw.predicted_county,
        })
    }
}

pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
