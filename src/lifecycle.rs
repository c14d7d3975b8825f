use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::classifier::ModelBackend;
use crate::error::ReportError;
use crate::models::{
    ClassificationResult, DepartmentRef, GovernmentResponse, Report, ReportDraft, ReportImage,
    ReportStatus,
};
use crate::orchestrator::{ClassificationRequest, Orchestrator};

pub const MIN_TITLE_CHARS: usize = 5;
pub const MIN_DESCRIPTION_CHARS: usize = 10;
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif"];

/// Whether the normal workflow permits `from -> to`.
pub fn allows_transition(from: ReportStatus, to: ReportStatus) -> bool {
    use ReportStatus::*;

    match (from, to) {
        (Deleted, _) => false,
        (_, Deleted) => true,
        (Submitted, Verified | Rejected) => true,
        (Verified, Pending | Noted | OnProgress | Resolved | Rejected) => true,
        (Pending | Noted | OnProgress, Pending | Noted | OnProgress | Resolved | Rejected) => {
            from != to
        }
        _ => false,
    }
}

/// Cheap checks that run before any external call.
pub fn validate_draft(draft: &ReportDraft) -> Result<(), ReportError> {
    if draft.title.trim().chars().count() < MIN_TITLE_CHARS {
        return Err(ReportError::validation(
            "title",
            format!("must be at least {MIN_TITLE_CHARS} characters"),
        ));
    }
    if draft.description.trim().chars().count() < MIN_DESCRIPTION_CHARS {
        return Err(ReportError::validation(
            "description",
            format!("must be at least {MIN_DESCRIPTION_CHARS} characters"),
        ));
    }
    if draft
        .location
        .county
        .as_deref()
        .map_or(true, |county| county.trim().is_empty())
    {
        return Err(ReportError::validation("county", "is required"));
    }
    if let Some(latitude) = draft.location.latitude {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(ReportError::validation("latitude", "must lie in [-90, 90]"));
        }
    }
    if let Some(longitude) = draft.location.longitude {
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(ReportError::validation("longitude", "must lie in [-180, 180]"));
        }
    }
    for image in draft.images.iter() {
        let extension = std::path::Path::new(image.path.trim())
            .extension()
            .and_then(|extension| extension.to_str())
            .map(str::to_ascii_lowercase);
        if !extension.is_some_and(|extension| IMAGE_EXTENSIONS.contains(&extension.as_str())) {
            return Err(ReportError::validation(
                "image",
                format!("'{}' is not a {} file", image.path, IMAGE_EXTENSIONS.join("/")),
            ));
        }
    }
    Ok(())
}

/// Validates the draft, classifies it, and returns the report ready to persist.
///
/// Classification problems never fail this call; the report simply stays
/// `submitted` and unverified.
pub async fn create<B: ModelBackend>(
    draft: ReportDraft,
    catalog: &[DepartmentRef],
    orchestrator: &Orchestrator<B>,
    confidence_threshold: f64,
) -> Result<Report, ReportError> {
    validate_draft(&draft)?;

    let request = ClassificationRequest {
        title: draft.title.trim().to_string(),
        description: draft.description.trim().to_string(),
        known_departments: catalog.iter().map(|entry| entry.name.clone()).collect(),
    };
    let judgment = orchestrator.judge(&request).await;

    let mut report = Report::from_draft(draft);
    report.apply_classification(judgment.as_ref(), catalog, confidence_threshold);
    info!(
        report_id = %report.id,
        status = %report.status,
        verified_by_ai = report.verified_by_ai,
        department = report.department.as_ref().map(|d| d.name.as_str()).unwrap_or("unassigned"),
        "report created"
    );
    Ok(report)
}

impl Report {
    pub fn from_draft(draft: ReportDraft) -> Self {
        let now = Utc::now();
        let mut location = draft.location;
        location.county = location.county.map(|county| county.trim().to_string());
        let images: Vec<ReportImage> = draft
            .images
            .into_iter()
            .map(|upload| ReportImage {
                id: Uuid::new_v4(),
                path: upload.path.trim().to_string(),
                caption: upload
                    .caption
                    .map(|caption| caption.trim().to_string())
                    .filter(|caption| !caption.is_empty()),
                uploaded_at: now,
            })
            .collect();

        Self {
            id: Uuid::new_v4(),
            title: draft.title.trim().to_string(),
            description: draft.description.trim().to_string(),
            reporter_id: draft.reporter.id,
            role_at_submission: draft.reporter.role,
            location,
            department: None,
            status: ReportStatus::Submitted,
            verified_by_ai: false,
            ai_confidence: None,
            ai_predicted_county: None,
            image_required_passed: !images.is_empty(),
            images,
            response: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            deleted_by: None,
        }
    }

    /// Copies a model judgment onto a freshly drafted report. `None` leaves it unclassified.
    pub fn apply_classification(
        &mut self,
        judgment: Option<&ClassificationResult>,
        catalog: &[DepartmentRef],
        confidence_threshold: f64,
    ) {
        let Some(result) = judgment else {
            return;
        };
        self.ai_confidence = Some(result.confidence);
        if result.auto_verifies(confidence_threshold) {
            self.verified_by_ai = true;
            self.status = ReportStatus::Verified;
        } else if result.verified {
            debug!(
                report_id = %self.id,
                confidence = result.confidence,
                threshold = confidence_threshold,
                "model verified report below confidence threshold"
            );
        }

        if let Some(name) = result.predicted_department.as_deref() {
            self.department = catalog.iter().find(|entry| entry.name == name).cloned();
        }

        self.ai_predicted_county = result.predicted_county.clone();
        if self.location.county.is_none() {
            self.location.county = result.predicted_county.clone();
        }
    }

    /// Forces `verified`; repeating the call with the same confidence changes nothing.
    pub fn mark_verified(&mut self, confidence: Option<f64>) -> Result<(), ReportError> {
        if self.status == ReportStatus::Deleted {
            return Err(ReportError::AlreadyDeleted);
        }
        if let Some(value) = confidence {
            if !(0.0..=1.0).contains(&value) {
                return Err(ReportError::validation("confidence", "must lie in [0, 1]"));
            }
        }

        let confidence = confidence.or(self.ai_confidence);
        if self.status == ReportStatus::Verified
            && self.verified_by_ai
            && self.ai_confidence == confidence
        {
            return Ok(());
        }

        self.status = ReportStatus::Verified;
        self.verified_by_ai = true;
        self.ai_confidence = confidence;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Workflow status change. Unknown values fail and leave the report untouched.
    pub fn mark_status(&mut self, value: &str) -> Result<ReportStatus, ReportError> {
        let next: ReportStatus = value.parse()?;
        if self.status == ReportStatus::Deleted {
            return Err(ReportError::AlreadyDeleted);
        }
        if next == self.status {
            return Ok(next);
        }
        if !allows_transition(self.status, next) {
            return Err(ReportError::TransitionNotAllowed {
                from: self.status,
                to: next,
            });
        }
        self.set_status(next);
        Ok(next)
    }

    /// Explicit override that skips the workflow table. Still cannot leave `deleted`.
    pub fn force_status(&mut self, value: &str) -> Result<ReportStatus, ReportError> {
        let next: ReportStatus = value.parse()?;
        if self.status == ReportStatus::Deleted {
            return Err(ReportError::AlreadyDeleted);
        }
        if next != self.status {
            info!(report_id = %self.id, from = %self.status, to = %next, "status override");
            self.set_status(next);
        }
        Ok(next)
    }

    pub fn soft_delete(&mut self, actor: Uuid) -> Result<(), ReportError> {
        if self.status == ReportStatus::Deleted {
            return Err(ReportError::AlreadyDeleted);
        }
        self.set_status(ReportStatus::Deleted);
        self.deleted_by = Some(actor);
        Ok(())
    }

    pub fn is_editable_by_reporter(&self) -> bool {
        self.status == ReportStatus::Submitted
    }

    /// Attaches an official response. Status is left for the caller to move.
    pub fn add_government_response(&mut self, text: &str, official: Uuid) -> Result<(), ReportError> {
        if self.status == ReportStatus::Deleted {
            return Err(ReportError::AlreadyDeleted);
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(ReportError::validation("response", "must not be empty"));
        }
        let now = Utc::now();
        self.response = Some(GovernmentResponse {
            text: text.to_string(),
            official_id: official,
            responded_at: now,
        });
        self.updated_at = now;
        Ok(())
    }

    fn set_status(&mut self, next: ReportStatus) {
        let now = Utc::now();
        self.status = next;
        self.updated_at = now;
        if next == ReportStatus::Deleted {
            self.deleted_at = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::tests::{test_config, Reply, ScriptedBackend};
    use crate::classifier::ClassificationClient;
    use crate::error::ClassificationError;
    use crate::matcher::DepartmentMatcher;
    use crate::models::{ImageUpload, Location, Reporter, Role};

    fn draft() -> ReportDraft {
        ReportDraft {
            title: "Pothole on Main St".to_string(),
            description: "Large pothole causing accidents near the market".to_string(),
            location: Location {
                county: Some("Nairobi".to_string()),
                ..Location::default()
            },
            reporter: Reporter {
                id: Uuid::new_v4(),
                role: Role::Citizen,
            },
            images: Vec::new(),
        }
    }

    fn catalog() -> Vec<DepartmentRef> {
        vec![
            DepartmentRef {
                id: Uuid::new_v4(),
                name: "Roads and Transport Department".to_string(),
            },
            DepartmentRef {
                id: Uuid::new_v4(),
                name: "Health Department".to_string(),
            },
        ]
    }

    fn orchestrator(replies: Vec<Reply>) -> Orchestrator<ScriptedBackend> {
        let client = ClassificationClient::new(ScriptedBackend::new(replies), &test_config());
        Orchestrator::new(client, DepartmentMatcher::default())
    }

    fn submitted_report() -> Report {
        Report::from_draft(draft())
    }

    fn verified_report() -> Report {
        let mut report = submitted_report();
        report.mark_verified(Some(0.8)).unwrap();
        report
    }

    #[test]
    fn validation_rejects_short_or_missing_fields() {
        let mut short_title = draft();
        short_title.title = " Pot ".to_string();
        assert!(matches!(
            validate_draft(&short_title),
            Err(ReportError::Validation { field: "title", .. })
        ));

        let mut short_description = draft();
        short_description.description = "Big hole".to_string();
        assert!(matches!(
            validate_draft(&short_description),
            Err(ReportError::Validation { field: "description", .. })
        ));

        let mut no_county = draft();
        no_county.location.county = Some("  ".to_string());
        assert!(matches!(
            validate_draft(&no_county),
            Err(ReportError::Validation { field: "county", .. })
        ));

        let mut bad_latitude = draft();
        bad_latitude.location.latitude = Some(91.0);
        assert!(matches!(
            validate_draft(&bad_latitude),
            Err(ReportError::Validation { field: "latitude", .. })
        ));

        assert!(validate_draft(&draft()).is_ok());
    }

    #[tokio::test]
    async fn invalid_draft_fails_before_any_model_call() {
        let orchestrator = orchestrator(vec![Reply::Text(r#"{"verified": true, "confidence": 0.9}"#)]);
        let mut invalid = draft();
        invalid.title = "Hey".to_string();
        let err = create(invalid, &catalog(), &orchestrator, 0.6).await.unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }

    #[tokio::test]
    async fn confident_classification_auto_verifies_and_routes() {
        let orchestrator = orchestrator(vec![Reply::Text(
            r#"{"verified": true, "confidence": 0.82, "predicted_department": "Roads Dept", "predicted_county": "Nairobi"}"#,
        )]);
        let catalog = catalog();
        let report = create(draft(), &catalog, &orchestrator, 0.6).await.unwrap();

        assert_eq!(report.status, ReportStatus::Verified);
        assert!(report.verified_by_ai);
        assert_eq!(report.ai_confidence, Some(0.82));
        assert_eq!(report.department.as_ref(), Some(&catalog[0]));
        assert_eq!(report.role_at_submission, Role::Citizen);
    }

    #[tokio::test]
    async fn classification_outage_still_creates_submitted_report() {
        let orchestrator = orchestrator(vec![
            Reply::Fail(|| ClassificationError::Transport("connection reset".into())),
            Reply::Fail(|| ClassificationError::Timeout(8)),
            Reply::Fail(|| ClassificationError::HttpStatus(502)),
        ]);
        let report = create(draft(), &catalog(), &orchestrator, 0.6).await.unwrap();

        assert_eq!(report.status, ReportStatus::Submitted);
        assert!(!report.verified_by_ai);
        assert_eq!(report.ai_confidence, None);
        assert_eq!(report.department, None);
    }

    #[tokio::test]
    async fn confident_but_unroutable_report_is_verified_without_department() {
        let orchestrator = orchestrator(vec![Reply::Text(
            r#"{"verified": true, "confidence": 0.9, "predicted_department": "Immigration"}"#,
        )]);
        let report = create(draft(), &catalog(), &orchestrator, 0.6).await.unwrap();

        assert!(report.verified_by_ai);
        assert_eq!(report.status, ReportStatus::Verified);
        assert_eq!(report.department, None);
    }

    #[tokio::test]
    async fn low_confidence_is_not_trusted() {
        let orchestrator = orchestrator(vec![Reply::Text(
            r#"{"verified": true, "confidence": 0.4, "predicted_department": "Health Department"}"#,
        )]);
        let report = create(draft(), &catalog(), &orchestrator, 0.6).await.unwrap();

        assert!(!report.verified_by_ai);
        assert_eq!(report.status, ReportStatus::Submitted);
        assert_eq!(report.ai_confidence, Some(0.4));
        assert_eq!(report.department.map(|d| d.name), Some("Health Department".to_string()));
    }

    #[tokio::test]
    async fn zero_confidence_judgment_is_recorded() {
        let orchestrator = orchestrator(vec![Reply::Text(r#"{"verified": false, "confidence": 0.0}"#)]);
        let report = create(draft(), &catalog(), &orchestrator, 0.6).await.unwrap();

        assert_eq!(report.status, ReportStatus::Submitted);
        assert_eq!(report.ai_confidence, Some(0.0));

        let mut untouched = submitted_report();
        untouched.apply_classification(None, &catalog(), 0.6);
        assert_eq!(untouched.ai_confidence, None);
        assert_eq!(untouched.status, ReportStatus::Submitted);
    }

    #[test]
    fn images_are_attached_with_captions() {
        let mut with_photos = draft();
        with_photos.images = vec![
            ImageUpload {
                path: " photos/pothole.JPG ".to_string(),
                caption: Some("  Near the market ".to_string()),
            },
            ImageUpload {
                path: "photos/closeup.png".to_string(),
                caption: Some("   ".to_string()),
            },
        ];
        assert!(validate_draft(&with_photos).is_ok());

        let report = Report::from_draft(with_photos);
        assert!(report.image_required_passed);
        assert_eq!(report.images.len(), 2);
        assert_eq!(report.images[0].path, "photos/pothole.JPG");
        assert_eq!(report.images[0].caption.as_deref(), Some("Near the market"));
        assert_eq!(report.images[1].caption, None);

        assert!(!submitted_report().image_required_passed);
    }

    #[test]
    fn non_image_attachment_is_rejected() {
        let mut invalid = draft();
        invalid.images = vec![ImageUpload {
            path: "notes/complaint.pdf".to_string(),
            caption: None,
        }];
        assert!(matches!(
            validate_draft(&invalid),
            Err(ReportError::Validation { field: "image", .. })
        ));
    }

    #[test]
    fn predicted_county_only_fills_a_gap() {
        let result = ClassificationResult {
            verified: false,
            confidence: 0.3,
            predicted_department: None,
            predicted_county: Some("Kisumu".to_string()),
        };

        let mut supplied = submitted_report();
        supplied.apply_classification(Some(&result), &[], 0.6);
        assert_eq!(supplied.location.county.as_deref(), Some("Nairobi"));
        assert_eq!(supplied.ai_predicted_county.as_deref(), Some("Kisumu"));

        let mut missing = submitted_report();
        missing.location.county = None;
        missing.apply_classification(Some(&result), &[], 0.6);
        assert_eq!(missing.location.county.as_deref(), Some("Kisumu"));
    }

    #[test]
    fn mark_verified_is_idempotent() {
        let mut once = submitted_report();
        once.mark_verified(Some(0.7)).unwrap();
        let snapshot = once.clone();
        once.mark_verified(Some(0.7)).unwrap();
        assert_eq!(once, snapshot);
        assert_eq!(once.status, ReportStatus::Verified);
        assert!(once.verified_by_ai);
    }

    #[test]
    fn mark_verified_keeps_existing_confidence_when_none_given() {
        let mut report = submitted_report();
        report.ai_confidence = Some(0.55);
        report.mark_verified(None).unwrap();
        assert_eq!(report.ai_confidence, Some(0.55));
        assert!(report.mark_verified(Some(1.2)).is_err());
    }

    #[test]
    fn unknown_status_leaves_report_unchanged() {
        let mut report = verified_report();
        let before = report.clone();
        let err = report.mark_status("archived").unwrap_err();
        assert!(matches!(err, ReportError::InvalidStatus(ref value) if value == "archived"));
        assert_eq!(report, before);
    }

    #[test]
    fn workflow_follows_transition_table() {
        let mut report = submitted_report();
        assert!(matches!(
            report.mark_status("resolved"),
            Err(ReportError::TransitionNotAllowed { .. })
        ));
        assert_eq!(report.status, ReportStatus::Submitted);

        report.mark_status("verified").unwrap();
        report.mark_status("pending").unwrap();
        report.mark_status("on_progress").unwrap();
        report.mark_status("resolved").unwrap();
        assert!(report.mark_status("pending").is_err());
        assert_eq!(report.status, ReportStatus::Resolved);
    }

    #[test]
    fn force_status_overrides_terminal_states_but_not_deletion() {
        let mut report = verified_report();
        report.mark_status("rejected").unwrap();
        assert_eq!(report.force_status("pending").unwrap(), ReportStatus::Pending);

        report.soft_delete(Uuid::new_v4()).unwrap();
        assert!(matches!(report.force_status("verified"), Err(ReportError::AlreadyDeleted)));
    }

    #[test]
    fn nothing_leaves_deleted() {
        for status in ReportStatus::ALL {
            assert!(!allows_transition(ReportStatus::Deleted, status));
            if status != ReportStatus::Deleted {
                assert!(allows_transition(status, ReportStatus::Deleted));
            }
        }
    }

    #[test]
    fn soft_delete_retains_record_with_audit_fields() {
        let mut report = verified_report();
        let actor = Uuid::new_v4();
        report.soft_delete(actor).unwrap();

        assert_eq!(report.status, ReportStatus::Deleted);
        assert!(report.deleted_at.is_some());
        assert_eq!(report.deleted_by, Some(actor));
        assert_eq!(report.title, "Pothole on Main St");
        assert!(matches!(report.soft_delete(actor), Err(ReportError::AlreadyDeleted)));
    }

    #[test]
    fn reporter_edit_rights_end_after_submission() {
        let mut report = submitted_report();
        assert!(report.is_editable_by_reporter());
        report.mark_status("verified").unwrap();
        assert!(!report.is_editable_by_reporter());
    }

    #[test]
    fn government_response_does_not_move_status() {
        let mut report = verified_report();
        let official = Uuid::new_v4();
        report
            .add_government_response("  Crew dispatched for Monday.  ", official)
            .unwrap();

        let response = report.response.as_ref().unwrap();
        assert_eq!(response.text, "Crew dispatched for Monday.");
        assert_eq!(response.official_id, official);
        assert_eq!(report.status, ReportStatus::Verified);
        assert!(report.add_government_response("   ", official).is_err());
    }
}
