use std::collections::HashMap;
use std::fmt::Write;

use crate::models::{Report, ReportStatus};

#[derive(Debug, Clone, PartialEq)]
pub struct DepartmentLoad {
    pub department: String,
    pub open: usize,
    pub total: usize,
}

pub fn count_by_status(reports: &[Report]) -> Vec<(ReportStatus, usize)> {
    ReportStatus::ALL
        .into_iter()
        .filter(|status| *status != ReportStatus::Deleted)
        .map(|status| {
            let count = reports.iter().filter(|report| report.status == status).count();
            (status, count)
        })
        .filter(|(_, count)| *count > 0)
        .collect()
}

pub fn load_by_department(reports: &[Report]) -> Vec<DepartmentLoad> {
    let mut map: HashMap<String, (usize, usize)> = HashMap::new();

    for report in reports {
        let name = report
            .department
            .as_ref()
            .map(|department| department.name.clone())
            .unwrap_or_else(|| "Unassigned".to_string());
        let entry = map.entry(name).or_insert((0, 0));
        if !matches!(report.status, ReportStatus::Resolved | ReportStatus::Rejected) {
            entry.0 += 1;
        }
        entry.1 += 1;
    }

    let mut loads: Vec<DepartmentLoad> = map
        .into_iter()
        .map(|(department, (open, total))| DepartmentLoad {
            department,
            open,
            total,
        })
        .collect();

    loads.sort_by(|a, b| b.open.cmp(&a.open).then_with(|| a.department.cmp(&b.department)));
    loads
}

/// Share of reports auto-verified, and mean confidence over those reports.
pub fn ai_verification_stats(reports: &[Report]) -> (f64, Option<f64>) {
    if reports.is_empty() {
        return (0.0, None);
    }
    let verified: Vec<f64> = reports
        .iter()
        .filter(|report| report.verified_by_ai)
        .filter_map(|report| report.ai_confidence)
        .collect();
    let rate = reports.iter().filter(|report| report.verified_by_ai).count() as f64
        / reports.len() as f64;
    let average = if verified.is_empty() {
        None
    } else {
        Some(verified.iter().sum::<f64>() / verified.len() as f64)
    };
    (rate, average)
}

pub fn build_digest(county: Option<&str>, reports: &[Report]) -> String {
    let owned: Vec<Report> = reports
        .iter()
        .filter(|report| report.status != ReportStatus::Deleted)
        .cloned()
        .collect();

    let mut output = String::new();
    let county_label = county.unwrap_or("all counties");

    let _ = writeln!(output, "# Report Triage Digest");
    let _ = writeln!(output, "Generated for {} ({} active reports)", county_label, owned.len());
    let _ = writeln!(output);
    let _ = writeln!(output, "## Status");

    let statuses = count_by_status(&owned);
    if statuses.is_empty() {
        let _ = writeln!(output, "No reports recorded.");
    } else {
        for (status, count) in statuses {
            let _ = writeln!(output, "- {}: {}", status, count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Department Load");

    let loads = load_by_department(&owned);
    if loads.is_empty() {
        let _ = writeln!(output, "No reports recorded.");
    } else {
        for load in loads.iter() {
            let _ = writeln!(
                output,
                "- {}: {} open of {} total",
                load.department, load.open, load.total
            );
        }
    }

    let (rate, average) = ai_verification_stats(&owned);
    let _ = writeln!(output);
    let _ = writeln!(output, "## AI Verification");
    let _ = writeln!(output, "- Auto-verified: {:.0}%", rate * 100.0);
    match average {
        Some(value) => {
            let _ = writeln!(output, "- Average confidence when verified: {:.2}", value);
        }
        None => {
            let _ = writeln!(output, "- Average confidence when verified: n/a");
        }
    }

    let mut recent = owned;
    recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Reports");

    if recent.is_empty() {
        let _ = writeln!(output, "No reports recorded.");
    } else {
        for report in recent.iter().take(5) {
            let _ = writeln!(
                output,
                "- [{}] {} ({}) on {}",
                report.status,
                report.title,
                report.location.county.as_deref().unwrap_or("unknown county"),
                report.created_at.date_naive()
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use crate::models::{DepartmentRef, Location, ReportDraft, Reporter, Role};

    fn sample_report(title: &str, status: ReportStatus, department: Option<&str>, days_ago: i64) -> Report {
        let mut report = Report::from_draft(ReportDraft {
            title: title.to_string(),
            description: "Reported by residents of the ward".to_string(),
            location: Location {
                county: Some("Kisumu".to_string()),
                ..Location::default()
            },
            reporter: Reporter {
                id: Uuid::new_v4(),
                role: Role::Citizen,
            },
            images: Vec::new(),
        });
        report.status = status;
        report.department = department.map(|name| DepartmentRef {
            id: Uuid::new_v4(),
            name: name.to_string(),
        });
        report.created_at = Utc::now() - Duration::days(days_ago);
        report
    }

    #[test]
    fn department_load_counts_open_and_total() {
        let reports = vec![
            sample_report("Burst pipe", ReportStatus::Verified, Some("Environment and Water"), 1),
            sample_report("Dry taps", ReportStatus::Resolved, Some("Environment and Water"), 3),
            sample_report("Broken road", ReportStatus::Submitted, None, 2),
        ];
        let loads = load_by_department(&reports);
        assert_eq!(
            loads[0],
            DepartmentLoad {
                department: "Environment and Water".to_string(),
                open: 1,
                total: 2
            }
        );
        assert_eq!(loads[1].department, "Unassigned");
    }

    #[test]
    fn ai_stats_average_only_verified_reports() {
        let mut verified = sample_report("Burst pipe", ReportStatus::Verified, None, 1);
        verified.verified_by_ai = true;
        verified.ai_confidence = Some(0.8);
        let mut unverified = sample_report("Dry taps", ReportStatus::Submitted, None, 1);
        unverified.ai_confidence = Some(0.2);

        let (rate, average) = ai_verification_stats(&[verified, unverified]);
        assert_eq!(rate, 0.5);
        assert_eq!(average, Some(0.8));
        assert_eq!(ai_verification_stats(&[]), (0.0, None));
    }

    #[test]
    fn digest_skips_deleted_and_lists_recent_first() {
        let reports = vec![
            sample_report("Older pothole", ReportStatus::Submitted, None, 5),
            sample_report("Newest flooding", ReportStatus::Verified, None, 0),
            sample_report("Spam report", ReportStatus::Deleted, None, 0),
        ];
        let digest = build_digest(Some("Kisumu"), &reports);

        assert!(digest.contains("Generated for Kisumu (2 active reports)"));
        assert!(!digest.contains("Spam report"));
        assert!(!digest.contains("- deleted:"));
        let newest = digest.find("Newest flooding").unwrap();
        let older = digest.find("Older pothole").unwrap();
        assert!(newest < older);
    }

    #[test]
    fn digest_aggregates_every_report_it_is_given() {
        let reports: Vec<Report> = (0..600)
            .map(|day| sample_report("Blocked drain", ReportStatus::Submitted, None, day))
            .collect();
        let digest = build_digest(None, &reports);

        assert!(digest.contains("Generated for all counties (600 active reports)"));
        assert!(digest.contains("- submitted: 600"));
        assert!(digest.contains("- Unassigned: 600 open of 600 total"));
    }
}
