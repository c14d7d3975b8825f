use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::classifier::STANDARD_DEPARTMENTS;
use crate::error::ReportError;
use crate::models::{
    DepartmentRef, GovernmentResponse, Location, Report, ReportImage, ReportStatus, Role,
};

const REPORT_COLUMNS: &str = "r.id, r.title, r.description, r.reporter_id, r.role_at_submission, \
     r.county, r.subcounty, r.ward, r.latitude, r.longitude, \
     r.department_id, d.name AS department_name, \
     r.status, r.verified_by_ai, r.ai_confidence, r.ai_predicted_county, r.image_required_passed, \
     r.response_text, r.response_by, r.responded_at, \
     r.created_at, r.updated_at, r.deleted_at, r.deleted_by \
     FROM mwananchi.reports r \
     LEFT JOIN mwananchi.county_departments cd ON cd.id = r.department_id \
     LEFT JOIN mwananchi.departments d ON d.id = cd.department_id";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let counties = vec![
        ("Mombasa", 1),
        ("Kisumu", 42),
        ("Nakuru", 32),
        ("Kiambu", 22),
        ("Machakos", 16),
        ("Uasin Gishu", 27),
        ("Kakamega", 37),
        ("Nairobi", 47),
    ];

    for (name, code) in counties {
        let county_id = upsert_county(pool, name, Some(code)).await?;
        for department in STANDARD_DEPARTMENTS {
            let department_id = upsert_department(pool, department).await?;
            link_county_department(pool, county_id, department_id, &CatalogContact::default())
                .await?;
        }
    }

    Ok(())
}

#[derive(Debug, Default)]
struct CatalogContact {
    email: Option<String>,
    phone_number: Option<String>,
    office_location: Option<String>,
}

/// Loads `county,department,email,phone_number,office_location` rows.
pub async fn import_catalog(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        county: String,
        department: String,
        email: Option<String>,
        phone_number: Option<String>,
        office_location: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let county = row.county.trim();
        let department = row.department.trim();
        if county.is_empty() || department.is_empty() {
            tracing::warn!(county, department, "skipping incomplete catalog row");
            continue;
        }

        let contact = CatalogContact {
            email: row.email.clone(),
            phone_number: row.phone_number.clone(),
            office_location: row.office_location.clone(),
        };
        let county_id = upsert_county(pool, county, None).await?;
        let department_id = upsert_department(pool, department).await?;
        if link_county_department(pool, county_id, department_id, &contact).await? {
            inserted += 1;
        }
    }

    Ok(inserted)
}

async fn upsert_county(pool: &PgPool, name: &str, code: Option<i32>) -> anyhow::Result<Uuid> {
    let id = sqlx::query(
        r#"
        INSERT INTO mwananchi.counties (id, name, code)
        VALUES ($1, $2, $3)
        ON CONFLICT ((lower(name))) DO UPDATE SET code = COALESCE(EXCLUDED.code, mwananchi.counties.code)
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(canonical_county_name(name))
    .bind(code)
    .fetch_one(pool)
    .await?
    .get("id");
    Ok(id)
}

/// "  uasin gishu " and "UASIN GISHU" both become "Uasin Gishu".
fn canonical_county_name(name: &str) -> String {
    let mut canonical = String::with_capacity(name.len());
    let mut word_start = true;
    for c in name.split_whitespace().collect::<Vec<_>>().join(" ").chars() {
        if word_start {
            canonical.extend(c.to_uppercase());
        } else {
            canonical.extend(c.to_lowercase());
        }
        word_start = c == ' ' || c == '-';
    }
    canonical
}

async fn upsert_department(pool: &PgPool, name: &str) -> anyhow::Result<Uuid> {
    let id = sqlx::query(
        r#"
        INSERT INTO mwananchi.departments (id, name)
        VALUES ($1, $2)
        ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .fetch_one(pool)
    .await?
    .get("id");
    Ok(id)
}

async fn link_county_department(
    pool: &PgPool,
    county_id: Uuid,
    department_id: Uuid,
    contact: &CatalogContact,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO mwananchi.county_departments
        (id, county_id, department_id, email, phone_number, office_location)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (county_id, department_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(county_id)
    .bind(department_id)
    .bind(contact.email.as_deref())
    .bind(contact.phone_number.as_deref())
    .bind(contact.office_location.as_deref())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Active department offices for a county, matched on county name case-insensitively.
pub async fn fetch_catalog(pool: &PgPool, county: &str) -> Result<Vec<DepartmentRef>, ReportError> {
    let rows = sqlx::query(
        r#"
        SELECT cd.id, d.name
        FROM mwananchi.county_departments cd
        JOIN mwananchi.counties c ON c.id = cd.county_id
        JOIN mwananchi.departments d ON d.id = cd.department_id
        WHERE lower(c.name) = lower($1) AND cd.is_active
        ORDER BY d.name
        "#,
    )
    .bind(county.trim())
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| DepartmentRef {
            id: row.get("id"),
            name: row.get("name"),
        })
        .collect())
}

/// Stores the report and its images in one transaction.
pub async fn insert_report(pool: &PgPool, report: &Report) -> Result<(), ReportError> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO mwananchi.reports
        (id, title, description, reporter_id, role_at_submission,
         county, subcounty, ward, latitude, longitude, department_id,
         status, verified_by_ai, ai_confidence, ai_predicted_county,
         image_required_passed, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
        "#,
    )
    .bind(report.id)
    .bind(&report.title)
    .bind(&report.description)
    .bind(report.reporter_id)
    .bind(report.role_at_submission.as_str())
    .bind(report.location.county.as_deref())
    .bind(report.location.subcounty.as_deref())
    .bind(report.location.ward.as_deref())
    .bind(report.location.latitude)
    .bind(report.location.longitude)
    .bind(report.department.as_ref().map(|department| department.id))
    .bind(report.status.as_str())
    .bind(report.verified_by_ai)
    .bind(report.ai_confidence)
    .bind(report.ai_predicted_county.as_deref())
    .bind(report.image_required_passed)
    .bind(report.created_at)
    .bind(report.updated_at)
    .execute(&mut *tx)
    .await?;

    for image in report.images.iter() {
        sqlx::query(
            r#"
            INSERT INTO mwananchi.report_images (id, report_id, path, caption, uploaded_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(image.id)
        .bind(report.id)
        .bind(&image.path)
        .bind(image.caption.as_deref())
        .bind(image.uploaded_at)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    tracing::debug!(report_id = %report.id, images = report.images.len(), "report stored");
    Ok(())
}

/// Fetches any report by id, deleted ones included.
pub async fn fetch_report(pool: &PgPool, id: Uuid) -> Result<Report, ReportError> {
    let query = format!("SELECT {REPORT_COLUMNS} WHERE r.id = $1");
    let row = sqlx::query(&query)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(ReportError::NotFound(id))?;

    let mut reports = vec![report_from_row(&row)?];
    attach_images(pool, &mut reports).await?;
    Ok(reports.remove(0))
}

/// Non-deleted reports, newest first. `None` returns every match.
pub async fn list_reports(
    pool: &PgPool,
    county: Option<&str>,
    status: Option<ReportStatus>,
    limit: Option<i64>,
) -> Result<Vec<Report>, ReportError> {
    let query = format!(
        "SELECT {REPORT_COLUMNS} \
         WHERE r.status <> 'deleted' \
         AND ($1::text IS NULL OR lower(r.county) = lower($1)) \
         AND ($2::text IS NULL OR r.status = $2) \
         ORDER BY r.created_at DESC \
         LIMIT $3"
    );

    let rows = sqlx::query(&query)
        .bind(county)
        .bind(status.map(ReportStatus::as_str))
        .bind(limit.map(|limit| limit.max(1)))
        .fetch_all(pool)
        .await?;

    let mut reports = Vec::with_capacity(rows.len());
    for row in rows.iter() {
        reports.push(report_from_row(row)?);
    }
    attach_images(pool, &mut reports).await?;
    Ok(reports)
}

async fn attach_images(pool: &PgPool, reports: &mut [Report]) -> Result<(), ReportError> {
    if reports.is_empty() {
        return Ok(());
    }
    let ids: Vec<Uuid> = reports.iter().map(|report| report.id).collect();
    let rows = sqlx::query(
        r#"
        SELECT id, report_id, path, caption, uploaded_at
        FROM mwananchi.report_images
        WHERE report_id = ANY($1)
        ORDER BY uploaded_at, id
        "#,
    )
    .bind(ids)
    .fetch_all(pool)
    .await?;

    for row in rows.iter() {
        let report_id: Uuid = row.try_get("report_id")?;
        if let Some(report) = reports.iter_mut().find(|report| report.id == report_id) {
            report.images.push(ReportImage {
                id: row.try_get("id")?,
                path: row.try_get("path")?,
                caption: row.try_get("caption")?,
                uploaded_at: row.try_get("uploaded_at")?,
            });
        }
    }
    Ok(())
}

/// Writes the status column only, provided nobody changed it since `expected` was read.
pub async fn persist_status(
    pool: &PgPool,
    report: &Report,
    expected: ReportStatus,
) -> Result<(), ReportError> {
    let result = sqlx::query(
        r#"
        UPDATE mwananchi.reports
        SET status = $3, updated_at = $4, deleted_at = COALESCE(deleted_at, $5)
        WHERE id = $1 AND status = $2
        "#,
    )
    .bind(report.id)
    .bind(expected.as_str())
    .bind(report.status.as_str())
    .bind(report.updated_at)
    .bind(report.deleted_at)
    .execute(pool)
    .await?;

    expect_one_row(report.id, result.rows_affected())
}

pub async fn persist_verification(
    pool: &PgPool,
    report: &Report,
    expected: ReportStatus,
) -> Result<(), ReportError> {
    let result = sqlx::query(
        r#"
        UPDATE mwananchi.reports
        SET status = $3, verified_by_ai = $4, ai_confidence = $5, updated_at = $6
        WHERE id = $1 AND status = $2
        "#,
    )
    .bind(report.id)
    .bind(expected.as_str())
    .bind(report.status.as_str())
    .bind(report.verified_by_ai)
    .bind(report.ai_confidence)
    .bind(report.updated_at)
    .execute(pool)
    .await?;

    expect_one_row(report.id, result.rows_affected())
}

pub async fn persist_deletion(
    pool: &PgPool,
    report: &Report,
    expected: ReportStatus,
) -> Result<(), ReportError> {
    let result = sqlx::query(
        r#"
        UPDATE mwananchi.reports
        SET status = 'deleted', deleted_at = $3, deleted_by = $4, updated_at = $5
        WHERE id = $1 AND status = $2
        "#,
    )
    .bind(report.id)
    .bind(expected.as_str())
    .bind(report.deleted_at)
    .bind(report.deleted_by)
    .bind(report.updated_at)
    .execute(pool)
    .await?;

    expect_one_row(report.id, result.rows_affected())
}

pub async fn persist_response(pool: &PgPool, report: &Report) -> Result<(), ReportError> {
    let Some(response) = report.response.as_ref() else {
        return Ok(());
    };

    let result = sqlx::query(
        r#"
        UPDATE mwananchi.reports
        SET response_text = $2, response_by = $3, responded_at = $4, updated_at = $4
        WHERE id = $1 AND status <> 'deleted'
        "#,
    )
    .bind(report.id)
    .bind(&response.text)
    .bind(response.official_id)
    .bind(response.responded_at)
    .execute(pool)
    .await?;

    expect_one_row(report.id, result.rows_affected())
}

fn expect_one_row(id: Uuid, rows_affected: u64) -> Result<(), ReportError> {
    if rows_affected == 1 {
        Ok(())
    } else {
        tracing::warn!(report_id = %id, "conditional update matched no row");
        Err(ReportError::ConcurrentUpdate(id))
    }
}

fn report_from_row(row: &PgRow) -> Result<Report, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let status: ReportStatus = status
        .parse()
        .map_err(|e: ReportError| sqlx::Error::Decode(Box::new(e)))?;
    let role: String = row.try_get("role_at_submission")?;
    let role: Role = role
        .parse()
        .map_err(|e: anyhow::Error| sqlx::Error::Decode(e.into()))?;

    let department_id: Option<Uuid> = row.try_get("department_id")?;
    let department_name: Option<String> = row.try_get("department_name")?;
    let department = department_id
        .zip(department_name)
        .map(|(id, name)| DepartmentRef { id, name });

    let response_text: Option<String> = row.try_get("response_text")?;
    let response_by: Option<Uuid> = row.try_get("response_by")?;
    let responded_at: Option<DateTime<Utc>> = row.try_get("responded_at")?;
    let response = match (response_text, response_by, responded_at) {
        (Some(text), Some(official_id), Some(responded_at)) => Some(GovernmentResponse {
            text,
            official_id,
            responded_at,
        }),
        _ => None,
    };

    Ok(Report {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        reporter_id: row.try_get("reporter_id")?,
        role_at_submission: role,
        location: Location {
            county: row.try_get("county")?,
            subcounty: row.try_get("subcounty")?,
            ward: row.try_get("ward")?,
            latitude: row.try_get("latitude")?,
            longitude: row.try_get("longitude")?,
        },
        department,
        status,
        verified_by_ai: row.try_get("verified_by_ai")?,
        ai_confidence: row.try_get("ai_confidence")?,
        ai_predicted_county: row.try_get("ai_predicted_county")?,
        image_required_passed: row.try_get("image_required_passed")?,
        images: Vec::new(),
        response,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
        deleted_by: row.try_get("deleted_by")?,
    })
}
