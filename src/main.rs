use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod classifier;
mod config;
mod db;
mod error;
mod lifecycle;
mod matcher;
mod models;
mod orchestrator;
mod summary;

use classifier::{ClassificationClient, HttpModelBackend};
use config::Config;
use error::ReportError;
use matcher::DepartmentMatcher;
use models::{ImageUpload, Location, Report, ReportDraft, ReportStatus, Reporter, Role};
use orchestrator::{ClassificationRequest, Orchestrator};

#[derive(Parser)]
#[command(name = "mwananchi-triage")]
#[command(about = "Citizen report intake, AI triage and status workflow for E-Mwananchi", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load counties and the standard county departments
    Seed,
    /// Import county departments from a CSV file
    ImportCatalog {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Classify a report without storing it
    Classify {
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: String,
        #[arg(long)]
        county: Option<String>,
    },
    /// Submit a citizen report
    Submit {
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: String,
        #[arg(long)]
        county: String,
        #[arg(long)]
        subcounty: Option<String>,
        #[arg(long)]
        ward: Option<String>,
        #[arg(long, allow_hyphen_values = true)]
        lat: Option<f64>,
        #[arg(long, allow_hyphen_values = true)]
        lon: Option<f64>,
        #[arg(long)]
        reporter: Uuid,
        #[arg(long, value_enum, default_value_t = Role::Citizen)]
        role: Role,
        /// Photo of the issue; repeat for several
        #[arg(long = "image")]
        images: Vec<PathBuf>,
        /// Caption for the image in the same position
        #[arg(long = "caption")]
        captions: Vec<String>,
    },
    /// Move a report to another status
    SetStatus {
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        status: String,
        /// Skip the workflow table (officials' override)
        #[arg(long)]
        force: bool,
    },
    /// Mark a report as verified
    Verify {
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        confidence: Option<f64>,
    },
    /// Soft-delete a report
    Delete {
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        actor: Uuid,
    },
    /// Attach an official response to a report
    Respond {
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        official: Uuid,
        #[arg(long)]
        text: String,
    },
    /// Show one report, deleted ones included
    Show {
        #[arg(long)]
        id: Uuid,
    },
    /// List active reports
    List {
        #[arg(long)]
        county: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Write a markdown triage digest
    Summary {
        #[arg(long)]
        county: Option<String>,
        #[arg(long, default_value = "triage.md")]
        out: PathBuf,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();
}

async fn connect(config: &Config) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(config.require_database_url()?)
        .await
        .context("failed to connect to Postgres")
}

fn build_orchestrator(config: &Config) -> anyhow::Result<Orchestrator<HttpModelBackend>> {
    if config.llm.api_key.is_none() {
        tracing::warn!(provider = ?config.llm.provider, "no API key configured, classification will fall back");
    }
    let backend = HttpModelBackend::new(&config.llm)?;
    let client = ClassificationClient::new(backend, &config.llm);
    Ok(Orchestrator::new(
        client,
        DepartmentMatcher::new(config.thresholds.department_match),
    ))
}

fn print_report(report: &Report) {
    println!(
        "- {} [{}] {} ({}, {}) ai={} confidence={}",
        report.id,
        report.status,
        report.title,
        report.location.county.as_deref().unwrap_or("unknown county"),
        report
            .department
            .as_ref()
            .map(|department| department.name.as_str())
            .unwrap_or("unassigned"),
        report.verified_by_ai,
        report
            .ai_confidence
            .map(|value| format!("{value:.2}"))
            .unwrap_or_else(|| "-".to_string()),
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = Config::from_env().context("invalid configuration")?;

    if let Err(err) = run(cli, &config).await {
        if let Some(report_error) = err.downcast_ref::<ReportError>() {
            eprintln!("error[{}]: {report_error}", report_error.code());
            std::process::exit(2);
        }
        return Err(err);
    }
    Ok(())
}

async fn run(cli: Cli, config: &Config) -> anyhow::Result<()> {
    match cli.command {
        Commands::InitDb => {
            let pool = connect(config).await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect(config).await?;
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::ImportCatalog { csv } => {
            let pool = connect(config).await?;
            let inserted = db::import_catalog(&pool, &csv).await?;
            println!("Inserted {inserted} county departments from {}.", csv.display());
        }
        Commands::Classify {
            title,
            description,
            county,
        } => {
            let known_departments = match (&county, config.database_url.is_some()) {
                (Some(county), true) => {
                    let pool = connect(config).await?;
                    db::fetch_catalog(&pool, county)
                        .await?
                        .into_iter()
                        .map(|department| department.name)
                        .collect()
                }
                _ => Vec::new(),
            };
            let orchestrator = build_orchestrator(config)?;
            let result = orchestrator
                .classify(&ClassificationRequest {
                    title,
                    description,
                    known_departments,
                })
                .await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if result.auto_verifies(config.thresholds.confidence) {
                println!("Would auto-verify (threshold {:.2}).", config.thresholds.confidence);
            }
        }
        Commands::Submit {
            title,
            description,
            county,
            subcounty,
            ward,
            lat,
            lon,
            reporter,
            role,
            images,
            captions,
        } => {
            anyhow::ensure!(
                captions.len() <= images.len(),
                "got {} captions for {} images",
                captions.len(),
                images.len()
            );
            for path in images.iter() {
                anyhow::ensure!(path.is_file(), "image {} not found", path.display());
            }
            let images: Vec<ImageUpload> = images
                .iter()
                .enumerate()
                .map(|(index, path)| ImageUpload {
                    path: path.display().to_string(),
                    caption: captions.get(index).cloned(),
                })
                .collect();

            let pool = connect(config).await?;
            let catalog = db::fetch_catalog(&pool, &county).await?;
            if catalog.is_empty() {
                tracing::warn!(county = %county, "no department catalog for county, report will stay unassigned");
            }
            let draft = ReportDraft {
                title,
                description,
                location: Location {
                    county: Some(county),
                    subcounty,
                    ward,
                    latitude: lat,
                    longitude: lon,
                },
                reporter: Reporter { id: reporter, role },
                images,
            };
            let orchestrator = build_orchestrator(config)?;
            let report =
                lifecycle::create(draft, &catalog, &orchestrator, config.thresholds.confidence)
                    .await?;
            db::insert_report(&pool, &report).await?;
            println!("Report {} submitted with status {}.", report.id, report.status);
        }
        Commands::SetStatus { id, status, force } => {
            let pool = connect(config).await?;
            let mut report = db::fetch_report(&pool, id).await?;
            let previous = report.status;
            if force {
                report.force_status(&status)?;
            } else {
                report.mark_status(&status)?;
            }
            if report.status != previous {
                db::persist_status(&pool, &report, previous).await?;
            }
            println!("Report {} is now {}.", report.id, report.status);
        }
        Commands::Verify { id, confidence } => {
            let pool = connect(config).await?;
            let mut report = db::fetch_report(&pool, id).await?;
            let previous = report.status;
            report.mark_verified(confidence)?;
            db::persist_verification(&pool, &report, previous).await?;
            println!("Report {} verified.", report.id);
        }
        Commands::Delete { id, actor } => {
            let pool = connect(config).await?;
            let mut report = db::fetch_report(&pool, id).await?;
            let previous = report.status;
            report.soft_delete(actor)?;
            db::persist_deletion(&pool, &report, previous).await?;
            println!("Report {} deleted.", report.id);
        }
        Commands::Respond { id, official, text } => {
            let pool = connect(config).await?;
            let mut report = db::fetch_report(&pool, id).await?;
            report.add_government_response(&text, official)?;
            db::persist_response(&pool, &report).await?;
            println!("Response recorded on report {} (status {}).", report.id, report.status);
        }
        Commands::Show { id } => {
            let pool = connect(config).await?;
            let report = db::fetch_report(&pool, id).await?;
            print_report(&report);
            println!("  reporter: {} ({})", report.reporter_id, report.role_at_submission.as_str());
            println!(
                "  editable by reporter: {}",
                if report.is_editable_by_reporter() { "yes" } else { "no" }
            );
            if let Some(county) = report.ai_predicted_county.as_deref() {
                println!("  AI predicted county: {county}");
            }
            println!(
                "  image check: {}",
                if report.image_required_passed { "passed" } else { "no image" }
            );
            for image in report.images.iter() {
                match image.caption.as_deref() {
                    Some(caption) => println!("  image {} ({caption}) at {}", image.path, image.uploaded_at),
                    None => println!("  image {} at {}", image.path, image.uploaded_at),
                }
            }
            if let Some(response) = report.response.as_ref() {
                println!("  response ({}): {}", response.responded_at, response.text);
            }
            if let Some(deleted_at) = report.deleted_at {
                println!("  deleted at {deleted_at}");
            }
        }
        Commands::List {
            county,
            status,
            limit,
        } => {
            let status = status
                .as_deref()
                .map(str::parse::<ReportStatus>)
                .transpose()?;
            let pool = connect(config).await?;
            let reports = db::list_reports(&pool, county.as_deref(), status, Some(limit)).await?;

            if reports.is_empty() {
                println!("No reports found.");
                return Ok(());
            }
            for report in reports.iter() {
                print_report(report);
            }
        }
        Commands::Summary { county, out } => {
            let pool = connect(config).await?;
            let reports = db::list_reports(&pool, county.as_deref(), None, None).await?;
            let digest = summary::build_digest(county.as_deref(), &reports);
            std::fs::write(&out, digest)?;
            println!("Digest written to {}.", out.display());
        }
    }

    Ok(())
}
