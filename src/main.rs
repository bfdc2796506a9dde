//! tarjeton – command-line card renderer.
//!
//! Usage:
//!   tarjeton render <record.json> [--out-dir DIR] [--config FILE] [--assets-dir DIR]
//!                   [--font TTF] [--bold-font TTF] [--date YYYY-MM-DD]
//!   tarjeton markup <record.json> --side front|back [--date YYYY-MM-DD]
//!   tarjeton tenure <issue> <reference>
//!
//! `render` accepts one record or an array of records and writes one
//! `tarjeton-<folio>.pdf` per record.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};

use tarjeton_forge::dates::{format_years, seniority_label, tenure_years, LongDate};
use tarjeton_forge::record::{records_from_json, CardRecord, CardStatus};
use tarjeton_forge::{render_page, CardPipeline, GenerationRequest, PageSide, PipelineConfig};

#[derive(Parser)]
#[command(name = "tarjeton")]
#[command(about = "Render operator cards (tarjetones) to two-page PDFs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render one record or a batch of records to PDF
    Render {
        /// JSON file with a record or an array of records
        records: PathBuf,

        /// Output directory (overrides the config file)
        #[arg(short, long)]
        out_dir: Option<PathBuf>,

        /// JSON pipeline configuration
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Directory holding the background artwork
        #[arg(long)]
        assets_dir: Option<PathBuf>,

        /// Regular TTF/OTF font
        #[arg(long)]
        font: Option<PathBuf>,

        /// Bold TTF/OTF font
        #[arg(long)]
        bold_font: Option<PathBuf>,

        /// Generation date printed on the back (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Print the markup of one side of the first record
    Markup {
        records: PathBuf,

        #[arg(short, long, value_enum, default_value_t = Side::Front)]
        side: Side,

        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Print the tenure in whole years between two dates
    Tenure { issue: String, reference: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum Side {
    Front,
    Back,
}

impl From<Side> for PageSide {
    fn from(side: Side) -> Self {
        match side {
            Side::Front => PageSide::Front,
            Side::Back => PageSide::Back,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Render {
            records,
            out_dir,
            config,
            assets_dir,
            font,
            bold_font,
            date,
        } => {
            let mut config = match config {
                Some(path) => match PipelineConfig::from_json_file(&path) {
                    Ok(c) => c,
                    Err(e) => {
                        eprintln!("Error loading config '{}': {e}", path.display());
                        return ExitCode::FAILURE;
                    }
                },
                None => PipelineConfig::default(),
            };
            if let Some(dir) = out_dir {
                config.output_dir = dir;
            }
            if let Some(dir) = assets_dir {
                config.assets_dir = dir;
            }
            if font.is_some() {
                config.font_path = font;
            }
            if bold_font.is_some() {
                config.bold_font_path = bold_font;
            }

            let records = match load_records(&records) {
                Ok(r) => r,
                Err(code) => return code,
            };
            render_all(CardPipeline::new(config), records, date).await
        }

        Commands::Markup {
            records,
            side,
            date,
        } => {
            let records = match load_records(&records) {
                Ok(r) => r,
                Err(code) => return code,
            };
            let Some(record) = records.first() else {
                eprintln!("No records found");
                return ExitCode::FAILURE;
            };
            let config = PipelineConfig::default();
            let ctx = config.page_context(date.unwrap_or_else(|| chrono::Local::now().date_naive()));
            print!("{}", render_page(record, side.into(), &ctx));
            ExitCode::SUCCESS
        }

        Commands::Tenure { issue, reference } => match tenure_years(&issue, &reference) {
            Some(years) => {
                println!("{}", format_years(Some(years)));
                ExitCode::SUCCESS
            }
            None => {
                eprintln!("Could not parse '{issue}' or '{reference}' as a date");
                ExitCode::from(2)
            }
        },
    }
}

fn load_records(path: &Path) -> Result<Vec<CardRecord>, ExitCode> {
    let text = fs::read_to_string(path).map_err(|e| {
        eprintln!("Error reading '{}': {e}", path.display());
        ExitCode::FAILURE
    })?;
    records_from_json(&text).map_err(|e| {
        eprintln!("Invalid record JSON in '{}': {e}", path.display());
        ExitCode::FAILURE
    })
}

/// Render records one at a time; a failed card does not stop the batch.
async fn render_all(pipeline: CardPipeline, records: Vec<CardRecord>, date: Option<NaiveDate>) -> ExitCode {
    let total = records.len();
    let mut failures = 0usize;
    let mut expired = 0usize;

    for record in records {
        match record.status() {
            CardStatus::Suspended => {
                log::warn!("Card {} is suspended; rendering anyway", record.folio)
            }
            CardStatus::Expired => expired += 1,
            _ => {}
        }
        let request = match date {
            Some(d) => GenerationRequest::new(record, d),
            None => GenerationRequest::today(record),
        };
        let record = &request.record;
        let seniority = seniority_label(
            &record.procedure_type,
            record.legacy_issue_date.as_deref(),
            request.generated_on,
        );
        let issued = issued_label(&record.issue_date);

        match pipeline.generate(&request).await {
            Ok(card) => {
                let location = card
                    .location
                    .as_deref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| card.file_name.clone());
                eprintln!(
                    "Wrote '{location}' ({} bytes, {} pages) status={} issued={issued} seniority={}",
                    card.document.bytes().len(),
                    card.document.page_count(),
                    if record.status.is_empty() { "-" } else { record.status.as_str() },
                    if seniority.is_empty() { "-" } else { seniority.as_str() },
                );
            }
            Err(e) => {
                failures += 1;
                eprintln!("Error generating card {}: {e}", record.folio);
            }
        }
    }

    if total > 1 {
        eprintln!("{} of {total} cards generated ({expired} expired)", total - failures);
    }
    if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// "01 de junio de 2020" from a DD/MM/YYYY issue date, or "-".
fn issued_label(issue_date: &str) -> String {
    let LongDate { day, month, year } = LongDate::issue(issue_date);
    if day.is_empty() || month.is_empty() || year.is_empty() {
        "-".to_string()
    } else {
        format!("'{day} de {month} de {year}'")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_label_spells_the_month() {
        assert_eq!(issued_label("01/06/2020"), "'01 de junio de 2020'");
        assert_eq!(issued_label(""), "-");
        assert_eq!(issued_label("2020-06-01"), "-");
    }
}
