//! Word report assembled from the validated needs and use cases.

use std::io::Cursor;

use chrono::{DateTime, Utc};
use docx_rs::{AlignmentType, BreakType, Docx, LineSpacing, PageMargin, Paragraph, Run};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ReportConfig;
use crate::error::{GatewayError, Result};
use crate::review::ReviewSession;
use crate::schemas::{Need, USE_CASE_TITLE_PLACEHOLDER, UseCase};

pub const DOCX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

const ACCENT: &str = "2E86AB";
const MUTED: &str = "666666";
const MARGIN_TWIPS: i32 = 1440;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportData {
    pub company_name: String,
    pub date: String,
    #[serde(default)]
    pub needs: Vec<Need>,
    #[serde(default)]
    pub quick_wins: Vec<UseCase>,
    #[serde(default)]
    pub structuration_ia: Vec<UseCase>,
}

impl ReportData {
    pub fn from_session(session: &ReviewSession, now: DateTime<Utc>) -> Result<Self> {
        if session.validated_needs.is_empty() {
            return Err(GatewayError::validation(
                "no validated needs yet; validate needs before downloading the report",
            ));
        }
        Ok(Self {
            company_name: session.company_name.clone(),
            date: format_date(now),
            needs: session.validated_needs.clone(),
            quick_wins: session.validated_quick_wins.clone(),
            structuration_ia: session.validated_structuration_ia.clone(),
        })
    }
}

pub fn format_date(now: DateTime<Utc>) -> String {
    now.format("%d/%m/%Y").to_string()
}

pub fn report_file_name(now: DateTime<Utc>) -> String {
    format!("rapport-besoins-{}.docx", now.timestamp_millis())
}

fn text(value: &str, size: usize) -> Run {
    Run::new().add_text(value).size(size)
}

fn spaced(p: Paragraph, before: u32, after: u32) -> Paragraph {
    p.line_spacing(LineSpacing::new().before(before).after(after))
}

fn section_title(label: &str) -> Paragraph {
    spaced(
        Paragraph::new().add_run(text(label, 28).bold().color(ACCENT)),
        400,
        200,
    )
}

fn subsection_title(label: &str) -> Paragraph {
    spaced(
        Paragraph::new().add_run(text(label, 24).bold().color(ACCENT)),
        300,
        150,
    )
}

fn use_case_paragraphs(uc: &UseCase) -> Vec<Paragraph> {
    let title = if uc.title.trim().is_empty() {
        USE_CASE_TITLE_PLACEHOLDER
    } else {
        uc.title.as_str()
    };
    let mut out = vec![spaced(
        Paragraph::new().add_run(text(title, 22).bold().color(ACCENT)),
        200,
        100,
    )];
    if !uc.description.trim().is_empty() {
        out.push(spaced(
            Paragraph::new().add_run(text(&uc.description, 20)),
            0,
            100,
        ));
    }
    if !uc.ai_technologies.is_empty() {
        let label = format!("Technologie IA: {}", uc.ai_technologies.join(", "));
        out.push(spaced(
            Paragraph::new().add_run(text(&label, 18).color(MUTED)),
            0,
            100,
        ));
    }
    out
}

pub fn render_docx(data: &ReportData) -> Result<Vec<u8>> {
    render_docx_with(data, &ReportConfig::default())
}

pub fn render_docx_with(data: &ReportData, style: &ReportConfig) -> Result<Vec<u8>> {
    let mut doc = Docx::new().page_margin(
        PageMargin::new()
            .top(MARGIN_TWIPS)
            .right(MARGIN_TWIPS)
            .bottom(MARGIN_TWIPS)
            .left(MARGIN_TWIPS),
    );

    let mut body: Vec<Paragraph> = vec![
        spaced(
            Paragraph::new()
                .add_run(text(&style.brand, 48).bold().color(ACCENT))
                .align(AlignmentType::Center),
            0,
            200,
        ),
        spaced(
            Paragraph::new()
                .add_run(text("RAPPORT D'ANALYSE DES BESOINS IA", 28).bold().color(ACCENT))
                .align(AlignmentType::Center),
            0,
            400,
        ),
        spaced(
            Paragraph::new()
                .add_run(text(&format!("Entreprise: {}", data.company_name), 24).bold()),
            0,
            200,
        ),
        spaced(
            Paragraph::new().add_run(text(&format!("Date: {}", data.date), 20)),
            0,
            600,
        ),
        section_title("1. BESOINS IDENTIFIÉS"),
    ];

    for need in &data.needs {
        body.push(spaced(
            Paragraph::new().add_run(text(&need.title, 22).bold().color(ACCENT)),
            200,
            100,
        ));
        for quote in &need.citations {
            body.push(spaced(
                Paragraph::new().add_run(text(&format!("• {}", quote), 20).italic()),
                0,
                100,
            ));
        }
    }

    body.push(Paragraph::new().add_run(Run::new().add_break(BreakType::Page)));
    body.push(section_title("2. CAS D'USAGE IA PRIORISÉS"));
    body.push(subsection_title("2.1 Quick Wins"));
    body.extend(data.quick_wins.iter().flat_map(use_case_paragraphs));
    body.push(subsection_title("2.2 Structuration IA"));
    body.extend(data.structuration_ia.iter().flat_map(use_case_paragraphs));

    body.push(spaced(
        Paragraph::new()
            .add_run(text("---", 20).color("CCCCCC"))
            .align(AlignmentType::Center),
        400,
        0,
    ));
    body.push(spaced(
        Paragraph::new()
            .add_run(text(&style.footer, 16).color("999999"))
            .align(AlignmentType::Center),
        0,
        200,
    ));

    for p in body {
        doc = doc.add_paragraph(p);
    }

    let mut buf = Cursor::new(Vec::new());
    doc.build()
        .pack(&mut buf)
        .map_err(|e| GatewayError::Report {
            message: format!("failed to pack docx: {}", e),
        })?;
    let bytes = buf.into_inner();
    info!(
        "Rendered report for '{}': {} needs, {} quick wins, {} structuration ({} bytes)",
        data.company_name,
        data.needs.len(),
        data.quick_wins.len(),
        data.structuration_ia.len(),
        bytes.len()
    );
    Ok(bytes)
}
