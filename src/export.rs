//! Export adapter: projects a finished report shape into CSV rows or a
//! plain-text PDF. No aggregation happens here; the rows mirror the JSON
//! report content exactly. Ratings print as "+", "=", "x" and unrated
//! cells as "-".

use chrono::Utc;

use crate::domain::Rating;
use crate::report::{
    ClassSummary, OutcomeReport, RatingDistribution, ReportError, SchoolSummary, StrandReport,
    StudentReport,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Student,
    StudentSubject,
    Strand,
    Outcome,
    Class,
    School,
}

impl ReportKind {
    pub fn parse(s: &str) -> Option<ReportKind> {
        match s {
            "student" => Some(ReportKind::Student),
            "student-subject" => Some(ReportKind::StudentSubject),
            "strand" => Some(ReportKind::Strand),
            "outcome" => Some(ReportKind::Outcome),
            "class" => Some(ReportKind::Class),
            "school" => Some(ReportKind::School),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReportKind::Student => "student",
            ReportKind::StudentSubject => "student-subject",
            ReportKind::Strand => "strand",
            ReportKind::Outcome => "outcome",
            ReportKind::Class => "class",
            ReportKind::School => "school",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Pdf,
}

impl ExportFormat {
    pub fn parse(s: &str) -> Option<ExportFormat> {
        match s {
            "csv" => Some(ExportFormat::Csv),
            "pdf" => Some(ExportFormat::Pdf),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Pdf => "pdf",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv",
            ExportFormat::Pdf => "application/pdf",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportDocument {
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Report shape handed to the renderer. `Student` backs both the
/// `student` and `student-subject` report types.
pub enum ReportPayload<'a> {
    Student(&'a StudentReport),
    Strand(&'a StrandReport),
    Outcome(&'a OutcomeReport),
    Class(&'a ClassSummary),
    School(&'a SchoolSummary),
}

pub fn export_filename(kind: ReportKind, format: ExportFormat) -> String {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    format!(
        "{}-report-{}.{}",
        kind.as_str(),
        timestamp,
        format.extension()
    )
}

pub fn render(
    kind: ReportKind,
    format: ExportFormat,
    payload: &ReportPayload<'_>,
) -> Result<ExportDocument, ReportError> {
    let (title, rows) = match payload {
        ReportPayload::Student(r) => student_rows(r),
        ReportPayload::Strand(r) => strand_rows(r),
        ReportPayload::Outcome(r) => outcome_rows(r),
        ReportPayload::Class(r) => class_rows(r),
        ReportPayload::School(r) => school_rows(r),
    };

    let bytes = match format {
        ExportFormat::Csv => csv_bytes(&rows),
        ExportFormat::Pdf => pdf_bytes(&title, &rows),
    };
    Ok(ExportDocument {
        filename: export_filename(kind, format),
        content_type: format.content_type(),
        bytes,
    })
}

fn symbol_for(rating: Option<&str>) -> String {
    rating
        .and_then(Rating::parse)
        .map(|r| r.symbol().to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn distribution_cells(dist: &RatingDistribution) -> Vec<String> {
    vec![
        dist.easily_meeting.to_string(),
        dist.meeting.to_string(),
        dist.needs_practice.to_string(),
        dist.total.to_string(),
    ]
}

fn kv(rows: &mut Vec<Vec<String>>, key: &str, value: impl Into<String>) {
    rows.push(vec![key.to_string(), value.into()]);
}

fn student_rows(report: &StudentReport) -> (String, Vec<Vec<String>>) {
    let title = format!("Student Report - {}", report.student.display_name);
    let mut rows: Vec<Vec<String>> = Vec::new();
    kv(&mut rows, "Student", report.student.display_name.clone());
    if let Some(term) = &report.term {
        kv(&mut rows, "Term", term.name.clone());
    }
    kv(&mut rows, "Performance Score", report.performance_score.to_string());
    kv(&mut rows, "Completion Rate", format!("{:.1}", report.completion_rate));
    kv(&mut rows, "Total Outcomes", report.total_outcomes.to_string());
    kv(&mut rows, "Assessments", report.assessment_count.to_string());
    rows.push(Vec::new());

    rows.push(
        ["Subject", "Strand", "Outcome", "Description", "Rating", "Date", "Assessments"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    );
    for subject in &report.subjects {
        for strand in &subject.strands {
            for line in &strand.outcomes {
                rows.push(vec![
                    subject.subject_name.clone(),
                    strand.strand_name.clone(),
                    line.code.clone(),
                    line.description.clone(),
                    symbol_for(line.latest_rating.as_deref()),
                    line.latest_date.clone().unwrap_or_default(),
                    line.assessment_count.to_string(),
                ]);
            }
        }
    }

    rows.push(Vec::new());
    rows.push(
        ["Subject", "Score", "Completion", "Easily Meeting", "Meeting", "Needs Practice", "Total"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    );
    for subject in &report.subjects {
        let mut row = vec![
            subject.subject_name.clone(),
            subject.performance_score.to_string(),
            format!("{:.1}", subject.completion_rate),
        ];
        row.extend(distribution_cells(&subject.rating_distribution));
        rows.push(row);
    }
    (title, rows)
}

fn strand_rows(report: &StrandReport) -> (String, Vec<Vec<String>>) {
    let title = format!("Strand Report - {}", report.strand_name);
    let mut rows: Vec<Vec<String>> = Vec::new();
    kv(&mut rows, "Class", report.class.name.clone());
    kv(&mut rows, "Subject", report.subject_name.clone());
    kv(&mut rows, "Strand", report.strand_name.clone());
    if let Some(term) = &report.term {
        kv(&mut rows, "Term", term.name.clone());
    }
    kv(&mut rows, "Performance Score", report.performance_score.to_string());
    rows.push(Vec::new());

    let mut header = vec!["Student".to_string()];
    header.extend(report.outcomes.iter().map(|o| o.code.clone()));
    rows.push(header);
    for student in &report.students {
        let mut row = vec![student.display_name.clone()];
        row.extend(student.cells.iter().map(|c| c.symbol.clone()));
        rows.push(row);
    }

    rows.push(Vec::new());
    rows.push(
        ["Outcome", "Score", "Easily Meeting", "Meeting", "Needs Practice", "Total"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    );
    for stats in &report.per_outcome {
        let mut row = vec![stats.code.clone(), stats.performance_score.to_string()];
        row.extend(distribution_cells(&stats.rating_distribution));
        rows.push(row);
    }
    (title, rows)
}

fn outcome_rows(report: &OutcomeReport) -> (String, Vec<Vec<String>>) {
    let title = format!("Outcome Report - {}", report.code);
    let mut rows: Vec<Vec<String>> = Vec::new();
    kv(&mut rows, "Class", report.class.name.clone());
    kv(&mut rows, "Outcome", format!("{} {}", report.code, report.description));
    kv(&mut rows, "Strand", report.strand_name.clone());
    kv(&mut rows, "Subject", report.subject_name.clone());
    if let Some(term) = &report.term {
        kv(&mut rows, "Term", term.name.clone());
    }
    kv(&mut rows, "Performance Score", report.performance_score.to_string());
    rows.push(Vec::new());

    rows.push(
        ["Student", "Latest Rating", "Symbol", "Date", "Assessments"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    );
    for student in &report.students {
        rows.push(vec![
            student.display_name.clone(),
            student.latest_rating.clone().unwrap_or_default(),
            symbol_for(student.latest_rating.as_deref()),
            student.latest_date.clone().unwrap_or_default(),
            student.assessment_count.to_string(),
        ]);
    }
    (title, rows)
}

fn class_rows(report: &ClassSummary) -> (String, Vec<Vec<String>>) {
    let title = format!("Class Summary - {}", report.class.name);
    let mut rows: Vec<Vec<String>> = Vec::new();
    kv(&mut rows, "Class", report.class.name.clone());
    if let Some(term) = &report.term {
        kv(&mut rows, "Term", term.name.clone());
    }
    kv(&mut rows, "Students", report.student_count.to_string());
    kv(&mut rows, "Performance Score", report.performance_score.to_string());
    kv(&mut rows, "Total Outcomes", report.total_outcomes.to_string());
    rows.push(Vec::new());

    rows.push(
        [
            "Student",
            "Assessments",
            "Distinct Outcomes",
            "Completion",
            "Score",
            "Easily Meeting",
            "Meeting",
            "Needs Practice",
            "Total",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect(),
    );
    for s in &report.per_student {
        let mut row = vec![
            s.display_name.clone(),
            s.assessment_count.to_string(),
            s.distinct_outcomes.to_string(),
            format!("{:.1}", s.completion_rate),
            s.performance_score.to_string(),
        ];
        row.extend(distribution_cells(&s.rating_distribution));
        rows.push(row);
    }

    if !report.needs_attention.is_empty() {
        rows.push(Vec::new());
        rows.push(
            ["Needs Attention", "Needs Practice Count", "Share"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );
        for a in &report.needs_attention {
            rows.push(vec![
                a.display_name.clone(),
                a.needs_practice_count.to_string(),
                format!("{:.1}", a.needs_practice_share),
            ]);
        }
    }
    (title, rows)
}

fn school_rows(report: &SchoolSummary) -> (String, Vec<Vec<String>>) {
    let title = format!("School Summary - {}", report.school.name);
    let mut rows: Vec<Vec<String>> = Vec::new();
    kv(&mut rows, "School", report.school.name.clone());
    if let Some(term) = &report.term {
        kv(&mut rows, "Term", term.name.clone());
    }
    kv(&mut rows, "Classes", report.class_count.to_string());
    kv(&mut rows, "Students", report.student_count.to_string());
    kv(&mut rows, "Performance Score", report.performance_score.to_string());
    rows.push(Vec::new());

    rows.push(
        [
            "Class",
            "Students",
            "Assessments",
            "Distinct Outcomes",
            "Completion",
            "Score",
            "Easily Meeting",
            "Meeting",
            "Needs Practice",
            "Total",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect(),
    );
    for c in &report.per_class {
        let mut row = vec![
            c.name.clone(),
            c.student_count.to_string(),
            c.assessment_count.to_string(),
            c.distinct_outcomes.to_string(),
            format!("{:.1}", c.completion_rate),
            c.performance_score.to_string(),
        ];
        row.extend(distribution_cells(&c.rating_distribution));
        rows.push(row);
    }

    if !report.needs_attention.is_empty() {
        rows.push(Vec::new());
        rows.push(
            ["Class Needing Attention", "Score", "Assessments"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );
        for a in &report.needs_attention {
            rows.push(vec![
                a.name.clone(),
                a.performance_score.to_string(),
                a.assessment_count.to_string(),
            ]);
        }
    }
    (title, rows)
}

// ---------------------------------------------------------------------------
// CSV

fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn csv_bytes(rows: &[Vec<String>]) -> Vec<u8> {
    let mut out = String::new();
    for row in rows {
        let line = row
            .iter()
            .map(|cell| csv_quote(cell))
            .collect::<Vec<_>>()
            .join(",");
        out.push_str(&line);
        out.push('\n');
    }
    out.into_bytes()
}

// ---------------------------------------------------------------------------
// PDF: a minimal text rendering of the same rows, one Courier line per
// row, paginated on US Letter.

const PDF_LINES_PER_PAGE: usize = 54;

fn pdf_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '(' => out.push_str("\\("),
            ')' => out.push_str("\\)"),
            c if c.is_ascii() && !c.is_ascii_control() => out.push(c),
            _ => out.push('?'),
        }
    }
    out
}

fn pdf_bytes(title: &str, rows: &[Vec<String>]) -> Vec<u8> {
    let mut lines: Vec<String> = Vec::with_capacity(rows.len() + 2);
    lines.push(title.to_string());
    lines.push(String::new());
    for row in rows {
        lines.push(row.join("  "));
    }

    let chunks: Vec<&[String]> = if lines.is_empty() {
        vec![&[]]
    } else {
        lines.chunks(PDF_LINES_PER_PAGE).collect()
    };
    let page_count = chunks.len();

    // Object layout: 1 catalog, 2 page tree, 3 font, then an alternating
    // page/content pair per page.
    let mut objects: Vec<String> = Vec::new();
    objects.push("<< /Type /Catalog /Pages 2 0 R >>".to_string());
    let kids = (0..page_count)
        .map(|p| format!("{} 0 R", 4 + 2 * p))
        .collect::<Vec<_>>()
        .join(" ");
    objects.push(format!(
        "<< /Type /Pages /Kids [{kids}] /Count {page_count} >>"
    ));
    objects.push("<< /Type /Font /Subtype /Type1 /BaseFont /Courier >>".to_string());

    for (p, chunk) in chunks.iter().enumerate() {
        let content_id = 5 + 2 * p;
        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
             /Resources << /Font << /F1 3 0 R >> >> /Contents {content_id} 0 R >>"
        ));

        let mut stream = String::from("BT\n/F1 9 Tf\n12 TL\n36 756 Td\n");
        for line in chunk.iter() {
            stream.push_str(&format!("({}) Tj\nT*\n", pdf_escape(line)));
        }
        stream.push_str("ET\n");
        objects.push(format!(
            "<< /Length {} >>\nstream\n{}endstream",
            stream.len(),
            stream
        ));
    }

    let mut out = String::from("%PDF-1.4\n");
    let mut offsets: Vec<usize> = Vec::with_capacity(objects.len());
    for (i, obj) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.push_str(&format!("{} 0 obj\n{}\nendobj\n", i + 1, obj));
    }
    let xref_pos = out.len();
    out.push_str(&format!("xref\n0 {}\n", objects.len() + 1));
    out.push_str("0000000000 65535 f \n");
    for offset in &offsets {
        out.push_str(&format!("{offset:010} 00000 n \n"));
    }
    out.push_str(&format!(
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
        objects.len() + 1,
        xref_pos
    ));
    out.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_kind_round_trips() {
        for kind in [
            ReportKind::Student,
            ReportKind::StudentSubject,
            ReportKind::Strand,
            ReportKind::Outcome,
            ReportKind::Class,
            ReportKind::School,
        ] {
            assert_eq!(ReportKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ReportKind::parse("grades"), None);
    }

    #[test]
    fn filename_carries_kind_and_extension() {
        let name = export_filename(ReportKind::Strand, ExportFormat::Csv);
        assert!(name.starts_with("strand-report-"));
        assert!(name.ends_with(".csv"));
        let name = export_filename(ReportKind::School, ExportFormat::Pdf);
        assert!(name.starts_with("school-report-"));
        assert!(name.ends_with(".pdf"));
    }

    #[test]
    fn csv_quotes_commas_and_doubles_quotes() {
        assert_eq!(csv_quote("plain"), "plain");
        assert_eq!(csv_quote("a,b"), "\"a,b\"");
        assert_eq!(csv_quote("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn symbols_map_ratings_and_blank() {
        assert_eq!(symbol_for(Some("EASILY_MEETING")), "+");
        assert_eq!(symbol_for(Some("MEETING")), "=");
        assert_eq!(symbol_for(Some("NEEDS_PRACTICE")), "x");
        assert_eq!(symbol_for(Some("LEGACY")), "-");
        assert_eq!(symbol_for(None), "-");
    }

    #[test]
    fn pdf_output_has_header_and_trailer() {
        let rows = vec![vec!["a".to_string(), "b".to_string()]];
        let bytes = pdf_bytes("Title (test)", &rows);
        let text = String::from_utf8(bytes).expect("ascii pdf");
        assert!(text.starts_with("%PDF-1.4"));
        assert!(text.ends_with("%%EOF\n"));
        assert!(text.contains("/Count 1"));
        // Parens in text content are escaped.
        assert!(text.contains("(Title \\(test\\)) Tj"));
    }
}
