//! Export endpoint: runs the same assembler path as the report endpoints,
//! then renders the finished report to CSV or PDF and writes the file into
//! the caller-supplied directory.

use std::path::PathBuf;

use crate::assembler::{ReportAssembler, ReportParams};
use crate::export::{self, ExportDocument, ExportFormat, ReportKind, ReportPayload};
use crate::ipc::error::{err, fail, ok};
use crate::ipc::helpers::{db_conn, load_actor, opt_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::repo::{Repository, SqliteRepository};
use crate::report::ReportError;
use serde_json::json;

fn report_params(req: &Request) -> ReportParams {
    ReportParams {
        student_id: opt_str(req, "studentId"),
        class_id: opt_str(req, "classId"),
        school_id: opt_str(req, "schoolId"),
        subject_id: opt_str(req, "subjectId"),
        strand_id: opt_str(req, "strandId"),
        outcome_id: opt_str(req, "outcomeId"),
        term_id: opt_str(req, "termId"),
    }
}

fn assemble_and_render<R: Repository>(
    assembler: &ReportAssembler<'_, R>,
    actor: &crate::access::Actor,
    kind: ReportKind,
    format: ExportFormat,
    params: &ReportParams,
) -> Result<ExportDocument, ReportError> {
    match kind {
        ReportKind::Student => {
            let report = assembler.student_report(actor, params)?;
            export::render(kind, format, &ReportPayload::Student(&report))
        }
        ReportKind::StudentSubject => {
            // Same assembly as the student report, but the subject filter
            // is mandatory for this type.
            if params.subject_id.is_none() {
                return Err(ReportError::bad_params(
                    "subjectId is required for student-subject reports",
                ));
            }
            let report = assembler.student_report(actor, params)?;
            export::render(kind, format, &ReportPayload::Student(&report))
        }
        ReportKind::Strand => {
            let report = assembler.strand_report(actor, params)?;
            export::render(kind, format, &ReportPayload::Strand(&report))
        }
        ReportKind::Outcome => {
            let report = assembler.outcome_report(actor, params)?;
            export::render(kind, format, &ReportPayload::Outcome(&report))
        }
        ReportKind::Class => {
            let report = assembler.class_summary(actor, params)?;
            export::render(kind, format, &ReportPayload::Class(&report))
        }
        ReportKind::School => {
            let report = assembler.school_summary(actor, params)?;
            export::render(kind, format, &ReportPayload::School(&report))
        }
    }
}

fn handle_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let actor = match load_actor(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let report_type = match required_str(req, "reportType") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(kind) = ReportKind::parse(&report_type) else {
        return err(
            &req.id,
            "bad_params",
            "reportType must be one of: student, student-subject, strand, outcome, class, school",
            Some(json!({ "reportType": report_type })),
        );
    };
    let format_raw = match required_str(req, "format") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(format) = ExportFormat::parse(&format_raw) else {
        return err(
            &req.id,
            "bad_params",
            "format must be csv or pdf",
            Some(json!({ "format": format_raw })),
        );
    };
    let out_dir = match required_str(req, "outDir") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e,
    };

    let repo = SqliteRepository::new(conn);
    let assembler = ReportAssembler::new(&repo);
    let doc = match assemble_and_render(&assembler, &actor, kind, format, &report_params(req)) {
        Ok(doc) => doc,
        Err(e) => return fail(&req.id, e),
    };

    let path = out_dir.join(&doc.filename);
    if let Err(e) = std::fs::create_dir_all(&out_dir).and_then(|_| std::fs::write(&path, &doc.bytes))
    {
        return err(&req.id, "write_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "path": path.to_string_lossy(),
            "filename": doc.filename,
            "contentType": doc.content_type,
            "byteCount": doc.bytes.len(),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.export" => Some(handle_export(state, req)),
        _ => None,
    }
}
