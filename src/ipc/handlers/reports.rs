//! Report endpoints: thin glue from the wire to the assembler. Parameter
//! validation and scoping live in the assembler so the same rules apply to
//! exports.

use crate::assembler::{ReportAssembler, ReportParams};
use crate::ipc::error::{fail, ok};
use crate::ipc::helpers::{db_conn, load_actor, opt_str};
use crate::ipc::types::{AppState, Request};
use crate::repo::SqliteRepository;
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

macro_rules! report_handler {
    ($name:ident, $method:ident) => {
        fn $name(state: &mut AppState, req: &Request) -> serde_json::Value {
            let conn = match db_conn(state, req) {
                Ok(v) => v,
                Err(e) => return e,
            };
            let actor = match load_actor(conn, req) {
                Ok(v) => v,
                Err(e) => return e,
            };
            let repo = SqliteRepository::new(conn);
            let assembler = ReportAssembler::new(&repo);
            match assembler.$method(&actor, &report_params(req)) {
                Ok(report) => ok(&req.id, json!(report)),
                Err(e) => fail(&req.id, e),
            }
        }
    };
}

report_handler!(handle_student, student_report);
report_handler!(handle_strand, strand_report);
report_handler!(handle_outcome, outcome_report);
report_handler!(handle_class_summary, class_summary);
report_handler!(handle_school_summary, school_summary);

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.student" => Some(handle_student(state, req)),
        "reports.strand" => Some(handle_strand(state, req)),
        "reports.outcome" => Some(handle_outcome(state, req)),
        "reports.classSummary" => Some(handle_class_summary(state, req)),
        "reports.schoolSummary" => Some(handle_school_summary(state, req)),
        _ => None,
    }
}
