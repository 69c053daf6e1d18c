//! Assessment recording and retrieval. Writes go through the full
//! authorization chain (role check, then student scope, then creator check
//! for mutation); the list endpoint instead narrows its filter to the
//! actor's scope and returns whatever remains.

use crate::access::{Actor, ActorKind, SchoolScope};
use crate::domain::Rating;
use crate::ipc::error::{err, fail, ok};
use crate::ipc::helpers::{db_conn, load_actor, opt_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::repo::{AssessmentFilter, Repository, SqliteRepository};
use crate::report::ReportError;
use chrono::{NaiveDate, Utc};
use serde_json::json;
use uuid::Uuid;

fn validate_rating(req: &Request, rating: &str) -> Result<(), serde_json::Value> {
    if Rating::parse(rating).is_some() {
        Ok(())
    } else {
        Err(err(
            &req.id,
            "bad_params",
            "rating must be one of: EASILY_MEETING, MEETING, NEEDS_PRACTICE",
            Some(json!({ "rating": rating })),
        ))
    }
}

fn validate_date(req: &Request, date: &str) -> Result<(), serde_json::Value> {
    if NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok() {
        Ok(())
    } else {
        Err(err(
            &req.id,
            "bad_params",
            "date must be YYYY-MM-DD",
            Some(json!({ "date": date })),
        ))
    }
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let actor = match load_actor(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if !actor.can_record_assessments() {
        return fail(
            &req.id,
            ReportError::forbidden("this role cannot record assessments"),
        );
    }

    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let outcome_id = match required_str(req, "outcomeId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let term_id = match required_str(req, "termId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let rating = match required_str(req, "rating") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let date = match required_str(req, "date") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let comment = opt_str(req, "comment");

    if let Err(e) = validate_rating(req, &rating) {
        return e;
    }
    if let Err(e) = validate_date(req, &date) {
        return e;
    }

    let repo = SqliteRepository::new(conn);
    let student = match repo.student(&student_id) {
        Ok(Some(s)) => s,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return fail(&req.id, e),
    };
    match repo.outcome(&outcome_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "outcome not found", None),
        Err(e) => return fail(&req.id, e),
    }
    match repo.term(&term_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "term not found", None),
        Err(e) => return fail(&req.id, e),
    }
    if let Err(e) = actor.authorize_student(&student) {
        return fail(&req.id, e);
    }

    let id = Uuid::new_v4().to_string();
    let created_at = Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO assessments(id, student_id, outcome_id, term_id, assessed_by, created_by,
                                 date, rating, comment, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &student_id,
            &outcome_id,
            &term_id,
            &actor.id,
            &actor.id,
            &date,
            &rating,
            &comment,
            &created_at,
        ),
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "assessmentId": id }))
}

/// Fetch the assessment plus its owning student and run the mutation
/// authorization chain. Shared by update and delete.
fn load_for_mutation(
    conn: &rusqlite::Connection,
    req: &Request,
    actor: &Actor,
) -> Result<crate::domain::AssessmentRow, serde_json::Value> {
    let assessment_id = required_str(req, "assessmentId")?;
    let repo = SqliteRepository::new(conn);
    let assessment = match repo.assessment(&assessment_id) {
        Ok(Some(a)) => a,
        Ok(None) => return Err(err(&req.id, "not_found", "assessment not found", None)),
        Err(e) => return Err(fail(&req.id, e)),
    };
    let student = match repo.student(&assessment.student_id) {
        Ok(Some(s)) => s,
        Ok(None) => return Err(err(&req.id, "not_found", "student not found", None)),
        Err(e) => return Err(fail(&req.id, e)),
    };
    actor
        .authorize_assessment(&assessment, &student, true)
        .map_err(|e| fail(&req.id, e))?;
    Ok(assessment)
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let actor = match load_actor(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if !actor.can_record_assessments() {
        return fail(
            &req.id,
            ReportError::forbidden("this role cannot record assessments"),
        );
    }
    let assessment = match load_for_mutation(conn, req, &actor) {
        Ok(a) => a,
        Err(e) => return e,
    };

    // Patch semantics: only the fields present in params change.
    let rating = opt_str(req, "rating");
    let date = opt_str(req, "date");
    let comment_present = req.params.get("comment").is_some();
    let comment = opt_str(req, "comment");

    if let Some(r) = &rating {
        if let Err(e) = validate_rating(req, r) {
            return e;
        }
    }
    if let Some(d) = &date {
        if let Err(e) = validate_date(req, d) {
            return e;
        }
    }

    let new_rating = rating.unwrap_or_else(|| assessment.rating_raw.clone());
    let new_date = date.unwrap_or_else(|| assessment.date.clone());
    let new_comment = if comment_present {
        comment
    } else {
        assessment.comment.clone()
    };

    if let Err(e) = conn.execute(
        "UPDATE assessments SET rating = ?, date = ?, comment = ? WHERE id = ?",
        (&new_rating, &new_date, &new_comment, &assessment.id),
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "assessmentId": assessment.id }))
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let actor = match load_actor(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if !actor.can_record_assessments() {
        return fail(
            &req.id,
            ReportError::forbidden("this role cannot record assessments"),
        );
    }
    let assessment = match load_for_mutation(conn, req, &actor) {
        Ok(a) => a,
        Err(e) => return e,
    };

    if let Err(e) = conn.execute("DELETE FROM assessments WHERE id = ?", [&assessment.id]) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "deleted": true }))
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let actor = match load_actor(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut filter = AssessmentFilter {
        student_id: opt_str(req, "studentId"),
        class_id: opt_str(req, "classId"),
        school_id: opt_str(req, "schoolId"),
        term_id: opt_str(req, "termId"),
        subject_id: opt_str(req, "subjectId"),
        strand_id: opt_str(req, "strandId"),
        outcome_id: opt_str(req, "outcomeId"),
        ..Default::default()
    };

    // Narrow to the actor's scope instead of refusing: a request outside
    // the scope just intersects down to nothing.
    match &actor.kind {
        ActorKind::ParentStudent { student_ids } => {
            let mut ids: Vec<String> = student_ids.iter().cloned().collect();
            ids.sort();
            if let Some(requested) = &filter.student_id {
                if !student_ids.contains(requested) {
                    ids.clear();
                }
            }
            filter.student_ids = Some(ids);
        }
        _ => match actor.school_scope() {
            SchoolScope::Unrestricted => {}
            scope @ SchoolScope::Schools(_) => {
                filter.school_ids = scope.school_ids();
            }
        },
    }

    let repo = SqliteRepository::new(conn);
    let rows = match repo.assessments(&filter) {
        Ok(v) => v,
        Err(e) => return fail(&req.id, e),
    };
    let rows_json: Vec<serde_json::Value> = rows
        .iter()
        .map(|a| {
            json!({
                "id": a.id,
                "studentId": a.student_id,
                "outcomeId": a.outcome_id,
                "termId": a.term_id,
                "assessedBy": a.assessed_by,
                "date": a.date,
                "rating": a.rating_raw,
                "comment": a.comment,
            })
        })
        .collect();
    ok(&req.id, json!({ "assessments": rows_json }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assessments.create" => Some(handle_create(state, req)),
        "assessments.update" => Some(handle_update(state, req)),
        "assessments.delete" => Some(handle_delete(state, req)),
        "assessments.list" => Some(handle_list(state, req)),
        _ => None,
    }
}
