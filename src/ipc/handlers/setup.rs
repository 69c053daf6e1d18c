//! Tenant, roster, and curriculum setup: the thin CRUD surface the
//! reporting core sits on top of. Creation tiers: countries and actors are
//! superuser/country-admin territory, school-scoped resources need an
//! admin assigned to that school, curriculum is shared across tenants and
//! admin-tier.

use crate::access::{Actor, ActorKind};
use crate::ipc::error::{err, fail, ok};
use crate::ipc::helpers::{db_conn, load_actor, opt_i64, opt_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::repo::{OutcomeFilter, Repository, SqliteRepository, StudentFilter};
use crate::report::ReportError;
use chrono::DateTime;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn require_superuser_tier(req: &Request, actor: &Actor) -> Result<(), serde_json::Value> {
    match actor.kind {
        ActorKind::Superuser | ActorKind::CountryAdmin { .. } => Ok(()),
        _ => Err(fail(
            &req.id,
            ReportError::forbidden("requires superuser or country admin"),
        )),
    }
}

fn require_admin_tier(req: &Request, actor: &Actor) -> Result<(), serde_json::Value> {
    if actor.is_admin_tier() {
        Ok(())
    } else {
        Err(fail(&req.id, ReportError::forbidden("requires an admin role")))
    }
}

fn require_school(
    req: &Request,
    actor: &Actor,
    school_id: &str,
) -> Result<(), serde_json::Value> {
    actor
        .authorize_school(school_id)
        .map_err(|e| fail(&req.id, e))
}

fn handle_countries_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let actor = match load_actor(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if !matches!(actor.kind, ActorKind::Superuser) {
        return fail(&req.id, ReportError::forbidden("requires superuser"));
    }
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute("INSERT INTO countries(id, name) VALUES (?, ?)", (&id, &name)) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "countryId": id }))
}

fn handle_schools_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let actor = match load_actor(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = require_superuser_tier(req, &actor) {
        return e;
    }
    let country_id = match required_str(req, "countryId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match country_exists(conn, &country_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "country not found", None),
        Err(e) => return fail(&req.id, e),
    }

    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO schools(id, country_id, name) VALUES (?, ?, ?)",
        (&id, &country_id, &name),
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "schoolId": id }))
}

fn country_exists(conn: &Connection, id: &str) -> Result<bool, ReportError> {
    conn.query_row("SELECT COUNT(*) FROM countries WHERE id = ?", [id], |r| {
        r.get::<_, i64>(0)
    })
    .map(|n| n > 0)
    .map_err(|e| ReportError::db(e.to_string()))
}

fn actors_table_empty(conn: &Connection) -> Result<bool, ReportError> {
    conn.query_row("SELECT COUNT(*) FROM actors", [], |r| r.get::<_, i64>(0))
        .map(|n| n == 0)
        .map_err(|e| ReportError::db(e.to_string()))
}

/// Actor creation. The very first actor bootstraps the workspace without
/// a caller; after that, only superuser/country-admin may add actors.
fn handle_actors_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let bootstrap = match actors_table_empty(conn) {
        Ok(v) => v,
        Err(e) => return fail(&req.id, e),
    };
    if !bootstrap {
        let actor = match load_actor(conn, req) {
            Ok(v) => v,
            Err(e) => return e,
        };
        if let Err(e) = require_superuser_tier(req, &actor) {
            return e;
        }
    }

    let role = match required_str(req, "role") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if crate::domain::Role::parse(&role).is_none() {
        return err(
            &req.id,
            "bad_params",
            "role must be one of: SUPERUSER, COUNTRY_ADMIN, SCHOOL_ADMIN, TEACHER, PARENT_STUDENT",
            Some(json!({ "role": role })),
        );
    }
    let display_name = match required_str(req, "displayName") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO actors(id, role, display_name, active) VALUES (?, ?, ?, 1)",
        (&id, &role, &display_name),
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }

    // Optional assignment relations: each entry targets exactly one of
    // schoolId / countryId / studentId.
    if let Some(entries) = req.params.get("assignments").and_then(|v| v.as_array()) {
        for entry in entries {
            let school_id = entry.get("schoolId").and_then(|v| v.as_str());
            let country_id = entry.get("countryId").and_then(|v| v.as_str());
            let student_id = entry.get("studentId").and_then(|v| v.as_str());
            let targets = [school_id, country_id, student_id]
                .iter()
                .filter(|t| t.is_some())
                .count();
            if targets != 1 {
                return err(
                    &req.id,
                    "bad_params",
                    "each assignment must set exactly one of schoolId, countryId, studentId",
                    None,
                );
            }
            let assignment_id = Uuid::new_v4().to_string();
            if let Err(e) = conn.execute(
                "INSERT INTO actor_assignments(id, actor_id, school_id, country_id, student_id)
                 VALUES (?, ?, ?, ?, ?)",
                (&assignment_id, &id, school_id, country_id, student_id),
            ) {
                return err(&req.id, "db_query_failed", e.to_string(), None);
            }
        }
    }

    ok(&req.id, json!({ "actorId": id }))
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let actor = match load_actor(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = require_admin_tier(req, &actor) {
        return e;
    }
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let sort_order = opt_i64(req, "sortOrder").unwrap_or(0);

    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO subjects(id, name, sort_order) VALUES (?, ?, ?)",
        (&id, &name, sort_order),
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "subjectId": id }))
}

fn handle_strands_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let actor = match load_actor(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = require_admin_tier(req, &actor) {
        return e;
    }
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let sort_order = opt_i64(req, "sortOrder").unwrap_or(0);

    let repo = SqliteRepository::new(conn);
    match repo.subject(&subject_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "subject not found", None),
        Err(e) => return fail(&req.id, e),
    }

    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO strands(id, subject_id, name, sort_order) VALUES (?, ?, ?, ?)",
        (&id, &subject_id, &name, sort_order),
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "strandId": id }))
}

fn handle_outcomes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let actor = match load_actor(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = require_admin_tier(req, &actor) {
        return e;
    }
    let strand_id = match required_str(req, "strandId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let code = match required_str(req, "code") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let description = match required_str(req, "description") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let sort_order = opt_i64(req, "sortOrder").unwrap_or(0);

    let repo = SqliteRepository::new(conn);
    match repo.strand(&strand_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "strand not found", None),
        Err(e) => return fail(&req.id, e),
    }

    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO outcomes(id, strand_id, code, description, sort_order)
         VALUES (?, ?, ?, ?, ?)",
        (&id, &strand_id, &code, &description, sort_order),
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "outcomeId": id }))
}

fn handle_outcomes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = load_actor(conn, req) {
        return e;
    }
    let repo = SqliteRepository::new(conn);
    let filter = OutcomeFilter {
        subject_id: opt_str(req, "subjectId"),
        strand_id: opt_str(req, "strandId"),
    };
    let outcomes = match repo.outcomes(&filter) {
        Ok(v) => v,
        Err(e) => return fail(&req.id, e),
    };
    let outcomes_json: Vec<serde_json::Value> = outcomes
        .iter()
        .map(|o| {
            json!({
                "id": o.id,
                "code": o.code,
                "description": o.description,
                "sortOrder": o.sort_order,
                "strandId": o.strand_id,
                "strandName": o.strand_name,
                "subjectId": o.subject_id,
                "subjectName": o.subject_name,
            })
        })
        .collect();
    ok(&req.id, json!({ "outcomes": outcomes_json }))
}

fn handle_terms_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let actor = match load_actor(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = require_admin_tier(req, &actor) {
        return e;
    }
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = require_school(req, &actor, &school_id) {
        return e;
    }
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let starts_at = match required_str(req, "startsAt") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let ends_at = match required_str(req, "endsAt") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let (start, end) = match (
        DateTime::parse_from_rfc3339(&starts_at),
        DateTime::parse_from_rfc3339(&ends_at),
    ) {
        (Ok(s), Ok(e)) => (s, e),
        _ => {
            return err(
                &req.id,
                "bad_params",
                "startsAt and endsAt must be RFC 3339 instants",
                None,
            )
        }
    };
    if end <= start {
        return err(&req.id, "bad_params", "endsAt must be after startsAt", None);
    }

    let repo = SqliteRepository::new(conn);
    match repo.school(&school_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "school not found", None),
        Err(e) => return fail(&req.id, e),
    }

    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO terms(id, school_id, name, starts_at, ends_at) VALUES (?, ?, ?, ?, ?)",
        (&id, &school_id, &name, &starts_at, &ends_at),
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "termId": id }))
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let actor = match load_actor(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = require_admin_tier(req, &actor) {
        return e;
    }
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = require_school(req, &actor, &school_id) {
        return e;
    }
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_id = opt_str(req, "teacherId");

    let repo = SqliteRepository::new(conn);
    match repo.school(&school_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "school not found", None),
        Err(e) => return fail(&req.id, e),
    }
    if let Some(tid) = &teacher_id {
        match repo.actor(tid) {
            Ok(Some(_)) => {}
            Ok(None) => return err(&req.id, "not_found", "teacher not found", None),
            Err(e) => return fail(&req.id, e),
        }
    }

    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO classes(id, school_id, name, teacher_id) VALUES (?, ?, ?, ?)",
        (&id, &school_id, &name, &teacher_id),
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "classId": id }))
}

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let actor = match load_actor(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    // Lists degrade to the authorized subset rather than failing.
    if actor.authorize_school(&school_id).is_err() {
        return ok(&req.id, json!({ "classes": [] }));
    }

    let repo = SqliteRepository::new(conn);
    let classes = match repo.classes_in_school(&school_id) {
        Ok(v) => v,
        Err(e) => return fail(&req.id, e),
    };
    let classes_json: Vec<serde_json::Value> = classes
        .iter()
        .map(|c| {
            json!({
                "id": c.id,
                "name": c.name,
                "schoolId": c.school_id,
                "teacherId": c.teacher_id,
            })
        })
        .collect();
    ok(&req.id, json!({ "classes": classes_json }))
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let actor = match load_actor(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = require_admin_tier(req, &actor) {
        return e;
    }
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = require_school(req, &actor, &school_id) {
        return e;
    }
    let first_name = match required_str(req, "firstName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let last_name = match required_str(req, "lastName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = opt_str(req, "classId");
    let active = req
        .params
        .get("active")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);
    let sort_order = opt_i64(req, "sortOrder").unwrap_or(0);

    let repo = SqliteRepository::new(conn);
    match repo.school(&school_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "school not found", None),
        Err(e) => return fail(&req.id, e),
    }
    if let Some(cid) = &class_id {
        match repo.class(cid) {
            Ok(Some(class)) if class.school_id == school_id => {}
            Ok(Some(_)) => {
                return err(
                    &req.id,
                    "bad_params",
                    "class belongs to a different school",
                    None,
                )
            }
            Ok(None) => return err(&req.id, "not_found", "class not found", None),
            Err(e) => return fail(&req.id, e),
        }
    }

    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, school_id, class_id, first_name, last_name, active, sort_order)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &school_id,
            &class_id,
            &first_name,
            &last_name,
            active as i64,
            sort_order,
        ),
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "studentId": id }))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let actor = match load_actor(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = opt_str(req, "schoolId");
    let class_id = opt_str(req, "classId");
    let Some(school_id) = school_id else {
        return err(&req.id, "bad_params", "missing schoolId", None);
    };
    if actor.authorize_school(&school_id).is_err() {
        return ok(&req.id, json!({ "students": [] }));
    }

    let repo = SqliteRepository::new(conn);
    let students = match repo.students(&StudentFilter {
        school_id: Some(school_id),
        class_id,
        active_only: false,
    }) {
        Ok(v) => v,
        Err(e) => return fail(&req.id, e),
    };
    let students_json: Vec<serde_json::Value> = students
        .iter()
        .map(|s| {
            json!({
                "id": s.id,
                "displayName": s.display_name(),
                "schoolId": s.school_id,
                "classId": s.class_id,
                "active": s.active,
                "sortOrder": s.sort_order,
            })
        })
        .collect();
    ok(&req.id, json!({ "students": students_json }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "countries.create" => Some(handle_countries_create(state, req)),
        "schools.create" => Some(handle_schools_create(state, req)),
        "actors.create" => Some(handle_actors_create(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "strands.create" => Some(handle_strands_create(state, req)),
        "outcomes.create" => Some(handle_outcomes_create(state, req)),
        "outcomes.list" => Some(handle_outcomes_list(state, req)),
        "terms.create" => Some(handle_terms_create(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.list" => Some(handle_classes_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        _ => None,
    }
}
