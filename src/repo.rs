//! Repository facade: the query contract the reporting core depends on,
//! plus its SQLite implementation. The assembler and resolver only ever
//! see the trait, so tests can substitute a recording stub.

use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension, Row};

use crate::domain::{
    ActorRecord, Assignment, AssessmentRow, Class, OutcomeRow, Role, School, Strand, Student,
    Subject, Term,
};
use crate::report::ReportError;

#[derive(Debug, Clone, Default)]
pub struct OutcomeFilter {
    pub subject_id: Option<String>,
    pub strand_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StudentFilter {
    pub school_id: Option<String>,
    pub class_id: Option<String>,
    pub active_only: bool,
}

/// Assessment query filter. Every field is optional and combinable; list
/// handlers narrow `school_ids`/`student_ids` to the actor's scope.
#[derive(Debug, Clone, Default)]
pub struct AssessmentFilter {
    pub student_id: Option<String>,
    pub class_id: Option<String>,
    pub school_id: Option<String>,
    pub school_ids: Option<Vec<String>>,
    pub student_ids: Option<Vec<String>>,
    pub term_id: Option<String>,
    pub subject_id: Option<String>,
    pub strand_id: Option<String>,
    pub outcome_id: Option<String>,
}

pub trait Repository {
    fn actor(&self, id: &str) -> Result<Option<ActorRecord>, ReportError>;
    fn assignments(&self, actor_id: &str) -> Result<Vec<Assignment>, ReportError>;
    fn class_ids_taught_by(&self, actor_id: &str) -> Result<Vec<String>, ReportError>;

    fn school(&self, id: &str) -> Result<Option<School>, ReportError>;
    fn class(&self, id: &str) -> Result<Option<Class>, ReportError>;
    fn student(&self, id: &str) -> Result<Option<Student>, ReportError>;
    fn term(&self, id: &str) -> Result<Option<Term>, ReportError>;
    fn subject(&self, id: &str) -> Result<Option<Subject>, ReportError>;
    fn strand(&self, id: &str) -> Result<Option<Strand>, ReportError>;
    fn outcome(&self, id: &str) -> Result<Option<OutcomeRow>, ReportError>;

    /// Curriculum query, ordered by subject, strand, then outcome sort
    /// order.
    fn outcomes(&self, filter: &OutcomeFilter) -> Result<Vec<OutcomeRow>, ReportError>;
    /// Roster order (sort_order, then name).
    fn students(&self, filter: &StudentFilter) -> Result<Vec<Student>, ReportError>;
    fn classes_in_school(&self, school_id: &str) -> Result<Vec<Class>, ReportError>;

    fn assessment(&self, id: &str) -> Result<Option<AssessmentRow>, ReportError>;
    /// Ordered by date then insertion sequence.
    fn assessments(&self, filter: &AssessmentFilter) -> Result<Vec<AssessmentRow>, ReportError>;
}

pub struct SqliteRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

fn db_err(e: rusqlite::Error) -> ReportError {
    ReportError::db(e.to_string())
}

fn student_from_row(r: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: r.get(0)?,
        school_id: r.get(1)?,
        class_id: r.get(2)?,
        first_name: r.get(3)?,
        last_name: r.get(4)?,
        active: r.get::<_, i64>(5)? != 0,
        sort_order: r.get(6)?,
    })
}

fn outcome_from_row(r: &Row<'_>) -> rusqlite::Result<OutcomeRow> {
    Ok(OutcomeRow {
        id: r.get(0)?,
        code: r.get(1)?,
        description: r.get(2)?,
        sort_order: r.get(3)?,
        strand_id: r.get(4)?,
        strand_name: r.get(5)?,
        strand_sort_order: r.get(6)?,
        subject_id: r.get(7)?,
        subject_name: r.get(8)?,
        subject_sort_order: r.get(9)?,
    })
}

fn assessment_from_row(r: &Row<'_>) -> rusqlite::Result<AssessmentRow> {
    Ok(AssessmentRow {
        id: r.get(0)?,
        seq: r.get(1)?,
        student_id: r.get(2)?,
        outcome_id: r.get(3)?,
        term_id: r.get(4)?,
        assessed_by: r.get(5)?,
        created_by: r.get(6)?,
        date: r.get(7)?,
        rating_raw: r.get(8)?,
        comment: r.get(9)?,
    })
}

const OUTCOME_SELECT: &str = "SELECT o.id, o.code, o.description, o.sort_order,
        st.id, st.name, st.sort_order,
        su.id, su.name, su.sort_order
 FROM outcomes o
 JOIN strands st ON st.id = o.strand_id
 JOIN subjects su ON su.id = st.subject_id";

const ASSESSMENT_SELECT: &str = "SELECT a.id, a.rowid, a.student_id, a.outcome_id, a.term_id,
        a.assessed_by, a.created_by, a.date, a.rating, a.comment
 FROM assessments a
 JOIN students s ON s.id = a.student_id
 JOIN outcomes o ON o.id = a.outcome_id
 JOIN strands st ON st.id = o.strand_id";

impl Repository for SqliteRepository<'_> {
    fn actor(&self, id: &str) -> Result<Option<ActorRecord>, ReportError> {
        let row: Option<(String, String, String, i64)> = self
            .conn
            .query_row(
                "SELECT id, role, display_name, active FROM actors WHERE id = ?",
                [id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .optional()
            .map_err(db_err)?;
        let Some((id, role_raw, display_name, active)) = row else {
            return Ok(None);
        };
        let role = Role::parse(&role_raw)
            .ok_or_else(|| ReportError::db(format!("unknown actor role: {role_raw}")))?;
        Ok(Some(ActorRecord {
            id,
            role,
            display_name,
            active: active != 0,
        }))
    }

    fn assignments(&self, actor_id: &str) -> Result<Vec<Assignment>, ReportError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT school_id, country_id, student_id
                 FROM actor_assignments
                 WHERE actor_id = ?",
            )
            .map_err(db_err)?;
        stmt.query_map([actor_id], |r| {
            Ok(Assignment {
                school_id: r.get(0)?,
                country_id: r.get(1)?,
                student_id: r.get(2)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)
    }

    fn class_ids_taught_by(&self, actor_id: &str) -> Result<Vec<String>, ReportError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM classes WHERE teacher_id = ?")
            .map_err(db_err)?;
        stmt.query_map([actor_id], |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(db_err)
    }

    fn school(&self, id: &str) -> Result<Option<School>, ReportError> {
        self.conn
            .query_row(
                "SELECT id, country_id, name FROM schools WHERE id = ?",
                [id],
                |r| {
                    Ok(School {
                        id: r.get(0)?,
                        country_id: r.get(1)?,
                        name: r.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(db_err)
    }

    fn class(&self, id: &str) -> Result<Option<Class>, ReportError> {
        self.conn
            .query_row(
                "SELECT id, school_id, name, teacher_id FROM classes WHERE id = ?",
                [id],
                |r| {
                    Ok(Class {
                        id: r.get(0)?,
                        school_id: r.get(1)?,
                        name: r.get(2)?,
                        teacher_id: r.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(db_err)
    }

    fn student(&self, id: &str) -> Result<Option<Student>, ReportError> {
        self.conn
            .query_row(
                "SELECT id, school_id, class_id, first_name, last_name, active, sort_order
                 FROM students WHERE id = ?",
                [id],
                student_from_row,
            )
            .optional()
            .map_err(db_err)
    }

    fn term(&self, id: &str) -> Result<Option<Term>, ReportError> {
        self.conn
            .query_row(
                "SELECT id, school_id, name, starts_at, ends_at FROM terms WHERE id = ?",
                [id],
                |r| {
                    Ok(Term {
                        id: r.get(0)?,
                        school_id: r.get(1)?,
                        name: r.get(2)?,
                        starts_at: r.get(3)?,
                        ends_at: r.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(db_err)
    }

    fn subject(&self, id: &str) -> Result<Option<Subject>, ReportError> {
        self.conn
            .query_row(
                "SELECT id, name, sort_order FROM subjects WHERE id = ?",
                [id],
                |r| {
                    Ok(Subject {
                        id: r.get(0)?,
                        name: r.get(1)?,
                        sort_order: r.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(db_err)
    }

    fn strand(&self, id: &str) -> Result<Option<Strand>, ReportError> {
        self.conn
            .query_row(
                "SELECT id, subject_id, name, sort_order FROM strands WHERE id = ?",
                [id],
                |r| {
                    Ok(Strand {
                        id: r.get(0)?,
                        subject_id: r.get(1)?,
                        name: r.get(2)?,
                        sort_order: r.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(db_err)
    }

    fn outcome(&self, id: &str) -> Result<Option<OutcomeRow>, ReportError> {
        self.conn
            .query_row(
                &format!("{OUTCOME_SELECT} WHERE o.id = ?"),
                [id],
                outcome_from_row,
            )
            .optional()
            .map_err(db_err)
    }

    fn outcomes(&self, filter: &OutcomeFilter) -> Result<Vec<OutcomeRow>, ReportError> {
        let mut sql = String::from(OUTCOME_SELECT);
        let mut clauses: Vec<&str> = Vec::new();
        let mut binds: Vec<Value> = Vec::new();
        if let Some(subject_id) = &filter.subject_id {
            clauses.push("su.id = ?");
            binds.push(Value::Text(subject_id.clone()));
        }
        if let Some(strand_id) = &filter.strand_id {
            clauses.push("st.id = ?");
            binds.push(Value::Text(strand_id.clone()));
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY su.sort_order, st.sort_order, o.sort_order");

        let mut stmt = self.conn.prepare(&sql).map_err(db_err)?;
        stmt.query_map(params_from_iter(binds), outcome_from_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(db_err)
    }

    fn students(&self, filter: &StudentFilter) -> Result<Vec<Student>, ReportError> {
        let mut sql = String::from(
            "SELECT id, school_id, class_id, first_name, last_name, active, sort_order
             FROM students",
        );
        let mut clauses: Vec<&str> = Vec::new();
        let mut binds: Vec<Value> = Vec::new();
        if let Some(school_id) = &filter.school_id {
            clauses.push("school_id = ?");
            binds.push(Value::Text(school_id.clone()));
        }
        if let Some(class_id) = &filter.class_id {
            clauses.push("class_id = ?");
            binds.push(Value::Text(class_id.clone()));
        }
        if filter.active_only {
            clauses.push("active != 0");
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY sort_order, last_name, first_name");

        let mut stmt = self.conn.prepare(&sql).map_err(db_err)?;
        stmt.query_map(params_from_iter(binds), student_from_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(db_err)
    }

    fn classes_in_school(&self, school_id: &str) -> Result<Vec<Class>, ReportError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, school_id, name, teacher_id
                 FROM classes WHERE school_id = ? ORDER BY name",
            )
            .map_err(db_err)?;
        stmt.query_map([school_id], |r| {
            Ok(Class {
                id: r.get(0)?,
                school_id: r.get(1)?,
                name: r.get(2)?,
                teacher_id: r.get(3)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)
    }

    fn assessment(&self, id: &str) -> Result<Option<AssessmentRow>, ReportError> {
        self.conn
            .query_row(
                &format!("{ASSESSMENT_SELECT} WHERE a.id = ?"),
                [id],
                assessment_from_row,
            )
            .optional()
            .map_err(db_err)
    }

    fn assessments(&self, filter: &AssessmentFilter) -> Result<Vec<AssessmentRow>, ReportError> {
        let mut sql = String::from(ASSESSMENT_SELECT);
        let mut clauses: Vec<String> = Vec::new();
        let mut binds: Vec<Value> = Vec::new();

        if let Some(v) = &filter.student_id {
            clauses.push("a.student_id = ?".to_string());
            binds.push(Value::Text(v.clone()));
        }
        if let Some(v) = &filter.class_id {
            clauses.push("s.class_id = ?".to_string());
            binds.push(Value::Text(v.clone()));
        }
        if let Some(v) = &filter.school_id {
            clauses.push("s.school_id = ?".to_string());
            binds.push(Value::Text(v.clone()));
        }
        if let Some(ids) = &filter.school_ids {
            // Scope restriction for list queries; empty scope matches nothing.
            let placeholders = std::iter::repeat("?")
                .take(ids.len().max(1))
                .collect::<Vec<_>>()
                .join(",");
            clauses.push(format!("s.school_id IN ({placeholders})"));
            if ids.is_empty() {
                binds.push(Value::Null);
            } else {
                for id in ids {
                    binds.push(Value::Text(id.clone()));
                }
            }
        }
        if let Some(ids) = &filter.student_ids {
            let placeholders = std::iter::repeat("?")
                .take(ids.len().max(1))
                .collect::<Vec<_>>()
                .join(",");
            clauses.push(format!("a.student_id IN ({placeholders})"));
            if ids.is_empty() {
                binds.push(Value::Null);
            } else {
                for id in ids {
                    binds.push(Value::Text(id.clone()));
                }
            }
        }
        if let Some(v) = &filter.term_id {
            clauses.push("a.term_id = ?".to_string());
            binds.push(Value::Text(v.clone()));
        }
        if let Some(v) = &filter.subject_id {
            clauses.push("st.subject_id = ?".to_string());
            binds.push(Value::Text(v.clone()));
        }
        if let Some(v) = &filter.strand_id {
            clauses.push("o.strand_id = ?".to_string());
            binds.push(Value::Text(v.clone()));
        }
        if let Some(v) = &filter.outcome_id {
            clauses.push("a.outcome_id = ?".to_string());
            binds.push(Value::Text(v.clone()));
        }

        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY a.date, a.rowid");

        let mut stmt = self.conn.prepare(&sql).map_err(db_err)?;
        stmt.query_map(params_from_iter(binds), assessment_from_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(db_err)
    }
}
