//! AccessScope resolver: maps an actor to authorization decisions over the
//! school -> class -> student -> assessment hierarchy.
//!
//! Checks are two-phase on purpose: resolve the owning school of the
//! requested resource, then apply the school-level decision. The same
//! primitive then composes for classes, students, and assessments.

use std::collections::HashSet;

use crate::domain::{AssessmentRow, Class, Role, Student};
use crate::repo::Repository;
use crate::report::ReportError;

/// Request-time actor with its resolved scope. One variant per role, so
/// role checks are a single match instead of string comparisons spread
/// through the handlers.
#[derive(Debug, Clone)]
pub struct Actor {
    pub id: String,
    pub kind: ActorKind,
}

#[derive(Debug, Clone)]
pub enum ActorKind {
    Superuser,
    CountryAdmin {
        country_id: String,
    },
    SchoolAdmin {
        school_ids: HashSet<String>,
    },
    Teacher {
        school_ids: HashSet<String>,
        class_ids: HashSet<String>,
    },
    ParentStudent {
        student_ids: HashSet<String>,
    },
}

/// Set of schools an actor may read for the current request.
#[derive(Debug, Clone)]
pub enum SchoolScope {
    Unrestricted,
    Schools(HashSet<String>),
}

impl SchoolScope {
    pub fn allows(&self, school_id: &str) -> bool {
        match self {
            SchoolScope::Unrestricted => true,
            SchoolScope::Schools(ids) => ids.contains(school_id),
        }
    }

    /// School-id restriction for list queries, `None` when unrestricted.
    pub fn school_ids(&self) -> Option<Vec<String>> {
        match self {
            SchoolScope::Unrestricted => None,
            SchoolScope::Schools(ids) => {
                let mut v: Vec<String> = ids.iter().cloned().collect();
                v.sort();
                Some(v)
            }
        }
    }
}

fn forbidden() -> ReportError {
    ReportError::forbidden("not permitted for this actor")
}

impl Actor {
    /// Load an actor and resolve its scope from assignment relations.
    /// Teachers additionally get the set of classes they are assigned to
    /// teach, since class-level reporting is restricted to those.
    pub fn load<R: Repository>(repo: &R, actor_id: &str) -> Result<Actor, ReportError> {
        let record = repo
            .actor(actor_id)?
            .ok_or_else(|| ReportError::not_found("actor not found"))?;
        if !record.active {
            return Err(forbidden());
        }
        let assignments = repo.assignments(actor_id)?;

        let school_ids: HashSet<String> = assignments
            .iter()
            .filter_map(|a| a.school_id.clone())
            .collect();

        let kind = match record.role {
            Role::Superuser => ActorKind::Superuser,
            Role::CountryAdmin => {
                let country_id = assignments
                    .iter()
                    .find_map(|a| a.country_id.clone())
                    .unwrap_or_default();
                ActorKind::CountryAdmin { country_id }
            }
            Role::SchoolAdmin => ActorKind::SchoolAdmin { school_ids },
            Role::Teacher => ActorKind::Teacher {
                school_ids,
                class_ids: repo.class_ids_taught_by(actor_id)?.into_iter().collect(),
            },
            Role::ParentStudent => ActorKind::ParentStudent {
                student_ids: assignments
                    .iter()
                    .filter_map(|a| a.student_id.clone())
                    .collect(),
            },
        };
        Ok(Actor {
            id: record.id,
            kind,
        })
    }

    /// Superuser and country admin are unrestricted. Country admins should
    /// eventually be limited to schools in their country.
    /// TODO: restrict CountryAdmin once a country -> school join exists.
    pub fn school_scope(&self) -> SchoolScope {
        match &self.kind {
            ActorKind::Superuser | ActorKind::CountryAdmin { .. } => SchoolScope::Unrestricted,
            ActorKind::SchoolAdmin { school_ids } => SchoolScope::Schools(school_ids.clone()),
            ActorKind::Teacher { school_ids, .. } => SchoolScope::Schools(school_ids.clone()),
            ActorKind::ParentStudent { .. } => SchoolScope::Schools(HashSet::new()),
        }
    }

    pub fn is_admin_tier(&self) -> bool {
        matches!(
            self.kind,
            ActorKind::Superuser | ActorKind::CountryAdmin { .. } | ActorKind::SchoolAdmin { .. }
        )
    }

    /// Roles allowed to record or modify assessments at all.
    pub fn can_record_assessments(&self) -> bool {
        self.is_admin_tier() || matches!(self.kind, ActorKind::Teacher { .. })
    }

    pub fn authorize_school(&self, school_id: &str) -> Result<(), ReportError> {
        if self.school_scope().allows(school_id) {
            Ok(())
        } else {
            Err(forbidden())
        }
    }

    /// School check plus: a teacher may only touch classes they are the
    /// assigned teacher of, even within their own school.
    pub fn authorize_class(&self, class: &Class) -> Result<(), ReportError> {
        self.authorize_school(&class.school_id)?;
        if let ActorKind::Teacher { class_ids, .. } = &self.kind {
            if !class_ids.contains(&class.id) {
                return Err(forbidden());
            }
        }
        Ok(())
    }

    pub fn authorize_student(&self, student: &Student) -> Result<(), ReportError> {
        if let ActorKind::ParentStudent { student_ids } = &self.kind {
            return if student_ids.contains(&student.id) {
                Ok(())
            } else {
                Err(forbidden())
            };
        }
        self.authorize_school(&student.school_id)
    }

    /// Read follows the owning student's school. Mutation additionally
    /// requires being the record's creator unless the actor is admin-tier.
    pub fn authorize_assessment(
        &self,
        assessment: &AssessmentRow,
        student: &Student,
        mutating: bool,
    ) -> Result<(), ReportError> {
        self.authorize_student(student)?;
        if mutating && !self.is_admin_tier() {
            let creator = assessment
                .created_by
                .as_deref()
                .unwrap_or(assessment.assessed_by.as_str());
            if creator != self.id {
                return Err(forbidden());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Class;

    fn teacher(schools: &[&str], classes: &[&str]) -> Actor {
        Actor {
            id: "t1".to_string(),
            kind: ActorKind::Teacher {
                school_ids: schools.iter().map(|s| s.to_string()).collect(),
                class_ids: classes.iter().map(|s| s.to_string()).collect(),
            },
        }
    }

    fn school_admin(schools: &[&str]) -> Actor {
        Actor {
            id: "adm1".to_string(),
            kind: ActorKind::SchoolAdmin {
                school_ids: schools.iter().map(|s| s.to_string()).collect(),
            },
        }
    }

    fn class(id: &str, school: &str, teacher_id: Option<&str>) -> Class {
        Class {
            id: id.to_string(),
            school_id: school.to_string(),
            name: "Class".to_string(),
            teacher_id: teacher_id.map(|t| t.to_string()),
        }
    }

    fn student(id: &str, school: &str) -> Student {
        Student {
            id: id.to_string(),
            school_id: school.to_string(),
            class_id: None,
            first_name: "A".to_string(),
            last_name: "B".to_string(),
            active: true,
            sort_order: 0,
        }
    }

    #[test]
    fn unassigned_teacher_is_forbidden_even_for_reads() {
        let actor = teacher(&["sch1"], &["c1"]);
        assert!(actor.authorize_school("sch2").is_err());
        assert!(actor.authorize_student(&student("s1", "sch2")).is_err());
    }

    #[test]
    fn teacher_limited_to_own_classes_where_admin_is_not() {
        let other_class = class("c2", "sch1", Some("t2"));
        let actor = teacher(&["sch1"], &["c1"]);
        assert!(actor.authorize_class(&other_class).is_err());

        let admin = school_admin(&["sch1"]);
        assert!(admin.authorize_class(&other_class).is_ok());
    }

    #[test]
    fn superuser_scope_is_unrestricted() {
        let actor = Actor {
            id: "root".to_string(),
            kind: ActorKind::Superuser,
        };
        assert!(matches!(actor.school_scope(), SchoolScope::Unrestricted));
        assert!(actor.authorize_school("anything").is_ok());
    }

    #[test]
    fn parent_limited_to_own_students() {
        let actor = Actor {
            id: "p1".to_string(),
            kind: ActorKind::ParentStudent {
                student_ids: ["s1".to_string()].into_iter().collect(),
            },
        };
        assert!(actor.authorize_student(&student("s1", "sch1")).is_ok());
        assert!(actor.authorize_student(&student("s2", "sch1")).is_err());
        // No school-wide access at all.
        assert!(actor.authorize_school("sch1").is_err());
    }

    #[test]
    fn mutation_restricted_to_creator_unless_admin_tier() {
        let rec = AssessmentRow {
            id: "a1".to_string(),
            seq: 1,
            student_id: "s1".to_string(),
            outcome_id: "o1".to_string(),
            term_id: "t1".to_string(),
            assessed_by: "t2".to_string(),
            created_by: Some("t2".to_string()),
            date: "2026-01-10".to_string(),
            rating_raw: "MEETING".to_string(),
            comment: None,
        };
        let stu = student("s1", "sch1");

        let not_creator = teacher(&["sch1"], &["c1"]);
        assert!(not_creator.authorize_assessment(&rec, &stu, false).is_ok());
        assert!(not_creator.authorize_assessment(&rec, &stu, true).is_err());

        let admin = school_admin(&["sch1"]);
        assert!(admin.authorize_assessment(&rec, &stu, true).is_ok());
    }
}
