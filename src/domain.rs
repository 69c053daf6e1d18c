//! Core entity rows shared by the repository facade, the aggregation
//! engine, and the IPC handlers. These mirror the SQLite schema in `db.rs`
//! but carry resolved parent references where the engine needs them.

/// Three-point ordinal scale a single assessment is recorded against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rating {
    EasilyMeeting,
    Meeting,
    NeedsPractice,
}

impl Rating {
    pub fn parse(s: &str) -> Option<Rating> {
        match s {
            "EASILY_MEETING" => Some(Rating::EasilyMeeting),
            "MEETING" => Some(Rating::Meeting),
            "NEEDS_PRACTICE" => Some(Rating::NeedsPractice),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Rating::EasilyMeeting => "EASILY_MEETING",
            Rating::Meeting => "MEETING",
            Rating::NeedsPractice => "NEEDS_PRACTICE",
        }
    }

    /// Weight used by the performance score (EASILY_MEETING is best).
    pub fn weight(self) -> i64 {
        match self {
            Rating::EasilyMeeting => 3,
            Rating::Meeting => 2,
            Rating::NeedsPractice => 1,
        }
    }

    /// Print symbol used by the CSV/PDF exports.
    pub fn symbol(self) -> &'static str {
        match self {
            Rating::EasilyMeeting => "+",
            Rating::Meeting => "=",
            Rating::NeedsPractice => "x",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Superuser,
    CountryAdmin,
    SchoolAdmin,
    Teacher,
    ParentStudent,
}

impl Role {
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "SUPERUSER" => Some(Role::Superuser),
            "COUNTRY_ADMIN" => Some(Role::CountryAdmin),
            "SCHOOL_ADMIN" => Some(Role::SchoolAdmin),
            "TEACHER" => Some(Role::Teacher),
            "PARENT_STUDENT" => Some(Role::ParentStudent),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Superuser => "SUPERUSER",
            Role::CountryAdmin => "COUNTRY_ADMIN",
            Role::SchoolAdmin => "SCHOOL_ADMIN",
            Role::Teacher => "TEACHER",
            Role::ParentStudent => "PARENT_STUDENT",
        }
    }
}

#[derive(Debug, Clone)]
pub struct School {
    pub id: String,
    pub country_id: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct Class {
    pub id: String,
    pub school_id: String,
    pub name: String,
    pub teacher_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Student {
    pub id: String,
    pub school_id: String,
    pub class_id: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub active: bool,
    pub sort_order: i64,
}

impl Student {
    pub fn display_name(&self) -> String {
        format!("{}, {}", self.last_name, self.first_name)
    }
}

#[derive(Debug, Clone)]
pub struct Subject {
    pub id: String,
    pub name: String,
    pub sort_order: i64,
}

#[derive(Debug, Clone)]
pub struct Strand {
    pub id: String,
    pub subject_id: String,
    pub name: String,
    pub sort_order: i64,
}

#[derive(Debug, Clone)]
pub struct Term {
    pub id: String,
    pub school_id: String,
    pub name: String,
    pub starts_at: String,
    pub ends_at: String,
}

/// A learning outcome joined with its strand and subject parents, the shape
/// every curriculum query returns. `sort_order` fields drive all report
/// ordering.
#[derive(Debug, Clone)]
pub struct OutcomeRow {
    pub id: String,
    pub code: String,
    pub description: String,
    pub sort_order: i64,
    pub strand_id: String,
    pub strand_name: String,
    pub strand_sort_order: i64,
    pub subject_id: String,
    pub subject_name: String,
    pub subject_sort_order: i64,
}

/// One assessment fact. `seq` is the SQLite rowid: the insertion sequence
/// used to break ties when two records share the same calendar date.
/// `rating_raw` keeps whatever string is stored; legacy values outside the
/// three known ratings still count toward distribution totals.
#[derive(Debug, Clone)]
pub struct AssessmentRow {
    pub id: String,
    pub seq: i64,
    pub student_id: String,
    pub outcome_id: String,
    pub term_id: String,
    pub assessed_by: String,
    pub created_by: Option<String>,
    pub date: String,
    pub rating_raw: String,
    pub comment: Option<String>,
}

impl AssessmentRow {
    pub fn rating(&self) -> Option<Rating> {
        Rating::parse(&self.rating_raw)
    }
}

#[derive(Debug, Clone)]
pub struct ActorRecord {
    pub id: String,
    pub role: Role,
    pub display_name: String,
    pub active: bool,
}

/// One assignment relation row. Exactly one of the three targets is set.
#[derive(Debug, Clone, Default)]
pub struct Assignment {
    pub school_id: Option<String>,
    pub country_id: Option<String>,
    pub student_id: Option<String>,
}
