//! Aggregation engine: pure transformations of assessment record sets into
//! the five report shapes. No repository access and no domain errors here;
//! empty inputs yield empty (still valid) shapes. NotFound/Forbidden are
//! decided upstream in the assembler and access resolver.

use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::domain::{
    AssessmentRow, Class, OutcomeRow, Rating, School, Strand, Student, Subject, Term,
};

/// Error value shared by the reporting core. The engine itself never
/// produces one; the resolver and assembler do.
#[derive(Debug, Clone, Serialize)]
pub struct ReportError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ReportError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("forbidden", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn db(message: impl Into<String>) -> Self {
        Self::new("db_query_failed", message)
    }
}

/// 1-decimal rounding: `Int(10*x + 0.5) / 10`.
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

/// Tally of the three known ratings. `total` is the full input length, so
/// it can exceed the bucket sum when legacy rating strings are present;
/// that asymmetry is kept on purpose for compatibility with historical
/// report output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingDistribution {
    pub easily_meeting: usize,
    pub meeting: usize,
    pub needs_practice: usize,
    pub total: usize,
}

pub fn rating_distribution<'a, I>(rows: I) -> RatingDistribution
where
    I: IntoIterator<Item = &'a AssessmentRow>,
{
    let mut dist = RatingDistribution::default();
    for row in rows {
        dist.total += 1;
        match row.rating() {
            Some(Rating::EasilyMeeting) => dist.easily_meeting += 1,
            Some(Rating::Meeting) => dist.meeting += 1,
            Some(Rating::NeedsPractice) => dist.needs_practice += 1,
            None => {}
        }
    }
    dist
}

/// Weighted average on the 0..=100 scale. Unknown ratings contribute
/// weight 0 but still count in the denominator, mirroring the
/// distribution's total. Empty input scores 0, never NaN.
pub fn performance_score<'a, I>(rows: I) -> i64
where
    I: IntoIterator<Item = &'a AssessmentRow>,
{
    let mut count: i64 = 0;
    let mut weights: i64 = 0;
    for row in rows {
        count += 1;
        weights += row.rating().map(Rating::weight).unwrap_or(0);
    }
    if count == 0 {
        return 0;
    }
    ((weights as f64) / ((count * 3) as f64) * 100.0).round() as i64
}

/// Percent of curriculum outcomes with at least one assessment. The
/// denominator is always a curriculum outcome count, never an assessment
/// count.
pub fn completion_rate(assessed_distinct: usize, total_outcomes: usize) -> f64 {
    if total_outcomes == 0 {
        return 0.0;
    }
    round_off_1_decimal(100.0 * (assessed_distinct as f64) / (total_outcomes as f64))
}

fn recency_key(row: &AssessmentRow) -> (&str, i64) {
    (row.date.as_str(), row.seq)
}

/// Latest assessment among `rows`: maximum calendar date, ties broken by
/// highest insertion sequence. Deterministic regardless of input order.
pub fn latest_of<'a, I>(rows: I) -> Option<&'a AssessmentRow>
where
    I: IntoIterator<Item = &'a AssessmentRow>,
{
    rows.into_iter().max_by(|a, b| recency_key(a).cmp(&recency_key(b)))
}

/// One entry per (student, outcome) pair holding that pair's latest record.
pub fn latest_by_pair(rows: &[AssessmentRow]) -> HashMap<(&str, &str), &AssessmentRow> {
    let mut latest: HashMap<(&str, &str), &AssessmentRow> = HashMap::new();
    for row in rows {
        let key = (row.student_id.as_str(), row.outcome_id.as_str());
        match latest.get(&key) {
            Some(cur) if recency_key(cur) >= recency_key(row) => {}
            _ => {
                latest.insert(key, row);
            }
        }
    }
    latest
}

fn distinct_outcomes<'a, I>(rows: I) -> usize
where
    I: IntoIterator<Item = &'a AssessmentRow>,
{
    rows.into_iter()
        .map(|r| r.outcome_id.as_str())
        .collect::<HashSet<_>>()
        .len()
}

// ---------------------------------------------------------------------------
// Shared reference fragments

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRef {
    pub id: String,
    pub display_name: String,
    pub school_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_id: Option<String>,
}

impl StudentRef {
    fn from(s: &Student) -> Self {
        Self {
            id: s.id.clone(),
            display_name: s.display_name(),
            school_id: s.school_id.clone(),
            class_id: s.class_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRef {
    pub id: String,
    pub name: String,
    pub school_id: String,
}

impl ClassRef {
    fn from(c: &Class) -> Self {
        Self {
            id: c.id.clone(),
            name: c.name.clone(),
            school_id: c.school_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermRef {
    pub id: String,
    pub name: String,
}

fn term_ref(term: Option<&Term>) -> Option<TermRef> {
    term.map(|t| TermRef {
        id: t.id.clone(),
        name: t.name.clone(),
    })
}

// ---------------------------------------------------------------------------
// Student report

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentOutcomeLine {
    pub outcome_id: String,
    pub code: String,
    pub description: String,
    pub latest_rating: Option<String>,
    pub latest_date: Option<String>,
    pub assessment_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrandSection {
    pub strand_id: String,
    pub strand_name: String,
    pub rating_distribution: RatingDistribution,
    pub performance_score: i64,
    pub outcomes: Vec<StudentOutcomeLine>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectSection {
    pub subject_id: String,
    pub subject_name: String,
    pub rating_distribution: RatingDistribution,
    pub performance_score: i64,
    pub total_outcomes: usize,
    pub distinct_outcomes: usize,
    pub completion_rate: f64,
    pub strands: Vec<StrandSection>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentReport {
    pub student: StudentRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub term: Option<TermRef>,
    pub total_outcomes: usize,
    pub assessment_count: usize,
    pub distinct_outcomes: usize,
    pub completion_rate: f64,
    pub rating_distribution: RatingDistribution,
    pub performance_score: i64,
    pub subjects: Vec<SubjectSection>,
}

/// Group the student's assessments by subject, then strand. Groups are
/// discovered in first-encounter order but emitted sorted by each entity's
/// sort order. Per-subject completion divides by the subject's full
/// curriculum outcome count, overall completion by the whole curriculum's.
pub fn student_report(
    student: &Student,
    rows: &[AssessmentRow],
    curriculum: &[OutcomeRow],
    term: Option<&Term>,
) -> StudentReport {
    let outcome_index: HashMap<&str, &OutcomeRow> =
        curriculum.iter().map(|o| (o.id.as_str(), o)).collect();

    let mut subject_outcome_totals: HashMap<&str, usize> = HashMap::new();
    for o in curriculum {
        *subject_outcome_totals.entry(o.subject_id.as_str()).or_insert(0) += 1;
    }

    // subject id -> strand id -> outcome id -> rows, insertion-ordered maps.
    let mut subject_order: Vec<&str> = Vec::new();
    let mut by_subject: HashMap<&str, Vec<&AssessmentRow>> = HashMap::new();
    for row in rows {
        let Some(outcome) = outcome_index.get(row.outcome_id.as_str()) else {
            continue;
        };
        let sid = outcome.subject_id.as_str();
        if !by_subject.contains_key(sid) {
            subject_order.push(sid);
        }
        by_subject.entry(sid).or_default().push(row);
    }

    let mut subjects: Vec<(i64, SubjectSection)> = Vec::new();
    for sid in &subject_order {
        let subject_rows = &by_subject[sid];
        let mut subject_name = String::new();
        let mut subject_sort = i64::MAX;

        let mut strand_order: Vec<&str> = Vec::new();
        let mut by_strand: HashMap<&str, Vec<&AssessmentRow>> = HashMap::new();
        for row in subject_rows {
            let outcome = outcome_index[row.outcome_id.as_str()];
            subject_name = outcome.subject_name.clone();
            subject_sort = outcome.subject_sort_order;
            let stid = outcome.strand_id.as_str();
            if !by_strand.contains_key(stid) {
                strand_order.push(stid);
            }
            by_strand.entry(stid).or_default().push(row);
        }

        let mut strands: Vec<(i64, StrandSection)> = Vec::new();
        for stid in &strand_order {
            let strand_rows = &by_strand[stid];
            let first = outcome_index[strand_rows[0].outcome_id.as_str()];

            let mut outcome_order: Vec<&str> = Vec::new();
            let mut by_outcome: HashMap<&str, Vec<&AssessmentRow>> = HashMap::new();
            for row in strand_rows {
                let oid = row.outcome_id.as_str();
                if !by_outcome.contains_key(oid) {
                    outcome_order.push(oid);
                }
                by_outcome.entry(oid).or_default().push(row);
            }

            let mut outcome_lines: Vec<(i64, StudentOutcomeLine)> = Vec::new();
            for oid in &outcome_order {
                let outcome = outcome_index[*oid];
                let pair_rows = &by_outcome[oid];
                let latest = latest_of(pair_rows.iter().copied());
                outcome_lines.push((
                    outcome.sort_order,
                    StudentOutcomeLine {
                        outcome_id: outcome.id.clone(),
                        code: outcome.code.clone(),
                        description: outcome.description.clone(),
                        latest_rating: latest
                            .and_then(|r| r.rating())
                            .map(|r| r.as_str().to_string()),
                        latest_date: latest.map(|r| r.date.clone()),
                        assessment_count: pair_rows.len(),
                    },
                ));
            }
            outcome_lines.sort_by_key(|(sort, _)| *sort);

            strands.push((
                first.strand_sort_order,
                StrandSection {
                    strand_id: first.strand_id.clone(),
                    strand_name: first.strand_name.clone(),
                    rating_distribution: rating_distribution(strand_rows.iter().copied()),
                    performance_score: performance_score(strand_rows.iter().copied()),
                    outcomes: outcome_lines.into_iter().map(|(_, l)| l).collect(),
                },
            ));
        }
        strands.sort_by_key(|(sort, _)| *sort);

        let subject_total = subject_outcome_totals.get(*sid).copied().unwrap_or(0);
        let subject_distinct = distinct_outcomes(subject_rows.iter().copied());
        subjects.push((
            subject_sort,
            SubjectSection {
                subject_id: (*sid).to_string(),
                subject_name,
                rating_distribution: rating_distribution(subject_rows.iter().copied()),
                performance_score: performance_score(subject_rows.iter().copied()),
                total_outcomes: subject_total,
                distinct_outcomes: subject_distinct,
                completion_rate: completion_rate(subject_distinct, subject_total),
                strands: strands.into_iter().map(|(_, s)| s).collect(),
            },
        ));
    }
    subjects.sort_by_key(|(sort, _)| *sort);
    let subjects: Vec<SubjectSection> = subjects.into_iter().map(|(_, s)| s).collect();

    let overall_distinct = distinct_outcomes(rows.iter());
    StudentReport {
        student: StudentRef::from(student),
        term: term_ref(term),
        total_outcomes: curriculum.len(),
        assessment_count: rows.len(),
        distinct_outcomes: overall_distinct,
        completion_rate: completion_rate(overall_distinct, curriculum.len()),
        rating_distribution: rating_distribution(rows.iter()),
        performance_score: performance_score(rows.iter()),
        subjects,
    }
}

// ---------------------------------------------------------------------------
// Strand report

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeHeader {
    pub id: String,
    pub code: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatrixCell {
    pub outcome_id: String,
    pub rating: Option<String>,
    pub symbol: String,
    pub date: Option<String>,
    pub assessment_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrandStudentRow {
    pub student_id: String,
    pub display_name: String,
    pub cells: Vec<MatrixCell>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeStats {
    pub outcome_id: String,
    pub code: String,
    pub rating_distribution: RatingDistribution,
    pub performance_score: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrandReport {
    pub class: ClassRef,
    pub strand_id: String,
    pub strand_name: String,
    pub subject_id: String,
    pub subject_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub term: Option<TermRef>,
    pub total_outcomes: usize,
    pub rating_distribution: RatingDistribution,
    pub performance_score: i64,
    pub outcomes: Vec<OutcomeHeader>,
    pub students: Vec<StrandStudentRow>,
    pub per_outcome: Vec<OutcomeStats>,
}

/// Student x outcome matrix for one strand within one class. Exactly one
/// cell per pair: the pair's latest rating, or an explicit empty cell
/// rendered as "-".
pub fn strand_report(
    class: &Class,
    strand: &Strand,
    subject: &Subject,
    strand_outcomes: &[OutcomeRow],
    students: &[Student],
    rows: &[AssessmentRow],
    total_outcomes: usize,
    term: Option<&Term>,
) -> StrandReport {
    let latest = latest_by_pair(rows);

    let mut pair_counts: HashMap<(&str, &str), usize> = HashMap::new();
    for row in rows {
        *pair_counts
            .entry((row.student_id.as_str(), row.outcome_id.as_str()))
            .or_insert(0) += 1;
    }

    let mut student_rows: Vec<StrandStudentRow> = Vec::with_capacity(students.len());
    for s in students {
        let mut cells = Vec::with_capacity(strand_outcomes.len());
        for o in strand_outcomes {
            let key = (s.id.as_str(), o.id.as_str());
            let cell = latest.get(&key).copied();
            let rating = cell.and_then(|r| r.rating());
            cells.push(MatrixCell {
                outcome_id: o.id.clone(),
                rating: rating.map(|r| r.as_str().to_string()),
                symbol: rating.map(|r| r.symbol().to_string()).unwrap_or_else(|| "-".to_string()),
                date: cell.map(|r| r.date.clone()),
                assessment_count: pair_counts.get(&key).copied().unwrap_or(0),
            });
        }
        student_rows.push(StrandStudentRow {
            student_id: s.id.clone(),
            display_name: s.display_name(),
            cells,
        });
    }

    let per_outcome = strand_outcomes
        .iter()
        .map(|o| {
            let outcome_rows: Vec<&AssessmentRow> =
                rows.iter().filter(|r| r.outcome_id == o.id).collect();
            OutcomeStats {
                outcome_id: o.id.clone(),
                code: o.code.clone(),
                rating_distribution: rating_distribution(outcome_rows.iter().copied()),
                performance_score: performance_score(outcome_rows.iter().copied()),
            }
        })
        .collect();

    StrandReport {
        class: ClassRef::from(class),
        strand_id: strand.id.clone(),
        strand_name: strand.name.clone(),
        subject_id: subject.id.clone(),
        subject_name: subject.name.clone(),
        term: term_ref(term),
        total_outcomes,
        rating_distribution: rating_distribution(rows.iter()),
        performance_score: performance_score(rows.iter()),
        outcomes: strand_outcomes
            .iter()
            .map(|o| OutcomeHeader {
                id: o.id.clone(),
                code: o.code.clone(),
                description: o.description.clone(),
            })
            .collect(),
        students: student_rows,
        per_outcome,
    }
}

// ---------------------------------------------------------------------------
// Outcome report

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub assessment_id: String,
    pub date: String,
    pub rating: Option<String>,
    pub comment: Option<String>,
    pub assessed_by: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeStudentRow {
    pub student_id: String,
    pub display_name: String,
    pub latest_rating: Option<String>,
    pub latest_date: Option<String>,
    pub assessment_count: usize,
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeReport {
    pub class: ClassRef,
    pub outcome_id: String,
    pub code: String,
    pub description: String,
    pub strand_id: String,
    pub strand_name: String,
    pub subject_id: String,
    pub subject_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub term: Option<TermRef>,
    pub total_outcomes: usize,
    pub rating_distribution: RatingDistribution,
    pub performance_score: i64,
    pub students: Vec<OutcomeStudentRow>,
}

/// Latest rating per student for a single outcome across a class, with
/// each student's full history sorted newest-first.
pub fn outcome_report(
    class: &Class,
    outcome: &OutcomeRow,
    students: &[Student],
    rows: &[AssessmentRow],
    total_outcomes: usize,
    term: Option<&Term>,
) -> OutcomeReport {
    let mut student_rows: Vec<OutcomeStudentRow> = Vec::with_capacity(students.len());
    for s in students {
        let mut own: Vec<&AssessmentRow> =
            rows.iter().filter(|r| r.student_id == s.id).collect();
        own.sort_by(|a, b| recency_key(b).cmp(&recency_key(a)));
        let latest = own.first().copied();
        student_rows.push(OutcomeStudentRow {
            student_id: s.id.clone(),
            display_name: s.display_name(),
            latest_rating: latest
                .and_then(|r| r.rating())
                .map(|r| r.as_str().to_string()),
            latest_date: latest.map(|r| r.date.clone()),
            assessment_count: own.len(),
            history: own
                .iter()
                .map(|r| HistoryEntry {
                    assessment_id: r.id.clone(),
                    date: r.date.clone(),
                    rating: r.rating().map(|x| x.as_str().to_string()),
                    comment: r.comment.clone(),
                    assessed_by: r.assessed_by.clone(),
                })
                .collect(),
        });
    }

    OutcomeReport {
        class: ClassRef::from(class),
        outcome_id: outcome.id.clone(),
        code: outcome.code.clone(),
        description: outcome.description.clone(),
        strand_id: outcome.strand_id.clone(),
        strand_name: outcome.strand_name.clone(),
        subject_id: outcome.subject_id.clone(),
        subject_name: outcome.subject_name.clone(),
        term: term_ref(term),
        total_outcomes,
        rating_distribution: rating_distribution(rows.iter()),
        performance_score: performance_score(rows.iter()),
        students: student_rows,
    }
}

// ---------------------------------------------------------------------------
// Class summary

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentStats {
    pub student_id: String,
    pub display_name: String,
    pub assessment_count: usize,
    pub distinct_outcomes: usize,
    pub completion_rate: f64,
    pub rating_distribution: RatingDistribution,
    pub performance_score: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectStats {
    pub subject_id: String,
    pub subject_name: String,
    pub assessment_count: usize,
    pub distinct_outcomes: usize,
    pub total_outcomes: usize,
    pub completion_rate: f64,
    pub rating_distribution: RatingDistribution,
    pub performance_score: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttentionStudent {
    pub student_id: String,
    pub display_name: String,
    pub needs_practice_count: usize,
    pub needs_practice_share: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSummary {
    pub class: ClassRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub term: Option<TermRef>,
    pub student_count: usize,
    pub total_outcomes: usize,
    pub assessment_count: usize,
    pub rating_distribution: RatingDistribution,
    pub performance_score: i64,
    pub per_student: Vec<StudentStats>,
    pub per_subject: Vec<SubjectStats>,
    pub needs_attention: Vec<AttentionStudent>,
}

fn student_stats(s: &Student, own: &[&AssessmentRow], total_outcomes: usize) -> StudentStats {
    let distinct = distinct_outcomes(own.iter().copied());
    StudentStats {
        student_id: s.id.clone(),
        display_name: s.display_name(),
        assessment_count: own.len(),
        distinct_outcomes: distinct,
        completion_rate: completion_rate(distinct, total_outcomes),
        rating_distribution: rating_distribution(own.iter().copied()),
        performance_score: performance_score(own.iter().copied()),
    }
}

fn subject_stats(
    rows: &[AssessmentRow],
    curriculum: &[OutcomeRow],
) -> Vec<SubjectStats> {
    let outcome_index: HashMap<&str, &OutcomeRow> =
        curriculum.iter().map(|o| (o.id.as_str(), o)).collect();
    let mut subject_totals: HashMap<&str, usize> = HashMap::new();
    for o in curriculum {
        *subject_totals.entry(o.subject_id.as_str()).or_insert(0) += 1;
    }

    let mut order: Vec<&str> = Vec::new();
    let mut by_subject: HashMap<&str, Vec<&AssessmentRow>> = HashMap::new();
    for row in rows {
        let Some(outcome) = outcome_index.get(row.outcome_id.as_str()) else {
            continue;
        };
        let sid = outcome.subject_id.as_str();
        if !by_subject.contains_key(sid) {
            order.push(sid);
        }
        by_subject.entry(sid).or_default().push(row);
    }

    let mut sections: Vec<(i64, SubjectStats)> = Vec::new();
    for sid in order {
        let subject_rows = &by_subject[sid];
        let meta = outcome_index[subject_rows[0].outcome_id.as_str()];
        let total = subject_totals.get(sid).copied().unwrap_or(0);
        let distinct = distinct_outcomes(subject_rows.iter().copied());
        sections.push((
            meta.subject_sort_order,
            SubjectStats {
                subject_id: sid.to_string(),
                subject_name: meta.subject_name.clone(),
                assessment_count: subject_rows.len(),
                distinct_outcomes: distinct,
                total_outcomes: total,
                completion_rate: completion_rate(distinct, total),
                rating_distribution: rating_distribution(subject_rows.iter().copied()),
                performance_score: performance_score(subject_rows.iter().copied()),
            },
        ));
    }
    sections.sort_by_key(|(sort, _)| *sort);
    sections.into_iter().map(|(_, s)| s).collect()
}

/// Per-student and per-subject stats for one class, plus the needs
/// attention list: students whose NEEDS_PRACTICE share of their own
/// assessments is >= 50%, ranked by raw NEEDS_PRACTICE count descending
/// (stable, so ties keep roster order). Completion always divides by the
/// entire curriculum.
pub fn class_summary(
    class: &Class,
    students: &[Student],
    rows: &[AssessmentRow],
    curriculum: &[OutcomeRow],
    term: Option<&Term>,
) -> ClassSummary {
    let total_outcomes = curriculum.len();
    let mut per_student: Vec<StudentStats> = Vec::with_capacity(students.len());
    let mut needs_attention: Vec<AttentionStudent> = Vec::new();

    for s in students {
        let own: Vec<&AssessmentRow> = rows.iter().filter(|r| r.student_id == s.id).collect();
        let stats = student_stats(s, &own, total_outcomes);

        let np = stats.rating_distribution.needs_practice;
        if !own.is_empty() {
            let share = (np as f64) / (own.len() as f64);
            if share >= 0.5 {
                needs_attention.push(AttentionStudent {
                    student_id: s.id.clone(),
                    display_name: s.display_name(),
                    needs_practice_count: np,
                    needs_practice_share: round_off_1_decimal(100.0 * share),
                });
            }
        }
        per_student.push(stats);
    }
    needs_attention.sort_by(|a, b| b.needs_practice_count.cmp(&a.needs_practice_count));

    ClassSummary {
        class: ClassRef::from(class),
        term: term_ref(term),
        student_count: students.len(),
        total_outcomes,
        assessment_count: rows.len(),
        rating_distribution: rating_distribution(rows.iter()),
        performance_score: performance_score(rows.iter()),
        per_student,
        per_subject: subject_stats(rows, curriculum),
        needs_attention,
    }
}

// ---------------------------------------------------------------------------
// School summary

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassStats {
    pub class_id: String,
    pub name: String,
    pub student_count: usize,
    pub assessment_count: usize,
    pub distinct_outcomes: usize,
    pub completion_rate: f64,
    pub rating_distribution: RatingDistribution,
    pub performance_score: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttentionClass {
    pub class_id: String,
    pub name: String,
    pub performance_score: i64,
    pub assessment_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolSummary {
    pub school: SchoolRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub term: Option<TermRef>,
    pub class_count: usize,
    pub student_count: usize,
    pub total_outcomes: usize,
    pub assessment_count: usize,
    pub rating_distribution: RatingDistribution,
    pub performance_score: i64,
    pub per_class: Vec<ClassStats>,
    pub needs_attention: Vec<AttentionClass>,
}

/// Per-class rollup for one school. Classes needing attention: score
/// below 60 with at least one assessment, ascending by score, the 5
/// lowest only.
pub fn school_summary(
    school: &School,
    classes: &[Class],
    students: &[Student],
    rows: &[AssessmentRow],
    curriculum: &[OutcomeRow],
    term: Option<&Term>,
) -> SchoolSummary {
    let total_outcomes = curriculum.len();
    let mut class_of_student: HashMap<&str, &str> = HashMap::new();
    for s in students {
        if let Some(class_id) = s.class_id.as_deref() {
            class_of_student.insert(s.id.as_str(), class_id);
        }
    }

    let mut per_class: Vec<ClassStats> = Vec::with_capacity(classes.len());
    let mut needs_attention: Vec<AttentionClass> = Vec::new();
    for c in classes {
        let class_rows: Vec<&AssessmentRow> = rows
            .iter()
            .filter(|r| class_of_student.get(r.student_id.as_str()) == Some(&c.id.as_str()))
            .collect();
        let distinct = distinct_outcomes(class_rows.iter().copied());
        let score = performance_score(class_rows.iter().copied());
        let student_count = students
            .iter()
            .filter(|s| s.class_id.as_deref() == Some(c.id.as_str()))
            .count();

        if score < 60 && !class_rows.is_empty() {
            needs_attention.push(AttentionClass {
                class_id: c.id.clone(),
                name: c.name.clone(),
                performance_score: score,
                assessment_count: class_rows.len(),
            });
        }
        per_class.push(ClassStats {
            class_id: c.id.clone(),
            name: c.name.clone(),
            student_count,
            assessment_count: class_rows.len(),
            distinct_outcomes: distinct,
            completion_rate: completion_rate(distinct, total_outcomes),
            rating_distribution: rating_distribution(class_rows.iter().copied()),
            performance_score: score,
        });
    }
    needs_attention.sort_by(|a, b| a.performance_score.cmp(&b.performance_score));
    needs_attention.truncate(5);

    SchoolSummary {
        school: SchoolRef {
            id: school.id.clone(),
            name: school.name.clone(),
        },
        term: term_ref(term),
        class_count: classes.len(),
        student_count: students.len(),
        total_outcomes,
        assessment_count: rows.len(),
        rating_distribution: rating_distribution(rows.iter()),
        performance_score: performance_score(rows.iter()),
        per_class,
        needs_attention,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(
        id: &str,
        seq: i64,
        student: &str,
        outcome: &str,
        date: &str,
        rating: &str,
    ) -> AssessmentRow {
        AssessmentRow {
            id: id.to_string(),
            seq,
            student_id: student.to_string(),
            outcome_id: outcome.to_string(),
            term_id: "t1".to_string(),
            assessed_by: "teacher-1".to_string(),
            created_by: None,
            date: date.to_string(),
            rating_raw: rating.to_string(),
            comment: None,
        }
    }

    fn outcome(
        id: &str,
        sort: i64,
        strand: &str,
        strand_sort: i64,
        subject: &str,
        subject_sort: i64,
    ) -> OutcomeRow {
        OutcomeRow {
            id: id.to_string(),
            code: id.to_uppercase(),
            description: format!("outcome {id}"),
            sort_order: sort,
            strand_id: strand.to_string(),
            strand_name: format!("Strand {strand}"),
            strand_sort_order: strand_sort,
            subject_id: subject.to_string(),
            subject_name: format!("Subject {subject}"),
            subject_sort_order: subject_sort,
        }
    }

    fn student(id: &str, class_id: Option<&str>) -> Student {
        Student {
            id: id.to_string(),
            school_id: "sch1".to_string(),
            class_id: class_id.map(|c| c.to_string()),
            first_name: "First".to_string(),
            last_name: id.to_uppercase(),
            active: true,
            sort_order: 0,
        }
    }

    fn class(id: &str) -> Class {
        Class {
            id: id.to_string(),
            school_id: "sch1".to_string(),
            name: format!("Class {id}"),
            teacher_id: Some("teacher-1".to_string()),
        }
    }

    fn strand(id: &str, subject: &str) -> Strand {
        Strand {
            id: id.to_string(),
            subject_id: subject.to_string(),
            name: format!("Strand {id}"),
            sort_order: 1,
        }
    }

    fn subject(id: &str) -> Subject {
        Subject {
            id: id.to_string(),
            name: format!("Subject {id}"),
            sort_order: 1,
        }
    }

    #[test]
    fn distribution_total_counts_unknown_ratings() {
        let rows = vec![
            row("a1", 1, "s1", "o1", "2026-01-10", "EASILY_MEETING"),
            row("a2", 2, "s1", "o1", "2026-01-11", "MEETING"),
            row("a3", 3, "s1", "o1", "2026-01-12", "NEEDS_PRACTICE"),
            row("a4", 4, "s1", "o1", "2026-01-13", "LEGACY_VALUE"),
        ];
        let dist = rating_distribution(rows.iter());
        assert_eq!(dist.easily_meeting, 1);
        assert_eq!(dist.meeting, 1);
        assert_eq!(dist.needs_practice, 1);
        // total is the input length, which may exceed the bucket sum.
        assert_eq!(dist.total, 4);
        assert_eq!(dist.easily_meeting + dist.meeting + dist.needs_practice, 3);
    }

    #[test]
    fn performance_score_empty_is_zero() {
        let rows: Vec<AssessmentRow> = Vec::new();
        assert_eq!(performance_score(rows.iter()), 0);
    }

    #[test]
    fn performance_score_known_values() {
        // 3 EASILY + 2 MEETING = 13 / 15 -> 87.
        let rows = vec![
            row("a1", 1, "s1", "o1", "2026-01-10", "EASILY_MEETING"),
            row("a2", 2, "s1", "o2", "2026-01-10", "EASILY_MEETING"),
            row("a3", 3, "s1", "o3", "2026-01-10", "EASILY_MEETING"),
            row("a4", 4, "s1", "o4", "2026-01-10", "MEETING"),
            row("a5", 5, "s1", "o5", "2026-01-10", "MEETING"),
        ];
        assert_eq!(performance_score(rows.iter()), 87);
    }

    #[test]
    fn performance_score_monotonic_in_upgrades() {
        let mut rows = vec![
            row("a1", 1, "s1", "o1", "2026-01-10", "NEEDS_PRACTICE"),
            row("a2", 2, "s1", "o2", "2026-01-10", "NEEDS_PRACTICE"),
            row("a3", 3, "s1", "o3", "2026-01-10", "MEETING"),
        ];
        let mut last = performance_score(rows.iter());
        for i in 0..2 {
            rows[i].rating_raw = "EASILY_MEETING".to_string();
            let next = performance_score(rows.iter());
            assert!(next >= last, "upgrading a rating must not lower the score");
            last = next;
        }
    }

    #[test]
    fn completion_rate_bounds_and_zero_denominator() {
        assert_eq!(completion_rate(0, 0), 0.0);
        assert_eq!(completion_rate(0, 12), 0.0);
        assert_eq!(completion_rate(12, 12), 100.0);
        let partial = completion_rate(1, 3);
        assert!(partial > 0.0 && partial < 100.0);
        assert_eq!(partial, 33.3);
    }

    #[test]
    fn latest_wins_regardless_of_input_order() {
        let rows = vec![
            row("a2", 2, "s1", "o1", "2026-03-01", "EASILY_MEETING"),
            row("a1", 1, "s1", "o1", "2026-01-01", "NEEDS_PRACTICE"),
            row("a3", 3, "s1", "o1", "2026-02-01", "MEETING"),
        ];
        let latest = latest_of(rows.iter()).expect("nonempty");
        assert_eq!(latest.id, "a2");

        let pairs = latest_by_pair(&rows);
        assert_eq!(pairs[&("s1", "o1")].id, "a2");
    }

    #[test]
    fn date_tie_breaks_by_insertion_sequence() {
        let rows = vec![
            row("a9", 9, "s1", "o1", "2026-02-01", "NEEDS_PRACTICE"),
            row("a5", 5, "s1", "o1", "2026-02-01", "EASILY_MEETING"),
        ];
        // Same date: the higher rowid (later insert) wins.
        assert_eq!(latest_of(rows.iter()).expect("nonempty").id, "a9");
    }

    #[test]
    fn student_report_groups_sorted_by_display_order() {
        let curriculum = vec![
            outcome("o1", 1, "st1", 1, "su2", 2),
            outcome("o2", 2, "st1", 1, "su2", 2),
            outcome("o3", 1, "st2", 1, "su1", 1),
        ];
        // First encounter is subject su2; output must still order su1 first.
        let rows = vec![
            row("a1", 1, "s1", "o1", "2026-01-10", "MEETING"),
            row("a2", 2, "s1", "o3", "2026-01-11", "EASILY_MEETING"),
        ];
        let report = student_report(&student("s1", Some("c1")), &rows, &curriculum, None);
        assert_eq!(report.subjects.len(), 2);
        assert_eq!(report.subjects[0].subject_id, "su1");
        assert_eq!(report.subjects[1].subject_id, "su2");
        assert_eq!(report.total_outcomes, 3);
        // su2 has 2 curriculum outcomes, 1 assessed.
        assert_eq!(report.subjects[1].total_outcomes, 2);
        assert_eq!(report.subjects[1].completion_rate, 50.0);
    }

    #[test]
    fn strand_matrix_has_one_cell_per_pair() {
        let strand_outcomes = vec![
            outcome("o1", 1, "st1", 1, "su1", 1),
            outcome("o2", 2, "st1", 1, "su1", 1),
        ];
        let students = vec![student("s1", Some("c1")), student("s2", Some("c1"))];
        let rows = vec![
            row("a1", 1, "s1", "o1", "2026-01-10", "NEEDS_PRACTICE"),
            row("a2", 2, "s1", "o1", "2026-02-10", "EASILY_MEETING"),
        ];
        let report = strand_report(
            &class("c1"),
            &strand("st1", "su1"),
            &subject("su1"),
            &strand_outcomes,
            &students,
            &rows,
            9,
            None,
        );
        assert_eq!(report.students.len(), 2);
        for sr in &report.students {
            assert_eq!(sr.cells.len(), 2);
        }
        let cell = &report.students[0].cells[0];
        assert_eq!(cell.rating.as_deref(), Some("EASILY_MEETING"));
        assert_eq!(cell.symbol, "+");
        assert_eq!(cell.assessment_count, 2);
        // Unassessed pair is explicitly empty.
        assert_eq!(report.students[1].cells[0].rating, None);
        assert_eq!(report.students[1].cells[0].symbol, "-");
        assert_eq!(report.total_outcomes, 9);
    }

    #[test]
    fn strand_report_keeps_identity_without_outcomes() {
        // A freshly created strand has no outcomes yet; the report must
        // still name the strand and its subject.
        let report = strand_report(
            &class("c1"),
            &strand("st1", "su1"),
            &subject("su1"),
            &[],
            &[],
            &[],
            7,
            None,
        );
        assert_eq!(report.strand_id, "st1");
        assert_eq!(report.strand_name, "Strand st1");
        assert_eq!(report.subject_id, "su1");
        assert_eq!(report.subject_name, "Subject su1");
        assert!(report.outcomes.is_empty());
        assert!(report.per_outcome.is_empty());
        assert_eq!(report.total_outcomes, 7);
    }

    #[test]
    fn outcome_report_history_newest_first() {
        let o = outcome("o1", 1, "st1", 1, "su1", 1);
        let students = vec![student("s1", Some("c1"))];
        let rows = vec![
            row("a1", 1, "s1", "o1", "2026-01-01", "NEEDS_PRACTICE"),
            row("a2", 2, "s1", "o1", "2026-02-01", "MEETING"),
            row("a3", 3, "s1", "o1", "2026-03-01", "EASILY_MEETING"),
        ];
        let report = outcome_report(&class("c1"), &o, &students, &rows, 5, None);
        let sr = &report.students[0];
        assert_eq!(sr.latest_rating.as_deref(), Some("EASILY_MEETING"));
        assert_eq!(sr.assessment_count, 3);
        let dates: Vec<&str> = sr.history.iter().map(|h| h.date.as_str()).collect();
        assert_eq!(dates, vec!["2026-03-01", "2026-02-01", "2026-01-01"]);
    }

    #[test]
    fn needs_attention_threshold_and_ranking() {
        let curriculum = vec![
            outcome("o1", 1, "st1", 1, "su1", 1),
            outcome("o2", 2, "st1", 1, "su1", 1),
        ];
        let students = vec![
            student("s1", Some("c1")),
            student("s2", Some("c1")),
            student("s3", Some("c1")),
        ];
        let rows = vec![
            // s1: 1/2 needs practice -> 50%, count 1.
            row("a1", 1, "s1", "o1", "2026-01-10", "NEEDS_PRACTICE"),
            row("a2", 2, "s1", "o2", "2026-01-10", "MEETING"),
            // s2: 3/4 needs practice -> 75%, count 3.
            row("a3", 3, "s2", "o1", "2026-01-10", "NEEDS_PRACTICE"),
            row("a4", 4, "s2", "o1", "2026-01-11", "NEEDS_PRACTICE"),
            row("a5", 5, "s2", "o2", "2026-01-10", "NEEDS_PRACTICE"),
            row("a6", 6, "s2", "o2", "2026-01-11", "MEETING"),
            // s3: 1/3 needs practice -> below threshold.
            row("a7", 7, "s3", "o1", "2026-01-10", "NEEDS_PRACTICE"),
            row("a8", 8, "s3", "o1", "2026-01-11", "MEETING"),
            row("a9", 9, "s3", "o2", "2026-01-10", "EASILY_MEETING"),
        ];
        let summary = class_summary(&class("c1"), &students, &rows, &curriculum, None);
        let ids: Vec<&str> = summary
            .needs_attention
            .iter()
            .map(|a| a.student_id.as_str())
            .collect();
        // Ranked by raw count descending, not by percentage.
        assert_eq!(ids, vec!["s2", "s1"]);
    }

    #[test]
    fn needs_attention_excludes_unassessed_and_well_rated() {
        let curriculum: Vec<OutcomeRow> = (1..=9)
            .map(|i| outcome(&format!("o{i}"), i, "st1", 1, "su1", 1))
            .collect();
        let students = vec![student("s1", Some("c1")), student("s2", Some("c1"))];
        let rows = vec![
            row("a1", 1, "s1", "o1", "2026-01-10", "EASILY_MEETING"),
            row("a2", 2, "s1", "o2", "2026-01-10", "EASILY_MEETING"),
            row("a3", 3, "s1", "o3", "2026-01-10", "EASILY_MEETING"),
            row("a4", 4, "s1", "o4", "2026-01-10", "MEETING"),
            row("a5", 5, "s1", "o5", "2026-01-10", "MEETING"),
        ];
        let summary = class_summary(&class("c1"), &students, &rows, &curriculum, None);
        assert!(summary.needs_attention.is_empty());
        assert_eq!(summary.student_count, 2);
        // Completion divides by the full curriculum, not the 5 assessed.
        assert_eq!(summary.per_student[0].completion_rate, completion_rate(5, 9));
        assert_eq!(summary.per_student[1].assessment_count, 0);
        assert_eq!(summary.per_student[1].performance_score, 0);
    }

    #[test]
    fn school_attention_is_lowest_five_ascending() {
        let curriculum = vec![outcome("o1", 1, "st1", 1, "su1", 1)];
        let school = School {
            id: "sch1".to_string(),
            country_id: "cty1".to_string(),
            name: "School".to_string(),
        };
        let mut classes = Vec::new();
        let mut students = Vec::new();
        let mut rows = Vec::new();
        // Seven classes, one student each. Ratings alternate so scores
        // differ: class k gets k NEEDS_PRACTICE rows -> score 33 for all.
        // Instead, give class k one row rated by k parity.
        for k in 0..7 {
            let cid = format!("c{k}");
            classes.push(class(&cid));
            let sid = format!("s{k}");
            students.push(student(&sid, Some(&cid)));
            let rating = if k < 6 { "NEEDS_PRACTICE" } else { "EASILY_MEETING" };
            rows.push(row(&format!("a{k}"), k as i64, &sid, "o1", "2026-01-10", rating));
        }
        let summary = school_summary(&school, &classes, &students, &rows, &curriculum, None);
        // Six classes score 33 (< 60, with assessments); only five kept.
        assert_eq!(summary.needs_attention.len(), 5);
        assert!(summary
            .needs_attention
            .windows(2)
            .all(|w| w[0].performance_score <= w[1].performance_score));
        // The fully-meeting class is not listed.
        assert!(summary.needs_attention.iter().all(|c| c.class_id != "c6"));
    }

    #[test]
    fn school_attention_requires_at_least_one_assessment() {
        let curriculum = vec![outcome("o1", 1, "st1", 1, "su1", 1)];
        let school = School {
            id: "sch1".to_string(),
            country_id: "cty1".to_string(),
            name: "School".to_string(),
        };
        let classes = vec![class("c1")];
        let students = vec![student("s1", Some("c1"))];
        let summary = school_summary(&school, &classes, &students, &[], &curriculum, None);
        // Score 0 but zero assessments: not flagged.
        assert!(summary.needs_attention.is_empty());
        assert_eq!(summary.per_class[0].performance_score, 0);
    }
}
