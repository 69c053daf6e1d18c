//! Report assembler: validates parameters, resolves referenced entities,
//! applies access scoping, fetches records through the repository facade,
//! then hands the resolved inputs to the aggregation engine and decorates
//! the result with display metadata.
//!
//! Ordering is deliberate: validation failures (missing classId) happen
//! before any repository call, Forbidden before any assessment-record
//! fetch, NotFound before aggregation.

use crate::access::Actor;
use crate::domain::{Class, Student, Term};
use crate::report::{
    self, ClassSummary, OutcomeReport, ReportError, SchoolSummary, StrandReport, StudentReport,
};
use crate::repo::{AssessmentFilter, OutcomeFilter, Repository, StudentFilter};

#[derive(Debug, Clone, Default)]
pub struct ReportParams {
    pub student_id: Option<String>,
    pub class_id: Option<String>,
    pub school_id: Option<String>,
    pub subject_id: Option<String>,
    pub strand_id: Option<String>,
    pub outcome_id: Option<String>,
    pub term_id: Option<String>,
}

pub struct ReportAssembler<'a, R: Repository> {
    repo: &'a R,
}

impl<'a, R: Repository> ReportAssembler<'a, R> {
    pub fn new(repo: &'a R) -> Self {
        Self { repo }
    }

    fn resolve_term(&self, term_id: Option<&str>) -> Result<Option<Term>, ReportError> {
        match term_id {
            None => Ok(None),
            Some(id) => self
                .repo
                .term(id)?
                .ok_or_else(|| ReportError::not_found("term not found"))
                .map(Some),
        }
    }

    fn resolve_class(&self, actor: &Actor, class_id: &str) -> Result<Class, ReportError> {
        let class = self
            .repo
            .class(class_id)?
            .ok_or_else(|| ReportError::not_found("class not found"))?;
        actor.authorize_class(&class)?;
        Ok(class)
    }

    fn class_roster(&self, class_id: &str) -> Result<Vec<Student>, ReportError> {
        self.repo.students(&StudentFilter {
            class_id: Some(class_id.to_string()),
            active_only: true,
            ..Default::default()
        })
    }

    pub fn student_report(
        &self,
        actor: &Actor,
        params: &ReportParams,
    ) -> Result<StudentReport, ReportError> {
        let student_id = params
            .student_id
            .as_deref()
            .ok_or_else(|| ReportError::bad_params("studentId is required"))?;
        let student = self
            .repo
            .student(student_id)?
            .ok_or_else(|| ReportError::not_found("student not found"))?;
        actor.authorize_student(&student)?;

        if let Some(subject_id) = params.subject_id.as_deref() {
            if self.repo.subject(subject_id)?.is_none() {
                return Err(ReportError::not_found("subject not found"));
            }
        }
        let term = self.resolve_term(params.term_id.as_deref())?;

        // Full curriculum regardless of any subject filter: completion
        // denominators must stay comparable across reports.
        let curriculum = self.repo.outcomes(&OutcomeFilter::default())?;
        let rows = self.repo.assessments(&AssessmentFilter {
            student_id: Some(student.id.clone()),
            subject_id: params.subject_id.clone(),
            term_id: params.term_id.clone(),
            ..Default::default()
        })?;

        Ok(report::student_report(
            &student,
            &rows,
            &curriculum,
            term.as_ref(),
        ))
    }

    /// Strand reports are only defined within a class; a missing classId
    /// is a validation failure raised before any repository call.
    pub fn strand_report(
        &self,
        actor: &Actor,
        params: &ReportParams,
    ) -> Result<StrandReport, ReportError> {
        let class_id = params
            .class_id
            .as_deref()
            .ok_or_else(|| ReportError::bad_params("classId is required for strand reports"))?;
        let strand_id = params
            .strand_id
            .as_deref()
            .ok_or_else(|| ReportError::bad_params("strandId is required"))?;

        let class = self.resolve_class(actor, class_id)?;
        let strand = self
            .repo
            .strand(strand_id)?
            .ok_or_else(|| ReportError::not_found("strand not found"))?;
        let subject = self
            .repo
            .subject(&strand.subject_id)?
            .ok_or_else(|| ReportError::not_found("subject not found"))?;
        let term = self.resolve_term(params.term_id.as_deref())?;

        let strand_outcomes = self.repo.outcomes(&OutcomeFilter {
            strand_id: Some(strand_id.to_string()),
            ..Default::default()
        })?;
        let total_outcomes = self.repo.outcomes(&OutcomeFilter::default())?.len();
        let students = self.class_roster(&class.id)?;
        let rows = self.repo.assessments(&AssessmentFilter {
            class_id: Some(class.id.clone()),
            strand_id: Some(strand_id.to_string()),
            term_id: params.term_id.clone(),
            ..Default::default()
        })?;

        Ok(report::strand_report(
            &class,
            &strand,
            &subject,
            &strand_outcomes,
            &students,
            &rows,
            total_outcomes,
            term.as_ref(),
        ))
    }

    /// Same class constraint as strand reports.
    pub fn outcome_report(
        &self,
        actor: &Actor,
        params: &ReportParams,
    ) -> Result<OutcomeReport, ReportError> {
        let class_id = params
            .class_id
            .as_deref()
            .ok_or_else(|| ReportError::bad_params("classId is required for outcome reports"))?;
        let outcome_id = params
            .outcome_id
            .as_deref()
            .ok_or_else(|| ReportError::bad_params("outcomeId is required"))?;

        let class = self.resolve_class(actor, class_id)?;
        let outcome = self
            .repo
            .outcome(outcome_id)?
            .ok_or_else(|| ReportError::not_found("outcome not found"))?;
        let term = self.resolve_term(params.term_id.as_deref())?;

        let total_outcomes = self.repo.outcomes(&OutcomeFilter::default())?.len();
        let students = self.class_roster(&class.id)?;
        let rows = self.repo.assessments(&AssessmentFilter {
            class_id: Some(class.id.clone()),
            outcome_id: Some(outcome.id.clone()),
            term_id: params.term_id.clone(),
            ..Default::default()
        })?;

        Ok(report::outcome_report(
            &class,
            &outcome,
            &students,
            &rows,
            total_outcomes,
            term.as_ref(),
        ))
    }

    pub fn class_summary(
        &self,
        actor: &Actor,
        params: &ReportParams,
    ) -> Result<ClassSummary, ReportError> {
        let class_id = params
            .class_id
            .as_deref()
            .ok_or_else(|| ReportError::bad_params("classId is required"))?;
        let class = self.resolve_class(actor, class_id)?;
        let term = self.resolve_term(params.term_id.as_deref())?;

        let curriculum = self.repo.outcomes(&OutcomeFilter::default())?;
        let students = self.class_roster(&class.id)?;
        let rows = self.repo.assessments(&AssessmentFilter {
            class_id: Some(class.id.clone()),
            term_id: params.term_id.clone(),
            ..Default::default()
        })?;

        Ok(report::class_summary(
            &class,
            &students,
            &rows,
            &curriculum,
            term.as_ref(),
        ))
    }

    pub fn school_summary(
        &self,
        actor: &Actor,
        params: &ReportParams,
    ) -> Result<SchoolSummary, ReportError> {
        let school_id = params
            .school_id
            .as_deref()
            .ok_or_else(|| ReportError::bad_params("schoolId is required"))?;
        let school = self
            .repo
            .school(school_id)?
            .ok_or_else(|| ReportError::not_found("school not found"))?;
        actor.authorize_school(&school.id)?;
        let term = self.resolve_term(params.term_id.as_deref())?;

        let curriculum = self.repo.outcomes(&OutcomeFilter::default())?;
        let classes = self.repo.classes_in_school(&school.id)?;
        let students = self.repo.students(&StudentFilter {
            school_id: Some(school.id.clone()),
            active_only: true,
            ..Default::default()
        })?;
        let rows = self.repo.assessments(&AssessmentFilter {
            school_id: Some(school.id.clone()),
            term_id: params.term_id.clone(),
            ..Default::default()
        })?;

        Ok(report::school_summary(
            &school,
            &classes,
            &students,
            &rows,
            &curriculum,
            term.as_ref(),
        ))
    }
}
