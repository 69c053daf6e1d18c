use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_outcomesd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn outcomesd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Sidecar {
    fn start(workspace: &PathBuf) -> Sidecar {
        let (child, stdin, reader) = spawn_sidecar();
        let mut sidecar = Sidecar {
            child,
            stdin,
            reader,
            next_id: 0,
        };
        let resp = sidecar.request(
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
        assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(true));
        sidecar
    }

    fn request(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({ "id": id, "method": method, "params": params });
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");

        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response line");
        let value: serde_json::Value =
            serde_json::from_str(line.trim()).expect("parse response json");
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    /// Request that must succeed; returns `result`.
    fn expect_ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let resp = self.request(method, params);
        assert_eq!(
            resp.get("ok").and_then(|v| v.as_bool()),
            Some(true),
            "{method} failed: {resp}"
        );
        resp.get("result").cloned().expect("result")
    }

    /// Request that must fail; returns the error code.
    fn expect_err(&mut self, method: &str, params: serde_json::Value) -> String {
        let resp = self.request(method, params);
        assert_eq!(
            resp.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{method} unexpectedly succeeded: {resp}"
        );
        resp.get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .expect("error code")
            .to_string()
    }

    fn finish(mut self) {
        drop(self.stdin);
        let _ = self.child.wait();
    }
}

fn str_of(value: &serde_json::Value, key: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {key} in {value}"))
        .to_string()
}

/// One school with a five-outcome curriculum, one class with an assigned
/// teacher, a term, and two enrolled students.
struct Fixture {
    root: String,
    school: String,
    teacher: String,
    class: String,
    term: String,
    strand: String,
    outcomes: Vec<String>,
    students: Vec<String>,
}

fn build_fixture(sidecar: &mut Sidecar) -> Fixture {
    let root = str_of(
        &sidecar.expect_ok(
            "actors.create",
            json!({ "role": "SUPERUSER", "displayName": "Root" }),
        ),
        "actorId",
    );
    let country = str_of(
        &sidecar.expect_ok(
            "countries.create",
            json!({ "actorId": root, "name": "Testland" }),
        ),
        "countryId",
    );
    let school = str_of(
        &sidecar.expect_ok(
            "schools.create",
            json!({ "actorId": root, "countryId": country, "name": "Hilltop Elementary" }),
        ),
        "schoolId",
    );
    let teacher = str_of(
        &sidecar.expect_ok(
            "actors.create",
            json!({
                "actorId": root,
                "role": "TEACHER",
                "displayName": "Ms Reed",
                "assignments": [{ "schoolId": school }]
            }),
        ),
        "actorId",
    );
    let subject = str_of(
        &sidecar.expect_ok(
            "subjects.create",
            json!({ "actorId": root, "name": "Mathematics", "sortOrder": 1 }),
        ),
        "subjectId",
    );
    let strand = str_of(
        &sidecar.expect_ok(
            "strands.create",
            json!({ "actorId": root, "subjectId": subject, "name": "Number Sense", "sortOrder": 1 }),
        ),
        "strandId",
    );
    let mut outcomes = Vec::new();
    for n in 1..=5 {
        let id = str_of(
            &sidecar.expect_ok(
                "outcomes.create",
                json!({
                    "actorId": root,
                    "strandId": strand,
                    "code": format!("NS.{n}"),
                    "description": format!("Outcome {n}"),
                    "sortOrder": n
                }),
            ),
            "outcomeId",
        );
        outcomes.push(id);
    }
    let term = str_of(
        &sidecar.expect_ok(
            "terms.create",
            json!({
                "actorId": root,
                "schoolId": school,
                "name": "Fall",
                "startsAt": "2026-09-01T00:00:00Z",
                "endsAt": "2026-12-20T00:00:00Z"
            }),
        ),
        "termId",
    );
    let class = str_of(
        &sidecar.expect_ok(
            "classes.create",
            json!({
                "actorId": root,
                "schoolId": school,
                "name": "Room 4",
                "teacherId": teacher
            }),
        ),
        "classId",
    );
    let mut students = Vec::new();
    for (first, last, order) in [("Ada", "Alvarez", 1), ("Ben", "Brooks", 2)] {
        let id = str_of(
            &sidecar.expect_ok(
                "students.create",
                json!({
                    "actorId": root,
                    "schoolId": school,
                    "classId": class,
                    "firstName": first,
                    "lastName": last,
                    "sortOrder": order
                }),
            ),
            "studentId",
        );
        students.push(id);
    }

    Fixture {
        root,
        school,
        teacher,
        class,
        term,
        strand,
        outcomes,
        students,
    }
}

fn record(
    sidecar: &mut Sidecar,
    fx: &Fixture,
    student: &str,
    outcome: &str,
    rating: &str,
    date: &str,
) {
    sidecar.expect_ok(
        "assessments.create",
        json!({
            "actorId": fx.teacher,
            "studentId": student,
            "outcomeId": outcome,
            "termId": fx.term,
            "rating": rating,
            "date": date
        }),
    );
}

#[test]
fn latest_assessment_wins_per_outcome() {
    let workspace = temp_dir("outcomes-latest");
    let mut sidecar = Sidecar::start(&workspace);
    let fx = build_fixture(&mut sidecar);
    let student = fx.students[0].clone();
    let outcome = fx.outcomes[0].clone();

    record(&mut sidecar, &fx, &student, &outcome, "NEEDS_PRACTICE", "2026-09-10");
    record(&mut sidecar, &fx, &student, &outcome, "MEETING", "2026-10-01");
    record(&mut sidecar, &fx, &student, &outcome, "EASILY_MEETING", "2026-11-15");

    let report = sidecar.expect_ok(
        "reports.outcome",
        json!({ "actorId": fx.teacher, "classId": fx.class, "outcomeId": outcome }),
    );
    let rows = report
        .get("students")
        .and_then(|v| v.as_array())
        .expect("students");
    let row = rows
        .iter()
        .find(|r| r.get("studentId").and_then(|v| v.as_str()) == Some(student.as_str()))
        .expect("assessed student row");
    assert_eq!(
        row.get("latestRating").and_then(|v| v.as_str()),
        Some("EASILY_MEETING")
    );
    assert_eq!(row.get("latestDate").and_then(|v| v.as_str()), Some("2026-11-15"));
    assert_eq!(row.get("assessmentCount").and_then(|v| v.as_u64()), Some(3));

    // History is newest first.
    let history = row.get("history").and_then(|v| v.as_array()).expect("history");
    let dates: Vec<&str> = history
        .iter()
        .filter_map(|h| h.get("date").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(dates, ["2026-11-15", "2026-10-01", "2026-09-10"]);

    sidecar.finish();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn same_date_tie_goes_to_most_recent_entry() {
    let workspace = temp_dir("outcomes-tie");
    let mut sidecar = Sidecar::start(&workspace);
    let fx = build_fixture(&mut sidecar);
    let student = fx.students[0].clone();
    let outcome = fx.outcomes[0].clone();

    record(&mut sidecar, &fx, &student, &outcome, "MEETING", "2026-10-01");
    record(&mut sidecar, &fx, &student, &outcome, "NEEDS_PRACTICE", "2026-10-01");

    let report = sidecar.expect_ok(
        "reports.outcome",
        json!({ "actorId": fx.teacher, "classId": fx.class, "outcomeId": outcome }),
    );
    let row = report
        .get("students")
        .and_then(|v| v.as_array())
        .and_then(|rows| {
            rows.iter()
                .find(|r| r.get("studentId").and_then(|v| v.as_str()) == Some(student.as_str()))
                .cloned()
        })
        .expect("student row");
    assert_eq!(
        row.get("latestRating").and_then(|v| v.as_str()),
        Some("NEEDS_PRACTICE")
    );

    sidecar.finish();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn class_summary_scores_and_completion() {
    let workspace = temp_dir("outcomes-class-summary");
    let mut sidecar = Sidecar::start(&workspace);
    let fx = build_fixture(&mut sidecar);
    let ada = fx.students[0].clone();

    // Ada covers the full five-outcome curriculum: three EASILY_MEETING,
    // two MEETING. Ben has nothing recorded.
    for (n, outcome) in fx.outcomes.iter().enumerate() {
        let rating = if n < 3 { "EASILY_MEETING" } else { "MEETING" };
        record(&mut sidecar, &fx, &ada, outcome, rating, "2026-10-01");
    }

    let summary = sidecar.expect_ok(
        "reports.classSummary",
        json!({ "actorId": fx.teacher, "classId": fx.class, "termId": fx.term }),
    );
    assert_eq!(summary.get("studentCount").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(summary.get("totalOutcomes").and_then(|v| v.as_u64()), Some(5));

    let per_student = summary
        .get("perStudent")
        .and_then(|v| v.as_array())
        .expect("perStudent");
    let ada_row = per_student
        .iter()
        .find(|r| r.get("studentId").and_then(|v| v.as_str()) == Some(ada.as_str()))
        .expect("ada row");
    // weights 3*3 + 2*2 = 13 of a possible 15 -> 87 after rounding.
    assert_eq!(
        ada_row.get("performanceScore").and_then(|v| v.as_i64()),
        Some(87)
    );
    assert_eq!(
        ada_row.get("completionRate").and_then(|v| v.as_f64()),
        Some(100.0)
    );
    let ben_row = per_student
        .iter()
        .find(|r| r.get("studentId").and_then(|v| v.as_str()) != Some(ada.as_str()))
        .expect("ben row");
    assert_eq!(
        ben_row.get("performanceScore").and_then(|v| v.as_i64()),
        Some(0)
    );
    assert_eq!(
        ben_row.get("completionRate").and_then(|v| v.as_f64()),
        Some(0.0)
    );

    // Nobody is majority NEEDS_PRACTICE, and a student with no assessments
    // is never flagged.
    let attention = summary
        .get("needsAttention")
        .and_then(|v| v.as_array())
        .expect("needsAttention");
    assert!(attention.is_empty());

    sidecar.finish();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn strand_export_writes_csv_with_symbols() {
    let workspace = temp_dir("outcomes-export");
    let export_dir = workspace.join("exports");
    let mut sidecar = Sidecar::start(&workspace);
    let fx = build_fixture(&mut sidecar);
    let ada = fx.students[0].clone();

    record(&mut sidecar, &fx, &ada, &fx.outcomes[0], "EASILY_MEETING", "2026-10-01");
    record(&mut sidecar, &fx, &ada, &fx.outcomes[1], "NEEDS_PRACTICE", "2026-10-02");

    let result = sidecar.expect_ok(
        "reports.export",
        json!({
            "actorId": fx.teacher,
            "reportType": "strand",
            "format": "csv",
            "outDir": export_dir.to_string_lossy(),
            "classId": fx.class,
            "strandId": fx.strand
        }),
    );
    let filename = str_of(&result, "filename");
    assert!(filename.starts_with("strand-report-"));
    assert!(filename.ends_with(".csv"));
    assert_eq!(str_of(&result, "contentType"), "text/csv");

    let csv = std::fs::read_to_string(str_of(&result, "path")).expect("read export");
    let matrix_line = csv
        .lines()
        .find(|l| l.starts_with("\"Alvarez, Ada\""))
        .expect("ada matrix row");
    // Rated outcomes print +/x, the untouched three print as dashes.
    assert_eq!(matrix_line, "\"Alvarez, Ada\",+,x,-,-,-");

    sidecar.finish();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn strand_report_names_a_strand_with_no_outcomes_yet() {
    let workspace = temp_dir("outcomes-empty-strand");
    let mut sidecar = Sidecar::start(&workspace);
    let fx = build_fixture(&mut sidecar);

    // A curriculum area that was just set up and has no outcomes under it.
    let subject = str_of(
        &sidecar.expect_ok(
            "subjects.create",
            json!({ "actorId": fx.root, "name": "Literacy", "sortOrder": 2 }),
        ),
        "subjectId",
    );
    let strand = str_of(
        &sidecar.expect_ok(
            "strands.create",
            json!({ "actorId": fx.root, "subjectId": subject, "name": "Phonics", "sortOrder": 1 }),
        ),
        "strandId",
    );

    let report = sidecar.expect_ok(
        "reports.strand",
        json!({ "actorId": fx.teacher, "classId": fx.class, "strandId": strand }),
    );
    assert_eq!(
        report.get("strandId").and_then(|v| v.as_str()),
        Some(strand.as_str())
    );
    assert_eq!(
        report.get("strandName").and_then(|v| v.as_str()),
        Some("Phonics")
    );
    assert_eq!(
        report.get("subjectId").and_then(|v| v.as_str()),
        Some(subject.as_str())
    );
    assert_eq!(
        report.get("subjectName").and_then(|v| v.as_str()),
        Some("Literacy")
    );
    assert_eq!(
        report
            .get("outcomes")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );

    sidecar.finish();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn scoping_is_enforced_over_the_wire() {
    let workspace = temp_dir("outcomes-scoping");
    let mut sidecar = Sidecar::start(&workspace);
    let fx = build_fixture(&mut sidecar);
    let ada = fx.students[0].clone();
    record(&mut sidecar, &fx, &ada, &fx.outcomes[0], "MEETING", "2026-10-01");

    // Second school with its own teacher.
    let country = str_of(
        &sidecar.expect_ok(
            "countries.create",
            json!({ "actorId": fx.root, "name": "Otherland" }),
        ),
        "countryId",
    );
    let other_school = str_of(
        &sidecar.expect_ok(
            "schools.create",
            json!({ "actorId": fx.root, "countryId": country, "name": "Riverside" }),
        ),
        "schoolId",
    );
    let outsider = str_of(
        &sidecar.expect_ok(
            "actors.create",
            json!({
                "actorId": fx.root,
                "role": "TEACHER",
                "displayName": "Mr Cross",
                "assignments": [{ "schoolId": other_school }]
            }),
        ),
        "actorId",
    );

    // A teacher from another school cannot see the class at all.
    let code = sidecar.expect_err(
        "reports.classSummary",
        json!({ "actorId": outsider, "classId": fx.class }),
    );
    assert_eq!(code, "forbidden");

    // Same school but not the assigned teacher: still forbidden.
    let colleague = str_of(
        &sidecar.expect_ok(
            "actors.create",
            json!({
                "actorId": fx.root,
                "role": "TEACHER",
                "displayName": "Ms Park",
                "assignments": [{ "schoolId": fx.school }]
            }),
        ),
        "actorId",
    );
    let code = sidecar.expect_err(
        "reports.classSummary",
        json!({ "actorId": colleague, "classId": fx.class }),
    );
    assert_eq!(code, "forbidden");

    // A school admin of the same school is allowed.
    let admin = str_of(
        &sidecar.expect_ok(
            "actors.create",
            json!({
                "actorId": fx.root,
                "role": "SCHOOL_ADMIN",
                "displayName": "Principal Hill",
                "assignments": [{ "schoolId": fx.school }]
            }),
        ),
        "actorId",
    );
    sidecar.expect_ok(
        "reports.classSummary",
        json!({ "actorId": admin, "classId": fx.class }),
    );

    // The outsider's assessment list silently narrows to nothing.
    let listed = sidecar.expect_ok(
        "assessments.list",
        json!({ "actorId": outsider, "schoolId": fx.school }),
    );
    assert_eq!(
        listed
            .get("assessments")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );

    // A parent sees only their own child's records.
    let parent = str_of(
        &sidecar.expect_ok(
            "actors.create",
            json!({
                "actorId": fx.root,
                "role": "PARENT_STUDENT",
                "displayName": "Ada's Parent",
                "assignments": [{ "studentId": ada }]
            }),
        ),
        "actorId",
    );
    let listed = sidecar.expect_ok("assessments.list", json!({ "actorId": parent }));
    let rows = listed
        .get("assessments")
        .and_then(|v| v.as_array())
        .expect("assessments");
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].get("studentId").and_then(|v| v.as_str()),
        Some(ada.as_str())
    );
    // ...and may read that child's report, but nobody else's.
    sidecar.expect_ok(
        "reports.student",
        json!({ "actorId": parent, "studentId": ada }),
    );
    let code = sidecar.expect_err(
        "reports.student",
        json!({ "actorId": parent, "studentId": fx.students[1] }),
    );
    assert_eq!(code, "forbidden");

    // Parents cannot record assessments.
    let code = sidecar.expect_err(
        "assessments.create",
        json!({
            "actorId": parent,
            "studentId": ada,
            "outcomeId": fx.outcomes[0],
            "termId": fx.term,
            "rating": "MEETING",
            "date": "2026-10-02"
        }),
    );
    assert_eq!(code, "forbidden");

    sidecar.finish();
    let _ = std::fs::remove_dir_all(workspace);
}
