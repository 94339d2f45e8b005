use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    fn db(e: impl ToString) -> Self {
        HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        }
    }

    fn bad(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad(format!("missing {}", key)))
}

fn get_optional_date(params: &serde_json::Value, key: &str) -> Result<Option<String>, HandlerErr> {
    let Some(v) = params.get(key) else {
        return Ok(None);
    };
    if v.is_null() {
        return Ok(None);
    }
    let Some(s) = v.as_str() else {
        return Err(HandlerErr::bad(format!("{} must be a string", key)));
    };
    let t = s.trim();
    if t.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(t, "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad(format!("{} must be YYYY-MM-DD", key)))?;
    Ok(Some(t.to_string()))
}

pub(super) fn exam_exists(conn: &Connection, exam_id: &str) -> Result<bool, String> {
    conn.query_row("SELECT 1 FROM exams WHERE id = ?", [exam_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| e.to_string())
}

/// Derived display status from the exam's date window.
fn exam_status(start_date: Option<&str>, end_date: Option<&str>) -> &'static str {
    let today = chrono::Local::now().date_naive();
    if let Some(s) = start_date.and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()) {
        if today < s {
            return "upcoming";
        }
    }
    if let Some(e) = end_date.and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()) {
        if today > e {
            return "finished";
        }
    }
    "ongoing"
}

fn exam_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::bad("name must not be empty"));
    }
    let start_date = get_optional_date(params, "startDate")?;
    let end_date = get_optional_date(params, "endDate")?;

    let exam_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO exams(id, name, start_date, end_date, is_completed, created_at)
         VALUES(?, ?, ?, ?, 0, ?)",
        (&exam_id, &name, &start_date, &end_date, db::now_rfc3339()),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "exams" })),
    })?;

    Ok(json!({ "examId": exam_id, "name": name }))
}

fn exam_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT
               e.id,
               e.name,
               e.start_date,
               e.end_date,
               e.is_completed,
               (SELECT COUNT(*) FROM exam_students es WHERE es.exam_id = e.id) AS student_count,
               (SELECT COUNT(*) FROM rooms r WHERE r.exam_id = e.id) AS room_count,
               (SELECT COUNT(*) FROM department_papers dp WHERE dp.exam_id = e.id) AS paper_count,
               (SELECT COUNT(*) FROM seat_allocations sa WHERE sa.exam_id = e.id) AS seat_count
             FROM exams e
             ORDER BY e.created_at",
        )
        .map_err(HandlerErr::db)?;

    let exams = stmt
        .query_map([], |row| {
            let start_date: Option<String> = row.get(2)?;
            let end_date: Option<String> = row.get(3)?;
            let status = exam_status(start_date.as_deref(), end_date.as_deref());
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "startDate": start_date,
                "endDate": end_date,
                "isCompleted": row.get::<_, i64>(4)? != 0,
                "status": status,
                "studentCount": row.get::<_, i64>(5)?,
                "roomCount": row.get::<_, i64>(6)?,
                "paperCount": row.get::<_, i64>(7)?,
                "seatCount": row.get::<_, i64>(8)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    Ok(json!({ "exams": exams }))
}

fn exam_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;
    if !exam_exists(conn, &exam_id).map_err(HandlerErr::db)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "exam not found".to_string(),
            details: None,
        });
    }

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;

    // Dependency order; no ON DELETE CASCADE.
    for sql in [
        "DELETE FROM seat_allocations WHERE exam_id = ?",
        "DELETE FROM rooms WHERE exam_id = ?",
        "DELETE FROM department_papers WHERE exam_id = ?",
        "DELETE FROM exam_students WHERE exam_id = ?",
        "DELETE FROM exams WHERE id = ?",
    ] {
        tx.execute(sql, [&exam_id]).map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: None,
        })?;
    }

    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({ "deleted": true }))
}

fn exam_complete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;
    let updated = conn
        .execute("UPDATE exams SET is_completed = 1 WHERE id = ?", [&exam_id])
        .map_err(HandlerErr::db)?;
    if updated == 0 {
        return Err(HandlerErr {
            code: "not_found",
            message: "exam not found".to_string(),
            details: None,
        });
    }
    Ok(json!({ "examId": exam_id, "isCompleted": true }))
}

fn exam_summary(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;

    let exam = conn
        .query_row(
            "SELECT name, start_date, end_date, is_completed FROM exams WHERE id = ?",
            [&exam_id],
            |r| {
                Ok(json!({
                    "id": exam_id,
                    "name": r.get::<_, String>(0)?,
                    "startDate": r.get::<_, Option<String>>(1)?,
                    "endDate": r.get::<_, Option<String>>(2)?,
                    "isCompleted": r.get::<_, i64>(3)? != 0,
                }))
            },
        )
        .optional()
        .map_err(HandlerErr::db)?
        .ok_or_else(|| HandlerErr {
            code: "not_found",
            message: "exam not found".to_string(),
            details: None,
        })?;

    let mut stmt = conn
        .prepare(
            "SELECT department, paper_name, paper_code, exam_date, session, start_time, end_time
             FROM department_papers WHERE exam_id = ? ORDER BY exam_date, session, department",
        )
        .map_err(HandlerErr::db)?;
    let papers = stmt
        .query_map([&exam_id], |r| {
            Ok(json!({
                "department": r.get::<_, String>(0)?,
                "paperName": r.get::<_, String>(1)?,
                "paperCode": r.get::<_, Option<String>>(2)?,
                "examDate": r.get::<_, String>(3)?,
                "session": r.get::<_, String>(4)?,
                "startTime": r.get::<_, Option<String>>(5)?,
                "endTime": r.get::<_, Option<String>>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let mut stmt = conn
        .prepare(
            "SELECT id, building, room_number, capacity FROM rooms
             WHERE exam_id = ? ORDER BY sort_order",
        )
        .map_err(HandlerErr::db)?;
    let rooms = stmt
        .query_map([&exam_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "building": r.get::<_, String>(1)?,
                "roomNumber": r.get::<_, String>(2)?,
                "capacity": r.get::<_, i64>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let mut stmt = conn
        .prepare(
            "SELECT DISTINCT s.department FROM students s
             JOIN exam_students es ON es.student_id = s.id
             WHERE es.exam_id = ? ORDER BY s.department",
        )
        .map_err(HandlerErr::db)?;
    let departments = stmt
        .query_map([&exam_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let total_students: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM exam_students WHERE exam_id = ?",
            [&exam_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db)?;
    let total_seats: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM seat_allocations WHERE exam_id = ?",
            [&exam_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db)?;

    Ok(json!({
        "exam": exam,
        "papers": papers,
        "rooms": rooms,
        "rosterDepartments": departments,
        "totalStudents": total_students,
        "totalSeatsAllocated": total_seats,
    }))
}

fn with_db(
    state: &mut AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "exam.create" => Some(with_db(state, req, exam_create)),
        "exam.list" => Some(with_db(state, req, |c, _| exam_list(c))),
        "exam.delete" => Some(with_db(state, req, exam_delete)),
        "exam.complete" => Some(with_db(state, req, exam_complete)),
        "exam.summary" => Some(with_db(state, req, exam_summary)),
        _ => None,
    }
}
