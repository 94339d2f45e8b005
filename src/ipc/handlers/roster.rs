use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
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

fn opt_str(v: &serde_json::Value, key: &str) -> Option<String> {
    v.get(key)
        .and_then(|x| x.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Import one already-parsed student file. Rows arrive as structured JSON;
/// spreadsheet/CSV parsing happens upstream. Rows missing a registration
/// number or department are skipped and counted.
fn roster_add_file(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let file_name = get_required_str(params, "fileName")?;
    let file_year = opt_str(params, "year");
    let file_semester = opt_str(params, "semester");
    let file_department = opt_str(params, "department");
    let Some(rows) = params.get("students").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad("missing students"));
    };

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;

    let file_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO student_files(id, file_name, year, semester, department, uploaded_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &file_id,
            &file_name,
            &file_year,
            &file_semester,
            &file_department,
            db::now_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "student_files" })),
    })?;

    let mut imported = 0i64;
    let mut skipped = 0i64;
    for row in rows {
        let registration = opt_str(row, "registrationNumber");
        // File-level defaults fill per-row gaps (single-department uploads).
        let department = opt_str(row, "department").or_else(|| file_department.clone());
        let (Some(registration), Some(department)) = (registration, department) else {
            skipped += 1;
            continue;
        };
        let name = opt_str(row, "name").unwrap_or_else(|| registration.clone());
        let roll_number = opt_str(row, "rollNumber");
        let year = opt_str(row, "year").or_else(|| file_year.clone()).unwrap_or_default();
        let semester = opt_str(row, "semester")
            .or_else(|| file_semester.clone())
            .unwrap_or_default();

        tx.execute(
            "INSERT INTO students(id, file_id, name, roll_number, registration_number,
                                  department, year, semester, sort_order)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                &file_id,
                &name,
                &roll_number,
                &registration,
                &department,
                &year,
                &semester,
                imported,
            ),
        )
        .map_err(|e| HandlerErr {
            code: "db_insert_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "students" })),
        })?;
        imported += 1;
    }

    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({
        "fileId": file_id,
        "importedCount": imported,
        "skippedCount": skipped,
    }))
}

fn roster_list_files(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT
               f.id, f.file_name, f.year, f.semester, f.department, f.uploaded_at,
               (SELECT COUNT(*) FROM students s WHERE s.file_id = f.id) AS student_count
             FROM student_files f
             ORDER BY f.uploaded_at",
        )
        .map_err(HandlerErr::db)?;
    let files = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "fileName": r.get::<_, String>(1)?,
                "year": r.get::<_, Option<String>>(2)?,
                "semester": r.get::<_, Option<String>>(3)?,
                "department": r.get::<_, Option<String>>(4)?,
                "uploadedAt": r.get::<_, String>(5)?,
                "studentCount": r.get::<_, i64>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "files": files }))
}

/// Merge-attach every student from the named files to the exam roster.
fn roster_attach(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;
    let Some(file_ids) = params.get("fileIds").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad("missing fileIds"));
    };
    if !super::exams::exam_exists(conn, &exam_id).map_err(HandlerErr::db)? {
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

    let mut attached = 0i64;
    for fid in file_ids.iter().filter_map(|v| v.as_str()) {
        let exists: Option<i64> = tx
            .query_row("SELECT 1 FROM student_files WHERE id = ?", [fid], |r| {
                r.get(0)
            })
            .optional()
            .map_err(HandlerErr::db)?;
        if exists.is_none() {
            return Err(HandlerErr {
                code: "not_found",
                message: format!("student file not found: {}", fid),
                details: None,
            });
        }
        attached += tx
            .execute(
                "INSERT OR IGNORE INTO exam_students(exam_id, student_id, added_at)
                 SELECT ?, s.id, ? FROM students s WHERE s.file_id = ?",
                (&exam_id, db::now_rfc3339(), fid),
            )
            .map_err(HandlerErr::db)? as i64;
    }

    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({ "attachedCount": attached }))
}

fn roster_students(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;
    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.name, s.roll_number, s.registration_number,
                    s.department, s.year, s.semester
             FROM students s
             JOIN exam_students es ON es.student_id = s.id
             WHERE es.exam_id = ?
             ORDER BY s.department, s.sort_order",
        )
        .map_err(HandlerErr::db)?;
    let students = stmt
        .query_map([&exam_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "rollNumber": r.get::<_, Option<String>>(2)?,
                "registrationNumber": r.get::<_, String>(3)?,
                "department": r.get::<_, String>(4)?,
                "year": r.get::<_, String>(5)?,
                "semester": r.get::<_, String>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "students": students }))
}

fn roster_delete_file(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let file_id = get_required_str(params, "fileId")?;
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM student_files WHERE id = ?", [&file_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db)?;
    if exists.is_none() {
        return Err(HandlerErr {
            code: "not_found",
            message: "student file not found".to_string(),
            details: None,
        });
    }

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    for sql in [
        "DELETE FROM exam_students WHERE student_id IN (SELECT id FROM students WHERE file_id = ?)",
        "DELETE FROM students WHERE file_id = ?",
        "DELETE FROM student_files WHERE id = ?",
    ] {
        tx.execute(sql, [&file_id]).map_err(|e| HandlerErr {
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
        "roster.addFile" => Some(with_db(state, req, roster_add_file)),
        "roster.listFiles" => Some(with_db(state, req, |c, _| roster_list_files(c))),
        "roster.attach" => Some(with_db(state, req, roster_attach)),
        "roster.students" => Some(with_db(state, req, roster_students)),
        "roster.deleteFile" => Some(with_db(state, req, roster_delete_file)),
        _ => None,
    }
}
