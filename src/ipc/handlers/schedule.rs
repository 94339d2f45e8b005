use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::{NaiveDate, NaiveTime};
use rusqlite::Connection;
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

fn parse_time(v: Option<String>, key: &str) -> Result<Option<String>, HandlerErr> {
    let Some(t) = v else { return Ok(None) };
    NaiveTime::parse_from_str(&t, "%H:%M")
        .map_err(|_| HandlerErr::bad(format!("{} must be HH:MM", key)))?;
    Ok(Some(t))
}

/// Add scheduled papers for an exam. Department names here are the match
/// targets for the roster during allocation; matching is exact and
/// case-sensitive.
fn schedule_add_papers(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;
    let Some(rows) = params.get("papers").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad("missing papers"));
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

    let mut paper_ids = Vec::new();
    for row in rows {
        let department = opt_str(row, "department")
            .ok_or_else(|| HandlerErr::bad("paper missing department"))?;
        let paper_name = opt_str(row, "paperName")
            .ok_or_else(|| HandlerErr::bad("paper missing paperName"))?;
        let exam_date = opt_str(row, "examDate")
            .ok_or_else(|| HandlerErr::bad("paper missing examDate"))?;
        NaiveDate::parse_from_str(&exam_date, "%Y-%m-%d")
            .map_err(|_| HandlerErr::bad("examDate must be YYYY-MM-DD"))?;
        let session = opt_str(row, "session").unwrap_or_else(|| "First Half".to_string());
        let paper_code = opt_str(row, "paperCode");
        let start_time = parse_time(opt_str(row, "startTime"), "startTime")?;
        let end_time = parse_time(opt_str(row, "endTime"), "endTime")?;

        let paper_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO department_papers(id, exam_id, department, paper_name, paper_code,
                                           exam_date, session, start_time, end_time)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &paper_id,
                &exam_id,
                &department,
                &paper_name,
                &paper_code,
                &exam_date,
                &session,
                &start_time,
                &end_time,
            ),
        )
        .map_err(|e| HandlerErr {
            code: "db_insert_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "department_papers" })),
        })?;
        paper_ids.push(paper_id);
    }

    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({ "paperIds": paper_ids, "addedCount": paper_ids.len() }))
}

fn schedule_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;
    let mut stmt = conn
        .prepare(
            "SELECT id, department, paper_name, paper_code, exam_date, session,
                    start_time, end_time
             FROM department_papers
             WHERE exam_id = ?
             ORDER BY exam_date, session, department",
        )
        .map_err(HandlerErr::db)?;
    let papers = stmt
        .query_map([&exam_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "department": r.get::<_, String>(1)?,
                "paperName": r.get::<_, String>(2)?,
                "paperCode": r.get::<_, Option<String>>(3)?,
                "examDate": r.get::<_, String>(4)?,
                "session": r.get::<_, String>(5)?,
                "startTime": r.get::<_, Option<String>>(6)?,
                "endTime": r.get::<_, Option<String>>(7)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "papers": papers }))
}

fn schedule_delete_paper(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let paper_id = get_required_str(params, "paperId")?;
    let deleted = conn
        .execute("DELETE FROM department_papers WHERE id = ?", [&paper_id])
        .map_err(HandlerErr::db)?;
    if deleted == 0 {
        return Err(HandlerErr {
            code: "not_found",
            message: "paper not found".to_string(),
            details: None,
        });
    }
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
        "schedule.addPapers" => Some(with_db(state, req, schedule_add_papers)),
        "schedule.list" => Some(with_db(state, req, schedule_list)),
        "schedule.deletePaper" => Some(with_db(state, req, schedule_delete_paper)),
        _ => None,
    }
}
