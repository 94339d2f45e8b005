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

/// Add rooms to the exam's pool. Pool order (sort_order) is the order the
/// allocation cursor consumes rooms in.
fn rooms_add(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;
    let Some(rows) = params.get("rooms").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad("missing rooms"));
    };
    if !super::exams::exam_exists(conn, &exam_id).map_err(HandlerErr::db)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "exam not found".to_string(),
            details: None,
        });
    }

    let next_sort: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM rooms WHERE exam_id = ?",
            [&exam_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db)?;

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;

    let mut room_ids = Vec::new();
    for (i, row) in rows.iter().enumerate() {
        let building = row
            .get("building")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| HandlerErr::bad("room missing building"))?;
        let room_number = row
            .get("roomNumber")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| HandlerErr::bad("room missing roomNumber"))?;
        let capacity = row
            .get("capacity")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| HandlerErr::bad("room missing capacity"))?;
        if capacity <= 0 {
            return Err(HandlerErr::bad("capacity must be a positive integer"));
        }

        let room_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO rooms(id, exam_id, building, room_number, capacity, sort_order)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                &room_id,
                &exam_id,
                &building,
                &room_number,
                capacity,
                next_sort + i as i64,
            ),
        )
        .map_err(|e| HandlerErr {
            code: "db_insert_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "rooms" })),
        })?;
        room_ids.push(room_id);
    }

    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({ "roomIds": room_ids, "addedCount": room_ids.len() }))
}

fn rooms_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;
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
    Ok(json!({ "rooms": rooms }))
}

fn rooms_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let room_id = get_required_str(params, "roomId")?;
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM rooms WHERE id = ?", [&room_id], |r| r.get(0))
        .optional()
        .map_err(HandlerErr::db)?;
    if exists.is_none() {
        return Err(HandlerErr {
            code: "not_found",
            message: "room not found".to_string(),
            details: None,
        });
    }

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    for sql in [
        "DELETE FROM seat_allocations WHERE room_id = ?",
        "DELETE FROM rooms WHERE id = ?",
    ] {
        tx.execute(sql, [&room_id]).map_err(|e| HandlerErr {
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
        "rooms.add" => Some(with_db(state, req, rooms_add)),
        "rooms.list" => Some(with_db(state, req, rooms_list)),
        "rooms.delete" => Some(with_db(state, req, rooms_delete)),
        _ => None,
    }
}
