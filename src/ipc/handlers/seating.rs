use crate::alloc::{self, AllocError, ColumnOverrides, PaperRecord, RoomRecord, RosterEntry};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
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

/// Normalize a caller column map. Accepts either a 5-element array (index 0
/// is column 1) or an object keyed by column number; null/empty entries mean
/// "unassigned".
fn parse_column_map(v: &serde_json::Value) -> HashMap<u8, String> {
    let mut out = HashMap::new();
    match v {
        serde_json::Value::Array(items) => {
            for (idx, item) in items.iter().enumerate().take(alloc::COLS_PER_ROOM as usize) {
                if let Some(s) = item.as_str() {
                    if !s.is_empty() {
                        out.insert(idx as u8 + 1, s.to_string());
                    }
                }
            }
        }
        serde_json::Value::Object(map) => {
            for (k, val) in map {
                let Ok(col) = k.parse::<u8>() else { continue };
                if !(1..=alloc::COLS_PER_ROOM).contains(&col) {
                    continue;
                }
                if let Some(s) = val.as_str() {
                    if !s.is_empty() {
                        out.insert(col, s.to_string());
                    }
                }
            }
        }
        _ => {}
    }
    out
}

fn parse_overrides(params: &serde_json::Value) -> ColumnOverrides {
    let mut overrides = ColumnOverrides::default();
    if let Some(v) = params.get("columnMap") {
        overrides.global = parse_column_map(v);
    }
    if let Some(serde_json::Value::Object(map)) = params.get("roomColumnMap") {
        for (room_id, v) in map {
            let m = parse_column_map(v);
            if !m.is_empty() {
                overrides.per_room.insert(room_id.clone(), m);
            }
        }
    }
    overrides
}

fn load_room(conn: &Connection, exam_id: &str, room_id: &str) -> Result<RoomRecord, HandlerErr> {
    conn.query_row(
        "SELECT id, building, room_number, capacity FROM rooms WHERE id = ? AND exam_id = ?",
        [room_id, exam_id],
        |r| {
            Ok(RoomRecord {
                id: r.get(0)?,
                building: r.get(1)?,
                room_number: r.get(2)?,
                capacity: r.get::<_, i64>(3)? as u32,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::db)?
    .ok_or_else(|| HandlerErr {
        code: "not_found",
        message: "room not found for this exam".to_string(),
        details: None,
    })
}

fn load_roster(conn: &Connection, exam_id: &str) -> Result<Vec<RosterEntry>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.registration_number, s.department, s.year, s.semester
             FROM students s
             JOIN exam_students es ON es.student_id = s.id
             WHERE es.exam_id = ?
             ORDER BY s.department, s.sort_order",
        )
        .map_err(HandlerErr::db)?;
    stmt.query_map([exam_id], |r| {
        Ok(RosterEntry {
            id: r.get(0)?,
            registration_number: r.get(1)?,
            department: r.get(2)?,
            year: r.get(3)?,
            semester: r.get(4)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db)
}

fn load_papers(conn: &Connection, exam_id: &str) -> Result<Vec<PaperRecord>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT department, paper_name, exam_date, session, start_time, end_time
             FROM department_papers
             WHERE exam_id = ?
             ORDER BY exam_date, session, department",
        )
        .map_err(HandlerErr::db)?;
    stmt.query_map([exam_id], |r| {
        Ok(PaperRecord {
            department: r.get(0)?,
            paper_name: r.get(1)?,
            exam_date: r.get(2)?,
            session: r.get(3)?,
            start_time: r.get(4)?,
            end_time: r.get(5)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db)
}

fn load_rooms(conn: &Connection, exam_id: &str) -> Result<Vec<RoomRecord>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, building, room_number, capacity FROM rooms
             WHERE exam_id = ? ORDER BY sort_order",
        )
        .map_err(HandlerErr::db)?;
    stmt.query_map([exam_id], |r| {
        Ok(RoomRecord {
            id: r.get(0)?,
            building: r.get(1)?,
            room_number: r.get(2)?,
            capacity: r.get::<_, i64>(3)? as u32,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db)
}

fn alloc_error_details(e: &AllocError) -> Option<serde_json::Value> {
    match e {
        AllocError::NoSchedule { roster_departments } => {
            Some(json!({ "rosterDepartments": roster_departments }))
        }
        AllocError::DepartmentMismatch {
            roster_departments,
            configured_departments,
        } => Some(json!({
            "rosterDepartments": roster_departments,
            "configuredDepartments": configured_departments,
        })),
        AllocError::RoomShortfall {
            available,
            required,
            group_students,
        } => Some(json!({
            "availableRooms": available,
            "requiredRooms": required,
            "additionalRooms": required - available,
            "groupStudents": group_students,
        })),
        AllocError::SeatExhaustion {
            department,
            remaining,
        } => Some(json!({ "department": department, "remaining": remaining })),
        _ => None,
    }
}

/// Run the allocation engine and replace the exam's stored seats with the
/// result. Nothing is written when the engine fails.
fn seating_generate(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;
    if !super::exams::exam_exists(conn, &exam_id).map_err(HandlerErr::db)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "exam not found".to_string(),
            details: None,
        });
    }

    let roster = load_roster(conn, &exam_id)?;
    let papers = load_papers(conn, &exam_id)?;
    let rooms = load_rooms(conn, &exam_id)?;
    let overrides = parse_overrides(params);

    // An explicit seed makes the department shuffle reproducible.
    let mut rng = match params.get("seed").and_then(|v| v.as_u64()) {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let allocation = alloc::allocate(&roster, &papers, &rooms, &overrides, &mut rng).map_err(
        |e| HandlerErr {
            code: e.code(),
            details: alloc_error_details(&e),
            message: e.to_string(),
        },
    )?;

    // Full overwrite: clear prior allocations for this exam, then bulk
    // insert, all in one transaction.
    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    tx.execute("DELETE FROM seat_allocations WHERE exam_id = ?", [&exam_id])
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: None,
        })?;
    {
        let mut insert = tx
            .prepare(
                "INSERT INTO seat_allocations(
                   id, exam_id, room_id, registration_number, department, seat_code,
                   row_letter, col_number, exam_date, exam_session, paper_name,
                   start_time, end_time, created_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .map_err(HandlerErr::db)?;
        let created_at = db::now_rfc3339();
        for room in &allocation.rooms {
            for seat in &room.seats {
                insert
                    .execute((
                        Uuid::new_v4().to_string(),
                        &exam_id,
                        &room.room_id,
                        &seat.registration_number,
                        &seat.department,
                        &seat.seat,
                        &seat.row,
                        seat.column as i64,
                        &seat.exam_date,
                        &seat.session,
                        &seat.paper_name,
                        &seat.start_time,
                        &seat.end_time,
                        &created_at,
                    ))
                    .map_err(|e| HandlerErr {
                        code: "db_insert_failed",
                        message: e.to_string(),
                        details: Some(json!({ "table": "seat_allocations" })),
                    })?;
            }
        }
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    info!(
        "seating for exam {}: {} seat(s) in {} room(s), {} unscheduled",
        exam_id,
        allocation.total_seats,
        allocation.rooms.len(),
        allocation.unscheduled.len()
    );

    let rooms_json = serde_json::to_value(&allocation.rooms).map_err(HandlerErr::db)?;
    let unscheduled_json = serde_json::to_value(&allocation.unscheduled).map_err(HandlerErr::db)?;
    Ok(json!({
        "rooms": rooms_json,
        "totalStudents": allocation.total_students,
        "totalSeatsAllocated": allocation.total_seats,
        "totalRooms": allocation.rooms.len(),
        "unscheduled": unscheduled_json,
    }))
}

/// Stored allocations for display, grouped per room in pool order.
fn seating_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;
    if !super::exams::exam_exists(conn, &exam_id).map_err(HandlerErr::db)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "exam not found".to_string(),
            details: None,
        });
    }

    let rooms = load_rooms(conn, &exam_id)?;
    let mut stmt = conn
        .prepare(
            "SELECT room_id, registration_number, department, seat_code, row_letter,
                    col_number, exam_date, exam_session, paper_name, start_time, end_time
             FROM seat_allocations
             WHERE exam_id = ?
             ORDER BY room_id, row_letter, col_number",
        )
        .map_err(HandlerErr::db)?;
    let mut by_room: HashMap<String, Vec<serde_json::Value>> = HashMap::new();
    let rows = stmt
        .query_map([&exam_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                json!({
                    "registrationNumber": r.get::<_, String>(1)?,
                    "department": r.get::<_, String>(2)?,
                    "seat": r.get::<_, String>(3)?,
                    "row": r.get::<_, String>(4)?,
                    "column": r.get::<_, i64>(5)?,
                    "examDate": r.get::<_, Option<String>>(6)?,
                    "session": r.get::<_, String>(7)?,
                    "paperName": r.get::<_, Option<String>>(8)?,
                    "startTime": r.get::<_, Option<String>>(9)?,
                    "endTime": r.get::<_, Option<String>>(10)?,
                }),
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    for (room_id, seat) in rows {
        by_room.entry(room_id).or_default().push(seat);
    }

    let rooms_json: Vec<serde_json::Value> = rooms
        .iter()
        .map(|room| {
            let seats = by_room.remove(&room.id).unwrap_or_default();
            json!({
                "id": room.id,
                "building": room.building,
                "roomNumber": room.room_number,
                "capacity": room.capacity,
                "seats": seats,
            })
        })
        .collect();

    Ok(json!({ "rooms": rooms_json }))
}

/// Seat lookup for one student, optionally narrowed to a single exam date.
fn seating_student_lookup(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;
    let registration = get_required_str(params, "registrationNumber")?;
    let registration = registration.trim().to_string();
    if registration.is_empty() {
        return Err(HandlerErr::bad("registrationNumber must not be empty"));
    }
    let exam_date = params
        .get("examDate")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let mut sql = String::from(
        "SELECT sa.seat_code, sa.row_letter, sa.col_number, sa.department,
                sa.exam_date, sa.exam_session, sa.paper_name, sa.start_time, sa.end_time,
                r.building, r.room_number, r.capacity
         FROM seat_allocations sa
         JOIN rooms r ON r.id = sa.room_id
         WHERE sa.exam_id = ? AND sa.registration_number = ?",
    );
    let mut binds: Vec<String> = vec![exam_id.clone(), registration.clone()];
    if let Some(d) = &exam_date {
        sql.push_str(" AND sa.exam_date = ?");
        binds.push(d.clone());
    }
    sql.push_str(" ORDER BY sa.exam_date, sa.exam_session");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
    let seats = stmt
        .query_map(rusqlite::params_from_iter(binds.iter()), |r| {
            Ok(json!({
                "seat": r.get::<_, String>(0)?,
                "row": r.get::<_, String>(1)?,
                "column": r.get::<_, i64>(2)?,
                "department": r.get::<_, String>(3)?,
                "examDate": r.get::<_, Option<String>>(4)?,
                "session": r.get::<_, String>(5)?,
                "paperName": r.get::<_, Option<String>>(6)?,
                "startTime": r.get::<_, Option<String>>(7)?,
                "endTime": r.get::<_, Option<String>>(8)?,
                "building": r.get::<_, String>(9)?,
                "roomNumber": r.get::<_, String>(10)?,
                "roomCapacity": r.get::<_, i64>(11)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    if seats.is_empty() {
        return Err(HandlerErr {
            code: "not_found",
            message: "no seating assignment found".to_string(),
            details: None,
        });
    }

    Ok(json!({ "registrationNumber": registration, "seats": seats }))
}

/// One room's stored seating plus its occupancy grid, for manual editing.
fn seating_room_details(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;
    let room_id = get_required_str(params, "roomId")?;
    let room = load_room(conn, &exam_id, &room_id)?;
    let (total_rows, last_row_cols) = alloc::grid_dims(room.capacity);

    let mut stmt = conn
        .prepare(
            "SELECT registration_number, department, seat_code, row_letter, col_number,
                    exam_date, exam_session, paper_name, start_time, end_time
             FROM seat_allocations
             WHERE exam_id = ? AND room_id = ?
             ORDER BY row_letter, col_number",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([&exam_id, &room_id], |r| {
            Ok((
                r.get::<_, String>(2)?,
                json!({
                    "registrationNumber": r.get::<_, String>(0)?,
                    "department": r.get::<_, String>(1)?,
                    "seat": r.get::<_, String>(2)?,
                    "row": r.get::<_, String>(3)?,
                    "column": r.get::<_, i64>(4)?,
                    "examDate": r.get::<_, Option<String>>(5)?,
                    "session": r.get::<_, String>(6)?,
                    "paperName": r.get::<_, Option<String>>(7)?,
                    "startTime": r.get::<_, Option<String>>(8)?,
                    "endTime": r.get::<_, Option<String>>(9)?,
                }),
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    let occupied: Vec<&String> = rows.iter().map(|(code, _)| code).collect();
    let occupied = serde_json::to_value(&occupied).map_err(HandlerErr::db)?;
    let seats: Vec<serde_json::Value> = rows.iter().map(|(_, seat)| seat.clone()).collect();

    Ok(json!({
        "room": {
            "id": room.id,
            "building": room.building,
            "roomNumber": room.room_number,
            "capacity": room.capacity,
        },
        "totalRows": total_rows,
        "lastRowColumns": last_row_cols,
        "seats": seats,
        "occupiedSeats": occupied,
    }))
}

/// Replace one room's seats with a manually edited layout. Every entry must
/// name a roster member and a seat the room's grid actually has; the write
/// is all or nothing.
fn seating_update_room(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;
    let room_id = get_required_str(params, "roomId")?;
    let room = load_room(conn, &exam_id, &room_id)?;
    let Some(entries) = params.get("seats").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad("missing seats"));
    };

    let roster = load_roster(conn, &exam_id)?;
    let dept_by_reg: HashMap<&str, &str> = roster
        .iter()
        .map(|e| (e.registration_number.as_str(), e.department.as_str()))
        .collect();

    struct Placement {
        registration: String,
        department: String,
        row: String,
        column: u8,
        exam_date: Option<String>,
        session: String,
        paper_name: Option<String>,
        start_time: Option<String>,
        end_time: Option<String>,
    }

    let mut placements: Vec<Placement> = Vec::new();
    let mut taken = std::collections::HashSet::new();
    let mut seated = std::collections::HashSet::new();
    for entry in entries {
        let registration = opt_str(entry, "registrationNumber")
            .ok_or_else(|| HandlerErr::bad("seat entry missing registrationNumber"))?;
        let Some(department) = dept_by_reg.get(registration.as_str()) else {
            return Err(HandlerErr {
                code: "not_found",
                message: format!("student not on this exam's roster: {}", registration),
                details: None,
            });
        };
        let row_label = opt_str(entry, "row")
            .ok_or_else(|| HandlerErr::bad("seat entry missing row"))?;
        let column = entry
            .get("column")
            .and_then(|v| v.as_u64())
            .filter(|c| (1..=alloc::COLS_PER_ROOM as u64).contains(c))
            .ok_or_else(|| HandlerErr::bad("seat entry column must be 1-5"))?
            as u8;
        let Some(row_idx) = alloc::row_index(&row_label) else {
            return Err(HandlerErr::bad(format!("invalid row label: {}", row_label)));
        };
        if !alloc::seat_in_grid(room.capacity, row_idx, column) {
            return Err(HandlerErr::bad(format!(
                "seat {}{} does not exist in a room of capacity {}",
                row_label, column, room.capacity
            )));
        }
        if !taken.insert((row_label.clone(), column)) {
            return Err(HandlerErr::bad(format!(
                "seat {}{} assigned twice",
                row_label, column
            )));
        }
        if !seated.insert(registration.clone()) {
            return Err(HandlerErr::bad(format!(
                "student listed twice: {}",
                registration
            )));
        }
        placements.push(Placement {
            registration,
            department: department.to_string(),
            row: row_label,
            column,
            exam_date: opt_str(entry, "examDate"),
            session: opt_str(entry, "session").unwrap_or_else(|| "First Half".to_string()),
            paper_name: opt_str(entry, "paperName"),
            start_time: opt_str(entry, "startTime"),
            end_time: opt_str(entry, "endTime"),
        });
    }

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    tx.execute(
        "DELETE FROM seat_allocations WHERE exam_id = ? AND room_id = ?",
        [&exam_id, &room_id],
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: None,
    })?;
    {
        let mut insert = tx
            .prepare(
                "INSERT INTO seat_allocations(
                   id, exam_id, room_id, registration_number, department, seat_code,
                   row_letter, col_number, exam_date, exam_session, paper_name,
                   start_time, end_time, created_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .map_err(HandlerErr::db)?;
        let created_at = db::now_rfc3339();
        for p in &placements {
            insert
                .execute((
                    Uuid::new_v4().to_string(),
                    &exam_id,
                    &room_id,
                    &p.registration,
                    &p.department,
                    format!("{}{}", p.row, p.column),
                    &p.row,
                    p.column as i64,
                    &p.exam_date,
                    &p.session,
                    &p.paper_name,
                    &p.start_time,
                    &p.end_time,
                    &created_at,
                ))
                .map_err(|e| HandlerErr {
                    code: "db_insert_failed",
                    message: e.to_string(),
                    details: Some(json!({ "table": "seat_allocations" })),
                })?;
        }
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    info!(
        "manual seating for room {} of exam {}: {} seat(s)",
        room_id,
        exam_id,
        placements.len()
    );

    Ok(json!({ "roomId": room_id, "updatedCount": placements.len() }))
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
        "seating.generate" => Some(with_db(state, req, seating_generate)),
        "seating.get" => Some(with_db(state, req, seating_get)),
        "seating.studentLookup" => Some(with_db(state, req, seating_student_lookup)),
        "seating.roomDetails" => Some(with_db(state, req, seating_room_details)),
        "seating.updateRoom" => Some(with_db(state, req, seating_update_room)),
        _ => None,
    }
}
