use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("examseat.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exams(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            start_date TEXT,
            end_date TEXT,
            is_completed INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_files(
            id TEXT PRIMARY KEY,
            file_name TEXT NOT NULL,
            year TEXT,
            semester TEXT,
            department TEXT,
            uploaded_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            file_id TEXT NOT NULL,
            name TEXT NOT NULL,
            roll_number TEXT,
            registration_number TEXT NOT NULL,
            department TEXT NOT NULL,
            year TEXT NOT NULL DEFAULT '',
            semester TEXT NOT NULL DEFAULT '',
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(file_id) REFERENCES student_files(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_file ON students(file_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_registration ON students(registration_number)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exam_students(
            exam_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            added_at TEXT NOT NULL,
            PRIMARY KEY(exam_id, student_id),
            FOREIGN KEY(exam_id) REFERENCES exams(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exam_students_exam ON exam_students(exam_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exam_students_student ON exam_students(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS department_papers(
            id TEXT PRIMARY KEY,
            exam_id TEXT NOT NULL,
            department TEXT NOT NULL,
            paper_name TEXT NOT NULL,
            paper_code TEXT,
            exam_date TEXT NOT NULL,
            session TEXT NOT NULL,
            start_time TEXT,
            end_time TEXT,
            FOREIGN KEY(exam_id) REFERENCES exams(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_department_papers_exam ON department_papers(exam_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS rooms(
            id TEXT PRIMARY KEY,
            exam_id TEXT NOT NULL,
            building TEXT NOT NULL,
            room_number TEXT NOT NULL,
            capacity INTEGER NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(exam_id) REFERENCES exams(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_rooms_exam ON rooms(exam_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_rooms_exam_sort ON rooms(exam_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS seat_allocations(
            id TEXT PRIMARY KEY,
            exam_id TEXT NOT NULL,
            room_id TEXT NOT NULL,
            registration_number TEXT NOT NULL,
            department TEXT NOT NULL,
            seat_code TEXT NOT NULL,
            row_letter TEXT NOT NULL,
            col_number INTEGER NOT NULL,
            exam_date TEXT,
            exam_session TEXT NOT NULL DEFAULT 'First Half',
            paper_name TEXT,
            start_time TEXT,
            end_time TEXT,
            created_at TEXT NOT NULL,
            UNIQUE(exam_id, room_id, registration_number),
            FOREIGN KEY(exam_id) REFERENCES exams(id),
            FOREIGN KEY(room_id) REFERENCES rooms(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_seat_allocations_exam ON seat_allocations(exam_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_seat_allocations_room ON seat_allocations(room_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_seat_allocations_registration
         ON seat_allocations(registration_number)",
        [],
    )?;

    Ok(conn)
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
