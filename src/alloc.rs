use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;

use log::debug;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

/// Seat columns are fixed per room; rows derive from capacity.
pub const COLS_PER_ROOM: u8 = 5;

const ODD_COLS: [u8; 3] = [1, 3, 5];

/// Row-count approximation used only to estimate how many rooms a group
/// needs. Actual row counts come from room capacity. The estimate can only
/// over-request rooms, never under-request.
const ESTIMATE_ROWS_PER_ROOM: usize = 8;

#[derive(Debug, Clone)]
pub struct RosterEntry {
    pub id: String,
    pub registration_number: String,
    pub department: String,
    pub year: String,
    pub semester: String,
}

#[derive(Debug, Clone)]
pub struct PaperRecord {
    pub department: String,
    pub paper_name: String,
    pub exam_date: String,
    pub session: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRecord {
    pub id: String,
    pub building: String,
    pub room_number: String,
    pub capacity: u32,
}

/// Caller-supplied column layouts. Column numbers are 1..=5. A per-room
/// mapping wins over the global one for that room.
#[derive(Debug, Clone, Default)]
pub struct ColumnOverrides {
    pub global: HashMap<u8, String>,
    pub per_room: HashMap<String, HashMap<u8, String>>,
}

impl ColumnOverrides {
    fn room_mentions_dept(&self, room_id: &str, dept: &str) -> bool {
        self.per_room
            .get(room_id)
            .map(|m| m.values().any(|d| d == dept))
            .unwrap_or(false)
    }
}

/// One (student, matching paper) pair produced by the grouping stage.
#[derive(Debug, Clone)]
struct Candidate {
    roster_id: String,
    registration_number: String,
    department: String,
    exam_date: String,
    session: String,
    paper_name: String,
    start_time: Option<String>,
    end_time: Option<String>,
}

/// Group key: students sharing year, semester, exam date and session are
/// seated together. BTreeMap ordering doubles as the processing order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct GroupKey {
    year: String,
    semester: String,
    exam_date: String,
    session: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Seat {
    pub registration_number: String,
    pub department: String,
    pub seat: String,
    pub row: String,
    pub column: u8,
    pub exam_date: String,
    pub session: String,
    pub paper_name: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSeating {
    pub room_id: String,
    pub building: String,
    pub room_number: String,
    pub capacity: u32,
    pub departments: Vec<String>,
    pub seats: Vec<Seat>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Unscheduled {
    pub registration_number: String,
    pub department: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    pub rooms: Vec<RoomSeating>,
    pub total_students: usize,
    pub total_seats: usize,
    pub unscheduled: Vec<Unscheduled>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AllocError {
    NoStudents,
    NoRooms,
    NoSchedule {
        roster_departments: Vec<String>,
    },
    DepartmentMismatch {
        roster_departments: Vec<String>,
        configured_departments: Vec<String>,
    },
    RoomShortfall {
        available: usize,
        required: usize,
        group_students: usize,
    },
    OddColumnOverflow {
        department: String,
    },
    ColumnOverflow {
        department: String,
    },
    RedistributionOverflow {
        department: String,
    },
    SeatExhaustion {
        department: String,
        remaining: usize,
    },
}

impl AllocError {
    pub fn code(&self) -> &'static str {
        match self {
            AllocError::NoStudents => "no_students",
            AllocError::NoRooms => "no_rooms",
            AllocError::NoSchedule { .. } => "no_schedule",
            AllocError::DepartmentMismatch { .. } => "department_mismatch",
            AllocError::RoomShortfall { .. } => "room_shortfall",
            AllocError::OddColumnOverflow { .. } | AllocError::ColumnOverflow { .. } => {
                "column_overflow"
            }
            AllocError::RedistributionOverflow { .. } => "column_redistribution",
            AllocError::SeatExhaustion { .. } => "seat_exhaustion",
        }
    }
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::NoStudents => write!(f, "no students registered for this exam"),
            AllocError::NoRooms => write!(f, "no rooms configured for this exam"),
            AllocError::NoSchedule { roster_departments } => write!(
                f,
                "no department papers configured; roster departments are: {}",
                roster_departments.join(", ")
            ),
            AllocError::DepartmentMismatch {
                roster_departments,
                configured_departments,
            } => write!(
                f,
                "department mismatch: roster has [{}] but papers are configured for [{}]; \
                 names must match exactly (case-sensitive)",
                roster_departments.join(", "),
                configured_departments.join(", ")
            ),
            AllocError::RoomShortfall {
                available,
                required,
                group_students,
            } => write!(
                f,
                "not enough rooms: have {} but need {} to seat {} students in one group; \
                 add {} more room(s) and retry",
                available,
                required,
                group_students,
                required - available
            ),
            AllocError::OddColumnOverflow { department } => write!(
                f,
                "not enough rooms for the odd-column layout of department {}; add more rooms",
                department
            ),
            AllocError::ColumnOverflow { department } => write!(
                f,
                "not enough rooms to lay out columns for department {}; add more rooms",
                department
            ),
            AllocError::RedistributionOverflow { department } => write!(
                f,
                "not enough rooms to redistribute single-department columns for {}; add more rooms",
                department
            ),
            AllocError::SeatExhaustion {
                department,
                remaining,
            } => write!(
                f,
                "not enough seats for department {}: {} student(s) remain unplaced; \
                 add rooms or increase capacities",
                department, remaining
            ),
        }
    }
}

impl std::error::Error for AllocError {}

/// Per-room occupancy grid. The last row exposes only
/// `capacity - 5 * (rows - 1)` seats when capacity is not a multiple of 5.
struct RoomGrid {
    rows: usize,
    last_row_cols: u8,
    occupied: Vec<bool>,
}

impl RoomGrid {
    fn new(capacity: u32) -> Self {
        let rows = (capacity as usize).div_ceil(COLS_PER_ROOM as usize).max(1);
        let last_row_cols =
            (capacity as i64 - (COLS_PER_ROOM as i64) * (rows as i64 - 1)).clamp(0, 5) as u8;
        RoomGrid {
            rows,
            last_row_cols,
            occupied: vec![false; rows * COLS_PER_ROOM as usize],
        }
    }

    fn seat_exists(&self, row: usize, col: u8) -> bool {
        if row >= self.rows || col < 1 || col > COLS_PER_ROOM {
            return false;
        }
        row + 1 < self.rows || col <= self.last_row_cols
    }

    fn is_free(&self, row: usize, col: u8) -> bool {
        !self.occupied[row * COLS_PER_ROOM as usize + (col - 1) as usize]
    }

    fn occupy(&mut self, row: usize, col: u8) {
        self.occupied[row * COLS_PER_ROOM as usize + (col - 1) as usize] = true;
    }
}

/// Spreadsheet-style row labels: A..Z, then AA, AB, and so on, for rooms
/// deep enough to run past 26 rows.
fn row_letter(row: usize) -> String {
    let mut n = row;
    let mut label = String::new();
    loop {
        label.insert(0, (b'A' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    label
}

/// Inverse of `row_letter`. None for anything but uppercase ASCII letters.
pub(crate) fn row_index(label: &str) -> Option<usize> {
    if label.is_empty() {
        return None;
    }
    let mut n = 0usize;
    for c in label.chars() {
        if !c.is_ascii_uppercase() {
            return None;
        }
        n = n
            .checked_mul(26)?
            .checked_add(c as usize - 'A' as usize + 1)?;
    }
    Some(n - 1)
}

/// (total rows, seats exposed in the last row) for a room capacity.
pub(crate) fn grid_dims(capacity: u32) -> (usize, u8) {
    let g = RoomGrid::new(capacity);
    (g.rows, g.last_row_cols)
}

pub(crate) fn seat_in_grid(capacity: u32, row: usize, col: u8) -> bool {
    RoomGrid::new(capacity).seat_exists(row, col)
}

/// Sort key for seating order within a department: numeric suffix of the
/// registration number (last 3 characters) when it is all digits, else last.
fn registration_sort_key(reg: &str) -> u32 {
    let chars: Vec<char> = reg.chars().collect();
    if chars.len() < 3 {
        return 999;
    }
    let tail: String = chars[chars.len() - 3..].iter().collect();
    if tail.chars().all(|c| c.is_ascii_digit()) {
        tail.parse().unwrap_or(999)
    } else {
        999
    }
}

fn rows_for_capacity(capacity: u32) -> usize {
    (capacity as usize).div_ceil(COLS_PER_ROOM as usize).max(1)
}

/// Run the full allocation pipeline: grouping, room assignment, column
/// mapping, seat placement. Pure; persistence is the caller's job.
pub fn allocate<R: Rng>(
    roster: &[RosterEntry],
    papers: &[PaperRecord],
    rooms: &[RoomRecord],
    overrides: &ColumnOverrides,
    rng: &mut R,
) -> Result<Allocation, AllocError> {
    if roster.is_empty() {
        return Err(AllocError::NoStudents);
    }
    if rooms.is_empty() {
        return Err(AllocError::NoRooms);
    }

    let roster_departments: Vec<String> = roster
        .iter()
        .map(|e| e.department.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    if papers.is_empty() {
        return Err(AllocError::NoSchedule { roster_departments });
    }

    let mut schedule: BTreeMap<&str, Vec<&PaperRecord>> = BTreeMap::new();
    for paper in papers {
        schedule.entry(&paper.department).or_default().push(paper);
    }

    // Grouping stage: one candidate per (student, matching paper); a student
    // with papers on several dates lands in several groups.
    let mut groups: BTreeMap<GroupKey, Vec<Candidate>> = BTreeMap::new();
    let mut unscheduled: Vec<Unscheduled> = Vec::new();

    for entry in roster {
        let Some(dept_papers) = schedule.get(entry.department.as_str()) else {
            debug!(
                "skipping {}: department '{}' has no scheduled papers",
                entry.registration_number, entry.department
            );
            unscheduled.push(Unscheduled {
                registration_number: entry.registration_number.clone(),
                department: entry.department.clone(),
            });
            continue;
        };
        for paper in dept_papers {
            let key = GroupKey {
                year: entry.year.clone(),
                semester: entry.semester.clone(),
                exam_date: paper.exam_date.clone(),
                session: paper.session.clone(),
            };
            let members = groups.entry(key).or_default();
            if members.iter().any(|c| c.roster_id == entry.id) {
                continue;
            }
            members.push(Candidate {
                roster_id: entry.id.clone(),
                registration_number: entry.registration_number.clone(),
                department: entry.department.clone(),
                exam_date: paper.exam_date.clone(),
                session: paper.session.clone(),
                paper_name: paper.paper_name.clone(),
                start_time: paper.start_time.clone(),
                end_time: paper.end_time.clone(),
            });
        }
    }

    if unscheduled.len() == roster.len() {
        let configured_departments: Vec<String> =
            schedule.keys().map(|d| d.to_string()).collect();
        return Err(AllocError::DepartmentMismatch {
            roster_departments,
            configured_departments,
        });
    }

    debug!(
        "grouping: {} group(s), {} unscheduled of {} roster entries",
        groups.len(),
        unscheduled.len(),
        roster.len()
    );

    // Room assignment stage: reserve a contiguous slice of the pool per
    // group, in sorted group-key order, via a shared cursor.
    let mut cursor = 0usize;
    let mut assignments: Vec<(&GroupKey, &Vec<Candidate>, std::ops::Range<usize>)> = Vec::new();
    for (key, members) in &groups {
        let mut dept_counts: BTreeMap<&str, usize> = BTreeMap::new();
        for c in members {
            *dept_counts.entry(c.department.as_str()).or_default() += 1;
        }
        let total_cols: usize = dept_counts
            .values()
            .map(|n| n.div_ceil(ESTIMATE_ROWS_PER_ROOM))
            .sum();
        // A single-department group only uses odd columns, so 3 usable
        // columns per room instead of 5.
        let usable = if dept_counts.len() == 1 { 3 } else { 5 };
        let rooms_needed = total_cols.div_ceil(usable).max(1);

        if cursor + rooms_needed > rooms.len() {
            return Err(AllocError::RoomShortfall {
                available: rooms.len(),
                required: cursor + rooms_needed,
                group_students: members.len(),
            });
        }
        debug!(
            "group ({}, {}, {}, {}): {} students, {} column(s), {} room(s) at cursor {}",
            key.year,
            key.semester,
            key.exam_date,
            key.session,
            members.len(),
            total_cols,
            rooms_needed,
            cursor
        );
        assignments.push((key, members, cursor..cursor + rooms_needed));
        cursor += rooms_needed;
    }

    let global_map_provided = !overrides.global.is_empty();
    let mut seats_by_room: BTreeMap<usize, Vec<Seat>> = BTreeMap::new();

    for (_key, members, range) in assignments {
        let assigned = &rooms[range.clone()];

        let mut buckets: BTreeMap<String, Vec<&Candidate>> = BTreeMap::new();
        for c in members {
            buckets.entry(c.department.clone()).or_default().push(c);
        }

        // Shuffled department order decides round-robin column ownership and
        // placement order; a heuristic against same-department adjacency.
        let mut depts: Vec<String> = buckets.keys().cloned().collect();
        depts.shuffle(rng);
        let num_depts = depts.len();

        let min_rows = assigned
            .iter()
            .map(|r| rows_for_capacity(r.capacity))
            .min()
            .unwrap_or(ESTIMATE_ROWS_PER_ROOM);

        // Column mapping stage.
        let mut dept_cols: BTreeMap<String, Vec<(usize, u8)>> = BTreeMap::new();
        for (dept_idx, dept) in depts.iter().enumerate() {
            let cols_needed = buckets[dept].len().div_ceil(min_rows);
            let mut cols: Vec<(usize, u8)> = Vec::new();

            // Per-room overrides first, then the global map.
            if !overrides.per_room.is_empty() {
                for (room_idx, room) in assigned.iter().enumerate() {
                    if let Some(mapping) = overrides.per_room.get(&room.id) {
                        for col in 1..=COLS_PER_ROOM {
                            if mapping.get(&col).map(|d| d == dept).unwrap_or(false) {
                                cols.push((room_idx, col));
                            }
                        }
                    }
                }
            }
            if cols.is_empty() && global_map_provided {
                for room_idx in 0..assigned.len() {
                    for col in 1..=COLS_PER_ROOM {
                        if overrides.global.get(&col).map(|d| d == dept).unwrap_or(false) {
                            cols.push((room_idx, col));
                        }
                    }
                }
            }

            // An explicit per-room layout for a single-department group is
            // honored as-is, even when it provides fewer columns than the
            // estimate asks for.
            let user_configured = assigned
                .iter()
                .any(|room| overrides.room_mentions_dept(&room.id, dept));

            if cols.len() < cols_needed && !(num_depts == 1 && user_configured) {
                if num_depts == 1 {
                    // Odd columns only, leaving even columns empty as a gap.
                    let mut room_iter = 0usize;
                    while cols.len() < cols_needed {
                        for oc in ODD_COLS {
                            if cols.len() >= cols_needed {
                                break;
                            }
                            if room_iter >= assigned.len() {
                                return Err(AllocError::OddColumnOverflow {
                                    department: dept.clone(),
                                });
                            }
                            let pair = (room_iter, oc);
                            if cols.contains(&pair) {
                                continue;
                            }
                            cols.push(pair);
                        }
                        room_iter += 1;
                    }
                } else {
                    // Round-robin: department d claims columns d+1,
                    // d+1+num_depts, ... across the whole room slice.
                    for col_count in 0..cols_needed {
                        let col_num = dept_idx + 1 + col_count * num_depts;
                        let room_idx = (col_num - 1) / COLS_PER_ROOM as usize;
                        let col_in_room = ((col_num - 1) % COLS_PER_ROOM as usize) as u8 + 1;
                        if room_idx >= assigned.len() {
                            return Err(AllocError::ColumnOverflow {
                                department: dept.clone(),
                            });
                        }
                        let pair = (room_idx, col_in_room);
                        if cols.contains(&pair) {
                            continue;
                        }
                        cols.push(pair);
                    }
                }
            }

            dept_cols.insert(dept.clone(), cols);
        }

        // Post-pass: a room whose occupied columns all belong to one
        // department gets remapped onto odd columns, unless the caller
        // configured that room (or supplied a global map).
        let mut room_depts: BTreeMap<usize, BTreeSet<String>> = BTreeMap::new();
        for (dept, pairs) in &dept_cols {
            for (room_idx, _) in pairs {
                room_depts.entry(*room_idx).or_default().insert(dept.clone());
            }
        }
        for (room_idx, dept_set) in &room_depts {
            if dept_set.len() != 1
                || global_map_provided
                || overrides.per_room.contains_key(&assigned[*room_idx].id)
            {
                continue;
            }
            let dept = dept_set.iter().next().cloned().unwrap_or_default();
            let pairs = dept_cols.entry(dept.clone()).or_default();
            let n = pairs.iter().filter(|p| p.0 == *room_idx).count();
            pairs.retain(|p| p.0 != *room_idx);
            if n <= ODD_COLS.len() {
                for oc in ODD_COLS.iter().take(n) {
                    pairs.push((*room_idx, *oc));
                }
            } else {
                // Keep 3 odd columns here; spill the rest into following
                // rooms' odd columns. Round-robin hands a department at most
                // three columns in any one room, so this branch stays a
                // conservative guard for layouts produced some other way.
                for oc in ODD_COLS {
                    pairs.push((*room_idx, oc));
                }
                let mut overflow = n - ODD_COLS.len();
                let mut next_room = room_idx + 1;
                while overflow > 0 && next_room < assigned.len() {
                    let take = overflow.min(ODD_COLS.len());
                    for oc in ODD_COLS.iter().take(take) {
                        pairs.push((next_room, *oc));
                    }
                    overflow -= take;
                    next_room += 1;
                }
                if overflow > 0 {
                    return Err(AllocError::RedistributionOverflow { department: dept });
                }
            }
        }

        // Seat placement stage: primary per-column fill, then a fallback
        // scan over every still-open seat in the group's rooms.
        let mut grids: Vec<RoomGrid> = assigned.iter().map(|r| RoomGrid::new(r.capacity)).collect();

        for dept in &depts {
            let mut queue: Vec<&Candidate> = buckets[dept].clone();
            queue.sort_by_key(|c| registration_sort_key(&c.registration_number));
            let mut queue: VecDeque<&Candidate> = queue.into();

            for (room_idx, col) in dept_cols.get(dept).map(|v| v.as_slice()).unwrap_or(&[]) {
                let grid = &mut grids[*room_idx];
                for row in 0..grid.rows {
                    if queue.is_empty() {
                        break;
                    }
                    if !grid.seat_exists(row, *col) || !grid.is_free(row, *col) {
                        continue;
                    }
                    let Some(c) = queue.pop_front() else {
                        break;
                    };
                    grid.occupy(row, *col);
                    seats_by_room
                        .entry(range.start + room_idx)
                        .or_default()
                        .push(make_seat(c, row, *col));
                }
            }

            if !queue.is_empty() {
                debug!(
                    "fallback pass for {}: {} student(s) left after primary placement",
                    dept,
                    queue.len()
                );
                'scan: for room_idx in 0..assigned.len() {
                    let grid = &mut grids[room_idx];
                    for row in 0..grid.rows {
                        for col in 1..=COLS_PER_ROOM {
                            if !grid.seat_exists(row, col) || !grid.is_free(row, col) {
                                continue;
                            }
                            let Some(c) = queue.pop_front() else {
                                break 'scan;
                            };
                            grid.occupy(row, col);
                            seats_by_room
                                .entry(range.start + room_idx)
                                .or_default()
                                .push(make_seat(c, row, col));
                        }
                    }
                }
            }

            if !queue.is_empty() {
                return Err(AllocError::SeatExhaustion {
                    department: dept.clone(),
                    remaining: queue.len(),
                });
            }
        }
    }

    let mut out_rooms: Vec<RoomSeating> = Vec::new();
    let mut total_seats = 0usize;
    for (room_idx, seats) in seats_by_room {
        let room = &rooms[room_idx];
        let departments: Vec<String> = seats
            .iter()
            .map(|s| s.department.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        total_seats += seats.len();
        out_rooms.push(RoomSeating {
            room_id: room.id.clone(),
            building: room.building.clone(),
            room_number: room.room_number.clone(),
            capacity: room.capacity,
            departments,
            seats,
        });
    }

    debug!(
        "allocation done: {} seat(s) across {} room(s)",
        total_seats,
        out_rooms.len()
    );

    Ok(Allocation {
        rooms: out_rooms,
        total_students: roster.len(),
        total_seats,
        unscheduled,
    })
}

fn make_seat(c: &Candidate, row: usize, col: u8) -> Seat {
    let letter = row_letter(row);
    Seat {
        registration_number: c.registration_number.clone(),
        department: c.department.clone(),
        seat: format!("{}{}", letter, col),
        row: letter,
        column: col,
        exam_date: c.exam_date.clone(),
        session: c.session.clone(),
        paper_name: c.paper_name.clone(),
        start_time: c.start_time.clone(),
        end_time: c.end_time.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    fn roster(dept: &str, count: usize) -> Vec<RosterEntry> {
        (0..count)
            .map(|i| RosterEntry {
                id: format!("{}-{}", dept, i),
                registration_number: format!("REG{}{:03}", &dept[..1], i + 1),
                department: dept.to_string(),
                year: "2025".to_string(),
                semester: "5".to_string(),
            })
            .collect()
    }

    fn paper(dept: &str, date: &str, session: &str) -> PaperRecord {
        PaperRecord {
            department: dept.to_string(),
            paper_name: format!("{} Paper", dept),
            exam_date: date.to_string(),
            session: session.to_string(),
            start_time: Some("09:00".to_string()),
            end_time: Some("12:00".to_string()),
        }
    }

    fn room(id: &str, capacity: u32) -> RoomRecord {
        RoomRecord {
            id: id.to_string(),
            building: "Main Block".to_string(),
            room_number: id.to_string(),
            capacity,
        }
    }

    fn assert_unique_and_bounded(alloc: &Allocation, rooms: &[RoomRecord]) {
        let caps: std::collections::HashMap<&str, u32> =
            rooms.iter().map(|r| (r.id.as_str(), r.capacity)).collect();
        let mut seen_seats = HashSet::new();
        let mut seen_students = HashSet::new();
        for rs in &alloc.rooms {
            assert!(rs.seats.len() as u32 <= caps[rs.room_id.as_str()]);
            for seat in &rs.seats {
                assert!(
                    seen_seats.insert((rs.room_id.clone(), seat.row.clone(), seat.column)),
                    "double-booked seat {} in room {}",
                    seat.seat,
                    rs.room_id
                );
                assert!(
                    seen_students.insert((
                        seat.registration_number.clone(),
                        seat.exam_date.clone()
                    )),
                    "student {} seated twice on {}",
                    seat.registration_number,
                    seat.exam_date
                );
            }
        }
    }

    #[test]
    fn single_department_uses_odd_columns_only() {
        let roster = roster("Science", 24);
        let papers = vec![paper("Science", "2026-03-10", "First Half")];
        let rooms = vec![room("R1", 40)];
        let alloc = allocate(
            &roster,
            &papers,
            &rooms,
            &ColumnOverrides::default(),
            &mut rng(),
        )
        .expect("allocate");

        assert_eq!(alloc.total_seats, 24);
        assert_eq!(alloc.rooms.len(), 1);
        let seats = &alloc.rooms[0].seats;
        assert_eq!(seats.len(), 24);

        let mut per_col: std::collections::HashMap<u8, usize> = Default::default();
        for s in seats {
            assert!(
                [1, 3, 5].contains(&s.column),
                "even column {} used",
                s.column
            );
            *per_col.entry(s.column).or_default() += 1;
        }
        // 8 rows per column: columns 1, 3 and 5 hold 8 students each.
        assert_eq!(per_col[&1], 8);
        assert_eq!(per_col[&3], 8);
        assert_eq!(per_col[&5], 8);
        let rows_in_col1: Vec<&str> = seats
            .iter()
            .filter(|s| s.column == 1)
            .map(|s| s.row.as_str())
            .collect();
        assert_eq!(rows_in_col1, ["A", "B", "C", "D", "E", "F", "G", "H"]);
        assert_unique_and_bounded(&alloc, &rooms);
    }

    #[test]
    fn registration_suffix_orders_students_down_the_column() {
        let mut entries = roster("Science", 5);
        // Reverse so the input order disagrees with the suffix order.
        entries.reverse();
        let papers = vec![paper("Science", "2026-03-10", "First Half")];
        let rooms = vec![room("R1", 40)];
        let alloc = allocate(
            &entries,
            &papers,
            &rooms,
            &ColumnOverrides::default(),
            &mut rng(),
        )
        .expect("allocate");
        let col1: Vec<&str> = alloc.rooms[0]
            .seats
            .iter()
            .filter(|s| s.column == 1)
            .map(|s| s.registration_number.as_str())
            .collect();
        assert_eq!(col1, ["REGS001", "REGS002", "REGS003", "REGS004", "REGS005"]);
    }

    #[test]
    fn no_rooms_fails_before_anything_else_runs() {
        let roster = roster("Science", 5);
        let papers = vec![paper("Science", "2026-03-10", "First Half")];
        let err = allocate(&roster, &papers, &[], &ColumnOverrides::default(), &mut rng())
            .unwrap_err();
        assert_eq!(err, AllocError::NoRooms);
        assert_eq!(err.code(), "no_rooms");
    }

    #[test]
    fn empty_roster_fails() {
        let papers = vec![paper("Science", "2026-03-10", "First Half")];
        let rooms = vec![room("R1", 40)];
        let err = allocate(&[], &papers, &rooms, &ColumnOverrides::default(), &mut rng())
            .unwrap_err();
        assert_eq!(err, AllocError::NoStudents);
    }

    #[test]
    fn no_papers_reports_roster_departments() {
        let roster = roster("Science", 3);
        let rooms = vec![room("R1", 40)];
        let err = allocate(&roster, &[], &rooms, &ColumnOverrides::default(), &mut rng())
            .unwrap_err();
        match err {
            AllocError::NoSchedule { roster_departments } => {
                assert_eq!(roster_departments, ["Science"]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn department_mismatch_lists_both_sides() {
        let roster = roster("science", 4); // lower case, must not match
        let papers = vec![paper("Science", "2026-03-10", "First Half")];
        let rooms = vec![room("R1", 40)];
        let err = allocate(
            &roster,
            &papers,
            &rooms,
            &ColumnOverrides::default(),
            &mut rng(),
        )
        .unwrap_err();
        match err {
            AllocError::DepartmentMismatch {
                roster_departments,
                configured_departments,
            } => {
                assert_eq!(roster_departments, ["science"]);
                assert_eq!(configured_departments, ["Science"]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn two_departments_of_twenty_need_two_rooms() {
        // ceil(20/8) + ceil(20/8) = 6 columns > 5 usable, so 2 rooms.
        let mut entries = roster("Science", 20);
        entries.extend(roster("Arts", 20));
        let papers = vec![
            paper("Science", "2026-03-10", "First Half"),
            paper("Arts", "2026-03-10", "First Half"),
        ];
        let rooms = vec![room("R1", 25)];
        let err = allocate(
            &entries,
            &papers,
            &rooms,
            &ColumnOverrides::default(),
            &mut rng(),
        )
        .unwrap_err();
        match err {
            AllocError::RoomShortfall {
                available,
                required,
                group_students,
            } => {
                assert_eq!(available, 1);
                assert_eq!(required, 2);
                assert_eq!(group_students, 40);
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let rooms = vec![room("R1", 25), room("R2", 25)];
        let alloc = allocate(
            &entries,
            &papers,
            &rooms,
            &ColumnOverrides::default(),
            &mut rng(),
        )
        .expect("allocate with two rooms");
        assert_eq!(alloc.total_seats, 40);
        assert_unique_and_bounded(&alloc, &rooms);
    }

    #[test]
    fn multi_date_papers_seat_students_once_per_date() {
        let entries = roster("Science", 6);
        let papers = vec![
            paper("Science", "2026-03-10", "First Half"),
            paper("Science", "2026-03-12", "First Half"),
        ];
        // Two groups, one room each.
        let rooms = vec![room("R1", 40), room("R2", 40)];
        let alloc = allocate(
            &entries,
            &papers,
            &rooms,
            &ColumnOverrides::default(),
            &mut rng(),
        )
        .expect("allocate");
        assert_eq!(alloc.total_seats, 12);
        assert_eq!(alloc.rooms.len(), 2);
        assert_unique_and_bounded(&alloc, &rooms);
    }

    #[test]
    fn duplicate_papers_on_same_date_do_not_duplicate_students() {
        let entries = roster("Science", 6);
        // Two papers on the same (date, session): the group dedups by
        // roster identity, so each student is seated once.
        let papers = vec![
            paper("Science", "2026-03-10", "First Half"),
            paper("Science", "2026-03-10", "First Half"),
        ];
        let rooms = vec![room("R1", 40)];
        let alloc = allocate(
            &entries,
            &papers,
            &rooms,
            &ColumnOverrides::default(),
            &mut rng(),
        )
        .expect("allocate");
        assert_eq!(alloc.total_seats, 6);
        assert_unique_and_bounded(&alloc, &rooms);
    }

    #[test]
    fn last_row_clamp_forces_fallback_past_missing_seats() {
        // Capacity 23 => 5 rows, last row exposes columns 1..=3 only. The
        // odd-column layout gives 15 seats minus the missing E5, so the 15th
        // student lands in the fallback pass at the first open seat (A2).
        let entries = roster("Science", 15);
        let papers = vec![paper("Science", "2026-03-10", "First Half")];
        let rooms = vec![room("R1", 23)];
        let alloc = allocate(
            &entries,
            &papers,
            &rooms,
            &ColumnOverrides::default(),
            &mut rng(),
        )
        .expect("allocate");
        assert_eq!(alloc.total_seats, 15);
        for seat in &alloc.rooms[0].seats {
            if seat.row == "E" {
                assert!(seat.column <= 3, "seat {} exceeds last-row clamp", seat.seat);
            }
        }
        let fallback: Vec<&Seat> = alloc.rooms[0]
            .seats
            .iter()
            .filter(|s| s.column == 2)
            .collect();
        assert_eq!(fallback.len(), 1);
        assert_eq!(fallback[0].seat, "A2");
        assert_eq!(fallback[0].registration_number, "REGS015");
        assert_unique_and_bounded(&alloc, &rooms);
    }

    #[test]
    fn odd_column_overflow_when_one_room_cannot_hold_the_layout() {
        // 24 students need ceil(24/3) = 8 columns at 3 rows per column, but a
        // single room only offers 3 odd columns. Room estimation passes (3
        // columns => 1 room) because it assumes 8 rows; the layout then fails.
        let entries = roster("Science", 24);
        let papers = vec![paper("Science", "2026-03-10", "First Half")];
        let rooms = vec![room("R1", 15)];
        let err = allocate(
            &entries,
            &papers,
            &rooms,
            &ColumnOverrides::default(),
            &mut rng(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "column_overflow");
    }

    #[test]
    fn global_override_pins_departments_to_columns() {
        let mut entries = roster("Science", 8);
        entries.extend(roster("Arts", 8));
        let papers = vec![
            paper("Science", "2026-03-10", "First Half"),
            paper("Arts", "2026-03-10", "First Half"),
        ];
        let rooms = vec![room("R1", 40)];
        let mut overrides = ColumnOverrides::default();
        overrides.global.insert(1, "Science".to_string());
        overrides.global.insert(3, "Arts".to_string());
        let alloc = allocate(&entries, &papers, &rooms, &overrides, &mut rng())
            .expect("allocate");
        for seat in &alloc.rooms[0].seats {
            match seat.department.as_str() {
                "Science" => assert_eq!(seat.column, 1),
                "Arts" => assert_eq!(seat.column, 3),
                other => panic!("unexpected department {}", other),
            }
        }
        assert_unique_and_bounded(&alloc, &rooms);
    }

    #[test]
    fn per_room_override_beats_the_odd_column_fallback() {
        let entries = roster("Science", 10);
        let papers = vec![paper("Science", "2026-03-10", "First Half")];
        let rooms = vec![room("R1", 40)];
        let mut overrides = ColumnOverrides::default();
        overrides.per_room.insert(
            "R1".to_string(),
            HashMap::from([(2u8, "Science".to_string()), (4u8, "Science".to_string())]),
        );
        let alloc = allocate(&entries, &papers, &rooms, &overrides, &mut rng())
            .expect("allocate");
        for seat in &alloc.rooms[0].seats {
            assert!([2, 4].contains(&seat.column));
        }
        assert_eq!(alloc.total_seats, 10);
    }

    #[test]
    fn seat_exhaustion_names_department_and_remainder() {
        // An explicit layout confines 10 students to a 7-seat room: the
        // fallback pass fills every free seat and 3 students remain.
        let entries = roster("Science", 10);
        let papers = vec![paper("Science", "2026-03-10", "First Half")];
        let rooms = vec![room("R1", 7)];
        let mut overrides = ColumnOverrides::default();
        overrides.per_room.insert(
            "R1".to_string(),
            (1..=5u8).map(|c| (c, "Science".to_string())).collect(),
        );
        let err = allocate(&entries, &papers, &rooms, &overrides, &mut rng()).unwrap_err();
        match err {
            AllocError::SeatExhaustion {
                department,
                remaining,
            } => {
                assert_eq!(department, "Science");
                assert_eq!(remaining, 3);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn single_department_spillover_room_is_remapped_to_odd_columns() {
        // Science needs 5 columns, Arts 1: round-robin puts Science alone in
        // the second room, and the post-pass moves those columns onto 1/3.
        let mut entries = roster("Science", 40);
        entries.extend(roster("Arts", 8));
        let papers = vec![
            paper("Science", "2026-03-10", "First Half"),
            paper("Arts", "2026-03-10", "First Half"),
        ];
        let rooms = vec![room("R1", 40), room("R2", 40)];
        let alloc = allocate(
            &entries,
            &papers,
            &rooms,
            &ColumnOverrides::default(),
            &mut rng(),
        )
        .expect("allocate");
        assert_eq!(alloc.total_seats, 48);
        let second = alloc
            .rooms
            .iter()
            .find(|r| r.room_id == "R2")
            .expect("room R2 seated");
        assert_eq!(second.departments, ["Science"]);
        for seat in &second.seats {
            assert!(
                [1, 3, 5].contains(&seat.column),
                "spillover room used even column {}",
                seat.column
            );
        }
        assert_unique_and_bounded(&alloc, &rooms);
    }

    #[test]
    fn same_inputs_yield_same_seat_counts_across_seeds() {
        let mut entries = roster("Science", 13);
        entries.extend(roster("Arts", 9));
        entries.extend(roster("Commerce", 11));
        let papers = vec![
            paper("Science", "2026-03-10", "First Half"),
            paper("Arts", "2026-03-10", "First Half"),
            paper("Commerce", "2026-03-10", "First Half"),
        ];
        let rooms = vec![room("R1", 40), room("R2", 40)];
        let mut totals = Vec::new();
        for seed in [1u64, 2, 3, 42] {
            let mut r = StdRng::seed_from_u64(seed);
            let alloc = allocate(&entries, &papers, &rooms, &ColumnOverrides::default(), &mut r)
                .expect("allocate");
            assert_unique_and_bounded(&alloc, &rooms);
            totals.push(alloc.total_seats);
        }
        assert!(totals.iter().all(|t| *t == 33));
    }

    #[test]
    fn partially_unscheduled_roster_is_reported_not_fatal() {
        let mut entries = roster("Science", 4);
        entries.extend(roster("Unknown", 2));
        let papers = vec![paper("Science", "2026-03-10", "First Half")];
        let rooms = vec![room("R1", 40)];
        let alloc = allocate(
            &entries,
            &papers,
            &rooms,
            &ColumnOverrides::default(),
            &mut rng(),
        )
        .expect("allocate");
        assert_eq!(alloc.total_seats, 4);
        assert_eq!(alloc.unscheduled.len(), 2);
        assert!(alloc
            .unscheduled
            .iter()
            .all(|u| u.department == "Unknown"));
    }

    #[test]
    fn row_labels_extend_past_z() {
        assert_eq!(row_letter(0), "A");
        assert_eq!(row_letter(25), "Z");
        assert_eq!(row_letter(26), "AA");
        assert_eq!(row_letter(51), "AZ");
        assert_eq!(row_letter(52), "BA");
        assert_eq!(row_letter(701), "ZZ");
        assert_eq!(row_letter(702), "AAA");

        assert_eq!(row_index("A"), Some(0));
        assert_eq!(row_index("Z"), Some(25));
        assert_eq!(row_index("AA"), Some(26));
        assert_eq!(row_index("AD"), Some(29));
        assert_eq!(row_index(""), None);
        assert_eq!(row_index("a1"), None);
        assert_eq!(row_index("ZZZZZZZZZZZZZZZZZZZZ"), None);
    }

    #[test]
    fn deep_single_column_rooms_use_multi_letter_rows() {
        // 200 students estimate to 25 columns, so 9 rooms; the smallest
        // assigned room has 200 rows, collapsing the layout to one column
        // that runs 200 rows deep in the first room.
        let entries = roster("Science", 200);
        let papers = vec![paper("Science", "2026-03-10", "First Half")];
        let rooms: Vec<RoomRecord> = (1..=9).map(|i| room(&format!("R{}", i), 1000)).collect();
        let alloc = allocate(
            &entries,
            &papers,
            &rooms,
            &ColumnOverrides::default(),
            &mut rng(),
        )
        .expect("allocate");
        assert_eq!(alloc.total_seats, 200);
        assert_eq!(alloc.rooms.len(), 1);
        let seats = &alloc.rooms[0].seats;
        assert!(seats.iter().all(|s| s.column == 1));
        assert_eq!(seats[25].row, "Z");
        assert_eq!(seats[26].row, "AA");
        assert_eq!(seats[26].seat, "AA1");
        assert_eq!(seats[199].row, "GR");
        assert_unique_and_bounded(&alloc, &rooms);
    }

    #[test]
    fn registration_sort_key_handles_short_and_non_numeric_tails() {
        assert_eq!(registration_sort_key("REG001"), 1);
        assert_eq!(registration_sort_key("REG123"), 123);
        assert_eq!(registration_sort_key("AB"), 999);
        assert_eq!(registration_sort_key("REGX1"), 999);
    }

    #[test]
    fn room_grid_clamps_the_last_row() {
        let g = RoomGrid::new(23);
        assert_eq!(g.rows, 5);
        assert_eq!(g.last_row_cols, 3);
        assert!(g.seat_exists(4, 3));
        assert!(!g.seat_exists(4, 4));
        assert!(g.seat_exists(0, 5));
        assert!(!g.seat_exists(5, 1));

        let g = RoomGrid::new(40);
        assert_eq!(g.rows, 8);
        assert_eq!(g.last_row_cols, 5);
    }
}
