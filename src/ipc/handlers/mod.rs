pub mod core;
pub mod exams;
pub mod rooms;
pub mod roster;
pub mod schedule;
pub mod seating;
