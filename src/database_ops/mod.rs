pub mod db;
pub mod genres;
pub mod job_state;
pub mod rankings;
