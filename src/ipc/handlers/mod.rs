pub mod announcements;
pub mod assignments;
pub mod billing;
pub mod categories;
pub mod classes;
pub mod core;
pub mod dashboard;
pub mod gradebook;
pub mod grades;
pub mod institutions;
pub mod materials;
pub mod requests;
pub mod subjects;
pub mod submissions;
pub mod users;
