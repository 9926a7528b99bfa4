pub mod console_task;
pub mod tracker_task;
