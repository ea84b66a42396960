pub mod exam_period;
pub mod progress;
pub mod question;
pub mod subject;
