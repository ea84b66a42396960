pub mod cache;
pub mod exam_period_service;
pub mod extraction_service;
pub mod normalizer;
pub mod progress_service;
pub mod question_service;
