pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use crate::database::store::DocumentStore;
use crate::services::cache::{QuestionCache, SystemClock};
use crate::services::exam_period_service::ExamPeriodService;
use crate::services::extraction_service::{ExtractionService, InferenceClient};
use crate::services::progress_service::ProgressService;
use crate::services::question_service::QuestionService;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub cache: Arc<QuestionCache>,
    pub extraction_service: ExtractionService,
    pub exam_period_service: ExamPeriodService,
    pub question_service: QuestionService,
    pub progress_service: ProgressService,
}

impl AppState {
    /// Store and inference client are injected so tests can run the whole
    /// surface against in-process fakes.
    pub fn new(store: Arc<dyn DocumentStore>, inference: Arc<dyn InferenceClient>) -> Self {
        let config = crate::config::get_config();

        let cache = Arc::new(QuestionCache::new(Arc::new(SystemClock)));
        let exam_period_service = ExamPeriodService::new(store.clone());
        let question_service =
            QuestionService::new(store.clone(), cache.clone(), exam_period_service.clone());
        let progress_service = ProgressService::new(store.clone());
        let extraction_service = ExtractionService::new(inference, config.max_upload_mb);

        Self {
            store,
            cache,
            extraction_service,
            exam_period_service,
            question_service,
            progress_service,
        }
    }
}
