use crate::analysis::AnalysisService;
use crate::db::SubmissionStore;
use crate::evaluation::Evaluator;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SubmissionStore>,
    pub analysis: Arc<dyn AnalysisService>,
    pub evaluator: Arc<Evaluator>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn SubmissionStore>,
        analysis: Arc<dyn AnalysisService>,
        evaluator: Evaluator,
    ) -> Self {
        Self {
            store,
            analysis,
            evaluator: Arc::new(evaluator),
        }
    }
}
