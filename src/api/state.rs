use std::sync::Arc;

use crate::service::Aggregator;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<Aggregator>,
}
