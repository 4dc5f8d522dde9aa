// Export route modules
pub mod ai_config;
pub mod chat;

use crate::state::AppState;
use axum::Router;

// Function to configure all routes
pub fn configure(state: AppState) -> Router {
    Router::new()
        .merge(chat::routes(state.clone()))
        .merge(ai_config::routes(state))
}
