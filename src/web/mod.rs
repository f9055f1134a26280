mod handlers;
mod routes;

pub use handlers::{health_response, HealthResponse};
pub use routes::{create_router, create_viewer_router};
