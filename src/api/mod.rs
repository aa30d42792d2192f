pub mod error;
pub mod handlers;
pub mod routes;
pub mod users;

pub use error::{ApiError, ApiResult};
pub use handlers::AppState;
pub use routes::create_api_router;
