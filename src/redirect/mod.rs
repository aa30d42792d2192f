pub mod handlers;
pub mod ip;
pub mod routes;

pub use handlers::RedirectState;
pub use routes::create_redirect_router;
