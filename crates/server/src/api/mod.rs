pub mod handlers;
pub mod items;
pub mod middleware;
pub mod orchestrator;
pub mod pacing;
pub mod routes;

pub use routes::create_router;
