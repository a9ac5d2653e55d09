mod routes;
mod server;

pub mod app;
pub mod bundle;
pub mod config;
pub mod error;
pub mod features;
pub mod model;
pub mod preprocess;
pub mod scaling;
pub mod state;

pub use app::start_app;
pub use server::{build_router, SharedState};
