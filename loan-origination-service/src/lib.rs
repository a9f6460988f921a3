pub mod config;
pub mod models;
pub mod scoring;
pub mod service;
pub mod services;
pub mod tasks;
pub mod workflow;

pub use config::Config;
pub use service::{AppState, GENERIC_APOLOGY, build_router, create_app, handle_chat};
pub use services::Collaborators;
pub use workflow::{build_loan_workflow, create_turn_runner};
pub use models::*;
