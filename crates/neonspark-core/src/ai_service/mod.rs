//! Asynchronous AI request processing with status tracking and history.

mod manager;
mod types;

pub use manager::AiServiceManager;
pub use types::{
    format_uptime, success_rate, AiRequest, AiResponse, ProcessingStatus, RequestUpdate,
    ServiceState, ServiceStatus,
};
