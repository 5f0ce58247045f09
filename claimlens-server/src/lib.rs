pub mod http;
pub mod scheduler;
pub mod subsystems;
