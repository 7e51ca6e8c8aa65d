//! Wayfinder server: retrieval engines, the memory composer, and the IPC and
//! HTTP surfaces over them.

pub mod http;
pub mod prompt;
pub mod router;
pub mod server;
pub mod state;
pub mod subsystems;
