pub mod batch;
pub mod config;
pub mod error;
pub mod extract;
pub mod runtime;
pub mod template;
pub mod transport;
