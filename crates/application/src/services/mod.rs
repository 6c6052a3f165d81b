//! 应用服务

pub mod muc_service;

pub use muc_service::{MucService, MucServiceDependencies};
