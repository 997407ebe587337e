//! Core zuauth library (proof handling, credential derivation, auth backend, config).

pub mod backend;
pub mod callback;
pub mod config;
pub mod credentials;
pub mod flow;
pub mod logging;
pub mod pcd;
pub mod request;
pub mod session;
