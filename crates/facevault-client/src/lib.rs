//! facevault-client: gateways to the FaceVault search backend.
//!
//! [`HttpApi`] talks to a running server; [`DemoApi`] answers offline with
//! canned data. Both implement [`facevault_core::FaceVaultApi`].

pub mod config;
pub mod demo;
pub mod http;

pub use config::{Config, ConfigError};
pub use demo::{DemoApi, DemoOptions};
pub use http::HttpApi;
