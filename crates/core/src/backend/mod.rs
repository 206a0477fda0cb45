//! External call adapters for generative backends.
//!
//! Each backend performs one submission per invocation and reports the result
//! as an `Artifact` or a classified `AdapterError`:
//! - **Browser**: action scripts executed by a browser-automation driver
//! - **Api**: REST task submission plus status polling

mod api;
mod browser;
mod http;
mod registry;
mod types;

pub use api::{derive_seed, ApiBackend};
pub use browser::{
    expand_placeholders, ActionScript, BrowserBackend, BrowserDriver, DriverFailure, DriverRun,
    DriverRunStatus, HttpBrowserDriver,
};
pub use registry::BackendRegistry;
pub use types::{AdapterError, BackendKind, ErrorClass, GenerationBackend, RemoteOutcome};
