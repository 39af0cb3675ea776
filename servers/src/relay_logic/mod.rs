//! Server side of the relay.
//!
//! - **`state`**: shared application state handed to every route.
//! - **`downstream`**: the axum router (`/events`, `/health`, `/info`).
//! - **`upstream`**: supervision of the ingestion adapter task.

pub mod downstream;
pub mod state;
pub mod upstream;
