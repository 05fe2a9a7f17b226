//! Static SPA server with an admin-backend reverse proxy in front of it.
//!
//! Requests under the admin prefixes are streamed to the backend with
//! sanitized headers, and redirects that leak the backend's loopback address
//! are rewritten to the public origin. Everything else is served from the
//! SPA build directory, with unknown paths answered by `index.html`.

pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod headers;
pub mod middleware;
pub mod mime;
pub mod request_id;
pub mod resolve;
pub mod router;
pub mod routes;
pub mod server;
pub mod state;
