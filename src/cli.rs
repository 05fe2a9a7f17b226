//! Command-line interface configuration.

use argh::FromArgs;
use std::path::PathBuf;

/// Static SPA server and admin reverse proxy
#[derive(Debug, Default, FromArgs)]
pub struct Cli {
    /// port to listen on, all interfaces (env PORT, default 3000)
    #[argh(option)]
    pub port: Option<u16>,

    /// SPA build output directory (env ASSET_ROOT, default 'build/web')
    #[argh(option, long = "asset-root")]
    pub asset_root: Option<PathBuf>,

    /// public origin used in rewritten redirects, e.g. 'https://notes.example.com'
    /// (env EXTERNAL_ORIGIN or APP_URL, required)
    #[argh(option, long = "external-origin")]
    pub external_origin: Option<String>,

    /// admin backend address (env UPSTREAM_ADDR, default '127.0.0.1:8002')
    #[argh(option)]
    pub upstream: Option<String>,

    /// seconds allowed for connecting to the backend (default 5)
    #[argh(option, long = "connect-timeout-secs", default = "5")]
    pub connect_timeout_secs: u64,

    /// seconds allowed for the backend to send response headers (default 60)
    #[argh(option, long = "response-timeout-secs", default = "60")]
    pub response_timeout_secs: u64,

    /// extra content type as '.ext=type', may be repeated
    #[argh(option, long = "mime-type")]
    pub mime_types: Vec<String>,
}
