//! Kalshi Edge Bot - Main Library
//!
//! Workspace glue for the binaries:
//!
//! - **bin_common**: shared CLI/runner plumbing for executables
//! - **kalshi**: core business logic (re-exported from the workspace)
//! - **hypersockets**: WebSocket library (re-exported from the workspace)

// Re-export workspace libraries for convenience
pub use hypersockets;
pub use kalshi;

// Binary common utilities
pub mod bin_common {
    //! Shared functionality for the binary entry points.

    pub mod cli;
    pub mod runner;

    pub use cli::{load_config_from_env, parse_args, ConfigType};
    pub use runner::{print_banner, print_shutdown};
}
