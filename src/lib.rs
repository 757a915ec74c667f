//! # Tessera
//!
//! Shell integration for a Wayland/Mir-style compositor: turns the
//! compositor's windows, clients and outputs into UI-facing surfaces,
//! sessions and screens, and carries the UI's decisions back.
//!
//! ## Architecture
//!
//! - `buffer` / `texture`: client buffers wrapped as bindable textures, one
//!   per render consumer
//! - `surface`: per-window state machine, frame pump and input delivery
//! - `session`: per-application state machine and prompt sessions
//! - `policy`: window management policy run under the compositor lock
//! - `screens` / `storage`: output model and persisted display options
//! - `shell`: the UI-thread hub and the compositor to UI queue
//! - `backend`: an in-memory compositor implementing every collaborator
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tessera::backend::HeadlessStack;
//! use tessera::clock::RealTimeSource;
//! use tessera::ShellConfig;
//!
//! let config = ShellConfig::default();
//! let (stack, mut shell, ui_loop) = HeadlessStack::new(&config, Arc::new(RealTimeSource::new()));
//! stack.compositor.connect("terminal", 4242);
//! ui_loop.run_pending(&mut shell);
//! ```

pub mod backend;
pub mod buffer;
pub mod clock;
pub mod config;
pub mod error;
pub mod geometry;
pub mod input;
pub mod logging;
pub mod policy;
pub mod screens;
pub mod session;
pub mod shell;
pub mod signals;
pub mod storage;
pub mod surface;
pub mod texture;
pub mod window;

// Re-export main types for easy access
pub use config::ShellConfig;
pub use error::{Result, ShellError};
pub use policy::{ShellPolicy, WindowManagementPolicy};
pub use screens::ScreensModel;
pub use session::Session;
pub use shell::Shell;
pub use surface::Surface;
