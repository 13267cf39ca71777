//! Oxdriver: Rust-based browser automation over the Chrome DevTools Protocol
//!
//! This library drives an already-running Chrome instance through its
//! remote debugging endpoint: connection management, flat-session
//! target routing, navigation, element lookup and interaction, frame
//! switching, and request interception.

pub mod error;
pub mod config;

pub mod cdp;
pub mod driver;

// Re-exports
pub use config::Config;
pub use error::{Error, Result};

pub use driver::{
    Browser, Element, Frame, FrameTarget, FrameTree, ReadyState, ScreenshotFormat, SpecialKey,
    Tab, TabState,
};

/// Oxdriver library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
