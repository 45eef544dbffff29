//! Windows implementations of the platform traits.

pub mod input;
pub mod tree;
pub mod win32;

pub use input::{send_mouse_click, SendInputDriver};
pub use tree::UiaTree;
pub use win32::Win32Windows;

use super::listeners::SystemListeners;
use super::Platform;
use crate::errors::Result;
use std::sync::Arc;

pub fn platform() -> Result<Platform> {
    Ok(Platform {
        listeners: Arc::new(SystemListeners),
        tree: Arc::new(UiaTree::default()),
        windows: Arc::new(Win32Windows),
        input: Arc::new(SendInputDriver),
    })
}
