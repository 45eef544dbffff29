//! Top-level and child window enumeration through plain Win32 calls.

use crate::errors::{AutomationError, Result};
use crate::geometry::Rect;
use crate::platforms::{ChildWindow, TopLevelWindow, WindowEnumerator};
use async_trait::async_trait;
use windows::Win32::Foundation::{HWND, RECT};
use windows::Win32::UI::Input::KeyboardAndMouse::IsWindowEnabled;
use windows::Win32::UI::WindowsAndMessaging::{
    GetClassNameW, GetDlgCtrlID, GetForegroundWindow, GetTopWindow, GetWindow, GetWindowRect,
    GetWindowTextW, GetWindowThreadProcessId, IsWindowVisible, GW_CHILD, GW_HWNDNEXT,
};

// Guards against a window list that changes while it is walked.
const MAX_WINDOWS: usize = 10_000;

#[derive(Debug, Clone, Copy, Default)]
pub struct Win32Windows;

#[async_trait]
impl WindowEnumerator for Win32Windows {
    async fn top_level_windows(&self) -> Result<Vec<TopLevelWindow>> {
        blocking(enumerate_top_level).await
    }

    async fn child_windows(&self, parent: isize) -> Result<Vec<ChildWindow>> {
        blocking(move || Ok(enumerate_children(parent))).await
    }

    async fn foreground_process_id(&self) -> Result<Option<u32>> {
        blocking(|| {
            let hwnd = unsafe { GetForegroundWindow() };
            if hwnd.0.is_null() {
                return Ok(None);
            }
            let pid = process_id(hwnd);
            Ok((pid > 0).then_some(pid))
        })
        .await
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AutomationError::PlatformError(format!("window enumeration task failed: {e}")))?
}

fn enumerate_top_level() -> Result<Vec<TopLevelWindow>> {
    let mut windows = Vec::new();
    unsafe {
        let mut hwnd = match GetTopWindow(HWND::default()) {
            Ok(h) => h,
            Err(_) => return Ok(windows),
        };
        while !hwnd.0.is_null() && windows.len() < MAX_WINDOWS {
            windows.push(TopLevelWindow {
                handle: hwnd.0 as isize,
                class_name: class_name(hwnd),
                process_id: process_id(hwnd),
                title: window_text(hwnd),
                rect: window_rect(hwnd),
                visible: IsWindowVisible(hwnd).as_bool(),
            });
            hwnd = match GetWindow(hwnd, GW_HWNDNEXT) {
                Ok(h) => h,
                Err(_) => break,
            };
        }
    }
    Ok(windows)
}

/// Immediate children only; grandchildren belong to composite controls.
fn enumerate_children(parent: isize) -> Vec<ChildWindow> {
    let mut children = Vec::new();
    let parent_hwnd = HWND(parent as *mut core::ffi::c_void);
    unsafe {
        let mut hwnd = match GetWindow(parent_hwnd, GW_CHILD) {
            Ok(h) => h,
            Err(_) => return children,
        };
        while !hwnd.0.is_null() && children.len() < MAX_WINDOWS {
            children.push(ChildWindow {
                handle: hwnd.0 as isize,
                parent,
                class_name: class_name(hwnd),
                text: window_text(hwnd),
                control_id: GetDlgCtrlID(hwnd) as i64,
                rect: window_rect(hwnd),
                visible: IsWindowVisible(hwnd).as_bool(),
                enabled: IsWindowEnabled(hwnd).as_bool(),
            });
            hwnd = match GetWindow(hwnd, GW_HWNDNEXT) {
                Ok(h) => h,
                Err(_) => break,
            };
        }
    }
    children
}

fn process_id(hwnd: HWND) -> u32 {
    let mut pid = 0u32;
    unsafe {
        GetWindowThreadProcessId(hwnd, Some(&mut pid));
    }
    pid
}

fn class_name(hwnd: HWND) -> String {
    let mut buf = [0u16; 256];
    let len = unsafe { GetClassNameW(hwnd, &mut buf) };
    String::from_utf16_lossy(&buf[..len.max(0) as usize])
}

fn window_text(hwnd: HWND) -> String {
    let mut buf = [0u16; 512];
    let len = unsafe { GetWindowTextW(hwnd, &mut buf) };
    String::from_utf16_lossy(&buf[..len.max(0) as usize])
}

fn window_rect(hwnd: HWND) -> Rect {
    let mut rect = RECT::default();
    match unsafe { GetWindowRect(hwnd, &mut rect) } {
        Ok(()) => Rect::new(rect.left, rect.top, rect.right, rect.bottom),
        Err(_) => Rect::default(),
    }
}
