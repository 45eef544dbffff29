//! Physical mouse and keyboard input through `SendInput`.

use crate::errors::{AutomationError, Result};
use crate::geometry::Point;
use crate::platforms::{InputDriver, MouseButton};
use async_trait::async_trait;
use std::thread;
use std::time::Duration;
use tracing::debug;
use windows::Win32::UI::Input::KeyboardAndMouse::{
    SendInput, INPUT, INPUT_0, INPUT_KEYBOARD, INPUT_MOUSE, KEYBDINPUT, KEYBD_EVENT_FLAGS,
    KEYEVENTF_KEYUP, KEYEVENTF_UNICODE, MOUSEEVENTF_ABSOLUTE, MOUSEEVENTF_LEFTDOWN,
    MOUSEEVENTF_LEFTUP, MOUSEEVENTF_MIDDLEDOWN, MOUSEEVENTF_MIDDLEUP, MOUSEEVENTF_MOVE,
    MOUSEEVENTF_RIGHTDOWN, MOUSEEVENTF_RIGHTUP, MOUSEEVENTF_VIRTUALDESK, MOUSEINPUT,
    MOUSE_EVENT_FLAGS, VIRTUAL_KEY, VK_CONTROL, VK_DELETE,
};
use windows::Win32::UI::WindowsAndMessaging::{
    GetSystemMetrics, SM_CXVIRTUALSCREEN, SM_CYVIRTUALSCREEN, SM_XVIRTUALSCREEN,
    SM_YVIRTUALSCREEN,
};

const VK_A: VIRTUAL_KEY = VIRTUAL_KEY(0x41);
const DOUBLE_CLICK_GAP: Duration = Duration::from_millis(50);
const KEY_GAP: Duration = Duration::from_millis(30);

/// Input driver that synthesizes real OS events.
#[derive(Debug, Clone, Copy, Default)]
pub struct SendInputDriver;

#[async_trait]
impl InputDriver for SendInputDriver {
    async fn click(&self, point: Point, button: MouseButton, count: u32) -> Result<()> {
        run_blocking(move || send_mouse_click(point, button, count)).await
    }

    async fn move_to(&self, point: Point) -> Result<()> {
        run_blocking(move || send(&[mouse_input(point, MOUSEEVENTF_MOVE)])).await
    }

    async fn replace_text(&self, text: &str) -> Result<()> {
        let text = text.to_string();
        run_blocking(move || {
            send(&[
                key_input(VK_CONTROL, false),
                key_input(VK_A, false),
                key_input(VK_A, true),
                key_input(VK_CONTROL, true),
            ])?;
            thread::sleep(KEY_GAP);
            send(&[key_input(VK_DELETE, false), key_input(VK_DELETE, true)])?;
            thread::sleep(KEY_GAP);
            type_unicode(&text)
        })
        .await
    }
}

async fn run_blocking<F>(f: F) -> Result<()>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AutomationError::PlatformError(format!("input task failed: {e}")))?
}

/// Move to `point` and press `button` `count` times.
pub fn send_mouse_click(point: Point, button: MouseButton, count: u32) -> Result<()> {
    let (down_flag, up_flag) = match button {
        MouseButton::Left => (MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP),
        MouseButton::Right => (MOUSEEVENTF_RIGHTDOWN, MOUSEEVENTF_RIGHTUP),
        MouseButton::Middle => (MOUSEEVENTF_MIDDLEDOWN, MOUSEEVENTF_MIDDLEUP),
    };

    send(&[mouse_input(point, MOUSEEVENTF_MOVE)])?;
    for i in 0..count.max(1) {
        if i > 0 {
            thread::sleep(DOUBLE_CLICK_GAP);
        }
        send(&[mouse_input(point, down_flag), mouse_input(point, up_flag)])?;
    }
    debug!(x = point.x, y = point.y, ?button, count, "mouse click sent");
    Ok(())
}

fn type_unicode(text: &str) -> Result<()> {
    let mut inputs = Vec::with_capacity(text.len() * 2);
    for unit in text.encode_utf16() {
        inputs.push(unicode_input(unit, false));
        inputs.push(unicode_input(unit, true));
    }
    if inputs.is_empty() {
        return Ok(());
    }
    send(&inputs)
}

fn send(inputs: &[INPUT]) -> Result<()> {
    let sent = unsafe { SendInput(inputs, std::mem::size_of::<INPUT>() as i32) };
    if sent as usize != inputs.len() {
        return Err(AutomationError::PlatformError(format!(
            "SendInput injected {sent} of {} events (blocked by UIPI or a secure desktop?)",
            inputs.len()
        )));
    }
    Ok(())
}

// Absolute coordinates are normalized to 0..=65535 across the virtual desktop.
fn mouse_input(point: Point, flags: MOUSE_EVENT_FLAGS) -> INPUT {
    let (left, top, width, height) = unsafe {
        (
            GetSystemMetrics(SM_XVIRTUALSCREEN),
            GetSystemMetrics(SM_YVIRTUALSCREEN),
            GetSystemMetrics(SM_CXVIRTUALSCREEN).max(1),
            GetSystemMetrics(SM_CYVIRTUALSCREEN).max(1),
        )
    };
    let abs_x = (((point.x - left) as f64 * 65535.0) / (width - 1).max(1) as f64).round() as i32;
    let abs_y = (((point.y - top) as f64 * 65535.0) / (height - 1).max(1) as f64).round() as i32;

    INPUT {
        r#type: INPUT_MOUSE,
        Anonymous: INPUT_0 {
            mi: MOUSEINPUT {
                dx: abs_x,
                dy: abs_y,
                mouseData: 0,
                dwFlags: MOUSEEVENTF_ABSOLUTE | MOUSEEVENTF_VIRTUALDESK | flags,
                time: 0,
                dwExtraInfo: 0,
            },
        },
    }
}

fn key_input(vk: VIRTUAL_KEY, up: bool) -> INPUT {
    INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wVk: vk,
                wScan: 0,
                dwFlags: if up { KEYEVENTF_KEYUP } else { KEYBD_EVENT_FLAGS(0) },
                time: 0,
                dwExtraInfo: 0,
            },
        },
    }
}

fn unicode_input(unit: u16, up: bool) -> INPUT {
    let flags = if up {
        KEYEVENTF_UNICODE | KEYEVENTF_KEYUP
    } else {
        KEYEVENTF_UNICODE
    };
    INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wVk: VIRTUAL_KEY(0),
                wScan: unit,
                dwFlags: flags,
                time: 0,
                dwExtraInfo: 0,
            },
        },
    }
}
