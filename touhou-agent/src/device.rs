//! Seams to the outside world: screen pixels, keyboard, window manager and time.
//!
//! The training loop only talks to these traits. A real desktop backend lives in
//! [crate::platform], test doubles in [crate::mock].

use std::thread;
use std::time::Duration;

use anyhow::Result;
use image::RgbaImage;

use crate::keys::Key;

/// Screen rectangle the game is rendered into (absolute desktop coordinates)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenRegion {
    pub top: i32,
    pub left: i32,
    pub width: u32,
    pub height: u32,
}

pub trait PixelSource {
    /// Grabs the current content of `region`
    fn grab(
        &mut self,
        region: &ScreenRegion,
    ) -> Result<RgbaImage>;
}

/// Synthetic key events; assumed to take effect immediately
pub trait InputDevice {
    fn press(
        &mut self,
        key: Key,
    ) -> Result<()>;

    fn release(
        &mut self,
        key: Key,
    ) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub u64);

pub trait WindowFocus {
    fn find_window(
        &mut self,
        title: &str,
    ) -> Option<WindowHandle>;

    /// Whether `window` currently has the input focus
    fn is_active(
        &mut self,
        window: WindowHandle,
    ) -> bool;

    fn activate(
        &mut self,
        window: WindowHandle,
    ) -> Result<()>;
}

/// Source of all deliberate waits
pub trait Clock {
    fn sleep(
        &self,
        duration: Duration,
    );
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(
        &self,
        duration: Duration,
    ) {
        thread::sleep(duration)
    }
}
