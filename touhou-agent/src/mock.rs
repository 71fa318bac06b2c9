//! Test doubles for the [crate::device] seams. Shared handles let a test keep looking
//! at what happened after the double was moved into the environment.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use anyhow::{ensure, Result};
use image::RgbaImage;

use crate::device::{Clock, InputDevice, PixelSource, ScreenRegion, WindowFocus, WindowHandle};
use crate::keys::{InputEvent, Key};

/// Remembers every emitted key event
#[derive(Default, Clone)]
pub struct RecordingInput {
    events: Rc<RefCell<Vec<InputEvent>>>,
}

impl RecordingInput {
    pub fn new() -> Self { Self::default() }

    pub fn events(&self) -> Rc<RefCell<Vec<InputEvent>>> { Rc::clone(&self.events) }
}

impl InputDevice for RecordingInput {
    fn press(
        &mut self,
        key: Key,
    ) -> Result<()> {
        self.events.borrow_mut().push(InputEvent::Press(key));
        Ok(())
    }

    fn release(
        &mut self,
        key: Key,
    ) -> Result<()> {
        self.events.borrow_mut().push(InputEvent::Release(key));
        Ok(())
    }
}

/// Produces frame number `n` (counting from 0) with a user supplied function
pub struct ScriptedPixelSource {
    frame_fn: Box<dyn FnMut(usize) -> RgbaImage>,
    grabs: Rc<Cell<usize>>,
}

impl ScriptedPixelSource {
    pub fn new(frame_fn: impl FnMut(usize) -> RgbaImage + 'static) -> Self {
        Self { frame_fn: Box::new(frame_fn), grabs: Rc::new(Cell::new(0)) }
    }

    pub fn grab_counter(&self) -> Rc<Cell<usize>> { Rc::clone(&self.grabs) }
}

impl PixelSource for ScriptedPixelSource {
    fn grab(
        &mut self,
        _region: &ScreenRegion,
    ) -> Result<RgbaImage> {
        let n = self.grabs.get();
        self.grabs.set(n + 1);
        Ok((self.frame_fn)(n))
    }
}

/// Adds up requested sleeps instead of sleeping
#[derive(Default)]
pub struct ManualClock {
    elapsed: Cell<Duration>,
}

impl ManualClock {
    pub fn new() -> Self { Self::default() }

    pub fn elapsed(&self) -> Duration { self.elapsed.get() }
}

impl Clock for ManualClock {
    fn sleep(
        &self,
        duration: Duration,
    ) {
        self.elapsed.set(self.elapsed.get() + duration)
    }
}

/// A window manager knowing at most one window
#[derive(Clone)]
pub struct StaticWindowFocus {
    window: Rc<Cell<Option<WindowHandle>>>,
    active: Rc<Cell<bool>>,
    activations: Rc<Cell<usize>>,
    lookups: Rc<Cell<usize>>,
}

impl StaticWindowFocus {
    pub fn new(
        window: Option<WindowHandle>,
        active: bool,
    ) -> Self {
        Self {
            window: Rc::new(Cell::new(window)),
            active: Rc::new(Cell::new(active)),
            activations: Rc::new(Cell::new(0)),
            lookups: Rc::new(Cell::new(0)),
        }
    }

    /// Focus handled by someone else
    pub fn always_active() -> Self { Self::new(Some(WindowHandle(1)), true) }

    pub fn activation_counter(&self) -> Rc<Cell<usize>> { Rc::clone(&self.activations) }

    /// Number of `find_window` calls
    pub fn lookup_counter(&self) -> Rc<Cell<usize>> { Rc::clone(&self.lookups) }

    /// Simulates the user clicking into another window
    pub fn lose_focus(&self) { self.active.set(false) }

    /// Simulates a restarted game: the old handle is gone and the new window is not focused
    pub fn replace_window(
        &self,
        window: Option<WindowHandle>,
    ) {
        self.window.set(window);
        self.active.set(false);
    }
}

impl WindowFocus for StaticWindowFocus {
    fn find_window(
        &mut self,
        _title: &str,
    ) -> Option<WindowHandle> {
        self.lookups.set(self.lookups.get() + 1);
        self.window.get()
    }

    fn is_active(
        &mut self,
        window: WindowHandle,
    ) -> bool {
        self.active.get() && self.window.get() == Some(window)
    }

    fn activate(
        &mut self,
        window: WindowHandle,
    ) -> Result<()> {
        ensure!(self.window.get() == Some(window), "no such window: {:?}", window);
        self.activations.set(self.activations.get() + 1);
        self.active.set(true);
        Ok(())
    }
}
