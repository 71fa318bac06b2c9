//! X11 backend: screen grabs through `XGetImage`, key injection through the XTest extension,
//! window lookup by title and focus handling through plain Xlib.
#![allow(non_upper_case_globals)]

use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_uint, c_ulong};
use std::ptr;
use std::rc::Rc;

use anyhow::{anyhow, ensure, Result};
use image::{Rgba, RgbaImage};
use x11::keysym;
use x11::xlib;
use x11::xtest;

use crate::device::{InputDevice, PixelSource, ScreenRegion, WindowFocus, WindowHandle};
use crate::keys::Key;
use crate::platform::{ErrorLatch, ProtocolError};

static X_ERRORS: ErrorLatch = ErrorLatch::new();

/// Replaces Xlib's default handler, which would exit the process and leave keys held
unsafe extern "C" fn record_x_error(
    _display: *mut xlib::Display,
    event: *mut xlib::XErrorEvent,
) -> c_int {
    if let Some(event) = event.as_ref() {
        X_ERRORS.record(ProtocolError { error_code: event.error_code, request_code: event.request_code });
    }
    0
}

/// Display connection, closed on drop
struct ManagedDisplay {
    ptr: *mut xlib::Display,
}

impl ManagedDisplay {
    fn open() -> Result<Self> {
        let ptr = unsafe { xlib::XOpenDisplay(ptr::null()) };
        if ptr.is_null() {
            Err(anyhow!("failed to open X display. Check the DISPLAY environment variable"))
        } else {
            log::debug!("X display opened: {:p}", ptr);
            Ok(Self { ptr })
        }
    }

    fn raw(&self) -> *mut xlib::Display { self.ptr }

    /// Waits until the server processed all requests and reports the first error among them
    fn sync(
        &self,
        what: &str,
    ) -> Result<()> {
        unsafe { xlib::XSync(self.ptr, xlib::False) };
        match X_ERRORS.take() {
            Some(error) => Err(anyhow!("{} failed: {}", what, error)),
            None => Ok(()),
        }
    }
}

impl Drop for ManagedDisplay {
    fn drop(&mut self) {
        log::debug!("closing X display: {:p}", self.ptr);
        unsafe { xlib::XCloseDisplay(self.ptr) };
    }
}

/// One connection to the X server, shared by all device implementations created from it
pub struct X11Session {
    display: Rc<ManagedDisplay>,
    root: xlib::Window,
}

impl X11Session {
    pub fn open() -> Result<Self> {
        let display = ManagedDisplay::open()?;
        unsafe { xlib::XSetErrorHandler(Some(record_x_error)) };
        display.sync("connecting")?;
        let mut event_base: c_int = 0;
        let mut error_base: c_int = 0;
        let mut major: c_int = 0;
        let mut minor: c_int = 0;
        let has_xtest = unsafe {
            xtest::XTestQueryExtension(display.raw(), &mut event_base, &mut error_base, &mut major, &mut minor)
        };
        ensure!(has_xtest != 0, "the X server does not support the XTest extension");

        let root = unsafe { xlib::XDefaultRootWindow(display.raw()) };
        log::info!("connected to X server (XTest {}.{})", major, minor);
        Ok(Self { display: Rc::new(display), root })
    }

    pub fn screen_capture(&self) -> X11ScreenCapture {
        X11ScreenCapture { display: Rc::clone(&self.display), root: self.root }
    }

    pub fn keyboard(&self) -> X11Keyboard { X11Keyboard { display: Rc::clone(&self.display) } }

    pub fn window_focus(&self) -> X11WindowFocus { X11WindowFocus { display: Rc::clone(&self.display), root: self.root } }
}

pub struct X11ScreenCapture {
    display: Rc<ManagedDisplay>,
    root: xlib::Window,
}

impl PixelSource for X11ScreenCapture {
    fn grab(
        &mut self,
        region: &ScreenRegion,
    ) -> Result<RgbaImage> {
        let image = unsafe {
            xlib::XGetImage(
                self.display.raw(),
                self.root,
                region.left,
                region.top,
                region.width,
                region.height,
                !0 as c_ulong,
                xlib::ZPixmap,
            )
        };
        if let Err(e) = self.display.sync("XGetImage") {
            if !image.is_null() {
                unsafe { xlib::XDestroyImage(image) };
            }
            return Err(e.context(format!("screen region {:?} not capturable", region)));
        }
        ensure!(!image.is_null(), "XGetImage failed for {:?}", region);

        let (red_mask, green_mask, blue_mask) = unsafe { ((*image).red_mask, (*image).green_mask, (*image).blue_mask) };
        let channel = |pixel: c_ulong, mask: c_ulong| -> u8 {
            if mask == 0 {
                return 0;
            }
            let shifted = (pixel & mask) >> mask.trailing_zeros();
            let max = mask >> mask.trailing_zeros();
            (shifted * 255 / max) as u8
        };

        let frame = RgbaImage::from_fn(region.width, region.height, |x, y| {
            let pixel = unsafe { xlib::XGetPixel(image, x as c_int, y as c_int) };
            Rgba([channel(pixel, red_mask), channel(pixel, green_mask), channel(pixel, blue_mask), 255])
        });
        unsafe { xlib::XDestroyImage(image) };
        Ok(frame)
    }
}

pub struct X11Keyboard {
    display: Rc<ManagedDisplay>,
}

impl X11Keyboard {
    fn keysym(key: Key) -> c_uint {
        match key {
            Key::Up => keysym::XK_Up,
            Key::Down => keysym::XK_Down,
            Key::Left => keysym::XK_Left,
            Key::Right => keysym::XK_Right,
            Key::Shift => keysym::XK_Shift_L,
            Key::Z => keysym::XK_z,
            Key::X => keysym::XK_x,
            Key::Escape => keysym::XK_Escape,
        }
    }

    fn send(
        &mut self,
        key: Key,
        press: bool,
    ) -> Result<()> {
        let keycode = unsafe { xlib::XKeysymToKeycode(self.display.raw(), Self::keysym(key) as xlib::KeySym) };
        ensure!(keycode != 0, "no keycode mapped for key {}", key);
        let status = unsafe {
            xtest::XTestFakeKeyEvent(self.display.raw(), keycode as c_uint, press as xlib::Bool, xlib::CurrentTime)
        };
        ensure!(status != 0, "XTestFakeKeyEvent failed for key {}", key);
        self.display.sync("XTestFakeKeyEvent")
    }
}

impl InputDevice for X11Keyboard {
    fn press(
        &mut self,
        key: Key,
    ) -> Result<()> {
        self.send(key, true)
    }

    fn release(
        &mut self,
        key: Key,
    ) -> Result<()> {
        self.send(key, false)
    }
}

pub struct X11WindowFocus {
    display: Rc<ManagedDisplay>,
    root: xlib::Window,
}

impl X11WindowFocus {
    fn window_name(
        &self,
        window: xlib::Window,
    ) -> Option<String> {
        let mut name: *mut c_char = ptr::null_mut();
        let status = unsafe { xlib::XFetchName(self.display.raw(), window, &mut name) };
        if status == 0 || name.is_null() {
            return None;
        }
        let result = unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned();
        unsafe { xlib::XFree(name.cast()) };
        Some(result)
    }

    fn children(
        &self,
        window: xlib::Window,
    ) -> Vec<xlib::Window> {
        let mut root_return: xlib::Window = 0;
        let mut parent_return: xlib::Window = 0;
        let mut children: *mut xlib::Window = ptr::null_mut();
        let mut count: c_uint = 0;
        let status = unsafe {
            xlib::XQueryTree(self.display.raw(), window, &mut root_return, &mut parent_return, &mut children, &mut count)
        };
        if status == 0 || children.is_null() {
            return vec![];
        }
        let result = unsafe { std::slice::from_raw_parts(children, count as usize) }.to_vec();
        unsafe { xlib::XFree(children.cast()) };
        result
    }

    /// Depth first search below `window` for a name containing `title`
    fn search(
        &self,
        window: xlib::Window,
        title: &str,
    ) -> Option<xlib::Window> {
        if self.window_name(window).is_some_and(|name| name.contains(title)) {
            return Some(window);
        }
        self.children(window).into_iter().find_map(|child| self.search(child, title))
    }
}

impl WindowFocus for X11WindowFocus {
    fn find_window(
        &mut self,
        title: &str,
    ) -> Option<WindowHandle> {
        let found = self.search(self.root, title).map(|w| WindowHandle(w as u64));
        // windows may vanish while the tree is walked
        if let Err(e) = self.display.sync("window search") {
            log::debug!("{:#}", e);
        }
        found
    }

    fn is_active(
        &mut self,
        window: WindowHandle,
    ) -> bool {
        let mut focused: xlib::Window = 0;
        let mut revert_to: c_int = 0;
        unsafe { xlib::XGetInputFocus(self.display.raw(), &mut focused, &mut revert_to) };
        focused as u64 == window.0
    }

    fn activate(
        &mut self,
        window: WindowHandle,
    ) -> Result<()> {
        let window = window.0 as xlib::Window;
        unsafe {
            xlib::XRaiseWindow(self.display.raw(), window);
            xlib::XSetInputFocus(self.display.raw(), window, xlib::RevertToParent, xlib::CurrentTime);
        }
        self.display.sync("activating the window")
    }
}
