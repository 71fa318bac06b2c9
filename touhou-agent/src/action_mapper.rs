use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::rc::Rc;
use std::time::Duration;

use anyhow::Result;
use itertools::Itertools;
use ql::prelude::{ActionIndex, QlError};

use crate::device::{Clock, InputDevice, WindowFocus, WindowHandle};
use crate::keys::{InputEvent, Key};

/// Keys currently held down
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InputState {
    held: BTreeSet<Key>,
}

impl InputState {
    pub fn new(keys: impl IntoIterator<Item = Key>) -> Self { Self { held: keys.into_iter().collect() } }

    pub fn contains(
        &self,
        key: Key,
    ) -> bool {
        self.held.contains(&key)
    }

    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ { self.held.iter().copied() }

    pub fn is_empty(&self) -> bool { self.held.is_empty() }

    /// Events leading from `self` to `desired`: releases first, then presses.
    /// `always_on` is never released.
    pub fn diff(
        &self,
        desired: &InputState,
        always_on: Key,
    ) -> Vec<InputEvent> {
        let releases = self
            .held
            .difference(&desired.held)
            .filter(|&&k| k != always_on)
            .map(|&k| InputEvent::Release(k));
        let presses = desired.held.difference(&self.held).map(|&k| InputEvent::Press(k));
        releases.chain(presses).collect()
    }

    fn apply(
        &mut self,
        event: InputEvent,
    ) {
        match event {
            InputEvent::Press(k) => self.held.insert(k),
            InputEvent::Release(k) => self.held.remove(&k),
        };
    }
}

impl Display for InputState {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{{{}}}", self.held.iter().join(", "))
    }
}

/// Fixed, ordered list of key combinations; the index is the action
#[derive(Debug, Clone, PartialEq)]
pub struct ActionCatalog {
    actions: Vec<BTreeSet<Key>>,
    always_on: Key,
}

impl ActionCatalog {
    /// `always_on` is held during the whole session and gets removed from the entries
    pub fn new(
        actions: Vec<Vec<Key>>,
        always_on: Key,
    ) -> Self {
        assert!(!actions.is_empty(), "empty action catalog");
        Self {
            actions: actions
                .into_iter()
                .map(|keys| keys.into_iter().filter(|&k| k != always_on).collect())
                .collect(),
            always_on,
        }
    }

    pub fn len(&self) -> usize { self.actions.len() }

    pub fn is_empty(&self) -> bool { self.actions.is_empty() }

    pub fn always_on(&self) -> Key { self.always_on }

    /// Keys to hold for `action`, including the always-on key
    pub fn desired_state(
        &self,
        action: ActionIndex,
    ) -> Result<InputState, QlError> {
        let keys = self.actions.get(action).ok_or(QlError::InvalidAction { action, action_space: self.len() })?;
        Ok(InputState::new(keys.iter().copied().chain([self.always_on])))
    }

    pub fn describe(
        &self,
        action: ActionIndex,
    ) -> String {
        match self.actions.get(action) {
            Some(keys) if keys.is_empty() => "none".to_string(),
            Some(keys) => keys.iter().join("+"),
            None => format!("invalid({})", action),
        }
    }
}

/// Brings the game window to the front before keys are sent
pub struct FocusKeeper {
    focus: Box<dyn WindowFocus>,
    title: String,
    settle: Duration,
    /// last window found by title; searched again when missing or when activating it fails
    window: Option<WindowHandle>,
}

impl FocusKeeper {
    pub fn new(
        focus: Box<dyn WindowFocus>,
        title: impl Into<String>,
        settle: Duration,
    ) -> Self {
        Self { focus, title: title.into(), settle, window: None }
    }

    fn lookup(&mut self) -> Option<WindowHandle> {
        self.window = self.focus.find_window(&self.title);
        self.window
    }

    /// Does nothing if the window is active already; a missing window is tolerated
    pub fn ensure_focus(
        &mut self,
        clock: &dyn Clock,
    ) -> Result<()> {
        let cached = self.window.is_some();
        let found = match self.window {
            Some(window) => Some(window),
            None => self.lookup(),
        };
        let Some(window) = found else {
            log::debug!("window '{}' not found - sending input anyway", self.title);
            return Ok(());
        };
        if self.focus.is_active(window) {
            return Ok(());
        }

        log::debug!("activating window '{}'", self.title);
        if let Err(e) = self.focus.activate(window) {
            self.window = None;
            if !cached {
                return Err(e);
            }
            log::debug!("activating {:?} failed ({}) - searching '{}' again", window, e, self.title);
            match self.lookup() {
                Some(found) => self.focus.activate(found)?,
                None => {
                    log::debug!("window '{}' is gone - sending input anyway", self.title);
                    return Ok(());
                }
            }
        }
        clock.sleep(self.settle);
        Ok(())
    }
}

/// Turns action indices into key presses and releases, tracking which keys are held
pub struct ActionMapper {
    catalog: ActionCatalog,
    state: InputState,
    input: Box<dyn InputDevice>,
    focus: FocusKeeper,
    clock: Rc<dyn Clock>,
    frame_interval: Duration,
}

impl ActionMapper {
    /// Presses the always-on key right away
    pub fn new(
        catalog: ActionCatalog,
        input: Box<dyn InputDevice>,
        focus: FocusKeeper,
        clock: Rc<dyn Clock>,
        frame_interval: Duration,
    ) -> Result<Self> {
        let mut mapper = Self {
            catalog,
            state: InputState::default(),
            input,
            focus,
            clock,
            frame_interval,
        };
        mapper.focus.ensure_focus(mapper.clock.as_ref())?;
        mapper.hold_always_on_only()?;
        Ok(mapper)
    }

    pub fn catalog(&self) -> &ActionCatalog { &self.catalog }

    pub fn state(&self) -> &InputState { &self.state }

    pub fn action_space(&self) -> usize { self.catalog.len() }

    pub fn clock(&self) -> &Rc<dyn Clock> { &self.clock }

    pub fn ensure_focus(&mut self) -> Result<()> { self.focus.ensure_focus(self.clock.as_ref()) }

    /// Holds exactly the keys of `action` (plus the always-on key) and waits one frame
    pub fn apply(
        &mut self,
        action: ActionIndex,
    ) -> Result<()> {
        let desired = self.catalog.desired_state(action)?;
        self.ensure_focus()?;
        let events = self.state.diff(&desired, self.catalog.always_on);
        self.emit_all(&events)?;
        log::trace!("action {} ({}) => held {}", action, self.catalog.describe(action), self.state);
        self.clock.sleep(self.frame_interval);
        Ok(())
    }

    pub fn release_all_except_always_on(&mut self) -> Result<()> {
        let always_on = self.catalog.always_on;
        let events = self
            .state
            .keys()
            .filter(|&k| k != always_on)
            .map(InputEvent::Release)
            .collect::<Vec<_>>();
        self.emit_all(&events)
    }

    /// Releases everything including the always-on key
    pub fn full_release(&mut self) -> Result<()> {
        let events = self.state.keys().map(InputEvent::Release).collect::<Vec<_>>();
        self.emit_all(&events)
    }

    /// Releases all other keys and (re-)presses the always-on key
    pub fn hold_always_on_only(&mut self) -> Result<()> {
        self.release_all_except_always_on()?;
        self.emit(InputEvent::Press(self.catalog.always_on))
    }

    /// Press, hold, release, pause
    pub fn tap(
        &mut self,
        key: Key,
        hold: Duration,
        gap: Duration,
    ) -> Result<()> {
        self.emit(InputEvent::Press(key))?;
        self.clock.sleep(hold);
        self.emit(InputEvent::Release(key))?;
        self.clock.sleep(gap);
        Ok(())
    }

    fn emit_all(
        &mut self,
        events: &[InputEvent],
    ) -> Result<()> {
        for &event in events {
            self.emit(event)?;
        }
        Ok(())
    }

    /// The state is updated per event, so it stays truthful when the device fails halfway
    fn emit(
        &mut self,
        event: InputEvent,
    ) -> Result<()> {
        match event {
            InputEvent::Press(k) => self.input.press(k)?,
            InputEvent::Release(k) => self.input.release(k)?,
        }
        self.state.apply(event);
        Ok(())
    }
}

impl Drop for ActionMapper {
    fn drop(&mut self) {
        if self.state.is_empty() {
            return;
        }
        if let Err(e) = self.full_release() {
            log::warn!("failed to release held keys {}: {:#}", self.state, e);
        }
    }
}
