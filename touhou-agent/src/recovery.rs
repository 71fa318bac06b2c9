use std::time::Duration;

use anyhow::Result;

use crate::action_mapper::ActionMapper;
use crate::keys::Key;

/// `repeats` taps of `key`, each held for `hold` and followed by a `gap`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TapSequence {
    pub key: Key,
    pub repeats: usize,
    pub hold: Duration,
    pub gap: Duration,
}

/// Menu navigation from the game-over screen into a fresh game
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryConfig {
    /// wait after releasing the keys, before the first tap
    pub settle: Duration,
    pub sequences: Vec<TapSequence>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        let tap = |key, repeats, secs| TapSequence {
            key,
            repeats,
            hold: Duration::from_secs_f64(secs),
            gap: Duration::from_secs_f64(secs),
        };
        Self {
            settle: Duration::from_millis(500),
            sequences: vec![
                // leave the game-over screen
                tap(Key::Escape, 1, 0.1),
                // "retry" entry
                tap(Key::Down, 2, 0.2),
                // confirm through the menus
                tap(Key::Z, 6, 0.2),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecoveryStep {
    ReleaseHeld,
    Wait(Duration),
    Tap { key: Key, hold: Duration, gap: Duration },
    Focus,
    HoldAlwaysOn,
}

/// Flat, timed list of steps run after a terminal state
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryScript {
    steps: Vec<RecoveryStep>,
}

impl RecoveryScript {
    pub fn new(config: &RecoveryConfig) -> Self {
        let taps = config.sequences.iter().flat_map(|s| {
            (0..s.repeats).map(move |_| RecoveryStep::Tap { key: s.key, hold: s.hold, gap: s.gap })
        });
        let steps = [RecoveryStep::ReleaseHeld, RecoveryStep::Wait(config.settle)]
            .into_iter()
            .chain(taps)
            .chain([RecoveryStep::Focus, RecoveryStep::HoldAlwaysOn])
            .collect();
        Self { steps }
    }

    pub fn steps(&self) -> &[RecoveryStep] { &self.steps }

    /// Total time the script spends waiting
    pub fn duration(&self) -> Duration {
        self.steps
            .iter()
            .map(|step| match step {
                RecoveryStep::Wait(d) => *d,
                RecoveryStep::Tap { hold, gap, .. } => *hold + *gap,
                _ => Duration::ZERO,
            })
            .sum()
    }

    pub fn run(
        &self,
        mapper: &mut ActionMapper,
    ) -> Result<()> {
        log::debug!("running recovery script ({} steps, {:?})", self.steps.len(), self.duration());
        for step in &self.steps {
            match *step {
                RecoveryStep::ReleaseHeld => mapper.release_all_except_always_on()?,
                RecoveryStep::Wait(d) => mapper.clock().sleep(d),
                RecoveryStep::Tap { key, hold, gap } => mapper.tap(key, hold, gap)?,
                RecoveryStep::Focus => mapper.ensure_focus()?,
                RecoveryStep::HoldAlwaysOn => mapper.hold_always_on_only()?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use rstest::rstest;

    use crate::action_mapper::{ActionCatalog, FocusKeeper};
    use crate::keys::InputEvent::{Press, Release};
    use crate::keys::InputEvent;
    use crate::mock::{ManualClock, RecordingInput, StaticWindowFocus};

    use super::*;

    fn mapper(input: RecordingInput) -> ActionMapper {
        ActionMapper::new(
            ActionCatalog::new(vec![vec![], vec![Key::Left, Key::Shift]], Key::Z),
            Box::new(input),
            FocusKeeper::new(Box::new(StaticWindowFocus::always_active()), "game", Duration::ZERO),
            Rc::new(ManualClock::new()),
            Duration::ZERO,
        )
        .unwrap()
    }

    #[test]
    fn test_default_script() {
        let script = RecoveryScript::new(&RecoveryConfig::default());
        assert_eq!(script.steps().len(), 2 + 1 + 2 + 6 + 2);
        assert_eq!(script.steps()[0], RecoveryStep::ReleaseHeld);
        assert_eq!(script.steps()[1], RecoveryStep::Wait(Duration::from_millis(500)));
        assert_eq!(script.steps().last(), Some(&RecoveryStep::HoldAlwaysOn));
        // 0.5 + 0.2 + 2 * 0.4 + 6 * 0.4
        assert!((script.duration().as_secs_f64() - 3.9).abs() < 1e-9);
    }

    #[test]
    fn test_run_emits_menu_sequence() {
        let input = RecordingInput::new();
        let events = input.events();
        let clock = Rc::new(ManualClock::new());
        let mut mapper = ActionMapper::new(
            ActionCatalog::new(vec![vec![], vec![Key::Left, Key::Shift]], Key::Z),
            Box::new(input),
            FocusKeeper::new(Box::new(StaticWindowFocus::always_active()), "game", Duration::ZERO),
            clock.clone(),
            Duration::ZERO,
        )
        .unwrap();
        mapper.apply(1).unwrap();
        events.borrow_mut().clear();

        let script = RecoveryScript::new(&RecoveryConfig::default());
        script.run(&mut mapper).unwrap();

        let mut expected: Vec<InputEvent> = vec![Release(Key::Left), Release(Key::Shift)];
        expected.extend([Press(Key::Escape), Release(Key::Escape)]);
        for _ in 0..2 {
            expected.extend([Press(Key::Down), Release(Key::Down)]);
        }
        for _ in 0..6 {
            expected.extend([Press(Key::Z), Release(Key::Z)]);
        }
        expected.push(Press(Key::Z));

        assert_eq!(*events.borrow(), expected);
        assert_eq!(mapper.state().keys().collect::<Vec<_>>(), vec![Key::Z]);
        assert_eq!(clock.elapsed(), script.duration());
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[case(6)]
    fn test_each_repeat_taps_once(#[case] repeats: usize) {
        let input = RecordingInput::new();
        let events = input.events();
        let mut mapper = mapper(input);
        events.borrow_mut().clear();

        let config = RecoveryConfig {
            sequences: vec![TapSequence { key: Key::X, repeats, hold: Duration::ZERO, gap: Duration::ZERO }],
            ..RecoveryConfig::default()
        };
        RecoveryScript::new(&config).run(&mut mapper).unwrap();

        let presses = events.borrow().iter().filter(|&&e| e == Press(Key::X)).count();
        let releases = events.borrow().iter().filter(|&&e| e == Release(Key::X)).count();
        assert_eq!((presses, releases), (repeats, repeats));
        assert!(!mapper.state().contains(Key::X));
    }
}
