/// Geometric epsilon decay with a floor: `max(min, start * decay^n)` after `n` decay steps
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpsilonSchedule {
    /// Exploration probability at the start of training
    pub start: f64,
    /// Floor - epsilon never gets below this value
    pub min: f64,
    /// Multiplicative decay rate applied once per episode (0 < decay <= 1)
    pub decay: f64,
}

impl EpsilonSchedule {
    pub fn value_after(
        &self,
        decay_steps: usize,
    ) -> f64 {
        let exponent = i32::try_from(decay_steps).unwrap_or(i32::MAX);
        f64::max(self.min, self.start * self.decay.powi(exponent))
    }
}

impl Default for EpsilonSchedule {
    fn default() -> Self {
        Self {
            start: 1.0,
            min: 0.01,
            decay: 0.995,
        }
    }
}

/// Epsilon value of a running training, advanced once per episode
#[derive(Debug, Clone)]
pub struct Epsilon {
    schedule: EpsilonSchedule,
    decay_steps: usize,
}

impl Epsilon {
    pub fn new(schedule: EpsilonSchedule) -> Self {
        Self { schedule, decay_steps: 0 }
    }

    pub fn value(&self) -> f64 { self.schedule.value_after(self.decay_steps) }

    pub fn decay(&mut self) -> f64 {
        self.decay_steps += 1;
        self.value()
    }
}
