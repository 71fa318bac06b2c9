use std::fmt::{Display, Formatter};
use std::str::FromStr;

use anyhow::{anyhow, Error};

use crate::perception::PerceptionResult;

#[derive(Debug, Clone, PartialEq)]
pub struct SparseReward {
    pub survival: f32,
    pub terminal: f32,
}

impl Default for SparseReward {
    fn default() -> Self { Self { survival: 1.0, terminal: -100.0 } }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShapedReward {
    /// reward for every non-terminal step
    pub base: f32,
    pub terminal: f32,
    /// added when a hit flash was seen
    pub flash_penalty: f32,
    /// penalty per projectile pixel near the player
    pub projectile_penalty: f32,
    /// upper bound of the (positive) proximity penalty
    pub max_proximity_penalty: f32,
}

impl Default for ShapedReward {
    fn default() -> Self {
        Self {
            base: 2.0,
            terminal: -100.0,
            flash_penalty: -10.0,
            projectile_penalty: 1.0 / 255.0,
            max_proximity_penalty: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RewardStrategy {
    Sparse(SparseReward),
    Shaped(ShapedReward),
}

impl Default for RewardStrategy {
    fn default() -> Self { RewardStrategy::Shaped(ShapedReward::default()) }
}

/// Components of a step reward; `total` is their sum
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RewardBreakdown {
    pub base: f32,
    pub flash: f32,
    pub proximity: f32,
    pub total: f32,
}

impl Display for RewardBreakdown {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{:.2} (base: {:.2}, flash: {:.2}, proximity: {:.2})", self.total, self.base, self.flash, self.proximity)
    }
}

impl RewardStrategy {
    /// Whether [PerceptionResult::cues] must be computed for this strategy
    pub fn needs_shaping_cues(&self) -> bool { matches!(self, RewardStrategy::Shaped(_)) }

    pub fn reward(
        &self,
        perception: &PerceptionResult,
    ) -> RewardBreakdown {
        match self {
            RewardStrategy::Sparse(r) => {
                let base = if perception.terminal { r.terminal } else { r.survival };
                RewardBreakdown { base, total: base, ..Default::default() }
            }
            RewardStrategy::Shaped(r) if perception.terminal => {
                RewardBreakdown { base: r.terminal, total: r.terminal, ..Default::default() }
            }
            RewardStrategy::Shaped(r) => {
                let (flash, proximity) = match perception.cues {
                    Some(cues) => (
                        if cues.flash { r.flash_penalty } else { 0.0 },
                        -(cues.projectile_pixels as f32 * r.projectile_penalty).min(r.max_proximity_penalty),
                    ),
                    None => (0.0, 0.0),
                };
                RewardBreakdown { base: r.base, flash, proximity, total: r.base + flash + proximity }
            }
        }
    }
}

impl FromStr for RewardStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sparse" => Ok(RewardStrategy::Sparse(SparseReward::default())),
            "shaped" => Ok(RewardStrategy::Shaped(ShapedReward::default())),
            _ => Err(anyhow!("unknown reward strategy '{}' (expected 'sparse' or 'shaped')", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use crate::perception::{PlayerLocation, ShapingCues};

    use super::*;

    fn perception(
        terminal: bool,
        flash: bool,
        projectile_pixels: u32,
    ) -> PerceptionResult {
        PerceptionResult {
            game_over_score: if terminal { 0.9 } else { 0.1 },
            terminal,
            cues: Some(ShapingCues {
                frame_diff: if flash { 80.0 } else { 1.0 },
                flash,
                player: PlayerLocation { x: 128, y: 128, confidence: 0.0, detected: false },
                projectile_pixels,
            }),
        }
    }

    #[test]
    fn test_shaped_quiet_step_is_exactly_base() {
        let r = RewardStrategy::default().reward(&perception(false, false, 0));
        assert_eq!(r.total, 2.0);
        assert_eq!(r.proximity, 0.0);
    }

    #[rstest]
    #[case(false, 1.0)]
    #[case(true, -100.0)]
    fn test_sparse(
        #[case] terminal: bool,
        #[case] expected: f32,
    ) {
        let strategy: RewardStrategy = "sparse".parse().unwrap();
        assert_eq!(strategy.reward(&perception(terminal, true, 900)).total, expected);
        assert!(!strategy.needs_shaping_cues());
    }

    #[rstest]
    #[case(true, 0, 2.0 - 10.0)]
    #[case(false, 255, 2.0 - 1.0)]
    #[case(false, 10_000, 2.0 - 5.0)]
    #[case(true, 10_000, 2.0 - 10.0 - 5.0)]
    fn test_shaped_penalties(
        #[case] flash: bool,
        #[case] projectile_pixels: u32,
        #[case] expected: f32,
    ) {
        let r = RewardStrategy::default().reward(&perception(false, flash, projectile_pixels));
        assert!((r.total - expected).abs() < 1e-5, "{} != {}", r, expected);
    }

    #[test]
    fn test_shaped_terminal_ignores_cues() {
        assert_eq!(RewardStrategy::default().reward(&perception(true, true, 10_000)).total, -100.0);
    }

    #[test]
    fn test_parse_unknown_strategy() {
        assert!("dense".parse::<RewardStrategy>().is_err());
    }
}
