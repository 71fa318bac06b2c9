use std::path::Path;

use anyhow::{Context, Result};

use crate::capture::GrayFrame;

pub const GAME_OVER_FILE: &str = "game_over.png";
pub const SPRITE_FILES: [&str; 3] = ["char1.png", "char2.png", "char3.png"];

/// Reference images the perception matches against, in their original size
#[derive(Debug, Clone)]
pub struct ReferenceImages {
    game_over: GrayFrame,
    sprites: Vec<GrayFrame>,
}

impl ReferenceImages {
    pub fn new(
        game_over: GrayFrame,
        sprites: Vec<GrayFrame>,
    ) -> Self {
        Self { game_over, sprites }
    }

    /// Loads the game-over screen (required) and the player sprite variants (optional) from `dir`
    pub fn load(dir: &Path) -> Result<Self> {
        let game_over_path = dir.join(GAME_OVER_FILE);
        let game_over = load_gray(&game_over_path)
            .with_context(|| format!("game-over reference image {} is required", game_over_path.display()))?;

        let mut sprites = vec![];
        for file in SPRITE_FILES {
            let path = dir.join(file);
            match load_gray(&path) {
                Ok(sprite) => sprites.push(sprite),
                Err(e) => log::warn!("skipping player sprite {}: {:#}", path.display(), e),
            }
        }
        if sprites.is_empty() {
            log::warn!("no player sprites found - player position falls back to the screen center");
        }
        log::info!("loaded game-over reference and {} player sprite(s) from {}", sprites.len(), dir.display());

        Ok(Self { game_over, sprites })
    }

    pub fn game_over(&self) -> &GrayFrame { &self.game_over }

    pub fn sprites(&self) -> &[GrayFrame] { &self.sprites }
}

fn load_gray(path: &Path) -> Result<GrayFrame> {
    let image = image::open(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(image.to_luma8())
}

#[cfg(test)]
mod tests {
    use image::Luma;

    use super::*;

    #[test]
    fn test_load_requires_game_over() {
        let dir = tempfile::tempdir().unwrap();
        GrayFrame::from_pixel(10, 20, Luma([100])).save(dir.path().join("char1.png")).unwrap();
        let error = ReferenceImages::load(dir.path()).unwrap_err();
        assert!(format!("{:#}", error).contains(GAME_OVER_FILE));
    }

    #[test]
    fn test_load_skips_missing_sprites() {
        let dir = tempfile::tempdir().unwrap();
        GrayFrame::from_pixel(40, 30, Luma([10])).save(dir.path().join(GAME_OVER_FILE)).unwrap();
        GrayFrame::from_pixel(12, 24, Luma([200])).save(dir.path().join("char2.png")).unwrap();

        let references = ReferenceImages::load(dir.path()).unwrap();
        assert_eq!(references.game_over().dimensions(), (40, 30));
        assert_eq!(references.sprites().len(), 1);
        assert_eq!(references.sprites()[0].get_pixel(0, 0).0, [200]);
    }
}
