//! Heuristic reading of the game screen: game-over detection, player location and danger cues.
//!
//! Everything in here is a pure function of observations and reference images.
//! Failing to match (template bigger than the frame, flat images, low scores)
//! degrades to fallbacks and is never an error.

use crate::capture::{resize_to, GrayFrame, Observation};
use crate::templates::ReferenceImages;

#[derive(Debug, Clone, PartialEq)]
pub struct PerceptionConfig {
    /// Minimum game-over template score for a terminal state
    pub game_over_threshold: f32,
    /// Minimum sprite template score to trust a player location
    pub sprite_threshold: f32,
    /// (width, height) the sprite templates are scaled to
    pub sprite_size: (u32, u32),
    /// Mean absolute frame difference above which we assume a hit flash
    pub flash_threshold: f32,
    /// Half edge length of the square around the player searched for projectiles
    pub danger_zone_radius: u32,
    /// Pixels brighter than this count as projectiles
    pub projectile_intensity: u8,
}

impl Default for PerceptionConfig {
    fn default() -> Self {
        Self {
            game_over_threshold: 0.8,
            sprite_threshold: 0.6,
            sprite_size: (10, 20),
            flash_threshold: 50.0,
            danger_zone_radius: 30,
            projectile_intensity: 200,
        }
    }
}

/// Best template position; `x`,`y` is the top-left corner
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemplateMatch {
    pub score: f32,
    pub x: u32,
    pub y: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerLocation {
    /// center of the sprite
    pub x: u32,
    pub y: u32,
    pub confidence: f32,
    /// false if we fell back to the frame center
    pub detected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapingCues {
    pub frame_diff: f32,
    pub flash: bool,
    pub player: PlayerLocation,
    pub projectile_pixels: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerceptionResult {
    pub game_over_score: f32,
    pub terminal: bool,
    /// Only computed when the reward strategy needs them
    pub cues: Option<ShapingCues>,
}

pub struct Perception {
    config: PerceptionConfig,
    game_over: GrayFrame,
    sprites: Vec<GrayFrame>,
}

impl Perception {
    /// Scales the game-over reference to the observation size and the sprites to `config.sprite_size`
    pub fn new(
        config: PerceptionConfig,
        references: &ReferenceImages,
        observation_size: (u32, u32),
    ) -> Self {
        let (width, height) = observation_size;
        let (sprite_width, sprite_height) = config.sprite_size;
        Self {
            game_over: resize_to(references.game_over().clone(), width, height),
            sprites: references
                .sprites()
                .iter()
                .map(|s| resize_to(s.clone(), sprite_width, sprite_height))
                .collect(),
            config,
        }
    }

    pub fn config(&self) -> &PerceptionConfig { &self.config }

    pub fn perceive(
        &self,
        prev: &Observation,
        next: &Observation,
        with_cues: bool,
    ) -> PerceptionResult {
        let game_over_score = match_template(next.frame(), &self.game_over).map_or(0.0, |m| m.score);
        PerceptionResult {
            game_over_score,
            terminal: game_over_score > self.config.game_over_threshold,
            cues: with_cues.then(|| self.shaping_cues(prev, next)),
        }
    }

    pub fn shaping_cues(
        &self,
        prev: &Observation,
        next: &Observation,
    ) -> ShapingCues {
        let frame_diff = mean_abs_diff(prev.frame(), next.frame());
        let player = locate_player(next.frame(), &self.sprites, self.config.sprite_threshold);
        ShapingCues {
            frame_diff,
            flash: frame_diff > self.config.flash_threshold,
            player,
            projectile_pixels: count_bright_pixels(
                next.frame(),
                (player.x, player.y),
                self.config.danger_zone_radius,
                self.config.projectile_intensity,
            ),
        }
    }
}

/// Normalized cross correlation with mean-subtracted template and window (TM_CCOEFF_NORMED).
///
/// Returns the best scoring position or `None` if the template does not fit into the image,
/// is empty or has no variance. Windows without variance are skipped.
pub fn match_template(
    image: &GrayFrame,
    template: &GrayFrame,
) -> Option<TemplateMatch> {
    let (image_width, image_height) = image.dimensions();
    let (template_width, template_height) = template.dimensions();
    if template_width == 0 || template_height == 0 || template_width > image_width || template_height > image_height {
        return None;
    }

    let n = (template_width * template_height) as f64;
    let template_sum: u64 = template.as_raw().iter().map(|&p| p as u64).sum();
    let template_mean = template_sum as f64 / n;
    let template_var = template.as_raw().iter().map(|&p| (p as f64 - template_mean).powi(2)).sum::<f64>();
    if template_var <= f64::EPSILON {
        return None;
    }

    let integral = IntegralImage::new(image);
    let pixels = image.as_raw();
    let stride = image_width as usize;
    let tw = template_width as usize;

    let mut best: Option<TemplateMatch> = None;
    for y in 0..=(image_height - template_height) {
        for x in 0..=(image_width - template_width) {
            let (sum, square_sum) = integral.window_sums(x, y, template_width, template_height);
            let window_var = square_sum as f64 - (sum as f64).powi(2) / n;
            if window_var <= f64::EPSILON {
                continue;
            }

            let mut cross: u64 = 0;
            for (ty, template_row) in template.as_raw().chunks_exact(tw).enumerate() {
                let start = (y as usize + ty) * stride + x as usize;
                let image_row = &pixels[start..start + tw];
                cross += template_row
                    .iter()
                    .zip(image_row)
                    .map(|(&t, &i)| t as u32 * i as u32)
                    .sum::<u32>() as u64;
            }
            // sum((T - mean(T)) * (I - mean(I))) == sum(T * I) - mean(T) * sum(I)
            let covariance = cross as f64 - template_mean * sum as f64;
            let score = (covariance / (template_var * window_var).sqrt()) as f32;

            if best.map_or(true, |b| score > b.score) {
                best = Some(TemplateMatch { score, x, y });
            }
        }
    }
    best
}

/// Summed-area tables of pixel values and squared pixel values
struct IntegralImage {
    width: usize,
    sums: Vec<u64>,
    square_sums: Vec<u64>,
}

impl IntegralImage {
    fn new(image: &GrayFrame) -> Self {
        let (w, h) = (image.width() as usize, image.height() as usize);
        let width = w + 1;
        let mut sums = vec![0_u64; width * (h + 1)];
        let mut square_sums = vec![0_u64; width * (h + 1)];
        for (y, row) in image.as_raw().chunks_exact(w).enumerate() {
            let mut row_sum = 0_u64;
            let mut row_square_sum = 0_u64;
            for (x, &p) in row.iter().enumerate() {
                row_sum += p as u64;
                row_square_sum += (p as u64).pow(2);
                let i = (y + 1) * width + x + 1;
                sums[i] = sums[i - width] + row_sum;
                square_sums[i] = square_sums[i - width] + row_square_sum;
            }
        }
        Self { width, sums, square_sums }
    }

    fn window_sums(
        &self,
        x: u32,
        y: u32,
        w: u32,
        h: u32,
    ) -> (u64, u64) {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + w as usize, y0 + h as usize);
        let area = |table: &[u64]| {
            table[y1 * self.width + x1] + table[y0 * self.width + x0]
                - table[y0 * self.width + x1]
                - table[y1 * self.width + x0]
        };
        (area(&self.sums), area(&self.square_sums))
    }
}

/// Mean absolute pixel difference; 0 for frames of different size
pub fn mean_abs_diff(
    a: &GrayFrame,
    b: &GrayFrame,
) -> f32 {
    if a.dimensions() != b.dimensions() || a.as_raw().is_empty() {
        return 0.0;
    }
    let total: u64 = a.as_raw().iter().zip(b.as_raw()).map(|(&p, &q)| p.abs_diff(q) as u64).sum();
    (total as f64 / a.as_raw().len() as f64) as f32
}

/// Best match among the sprite variants; the frame center when none scores above `threshold`
pub fn locate_player(
    frame: &GrayFrame,
    sprites: &[GrayFrame],
    threshold: f32,
) -> PlayerLocation {
    let best = sprites
        .iter()
        .filter_map(|sprite| match_template(frame, sprite).map(|m| (m, sprite.dimensions())))
        .fold(None, |best: Option<(TemplateMatch, (u32, u32))>, candidate| match best {
            Some(b) if b.0.score >= candidate.0.score => Some(b),
            _ => Some(candidate),
        });

    match best {
        Some((m, (w, h))) if m.score > threshold => PlayerLocation {
            x: m.x + w / 2,
            y: m.y + h / 2,
            confidence: m.score,
            detected: true,
        },
        _ => PlayerLocation {
            x: frame.width() / 2,
            y: frame.height() / 2,
            confidence: best.map_or(0.0, |(m, _)| m.score),
            detected: false,
        },
    }
}

/// Number of pixels brighter than `intensity` in the square of half size `radius` around `center`,
/// clipped to the frame
pub fn count_bright_pixels(
    frame: &GrayFrame,
    center: (u32, u32),
    radius: u32,
    intensity: u8,
) -> u32 {
    let (cx, cy) = center;
    let x_range = cx.saturating_sub(radius)..(cx + radius).min(frame.width());
    let y_range = cy.saturating_sub(radius)..(cy + radius).min(frame.height());
    y_range
        .flat_map(|y| x_range.clone().map(move |x| (x, y)))
        .filter(|&(x, y)| frame.get_pixel(x, y).0[0] > intensity)
        .count() as u32
}

#[cfg(test)]
mod tests {
    use image::Luma;
    use rand::rngs::StdRng;
    use rstest::rstest;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn noise(
        width: u32,
        height: u32,
        seed: u64,
    ) -> GrayFrame {
        let mut rng = StdRng::seed_from_u64(seed);
        GrayFrame::from_fn(width, height, |_, _| Luma([rng.gen_range(0..120)]))
    }

    fn crop(
        frame: &GrayFrame,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> GrayFrame {
        image::imageops::crop_imm(frame, x, y, width, height).to_image()
    }

    #[test]
    fn test_match_finds_exact_position() {
        let image = noise(40, 30, 1);
        let template = crop(&image, 17, 9, 6, 8);
        let m = match_template(&image, &template).unwrap();
        assert_eq!((m.x, m.y), (17, 9));
        assert!((m.score - 1.0).abs() < 1e-4, "score {}", m.score);
    }

    #[test]
    fn test_match_is_brightness_invariant() {
        let image = noise(20, 20, 2);
        let brighter = GrayFrame::from_fn(20, 20, |x, y| Luma([image.get_pixel(x, y).0[0] + 100]));
        let m = match_template(&brighter, &image).unwrap();
        assert!((m.score - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_match_degrades_gracefully() {
        let image = noise(10, 10, 3);
        assert_eq!(match_template(&image, &noise(11, 10, 4)), None);
        assert_eq!(match_template(&image, &GrayFrame::from_pixel(3, 3, Luma([9]))), None);
        assert_eq!(match_template(&GrayFrame::from_pixel(10, 10, Luma([9])), &noise(3, 3, 5)), None);
    }

    #[test]
    fn test_locate_player() {
        let mut frame = noise(64, 64, 6);
        let sprite = GrayFrame::from_fn(10, 20, |x, y| Luma([if (x + y) % 3 == 0 { 250 } else { 130 }]));
        image::imageops::replace(&mut frame, &sprite, 30, 12);

        let located = locate_player(&frame, &[noise(10, 20, 7), sprite], 0.6);
        assert!(located.detected);
        assert_eq!((located.x, located.y), (35, 22));

        let fallback = locate_player(&noise(64, 64, 8), &[noise(10, 20, 9)], 0.6);
        assert!(!fallback.detected);
        assert_eq!((fallback.x, fallback.y), (32, 32));

        let no_sprites = locate_player(&frame, &[], 0.6);
        assert_eq!((no_sprites.x, no_sprites.y, no_sprites.confidence), (32, 32, 0.0));
    }

    #[test]
    fn test_count_bright_pixels_clips_to_frame() {
        let frame = GrayFrame::from_pixel(50, 50, Luma([255]));
        assert_eq!(count_bright_pixels(&frame, (25, 25), 5, 200), 100);
        // corner: only the inner quarter of the square exists
        assert_eq!(count_bright_pixels(&frame, (0, 0), 5, 200), 25);
        assert_eq!(count_bright_pixels(&frame, (25, 25), 5, 255), 0);
    }

    #[test]
    fn test_mean_abs_diff() {
        let a = GrayFrame::from_pixel(4, 4, Luma([10]));
        let b = GrayFrame::from_pixel(4, 4, Luma([200]));
        assert_eq!(mean_abs_diff(&a, &b), 190.0);
        assert_eq!(mean_abs_diff(&b, &a), 190.0);
        assert_eq!(mean_abs_diff(&a, &GrayFrame::new(2, 2)), 0.0);
    }

    #[test]
    fn test_perceive_game_over() {
        let game_over = noise(32, 32, 10);
        let references = ReferenceImages::new(game_over.clone(), vec![]);
        let perception = Perception::new(PerceptionConfig::default(), &references, (32, 32));
        let running = Observation::new(noise(32, 32, 11));

        let terminal = perception.perceive(&running, &Observation::new(game_over), false);
        assert!(terminal.terminal);
        assert_eq!(terminal.cues, None);

        let result = perception.perceive(&running, &running, true);
        assert!(!result.terminal);
        let cues = result.cues.unwrap();
        assert_eq!(cues.frame_diff, 0.0);
        assert!(!cues.flash);
        assert!(!cues.player.detected);
    }

    #[rstest]
    #[case(49, false)]
    #[case(50, false)]
    #[case(51, true)]
    fn test_flash_needs_diff_above_threshold(
        #[case] brightness: u8,
        #[case] flash: bool,
    ) {
        let references = ReferenceImages::new(noise(8, 8, 12), vec![]);
        let perception = Perception::new(PerceptionConfig::default(), &references, (16, 16));
        let dark = Observation::new(GrayFrame::new(16, 16));
        let lit = Observation::new(GrayFrame::from_pixel(16, 16, Luma([brightness])));

        let cues = perception.shaping_cues(&dark, &lit);
        assert_eq!(cues.frame_diff, brightness as f32);
        assert_eq!(cues.flash, flash);
    }
}
