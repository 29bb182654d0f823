//! Synthetic parking-lot scene for `stub://` sources.
//!
//! Pavement is a flat gray with low seeded noise, generated once. Vehicles are
//! drawn as dark/bright vertical stripes inset into spot rectangles, which the
//! preprocessor turns into dense foreground. Each spot's vehicle arrives and
//! leaves on a fixed frame period with a per-spot phase, so a run exercises
//! both transitions. Output is a pure function of (config, frame index).

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::frame::BgrFrame;
use crate::spots::{Spot, SpotLayout};

const PAVEMENT: u8 = 150;
const PAVEMENT_NOISE: i16 = 3;
const STRIPE_DARK: [u8; 3] = [30, 30, 30];
const STRIPE_BRIGHT: [u8; 3] = [200, 200, 200];
const STRIPE_WIDTH: u32 = 6;
const VEHICLE_INSET: u32 = 5;

#[derive(Clone, Debug)]
pub struct SceneConfig {
    pub width: u32,
    pub height: u32,
    /// Rectangles vehicles park in.
    pub bays: Vec<Spot>,
    /// Frames a vehicle stays (and a bay stays empty).
    pub period: u64,
    /// Frames before the scene reports end of stream. `None` runs forever.
    pub length: Option<u64>,
    pub seed: u64,
}

impl SceneConfig {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bays: Vec::new(),
            period: 60,
            length: None,
            seed: 0x5eed,
        }
    }

    pub fn with_layout(mut self, layout: &SpotLayout) -> Self {
        self.bays = layout.spots().to_vec();
        self
    }
}

pub struct SyntheticScene {
    config: SceneConfig,
    pavement: BgrFrame,
}

impl SyntheticScene {
    pub fn new(config: SceneConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let pixels = config.width as usize * config.height as usize;
        let mut data = Vec::with_capacity(pixels * 3);
        for _ in 0..pixels {
            let noise = rng.gen_range(-PAVEMENT_NOISE..=PAVEMENT_NOISE);
            let v = (PAVEMENT as i16 + noise) as u8;
            data.extend_from_slice(&[v, v, v]);
        }
        let pavement = BgrFrame::new(data, config.width, config.height);
        Self { config, pavement }
    }

    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    /// Whether bay `index` (0-based) holds a vehicle on frame `frame_index`.
    pub fn is_parked(&self, index: usize, frame_index: u64) -> bool {
        let period = self.config.period.max(1);
        let phase = (index as u64 * period) / 2;
        ((frame_index + phase) / period) % 2 == 0
    }

    /// Render frame `frame_index` (0-based).
    pub fn render(&self, frame_index: u64) -> BgrFrame {
        let mut frame = self.pavement.clone();
        for (index, bay) in self.config.bays.iter().enumerate() {
            if self.is_parked(index, frame_index) {
                draw_vehicle(&mut frame, bay);
            }
        }
        frame
    }

    /// True once `frame_index` is past the configured length.
    pub fn is_exhausted(&self, frame_index: u64) -> bool {
        self.config.length.is_some_and(|len| frame_index >= len)
    }
}

/// Bays that do not fit inside the frame are left empty; the layout check
/// reports them.
fn draw_vehicle(frame: &mut BgrFrame, bay: &Spot) {
    let fits = bay.x.checked_add(bay.width).is_some_and(|r| r <= frame.width)
        && bay.y.checked_add(bay.height).is_some_and(|b| b <= frame.height);
    if !fits {
        return;
    }
    let x0 = bay.x + VEHICLE_INSET;
    let y0 = bay.y + VEHICLE_INSET;
    let w = bay.width.saturating_sub(2 * VEHICLE_INSET);
    let h = bay.height.saturating_sub(2 * VEHICLE_INSET);
    let mut x = 0;
    while x < w {
        let band = STRIPE_WIDTH.min(w - x);
        let color = if (x / STRIPE_WIDTH) % 2 == 0 {
            STRIPE_DARK
        } else {
            STRIPE_BRIGHT
        };
        frame.fill_rect(x0 + x, y0, band, h, color);
        x += band;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluate::SpotEvaluator;
    use crate::preprocess::Preprocessor;
    use crate::spots::SpotSize;
    use crate::OccupancyStatus;

    fn scene() -> SyntheticScene {
        let layout = SpotLayout::from_positions(&[(20, 40), (180, 40)], SpotSize::default());
        SyntheticScene::new(SceneConfig {
            period: 4,
            ..SceneConfig::new(320, 120).with_layout(&layout)
        })
    }

    #[test]
    fn rendering_is_deterministic() {
        let a = scene();
        let b = scene();
        assert_eq!(a.render(3), b.render(3));
        assert!(a.render(0).validate().is_ok());
    }

    #[test]
    fn bays_toggle_with_phase() {
        let s = scene();
        let first: Vec<bool> = (0..8).map(|f| s.is_parked(0, f)).collect();
        assert_eq!(first, vec![true, true, true, true, false, false, false, false]);
        // Second bay is offset by half a period.
        let second: Vec<bool> = (0..8).map(|f| s.is_parked(1, f)).collect();
        assert_eq!(second, vec![true, true, false, false, false, false, true, true]);
    }

    #[test]
    fn parked_vehicle_classifies_occupied() -> anyhow::Result<()> {
        let s = scene();
        let layout = SpotLayout::from_positions(&[(20, 40), (180, 40)], SpotSize::default());
        let preprocessor = Preprocessor::default();
        let evaluator = SpotEvaluator::default();

        // Frame 2: bay 0 parked, bay 1 empty.
        let mask = preprocessor.transform(&s.render(2))?;
        let eval = evaluator.evaluate(&mask, layout.spots())?;
        assert_eq!(eval.classifications[0].status, OccupancyStatus::Occupied);
        assert_eq!(eval.classifications[1].status, OccupancyStatus::Free);
        assert_eq!(eval.classifications[1].foreground, 0);
        Ok(())
    }

    #[test]
    fn bays_outside_the_frame_stay_empty() {
        let layout = SpotLayout::from_positions(
            &[(u32::MAX - 2, 10), (10, u32::MAX), (300, 40)],
            SpotSize::default(),
        );
        let s = SyntheticScene::new(SceneConfig {
            period: 4,
            ..SceneConfig::new(320, 120).with_layout(&layout)
        });
        assert!(s.is_parked(0, 0));
        assert_eq!(s.render(0), s.pavement);
    }

    #[test]
    fn length_bounds_the_stream() {
        let s = SyntheticScene::new(SceneConfig {
            length: Some(5),
            ..SceneConfig::new(16, 16)
        });
        assert!(!s.is_exhausted(4));
        assert!(s.is_exhausted(5));
    }
}
