//! Up-front cost estimation. Prices mirror the endpoint pricing pages and
//! are deliberately coarse; the point is a sanity figure before a run, not
//! an invoice.

use crate::plan::GenerationMode;
use crate::run::Resolution;

const RESOLUTION_COSTS: &[(Resolution, f64)] = &[
    (Resolution::OneK, 0.15),
    (Resolution::TwoK, 0.15),
    (Resolution::FourK, 0.30),
];

const VISION_COST_PER_CAPTION: f64 = 0.002;

/// Flat charge for the planning call, regardless of count.
const PLAN_COST: f64 = 0.02;

#[derive(Debug, Clone, PartialEq)]
pub struct CostEstimate {
    /// Billable image generations (pairs bill two per item).
    pub images: usize,
    pub image_cost: f64,
    pub caption_cost: f64,
    pub plan_cost: f64,
}

impl CostEstimate {
    pub fn total(&self) -> f64 {
        self.image_cost + self.caption_cost + self.plan_cost
    }
}

pub fn image_unit_cost(resolution: Resolution) -> f64 {
    RESOLUTION_COSTS
        .iter()
        .find(|(r, _)| *r == resolution)
        .map(|(_, cost)| *cost)
        .unwrap_or(0.15)
}

/// One caption per item (pairs caption only the END image).
pub fn estimate_run(
    mode: GenerationMode,
    count: usize,
    resolution: Resolution,
    caption: bool,
) -> CostEstimate {
    let images = count * mode.images_per_item();
    let caption_cost = if caption {
        count as f64 * VISION_COST_PER_CAPTION
    } else {
        0.0
    };

    CostEstimate {
        images,
        image_cost: images as f64 * image_unit_cost(resolution),
        caption_cost,
        plan_cost: PLAN_COST,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_resolution_is_priced() {
        for resolution in [Resolution::OneK, Resolution::TwoK, Resolution::FourK] {
            assert!(RESOLUTION_COSTS.iter().any(|(r, _)| *r == resolution));
        }
    }

    #[test]
    fn pair_runs_bill_two_images_per_item() {
        let est = estimate_run(GenerationMode::Pair, 10, Resolution::TwoK, false);
        assert_eq!(est.images, 20);
        assert!((est.image_cost - 3.0).abs() < 1e-9);
        assert_eq!(est.caption_cost, 0.0);
        assert!((est.total() - 3.02).abs() < 1e-9);
    }

    #[test]
    fn captions_add_a_per_item_charge() {
        let est = estimate_run(GenerationMode::Single, 20, Resolution::OneK, true);
        assert_eq!(est.images, 20);
        assert!((est.caption_cost - 0.04).abs() < 1e-9);
        assert!((est.total() - (3.0 + 0.04 + 0.02)).abs() < 1e-9);
    }

    #[test]
    fn four_k_doubles_the_image_price() {
        assert!((image_unit_cost(Resolution::FourK) - 0.30).abs() < 1e-9);
        let low = estimate_run(GenerationMode::Reference, 5, Resolution::OneK, false);
        let high = estimate_run(GenerationMode::Reference, 5, Resolution::FourK, false);
        assert!((high.image_cost - 2.0 * low.image_cost).abs() < 1e-9);
    }
}
