//! Workload cost estimation used to spread sessions across devices.

use tracing::warn;

use crate::profiles::VideoProfile;

/// Estimated cost of encoding one input into `profiles`: the sum of
/// `width * height * framerate` across every rendition.
///
/// Profiles with an unusable resolution contribute nothing. The result
/// saturates at `u64::MAX` instead of overflowing.
pub fn estimate_cost(profiles: &[VideoProfile]) -> u64 {
    profiles
        .iter()
        .map(|profile| match profile.resolution() {
            Ok((width, height)) => u64::from(width)
                .saturating_mul(u64::from(height))
                .saturating_mul(u64::from(profile.framerate)),
            Err(err) => {
                warn!(
                    target: "encpool::cost",
                    profile = %profile.name,
                    error = %err,
                    "skipping profile in cost estimate"
                );
                0
            }
        })
        .fold(0, u64::saturating_add)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_sums_pixel_rate_across_profiles() {
        let profiles = vec![
            VideoProfile::preset("P720p30fps16x9").unwrap(),
            VideoProfile::preset("P240p25fps16x9").unwrap(),
        ];
        assert_eq!(estimate_cost(&profiles), 1280 * 720 * 30 + 426 * 240 * 25);
    }

    #[test]
    fn unresolvable_profiles_contribute_nothing() {
        let profiles = vec![
            VideoProfile::new("broken", "sixteen-by-nine", 30, "1000k"),
            VideoProfile::new("tiny", "2x2", 10, "1k"),
        ];
        assert_eq!(estimate_cost(&profiles), 40);
    }

    #[test]
    fn extreme_resolutions_saturate_instead_of_overflowing() {
        let huge = VideoProfile::new("huge", "4294967295x4294967295", 60, "1k");
        assert_eq!(estimate_cost(std::slice::from_ref(&huge)), u64::MAX);

        let profiles = vec![huge, VideoProfile::preset("P720p30fps16x9").unwrap()];
        assert_eq!(estimate_cost(&profiles), u64::MAX);
    }

    #[test]
    fn empty_request_costs_nothing() {
        assert_eq!(estimate_cost(&[]), 0);
    }
}
