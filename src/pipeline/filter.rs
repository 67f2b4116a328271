//! Suitability predicate for matching images against profiles.

use crate::config::Profile;
use crate::feed::CandidateImage;

/// Decide whether `image` qualifies for `profile`.
///
/// An image qualifies when it is at least as large as the profile's minimum
/// resolution, its aspect ratio is within `tolerance` relative error of the
/// profile's target ratio, and it is not NSFW-flagged content headed for a
/// profile that forbids it.
///
/// The relative error is measured against the profile's target ratio, not the
/// image's.
pub fn is_suitable(
    image: &CandidateImage,
    profile: &Profile,
    is_unsafe: bool,
    tolerance: f64,
) -> bool {
    if image.width == 0 || image.height == 0 {
        return false;
    }
    if image.height < profile.min_height || image.width < profile.min_width {
        return false;
    }
    let ratio_error = (image.aspect_ratio() - profile.aspect_ratio).abs() / profile.aspect_ratio;
    if ratio_error > tolerance {
        return false;
    }
    if is_unsafe && !profile.allow_nsfw {
        return false;
    }
    true
}
