use crate::state::Position;

/// Spherical earth radius used for surface distances, metres.
pub const EARTH_RADIUS_M: f64 = 6_372_795.0;

/// Great-circle surface distance in metres.
///
/// Uses the atan2 form of the spherical law (Vincenty with equal axes), which
/// stays accurate for both metre-scale and antipodal separations. Longitudes
/// are not wrapped at ±180°.
pub fn distance_between(a: Position, b: Position) -> f64 {
    let delta = (a.lon - b.lon).to_radians();
    let (sdlon, cdlon) = (libm::sin(delta), libm::cos(delta));
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let (slat1, clat1) = (libm::sin(lat1), libm::cos(lat1));
    let (slat2, clat2) = (libm::sin(lat2), libm::cos(lat2));

    let x = clat1 * slat2 - slat1 * clat2 * cdlon;
    let y = clat2 * sdlon;
    let numer = libm::sqrt(x * x + y * y);
    let denom = slat1 * slat2 + clat1 * clat2 * cdlon;

    libm::atan2(numer, denom) * EARTH_RADIUS_M
}

/// Outcome of one movement evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Movement {
    pub distance_m: f64,
    pub exceeds: bool,
}

/// Reportability is strictly `distance > threshold`.
pub fn evaluate(current: Position, last_known: Position, threshold_m: f64) -> Movement {
    let distance_m = distance_between(current, last_known);
    Movement {
        distance_m,
        exceeds: distance_m > threshold_m,
    }
}
