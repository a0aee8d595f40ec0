use crate::geo::distance_km;
use crate::types::Position;

/// Whether the latest position is on a recognised route relative to the
/// cached recent track.
///
/// `history` must exclude the latest reading itself (the pipeline splits the
/// cache contents before calling). The vehicle is on-route if any historical
/// position lies within `threshold_km` of the latest position. An empty
/// history reads as on-route: a fresh device has no track to deviate from,
/// and alarming on first contact would be a false positive.
pub fn is_on_route(history: &[Position], latest: Position, threshold_km: f64) -> bool {
    if history.is_empty() {
        return true;
    }

    history
        .iter()
        .any(|p| distance_km(*p, latest) <= threshold_km)
}
