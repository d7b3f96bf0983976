//! The predefined region table and the inbound alert delivery rule.

/// Known regions and the evacuation point advisories resolve `{evac}` to.
/// Carried over from the reference system this crate generalizes; a region
/// outside this table is still accepted, just without a known evacuation
/// location.
pub const REGIONS: &[(&str, &str)] = &[
    ("NEW YORK", "Central Park Evacuation Zone"),
    ("LOS ANGELES", "Dodger Stadium Emergency Center"),
    ("CHICAGO", "Grant Park Evacuation Point"),
    ("HOUSTON", "NRG Stadium Emergency Shelter"),
    ("PHOENIX", "Arizona Veterans Memorial Coliseum"),
];

/// Normalize a region tag the way every peer identity does: uppercased,
/// trimmed.
pub fn normalize(region: &str) -> String {
    region.trim().to_uppercase()
}

/// Look up the evacuation location for a known region. Unknown regions
/// return `None` rather than panicking.
pub fn evacuation_location(region: &str) -> Option<&'static str> {
    let region = normalize(region);
    REGIONS
        .iter()
        .find(|(name, _)| *name == region)
        .map(|(_, evac)| *evac)
}

pub fn all_region_names() -> Vec<&'static str> {
    REGIONS.iter().map(|(name, _)| *name).collect()
}

/// Delivery rule for §4.5: a national message, an untargeted message, or a
/// message that names our region is delivered; everything else is dropped
/// silently (the Lamport clock still observes it, but that happens upstream
/// in the dispatcher regardless of this verdict).
pub fn is_relevant(local_region: &str, is_national: bool, target_regions: Option<&[String]>) -> bool {
    if is_national {
        return true;
    }
    match target_regions {
        None => true,
        Some(targets) => {
            let local = normalize(local_region);
            targets.iter().any(|t| normalize(t) == local)
        }
    }
}
