//! Location geocoder — name to coordinates
//!
//! Loads a location table from CSV at startup (name, latitude, longitude)
//! and falls back to a built-in set of barangays and landmarks when the file
//! is missing. Matching is case-insensitive, tolerates "Barangay"/"Brgy"
//! prefixes, and accepts substring containment in either direction.

use std::collections::HashMap;
use std::path::Path;

use tracing::{info, warn};

use crate::types::GeoPoint;

const NAME_PREFIXES: &[&str] = &["barangay ", "brgy. ", "brgy "];

/// Built-in fallback locations (barangays and landmarks).
const FALLBACK_LOCATIONS: &[(&str, f64, f64)] = &[
    ("tumana", 14.6608, 121.1004),
    ("malanday", 14.6653, 121.1023),
    ("concepcion uno", 14.6416, 121.0978),
    ("concepcion dos", 14.6440, 121.0958),
    ("concepcion", 14.6416, 121.0978),
    ("nangka", 14.6568, 121.1107),
    ("sto. nino", 14.6395, 121.0908),
    ("santo nino", 14.6395, 121.0908),
    ("industrial valley", 14.6332, 121.0959),
    ("jesus dela pena", 14.6283, 121.0985),
    ("marikina heights", 14.6350, 121.1080),
    ("parang", 14.6475, 121.0955),
    ("kalumpang", 14.6540, 121.0970),
    ("shoe ave", 14.6380, 121.1010),
    ("shoe avenue", 14.6380, 121.1010),
    ("sta. elena", 14.6490, 121.1060),
    ("santa elena", 14.6490, 121.1060),
    ("barangka", 14.6445, 121.1020),
    ("tanong", 14.6520, 121.0990),
    ("j.p. rizal", 14.6330, 121.0950),
    ("jp rizal", 14.6330, 121.0950),
    ("marcos highway", 14.6310, 121.0990),
    ("sumulong highway", 14.6270, 121.1085),
    ("marikina river", 14.6500, 121.0980),
    ("sss village", 14.6460, 121.1135),
    ("marikina", 14.6507, 121.1029),
];

/// Name → coordinate lookup table.
pub struct Geocoder {
    locations: HashMap<String, GeoPoint>,
}

impl Geocoder {
    /// Load from CSV, merging the built-in fallback set underneath.
    pub fn load(csv_path: &Path) -> Self {
        let mut locations: HashMap<String, GeoPoint> = FALLBACK_LOCATIONS
            .iter()
            .map(|(name, lat, lon)| ((*name).to_string(), GeoPoint::new(*lat, *lon)))
            .collect();

        match std::fs::read_to_string(csv_path) {
            Ok(contents) => {
                let mut loaded = 0;
                for (i, line) in contents.lines().enumerate() {
                    let line = line.trim();
                    if line.is_empty() || (i == 0 && line.to_lowercase().starts_with("name,")) {
                        continue;
                    }
                    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
                    if fields.len() < 3 {
                        continue;
                    }
                    let (Ok(lat), Ok(lon)) = (fields[1].parse(), fields[2].parse()) else {
                        warn!(line = i + 1, "skipping geocoder row with bad coordinates");
                        continue;
                    };
                    locations.insert(fields[0].to_lowercase(), GeoPoint::new(lat, lon));
                    loaded += 1;
                }
                info!(loaded, total = locations.len(), "geocoder locations loaded");
            }
            Err(_) => {
                info!(
                    total = locations.len(),
                    path = %csv_path.display(),
                    "geocoder CSV not found, using built-in locations"
                );
            }
        }

        Self { locations }
    }

    /// Build from the fallback table only (tests, minimal deployments).
    pub fn builtin() -> Self {
        Self {
            locations: FALLBACK_LOCATIONS
                .iter()
                .map(|(name, lat, lon)| ((*name).to_string(), GeoPoint::new(*lat, *lon)))
                .collect(),
        }
    }

    /// Resolve a location name to coordinates.
    pub fn get_coordinates(&self, name: &str) -> Option<GeoPoint> {
        let query = name.trim().to_lowercase();
        if query.is_empty() {
            return None;
        }

        if let Some(point) = self.locations.get(&query) {
            return Some(*point);
        }

        // Strip common prefixes: "Barangay Tumana" -> "tumana"
        for prefix in NAME_PREFIXES {
            if let Some(stripped) = query.strip_prefix(prefix) {
                if let Some(point) = self.locations.get(stripped) {
                    return Some(*point);
                }
            }
        }

        // Substring containment either way, longest key first so
        // "concepcion uno" beats "concepcion"
        let mut keys: Vec<&String> = self.locations.keys().collect();
        keys.sort_by_key(|k| std::cmp::Reverse(k.len()));
        for key in keys {
            if query.contains(key.as_str()) || key.contains(&query) {
                return Some(self.locations[key]);
            }
        }

        None
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_match_case_insensitive() {
        let geocoder = Geocoder::builtin();
        let point = geocoder.get_coordinates("Nangka").unwrap();
        assert!((point.lat - 14.6568).abs() < 1e-6);
    }

    #[test]
    fn prefix_stripping() {
        let geocoder = Geocoder::builtin();
        assert!(geocoder.get_coordinates("Barangay Tumana").is_some());
        assert!(geocoder.get_coordinates("Brgy. Malanday").is_some());
    }

    #[test]
    fn substring_containment() {
        let geocoder = Geocoder::builtin();
        // Query containing a known name
        assert!(geocoder.get_coordinates("flooding near Marcos Highway footbridge").is_some());
    }

    #[test]
    fn longest_key_wins() {
        let geocoder = Geocoder::builtin();
        let uno = geocoder.get_coordinates("Concepcion Uno").unwrap();
        assert!((uno.lat - 14.6416).abs() < 1e-6);
    }

    #[test]
    fn unknown_location_is_none() {
        let geocoder = Geocoder::builtin();
        assert!(geocoder.get_coordinates("Atlantis").is_none());
        assert!(geocoder.get_coordinates("").is_none());
    }

    #[test]
    fn csv_rows_override_builtins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locations.csv");
        std::fs::write(&path, "name,latitude,longitude\nnangka,14.9,121.9\n").unwrap();

        let geocoder = Geocoder::load(&path);
        let point = geocoder.get_coordinates("nangka").unwrap();
        assert!((point.lat - 14.9).abs() < 1e-6);
    }
}
