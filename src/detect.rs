use regex::Regex;

use crate::types::DetectedColumns;

/// Explicit column names from the config; each one, when set, bypasses
/// auto-detection for that field.
#[derive(Debug, Clone, Default)]
pub struct ColumnOverrides {
    pub longitude: Option<String>,
    pub latitude: Option<String>,
    pub group: Option<String>,
}

// Ordered by priority: exact tokens first, loose substring matches last.
const LONGITUDE_PATTERNS: &[&str] = &[
    r"^(lon|lng|long|longitude)$",
    r"^x$",
    r"^x[_ ]?coord(inate)?s?$",
    r"^easting$",
    r"(lon|lng)",
];

const LATITUDE_PATTERNS: &[&str] = &[
    r"^(lat|latitude)$",
    r"^y$",
    r"^y[_ ]?coord(inate)?s?$",
    r"^northing$",
    r"lat",
];

const GROUP_PATTERNS: &[&str] = &[
    r"^(group|group[_ ]?id)$",
    r"^(category|categor[iy]a?)$",
    r"^(zone|zona)$",
    r"^(region|cluster|class|type|label)$",
    r"(group|categor|zone|cluster|region)",
];

/// Detection result before the longitude/latitude requirement is enforced.
#[derive(Debug, Clone, Default)]
pub struct Detection {
    pub longitude: Option<String>,
    pub latitude: Option<String>,
    pub group: Option<String>,
}

/// Picks longitude, latitude and group columns from the header row.
///
/// For each field the pattern list is scanned in priority order and, per
/// pattern, headers in file order; the first hit wins. Group detection only
/// considers headers not already claimed as a coordinate column. Purely a
/// function of the header set, so repeated runs agree.
pub fn detect_columns(headers: &[String], overrides: &ColumnOverrides) -> Detection {
    let longitude = overrides
        .longitude
        .clone()
        .or_else(|| find_column(headers, LONGITUDE_PATTERNS, &[]));

    let claimed: Vec<&str> = longitude.iter().map(String::as_str).collect();
    let latitude = overrides
        .latitude
        .clone()
        .or_else(|| find_column(headers, LATITUDE_PATTERNS, &claimed));

    let claimed: Vec<&str> = longitude
        .iter()
        .chain(latitude.iter())
        .map(String::as_str)
        .collect();
    let group = overrides
        .group
        .clone()
        .or_else(|| find_column(headers, GROUP_PATTERNS, &claimed));

    Detection {
        longitude,
        latitude,
        group,
    }
}

impl Detection {
    /// Enforces the coordinate requirement; without longitude and latitude no
    /// row is salvageable.
    pub fn resolve(self) -> Result<DetectedColumns, String> {
        match (self.longitude, self.latitude) {
            (Some(longitude), Some(latitude)) => Ok(DetectedColumns {
                longitude,
                latitude,
                group: self.group,
            }),
            (None, _) => Err("could not detect a longitude column".to_string()),
            (_, None) => Err("could not detect a latitude column".to_string()),
        }
    }
}

fn find_column(headers: &[String], patterns: &[&str], claimed: &[&str]) -> Option<String> {
    for pattern in patterns {
        let re = Regex::new(&format!("(?i){pattern}")).expect("detection pattern compiles");
        for header in headers {
            if claimed.contains(&header.as_str()) {
                continue;
            }
            if re.is_match(header.trim()) {
                return Some(header.clone());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn detects_common_names() {
        let d = detect_columns(
            &headers(&["name", "lng", "lat", "category"]),
            &ColumnOverrides::default(),
        );
        assert_eq!(d.longitude.as_deref(), Some("lng"));
        assert_eq!(d.latitude.as_deref(), Some("lat"));
        assert_eq!(d.group.as_deref(), Some("category"));
    }

    #[test]
    fn detects_xy_and_zone() {
        let d = detect_columns(&headers(&["X", "Y", "Zone"]), &ColumnOverrides::default());
        assert_eq!(d.longitude.as_deref(), Some("X"));
        assert_eq!(d.latitude.as_deref(), Some("Y"));
        assert_eq!(d.group.as_deref(), Some("Zone"));
    }

    #[test]
    fn exact_token_beats_earlier_substring_match() {
        // "colony" contains "lon" but the exact "longitude" header wins even
        // though it comes later in the file.
        let d = detect_columns(
            &headers(&["colony", "longitude", "latitude"]),
            &ColumnOverrides::default(),
        );
        assert_eq!(d.longitude.as_deref(), Some("longitude"));
    }

    #[test]
    fn group_never_claims_a_coordinate_column() {
        // "long_zone" would match the loose group pattern, but it is claimed
        // as the longitude column first.
        let d = detect_columns(
            &headers(&["long_zone", "lat"]),
            &ColumnOverrides::default(),
        );
        assert_eq!(d.longitude.as_deref(), Some("long_zone"));
        assert_eq!(d.group, None);
    }

    #[test]
    fn missing_coordinates_fail_resolution() {
        let d = detect_columns(&headers(&["name", "value"]), &ColumnOverrides::default());
        assert!(d.resolve().is_err());
    }

    #[test]
    fn overrides_win() {
        let overrides = ColumnOverrides {
            longitude: Some("a".to_string()),
            latitude: Some("b".to_string()),
            group: None,
        };
        let d = detect_columns(&headers(&["a", "b", "lon", "lat"]), &overrides);
        assert_eq!(d.longitude.as_deref(), Some("a"));
        assert_eq!(d.latitude.as_deref(), Some("b"));
    }

    #[test]
    fn deterministic_for_fixed_headers() {
        let hs = headers(&["id", "x_coord", "y_coord", "cluster", "note"]);
        let first = detect_columns(&hs, &ColumnOverrides::default());
        for _ in 0..10 {
            let again = detect_columns(&hs, &ColumnOverrides::default());
            assert_eq!(again.longitude, first.longitude);
            assert_eq!(again.latitude, first.latitude);
            assert_eq!(again.group, first.group);
        }
    }
}
