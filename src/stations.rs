use serde::Serialize;

/// A weather station the pipeline pulls observations from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Station {
    pub code: String,
    pub name: String,
    pub height_m: f64,
    pub lat: f64,
    pub lon: f64,
}

impl Station {
    pub fn new(code: &str, name: &str, height_m: f64, lat: f64, lon: f64) -> Self {
        Self {
            code: code.to_string(),
            name: name.to_string(),
            height_m,
            lat,
            lon,
        }
    }
}

/// Stations inside the Keystone modeling domain.
pub fn keystone_stations() -> Vec<Station> {
    vec![
        Station::new("CAKWS", "Keystone SA - Wind Study", 10.0, 39.56216, -105.91444),
        Station::new("CAKWP", "Keystone SA - Wapiti", 10.0, 39.54505, -105.91913),
    ]
}

/// Registry stations whose code is in `codes` (case-insensitive), in registry order.
/// An empty filter selects everything.
pub fn select_stations(registry: Vec<Station>, codes: &[String]) -> Vec<Station> {
    if codes.is_empty() {
        return registry;
    }
    registry
        .into_iter()
        .filter(|s| codes.iter().any(|c| c.eq_ignore_ascii_case(&s.code)))
        .collect()
}
