use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::stations::Station;
use crate::tabular::Readings;

/// Columns of a stock blank station file.
pub const DEFAULT_STATION_FIELDS: [&str; 15] = [
    "Station_Name",
    "Coord_Sys",
    "Datum",
    "Lat/YCoord",
    "Lon/XCoord",
    "Height",
    "Height_Units",
    "Speed",
    "Speed_Units",
    "Direction",
    "Temperature",
    "Temperature_Units",
    "Cloud_Cover",
    "Radius_of_Influence",
    "Radius_of_Influence_Units",
];

pub const SPEED_ALIASES: &[&str] = &["Spd", "SPD", "Speed", "WindSpeed", "WSpd"];
pub const DIRECTION_ALIASES: &[&str] = &["Dir", "DIR", "Direction", "WindDir", "WDir"];
pub const TEMPERATURE_ALIASES: &[&str] = &["Temp", "TEMP", "Temperature", "AirTemp", "T"];

#[derive(Error, Debug)]
pub enum StationFileError {
    #[error("Template CSV not found: {0}")]
    TemplateNotFound(PathBuf),

    #[error("Template CSV has no header row: {0}")]
    EmptyTemplate(PathBuf),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// First alias present in `readings` (case-insensitive) that holds a number.
pub fn pick_numeric(readings: Option<&Readings>, candidates: &[&str]) -> Option<f64> {
    let readings = readings?;
    candidates
        .iter()
        .find_map(|name| readings.get(name).flatten())
}

/// Unit tags that go with the tabular `unit` query flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSystem {
    pub speed: &'static str,
    pub temperature: &'static str,
    pub radius: &'static str,
}

impl UnitSystem {
    pub fn from_flag(unit: &str) -> Self {
        if unit == "e" {
            Self {
                speed: "mph",
                temperature: "F",
                radius: "miles",
            }
        } else {
            Self {
                speed: "m/s",
                temperature: "C",
                radius: "km",
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StationRow {
    pub station_name: String,
    pub coord_sys: String,
    pub datum: String,
    pub lat: f64,
    pub lon: f64,
    pub height: f64,
    pub height_units: String,
    pub speed: Option<f64>,
    pub speed_units: String,
    pub direction: Option<f64>,
    pub temperature: Option<f64>,
    pub temperature_units: String,
    pub cloud_cover: Option<i32>,
    pub radius_of_influence: f64,
    pub radius_units: String,
}

impl StationRow {
    /// Row for `station` from its matched readings, if any.
    pub fn from_readings(station: &Station, readings: Option<&Readings>, units: &UnitSystem) -> Self {
        Self {
            station_name: station.code.clone(),
            coord_sys: "GEOGCS".to_string(),
            datum: "WGS84".to_string(),
            lat: station.lat,
            lon: station.lon,
            height: station.height_m,
            height_units: "meters".to_string(),
            speed: pick_numeric(readings, SPEED_ALIASES),
            speed_units: units.speed.to_string(),
            direction: pick_numeric(readings, DIRECTION_ALIASES),
            temperature: pick_numeric(readings, TEMPERATURE_ALIASES),
            temperature_units: units.temperature.to_string(),
            cloud_cover: Some(0),
            radius_of_influence: -1.0,
            radius_units: units.radius.to_string(),
        }
    }

    /// Cell text for a schema field; `None` for fields this row does not know.
    /// Missing measurements are empty strings.
    pub fn field(&self, name: &str) -> Option<String> {
        let cell = match name {
            "Station_Name" => self.station_name.clone(),
            "Coord_Sys" => self.coord_sys.clone(),
            "Datum" => self.datum.clone(),
            "Lat/YCoord" => self.lat.to_string(),
            "Lon/XCoord" => self.lon.to_string(),
            "Height" => self.height.to_string(),
            "Height_Units" => self.height_units.clone(),
            "Speed" => blank_if_none(self.speed),
            "Speed_Units" => self.speed_units.clone(),
            "Direction" => blank_if_none(self.direction),
            "Temperature" => blank_if_none(self.temperature),
            "Temperature_Units" => self.temperature_units.clone(),
            "Cloud_Cover" => blank_if_none(self.cloud_cover),
            "Radius_of_Influence" => self.radius_of_influence.to_string(),
            "Radius_of_Influence_Units" => self.radius_units.clone(),
            _ => return None,
        };
        Some(cell)
    }
}

fn blank_if_none<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Header row of a station file template.
///
/// Column order and names come from the template; unknown columns are
/// written blank.
#[derive(Debug, Clone, PartialEq)]
pub struct StationTemplate {
    fields: Vec<String>,
}

impl StationTemplate {
    pub fn read(path: &Path) -> Result<Self, StationFileError> {
        if !path.exists() {
            return Err(StationFileError::TemplateNotFound(path.to_path_buf()));
        }

        let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
        let fields: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.to_string())
            .filter(|h| !h.is_empty())
            .collect();

        if fields.is_empty() {
            return Err(StationFileError::EmptyTemplate(path.to_path_buf()));
        }

        debug!("Loaded station template with {} fields", fields.len());
        Ok(Self { fields })
    }

    pub fn from_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Write `rows` in template column order, replacing any existing file.
    pub fn write(&self, out_path: &Path, rows: &[StationRow]) -> Result<(), StationFileError> {
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut writer = csv::Writer::from_path(out_path)?;
        writer.write_record(&self.fields)?;
        for row in rows {
            writer.write_record(
                self.fields
                    .iter()
                    .map(|f| row.field(f).unwrap_or_default()),
            )?;
        }
        writer.flush()?;

        debug!("Wrote {} station rows to {}", rows.len(), out_path.display());
        Ok(())
    }
}

impl Default for StationTemplate {
    fn default() -> Self {
        Self::from_fields(DEFAULT_STATION_FIELDS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn station() -> Station {
        Station::new("CAKWS", "Keystone SA - Wind Study", 10.0, 39.56216, -105.91444)
    }

    fn readings() -> Readings {
        Readings::new(vec![
            ("Temp".to_string(), Some(20.0)),
            ("spd".to_string(), None),
            ("WindSpeed".to_string(), Some(12.5)),
            ("DIR".to_string(), Some(270.0)),
        ])
    }

    #[test]
    fn test_pick_numeric_skips_missing_aliases() {
        assert_eq!(pick_numeric(Some(&readings()), SPEED_ALIASES), Some(12.5));
        assert_eq!(pick_numeric(Some(&readings()), DIRECTION_ALIASES), Some(270.0));
        assert_eq!(pick_numeric(Some(&readings()), TEMPERATURE_ALIASES), Some(20.0));
        assert_eq!(pick_numeric(Some(&readings()), &["Gst"]), None);
        assert_eq!(pick_numeric(None, SPEED_ALIASES), None);
    }

    #[test]
    fn test_unmatched_row_has_blank_measurements() {
        let row = StationRow::from_readings(&station(), None, &UnitSystem::from_flag("e"));

        assert_eq!(row.field("Speed"), Some(String::new()));
        assert_eq!(row.field("Direction"), Some(String::new()));
        assert_eq!(row.field("Temperature"), Some(String::new()));
        assert_eq!(row.field("Speed_Units"), Some("mph".to_string()));
        assert_eq!(row.field("Cloud_Cover"), Some("0".to_string()));
        assert_eq!(row.field("Gust"), None);
    }

    #[test]
    fn test_metric_units() {
        let units = UnitSystem::from_flag("m");
        assert_eq!(units.speed, "m/s");
        assert_eq!(units.temperature, "C");
        assert_eq!(units.radius, "km");
    }

    #[test]
    fn test_write_follows_template_order() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("nested").join("stations.csv");
        let template = StationTemplate::from_fields(["Speed", "Station_Name", "Notes", "Direction"]);
        let row = StationRow::from_readings(
            &station(),
            Some(&readings()),
            &UnitSystem::from_flag("e"),
        );

        template.write(&out, &[row]).unwrap();

        let written = fs::read_to_string(&out).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines, vec!["Speed,Station_Name,Notes,Direction", "12.5,CAKWS,,270"]);
    }

    #[test]
    fn test_read_template_header() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", DEFAULT_STATION_FIELDS.join(",")).unwrap();

        let template = StationTemplate::read(file.path()).unwrap();
        assert_eq!(template, StationTemplate::default());
    }

    #[test]
    fn test_read_missing_template() {
        let result = StationTemplate::read(Path::new("/nonexistent/template.csv"));
        assert!(matches!(result, Err(StationFileError::TemplateNotFound(_))));
    }

    #[test]
    fn test_read_empty_template() {
        let file = NamedTempFile::new().unwrap();
        let result = StationTemplate::read(file.path());
        assert!(matches!(result, Err(StationFileError::EmptyTemplate(_))));
    }
}
