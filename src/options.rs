use serde::Deserialize;

use crate::model::Sport;

/// Options for activity to GeoJSON conversion.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertOptions {
    /// Include altitude as the 3rd coordinate value (default: true)
    #[serde(default = "default_true")]
    pub include_elevation: bool,

    /// Include timestamps in coordinateProperties.times (default: true)
    #[serde(default = "default_true")]
    pub include_time: bool,

    /// Include heart rates in coordinateProperties.heartRates (default: true)
    #[serde(default = "default_true")]
    pub include_heart_rate: bool,

    /// Include lap statistics in properties (default: true)
    #[serde(default = "default_true")]
    pub include_metadata: bool,

    /// Join the laps of an activity into a single MultiLineString (default: false)
    #[serde(default)]
    pub join_laps: bool,

    /// Which sports to convert (default: all)
    #[serde(default)]
    pub sports: Option<Vec<Sport>>,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            include_elevation: true,
            include_time: true,
            include_heart_rate: true,
            include_metadata: true,
            join_laps: false,
            sports: None,
        }
    }
}

impl ConvertOptions {
    pub fn should_include(&self, sport: Sport) -> bool {
        match &self.sports {
            None => true,
            Some(sports) => sports.contains(&sport),
        }
    }
}

fn default_true() -> bool {
    true
}
