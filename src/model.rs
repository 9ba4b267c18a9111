use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::format::Centiseconds;

/// Sport classification carried by the `Sport` attribute of an activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sport {
    Running,
    Biking,
    #[default]
    Other,
}

impl Sport {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "Running",
            Self::Biking => "Biking",
            Self::Other => "Other",
        }
    }

    /// Exact match on the attribute value; anything unrecognised is `Other`.
    pub fn from_attribute(value: &str) -> Self {
        match value {
            "Running" => Self::Running,
            "Biking" => Self::Biking,
            _ => Self::Other,
        }
    }
}

/// Whether a heart-rate sensor delivered a reading for a track point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorState {
    Present,
    Absent,
}

impl SensorState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Present => "Present",
            Self::Absent => "Absent",
        }
    }

    pub fn from_element(value: &str) -> Option<Self> {
        match value {
            "Present" => Some(Self::Present),
            "Absent" => Some(Self::Absent),
            _ => None,
        }
    }

    pub fn for_heart_rate(heart_rate: Option<u8>) -> Self {
        match heart_rate {
            Some(bpm) if bpm > 0 => Self::Present,
            _ => Self::Absent,
        }
    }
}

/// One logged exercise session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: DateTime<Utc>,
    pub sport: Sport,
    pub laps: Vec<Lap>,
}

/// A lap (`<Lap>`) with its summary statistics and tracks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lap {
    /// Position of the lap inside its activity.
    pub index: usize,
    pub start_time: DateTime<Utc>,
    pub total_time: Centiseconds,
    pub distance_meters: f64,
    pub maximum_speed: Option<f64>,
    pub calories: u16,
    pub average_heart_rate: Option<u8>,
    pub maximum_heart_rate: Option<u8>,
    pub intensity: String,
    pub trigger_method: String,
    pub cadence: Option<u8>,
    pub notes: Option<String>,
    pub tracks: Vec<Track>,
}

impl Lap {
    pub fn end_time(&self) -> DateTime<Utc> {
        self.start_time + self.total_time.as_duration()
    }

    /// All points of the lap, across tracks, in document order.
    pub fn points(&self) -> impl Iterator<Item = &TrackPoint> {
        self.tracks.iter().flat_map(|t| t.points.iter())
    }

    pub fn point_count(&self) -> usize {
        self.tracks.iter().map(|t| t.points.len()).sum()
    }
}

/// A track (`<Track>`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub points: Vec<TrackPoint>,
}

/// A sampled point (`<Trackpoint>`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackPoint {
    pub time: DateTime<Utc>,
    pub position: Option<Position>,
    pub altitude_meters: Option<f64>,
    pub distance_meters: Option<f64>,
    pub heart_rate: Option<u8>,
    pub sensor_state: SensorState,
    pub cadence: Option<u8>,
}

impl TrackPoint {
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            time,
            position: None,
            altitude_meters: None,
            distance_meters: None,
            heart_rate: None,
            sensor_state: SensorState::Absent,
            cadence: None,
        }
    }
}

/// Latitude/longitude in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}
