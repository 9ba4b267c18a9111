//! Records supplied by the activity store when exporting an activity.

use std::convert::Infallible;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::format::{Centiseconds, known_cadence, known_heart_rate, semicircles_to_degrees};
use crate::model::{Position, SensorState, Sport, TrackPoint};

/// Summary of a stored activity.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySummary {
    pub id: DateTime<Utc>,
    pub sport: Sport,
}

/// Summary of a stored lap. Heart rates use 0 and cadence 255 for "no reading".
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LapSummary {
    pub start_time: DateTime<Utc>,
    pub total_time: Centiseconds,
    pub total_distance: f64,
    pub max_speed: f64,
    pub calories: u16,
    #[serde(default)]
    pub avg_heart_rate: u8,
    #[serde(default)]
    pub max_heart_rate: u8,
    #[serde(default)]
    pub cadence: Option<u8>,
}

impl LapSummary {
    /// The time range whose points belong to this lap.
    pub fn time_range(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.start_time, self.start_time + self.total_time.as_duration())
    }
}

/// A stored track point, positions in semicircles.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTrackPoint {
    pub time: DateTime<Utc>,
    pub latitude: i32,
    pub longitude: i32,
    pub altitude: f64,
    pub distance: f64,
    #[serde(default)]
    pub heart_rate: u8,
    #[serde(default)]
    pub cadence: u8,
    #[serde(default)]
    pub cadence_valid: bool,
}

impl From<&RawTrackPoint> for TrackPoint {
    fn from(raw: &RawTrackPoint) -> Self {
        let heart_rate = known_heart_rate(raw.heart_rate);
        TrackPoint {
            time: raw.time,
            position: Some(Position {
                latitude: semicircles_to_degrees(raw.latitude),
                longitude: semicircles_to_degrees(raw.longitude),
            }),
            altitude_meters: Some(raw.altitude),
            distance_meters: Some(raw.distance),
            heart_rate,
            sensor_state: SensorState::for_heart_rate(heart_rate),
            cadence: raw.cadence_valid.then_some(raw.cadence).and_then(known_cadence),
        }
    }
}

/// Query access to the stored track points of activities.
pub trait TrackPointSource {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Points of `activity` timed within `start..=end`, in time order.
    fn track_points_in_range(
        &self,
        activity: DateTime<Utc>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawTrackPoint>, Self::Error>;
}

/// Track points of a single activity held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTrackPoints {
    points: Vec<RawTrackPoint>,
}

impl InMemoryTrackPoints {
    pub fn new(mut points: Vec<RawTrackPoint>) -> Self {
        points.sort_by_key(|p| p.time);
        Self { points }
    }
}

impl TrackPointSource for InMemoryTrackPoints {
    type Error = Infallible;

    fn track_points_in_range(
        &self,
        _activity: DateTime<Utc>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawTrackPoint>, Self::Error> {
        Ok(self
            .points
            .iter()
            .filter(|p| p.time >= start && p.time <= end)
            .cloned()
            .collect())
    }
}

/// A complete activity export as handed over by a JavaScript caller.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityExport {
    pub activity: ActivitySummary,
    pub laps: Vec<LapSummary>,
    #[serde(default)]
    pub track_points: Vec<RawTrackPoint>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    fn raw(time: DateTime<Utc>) -> RawTrackPoint {
        RawTrackPoint {
            time,
            latitude: 1 << 29,
            longitude: -(1 << 30),
            altitude: 101.5,
            distance: 12.25,
            heart_rate: 0,
            cadence: 77,
            cadence_valid: false,
        }
    }

    #[test]
    fn test_raw_point_conversion() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let p = TrackPoint::from(&raw(t));
        let pos = p.position.unwrap();
        assert_eq!(pos.latitude, 45.0);
        assert_eq!(pos.longitude, -90.0);
        assert_eq!(p.altitude_meters, Some(101.5));
        assert_eq!(p.distance_meters, Some(12.25));
        assert_eq!(p.heart_rate, None);
        assert_eq!(p.sensor_state, SensorState::Absent);
        assert_eq!(p.cadence, None);

        let mut with_sensors = raw(t);
        with_sensors.heart_rate = 155;
        with_sensors.cadence_valid = true;
        let p = TrackPoint::from(&with_sensors);
        assert_eq!(p.heart_rate, Some(155));
        assert_eq!(p.sensor_state, SensorState::Present);
        assert_eq!(p.cadence, Some(77));

        with_sensors.cadence = 255;
        assert_eq!(TrackPoint::from(&with_sensors).cadence, None);
        with_sensors.cadence = 254;
        assert_eq!(TrackPoint::from(&with_sensors).cadence, Some(254));
    }

    #[test]
    fn test_lap_time_range() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let lap = LapSummary {
            start_time: start,
            total_time: Centiseconds(6_001),
            total_distance: 0.0,
            max_speed: 0.0,
            calories: 0,
            avg_heart_rate: 0,
            max_heart_rate: 0,
            cadence: None,
        };
        let (from, to) = lap.time_range();
        assert_eq!(from, start);
        assert_eq!(to, start + TimeDelta::milliseconds(60_010));
    }

    #[test]
    fn test_in_memory_range_is_inclusive() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let end = start + TimeDelta::seconds(10);
        let source = InMemoryTrackPoints::new(vec![
            raw(end + TimeDelta::seconds(1)),
            raw(end),
            raw(start - TimeDelta::seconds(1)),
            raw(start),
            raw(start + TimeDelta::seconds(5)),
        ]);
        let points = source.track_points_in_range(start, start, end).unwrap();
        let times: Vec<_> = points.iter().map(|p| p.time).collect();
        assert_eq!(times, vec![start, start + TimeDelta::seconds(5), end]);
    }

    #[test]
    fn test_export_deserializes_with_defaults() {
        let json = r#"{
            "activity": {"id": "2024-01-01T12:00:00Z", "sport": "Biking"},
            "laps": [{
                "startTime": "2024-01-01T12:00:00Z",
                "totalTime": 6000,
                "totalDistance": 500.5,
                "maxSpeed": 9.5,
                "calories": 20
            }],
            "trackPoints": [{
                "time": "2024-01-01T12:00:01Z",
                "latitude": 0,
                "longitude": 0,
                "altitude": 3.0,
                "distance": 0.0,
                "heartRate": 110
            }]
        }"#;
        let export: ActivityExport = serde_json::from_str(json).unwrap();
        assert_eq!(export.activity.sport, Sport::Biking);
        assert_eq!(export.laps[0].total_time, Centiseconds(6_000));
        assert_eq!(export.laps[0].avg_heart_rate, 0);
        assert_eq!(export.track_points[0].heart_rate, 110);
        assert!(!export.track_points[0].cadence_valid);
    }
}
