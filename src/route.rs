use chrono::{DateTime, Utc};
use tracing::debug;

use crate::format::Centiseconds;
use crate::model::{Activity, Lap, Sport, TrackPoint};

/// Read-only view of a decoded activity for consumers that draw or convert it.
/// Each lap is one segment of the route.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityRoute {
    activity: Activity,
}

impl ActivityRoute {
    /// Returns `None` for an activity without laps.
    pub fn new(activity: Activity) -> Option<Self> {
        if activity.laps.is_empty() {
            None
        } else {
            Some(Self { activity })
        }
    }

    pub fn activity(&self) -> &Activity {
        &self.activity
    }

    pub fn into_activity(self) -> Activity {
        self.activity
    }

    pub fn sport(&self) -> Sport {
        self.activity.sport
    }

    /// Activities carry no name in a TCX document.
    pub fn name(&self) -> Option<&str> {
        None
    }

    pub fn total_distance(&self) -> f64 {
        self.activity.laps.iter().map(|l| l.distance_meters).sum()
    }

    pub fn total_time(&self) -> Centiseconds {
        self.activity.laps.iter().map(|l| l.total_time).sum()
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.activity.laps[0].start_time
    }

    pub fn segment_count(&self) -> usize {
        self.activity.laps.len()
    }

    pub fn segment(&self, index: usize) -> Option<&Lap> {
        self.activity.laps.get(index)
    }

    pub fn segments(&self) -> &[Lap] {
        &self.activity.laps
    }

    /// Every point of the activity, in order across laps and tracks.
    pub fn points(&self) -> impl Iterator<Item = &TrackPoint> {
        self.activity.laps.iter().flat_map(|lap| lap.points())
    }
}

/// Wrap decoded activities as routes, dropping those without laps.
pub fn routes_from(activities: Vec<Activity>) -> Vec<ActivityRoute> {
    let total = activities.len();
    let routes: Vec<ActivityRoute> = activities.into_iter().filter_map(ActivityRoute::new).collect();
    if routes.len() < total {
        debug!(skipped = total - routes.len(), "skipped activities without laps");
    }
    routes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Position, SensorState, Track};
    use chrono::{TimeDelta, TimeZone};

    fn point(start: DateTime<Utc>, secs: i64) -> TrackPoint {
        let mut p = TrackPoint::new(start + TimeDelta::seconds(secs));
        p.position = Some(Position {
            latitude: 48.0 + secs as f64 * 1e-4,
            longitude: 2.0,
        });
        p.altitude_meters = Some(35.0);
        p.heart_rate = Some(130);
        p.sensor_state = SensorState::Present;
        p
    }

    fn lap(index: usize, start: DateTime<Utc>, points: Vec<TrackPoint>) -> Lap {
        Lap {
            index,
            start_time: start,
            total_time: Centiseconds(30_000),
            distance_meters: 1_000.0,
            maximum_speed: Some(4.0),
            calories: 70,
            average_heart_rate: Some(130),
            maximum_heart_rate: Some(150),
            intensity: "Active".to_string(),
            trigger_method: "Manual".to_string(),
            cadence: None,
            notes: None,
            tracks: vec![Track { points }],
        }
    }

    fn sample_activity() -> Activity {
        let t0 = Utc.with_ymd_and_hms(2024, 6, 2, 8, 0, 0).unwrap();
        let t1 = t0 + TimeDelta::seconds(300);
        Activity {
            id: t0,
            sport: Sport::Running,
            laps: vec![
                lap(0, t0, vec![point(t0, 0), point(t0, 10)]),
                lap(1, t1, vec![point(t1, 0)]),
            ],
        }
    }

    #[test]
    fn test_route_totals() {
        let route = ActivityRoute::new(sample_activity()).unwrap();
        assert_eq!(route.sport(), Sport::Running);
        assert_eq!(route.name(), None);
        assert!((route.total_distance() - 2_000.0).abs() < 1e-9);
        assert_eq!(route.total_time(), Centiseconds(60_000));
        assert_eq!(route.start_time(), Utc.with_ymd_and_hms(2024, 6, 2, 8, 0, 0).unwrap());
        assert_eq!(route.segment_count(), 2);
        assert_eq!(route.segment(1).map(|l| l.index), Some(1));
        assert!(route.segment(2).is_none());
        assert_eq!(route.segments().len(), 2);
    }

    #[test]
    fn test_points_are_flattened_in_order() {
        let route = ActivityRoute::new(sample_activity()).unwrap();
        let times: Vec<_> = route.points().map(|p| p.time).collect();
        assert_eq!(times.len(), 3);
        assert!(times.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_activity_without_laps_is_skipped() {
        let mut empty = sample_activity();
        empty.laps.clear();
        assert!(ActivityRoute::new(empty.clone()).is_none());

        let routes = routes_from(vec![empty, sample_activity()]);
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].activity().laps.len(), 2);
    }
}
