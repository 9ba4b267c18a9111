use geojson::{Feature, FeatureCollection, Geometry, Value};
use serde_json::{Map, Value as JsonValue};

use crate::format::format_timestamp;
use crate::model::{Lap, TrackPoint};
use crate::options::ConvertOptions;
use crate::route::ActivityRoute;

/// Convert decoded activities to a GeoJSON FeatureCollection.
pub fn to_feature_collection(routes: &[ActivityRoute], opts: &ConvertOptions) -> FeatureCollection {
    let mut features = Vec::new();

    for route in routes {
        if !opts.should_include(route.sport()) {
            continue;
        }
        if opts.join_laps {
            features.extend(joined_feature(route, opts));
        } else {
            features.extend(
                route
                    .segments()
                    .iter()
                    .filter_map(|lap| lap_to_feature(route, lap, opts)),
            );
        }
    }

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

/// Points of a lap that carry a position. Others cannot be drawn.
fn positioned<'a>(points: impl Iterator<Item = &'a TrackPoint>) -> Vec<&'a TrackPoint> {
    points.filter(|p| p.position.is_some()).collect()
}

fn lap_to_feature(route: &ActivityRoute, lap: &Lap, opts: &ConvertOptions) -> Option<Feature> {
    let points = positioned(lap.points());

    let mut props = base_props(route);
    props.insert("lapIndex".to_string(), JsonValue::Number(lap.index.into()));
    if opts.include_metadata {
        insert_lap_metadata(&mut props, lap);
    }

    match points.as_slice() {
        [] => None,
        [single] => Some(single_point_feature(single, props, opts)),
        _ => {
            let coords = line_coords(&points, opts.include_elevation);
            let mut coord_props = Map::new();
            if opts.include_time {
                coord_props.insert("times".to_string(), times(&points));
            }
            if opts.include_heart_rate {
                if let Some(rates) = heart_rates(&points) {
                    coord_props.insert("heartRates".to_string(), rates);
                }
            }
            insert_coordinate_props(&mut props, coord_props);
            Some(feature(Value::LineString(coords), props))
        }
    }
}

fn joined_feature(route: &ActivityRoute, opts: &ConvertOptions) -> Option<Feature> {
    let laps: Vec<Vec<&TrackPoint>> = route
        .segments()
        .iter()
        .map(|lap| positioned(lap.points()))
        .filter(|points| !points.is_empty())
        .collect();

    let mut props = base_props(route);
    if opts.include_metadata {
        props.insert("lapCount".to_string(), JsonValue::Number(route.segment_count().into()));
        props.insert(
            "startTime".to_string(),
            JsonValue::String(format_timestamp(&route.start_time())),
        );
        props.insert(
            "totalTimeSeconds".to_string(),
            json_number(route.total_time().as_seconds()),
        );
        props.insert(
            "totalDistanceMeters".to_string(),
            json_number(route.total_distance()),
        );
    }

    // A lone positioned point across the whole activity
    if let [only] = laps.as_slice() {
        if let [single] = only.as_slice() {
            return Some(single_point_feature(single, props, opts));
        }
    }

    let lines: Vec<&Vec<&TrackPoint>> = laps.iter().filter(|points| points.len() >= 2).collect();
    if lines.is_empty() {
        return None;
    }

    let coords = lines
        .iter()
        .map(|points| line_coords(points, opts.include_elevation))
        .collect();

    let mut coord_props = Map::new();
    if opts.include_time {
        let all_times = lines.iter().map(|points| times(points)).collect();
        coord_props.insert("times".to_string(), JsonValue::Array(all_times));
    }
    if opts.include_heart_rate {
        let all_rates: Vec<Option<JsonValue>> = lines.iter().map(|points| heart_rates(points)).collect();
        if all_rates.iter().any(Option::is_some) {
            let all_rates = all_rates
                .into_iter()
                .zip(&lines)
                .map(|(rates, points)| {
                    rates.unwrap_or_else(|| JsonValue::Array(vec![JsonValue::Null; points.len()]))
                })
                .collect();
            coord_props.insert("heartRates".to_string(), JsonValue::Array(all_rates));
        }
    }
    insert_coordinate_props(&mut props, coord_props);

    Some(feature(Value::MultiLineString(coords), props))
}

fn single_point_feature(
    point: &TrackPoint,
    mut props: Map<String, JsonValue>,
    opts: &ConvertOptions,
) -> Feature {
    if opts.include_time {
        props.insert("time".to_string(), JsonValue::String(format_timestamp(&point.time)));
    }
    if opts.include_heart_rate {
        if let Some(bpm) = point.heart_rate {
            props.insert("heartRate".to_string(), JsonValue::Number(bpm.into()));
        }
    }
    feature(Value::Point(point_coords(point, opts.include_elevation)), props)
}

fn feature(value: Value, props: Map<String, JsonValue>) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(Geometry::new(value)),
        id: None,
        properties: Some(props),
        foreign_members: None,
    }
}

fn base_props(route: &ActivityRoute) -> Map<String, JsonValue> {
    let mut props = Map::new();
    props.insert(
        "sport".to_string(),
        JsonValue::String(route.sport().as_str().to_string()),
    );
    props.insert(
        "activityId".to_string(),
        JsonValue::String(format_timestamp(&route.activity().id)),
    );
    props
}

fn insert_lap_metadata(props: &mut Map<String, JsonValue>, lap: &Lap) {
    props.insert("startTime".to_string(), JsonValue::String(format_timestamp(&lap.start_time)));
    props.insert("totalTimeSeconds".to_string(), json_number(lap.total_time.as_seconds()));
    props.insert("distanceMeters".to_string(), json_number(lap.distance_meters));
    props.insert("calories".to_string(), JsonValue::Number(lap.calories.into()));
    props.insert("intensity".to_string(), JsonValue::String(lap.intensity.clone()));
    props.insert("triggerMethod".to_string(), JsonValue::String(lap.trigger_method.clone()));
    if let Some(speed) = lap.maximum_speed {
        props.insert("maximumSpeed".to_string(), json_number(speed));
    }
    if let Some(bpm) = lap.average_heart_rate {
        props.insert("averageHeartRate".to_string(), JsonValue::Number(bpm.into()));
    }
    if let Some(bpm) = lap.maximum_heart_rate {
        props.insert("maximumHeartRate".to_string(), JsonValue::Number(bpm.into()));
    }
    if let Some(cadence) = lap.cadence {
        props.insert("cadence".to_string(), JsonValue::Number(cadence.into()));
    }
    if let Some(notes) = &lap.notes {
        props.insert("notes".to_string(), JsonValue::String(notes.clone()));
    }
}

/// Build [lon, lat] or [lon, lat, ele] coordinate array.
fn point_coords(point: &TrackPoint, include_elevation: bool) -> Vec<f64> {
    let (lat, lon) = point
        .position
        .map(|p| (p.latitude, p.longitude))
        .unwrap_or_default();
    match (include_elevation, point.altitude_meters) {
        (true, Some(ele)) => vec![lon, lat, ele],
        _ => vec![lon, lat],
    }
}

fn line_coords(points: &[&TrackPoint], include_elevation: bool) -> Vec<Vec<f64>> {
    points.iter().map(|p| point_coords(p, include_elevation)).collect()
}

fn times(points: &[&TrackPoint]) -> JsonValue {
    JsonValue::Array(
        points
            .iter()
            .map(|p| JsonValue::String(format_timestamp(&p.time)))
            .collect(),
    )
}

/// Heart rate per point, or `None` when no point has one.
fn heart_rates(points: &[&TrackPoint]) -> Option<JsonValue> {
    if points.iter().all(|p| p.heart_rate.is_none()) {
        return None;
    }
    Some(JsonValue::Array(
        points
            .iter()
            .map(|p| match p.heart_rate {
                Some(bpm) => JsonValue::Number(bpm.into()),
                None => JsonValue::Null,
            })
            .collect(),
    ))
}

fn insert_coordinate_props(props: &mut Map<String, JsonValue>, coord_props: Map<String, JsonValue>) {
    if !coord_props.is_empty() {
        props.insert(
            "coordinateProperties".to_string(),
            JsonValue::Object(coord_props),
        );
    }
}

/// Non-finite values have no JSON representation and become null.
fn json_number(value: f64) -> JsonValue {
    serde_json::Number::from_f64(value)
        .map(JsonValue::Number)
        .unwrap_or(JsonValue::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::decode;
    use crate::model::Sport;
    use crate::route::routes_from;

    const TWO_LAPS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<TrainingCenterDatabase xmlns="http://www.garmin.com/xmlschemas/TrainingCenterDatabase/v2">
  <Activities>
    <Activity Sport="Biking">
      <Id>2025-01-01T00:00:00Z</Id>
      <Lap StartTime="2025-01-01T00:00:00Z">
        <TotalTimeSeconds>60</TotalTimeSeconds>
        <DistanceMeters>400</DistanceMeters>
        <Calories>10</Calories>
        <AverageHeartRateBpm><Value>120</Value></AverageHeartRateBpm>
        <Intensity>Active</Intensity>
        <TriggerMethod>Manual</TriggerMethod>
        <Track>
          <Trackpoint>
            <Time>2025-01-01T00:00:00Z</Time>
            <Position><LatitudeDegrees>35.0</LatitudeDegrees><LongitudeDegrees>139.0</LongitudeDegrees></Position>
            <AltitudeMeters>12.5</AltitudeMeters>
            <HeartRateBpm><Value>118</Value></HeartRateBpm>
          </Trackpoint>
          <Trackpoint>
            <Time>2025-01-01T00:00:30Z</Time>
          </Trackpoint>
          <Trackpoint>
            <Time>2025-01-01T00:01:00Z</Time>
            <Position><LatitudeDegrees>35.001</LatitudeDegrees><LongitudeDegrees>139.001</LongitudeDegrees></Position>
            <AltitudeMeters>13</AltitudeMeters>
          </Trackpoint>
        </Track>
      </Lap>
      <Lap StartTime="2025-01-01T00:01:00Z">
        <TotalTimeSeconds>30</TotalTimeSeconds>
        <DistanceMeters>150</DistanceMeters>
        <Calories>4</Calories>
        <Intensity>Resting</Intensity>
        <TriggerMethod>Distance</TriggerMethod>
        <Track>
          <Trackpoint>
            <Time>2025-01-01T00:01:30Z</Time>
            <Position><LatitudeDegrees>35.002</LatitudeDegrees><LongitudeDegrees>139.002</LongitudeDegrees></Position>
          </Trackpoint>
        </Track>
      </Lap>
    </Activity>
  </Activities>
</TrainingCenterDatabase>"#;

    fn routes() -> Vec<ActivityRoute> {
        routes_from(decode(TWO_LAPS.as_bytes()).unwrap())
    }

    #[test]
    fn test_one_feature_per_lap() {
        let fc = to_feature_collection(&routes(), &ConvertOptions::default());
        assert_eq!(fc.features.len(), 2);

        let first = &fc.features[0];
        match &first.geometry.as_ref().unwrap().value {
            Value::LineString(coords) => {
                // The point without position is skipped
                assert_eq!(coords.len(), 2);
                assert_eq!(coords[0], vec![139.0, 35.0, 12.5]);
                assert_eq!(coords[1], vec![139.001, 35.001, 13.0]);
            }
            _ => panic!("Expected LineString geometry"),
        }

        let props = first.properties.as_ref().unwrap();
        assert_eq!(props["sport"], "Biking");
        assert_eq!(props["activityId"], "2025-01-01T00:00:00.000Z");
        assert_eq!(props["lapIndex"], 0);
        assert_eq!(props["distanceMeters"], 400.0);
        assert_eq!(props["averageHeartRate"], 120);
        assert!(props.get("maximumHeartRate").is_none());

        let coord_props = props["coordinateProperties"].as_object().unwrap();
        let times = coord_props["times"].as_array().unwrap();
        assert_eq!(times[1], "2025-01-01T00:01:00.000Z");
        let rates = coord_props["heartRates"].as_array().unwrap();
        assert_eq!(rates[0], 118);
        assert!(rates[1].is_null());
    }

    #[test]
    fn test_single_point_lap_is_point() {
        let fc = to_feature_collection(&routes(), &ConvertOptions::default());
        let second = &fc.features[1];
        match &second.geometry.as_ref().unwrap().value {
            // No altitude on this point
            Value::Point(coords) => assert_eq!(coords, &vec![139.002, 35.002]),
            _ => panic!("Expected Point geometry"),
        }
        let props = second.properties.as_ref().unwrap();
        assert_eq!(props["time"], "2025-01-01T00:01:30.000Z");
        assert_eq!(props["intensity"], "Resting");
    }

    #[test]
    fn test_join_laps() {
        let opts = ConvertOptions {
            join_laps: true,
            ..Default::default()
        };
        let fc = to_feature_collection(&routes(), &opts);
        assert_eq!(fc.features.len(), 1);

        match &fc.features[0].geometry.as_ref().unwrap().value {
            // The single-point lap cannot form a line
            Value::MultiLineString(lines) => assert_eq!(lines.len(), 1),
            _ => panic!("Expected MultiLineString"),
        }
        let props = fc.features[0].properties.as_ref().unwrap();
        assert_eq!(props["lapCount"], 2);
        assert_eq!(props["totalDistanceMeters"], 550.0);
        assert_eq!(props["totalTimeSeconds"], 90.0);
    }

    #[test]
    fn test_minimal_properties() {
        let opts = ConvertOptions {
            include_elevation: false,
            include_time: false,
            include_heart_rate: false,
            include_metadata: false,
            ..Default::default()
        };
        let fc = to_feature_collection(&routes(), &opts);
        let props = fc.features[0].properties.as_ref().unwrap();
        assert_eq!(props.len(), 3);
        assert!(props.get("coordinateProperties").is_none());
        match &fc.features[0].geometry.as_ref().unwrap().value {
            Value::LineString(coords) => assert!(coords.iter().all(|c| c.len() == 2)),
            _ => panic!("Expected LineString"),
        }
    }

    #[test]
    fn test_sport_filter() {
        let opts = ConvertOptions {
            sports: Some(vec![Sport::Running]),
            ..Default::default()
        };
        assert!(to_feature_collection(&routes(), &opts).features.is_empty());
    }
}
