use std::path::Path;

use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::debug;

use crate::error::{DecodeError, SchemaViolation};
use crate::format::{
    Centiseconds, UnknownEntity, append_event_text, known_heart_rate, parse_double, parse_timestamp,
};
use crate::model::*;
use crate::route::{ActivityRoute, routes_from};
use crate::schema;

type Result<T> = std::result::Result<T, DecodeError>;

/// Validate a TCX document and decode every activity it contains.
pub fn decode(xml: &[u8]) -> Result<Vec<Activity>> {
    schema::validate(xml)?;
    parse_activities(xml)
}

/// Read, validate and decode a TCX file into routes, one per activity with laps.
pub fn decode_file<P: AsRef<Path>>(path: P) -> Result<Vec<ActivityRoute>> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    let activities = decode(&bytes)?;
    debug!(path = %path.display(), activities = activities.len(), "decoded TCX file");
    Ok(routes_from(activities))
}

/// Structural parse without the schema gate.
pub(crate) fn parse_activities(xml: &[u8]) -> Result<Vec<Activity>> {
    let mut reader = Reader::from_reader(xml);
    let mut ctx = ParseContext::default();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => ctx.open(&e)?,
            Ok(Event::Empty(e)) => {
                ctx.open(&e)?;
                ctx.close(e.local_name().as_ref())?;
            }
            Ok(Event::End(e)) => ctx.close(e.local_name().as_ref())?,
            Ok(Event::Eof) => break,
            Ok(event) => {
                if let Err(UnknownEntity(name)) = append_event_text(&event, &mut ctx.text) {
                    return Err(DecodeError::SchemaValidation(SchemaViolation {
                        position: reader.buffer_position() as u64,
                        message: format!("reference to undeclared entity '&{name};'"),
                    }));
                }
            }
            Err(e) => return Err(DecodeError::Xml(e)),
        }
    }

    debug!(activities = ctx.activities.len(), "parsed activities");
    Ok(ctx.activities)
}

#[derive(Debug)]
struct ActivityBuilder {
    id: Option<DateTime<Utc>>,
    sport: Sport,
    laps: Vec<Lap>,
}

impl ActivityBuilder {
    fn build(self) -> Result<Activity> {
        Ok(Activity {
            id: self.id.ok_or(DecodeError::MissingElement {
                parent: "Activity",
                element: "Id",
            })?,
            sport: self.sport,
            laps: self.laps,
        })
    }
}

#[derive(Debug)]
struct LapBuilder {
    index: usize,
    start_time: DateTime<Utc>,
    total_time: Option<Centiseconds>,
    distance_meters: Option<f64>,
    maximum_speed: Option<f64>,
    calories: Option<u16>,
    average_heart_rate: Option<u8>,
    maximum_heart_rate: Option<u8>,
    intensity: Option<String>,
    trigger_method: Option<String>,
    cadence: Option<u8>,
    notes: Option<String>,
    tracks: Vec<Track>,
}

impl LapBuilder {
    fn new(index: usize, start_time: DateTime<Utc>) -> Self {
        Self {
            index,
            start_time,
            total_time: None,
            distance_meters: None,
            maximum_speed: None,
            calories: None,
            average_heart_rate: None,
            maximum_heart_rate: None,
            intensity: None,
            trigger_method: None,
            cadence: None,
            notes: None,
            tracks: Vec::new(),
        }
    }

    fn build(self) -> Result<Lap> {
        let missing = |element| DecodeError::MissingElement {
            parent: "Lap",
            element,
        };
        Ok(Lap {
            index: self.index,
            start_time: self.start_time,
            total_time: self.total_time.ok_or_else(|| missing("TotalTimeSeconds"))?,
            distance_meters: self.distance_meters.ok_or_else(|| missing("DistanceMeters"))?,
            maximum_speed: self.maximum_speed,
            calories: self.calories.ok_or_else(|| missing("Calories"))?,
            average_heart_rate: self.average_heart_rate,
            maximum_heart_rate: self.maximum_heart_rate,
            intensity: self.intensity.ok_or_else(|| missing("Intensity"))?,
            trigger_method: self.trigger_method.ok_or_else(|| missing("TriggerMethod"))?,
            cadence: self.cadence,
            notes: self.notes,
            tracks: self.tracks,
        })
    }
}

#[derive(Debug, Default)]
struct TrackPointBuilder {
    time: Option<DateTime<Utc>>,
    position: Option<Position>,
    altitude_meters: Option<f64>,
    distance_meters: Option<f64>,
    heart_rate: Option<u8>,
    sensor_state: Option<SensorState>,
    cadence: Option<u8>,
}

impl TrackPointBuilder {
    fn build(self) -> Result<TrackPoint> {
        let time = self.time.ok_or(DecodeError::MissingElement {
            parent: "Trackpoint",
            element: "Time",
        })?;
        Ok(TrackPoint {
            time,
            position: self.position,
            altitude_meters: self.altitude_meters,
            distance_meters: self.distance_meters,
            heart_rate: self.heart_rate,
            sensor_state: self
                .sensor_state
                .unwrap_or_else(|| SensorState::for_heart_rate(self.heart_rate)),
            cadence: self.cadence,
        })
    }
}

#[derive(Debug, Default)]
struct PositionBuilder {
    latitude: Option<f64>,
    longitude: Option<f64>,
}

impl PositionBuilder {
    fn build(self) -> Result<Position> {
        let missing = |element| DecodeError::MissingElement {
            parent: "Position",
            element,
        };
        Ok(Position {
            latitude: self.latitude.ok_or_else(|| missing("LatitudeDegrees"))?,
            longitude: self.longitude.ok_or_else(|| missing("LongitudeDegrees"))?,
        })
    }
}

/// The record under construction for one open container element.
#[derive(Debug)]
enum Frame {
    Activities(Vec<Activity>),
    Activity(ActivityBuilder),
    Lap(LapBuilder),
    AverageHeartRate(Option<u8>),
    MaximumHeartRate(Option<u8>),
    Track(Track),
    Trackpoint(TrackPointBuilder),
    HeartRate(Option<u8>),
    Position(PositionBuilder),
}

#[derive(Debug)]
struct Scope {
    depth: usize,
    frame: Frame,
}

/// Per-call decoding state: open scopes, element depth and pending text.
#[derive(Debug, Default)]
struct ParseContext {
    activities: Vec<Activity>,
    stack: Vec<Scope>,
    depth: usize,
    text: String,
}

impl ParseContext {
    /// The innermost scope, if the current element is its direct child.
    fn parent_frame(&mut self) -> Option<&mut Frame> {
        let depth = self.depth;
        self.stack
            .last_mut()
            .filter(|scope| scope.depth + 1 == depth)
            .map(|scope| &mut scope.frame)
    }

    fn open(&mut self, start: &BytesStart<'_>) -> Result<()> {
        self.depth += 1;
        self.text.clear();

        let depth = self.depth;
        let top_level = depth == 2 && self.stack.is_empty();
        let local = start.local_name();
        let frame = match (self.parent_frame(), local.as_ref()) {
            (None, b"Activities") if top_level => {
                Frame::Activities(Vec::new())
            }
            (Some(Frame::Activities(_)), b"Activity") => {
                let sport = attribute(start, "Activity", "Sport")?;
                Frame::Activity(ActivityBuilder {
                    id: None,
                    sport: Sport::from_attribute(&sport),
                    laps: Vec::new(),
                })
            }
            (Some(Frame::Activity(activity)), b"Lap") => {
                let index = activity.laps.len();
                let value = attribute(start, "Lap", "StartTime")?;
                let start_time = parse_timestamp(&value).ok_or(DecodeError::FieldParse {
                    element: "Lap/@StartTime",
                    value,
                })?;
                Frame::Lap(LapBuilder::new(index, start_time))
            }
            (Some(Frame::Lap(_)), b"AverageHeartRateBpm") => Frame::AverageHeartRate(None),
            (Some(Frame::Lap(_)), b"MaximumHeartRateBpm") => Frame::MaximumHeartRate(None),
            (Some(Frame::Lap(_)), b"Track") => Frame::Track(Track::default()),
            (Some(Frame::Track(_)), b"Trackpoint") => {
                Frame::Trackpoint(TrackPointBuilder::default())
            }
            (Some(Frame::Trackpoint(_)), b"HeartRateBpm") => Frame::HeartRate(None),
            (Some(Frame::Trackpoint(_)), b"Position") => {
                Frame::Position(PositionBuilder::default())
            }
            _ => return Ok(()),
        };
        self.stack.push(Scope { depth, frame });
        Ok(())
    }

    fn close(&mut self, local_name: &[u8]) -> Result<()> {
        let text = std::mem::take(&mut self.text);

        if self.stack.last().is_some_and(|scope| scope.depth == self.depth) {
            if let Some(scope) = self.stack.pop() {
                self.depth -= 1;
                return self.attach(scope.frame);
            }
        }

        if let Some(frame) = self.parent_frame() {
            assign_leaf(frame, local_name, &text)?;
        }
        self.depth -= 1;
        Ok(())
    }

    /// Freeze a closed container and hand it to the enclosing record.
    fn attach(&mut self, frame: Frame) -> Result<()> {
        let parent = self.stack.last_mut().map(|scope| &mut scope.frame);
        match (frame, parent) {
            (Frame::Activities(activities), _) => self.activities.extend(activities),
            (Frame::Activity(builder), Some(Frame::Activities(list))) => {
                list.push(builder.build()?)
            }
            (Frame::Lap(builder), Some(Frame::Activity(activity))) => {
                activity.laps.push(builder.build()?)
            }
            (Frame::AverageHeartRate(value), Some(Frame::Lap(lap))) => {
                lap.average_heart_rate = value
            }
            (Frame::MaximumHeartRate(value), Some(Frame::Lap(lap))) => {
                lap.maximum_heart_rate = value
            }
            (Frame::Track(track), Some(Frame::Lap(lap))) => lap.tracks.push(track),
            (Frame::Trackpoint(builder), Some(Frame::Track(track))) => {
                track.points.push(builder.build()?)
            }
            (Frame::HeartRate(value), Some(Frame::Trackpoint(point))) => point.heart_rate = value,
            (Frame::Position(builder), Some(Frame::Trackpoint(point))) => {
                point.position = Some(builder.build()?)
            }
            (frame, _) => debug!(?frame, "dropping record without an owner"),
        }
        Ok(())
    }
}

/// Dispatch a closed leaf element to the record that owns it.
/// Free text keeps its whitespace, typed values are trimmed.
fn assign_leaf(frame: &mut Frame, name: &[u8], raw: &str) -> Result<()> {
    let text = raw.trim();
    match frame {
        Frame::Activity(activity) => {
            if name == b"Id" {
                activity.id = Some(timestamp("Id", text)?);
            }
        }
        Frame::Lap(lap) => match name {
            b"TotalTimeSeconds" => {
                lap.total_time = Some(duration("TotalTimeSeconds", text)?)
            }
            b"DistanceMeters" => lap.distance_meters = Some(double("DistanceMeters", text)?),
            b"MaximumSpeed" => lap.maximum_speed = Some(double("MaximumSpeed", text)?),
            b"Calories" => lap.calories = Some(integer("Calories", text)?),
            b"Intensity" => lap.intensity = Some(text.to_string()),
            b"Cadence" => lap.cadence = Some(integer("Cadence", text)?),
            b"TriggerMethod" => lap.trigger_method = Some(text.to_string()),
            b"Notes" => lap.notes = Some(raw.to_string()),
            _ => {}
        },
        Frame::AverageHeartRate(value) | Frame::MaximumHeartRate(value) | Frame::HeartRate(value) => {
            if name == b"Value" {
                *value = known_heart_rate(integer("Value", text)?);
            }
        }
        Frame::Trackpoint(point) => match name {
            b"Time" => point.time = Some(timestamp("Time", text)?),
            b"AltitudeMeters" => point.altitude_meters = Some(double("AltitudeMeters", text)?),
            b"DistanceMeters" => point.distance_meters = Some(double("DistanceMeters", text)?),
            b"Cadence" => point.cadence = Some(integer("Cadence", text)?),
            b"SensorState" => {
                point.sensor_state = Some(SensorState::from_element(text).ok_or_else(|| {
                    DecodeError::FieldParse {
                        element: "SensorState",
                        value: text.to_string(),
                    }
                })?)
            }
            _ => {}
        },
        Frame::Position(position) => match name {
            b"LatitudeDegrees" => position.latitude = Some(double("LatitudeDegrees", text)?),
            b"LongitudeDegrees" => position.longitude = Some(double("LongitudeDegrees", text)?),
            _ => {}
        },
        Frame::Activities(_) | Frame::Track(_) => {}
    }
    Ok(())
}

fn field_error(element: &'static str, text: &str) -> DecodeError {
    DecodeError::FieldParse {
        element,
        value: text.to_string(),
    }
}

fn double(element: &'static str, text: &str) -> Result<f64> {
    parse_double(text).ok_or_else(|| field_error(element, text))
}

fn duration(element: &'static str, text: &str) -> Result<Centiseconds> {
    Centiseconds::from_seconds(double(element, text)?).ok_or_else(|| field_error(element, text))
}

fn integer<T: std::str::FromStr>(element: &'static str, text: &str) -> Result<T> {
    text.parse::<T>().map_err(|_| field_error(element, text))
}

fn timestamp(element: &'static str, text: &str) -> Result<DateTime<Utc>> {
    parse_timestamp(text).ok_or_else(|| field_error(element, text))
}

/// Read a required, unqualified attribute of a start tag.
fn attribute(
    start: &BytesStart<'_>,
    element: &'static str,
    attribute: &'static str,
) -> Result<String> {
    for attr_result in start.attributes() {
        let attr = attr_result.map_err(|e| DecodeError::Xml(e.into()))?;
        if attr.key.as_ref() == attribute.as_bytes() {
            return Ok(String::from_utf8_lossy(&attr.value).into_owned());
        }
    }
    Err(DecodeError::MissingAttribute { element, attribute })
}
