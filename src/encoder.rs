use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use tracing::{debug, info, warn};

use crate::error::EncodeError;
use crate::format::{
    TCX_NAMESPACE, TCX_SCHEMA_URL, XSI_NAMESPACE, format_double, format_timestamp, known_cadence,
    known_heart_rate,
};
use crate::model::{Activity, Lap, Position, Track, TrackPoint};
use crate::source::{ActivitySummary, LapSummary, TrackPointSource};

pub type Result<T> = std::result::Result<T, EncodeError>;

const LAP_INTENSITY: &str = "Active";
const LAP_TRIGGER_METHOD: &str = "Manual";

/// Gather the track points of every lap and build the activity to encode.
///
/// Laps without points are left out. Returns `None` when no lap has any.
pub fn assemble_activity<S>(
    summary: &ActivitySummary,
    laps: &[LapSummary],
    source: &S,
) -> Result<Option<Activity>>
where
    S: TrackPointSource + ?Sized,
{
    let mut assembled = Vec::with_capacity(laps.len());

    for (i, lap) in laps.iter().enumerate() {
        let (start, end) = lap.time_range();
        let raw = source
            .track_points_in_range(summary.id, start, end)
            .map_err(|e| EncodeError::Source(Box::new(e)))?;

        if raw.is_empty() {
            warn!(lap = i, start = %format_timestamp(&start), "skipping lap without track points");
            continue;
        }

        let points: Vec<TrackPoint> = raw.iter().map(TrackPoint::from).collect();
        assembled.push(Lap {
            index: assembled.len(),
            start_time: lap.start_time,
            total_time: lap.total_time,
            distance_meters: lap.total_distance,
            maximum_speed: Some(lap.max_speed),
            calories: lap.calories,
            average_heart_rate: known_heart_rate(lap.avg_heart_rate),
            maximum_heart_rate: known_heart_rate(lap.max_heart_rate),
            intensity: LAP_INTENSITY.to_string(),
            trigger_method: LAP_TRIGGER_METHOD.to_string(),
            cadence: lap.cadence.and_then(known_cadence),
            notes: None,
            tracks: vec![Track { points }],
        });
    }

    if assembled.is_empty() {
        debug!(activity = %format_timestamp(&summary.id), "no lap has track points");
        return Ok(None);
    }

    Ok(Some(Activity {
        id: summary.id,
        sport: summary.sport,
        laps: assembled,
    }))
}

/// Serialize one activity as a complete TCX document and hand the writer back.
pub fn write_activity<W: Write>(activity: &Activity, inner: W) -> Result<W> {
    let mut w = Writer::new_with_indent(inner, b' ', 2);
    w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let schema_location = format!("{TCX_NAMESPACE} {TCX_SCHEMA_URL}");
    let mut root = BytesStart::new("TrainingCenterDatabase");
    root.push_attribute(("xmlns", TCX_NAMESPACE));
    root.push_attribute(("xmlns:xsi", XSI_NAMESPACE));
    root.push_attribute(("xsi:schemaLocation", schema_location.as_str()));
    w.write_event(Event::Start(root))?;
    w.write_event(Event::Start(BytesStart::new("Activities")))?;

    let mut start = BytesStart::new("Activity");
    start.push_attribute(("Sport", activity.sport.as_str()));
    w.write_event(Event::Start(start))?;
    text_element(&mut w, "Id", &format_timestamp(&activity.id))?;

    for lap in &activity.laps {
        write_lap(&mut w, lap)?;
    }

    w.write_event(Event::End(BytesEnd::new("Activity")))?;
    w.write_event(Event::End(BytesEnd::new("Activities")))?;
    w.write_event(Event::End(BytesEnd::new("TrainingCenterDatabase")))?;

    let mut inner = w.into_inner();
    inner.write_all(b"\n")?;
    Ok(inner)
}

fn write_lap<W: Write>(w: &mut Writer<W>, lap: &Lap) -> Result<()> {
    let mut start = BytesStart::new("Lap");
    start.push_attribute(("StartTime", format_timestamp(&lap.start_time).as_str()));
    w.write_event(Event::Start(start))?;

    text_element(w, "TotalTimeSeconds", &format_double(lap.total_time.as_seconds()))?;
    text_element(w, "DistanceMeters", &format_double(lap.distance_meters))?;
    if let Some(speed) = lap.maximum_speed {
        text_element(w, "MaximumSpeed", &format_double(speed))?;
    }
    text_element(w, "Calories", &lap.calories.to_string())?;
    if let Some(bpm) = lap.average_heart_rate {
        heart_rate_element(w, BytesStart::new("AverageHeartRateBpm"), bpm)?;
    }
    if let Some(bpm) = lap.maximum_heart_rate {
        heart_rate_element(w, BytesStart::new("MaximumHeartRateBpm"), bpm)?;
    }
    text_element(w, "Intensity", &lap.intensity)?;
    if let Some(cadence) = lap.cadence.and_then(known_cadence) {
        text_element(w, "Cadence", &cadence.to_string())?;
    }
    text_element(w, "TriggerMethod", &lap.trigger_method)?;

    for track in &lap.tracks {
        w.write_event(Event::Start(BytesStart::new("Track")))?;
        for point in &track.points {
            write_trackpoint(w, point)?;
        }
        w.write_event(Event::End(BytesEnd::new("Track")))?;
    }

    if let Some(notes) = &lap.notes {
        text_element(w, "Notes", notes)?;
    }

    w.write_event(Event::End(BytesEnd::new("Lap")))?;
    Ok(())
}

fn write_trackpoint<W: Write>(w: &mut Writer<W>, point: &TrackPoint) -> Result<()> {
    w.write_event(Event::Start(BytesStart::new("Trackpoint")))?;
    text_element(w, "Time", &format_timestamp(&point.time))?;

    if let Some(Position { latitude, longitude }) = point.position {
        w.write_event(Event::Start(BytesStart::new("Position")))?;
        text_element(w, "LatitudeDegrees", &format_double(latitude))?;
        text_element(w, "LongitudeDegrees", &format_double(longitude))?;
        w.write_event(Event::End(BytesEnd::new("Position")))?;
    }
    if let Some(altitude) = point.altitude_meters {
        text_element(w, "AltitudeMeters", &format_double(altitude))?;
    }
    if let Some(distance) = point.distance_meters {
        text_element(w, "DistanceMeters", &format_double(distance))?;
    }
    if let Some(bpm) = point.heart_rate {
        let mut start = BytesStart::new("HeartRateBpm");
        start.push_attribute(("xsi:type", "HeartRateInBeatsPerMinute_t"));
        heart_rate_element(w, start, bpm)?;
    }
    if let Some(cadence) = point.cadence.and_then(known_cadence) {
        text_element(w, "Cadence", &cadence.to_string())?;
    }
    text_element(w, "SensorState", point.sensor_state.as_str())?;

    w.write_event(Event::End(BytesEnd::new("Trackpoint")))?;
    Ok(())
}

fn heart_rate_element<W: Write>(w: &mut Writer<W>, start: BytesStart<'_>, bpm: u8) -> Result<()> {
    let end = start.to_end().into_owned();
    w.write_event(Event::Start(start))?;
    text_element(w, "Value", &bpm.to_string())?;
    w.write_event(Event::End(end))?;
    Ok(())
}

fn text_element<W: Write>(w: &mut Writer<W>, name: &str, text: &str) -> Result<()> {
    w.write_event(Event::Start(BytesStart::new(name)))?;
    w.write_event(Event::Text(BytesText::new(text)))?;
    w.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

/// Encode an activity into an in-memory document.
pub fn encode_to_vec<S>(
    summary: &ActivitySummary,
    laps: &[LapSummary],
    source: &S,
) -> Result<Option<Vec<u8>>>
where
    S: TrackPointSource + ?Sized,
{
    match assemble_activity(summary, laps, source)? {
        Some(activity) => Ok(Some(write_activity(&activity, Vec::new())?)),
        None => Ok(None),
    }
}

/// Encode an activity into a file at `path`, replacing any existing file.
///
/// Nothing is created when no lap has track points. If writing fails the
/// partially written file is removed before the error is returned.
pub fn encode_to_file<S, P>(
    summary: &ActivitySummary,
    laps: &[LapSummary],
    source: &S,
    path: P,
) -> Result<Option<PathBuf>>
where
    S: TrackPointSource + ?Sized,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let Some(activity) = assemble_activity(summary, laps, source)? else {
        return Ok(None);
    };

    let started = Instant::now();
    write_file_with(&activity, path, BufWriter::new)?;

    info!(
        path = %path.display(),
        laps = activity.laps.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "wrote TCX file"
    );
    Ok(Some(path.to_path_buf()))
}

/// Create `path` and write `activity` through the sink built by `wrap`.
/// The file is removed again if anything fails after it was created.
fn write_file_with<W, F>(activity: &Activity, path: &Path, wrap: F) -> Result<()>
where
    W: Write,
    F: FnOnce(File) -> W,
{
    let file = File::create(path)?;
    let guard = PartialFile::new(path);

    let mut sink = write_activity(activity, wrap(file))?;
    sink.flush()?;
    drop(sink);
    guard.keep();
    Ok(())
}

/// Removes the file at `path` when dropped, unless kept.
struct PartialFile<'a> {
    path: &'a Path,
    armed: bool,
}

impl<'a> PartialFile<'a> {
    fn new(path: &'a Path) -> Self {
        Self { path, armed: true }
    }

    fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for PartialFile<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = fs::remove_file(self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove partial file");
        }
    }
}
