//! Structural validation of documents against the TCX v2 schema.
//!
//! The content model of the activity branch of the schema is compiled into the
//! tables below: element sequences with their occurrence bounds, required
//! attributes and simple-type value spaces. Branches the codec does not model
//! (folders, workouts, courses, authoring info, extensions) accept any
//! well-formed content.

use quick_xml::NsReader;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, NamespaceResolver, ResolveResult};

use crate::error::SchemaViolation;
use crate::format::{
    TCX_NAMESPACE, UnknownEntity, XSI_NAMESPACE, append_event_text, parse_double, parse_timestamp,
};

type Result<T> = std::result::Result<T, SchemaViolation>;

const ROOT_ELEMENT: &str = "TrainingCenterDatabase";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ComplexType {
    TrainingCenterDatabase,
    ActivityList,
    Activity,
    ActivityLap,
    HeartRateInBeatsPerMinute,
    Track,
    Trackpoint,
    Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimpleType {
    DateTime,
    Double,
    UnsignedShort,
    HeartRateValue,
    Cadence,
    Latitude,
    Longitude,
    Intensity,
    TriggerMethod,
    SensorState,
    Sport,
    Text,
}

#[derive(Debug, Clone, Copy)]
enum Content {
    Complex(ComplexType),
    Simple(SimpleType),
    /// Any well-formed content, any namespace.
    Lax,
}

#[derive(Debug)]
struct Particle {
    name: &'static str,
    min: u32,
    max: Option<u32>,
    content: Content,
}

const fn one(name: &'static str, content: Content) -> Particle {
    Particle { name, min: 1, max: Some(1), content }
}

const fn optional(name: &'static str, content: Content) -> Particle {
    Particle { name, min: 0, max: Some(1), content }
}

const fn many(name: &'static str, min: u32, content: Content) -> Particle {
    Particle { name, min, max: None, content }
}

use Content::{Complex, Lax, Simple};

const TRAINING_CENTER_DATABASE: &[Particle] = &[
    optional("Folders", Lax),
    optional("Activities", Complex(ComplexType::ActivityList)),
    optional("Workouts", Lax),
    optional("Courses", Lax),
    optional("Author", Lax),
    optional("Extensions", Lax),
];

const ACTIVITY_LIST: &[Particle] = &[
    many("Activity", 0, Complex(ComplexType::Activity)),
    many("MultiSportSession", 0, Lax),
];

const ACTIVITY: &[Particle] = &[
    one("Id", Simple(SimpleType::DateTime)),
    many("Lap", 1, Complex(ComplexType::ActivityLap)),
    optional("Notes", Simple(SimpleType::Text)),
    optional("Training", Lax),
    optional("Creator", Lax),
    optional("Extensions", Lax),
];

const ACTIVITY_LAP: &[Particle] = &[
    one("TotalTimeSeconds", Simple(SimpleType::Double)),
    one("DistanceMeters", Simple(SimpleType::Double)),
    optional("MaximumSpeed", Simple(SimpleType::Double)),
    one("Calories", Simple(SimpleType::UnsignedShort)),
    optional("AverageHeartRateBpm", Complex(ComplexType::HeartRateInBeatsPerMinute)),
    optional("MaximumHeartRateBpm", Complex(ComplexType::HeartRateInBeatsPerMinute)),
    one("Intensity", Simple(SimpleType::Intensity)),
    optional("Cadence", Simple(SimpleType::Cadence)),
    one("TriggerMethod", Simple(SimpleType::TriggerMethod)),
    many("Track", 0, Complex(ComplexType::Track)),
    optional("Notes", Simple(SimpleType::Text)),
    optional("Extensions", Lax),
];

const HEART_RATE: &[Particle] = &[one("Value", Simple(SimpleType::HeartRateValue))];

const TRACK: &[Particle] = &[many("Trackpoint", 1, Complex(ComplexType::Trackpoint))];

const TRACKPOINT: &[Particle] = &[
    one("Time", Simple(SimpleType::DateTime)),
    optional("Position", Complex(ComplexType::Position)),
    optional("AltitudeMeters", Simple(SimpleType::Double)),
    optional("DistanceMeters", Simple(SimpleType::Double)),
    optional("HeartRateBpm", Complex(ComplexType::HeartRateInBeatsPerMinute)),
    optional("Cadence", Simple(SimpleType::Cadence)),
    optional("SensorState", Simple(SimpleType::SensorState)),
    optional("Extensions", Lax),
];

const POSITION: &[Particle] = &[
    one("LatitudeDegrees", Simple(SimpleType::Latitude)),
    one("LongitudeDegrees", Simple(SimpleType::Longitude)),
];

impl ComplexType {
    fn particles(self) -> &'static [Particle] {
        match self {
            Self::TrainingCenterDatabase => TRAINING_CENTER_DATABASE,
            Self::ActivityList => ACTIVITY_LIST,
            Self::Activity => ACTIVITY,
            Self::ActivityLap => ACTIVITY_LAP,
            Self::HeartRateInBeatsPerMinute => HEART_RATE,
            Self::Track => TRACK,
            Self::Trackpoint => TRACKPOINT,
            Self::Position => POSITION,
        }
    }

    /// Declared attributes; every one the schema declares here is required.
    fn attributes(self) -> &'static [(&'static str, SimpleType)] {
        match self {
            Self::Activity => &[("Sport", SimpleType::Sport)],
            Self::ActivityLap => &[("StartTime", SimpleType::DateTime)],
            _ => &[],
        }
    }
}

impl SimpleType {
    fn accepts(self, value: &str) -> bool {
        let value = value.trim();
        match self {
            Self::DateTime => parse_timestamp(value).is_some(),
            Self::Double => parse_double(value).is_some(),
            Self::UnsignedShort => value.parse::<u16>().is_ok(),
            Self::HeartRateValue => value.parse::<u8>().is_ok_and(|v| v >= 1),
            Self::Cadence => value.parse::<u8>().is_ok_and(|v| v <= 254),
            Self::Latitude => parse_double(value).is_some_and(|v| (-90.0..=90.0).contains(&v)),
            Self::Longitude => parse_double(value).is_some_and(|v| (-180.0..180.0).contains(&v)),
            Self::Intensity => matches!(value, "Active" | "Resting"),
            Self::TriggerMethod => {
                matches!(value, "Manual" | "Distance" | "Location" | "Time" | "HeartRate")
            }
            Self::SensorState => matches!(value, "Present" | "Absent"),
            Self::Sport => matches!(value, "Running" | "Biking" | "Other"),
            Self::Text => true,
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Self::DateTime => "a dateTime",
            Self::Double => "a double",
            Self::UnsignedShort => "an unsignedShort",
            Self::HeartRateValue => "a heart rate between 1 and 255",
            Self::Cadence => "a cadence between 0 and 254",
            Self::Latitude => "a latitude between -90 and 90",
            Self::Longitude => "a longitude in [-180, 180)",
            Self::Intensity => "one of Active, Resting",
            Self::TriggerMethod => "one of Manual, Distance, Location, Time, HeartRate",
            Self::SensorState => "one of Present, Absent",
            Self::Sport => "one of Running, Biking, Other",
            Self::Text => "a string",
        }
    }
}

#[derive(Debug)]
enum FrameKind {
    Complex {
        ty: ComplexType,
        particle: usize,
        count: u32,
    },
    Simple(SimpleType),
    Lax,
}

#[derive(Debug)]
struct Frame {
    name: String,
    kind: FrameKind,
    text: String,
}

/// Sequence checker fed with the document's events.
#[derive(Debug, Default)]
struct Validator {
    stack: Vec<Frame>,
    root_seen: bool,
    position: u64,
}

fn violation(position: u64, message: String) -> SchemaViolation {
    SchemaViolation { position, message }
}

impl Validator {
    fn open(
        &mut self,
        in_tcx: bool,
        start: &BytesStart<'_>,
        resolver: &NamespaceResolver,
    ) -> Result<()> {
        let at = self.position;
        let local = start.local_name();
        let name = String::from_utf8_lossy(local.as_ref()).into_owned();

        let content = match self.stack.last_mut() {
            None => {
                if self.root_seen {
                    return Err(violation(at, format!("unexpected second root element <{name}>")));
                }
                if !in_tcx || name != ROOT_ELEMENT {
                    return Err(violation(at, format!(
                        "root element must be <{ROOT_ELEMENT}> in namespace {TCX_NAMESPACE}, found <{name}>"
                    )));
                }
                self.root_seen = true;
                Complex(ComplexType::TrainingCenterDatabase)
            }
            Some(Frame {
                kind: FrameKind::Lax,
                ..
            }) => Lax,
            Some(Frame {
                kind: FrameKind::Simple(_),
                name: parent,
                ..
            }) => {
                let message = format!("element <{name}> is not allowed inside <{parent}>");
                return Err(violation(at, message));
            }
            Some(Frame {
                kind: FrameKind::Complex { ty, particle, count },
                name: parent,
                ..
            }) => {
                if !in_tcx {
                    let message =
                        format!("element <{name}> inside <{parent}> is not in namespace {TCX_NAMESPACE}");
                    return Err(violation(at, message));
                }
                let particles = ty.particles();
                let (mut i, mut c) = (*particle, *count);
                loop {
                    let Some(p) = particles.get(i) else {
                        let message = format!("unexpected element <{name}> in <{parent}>");
                        return Err(violation(at, message));
                    };
                    if p.name == name && p.max.is_none_or(|max| c < max) {
                        *particle = i;
                        *count = c + 1;
                        break p.content;
                    }
                    if c < p.min {
                        let message =
                            format!("expected <{}> in <{parent}>, found <{name}>", p.name);
                        return Err(violation(at, message));
                    }
                    i += 1;
                    c = 0;
                }
            }
        };

        let kind = match content {
            Complex(ty) => {
                self.check_attributes(&name, start, resolver, ty.attributes())?;
                FrameKind::Complex {
                    ty,
                    particle: 0,
                    count: 0,
                }
            }
            Simple(st) => {
                self.check_attributes(&name, start, resolver, &[])?;
                FrameKind::Simple(st)
            }
            Lax => FrameKind::Lax,
        };
        self.stack.push(Frame {
            name,
            kind,
            text: String::new(),
        });
        Ok(())
    }

    fn check_attributes(
        &self,
        element: &str,
        start: &BytesStart<'_>,
        resolver: &NamespaceResolver,
        declared: &[(&'static str, SimpleType)],
    ) -> Result<()> {
        let at = self.position;
        let mut seen = vec![false; declared.len()];
        for attr_result in start.attributes() {
            let attr = attr_result
                .map_err(|e| violation(at, format!("malformed attribute on <{element}>: {e}")))?;
            if attr.key.as_namespace_binding().is_some() {
                continue;
            }
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            // Schema-instance attributes (xsi:type, xsi:schemaLocation) may appear anywhere.
            if attr.key.prefix().is_some() {
                let (ns, _) = resolver.resolve_attribute(attr.key);
                if matches!(ns, ResolveResult::Bound(Namespace(uri)) if uri == XSI_NAMESPACE.as_bytes()) {
                    continue;
                }
                return Err(violation(at, format!("attribute '{key}' is not allowed on <{element}>")));
            }
            let Some(idx) = declared.iter().position(|(n, _)| *n == key) else {
                return Err(violation(at, format!("attribute '{key}' is not allowed on <{element}>")));
            };
            let value = String::from_utf8_lossy(&attr.value);
            let st = declared[idx].1;
            if !st.accepts(&value) {
                return Err(violation(at, format!(
                    "invalid value '{value}' for attribute '{key}' on <{element}>: expected {}",
                    st.describe()
                )));
            }
            seen[idx] = true;
        }
        if let Some(idx) = seen.iter().position(|s| !s) {
            return Err(violation(at, format!(
                "missing required attribute '{}' on <{element}>",
                declared[idx].0
            )));
        }
        Ok(())
    }

    fn text(&mut self, event: &Event<'_>) -> Result<()> {
        let at = self.position;
        let unknown_entity =
            |UnknownEntity(name)| violation(at, format!("reference to undeclared entity '&{name};'"));
        match self.stack.last_mut() {
            Some(frame) => {
                append_event_text(event, &mut frame.text).map_err(unknown_entity)?;
                Ok(())
            }
            None => {
                let mut text = String::new();
                append_event_text(event, &mut text).map_err(unknown_entity)?;
                if text.trim().is_empty() {
                    Ok(())
                } else {
                    Err(violation(at, "text outside the root element".to_string()))
                }
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        let at = self.position;
        let Some(frame) = self.stack.pop() else {
            return Err(violation(at, "unbalanced end tag".to_string()));
        };
        match frame.kind {
            FrameKind::Complex { ty, particle, count } => {
                if !frame.text.trim().is_empty() {
                    return Err(violation(at, format!(
                        "text is not allowed inside <{}>",
                        frame.name
                    )));
                }
                let particles = ty.particles();
                let missing = particles.iter().enumerate().skip(particle).find(|(i, p)| {
                    let c = if *i == particle { count } else { 0 };
                    c < p.min
                });
                if let Some((_, p)) = missing {
                    return Err(violation(at, format!(
                        "missing required element <{}> in <{}>",
                        p.name, frame.name
                    )));
                }
            }
            FrameKind::Simple(st) => {
                if !st.accepts(&frame.text) {
                    return Err(violation(at, format!(
                        "invalid value '{}' in <{}>: expected {}",
                        frame.text.trim(),
                        frame.name,
                        st.describe()
                    )));
                }
            }
            FrameKind::Lax => {}
        }
        Ok(())
    }

    fn finish(&self) -> Result<()> {
        let at = self.position;
        if let Some(frame) = self.stack.last() {
            return Err(violation(at, format!("unexpected end of document inside <{}>", frame.name)));
        }
        if !self.root_seen {
            return Err(violation(at, format!("missing <{ROOT_ELEMENT}> root element")));
        }
        Ok(())
    }
}

/// Validate a raw document against the TCX v2 schema.
pub fn validate(xml: &[u8]) -> Result<()> {
    let mut reader = NsReader::from_reader(xml);
    let mut validator = Validator::default();

    loop {
        let result = reader.read_resolved_event().map(|(ns, event)| {
            let in_tcx =
                matches!(ns, ResolveResult::Bound(Namespace(uri)) if uri == TCX_NAMESPACE.as_bytes());
            (in_tcx, event)
        });
        validator.position = reader.buffer_position() as u64;
        let (in_tcx, event) = result
            .map_err(|e| violation(validator.position, format!("malformed XML: {e}")))?;

        match event {
            Event::Start(e) => validator.open(in_tcx, &e, reader.resolver())?,
            Event::Empty(e) => {
                validator.open(in_tcx, &e, reader.resolver())?;
                validator.close()?;
            }
            Event::End(_) => validator.close()?,
            Event::Text(_) | Event::CData(_) | Event::GeneralRef(_) => validator.text(&event)?,
            Event::Eof => break,
            _ => {}
        }
    }

    validator.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(activities: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<TrainingCenterDatabase xmlns="http://www.garmin.com/xmlschemas/TrainingCenterDatabase/v2" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
  <Activities>{activities}</Activities>
</TrainingCenterDatabase>"#
        )
    }

    const LAP: &str = r#"<Lap StartTime="2024-05-01T06:00:00Z">
        <TotalTimeSeconds>60.5</TotalTimeSeconds>
        <DistanceMeters>200</DistanceMeters>
        <Calories>10</Calories>
        <Intensity>Active</Intensity>
        <TriggerMethod>Manual</TriggerMethod>
      </Lap>"#;

    fn activity(body: &str) -> String {
        doc(&format!(
            r#"<Activity Sport="Running"><Id>2024-05-01T06:00:00Z</Id>{body}</Activity>"#
        ))
    }

    fn message(xml: &str) -> String {
        validate(xml.as_bytes()).unwrap_err().message
    }

    #[test]
    fn test_minimal_document() {
        assert!(validate(doc("").as_bytes()).is_ok());
        assert!(validate(activity(LAP).as_bytes()).is_ok());
    }

    #[test]
    fn test_empty_database() {
        let xml = r#"<TrainingCenterDatabase xmlns="http://www.garmin.com/xmlschemas/TrainingCenterDatabase/v2"/>"#;
        assert!(validate(xml.as_bytes()).is_ok());
    }

    #[test]
    fn test_wrong_root_or_namespace() {
        let msg = message(r#"<gpx xmlns="http://www.topografix.com/GPX/1/1"/>"#);
        assert!(msg.contains("root element"), "{msg}");

        let msg = message(r#"<TrainingCenterDatabase xmlns="http://example.com/v1"/>"#);
        assert!(msg.contains("root element"), "{msg}");
    }

    #[test]
    fn test_malformed_xml() {
        let xml = doc("<Activity Sport=\"Running\"><Id>x</Activity>");
        let msg = message(&xml);
        assert!(msg.contains("malformed XML"), "{msg}");
    }

    #[test]
    fn test_truncated_document() {
        let xml = r#"<TrainingCenterDatabase xmlns="http://www.garmin.com/xmlschemas/TrainingCenterDatabase/v2"><Activities>"#;
        let msg = message(xml);
        assert!(
            msg.contains("unexpected end of document") || msg.contains("malformed XML"),
            "{msg}"
        );
    }

    #[test]
    fn test_missing_start_time() {
        let xml = activity(&LAP.replace(r#" StartTime="2024-05-01T06:00:00Z""#, ""));
        let msg = message(&xml);
        assert!(msg.contains("missing required attribute 'StartTime'"), "{msg}");
    }

    #[test]
    fn test_missing_sport() {
        let xml = doc(&format!(r#"<Activity><Id>2024-05-01T06:00:00Z</Id>{LAP}</Activity>"#));
        let msg = message(&xml);
        assert!(msg.contains("'Sport'"), "{msg}");
    }

    #[test]
    fn test_undeclared_attribute() {
        let xml = activity(&LAP.replace("<Calories>", r#"<Calories unit="kcal">"#));
        let msg = message(&xml);
        assert!(msg.contains("'unit' is not allowed"), "{msg}");
    }

    #[test]
    fn test_activity_without_lap() {
        let msg = message(&activity(""));
        assert!(msg.contains("missing required element <Lap>"), "{msg}");
    }

    #[test]
    fn test_wrong_element_order() {
        let swapped = LAP.replace(
            "<TotalTimeSeconds>60.5</TotalTimeSeconds>\n        <DistanceMeters>200</DistanceMeters>",
            "<DistanceMeters>200</DistanceMeters>\n        <TotalTimeSeconds>60.5</TotalTimeSeconds>",
        );
        let msg = message(&activity(&swapped));
        assert!(msg.contains("expected <TotalTimeSeconds>"), "{msg}");
    }

    #[test]
    fn test_repeated_single_element() {
        let doubled = LAP.replace(
            "<Calories>10</Calories>",
            "<Calories>10</Calories><Calories>11</Calories>",
        );
        let msg = message(&activity(&doubled));
        assert!(msg.contains("<Calories>"), "{msg}");
    }

    #[test]
    fn test_simple_type_values() {
        let bad_calories = LAP.replace("<Calories>10</Calories>", "<Calories>-1</Calories>");
        assert!(message(&activity(&bad_calories)).contains("unsignedShort"));

        let bad_intensity = LAP.replace(">Active<", ">Sprinting<");
        assert!(message(&activity(&bad_intensity)).contains("Active, Resting"));

        let bad_time = LAP.replace("60.5", "one minute");
        assert!(message(&activity(&bad_time)).contains("a double"));
    }

    #[test]
    fn test_trackpoint_model() {
        let track = r#"<Track><Trackpoint>
            <Time>2024-05-01T06:00:01Z</Time>
            <Position><LatitudeDegrees>91.0</LatitudeDegrees><LongitudeDegrees>2.0</LongitudeDegrees></Position>
          </Trackpoint></Track>"#;
        let lap = LAP.replace("</TriggerMethod>", &format!("</TriggerMethod>{track}"));
        let msg = message(&activity(&lap));
        assert!(msg.contains("latitude"), "{msg}");

        let ok = lap.replace("91.0", "45.0");
        assert!(validate(activity(&ok).as_bytes()).is_ok());

        let empty_track = LAP.replace("</TriggerMethod>", "</TriggerMethod><Track></Track>");
        assert!(message(&activity(&empty_track)).contains("<Trackpoint>"));
    }

    #[test]
    fn test_heart_rate_value_range() {
        let hr = LAP.replace(
            "<Calories>10</Calories>",
            "<Calories>10</Calories><AverageHeartRateBpm><Value>0</Value></AverageHeartRateBpm>",
        );
        assert!(message(&activity(&hr)).contains("heart rate"));
    }

    #[test]
    fn test_text_in_complex_content() {
        let lap = LAP.replace("<Calories>", "stray<Calories>");
        assert!(message(&activity(&lap)).contains("text is not allowed inside <Lap>"));
    }

    #[test]
    fn test_child_in_simple_content() {
        let lap = LAP.replace("<Calories>10</Calories>", "<Calories><Value>10</Value></Calories>");
        assert!(message(&activity(&lap)).contains("not allowed inside <Calories>"));
    }

    #[test]
    fn test_extensions_are_lax() {
        let lap = LAP.replace(
            "</TriggerMethod>",
            r#"</TriggerMethod><Extensions><ns3:LX xmlns:ns3="http://www.garmin.com/xmlschemas/ActivityExtension/v2"><ns3:AvgSpeed>3.1</ns3:AvgSpeed></ns3:LX></Extensions>"#,
        );
        assert!(validate(activity(&lap).as_bytes()).is_ok());
    }

    #[test]
    fn test_foreign_element_rejected_outside_extensions() {
        let lap = LAP.replace(
            "</TriggerMethod>",
            r#"</TriggerMethod><x:Extra xmlns:x="http://example.com/x"/>"#,
        );
        assert!(message(&activity(&lap)).contains("not in namespace"));
    }

    #[test]
    fn test_entities_in_simple_content() {
        let lap = LAP.replace(
            "</TriggerMethod>",
            "</TriggerMethod><Notes>Hills &amp; wind &#8212; hard</Notes>",
        );
        assert!(validate(activity(&lap).as_bytes()).is_ok());
    }

    #[test]
    fn test_undeclared_entity_rejected() {
        let lap = LAP.replace(
            "</TriggerMethod>",
            "</TriggerMethod><Notes>Hills&nbsp;wind</Notes>",
        );
        let msg = message(&activity(&lap));
        assert!(msg.contains("undeclared entity '&nbsp;'"), "{msg}");
    }

    #[test]
    fn test_qualified_attributes() {
        let typed = LAP.replace("<Lap ", r#"<Lap xsi:type="ActivityLap_t" "#);
        assert!(validate(activity(&typed).as_bytes()).is_ok());

        let foreign = LAP.replace(
            "<Lap ",
            r#"<Lap xmlns:x="http://example.com/x" x:color="red" "#,
        );
        let msg = message(&activity(&foreign));
        assert!(msg.contains("'x:color' is not allowed on <Lap>"), "{msg}");

        let unbound = LAP.replace("<Lap ", r#"<Lap y:color="red" "#);
        assert!(validate(activity(&unbound).as_bytes()).is_err());
    }

    #[test]
    fn test_non_xsd_lexical_forms_rejected() {
        let id = activity(LAP).replace(
            "<Id>2024-05-01T06:00:00Z</Id>",
            "<Id>2024-05-01 06:00:00z</Id>",
        );
        assert!(message(&id).contains("a dateTime"));

        for literal in ["infinity", "inf", "nan", "+infinity"] {
            let lap = LAP.replace("60.5", literal);
            let msg = message(&activity(&lap));
            assert!(msg.contains("a double"), "{literal}: {msg}");
        }

        let lap = LAP.replace("60.5", "INF");
        assert!(validate(activity(&lap).as_bytes()).is_ok());
    }

    #[test]
    fn test_violation_reports_position() {
        let xml = activity(&LAP.replace("<Calories>10", "<Calories>ten"));
        let err = validate(xml.as_bytes()).unwrap_err();
        assert!(err.position > 0);
        assert!(err.to_string().starts_with("at byte "));
    }
}
