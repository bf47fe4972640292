//! Typed views over tagged structures.
//!
//! Graph entities and temporal/spatial values travel as [`Structure`] values
//! with fixed tags. These types parse a structure into a usable shape and
//! build one back for parameters. Parsing rejects wrong tags and missing
//! fields; the field-count side is already enforced by the unpacker's catalog.

use std::collections::HashMap;

use chrono::{DateTime as ChronoDateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use serde::{Deserialize, Serialize};

use super::catalog;
use super::value::{Structure, Value};
use super::PackStreamError;

fn expect_struct<'a>(
    value: &'a Value,
    tag: u8,
    what: &'static str,
) -> Result<&'a Structure, PackStreamError> {
    let s = value
        .as_structure()
        .ok_or(PackStreamError::UnexpectedType { expected: what, actual: value.type_name() })?;
    if s.tag != tag {
        return Err(PackStreamError::UnknownStructTag { tag: s.tag });
    }
    Ok(s)
}

fn int_field(s: &Structure, index: usize, what: &'static str) -> Result<i64, PackStreamError> {
    s.field(index)
        .and_then(Value::as_int)
        .ok_or(PackStreamError::UnexpectedType { expected: what, actual: "missing or non-integer" })
}

fn float_field(s: &Structure, index: usize, what: &'static str) -> Result<f64, PackStreamError> {
    s.field(index)
        .and_then(Value::as_float)
        .ok_or(PackStreamError::UnexpectedType { expected: what, actual: "missing or non-float" })
}

/// A graph node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Numeric node id
    pub id: i64,
    /// Node labels
    pub labels: Vec<String>,
    /// Node properties
    pub properties: HashMap<String, Value>,
    /// Element id, present on Bolt 5.x servers
    pub element_id: Option<String>,
}

impl Node {
    /// Build a node value for tests and parameters.
    pub fn new(id: i64, labels: Vec<String>, properties: HashMap<String, Value>) -> Self {
        Self { id, labels, properties, element_id: None }
    }

    /// Attach a 5.x element id.
    pub fn with_element_id(mut self, element_id: impl Into<String>) -> Self {
        self.element_id = Some(element_id.into());
        self
    }

    /// Encode as a tagged structure.
    pub fn to_value(&self) -> Value {
        let labels = self.labels.iter().map(|l| Value::from(l.as_str())).collect();
        let mut fields = vec![
            Value::Integer(self.id),
            Value::List(labels),
            Value::Map(self.properties.clone()),
        ];
        if let Some(eid) = &self.element_id {
            fields.push(Value::from(eid.as_str()));
        }
        Value::Structure(Structure::new(catalog::NODE, fields))
    }

    /// Parse from a decoded structure.
    pub fn from_value(value: &Value) -> Result<Self, PackStreamError> {
        let s = expect_struct(value, catalog::NODE, "Node")?;
        let id = int_field(s, 0, "node id")?;
        let labels = s
            .field(1)
            .and_then(Value::as_string_list)
            .ok_or(PackStreamError::UnexpectedType { expected: "node labels", actual: "missing" })?;
        let properties = s
            .field(2)
            .and_then(Value::as_map)
            .cloned()
            .ok_or(PackStreamError::UnexpectedType { expected: "node properties", actual: "missing" })?;
        let element_id = s.field(3).and_then(|v| v.as_str().map(str::to_string));
        Ok(Self { id, labels, properties, element_id })
    }
}

/// A directed relationship between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Numeric relationship id
    pub id: i64,
    /// Start node id
    pub start_node_id: i64,
    /// End node id
    pub end_node_id: i64,
    /// Relationship type
    pub rel_type: String,
    /// Relationship properties
    pub properties: HashMap<String, Value>,
    /// Element id, present on Bolt 5.x servers
    pub element_id: Option<String>,
    /// Start node element id (5.x)
    pub start_element_id: Option<String>,
    /// End node element id (5.x)
    pub end_element_id: Option<String>,
}

impl Relationship {
    /// Build a relationship value.
    pub fn new(
        id: i64,
        start_node_id: i64,
        end_node_id: i64,
        rel_type: impl Into<String>,
        properties: HashMap<String, Value>,
    ) -> Self {
        Self {
            id,
            start_node_id,
            end_node_id,
            rel_type: rel_type.into(),
            properties,
            element_id: None,
            start_element_id: None,
            end_element_id: None,
        }
    }

    /// Encode as a tagged structure.
    pub fn to_value(&self) -> Value {
        let mut fields = vec![
            Value::Integer(self.id),
            Value::Integer(self.start_node_id),
            Value::Integer(self.end_node_id),
            Value::from(self.rel_type.as_str()),
            Value::Map(self.properties.clone()),
        ];
        if let Some(eid) = &self.element_id {
            fields.push(Value::from(eid.as_str()));
            fields.push(Value::from(self.start_element_id.as_deref().unwrap_or_default()));
            fields.push(Value::from(self.end_element_id.as_deref().unwrap_or_default()));
        }
        Value::Structure(Structure::new(catalog::RELATIONSHIP, fields))
    }

    /// Parse from a decoded structure.
    pub fn from_value(value: &Value) -> Result<Self, PackStreamError> {
        let s = expect_struct(value, catalog::RELATIONSHIP, "Relationship")?;
        Ok(Self {
            id: int_field(s, 0, "relationship id")?,
            start_node_id: int_field(s, 1, "start node id")?,
            end_node_id: int_field(s, 2, "end node id")?,
            rel_type: s
                .field(3)
                .and_then(|v| v.as_str().map(str::to_string))
                .ok_or(PackStreamError::UnexpectedType { expected: "relationship type", actual: "missing" })?,
            properties: s
                .field(4)
                .and_then(Value::as_map)
                .cloned()
                .ok_or(PackStreamError::UnexpectedType { expected: "relationship properties", actual: "missing" })?,
            element_id: s.field(5).and_then(|v| v.as_str().map(str::to_string)),
            start_element_id: s.field(6).and_then(|v| v.as_str().map(str::to_string)),
            end_element_id: s.field(7).and_then(|v| v.as_str().map(str::to_string)),
        })
    }
}

/// A relationship stripped of its endpoints, as it appears inside a path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnboundRelationship {
    /// Numeric relationship id
    pub id: i64,
    /// Relationship type
    pub rel_type: String,
    /// Relationship properties
    pub properties: HashMap<String, Value>,
    /// Element id (5.x)
    pub element_id: Option<String>,
}

impl UnboundRelationship {
    /// Encode as a tagged structure.
    pub fn to_value(&self) -> Value {
        let mut fields = vec![
            Value::Integer(self.id),
            Value::from(self.rel_type.as_str()),
            Value::Map(self.properties.clone()),
        ];
        if let Some(eid) = &self.element_id {
            fields.push(Value::from(eid.as_str()));
        }
        Value::Structure(Structure::new(catalog::UNBOUND_RELATIONSHIP, fields))
    }

    /// Parse from a decoded structure.
    pub fn from_value(value: &Value) -> Result<Self, PackStreamError> {
        let s = expect_struct(value, catalog::UNBOUND_RELATIONSHIP, "UnboundRelationship")?;
        Ok(Self {
            id: int_field(s, 0, "relationship id")?,
            rel_type: s
                .field(1)
                .and_then(|v| v.as_str().map(str::to_string))
                .ok_or(PackStreamError::UnexpectedType { expected: "relationship type", actual: "missing" })?,
            properties: s.field(2).and_then(Value::as_map).cloned().unwrap_or_default(),
            element_id: s.field(3).and_then(|v| v.as_str().map(str::to_string)),
        })
    }
}

/// An alternating node/relationship traversal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Path {
    /// Distinct nodes visited by the path
    pub nodes: Vec<Node>,
    /// Distinct relationships traversed
    pub relationships: Vec<UnboundRelationship>,
    /// Traversal indices into the two lists, as sent on the wire
    pub indices: Vec<i64>,
}

impl Path {
    /// Encode as a tagged structure.
    pub fn to_value(&self) -> Value {
        Value::Structure(Structure::new(
            catalog::PATH,
            vec![
                Value::List(self.nodes.iter().map(Node::to_value).collect()),
                Value::List(self.relationships.iter().map(UnboundRelationship::to_value).collect()),
                Value::List(self.indices.iter().copied().map(Value::Integer).collect()),
            ],
        ))
    }

    /// Parse from a decoded structure.
    pub fn from_value(value: &Value) -> Result<Self, PackStreamError> {
        let s = expect_struct(value, catalog::PATH, "Path")?;
        let nodes = s
            .field(0)
            .and_then(Value::as_list)
            .ok_or(PackStreamError::UnexpectedType { expected: "path nodes", actual: "missing" })?
            .iter()
            .map(Node::from_value)
            .collect::<Result<Vec<_>, _>>()?;
        let relationships = s
            .field(1)
            .and_then(Value::as_list)
            .ok_or(PackStreamError::UnexpectedType { expected: "path relationships", actual: "missing" })?
            .iter()
            .map(UnboundRelationship::from_value)
            .collect::<Result<Vec<_>, _>>()?;
        let indices = s
            .field(2)
            .and_then(Value::as_list)
            .map(|l| l.iter().filter_map(Value::as_int).collect())
            .unwrap_or_default();
        Ok(Self { nodes, relationships, indices })
    }
}

/// Days since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Date {
    /// Days since 1970-01-01
    pub days: i64,
}

impl Date {
    /// From an epoch day count.
    pub fn new(days: i64) -> Self {
        Self { days }
    }

    /// From a calendar date.
    pub fn from_naive(date: NaiveDate) -> Self {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch date");
        Self { days: (date - epoch).num_days() }
    }

    /// As a calendar date, if in chrono's representable range.
    pub fn to_naive(&self) -> Option<NaiveDate> {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?;
        epoch.checked_add_signed(chrono::Duration::try_days(self.days)?)
    }

    /// Encode as a tagged structure.
    pub fn to_value(&self) -> Value {
        Value::Structure(Structure::new(catalog::DATE, vec![Value::Integer(self.days)]))
    }

    /// Parse from a decoded structure.
    pub fn from_value(value: &Value) -> Result<Self, PackStreamError> {
        let s = expect_struct(value, catalog::DATE, "Date")?;
        Ok(Self { days: int_field(s, 0, "date days")? })
    }
}

/// Nanoseconds since midnight with a fixed offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Time {
    /// Nanoseconds since midnight
    pub nanos: i64,
    /// Offset from UTC in seconds
    pub tz_offset_seconds: i32,
}

impl Time {
    /// From raw wire fields.
    pub fn new(nanos: i64, tz_offset_seconds: i32) -> Self {
        Self { nanos, tz_offset_seconds }
    }

    /// Encode as a tagged structure.
    pub fn to_value(&self) -> Value {
        Value::Structure(Structure::new(
            catalog::TIME,
            vec![Value::Integer(self.nanos), Value::Integer(self.tz_offset_seconds as i64)],
        ))
    }

    /// Parse from a decoded structure.
    pub fn from_value(value: &Value) -> Result<Self, PackStreamError> {
        let s = expect_struct(value, catalog::TIME, "Time")?;
        Ok(Self {
            nanos: int_field(s, 0, "time nanos")?,
            tz_offset_seconds: int_field(s, 1, "time offset")? as i32,
        })
    }
}

/// Nanoseconds since midnight without a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalTime {
    /// Nanoseconds since midnight
    pub nanos: i64,
}

impl LocalTime {
    /// From a nanosecond count.
    pub fn new(nanos: i64) -> Self {
        Self { nanos }
    }

    /// From a wall-clock time.
    pub fn from_naive(time: NaiveTime) -> Self {
        use chrono::Timelike;
        Self { nanos: time.num_seconds_from_midnight() as i64 * 1_000_000_000 + time.nanosecond() as i64 }
    }

    /// As a wall-clock time.
    pub fn to_naive(&self) -> Option<NaiveTime> {
        let secs = u32::try_from(self.nanos / 1_000_000_000).ok()?;
        let nanos = u32::try_from(self.nanos % 1_000_000_000).ok()?;
        NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
    }

    /// Encode as a tagged structure.
    pub fn to_value(&self) -> Value {
        Value::Structure(Structure::new(catalog::LOCAL_TIME, vec![Value::Integer(self.nanos)]))
    }

    /// Parse from a decoded structure.
    pub fn from_value(value: &Value) -> Result<Self, PackStreamError> {
        let s = expect_struct(value, catalog::LOCAL_TIME, "LocalTime")?;
        Ok(Self { nanos: int_field(s, 0, "local time nanos")? })
    }
}

/// A zoned point in time.
///
/// Bolt 4.x encodes the epoch seconds in local wall time (legacy form); 5.x
/// encodes them in UTC. The `utc` flag records which generation the value
/// came from or should be sent as; the unpacker's catalog already rejects the
/// wrong-generation tag for the negotiated version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateTime {
    /// Epoch seconds (UTC-based for 5.x, wall-time-based for legacy)
    pub seconds: i64,
    /// Nanosecond adjustment
    pub nanos: i64,
    /// Offset from UTC in seconds
    pub tz_offset_seconds: i32,
    /// Whether the seconds field is UTC-based
    pub utc: bool,
}

impl DateTime {
    /// From raw wire fields.
    pub fn new(seconds: i64, nanos: i64, tz_offset_seconds: i32, utc: bool) -> Self {
        Self { seconds, nanos, tz_offset_seconds, utc }
    }

    /// From a chrono datetime, in the given wire generation.
    pub fn from_chrono(dt: ChronoDateTime<FixedOffset>, utc: bool) -> Self {
        use chrono::Offset;
        let offset = dt.offset().fix().local_minus_utc();
        let seconds = if utc { dt.timestamp() } else { dt.timestamp() + offset as i64 };
        Self {
            seconds,
            nanos: dt.timestamp_subsec_nanos() as i64,
            tz_offset_seconds: offset,
            utc,
        }
    }

    /// As a chrono datetime with its fixed offset.
    pub fn to_chrono(&self) -> Option<ChronoDateTime<FixedOffset>> {
        let utc_seconds = if self.utc {
            self.seconds
        } else {
            self.seconds - self.tz_offset_seconds as i64
        };
        let offset = FixedOffset::east_opt(self.tz_offset_seconds)?;
        let nanos = u32::try_from(self.nanos).ok()?;
        let utc = ChronoDateTime::from_timestamp(utc_seconds, nanos)?;
        Some(offset.from_utc_datetime(&utc.naive_utc()))
    }

    /// Encode as a tagged structure of the recorded generation.
    pub fn to_value(&self) -> Value {
        let tag = if self.utc { catalog::DATE_TIME } else { catalog::DATE_TIME_LEGACY };
        Value::Structure(Structure::new(
            tag,
            vec![
                Value::Integer(self.seconds),
                Value::Integer(self.nanos),
                Value::Integer(self.tz_offset_seconds as i64),
            ],
        ))
    }

    /// Parse from either generation's structure.
    pub fn from_value(value: &Value) -> Result<Self, PackStreamError> {
        let s = value
            .as_structure()
            .ok_or(PackStreamError::UnexpectedType { expected: "DateTime", actual: value.type_name() })?;
        let utc = match s.tag {
            catalog::DATE_TIME => true,
            catalog::DATE_TIME_LEGACY => false,
            other => return Err(PackStreamError::UnknownStructTag { tag: other }),
        };
        Ok(Self {
            seconds: int_field(s, 0, "datetime seconds")?,
            nanos: int_field(s, 1, "datetime nanos")?,
            tz_offset_seconds: int_field(s, 2, "datetime offset")? as i32,
            utc,
        })
    }
}

/// A point in time without a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalDateTime {
    /// Epoch seconds
    pub seconds: i64,
    /// Nanosecond adjustment
    pub nanos: i64,
}

impl LocalDateTime {
    /// From raw wire fields.
    pub fn new(seconds: i64, nanos: i64) -> Self {
        Self { seconds, nanos }
    }

    /// From a chrono naive datetime.
    pub fn from_naive(dt: NaiveDateTime) -> Self {
        Self { seconds: dt.and_utc().timestamp(), nanos: dt.and_utc().timestamp_subsec_nanos() as i64 }
    }

    /// As a chrono naive datetime.
    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        let nanos = u32::try_from(self.nanos).ok()?;
        ChronoDateTime::from_timestamp(self.seconds, nanos).map(|dt| dt.naive_utc())
    }

    /// Encode as a tagged structure.
    pub fn to_value(&self) -> Value {
        Value::Structure(Structure::new(
            catalog::LOCAL_DATE_TIME,
            vec![Value::Integer(self.seconds), Value::Integer(self.nanos)],
        ))
    }

    /// Parse from a decoded structure.
    pub fn from_value(value: &Value) -> Result<Self, PackStreamError> {
        let s = expect_struct(value, catalog::LOCAL_DATE_TIME, "LocalDateTime")?;
        Ok(Self {
            seconds: int_field(s, 0, "local datetime seconds")?,
            nanos: int_field(s, 1, "local datetime nanos")?,
        })
    }
}

/// A temporal amount in months, days, seconds and nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Duration {
    /// Months component
    pub months: i64,
    /// Days component
    pub days: i64,
    /// Seconds component
    pub seconds: i64,
    /// Nanoseconds component
    pub nanos: i64,
}

impl Duration {
    /// From raw wire fields.
    pub fn new(months: i64, days: i64, seconds: i64, nanos: i64) -> Self {
        Self { months, days, seconds, nanos }
    }

    /// Encode as a tagged structure.
    pub fn to_value(&self) -> Value {
        Value::Structure(Structure::new(
            catalog::DURATION,
            vec![
                Value::Integer(self.months),
                Value::Integer(self.days),
                Value::Integer(self.seconds),
                Value::Integer(self.nanos),
            ],
        ))
    }

    /// Parse from a decoded structure.
    pub fn from_value(value: &Value) -> Result<Self, PackStreamError> {
        let s = expect_struct(value, catalog::DURATION, "Duration")?;
        Ok(Self {
            months: int_field(s, 0, "duration months")?,
            days: int_field(s, 1, "duration days")?,
            seconds: int_field(s, 2, "duration seconds")?,
            nanos: int_field(s, 3, "duration nanos")?,
        })
    }
}

/// A 2D spatial point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2D {
    /// Spatial reference system id
    pub srid: i32,
    /// X coordinate
    pub x: f64,
    /// Y coordinate
    pub y: f64,
}

impl Point2D {
    /// From coordinates.
    pub fn new(srid: i32, x: f64, y: f64) -> Self {
        Self { srid, x, y }
    }

    /// Encode as a tagged structure.
    pub fn to_value(&self) -> Value {
        Value::Structure(Structure::new(
            catalog::POINT_2D,
            vec![Value::Integer(self.srid as i64), Value::Float(self.x), Value::Float(self.y)],
        ))
    }

    /// Parse from a decoded structure.
    pub fn from_value(value: &Value) -> Result<Self, PackStreamError> {
        let s = expect_struct(value, catalog::POINT_2D, "Point2D")?;
        Ok(Self {
            srid: int_field(s, 0, "point srid")? as i32,
            x: float_field(s, 1, "point x")?,
            y: float_field(s, 2, "point y")?,
        })
    }
}

/// A 3D spatial point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point3D {
    /// Spatial reference system id
    pub srid: i32,
    /// X coordinate
    pub x: f64,
    /// Y coordinate
    pub y: f64,
    /// Z coordinate
    pub z: f64,
}

impl Point3D {
    /// From coordinates.
    pub fn new(srid: i32, x: f64, y: f64, z: f64) -> Self {
        Self { srid, x, y, z }
    }

    /// Encode as a tagged structure.
    pub fn to_value(&self) -> Value {
        Value::Structure(Structure::new(
            catalog::POINT_3D,
            vec![
                Value::Integer(self.srid as i64),
                Value::Float(self.x),
                Value::Float(self.y),
                Value::Float(self.z),
            ],
        ))
    }

    /// Parse from a decoded structure.
    pub fn from_value(value: &Value) -> Result<Self, PackStreamError> {
        let s = expect_struct(value, catalog::POINT_3D, "Point3D")?;
        Ok(Self {
            srid: int_field(s, 0, "point srid")? as i32,
            x: float_field(s, 1, "point x")?,
            y: float_field(s, 2, "point y")?,
            z: float_field(s, 3, "point z")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(entries: &[(&str, Value)]) -> HashMap<String, Value> {
        entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn node_round_trip() {
        let node = Node::new(7, vec!["Person".into()], props(&[("age", Value::Integer(30))]));
        let parsed = Node::from_value(&node.to_value()).unwrap();
        assert_eq!(parsed, node);
        assert_eq!(parsed.element_id, None);
    }

    #[test]
    fn node_with_element_id() {
        let node = Node::new(7, vec![], HashMap::new()).with_element_id("4:abc:7");
        let value = node.to_value();
        assert_eq!(value.as_structure().unwrap().len(), 4);
        let parsed = Node::from_value(&value).unwrap();
        assert_eq!(parsed.element_id.as_deref(), Some("4:abc:7"));
    }

    #[test]
    fn node_wrong_tag_rejected() {
        let rel = Relationship::new(1, 2, 3, "KNOWS", HashMap::new());
        let err = Node::from_value(&rel.to_value()).unwrap_err();
        assert!(matches!(err, PackStreamError::UnknownStructTag { .. }));
    }

    #[test]
    fn relationship_round_trip() {
        let rel = Relationship::new(1, 10, 20, "KNOWS", props(&[("since", Value::Integer(2020))]));
        let parsed = Relationship::from_value(&rel.to_value()).unwrap();
        assert_eq!(parsed, rel);
    }

    #[test]
    fn path_round_trip() {
        let path = Path {
            nodes: vec![Node::new(1, vec!["A".into()], HashMap::new())],
            relationships: vec![UnboundRelationship {
                id: 5,
                rel_type: "LINKS".into(),
                properties: HashMap::new(),
                element_id: None,
            }],
            indices: vec![1, 1],
        };
        let parsed = Path::from_value(&path.to_value()).unwrap();
        assert_eq!(parsed, path);
    }

    #[test]
    fn date_chrono_round_trip() {
        let naive = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
        let date = Date::from_naive(naive);
        assert_eq!(date.days, 18628);
        assert_eq!(date.to_naive(), Some(naive));
        assert_eq!(Date::from_value(&date.to_value()).unwrap(), date);
    }

    #[test]
    fn local_time_chrono_round_trip() {
        let naive = NaiveTime::from_hms_nano_opt(13, 30, 5, 42).unwrap();
        let time = LocalTime::from_naive(naive);
        assert_eq!(time.to_naive(), Some(naive));
        assert_eq!(LocalTime::from_value(&time.to_value()).unwrap(), time);
    }

    #[test]
    fn datetime_generations() {
        let utc = DateTime::new(1_600_000_000, 5, 3600, true);
        assert_eq!(utc.to_value().as_structure().unwrap().tag, catalog::DATE_TIME);
        assert_eq!(DateTime::from_value(&utc.to_value()).unwrap(), utc);

        let legacy = DateTime::new(1_600_003_600, 5, 3600, false);
        assert_eq!(legacy.to_value().as_structure().unwrap().tag, catalog::DATE_TIME_LEGACY);
        let parsed = DateTime::from_value(&legacy.to_value()).unwrap();
        assert!(!parsed.utc);

        // Both generations name the same instant here.
        assert_eq!(
            utc.to_chrono().unwrap().timestamp(),
            legacy.to_chrono().unwrap().timestamp()
        );
    }

    #[test]
    fn local_datetime_round_trip() {
        let dt = LocalDateTime::new(1_700_000_000, 123);
        let naive = dt.to_naive().unwrap();
        assert_eq!(LocalDateTime::from_naive(naive), dt);
        assert_eq!(LocalDateTime::from_value(&dt.to_value()).unwrap(), dt);
    }

    #[test]
    fn duration_round_trip() {
        let dur = Duration::new(12, 30, 3600, 500);
        assert_eq!(Duration::from_value(&dur.to_value()).unwrap(), dur);
    }

    #[test]
    fn points_round_trip() {
        let p2 = Point2D::new(4326, 1.5, 2.5);
        assert_eq!(Point2D::from_value(&p2.to_value()).unwrap(), p2);

        let p3 = Point3D::new(4979, 1.0, 2.0, 3.0);
        assert_eq!(Point3D::from_value(&p3.to_value()).unwrap(), p3);
    }
}
