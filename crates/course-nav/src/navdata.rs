//! The course record and the field-scoped writes accepted against it.

use course_proto::{paths, PathValue};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.latitude.is_finite() || self.latitude.abs() > 90.0 {
            return Err(ValidationError::Position(format!("latitude {} out of range", self.latitude)));
        }
        if !self.longitude.is_finite() || self.longitude.abs() > 180.0 {
            return Err(ValidationError::Position(format!("longitude {} out of range", self.longitude)));
        }
        Ok(())
    }

    /// `null` clears; anything else must carry numeric `latitude` and `longitude`.
    pub fn from_value(value: &Value) -> Result<Option<Self>, ValidationError> {
        if value.is_null() {
            return Ok(None);
        }
        let obj = value.as_object()
            .ok_or_else(|| ValidationError::Position("expected an object".into()))?;
        let coord = |name: &str| {
            obj.get(name).and_then(Value::as_f64)
                .ok_or_else(|| ValidationError::Position(format!("missing or non-numeric {}", name)))
        };
        let p = Position::new(coord("latitude")?, coord("longitude")?);
        p.validate()?;
        Ok(Some(p))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveRoute {
    pub href: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub start_time: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextPoint {
    pub position: Option<Position>,
    #[serde(default)]
    pub arrival_circle: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreviousPoint {
    pub position: Option<Position>,
}

/// Records written before `previousPoint` and `arrivalCircle` existed still load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NavData {
    pub active_route: ActiveRoute,
    pub next_point: NextPoint,
    pub previous_point: PreviousPoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NavField {
    Href,
    StartTime,
    NextPosition,
    ArrivalCircle,
    PreviousPosition,
}

impl NavField {
    pub const ALL: [NavField; 5] = [
        NavField::Href,
        NavField::StartTime,
        NavField::NextPosition,
        NavField::ArrivalCircle,
        NavField::PreviousPosition,
    ];

    pub fn path(self) -> &'static str {
        match self {
            NavField::Href => paths::ACTIVE_ROUTE_HREF,
            NavField::StartTime => paths::ACTIVE_ROUTE_START_TIME,
            NavField::NextPosition => paths::NEXT_POINT_POSITION,
            NavField::ArrivalCircle => paths::NEXT_POINT_ARRIVAL_CIRCLE,
            NavField::PreviousPosition => paths::PREVIOUS_POINT_POSITION,
        }
    }

    pub fn from_path(path: &str) -> Option<Self> {
        NavField::ALL.into_iter().find(|f| f.path() == path)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    SetHref(Option<String>),
    SetStartTime(Option<OffsetDateTime>),
    SetNextPosition(Option<Position>),
    SetArrivalCircle(Option<f64>),
    SetPreviousPosition(Option<Position>),
}

impl Mutation {
    /// Decode a `(path, value)` write as delivered by the bus or a command.
    pub fn parse(path: &str, value: &Value) -> Result<Self, ValidationError> {
        let field = NavField::from_path(path)
            .ok_or_else(|| ValidationError::UnknownPath(path.to_string()))?;
        let m = match field {
            NavField::Href => match value {
                Value::Null => Mutation::SetHref(None),
                Value::String(s) => Mutation::SetHref(Some(s.clone())),
                other => return Err(ValidationError::Href(format!("expected string or null, got {}", other))),
            },
            NavField::StartTime => match value {
                Value::Null => Mutation::SetStartTime(None),
                Value::String(s) => {
                    let t = OffsetDateTime::parse(s, &Rfc3339)
                        .map_err(|e| ValidationError::StartTime(format!("{}: {}", s, e)))?;
                    Mutation::SetStartTime(Some(t))
                }
                other => return Err(ValidationError::StartTime(format!("expected RFC 3339 string, got {}", other))),
            },
            NavField::NextPosition => Mutation::SetNextPosition(Position::from_value(value)?),
            NavField::ArrivalCircle => match value {
                Value::Null => Mutation::SetArrivalCircle(None),
                Value::Number(n) => Mutation::SetArrivalCircle(n.as_f64()),
                other => return Err(ValidationError::ArrivalCircle(format!("expected number or null, got {}", other))),
            },
            NavField::PreviousPosition => Mutation::SetPreviousPosition(Position::from_value(value)?),
        };
        m.validate()?;
        Ok(m)
    }

    pub fn field(&self) -> NavField {
        match self {
            Mutation::SetHref(_) => NavField::Href,
            Mutation::SetStartTime(_) => NavField::StartTime,
            Mutation::SetNextPosition(_) => NavField::NextPosition,
            Mutation::SetArrivalCircle(_) => NavField::ArrivalCircle,
            Mutation::SetPreviousPosition(_) => NavField::PreviousPosition,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Mutation::SetNextPosition(Some(p)) | Mutation::SetPreviousPosition(Some(p)) => p.validate(),
            Mutation::SetArrivalCircle(Some(r)) if !r.is_finite() || *r < 0.0 => {
                Err(ValidationError::ArrivalCircle(format!("{} is not a non-negative distance", r)))
            }
            _ => Ok(()),
        }
    }
}

impl NavData {
    /// Applies a validated local write and returns every output field whose
    /// value actually changed. A new route stamps `startTime` with `now`.
    /// On error the record is untouched.
    pub fn apply(&mut self, mutation: Mutation, now: OffsetDateTime) -> Result<Vec<NavField>, ValidationError> {
        self.apply_with(mutation, Some(now))
    }

    /// Applies a write relayed from another publisher. `href` is taken as is;
    /// the publisher sends its own `startTime` alongside it.
    pub fn apply_relayed(&mut self, mutation: Mutation) -> Result<Vec<NavField>, ValidationError> {
        self.apply_with(mutation, None)
    }

    fn apply_with(&mut self, mutation: Mutation, stamp: Option<OffsetDateTime>) -> Result<Vec<NavField>, ValidationError> {
        mutation.validate()?;
        let before = self.clone();
        match mutation {
            Mutation::SetHref(href) => match href.filter(|h| !h.is_empty()) {
                Some(h) => {
                    let new_route = self.active_route.href.as_deref() != Some(h.as_str());
                    self.active_route.href = Some(h);
                    if let Some(now) = stamp {
                        if new_route || self.active_route.start_time.is_none() {
                            self.active_route.start_time = Some(now);
                        }
                    }
                }
                None => {
                    self.active_route.href = None;
                    self.active_route.start_time = None;
                }
            },
            Mutation::SetStartTime(t) => self.active_route.start_time = t,
            Mutation::SetNextPosition(p) => self.next_point.position = p,
            Mutation::SetArrivalCircle(r) => self.next_point.arrival_circle = r,
            Mutation::SetPreviousPosition(p) => self.previous_point.position = p,
        }
        Ok(NavField::ALL
            .into_iter()
            .filter(|f| before.value_of(*f) != self.value_of(*f))
            .collect())
    }

    pub fn value_of(&self, field: NavField) -> Value {
        match field {
            NavField::Href => json!(self.active_route.href),
            NavField::StartTime => self.active_route.start_time
                .and_then(|t| t.format(&Rfc3339).ok())
                .map_or(Value::Null, Value::String),
            NavField::NextPosition => json!(self.next_point.position),
            NavField::ArrivalCircle => json!(self.next_point.arrival_circle),
            NavField::PreviousPosition => json!(self.previous_point.position),
        }
    }

    pub fn to_path_values(&self, fields: &[NavField]) -> Vec<PathValue> {
        fields.iter().map(|f| PathValue::new(f.path(), self.value_of(*f))).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2024-05-01 12:00 UTC);

    #[test]
    fn valid_position_round_trips_through_apply() {
        let mut nav = NavData::default();
        let m = Mutation::parse(paths::NEXT_POINT_POSITION, &json!({"latitude": -41.5, "longitude": 174.25})).unwrap();
        assert_eq!(nav.apply(m, NOW).unwrap(), vec![NavField::NextPosition]);
        assert_eq!(nav.next_point.position, Some(Position::new(-41.5, 174.25)));
    }

    #[test]
    fn position_missing_a_coordinate_is_rejected() {
        for bad in [json!({"latitude": 1.0}), json!({"longitude": 1.0}), json!({"latitude": "1", "longitude": 2}), json!(5)] {
            assert!(matches!(Mutation::parse(paths::PREVIOUS_POINT_POSITION, &bad), Err(ValidationError::Position(_))), "{}", bad);
        }
        let mut nav = NavData::default();
        let before = nav.clone();
        assert!(nav.apply(Mutation::SetNextPosition(Some(Position::new(95.0, 0.0))), NOW).is_err());
        assert_eq!(nav, before);
    }

    #[test]
    fn null_position_clears() {
        let mut nav = NavData::default();
        nav.next_point.position = Some(Position::new(1.0, 2.0));
        let m = Mutation::parse(paths::NEXT_POINT_POSITION, &Value::Null).unwrap();
        nav.apply(m, NOW).unwrap();
        assert_eq!(nav.next_point.position, None);
    }

    #[test]
    fn href_sets_and_clears_start_time() {
        let mut nav = NavData::default();
        let changed = nav.apply(Mutation::SetHref(Some("/resources/routes/abc".into())), NOW).unwrap();
        assert_eq!(changed, vec![NavField::Href, NavField::StartTime]);
        assert_eq!(nav.active_route.start_time, Some(NOW));

        // same route again keeps the first start time and changes nothing
        let later = datetime!(2024-05-01 13:00 UTC);
        assert!(nav.apply(Mutation::SetHref(Some("/resources/routes/abc".into())), later).unwrap().is_empty());
        assert_eq!(nav.active_route.start_time, Some(NOW));

        let changed = nav.apply(Mutation::SetHref(Some(String::new())), later).unwrap();
        assert_eq!(changed, vec![NavField::Href, NavField::StartTime]);
        assert_eq!(nav.active_route, ActiveRoute::default());
    }

    #[test]
    fn only_differing_fields_are_reported() {
        let mut nav = NavData::default();
        assert_eq!(nav.apply(Mutation::SetArrivalCircle(Some(50.0)), NOW).unwrap(), vec![NavField::ArrivalCircle]);
        assert!(nav.apply(Mutation::SetArrivalCircle(Some(50.0)), NOW).unwrap().is_empty());
        assert!(nav.apply(Mutation::SetPreviousPosition(None), NOW).unwrap().is_empty());
        // clearing an already empty route is a no-op too
        assert!(nav.apply(Mutation::SetHref(None), NOW).unwrap().is_empty());
    }

    #[test]
    fn relayed_href_does_not_stamp_start_time() {
        let mut nav = NavData::default();
        assert_eq!(nav.apply_relayed(Mutation::SetHref(Some("r2".into()))).unwrap(), vec![NavField::Href]);
        assert_eq!(nav.active_route.start_time, None);
        assert_eq!(nav.apply_relayed(Mutation::SetStartTime(Some(NOW))).unwrap(), vec![NavField::StartTime]);
        assert!(nav.apply_relayed(Mutation::SetHref(Some("r2".into()))).unwrap().is_empty());
        assert_eq!(nav.apply_relayed(Mutation::SetHref(None)).unwrap(), vec![NavField::Href, NavField::StartTime]);
    }

    #[test]
    fn switching_route_restarts_clock() {
        let mut nav = NavData::default();
        nav.apply(Mutation::SetHref(Some("a".into())), NOW).unwrap();
        let later = datetime!(2024-05-02 0:00 UTC);
        nav.apply(Mutation::SetHref(Some("b".into())), later).unwrap();
        assert_eq!(nav.active_route.start_time, Some(later));
    }

    #[test]
    fn arrival_circle_validation() {
        assert_eq!(Mutation::parse(paths::NEXT_POINT_ARRIVAL_CIRCLE, &json!(50)).unwrap(), Mutation::SetArrivalCircle(Some(50.0)));
        assert_eq!(Mutation::parse(paths::NEXT_POINT_ARRIVAL_CIRCLE, &Value::Null).unwrap(), Mutation::SetArrivalCircle(None));
        assert!(Mutation::parse(paths::NEXT_POINT_ARRIVAL_CIRCLE, &json!("50")).is_err());
        assert!(Mutation::parse(paths::NEXT_POINT_ARRIVAL_CIRCLE, &json!(-1)).is_err());
    }

    #[test]
    fn start_time_must_be_rfc3339() {
        let m = Mutation::parse(paths::ACTIVE_ROUTE_START_TIME, &json!("2024-05-01T12:00:00Z")).unwrap();
        assert_eq!(m, Mutation::SetStartTime(Some(NOW)));
        assert!(matches!(Mutation::parse(paths::ACTIVE_ROUTE_START_TIME, &json!("yesterday")), Err(ValidationError::StartTime(_))));
    }

    #[test]
    fn unknown_and_derived_paths_are_not_writable() {
        assert!(matches!(Mutation::parse("navigation.speedOverGround", &json!(1)), Err(ValidationError::UnknownPath(_))));
        assert!(matches!(Mutation::parse(paths::NEXT_POINT_BEARING_TRUE, &json!(1)), Err(ValidationError::UnknownPath(_))));
    }

    #[test]
    fn record_layout_matches_persisted_form() {
        let mut nav = NavData::default();
        nav.apply(Mutation::SetHref(Some("r1".into())), NOW).unwrap();
        nav.apply(Mutation::SetArrivalCircle(Some(50.0)), NOW).unwrap();
        let v = serde_json::to_value(&nav).unwrap();
        assert_eq!(v["activeRoute"]["href"], "r1");
        assert_eq!(v["activeRoute"]["startTime"], "2024-05-01T12:00:00Z");
        assert_eq!(v["nextPoint"]["arrivalCircle"], 50.0);
        assert_eq!(v["previousPoint"]["position"], Value::Null);

        let legacy: NavData = serde_json::from_value(json!({
            "activeRoute": {"href": null, "startTime": null},
            "nextPoint": {"position": {"latitude": 10, "longitude": 20}}
        })).unwrap();
        assert_eq!(legacy.next_point.position, Some(Position::new(10.0, 20.0)));
        assert_eq!(legacy.next_point.arrival_circle, None);
    }

    #[test]
    fn path_values_follow_requested_fields() {
        let mut nav = NavData::default();
        nav.apply(Mutation::SetHref(Some("r1".into())), NOW).unwrap();
        let pvs = nav.to_path_values(&[NavField::Href, NavField::StartTime]);
        assert_eq!(pvs[0], PathValue::new(paths::ACTIVE_ROUTE_HREF, json!("r1")));
        assert_eq!(pvs[1].value, json!("2024-05-01T12:00:00Z"));
    }
}
