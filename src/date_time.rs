use chrono::{DateTime as ChronoDateTime, Duration, SecondsFormat, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// UTC timestamp rendered as RFC3339 with millisecond precision
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct DateTime(pub ChronoDateTime<Utc>);

impl Serialize for DateTime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_rfc3339())
    }
}

impl<'de> Deserialize<'de> for DateTime {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ChronoDateTime::parse_from_rfc3339(&s)
            .map(|dt| DateTime(dt.with_timezone(&Utc)))
            .map_err(de::Error::custom)
    }
}

impl DateTime {
    pub fn now() -> Self {
        DateTime(Utc::now())
    }

    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn parse(s: &str) -> Option<Self> {
        ChronoDateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| DateTime(dt.with_timezone(&Utc)))
    }

    pub fn after(&self, duration: Duration) -> Self {
        DateTime(self.0 + duration)
    }

    /// Whether this instant lies strictly before `now`
    pub fn is_before(&self, now: &DateTime) -> bool {
        self.0 < now.0
    }
}

impl From<ChronoDateTime<Utc>> for DateTime {
    fn from(dt: ChronoDateTime<Utc>) -> Self {
        DateTime(dt)
    }
}
