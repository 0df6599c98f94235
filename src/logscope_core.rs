//! Core domain types for logscope: modes, time windows and API payloads.

pub mod types {
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use serde::de::{self, Deserializer};
    use serde::{Deserialize, Serialize, Serializer};
    use std::fmt;

    /// Epoch milliseconds.
    pub type Millis = i64;

    pub const DEFAULT_TIMEFRAME_SECS: u64 = 900;

    /// Which analysis or display the dashboard performs.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum Mode {
        #[default]
        #[serde(alias = "", alias = "table")]
        Search,
        #[serde(alias = "histogram")]
        Graph,
        #[serde(alias = "analyze")]
        Terms,
        Score,
        Trend,
        Mean,
        #[serde(alias = "id")]
        Document,
        Stream,
    }

    impl Mode {
        pub const CYCLE: [Mode; 7] = [
            Mode::Search,
            Mode::Graph,
            Mode::Terms,
            Mode::Score,
            Mode::Trend,
            Mode::Mean,
            Mode::Stream,
        ];

        pub fn as_str(&self) -> &'static str {
            match self {
                Mode::Search => "search",
                Mode::Graph => "graph",
                Mode::Terms => "terms",
                Mode::Score => "score",
                Mode::Trend => "trend",
                Mode::Mean => "mean",
                Mode::Document => "document",
                Mode::Stream => "stream",
            }
        }

        pub fn is_analysis(&self) -> bool {
            matches!(self, Mode::Terms | Mode::Score | Mode::Trend | Mode::Mean)
        }

        /// Next mode in the frontend cycle. Document mode is only entered from a row.
        pub fn next(&self) -> Mode {
            let idx = Self::CYCLE.iter().position(|mode| mode == self).unwrap_or(0);
            Self::CYCLE[(idx + 1) % Self::CYCLE.len()]
        }
    }

    impl fmt::Display for Mode {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    }

    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum GraphMode {
        #[default]
        Count,
        Mean,
    }

    impl GraphMode {
        pub fn as_str(&self) -> &'static str {
            match self {
                GraphMode::Count => "count",
                GraphMode::Mean => "mean",
            }
        }

        pub fn toggled(&self) -> GraphMode {
            match self {
                GraphMode::Count => GraphMode::Mean,
                GraphMode::Mean => GraphMode::Count,
            }
        }
    }

    /// Visible time window. Serialized as seconds (`"900"`), `"custom"` or `"all"`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub enum Timeframe {
        Last(u64),
        Custom,
        All,
    }

    impl Default for Timeframe {
        fn default() -> Self {
            Timeframe::Last(DEFAULT_TIMEFRAME_SECS)
        }
    }

    impl Timeframe {
        pub const PRESETS: [Timeframe; 8] = [
            Timeframe::Last(300),
            Timeframe::Last(900),
            Timeframe::Last(3_600),
            Timeframe::Last(21_600),
            Timeframe::Last(86_400),
            Timeframe::Last(604_800),
            Timeframe::Last(2_592_000),
            Timeframe::All,
        ];

        pub fn resolve(&self, now: DateTime<Utc>, custom: Option<&TimeRange>) -> Option<TimeRange> {
            match self {
                Timeframe::Last(secs) => {
                    let secs = i64::try_from(*secs).unwrap_or(i64::MAX);
                    let from = Duration::try_seconds(secs)
                        .and_then(|span| now.checked_sub_signed(span))
                        .unwrap_or(DateTime::<Utc>::MIN_UTC);
                    Some(TimeRange::new(from, now))
                }
                Timeframe::Custom => custom.cloned(),
                Timeframe::All => None,
            }
        }

        /// Next preset; custom windows step back to the first preset.
        pub fn next_preset(&self) -> Timeframe {
            let idx = Self::PRESETS.iter().position(|preset| preset == self);
            match idx {
                Some(idx) => Self::PRESETS[(idx + 1) % Self::PRESETS.len()],
                None => Self::PRESETS[0],
            }
        }

        pub fn label(&self) -> String {
            match self {
                Timeframe::Custom => "custom".to_string(),
                Timeframe::All => "all time".to_string(),
                Timeframe::Last(secs) => {
                    let secs = *secs;
                    if secs % 86_400 == 0 {
                        format!("last {}d", secs / 86_400)
                    } else if secs % 3_600 == 0 {
                        format!("last {}h", secs / 3_600)
                    } else if secs % 60 == 0 {
                        format!("last {}m", secs / 60)
                    } else {
                        format!("last {secs}s")
                    }
                }
            }
        }

        fn parse(value: &str) -> Option<Timeframe> {
            match value.trim() {
                "custom" => Some(Timeframe::Custom),
                "all" => Some(Timeframe::All),
                other => other.parse::<u64>().ok().filter(|secs| *secs > 0).map(Timeframe::Last),
            }
        }
    }

    impl fmt::Display for Timeframe {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Timeframe::Last(secs) => write!(f, "{secs}"),
                Timeframe::Custom => f.write_str("custom"),
                Timeframe::All => f.write_str("all"),
            }
        }
    }

    impl std::str::FromStr for Timeframe {
        type Err = String;

        fn from_str(value: &str) -> Result<Self, Self::Err> {
            Timeframe::parse(value).ok_or_else(|| format!("invalid timeframe `{value}`"))
        }
    }

    impl Serialize for Timeframe {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.collect_str(self)
        }
    }

    impl<'de> Deserialize<'de> for Timeframe {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            #[derive(Deserialize)]
            #[serde(untagged)]
            enum Raw {
                Text(String),
                Seconds(u64),
            }

            match Raw::deserialize(deserializer)? {
                Raw::Text(text) => Timeframe::parse(&text)
                    .ok_or_else(|| de::Error::custom(format!("invalid timeframe `{text}`"))),
                Raw::Seconds(0) => Err(de::Error::custom("timeframe must be positive")),
                Raw::Seconds(secs) => Ok(Timeframe::Last(secs)),
            }
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct TimeRange {
        pub from: DateTime<Utc>,
        pub to: DateTime<Utc>,
    }

    impl TimeRange {
        pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
            Self { from, to }
        }

        pub fn from_millis(from: Millis, to: Millis) -> Option<Self> {
            Some(Self { from: datetime_from_millis(from)?, to: datetime_from_millis(to)? })
        }

        pub fn ordered(self) -> Self {
            if self.from <= self.to {
                self
            } else {
                Self { from: self.to, to: self.from }
            }
        }

        pub fn from_ms(&self) -> Millis {
            self.from.timestamp_millis()
        }

        pub fn to_ms(&self) -> Millis {
            self.to.timestamp_millis()
        }

        pub fn span_ms(&self) -> Millis {
            (self.to_ms() - self.from_ms()).max(0)
        }
    }

    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum SortOrder {
        Asc,
        #[default]
        Desc,
    }

    impl SortOrder {
        pub fn flipped(&self) -> SortOrder {
            match self {
                SortOrder::Asc => SortOrder::Desc,
                SortOrder::Desc => SortOrder::Asc,
            }
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct SortSpec {
        pub field: String,
        #[serde(default)]
        pub order: SortOrder,
    }

    pub fn datetime_from_millis(millis: Millis) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(millis).single()
    }
}

pub mod responses {
    use crate::logscope_core::types::{datetime_from_millis, Millis, TimeRange};
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serialize};
    use serde_json::Value;
    use std::collections::BTreeMap;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    pub struct Hit {
        #[serde(rename = "_id")]
        pub id: String,
        #[serde(rename = "_index", default)]
        pub index: String,
        #[serde(rename = "_source", default)]
        pub source: Value,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        pub highlight: BTreeMap<String, Vec<String>>,
    }

    impl Hit {
        pub fn field(&self, field: &str) -> Option<&Value> {
            field_value(&self.source, field)
        }

        pub fn timestamp(&self, field: &str) -> Option<DateTime<Utc>> {
            match self.field(field)? {
                Value::String(text) => DateTime::parse_from_rfc3339(text)
                    .ok()
                    .map(|value| value.with_timezone(&Utc)),
                Value::Number(number) => number.as_i64().and_then(datetime_from_millis),
                _ => None,
            }
        }

        pub fn timestamp_ms(&self, field: &str) -> Option<Millis> {
            self.timestamp(field).map(|value| value.timestamp_millis())
        }
    }

    /// Looks up `field` as a literal key first, then as a dotted path.
    pub fn field_value<'a>(source: &'a Value, field: &str) -> Option<&'a Value> {
        let object = source.as_object()?;
        if let Some(value) = object.get(field) {
            return Some(value);
        }
        let (head, rest) = field.split_once('.')?;
        field_value(object.get(head)?, rest)
    }

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    pub struct Hits {
        #[serde(default, deserialize_with = "deserialize_total")]
        pub total: u64,
        #[serde(default)]
        pub hits: Vec<Hit>,
    }

    fn deserialize_total<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Total {
            Plain(u64),
            Tracked { value: u64 },
        }

        Ok(match Total::deserialize(deserializer)? {
            Total::Plain(value) | Total::Tracked { value } => value,
        })
    }

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    pub struct ResponseMeta {
        #[serde(default)]
        pub time: Option<TimeRange>,
        #[serde(default)]
        pub per_page: Option<usize>,
        #[serde(default)]
        pub default_fields: Vec<String>,
    }

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    pub struct SearchResponse {
        #[serde(default)]
        pub hits: Hits,
        #[serde(default, alias = "kibana")]
        pub meta: ResponseMeta,
    }

    impl SearchResponse {
        pub fn is_empty(&self) -> bool {
            self.hits.hits.is_empty()
        }
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    pub struct GraphEntry {
        pub time: Millis,
        pub count: u64,
        #[serde(default)]
        pub mean: Option<f64>,
    }

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    pub struct GraphResponse {
        #[serde(default)]
        pub entries: Vec<GraphEntry>,
        #[serde(default)]
        pub next: Option<u32>,
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    pub struct AnalyzeRow {
        pub term: String,
        pub count: u64,
        #[serde(default)]
        pub score: Option<f64>,
        #[serde(default)]
        pub trend: Option<f64>,
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    pub struct FieldStats {
        pub count: u64,
        pub min: f64,
        pub max: f64,
        pub mean: f64,
        pub total: f64,
    }

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    pub struct AnalyzeResponse {
        #[serde(default)]
        pub rows: Vec<AnalyzeRow>,
        #[serde(default)]
        pub stats: Option<FieldStats>,
    }

    impl AnalyzeResponse {
        pub fn is_empty(&self) -> bool {
            self.rows.is_empty() && self.stats.as_ref().map_or(true, |stats| stats.count == 0)
        }
    }

    /// A decoded API response, tagged by the endpoint that produced it.
    #[derive(Clone, Debug, PartialEq)]
    pub enum ApiPayload {
        Search(SearchResponse),
        Graph(GraphResponse),
        Analyze(AnalyzeResponse),
        Document(SearchResponse),
        Stream(SearchResponse),
    }
}

pub use responses::{
    field_value, AnalyzeResponse, AnalyzeRow, ApiPayload, FieldStats, GraphEntry, GraphResponse,
    Hit, Hits, ResponseMeta, SearchResponse,
};
pub use types::{
    datetime_from_millis, GraphMode, Millis, Mode, SortOrder, SortSpec, TimeRange, Timeframe,
};
