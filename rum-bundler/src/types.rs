use crate::domain_key::DomainKey;
use chrono::{Datelike, Days, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Checkpoint names with a fixed meaning in the aggregation.
pub mod checkpoint {
    pub const EXPERIMENT: &str = "experiment";
    pub const CLICK: &str = "click";
    pub const CONVERT: &str = "convert";
}

const HOURS_PER_DAY: u8 = 24;

/// Number of trailing days covered by a "last month" fetch.
pub const LAST_MONTH_DAYS: u32 = 31;

/// A single event recorded inside a bundle.
///
/// For the `experiment` checkpoint `source` is the experiment identifier and
/// `target` is the variant. For clicks and conversions `source` names the
/// element or conversion that fired.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Event {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub checkpoint: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub source: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub target: String,
}

impl Event {
    pub fn new<C, S, T>(checkpoint: C, source: S, target: T) -> Self
    where
        C: Into<String>,
        S: Into<String>,
        T: Into<String>,
    {
        Event {
            checkpoint: checkpoint.into(),
            source: source.into(),
            target: target.into(),
        }
    }
}

/// One page view (or session fragment) worth of telemetry. `weight` is the
/// number of real sessions this sampled record stands for.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct RumBundle {
    #[serde(default)]
    pub url: String,
    #[serde(default, deserialize_with = "lenient_weight")]
    pub weight: u64,
    #[serde(default)]
    pub events: Vec<Event>,
}

impl RumBundle {
    pub fn new<U: Into<String>>(url: U, weight: u64, events: Vec<Event>) -> Self {
        RumBundle {
            url: url.into(),
            weight,
            events,
        }
    }

    /// Drops every event whose checkpoint is not in `checkpoints`.
    pub fn retain_checkpoints(&mut self, checkpoints: &HashSet<String>) {
        self.events.retain(|event| checkpoints.contains(&event.checkpoint));
    }
}

/// Body of a single bundle endpoint response.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct BundleChunk {
    #[serde(rename = "rumBundles", default)]
    pub rum_bundles: Vec<RumBundle>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawWeight {
    Integer(u64),
    Float(f64),
}

/// Fractional weights round to the nearest integer. Null, negative and
/// non-finite weights count as 0.
fn lenient_weight<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<RawWeight>::deserialize(deserializer)? {
        Some(RawWeight::Integer(weight)) => weight,
        Some(RawWeight::Float(weight)) if weight.is_finite() && weight > 0.0 => {
            weight.round() as u64
        }
        _ => 0,
    })
}

/// Time slice covered by one bundle endpoint.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    Hourly,
    Daily,
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Granularity::Hourly => f.write_str("hourly"),
            Granularity::Daily => f.write_str("daily"),
        }
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hourly" | "hour" => Ok(Granularity::Hourly),
            "daily" | "day" => Ok(Granularity::Daily),
            other => Err(format!("unknown granularity: {other}")),
        }
    }
}

/// A trailing window of whole days ending on `anchor` (today, UTC, unless set).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimeWindow {
    pub days: u32,
    pub granularity: Granularity,
    pub anchor: Option<NaiveDate>,
}

impl TimeWindow {
    pub fn days(days: u32) -> Self {
        TimeWindow {
            days,
            granularity: Granularity::Hourly,
            anchor: None,
        }
    }

    pub fn last_month() -> Self {
        Self::days(LAST_MONTH_DAYS)
    }

    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn ending_on(mut self, anchor: NaiveDate) -> Self {
        self.anchor = Some(anchor);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.days == 0
    }

    /// Lists the endpoints covering this window, most recent day first and
    /// hours ascending within a day.
    pub fn endpoints(&self, domain: &str, domain_key: &DomainKey) -> Vec<BundleEndpoint> {
        let today = self.anchor.unwrap_or_else(|| Utc::now().date_naive());
        let hours: Vec<Option<u8>> = match self.granularity {
            Granularity::Hourly => (0..HOURS_PER_DAY).map(Some).collect(),
            Granularity::Daily => vec![None],
        };

        let mut endpoints = Vec::new();
        for offset in 0..self.days {
            let Some(date) = today.checked_sub_days(Days::new(u64::from(offset))) else {
                break;
            };
            for hour in &hours {
                endpoints.push(BundleEndpoint {
                    domain: domain.to_string(),
                    date,
                    hour: *hour,
                    domain_key: domain_key.clone(),
                });
            }
        }
        endpoints
    }
}

/// A resolved bundle resource: one domain, one day and optionally one hour.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BundleEndpoint {
    pub domain: String,
    pub date: NaiveDate,
    pub hour: Option<u8>,
    pub domain_key: DomainKey,
}

impl BundleEndpoint {
    fn segments(&self) -> Vec<String> {
        let mut segments = vec![
            "bundles".to_string(),
            self.domain.clone(),
            format!("{:04}", self.date.year()),
            format!("{:02}", self.date.month()),
            format!("{:02}", self.date.day()),
        ];
        if let Some(hour) = self.hour {
            segments.push(format!("{hour:02}"));
        }
        segments
    }

    /// Path of the resource without the domain key, safe to log.
    pub fn path(&self) -> String {
        format!("/{}", self.segments().join("/"))
    }

    /// Full request URL including the `domainkey` query parameter.
    pub fn url(&self, base: &Url) -> Option<Url> {
        let mut url = join_segments(base, &self.segments())?;
        url.query_pairs_mut()
            .append_pair("domainkey", self.domain_key.as_query_value());
        Some(url)
    }
}

/// Appends path segments to `base`, keeping any path prefix it already has.
/// Returns `None` for URLs that cannot be a base (e.g. `mailto:`).
pub(crate) fn join_segments<S: AsRef<str>>(base: &Url, segments: &[S]) -> Option<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .ok()?
        .pop_if_empty()
        .extend(segments);
    Some(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchor() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    #[test]
    fn hourly_window_enumerates_days_descending_hours_ascending() {
        let key = DomainKey::Resolved("k".into());
        let endpoints = TimeWindow::days(2)
            .ending_on(anchor())
            .endpoints("example.com", &key);

        assert_eq!(endpoints.len(), 48);
        assert_eq!(endpoints[0].date, anchor());
        assert_eq!(endpoints[0].hour, Some(0));
        assert_eq!(endpoints[23].hour, Some(23));
        // Crosses the month boundary (2024 is a leap year)
        assert_eq!(
            endpoints[24].date,
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
        );
        assert_eq!(endpoints[24].hour, Some(0));
        assert!(endpoints.iter().all(|e| e.domain == "example.com"));
    }

    #[test]
    fn daily_window_has_no_hour() {
        let endpoints = TimeWindow::days(3)
            .with_granularity(Granularity::Daily)
            .ending_on(anchor())
            .endpoints("example.com", &DomainKey::Unresolved);

        assert_eq!(endpoints.len(), 3);
        assert!(endpoints.iter().all(|e| e.hour.is_none()));
        assert_eq!(endpoints[2].path(), "/bundles/example.com/2024/02/28");
    }

    #[test]
    fn empty_window() {
        let window = TimeWindow::days(0);
        assert!(window.is_empty());
        assert!(window.endpoints("example.com", &DomainKey::Unresolved).is_empty());
    }

    #[test]
    fn endpoint_url() {
        let base = Url::parse("https://rum.fastly-aem.page").unwrap();
        let endpoint = BundleEndpoint {
            domain: "www.example.com".into(),
            date: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            hour: Some(7),
            domain_key: DomainKey::Resolved("abc-123".into()),
        };

        assert_eq!(
            endpoint.url(&base).unwrap().as_str(),
            "https://rum.fastly-aem.page/bundles/www.example.com/2024/01/05/07?domainkey=abc-123"
        );
        assert_eq!(endpoint.path(), "/bundles/www.example.com/2024/01/05/07");

        let unresolved = BundleEndpoint {
            domain_key: DomainKey::Unresolved,
            ..endpoint
        };
        assert_eq!(unresolved.url(&base).unwrap().query(), Some("domainkey="));
    }

    #[test]
    fn endpoint_url_keeps_base_path() {
        let base = Url::parse("http://localhost:8080/rum/").unwrap();
        let endpoint = BundleEndpoint {
            domain: "example.com".into(),
            date: anchor(),
            hour: None,
            domain_key: DomainKey::Unresolved,
        };
        assert_eq!(
            endpoint.url(&base).unwrap().path(),
            "/rum/bundles/example.com/2024/03/01"
        );
    }

    #[test]
    fn window_stops_at_earliest_date() {
        let endpoints = TimeWindow::days(u32::MAX)
            .with_granularity(Granularity::Daily)
            .ending_on(NaiveDate::MIN + Days::new(2))
            .endpoints("example.com", &DomainKey::Unresolved);

        assert_eq!(endpoints.len(), 3);
        assert_eq!(endpoints[2].date, NaiveDate::MIN);
    }

    #[test]
    fn granularity_from_str() {
        assert_eq!("hourly".parse::<Granularity>(), Ok(Granularity::Hourly));
        assert_eq!("Daily".parse::<Granularity>(), Ok(Granularity::Daily));
        assert!("weekly".parse::<Granularity>().is_err());
    }

    #[test]
    fn deserialize_chunk() {
        let body = r#"{
            "rumBundles": [
                {
                    "id": "a1",
                    "host": "rum.hlx.page",
                    "time": "2024-03-01T00:00:01.000Z",
                    "url": "https://www.example.com/",
                    "weight": 100,
                    "events": [
                        {"checkpoint": "experiment", "source": "hero", "target": "control", "x": 1},
                        {"checkpoint": "click", "source": ".cta", "target": null},
                        {"checkpoint": "enter"}
                    ]
                },
                {"url": "https://www.example.com/about", "weight": 10}
            ]
        }"#;

        let chunk: BundleChunk = serde_json::from_str(body).unwrap();
        assert_eq!(chunk.rum_bundles.len(), 2);

        let first = &chunk.rum_bundles[0];
        assert_eq!(first.weight, 100);
        assert_eq!(first.events[0], Event::new("experiment", "hero", "control"));
        assert_eq!(first.events[1], Event::new("click", ".cta", ""));
        assert_eq!(first.events[2], Event::new("enter", "", ""));
        assert!(chunk.rum_bundles[1].events.is_empty());
    }

    #[test]
    fn deserialize_chunk_with_loose_weights() {
        let body = r#"{
            "rumBundles": [
                {"url": "/a", "weight": 10},
                {"url": "/b", "weight": 1.5},
                {"url": "/c", "weight": null},
                {"url": "/d", "weight": -3},
                {"url": "/e", "weight": 99.4}
            ]
        }"#;

        let chunk: BundleChunk = serde_json::from_str(body).unwrap();
        let weights: Vec<u64> = chunk.rum_bundles.iter().map(|b| b.weight).collect();
        assert_eq!(weights, vec![10, 2, 0, 0, 99]);
    }

    #[test]
    fn deserialize_chunk_without_bundles() {
        let chunk: BundleChunk = serde_json::from_str("{}").unwrap();
        assert!(chunk.rum_bundles.is_empty());
    }

    #[test]
    fn retain_checkpoints() {
        let mut bundle = RumBundle::new(
            "/a",
            1,
            vec![
                Event::new("experiment", "e", "v"),
                Event::new("viewmedia", "img", ""),
                Event::new("click", ".cta", ""),
            ],
        );
        let keep = HashSet::from(["experiment".to_string(), "click".to_string()]);
        bundle.retain_checkpoints(&keep);

        assert_eq!(
            bundle.events,
            vec![Event::new("experiment", "e", "v"), Event::new("click", ".cta", "")]
        );
    }
}
