//! Assignment of items to output time slices.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::error::{LoaderError, Result};
use crate::item::ParsedItem;

/// Sortable group identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GroupKey {
    /// Property not present on the item.
    Missing,
    Int(i64),
    Text(String),
    Date(NaiveDate),
    Time(DateTime<Utc>),
    Index(usize),
}

impl From<&serde_json::Value> for GroupKey {
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Missing,
            serde_json::Value::String(s) => Self::Text(s.clone()),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Text(n.to_string()),
            },
            other => Self::Text(other.to_string()),
        }
    }
}

/// Caller-supplied grouping: `(item, original index) -> key`.
pub type GroupFn = Arc<dyn Fn(&ParsedItem, usize) -> GroupKey + Send + Sync>;

/// How items are merged into time slices.
#[derive(Clone, Default)]
pub enum GroupBy {
    /// Identical nominal timestamps merge.
    #[default]
    Time,
    /// Same local calendar date, using a longitude-derived offset.
    SolarDay,
    /// Every item on its own.
    Id,
    /// Equal values of an item property merge.
    Property(String),
    Custom(GroupFn),
}

impl GroupBy {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&ParsedItem, usize) -> GroupKey + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }
}

impl fmt::Debug for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Time => write!(f, "time"),
            Self::SolarDay => write!(f, "solar_day"),
            Self::Id => write!(f, "id"),
            Self::Property(p) => write!(f, "property({})", p),
            Self::Custom(_) => write!(f, "custom"),
        }
    }
}

impl FromStr for GroupBy {
    type Err = LoaderError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "time" => Self::Time,
            "solar_day" => Self::SolarDay,
            "id" => Self::Id,
            "" => return Err(LoaderError::invalid_query("empty groupby")),
            other => Self::Property(other.to_string()),
        })
    }
}

impl TryFrom<&str> for GroupBy {
    type Error = LoaderError;

    fn try_from(s: &str) -> Result<Self> {
        s.parse()
    }
}

/// Items split into time slices, each in fusion priority order.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeGroups {
    pub groups: Vec<Vec<usize>>,
    /// Nominal timestamp of the first item of each group.
    pub timestamps: Vec<DateTime<Utc>>,
}

impl TimeGroups {
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Hours to add to UTC for the local solar time at `lon`.
pub fn solar_offset(lon: f64) -> Duration {
    Duration::hours((lon / 15.0).round() as i64)
}

/// Local calendar date of `dt` at longitude `lon`.
pub fn solar_day(dt: DateTime<Utc>, lon: f64) -> NaiveDate {
    (dt + solar_offset(lon)).date_naive()
}

/// Group `items` into time slices.
///
/// Sorted by `(group, timestamp, id)`, or `(group, original index)` when
/// `preserve_order` is set; groups are contiguous runs of equal keys.
/// `fallback_lon` is used for solar days when an item has no footprint.
pub fn group_items(
    items: &[ParsedItem],
    groupby: &GroupBy,
    preserve_order: bool,
    fallback_lon: Option<f64>,
) -> Result<TimeGroups> {
    let timestamps = items
        .iter()
        .map(ParsedItem::nominal_datetime)
        .collect::<Result<Vec<_>>>()?;

    let keys: Vec<GroupKey> = items
        .iter()
        .enumerate()
        .map(|(idx, item)| match groupby {
            GroupBy::Time => GroupKey::Time(timestamps[idx]),
            GroupBy::SolarDay => {
                let lon = item.mid_longitude().or(fallback_lon).unwrap_or_else(|| {
                    tracing::debug!(item = %item.id, "no longitude for solar day, using UTC");
                    0.0
                });
                GroupKey::Date(solar_day(timestamps[idx], lon))
            }
            GroupBy::Id => GroupKey::Index(idx),
            GroupBy::Property(name) => item
                .properties
                .get(name)
                .map(GroupKey::from)
                .unwrap_or(GroupKey::Missing),
            GroupBy::Custom(f) => f(item, idx),
        })
        .collect();

    let mut order: Vec<usize> = (0..items.len()).collect();
    if preserve_order {
        order.sort_by(|&a, &b| keys[a].cmp(&keys[b]).then(a.cmp(&b)));
    } else {
        order.sort_by(|&a, &b| {
            keys[a]
                .cmp(&keys[b])
                .then(timestamps[a].cmp(&timestamps[b]))
                .then_with(|| items[a].id.cmp(&items[b].id))
        });
    }

    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut prev: Option<&GroupKey> = None;
    for idx in order {
        match (prev, groups.last_mut()) {
            (Some(key), Some(group)) if *key == keys[idx] => group.push(idx),
            _ => groups.push(vec![idx]),
        }
        prev = Some(&keys[idx]);
    }

    let group_timestamps = groups.iter().map(|g| timestamps[g[0]]).collect();

    tracing::debug!(
        items = items.len(),
        groups = groups.len(),
        groupby = ?groupby,
        "grouped items"
    );

    Ok(TimeGroups {
        groups,
        timestamps: group_timestamps,
    })
}
