use crate::tag_group::TagGroup;
use std::collections::{BTreeSet, HashMap};
use tracing::warn;

pub type HourData = HashMap<TagGroup, f64>;

/// Sparse hourly table: one `TagGroup -> value` map per hour of the month.
///
/// Absent keys read as zero. NaN is never stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadWriteData {
    hours: Vec<HourData>,
}

impl ReadWriteData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_hours(mut hours: Vec<HourData>) -> Self {
        for map in &mut hours {
            map.retain(|_, value| !value.is_nan());
        }
        Self { hours }
    }

    pub fn num(&self) -> usize {
        self.hours.len()
    }

    /// Hour `hour`, growing the table with empty hours when needed.
    pub fn get_data(&mut self, hour: usize) -> &mut HourData {
        if self.hours.len() <= hour {
            self.hours.resize_with(hour + 1, HashMap::new);
        }
        &mut self.hours[hour]
    }

    pub fn data(&self, hour: usize) -> Option<&HourData> {
        self.hours.get(hour)
    }

    pub fn value(&self, hour: usize, tag_group: &TagGroup) -> f64 {
        self.hours
            .get(hour)
            .and_then(|map| map.get(tag_group))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn add_value(&mut self, hour: usize, tag_group: &TagGroup, value: f64) {
        if value.is_nan() {
            warn!(hour, ?tag_group, "ignoring NaN contribution");
            return;
        }
        *self.get_data(hour).entry(tag_group.clone()).or_insert(0.0) += value;
    }

    pub fn put_value(&mut self, hour: usize, tag_group: &TagGroup, value: f64) {
        if value.is_nan() {
            warn!(hour, ?tag_group, "ignoring NaN value");
            return;
        }
        self.get_data(hour).insert(tag_group.clone(), value);
    }

    /// Merges `src` into hours starting at `offset`. Without `aggregate` the
    /// covered hours are replaced; with it values are added key by key.
    pub fn set_data(&mut self, src: Vec<HourData>, offset: usize, aggregate: bool) {
        for (i, map) in src.into_iter().enumerate() {
            let target = self.get_data(offset + i);
            if aggregate {
                for (tag_group, value) in map {
                    if !value.is_nan() {
                        *target.entry(tag_group).or_insert(0.0) += value;
                    }
                }
            } else {
                *target = map.into_iter().filter(|(_, value)| !value.is_nan()).collect();
            }
        }
    }

    pub fn cut_data(&mut self, hours: usize) {
        self.hours.truncate(hours);
    }

    pub fn tag_groups(&self) -> BTreeSet<TagGroup> {
        self.hours.iter().flat_map(|map| map.keys().cloned()).collect()
    }

    pub fn total(&self, hour: usize) -> f64 {
        self.hours.get(hour).map(|map| map.values().sum()).unwrap_or(0.0)
    }

    pub fn hours(&self) -> &[HourData] {
        &self.hours
    }

    /// Drops entries whose magnitude is below `epsilon`.
    pub fn clamp_small(&mut self, epsilon: f64) {
        for map in &mut self.hours {
            map.retain(|_, value| value.abs() >= epsilon);
        }
    }
}
