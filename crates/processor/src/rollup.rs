use std::collections::HashMap;

use billing_core::time::{self, HOURS_PER_DAY, HOURS_PER_WEEK};
use billing_core::{HourData, Product, ReadWriteData, RunData, TagGroup, product_label};
use billing_store::{ArtifactStore, Metric};
use billing_store::artifacts::{
    daily_name, hourly_name, instances_name, monthly_name, tagdb_name, weekly_name,
};
use chrono::{Datelike, NaiveDate};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::{ProcessorError, Result};
use crate::util::time::{carry_days, day_of_year_index, months_between, week_offset};

/// Daily, weekly and monthly reductions of one month cube.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summaries {
    pub daily: Vec<HourData>,
    pub weekly: Vec<HourData>,
    pub monthly: Vec<HourData>,
}

fn add_into(list: &mut Vec<HourData>, index: usize, tag_group: &TagGroup, value: f64) {
    if list.len() <= index {
        list.resize_with(index + 1, HashMap::new);
    }
    *list[index].entry(tag_group.clone()).or_insert(0.0) += value;
}

/// Reduces `data` for `month`. Weeks that straddle a month boundary are
/// completed from the neighbouring cubes: the trailing days of `previous` go
/// to the first week and the leading days of `next` to the last week. Neither
/// neighbour reaches the daily or monthly lists.
pub fn summarize(
    month: NaiveDate,
    data: &ReadWriteData,
    previous: Option<&ReadWriteData>,
    next: Option<&ReadWriteData>,
) -> Summaries {
    let carry_hours = carry_days(month) * HOURS_PER_DAY;
    let month_hours = time::hours_in_month(month);
    let mut summaries = Summaries {
        daily: vec![HashMap::new(); time::days_in_month(month)],
        weekly: vec![HashMap::new(); (carry_hours + month_hours).div_ceil(HOURS_PER_WEEK)],
        monthly: vec![HashMap::new()],
    };

    if let Some(previous) = previous {
        let previous_hours = time::hours_in_month(time::previous_month(month));
        for hour in previous_hours.saturating_sub(carry_hours)..previous_hours {
            for (tag_group, value) in nonzero(previous, hour) {
                add_into(&mut summaries.weekly, 0, tag_group, value);
            }
        }
    }

    for (hour, map) in data.hours().iter().enumerate() {
        for (tag_group, value) in map {
            if *value == 0.0 {
                continue;
            }
            add_into(&mut summaries.monthly, 0, tag_group, *value);
            add_into(&mut summaries.daily, hour / HOURS_PER_DAY, tag_group, *value);
            let week = (hour + carry_hours) / HOURS_PER_WEEK;
            add_into(&mut summaries.weekly, week, tag_group, *value);
        }
    }

    if let Some(next) = next {
        let last_week = summaries.weekly.len() - 1;
        let lead_hours = (7 - carry_days(time::next_month(month))) % 7 * HOURS_PER_DAY;
        for hour in 0..lead_hours {
            for (tag_group, value) in nonzero(next, hour) {
                add_into(&mut summaries.weekly, last_week, tag_group, value);
            }
        }
    }
    summaries
}

fn nonzero(cube: &ReadWriteData, hour: usize) -> impl Iterator<Item = (&TagGroup, f64)> {
    cube.data(hour)
        .into_iter()
        .flatten()
        .map(|(tag_group, value)| (tag_group, *value))
        .filter(|(_, value)| *value != 0.0)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub cubes: usize,
    pub artifacts: usize,
}

/// Writes every artifact derived from one month run.
pub struct Archiver<'a> {
    artifacts: &'a ArtifactStore,
    start_date: NaiveDate,
}

struct CubeJob<'r> {
    metric: Metric,
    product: Option<&'r Product>,
    cube: &'r ReadWriteData,
}

impl CubeJob<'_> {
    fn label(&self) -> &str {
        product_label(self.product)
    }
}

impl<'a> Archiver<'a> {
    pub fn new(artifacts: &'a ArtifactStore, start_date: NaiveDate) -> Self {
        Self { artifacts, start_date }
    }

    /// Tag index, then summaries, then hourly cubes, then instances. A write
    /// failure stops the archive.
    pub fn archive(&self, run: &RunData) -> Result<ArchiveSummary> {
        let month = run.month;
        let month_label = time::month_label(month);
        let mut written = 0;

        for (product, cube) in run.cost.iter() {
            let label = product_label(product);
            self.artifacts
                .update_tag_index(label, month, cube.tag_groups())
                .map_err(|err| ProcessorError::artifact_write(tagdb_name(label), err))?;
            written += 1;
        }

        let jobs: Vec<CubeJob<'_>> = Metric::ALL
            .into_iter()
            .flat_map(|metric| {
                let data = match metric {
                    Metric::Usage => &run.usage,
                    Metric::Cost => &run.cost,
                };
                data.iter().map(move |(product, cube)| CubeJob { metric, product, cube })
            })
            .collect();

        let summary_writes = jobs
            .par_iter()
            .map(|job| self.archive_summaries(month, job))
            .collect::<Result<Vec<usize>>>()?;
        written += summary_writes.iter().sum::<usize>();

        for job in &jobs {
            let name = hourly_name(job.metric, job.label(), month);
            self.artifacts
                .write_cube(&name, job.cube)
                .map_err(|err| ProcessorError::artifact_write(name.clone(), err))?;
            written += 1;
        }

        self.artifacts
            .write_instances(month, &run.instances)
            .map_err(|err| ProcessorError::artifact_write(instances_name(month), err))?;
        written += 1;

        info!(
            month = %month_label,
            cubes = jobs.len(),
            artifacts = written,
            instances = run.instances.len(),
            "archived month"
        );
        Ok(ArchiveSummary {
            cubes: jobs.len(),
            artifacts: written,
        })
    }

    fn archive_summaries(&self, month: NaiveDate, job: &CubeJob<'_>) -> Result<usize> {
        let label = job.label();
        let previous = self
            .artifacts
            .read_cube(&hourly_name(job.metric, label, time::previous_month(month)))?;
        if previous.is_none() {
            debug!(
                metric = %job.metric,
                product = label,
                "no previous month cube, weekly carry is empty"
            );
        }
        let next = self
            .artifacts
            .read_cube(&hourly_name(job.metric, label, time::next_month(month)))?;
        let summaries = summarize(month, job.cube, previous.as_ref(), next.as_ref());

        let daily = daily_name(job.metric, label, month);
        self.merge_into(&daily, summaries.daily, day_of_year_index(month))?;

        let monthly = monthly_name(job.metric, label);
        self.merge_into(&monthly, summaries.monthly, months_between(self.start_date, month))?;

        let weekly = weekly_name(job.metric, label);
        self.merge_into(&weekly, summaries.weekly, week_offset(self.start_date, month))?;
        debug!(metric = %job.metric, product = label, year = month.year(), "archived summaries");
        Ok(3)
    }

    /// Replaces the covered entries of artifact `name` with `src`.
    fn merge_into(&self, name: &str, src: Vec<HourData>, offset: usize) -> Result<()> {
        let mut data = self.artifacts.read_cube(name)?.unwrap_or_default();
        data.set_data(src, offset, false);
        self.artifacts
            .write_cube(name, &data)
            .map_err(|err| ProcessorError::artifact_write(name, err))
    }
}
