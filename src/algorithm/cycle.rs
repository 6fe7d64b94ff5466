//! Submission cycle resolution
//!
//! A report family submits on a fixed calendar-month period anchored at an
//! epoch. Window `k` starts at `epoch + k * period` months and ends the day
//! before window `k + 1` starts. Every bound is computed from the epoch, so
//! month-end clamping never accumulates across cycles.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{OutOfRangeCycle, Result, StudyError};
use crate::schema::adapt::add_months;

/// Which participants a cycle's report covers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Inclusion {
    /// Qualifying date inside the cycle window
    #[default]
    Window,
    /// Qualifying date between the epoch and the end of the window
    Cumulative,
    /// Qualifying date on or after the epoch and strictly before the close date
    BeforeClose,
}

/// Periodicity definition of one report family
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleFamily {
    pub name: String,
    pub period_months: u32,
    pub epoch: NaiveDate,
    /// Last close date the family accepts
    #[serde(default)]
    pub horizon: Option<NaiveDate>,
    #[serde(default)]
    pub inclusion: Inclusion,
}

impl CycleFamily {
    #[must_use]
    pub fn new(name: impl Into<String>, period_months: u32, epoch: NaiveDate) -> Self {
        Self {
            name: name.into(),
            period_months,
            epoch,
            horizon: None,
            inclusion: Inclusion::Window,
        }
    }

    #[must_use]
    pub const fn with_horizon(mut self, horizon: NaiveDate) -> Self {
        self.horizon = Some(horizon);
        self
    }

    #[must_use]
    pub const fn with_inclusion(mut self, inclusion: Inclusion) -> Self {
        self.inclusion = inclusion;
        self
    }

    /// Start of window `k`
    fn window_start(&self, k: u32) -> Option<NaiveDate> {
        add_months(self.epoch, k.checked_mul(self.period_months)?)
    }

    /// Resolve the cycle containing `close_date`
    ///
    /// # Errors
    /// Returns [`OutOfRangeCycle`] when the close date precedes the epoch or
    /// follows the horizon.
    pub fn resolve(&self, close_date: NaiveDate) -> std::result::Result<SubmissionCycle, OutOfRangeCycle> {
        if close_date < self.epoch {
            return Err(OutOfRangeCycle::BeforeEpoch {
                family: self.name.clone(),
                close_date,
                epoch: self.epoch,
            });
        }
        if let Some(horizon) = self.horizon.filter(|h| close_date > *h) {
            return Err(OutOfRangeCycle::AfterHorizon {
                family: self.name.clone(),
                close_date,
                horizon,
            });
        }
        let beyond = || OutOfRangeCycle::AfterHorizon {
            family: self.name.clone(),
            close_date,
            horizon: NaiveDate::MAX,
        };
        let period = self.period_months.max(1);

        // Whole months elapsed gives a first estimate of k; clamped month
        // ends can put it one window off in either direction.
        let elapsed = months_between(self.epoch, close_date);
        let mut k = elapsed / period;
        while k > 0 && self.window_start(k).ok_or_else(beyond)? > close_date {
            k -= 1;
        }
        while self.window_start(k + 1).ok_or_else(beyond)? <= close_date {
            k += 1;
        }

        let window_start = self.window_start(k).ok_or_else(beyond)?;
        let window_end = self
            .window_start(k + 1)
            .and_then(|next| next.pred_opt())
            .ok_or_else(beyond)?;

        Ok(SubmissionCycle {
            family: self.name.clone(),
            close_date,
            index: k,
            epoch: self.epoch,
            window_start,
            window_end,
            inclusion: self.inclusion,
        })
    }
}

fn months_between(from: NaiveDate, to: NaiveDate) -> u32 {
    use chrono::Datelike;
    let months = (to.year() - from.year()) * 12 + to.month() as i32 - from.month() as i32;
    u32::try_from(months).unwrap_or(0)
}

/// One submission of a report family
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionCycle {
    pub family: String,
    pub close_date: NaiveDate,
    /// Zero-based window number since the epoch
    pub index: u32,
    pub epoch: NaiveDate,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub inclusion: Inclusion,
}

impl SubmissionCycle {
    /// Identity used for output directories and the status ledger
    #[must_use]
    pub fn id(&self) -> String {
        format!("cycle_{}", self.close_date.format("%Y-%m-%d"))
    }

    /// Whether a participant qualifying on `date` is covered
    #[must_use]
    pub fn includes(&self, date: NaiveDate) -> bool {
        match self.inclusion {
            Inclusion::Window => self.window_start <= date && date <= self.window_end,
            Inclusion::Cumulative => self.epoch <= date && date <= self.window_end,
            Inclusion::BeforeClose => self.epoch <= date && date < self.close_date,
        }
    }

    /// `<root>/cycle_<close date>`
    #[must_use]
    pub fn output_dir(&self, root: &Path) -> PathBuf {
        root.join(self.id())
    }

    /// File stem for tabulated summary reports
    #[must_use]
    pub fn summary_name(&self) -> String {
        let (start, end) = match self.inclusion {
            Inclusion::Window => (self.window_start, self.window_end),
            Inclusion::Cumulative => (self.epoch, self.window_end),
            Inclusion::BeforeClose => (self.epoch, self.close_date),
        };
        format!(
            "report_{}_{}_{}",
            self.family,
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d")
        )
    }
}

/// Registry of the configured families
#[derive(Debug, Clone, Default)]
pub struct CycleResolver {
    families: BTreeMap<String, CycleFamily>,
}

impl CycleResolver {
    /// Build the resolver, rejecting duplicate names and zero periods
    pub fn new(families: impl IntoIterator<Item = CycleFamily>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for family in families {
            if family.period_months == 0 {
                return Err(StudyError::config(format!(
                    "cycle family {} has a zero-month period",
                    family.name
                )));
            }
            if let Some(horizon) = family.horizon.filter(|h| *h < family.epoch) {
                return Err(StudyError::config(format!(
                    "cycle family {} has horizon {horizon} before its epoch {}",
                    family.name, family.epoch
                )));
            }
            if map.insert(family.name.clone(), family).is_some() {
                return Err(StudyError::config("duplicate cycle family name"));
            }
        }
        Ok(Self { families: map })
    }

    #[must_use]
    pub fn family(&self, name: &str) -> Option<&CycleFamily> {
        self.families.get(name)
    }

    /// Resolve a close date for a named family
    ///
    /// # Errors
    /// Returns [`OutOfRangeCycle`] for unknown families and dates outside the
    /// family's range.
    pub fn resolve(
        &self,
        family: &str,
        close_date: NaiveDate,
    ) -> std::result::Result<SubmissionCycle, OutOfRangeCycle> {
        self.families
            .get(family)
            .ok_or_else(|| OutOfRangeCycle::UnknownFamily(family.to_string()))?
            .resolve(close_date)
    }
}
