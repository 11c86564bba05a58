//! Static period and task catalogs.
//!
//! The catalog is loaded once at startup from [`CatalogConfig`] and is
//! immutable afterwards. Validation happens here so the scheduler can
//! assume well-formed, non-overlapping windows.
//!
//! # Window semantics
//!
//! A period window `[start, end)` with `end < start` crosses midnight and
//! matches when `tod >= start || tod < end`. `start == end` is rejected.
//!
//! A task's scheduled window is anchored on the calendar date of its
//! instance: `date @ period.start + offset`.

use std::collections::BTreeSet;

use brigade_types::{Period, PeriodId, RoleName, TaskDefId, TaskDefinition};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};

use crate::config::{CatalogConfig, PeriodConfig};

/// Errors raised while building a catalog.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    /// A time-of-day string could not be parsed.
    #[error("period {period}: invalid time of day {value:?}")]
    InvalidTime {
        /// The period being parsed.
        period: String,
        /// The rejected value.
        value: String,
    },

    /// A period's start equals its end.
    #[error("period {0}: start and end are equal")]
    EmptyWindow(PeriodId),

    /// Two periods share an id.
    #[error("duplicate period id {0}")]
    DuplicatePeriod(PeriodId),

    /// Two period windows overlap.
    #[error("periods {first} and {second} overlap")]
    Overlap {
        /// The earlier period by order.
        first: PeriodId,
        /// The later period by order.
        second: PeriodId,
    },

    /// Two task definitions share an id.
    #[error("duplicate task definition id {0}")]
    DuplicateTask(TaskDefId),

    /// A task references a period that does not exist.
    #[error("task {task} references unknown period {period}")]
    UnknownPeriod {
        /// The task definition.
        task: TaskDefId,
        /// The missing period.
        period: PeriodId,
    },

    /// A task's end offset precedes its start offset.
    #[error("task {0}: offset_end_minutes is before offset_start_minutes")]
    InvertedOffsets(TaskDefId),
}

/// Parse `HH:MM` or `HH:MM:SS`.
pub fn parse_time_of_day(value: &str) -> Option<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .ok()
}

/// Whether a time of day falls inside a period's window.
pub fn window_contains(period: &Period, tod: NaiveTime) -> bool {
    if period.spans_midnight() {
        tod >= period.start || tod < period.end
    } else {
        tod >= period.start && tod < period.end
    }
}

/// The calendar date on which the occurrence of `period` covering `at`
/// started. Only differs from `at.date()` after midnight inside a
/// midnight-crossing window.
pub fn occurrence_date(period: &Period, at: NaiveDateTime) -> NaiveDate {
    let date = at.date();
    if period.spans_midnight() && at.time() < period.end {
        date.pred_opt().unwrap_or(date)
    } else {
        date
    }
}

/// Periods of the service day, sorted by `order`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodCatalog {
    periods: Vec<Period>,
}

impl PeriodCatalog {
    /// Build and validate a catalog.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] for empty windows, duplicate ids, or
    /// overlapping windows.
    pub fn new(mut periods: Vec<Period>) -> Result<Self, CatalogError> {
        periods.sort_by_key(|p| p.order);

        let mut ids = BTreeSet::new();
        for period in &periods {
            if period.start == period.end {
                return Err(CatalogError::EmptyWindow(period.id.clone()));
            }
            if !ids.insert(period.id.clone()) {
                return Err(CatalogError::DuplicatePeriod(period.id.clone()));
            }
        }

        for (i, first) in periods.iter().enumerate() {
            for second in periods.iter().skip(i.saturating_add(1)) {
                if window_contains(first, second.start) || window_contains(second, first.start) {
                    return Err(CatalogError::Overlap {
                        first: first.id.clone(),
                        second: second.id.clone(),
                    });
                }
            }
        }

        Ok(Self { periods })
    }

    /// Build from YAML entries, parsing time strings.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::InvalidTime`] for unparseable times, plus
    /// everything [`PeriodCatalog::new`] rejects.
    pub fn from_config(entries: &[PeriodConfig]) -> Result<Self, CatalogError> {
        let periods = entries
            .iter()
            .map(|entry| {
                let time = |value: &str| {
                    parse_time_of_day(value).ok_or_else(|| CatalogError::InvalidTime {
                        period: entry.id.clone(),
                        value: value.to_owned(),
                    })
                };
                Ok(Period {
                    id: PeriodId::from(entry.id.as_str()),
                    display_name: entry.display_name.clone(),
                    start: time(&entry.start)?,
                    end: time(&entry.end)?,
                    order: entry.order,
                })
            })
            .collect::<Result<Vec<_>, CatalogError>>()?;
        Self::new(periods)
    }

    /// Periods in service order.
    pub fn iter(&self) -> impl Iterator<Item = &Period> {
        self.periods.iter()
    }

    /// Look up a period.
    pub fn get(&self, id: &PeriodId) -> Option<&Period> {
        self.periods.iter().find(|p| &p.id == id)
    }

    /// The period whose window contains `tod`, if any.
    pub fn active_at(&self, tod: NaiveTime) -> Option<&Period> {
        self.periods.iter().find(|p| window_contains(p, tod))
    }

    /// Number of periods.
    pub fn len(&self) -> usize {
        self.periods.len()
    }

    /// Whether the catalog has no periods.
    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }
}

/// Role-assigned task definitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskCatalog {
    definitions: Vec<TaskDefinition>,
}

impl TaskCatalog {
    /// Build and validate against a period catalog.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] for duplicate ids, unknown periods, or
    /// inverted offsets.
    pub fn new(
        definitions: Vec<TaskDefinition>,
        periods: &PeriodCatalog,
    ) -> Result<Self, CatalogError> {
        let mut ids = BTreeSet::new();
        for def in &definitions {
            if !ids.insert(def.id.clone()) {
                return Err(CatalogError::DuplicateTask(def.id.clone()));
            }
            if periods.get(&def.period_id).is_none() {
                return Err(CatalogError::UnknownPeriod {
                    task: def.id.clone(),
                    period: def.period_id.clone(),
                });
            }
            if def.offset_end_minutes < def.offset_start_minutes {
                return Err(CatalogError::InvertedOffsets(def.id.clone()));
            }
        }
        Ok(Self { definitions })
    }

    /// Look up a definition.
    pub fn get(&self, id: &TaskDefId) -> Option<&TaskDefinition> {
        self.definitions.iter().find(|d| &d.id == id)
    }

    /// Definitions bound to a period, in catalog order.
    pub fn for_period<'a>(
        &'a self,
        period: &'a PeriodId,
    ) -> impl Iterator<Item = &'a TaskDefinition> + 'a {
        self.definitions.iter().filter(move |d| &d.period_id == period)
    }

    /// Definitions assigned to a role, in catalog order.
    pub fn for_role<'a>(
        &'a self,
        role: &'a RoleName,
    ) -> impl Iterator<Item = &'a TaskDefinition> + 'a {
        self.definitions.iter().filter(move |d| &d.role == role)
    }

    /// Every definition.
    pub fn iter(&self) -> impl Iterator<Item = &TaskDefinition> {
        self.definitions.iter()
    }
}

/// Periods plus tasks, shared read-only by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    /// The period catalog.
    pub periods: PeriodCatalog,
    /// The task catalog.
    pub tasks: TaskCatalog,
}

impl Catalog {
    /// Build and validate the whole catalog from configuration.
    ///
    /// # Errors
    ///
    /// Returns the first [`CatalogError`] found.
    pub fn from_config(config: &CatalogConfig) -> Result<Self, CatalogError> {
        let periods = PeriodCatalog::from_config(&config.periods)?;
        let tasks = TaskCatalog::new(config.tasks.clone(), &periods)?;
        Ok(Self { periods, tasks })
    }

    /// The built-in six-period catalog.
    ///
    /// # Errors
    ///
    /// Never fails for the shipped defaults; the `Result` mirrors
    /// [`Catalog::from_config`].
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_config(&CatalogConfig::default())
    }

    /// Scheduled window of a task instance on `date`, or `None` if the
    /// definition's period is unknown or the arithmetic overflows.
    pub fn window(
        &self,
        def: &TaskDefinition,
        date: NaiveDate,
    ) -> Option<(NaiveDateTime, NaiveDateTime)> {
        let period = self.periods.get(&def.period_id)?;
        let anchor = date.and_time(period.start);
        let start = anchor
            .checked_add_signed(TimeDelta::try_minutes(i64::from(def.offset_start_minutes))?)?;
        let end = anchor
            .checked_add_signed(TimeDelta::try_minutes(i64::from(def.offset_end_minutes))?)?;
        Some((start, end))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use brigade_types::EvidenceKind;

    use super::*;

    fn tod(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn period(id: &str, start: NaiveTime, end: NaiveTime, order: u32) -> Period {
        Period {
            id: PeriodId::from(id),
            display_name: id.to_owned(),
            start,
            end,
            order,
        }
    }

    #[test]
    fn midnight_window_matches_both_sides() {
        let night = period("closing", tod(21, 30), tod(8, 0), 1);
        assert!(window_contains(&night, tod(23, 0)));
        assert!(window_contains(&night, tod(3, 0)));
        assert!(!window_contains(&night, tod(9, 0)));
        assert!(!window_contains(&night, tod(20, 0)));
        assert!(window_contains(&night, tod(21, 30)));
        assert!(!window_contains(&night, tod(8, 0)));
    }

    #[test]
    fn builtin_catalog_loads() {
        let catalog = Catalog::builtin().unwrap();
        assert_eq!(catalog.periods.len(), 6);
        let ids: Vec<&str> = catalog.periods.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "opening",
                "lunch_service",
                "lunch_closing",
                "dinner_prep",
                "dinner_service",
                "closing"
            ]
        );
        assert_eq!(
            catalog.periods.active_at(tod(0, 30)).map(|p| p.id.as_str()),
            Some("closing")
        );
        assert!(catalog.periods.active_at(tod(3, 0)).is_none());
    }

    #[test]
    fn occurrence_date_rolls_back_after_midnight() {
        let night = period("closing", tod(21, 30), tod(1, 0), 1);
        let day = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        assert_eq!(
            occurrence_date(&night, day.and_time(tod(0, 30))),
            day.pred_opt().unwrap()
        );
        assert_eq!(occurrence_date(&night, day.and_time(tod(22, 0))), day);
    }

    #[test]
    fn overlapping_periods_are_rejected() {
        let result = PeriodCatalog::new(vec![
            period("a", tod(8, 0), tod(12, 0), 1),
            period("b", tod(11, 0), tod(13, 0), 2),
        ]);
        assert!(matches!(result, Err(CatalogError::Overlap { .. })));
    }

    #[test]
    fn empty_window_is_rejected() {
        let result = PeriodCatalog::new(vec![period("a", tod(8, 0), tod(8, 0), 1)]);
        assert_eq!(result, Err(CatalogError::EmptyWindow(PeriodId::from("a"))));
    }

    #[test]
    fn bad_time_string_is_rejected() {
        let entries = vec![PeriodConfig {
            id: "a".to_owned(),
            display_name: "A".to_owned(),
            start: "25:00".to_owned(),
            end: "08:00".to_owned(),
            order: 1,
        }];
        assert!(matches!(
            PeriodCatalog::from_config(&entries),
            Err(CatalogError::InvalidTime { .. })
        ));
        assert_eq!(parse_time_of_day("17:30:15"), Some(NaiveTime::from_hms_opt(17, 30, 15).unwrap()));
    }

    #[test]
    fn task_bound_to_unknown_period_is_rejected() {
        let periods = PeriodCatalog::new(vec![period("a", tod(8, 0), tod(9, 0), 1)]).unwrap();
        let def = TaskDefinition {
            id: TaskDefId::from("t"),
            role: RoleName::from("kitchen"),
            period_id: PeriodId::from("missing"),
            offset_start_minutes: 0,
            offset_end_minutes: 10,
            evidence_kind: EvidenceKind::None,
            display_text: "t".to_owned(),
            requires_review: false,
        };
        assert!(matches!(
            TaskCatalog::new(vec![def], &periods),
            Err(CatalogError::UnknownPeriod { .. })
        ));
    }

    #[test]
    fn task_window_is_anchored_on_period_start() {
        let catalog = Catalog::builtin().unwrap();
        let def = catalog.tasks.get(&TaskDefId::from("opening-1")).unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 10, 15).unwrap();
        let (start, end) = catalog.window(def, date).unwrap();
        assert_eq!(start, date.and_time(tod(8, 0)));
        assert_eq!(end, date.and_time(tod(11, 0)));

        let closing = catalog.tasks.get(&TaskDefId::from("closing-2")).unwrap();
        let (_, end) = catalog.window(closing, date).unwrap();
        assert_eq!(end, date.and_time(tod(23, 0)));
    }
}
