use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use chrono::{Datelike, Duration, NaiveDate, Weekday};

use crate::models::{CycleDay, DayInfo, Exception, SpecialKind};

pub const SCHOOL_YEAR_START: &str = "2025-08-11";
pub const SCHOOL_YEAR_END: &str = "2026-06-12";

pub type ExceptionTable = BTreeMap<NaiveDate, Exception>;

const HOLIDAYS: &[(&str, SpecialKind, &str)] = &[
    ("2025-08-18", SpecialKind::Festivo, "Asuncion de la Virgen"),
    ("2025-10-13", SpecialKind::Festivo, "Dia de la Raza"),
    ("2025-11-03", SpecialKind::Festivo, "Todos los Santos"),
    ("2025-11-17", SpecialKind::Festivo, "Independencia de Cartagena"),
    ("2025-12-08", SpecialKind::Festivo, "Inmaculada Concepcion"),
    ("2026-03-23", SpecialKind::Festivo, "San Jose"),
    ("2026-05-01", SpecialKind::Festivo, "Dia del Trabajo"),
    ("2026-05-18", SpecialKind::Festivo, "Ascension del Senor"),
    ("2026-06-08", SpecialKind::Festivo, "Corpus Christi"),
    ("2026-06-12", SpecialKind::Clausura, "Clausura"),
    ("2025-10-31", SpecialKind::Celebracion, "Dia de Disfraces"),
    ("2026-04-23", SpecialKind::Celebracion, "Dia del Idioma"),
    ("2026-05-15", SpecialKind::Celebracion, "Dia del Maestro"),
];

const BLOCKS: &[(&str, &str, SpecialKind, &str)] = &[
    ("2025-10-06", "2025-10-10", SpecialKind::Receso, "Receso escolar"),
    ("2025-12-15", "2026-01-19", SpecialKind::Vacaciones, "Vacaciones"),
];

const HOLY_WEEK: &[(&str, &str)] = &[
    ("2026-03-30", "Semana Santa"),
    ("2026-03-31", "Semana Santa"),
    ("2026-04-01", "Semana Santa"),
    ("2026-04-02", "Jueves Santo"),
    ("2026-04-03", "Viernes Santo"),
];

/// Immutable date -> day-info table for one school year.
#[derive(Debug, Clone)]
pub struct CalendarTable {
    start: NaiveDate,
    end: NaiveDate,
    days: BTreeMap<NaiveDate, DayInfo>,
}

impl CalendarTable {
    pub fn get(&self, date: NaiveDate) -> Option<&DayInfo> {
        self.days.get(&date)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DayInfo> {
        self.days.values()
    }

    pub fn month(&self, year: i32, month: u32) -> impl Iterator<Item = &DayInfo> {
        self.days
            .values()
            .filter(move |info| info.date.year() == year && info.date.month() == month)
    }
}

pub fn parse_date_key(value: &str) -> anyhow::Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("invalid date key {value:?}, expected YYYY-MM-DD"))
}

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Monday-to-Friday dates in `[start, end]`.
pub fn weekdays_in_range(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    start
        .iter_days()
        .take_while(move |date| *date <= end)
        .filter(|date| !is_weekend(*date))
}

pub fn school_year_bounds() -> anyhow::Result<(NaiveDate, NaiveDate)> {
    Ok((
        parse_date_key(SCHOOL_YEAR_START)?,
        parse_date_key(SCHOOL_YEAR_END)?,
    ))
}

/// Built-in exceptions for the 2025-2026 school year.
pub fn school_year_exceptions() -> anyhow::Result<ExceptionTable> {
    let mut table = ExceptionTable::new();

    for (date, kind, label) in HOLIDAYS {
        table.insert(
            parse_date_key(date)?,
            Exception {
                kind: *kind,
                label: label.to_string(),
            },
        );
    }

    for (from, to, kind, label) in BLOCKS {
        for date in weekdays_in_range(parse_date_key(from)?, parse_date_key(to)?) {
            table.insert(
                date,
                Exception {
                    kind: *kind,
                    label: label.to_string(),
                },
            );
        }
    }

    for (date, label) in HOLY_WEEK {
        table.insert(
            parse_date_key(date)?,
            Exception {
                kind: SpecialKind::SemanaSanta,
                label: label.to_string(),
            },
        );
    }

    Ok(table)
}

/// Reads `date,kind,label` rows to layer on top of the built-in exceptions.
pub fn load_exception_overrides(csv_path: &Path) -> anyhow::Result<Vec<(NaiveDate, Exception)>> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        date: String,
        kind: SpecialKind,
        label: String,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut overrides = Vec::new();

    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("invalid exception row {}", index + 1))?;
        let date = parse_date_key(row.date.trim())
            .with_context(|| format!("invalid exception row {}", index + 1))?;
        overrides.push((
            date,
            Exception {
                kind: row.kind,
                label: row.label,
            },
        ));
    }

    Ok(overrides)
}

/// Built-in exceptions plus the optional overrides file.
pub fn exceptions_with_overrides(csv_path: Option<&Path>) -> anyhow::Result<ExceptionTable> {
    let mut table = school_year_exceptions()?;
    if let Some(path) = csv_path {
        table.extend(load_exception_overrides(path)?);
    }
    Ok(table)
}

pub fn generate(start: NaiveDate, end: NaiveDate, exceptions: &ExceptionTable) -> CalendarTable {
    let mut days = BTreeMap::new();
    let mut counter = 0usize;
    let mut date = start;

    while date <= end {
        if !is_weekend(date) {
            let info = match exceptions.get(&date) {
                Some(exception) => {
                    let cycle_day = if exception.kind.advances_cycle() {
                        let cycle_day = CycleDay::from_counter(counter);
                        counter += 1;
                        Some(cycle_day)
                    } else {
                        None
                    };
                    DayInfo {
                        date,
                        cycle_day,
                        special: Some(exception.kind),
                        label: Some(exception.label.clone()),
                    }
                }
                None => {
                    let cycle_day = CycleDay::from_counter(counter);
                    counter += 1;
                    DayInfo {
                        date,
                        cycle_day: Some(cycle_day),
                        special: None,
                        label: None,
                    }
                }
            };
            days.insert(date, info);
        }
        date += Duration::days(1);
    }

    CalendarTable { start, end, days }
}

/// The school-year table with the built-in exceptions and any overrides.
pub fn build_school_calendar(overrides: Option<&Path>) -> anyhow::Result<CalendarTable> {
    let (start, end) = school_year_bounds()?;
    let exceptions = exceptions_with_overrides(overrides)?;
    let table = generate(start, end, &exceptions);
    anyhow::ensure!(!table.is_empty(), "school year {start}..{end} has no weekdays");
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(value: &str) -> NaiveDate {
        parse_date_key(value).unwrap()
    }

    fn school_calendar() -> CalendarTable {
        build_school_calendar(None).unwrap()
    }

    #[test]
    fn first_week_rotates_and_skips_the_holiday() {
        let table = school_calendar();
        let cycle = |value: &str| table.get(date(value)).and_then(|info| info.cycle_day);

        assert_eq!(cycle("2025-08-11"), Some(CycleDay::D1));
        assert_eq!(cycle("2025-08-12"), Some(CycleDay::D2));
        assert_eq!(cycle("2025-08-13"), Some(CycleDay::D3));
        assert_eq!(cycle("2025-08-14"), Some(CycleDay::D4));
        assert_eq!(cycle("2025-08-15"), Some(CycleDay::D5));
        assert_eq!(cycle("2025-08-18"), None);
        assert_eq!(cycle("2025-08-19"), Some(CycleDay::D6));
        assert_eq!(cycle("2025-08-20"), Some(CycleDay::D1));

        let holiday = table.get(date("2025-08-18")).unwrap();
        assert_eq!(holiday.special, Some(SpecialKind::Festivo));
        assert_eq!(holiday.label.as_deref(), Some("Asuncion de la Virgen"));
    }

    #[test]
    fn weekends_have_no_entries_and_weekdays_have_one() {
        let table = school_calendar();
        assert!(table.get(date("2025-08-16")).is_none());
        assert!(table.get(date("2025-08-17")).is_none());

        let weekdays = weekdays_in_range(table.start(), table.end()).count();
        assert_eq!(table.len(), weekdays);
        assert!(table.len() > 200);
        assert!(table.iter().all(|info| !is_weekend(info.date)));
    }

    #[test]
    fn school_year_ends_with_clausura() {
        let table = school_calendar();
        let last = table.get(date("2026-06-12")).unwrap();
        assert_eq!(last.special, Some(SpecialKind::Clausura));
        assert_eq!(last.label.as_deref(), Some("Clausura"));
        assert_eq!(last.cycle_day, None);
        assert!(table.get(date("2026-06-13")).is_none());
        assert!(table.get(date("2026-06-15")).is_none());
    }

    #[test]
    fn special_blocks_are_marked() {
        let table = school_calendar();
        let special = |value: &str| table.get(date(value)).and_then(|info| info.special);

        assert_eq!(special("2025-10-06"), Some(SpecialKind::Receso));
        assert_eq!(special("2025-10-10"), Some(SpecialKind::Receso));
        assert_eq!(special("2025-12-15"), Some(SpecialKind::Vacaciones));
        assert_eq!(special("2026-01-19"), Some(SpecialKind::Vacaciones));
        assert_eq!(special("2026-03-30"), Some(SpecialKind::SemanaSanta));
        assert_eq!(
            table.get(date("2026-04-02")).unwrap().label.as_deref(),
            Some("Jueves Santo")
        );
        assert_eq!(
            table.get(date("2026-04-03")).unwrap().label.as_deref(),
            Some("Viernes Santo")
        );
    }

    #[test]
    fn celebrations_carry_a_cycle_day_and_advance() {
        let table = school_calendar();
        let halloween = table.get(date("2025-10-31")).unwrap();
        assert_eq!(halloween.special, Some(SpecialKind::Celebracion));
        assert_eq!(halloween.label.as_deref(), Some("Dia de Disfraces"));
        let before = table.get(date("2025-10-30")).unwrap().cycle_day.unwrap();
        let during = halloween.cycle_day.unwrap();
        let after = table.get(date("2025-11-04")).unwrap().cycle_day.unwrap();

        let next = |day: CycleDay| {
            let index = crate::models::CYCLE_DAYS.iter().position(|d| *d == day).unwrap();
            CycleDay::from_counter(index + 1)
        };
        assert_eq!(during, next(before));
        // 2025-11-03 is a holiday, so the Tuesday follows the celebration directly.
        assert_eq!(after, next(during));
    }

    #[test]
    fn rotation_is_strict_over_cycle_days() {
        let table = school_calendar();
        let sequence: Vec<CycleDay> = table.iter().filter_map(|info| info.cycle_day).collect();
        for (index, day) in sequence.iter().enumerate() {
            assert_eq!(*day, CycleDay::from_counter(index));
        }
    }

    #[test]
    fn non_advancing_exceptions_never_get_a_cycle_day() {
        let exceptions = school_year_exceptions().unwrap();
        let table = school_calendar();
        for (when, exception) in &exceptions {
            let Some(info) = table.get(*when) else {
                continue;
            };
            assert_eq!(info.special, Some(exception.kind));
            assert_eq!(info.cycle_day.is_some(), exception.kind.advances_cycle());
        }
    }

    #[test]
    fn generation_is_deterministic() {
        assert_eq!(
            school_calendar().iter().collect::<Vec<_>>(),
            school_calendar().iter().collect::<Vec<_>>()
        );
    }

    #[test]
    fn empty_exception_table_rotates_every_weekday() {
        let table = generate(date("2025-08-15"), date("2025-08-19"), &ExceptionTable::new());
        let codes: Vec<_> = table.iter().map(|info| (info.date, info.cycle_day)).collect();
        assert_eq!(
            codes,
            vec![
                (date("2025-08-15"), Some(CycleDay::D1)),
                (date("2025-08-18"), Some(CycleDay::D2)),
                (date("2025-08-19"), Some(CycleDay::D3)),
            ]
        );
    }

    #[test]
    fn overrides_file_layers_on_builtin_exceptions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exceptions.csv");
        std::fs::write(
            &path,
            "date,kind,label\n2025-08-12,festivo,Dia de prueba\n2025-08-18,celebracion,Festival\n",
        )
        .unwrap();

        let table = build_school_calendar(Some(&path)).unwrap();
        let overridden = table.get(date("2025-08-12")).unwrap();
        assert_eq!(overridden.special, Some(SpecialKind::Festivo));
        assert_eq!(overridden.cycle_day, None);
        assert_eq!(table.get(date("2025-08-13")).unwrap().cycle_day, Some(CycleDay::D2));
        let festival = table.get(date("2025-08-18")).unwrap();
        assert_eq!(festival.special, Some(SpecialKind::Celebracion));
        assert!(festival.cycle_day.is_some());
    }

    #[test]
    fn overrides_file_rejects_unknown_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exceptions.csv");
        std::fs::write(&path, "date,kind,label\n2025-08-12,picnic,Paseo\n").unwrap();

        let err = load_exception_overrides(&path).unwrap_err();
        assert!(format!("{err:#}").contains("row 1"));
    }
}
