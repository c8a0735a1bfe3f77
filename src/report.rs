use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::{Datelike, NaiveDate};

use crate::calendar::CalendarTable;
use crate::models::{CycleDay, DayInfo, SpecialKind, CYCLE_DAYS};

const MONTH_NAMES: [&str; 12] = [
    "Enero",
    "Febrero",
    "Marzo",
    "Abril",
    "Mayo",
    "Junio",
    "Julio",
    "Agosto",
    "Septiembre",
    "Octubre",
    "Noviembre",
    "Diciembre",
];

const WEEKDAY_SHORT: [&str; 7] = ["Lun", "Mar", "Mie", "Jue", "Vie", "Sab", "Dom"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleDaySummary {
    pub cycle_day: CycleDay,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecialSummary {
    pub kind: SpecialKind,
    pub count: usize,
}

/// How many school days each cycle day gets, in rotation order.
pub fn summarize_by_cycle_day<'a>(days: impl IntoIterator<Item = &'a DayInfo>) -> Vec<CycleDaySummary> {
    let mut counts = [0usize; 6];
    for info in days {
        if let Some(cycle_day) = info.cycle_day {
            if let Some(index) = CYCLE_DAYS.iter().position(|d| *d == cycle_day) {
                counts[index] += 1;
            }
        }
    }
    CYCLE_DAYS
        .iter()
        .zip(counts)
        .map(|(cycle_day, count)| CycleDaySummary {
            cycle_day: *cycle_day,
            count,
        })
        .collect()
}

pub fn summarize_specials<'a>(days: impl IntoIterator<Item = &'a DayInfo>) -> Vec<SpecialSummary> {
    let mut map: BTreeMap<&'static str, (SpecialKind, usize)> = BTreeMap::new();
    for info in days {
        if let Some(kind) = info.special {
            map.entry(kind.as_str()).or_insert((kind, 0)).1 += 1;
        }
    }

    let mut summaries: Vec<SpecialSummary> = map
        .into_values()
        .map(|(kind, count)| SpecialSummary { kind, count })
        .collect();
    summaries.sort_by(|a, b| b.count.cmp(&a.count));
    summaries
}

pub fn month_name(month: u32) -> &'static str {
    MONTH_NAMES
        .get(month.saturating_sub(1) as usize)
        .copied()
        .unwrap_or("?")
}

fn describe(info: &DayInfo) -> String {
    match (info.cycle_day, &info.label) {
        (Some(cycle_day), Some(label)) => format!("{cycle_day} ({label})"),
        (Some(cycle_day), None) => cycle_day.to_string(),
        (None, Some(label)) => format!("{label} [{}]", info.special.map_or("-", SpecialKind::as_str)),
        (None, None) => "-".to_string(),
    }
}

fn write_month(output: &mut String, table: &CalendarTable, year: i32, month: u32) {
    let _ = writeln!(output, "## {} {}", month_name(month), year);
    let days: Vec<&DayInfo> = table.month(year, month).collect();

    if days.is_empty() {
        let _ = writeln!(output, "No school-year entries in this month.");
        let _ = writeln!(output);
        return;
    }

    for info in &days {
        let weekday = WEEKDAY_SHORT[info.date.weekday().num_days_from_monday() as usize];
        let _ = writeln!(output, "- {} {}: {}", weekday, info.date, describe(info));
    }

    let school_days = days.iter().filter(|info| info.cycle_day.is_some()).count();
    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "{} weekdays, {} with a cycle day.",
        days.len(),
        school_days
    );
    let _ = writeln!(output);
}

/// Markdown overview of the table, optionally limited to one month.
pub fn build_report(table: &CalendarTable, month: Option<NaiveDate>) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# School Cycle Calendar");
    let _ = writeln!(
        output,
        "School year {} to {} ({} weekdays)",
        table.start(),
        table.end(),
        table.len()
    );
    let _ = writeln!(output);

    let scoped: Vec<&DayInfo> = match month {
        Some(first) => table.month(first.year(), first.month()).collect(),
        None => table.iter().collect(),
    };

    let _ = writeln!(output, "## Cycle Day Totals");
    for summary in summarize_by_cycle_day(scoped.iter().copied()) {
        let _ = writeln!(output, "- {}: {} days", summary.cycle_day, summary.count);
    }
    let _ = writeln!(output);

    let _ = writeln!(output, "## Special Days");
    let specials = summarize_specials(scoped.iter().copied());
    if specials.is_empty() {
        let _ = writeln!(output, "No special days in this range.");
    } else {
        for summary in &specials {
            let _ = writeln!(output, "- {}: {} days", summary.kind, summary.count);
        }
    }
    let _ = writeln!(output);

    match month {
        Some(first) => write_month(&mut output, table, first.year(), first.month()),
        None => {
            let mut cursor = NaiveDate::from_ymd_opt(table.start().year(), table.start().month(), 1);
            while let Some(first) = cursor.filter(|first| *first <= table.end()) {
                write_month(&mut output, table, first.year(), first.month());
                cursor = first.checked_add_months(chrono::Months::new(1));
            }
        }
    }

    output
}
