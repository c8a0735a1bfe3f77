use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One of the six rotating class-day labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CycleDay {
    D1,
    D2,
    D3,
    D4,
    D5,
    D6,
}

pub const CYCLE_DAYS: [CycleDay; 6] = [
    CycleDay::D1,
    CycleDay::D2,
    CycleDay::D3,
    CycleDay::D4,
    CycleDay::D5,
    CycleDay::D6,
];

impl CycleDay {
    /// Rotation slot for a zero-based counter of cycle-advancing days.
    pub fn from_counter(counter: usize) -> Self {
        CYCLE_DAYS[counter % CYCLE_DAYS.len()]
    }

    pub fn code(self) -> &'static str {
        match self {
            CycleDay::D1 => "D1",
            CycleDay::D2 => "D2",
            CycleDay::D3 => "D3",
            CycleDay::D4 => "D4",
            CycleDay::D5 => "D5",
            CycleDay::D6 => "D6",
        }
    }

    /// Ordinal embedded in the `D<n>` code.
    pub fn number(self) -> &'static str {
        &self.code()[1..]
    }
}

impl fmt::Display for CycleDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpecialKind {
    Festivo,
    Receso,
    SemanaSanta,
    Vacaciones,
    Clausura,
    Celebracion,
}

impl SpecialKind {
    /// Celebrations keep the rotation moving; every other special day is skipped.
    pub fn advances_cycle(self) -> bool {
        matches!(self, SpecialKind::Celebracion)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SpecialKind::Festivo => "festivo",
            SpecialKind::Receso => "receso",
            SpecialKind::SemanaSanta => "semana-santa",
            SpecialKind::Vacaciones => "vacaciones",
            SpecialKind::Clausura => "clausura",
            SpecialKind::Celebracion => "celebracion",
        }
    }
}

impl fmt::Display for SpecialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayInfo {
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle_day: Option<CycleDay>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special: Option<SpecialKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exception {
    pub kind: SpecialKind,
    pub label: String,
}

/// Notification timing. Morning talks about today, evening about the next school day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    Morning,
    Evening,
}

impl Slot {
    /// Anything other than `evening` is treated as the default morning slot.
    pub fn from_query(value: Option<&str>) -> Self {
        match value {
            Some("evening") => Slot::Evening,
            _ => Slot::Morning,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Slot::Morning => "morning",
            Slot::Evening => "evening",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

/// Browser push subscription, keyed by its endpoint URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub endpoint: String,
    pub keys: SubscriptionKeys,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationMessage {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TodayInfo {
    pub date: NaiveDate,
    pub info: Option<DayInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextSchoolDay {
    pub date: NaiveDate,
    pub info: Option<DayInfo>,
    pub is_tomorrow: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub sent: usize,
    pub failed: usize,
    pub skipped: bool,
    pub date: NaiveDate,
    pub slot: Slot,
}
