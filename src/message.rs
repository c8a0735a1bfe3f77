use chrono::NaiveDate;
use serde::Serialize;

use crate::models::{DayInfo, NotificationMessage, Slot};

pub const APP_TITLE: &str = "SEK Calendario";
pub const ICON_PATH: &str = "/icons/pwa-192x192.png";

fn no_classes(slot: Slot) -> NotificationMessage {
    let body = match slot {
        Slot::Morning => "Hoy no hay clases programadas.",
        Slot::Evening => "No hay clases programadas proximamente.",
    };
    NotificationMessage {
        title: APP_TITLE.to_string(),
        body: body.to_string(),
    }
}

/// Title and body for a notification about `date`.
pub fn build_message(
    date: NaiveDate,
    info: Option<&DayInfo>,
    slot: Slot,
    is_tomorrow: bool,
) -> NotificationMessage {
    let Some(info) = info else {
        return no_classes(slot);
    };

    if let Some(cycle_day) = info.cycle_day {
        let number = cycle_day.number();
        let (title, generic_body) = match (slot, is_tomorrow) {
            (Slot::Morning, _) => (
                format!("Dia {number} del ciclo"),
                format!("Hoy es dia {cycle_day} del ciclo rotativo."),
            ),
            (Slot::Evening, true) => (
                format!("Manana: Dia {number} del ciclo"),
                format!("Manana es dia {cycle_day} del ciclo rotativo."),
            ),
            (Slot::Evening, false) => (
                format!("Proximo dia de clases: Dia {number} del ciclo"),
                format!("El proximo dia de clases ({date}) es dia {number} del ciclo ({cycle_day})."),
            ),
        };

        let body = match (&info.special, &info.label) {
            (Some(_), Some(label)) => format!("{label} - {date}"),
            _ => generic_body,
        };
        return NotificationMessage { title, body };
    }

    match &info.label {
        Some(label) => NotificationMessage {
            title: APP_TITLE.to_string(),
            body: format!("{label} - No hay clases hoy."),
        },
        None => no_classes(slot),
    }
}

#[derive(Debug, Serialize)]
struct PushPayload<'a> {
    title: &'a str,
    body: &'a str,
    icon: &'a str,
    badge: &'a str,
    data: PayloadData<'a>,
}

#[derive(Debug, Serialize)]
struct PayloadData<'a> {
    url: &'a str,
}

/// JSON body the service worker renders into a notification.
pub fn push_payload(message: &NotificationMessage) -> anyhow::Result<Vec<u8>> {
    let payload = PushPayload {
        title: &message.title,
        body: &message.body,
        icon: ICON_PATH,
        badge: ICON_PATH,
        data: PayloadData { url: "/" },
    };
    Ok(serde_json::to_vec(&payload)?)
}
