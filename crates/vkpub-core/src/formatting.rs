use chrono::{DateTime, Datelike, Timelike};
use chrono_tz::Tz;

use crate::domain::Destination;

/// Escape text for Telegram HTML parse mode.
pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// `<a href="link">name</a>` for a destination.
pub fn destination_link(dest: &Destination) -> String {
    format!(
        "<a href=\"{}\">{}</a>",
        escape_html(&dest.link),
        escape_html(&dest.name)
    )
}

/// `D.M at HH:MM`.
pub fn short_datetime(t: DateTime<Tz>) -> String {
    format!(
        "{}.{} at {:02}:{:02}",
        t.day(),
        t.month(),
        t.hour(),
        t.minute()
    )
}
