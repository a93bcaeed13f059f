//! Placeholder substitution for reply and post templates.

use chrono::{DateTime, Local};

use crate::events::InboundEvent;

/// Renders `template` for an event.
///
/// Supported placeholders are `{sender}`, `{chat}`, `{message}`, `{time}` and
/// `{date}`. Only the first occurrence of each is replaced, and substituted
/// values are never scanned for further placeholders.
#[must_use]
pub fn render(template: &str, event: &InboundEvent, now: DateTime<Local>) -> String {
    let values = [
        ("{sender}", event.sender_id.clone().unwrap_or_default()),
        ("{chat}", event.chat_id.clone()),
        ("{message}", event.text.clone()),
        ("{time}", now.format("%H:%M:%S").to_string()),
        ("{date}", now.format("%Y-%m-%d").to_string()),
    ];

    let mut hits: Vec<(usize, &str, &str)> = values
        .iter()
        .filter_map(|(placeholder, value)| {
            template
                .find(placeholder)
                .map(|pos| (pos, *placeholder, value.as_str()))
        })
        .collect();
    hits.sort_by_key(|(pos, _, _)| *pos);

    let mut out = String::with_capacity(template.len());
    let mut cursor = 0;
    for (pos, placeholder, value) in hits {
        out.push_str(&template[cursor..pos]);
        out.push_str(value);
        cursor = pos + placeholder.len();
    }
    out.push_str(&template[cursor..]);
    out
}
