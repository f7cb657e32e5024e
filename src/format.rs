//! Turning a raw line into an output record.
//!
//! A [`Pipeline`] applies the drop rules (empty lines, JSON-only mode, the
//! minimum level) and renders whatever survives as one JSON object per line.

use std::borrow::Cow;
use std::fmt::Display;
use std::path::Path;

use chrono::{DateTime, Local, SecondsFormat, TimeZone};

use crate::classify::{classify, Level};

/// Drop rules and rendering shared by every session task.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Pipeline {
    json_only: bool,
    min_level: u8,
}

impl Pipeline {
    pub fn new(json_only: bool, min_level: u8) -> Self {
        Pipeline {
            json_only,
            min_level,
        }
    }

    /// Renders `message` read from `file`, stamped with the current local
    /// time. Returns `None` if the line is dropped.
    pub fn render(&self, file: &Path, message: &str) -> Option<String> {
        self.render_at(file, message, &Local::now())
    }

    /// Same as [`render`](Self::render) with an explicit timestamp.
    pub fn render_at<Tz>(&self, file: &Path, message: &str, date: &DateTime<Tz>) -> Option<String>
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        if message.is_empty() {
            return None;
        }

        let json = is_json_shaped(message);
        if self.json_only && !json {
            return None;
        }

        let level = classify(message);
        if level.rank() < self.min_level {
            return None;
        }

        let (component, subcomponent) = components(file);
        let record = Record {
            date: date.to_rfc3339_opts(SecondsFormat::Secs, true),
            component,
            subcomponent,
            level,
            file: file.to_string_lossy(),
            message: if json {
                Cow::Borrowed(message)
            } else {
                Cow::Owned(quote(message))
            },
        };

        Some(record.to_json())
    }
}

/// One output record. `message` is already valid JSON text: either a quoted
/// string or the raw, JSON-shaped line.
struct Record<'a> {
    date: String,
    component: String,
    subcomponent: String,
    level: Level,
    file: Cow<'a, str>,
    message: Cow<'a, str>,
}

impl Record<'_> {
    fn to_json(&self) -> String {
        format!(
            "{{\"date\":{},\"component\":{},\"subcomponent\":{},\"level\":{},\"file\":{},\"message\":{}}}",
            quote(&self.date),
            quote(&self.component),
            quote(&self.subcomponent),
            quote(self.level.label()),
            quote(&self.file),
            self.message,
        )
    }
}

fn quote(s: &str) -> String {
    serde_json::Value::from(s).to_string()
}

/// Cheap check for a line that already is a JSON object: it starts with `{`
/// and ends with `}`. The content is not validated.
pub fn is_json_shaped(message: &str) -> bool {
    message.len() >= 2 && message.starts_with('{') && message.ends_with('}')
}

/// Derives `(component, subcomponent)` from the last two segments of
/// `file`, stripping the final extension from the last one.
///
/// `/var/log/auth/access.log` gives `("auth", "access")`.
pub fn components(file: &Path) -> (String, String) {
    let subcomponent = file
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let component = file
        .parent()
        .and_then(Path::file_name)
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    (component, subcomponent)
}
