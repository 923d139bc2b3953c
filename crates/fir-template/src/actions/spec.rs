//! Event-spec parsing for `x-fir-*` attribute values.
//!
//! Grammar: comma-separated `name[:state][.modifier]*` entries, where names
//! and modifiers match `[A-Za-z0-9_-]+` and the state is one of
//! `ok|error|pending|done` (default `ok`).

use std::fmt;

use super::ActionError;

/// Lifecycle state an event binding reacts to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EventState {
    /// The event succeeded.
    #[default]
    Ok,
    /// The event failed.
    Error,
    /// The event was sent and has no reply yet.
    Pending,
    /// The event finished, whatever the result.
    Done,
}

impl EventState {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "ok" => Some(Self::Ok),
            "error" => Some(Self::Error),
            "pending" => Some(Self::Pending),
            "done" => Some(Self::Done),
            _ => None,
        }
    }

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Pending => "pending",
            Self::Done => "done",
        }
    }
}

/// One `name:state` entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventEntry {
    /// Event id.
    pub name: String,
    /// State bound to.
    pub state: EventState,
}

impl fmt::Display for EventEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.state.as_str())
    }
}

/// A parsed event spec: one or more entries plus their modifiers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventSpec {
    /// Entries in source order.
    pub entries: Vec<EventEntry>,
    /// Modifiers in first-seen order, without duplicates.
    pub modifiers: Vec<String>,
}

impl EventSpec {
    /// Parse an attribute value.
    pub fn parse(raw: &str) -> Result<Self, ActionError> {
        let invalid = |reason: &str| ActionError::InvalidEventSpec {
            spec: raw.to_owned(),
            reason: reason.to_owned(),
        };

        let mut entries = Vec::new();
        let mut modifiers: Vec<String> = Vec::new();

        for part in raw.split(',') {
            let part = part.trim();
            if part.is_empty() {
                return Err(invalid("empty entry"));
            }

            let mut pieces = part.split('.');
            let head = pieces.next().unwrap_or_default();
            for modifier in pieces {
                if !is_ident(modifier) {
                    return Err(invalid("invalid modifier"));
                }
                if !modifiers.iter().any(|m| m == modifier) {
                    modifiers.push(modifier.to_owned());
                }
            }

            let (name, state) = match head.split_once(':') {
                Some((name, state)) => {
                    let state = EventState::parse(state.trim())
                        .ok_or_else(|| invalid("state must be ok, error, pending or done"))?;
                    (name.trim(), state)
                }
                None => (head, EventState::default()),
            };
            if !is_ident(name) {
                return Err(invalid("event name must match [A-Za-z0-9_-]+"));
            }
            entries.push(EventEntry {
                name: name.to_owned(),
                state,
            });
        }

        Ok(Self { entries, modifiers })
    }

    /// The `@fir:` key for this spec: `name:state` or `[a:s,b:s]`.
    pub fn key(&self) -> String {
        match self.entries.as_slice() {
            [single] => single.to_string(),
            many => {
                let joined: Vec<String> = many.iter().map(ToString::to_string).collect();
                format!("[{}]", joined.join(","))
            }
        }
    }
}

fn is_ident(s: &str) -> bool {
    !s.is_empty()
        && s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn single_entry_with_state() {
        let spec = EventSpec::parse("delete:ok").unwrap();
        assert_eq!(spec.entries.len(), 1);
        assert_eq!(spec.entries[0].name, "delete");
        assert_eq!(spec.entries[0].state, EventState::Ok);
        assert_eq!(spec.key(), "delete:ok");
    }

    #[test]
    fn state_defaults_to_ok() {
        let spec = EventSpec::parse("create").unwrap();
        assert_eq!(spec.key(), "create:ok");
    }

    #[test]
    fn multiple_entries_collapse() {
        let spec = EventSpec::parse("delete:ok, cancel:done").unwrap();
        assert_eq!(spec.key(), "[delete:ok,cancel:done]");
    }

    #[test]
    fn modifiers_deduplicated_in_order() {
        let spec = EventSpec::parse("a:ok.debounce.nohtml, b:error.debounce").unwrap();
        assert_eq!(spec.modifiers, vec!["debounce", "nohtml"]);
    }

    #[test]
    fn rejects_unknown_state() {
        assert_matches!(
            EventSpec::parse("delete:maybe"),
            Err(ActionError::InvalidEventSpec { .. })
        );
    }

    #[test]
    fn rejects_bad_names() {
        assert!(EventSpec::parse("").is_err());
        assert!(EventSpec::parse("a b:ok").is_err());
        assert!(EventSpec::parse("a:ok,").is_err());
        assert!(EventSpec::parse("a:ok.").is_err());
        assert!(EventSpec::parse(":ok").is_err());
    }

    #[test]
    fn dashes_and_underscores_allowed() {
        let spec = EventSpec::parse("toggle-done_1:pending").unwrap();
        assert_eq!(spec.key(), "toggle-done_1:pending");
    }
}
