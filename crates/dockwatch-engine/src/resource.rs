//! Resource model and row rendering.

use std::{fmt, str::FromStr};

use dockwatch_core::Row;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Kinds of resources an engine manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Container,
    Image,
    Volume,
    Network,
    Stack,
}

impl ResourceKind {
    pub const ALL: [Self; 5] = [
        Self::Container,
        Self::Image,
        Self::Volume,
        Self::Network,
        Self::Stack,
    ];

    /// Match an action such as `containers.list` or `image.pull`.
    #[must_use]
    pub fn from_action(action: &str) -> Option<Self> {
        let prefix = action.split('.').next()?;
        Self::ALL
            .into_iter()
            .find(|kind| prefix == kind.singular() || prefix == kind.key())
    }

    #[must_use]
    pub const fn singular(self) -> &'static str {
        match self {
            Self::Container => "container",
            Self::Image => "image",
            Self::Volume => "volume",
            Self::Network => "network",
            Self::Stack => "stack",
        }
    }

    /// Tab key, also the plural action prefix.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Container => "containers",
            Self::Image => "images",
            Self::Volume => "volumes",
            Self::Network => "networks",
            Self::Stack => "stacks",
        }
    }

    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Self::Container => "Containers",
            Self::Image => "Images",
            Self::Volume => "Volumes",
            Self::Network => "Networks",
            Self::Stack => "Stacks",
        }
    }

    /// Columns shown when none are configured.
    #[must_use]
    pub const fn default_columns(self) -> &'static str {
        match self {
            Self::Container => "State,ExitCode,Name,Image",
            Self::Image => "Name,Version,Size",
            Self::Volume => "Driver,Name",
            Self::Network => "Driver,Name",
            Self::Stack => "Status,Name",
        }
    }

    /// Inspector tabs a client offers for one resource of this kind.
    #[must_use]
    pub const fn inspector_tabs(self) -> &'static [&'static str] {
        match self {
            Self::Container => &["Logs", "Stats", "Env", "Config", "Top"],
            Self::Stack => &["Logs", "Services", "Config"],
            Self::Image | Self::Volume | Self::Network => &["Config"],
        }
    }

    const fn id_field(self) -> &'static str {
        match self {
            Self::Volume | Self::Stack => "Name",
            Self::Container | Self::Image | Self::Network => "ID",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.singular())
    }
}

/// How container states are rendered in listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StateStyle {
    #[default]
    Long,
    Short,
    Icon,
}

impl StateStyle {
    fn render(self, state: &str) -> Option<&'static str> {
        let (short, icon) = match state {
            "paused" => ("P", "◫"),
            "exited" => ("X", "⨯"),
            "created" => ("C", "+"),
            "removing" => ("RM", "−"),
            "restarting" => ("RS", "⟳"),
            "running" => ("R", "▶"),
            "dead" => ("D", "!"),
            _ => return None,
        };
        match self {
            Self::Long => None,
            Self::Short => Some(short),
            Self::Icon => Some(icon),
        }
    }
}

impl FromStr for StateStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "long" => Ok(Self::Long),
            "short" => Ok(Self::Short),
            "icon" => Ok(Self::Icon),
            other => Err(format!("unknown state style: {other}")),
        }
    }
}

/// One resource as reported by an engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub kind: ResourceKind,
    pub id: String,
    pub name: String,
    pub fields: Row,
}

impl Resource {
    /// Build from the engine's raw field map.
    ///
    /// The map must carry `ID` or `Name` (whichever identifies the kind) and
    /// gets `ID` and `Name` filled in when missing.
    #[must_use]
    pub fn from_fields(kind: ResourceKind, mut fields: Row) -> Option<Self> {
        let id = text(&fields, kind.id_field())?;
        let name = text(&fields, "Name").unwrap_or_else(|| id.clone());
        fields.insert("ID".into(), Value::String(id.clone()));
        fields.insert("Name".into(), Value::String(name.clone()));
        Some(Self {
            kind,
            id,
            name,
            fields,
        })
    }

    /// Lifecycle state, when the kind has one.
    #[must_use]
    pub fn state(&self) -> Option<&str> {
        self.fields.get("State").and_then(Value::as_str)
    }

    /// Flatten to a row with a `_representation` list for `columns`.
    #[must_use]
    pub fn to_row(&self, columns: &[String], style: StateStyle) -> Row {
        let representation: Vec<Value> = columns
            .iter()
            .map(|column| {
                let value = self.fields.get(column).map(display).unwrap_or_default();
                let rendered = match column.as_str() {
                    "State" => style.render(&value).map(str::to_string),
                    "CreatedAt" => value.get(..10).map(str::to_string),
                    _ => None,
                };
                match rendered {
                    Some(r) => json!({"field": column, "value": value, "representation": r}),
                    None => json!({"field": column, "value": value}),
                }
            })
            .collect();

        let mut row = self.fields.clone();
        row.insert("_representation".into(), Value::Array(representation));
        row
    }
}

/// Render a listing. Running containers come first, then everything is
/// ordered by name.
#[must_use]
pub fn to_rows(mut resources: Vec<Resource>, columns: &[String], style: StateStyle) -> Vec<Row> {
    resources.sort_by(|a, b| {
        let a_running = a.state() == Some("running");
        let b_running = b.state() == Some("running");
        b_running.cmp(&a_running).then_with(|| a.name.cmp(&b.name))
    });
    resources.iter().map(|r| r.to_row(columns, style)).collect()
}

/// Split a comma-separated column list.
#[must_use]
pub fn parse_columns(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

fn text(fields: &Row, key: &str) -> Option<String> {
    fields
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
