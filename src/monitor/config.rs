use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use super::identity::IdentityPolicy;

/// Event types that gesture libraries re-emit alongside their own events.
pub const DEFAULT_IGNORE_EVENTS: &[&str] = &[
    "touchstart",
    "mousedown",
    "touchmove",
    "mousemove",
    "touchend",
    "touchcancel",
    "mouseup",
];

pub const DEFAULT_BIND: &str = "on";
pub const DEFAULT_UNBIND: &str = "off";

// CSS properties that take bare numbers; every other number gets `px`.
const UNITLESS_PROPERTIES: &[&str] = &[
    "z-index",
    "opacity",
    "font-weight",
    "line-height",
    "flex-grow",
    "flex-shrink",
    "order",
    "zoom",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read monitor config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type LogSink = Rc<dyn Fn(&str)>;

fn default_log() -> LogSink {
    Rc::new(|message: &str| {
        tracing::debug!(target: "listener_monitor", "{message}");
    })
}

fn css<const N: usize>(pairs: [(&str, &str); N]) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .map(|(property, value)| (property.to_string(), value.to_string()))
        .collect()
}

/// Placement and look of the on-page overlay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VisualizerStyle {
    pub visualizer_id: String,
    pub visualizer_css: BTreeMap<String, String>,
    pub count_class: String,
    pub count_css: BTreeMap<String, String>,
    pub item_class: String,
    pub item_css: BTreeMap<String, String>,
}

impl Default for VisualizerStyle {
    fn default() -> Self {
        Self {
            visualizer_id: "event_listener_bindings_visualizer".into(),
            visualizer_css: css([
                ("position", "fixed"),
                ("bottom", "0px"),
                ("left", "0px"),
                ("z-index", "1000"),
            ]),
            count_class: "count".into(),
            count_css: css([
                ("background", "white"),
                ("color", "black"),
                ("font-weight", "bold"),
                ("font-size", "9px"),
                ("text-align", "center"),
                ("width", "50px"),
            ]),
            item_class: "event-listener-item".into(),
            item_css: css([
                ("width", "50px"),
                ("height", "3px"),
                ("border", "1px solid white"),
                ("border-bottom", "none"),
            ]),
        }
    }
}

/// Options for one monitor instance.
///
/// `MonitorOptions::default()` is the immutable baseline; overrides produce a
/// new value and never touch the defaults.
#[derive(Clone)]
pub struct MonitorOptions {
    pub identity: IdentityPolicy,
    /// `None` means: the gesture-library list when the page has a gesture
    /// library loaded, nothing otherwise.
    pub ignore_events: Option<Vec<String>>,
    pub bind: Vec<String>,
    pub unbind: Vec<String>,
    pub visualizer: VisualizerStyle,
    pub log: LogSink,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            identity: IdentityPolicy::Default,
            ignore_events: None,
            bind: vec![DEFAULT_BIND.to_string()],
            unbind: vec![DEFAULT_UNBIND.to_string()],
            visualizer: VisualizerStyle::default(),
            log: default_log(),
        }
    }
}

impl fmt::Debug for MonitorOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorOptions")
            .field("identity", &self.identity)
            .field("ignore_events", &self.ignore_events)
            .field("bind", &self.bind)
            .field("unbind", &self.unbind)
            .field("visualizer", &self.visualizer)
            .finish_non_exhaustive()
    }
}

impl MonitorOptions {
    pub fn with_identity(mut self, identity: IdentityPolicy) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_ignore_events<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore_events = Some(events.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_bind<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bind = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_unbind<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unbind = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_log(mut self, log: impl Fn(&str) + 'static) -> Self {
        self.log = Rc::new(log);
        self
    }

    /// Applies file/caller overrides on top of these options. Style maps merge
    /// key by key; everything else is replaced when present.
    pub fn with_overrides(mut self, overrides: MonitorOverrides) -> Self {
        if let Some(events) = overrides.ignore_events {
            self.ignore_events = Some(events);
        }
        if let Some(bind) = overrides.bind {
            self.bind = bind.into_vec();
        }
        if let Some(unbind) = overrides.unbind {
            self.unbind = unbind.into_vec();
        }

        let style = &mut self.visualizer;
        if let Some(id) = overrides.visualizer_id {
            style.visualizer_id = id;
        }
        if let Some(class) = overrides.count_class {
            style.count_class = class;
        }
        if let Some(class) = overrides.item_class {
            style.item_class = class;
        }
        style.visualizer_css.extend(overrides.visualizer_css.unwrap_or_default());
        style.count_css.extend(overrides.count_css.unwrap_or_default());
        style.item_css.extend(overrides.item_css.unwrap_or_default());
        self
    }

    pub fn effective_ignore_events(&self, gesture_library: bool) -> Vec<String> {
        match &self.ignore_events {
            Some(events) => events.clone(),
            None if gesture_library => DEFAULT_IGNORE_EVENTS
                .iter()
                .map(|event| event.to_string())
                .collect(),
            None => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(name) => vec![name],
            OneOrMany::Many(names) => names,
        }
    }
}

/// Serializable subset of [`MonitorOptions`], as read from a YAML file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorOverrides {
    pub ignore_events: Option<Vec<String>>,
    pub bind: Option<OneOrMany>,
    pub unbind: Option<OneOrMany>,
    pub visualizer_id: Option<String>,
    #[serde(deserialize_with = "css_map")]
    pub visualizer_css: Option<BTreeMap<String, String>>,
    pub count_class: Option<String>,
    #[serde(deserialize_with = "css_map")]
    pub count_css: Option<BTreeMap<String, String>>,
    pub item_class: Option<String>,
    #[serde(deserialize_with = "css_map")]
    pub item_css: Option<BTreeMap<String, String>>,
}

impl MonitorOverrides {
    /// Reads overrides from `config_path`; a missing path or file yields no
    /// overrides.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        match config_path {
            Some(path) if path.exists() => Self::from_yaml(&fs::read_to_string(path)?),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CssValue {
    Number(f64),
    Text(String),
}

fn css_map<'de, D>(deserializer: D) -> Result<Option<BTreeMap<String, String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, CssValue>> = Option::deserialize(deserializer)?;
    Ok(raw.map(|map| {
        map.into_iter()
            .map(|(property, value)| {
                let value = match value {
                    CssValue::Text(text) => text,
                    CssValue::Number(number) if UNITLESS_PROPERTIES.contains(&property.as_str()) => {
                        number.to_string()
                    }
                    CssValue::Number(number) => format!("{number}px"),
                };
                (property, value)
            })
            .collect()
    }))
}
