// ============================================================================
// Charms
// ============================================================================
//
// A charm is the immutable package an application runs. The engine only
// needs its url, the relation endpoints it declares and its config
// options with their defaults.
//
// ============================================================================

use super::State;
use crate::core::{Result, ResultExt, StateError, from_document, to_document};
use crate::model_scope::names::CHARMS;
use crate::transaction::Op;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Application or unit config values, keyed by option name.
pub type Settings = BTreeMap<String, Value>;

lazy_static! {
    static ref CHARM_URL: Regex = Regex::new(
        r"^(cs|local):(?:([a-z][a-z0-9]*)/)?([a-z][a-z0-9]*(?:-[a-z0-9]*[a-z][a-z0-9]*)*)-(0|[1-9][0-9]*)$"
    )
    .unwrap();
}

/// Charm identifier such as `cs:quantal/wordpress-3`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CharmUrl {
    schema: String,
    series: Option<String>,
    name: String,
    revision: u32,
}

impl CharmUrl {
    pub fn parse(url: &str) -> Result<Self> {
        let caps = CHARM_URL
            .captures(url)
            .ok_or_else(|| StateError::InvalidArgument(format!("cannot parse charm url {url:?}")))?;
        let revision = caps[4]
            .parse()
            .map_err(|_| StateError::InvalidArgument(format!("cannot parse charm url {url:?}")))?;
        Ok(Self {
            schema: caps[1].to_string(),
            series: caps.get(2).map(|m| m.as_str().to_string()),
            name: caps[3].to_string(),
            revision,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn series(&self) -> Option<&str> {
        self.series.as_deref()
    }

    pub fn revision(&self) -> u32 {
        self.revision
    }

    /// The same charm at another revision.
    pub fn with_revision(&self, revision: u32) -> Self {
        Self {
            revision,
            ..self.clone()
        }
    }
}

impl fmt::Display for CharmUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.schema)?;
        if let Some(series) = &self.series {
            write!(f, "{series}/")?;
        }
        write!(f, "{}-{}", self.name, self.revision)
    }
}

impl FromStr for CharmUrl {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CharmUrl {
    type Error = StateError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<CharmUrl> for String {
    fn from(url: CharmUrl) -> Self {
        url.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RelationScope {
    #[default]
    Global,
    Container,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationSpec {
    pub interface: String,
    #[serde(default)]
    pub scope: RelationScope,
}

impl RelationSpec {
    pub fn new(interface: &str) -> Self {
        Self {
            interface: interface.to_string(),
            scope: RelationScope::Global,
        }
    }

    pub fn container(interface: &str) -> Self {
        Self {
            interface: interface.to_string(),
            scope: RelationScope::Container,
        }
    }
}

/// Name of the endpoint every charm provides implicitly.
pub const JUJU_INFO: &str = "juju-info";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CharmMeta {
    pub name: String,
    #[serde(default)]
    pub subordinate: bool,
    #[serde(default)]
    pub provides: BTreeMap<String, RelationSpec>,
    #[serde(default)]
    pub requires: BTreeMap<String, RelationSpec>,
    #[serde(default)]
    pub peers: BTreeMap<String, RelationSpec>,
}

impl CharmMeta {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn subordinate(mut self) -> Self {
        self.subordinate = true;
        self
    }

    pub fn provides(mut self, name: &str, spec: RelationSpec) -> Self {
        self.provides.insert(name.to_string(), spec);
        self
    }

    pub fn requires(mut self, name: &str, spec: RelationSpec) -> Self {
        self.requires.insert(name.to_string(), spec);
        self
    }

    pub fn peers(mut self, name: &str, spec: RelationSpec) -> Self {
        self.peers.insert(name.to_string(), spec);
        self
    }

    /// Declared provider endpoints plus the implicit `juju-info` one.
    pub fn all_provides(&self) -> BTreeMap<String, RelationSpec> {
        let mut all = self.provides.clone();
        all.entry(JUJU_INFO.to_string())
            .or_insert_with(|| RelationSpec::new(JUJU_INFO));
        all
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigOption {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub default: Option<Value>,
}

impl ConfigOption {
    pub fn string(default: Option<&str>) -> Self {
        Self {
            kind: "string".to_string(),
            description: String::new(),
            default: default.map(Value::from),
        }
    }

    pub fn int(default: Option<i64>) -> Self {
        Self {
            kind: "int".to_string(),
            description: String::new(),
            default: default.map(Value::from),
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self.kind.as_str() {
            "string" => value.is_string(),
            "int" => value.is_i64(),
            "float" => value.is_number(),
            "boolean" => value.is_boolean(),
            _ => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CharmConfig {
    #[serde(default)]
    pub options: BTreeMap<String, ConfigOption>,
}

impl CharmConfig {
    pub fn with_option(mut self, name: &str, option: ConfigOption) -> Self {
        self.options.insert(name.to_string(), option);
        self
    }

    /// Options that declare a default, with that default.
    pub fn default_settings(&self) -> Settings {
        self.options
            .iter()
            .filter_map(|(name, opt)| opt.default.clone().map(|v| (name.clone(), v)))
            .collect()
    }

    /// Checks changes against the declared options. Null values unset an
    /// option and are always accepted for known names.
    pub fn validate_settings(&self, changes: &Settings) -> Result<()> {
        for (name, value) in changes {
            let option = self
                .options
                .get(name)
                .ok_or_else(|| StateError::InvalidArgument(format!("unknown option {name:?}")))?;
            if !value.is_null() && !option.accepts(value) {
                return Err(StateError::InvalidArgument(format!(
                    "option {name:?} expected {}, got {value}",
                    option.kind
                )));
            }
        }
        Ok(())
    }

    /// Keeps only the settings this config still declares.
    pub fn filter_settings(&self, settings: &Settings) -> Settings {
        settings
            .iter()
            .filter(|(name, _)| self.options.contains_key(*name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

/// Everything needed to add a charm.
#[derive(Debug, Clone)]
pub struct CharmInfo {
    pub url: CharmUrl,
    pub meta: CharmMeta,
    pub config: CharmConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CharmDoc {
    #[serde(rename = "_id", default)]
    pub doc_id: String,
    pub url: CharmUrl,
    pub meta: CharmMeta,
    #[serde(default)]
    pub config: CharmConfig,
}

#[derive(Debug, Clone)]
pub struct Charm {
    doc: CharmDoc,
}

impl Charm {
    pub fn url(&self) -> &CharmUrl {
        &self.doc.url
    }

    pub fn meta(&self) -> &CharmMeta {
        &self.doc.meta
    }

    pub fn config(&self) -> &CharmConfig {
        &self.doc.config
    }

    pub fn is_subordinate(&self) -> bool {
        self.doc.meta.subordinate
    }
}

impl State {
    pub async fn add_charm(&self, info: CharmInfo) -> Result<Charm> {
        let url = info.url.to_string();
        let doc = CharmDoc {
            doc_id: url.clone(),
            url: info.url,
            meta: info.meta,
            config: info.config,
        };
        let op = Op::insert(CHARMS, url.as_str(), to_document(&doc)?);
        self.run_transaction(vec![op])
            .await
            .map_err(|err| match err {
                StateError::TxnAborted => {
                    StateError::InvalidArgument("charm already exists".to_string())
                }
                other => other,
            })
            .annotate_with(|| format!("cannot add charm {url:?}"))?;
        debug!(model = %self.model_uuid(), charm = %url, "added charm");
        Ok(Charm { doc })
    }

    pub async fn charm(&self, url: &CharmUrl) -> Result<Charm> {
        let key = url.to_string();
        match self.get_doc(CHARMS, &key).await {
            Some(doc) => Ok(Charm {
                doc: from_document(doc)?,
            }),
            None => Err(StateError::not_found(format!("charm {key:?}"))),
        }
    }
}
