use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CollectionInfo {
    /// Shared verbatim by every model; ids are not namespaced.
    pub global: bool,
    /// Reserved for direct access; never touched through the rewriter.
    pub raw_access: bool,
}

impl CollectionInfo {
    pub const MODEL: CollectionInfo = CollectionInfo {
        global: false,
        raw_access: false,
    };
    pub const GLOBAL: CollectionInfo = CollectionInfo {
        global: true,
        raw_access: false,
    };
    pub const RAW: CollectionInfo = CollectionInfo {
        global: true,
        raw_access: true,
    };
}

pub mod names {
    pub const MODELS: &str = "models";
    pub const CONTROLLERS: &str = "controllers";
    pub const TXNS: &str = "txns";
    pub const TXNS_PRUNE: &str = "txns.prune";
    pub const SEQUENCE: &str = "sequence";
    pub const APPLICATIONS: &str = "applications";
    pub const CHARMS: &str = "charms";
    pub const UNITS: &str = "units";
    pub const MACHINES: &str = "machines";
    pub const RELATIONS: &str = "relations";
    pub const RELATION_SCOPES: &str = "relationscopes";
    pub const SETTINGS: &str = "settings";
    pub const SETTINGS_REFS: &str = "settingsrefs";
    pub const STATUSES: &str = "statuses";
    pub const OPENED_PORTS: &str = "openedPorts";
    pub const SUBNETS: &str = "subnets";
}

/// The collections a model-scoped runner may touch, and how.
#[derive(Debug, Clone, Default)]
pub struct CollectionSchema {
    collections: HashMap<String, CollectionInfo>,
}

impl CollectionSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, info: CollectionInfo) -> Self {
        self.collections.insert(name.to_string(), info);
        self
    }

    pub fn get(&self, name: &str) -> Option<CollectionInfo> {
        self.collections.get(name).copied()
    }

    pub fn is_global(&self, name: &str) -> bool {
        self.get(name).is_some_and(|info| info.global)
    }
}

/// Schema of every collection the life-cycle engine uses.
pub fn all_collections() -> CollectionSchema {
    use names::*;
    let mut schema = CollectionSchema::new()
        .with(MODELS, CollectionInfo::GLOBAL)
        .with(CONTROLLERS, CollectionInfo::GLOBAL);
    for raw in [TXNS, TXNS_PRUNE, SEQUENCE] {
        schema = schema.with(raw, CollectionInfo::RAW);
    }
    for scoped in [
        APPLICATIONS,
        CHARMS,
        UNITS,
        MACHINES,
        RELATIONS,
        RELATION_SCOPES,
        SETTINGS,
        SETTINGS_REFS,
        STATUSES,
        OPENED_PORTS,
        SUBNETS,
    ] {
        schema = schema.with(scoped, CollectionInfo::MODEL);
    }
    schema
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schema() {
        let schema = all_collections();
        assert_eq!(schema.get("units"), Some(CollectionInfo::MODEL));
        assert!(schema.is_global("models"));
        assert!(schema.get("txns").is_some_and(|info| info.raw_access));
        assert_eq!(schema.get("bar"), None);
    }
}
