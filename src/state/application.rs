//! Applications: a charm deployed under a name, owning units and taking
//! part in relations.
//!
//! An application counts its units and relations on its own document so
//! the last unit or relation to go can remove a Dying application in the
//! same transaction.

use super::charm::{Charm, CharmUrl, Settings};
use super::names::is_valid_application;
use super::relation::{Relation, RelationDoc, relation_destroy_ops};
use super::settings::{
    app_settings_key, dec_ref_ops, final_remove_ops, inc_ref_ops, read_settings,
    replace_settings_op,
};
use super::unit::{Unit, UnitDoc, add_unit_ops};
use super::State;
use crate::core::{Life, Result, ResultExt, StateError, to_document};
use crate::doc;
use crate::model_scope::names::{APPLICATIONS, RELATIONS, UNITS};
use crate::storage::{Filter, Update, UpdateOperator};
use crate::transaction::{AttemptOutcome, Op};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApplicationDoc {
    #[serde(rename = "_id", default)]
    pub doc_id: String,
    pub name: String,
    #[serde(default)]
    pub series: String,
    #[serde(default)]
    pub subordinate: bool,
    #[serde(rename = "charmurl")]
    pub charm_url: CharmUrl,
    pub life: Life,
    #[serde(rename = "unitcount", default)]
    pub unit_count: i64,
    #[serde(rename = "relationcount", default)]
    pub relation_count: i64,
    #[serde(rename = "txn-revno", default)]
    pub txn_revno: i64,
}

pub(crate) async fn read_application(st: &State, name: &str) -> Result<Option<ApplicationDoc>> {
    st.get_entity(APPLICATIONS, name).await
}

pub(crate) fn application_not_found(name: &str) -> StateError {
    StateError::not_found(format!("application {name:?}"))
}

/// Ops deleting the application document, asserting `asserts`, together
/// with the settings of its current charm.
pub(crate) fn remove_application_ops(app: &ApplicationDoc, asserts: Filter) -> Vec<Op> {
    let mut ops = vec![Op::remove(APPLICATIONS, app.name.as_str()).matching(asserts)];
    ops.extend(final_remove_ops(&app.name, &app.charm_url));
    ops
}

/// Ops recording that one of `app`'s units is going away. The last unit
/// of a Dying application with no relations takes the application along.
pub(crate) fn unit_removed_ops(app: &ApplicationDoc) -> Vec<Op> {
    if app.life == Life::Dying && app.unit_count == 1 && app.relation_count == 0 {
        return remove_application_ops(
            app,
            Filter::and(vec![
                Filter::eq("life", Life::Dying.as_str()),
                Filter::eq("unitcount", 1),
                Filter::eq("relationcount", 0),
            ]),
        );
    }
    // A Dying application must keep another unit or a relation.
    let assert = if app.life == Life::Alive {
        Filter::and(vec![
            Filter::eq("life", Life::Alive.as_str()),
            Filter::gt("unitcount", 0),
        ])
    } else {
        Filter::and(vec![
            Filter::eq("life", Life::Dying.as_str()),
            Filter::gt("unitcount", 0),
            Filter::or(vec![
                Filter::gt("unitcount", 1),
                Filter::gt("relationcount", 0),
            ]),
        ])
    };
    vec![
        Op::update(APPLICATIONS, app.name.as_str(), Update::inc(doc! { "unitcount": -1 }))
            .matching(assert),
    ]
}

/// Relations `app` takes part in, ordered by key.
pub(crate) async fn application_relations(st: &State, app: &str) -> Result<Vec<RelationDoc>> {
    st.find_entities(
        RELATIONS,
        Filter::in_values("applications", vec![Value::from(app)]),
    )
    .await
}

#[derive(Debug, Clone)]
pub struct Application {
    st: State,
    doc: ApplicationDoc,
}

impl fmt::Display for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.doc.name)
    }
}

impl Application {
    pub(crate) fn from_doc(st: &State, doc: ApplicationDoc) -> Self {
        Self {
            st: st.clone(),
            doc,
        }
    }

    pub fn name(&self) -> &str {
        &self.doc.name
    }

    pub fn life(&self) -> Life {
        self.doc.life
    }

    pub fn series(&self) -> &str {
        &self.doc.series
    }

    pub fn is_principal(&self) -> bool {
        !self.doc.subordinate
    }

    pub fn charm_url(&self) -> &CharmUrl {
        &self.doc.charm_url
    }

    /// Unit count as last read.
    pub fn unit_count(&self) -> i64 {
        self.doc.unit_count
    }

    /// Relation count as last read.
    pub fn relation_count(&self) -> i64 {
        self.doc.relation_count
    }

    pub async fn charm(&self) -> Result<Charm> {
        self.st.charm(&self.doc.charm_url).await
    }

    pub async fn refresh(&mut self) -> Result<()> {
        self.doc = read_application(&self.st, &self.doc.name)
            .await?
            .ok_or_else(|| application_not_found(&self.doc.name))?;
        Ok(())
    }

    /// Adds a new principal unit, named `<application>/<n>`.
    pub async fn add_unit(&self) -> Result<Unit> {
        let st = &self.st;
        let name = self.doc.name.as_str();
        let context = || format!("cannot add unit to application {name:?}");
        if self.doc.subordinate {
            return Err(StateError::InvalidArgument(format!(
                "cannot directly add units to subordinate application {name:?}"
            ))
            .annotate(context()));
        }
        let app = read_application(st, name)
            .await?
            .ok_or_else(|| application_not_found(name))
            .annotate_with(context)?;
        if app.life != Life::Alive {
            return Err(StateError::NotAlive("application".to_string()).annotate(context()));
        }
        let (unit, ops) = add_unit_ops(st, &app, None).await?;
        st.run_transaction(ops)
            .await
            .map_err(|err| match err {
                StateError::TxnAborted => StateError::NotAlive("application".to_string()),
                other => other,
            })
            .annotate_with(context)?;
        debug!(model = %st.model_uuid(), unit = %unit.name, "added unit");
        Ok(Unit::from_doc(st, unit))
    }

    pub async fn all_units(&self) -> Result<Vec<Unit>> {
        let docs: Vec<UnitDoc> = self
            .st
            .find_entities(UNITS, Filter::eq("application", self.doc.name.as_str()))
            .await?;
        Ok(docs.into_iter().map(|doc| Unit::from_doc(&self.st, doc)).collect())
    }

    pub async fn relations(&self) -> Result<Vec<Relation>> {
        let docs = application_relations(&self.st, &self.doc.name).await?;
        Ok(docs.into_iter().map(|doc| Relation::from_doc(&self.st, doc)).collect())
    }

    /// Starts removing the application. With no units left and every
    /// relation removable now it is removed at once; otherwise it becomes
    /// Dying and its relations are destroyed.
    pub async fn destroy(&mut self) -> Result<()> {
        let st = &self.st;
        let name = self.doc.name.as_str();
        st.run(move |_attempt| {
            Box::pin(async move {
                let Some(app) = read_application(st, name).await? else {
                    return Ok(AttemptOutcome::NoOps);
                };
                if app.life != Life::Alive {
                    return Ok(AttemptOutcome::NoOps);
                }
                let relations = application_relations(st, name).await?;
                if relations.len() as i64 != app.relation_count {
                    // A relation was added or removed between the reads.
                    return Ok(AttemptOutcome::Transient);
                }
                let mut ops = Vec::new();
                let mut removed = 0;
                for rel in &relations {
                    let (rel_ops, is_remove) = relation_destroy_ops(st, rel, name).await?;
                    ops.extend(rel_ops);
                    if is_remove {
                        removed += 1;
                    }
                }
                let count_assert = if app.unit_count == 0 {
                    Filter::eq("unitcount", 0)
                } else {
                    Filter::gt("unitcount", 0)
                };
                if app.unit_count == 0 && app.relation_count == removed {
                    ops.extend(remove_application_ops(
                        &app,
                        Filter::and(vec![
                            Filter::eq("life", Life::Alive.as_str()),
                            Filter::eq("unitcount", 0),
                            Filter::eq("relationcount", removed),
                        ]),
                    ));
                    return Ok(AttemptOutcome::Ops(ops));
                }
                let mut update = Update::set(doc! { "life": Life::Dying.as_str() });
                if removed > 0 {
                    update = update.and(UpdateOperator::Inc, doc! { "relationcount": -removed });
                }
                ops.push(Op::update(APPLICATIONS, name, update).matching(Filter::and(vec![
                    Filter::eq("life", Life::Alive.as_str()),
                    Filter::eq("relationcount", app.relation_count),
                    count_assert,
                ])));
                Ok(AttemptOutcome::Ops(ops))
            })
        })
        .await
        .annotate_with(|| format!("cannot destroy application {name:?}"))?;
        debug!(model = %self.st.model_uuid(), application = %self.doc.name, "destroyed application");
        if self.doc.life == Life::Alive {
            self.doc.life = Life::Dying;
        }
        Ok(())
    }

    /// Switches the application to `charm`, carrying over the settings
    /// the new charm still declares.
    pub async fn set_charm(&mut self, charm: &Charm) -> Result<()> {
        let st = &self.st;
        let name = self.doc.name.as_str();
        st.run(move |_attempt| {
            Box::pin(async move {
                let app = read_application(st, name)
                    .await?
                    .ok_or_else(|| application_not_found(name))?;
                if app.life != Life::Alive {
                    return Err(StateError::NotAlive("application".to_string()));
                }
                if charm.is_subordinate() != app.subordinate {
                    return Err(StateError::InvalidArgument(
                        "cannot change an application's subordinacy".to_string(),
                    ));
                }
                let old = &app.charm_url;
                if old == charm.url() {
                    return Ok(AttemptOutcome::NoOps);
                }
                let carried = read_settings(st, &app_settings_key(name, old))
                    .await?
                    .map(|doc| charm.config().filter_settings(&doc.settings))
                    .unwrap_or_default();
                let mut ops = vec![
                    Op::update(
                        APPLICATIONS,
                        name,
                        Update::set(doc! { "charmurl": charm.url().to_string() }),
                    )
                    .matching(Filter::and(vec![
                        Filter::eq("life", Life::Alive.as_str()),
                        Filter::eq("charmurl", old.to_string()),
                    ])),
                ];
                ops.extend(inc_ref_ops(st, name, charm.url(), || carried).await?);
                ops.extend(dec_ref_ops(st, name, old).await?);
                Ok(AttemptOutcome::Ops(ops))
            })
        })
        .await
        .annotate_with(|| {
            format!("cannot upgrade application {name:?} to charm {:?}", charm.url().to_string())
        })?;
        self.refresh().await
    }

    /// Effective settings: the charm's defaults overlaid with whatever
    /// has been set.
    pub async fn config_settings(&self) -> Result<Settings> {
        let app = read_application(&self.st, &self.doc.name)
            .await?
            .ok_or_else(|| application_not_found(&self.doc.name))?;
        let charm = self.st.charm(&app.charm_url).await?;
        let mut settings = charm.config().default_settings();
        let key = app_settings_key(&app.name, &app.charm_url);
        if let Some(doc) = read_settings(&self.st, &key).await? {
            settings.extend(doc.settings);
        }
        Ok(settings)
    }

    /// Applies `changes` to the stored settings. A null value unsets the
    /// option, falling back to the charm default.
    pub async fn update_config_settings(&self, changes: Settings) -> Result<()> {
        let st = &self.st;
        let name = self.doc.name.as_str();
        let changes = &changes;
        st.run(move |_attempt| {
            Box::pin(async move {
                let app = read_application(st, name)
                    .await?
                    .ok_or_else(|| application_not_found(name))?;
                let charm = st.charm(&app.charm_url).await?;
                charm.config().validate_settings(changes)?;
                let key = app_settings_key(name, &app.charm_url);
                let current = read_settings(st, &key)
                    .await?
                    .ok_or_else(|| StateError::not_found(format!("settings {key:?}")))?;
                let mut updated = current.settings.clone();
                for (option, value) in changes {
                    if value.is_null() {
                        updated.remove(option);
                    } else {
                        updated.insert(option.clone(), value.clone());
                    }
                }
                if updated == current.settings {
                    return Ok(AttemptOutcome::NoOps);
                }
                Ok(AttemptOutcome::Ops(vec![replace_settings_op(
                    &key,
                    &updated,
                    current.txn_revno,
                )?]))
            })
        })
        .await
        .annotate_with(|| format!("cannot update settings of application {name:?}"))
    }
}

impl State {
    /// Deploys `charm` as a new application called `name`.
    pub async fn add_application(&self, name: &str, charm: &Charm) -> Result<Application> {
        let context = || format!("cannot add application {name:?}");
        if !is_valid_application(name) {
            return Err(StateError::InvalidArgument("invalid name".to_string()).annotate(context()));
        }
        // Make sure the charm is still there.
        self.charm(charm.url()).await.annotate_with(context)?;
        let doc = ApplicationDoc {
            doc_id: name.to_string(),
            name: name.to_string(),
            series: charm.url().series().unwrap_or_default().to_string(),
            subordinate: charm.is_subordinate(),
            charm_url: charm.url().clone(),
            life: Life::Alive,
            unit_count: 0,
            relation_count: 0,
            txn_revno: 0,
        };
        let mut ops = vec![Op::insert(APPLICATIONS, name, to_document(&doc)?)];
        ops.extend(inc_ref_ops(self, name, charm.url(), Settings::new).await?);
        self.run_transaction(ops)
            .await
            .map_err(|err| match err {
                StateError::TxnAborted => {
                    StateError::InvalidArgument("application already exists".to_string())
                }
                other => other,
            })
            .annotate_with(context)?;
        debug!(model = %self.model_uuid(), application = %name, "added application");
        Ok(Application::from_doc(self, doc))
    }

    pub async fn application(&self, name: &str) -> Result<Application> {
        let doc = read_application(self, name)
            .await?
            .ok_or_else(|| application_not_found(name))?;
        Ok(Application::from_doc(self, doc))
    }

    pub async fn all_applications(&self) -> Result<Vec<Application>> {
        let docs: Vec<ApplicationDoc> = self
            .find_entities(APPLICATIONS, Filter::exists("charmurl", true))
            .await?;
        Ok(docs.into_iter().map(|doc| Application::from_doc(self, doc)).collect())
    }
}
