//! Relations between application endpoints, and the per-unit scope
//! documents recording which units take part.
//!
//! A relation counts the units in its scope. It can only be removed once
//! that count is zero, and the last unit leaving a Dying relation removes
//! it. Entering a container-scoped relation from a principal unit creates
//! the subordinate unit on the other side.

use super::application::{
    ApplicationDoc, application_not_found, read_application, remove_application_ops,
};
use super::charm::{JUJU_INFO, RelationScope};
use super::unit::{Unit, UnitDoc, add_unit_ops, read_unit};
use super::State;
use crate::core::{Life, Result, ResultExt, StateError, to_document};
use crate::doc;
use crate::model_scope::names::{APPLICATIONS, RELATION_SCOPES, RELATIONS, UNITS};
use crate::storage::{Filter, Update};
use crate::transaction::{Assert, AttemptOutcome, Op};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationRole {
    Provider,
    Requirer,
    Peer,
}

impl RelationRole {
    /// The role an endpoint must have to relate to one with this role.
    pub fn counterpart(&self) -> RelationRole {
        match self {
            RelationRole::Provider => RelationRole::Requirer,
            RelationRole::Requirer => RelationRole::Provider,
            RelationRole::Peer => RelationRole::Peer,
        }
    }
}

/// One side of a relation: a named relation of an application's charm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    #[serde(rename = "applicationname")]
    pub application_name: String,
    pub name: String,
    pub interface: String,
    pub role: RelationRole,
    #[serde(default)]
    pub scope: RelationScope,
}

impl Endpoint {
    /// Whether a relation between `self` and `other` makes sense.
    pub fn can_relate_to(&self, other: &Endpoint) -> bool {
        self.application_name != other.application_name
            && self.interface == other.interface
            && self.role != RelationRole::Peer
            && self.role.counterpart() == other.role
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.application_name, self.name)
    }
}

/// `app:endpoint` names in sorted order, separated by spaces.
pub(crate) fn relation_key(endpoints: &[Endpoint]) -> String {
    let mut names: Vec<String> = endpoints.iter().map(|ep| ep.to_string()).collect();
    names.sort();
    names.join(" ")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RelationDoc {
    #[serde(rename = "_id", default)]
    pub doc_id: String,
    pub key: String,
    pub id: i64,
    pub endpoints: Vec<Endpoint>,
    #[serde(default)]
    pub applications: Vec<String>,
    pub life: Life,
    #[serde(rename = "unitcount", default)]
    pub unit_count: i64,
    #[serde(rename = "txn-revno", default)]
    pub txn_revno: i64,
}

impl RelationDoc {
    fn endpoint(&self, app: &str) -> Option<&Endpoint> {
        self.endpoints.iter().find(|ep| ep.application_name == app)
    }

    /// Endpoints on the other side from `app`; for a peer relation, the
    /// peer endpoint itself.
    fn related_endpoints(&self, app: &str) -> Vec<Endpoint> {
        let others: Vec<Endpoint> = self
            .endpoints
            .iter()
            .filter(|ep| ep.application_name != app)
            .cloned()
            .collect();
        if others.is_empty() {
            self.endpoints.clone()
        } else {
            others
        }
    }

    fn is_container_scoped(&self) -> bool {
        self.endpoints
            .iter()
            .any(|ep| ep.scope == RelationScope::Container)
    }
}

pub(crate) async fn read_relation(st: &State, key: &str) -> Result<Option<RelationDoc>> {
    st.get_entity(RELATIONS, key).await
}

fn relation_not_found(key: &str) -> StateError {
    StateError::not_found(format!("relation {key:?}"))
}

/// Ops destroying `rel` as part of destroying the application
/// `ignore_app`, whose own document the caller updates. Returns whether
/// the ops remove the relation outright.
pub(crate) async fn relation_destroy_ops(
    st: &State,
    rel: &RelationDoc,
    ignore_app: &str,
) -> Result<(Vec<Op>, bool)> {
    if rel.life != Life::Alive {
        let op = Op::assert(RELATIONS, rel.key.as_str(), Assert::DocExists)
            .matching(Filter::eq("life", Life::Dying.as_str()));
        return Ok((vec![op], false));
    }
    if rel.unit_count == 0 {
        return Ok((relation_remove_ops(st, rel, ignore_app, "").await?, true));
    }
    let op = Op::update(
        RELATIONS,
        rel.key.as_str(),
        Update::set(doc! { "life": Life::Dying.as_str() }),
    )
    .matching(Filter::and(vec![
        Filter::eq("life", Life::Alive.as_str()),
        Filter::gt("unitcount", 0),
    ]));
    Ok((vec![op], false))
}

/// Ops removing `rel` and releasing it from its applications.
///
/// With a `departing_unit` the relation is Dying and that unit is the
/// last one in scope; its application is known to still have units.
/// Otherwise the relation is Alive with no units in scope.
pub(crate) async fn relation_remove_ops(
    st: &State,
    rel: &RelationDoc,
    ignore_app: &str,
    departing_unit: &str,
) -> Result<Vec<Op>> {
    let rel_assert = if departing_unit.is_empty() {
        Filter::and(vec![
            Filter::eq("life", Life::Alive.as_str()),
            Filter::eq("unitcount", 0),
        ])
    } else {
        Filter::and(vec![
            Filter::eq("life", Life::Dying.as_str()),
            Filter::eq("unitcount", 1),
        ])
    };
    let mut ops = vec![Op::remove(RELATIONS, rel.key.as_str()).matching(rel_assert)];
    let departing_app = if departing_unit.is_empty() {
        None
    } else {
        Some(super::names::unit_application(departing_unit)?)
    };
    let mut seen: Vec<&str> = Vec::new();
    for ep in &rel.endpoints {
        let app_name = ep.application_name.as_str();
        if app_name == ignore_app || seen.contains(&app_name) {
            continue;
        }
        seen.push(app_name);
        let dec = Update::inc(doc! { "relationcount": -1 });
        if departing_app.is_none() {
            ops.push(Op::update(APPLICATIONS, app_name, dec).matching(Filter::and(vec![
                Filter::gt("relationcount", 0),
                Filter::eq("life", Life::Alive.as_str()),
            ])));
            continue;
        }
        if departing_app == Some(app_name) {
            ops.push(Op::update(APPLICATIONS, app_name, dec).matching(Filter::and(vec![
                Filter::gt("relationcount", 0),
                Filter::gt("unitcount", 0),
            ])));
            continue;
        }
        let app = read_application(st, app_name)
            .await?
            .ok_or_else(|| application_not_found(app_name))?;
        ops.extend(final_relation_ops(&app, dec));
    }
    Ok(ops)
}

/// Releases `app` from a relation another application's unit is
/// removing. A Dying application left with no units and no relations
/// goes too.
fn final_relation_ops(app: &ApplicationDoc, dec: Update) -> Vec<Op> {
    if app.life == Life::Dying && app.unit_count == 0 && app.relation_count == 1 {
        return remove_application_ops(
            app,
            Filter::and(vec![
                Filter::eq("life", Life::Dying.as_str()),
                Filter::eq("unitcount", 0),
                Filter::eq("relationcount", 1),
            ]),
        );
    }
    vec![
        Op::update(APPLICATIONS, app.name.as_str(), dec).matching(Filter::or(vec![
            Filter::eq("life", Life::Alive.as_str()),
            Filter::gt("unitcount", 0),
            Filter::gt("relationcount", 1),
        ])),
    ]
}

#[derive(Debug, Clone)]
pub struct Relation {
    st: State,
    doc: RelationDoc,
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.doc.key)
    }
}

impl Relation {
    pub(crate) fn from_doc(st: &State, doc: RelationDoc) -> Self {
        Self {
            st: st.clone(),
            doc,
        }
    }

    pub fn id(&self) -> i64 {
        self.doc.id
    }

    pub fn key(&self) -> &str {
        &self.doc.key
    }

    pub fn life(&self) -> Life {
        self.doc.life
    }

    /// Units in scope, as last read.
    pub fn unit_count(&self) -> i64 {
        self.doc.unit_count
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.doc.endpoints
    }

    pub fn endpoint(&self, app: &str) -> Result<Endpoint> {
        self.doc.endpoint(app).cloned().ok_or_else(|| {
            StateError::InvalidArgument(format!(
                "application {app:?} is not a member of {:?}",
                self.doc.key
            ))
        })
    }

    pub fn related_endpoints(&self, app: &str) -> Result<Vec<Endpoint>> {
        self.endpoint(app)?;
        Ok(self.doc.related_endpoints(app))
    }

    pub fn is_container_scoped(&self) -> bool {
        self.doc.is_container_scoped()
    }

    pub async fn refresh(&mut self) -> Result<()> {
        self.doc = read_relation(&self.st, &self.doc.key)
            .await?
            .ok_or_else(|| relation_not_found(&self.doc.key))?;
        Ok(())
    }

    /// Removes the relation if no unit is in scope, otherwise marks it
    /// Dying so the last unit to leave removes it.
    pub async fn destroy(&mut self) -> Result<()> {
        let st = &self.st;
        let key = self.doc.key.as_str();
        st.run(move |_attempt| {
            Box::pin(async move {
                let Some(rel) = read_relation(st, key).await? else {
                    return Ok(AttemptOutcome::NoOps);
                };
                if rel.life != Life::Alive {
                    return Ok(AttemptOutcome::NoOps);
                }
                let (ops, _) = relation_destroy_ops(st, &rel, "").await?;
                Ok(AttemptOutcome::Ops(ops))
            })
        })
        .await
        .annotate_with(|| format!("cannot destroy relation {key:?}"))?;
        if self.doc.life == Life::Alive {
            self.doc.life = Life::Dying;
        }
        Ok(())
    }

    /// The view of this relation from `unit`'s side.
    pub fn unit(&self, unit: &Unit) -> Result<RelationUnit> {
        let endpoint = self.endpoint(unit.application_name())?;
        Ok(RelationUnit {
            st: self.st.clone(),
            relation_key: self.doc.key.clone(),
            relation_id: self.doc.id,
            unit_name: unit.name().to_string(),
            endpoint,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScopeDoc {
    #[serde(rename = "_id", default)]
    doc_id: String,
    #[serde(rename = "relationkey")]
    relation_key: String,
    #[serde(rename = "relationid")]
    relation_id: i64,
    unit: String,
    #[serde(default)]
    departing: bool,
}

pub(crate) fn scope_key(relation_id: i64, unit: &str) -> String {
    format!("r#{relation_id}#{unit}")
}

async fn read_scope(st: &State, key: &str) -> Result<Option<ScopeDoc>> {
    st.get_entity(RELATION_SCOPES, key).await
}

/// Whether `unit` is in the scope of relation `relation_id`. With
/// `joined_only`, a unit preparing to leave does not count.
pub(crate) async fn unit_in_scope(
    st: &State,
    relation_id: i64,
    unit: &str,
    joined_only: bool,
) -> Result<bool> {
    Ok(read_scope(st, &scope_key(relation_id, unit))
        .await?
        .is_some_and(|scope| !(joined_only && scope.departing)))
}

/// A unit's membership of one relation.
#[derive(Debug, Clone)]
pub struct RelationUnit {
    st: State,
    relation_key: String,
    relation_id: i64,
    unit_name: String,
    endpoint: Endpoint,
}

impl RelationUnit {
    pub fn unit_name(&self) -> &str {
        &self.unit_name
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn scope_key(&self) -> String {
        scope_key(self.relation_id, &self.unit_name)
    }

    pub async fn in_scope(&self) -> Result<bool> {
        unit_in_scope(&self.st, self.relation_id, &self.unit_name, false).await
    }

    /// Joins the relation scope. For a principal unit entering a
    /// container-scoped relation the subordinate unit is created in the
    /// same transaction if it does not exist yet.
    pub async fn enter_scope(&self) -> Result<()> {
        let st = &self.st;
        let rel_key = self.relation_key.as_str();
        let unit_name = self.unit_name.as_str();
        let scope = self.scope_key();
        let scope = scope.as_str();
        st.run(move |_attempt| {
            Box::pin(async move {
                let cannot_enter = || StateError::NotAlive("unit or relation".to_string());
                let rel = match read_relation(st, rel_key).await? {
                    Some(rel) if rel.life == Life::Alive => rel,
                    _ => return Err(cannot_enter()),
                };
                let unit = match read_unit(st, unit_name).await? {
                    Some(unit) if unit.life == Life::Alive => unit,
                    _ => return Err(cannot_enter()),
                };
                if read_scope(st, scope).await?.is_some() {
                    return Ok(AttemptOutcome::NoOps);
                }
                let doc = ScopeDoc {
                    doc_id: scope.to_string(),
                    relation_key: rel.key.clone(),
                    relation_id: rel.id,
                    unit: unit_name.to_string(),
                    departing: false,
                };
                let alive = || Filter::eq("life", Life::Alive.as_str());
                let mut ops = vec![
                    Op::insert(RELATION_SCOPES, scope, to_document(&doc)?),
                    Op::update(RELATIONS, rel_key, Update::inc(doc! { "unitcount": 1 }))
                        .matching(alive()),
                    Op::assert(UNITS, unit_name, Assert::DocExists).matching(alive()),
                ];
                if rel.is_container_scoped() && unit.principal.is_empty() {
                    ops.extend(subordinate_ops(st, &rel, &unit).await?);
                }
                Ok(AttemptOutcome::Ops(ops))
            })
        })
        .await
        .annotate_with(|| {
            format!("cannot enter scope for unit {unit_name:?} in relation {rel_key:?}")
        })?;
        debug!(unit = %self.unit_name, relation = %self.relation_key, "entered relation scope");
        Ok(())
    }

    /// Marks the unit as about to leave; it no longer counts as joined.
    pub async fn prepare_leave_scope(&self) -> Result<()> {
        let scope = self.scope_key();
        if read_scope(&self.st, &scope).await?.is_none() {
            return Ok(());
        }
        let op = Op::update(
            RELATION_SCOPES,
            scope.as_str(),
            Update::set(doc! { "departing": true }),
        )
        .with_assert(Assert::DocExists);
        match self.st.run_transaction(vec![op]).await {
            // Left in the meantime.
            Ok(()) | Err(StateError::TxnAborted) => Ok(()),
            Err(err) => Err(err.annotate(format!(
                "cannot prepare scope departure for unit {:?} in relation {:?}",
                self.unit_name, self.relation_key
            ))),
        }
    }

    /// Leaves the relation scope. The last unit to leave a Dying relation
    /// removes it.
    pub async fn leave_scope(&self) -> Result<()> {
        let st = &self.st;
        let rel_key = self.relation_key.as_str();
        let unit_name = self.unit_name.as_str();
        let scope = self.scope_key();
        let scope = scope.as_str();
        st.run(move |_attempt| {
            Box::pin(async move {
                if read_scope(st, scope).await?.is_none() {
                    return Ok(AttemptOutcome::NoOps);
                }
                let Some(rel) = read_relation(st, rel_key).await? else {
                    return Ok(AttemptOutcome::NoOps);
                };
                let mut ops =
                    vec![Op::remove(RELATION_SCOPES, scope).with_assert(Assert::DocExists)];
                let dec = Update::inc(doc! { "unitcount": -1 });
                if rel.life == Life::Alive {
                    ops.push(
                        Op::update(RELATIONS, rel_key, dec)
                            .matching(Filter::eq("life", Life::Alive.as_str())),
                    );
                } else if rel.unit_count > 1 {
                    ops.push(
                        Op::update(RELATIONS, rel_key, dec).matching(Filter::gt("unitcount", 1)),
                    );
                } else {
                    ops.extend(relation_remove_ops(st, &rel, "", unit_name).await?);
                }
                Ok(AttemptOutcome::Ops(ops))
            })
        })
        .await
        .annotate_with(|| {
            format!("cannot leave scope for unit {unit_name:?} in relation {rel_key:?}")
        })?;
        debug!(unit = %self.unit_name, relation = %self.relation_key, "left relation scope");
        Ok(())
    }
}

/// Ops creating `principal`'s subordinate unit of the other application
/// in container-scoped relation `rel`, unless it already has one.
async fn subordinate_ops(st: &State, rel: &RelationDoc, principal: &UnitDoc) -> Result<Vec<Op>> {
    let Some(sub_ep) = rel.related_endpoints(&principal.application).into_iter().next() else {
        return Ok(Vec::new());
    };
    let sub_app_name = sub_ep.application_name.as_str();
    let prefix = format!("{sub_app_name}/");
    if principal.subordinates.iter().any(|s| s.starts_with(&prefix)) {
        return Ok(Vec::new());
    }
    let sub_app = read_application(st, sub_app_name)
        .await?
        .ok_or_else(|| application_not_found(sub_app_name))?;
    if sub_app.life != Life::Alive {
        return Err(StateError::NotAlive(format!("application {sub_app_name:?}")));
    }
    let (sub, mut ops) = add_unit_ops(st, &sub_app, Some(&principal.name)).await?;
    ops.push(
        Op::update(
            UNITS,
            principal.name.as_str(),
            Update::add_to_set(doc! { "subordinates": sub.name.as_str() }),
        )
        .matching(Filter::and(vec![
            Filter::eq("life", Life::Alive.as_str()),
            Filter::eq("subordinates", Value::from(principal.subordinates.clone())),
        ])),
    );
    Ok(ops)
}

impl State {
    /// Relates the given endpoints: one peer endpoint, or a provider and a
    /// requirer.
    pub async fn add_relation(&self, endpoints: &[Endpoint]) -> Result<Relation> {
        let key = relation_key(endpoints);
        let context = || format!("cannot add relation {key:?}");
        let mut endpoints = endpoints.to_vec();
        match endpoints.as_slice() {
            [peer] if peer.role == RelationRole::Peer => {}
            [a, b] if a.can_relate_to(b) => {}
            [_] | [_, _] => {
                return Err(StateError::InvalidArgument(
                    "endpoints do not relate".to_string(),
                )
                .annotate(context()));
            }
            _ => {
                return Err(StateError::InvalidArgument(format!(
                    "cannot relate {} endpoints",
                    endpoints.len()
                ))
                .annotate(context()));
            }
        }
        if endpoints.iter().any(|ep| ep.scope == RelationScope::Container) {
            for ep in &mut endpoints {
                ep.scope = RelationScope::Container;
            }
        }
        if read_relation(self, &key).await?.is_some() {
            return Err(
                StateError::InvalidArgument("relation already exists".to_string())
                    .annotate(context()),
            );
        }
        let mut applications: Vec<String> = Vec::new();
        for ep in &endpoints {
            let app = read_application(self, &ep.application_name)
                .await?
                .ok_or_else(|| application_not_found(&ep.application_name))
                .annotate_with(context)?;
            if app.life != Life::Alive {
                return Err(StateError::NotAlive(format!("application {:?}", app.name))
                    .annotate(context()));
            }
            if !applications.contains(&app.name) {
                applications.push(app.name);
            }
        }
        let id = self.sequence("relation").await? as i64;
        let doc = RelationDoc {
            doc_id: key.clone(),
            key: key.clone(),
            id,
            endpoints,
            applications,
            life: Life::Alive,
            unit_count: 0,
            txn_revno: 0,
        };
        let mut ops = vec![Op::insert(RELATIONS, key.as_str(), to_document(&doc)?)];
        for app in &doc.applications {
            ops.push(
                Op::update(APPLICATIONS, app.as_str(), Update::inc(doc! { "relationcount": 1 }))
                    .matching(Filter::eq("life", Life::Alive.as_str())),
            );
        }
        match self.run_transaction(ops).await {
            Ok(()) => {}
            Err(StateError::TxnAborted) => {
                let err = if read_relation(self, &key).await?.is_some() {
                    StateError::InvalidArgument("relation already exists".to_string())
                } else {
                    StateError::NotAlive("application".to_string())
                };
                return Err(err.annotate(context()));
            }
            Err(err) => return Err(err.annotate(context())),
        }
        debug!(model = %self.model_uuid(), relation = %key, id, "added relation");
        Ok(Relation::from_doc(self, doc))
    }

    /// The endpoints that would relate `app_a` to `app_b`, or those of a
    /// peer relation when only one name is meaningful. Each name may be
    /// `app` or `app:endpoint`.
    pub async fn infer_endpoints(&self, a: &str, b: &str) -> Result<Vec<Endpoint>> {
        let left = self.candidate_endpoints(a).await?;
        let right = self.candidate_endpoints(b).await?;
        let mut found: Vec<Vec<Endpoint>> = Vec::new();
        for l in &left {
            for r in &right {
                if l.can_relate_to(r) {
                    found.push(vec![l.clone(), r.clone()]);
                }
            }
        }
        // Explicitly declared endpoints win over the implicit juju-info.
        if found.len() > 1 {
            found.retain(|pair| pair.iter().all(|ep| ep.name != JUJU_INFO));
        }
        match found.len() {
            0 => Err(StateError::InvalidArgument(format!(
                "no relations found between {a:?} and {b:?}"
            ))),
            1 => Ok(found.remove(0)),
            _ => {
                let options: Vec<String> = found.iter().map(|pair| relation_key(pair)).collect();
                Err(StateError::InvalidArgument(format!(
                    "ambiguous relation: {a:?} {b:?} could refer to {}",
                    options.iter().map(|k| format!("{k:?}")).collect::<Vec<_>>().join("; ")
                )))
            }
        }
    }

    async fn candidate_endpoints(&self, spec: &str) -> Result<Vec<Endpoint>> {
        let (app_name, wanted) = match spec.split_once(':') {
            Some((app, ep)) => (app, Some(ep)),
            None => (spec, None),
        };
        let app = self.application(app_name).await?;
        let charm = app.charm().await?;
        let meta = charm.meta();
        let mut endpoints = Vec::new();
        let groups = [
            (RelationRole::Provider, meta.all_provides()),
            (RelationRole::Requirer, meta.requires.clone()),
            (RelationRole::Peer, meta.peers.clone()),
        ];
        for (role, specs) in groups {
            for (name, rel) in specs {
                if wanted.is_some_and(|w| w != name) {
                    continue;
                }
                endpoints.push(Endpoint {
                    application_name: app_name.to_string(),
                    name,
                    interface: rel.interface,
                    role,
                    scope: rel.scope,
                });
            }
        }
        Ok(endpoints)
    }

    /// The relation with the given key.
    pub async fn relation(&self, key: &str) -> Result<Relation> {
        let doc = read_relation(self, key)
            .await?
            .ok_or_else(|| relation_not_found(key))?;
        Ok(Relation::from_doc(self, doc))
    }

    pub async fn relation_by_id(&self, id: i64) -> Result<Relation> {
        let mut docs: Vec<RelationDoc> = self.find_entities(RELATIONS, Filter::eq("id", id)).await?;
        match docs.pop() {
            Some(doc) => Ok(Relation::from_doc(self, doc)),
            None => Err(StateError::not_found(format!("relation {id}"))),
        }
    }

    /// The endpoint `endpoint` of application `app`, as `app:endpoint`.
    pub async fn endpoint(&self, app: &str, endpoint: &str) -> Result<Endpoint> {
        self.candidate_endpoints(&format!("{app}:{endpoint}"))
            .await?
            .pop()
            .ok_or_else(|| {
                StateError::not_found(format!("application {app:?} has no {endpoint:?} relation"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(app: &str, name: &str, role: RelationRole) -> Endpoint {
        Endpoint {
            application_name: app.to_string(),
            name: name.to_string(),
            interface: "mysql".to_string(),
            role,
            scope: RelationScope::Global,
        }
    }

    #[test]
    fn test_relation_key_is_sorted() {
        let key = relation_key(&[
            ep("wordpress", "db", RelationRole::Requirer),
            ep("mysql", "server", RelationRole::Provider),
        ]);
        assert_eq!(key, "mysql:server wordpress:db");
    }

    #[test]
    fn test_roles_must_be_counterparts() {
        let provider = ep("mysql", "server", RelationRole::Provider);
        let requirer = ep("wordpress", "db", RelationRole::Requirer);
        assert!(provider.can_relate_to(&requirer));
        assert!(requirer.can_relate_to(&provider));
        assert!(!provider.can_relate_to(&ep("other", "server", RelationRole::Provider)));
        let mut other_iface = requirer.clone();
        other_iface.interface = "http".into();
        assert!(!provider.can_relate_to(&other_iface));
    }

    #[test]
    fn test_scope_key() {
        assert_eq!(scope_key(3, "wordpress/0"), "r#3#wordpress/0");
    }
}
