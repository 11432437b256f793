// ============================================================================
// Units
// ============================================================================
//
// A unit is one instance of an application. Principal units are assigned
// to machines; subordinate units are created by container-scoped
// relations and live on their principal's machine.
//
// Life cycle:
//
// ```text
// Alive ──destroy──> Dying ──ensure_dead──> Dead ──remove──> (gone)
//   │                                                         ^
//   └──────────── destroy, nothing has observed the unit ─────┘
// ```
//
// Removing a unit releases everything that refers to it in the same
// transaction: its status, its host machine's principal entry (advancing
// a now-idle machine to Dying), its opened ports, its settings reference
// and its application's unit count.
//
// ============================================================================

use super::address::Address;
use super::application::{
    Application, ApplicationDoc, application_relations, read_application, unit_removed_ops,
};
use super::charm::{CharmUrl, Settings};
use super::machine::{Machine, MachineDoc, MachineJob, machine_not_found, read_machine};
use super::names::is_valid_unit;
use super::ports::{
    MachinePorts, PortRange, Protocol, check_conflicts, merge_range, read_ports_doc,
    remove_unit_ports_ops, replace_unit_ranges_ops, split_range,
};
use super::relation::{Relation, scope_key, unit_in_scope};
use super::settings::{app_settings_key, dec_ref_ops, inc_ref_ops, read_settings};
use super::status::{
    AgentStatus, StatusInfo, create_status_op, read_status, remove_status_op, set_status_op,
    status_unchanged_op, unit_agent_key,
};
use super::subnet::{subnet_alive_op, validate_subnet_id};
use super::State;
use crate::core::{Life, Result, ResultExt, StateError, to_document};
use crate::doc;
use crate::model_scope::names::{APPLICATIONS, CHARMS, MACHINES, RELATION_SCOPES, UNITS};
use crate::storage::{Filter, Update, UpdateOperator};
use crate::transaction::{Assert, AttemptOutcome, Op};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// How a unit in an error state should proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResolvedMode {
    #[default]
    #[serde(rename = "")]
    None,
    #[serde(rename = "retry-hooks")]
    RetryHooks,
    #[serde(rename = "no-hooks")]
    NoHooks,
}

impl ResolvedMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolvedMode::None => "",
            ResolvedMode::RetryHooks => "retry-hooks",
            ResolvedMode::NoHooks => "no-hooks",
        }
    }
}

impl fmt::Display for ResolvedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ResolvedMode {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "retry-hooks" => Ok(ResolvedMode::RetryHooks),
            "no-hooks" => Ok(ResolvedMode::NoHooks),
            _ => Err(StateError::InvalidArgument(format!(
                "invalid error resolution mode: {s:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct UnitDoc {
    #[serde(rename = "_id", default)]
    pub doc_id: String,
    pub name: String,
    pub application: String,
    #[serde(default)]
    pub series: String,
    #[serde(default)]
    pub principal: String,
    #[serde(default)]
    pub subordinates: Vec<String>,
    #[serde(rename = "machineid", default)]
    pub machine_id: String,
    #[serde(rename = "charmurl", default)]
    pub charm_url: Option<CharmUrl>,
    pub life: Life,
    #[serde(default)]
    pub resolved: ResolvedMode,
    #[serde(rename = "workloadversion", default)]
    pub workload_version: String,
    #[serde(rename = "txn-revno", default)]
    pub txn_revno: i64,
}

pub(crate) async fn read_unit(st: &State, name: &str) -> Result<Option<UnitDoc>> {
    st.get_entity(UNITS, name).await
}

pub(crate) fn unit_not_found(name: &str) -> StateError {
    StateError::not_found(format!("unit {name:?}"))
}

fn alive() -> Filter {
    Filter::eq("life", Life::Alive.as_str())
}

fn not_dead() -> Filter {
    Filter::ne("life", Life::Dead.as_str())
}

/// Ops adding a new unit of `app`, numbered from the application's
/// sequence, with its agent status set to allocating.
pub(crate) async fn add_unit_ops(
    st: &State,
    app: &ApplicationDoc,
    principal: Option<&str>,
) -> Result<(UnitDoc, Vec<Op>)> {
    let n = st.sequence(&format!("application-{}", app.name)).await?;
    let name = format!("{}/{n}", app.name);
    let doc = UnitDoc {
        doc_id: name.clone(),
        name: name.clone(),
        application: app.name.clone(),
        series: app.series.clone(),
        principal: principal.unwrap_or_default().to_string(),
        subordinates: Vec::new(),
        machine_id: String::new(),
        charm_url: None,
        life: Life::Alive,
        resolved: ResolvedMode::None,
        workload_version: String::new(),
        txn_revno: 0,
    };
    let ops = vec![
        Op::insert(UNITS, name.as_str(), to_document(&doc)?),
        create_status_op(&unit_agent_key(&name), AgentStatus::Allocating)?,
        Op::update(APPLICATIONS, app.name.as_str(), Update::inc(doc! { "unitcount": 1 }))
            .matching(alive()),
    ];
    Ok((doc, ops))
}

/// The machine `unit` runs on: its own for a principal, its principal's
/// for a subordinate.
async fn assigned_machine(st: &State, unit: &UnitDoc) -> Result<String> {
    if unit.principal.is_empty() {
        if unit.machine_id.is_empty() {
            return Err(StateError::NotAssigned(format!("unit {:?}", unit.name)));
        }
        return Ok(unit.machine_id.clone());
    }
    let principal = read_unit(st, &unit.principal).await?.ok_or_else(|| {
        StateError::not_found(format!(
            "principal unit {:?} of {:?}",
            unit.principal, unit.name
        ))
    })?;
    if principal.machine_id.is_empty() {
        return Err(StateError::NotAssigned(format!("unit {:?}", principal.name)));
    }
    Ok(principal.machine_id)
}

async fn assigned_machine_opt(st: &State, unit: &UnitDoc) -> Result<Option<String>> {
    match assigned_machine(st, unit).await {
        Ok(id) => Ok(Some(id)),
        Err(err) if err.is_not_assigned() || err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

/// Ops releasing `unit` from whatever hosts it. A principal that is the
/// last thing keeping its machine busy advances the machine to Dying.
async fn destroy_host_ops(st: &State, unit: &UnitDoc) -> Result<Vec<Op>> {
    let name = unit.name.as_str();
    if !unit.principal.is_empty() {
        return Ok(vec![
            Op::update(
                UNITS,
                unit.principal.as_str(),
                Update::pull(doc! { "subordinates": name }),
            )
            .with_assert(Assert::DocExists),
        ]);
    }
    if unit.machine_id.is_empty() {
        return Ok(Vec::new());
    }
    let Some(m) = read_machine(st, &unit.machine_id).await? else {
        return Ok(Vec::new());
    };
    let only_this = m.principals.len() == 1 && m.principals[0] == name;
    let machine_check = only_this && !m.has_job(MachineJob::ManageModel) && !m.hasvote;
    let container_check = only_this && m.containers.is_empty();

    let sole_principal = || Filter::eq("principals", Value::from(vec![name]));
    let manager = || {
        Filter::in_values("jobs", vec![Value::from(MachineJob::ManageModel.as_str())])
    };
    let mut update = Update::pull(doc! { "principals": name });
    let assert = if machine_check && container_check {
        if m.life == Life::Alive {
            update = update.and(UpdateOperator::Set, doc! { "life": Life::Dying.as_str() });
        }
        Filter::and(vec![
            sole_principal(),
            Filter::negate(manager()),
            Filter::ne("hasvote", true),
            Filter::size("containers", 0),
            Filter::eq("life", m.life.as_str()),
        ])
    } else {
        Filter::or(vec![
            Filter::negate(sole_principal()),
            manager(),
            Filter::eq("hasvote", true),
            Filter::negate(Filter::size("containers", 0)),
        ])
    };
    Ok(vec![Op::update(MACHINES, m.machine_id.as_str(), update).matching(assert)])
}

/// Ops deleting `unit` and everything that refers to it. The unit
/// removal asserts `asserts` plus the charm url and machine read. `None`
/// when the application is already gone.
async fn remove_ops(st: &State, unit: &UnitDoc, asserts: Filter) -> Result<Option<Vec<Op>>> {
    let Some(app) = read_application(st, &unit.application).await? else {
        return Ok(None);
    };
    let name = unit.name.as_str();
    let observed = Filter::eq_ser("charmurl", &unit.charm_url)?
        .also(Filter::eq("machineid", unit.machine_id.as_str()));
    let mut ops = vec![
        Op::remove(UNITS, name).matching(asserts.also(observed)),
        remove_status_op(&unit_agent_key(name)),
    ];
    ops.extend(destroy_host_ops(st, unit).await?);
    if let Some(machine_id) = assigned_machine_opt(st, unit).await? {
        ops.extend(remove_unit_ports_ops(st, &machine_id, name).await?);
    }
    if let Some(url) = &unit.charm_url {
        ops.extend(dec_ref_ops(st, &unit.application, url).await?);
    }
    ops.extend(unit_removed_ops(&app));
    Ok(Some(ops))
}

/// What destroying an Alive unit takes: a direct removal when nothing
/// has observed it yet, otherwise the move to Dying. Being in a relation
/// scope counts as observed.
async fn destroy_ops(st: &State, unit: &UnitDoc) -> Result<AttemptOutcome> {
    let name = unit.name.as_str();
    let set_dying = || {
        AttemptOutcome::Ops(vec![
            Op::update(UNITS, name, Update::set(doc! { "life": Life::Dying.as_str() }))
                .matching(alive()),
        ])
    };
    if !unit.principal.is_empty() || !unit.subordinates.is_empty() {
        return Ok(set_dying());
    }
    let key = unit_agent_key(name);
    let Some(status) = read_status(st, &key).await? else {
        return Ok(AttemptOutcome::NoOps);
    };
    let unobserved = match status.status {
        AgentStatus::Allocating => true,
        AgentStatus::Error => unit.machine_id.is_empty(),
        _ => false,
    };
    if !unobserved {
        return Ok(set_dying());
    }
    let Some(app) = read_application(st, &unit.application).await? else {
        return Ok(AttemptOutcome::NoOps);
    };
    let mut guards = vec![
        status_unchanged_op(&key, status.status),
        Op::assert(APPLICATIONS, unit.application.as_str(), Assert::DocExists)
            .matching(Filter::eq("relationcount", app.relation_count)),
    ];
    // A unit in any relation scope is observed by the other side.
    for rel in application_relations(st, &unit.application).await? {
        if unit_in_scope(st, rel.id, name, false).await? {
            return Ok(set_dying());
        }
        guards.push(Op::assert(
            RELATION_SCOPES,
            scope_key(rel.id, name),
            Assert::DocMissing,
        ));
    }
    let mut asserts = alive();
    if unit.machine_id.is_empty() {
        asserts = asserts.also(Filter::eq("machineid", ""));
    }
    match remove_ops(st, unit, asserts).await? {
        Some(ops) => {
            guards.extend(ops);
            Ok(AttemptOutcome::Ops(guards))
        }
        None => Ok(AttemptOutcome::NoOps),
    }
}

#[derive(Debug, Clone)]
pub struct Unit {
    st: State,
    doc: UnitDoc,
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.doc.name)
    }
}

impl Unit {
    pub(crate) fn from_doc(st: &State, doc: UnitDoc) -> Self {
        Self {
            st: st.clone(),
            doc,
        }
    }

    pub fn name(&self) -> &str {
        &self.doc.name
    }

    pub fn application_name(&self) -> &str {
        &self.doc.application
    }

    pub fn series(&self) -> &str {
        &self.doc.series
    }

    pub fn life(&self) -> Life {
        self.doc.life
    }

    pub fn is_principal(&self) -> bool {
        self.doc.principal.is_empty()
    }

    pub fn principal_name(&self) -> Option<&str> {
        (!self.doc.principal.is_empty()).then_some(self.doc.principal.as_str())
    }

    /// Names of the unit's subordinates as last read, sorted.
    pub fn subordinate_names(&self) -> Vec<String> {
        let mut names = self.doc.subordinates.clone();
        names.sort();
        names
    }

    /// The charm url the unit agent reported, as last read.
    pub fn charm_url(&self) -> Option<&CharmUrl> {
        self.doc.charm_url.as_ref()
    }

    /// Resolved mode as last read.
    pub fn resolved(&self) -> ResolvedMode {
        self.doc.resolved
    }

    pub async fn application(&self) -> Result<Application> {
        self.st.application(&self.doc.application).await
    }

    pub async fn refresh(&mut self) -> Result<()> {
        self.doc = read_unit(&self.st, &self.doc.name)
            .await?
            .ok_or_else(|| unit_not_found(&self.doc.name))?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Life cycle
    // ------------------------------------------------------------------

    /// Starts removing the unit. A unit nothing has observed yet is
    /// removed at once; otherwise it becomes Dying.
    pub async fn destroy(&mut self) -> Result<()> {
        let st = &self.st;
        let name = self.doc.name.as_str();
        st.run(move |_attempt| {
            Box::pin(async move {
                match read_unit(st, name).await? {
                    Some(unit) if unit.life == Life::Alive => destroy_ops(st, &unit).await,
                    _ => Ok(AttemptOutcome::NoOps),
                }
            })
        })
        .await?;
        debug!(unit = %self.doc.name, "destroyed unit");
        if self.doc.life == Life::Alive {
            self.doc.life = Life::Dying;
        }
        Ok(())
    }

    /// Advances the unit to Dead. Fails while it still has subordinates.
    pub async fn ensure_dead(&mut self) -> Result<()> {
        if self.doc.life == Life::Dead {
            return Ok(());
        }
        let op = Op::update(
            UNITS,
            self.doc.name.as_str(),
            Update::set(doc! { "life": Life::Dead.as_str() }),
        )
        .matching(not_dead().also(Filter::size("subordinates", 0)));
        match self.st.run_transaction(vec![op]).await {
            Ok(()) => {}
            Err(StateError::TxnAborted) => match read_unit(&self.st, &self.doc.name).await? {
                None => return Err(StateError::Dead),
                Some(unit) if unit.life == Life::Dead => {}
                Some(_) => return Err(StateError::unit_has_subordinates()),
            },
            Err(err) => return Err(err),
        }
        debug!(unit = %self.doc.name, "unit is dead");
        self.doc.life = Life::Dead;
        Ok(())
    }

    /// Deletes a Dead unit, leaving every relation scope it is still in
    /// first.
    pub async fn remove(&mut self) -> Result<()> {
        let st = &self.st;
        let name = self.doc.name.as_str();
        let context = || format!("cannot remove unit {name:?}");
        let Some(unit) = read_unit(st, name).await? else {
            return Ok(());
        };
        if unit.life != Life::Dead {
            return Err(StateError::NotDead("unit".to_string()).annotate(context()));
        }
        for rel in application_relations(st, &unit.application).await? {
            if unit_in_scope(st, rel.id, name, false).await? {
                Relation::from_doc(st, rel).unit(self)?.leave_scope().await?;
            }
        }
        st.run(move |_attempt| {
            Box::pin(async move {
                let Some(unit) = read_unit(st, name).await? else {
                    return Ok(AttemptOutcome::NoOps);
                };
                if unit.life != Life::Dead {
                    return Err(StateError::NotDead("unit".to_string()));
                }
                match remove_ops(st, &unit, Filter::eq("life", Life::Dead.as_str())).await? {
                    Some(ops) => Ok(AttemptOutcome::Ops(ops)),
                    None => Ok(AttemptOutcome::NoOps),
                }
            })
        })
        .await
        .annotate_with(context)?;
        debug!(unit = %self.doc.name, "removed unit");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Machine assignment
    // ------------------------------------------------------------------

    pub async fn assign_to_machine(&mut self, machine: &Machine) -> Result<()> {
        let st = &self.st;
        let name = self.doc.name.as_str();
        let machine_id = machine.id();
        st.run(move |_attempt| {
            Box::pin(async move {
                let unit = check_assignable(st, name).await?;
                if unit.machine_id == machine_id {
                    return Ok(AttemptOutcome::NoOps);
                }
                if !unit.machine_id.is_empty() {
                    return Err(StateError::InvalidArgument(
                        "unit is already assigned to a machine".to_string(),
                    ));
                }
                let m = read_machine(st, machine_id)
                    .await?
                    .ok_or_else(|| machine_not_found(machine_id))?;
                if m.life != Life::Alive {
                    return Err(StateError::NotAlive("machine".to_string()));
                }
                if !m.has_job(MachineJob::HostUnits) {
                    return Err(StateError::InvalidArgument(
                        "machine cannot host units".to_string(),
                    ));
                }
                Ok(AttemptOutcome::Ops(vec![
                    Op::update(UNITS, name, Update::set(doc! { "machineid": machine_id }))
                        .matching(alive().also(Filter::eq("machineid", ""))),
                    Op::update(
                        MACHINES,
                        machine_id,
                        Update::add_to_set(doc! { "principals": name }),
                    )
                    .matching(alive()),
                ]))
            })
        })
        .await
        .annotate_with(|| format!("cannot assign unit {name:?} to machine {machine_id}"))?;
        debug!(unit = %self.doc.name, machine = %machine.id(), "assigned unit");
        self.doc.machine_id = machine.id().to_string();
        Ok(())
    }

    /// Assigns the unit to a machine created for it in the same
    /// transaction. Returns the new machine's id.
    pub async fn assign_to_new_machine(&mut self) -> Result<String> {
        let st = &self.st;
        let name = self.doc.name.as_str();
        let machine_id = st.sequence("machine").await?.to_string();
        let id = machine_id.as_str();
        let series = self.doc.series.as_str();
        st.run(move |_attempt| {
            Box::pin(async move {
                let unit = check_assignable(st, name).await?;
                if !unit.machine_id.is_empty() {
                    return Err(StateError::InvalidArgument(
                        "unit is already assigned to a machine".to_string(),
                    ));
                }
                let mut m = MachineDoc::new(id, series, &[MachineJob::HostUnits]);
                m.principals = vec![name.to_string()];
                Ok(AttemptOutcome::Ops(vec![
                    Op::insert(MACHINES, id, to_document(&m)?),
                    Op::update(UNITS, name, Update::set(doc! { "machineid": id }))
                        .matching(alive().also(Filter::eq("machineid", ""))),
                ]))
            })
        })
        .await
        .annotate_with(|| format!("cannot assign unit {name:?} to new machine"))?;
        debug!(unit = %self.doc.name, machine = %machine_id, "assigned unit to new machine");
        self.doc.machine_id = machine_id.clone();
        Ok(machine_id)
    }

    pub async fn unassign_from_machine(&mut self) -> Result<()> {
        let st = &self.st;
        let name = self.doc.name.as_str();
        st.run(move |_attempt| {
            Box::pin(async move {
                let unit = read_unit(st, name).await?.ok_or_else(|| unit_not_found(name))?;
                if unit.machine_id.is_empty() {
                    return Ok(AttemptOutcome::NoOps);
                }
                Ok(AttemptOutcome::Ops(vec![
                    Op::update(UNITS, name, Update::set(doc! { "machineid": "" }))
                        .matching(Filter::eq("machineid", unit.machine_id.as_str())),
                    Op::update(
                        MACHINES,
                        unit.machine_id.as_str(),
                        Update::pull(doc! { "principals": name }),
                    ),
                ]))
            })
        })
        .await
        .annotate_with(|| format!("cannot unassign unit {name:?} from machine"))?;
        self.doc.machine_id.clear();
        Ok(())
    }

    /// Id of the machine the unit runs on.
    pub async fn assigned_machine_id(&self) -> Result<String> {
        assigned_machine(&self.st, &self.doc).await
    }

    // ------------------------------------------------------------------
    // Agent status and resolution
    // ------------------------------------------------------------------

    pub async fn agent_status(&self) -> Result<StatusInfo> {
        read_status(&self.st, &unit_agent_key(&self.doc.name))
            .await?
            .map(|doc| doc.info())
            .ok_or_else(|| {
                StateError::not_found(format!("agent status of unit {:?}", self.doc.name))
            })
    }

    pub async fn set_agent_status(&self, status: AgentStatus, message: &str) -> Result<()> {
        let op = set_status_op(&unit_agent_key(&self.doc.name), status, message)?;
        self.st
            .run_transaction(vec![op])
            .await
            .map_err(|err| match err {
                StateError::TxnAborted => StateError::not_found("status"),
                other => other,
            })
            .annotate_with(|| format!("cannot set agent status of unit {:?}", self.doc.name))?;
        debug!(unit = %self.doc.name, %status, "set agent status");
        Ok(())
    }

    /// Marks a unit in an error state as resolved, retrying the failed
    /// hook unless `no_hooks`.
    pub async fn resolve(&mut self, no_hooks: bool) -> Result<()> {
        let status = self.agent_status().await?;
        if status.status != AgentStatus::Error {
            return Err(StateError::NotInErrorState(format!("unit {:?}", self.doc.name)));
        }
        let mode = if no_hooks {
            ResolvedMode::NoHooks
        } else {
            ResolvedMode::RetryHooks
        };
        self.set_resolved(mode).await
    }

    pub async fn set_resolved(&mut self, mode: ResolvedMode) -> Result<()> {
        let context = || format!("cannot set resolved mode for unit {:?}", self.doc.name);
        if mode == ResolvedMode::None {
            return Err(StateError::InvalidArgument(format!(
                "invalid error resolution mode: {:?}",
                mode.as_str()
            ))
            .annotate(context()));
        }
        let op = Op::update(
            UNITS,
            self.doc.name.as_str(),
            Update::set(doc! { "resolved": mode.as_str() }),
        )
        .matching(not_dead().also(Filter::eq("resolved", "")));
        match self.st.run_transaction(vec![op]).await {
            Ok(()) => {}
            Err(StateError::TxnAborted) => {
                let err = match read_unit(&self.st, &self.doc.name).await? {
                    Some(unit) if unit.life != Life::Dead => {
                        StateError::InvalidArgument("already resolved".to_string())
                    }
                    _ => StateError::Dead,
                };
                return Err(err.annotate(context()));
            }
            Err(err) => return Err(err.annotate(context())),
        }
        self.doc.resolved = mode;
        Ok(())
    }

    pub async fn clear_resolved(&mut self) -> Result<()> {
        let op = Op::update(
            UNITS,
            self.doc.name.as_str(),
            Update::set(doc! { "resolved": "" }),
        )
        .with_assert(Assert::DocExists);
        self.st
            .run_transaction(vec![op])
            .await
            .map_err(|err| match err {
                StateError::TxnAborted => StateError::not_found("unit"),
                other => other,
            })
            .annotate_with(|| format!("cannot clear resolved mode for unit {:?}", self.doc.name))?;
        self.doc.resolved = ResolvedMode::None;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Charm and settings
    // ------------------------------------------------------------------

    /// Records the charm the unit agent runs, moving the unit's settings
    /// reference over to it.
    pub async fn set_charm_url(&mut self, url: Option<&CharmUrl>) -> Result<()> {
        let Some(url) = url else {
            return Err(StateError::InvalidArgument("cannot set nil charm url".to_string()));
        };
        let st = &self.st;
        let name = self.doc.name.as_str();
        st.run(move |_attempt| {
            Box::pin(async move {
                let unit = match read_unit(st, name).await? {
                    Some(unit) if unit.life != Life::Dead => unit,
                    _ => return Err(StateError::Dead),
                };
                if unit.charm_url.as_ref() == Some(url) {
                    return Ok(AttemptOutcome::NoOps);
                }
                let key = url.to_string();
                if st.charm(url).await.is_err() {
                    return Err(StateError::NotFound(format!("unknown charm url {key:?}")));
                }
                let mut ops = vec![
                    Op::assert(CHARMS, key.as_str(), Assert::DocExists),
                    Op::update(UNITS, name, Update::set(doc! { "charmurl": key.as_str() }))
                        .matching(not_dead().also(Filter::eq_ser("charmurl", &unit.charm_url)?)),
                ];
                ops.extend(inc_ref_ops(st, &unit.application, url, Settings::new).await?);
                if let Some(old) = &unit.charm_url {
                    ops.extend(dec_ref_ops(st, &unit.application, old).await?);
                }
                Ok(AttemptOutcome::Ops(ops))
            })
        })
        .await?;
        self.doc.charm_url = Some(url.clone());
        Ok(())
    }

    /// Settings for the unit's charm: the charm defaults overlaid with
    /// the application's settings for that charm.
    pub async fn config_settings(&self) -> Result<Settings> {
        let unit = read_unit(&self.st, &self.doc.name)
            .await?
            .ok_or_else(|| unit_not_found(&self.doc.name))?;
        let url = unit.charm_url.ok_or(StateError::CharmNotSet)?;
        let charm = self.st.charm(&url).await?;
        let mut settings = charm.config().default_settings();
        let key = app_settings_key(&unit.application, &url);
        if let Some(doc) = read_settings(&self.st, &key).await? {
            settings.extend(doc.settings);
        }
        Ok(settings)
    }

    /// The workload version, read fresh.
    pub async fn workload_version(&self) -> Result<String> {
        Ok(read_unit(&self.st, &self.doc.name)
            .await?
            .ok_or_else(|| unit_not_found(&self.doc.name))?
            .workload_version)
    }

    pub async fn set_workload_version(&mut self, version: &str) -> Result<()> {
        let op = Op::update(
            UNITS,
            self.doc.name.as_str(),
            Update::set(doc! { "workloadversion": version }),
        )
        .with_assert(Assert::DocExists);
        self.st
            .run_transaction(vec![op])
            .await
            .map_err(|err| match err {
                StateError::TxnAborted => unit_not_found(&self.doc.name),
                other => other,
            })
            .annotate_with(|| format!("cannot set workload version of unit {:?}", self.doc.name))?;
        self.doc.workload_version = version.to_string();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Ports
    // ------------------------------------------------------------------

    pub async fn open_port(&self, protocol: &str, port: u16) -> Result<()> {
        self.open_ports(protocol, port, port).await
    }

    pub async fn open_ports(&self, protocol: &str, from_port: u16, to_port: u16) -> Result<()> {
        self.open_ports_on_subnet("", protocol, from_port, to_port).await
    }

    pub async fn open_ports_on_subnet(
        &self,
        subnet_id: &str,
        protocol: &str,
        from_port: u16,
        to_port: u16,
    ) -> Result<()> {
        self.change_ports(subnet_id, protocol, from_port, to_port, true)
            .await
    }

    pub async fn close_port(&self, protocol: &str, port: u16) -> Result<()> {
        self.close_ports(protocol, port, port).await
    }

    pub async fn close_ports(&self, protocol: &str, from_port: u16, to_port: u16) -> Result<()> {
        self.close_ports_on_subnet("", protocol, from_port, to_port).await
    }

    pub async fn close_ports_on_subnet(
        &self,
        subnet_id: &str,
        protocol: &str,
        from_port: u16,
        to_port: u16,
    ) -> Result<()> {
        self.change_ports(subnet_id, protocol, from_port, to_port, false)
            .await
    }

    async fn change_ports(
        &self,
        subnet_id: &str,
        protocol: &str,
        from_port: u16,
        to_port: u16,
        open: bool,
    ) -> Result<()> {
        let st = &self.st;
        let name = self.doc.name.as_str();
        let context = || {
            let verb = if open { "open" } else { "close" };
            let on_subnet = if subnet_id.is_empty() {
                String::new()
            } else {
                format!(" on subnet {subnet_id:?}")
            };
            format!("cannot {verb} ports {from_port}-{to_port}/{protocol}{on_subnet} for unit {name:?}")
        };
        let range = Protocol::from_str(protocol)
            .and_then(|proto| PortRange::new(from_port, to_port, proto))
            .and_then(|range| validate_subnet_id(subnet_id).map(|()| range))
            .annotate_with(context)?;
        st.run(move |_attempt| {
            Box::pin(async move {
                let unit = match read_unit(st, name).await? {
                    Some(unit) if unit.life != Life::Dead => unit,
                    _ => return Err(StateError::Dead),
                };
                let machine_id = assigned_machine(st, &unit).await?;
                let subnet_op = subnet_alive_op(st, subnet_id).await?;
                let existing = read_ports_doc(st, &machine_id, subnet_id).await?;
                let current = existing
                    .as_ref()
                    .map(|doc| doc.unit_ranges(name))
                    .unwrap_or_default();
                let updated = if open {
                    check_conflicts(existing.as_ref(), name, &range)?;
                    merge_range(&current, range)
                } else {
                    split_range(&current, range)
                };
                if updated == current {
                    return Ok(AttemptOutcome::NoOps);
                }
                let mut ops = vec![
                    Op::assert(UNITS, name, Assert::DocExists).matching(
                        not_dead().also(Filter::eq("machineid", unit.machine_id.as_str())),
                    ),
                    Op::assert(MACHINES, machine_id.as_str(), Assert::DocExists),
                ];
                ops.extend(subnet_op);
                ops.extend(replace_unit_ranges_ops(
                    existing.as_ref(),
                    &machine_id,
                    subnet_id,
                    name,
                    &updated,
                )?);
                Ok(AttemptOutcome::Ops(ops))
            })
        })
        .await
        .annotate_with(context)?;
        debug!(unit = %self.doc.name, %range, open, "changed unit ports");
        Ok(())
    }

    /// Ranges the unit has opened on the default subnet, sorted.
    pub async fn opened_ports(&self) -> Result<Vec<PortRange>> {
        self.opened_ports_on_subnet("").await
    }

    pub async fn opened_ports_on_subnet(&self, subnet_id: &str) -> Result<Vec<PortRange>> {
        validate_subnet_id(subnet_id)?;
        let machine_id = self.assigned_machine_id().await?;
        Ok(read_ports_doc(&self.st, &machine_id, subnet_id)
            .await?
            .map(|doc| MachinePorts::from_doc(doc).ports_for_unit(&self.doc.name))
            .unwrap_or_default())
    }

    // ------------------------------------------------------------------
    // Addresses and relations
    // ------------------------------------------------------------------

    /// The preferred public address of the unit's machine.
    pub async fn public_address(&self) -> Result<Address> {
        let id = self.assigned_machine_id().await?;
        self.st.machine(&id).await?.public_address()
    }

    /// The preferred private address of the unit's machine.
    pub async fn private_address(&self) -> Result<Address> {
        let id = self.assigned_machine_id().await?;
        self.st.machine(&id).await?.private_address()
    }

    /// Relations the unit has joined and is not preparing to leave,
    /// ordered by id.
    pub async fn relations_joined(&self) -> Result<Vec<Relation>> {
        self.relations(true).await
    }

    /// Relations whose scope the unit is in, ordered by id.
    pub async fn relations_in_scope(&self) -> Result<Vec<Relation>> {
        self.relations(false).await
    }

    async fn relations(&self, joined_only: bool) -> Result<Vec<Relation>> {
        let mut found = Vec::new();
        for rel in application_relations(&self.st, &self.doc.application).await? {
            if unit_in_scope(&self.st, rel.id, &self.doc.name, joined_only).await? {
                found.push(rel);
            }
        }
        found.sort_by_key(|rel| rel.id);
        Ok(found
            .into_iter()
            .map(|rel| Relation::from_doc(&self.st, rel))
            .collect())
    }
}

/// Reads a unit that may be assigned to a machine: Alive and principal.
async fn check_assignable(st: &State, name: &str) -> Result<UnitDoc> {
    let unit = read_unit(st, name).await?.ok_or_else(|| unit_not_found(name))?;
    if unit.life != Life::Alive {
        return Err(StateError::NotAlive("unit".to_string()));
    }
    if !unit.principal.is_empty() {
        return Err(StateError::InvalidArgument("unit is a subordinate".to_string()));
    }
    Ok(unit)
}

impl State {
    pub async fn unit(&self, name: &str) -> Result<Unit> {
        if !is_valid_unit(name) {
            return Err(StateError::InvalidArgument(format!("invalid unit name {name:?}")));
        }
        let doc = read_unit(self, name)
            .await?
            .ok_or_else(|| unit_not_found(name))?;
        Ok(Unit::from_doc(self, doc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolved_mode_parse() {
        assert_eq!(
            "retry-hooks".parse::<ResolvedMode>().unwrap(),
            ResolvedMode::RetryHooks
        );
        assert_eq!("no-hooks".parse::<ResolvedMode>().unwrap(), ResolvedMode::NoHooks);
        let err = "foo".parse::<ResolvedMode>().unwrap_err();
        assert_eq!(err.to_string(), "invalid error resolution mode: \"foo\"");
    }

    #[test]
    fn test_resolved_mode_serializes_as_string() {
        assert_eq!(serde_json::to_value(ResolvedMode::None).unwrap(), Value::from(""));
        assert_eq!(
            serde_json::to_value(ResolvedMode::NoHooks).unwrap(),
            Value::from("no-hooks")
        );
    }
}
