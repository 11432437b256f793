use super::address::{Address, AddressOrigin, PreferredAddress, Preference};
use super::names::parent_machine;
use super::ports::{MachinePorts, PortsDoc, remove_machine_ports_ops};
use super::State;
use crate::core::{Document, Life, Result, ResultExt, StateError, TXN_REVNO_FIELD, to_document, to_value};
use crate::doc;
use crate::model_scope::names::{MACHINES, OPENED_PORTS};
use crate::storage::{Filter, Update};
use crate::transaction::{AttemptOutcome, Op};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MachineJob {
    HostUnits,
    ManageModel,
}

impl MachineJob {
    pub fn as_str(&self) -> &'static str {
        match self {
            MachineJob::HostUnits => "host-units",
            MachineJob::ManageModel => "manage-model",
        }
    }
}

impl fmt::Display for MachineJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct MachineDoc {
    #[serde(rename = "_id", default)]
    pub doc_id: String,
    #[serde(rename = "machineid")]
    pub machine_id: String,
    #[serde(default)]
    pub series: String,
    pub life: Life,
    #[serde(default)]
    pub jobs: Vec<MachineJob>,
    #[serde(default)]
    pub principals: Vec<String>,
    #[serde(default)]
    pub containers: Vec<String>,
    #[serde(default)]
    pub hasvote: bool,
    #[serde(default)]
    pub instanceid: String,
    #[serde(default)]
    pub nonce: String,
    #[serde(default)]
    pub provideraddresses: Vec<Address>,
    #[serde(default)]
    pub machineaddresses: Vec<Address>,
    #[serde(default)]
    pub preferredpublicaddress: Option<PreferredAddress>,
    #[serde(default)]
    pub preferredprivateaddress: Option<PreferredAddress>,
    #[serde(rename = "txn-revno", default)]
    pub txn_revno: i64,
}

impl MachineDoc {
    pub(crate) fn new(id: &str, series: &str, jobs: &[MachineJob]) -> Self {
        Self {
            doc_id: id.to_string(),
            machine_id: id.to_string(),
            series: series.to_string(),
            life: Life::Alive,
            jobs: jobs.to_vec(),
            principals: Vec::new(),
            containers: Vec::new(),
            hasvote: false,
            instanceid: String::new(),
            nonce: String::new(),
            provideraddresses: Vec::new(),
            machineaddresses: Vec::new(),
            preferredpublicaddress: None,
            preferredprivateaddress: None,
            txn_revno: 0,
        }
    }

    pub fn has_job(&self, job: MachineJob) -> bool {
        self.jobs.contains(&job)
    }

    /// Why the machine cannot leave Alive, if anything stops it.
    fn blocker(&self) -> Option<String> {
        let id = &self.machine_id;
        if self.has_job(MachineJob::ManageModel) {
            return Some(format!("machine {id} is required by the model"));
        }
        if self.hasvote {
            return Some(format!("machine {id} is a voting replica set member"));
        }
        if !self.containers.is_empty() {
            let list: Vec<String> = self.containers.iter().map(|c| format!("{c:?}")).collect();
            return Some(format!("machine {id} is hosting containers {}", list.join(", ")));
        }
        if let Some(unit) = self.principals.first() {
            return Some(format!("machine {id} has unit {unit:?} assigned"));
        }
        None
    }
}

/// Jobs nin manage-model, no vote, no principals and no containers.
pub(crate) fn machine_unburdened() -> Filter {
    Filter::and(vec![
        Filter::nin_values("jobs", vec![Value::from(MachineJob::ManageModel.as_str())]),
        Filter::ne("hasvote", true),
        Filter::size("principals", 0),
        Filter::size("containers", 0),
    ])
}

pub(crate) async fn read_machine(st: &State, id: &str) -> Result<Option<MachineDoc>> {
    st.get_entity(MACHINES, id).await
}

pub(crate) fn machine_not_found(id: &str) -> StateError {
    StateError::not_found(format!("machine {id}"))
}

#[derive(Debug, Clone)]
pub struct Machine {
    st: State,
    doc: MachineDoc,
}

impl fmt::Display for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.doc.machine_id)
    }
}

impl Machine {
    pub(crate) fn from_doc(st: &State, doc: MachineDoc) -> Self {
        Self {
            st: st.clone(),
            doc,
        }
    }

    pub fn id(&self) -> &str {
        &self.doc.machine_id
    }

    pub fn life(&self) -> Life {
        self.doc.life
    }

    pub fn series(&self) -> &str {
        &self.doc.series
    }

    pub fn jobs(&self) -> &[MachineJob] {
        &self.doc.jobs
    }

    /// Principal units assigned here, as last read.
    pub fn principals(&self) -> &[String] {
        &self.doc.principals
    }

    pub fn has_vote(&self) -> bool {
        self.doc.hasvote
    }

    pub fn instance_id(&self) -> Option<&str> {
        (!self.doc.instanceid.is_empty()).then_some(self.doc.instanceid.as_str())
    }

    pub fn parent_id(&self) -> Option<&str> {
        parent_machine(&self.doc.machine_id)
    }

    pub async fn refresh(&mut self) -> Result<()> {
        self.doc = read_machine(&self.st, &self.doc.machine_id)
            .await?
            .ok_or_else(|| machine_not_found(&self.doc.machine_id))?;
        Ok(())
    }

    /// Ids of the containers hosted here, read fresh.
    pub async fn containers(&self) -> Result<Vec<String>> {
        Ok(read_machine(&self.st, &self.doc.machine_id)
            .await?
            .ok_or_else(|| machine_not_found(&self.doc.machine_id))?
            .containers)
    }

    /// Advances to Dying. Fails while the machine hosts units or
    /// containers, holds a vote or manages the model.
    pub async fn destroy(&mut self) -> Result<()> {
        self.advance_lifecycle(Life::Dying).await
    }

    /// Advances to Dead under the same conditions as [`Machine::destroy`].
    pub async fn ensure_dead(&mut self) -> Result<()> {
        self.advance_lifecycle(Life::Dead).await
    }

    async fn advance_lifecycle(&mut self, life: Life) -> Result<()> {
        let st = &self.st;
        let id = self.doc.machine_id.as_str();
        st.run(move |_attempt| {
            Box::pin(async move {
                let Some(m) = read_machine(st, id).await? else {
                    return match life {
                        Life::Dead => Err(StateError::Dead),
                        _ => Ok(AttemptOutcome::NoOps),
                    };
                };
                let life_assert = match life {
                    Life::Dying if m.life != Life::Alive => return Ok(AttemptOutcome::NoOps),
                    Life::Dying => Filter::eq("life", Life::Alive.as_str()),
                    _ if m.life == Life::Dead => return Ok(AttemptOutcome::NoOps),
                    _ => Filter::ne("life", Life::Dead.as_str()),
                };
                if let Some(reason) = m.blocker() {
                    return Err(StateError::HasDependents(reason));
                }
                let op = Op::update(MACHINES, id, Update::set(doc! { "life": life.as_str() }))
                    .matching(life_assert.also(machine_unburdened()));
                Ok(AttemptOutcome::Ops(vec![op]))
            })
        })
        .await
        .map_err(|err| {
            if err.is_contention() {
                err.annotate(format!("machine {id} cannot advance lifecycle"))
            } else {
                err
            }
        })?;
        debug!(machine = %self.doc.machine_id, %life, "machine advanced lifecycle");
        if self.doc.life < life {
            self.doc.life = life;
        }
        Ok(())
    }

    /// Deletes a Dead machine along with its ports documents and its
    /// entry in the parent's container list.
    pub async fn remove(&mut self) -> Result<()> {
        let st = &self.st;
        let id = self.doc.machine_id.as_str();
        st.run(move |_attempt| {
            Box::pin(async move {
                let Some(m) = read_machine(st, id).await? else {
                    return Ok(AttemptOutcome::NoOps);
                };
                if m.life != Life::Dead {
                    return Err(StateError::NotDead("machine".to_string()));
                }
                let mut ops = vec![
                    Op::remove(MACHINES, id).matching(Filter::eq("life", Life::Dead.as_str())),
                ];
                if let Some(parent) = parent_machine(id) {
                    ops.push(Op::update(MACHINES, parent, Update::pull(doc! { "containers": id })));
                }
                ops.extend(remove_machine_ports_ops(st, id).await?);
                Ok(AttemptOutcome::Ops(ops))
            })
        })
        .await
        .annotate_with(|| format!("cannot remove machine {id}"))?;
        debug!(machine = %self.doc.machine_id, "removed machine");
        Ok(())
    }

    pub async fn set_has_vote(&mut self, has_vote: bool) -> Result<()> {
        let op = Op::update(
            MACHINES,
            self.doc.machine_id.as_str(),
            Update::set(doc! { "hasvote": has_vote }),
        )
        .matching(Filter::ne("life", Life::Dead.as_str()));
        self.st
            .run_transaction(vec![op])
            .await
            .map_err(|err| match err {
                StateError::TxnAborted => StateError::Dead,
                other => other,
            })
            .annotate_with(|| format!("cannot set HasVote of machine {}", self.doc.machine_id))?;
        self.doc.hasvote = has_vote;
        Ok(())
    }

    /// Records the provider instance backing this machine. Can only be
    /// done once.
    pub async fn set_provisioned(&mut self, instance_id: &str, nonce: &str) -> Result<()> {
        let context = || format!("cannot set instance data for machine {:?}", self.doc.machine_id);
        if instance_id.is_empty() || nonce.is_empty() {
            return Err(StateError::InvalidArgument(
                "instance id and nonce cannot be empty".to_string(),
            )
            .annotate(context()));
        }
        let op = Op::update(
            MACHINES,
            self.doc.machine_id.as_str(),
            Update::set(doc! { "instanceid": instance_id, "nonce": nonce }),
        )
        .matching(Filter::and(vec![
            Filter::ne("life", Life::Dead.as_str()),
            Filter::eq("instanceid", ""),
        ]));
        match self.st.run_transaction(vec![op]).await {
            Ok(()) => {}
            Err(StateError::TxnAborted) => {
                let err = match read_machine(&self.st, &self.doc.machine_id).await? {
                    Some(m) if m.life != Life::Dead => {
                        StateError::InvalidArgument("already set".to_string())
                    }
                    _ => StateError::Dead,
                };
                return Err(err.annotate(context()));
            }
            Err(err) => return Err(err.annotate(context())),
        }
        self.doc.instanceid = instance_id.to_string();
        self.doc.nonce = nonce.to_string();
        Ok(())
    }

    pub fn provider_addresses(&self) -> &[Address] {
        &self.doc.provideraddresses
    }

    pub fn machine_addresses(&self) -> &[Address] {
        &self.doc.machineaddresses
    }

    /// Provider addresses followed by machine addresses not already listed.
    pub fn addresses(&self) -> Vec<Address> {
        let mut merged = self.doc.provideraddresses.clone();
        for addr in &self.doc.machineaddresses {
            if !merged.contains(addr) {
                merged.push(addr.clone());
            }
        }
        merged
    }

    pub async fn set_provider_addresses(&mut self, addresses: Vec<Address>) -> Result<()> {
        self.set_addresses(AddressOrigin::Provider, addresses).await
    }

    pub async fn set_machine_addresses(&mut self, addresses: Vec<Address>) -> Result<()> {
        self.set_addresses(AddressOrigin::Machine, addresses).await
    }

    async fn set_addresses(&mut self, origin: AddressOrigin, addresses: Vec<Address>) -> Result<()> {
        let st = &self.st;
        let id = self.doc.machine_id.as_str();
        let addresses = &addresses;
        st.run(move |_attempt| {
            Box::pin(async move {
                let m = match read_machine(st, id).await? {
                    Some(m) if m.life != Life::Dead => m,
                    _ => return Err(StateError::Dead),
                };
                let (field, provider, machine) = match origin {
                    AddressOrigin::Machine => {
                        ("machineaddresses", m.provideraddresses.clone(), addresses.clone())
                    }
                    _ => ("provideraddresses", addresses.clone(), m.machineaddresses.clone()),
                };
                let mut fields = Document::new();
                fields.insert(field.to_string(), to_value(addresses)?);
                if let Some(public) = Preference::Public.reconsider(
                    m.preferredpublicaddress.as_ref(),
                    &provider,
                    &machine,
                ) {
                    fields.insert("preferredpublicaddress".to_string(), to_value(&public)?);
                }
                if let Some(private) = Preference::Private.reconsider(
                    m.preferredprivateaddress.as_ref(),
                    &provider,
                    &machine,
                ) {
                    fields.insert("preferredprivateaddress".to_string(), to_value(&private)?);
                }
                let op = Op::update(MACHINES, id, Update::set(fields)).matching(Filter::and(vec![
                    Filter::ne("life", Life::Dead.as_str()),
                    Filter::eq(TXN_REVNO_FIELD, m.txn_revno),
                ]));
                Ok(AttemptOutcome::Ops(vec![op]))
            })
        })
        .await
        .annotate_with(|| format!("cannot set addresses of machine {id}"))?;
        self.refresh().await
    }

    /// The preferred public address, as last read.
    pub fn public_address(&self) -> Result<Address> {
        self.doc
            .preferredpublicaddress
            .as_ref()
            .map(|p| p.address.clone())
            .ok_or_else(|| StateError::NoAddress("public".to_string()))
    }

    /// The preferred private address, as last read.
    pub fn private_address(&self) -> Result<Address> {
        self.doc
            .preferredprivateaddress
            .as_ref()
            .map(|p| p.address.clone())
            .ok_or_else(|| StateError::NoAddress("private".to_string()))
    }

    /// Opened ports on this machine, one entry per subnet.
    pub async fn all_ports(&self) -> Result<Vec<MachinePorts>> {
        let docs: Vec<PortsDoc> = self
            .st
            .find_entities(OPENED_PORTS, Filter::eq("machineid", self.doc.machine_id.as_str()))
            .await?;
        Ok(docs.into_iter().map(MachinePorts::from_doc).collect())
    }
}

impl State {
    pub async fn add_machine(&self, series: &str, jobs: &[MachineJob]) -> Result<Machine> {
        if jobs.is_empty() {
            return Err(StateError::InvalidArgument("no jobs specified".to_string())
                .annotate("cannot add a new machine"));
        }
        let id = self.sequence("machine").await?.to_string();
        let doc = MachineDoc::new(&id, series, jobs);
        self.run_transaction(vec![Op::insert(MACHINES, id.as_str(), to_document(&doc)?)])
            .await
            .annotate("cannot add a new machine")?;
        debug!(model = %self.model_uuid(), machine = %id, "added machine");
        Ok(Machine::from_doc(self, doc))
    }

    /// Adds a container of `container_type` inside `parent_id`, with an id
    /// such as `0/lxd/1`.
    pub async fn add_container(
        &self,
        parent_id: &str,
        container_type: &str,
        jobs: &[MachineJob],
    ) -> Result<Machine> {
        let context = || format!("cannot add a new container to machine {parent_id}");
        if jobs.is_empty() {
            return Err(StateError::InvalidArgument("no jobs specified".to_string())
                .annotate(context()));
        }
        let seq = format!("machine{parent_id}{container_type}Container");
        let id = format!("{parent_id}/{container_type}/{}", self.sequence(&seq).await?);
        let parent = read_machine(self, parent_id)
            .await?
            .ok_or_else(|| machine_not_found(parent_id))
            .annotate_with(context)?;
        if parent.life != Life::Alive {
            return Err(StateError::NotAlive(format!("machine {parent_id}")).annotate(context()));
        }
        let doc = MachineDoc::new(&id, &parent.series, jobs);
        let ops = vec![
            Op::insert(MACHINES, id.as_str(), to_document(&doc)?),
            Op::update(MACHINES, parent_id, Update::add_to_set(doc! { "containers": id.as_str() }))
                .matching(Filter::eq("life", Life::Alive.as_str())),
        ];
        self.run_transaction(ops)
            .await
            .map_err(|err| match err {
                StateError::TxnAborted => StateError::NotAlive(format!("machine {parent_id}")),
                other => other,
            })
            .annotate_with(context)?;
        debug!(model = %self.model_uuid(), machine = %id, "added container");
        Ok(Machine::from_doc(self, doc))
    }

    pub async fn machine(&self, id: &str) -> Result<Machine> {
        let doc = read_machine(self, id)
            .await?
            .ok_or_else(|| machine_not_found(id))?;
        Ok(Machine::from_doc(self, doc))
    }

    pub async fn all_machines(&self) -> Result<Vec<Machine>> {
        let docs: Vec<MachineDoc> = self.find_entities(MACHINES, Filter::exists("machineid", true)).await?;
        Ok(docs.into_iter().map(|doc| Machine::from_doc(self, doc)).collect())
    }
}
