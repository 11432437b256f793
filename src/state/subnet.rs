use super::State;
use crate::core::{Life, Result, ResultExt, StateError, from_document, to_document};
use crate::doc;
use crate::model_scope::names::SUBNETS;
use crate::storage::{Filter, Update};
use crate::transaction::{Assert, Op};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use tracing::debug;

/// Parses `a.b.c.d/n` or `x::y/n`.
pub fn parse_cidr(cidr: &str) -> Option<(IpAddr, u8)> {
    let (addr, prefix) = cidr.split_once('/')?;
    let addr: IpAddr = addr.parse().ok()?;
    let prefix: u8 = prefix.parse().ok()?;
    let max = if addr.is_ipv4() { 32 } else { 128 };
    (prefix <= max).then_some((addr, prefix))
}

pub(crate) fn validate_subnet_id(subnet_id: &str) -> Result<()> {
    if subnet_id.is_empty() || parse_cidr(subnet_id).is_some() {
        Ok(())
    } else {
        Err(StateError::InvalidArgument(format!(
            "invalid subnet ID {subnet_id:?}"
        )))
    }
}

/// Checks that a non-empty subnet id names an alive subnet of the model
/// and returns the op asserting that it still does.
pub(crate) async fn subnet_alive_op(st: &State, subnet_id: &str) -> Result<Option<Op>> {
    if subnet_id.is_empty() {
        return Ok(None);
    }
    validate_subnet_id(subnet_id)?;
    let alive = match st.get_doc(SUBNETS, subnet_id).await {
        Some(doc) => from_document::<SubnetDoc>(doc)?.life == Life::Alive,
        None => false,
    };
    if !alive {
        return Err(StateError::NotFound(format!(
            "subnet {subnet_id:?} not found or not alive"
        )));
    }
    Ok(Some(
        Op::assert(SUBNETS, subnet_id, Assert::DocExists)
            .matching(Filter::eq("life", Life::Alive.as_str())),
    ))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SubnetDoc {
    #[serde(rename = "_id", default)]
    pub doc_id: String,
    pub cidr: String,
    pub life: Life,
}

#[derive(Debug, Clone)]
pub struct Subnet {
    st: State,
    doc: SubnetDoc,
}

impl Subnet {
    pub fn cidr(&self) -> &str {
        &self.doc.cidr
    }

    pub fn life(&self) -> Life {
        self.doc.life
    }

    pub async fn refresh(&mut self) -> Result<()> {
        let fresh = self.st.subnet(&self.doc.cidr).await?;
        self.doc = fresh.doc;
        Ok(())
    }

    pub async fn ensure_dead(&mut self) -> Result<()> {
        if self.doc.life == Life::Dead {
            return Ok(());
        }
        let op = Op::update(
            SUBNETS,
            self.doc.cidr.as_str(),
            Update::set(doc! { "life": Life::Dead.as_str() }),
        )
        .with_assert(Assert::DocExists);
        self.st
            .run_transaction(vec![op])
            .await
            .map_err(|err| match err {
                StateError::TxnAborted => StateError::Dead,
                other => other,
            })
            .annotate_with(|| format!("cannot set subnet {:?} to dead", self.doc.cidr))?;
        self.doc.life = Life::Dead;
        Ok(())
    }
}

impl State {
    pub async fn add_subnet(&self, cidr: &str) -> Result<Subnet> {
        if parse_cidr(cidr).is_none() {
            return Err(
                StateError::InvalidArgument(format!("invalid CIDR address: {cidr}"))
                    .annotate(format!("cannot add subnet {cidr:?}")),
            );
        }
        let doc = SubnetDoc {
            doc_id: cidr.to_string(),
            cidr: cidr.to_string(),
            life: Life::Alive,
        };
        self.run_transaction(vec![Op::insert(SUBNETS, cidr, to_document(&doc)?)])
            .await
            .map_err(|err| match err {
                StateError::TxnAborted => {
                    StateError::InvalidArgument("subnet already exists".to_string())
                }
                other => other,
            })
            .annotate_with(|| format!("cannot add subnet {cidr:?}"))?;
        debug!(model = %self.model_uuid(), cidr, "added subnet");
        Ok(Subnet {
            st: self.clone(),
            doc,
        })
    }

    pub async fn subnet(&self, cidr: &str) -> Result<Subnet> {
        match self.get_doc(SUBNETS, cidr).await {
            Some(doc) => Ok(Subnet {
                st: self.clone(),
                doc: from_document(doc)?,
            }),
            None => Err(StateError::not_found(format!("subnet {cidr:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cidr() {
        assert!(parse_cidr("10.0.0.0/24").is_some());
        assert!(parse_cidr("2001:db8::/32").is_some());
        assert!(parse_cidr("10.0.0.0/33").is_none());
        assert!(parse_cidr("bad CIDR").is_none());
        assert!(parse_cidr("10.0.0.0").is_none());
    }

    #[test]
    fn test_validate_subnet_id() {
        assert!(validate_subnet_id("").is_ok());
        let err = validate_subnet_id("bad CIDR").unwrap_err();
        assert_eq!(err.to_string(), "invalid subnet ID \"bad CIDR\"");
    }
}
