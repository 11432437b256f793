//! Application config settings, one document per (application, charm url).
//!
//! Each settings document is shared by the application (for its current
//! charm) and by every unit running that charm url; a refcount document
//! in `settingsrefs` tracks the holders and both are deleted together
//! when the last reference goes.

use super::State;
use super::charm::{CharmUrl, Settings};
use crate::core::{Result, StateError, TXN_REVNO_FIELD, from_document, to_value};
use crate::doc;
use crate::model_scope::names::{SETTINGS, SETTINGS_REFS};
use crate::storage::{Filter, Update};
use crate::transaction::{Assert, Op};
use serde::Deserialize;

pub(crate) fn app_settings_key(app: &str, url: &CharmUrl) -> String {
    format!("a#{app}#{url}")
}

#[derive(Debug, Deserialize)]
pub(crate) struct SettingsDoc {
    #[serde(default)]
    pub settings: Settings,
    #[serde(rename = "txn-revno", default)]
    pub txn_revno: i64,
}

#[derive(Debug, Deserialize)]
struct RefcountDoc {
    refcount: i64,
}

async fn read_refcount(st: &State, key: &str) -> Result<Option<i64>> {
    match st.get_doc(SETTINGS_REFS, key).await {
        Some(doc) => Ok(Some(from_document::<RefcountDoc>(doc)?.refcount)),
        None => Ok(None),
    }
}

pub(crate) async fn read_settings(st: &State, key: &str) -> Result<Option<SettingsDoc>> {
    match st.get_doc(SETTINGS, key).await {
        Some(doc) => Ok(Some(from_document(doc)?)),
        None => Ok(None),
    }
}

/// Ops taking one more reference on the settings for `(app, url)`. When
/// no document exists yet it is created holding `initial`.
pub(crate) async fn inc_ref_ops(
    st: &State,
    app: &str,
    url: &CharmUrl,
    initial: impl FnOnce() -> Settings,
) -> Result<Vec<Op>> {
    let key = app_settings_key(app, url);
    if read_refcount(st, &key).await?.is_some() {
        return Ok(vec![
            Op::update(SETTINGS_REFS, key.as_str(), Update::inc(doc! { "refcount": 1 }))
                .with_assert(Assert::DocExists),
        ]);
    }
    let settings = to_value(&initial())?;
    Ok(vec![
        Op::insert(SETTINGS_REFS, key.as_str(), doc! { "refcount": 1 }),
        Op::insert(SETTINGS, key.as_str(), doc! { "settings": settings }),
    ])
}

/// Ops dropping one reference on the settings for `(app, url)`, deleting
/// the documents with the last one.
pub(crate) async fn dec_ref_ops(st: &State, app: &str, url: &CharmUrl) -> Result<Vec<Op>> {
    let key = app_settings_key(app, url);
    let refcount = read_refcount(st, &key)
        .await?
        .ok_or_else(|| StateError::not_found(format!("settings reference {key:?}")))?;
    if refcount > 1 {
        return Ok(vec![
            Op::update(SETTINGS_REFS, key.as_str(), Update::inc(doc! { "refcount": -1 }))
                .matching(Filter::gt("refcount", 1)),
        ]);
    }
    Ok(vec![
        Op::remove(SETTINGS_REFS, key.as_str()).matching(Filter::eq("refcount", 1)),
        Op::remove(SETTINGS, key.as_str()),
    ])
}

/// Ops deleting the settings for `(app, url)` whatever their refcount.
/// Used when the application itself goes.
pub(crate) fn final_remove_ops(app: &str, url: &CharmUrl) -> Vec<Op> {
    let key = app_settings_key(app, url);
    vec![
        Op::remove(SETTINGS_REFS, key.as_str()),
        Op::remove(SETTINGS, key.as_str()),
    ]
}

/// Replaces the stored settings, asserting they are still at `revno`.
pub(crate) fn replace_settings_op(key: &str, settings: &Settings, revno: i64) -> Result<Op> {
    let update = Update::set(doc! { "settings": to_value(settings)? });
    Ok(Op::update(SETTINGS, key, update).matching(Filter::eq(TXN_REVNO_FIELD, revno)))
}
