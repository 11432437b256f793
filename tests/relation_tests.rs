mod common;

use common::{
    add_charm, add_logging, add_mysql, add_wordpress, new_state, prevent_short_circuit,
};
use modelstate::core::Life;
use modelstate::state::{
    CharmConfig, CharmMeta, Relation, RelationRole, RelationSpec, State, Unit,
};
use modelstate::transaction::TestHook;

const WORDPRESS_DB: &str = "mysql:server wordpress:db";

/// wordpress related to mysql, each with one unit in scope.
async fn related_units(st: &State) -> (Relation, Unit, Unit) {
    let wordpress = add_wordpress(st).await;
    let mysql = add_mysql(st).await;
    let eps = st.infer_endpoints("wordpress", "mysql").await.unwrap();
    let rel = st.add_relation(&eps).await.unwrap();
    let wp = wordpress.add_unit().await.unwrap();
    let db = mysql.add_unit().await.unwrap();
    rel.unit(&wp).unwrap().enter_scope().await.unwrap();
    rel.unit(&db).unwrap().enter_scope().await.unwrap();
    (rel, wp, db)
}

#[tokio::test]
async fn test_add_relation() {
    let st = new_state().await;
    let mut wordpress = add_wordpress(&st).await;
    add_mysql(&st).await;

    let eps = st.infer_endpoints("mysql", "wordpress").await.unwrap();
    let rel = st.add_relation(&eps).await.unwrap();
    assert_eq!(rel.key(), WORDPRESS_DB);
    assert_eq!(rel.id(), 0);
    assert_eq!(rel.life(), Life::Alive);
    assert!(!rel.is_container_scoped());
    assert_eq!(rel.endpoint("wordpress").unwrap().role, RelationRole::Requirer);
    assert_eq!(rel.related_endpoints("wordpress").unwrap()[0].to_string(), "mysql:server");

    wordpress.refresh().await.unwrap();
    assert_eq!(wordpress.relation_count(), 1);
    assert_eq!(st.application("mysql").await.unwrap().relation_count(), 1);

    let err = st.add_relation(&eps).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("cannot add relation {WORDPRESS_DB:?}: relation already exists")
    );

    assert_eq!(st.relation(WORDPRESS_DB).await.unwrap().id(), 0);
    assert_eq!(st.relation_by_id(0).await.unwrap().key(), WORDPRESS_DB);
    assert!(st.relation_by_id(7).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_peer_relation() {
    let st = new_state().await;
    add_mysql(&st).await;
    let ep = st.endpoint("mysql", "cluster").await.unwrap();
    assert_eq!(ep.role, RelationRole::Peer);

    let rel = st.add_relation(&[ep]).await.unwrap();
    assert_eq!(rel.key(), "mysql:cluster");
    assert_eq!(rel.related_endpoints("mysql").unwrap()[0].name, "cluster");
}

#[tokio::test]
async fn test_add_relation_errors() {
    let st = new_state().await;
    let mut wordpress = add_wordpress(&st).await;
    add_mysql(&st).await;

    let db = st.endpoint("wordpress", "db").await.unwrap();
    let cluster = st.endpoint("mysql", "cluster").await.unwrap();
    let err = st.add_relation(&[db.clone(), cluster]).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "cannot add relation \"mysql:cluster wordpress:db\": endpoints do not relate"
    );

    let err = st.add_relation(&[]).await.unwrap_err();
    assert!(err.is_invalid_argument());

    let server = st.endpoint("mysql", "server").await.unwrap();
    wordpress.add_unit().await.unwrap();
    wordpress.destroy().await.unwrap();
    let err = st.add_relation(&[db, server]).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("cannot add relation {WORDPRESS_DB:?}: application \"wordpress\" is not alive")
    );
}

#[tokio::test]
async fn test_infer_endpoints() {
    let st = new_state().await;
    add_wordpress(&st).await;
    add_mysql(&st).await;
    add_logging(&st).await;

    let eps = st.infer_endpoints("wordpress:db", "mysql").await.unwrap();
    assert_eq!(eps.len(), 2);

    // The implicit juju-info endpoint is used when nothing else fits.
    let eps = st.infer_endpoints("logging", "mysql").await.unwrap();
    let names: Vec<String> = eps.iter().map(|ep| ep.to_string()).collect();
    assert_eq!(names, vec!["logging:info", "mysql:juju-info"]);

    let err = st.infer_endpoints("wordpress", "wordpress").await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "no relations found between \"wordpress\" and \"wordpress\""
    );

    let charm = add_charm(
        &st,
        "cs:quantal/dbadmin-1",
        CharmMeta::new("dbadmin")
            .requires("admin", RelationSpec::new("mysql"))
            .requires("db", RelationSpec::new("mysql")),
        CharmConfig::default(),
    )
    .await;
    st.add_application("dbadmin", &charm).await.unwrap();
    let err = st.infer_endpoints("dbadmin", "mysql").await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "ambiguous relation: \"dbadmin\" \"mysql\" could refer to \
         \"dbadmin:admin mysql:server\"; \"dbadmin:db mysql:server\""
    );
}

#[tokio::test]
async fn test_enter_and_leave_scope() {
    let st = new_state().await;
    let (mut rel, wp, db) = related_units(&st).await;
    rel.refresh().await.unwrap();
    assert_eq!(rel.unit_count(), 2);

    let ru = rel.unit(&wp).unwrap();
    assert_eq!(ru.unit_name(), "wordpress/0");
    assert_eq!(ru.endpoint().name, "db");
    assert!(ru.in_scope().await.unwrap());

    // Entering twice is a no-op.
    ru.enter_scope().await.unwrap();
    rel.refresh().await.unwrap();
    assert_eq!(rel.unit_count(), 2);

    ru.prepare_leave_scope().await.unwrap();
    assert!(wp.relations_joined().await.unwrap().is_empty());
    assert_eq!(wp.relations_in_scope().await.unwrap().len(), 1);

    ru.leave_scope().await.unwrap();
    assert!(!ru.in_scope().await.unwrap());
    assert!(wp.relations_in_scope().await.unwrap().is_empty());
    rel.refresh().await.unwrap();
    assert_eq!(rel.unit_count(), 1);
    assert_eq!(rel.life(), Life::Alive);

    // Leaving twice is a no-op too.
    ru.leave_scope().await.unwrap();
    let joined = db.relations_joined().await.unwrap();
    assert_eq!(joined.len(), 1);
    assert_eq!(joined[0].key(), WORDPRESS_DB);
}

#[tokio::test]
async fn test_non_member_unit_has_no_view() {
    let st = new_state().await;
    let (rel, _, _) = related_units(&st).await;
    let other = add_charm(
        &st,
        "cs:quantal/varnish-1",
        CharmMeta::new("varnish"),
        CharmConfig::default(),
    )
    .await;
    let varnish = st.add_application("varnish", &other).await.unwrap();
    let unit = varnish.add_unit().await.unwrap();
    let err = rel.unit(&unit).unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("application \"varnish\" is not a member of {WORDPRESS_DB:?}")
    );
}

#[tokio::test]
async fn test_dying_relation_is_removed_by_last_unit() {
    let st = new_state().await;
    let (mut rel, wp, db) = related_units(&st).await;

    rel.destroy().await.unwrap();
    assert_eq!(rel.life(), Life::Dying);

    rel.unit(&wp).unwrap().leave_scope().await.unwrap();
    rel.refresh().await.unwrap();
    assert_eq!(rel.unit_count(), 1);
    let err = rel.unit(&wp).unwrap().enter_scope().await.unwrap_err();
    assert_eq!(
        err.to_string(),
        format!(
            "cannot enter scope for unit \"wordpress/0\" in relation {WORDPRESS_DB:?}: \
             unit or relation is not alive"
        )
    );

    rel.unit(&db).unwrap().leave_scope().await.unwrap();
    assert!(rel.refresh().await.unwrap_err().is_not_found());
    assert_eq!(st.application("wordpress").await.unwrap().relation_count(), 0);
    assert_eq!(st.application("mysql").await.unwrap().relation_count(), 0);
}

#[tokio::test]
async fn test_destroy_empty_relation_removes_it() {
    let st = new_state().await;
    add_wordpress(&st).await;
    add_mysql(&st).await;
    let eps = st.infer_endpoints("wordpress", "mysql").await.unwrap();
    let mut rel = st.add_relation(&eps).await.unwrap();

    rel.destroy().await.unwrap();
    assert!(st.relation(WORDPRESS_DB).await.unwrap_err().is_not_found());
    assert_eq!(st.application("wordpress").await.unwrap().relation_count(), 0);
    // Again, on the removed relation.
    rel.destroy().await.unwrap();
}

#[tokio::test]
async fn test_unit_removal_leaves_scopes() {
    let st = new_state().await;
    let (mut rel, mut wp, db) = related_units(&st).await;
    rel.destroy().await.unwrap();
    rel.unit(&db).unwrap().leave_scope().await.unwrap();

    prevent_short_circuit(&wp).await;
    wp.destroy().await.unwrap();
    wp.ensure_dead().await.unwrap();
    wp.remove().await.unwrap();

    assert!(rel.refresh().await.unwrap_err().is_not_found());
    assert_eq!(st.application("wordpress").await.unwrap().unit_count(), 0);
}

#[tokio::test]
async fn test_allocating_unit_in_scope_is_not_removed() {
    let st = new_state().await;
    let (mut rel, mut wp, db) = related_units(&st).await;

    // Still allocating, but the relation has seen it.
    wp.destroy().await.unwrap();
    wp.refresh().await.unwrap();
    assert_eq!(wp.life(), Life::Dying);
    assert_eq!(wp.relations_in_scope().await.unwrap().len(), 1);
    rel.refresh().await.unwrap();
    assert_eq!(rel.unit_count(), 2);

    rel.destroy().await.unwrap();
    rel.unit(&db).unwrap().leave_scope().await.unwrap();
    wp.ensure_dead().await.unwrap();
    wp.remove().await.unwrap();
    assert!(rel.refresh().await.unwrap_err().is_not_found());
    assert_eq!(st.application("wordpress").await.unwrap().unit_count(), 0);
}

#[tokio::test]
async fn test_unit_entering_scope_while_destroyed() {
    let st = new_state().await;
    let wordpress = add_wordpress(&st).await;
    add_mysql(&st).await;
    let eps = st.infer_endpoints("wordpress", "mysql").await.unwrap();
    let mut rel = st.add_relation(&eps).await.unwrap();
    let mut wp = wordpress.add_unit().await.unwrap();

    let hook_st = st.clone();
    let checker = st.set_test_hooks(vec![TestHook::before(move || {
        Box::pin(async move {
            let rel = hook_st.relation(WORDPRESS_DB).await.unwrap();
            let unit = hook_st.unit("wordpress/0").await.unwrap();
            rel.unit(&unit).unwrap().enter_scope().await.unwrap();
        })
    })]);
    wp.destroy().await.unwrap();
    checker.check();

    wp.refresh().await.unwrap();
    assert_eq!(wp.life(), Life::Dying);
    rel.refresh().await.unwrap();
    assert_eq!(rel.unit_count(), 1);
    assert!(rel.unit(&wp).unwrap().in_scope().await.unwrap());
}

#[tokio::test]
async fn test_container_relation_creates_subordinates() {
    let st = new_state().await;
    let wordpress = add_wordpress(&st).await;
    add_logging(&st).await;
    let eps = st.infer_endpoints("logging", "wordpress").await.unwrap();
    let rel = st.add_relation(&eps).await.unwrap();
    assert!(rel.is_container_scoped());
    assert_eq!(rel.key(), "logging:info wordpress:juju-info");

    let mut first = wordpress.add_unit().await.unwrap();
    let second = wordpress.add_unit().await.unwrap();
    rel.unit(&first).unwrap().enter_scope().await.unwrap();
    rel.unit(&second).unwrap().enter_scope().await.unwrap();

    first.refresh().await.unwrap();
    assert_eq!(first.subordinate_names(), vec!["logging/0".to_string()]);
    let sub = st.unit("logging/1").await.unwrap();
    assert_eq!(sub.principal_name(), Some("wordpress/1"));
    assert_eq!(st.application("logging").await.unwrap().unit_count(), 2);

    // Re-entering does not add a second subordinate.
    rel.unit(&first).unwrap().leave_scope().await.unwrap();
    rel.unit(&first).unwrap().enter_scope().await.unwrap();
    assert_eq!(st.application("logging").await.unwrap().unit_count(), 2);
}

#[tokio::test]
async fn test_dying_application_removed_with_last_unit() {
    let st = new_state().await;
    let mut wordpress = add_wordpress(&st).await;
    let url = wordpress.charm_url().clone();
    let mut unit = wordpress.add_unit().await.unwrap();
    unit.set_charm_url(Some(&url)).await.unwrap();
    prevent_short_circuit(&unit).await;

    wordpress.destroy().await.unwrap();
    wordpress.refresh().await.unwrap();
    assert_eq!(wordpress.life(), Life::Dying);
    assert!(wordpress.add_unit().await.unwrap_err().to_string().ends_with("application is not alive"));

    unit.destroy().await.unwrap();
    unit.ensure_dead().await.unwrap();
    unit.remove().await.unwrap();
    assert!(st.application("wordpress").await.unwrap_err().is_not_found());
    assert!(st.all_applications().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_dying_application_removed_with_last_relation() {
    let st = new_state().await;
    let wordpress = add_wordpress(&st).await;
    let mut mysql = add_mysql(&st).await;
    let eps = st.infer_endpoints("wordpress", "mysql").await.unwrap();
    let rel = st.add_relation(&eps).await.unwrap();
    let wp = wordpress.add_unit().await.unwrap();
    rel.unit(&wp).unwrap().enter_scope().await.unwrap();

    mysql.destroy().await.unwrap();
    mysql.refresh().await.unwrap();
    assert_eq!(mysql.life(), Life::Dying);
    assert_eq!(st.relation(WORDPRESS_DB).await.unwrap().life(), Life::Dying);

    rel.unit(&wp).unwrap().leave_scope().await.unwrap();
    assert!(st.relation(WORDPRESS_DB).await.unwrap_err().is_not_found());
    assert!(st.application("mysql").await.unwrap_err().is_not_found());
    assert_eq!(st.application("wordpress").await.unwrap().relation_count(), 0);
}

#[tokio::test]
async fn test_destroy_application_without_units() {
    let st = new_state().await;
    add_wordpress(&st).await;
    let mut mysql = add_mysql(&st).await;
    let eps = st.infer_endpoints("wordpress", "mysql").await.unwrap();
    st.add_relation(&eps).await.unwrap();

    mysql.destroy().await.unwrap();
    assert!(st.application("mysql").await.unwrap_err().is_not_found());
    assert!(st.relation(WORDPRESS_DB).await.unwrap_err().is_not_found());
    let wordpress = st.application("wordpress").await.unwrap();
    assert_eq!(wordpress.relation_count(), 0);
    assert!(wordpress.relations().await.unwrap().is_empty());
}
