mod common;

use common::{add_charm, add_wordpress, logging_charm, new_state, prevent_short_circuit};
use modelstate::core::Life;
use modelstate::state::{CharmConfig, CharmMeta, ConfigOption, RelationSpec, Settings};
use modelstate::transaction::TestHook;
use serde_json::{Value, json};

fn settings(value: Value) -> Settings {
    serde_json::from_value(value).unwrap()
}

#[tokio::test]
async fn test_add_application_errors() {
    let st = new_state().await;
    let wordpress = add_wordpress(&st).await;
    assert_eq!(wordpress.name(), "wordpress");
    assert_eq!(wordpress.series(), "quantal");
    assert!(wordpress.is_principal());
    assert_eq!(wordpress.life(), Life::Alive);

    let charm = wordpress.charm().await.unwrap();
    let err = st.add_application("wordpress", &charm).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "cannot add application \"wordpress\": application already exists"
    );

    let err = st.add_application("word/press", &charm).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "cannot add application \"word/press\": invalid name"
    );
    assert!(err.is_invalid_argument());

    assert!(st.application("ghost").await.unwrap_err().is_not_found());
    assert_eq!(st.all_applications().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_config_settings_defaults_and_updates() {
    let st = new_state().await;
    let wordpress = add_wordpress(&st).await;
    assert_eq!(
        wordpress.config_settings().await.unwrap(),
        settings(json!({ "blog-title": "My Title" }))
    );

    wordpress
        .update_config_settings(settings(json!({ "blog-title": "Mine", "port": 8080 })))
        .await
        .unwrap();
    assert_eq!(
        wordpress.config_settings().await.unwrap(),
        settings(json!({ "blog-title": "Mine", "port": 8080 }))
    );

    // Null falls back to the charm default.
    wordpress
        .update_config_settings(settings(json!({ "blog-title": null })))
        .await
        .unwrap();
    assert_eq!(
        wordpress.config_settings().await.unwrap(),
        settings(json!({ "blog-title": "My Title", "port": 8080 }))
    );

    let err = wordpress
        .update_config_settings(settings(json!({ "nope": 1 })))
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "cannot update settings of application \"wordpress\": unknown option \"nope\""
    );

    let err = wordpress
        .update_config_settings(settings(json!({ "port": "eighty" })))
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "cannot update settings of application \"wordpress\": \
         option \"port\" expected int, got \"eighty\""
    );
}

#[tokio::test]
async fn test_set_charm_carries_declared_settings() {
    let st = new_state().await;
    let mut wordpress = add_wordpress(&st).await;
    wordpress
        .update_config_settings(settings(json!({ "blog-title": "Mine", "port": 8080 })))
        .await
        .unwrap();

    let upgraded = add_charm(
        &st,
        "cs:quantal/wordpress-4",
        CharmMeta::new("wordpress")
            .provides("url", RelationSpec::new("http"))
            .requires("db", RelationSpec::new("mysql")),
        CharmConfig::default().with_option("blog-title", ConfigOption::string(None)),
    )
    .await;
    wordpress.set_charm(&upgraded).await.unwrap();
    assert_eq!(wordpress.charm_url().to_string(), "cs:quantal/wordpress-4");
    assert_eq!(
        wordpress.config_settings().await.unwrap(),
        settings(json!({ "blog-title": "Mine" }))
    );

    // Same charm again changes nothing.
    wordpress.set_charm(&upgraded).await.unwrap();

    let logging = logging_charm(&st).await;
    let err = wordpress.set_charm(&logging).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "cannot upgrade application \"wordpress\" to charm \"cs:quantal/logging-1\": \
         cannot change an application's subordinacy"
    );
}

#[tokio::test]
async fn test_set_charm_on_dying_application() {
    let st = new_state().await;
    let mut wordpress = add_wordpress(&st).await;
    let unit = wordpress.add_unit().await.unwrap();
    prevent_short_circuit(&unit).await;
    wordpress.destroy().await.unwrap();
    assert_eq!(wordpress.life(), Life::Dying);

    let charm = wordpress.charm().await.unwrap();
    let err = wordpress.add_unit().await.unwrap_err();
    assert!(err.to_string().ends_with("application is not alive"));

    let upgraded = add_charm(
        &st,
        "cs:quantal/wordpress-5",
        CharmMeta::new("wordpress"),
        CharmConfig::default(),
    )
    .await;
    assert_ne!(charm.url(), upgraded.url());
    let err = wordpress.set_charm(&upgraded).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "cannot upgrade application \"wordpress\" to charm \"cs:quantal/wordpress-5\": \
         application is not alive"
    );
}

#[tokio::test]
async fn test_application_destroyed_while_last_unit_removed() {
    let st = new_state().await;
    let wordpress = add_wordpress(&st).await;
    let mut unit = wordpress.add_unit().await.unwrap();
    prevent_short_circuit(&unit).await;
    unit.destroy().await.unwrap();
    unit.ensure_dead().await.unwrap();

    let hook_st = st.clone();
    let checker = st.set_test_hooks(vec![TestHook::before(move || {
        Box::pin(async move {
            let mut app = hook_st.application("wordpress").await.unwrap();
            app.destroy().await.unwrap();
            assert_eq!(app.life(), Life::Dying);
        })
    })]);
    unit.remove().await.unwrap();
    checker.check();

    // The retry sees the Dying application and takes it along.
    assert!(st.application("wordpress").await.unwrap_err().is_not_found());
    assert!(st.all_applications().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_dying_application_loses_other_unit_while_unit_removed() {
    let st = new_state().await;
    let mut wordpress = add_wordpress(&st).await;
    let mut first = wordpress.add_unit().await.unwrap();
    let mut second = wordpress.add_unit().await.unwrap();
    for unit in [&first, &second] {
        prevent_short_circuit(unit).await;
    }
    wordpress.destroy().await.unwrap();
    for unit in [&mut first, &mut second] {
        unit.destroy().await.unwrap();
        unit.ensure_dead().await.unwrap();
    }

    let checker = st.set_test_hooks(vec![TestHook::before(move || {
        Box::pin(async move {
            second.remove().await.unwrap();
        })
    })]);
    first.remove().await.unwrap();
    checker.check();

    assert!(st.application("wordpress").await.unwrap_err().is_not_found());
}
