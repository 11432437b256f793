#![allow(dead_code)]

use modelstate::state::{
    AgentStatus, Application, Charm, CharmConfig, CharmInfo, CharmMeta, CharmUrl, ConfigOption,
    RelationSpec, State, StateConfig, Unit,
};

pub async fn new_state() -> State {
    State::open(StateConfig::new("testing")).await.unwrap()
}

pub async fn add_charm(st: &State, url: &str, meta: CharmMeta, config: CharmConfig) -> Charm {
    st.add_charm(CharmInfo {
        url: CharmUrl::parse(url).unwrap(),
        meta,
        config,
    })
    .await
    .unwrap()
}

pub async fn wordpress_charm(st: &State) -> Charm {
    add_charm(
        st,
        "cs:quantal/wordpress-3",
        CharmMeta::new("wordpress")
            .provides("url", RelationSpec::new("http"))
            .requires("db", RelationSpec::new("mysql")),
        CharmConfig::default()
            .with_option("blog-title", ConfigOption::string(Some("My Title")))
            .with_option("port", ConfigOption::int(None)),
    )
    .await
}

pub async fn mysql_charm(st: &State) -> Charm {
    add_charm(
        st,
        "cs:quantal/mysql-1",
        CharmMeta::new("mysql")
            .provides("server", RelationSpec::new("mysql"))
            .peers("cluster", RelationSpec::new("mysql-ha")),
        CharmConfig::default(),
    )
    .await
}

pub async fn logging_charm(st: &State) -> Charm {
    add_charm(
        st,
        "cs:quantal/logging-1",
        CharmMeta::new("logging")
            .subordinate()
            .requires("info", RelationSpec::container("juju-info")),
        CharmConfig::default(),
    )
    .await
}

pub async fn add_wordpress(st: &State) -> Application {
    let charm = wordpress_charm(st).await;
    st.add_application("wordpress", &charm).await.unwrap()
}

pub async fn add_mysql(st: &State) -> Application {
    let charm = mysql_charm(st).await;
    st.add_application("mysql", &charm).await.unwrap()
}

pub async fn add_logging(st: &State) -> Application {
    let charm = logging_charm(st).await;
    st.add_application("logging", &charm).await.unwrap()
}

/// Gives the unit an agent status other than allocating, so destroying
/// it goes through Dying rather than removing it straight away.
pub async fn prevent_short_circuit(unit: &Unit) {
    unit.set_agent_status(AgentStatus::Idle, "").await.unwrap();
}
