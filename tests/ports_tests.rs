mod common;

use common::{add_logging, add_wordpress, new_state, prevent_short_circuit};
use modelstate::core::StateError;
use modelstate::state::{Machine, MachineJob, PortRange, Protocol, State, Unit};

fn tcp(from: u16, to: u16) -> PortRange {
    PortRange::new(from, to, Protocol::Tcp).unwrap()
}

fn udp(from: u16, to: u16) -> PortRange {
    PortRange::new(from, to, Protocol::Udp).unwrap()
}

/// Two wordpress units sharing machine 0.
async fn colocated_units(st: &State) -> (Unit, Unit, Machine) {
    let app = add_wordpress(st).await;
    let machine = st.add_machine("quantal", &[MachineJob::HostUnits]).await.unwrap();
    let mut first = app.add_unit().await.unwrap();
    let mut second = app.add_unit().await.unwrap();
    first.assign_to_machine(&machine).await.unwrap();
    second.assign_to_machine(&machine).await.unwrap();
    (first, second, machine)
}

#[tokio::test]
async fn test_open_merges_and_close_splits() {
    let st = new_state().await;
    let (unit, _, _) = colocated_units(&st).await;

    unit.open_port("tcp", 80).await.unwrap();
    unit.open_ports("tcp", 81, 90).await.unwrap();
    assert_eq!(unit.opened_ports().await.unwrap(), vec![tcp(80, 90)]);

    unit.close_port("tcp", 85).await.unwrap();
    assert_eq!(unit.opened_ports().await.unwrap(), vec![tcp(80, 84), tcp(86, 90)]);

    // Closing what is not open changes nothing.
    unit.close_ports("tcp", 1000, 2000).await.unwrap();
    unit.open_port("udp", 53).await.unwrap();
    assert_eq!(
        unit.opened_ports().await.unwrap(),
        vec![tcp(80, 84), tcp(86, 90), udp(53, 53)]
    );

    unit.close_ports("tcp", 1, 100).await.unwrap();
    unit.close_port("udp", 53).await.unwrap();
    assert!(unit.opened_ports().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_close_leaves_remaining_ranges_sorted() {
    let st = new_state().await;
    let (unit, _, _) = colocated_units(&st).await;

    unit.open_port("tcp", 80).await.unwrap();
    unit.open_ports("udp", 100, 200).await.unwrap();
    unit.open_port("udp", 53).await.unwrap();
    unit.open_ports("tcp", 53, 55).await.unwrap();
    unit.open_port("tcp", 443).await.unwrap();

    unit.close_port("tcp", 80).await.unwrap();
    unit.close_ports("udp", 100, 200).await.unwrap();
    assert_eq!(
        unit.opened_ports().await.unwrap(),
        vec![tcp(53, 55), tcp(443, 443), udp(53, 53)]
    );
}

#[tokio::test]
async fn test_ranges_conflict_across_units() {
    let st = new_state().await;
    let (first, second, machine) = colocated_units(&st).await;

    first.open_ports("tcp", 80, 81).await.unwrap();
    let err = second.open_port("tcp", 81).await.unwrap_err();
    assert!(matches!(err.cause(), StateError::PortConflict(_)));
    assert_eq!(
        err.to_string(),
        "cannot open ports 81-81/tcp for unit \"wordpress/1\": \
         port range 81-81/tcp conflicts with 80-81/tcp opened by \"wordpress/0\""
    );

    // Different protocol, no conflict.
    second.open_port("udp", 81).await.unwrap();
    second.open_port("tcp", 82).await.unwrap();

    let all = machine.all_ports().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].machine_id(), "0");
    assert_eq!(all[0].ports_for_unit("wordpress/0"), vec![tcp(80, 81)]);
    assert_eq!(
        all[0].ports_for_unit("wordpress/1"),
        vec![tcp(82, 82), udp(81, 81)]
    );
}

#[tokio::test]
async fn test_invalid_ranges_are_rejected() {
    let st = new_state().await;
    let (unit, _, _) = colocated_units(&st).await;

    let err = unit.open_port("sctp", 80).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "cannot open ports 80-80/sctp for unit \"wordpress/0\": invalid protocol \"sctp\""
    );
    let err = unit.open_ports("tcp", 90, 80).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "cannot open ports 90-80/tcp for unit \"wordpress/0\": invalid port range 90-80"
    );
    let err = unit.close_port("tcp", 0).await.unwrap_err();
    assert!(err.is_invalid_argument());
}

#[tokio::test]
async fn test_subnet_must_exist_and_be_alive() {
    let st = new_state().await;
    let (unit, _, _) = colocated_units(&st).await;

    let err = unit
        .open_ports_on_subnet("bogus", "tcp", 80, 80)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "cannot open ports 80-80/tcp on subnet \"bogus\" for unit \"wordpress/0\": \
         invalid subnet ID \"bogus\""
    );

    let err = unit
        .open_ports_on_subnet("10.0.0.0/24", "tcp", 80, 80)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "cannot open ports 80-80/tcp on subnet \"10.0.0.0/24\" for unit \"wordpress/0\": \
         subnet \"10.0.0.0/24\" not found or not alive"
    );

    let mut subnet = st.add_subnet("10.0.0.0/24").await.unwrap();
    unit.open_ports_on_subnet("10.0.0.0/24", "tcp", 80, 80)
        .await
        .unwrap();
    assert_eq!(
        unit.opened_ports_on_subnet("10.0.0.0/24").await.unwrap(),
        vec![tcp(80, 80)]
    );
    assert!(unit.opened_ports().await.unwrap().is_empty());

    subnet.ensure_dead().await.unwrap();
    let err = unit
        .open_ports_on_subnet("10.0.0.0/24", "tcp", 81, 81)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_unit_must_be_assigned_and_not_dead() {
    let st = new_state().await;
    let app = add_wordpress(&st).await;
    let mut unit = app.add_unit().await.unwrap();

    let err = unit.open_port("tcp", 80).await.unwrap_err();
    assert!(err.is_not_assigned());
    assert!(unit.opened_ports().await.unwrap_err().is_not_assigned());

    unit.assign_to_new_machine().await.unwrap();
    prevent_short_circuit(&unit).await;
    unit.destroy().await.unwrap();
    unit.open_port("tcp", 80).await.unwrap();

    unit.ensure_dead().await.unwrap();
    let err = unit.open_port("tcp", 81).await.unwrap_err();
    assert!(err.is_dead());
    let err = unit.close_port("tcp", 80).await.unwrap_err();
    assert!(err.is_dead());
}

#[tokio::test]
async fn test_removed_unit_releases_its_ports() {
    let st = new_state().await;
    let (mut first, second, machine) = colocated_units(&st).await;
    first.open_ports("tcp", 80, 90).await.unwrap();
    first
        .open_ports_on_subnet("", "udp", 53, 53)
        .await
        .unwrap();
    second.open_port("tcp", 443).await.unwrap();

    prevent_short_circuit(&first).await;
    first.destroy().await.unwrap();
    first.ensure_dead().await.unwrap();
    first.remove().await.unwrap();

    let all = machine.all_ports().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(
        all[0].all_port_ranges(),
        [("wordpress/1".to_string(), tcp(443, 443))]
    );

    // The range is free for the remaining unit now.
    second.open_ports("tcp", 80, 90).await.unwrap();
}

#[tokio::test]
async fn test_last_range_removes_the_document() {
    let st = new_state().await;
    let (mut unit, _, machine) = colocated_units(&st).await;
    unit.open_port("tcp", 80).await.unwrap();
    assert_eq!(machine.all_ports().await.unwrap().len(), 1);

    prevent_short_circuit(&unit).await;
    unit.destroy().await.unwrap();
    unit.ensure_dead().await.unwrap();
    unit.remove().await.unwrap();
    assert!(machine.all_ports().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_subordinate_opens_on_principal_machine() {
    let st = new_state().await;
    let (principal, _, machine) = colocated_units(&st).await;
    add_logging(&st).await;
    let eps = st.infer_endpoints("wordpress", "logging").await.unwrap();
    let rel = st.add_relation(&eps).await.unwrap();
    rel.unit(&principal).unwrap().enter_scope().await.unwrap();

    let sub = st.unit("logging/0").await.unwrap();
    sub.open_port("udp", 514).await.unwrap();
    assert_eq!(sub.opened_ports().await.unwrap(), vec![udp(514, 514)]);

    let all = machine.all_ports().await.unwrap();
    assert_eq!(all[0].ports_for_unit("logging/0"), vec![udp(514, 514)]);
}
