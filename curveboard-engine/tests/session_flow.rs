//! Engine-level end-to-end flow: two coordinators collaborating through a
//! real hub.

use std::time::Duration;

use curveboard_collab::server::{HubConfig, SessionHub};
use curveboard_core::Point;
use curveboard_engine::{
    Coordinator, InputSource, PointAction, RenderFrame, Renderer, SessionConfig, SessionDriver,
};

#[derive(Default)]
struct NullInput;

impl InputSource for NullInput {
    fn set_points(&mut self, _points: &[Point]) {}
}

#[derive(Default)]
struct NullRenderer;

impl Renderer for NullRenderer {
    fn render(&mut self, _frame: &RenderFrame) {}
}

type TestCoordinator = Coordinator<NullInput, NullRenderer>;

async fn start_test_hub() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let hub = SessionHub::new(HubConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        ..HubConfig::default()
    });
    tokio::spawn(async move {
        hub.run().await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    port
}

/// Build a collaborating coordinator and wait for its handshake.
async fn ready_coordinator(port: u16, name: &str) -> (TestCoordinator, SessionDriver) {
    let config = SessionConfig {
        hub_url: format!("ws://127.0.0.1:{port}"),
        collaboration_enabled: true,
        user_name: name.to_string(),
        ..SessionConfig::default()
    };
    let mut coordinator = Coordinator::new(NullInput, NullRenderer, config.clone());
    let mut driver = SessionDriver::start(&config, coordinator.replica().user_id());
    pump_until(&mut coordinator, &mut driver, "handshake", |c| {
        c.is_connected()
    })
    .await;
    (coordinator, driver)
}

/// Pump transport events and outbox until the predicate holds.
async fn pump_until(
    coordinator: &mut TestCoordinator,
    driver: &mut SessionDriver,
    what: &str,
    predicate: impl Fn(&TestCoordinator) -> bool,
) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        driver.flush(coordinator.take_outbox()).await;
        if predicate(coordinator) {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        if let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(100), driver.next_event()).await
        {
            coordinator.handle_session_event(event);
        }
    }
}

#[tokio::test]
async fn test_two_coordinators_share_edits_and_shared_undo() {
    let port = start_test_hub().await;

    // Alice joins first with her seeded empty curve, then draws two points.
    let (mut alice, mut alice_driver) = ready_coordinator(port, "Alice").await;
    alice.handle_point_action(PointAction::Add {
        point: Point::new(10.0, 20.0),
    });
    alice.handle_point_action(PointAction::Add {
        point: Point::new(30.0, 40.0),
    });
    alice_driver.flush(alice.take_outbox()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Bob joins and converges on Alice's two-point curve.
    let (mut bob, mut bob_driver) = ready_coordinator(port, "Bob").await;
    pump_until(&mut bob, &mut bob_driver, "bob to converge", |c| {
        c.store().curves().len() == 1 && c.store().curves()[0].points.len() == 2
    })
    .await;

    // Bob undoes through the shared history; Alice sees one point fewer.
    assert!(bob.can_undo());
    bob.undo();
    bob_driver.flush(bob.take_outbox()).await;
    assert_eq!(bob.store().curves()[0].points.len(), 1);

    pump_until(&mut alice, &mut alice_driver, "alice to roll back", |c| {
        c.store().curves()[0].points.len() == 1
    })
    .await;
}
