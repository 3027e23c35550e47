//! Device Bridge Integration Tests
//!
//! Tests for the async channel bridge between the Tokio runtime and the
//! device thread.
//!
//! # Test Scenarios
//! - Channel creation and request/response flow
//! - Notices from the device thread
//! - Worker thread lifecycle
//! - Ordering of concurrently issued commands
//!
//! Run with: `cargo test -p common --test device_bridge_tests`

use common::test_utils::{DEFAULT_TEST_TIMEOUT, with_timeout};
use common::{DeviceCommand, DeviceNotice, SessionSnapshot, create_device_bridge};
use protocol::{
    DeviceSpeed, DeviceState, EndpointAddress, SetupRequest, TransportEvent, TransportOp,
};
use std::thread;

/// Minimal device thread: answers every event with a single marker op
fn spawn_echo_worker(worker: common::DeviceWorker) -> thread::JoinHandle<usize> {
    thread::spawn(move || {
        let mut handled = 0;
        while let Ok(cmd) = worker.recv_command() {
            match cmd {
                DeviceCommand::Event { event, response } => {
                    handled += 1;
                    let op = match event {
                        TransportEvent::Setup { packet } => TransportOp::SetAddress {
                            address: packet[2],
                        },
                        _ => TransportOp::Stall {
                            endpoint: EndpointAddress::EP0_IN,
                        },
                    };
                    let _ = response.send(vec![op]);
                }
                DeviceCommand::SendReport {
                    interface,
                    data,
                    response,
                } => {
                    handled += 1;
                    let result = if interface == 0 {
                        Ok(vec![TransportOp::Transmit {
                            endpoint: EndpointAddress(0x81),
                            data,
                        }])
                    } else {
                        Err(format!("interface {} not configured", interface))
                    };
                    let _ = response.send(result);
                }
                DeviceCommand::Snapshot { response } => {
                    let _ = response.send(SessionSnapshot {
                        state: DeviceState::Addressed,
                        address: 5,
                        configuration: 0,
                        remote_wakeup: false,
                    });
                }
                DeviceCommand::Shutdown => break,
            }
        }
        handled
    })
}

// ============================================================================
// Request/Response Tests
// ============================================================================

#[tokio::test]
async fn test_deliver_returns_ops() {
    let (bridge, worker) = create_device_bridge();
    let handle = spawn_echo_worker(worker);

    let ops = with_timeout(
        DEFAULT_TEST_TIMEOUT,
        bridge.deliver(TransportEvent::Setup {
            packet: SetupRequest::set_address(42).to_bytes(),
        }),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(ops, vec![TransportOp::SetAddress { address: 42 }]);

    bridge.send_command(DeviceCommand::Shutdown).await.unwrap();
    assert_eq!(handle.join().unwrap(), 1);
}

#[tokio::test]
async fn test_send_report_error_is_device_error() {
    let (bridge, worker) = create_device_bridge();
    let handle = spawn_echo_worker(worker);

    let ops = bridge.send_report(0, vec![1, 2, 3, 4]).await.unwrap();
    assert_eq!(ops.len(), 1);

    let err = bridge.send_report(3, vec![0]).await.unwrap_err();
    assert!(matches!(err, common::Error::Device(msg) if msg.contains("interface 3")));

    bridge.send_command(DeviceCommand::Shutdown).await.unwrap();
    handle.join().unwrap();
}

#[tokio::test]
async fn test_snapshot() {
    let (bridge, worker) = create_device_bridge();
    let handle = spawn_echo_worker(worker);

    let snapshot = bridge.snapshot().await.unwrap();
    assert_eq!(snapshot.state, DeviceState::Addressed);
    assert_eq!(snapshot.address, 5);

    bridge.send_command(DeviceCommand::Shutdown).await.unwrap();
    handle.join().unwrap();
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

#[tokio::test]
async fn test_dropped_worker_fails_requests() {
    let (bridge, worker) = create_device_bridge();
    drop(worker);

    let result = bridge
        .deliver(TransportEvent::Reset {
            speed: DeviceSpeed::Full,
        })
        .await;
    assert!(matches!(result, Err(common::Error::Channel(_))));
}

#[tokio::test]
async fn test_worker_dropping_response() {
    let (bridge, worker) = create_device_bridge();
    let handle = thread::spawn(move || {
        // Take the command and drop its responder
        let _ = worker.recv_command();
    });

    let result = bridge.snapshot().await;
    assert!(matches!(result, Err(common::Error::Channel(_))));
    handle.join().unwrap();
}

#[tokio::test]
async fn test_worker_exits_when_bridge_dropped() {
    let (bridge, worker) = create_device_bridge();
    let handle = spawn_echo_worker(worker);
    drop(bridge);
    assert_eq!(handle.join().unwrap(), 0);
}

// ============================================================================
// Notice Tests
// ============================================================================

#[tokio::test]
async fn test_notices_arrive_in_order() {
    let (bridge, worker) = create_device_bridge();

    let handle = thread::spawn(move || {
        for address in 1..=3 {
            worker
                .post_notice(DeviceNotice::StateChanged {
                    state: DeviceState::Addressed,
                    address,
                    configuration: 0,
                })
                .unwrap();
        }
    });
    handle.join().unwrap();

    for expected in 1..=3 {
        match bridge.recv_notice().await.unwrap() {
            DeviceNotice::StateChanged { address, .. } => assert_eq!(address, expected),
            other => panic!("unexpected notice {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_notice_sender_clones() {
    let (bridge, worker) = create_device_bridge();
    let tx = worker.notice_tx.clone();

    common::channel::post(
        &tx,
        DeviceNotice::SetReport {
            function: "vendor".into(),
            report_id: 0,
            data: vec![9; 9],
        },
    )
    .unwrap();

    let notices = bridge.drain_notices();
    assert_eq!(notices.len(), 1);
    assert!(matches!(&notices[0], DeviceNotice::SetReport { data, .. } if data.len() == 9));
}

// ============================================================================
// Ordering Tests
// ============================================================================

#[tokio::test]
async fn test_concurrent_commands_each_answered() {
    let (bridge, worker) = create_device_bridge();
    let handle = spawn_echo_worker(worker);

    let mut tasks = Vec::new();
    for address in 1..=16u16 {
        let bridge = bridge.clone();
        tasks.push(tokio::spawn(async move {
            bridge
                .deliver(TransportEvent::Setup {
                    packet: SetupRequest::set_address(address).to_bytes(),
                })
                .await
                .map(|ops| (address, ops))
        }));
    }
    for task in tasks {
        let (address, ops) = task.await.unwrap().unwrap();
        assert_eq!(
            ops,
            vec![TransportOp::SetAddress {
                address: address as u8
            }]
        );
    }

    bridge.send_command(DeviceCommand::Shutdown).await.unwrap();
    assert_eq!(handle.join().unwrap(), 16);
}
