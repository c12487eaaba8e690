use brrtstream::ids::RequestId;
use brrtstream::stream::{AbortGovernor, AbortReason, AbortSignal, StreamAssembler, StreamConfig};
use std::time::Duration;

mod common;
use common::test_server::setup_may_runtime;

fn governor(ms: u64) -> AbortGovernor {
    setup_may_runtime();
    let assembler = StreamAssembler::new(RequestId::new(), StreamConfig::default());
    AbortGovernor::arm(
        Duration::from_millis(ms),
        assembler.abort_handle(),
        RequestId::new(),
    )
}

#[test]
fn test_timer_expiry_trips_timeout() {
    let g = governor(20);
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(g.signal().reason(), Some(AbortReason::Timeout));
    // Disarming late changes nothing.
    g.disarm();
    assert_eq!(g.signal().reason(), Some(AbortReason::Timeout));
}

#[test]
fn test_disarm_before_expiry_prevents_abort() {
    let g = governor(60);
    assert!(g.disarm());
    assert!(g.is_disarmed());
    std::thread::sleep(Duration::from_millis(150));
    assert!(!g.signal().is_aborted());
}

#[test]
fn test_first_abort_wins() {
    let g = governor(60_000);
    assert!(g.abort(AbortReason::Disconnected));
    assert!(!g.abort(AbortReason::Cancelled));
    assert_eq!(g.signal().reason(), Some(AbortReason::Disconnected));
}

#[test]
fn test_shared_signal_is_seen_by_clones() {
    setup_may_runtime();
    let signal = AbortSignal::new();
    let observer = signal.clone();
    let assembler =
        StreamAssembler::new(RequestId::new(), StreamConfig::default()).with_signal(signal);
    assert!(assembler.abort_handle().abort(AbortReason::Cancelled));
    assert!(observer.is_aborted());
    assert_eq!(observer.reason(), Some(AbortReason::Cancelled));
}
