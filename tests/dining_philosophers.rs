use gridlock::{ProcessId, ResolutionAction, ResourceId, Simulator, Strategy, WorkloadProfile};
use std::time::Duration;
mod common;
use common::{RESOLUTION_TIMEOUT, wait_until};

#[test]
fn test_dining_philosophers_deadlock() {
    let philosophers = 5;

    // Everyone reaches for the left fork first, then the right one
    let mut simulator = Simulator::new()
        .processes(philosophers)
        .resources(philosophers)
        .strategy(Strategy::Abort)
        .auto_detect(false)
        .profile(WorkloadProfile::Aggressive)
        .speed(4.0)
        .seed(5);
    for i in 0..philosophers {
        simulator = simulator.acquisition_order(
            ProcessId(i),
            vec![ResourceId(i), ResourceId((i + 1) % philosophers)],
        );
    }
    let simulation = simulator.start().unwrap();

    assert!(wait_until(RESOLUTION_TIMEOUT, || {
        simulation.detect().unwrap().deadlocked
    }));
    let detection = simulation.detect().unwrap();
    assert_eq!(detection.implicated.len(), philosophers);
    assert_eq!(detection.waiting_for.len(), philosophers);

    let resolution = simulation.resolve().unwrap();
    assert_eq!(
        resolution.action,
        ResolutionAction::Aborted {
            victim: ProcessId(0),
            released: vec![ResourceId(0)],
        }
    );

    // The ring is broken for good
    std::thread::sleep(Duration::from_millis(200));
    assert!(!simulation.detect().unwrap().deadlocked);

    let stats = simulation.stop().unwrap();
    assert_eq!(stats.deadlocks_detected, 1);
    assert_eq!(stats.resolutions_applied, 1);
}
