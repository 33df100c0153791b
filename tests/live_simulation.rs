use fxhash::FxHashMap;
use gridlock::{
    ProcessState, ResourceId, SimConfig, SimError, SimEvent, Simulator, Strategy, WorkloadProfile,
};
use std::time::Duration;
mod common;
use common::{
    A, B, QUIET_PERIOD, R1, RESOLUTION_TIMEOUT, start_crossed, wait_for_event, wait_until,
};

#[test]
fn test_ordering_prevents_further_deadlocks() {
    let harness = start_crossed(Strategy::Ordering);
    let mut seen = Vec::new();

    wait_for_event(&harness.events, RESOLUTION_TIMEOUT, &mut seen, |event| {
        matches!(
            event,
            SimEvent::ResolutionApplied {
                strategy: Strategy::Ordering,
                ..
            }
        )
    })
    .expect("Deadlock was not resolved");

    seen.clear();
    let again = wait_for_event(&harness.events, QUIET_PERIOD, &mut seen, |event| {
        matches!(event, SimEvent::DeadlockDetected { .. })
    });
    assert!(again.is_none(), "Deadlocked again after reordering");
    assert!(
        seen.iter()
            .any(|event| matches!(event, SimEvent::Granted { .. })),
        "Processes stopped making progress"
    );

    let stats = harness.simulation.stop().unwrap();
    assert_eq!(stats.deadlocks_detected, 1);
}

#[test]
fn test_abort_terminates_a_victim_and_the_rest_continue() {
    let harness = start_crossed(Strategy::Abort);
    let mut seen = Vec::new();

    let aborted = wait_for_event(&harness.events, RESOLUTION_TIMEOUT, &mut seen, |event| {
        matches!(event, SimEvent::ProcessAborted { .. })
    })
    .expect("No process was aborted");
    let SimEvent::ProcessAborted { process: victim } = aborted else {
        unreachable!();
    };
    assert_eq!(victim, A);

    assert!(wait_until(RESOLUTION_TIMEOUT, || {
        let snapshot = harness.simulation.snapshot().unwrap();
        let view = snapshot.process(victim).unwrap();
        view.aborted && view.state == ProcessState::Aborted && view.held.is_empty()
    }));

    // The survivor gets to finish cycles on its own
    let granted = wait_for_event(&harness.events, RESOLUTION_TIMEOUT, &mut seen, |event| {
        matches!(event, SimEvent::Granted { process, .. } if *process == B)
    });
    assert!(granted.is_some());

    harness.simulation.stop().unwrap();
}

#[test]
fn test_preempt_sends_the_victim_back_to_idle() {
    let harness = start_crossed(Strategy::Preempt);
    let mut seen = Vec::new();

    let preempted = wait_for_event(&harness.events, RESOLUTION_TIMEOUT, &mut seen, |event| {
        matches!(event, SimEvent::ProcessPreempted { .. })
    })
    .expect("No process was preempted");
    let SimEvent::ProcessPreempted { process: victim, resources } = preempted else {
        unreachable!();
    };
    assert_eq!(resources.len(), 1);

    let idle = wait_for_event(&harness.events, RESOLUTION_TIMEOUT, &mut seen, |event| {
        *event
            == SimEvent::StateChanged {
                process: victim,
                state: ProcessState::Idle,
            }
    });
    assert!(idle.is_some());

    let stats = harness.simulation.stop().unwrap();
    assert!(stats.resolutions_applied >= 1);
}

#[test]
fn test_default_interval_resolves_repeated_deadlocks() {
    let defaults = SimConfig::default();
    let harness = common::start_crossed_with(|simulator| {
        simulator
            .strategy(Strategy::Fifo)
            .detection_interval(defaults.detection_interval())
            .resolution_dwell(defaults.resolution_dwell())
    });

    assert!(wait_until(Duration::from_secs(20), || {
        harness
            .simulation
            .stats()
            .is_ok_and(|stats| stats.resolutions_applied >= 2)
    }));

    let stats = harness.simulation.stop().unwrap();
    assert!(stats.deadlocks_detected >= 2);
    assert!(stats.resolutions_applied >= 2);
    assert_eq!(stats.resolutions_failed, 0);
}

#[test]
fn test_grants_and_releases_never_overlap() {
    let (tx, events) = crossbeam_channel::unbounded();
    let simulation = Simulator::new()
        .processes(4)
        .resources(3)
        .strategy(Strategy::Fifo)
        .profile(WorkloadProfile::Aggressive)
        .speed(8.0)
        .seed(7)
        .detection_interval(Duration::from_millis(20))
        .resolution_dwell(Duration::from_millis(50))
        .on_event(move |event| {
            let _ = tx.send(event);
        })
        .start()
        .unwrap();

    std::thread::sleep(Duration::from_secs(3));
    simulation.stop().unwrap();

    let mut owners: FxHashMap<ResourceId, gridlock::ProcessId> = FxHashMap::default();
    let mut grants = 0;
    for event in events.try_iter() {
        match event {
            SimEvent::Granted { process, resource } => {
                assert_eq!(owners.insert(resource, process), None, "{resource} granted twice");
                grants += 1;
            }
            SimEvent::Released {
                process, resource, ..
            } => {
                assert_eq!(owners.remove(&resource), Some(process));
            }
            SimEvent::SimulationStopped => break,
            _ => {}
        }
    }
    assert!(grants > 0);
}

#[test]
fn test_invalid_configuration_is_rejected_before_start() {
    let cases = [
        Simulator::new().processes(0),
        Simulator::new().processes(27),
        Simulator::new().resources(0),
        Simulator::new().speed(0.0),
        Simulator::new().speed(f64::NAN),
        Simulator::new().detection_interval(Duration::ZERO),
    ];
    for simulator in cases {
        let err = simulator.start().err().expect("configuration should be rejected");
        assert!(matches!(
            err.downcast_ref::<SimError>(),
            Some(SimError::InvalidConfiguration(_))
        ));
    }

    let err = Simulator::new()
        .acquisition_order(A, vec![R1, ResourceId(5)])
        .start()
        .err()
        .unwrap();
    assert_eq!(
        err.downcast_ref::<SimError>(),
        Some(&SimError::UnknownResource(ResourceId(5)))
    );
}

#[test]
fn test_control_calls_after_stop_fail() {
    let simulation = Simulator::new().seed(1).start().unwrap();

    assert!(simulation.is_running());
    assert!(matches!(
        simulation.set_speed(500.0),
        Err(SimError::InvalidConfiguration(_))
    ));
    simulation.set_speed(2.0).unwrap();

    simulation.stop().unwrap();
    assert!(!simulation.is_running());
    assert_eq!(simulation.stop().unwrap_err(), SimError::NotRunning);
    assert_eq!(simulation.detect().unwrap_err(), SimError::NotRunning);
}

#[test]
fn test_event_log_is_written_as_json_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("logs").join("run.jsonl");

    let simulation = Simulator::from_config(SimConfig {
        speed: 10.0,
        seed: Some(3),
        ..SimConfig::default()
    })
    .with_log(&path)
    .start()
    .unwrap();
    std::thread::sleep(Duration::from_millis(500));
    simulation.stop().unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    let kinds: Vec<String> = content
        .lines()
        .map(|line| {
            let entry: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(entry["timestamp"].as_f64().is_some());
            entry["event"]["kind"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(kinds.first().map(String::as_str), Some("simulation_started"));
    assert_eq!(kinds.last().map(String::as_str), Some("simulation_stopped"));
    assert!(kinds.iter().any(|kind| kind == "state_changed"));
}
