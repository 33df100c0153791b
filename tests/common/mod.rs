use crossbeam_channel::{Receiver, unbounded};
use gridlock::{
    ActorMessage, ProcessId, ResourceId, ResourceManager, SimEvent, Simulation, Simulator,
    Strategy, WorkloadProfile,
};
use std::time::{Duration, Instant};

pub const A: ProcessId = ProcessId(0);
pub const B: ProcessId = ProcessId(1);
#[allow(dead_code)]
pub const C: ProcessId = ProcessId(2);
pub const R1: ResourceId = ResourceId(0);
pub const R2: ResourceId = ResourceId(1);

#[allow(dead_code)]
pub const RESOLUTION_TIMEOUT: Duration = Duration::from_secs(10);
#[allow(dead_code)]
pub const QUIET_PERIOD: Duration = Duration::from_secs(3);

/// Manager with `processes` registered processes, plus their inboxes
#[allow(dead_code)]
pub fn manager_with(
    processes: usize,
    resources: usize,
) -> (ResourceManager, Vec<Receiver<ActorMessage>>) {
    let mut manager = ResourceManager::new(resources);
    let inboxes = (0..processes)
        .map(|i| {
            let (tx, rx) = unbounded();
            manager.register_process(ProcessId(i), tx);
            rx
        })
        .collect();
    (manager, inboxes)
}

/// A holds R1 and waits for R2, B holds R2 and waits for R1
#[allow(dead_code)]
pub fn crossed_pair(manager: &mut ResourceManager) {
    manager.request(A, R1).unwrap();
    manager.request(B, R2).unwrap();
    manager.request(A, R2).unwrap();
    manager.request(B, R1).unwrap();
}

#[allow(dead_code)]
pub fn drain(inbox: &Receiver<ActorMessage>) -> Vec<ActorMessage> {
    inbox.try_iter().collect()
}

#[allow(dead_code)]
pub struct LiveHarness {
    pub simulation: Simulation,
    pub events: Receiver<SimEvent>,
}

/// Two actors with crossed acquisition orders, sped up so the first cycle
/// deadlocks within a fraction of a second
#[allow(dead_code)]
pub fn start_crossed(strategy: Strategy) -> LiveHarness {
    start_crossed_with(|simulator| simulator.strategy(strategy))
}

/// Same crossed pair, with `adjust` applied on top of the fast defaults
#[allow(dead_code)]
pub fn start_crossed_with(adjust: impl FnOnce(Simulator) -> Simulator) -> LiveHarness {
    let (tx, events) = unbounded();
    let simulator = Simulator::new()
        .processes(2)
        .resources(2)
        .profile(WorkloadProfile::Aggressive)
        .speed(4.0)
        .seed(42)
        .detection_interval(Duration::from_millis(50))
        .resolution_dwell(Duration::from_millis(100))
        .acquisition_order(A, vec![R1, R2])
        .acquisition_order(B, vec![R2, R1]);
    let simulation = adjust(simulator)
        .on_event(move |event| {
            let _ = tx.send(event);
        })
        .start()
        .expect("Failed to start simulation");
    LiveHarness { simulation, events }
}

/// Wait for the first event matching `pick`, collecting everything seen on the way
#[allow(dead_code)]
pub fn wait_for_event(
    events: &Receiver<SimEvent>,
    timeout: Duration,
    seen: &mut Vec<SimEvent>,
    mut pick: impl FnMut(&SimEvent) -> bool,
) -> Option<SimEvent> {
    let deadline = Instant::now() + timeout;
    while let Ok(event) = events.recv_deadline(deadline) {
        seen.push(event.clone());
        if pick(&event) {
            return Some(event);
        }
    }
    None
}

/// Poll `condition` until it holds or `timeout` runs out
#[allow(dead_code)]
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    condition()
}
