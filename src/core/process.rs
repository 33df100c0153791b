//! Process actor
//!
//! Each simulated process runs on its own thread and talks to the engine only
//! through channels: it sends [`Command`]s and reads [`ActorMessage`]s from
//! its private inbox. It keeps a shadow set of the resources it holds, which
//! the manager's grants, preemptions and restarts keep in sync.
//!
//! One cycle: think, declare the claim, request the planned resources one at
//! a time (pausing while holding each), run the critical section, release
//! everything, cool down. Every pause and every wait for a grant keeps
//! reading the inbox, so a stop or restart takes effect right away.

use crate::core::config::{Timings, WorkloadProfile};
use crate::core::engine::Command;
use crate::core::manager::ActorMessage;
use crate::core::types::{ProcessId, ProcessState, ResourceId};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use fxhash::FxHashSet;
use rand::Rng;
use rand::rngs::StdRng;
use std::ops::Range;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Why the current cycle was abandoned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Restart {
        epoch: u64,
        canonical: bool,
        retry: bool,
    },
    Stop,
}

pub struct ProcessActor {
    id: ProcessId,
    /// Private acquisition order; the first `per_cycle` entries are requested
    order: Vec<ResourceId>,
    per_cycle: usize,
    timings: Timings,
    speed: f64,
    epoch: u64,
    /// Skip the next think pause
    retry: bool,
    held: FxHashSet<ResourceId>,
    inbox: Receiver<ActorMessage>,
    engine: Sender<Command>,
    rng: StdRng,
}

impl ProcessActor {
    pub(crate) fn new(
        id: ProcessId,
        order: Vec<ResourceId>,
        resources: usize,
        profile: WorkloadProfile,
        speed: f64,
        inbox: Receiver<ActorMessage>,
        engine: Sender<Command>,
        rng: StdRng,
    ) -> Self {
        ProcessActor {
            id,
            per_cycle: profile.resources_per_cycle(resources).min(order.len()),
            order,
            timings: profile.timings(),
            speed,
            epoch: 0,
            retry: false,
            held: FxHashSet::default(),
            inbox,
            engine,
            rng,
        }
    }

    /// Run the actor on a dedicated, named thread
    pub(crate) fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("process-{}", self.id))
            .spawn(move || self.run())
    }

    /// Main loop; returns once the actor is stopped
    fn run(mut self) {
        self.log(format!(
            "started with order {}",
            self.order
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ));

        loop {
            match self.cycle() {
                Ok(()) => {}
                Err(Interrupt::Restart {
                    epoch,
                    canonical,
                    retry,
                }) => {
                    self.epoch = epoch;
                    self.retry = retry;
                    // The manager already took everything back
                    self.held.clear();
                    if canonical {
                        self.order.sort();
                        self.log("restarting with canonical order".to_string());
                    }
                }
                Err(Interrupt::Stop) => break,
            }
        }

        self.release_all();
        self.set_state(ProcessState::Aborted);
    }

    fn cycle(&mut self) -> Result<(), Interrupt> {
        self.set_state(ProcessState::Idle);
        if !std::mem::take(&mut self.retry) {
            self.pause(self.timings.think.clone())?;
        }

        let plan: Vec<ResourceId> = self.order.iter().take(self.per_cycle).copied().collect();
        self.send(Command::Claim {
            process: self.id,
            epoch: self.epoch,
            resources: plan.clone(),
        });

        for resource in plan {
            self.set_state(ProcessState::Requesting(resource));
            self.acquire(resource)?;
            self.set_state(ProcessState::Holding);
            self.pause(self.timings.hold.clone())?;
        }

        self.set_state(ProcessState::InCriticalSection);
        self.pause(self.timings.critical.clone())?;

        self.set_state(ProcessState::Releasing);
        self.release_all();
        self.pause(self.timings.cooldown.clone())?;
        Ok(())
    }

    /// Request `resource` and block until it is granted
    fn acquire(&mut self, resource: ResourceId) -> Result<(), Interrupt> {
        self.send(Command::Request {
            process: self.id,
            resource,
            epoch: self.epoch,
        });

        loop {
            match self.inbox.recv() {
                Ok(ActorMessage::Granted(granted)) if granted == resource => {
                    self.held.insert(resource);
                    return Ok(());
                }
                Ok(message) => self.handle(message)?,
                Err(_) => return Err(Interrupt::Stop),
            }
        }
    }

    /// Sleep for a random duration from `range`, scaled by the speed
    fn pause(&mut self, range: Range<u64>) -> Result<(), Interrupt> {
        let millis = if range.is_empty() {
            range.start
        } else {
            self.rng.random_range(range)
        };
        let mut deadline =
            Instant::now() + Duration::from_secs_f64(millis as f64 / 1000.0 / self.speed);

        loop {
            match self.inbox.recv_deadline(deadline) {
                // Rescale what is left of the pause to the new speed
                Ok(ActorMessage::SetSpeed(speed)) => {
                    let now = Instant::now();
                    let remaining = deadline.saturating_duration_since(now);
                    deadline = now + remaining.mul_f64(self.speed / speed);
                    self.speed = speed;
                }
                Ok(message) => self.handle(message)?,
                Err(RecvTimeoutError::Timeout) => return Ok(()),
                Err(RecvTimeoutError::Disconnected) => return Err(Interrupt::Stop),
            }
        }
    }

    /// Apply an inbox message that is not the grant currently awaited
    fn handle(&mut self, message: ActorMessage) -> Result<(), Interrupt> {
        match message {
            // The manager considers us the owner; track it so it gets released
            ActorMessage::Granted(resource) => {
                self.held.insert(resource);
            }
            ActorMessage::MustWait(_) => {}
            ActorMessage::SetSpeed(speed) => self.speed = speed,
            ActorMessage::Preempt(resource) => {
                if self.held.remove(&resource) {
                    self.log(format!("preempted: lost {resource}"));
                }
            }
            ActorMessage::Restart {
                epoch,
                canonical,
                retry,
            } => {
                return Err(Interrupt::Restart {
                    epoch,
                    canonical,
                    retry,
                });
            }
            ActorMessage::Stop => return Err(Interrupt::Stop),
        }
        Ok(())
    }

    fn release_all(&mut self) {
        let mut held: Vec<ResourceId> = self.held.drain().collect();
        held.sort();
        for resource in held {
            self.send(Command::Release {
                process: self.id,
                resource,
                epoch: self.epoch,
            });
        }
    }

    fn set_state(&self, state: ProcessState) {
        self.send(Command::StateChanged {
            process: self.id,
            state,
        });
    }

    fn log(&self, message: String) {
        self.send(Command::Log {
            process: self.id,
            message,
        });
    }

    /// The engine may already be gone during shutdown; that is not an error
    fn send(&self, command: Command) {
        let _ = self.engine.send(command);
    }
}
