//! Session: one participant's view of the shared world, advanced one fixed tick at a time
//!
//! Every external input (level changes, membership, peer packets) arrives
//! through the inbox and is applied at the start of a tick. The tick then runs
//! due spawn tasks, steps the locally-owned actor, publishes its snapshot,
//! reconciles replicas and finally lets the duplicate reconciler sweep.

use std::sync::Arc;
use std::time::Instant;

use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::actor::authority::{require_owned, ActorKind, Authority, AuthorityError};
use crate::actor::state::{Actor, ActorId, ActorState, ParticipantId};
use crate::actor::world::World;
use crate::config::{ActorConfig, CoreConfig};
use crate::hooks::{NoopHooks, SessionHooks};
use crate::metrics::Metrics;
use crate::movement::{self, GroundProbe, JumpOutcome, MoveInput, StepReport};
use crate::net::inbox::{CoreEvent, EventInbox, EventSender};
use crate::net::protocol::{decode, SnapshotEnvelope, WireMessage};
use crate::net::reconcile::{reconcile_all, ReconcileStats};
use crate::net::replication::{Accept, ReplicationPublisher, SnapshotTargets};
use crate::net::transport::{NullTransport, Transport};
use crate::spawn::coordinator::{
    CoordinatorNotice, Registration, RetryDecision, SpawnCoordinator, SpawnGrant,
};
use crate::spawn::duplicates::{DuplicateReconciler, SweepReport};
use crate::spawn::instantiate::{InstantiateError, Instantiator, LocalInstantiator, SpawnRequest};
use crate::spawn::level::{teardown_local, LevelChange, LevelDirective, LevelLifecycle};
use crate::spawn::scheduler::{retry_delay, ScheduledTask, TaskScheduler};
use crate::util::vec3::Vec3;

/// Where the local actor stands from the host's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LocalActorStatus {
    Active(ActorId),
    /// Connected in a permitted level; a spawn is scheduled or in flight
    Pending,
    /// Not connected, level not permitted, or eliminated
    Unavailable,
    /// Creation kept failing and spawning gave up
    RetriesExhausted,
}

/// Summary of one tick
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub tick: u64,
    pub movement: Option<StepReport>,
    pub reconciled: ReconcileStats,
    pub sweep: Option<SweepReport>,
}

pub struct Session {
    config: CoreConfig,
    actor_config: Arc<ActorConfig>,
    local: ParticipantId,
    world: World,
    coordinator: Arc<SpawnCoordinator>,
    level: LevelLifecycle,
    scheduler: TaskScheduler,
    reconciler: DuplicateReconciler,
    publisher: ReplicationPublisher,
    targets: SnapshotTargets,
    inbox: EventInbox,
    outbox: Vec<WireMessage>,
    transport: Arc<dyn Transport>,
    instantiator: Box<dyn Instantiator>,
    hooks: Arc<dyn SessionHooks>,
    metrics: Arc<Metrics>,
    /// Known participants in join order, the local one included once connected
    participants: Vec<ParticipantId>,
    connected: bool,
    /// Eliminated by game rules; no respawn until the next level change
    eliminated: bool,
    /// Local actor most recently broadcast with `ActorSpawned`
    announced: Option<ActorId>,
    tick: u64,
}

impl Session {
    pub fn new(config: CoreConfig, local: ParticipantId) -> Self {
        let actor_config = Arc::new(config.actor.clone());
        let level = LevelLifecycle::new(config.permitted_levels.clone(), config.settle_delay_ticks);
        let reconciler = DuplicateReconciler::new(config.reconcile_interval_ticks);
        let publisher = ReplicationPublisher::new(config.snapshot_interval_ticks);

        info!("Session created for participant {}", local);

        Self {
            config,
            actor_config,
            local,
            world: World::new(local),
            coordinator: Arc::new(SpawnCoordinator::new(local)),
            level,
            scheduler: TaskScheduler::new(),
            reconciler,
            publisher,
            targets: SnapshotTargets::new(),
            inbox: EventInbox::default(),
            outbox: Vec::new(),
            transport: Arc::new(NullTransport),
            instantiator: Box::new(LocalInstantiator),
            hooks: Arc::new(NoopHooks),
            metrics: Arc::new(Metrics::new()),
            participants: Vec::new(),
            connected: false,
            eliminated: false,
            announced: None,
            tick: 0,
        }
    }

    pub fn with_instantiator(mut self, instantiator: impl Instantiator + 'static) -> Self {
        self.instantiator = Box::new(instantiator);
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn SessionHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Install the transport once the inbox sender has been registered with it
    pub fn set_transport(&mut self, transport: Arc<dyn Transport>) {
        self.transport = transport;
    }

    /// Handle for network callbacks and collaborators to submit events
    pub fn sender(&self) -> EventSender {
        self.inbox.sender()
    }

    pub fn local_participant(&self) -> ParticipantId {
        self.local
    }

    pub fn coordinator(&self) -> &Arc<SpawnCoordinator> {
        &self.coordinator
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    /// Direct world access for hosts that create actors outside the coordinator
    ///
    /// Anything inserted here that violates the single-actor rule is removed by
    /// the next duplicate sweep.
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn current_level(&self) -> Option<&str> {
        self.level.current_level()
    }

    pub fn participants(&self) -> &[ParticipantId] {
        &self.participants
    }

    pub fn recent_grants(&self) -> Vec<SpawnGrant> {
        self.coordinator.recent_grants()
    }

    fn now(&self) -> f64 {
        self.tick as f64 / f64::from(self.config.tick_rate)
    }

    fn participant_index(&self) -> usize {
        self.participants
            .iter()
            .position(|p| *p == self.local)
            .unwrap_or(0)
    }

    fn spawn_position(&self) -> Vec3 {
        self.config.spawn_point(self.participant_index())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// The held local actor, if it is live
    pub fn local_actor(&self) -> Option<ActorId> {
        self.coordinator
            .held()
            .filter(|id| self.world.contains(*id))
    }

    pub fn local_actor_state(&self) -> Option<ActorState> {
        self.local_actor()
            .and_then(|id| self.world.get(id))
            .map(Actor::state)
    }

    pub fn actor_state(&self, id: ActorId) -> Option<ActorState> {
        self.world.get(id).map(Actor::state)
    }

    pub fn local_actor_status(&self) -> LocalActorStatus {
        if let Some(id) = self.local_actor() {
            return LocalActorStatus::Active(id);
        }
        if self.coordinator.retries_exhausted() {
            return LocalActorStatus::RetriesExhausted;
        }
        if self.connected && self.level.permission() && !self.eliminated {
            LocalActorStatus::Pending
        } else {
            LocalActorStatus::Unavailable
        }
    }

    // ------------------------------------------------------------------
    // Owner-only commands
    // ------------------------------------------------------------------

    /// Remove the local actor for the rest of this level
    pub fn eliminate(&mut self, id: ActorId) -> Result<(), AuthorityError> {
        require_owned(self.world.get_mut(id), id)?;

        if self.coordinator.held() == Some(id) {
            self.coordinator.unregister();
        }
        self.world.remove(id);
        self.eliminated = true;
        self.publisher.reset();
        self.outbox.push(WireMessage::ActorDespawned {
            actor_id: id,
            owner: self.local,
        });
        info!("Actor {} eliminated", id);
        Ok(())
    }

    pub fn teleport(&mut self, id: ActorId, position: Vec3) -> Result<(), AuthorityError> {
        let actor = require_owned(self.world.get_mut(id), id)?;
        actor.place(position);
        actor.grounded = false;
        debug!("Actor {} teleported to {:?}", id, position);
        Ok(())
    }

    /// Respawn at the last grounded position (or the spawn point)
    pub fn force_respawn(&mut self, id: ActorId) -> Result<(), AuthorityError> {
        let fallback = self.spawn_position();
        let actor = require_owned(self.world.get_mut(id), id)?;
        movement::respawn(actor, fallback);
        Metrics::incr(&self.metrics.floor_respawns);
        Ok(())
    }

    /// Ask the coordinator for the local actor on behalf of `requester`
    ///
    /// Returns true if this call created and registered it.
    pub fn request_local_spawn(&mut self, requester: &str) -> bool {
        let spawned = self.attempt_spawn(requester);
        self.forward_notices();
        self.flush_outbox();
        spawned
    }

    // ------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------

    pub fn tick(&mut self, input: &MoveInput, probe: &dyn GroundProbe) -> TickReport {
        let started = Instant::now();
        self.tick += 1;

        for event in self.inbox.drain() {
            self.handle_event(event);
        }

        self.run_due_tasks();
        let movement = self.step_local(input, probe);
        self.publish_local();

        let reconciled = reconcile_all(&mut self.world, &self.targets, self.config.dt());
        if reconciled.snapped > 0 {
            Metrics::add(&self.metrics.snap_corrections, reconciled.snapped);
            warn!(
                "Snapped {} replica(s) beyond max position error",
                reconciled.snapped
            );
        }

        let sweep = self.sweep_duplicates();
        self.sync_announcement();

        self.forward_notices();
        self.flush_outbox();
        self.metrics.record_tick_time(started.elapsed());

        TickReport {
            tick: self.tick,
            movement,
            reconciled,
            sweep,
        }
    }

    fn run_due_tasks(&mut self) {
        for task in self.scheduler.take_due(self.tick, self.level.generation()) {
            match task {
                ScheduledTask::SettledSpawn => {
                    if self.local_actor().is_none() {
                        self.attempt_spawn("level-settled");
                    }
                }
                ScheduledTask::RetrySpawn { attempt } => {
                    self.attempt_spawn(&format!("retry-{}", attempt));
                }
            }
        }
    }

    fn attempt_spawn(&mut self, requester: &str) -> bool {
        let created = self.spawn_once(requester);
        // Adoption of an existing actor changes the held reference without creating one
        self.sync_announcement();
        created
    }

    fn spawn_once(&mut self, requester: &str) -> bool {
        if !self.connected {
            debug!("Spawn from {} skipped: not connected", requester);
            return false;
        }
        if self.eliminated {
            debug!("Spawn from {} skipped: eliminated this level", requester);
            return false;
        }

        let permitted = self.level.permission();
        if !self
            .coordinator
            .request_spawn(requester, &self.world, permitted, self.tick)
        {
            Metrics::incr(&self.metrics.spawn_denials);
            return false;
        }
        Metrics::incr(&self.metrics.spawn_grants);

        let request = SpawnRequest {
            owner: self.local,
            position: self.spawn_position(),
            yaw: 0.0,
            requester: requester.to_string(),
            config: self.actor_config.clone(),
        };

        match self.instantiator.instantiate(&request) {
            Ok(mut actor) => {
                actor.owner = Some(self.local);
                let id = self.world.insert(actor);
                match self.coordinator.register_spawned(id, requester, &mut self.world) {
                    Registration::Accepted => {
                        Metrics::incr(&self.metrics.spawn_registrations);
                        true
                    }
                    Registration::Duplicate { .. } => {
                        Metrics::incr(&self.metrics.duplicate_rejections);
                        false
                    }
                    Registration::Missing => false,
                }
            }
            Err(e) => {
                Metrics::incr(&self.metrics.creation_failures);
                warn!("Actor creation for {} failed: {}", requester, e);
                self.schedule_retry(requester, &e);
                false
            }
        }
    }

    fn schedule_retry(&mut self, requester: &str, error: &InstantiateError) {
        let budget = match error {
            InstantiateError::Transient(_) => self.config.max_spawn_retries,
            InstantiateError::Rejected(_) => 0,
        };

        match self.coordinator.creation_failed(requester, budget) {
            RetryDecision::Retry { attempt } => {
                let mut delay = retry_delay(
                    attempt,
                    self.config.retry_backoff_ticks,
                    self.config.retry_backoff_cap_ticks,
                );
                if self.config.retry_jitter_ticks > 0 {
                    delay += rand::thread_rng().gen_range(0..=self.config.retry_jitter_ticks);
                }
                self.scheduler.schedule(
                    self.tick + delay,
                    self.level.generation(),
                    ScheduledTask::RetrySpawn { attempt },
                );
                info!("Retrying spawn in {} ticks (attempt {})", delay, attempt);
            }
            RetryDecision::Exhausted => {
                Metrics::incr(&self.metrics.retries_exhausted);
                self.hooks.local_actor_unavailable();
            }
        }
    }

    fn step_local(&mut self, input: &MoveInput, probe: &dyn GroundProbe) -> Option<StepReport> {
        let id = self.local_actor()?;
        let now = self.now();
        let dt = self.config.dt();
        let fallback = self.spawn_position();
        let actor = self.world.get_mut(id)?;

        if !actor.position.is_finite() || !actor.velocity.is_finite() {
            warn!("Fixed non-finite state for actor {}", id);
            movement::respawn(actor, fallback);
        }

        let report = movement::step(actor, input, probe, fallback, now, dt);

        match report.jump {
            Some(JumpOutcome::Accepted { jump_count, .. }) => {
                Metrics::incr(&self.metrics.jumps_accepted);
                if let Some(message) = self.publisher.jump_event(actor, jump_count) {
                    self.outbox.push(message);
                }
            }
            Some(JumpOutcome::Rejected(reason)) => {
                Metrics::incr(&self.metrics.jumps_rejected);
                debug!("Jump rejected for {}: {:?}", id, reason);
            }
            None => {}
        }
        if report.respawned {
            Metrics::incr(&self.metrics.floor_respawns);
            info!("Actor {} fell below the floor and was respawned", id);
        }

        Some(report)
    }

    fn publish_local(&mut self) {
        let Some(actor) = self.local_actor().and_then(|id| self.world.get(id)) else {
            return;
        };
        if let Some(envelope) = self.publisher.poll(actor, self.tick) {
            Metrics::incr(&self.metrics.snapshots_published);
            self.outbox.push(WireMessage::Snapshot(envelope));
        }
    }

    fn sweep_duplicates(&mut self) -> Option<SweepReport> {
        let active = self.connected && self.level.permission();
        let report =
            self.reconciler
                .run_if_due(self.tick, active, &mut self.world, &self.coordinator)?;
        Metrics::incr(&self.metrics.reconciler_sweeps);

        if !report.removed.is_empty() {
            Metrics::add(&self.metrics.reconciler_pruned, report.removed.len() as u64);
            for id in &report.removed {
                self.outbox.push(WireMessage::ActorDespawned {
                    actor_id: *id,
                    owner: self.local,
                });
            }
            // A new keeper is announced by the following sync instead
            if self.local_actor() == self.announced {
                self.announce_local();
            }
        }
        Some(report)
    }

    fn forward_notices(&mut self) {
        for notice in self.coordinator.take_notices() {
            match notice {
                CoordinatorNotice::StandDown(id) => self.hooks.spawn_completed(id),
                CoordinatorNotice::CameraFollow(id) => self.hooks.request_camera_follow(id),
            }
        }
    }

    fn flush_outbox(&mut self) {
        if !self.connected {
            self.outbox.clear();
            return;
        }
        for message in self.outbox.drain(..) {
            self.transport.broadcast(&message);
        }
    }

    /// Broadcast the held actor whenever it differs from the last one announced
    fn sync_announcement(&mut self) {
        let current = self.local_actor();
        if current == self.announced {
            return;
        }
        self.announced = current;
        if let Some(id) = current {
            self.publisher.reset();
            self.announce_local();
            debug!("Announced local actor {}", id);
        }
    }

    fn announce_local(&mut self) {
        let Some(actor) = self.local_actor().and_then(|id| self.world.get(id)) else {
            return;
        };
        self.outbox.push(WireMessage::ActorSpawned {
            actor_id: actor.id,
            owner: self.local,
            position: actor.position,
            yaw: actor.yaw,
        });
    }

    fn teardown(&mut self, reason: &str) {
        let removed = teardown_local(&mut self.world, &self.coordinator);
        for id in &removed {
            self.outbox.push(WireMessage::ActorDespawned {
                actor_id: *id,
                owner: self.local,
            });
        }
        if !removed.is_empty() {
            Metrics::add(&self.metrics.teardowns, removed.len() as u64);
            info!("Tore down {} local actor(s): {}", removed.len(), reason);
        }
        self.publisher.reset();
    }

    // ------------------------------------------------------------------
    // Inbound events
    // ------------------------------------------------------------------

    fn handle_event(&mut self, event: CoreEvent) {
        match event {
            CoreEvent::LevelChanged(change) => self.on_level_changed(&change),
            CoreEvent::ParticipantJoined(participant) => self.on_participant_joined(participant),
            CoreEvent::ParticipantLeft(participant) => self.on_participant_left(participant),
            CoreEvent::LocalConnected => self.on_connected(),
            CoreEvent::LocalDisconnected => self.on_disconnected(),
            CoreEvent::Wire(message) => self.handle_wire(message),
            CoreEvent::Packet(bytes) => match decode::<WireMessage>(&bytes) {
                Ok(message) => self.handle_wire(message),
                Err(e) => {
                    Metrics::incr(&self.metrics.packets_dropped);
                    debug!("Dropping undecodable packet ({} bytes): {}", bytes.len(), e);
                }
            },
        }
    }

    fn on_level_changed(&mut self, change: &LevelChange) {
        let directive = self.level.on_level_changed(change, self.tick);
        self.coordinator.cancel_pending();
        self.coordinator.reset_attempts();
        self.eliminated = false;

        match directive {
            LevelDirective::Teardown => self.teardown("level not permitted"),
            LevelDirective::SpawnAfterSettle {
                due_tick,
                generation,
            } => {
                if self.connected {
                    self.scheduler
                        .schedule(due_tick, generation, ScheduledTask::SettledSpawn);
                }
            }
        }
    }

    fn on_connected(&mut self) {
        self.connected = true;
        if !self.participants.contains(&self.local) {
            self.participants.push(self.local);
        }
        self.coordinator.reset_attempts();
        info!(
            "Participant {} connected as #{}",
            self.local,
            self.participant_index()
        );

        if let Some(LevelDirective::SpawnAfterSettle {
            due_tick,
            generation,
        }) = self.level.settle_directive(self.tick)
        {
            self.scheduler
                .schedule(due_tick, generation, ScheduledTask::SettledSpawn);
        }
    }

    fn on_disconnected(&mut self) {
        self.connected = false;
        let cancelled = self.scheduler.cancel_all();
        self.coordinator.cancel_pending();
        self.teardown("disconnected");

        let replicas: Vec<ActorId> = self
            .world
            .iter()
            .filter(|a| a.authority == Authority::Observed)
            .map(|a| a.id)
            .collect();
        for id in &replicas {
            self.world.remove(*id);
        }
        self.targets.clear();
        self.coordinator.clear_remote();
        self.participants.clear();

        info!(
            "Participant {} disconnected ({} tasks cancelled, {} replicas dropped)",
            self.local,
            cancelled,
            replicas.len()
        );
    }

    fn on_participant_joined(&mut self, participant: ParticipantId) {
        if participant == self.local {
            return;
        }
        if !self.participants.contains(&participant) {
            self.participants.push(participant);
        }
        info!("Participant {} joined", participant);
        // Late joiners never saw our spawn announcement
        self.announce_local();
    }

    fn on_participant_left(&mut self, participant: ParticipantId) {
        self.participants.retain(|p| *p != participant);
        let removed = self.world.remove_owned_by(participant);
        for id in &removed {
            self.targets.remove(*id);
        }
        self.coordinator.forget_participant(participant);
        info!(
            "Participant {} left, {} replica(s) removed",
            participant,
            removed.len()
        );
    }

    fn handle_wire(&mut self, message: WireMessage) {
        if message.owner() == self.local {
            debug!("Ignoring message claiming local ownership");
            return;
        }

        match message {
            WireMessage::ActorSpawned {
                actor_id,
                owner,
                position,
                yaw,
            } => self.on_remote_spawned(actor_id, owner, position, yaw),
            WireMessage::ActorDespawned { actor_id, owner } => {
                if self
                    .world
                    .get(actor_id)
                    .is_some_and(|a| a.is_owned_by(owner))
                {
                    self.world.remove(actor_id);
                    self.targets.remove(actor_id);
                    self.coordinator.unregister_remote(owner, actor_id);
                    debug!("Replica {} of {} despawned", actor_id, owner);
                }
            }
            WireMessage::Snapshot(envelope) => self.on_snapshot(&envelope),
            WireMessage::Jump {
                actor_id,
                owner,
                sequence,
                ..
            } => {
                if !self.is_replica_of(actor_id, owner) {
                    return;
                }
                match self.targets.accept_jump(actor_id, sequence) {
                    Accept::Stored => {
                        if let Some(actor) = self.world.get_mut(actor_id) {
                            actor.anim.jumping = true;
                        }
                    }
                    Accept::Stale => Metrics::incr(&self.metrics.snapshots_discarded),
                }
            }
        }
    }

    fn is_replica_of(&self, actor_id: ActorId, owner: ParticipantId) -> bool {
        self.world
            .get(actor_id)
            .is_some_and(|a| a.authority == Authority::Observed && a.is_owned_by(owner))
    }

    fn on_remote_spawned(&mut self, actor_id: ActorId, owner: ParticipantId, position: Vec3, yaw: f32) {
        if !self.connected || self.world.contains(actor_id) {
            return;
        }

        let replica = Actor::new(
            actor_id,
            Some(owner),
            ActorKind::Participant,
            position,
            yaw,
            self.actor_config.clone(),
        );
        self.world.insert(replica);
        debug!("Replica {} of {} created", actor_id, owner);

        if let Some(displaced) = self.coordinator.register_remote(owner, actor_id) {
            self.world.remove(displaced);
            self.targets.remove(displaced);
        }
    }

    fn on_snapshot(&mut self, envelope: &SnapshotEnvelope) {
        if !self.is_replica_of(envelope.actor_id, envelope.owner) {
            debug!("Snapshot for unknown replica {}", envelope.actor_id);
            return;
        }
        match self.targets.accept(envelope) {
            Accept::Stored => Metrics::incr(&self.metrics.snapshots_applied),
            Accept::Stale => {
                Metrics::incr(&self.metrics.snapshots_discarded);
                debug!(
                    "Discarded stale snapshot {} for {}",
                    envelope.sequence, envelope.actor_id
                );
            }
        }
    }
}
