//! The universe: the engine's root context object.
//!
//! A [`Universe`] owns everything: the component declaration table, the
//! scene stack, the worker pool, the coroutine scheduler and the tick
//! clock. It is an explicit context passed around by the host - there is no
//! process-wide instance.
//!
//! # The tick
//!
//! [`Universe::tick`] advances the active scene through the fixed phase
//! order; no phase overlaps the next:
//!
//! 1. **Event flush** - deferred event queues drain to their subscribers,
//!    in event-creation order
//! 2. **Pre-loop hook**
//! 3. **System dispatch** - bucket-parallel, priority and barrier ordered
//! 4. **Coroutine step** - the sync driver advances every ready coroutine
//!    by one yield
//! 5. **Deferred mutations** - queued add/remove/destroy operations apply
//!    in FIFO order; component destroy hooks fire here
//! 6. **Post-loop hook** - and the renderer's frame hook
//!
//! Component storage is stable for reads through phases 1-4; structural
//! changes queued there become visible in phase 5.

use crate::coro::{Coro, CoroScheduler};
use crate::core::clock::TickClock;
use crate::core::config::{Config, RendererPlugin};
use crate::core::timer::FrameTimer;
use crate::ecs::command::Mutation;
use crate::ecs::component::{ComponentConfig, ComponentId, Definitions};
use crate::ecs::entity::Entity;
use crate::ecs::event::{EventId, Message};
use crate::ecs::schedule::Dispatcher;
use crate::ecs::system::{SystemConfig, SystemId, Trigger};
use crate::error::{Error, Result};
use crate::scene::{Scene, SceneHook};
use crate::tasks::{Executor, Task, TaskId};
use crate::value::{Schema, Var, parse};

/// A handle to a created scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SceneHandle(usize);

/// What one pass of the loop reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStatus {
    /// The universe ticked and expects another pass.
    Running,
    /// Stop was called; this run is over.
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Dead,
    Running,
    Stopped,
}

/// The host's per-pass hooks and user argument.
#[derive(Default)]
pub struct LoopCallbacks {
    /// Runs before system dispatch (phase 2).
    pub on_pre: Option<Box<dyn FnMut(f64, &mut Var)>>,
    /// Runs zero or more times per pass on the fixed timestep, before the
    /// tick phases.
    pub on_fixed: Option<Box<dyn FnMut(f64, &mut Var)>>,
    /// Runs after deferred mutations (phase 6).
    pub on_post: Option<Box<dyn FnMut(f64, &mut Var)>>,
    /// User argument handed to every hook.
    pub arg: Var,
}

/// The engine's root context.
pub struct Universe {
    config: Config,
    definitions: Definitions,
    /// Scene arena; `None` marks destroyed slots.
    scenes: Vec<Option<Scene>>,
    /// Bottom-to-top scene stack; the top scene is the one that ticks.
    stack: Vec<SceneHandle>,
    executor: Executor,
    coros: CoroScheduler,
    clock: TickClock,
    frame_timer: FrameTimer,
    fixed_accumulator: f64,
    renderer: Option<Box<dyn RendererPlugin>>,
    state: RunState,
}

impl Universe {
    /// Build a universe from a configuration. A base scene named `"main"`
    /// is created and pushed, so the stack is never empty.
    pub fn init(mut config: Config) -> Result<Universe> {
        let workers = match config.scheduler.max_async_tasks {
            0 => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            n => n,
        };
        let renderer = config.renderer.take();
        let mut universe = Universe {
            definitions: Definitions::new(config.max_components),
            scenes: Vec::new(),
            stack: Vec::new(),
            executor: Executor::new(workers),
            coros: CoroScheduler::new(config.scheduler.coro_stack_size),
            clock: TickClock::new(),
            frame_timer: FrameTimer::new(120),
            fixed_accumulator: 0.0,
            renderer,
            state: RunState::Dead,
            config,
        };
        let base = universe.scene_create("main");
        universe.stack.push(base);
        log::info!(
            "universe {:?} initialized with {workers} workers",
            universe.config.title
        );
        Ok(universe)
    }

    /// Bring the universe up. Fails with
    /// [`BadRunState`](Error::BadRunState) unless it has never run.
    pub fn start(&mut self) -> Result<()> {
        if self.state != RunState::Dead {
            return Err(Error::BadRunState);
        }
        self.state = RunState::Running;
        if let Some(renderer) = &mut self.renderer {
            renderer.on_start();
        }
        log::info!("universe {:?} started", self.config.title);
        Ok(())
    }

    /// Request an orderly shutdown: the next loop pass reports
    /// [`LoopStatus::Done`].
    pub fn stop(&mut self) {
        if self.state != RunState::Running {
            return;
        }
        self.state = RunState::Stopped;
        if let Some(renderer) = &mut self.renderer {
            renderer.on_stop();
        }
        log::info!("universe {:?} stopped", self.config.title);
    }

    /// `true` between [`start`](Universe::start) and [`stop`](Universe::stop).
    pub fn is_running(&self) -> bool {
        self.state == RunState::Running
    }

    /// The configuration the universe was built with (renderer excluded -
    /// the universe owns that).
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn active(&self) -> &Scene {
        let handle = *self.stack.last().expect("scene stack is never empty");
        self.scenes[handle.0].as_ref().expect("active scene exists")
    }

    // ==================== Components ====================

    /// Register a component type; its id is stable for the universe
    /// lifetime.
    pub fn component_create(&mut self, config: ComponentConfig) -> Result<ComponentId> {
        let id = self.definitions.create(config)?;
        let definitions = &self.definitions;
        for scene in self.scenes.iter_mut().flatten() {
            scene.ensure_storage(definitions);
        }
        Ok(id)
    }

    /// Register a schema-backed component named after the schema.
    pub fn schema_component(&mut self, schema: &Schema) -> Result<ComponentId> {
        self.component_create(ComponentConfig::new(schema.name()).schema(schema.clone()))
    }

    /// Look a component up by name.
    pub fn component_find(&self, name: &str) -> Option<ComponentId> {
        self.definitions.find(name)
    }

    /// Instance count in the active scene.
    pub fn component_count(&self, component: ComponentId) -> usize {
        self.active().count(component)
    }

    /// Clone an instance payload from the active scene. `None` for stale
    /// entities and absent instances.
    pub fn component_get(&self, component: ComponentId, entity: Entity) -> Option<Var> {
        self.active().get(component, entity)
    }

    /// Load and register every schema record in a file under the scripts
    /// directory.
    pub fn load_schemas(&self, filename: &str) -> Result<Vec<Schema>> {
        parse::load_schema_file(&self.config.resources.scripts_dir().join(filename))
    }

    // ==================== Entities ====================

    /// Create an entity in the active scene.
    pub fn entity_create(&mut self) -> Entity {
        let Universe { scenes, stack, .. } = self;
        let handle = *stack.last().expect("scene stack is never empty");
        scenes[handle.0]
            .as_mut()
            .expect("active scene exists")
            .spawn()
    }

    /// Queue destroying an entity. Destruction is deferred: hooks fire and
    /// the slot frees during the next tick's deferred-mutation phase (or at
    /// scene teardown). Stale handles are silent no-ops.
    pub fn entity_destroy(&mut self, entity: Entity) {
        self.active().mutations.push(Mutation::Destroy { entity });
    }

    /// `true` when the handle refers to a live entity in the active scene.
    pub fn entity_alive(&self, entity: Entity) -> bool {
        self.active().entities.is_alive(entity)
    }

    /// Attach a component instance immediately. Inside a system transform
    /// use [`Frame::add`](crate::ecs::system::Frame::add) instead, which
    /// defers.
    pub fn entity_add(
        &mut self,
        entity: Entity,
        component: ComponentId,
        payload: Var,
    ) -> Result<()> {
        let Universe {
            scenes,
            stack,
            definitions,
            ..
        } = self;
        let handle = *stack.last().expect("scene stack is never empty");
        scenes[handle.0]
            .as_mut()
            .expect("active scene exists")
            .attach_now(definitions, entity, component, payload)
    }

    /// Detach a component instance immediately; its destroy hook fires on
    /// the spot. Inside a system transform use
    /// [`Frame::remove`](crate::ecs::system::Frame::remove) instead.
    pub fn entity_remove(&mut self, entity: Entity, component: ComponentId) -> Result<()> {
        let Universe {
            scenes,
            stack,
            definitions,
            ..
        } = self;
        let handle = *stack.last().expect("scene stack is never empty");
        let scene = scenes[handle.0].as_mut().expect("active scene exists");
        let orphans = scene.detach_now(definitions, entity, component)?;
        for orphan in orphans {
            scene.destroy_entity_now(definitions, orphan);
        }
        Ok(())
    }

    /// `true` when the entity is live and owns the component.
    pub fn entity_has(&self, entity: Entity, component: ComponentId) -> bool {
        self.active().has(entity, component)
    }

    // ==================== Events ====================

    /// Create an event channel in the active scene.
    pub fn event_create(&mut self, name: impl Into<String>, message_size: usize) -> EventId {
        let Universe { scenes, stack, .. } = self;
        let handle = *stack.last().expect("scene stack is never empty");
        scenes[handle.0]
            .as_mut()
            .expect("active scene exists")
            .bus
            .create(name, message_size)
    }

    /// Subscribe a system to an event. The system must be declared with
    /// [`Trigger::Event`]; loop systems cannot subscribe.
    pub fn event_subscribe(&mut self, event: EventId, system: SystemId) -> Result<()> {
        let Universe { scenes, stack, .. } = self;
        let handle = *stack.last().expect("scene stack is never empty");
        let scene = scenes[handle.0].as_mut().expect("active scene exists");
        let cell = scene.systems.get(system).ok_or(Error::DoesNotExist)?;
        if cell.trigger() != Trigger::Event {
            return Err(Error::IncompatibleDataTypes);
        }
        scene.bus.subscribe(event, system)
    }

    /// Queue a message; subscribers see it at the start of the next tick.
    pub fn event_send(&mut self, event: EventId, payload: Var) -> Result<()> {
        let timestamp = self.clock.timestamp_nanos();
        self.active().bus.send(event, payload, Some(timestamp))
    }

    /// Deliver a message to the event's subscribers immediately, bypassing
    /// the deferred queue.
    pub fn event_send_sync(&mut self, event: EventId, payload: Var) -> Result<()> {
        let timestamp = self.clock.timestamp_nanos();
        let dt = self.clock.delta_seconds();
        let scene = self.active();
        if event.index() >= scene.bus.len() {
            return Err(Error::DoesNotExist);
        }
        let message = Message {
            payload,
            timestamp: Some(timestamp),
        };
        let subscribers = scene.bus.subscribers(event).to_vec();
        Dispatcher::run_event(
            &scene.systems,
            &scene.stores,
            &scene.mutations,
            &subscribers,
            &message,
            dt,
        );
        Ok(())
    }

    // ==================== Systems ====================

    /// Register a system in the active scene.
    pub fn system_create(&mut self, config: SystemConfig) -> Result<SystemId> {
        let Universe { scenes, stack, .. } = self;
        let handle = *stack.last().expect("scene stack is never empty");
        scenes[handle.0]
            .as_mut()
            .expect("active scene exists")
            .systems
            .register(config)
    }

    /// Include or exclude a system from dispatch.
    pub fn system_set_enabled(&self, system: SystemId, enabled: bool) -> Result<()> {
        self.active().systems.set_enabled(system, enabled)
    }

    // ==================== Coroutines ====================

    /// Schedule a sync coroutine on the active scene. It is staged until
    /// the next tick boundary, then advances one yield per tick.
    pub fn coro_sync<F>(&mut self, entry: F, arg: Var) -> Coro
    where
        F: FnOnce(Var) -> Var + Send + 'static,
    {
        let coro = self.coros.create_sync(entry, arg);
        self.active().coros_staged.lock().unwrap().push(coro);
        coro
    }

    /// Schedule an async coroutine on the worker pool. Thread-safe with
    /// respect to scenes; async coroutines are universe-global.
    pub fn coro_async<F>(&self, entry: F, arg: Var) -> Coro
    where
        F: FnOnce(Var) -> Var + Send + 'static,
    {
        self.coros.schedule_async(&self.executor, entry, arg)
    }

    /// Resume a coroutine with a value; returns its next yield or final
    /// result.
    pub fn coro_call(&self, coro: Coro, value: Var) -> Var {
        self.coros.call(coro, value)
    }

    /// Block until a coroutine completes and return its result.
    pub fn coro_await(&self, coro: Coro) -> Var {
        self.coros.await_coro(coro)
    }

    /// Read a coroutine's result slot without blocking: `Nil` until it
    /// completes.
    pub fn coro_peek(&self, coro: Coro) -> Var {
        self.coros.peek(coro)
    }

    /// `true` once a coroutine has completed.
    pub fn coro_done(&self, coro: Coro) -> bool {
        self.coros.is_done(coro)
    }

    // ==================== Tasks ====================

    /// Run a joinable job on the worker pool.
    pub fn task_async<F>(&self, f: F) -> Task
    where
        F: FnOnce(TaskId) -> Var + Send + 'static,
    {
        self.executor.submit(f)
    }

    // ==================== Scenes ====================

    /// Create a scene. It holds state but does not tick until pushed.
    pub fn scene_create(&mut self, name: impl Into<String>) -> SceneHandle {
        let mut scene = Scene::new(name);
        scene.ensure_storage(&self.definitions);
        self.scenes.push(Some(scene));
        SceneHandle(self.scenes.len() - 1)
    }

    /// Make a scene the active one. The previous top keeps its state but
    /// stops ticking; its sync coroutines pause with it.
    pub fn scene_push(&mut self, handle: SceneHandle) -> Result<()> {
        let Some(Some(scene)) = self.scenes.get_mut(handle.0) else {
            return Err(Error::DoesNotExist);
        };
        if self.stack.contains(&handle) {
            return Err(Error::AlreadyExists);
        }
        scene.ensure_storage(&self.definitions);
        log::debug!("scene {:?} pushed", scene.name());
        self.stack.push(handle);
        Ok(())
    }

    /// Destroy the top scene and resume the one beneath it. Popping the
    /// last scene is a no-op reporting [`Error::Unknown`].
    pub fn scene_pop(&mut self) -> Result<()> {
        if self.stack.len() <= 1 {
            return Err(Error::Unknown);
        }
        let handle = self.stack.pop().expect("stack checked non-empty");
        let mut scene = self.scenes[handle.0]
            .take()
            .expect("stacked scene exists");
        scene.teardown(&self.definitions);
        Ok(())
    }

    /// Register the hook fired after a popped scene's entities and systems
    /// are torn down.
    pub fn scene_on_destroy(&mut self, handle: SceneHandle, hook: SceneHook) -> Result<()> {
        let Some(Some(scene)) = self.scenes.get_mut(handle.0) else {
            return Err(Error::DoesNotExist);
        };
        scene.on_destroy = Some(hook);
        Ok(())
    }

    /// The active scene's name.
    pub fn scene_name(&self) -> &str {
        self.active().name()
    }

    // ==================== The loop ====================

    /// Advance one tick with an explicit delta. Hosts normally call
    /// [`loop_once`](Universe::loop_once); an explicit delta is for
    /// deterministic stepping.
    pub fn tick(&mut self, dt: f64, callbacks: &mut LoopCallbacks) -> Result<LoopStatus> {
        match self.state {
            RunState::Running => {}
            RunState::Stopped => return Ok(LoopStatus::Done),
            RunState::Dead => return Err(Error::BadRunState),
        }

        let Universe {
            scenes,
            stack,
            definitions,
            coros,
            renderer,
            ..
        } = self;
        let handle = *stack.last().expect("scene stack is never empty");
        let scene = scenes[handle.0].as_mut().expect("active scene exists");
        scene.ensure_storage(definitions);
        let LoopCallbacks {
            on_pre,
            on_post,
            arg,
            ..
        } = callbacks;

        // Phase 1: flush deferred events, in creation order. Structural
        // calls made by subscribers defer to phase 5.
        let events: Vec<EventId> = scene.bus.ids().collect();
        for event in events {
            for message in scene.bus.drain(event) {
                let subscribers = scene.bus.subscribers(event).to_vec();
                Dispatcher::run_event(
                    &scene.systems,
                    &scene.stores,
                    &scene.mutations,
                    &subscribers,
                    &message,
                    dt,
                );
            }
        }

        // Phase 2: pre-loop hook.
        if let Some(hook) = on_pre {
            hook(dt, arg);
        }

        // Phase 3: system dispatch.
        Dispatcher::run_loop(&scene.systems, &scene.stores, &scene.mutations, dt);

        // Phase 4: advance sync coroutines one yield.
        {
            let mut staged = scene.coros_staged.lock().unwrap();
            coros.run_sync(&mut scene.coros_active, &mut staged);
        }

        // Phase 5: apply deferred mutations in FIFO order.
        scene.apply_mutations(definitions);

        // Phase 6: post-loop hook and the renderer frame.
        if let Some(hook) = on_post {
            hook(dt, arg);
        }
        if let Some(renderer) = renderer {
            renderer.on_frame(dt);
        }

        Ok(LoopStatus::Running)
    }

    /// Advance one pass of the real-time loop: capture the clock delta,
    /// run any due fixed updates, then tick.
    pub fn loop_once(&mut self, callbacks: &mut LoopCallbacks) -> Result<LoopStatus> {
        let dt = self.clock.advance();
        self.frame_timer
            .record(std::time::Duration::from_secs_f64(dt));
        let step = self.config.fixed_timestep;
        if step > 0.0 && callbacks.on_fixed.is_some() {
            self.fixed_accumulator += dt;
            while self.fixed_accumulator >= step {
                if let Some(hook) = &mut callbacks.on_fixed {
                    hook(step, &mut callbacks.arg);
                }
                self.fixed_accumulator -= step;
            }
        }
        self.tick(dt, callbacks)
    }

    /// Rolling frame-time statistics for the recent loop passes.
    pub fn frame_timing(&self) -> &FrameTimer {
        &self.frame_timer
    }

    /// Drive [`loop_once`](Universe::loop_once) until stop is requested.
    pub fn run(&mut self, callbacks: &mut LoopCallbacks) -> Result<()> {
        loop {
            match self.loop_once(callbacks)? {
                LoopStatus::Running => {}
                LoopStatus::Done => return Ok(()),
            }
        }
    }
}
