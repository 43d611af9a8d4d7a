//! Parallel system dispatch.
//!
//! One dispatch partitions the runnable systems into program buckets. Each
//! bucket runs its systems strictly in order - descending priority, ties by
//! registration - while distinct buckets run on their own scoped threads.
//! Barriers order systems *across* buckets: every barrier is led by the
//! first system registered against it, and each tick the leader runs to
//! completion before any other member of the group starts.
//!
//! Storage safety is the reader/writer lock discipline: before a system's
//! transform runs, the dispatcher takes read locks on its declared
//! read-only components and write locks on its mutable ones, always in
//! component-id order so concurrent buckets cannot deadlock. Storage is
//! therefore stable for the whole row loop; structural changes issued by
//! transforms land in the [`MutationLog`] and apply between phases.
//!
//! A panic inside one row's transform is caught and logged; dispatch
//! continues with the next row.

use std::collections::{BTreeMap, HashMap};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, Mutex, RwLockReadGuard, RwLockWriteGuard};

use crate::ecs::command::MutationLog;
use crate::ecs::component::{ComponentId, Store, StoreSet};
use crate::ecs::entity::Entity;
use crate::ecs::event::Message;
use crate::ecs::system::{
    Frame, Instances, Join, SystemCell, SystemId, SystemSet, Trigger,
};
use crate::value::Var;

/// A per-tick barrier gate: members wait until the leader releases it.
struct Monitor {
    done: Mutex<bool>,
    released: Condvar,
}

impl Monitor {
    fn new() -> Self {
        Self {
            done: Mutex::new(false),
            released: Condvar::new(),
        }
    }

    fn wait(&self) {
        let mut done = self.done.lock().unwrap();
        while !*done {
            done = self.released.wait(done).unwrap();
        }
    }

    fn release(&self) {
        let mut done = self.done.lock().unwrap();
        *done = true;
        drop(done);
        self.released.notify_all();
    }
}

/// Stateless dispatch entry points; all state lives in the scene.
pub struct Dispatcher;

impl Dispatcher {
    /// Run every enabled loop-triggered system, bucket-parallel, honoring
    /// priorities and barriers.
    pub fn run_loop(systems: &SystemSet, stores: &StoreSet, commands: &MutationLog, dt: f64) {
        let runnable: Vec<Arc<SystemCell>> = systems
            .iter()
            .filter(|cell| cell.meta.trigger == Trigger::Loop && cell.is_enabled())
            .cloned()
            .collect();
        if runnable.is_empty() {
            return;
        }

        let mut buckets: BTreeMap<u32, Vec<Arc<SystemCell>>> = BTreeMap::new();
        for cell in runnable {
            buckets.entry(cell.meta.bucket).or_default().push(cell);
        }
        for list in buckets.values_mut() {
            list.sort_by(|a, b| {
                b.meta
                    .priority
                    .cmp(&a.meta.priority)
                    .then(a.meta.id.cmp(&b.meta.id))
            });
            Self::hoist_barrier_leaders(list, systems);
        }

        // Fresh barrier gates for this dispatch. A barrier whose leader is
        // not scheduled (disabled, or event-triggered) is released up front
        // so members never deadlock on it.
        let mut monitors: HashMap<String, Monitor> = HashMap::new();
        let scheduled: Vec<SystemId> = buckets
            .values()
            .flatten()
            .map(|cell| cell.meta.id)
            .collect();
        for cell in buckets.values().flatten() {
            for barrier in &cell.meta.barriers {
                monitors
                    .entry(barrier.clone())
                    .or_insert_with(Monitor::new);
            }
        }
        for (barrier, monitor) in &monitors {
            match systems.barrier_leader(barrier) {
                Some(leader) if scheduled.contains(&leader) => {}
                _ => monitor.release(),
            }
        }

        if buckets.len() == 1 {
            // One bucket has no cross-bucket contention; keep it on the
            // calling thread.
            let list = buckets.into_values().next().unwrap();
            Self::run_bucket(&list, systems, stores, commands, &monitors, dt);
            return;
        }

        let monitors = &monitors;
        crossbeam::thread::scope(|scope| {
            for (bucket, list) in &buckets {
                scope
                    .builder()
                    .name(format!("kestrel-bucket-{bucket}"))
                    .spawn(move |_| {
                        Self::run_bucket(list, systems, stores, commands, monitors, dt);
                    })
                    .expect("failed to spawn bucket thread");
            }
        })
        .expect("bucket thread panicked");
    }

    /// A barrier's leader runs before its members no matter what their
    /// priorities say. When a member would precede its leader inside the
    /// same bucket, move the leader ahead of it; otherwise the member would
    /// stall the bucket waiting on a leader scheduled behind it.
    fn hoist_barrier_leaders(list: &mut Vec<Arc<SystemCell>>, systems: &SystemSet) {
        let barriers: Vec<String> = list
            .iter()
            .flat_map(|cell| cell.meta.barriers.iter().cloned())
            .collect();
        for barrier in barriers {
            let Some(leader) = systems.barrier_leader(&barrier) else {
                continue;
            };
            let Some(leader_pos) = list.iter().position(|c| c.meta.id == leader) else {
                continue;
            };
            let first_member = list
                .iter()
                .position(|c| c.meta.id != leader && c.meta.barriers.iter().any(|b| *b == barrier));
            if let Some(member_pos) = first_member {
                if leader_pos > member_pos {
                    let cell = list.remove(leader_pos);
                    list.insert(member_pos, cell);
                }
            }
        }
    }

    fn run_bucket(
        list: &[Arc<SystemCell>],
        systems: &SystemSet,
        stores: &StoreSet,
        commands: &MutationLog,
        monitors: &HashMap<String, Monitor>,
        dt: f64,
    ) {
        for cell in list {
            // A member of a barrier group stalls until the group's leader
            // has finished; the leader itself passes straight through.
            for barrier in &cell.meta.barriers {
                if systems.barrier_leader(barrier) != Some(cell.meta.id) {
                    if let Some(monitor) = monitors.get(barrier) {
                        monitor.wait();
                    }
                }
            }
            Self::dispatch(cell, stores, commands, dt, None);
            for barrier in &cell.meta.barriers {
                if systems.barrier_leader(barrier) == Some(cell.meta.id) {
                    if let Some(monitor) = monitors.get(barrier) {
                        monitor.release();
                    }
                }
            }
        }
    }

    /// Deliver one message to its subscribers, in subscription order.
    /// Subscribers that are gone or not event-triggered are skipped
    /// silently.
    pub fn run_event(
        systems: &SystemSet,
        stores: &StoreSet,
        commands: &MutationLog,
        subscribers: &[SystemId],
        message: &Message,
        dt: f64,
    ) {
        for &id in subscribers {
            let Some(cell) = systems.get(id) else {
                continue;
            };
            if cell.meta.trigger != Trigger::Event || !cell.is_enabled() {
                continue;
            }
            Self::dispatch(cell, stores, commands, dt, Some(message));
        }
    }

    /// Run one system now: take its store locks, iterate the join, fire the
    /// callback.
    pub(crate) fn dispatch(
        cell: &SystemCell,
        stores: &StoreSet,
        commands: &MutationLog,
        dt: f64,
        message: Option<&Message>,
    ) {
        enum Guard<'a> {
            Read(RwLockReadGuard<'a, Store>),
            Write(RwLockWriteGuard<'a, Store>),
        }

        let mut runtime = cell.runtime.lock().unwrap();
        let runtime = &mut *runtime;

        // Locks are acquired in component-id order across both access
        // lists; concurrent buckets can never hold each other's next lock.
        let mut plan: Vec<(ComponentId, bool)> = cell
            .meta
            .reads
            .iter()
            .map(|&c| (c, false))
            .chain(cell.meta.writes.iter().map(|&c| (c, true)))
            .collect();
        plan.sort_by_key(|&(component, _)| component);

        let mut guards: Vec<(ComponentId, Guard)> = Vec::with_capacity(plan.len());
        for (component, write) in plan {
            let Some(lock) = stores.store(component) else {
                log::warn!(
                    "system {:?} references component {component:?} with no storage; skipped",
                    cell.meta.name
                );
                return;
            };
            let guard = if write {
                Guard::Write(lock.write().unwrap())
            } else {
                Guard::Read(lock.read().unwrap())
            };
            guards.push((component, guard));
        }

        // Re-order the guarded stores back into declared column order.
        let mut readable: HashMap<ComponentId, &Store> = HashMap::new();
        let mut writable: HashMap<ComponentId, &mut Store> = HashMap::new();
        for (component, guard) in guards.iter_mut() {
            match guard {
                Guard::Read(g) => {
                    readable.insert(*component, &**g);
                }
                Guard::Write(g) => {
                    writable.insert(*component, &mut **g);
                }
            }
        }
        let read_cols: Vec<&Store> = cell
            .meta
            .reads
            .iter()
            .map(|c| *readable.get(c).expect("read column was locked"))
            .collect();
        let mut write_cols: Vec<&mut Store> = cell
            .meta
            .writes
            .iter()
            .map(|c| writable.remove(c).expect("write column was locked"))
            .collect();

        let name = cell.meta.name.clone();
        let mut frame = Frame::new(dt, &mut runtime.state, message, commands);

        let proceed = match &runtime.predicate {
            Some(predicate) => predicate(&frame),
            None => true,
        };

        if proceed {
            if let Some(transform) = runtime.transform.as_mut() {
                Self::iterate(
                    transform,
                    &mut frame,
                    &read_cols,
                    &mut write_cols,
                    cell.meta.join,
                    cell.meta.cross_skip_collisions,
                    &name,
                );
            }
        }

        if let Some(callback) = runtime.callback.as_mut() {
            if catch_unwind(AssertUnwindSafe(|| callback(&mut frame))).is_err() {
                log::error!("system {name:?} callback panicked");
            }
        }
    }

    fn iterate(
        transform: &mut crate::ecs::system::TransformFn,
        frame: &mut Frame<'_>,
        read_cols: &[&Store],
        write_cols: &mut [&mut Store],
        join: Join,
        skip_collisions: bool,
        name: &str,
    ) {
        let total_cols = read_cols.len() + write_cols.len();

        let mut invoke = |row: &mut Instances<'_>, frame: &mut Frame<'_>| {
            if catch_unwind(AssertUnwindSafe(|| transform(row, frame))).is_err() {
                log::error!("system {name:?} transform panicked; continuing with next row");
            }
        };

        if total_cols == 0 {
            // No columns declared: the transform runs once per dispatch.
            let mut row = Instances::new(&[], Vec::new(), Vec::new());
            invoke(&mut row, frame);
            return;
        }

        match join {
            Join::Inner | Join::Left => {
                // Inner pivots on the smallest column; left walks the first
                // declared column.
                let domain: Vec<Entity> = {
                    let all: Vec<&Store> = read_cols
                        .iter()
                        .copied()
                        .chain(write_cols.iter().map(|s| &**s))
                        .collect();
                    let pivot = match join {
                        Join::Inner => *all.iter().min_by_key(|s| s.count()).unwrap(),
                        _ => all[0],
                    };
                    pivot.entities().to_vec()
                };

                for entity in domain {
                    if join == Join::Inner {
                        let in_all = read_cols.iter().all(|s| s.contains(entity))
                            && write_cols.iter().all(|s| s.contains(entity));
                        if !in_all {
                            continue;
                        }
                    }
                    let entities = vec![entity; total_cols];
                    let reads: Vec<Option<&Var>> =
                        read_cols.iter().map(|s| s.get(entity)).collect();
                    let writes: Vec<Option<&mut Var>> =
                        write_cols.iter_mut().map(|s| s.get_mut(entity)).collect();
                    let mut row = Instances::new(&entities, reads, writes);
                    invoke(&mut row, frame);
                }
            }
            Join::Cross => {
                let domains: Vec<Vec<Entity>> = read_cols
                    .iter()
                    .map(|s| s.entities().to_vec())
                    .chain(write_cols.iter().map(|s| s.entities().to_vec()))
                    .collect();
                if domains.iter().any(|d| d.is_empty()) {
                    return;
                }
                let mut cursor = vec![0usize; total_cols];
                'product: loop {
                    let entities: Vec<Entity> = cursor
                        .iter()
                        .zip(&domains)
                        .map(|(&i, d)| d[i])
                        .collect();

                    let collides = skip_collisions && {
                        let mut sorted = entities.clone();
                        sorted.sort();
                        sorted.windows(2).any(|w| w[0] == w[1])
                    };
                    if !collides {
                        let reads: Vec<Option<&Var>> = read_cols
                            .iter()
                            .enumerate()
                            .map(|(i, s)| s.get(entities[i]))
                            .collect();
                        let offset = read_cols.len();
                        let writes: Vec<Option<&mut Var>> = write_cols
                            .iter_mut()
                            .enumerate()
                            .map(|(i, s)| s.get_mut(entities[offset + i]))
                            .collect();
                        let mut row = Instances::new(&entities, reads, writes);
                        invoke(&mut row, frame);
                    }

                    // Advance the odometer, least-significant column last.
                    let mut column = total_cols;
                    loop {
                        if column == 0 {
                            break 'product;
                        }
                        column -= 1;
                        cursor[column] += 1;
                        if cursor[column] < domains[column].len() {
                            break;
                        }
                        cursor[column] = 0;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::component::{ComponentConfig, Definitions};
    use crate::ecs::entity::Manager;
    use crate::ecs::system::SystemConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fixture(component_names: &[&str]) -> (Definitions, StoreSet, Vec<ComponentId>) {
        let mut definitions = Definitions::new(16);
        let ids = component_names
            .iter()
            .map(|name| definitions.create(ComponentConfig::new(*name)).unwrap())
            .collect();
        let mut stores = StoreSet::new();
        stores.ensure(definitions.len());
        (definitions, stores, ids)
    }

    #[test]
    fn bucket_runs_by_priority_then_registration() {
        let (_, stores, _) = fixture(&[]);
        let commands = MutationLog::new();
        let mut systems = SystemSet::new();
        let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        for (name, priority) in [("low", -5i16), ("high", 5), ("mid_a", 0), ("mid_b", 0)] {
            let order = Arc::clone(&order);
            systems
                .register(SystemConfig::new(name).priority(priority).transform(
                    move |_, _| {
                        order.lock().unwrap().push(name);
                    },
                ))
                .unwrap();
        }

        Dispatcher::run_loop(&systems, &stores, &commands, 0.016);

        // Descending priority; the mids tie and keep registration order.
        assert_eq!(*order.lock().unwrap(), vec!["high", "mid_a", "mid_b", "low"]);
    }

    #[test]
    fn disabled_systems_do_not_run() {
        let (_, stores, _) = fixture(&[]);
        let commands = MutationLog::new();
        let mut systems = SystemSet::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        let id = systems
            .register(SystemConfig::new("toggled").transform(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        systems.set_enabled(id, false).unwrap();
        Dispatcher::run_loop(&systems, &stores, &commands, 0.016);
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        systems.set_enabled(id, true).unwrap();
        Dispatcher::run_loop(&systems, &stores, &commands, 0.016);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_predicate_skips_transform_but_not_callback() {
        let (_, stores, _) = fixture(&[]);
        let commands = MutationLog::new();
        let mut systems = SystemSet::new();
        let transforms = Arc::new(AtomicUsize::new(0));
        let callbacks = Arc::new(AtomicUsize::new(0));

        let transform_count = Arc::clone(&transforms);
        let callback_count = Arc::clone(&callbacks);
        systems
            .register(
                SystemConfig::new("gated")
                    .predicate(|_| false)
                    .transform(move |_, _| {
                        transform_count.fetch_add(1, Ordering::SeqCst);
                    })
                    .callback(move |_| {
                        callback_count.fetch_add(1, Ordering::SeqCst);
                    }),
            )
            .unwrap();

        Dispatcher::run_loop(&systems, &stores, &commands, 0.016);

        assert_eq!(transforms.load(Ordering::SeqCst), 0);
        assert_eq!(callbacks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_transform_keeps_iterating_rows() {
        let (_, stores, ids) = fixture(&["tag"]);
        let commands = MutationLog::new();
        let mut systems = SystemSet::new();
        let mut manager = Manager::new();

        {
            let lock = stores.store(ids[0]).unwrap();
            let mut store = lock.write().unwrap();
            for i in 0..4i64 {
                store.insert(manager.create(), Var::Int(i));
            }
        }

        let survived = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&survived);
        systems
            .register(
                SystemConfig::new("flaky")
                    .reads([ids[0]])
                    .transform(move |row, _| {
                        if row.read(0).as_int() == Some(1) {
                            panic!("bad row");
                        }
                        counter.fetch_add(1, Ordering::SeqCst);
                    }),
            )
            .unwrap();

        Dispatcher::run_loop(&systems, &stores, &commands, 0.016);

        // One row panicked, the other three completed.
        assert_eq!(survived.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn structural_changes_from_transforms_queue_in_the_log() {
        let (_, stores, ids) = fixture(&["tag"]);
        let commands = MutationLog::new();
        let mut systems = SystemSet::new();
        let mut manager = Manager::new();

        let e = manager.create();
        stores
            .store(ids[0])
            .unwrap()
            .write()
            .unwrap()
            .insert(e, Var::Nil);

        let tag = ids[0];
        systems
            .register(
                SystemConfig::new("remover")
                    .reads([tag])
                    .transform(move |row, frame| {
                        frame.remove(row.entity(), tag);
                    }),
            )
            .unwrap();

        Dispatcher::run_loop(&systems, &stores, &commands, 0.016);

        // Storage untouched; the change waits in the log.
        assert_eq!(stores.store(tag).unwrap().read().unwrap().count(), 1);
        assert_eq!(commands.len(), 1);
    }
}
