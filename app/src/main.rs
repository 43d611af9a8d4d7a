//! Demo host: a bounded simulation driving the engine end to end.
//!
//! Declares schema-backed components, spawns a small field of particles,
//! registers integration and lifetime systems, wires an event channel, and
//! lets a sync coroutine narrate progress across frames before requesting
//! shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use kestrel_engine::coro::yield_value;
use kestrel_engine::core::{Config, LoopCallbacks, Universe};
use kestrel_engine::ecs::system::{SystemConfig, Trigger};
use kestrel_engine::value::{Schema, SchemaBuilder, Tag, Var};

mod logger;

const PARTICLES: i64 = 64;
const SIM_TICKS: u64 = 120;

fn main() {
    logger::init();

    if let Err(err) = run() {
        log::error!("simulation failed: {err} (code {})", err.code());
        std::process::exit(1);
    }
}

fn run() -> kestrel_engine::Result<()> {
    let particle_schema = Schema::create(
        "Particle",
        SchemaBuilder::new()
            .scalar("x", Tag::Double)
            .scalar("y", Tag::Double)
            .scalar("ttl", Tag::Int),
    )?;
    let velocity_schema = Schema::create(
        "Velocity",
        SchemaBuilder::new()
            .scalar("dx", Tag::Double)
            .scalar("dy", Tag::Double),
    )?;

    let mut universe = Universe::init(Config {
        title: "kestrel demo".into(),
        ..Config::default()
    })?;

    let particle = universe.schema_component(&particle_schema)?;
    let velocity = universe.schema_component(&velocity_schema)?;
    let expired = universe.event_create("particle_expired", 8);

    for i in 0..PARTICLES {
        let e = universe.entity_create();
        universe.entity_add(
            e,
            particle,
            particle_schema.instantiate(vec![
                Var::Double(i as f64),
                Var::Double(0.0),
                Var::Int(20 + i % 50),
            ])?,
        )?;
        universe.entity_add(
            e,
            velocity,
            velocity_schema.instantiate(vec![
                Var::Double(0.1 * (i % 7) as f64),
                Var::Double(-0.5),
            ])?,
        )?;
    }

    // Advect particles by their velocity each tick.
    universe.system_create(
        SystemConfig::new("advect")
            .reads([velocity])
            .writes([particle])
            .priority(10)
            .transform(|row, frame| {
                let dt = frame.dt;
                let vel = row.read(0).clone();
                let vel = vel.as_struct().unwrap();
                let dx = vel.at("dx").unwrap().as_double().unwrap();
                let dy = vel.at("dy").unwrap().as_double().unwrap();
                let body = row.write(0).unwrap();
                for (key, dv) in [("x", dx), ("y", dy)] {
                    let slot = body.struct_at(key).unwrap();
                    let current = slot.as_double().unwrap();
                    *slot = Var::Double(current + dv * dt);
                }
            }),
    )?;

    // Age particles; retire the ones whose lifetime ran out.
    universe.system_create(
        SystemConfig::new("age")
            .writes([particle])
            .transform(|row, frame| {
                let entity = row.entity();
                let body = row.write(0).unwrap();
                let ttl = body.struct_at("ttl").unwrap();
                let remaining = ttl.as_int().unwrap() - 1;
                *ttl = Var::Int(remaining);
                if remaining <= 0 {
                    frame.destroy(entity);
                }
            }),
    )?;

    // Count retirements through the event channel.
    let retired = Arc::new(AtomicUsize::new(0));
    let retired_counter = Arc::clone(&retired);
    let on_expired = universe.system_create(
        SystemConfig::new("expired_listener")
            .trigger(Trigger::Event)
            .transform(move |_, frame| {
                let count = frame.message.unwrap().payload.as_uint().unwrap_or(0);
                retired_counter.fetch_add(count as usize, Ordering::SeqCst);
            }),
    )?;
    universe.event_subscribe(expired, on_expired)?;

    // A coroutine that reports population every few frames.
    let narrator = universe.coro_sync(
        |_| {
            for frame_group in 0i64.. {
                let resumed = yield_value(Var::Int(frame_group));
                if resumed.as_bool() == Some(true) {
                    break;
                }
            }
            Var::from("narration over")
        },
        Var::Nil,
    );

    universe.start()?;
    log::info!(
        "simulating {PARTICLES} particles for {SIM_TICKS} ticks in scene {:?}",
        universe.scene_name()
    );

    let mut callbacks = LoopCallbacks::default();
    for tick in 0..SIM_TICKS {
        let before = universe.component_count(particle);
        universe.loop_once(&mut callbacks)?;
        let after = universe.component_count(particle);

        if after < before {
            universe.event_send(expired, Var::Uint((before - after) as u64))?;
        }
        if tick % 30 == 0 {
            log::info!("tick {tick}: {after} particles alive");
        }
        if after == 0 {
            break;
        }
    }

    // Let the narrator observe the stop request, then shut down.
    universe.coro_call(narrator, Var::Bool(true));
    log::info!(
        "narrator finished: {:?}",
        universe.coro_peek(narrator).as_str().unwrap_or("")
    );

    universe.stop();
    log::info!(
        "done: {} particles retired, {} still alive, {:.2?} avg frame",
        retired.load(Ordering::SeqCst),
        universe.component_count(particle),
        universe.frame_timing().average()
    );
    Ok(())
}
