/// The `decay` demo world.
pub mod decay;
/// The `wander` demo world.
pub mod wander;

use std::rc::Rc;
use std::time::Duration;

use colored::Colorize;
use tokio::sync::Notify;
use tokio::task::LocalSet;
use transvolve_core::{Component, Entity, Subscribable, Subscription};
use transvolve_engine::{
    Engine, EngineChannel, EngineConfig, EngineError, EngineEvent, System, SystemChannel,
    SystemEvent,
};

/// Create an engine ticking every `interval_ms` milliseconds that prints
/// every error it publishes to stderr.
fn new_engine(interval_ms: u64) -> Result<Engine, String> {
    let engine =
        Engine::new(EngineConfig::default().with_interval(Duration::from_millis(interval_ms)))
            .map_err(|e| format!("engine setup failed: {e}"))?;
    engine
        .subscribe(EngineChannel::Error, |event| {
            if let EngineEvent::Error(error) = event {
                eprintln!("  {} {error}", "warning:".yellow().bold());
            }
        })
        .map_err(|e| e.to_string())?;
    Ok(engine)
}

/// Print every entity entering or leaving `system`.
fn trace_membership(system: &System) -> Result<(), String> {
    let name = system.name().map_err(|e| e.to_string())?.to_string();
    for channel in [SystemChannel::Watch, SystemChannel::Unwatch] {
        let name = name.clone();
        system
            .subscribe(channel, move |event| {
                let (verb, entity) = match event {
                    SystemEvent::Watch(entity) => ("watches", entity),
                    SystemEvent::Unwatch(entity) => ("drops", entity),
                    _ => return,
                };
                if let Ok(id) = entity.id() {
                    println!("  {}", format!("[{name}] {verb} {id}").dimmed());
                }
            })
            .map_err(|e| e.to_string())?;
    }
    Ok(())
}

/// Initialize and start `engine`, then block until it has completed
/// `ticks` ticks and come to a stop.
fn run_for_ticks(engine: &Engine, ticks: u64) -> Result<(), String> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|e| format!("cannot start the runtime: {e}"))?;

    LocalSet::new()
        .block_on(&runtime, drive(engine, ticks))
        .map_err(|e| e.to_string())
}

async fn drive(engine: &Engine, ticks: u64) -> Result<(), EngineError> {
    engine.init()?;
    if ticks == 0 {
        return Ok(());
    }

    let stopped = Rc::new(Notify::new());
    let notify = stopped.clone();
    let on_stop = engine.subscribe(EngineChannel::Stop, move |_| notify.notify_one())?;
    let handle = engine.clone();
    let on_tick = engine.subscribe(EngineChannel::Tick, move |event| {
        if let EngineEvent::Tick(tick) = event {
            if *tick == ticks {
                if let Err(e) = handle.stop() {
                    log::warn!("cannot stop the engine: {e}");
                }
            }
        }
    })?;

    engine.start()?;
    stopped.notified().await;
    on_tick.unsubscribe();
    on_stop.unsubscribe();
    Ok(())
}

/// The component of `component_type` on `entity`, or an error naming both.
fn component(entity: &Entity, component_type: &str) -> anyhow::Result<Component> {
    match entity.component(component_type)? {
        Some(component) => Ok(component),
        None => anyhow::bail!("{} has no {component_type} component", entity.id()?),
    }
}

/// Unsubscribe `subscriptions` once the command is done with them.
fn release(subscriptions: Vec<Subscription>) {
    transvolve_core::event::unsubscribe_all(subscriptions);
}
