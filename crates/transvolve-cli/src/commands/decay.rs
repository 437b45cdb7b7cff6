use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use colored::Colorize;
use comfy_table::{ContentArrangement, Table};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use transvolve_core::{Component, CoreResult, Disposable, Entity, EntityManager, Subscribable};
use transvolve_engine::{EngineChannel, System};

const DECAY_TIMER_MS: i64 = 1000;
const DEATH_TIMER_MS: i64 = 5000;
const FULL_HEALTH: i64 = 100;

#[derive(Default)]
struct Tally {
    spawned: Cell<u64>,
    perished: Cell<u64>,
    revived: Cell<u64>,
    crumbled: Cell<u64>,
}

fn bump(counter: &Cell<u64>) {
    counter.set(counter.get() + 1);
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Run the decay world for `ticks` ticks and print the survivors.
pub fn run(ticks: u64, interval: u64, seed: u64, verbose: bool) -> Result<(), String> {
    let engine = super::new_engine(interval)?;
    let manager = engine.manager().map_err(|e| e.to_string())?;
    let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(seed)));
    let tally = Rc::new(Tally::default());

    let systems = [decay_system(rng, tally.clone())?, resurrect_system(tally.clone())?];
    if verbose {
        for system in &systems {
            super::trace_membership(system)?;
        }
    }
    engine.add_systems(systems).map_err(|e| e.to_string())?;

    let spawner = {
        let manager = manager.clone();
        let tally = tally.clone();
        engine
            .subscribe(EngineChannel::Tick, move |_| match spawn(&manager) {
                Ok(()) => bump(&tally.spawned),
                Err(e) => log::warn!("cannot spawn an entity: {e}"),
            })
            .map_err(|e| e.to_string())?
    };

    println!(
        "  {} {}",
        "Decay".bold(),
        format!("({ticks} ticks, interval={interval}ms, seed={seed})").dimmed()
    );
    println!();

    super::run_for_ticks(&engine, ticks)?;
    super::release(vec![spawner]);

    println!();
    print_summary(&manager, &tally).map_err(|e| e.to_string())?;
    engine.dispose();
    Ok(())
}

fn spawn(manager: &EntityManager) -> CoreResult<()> {
    let entity = Entity::with_components([
        Component::new("health", json!({ "hp": FULL_HEALTH }))?,
        Component::marker("decay")?,
    ])?;
    manager.add_entity(entity)
}

fn decay_system(rng: Rc<RefCell<StdRng>>, tally: Rc<Tally>) -> Result<System, String> {
    System::builder("decay")
        .requires(["decay"])
        .interval_ms(100)
        .executor_fn(move |ctx| {
            let entity = &ctx.entity;
            let decay = super::component(entity, "decay")?;

            // A fresh decay marker has no timer and strikes right away.
            let timer = decay.state_at_as::<Option<i64>>("timer")?.unwrap_or(0);
            let timer = timer - millis(ctx.time.delta);
            if timer > 0 {
                decay.set_state_at("timer", json!(timer))?;
                return Ok(());
            }

            let health = super::component(entity, "health")?;
            let hp: i64 = health.state_at_as("hp")?;
            let loss = rng.borrow_mut().random_range(0..100);
            let hp = (hp - loss).max(0);
            health.set_state_at("hp", json!(hp))?;
            if hp > 0 {
                decay.set_state_at("timer", json!(DECAY_TIMER_MS))?;
                return Ok(());
            }

            let id = entity.id()?;
            if rng.borrow_mut().random_range(0..100) >= 50 {
                entity.remove_component("decay")?;
                entity.add_component(Component::new(
                    "death",
                    json!({ "timer": DEATH_TIMER_MS }),
                )?)?;
                bump(&tally.perished);
                println!("  {}  {id} has perished.", "DEATH".red().bold());
            } else {
                entity.dispose();
                bump(&tally.crumbled);
                println!("  {}   {id} crumbles to dust.", "GONE".dimmed());
            }
            Ok(())
        })
        .build()
        .map_err(|e| e.to_string())
}

fn resurrect_system(tally: Rc<Tally>) -> Result<System, String> {
    System::builder("resurrect")
        .requires(["death"])
        .interval_ms(1000)
        .executor_fn(move |ctx| {
            let entity = &ctx.entity;
            let death = super::component(entity, "death")?;
            let timer = death.state_at_as::<i64>("timer")? - millis(ctx.time.delta);
            if timer > 0 {
                death.set_state_at("timer", json!(timer))?;
                return Ok(());
            }

            entity.remove_component("death")?;
            super::component(entity, "health")?.set_state_at("hp", json!(FULL_HEALTH))?;
            entity.add_component(Component::new(
                "decay",
                json!({ "timer": DECAY_TIMER_MS }),
            )?)?;
            bump(&tally.revived);
            println!("  {}  {} has revived.", "ALIVE".green().bold(), entity.id()?);
            Ok(())
        })
        .build()
        .map_err(|e| e.to_string())
}

fn print_summary(manager: &EntityManager, tally: &Tally) -> CoreResult<()> {
    println!("  {}", "Survivors".bold().underline());
    println!();

    let survivors = manager.to_vec()?;
    if survivors.is_empty() {
        println!("  {}", "(none)".dimmed());
    } else {
        let mut table = Table::new();
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec!["Entity", "HP", "State"]);
        for entity in &survivors {
            let hp = match entity.component("health")? {
                Some(health) => health.state_at("hp")?.to_string(),
                None => "--".to_string(),
            };
            let state = if entity.has_components(["death"])? {
                "dead"
            } else {
                "decaying"
            };
            table.add_row(vec![entity.id()?.to_string(), hp, state.to_string()]);
        }
        println!("{table}");
    }
    println!();

    println!(
        "  {} spawned, {} perished, {} revived, {} crumbled",
        tally.spawned.get(),
        tally.perished.get(),
        tally.revived.get(),
        tally.crumbled.get()
    );
    Ok(())
}
