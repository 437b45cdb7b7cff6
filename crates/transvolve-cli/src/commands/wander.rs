use std::cell::RefCell;
use std::rc::Rc;

use colored::Colorize;
use comfy_table::{ContentArrangement, Table};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::json;
use transvolve_core::{Component, CoreResult, Disposable, Entity};
use transvolve_engine::{ExecutionContext, System};

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize)]
struct Position {
    x: i64,
    y: i64,
    z: i64,
}

/// Run the wander world with one wanderer per name and print where they ended up.
pub fn run(
    names: &[String],
    ticks: u64,
    interval: u64,
    step: u64,
    seed: u64,
    verbose: bool,
) -> Result<(), String> {
    let engine = super::new_engine(interval)?;
    let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(seed)));

    let wanderers = names
        .iter()
        .map(|name| wanderer(name))
        .collect::<CoreResult<Vec<_>>>()
        .map_err(|e| format!("cannot create a wanderer: {e}"))?;
    engine
        .add_entities(wanderers.iter().cloned())
        .map_err(|e| e.to_string())?;

    let systems = [
        spawn_system()?,
        movement_system(step, rng)?,
        position_system(step)?,
    ];
    if verbose {
        for system in &systems {
            super::trace_membership(system)?;
        }
    }
    engine.add_systems(systems).map_err(|e| e.to_string())?;

    println!(
        "  {} {}",
        "Wander".bold(),
        format!("({ticks} ticks, interval={interval}ms, step={step}ms, seed={seed})").dimmed()
    );
    println!();

    super::run_for_ticks(&engine, ticks)?;

    println!();
    print_positions(&wanderers).map_err(|e| e.to_string())?;
    engine.dispose();
    Ok(())
}

fn wanderer(name: &str) -> CoreResult<Entity> {
    Entity::with_components([
        Component::new("name", json!({ "first": name }))?,
        Component::from_serialize("position", &Position::default())?,
        Component::marker("spawn")?,
    ])
}

fn name_of(ctx: &ExecutionContext) -> anyhow::Result<String> {
    Ok(super::component(&ctx.entity, "name")?.state_at_as("first")?)
}

fn spawn_system() -> Result<System, String> {
    System::builder("spawn")
        .requires(["name", "spawn"])
        .interval_ms(16)
        .executor_fn(|ctx| {
            println!("  {} has come into the world.", name_of(ctx)?.bold());
            ctx.entity.remove_component("spawn")?;
            ctx.entity.add_component(Component::marker("move")?)?;
            Ok(())
        })
        .build()
        .map_err(|e| e.to_string())
}

fn movement_system(step: u64, rng: Rc<RefCell<StdRng>>) -> Result<System, String> {
    System::builder("movement")
        .requires(["name", "position", "move"])
        .interval_ms(step)
        .executor_fn(move |ctx| {
            let name = name_of(ctx)?;
            let component = super::component(&ctx.entity, "position")?;
            let mut position: Position = component.state_as()?;

            let action = match rng.borrow_mut().random_range(0..7) {
                0 => {
                    position.x += 1;
                    "walks east"
                }
                1 => {
                    position.y += 1;
                    "walks north"
                }
                2 => {
                    position.x -= 1;
                    "walks west"
                }
                3 => {
                    position.y -= 1;
                    "walks south"
                }
                4 => {
                    position.z += 1;
                    "climbs up"
                }
                5 => {
                    position.z -= 1;
                    "climbs down"
                }
                _ => "stands idle",
            };
            println!("  {name} {action}.");
            component.set_state_from(&position)?;
            Ok(())
        })
        .build()
        .map_err(|e| e.to_string())
}

fn position_system(step: u64) -> Result<System, String> {
    System::builder("position")
        .requires(["name", "position"])
        .interval_ms(step)
        .executor_fn(|ctx| {
            let name = name_of(ctx)?;
            let Position { x, y, z } =
                super::component(&ctx.entity, "position")?.state_as()?;
            println!(
                "  {}",
                format!("{name} is located at {x}, {y}, {z}").dimmed()
            );
            Ok(())
        })
        .build()
        .map_err(|e| e.to_string())
}

fn print_positions(wanderers: &[Entity]) -> CoreResult<()> {
    println!("  {}", "Final Positions".bold().underline());
    println!();

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Wanderer", "X", "Y", "Z", "Moving"]);
    for entity in wanderers {
        let name: String = match entity.component("name")? {
            Some(name) => name.state_at_as("first")?,
            None => "--".to_string(),
        };
        let position: Position = match entity.component("position")? {
            Some(position) => position.state_as()?,
            None => Position::default(),
        };
        let moving = if entity.has_components(["move"])? {
            "yes"
        } else {
            "no"
        };
        table.add_row(vec![
            name,
            position.x.to_string(),
            position.y.to_string(),
            position.z.to_string(),
            moving.to_string(),
        ]);
    }
    println!("{table}");
    Ok(())
}
