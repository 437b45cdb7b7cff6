//! Integration tests for the transvolve CLI commands.
#![allow(deprecated)] // Command::cargo_bin – macro replacement not yet stable

use assert_cmd::Command;
use predicates::prelude::*;

fn transvolve() -> Command {
    let mut cmd = Command::cargo_bin("transvolve").unwrap();
    cmd.env("NO_COLOR", "1").env("RUST_LOG", "off");
    cmd
}

#[test]
fn help_lists_commands() {
    transvolve()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("decay"))
        .stdout(predicate::str::contains("wander"));
}

#[test]
fn version_flag() {
    transvolve()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("transvolve"));
}

#[test]
fn unknown_command_fails() {
    transvolve().arg("teleport").assert().failure();
}

#[test]
fn wander_spawns_and_reports_positions() {
    transvolve()
        .args(["wander", "--ticks", "40", "--interval", "1", "--step", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Joe has come into the world."))
        .stdout(predicate::str::contains("Joe is located at"))
        .stdout(predicate::str::contains("Final Positions"));
}

#[test]
fn wander_with_several_names() {
    transvolve()
        .args(["wander", "Ann", "Bob", "--ticks", "40", "--interval", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Ann has come into the world."))
        .stdout(predicate::str::contains("Bob has come into the world."));
}

#[test]
fn wander_zero_ticks_leaves_everyone_in_place() {
    transvolve()
        .args(["wander", "--ticks", "0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("has come into the world").not())
        .stdout(predicate::str::contains("Final Positions"));
}

#[test]
fn decay_prints_tally() {
    transvolve()
        .args(["decay", "--ticks", "20", "--interval", "1", "--seed", "7"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Decay"))
        .stdout(predicate::str::contains("Survivors"))
        .stdout(
            predicate::str::is_match(r"\d+ spawned, \d+ perished, \d+ revived, \d+ crumbled")
                .unwrap(),
        );
}

#[test]
fn decay_zero_ticks_spawns_nothing() {
    transvolve()
        .args(["decay", "--ticks", "0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("(none)"))
        .stdout(predicate::str::contains("0 spawned, 0 perished, 0 revived, 0 crumbled"));
}

#[test]
fn decay_rejects_non_numeric_ticks() {
    transvolve()
        .args(["decay", "--ticks", "many"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}
