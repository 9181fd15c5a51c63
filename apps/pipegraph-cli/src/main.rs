// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Demo binary: loads a pipe graph from YAML and runs it to completion.
//!
//! Stands in for the reference implementation's `examples/*.c`, which each
//! hardcode one graph in C rather than parse one — this binary parses a
//! graph instead, so it can demonstrate more than one topology without
//! recompiling. See `graph.rs` for the loader and `../demo-graphs/` for
//! sample inputs.

mod graph;

use std::cell::RefCell;
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;

use clap::Parser;
use pipegraph_engine::upump::{Pump, PumpManager};
use tokio::sync::Notify;

#[derive(Parser)]
#[command(name = "pipegraph-cli", about = "Loads a pipe graph from YAML and runs it to completion")]
struct Cli {
    /// Path to a graph description (see `graph.rs` for the YAML shape).
    graph: PathBuf,

    /// Tracing filter, e.g. "info" or "pipegraph_modules=debug".
    #[arg(long, default_value = "info")]
    log: String,
}

fn run(cli: &Cli) -> Result<(), pipegraph_core::error::PipeError> {
    let yaml = std::fs::read_to_string(&cli.graph)?;
    let def: graph::GraphDef = serde_saphyr::from_str(&yaml)
        .map_err(|e| pipegraph_core::error::PipeError::Configuration(format!("{} parse error: {e}", cli.graph.display())))?;

    let mut built = graph::build(&def)?;
    tracing::info!(sources = built.sources.len(), sinks = built.summaries.len(), "graph built");

    let mgr = PumpManager::new();
    let done = Rc::new(Notify::new());
    let remaining = Rc::new(std::cell::Cell::new(built.sources.len()));

    // One idler pump per source: each tick feeds the source's next queued
    // uref into the graph; once exhausted, the pump stops itself and, once
    // every source has, resolves `done` so `run_until` returns.
    let had_sources = !built.sources.is_empty();
    let mut pumps = Vec::new();
    for source in built.sources.drain(..) {
        let source = Rc::new(RefCell::new(source));
        let pump_slot: Rc<RefCell<Option<Pump>>> = Rc::new(RefCell::new(None));
        let pump_slot_for_cb = Rc::clone(&pump_slot);
        let remaining_cb = Rc::clone(&remaining);
        let done_cb = Rc::clone(&done);
        let pump = mgr.add_idler(move || {
            let made_progress = source.borrow_mut().step();
            if !made_progress {
                if let Some(pump) = pump_slot_for_cb.borrow().as_ref() {
                    pump.stop();
                }
                remaining_cb.set(remaining_cb.get().saturating_sub(1));
                if remaining_cb.get() == 0 {
                    done_cb.notify_one();
                }
            }
        });
        pump.start();
        *pump_slot.borrow_mut() = Some(pump);
        pumps.push(pump_slot);
    }

    if !had_sources {
        // No sources at all: nothing will ever drive the graph.
        tracing::warn!("graph has no source nodes; nothing to run");
    } else {
        mgr.run_until(async move {
            done.notified().await;
        });
    }
    drop(pumps);

    for (id, summary) in &built.summaries {
        let summary = summary.borrow();
        tracing::info!(
            sink = id.as_str(),
            urefs = summary.uref_count,
            bytes = summary.byte_count,
            samples = summary.sample_count,
            "sink summary"
        );
    }

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::new(cli.log.clone())).init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err}");
            ExitCode::FAILURE
        },
    }
}
