//! Demo/test harness CLI for the flow execution engine: `run`, `debug`,
//! `validate`, and `mock serve` subcommands over a flow document.

pub mod cli;
