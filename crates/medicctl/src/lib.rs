//! Medic Control - command-line front end for medic
//!
//! Argument parsing lives in `cli`, command execution in `commands` and
//! signal handling in `shutdown`.

pub mod cli;
pub mod commands;
pub mod shutdown;
