pub(crate) mod bootstrap;
mod command_port;
pub(crate) mod loop_runner;
mod session;
mod sim;
mod sim_commands;
