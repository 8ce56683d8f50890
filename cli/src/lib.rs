pub mod pipeline;
pub mod pyrodenoise_commands;
