//! End-to-end tests against throwaway git repositories.

mod cli;
mod common;
mod scheduler_flow;
