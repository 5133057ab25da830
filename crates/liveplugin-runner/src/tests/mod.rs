//! Test suites for the live plugin runner.

mod behaviour;
