//! Test suites for the host bootstrap and serve loop.

mod support;
