//! Copy protocol tests
