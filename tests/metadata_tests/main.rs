//! Metadata table tests

mod manager_tests;
