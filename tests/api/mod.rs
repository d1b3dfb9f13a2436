//! REST API tests

mod auth_tests;
mod health_tests;
mod logging_tests;
