//! Integration tests for liveness_probe
//!
//! These tests launch real `liveness-worker` processes and talk to them over
//! HTTP on 127.0.0.1. Each test picks its own free port.
//!
//! Run with: cargo test --test liveness

mod helpers;

mod coordinator;
mod updater;
