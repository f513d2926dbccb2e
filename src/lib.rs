//! # ackbus
//!
//! `ackbus` is an in-memory publish/subscribe broker with at-least-once
//! delivery. Every message a subscription receives is leased to one consumer
//! at a time and stays leased until it is acknowledged, nacked or its ack
//! deadline runs out; messages that keep failing go to a dead-letter topic.
//!
//! ## Core Modules
//!
//! - `broker`: topics, filtered subscriptions, lease tracking and dead-letter routing.
//! - `client`: the handler contract, a topic-bound publisher and the flow-controlled pull consumer.
//! - `transport`: push delivery over HTTP (envelope, axum endpoint, reqwest dispatcher).
//! - `config`: layered configuration loading.
//! - `demo`: the NBA game demo built on top of the broker.
//! - `utils`: error types and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod demo;
pub mod transport;
pub mod utils;
