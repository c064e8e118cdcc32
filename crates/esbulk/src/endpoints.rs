//! 🎯 Endpoints: which server gets the next request?
//!
//! Trait → concrete impls → enum dispatcher, the same shape as sources and sinks.
//! Selection is per request and never sticky. The server list itself is read-only
//! after startup and lives with the caller; selectors only pick from it.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Deserialize;

/// 🎯 Pick one server out of a non-empty list.
pub trait EndpointSelector: std::fmt::Debug + Send + Sync {
    fn select<'a>(&self, servers: &'a [String]) -> &'a str;
}

/// 🎲 Uniform random choice, independent per call.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSelector;

impl EndpointSelector for RandomSelector {
    fn select<'a>(&self, servers: &'a [String]) -> &'a str {
        if servers.len() == 1 {
            return &servers[0];
        }
        &servers[rand::random_range(0..servers.len())]
    }
}

/// 🔁 Round-robin. The only state is a ticket counter.
#[derive(Debug, Default)]
pub struct RoundRobinSelector {
    next: AtomicUsize,
}

impl EndpointSelector for RoundRobinSelector {
    fn select<'a>(&self, servers: &'a [String]) -> &'a str {
        let ticket = self.next.fetch_add(1, Ordering::Relaxed);
        &servers[ticket % servers.len()]
    }
}

/// 🔧 Which selection policy to use, as it appears in config.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EndpointSelection {
    #[default]
    Random,
    RoundRobin,
}

/// 🎭 The many faces of a selector.
#[derive(Debug)]
pub enum Selector {
    Random(RandomSelector),
    RoundRobin(RoundRobinSelector),
}

impl From<EndpointSelection> for Selector {
    fn from(selection: EndpointSelection) -> Self {
        match selection {
            EndpointSelection::Random => Selector::Random(RandomSelector),
            EndpointSelection::RoundRobin => Selector::RoundRobin(RoundRobinSelector::default()),
        }
    }
}

impl EndpointSelector for Selector {
    fn select<'a>(&self, servers: &'a [String]) -> &'a str {
        match self {
            Selector::Random(s) => s.select(servers),
            Selector::RoundRobin(s) => s.select(servers),
        }
    }
}
