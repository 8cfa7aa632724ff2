// Copyright (C) 2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of bloglist.
//
// bloglist is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// bloglist is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with bloglist.  If not,
// see <http://www.gnu.org/licenses/>.

//! # Metrics
//!
//! OTel instruments are meant to be built once & reused. Rather than thread each one through the
//! application state, code that emits a metric declares it next to the emitting site:
//!
//! ```ignore
//! inventory::submit! { metrics::Registration::new("blogs.creations.successful", Sort::IntegralCounter) }
//! ...
//! counter_add!(state.instruments, "blogs.creations.successful", 1, &[]);
//! ```
//!
//! and [Instruments::new] collects every declaration at startup. The instruments are exported
//! through the Prometheus registry served at `/metrics`.
//!
//! Emitting to an undeclared name is a bug, but not one worth taking a request down for: it's
//! logged & the value recorded on a one-off instrument.

use std::collections::{HashMap, HashSet};

use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Gauge, Meter},
};
use snafu::{Backtrace, prelude::*};
use tracing::warn;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Metric {name} is declared twice"))]
    Redeclared {
        name: &'static str,
        backtrace: Backtrace,
    },
}

type Result<T> = std::result::Result<T, Error>;

/// What kind of instrument a metric name denotes
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Sort {
    /// A monotonic `u64` counter
    IntegralCounter,
    /// A `u64` gauge (last value wins)
    IntegralGauge,
}

/// A metric declaration; see the module docs
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Registration {
    name: &'static str,
    sort: Sort,
}

impl Registration {
    pub const fn new(name: &'static str, sort: Sort) -> Registration {
        Registration { name, sort }
    }
}

inventory::collect!(Registration);

/// Every declared instrument, by name
pub struct Instruments {
    meter: Meter,
    counters: HashMap<&'static str, Counter<u64>>,
    gauges: HashMap<&'static str, Gauge<u64>>,
}

impl Instruments {
    /// Build every declared instrument on the meter `scope`
    pub fn new(scope: &'static str) -> Result<Instruments> {
        let meter = global::meter(scope);
        let mut seen = HashSet::new();
        let mut counters = HashMap::new();
        let mut gauges = HashMap::new();
        for Registration { name, sort } in inventory::iter::<Registration> {
            ensure!(seen.insert(*name), RedeclaredSnafu { name: *name });
            match sort {
                Sort::IntegralCounter => {
                    counters.insert(*name, meter.u64_counter(*name).build());
                }
                Sort::IntegralGauge => {
                    gauges.insert(*name, meter.u64_gauge(*name).build());
                }
            }
        }
        Ok(Instruments {
            meter,
            counters,
            gauges,
        })
    }
    pub fn add(&self, name: &str, count: u64, attributes: &[KeyValue]) {
        match self.counters.get(name) {
            Some(counter) => counter.add(count, attributes),
            None => {
                warn!("Counter {name} was never declared");
                self.meter
                    .u64_counter(name.to_owned())
                    .build()
                    .add(count, attributes)
            }
        }
    }
    pub fn record(&self, name: &str, value: u64, attributes: &[KeyValue]) {
        match self.gauges.get(name) {
            Some(gauge) => gauge.record(value, attributes),
            None => {
                warn!("Gauge {name} was never declared");
                self.meter
                    .u64_gauge(name.to_owned())
                    .build()
                    .record(value, attributes)
            }
        }
    }
}

/// Bump a declared counter
#[macro_export]
macro_rules! counter_add {
    ($instruments:expr, $name:expr, $n:expr, $attrs:expr) => {
        $instruments.add($name, $n, $attrs)
    };
}

/// Set a declared gauge
#[macro_export]
macro_rules! gauge_set {
    ($instruments:expr, $name:expr, $v:expr, $attrs:expr) => {
        $instruments.record($name, $v, $attrs)
    };
}

#[cfg(test)]
mod test {
    use super::*;

    inventory::submit! { Registration::new("test.widgets", Sort::IntegralCounter) }
    inventory::submit! { Registration::new("test.depth", Sort::IntegralGauge) }

    #[test]
    fn declarations_are_collected() {
        let instruments = Instruments::new("bloglist-test").unwrap();
        assert!(instruments.counters.contains_key("test.widgets"));
        assert!(instruments.gauges.contains_key("test.depth"));
        assert!(!instruments.counters.contains_key("test.depth"));
        // Misuse is logged, not fatal
        counter_add!(instruments, "test.widgets", 2, &[]);
        counter_add!(instruments, "test.undeclared", 1, &[]);
        gauge_set!(instruments, "test.widgets", 7, &[]);
    }
}
