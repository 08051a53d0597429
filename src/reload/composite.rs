//! Logical combinators over strategies.
//!
//! Children are evaluated left to right and evaluation stops at the first
//! deciding answer. A composite asks for a timer evaluation at every child
//! period ([`ReloadStrategy::periods`]); each timer child decides from the
//! elapsed time whether its own period is due, so wrapping never speeds it up.

use std::sync::Arc;
use std::time::Duration;

use super::strategy::{ReloadEvent, ReloadStrategy};

fn min_interval(children: &[Arc<dyn ReloadStrategy>]) -> Option<Duration> {
    children.iter().filter_map(|c| c.interval()).min()
}

fn all_periods(children: &[Arc<dyn ReloadStrategy>]) -> Vec<Duration> {
    let mut periods: Vec<Duration> = children.iter().flat_map(|c| c.periods()).collect();
    periods.sort();
    periods.dedup();
    periods
}

/// Reloads when any child does. Empty means never.
#[derive(Clone, Debug, Default)]
pub struct AnyOf {
    children: Vec<Arc<dyn ReloadStrategy>>,
}

impl AnyOf {
    /// Creates a composite over `children`, evaluated in order.
    pub fn new(children: Vec<Arc<dyn ReloadStrategy>>) -> Self {
        Self { children }
    }

    /// Appends a child.
    pub fn or(mut self, child: impl ReloadStrategy) -> Self {
        self.children.push(Arc::new(child));
        self
    }
}

impl ReloadStrategy for AnyOf {
    fn should_reload(&self, event: &ReloadEvent<'_>) -> bool {
        self.children.iter().any(|c| c.should_reload(event))
    }

    fn interval(&self) -> Option<Duration> {
        min_interval(&self.children)
    }

    fn periods(&self) -> Vec<Duration> {
        all_periods(&self.children)
    }
}

/// Reloads when every child does. Empty means never.
#[derive(Clone, Debug, Default)]
pub struct AllOf {
    children: Vec<Arc<dyn ReloadStrategy>>,
}

impl AllOf {
    /// Creates a composite over `children`, evaluated in order.
    pub fn new(children: Vec<Arc<dyn ReloadStrategy>>) -> Self {
        Self { children }
    }

    /// Appends a child.
    pub fn and(mut self, child: impl ReloadStrategy) -> Self {
        self.children.push(Arc::new(child));
        self
    }
}

impl ReloadStrategy for AllOf {
    fn should_reload(&self, event: &ReloadEvent<'_>) -> bool {
        !self.children.is_empty() && self.children.iter().all(|c| c.should_reload(event))
    }

    fn interval(&self) -> Option<Duration> {
        min_interval(&self.children)
    }

    fn periods(&self) -> Vec<Duration> {
        all_periods(&self.children)
    }
}
