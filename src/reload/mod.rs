//! # Reload strategies.
//!
//! A [`ReloadStrategy`] is a pure predicate deciding whether a running worker must
//! be gracefully recycled. The supervisor evaluates a worker's strategies:
//! - on every [`LifecycleEvent`](crate::LifecycleEvent) emitted by that worker
//!   ([`ReloadEvent::Lifecycle`]);
//! - at every multiple of each of their [`ReloadStrategy::periods`] with
//!   [`ReloadEvent::Timer`], carrying the time spent RUNNING, regardless of traffic.
//!
//! Any strategy returning `true` triggers a reload of that worker.
//!
//! ## Built-ins
//! | Strategy        | Reloads when                                  | Periods  |
//! |-----------------|-----------------------------------------------|----------|
//! | [`Always`]      | any evaluation                                | -        |
//! | [`Never`]       | never                                         | -        |
//! | [`EachRequest`] | a `RequestCounterIncrease` arrives            | -        |
//! | [`OnException`] | an `ExceptionRaised` arrives                  | -        |
//! | [`OnBlocked`]   | a `ProcessBlocked` arrives                    | -        |
//! | [`Periodic`]    | RUNNING for at least `every`                  | `every`  |
//! | [`AnyOf`]       | any child says yes (short-circuit, in order)  | union of children |
//! | [`AllOf`]       | every child says yes (short-circuit, in order)| union of children |

mod composite;
mod strategy;

pub use composite::{AllOf, AnyOf};
pub use strategy::{
    Always, EachRequest, Never, OnBlocked, OnException, Periodic, ReloadEvent, ReloadStrategy,
};
