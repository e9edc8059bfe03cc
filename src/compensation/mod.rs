//! # Compensation Policy
//!
//! Decides whether, when and how a completed step is undone. A policy is an
//! optional [`CompensationAction`] attached to a step; steps without one are
//! compensated immediately through their own compensation action.

pub mod action;
pub mod condition;

pub use action::{
    CompensationAction, CompensationActionBuilder, CompensationStrategy, ManualCompensation,
};
pub use condition::CompensationCondition;
