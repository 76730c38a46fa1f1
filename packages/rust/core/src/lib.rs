//! Scene generation pipeline and domain logic for Storyboard.
//!
//! This crate ties the persisted scene list, the rolling context, the
//! generation service and the screenplay export into one sequential run
//! (see [`pipeline::Pipeline`]).

pub mod context;
pub mod credentials;
pub mod export;
pub mod generation;
pub mod pipeline;
pub mod scenes;
