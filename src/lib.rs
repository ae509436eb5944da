//! deej: physical sliders → per-application volume
//!
//! A microcontroller streams slider readings over serial. This crate
//! decodes them ([`protocol`], [`link`]), turns them into discrete moves
//! ([`slider`]), fans the moves out ([`events`]) and applies them to the
//! audio sessions each slider is mapped to ([`session`]).

pub mod app;
pub mod config;
pub mod events;
pub mod link;
pub mod notify;
pub mod paths;
pub mod protocol;
pub mod session;
pub mod slider;

pub use app::{App, Backends};
pub use config::{CanonicalConfig, ConfigLoader};
pub use events::EventBus;
pub use slider::SliderMoveEvent;
