//! Rendering and delivery of new entries.
//!
//! [`Pipeline`] runs two stages joined by a channel: a render stage that turns
//! a [`DispatchJob`] into a [`RenderedMessage`], and a send stage that hands
//! it to a [`Messenger`]. Each stage has its own concurrency limit from
//! [`PipelineConfig`].

mod messenger;
mod pipeline;
mod post;

pub use messenger::{DeliveryError, LogMessenger, Messenger, WebhookMessenger};
pub use pipeline::{DispatchStats, Pipeline, PipelineConfig, PipelineHandle};
pub use post::{DispatchJob, RenderedMessage, Renderer};
