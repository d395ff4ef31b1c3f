//! Revision lifecycle and scheduled publication for multi-site content.
//!
//! Revisions move through DRAFT → REVIEW → SCHEDULED → PUBLISHED under the
//! rules in [`revision::machine`]. [`revision::WorkflowService`] applies those
//! transitions atomically through a [`store::WorkflowStore`], announces
//! publication actions on the [`events::bus::EventBus`], and
//! [`dispatch::IntegrationDispatcher`] turns them into webhooks and search
//! index updates after commit.

pub mod audit;
pub mod content;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod revision;
pub mod scheduler;
pub mod store;
pub mod time;
