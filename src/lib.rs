//! Project/calendar-event link synchronization.
//!
//! calink keeps a relational project/event membership table consistent with
//! a mutable, recurrence-capable iCalendar store. Events carry free-text
//! category labels; a label equal to a known project name means "this event
//! instance belongs to that project". The crate derives which project owns
//! which concrete recurrence instance and keeps that mapping live under
//! inserts, updates, deletions and recurrence-rule mutations, including
//! series split across UIDs via RELATED-TO.
//!
//! The calendar transport and link storage live behind the [`store::CalendarStore`]
//! and [`links::LinkRepository`] seams; [`service::EventLinkService`] is the
//! caller-facing surface.

pub mod cache;
pub mod deletion;
pub mod error;
pub mod event;
pub mod ics;
pub mod links;
pub mod membership;
pub mod project;
pub mod recurrence;
pub mod related;
pub mod service;
pub mod store;
pub mod sync;
pub mod unchain;

pub use error::{CalinkError, CalinkResult};
pub use event::*;
pub use links::{LinkId, NewProjectEventLink, ProjectEventLink, SeriesUid};
pub use project::{Project, ProjectId};
pub use service::{EventLinkService, ProjectEvent};
pub use sync::SyncOutcome;
