//! Event delivery for loop observability
//!
//! Loops never call sinks directly. They emit into a bounded channel that a
//! single dispatcher drains; the dispatcher owns all sinks and all of their
//! failure handling.
//!
//! # Architecture
//!
//! ```text
//!   RetryEngine    ValidationLoop    ImprovementCycleTracker
//!    │   │               │                    │
//!    │   └──── EventEmitter::emit (try_send, never blocks) ──┐
//!    │                                                       ▼
//!    │  ┌─────────────────────────────────────────────────────────────┐
//!    │  │                 bounded tokio::sync::mpsc                    │
//!    │  │           full channel => event dropped and counted          │
//!    │  └─────────────────────────────────────────────────────────────┘
//!    │                           │
//!    │                           ▼
//!    │                  EventDispatcher::run
//!    │            (catches sink errors and panics)
//!    │                           │
//!    │                ┌──────────┴──────────┐
//!    │                ▼                     ▼
//!    │           TracingSink            MemorySink
//!    ▼
//!  SessionRecorder (closed attempts, written directly)
//!  session.jsonl
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let (bus, dispatcher) = EventBus::with_default_capacity();
//! let handle = dispatcher.with_sink(Arc::new(TracingSink)).spawn();
//! let session = Arc::new(SessionRecorder::new(&sessions_dir));
//!
//! let engine = RetryEngine::builder()
//!     .events(bus.emitter_for("run-42"))
//!     .session(session)
//!     // ...
//!     ;
//!
//! drop(bus);
//! let stats = handle.await?;
//! ```

mod bus;
mod session;
mod sink;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, DispatchStats, EventBus, EventDispatcher, EventEmitter};
pub use session::{SessionLog, SessionRecord, SessionRecorder, read_session};
pub use sink::{MemorySink, NotificationSink, SinkError, TracingSink};
pub use types::EngineEvent;
