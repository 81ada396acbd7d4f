//! feed-discovery — polls feed sources on a schedule and stores new items.
//!
//! ## Architecture overview
//!
//! ```text
//!              tick         try_spawn          execute
//! ┌───────────┐ ───► ┌──────────────┐ ───► ┌────────────┐ ───► ┌──────────────┐
//! │ registry  │      │  scheduler   │      │    pool    │      │   executor   │
//! │ (due?)    │ ◄─── │ (tick loop)  │      │ (bounded)  │      │ fetch+store  │
//! └───────────┘      └──────────────┘      └────────────┘      └──────┬───────┘
//!       ▲                   ▲                     ▲                   │ outcome
//!       │                   │ cancel              │ drain             ▼
//!       │            ┌──────────────┐             │            ┌──────────────┐
//!       └─────────── │   shutdown   │ ────────────┘            │   tracker    │
//!                    └──────────────┘                          └──────────────┘
//! ```
//!
//! * **`source/`** — the [`Source`](source::Source) record, the
//!   [`SourceFetcher`](source::SourceFetcher) trait and the RSS fetcher.
//! * **`registry`** — which sources are due; per-source persisted updates.
//! * **`tracker`** — consecutive-failure counting and auto-disable.
//! * **`feed_store`** — where discovered items go; owns de-duplication.
//! * **`pool`** — caps concurrent fetches and keeps each source to one.
//! * **`executor`** — one timed fetch-and-store cycle.
//! * **`scheduler`** — the tick loop.
//! * **`shutdown`** — stop signal and bounded drain.
//! * **`service`** — ties the above together behind `run` / `stop`.

pub mod config;
pub mod error;
pub mod executor;
pub mod feed_store;
pub mod pool;
pub mod registry;
pub mod scheduler;
pub mod service;
pub mod shutdown;
pub mod source;
pub mod tracker;

pub use config::{DiscoveryConfig, SHUTDOWN_DEADLINE, TICK_INTERVAL};
pub use error::DiscoveryError;
pub use service::DiscoveryService;
pub use shutdown::ShutdownTrigger;
