//! Core types shared by every destination.

mod analytics;
mod job;
mod outcome;
mod schedule;
mod secret;

pub use analytics::{
    Alias, AppInfo, Common, Context, DeviceInfo, Group, Identify, Integrations, LocationInfo,
    NetworkInfo, OsInfo, Page, PageInfo, Properties, Screen, Track, Traits,
};
pub use job::{Batch, Event, Job};
pub use outcome::Outcome;
pub use schedule::{DestinationOptions, Schedule, DEFAULT_INTERVAL, DEFAULT_MAX_RETRIES};
pub use secret::Secret;
