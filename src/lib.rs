//! Client data layer of the Sense analytics dashboard.
//!
//! The pieces, bottom up:
//!
//! - [`locator`]: view state <-> shareable query string
//! - [`store`]: the single owner of a view's state
//! - [`cache`]: keyed stale-while-revalidate request cache
//! - [`normalize`]: raw service payloads -> canonical entities
//! - [`viewmodel`]: entities + view state -> what gets rendered
//! - [`preferences`]: locally persisted watchlist and portfolio
//!
//! [`context::DashboardContext`] wires them to a [`remote::RemoteSource`].

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod locator;
pub mod logging;
pub mod normalize;
pub mod preferences;
pub mod query;
pub mod remote;
pub mod store;
pub mod viewmodel;

pub use context::DashboardContext;
pub use error::{ContractError, FetchError, PreferenceError};
pub use locator::{SortKey, ViewState};
