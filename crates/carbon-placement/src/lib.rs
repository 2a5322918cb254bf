//! Carbon-aware node selection.
//!
//! This crate turns a per-region intensity snapshot into a single node
//! recommendation. It does NOT submit anything (that's
//! `carbon-scheduler`); it only scores nodes through the static
//! node → region map and picks the cleanest one.
//!
//! # Components
//!
//! - **`selector`**: node selection (eligibility, minimum, tie-break)

pub mod selector;

pub use selector::{Selection, SelectionError, select_node};
