//! WebReplay command line: record a browser workflow to a JSON action
//! list and play it back later.

pub mod cli;
pub mod store;
