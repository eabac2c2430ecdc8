mod startup;

pub use startup::{build_state, initialize_on_startup};
