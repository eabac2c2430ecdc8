//! Order placement workflow: the form state machine, the dialog session that
//! binds it to a live quote, and submission/cancel against the gateway.

pub mod dialog;
pub mod form;
pub mod submission;

pub use dialog::OrderDialog;
pub use form::{OrderInstrument, OrderMode, PriceKind};
pub use submission::{OrderSubmission, RefreshHook};
