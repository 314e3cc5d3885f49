//! Case sessions
//!
//! A session is the owned lifetime of one open case: it wires the
//! repository to the bus and owns the timers that coalesce reconcile
//! requests.

mod debounce;
#[allow(clippy::module_inception)]
mod session;

pub use debounce::Debouncer;
pub use session::CaseSession;
