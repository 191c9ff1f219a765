pub mod analysis;
pub mod thunk;

pub use self::analysis::{analyze_dag, DagInfo};
pub use self::thunk::{Thunk, ThunkFlags, ThunkInput, ThunkRef};
