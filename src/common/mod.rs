pub mod id;
pub mod options;
pub mod value;
pub mod wrapped;

use std::collections::HashSet;
use futures::unsync::oneshot;

pub type RcSet<T> = HashSet<T>;

pub use self::wrapped::SharedCell;

/// One-shot hook fired when a run resolves (result or failure).
pub type RunHook<T> = oneshot::Sender<T>;
