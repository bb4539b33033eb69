// Compile commands
mod compile;
mod compile_check;

pub use compile::*;
pub use compile_check::*;

// Documentation commands
mod doc;
mod doc_check;
mod doc_test;

pub use doc::*;
pub use doc_check::*;
pub use doc_test::*;

// Lint commands
mod clippy;
mod format;
mod lints;

pub use clippy::*;
pub use format::*;
pub use lints::*;

// Loom test suite commands
mod loom;
mod loom_check;
mod loom_clippy;

pub use loom::*;
pub use loom_check::*;
pub use loom_clippy::*;
pub use loom_test::*;

// Shuttle test suite commands
mod shuttle;
mod shuttle_check;
mod shuttle_clippy;
mod shuttle_test;

pub use shuttle::*;
pub use shuttle_check::*;
pub use shuttle_clippy::*;
pub use shuttle_test::*;
