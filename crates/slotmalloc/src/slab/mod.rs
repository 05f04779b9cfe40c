//! Size-classed slot groups and the bookkeeping behind them.

pub mod arena;
pub mod bounce;
pub mod context;
pub mod frame;
pub mod group;
pub mod mask;
pub mod meta;
pub mod size_class;

pub use size_class::size_to_class;
