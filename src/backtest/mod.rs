pub mod settlement;
pub mod simulator;
pub mod summary;

pub use simulator::{run_backtest, BacktestParams, BacktestSimulator, ReplayState};
pub use summary::{summarize, BacktestSummary};
