pub mod frame;
pub mod mock;
pub mod spi;
pub mod tester;
pub mod types;

// Re-export the main types that users need
pub use frame::{build_test_frame, format_hex, FrameCounter, FRAME_LEN};
pub use spi::SpiDevice;
pub use tester::LoopbackTester;
pub use types::{ChannelConfig, LoopbackError, RunConfig, RunSummary, StopReason, TesterConfig};
