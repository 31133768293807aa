//! Infrastructure層
//!
//! ポートの具体実装。Win32依存はここに閉じ込め、
//! Application層からはポート越しにのみ触れる。

pub mod console_picker;
pub mod inference_client;
pub mod mocks;

#[cfg(windows)]
pub mod process_query;
#[cfg(windows)]
pub mod raw_input;
#[cfg(windows)]
pub mod send_input;
