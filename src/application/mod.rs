//! Application層: ユースケースの組み立て
//!
//! Domainのポートだけに依存するループ・変換・記録・選択ロジック。

pub mod adapter;
pub mod control_loop;
pub mod governor;
pub mod picker;
pub mod recording;
